//! Shared HTTP helpers for the playground backend clients.

use reqwest::Response;

use crate::config::EventideConfig;
use crate::error::{status_to_error, Result};

/// Client for request/response calls, bounded by `request_timeout`.
pub(crate) fn request_client(config: &EventideConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(config.request_timeout)
        .pool_max_idle_per_host(10)
        .build()?)
}

/// `base` without trailing slashes.
pub(crate) fn normalize_base(base: &str) -> String {
    base.trim_end_matches('/').to_string()
}

/// Pass 2xx responses through; map anything else to an error.
pub(crate) async fn ensure_success(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(status_to_error(status.as_u16(), &body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slashes_are_dropped() {
        assert_eq!(normalize_base("http://a.local///"), "http://a.local");
        assert_eq!(normalize_base("http://a.local"), "http://a.local");
    }
}
