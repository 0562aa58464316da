//! Configuration system (layered: code > env > config file > defaults).

use std::path::{Path, PathBuf};
use std::time::Duration;

use bon::Builder;
use regex::Regex;
use serde::Deserialize;
use tracing::warn;

use crate::error::{EventideError, Result};
use crate::stream::StreamScope;

/// Default playground backend address.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";

/// Default session validity window (10 minutes).
pub const DEFAULT_SESSION_TTL_MS: u64 = 600_000;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

/// Client configuration.
///
/// Resolution order:
/// 1. Values set in code (builder or field assignment)
/// 2. Environment variables (`.env` is loaded if present)
/// 3. The TOML file named by `EVENTIDE_CONFIG`, or `<data_dir>/config.toml`
/// 4. Built-in defaults
#[derive(Debug, Clone, Builder)]
pub struct EventideConfig {
    /// Base URL for invoke, agent, and session calls.
    #[builder(into, default = DEFAULT_BASE_URL.to_string())]
    pub base_url: String,
    /// Base URL for event streams; falls back to `base_url`.
    #[builder(into)]
    pub stream_base_url: Option<String>,
    /// How long a session stays valid after creation (or after its last invoke).
    #[builder(default = Duration::from_millis(DEFAULT_SESSION_TTL_MS))]
    pub session_ttl: Duration,
    /// Optional limit on how long a turn may stream before it is failed locally.
    pub turn_timeout: Option<Duration>,
    /// Whether event streams are keyed by thread or by thread and turn.
    #[builder(default)]
    pub stream_scope: StreamScope,
    /// Timeout for non-streaming HTTP requests.
    #[builder(default = Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))]
    pub request_timeout: Duration,
    /// Directory for the file-backed session store.
    #[builder(default = default_data_dir())]
    pub data_dir: PathBuf,
}

impl Default for EventideConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// On-disk TOML form. Durations use the `15m` / `30s` notation.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    base_url: Option<String>,
    stream_base_url: Option<String>,
    session_ttl: Option<String>,
    turn_timeout: Option<String>,
    stream_scope: Option<StreamScope>,
    request_timeout: Option<String>,
    data_dir: Option<PathBuf>,
}

impl EventideConfig {
    /// Defaults overlaid with the config file (if any) and then the environment.
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let path = std::env::var("EVENTIDE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir().join("config.toml"));
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    /// Defaults overlaid with environment variables only.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Parse a TOML config file on top of the defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Parse TOML config text on top of the defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(raw)
            .map_err(|e| EventideError::Configuration(format!("invalid config file: {e}")))?;
        let mut config = Self::default();
        if let Some(url) = file.base_url {
            config.base_url = url;
        }
        config.stream_base_url = file.stream_base_url;
        if let Some(ttl) = file.session_ttl {
            config.session_ttl = parse_duration(&ttl);
        }
        if let Some(timeout) = file.turn_timeout {
            config.turn_timeout = Some(strict_duration("turn_timeout", &timeout)?);
        }
        if let Some(scope) = file.stream_scope {
            config.stream_scope = scope;
        }
        if let Some(timeout) = file.request_timeout {
            config.request_timeout = strict_duration("request_timeout", &timeout)?;
        }
        if let Some(dir) = file.data_dir {
            config.data_dir = dir;
        }
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("EVENTIDE_BASE_URL") {
            self.base_url = url;
        }
        if let Ok(url) = std::env::var("EVENTIDE_STREAM_URL") {
            self.stream_base_url = Some(url);
        }
        if let Ok(ttl) = std::env::var("EVENTIDE_SESSION_TTL") {
            self.session_ttl = parse_duration(&ttl);
        }
        if let Ok(timeout) = std::env::var("EVENTIDE_TURN_TIMEOUT") {
            match try_parse_duration(&timeout) {
                Some(d) => self.turn_timeout = Some(d),
                None => warn!(value = %timeout, "Ignoring invalid EVENTIDE_TURN_TIMEOUT"),
            }
        }
        if let Ok(scope) = std::env::var("EVENTIDE_STREAM_SCOPE") {
            match scope.parse() {
                Ok(scope) => self.stream_scope = scope,
                Err(_) => warn!(value = %scope, "Ignoring invalid EVENTIDE_STREAM_SCOPE"),
            }
        }
        if let Ok(dir) = std::env::var("EVENTIDE_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
    }

    /// Base URL used for event streams.
    pub fn stream_base_url(&self) -> &str {
        self.stream_base_url.as_deref().unwrap_or(&self.base_url)
    }

    /// Session validity window in milliseconds.
    pub fn session_ttl_ms(&self) -> u64 {
        self.session_ttl.as_millis() as u64
    }
}

/// Parse a duration like `15m`, `1h`, `30s`, or `2d`.
///
/// Invalid input logs a warning and yields the 10 minute default.
pub fn parse_duration(value: &str) -> Duration {
    try_parse_duration(value).unwrap_or_else(|| {
        if !value.is_empty() {
            warn!(value, "Invalid duration format, using default 10m");
        }
        Duration::from_millis(DEFAULT_SESSION_TTL_MS)
    })
}

/// Parse a duration like `15m`, returning `None` when the format is wrong.
pub fn try_parse_duration(value: &str) -> Option<Duration> {
    let re = Regex::new(r"^(\d+)([smhd])$").ok()?;
    let lowered = value.trim().to_ascii_lowercase();
    let caps = re.captures(&lowered)?;
    let amount: u64 = caps[1].parse().ok()?;
    let unit_secs = match &caps[2] {
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 24 * 60 * 60,
        _ => return None,
    };
    Some(Duration::from_secs(amount.checked_mul(unit_secs)?))
}

fn strict_duration(field: &str, value: &str) -> Result<Duration> {
    try_parse_duration(value)
        .ok_or_else(|| EventideError::Configuration(format!("invalid duration for {field}: {value}")))
}

fn default_data_dir() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".eventide"))
        .unwrap_or_else(|| PathBuf::from(".eventide"))
}
