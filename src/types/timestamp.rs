//! Serde adapters for timestamps carried as fractional Unix seconds.
//!
//! The session API encodes `created_at`, message `timestamp`, and friends as
//! floating point seconds since the epoch.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serializer};

fn to_seconds(value: &DateTime<Utc>) -> f64 {
    value.timestamp_micros() as f64 / 1_000_000.0
}

fn from_seconds<E: serde::de::Error>(secs: f64) -> Result<DateTime<Utc>, E> {
    if !secs.is_finite() {
        return Err(E::custom("timestamp is not a finite number"));
    }
    let micros = (secs * 1_000_000.0).round() as i64;
    Utc.timestamp_micros(micros)
        .single()
        .ok_or_else(|| E::custom(format!("timestamp out of range: {secs}")))
}

pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(to_seconds(value))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    from_seconds(f64::deserialize(deserializer)?)
}

/// Same encoding for optional fields.
pub mod option {
    use super::*;

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_some(&to_seconds(v)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        Option::<f64>::deserialize(deserializer)?
            .map(from_seconds)
            .transpose()
    }
}

/// Lenient reader for event `ts` values: RFC 3339 strings or Unix seconds.
/// Null, empty and unparseable strings read as no timestamp.
pub mod lenient {
    use super::*;
    use serde_json::Value;

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Null => Ok(None),
            Value::String(s) if s.trim().is_empty() => Ok(None),
            // An unparseable stamp should not cost the event itself.
            Value::String(s) => Ok(DateTime::parse_from_rfc3339(s.trim())
                .ok()
                .map(|dt| dt.with_timezone(&Utc))),
            Value::Number(n) => n
                .as_f64()
                .ok_or_else(|| serde::de::Error::custom("timestamp is not a number"))
                .and_then(from_seconds)
                .map(Some),
            other => Err(serde::de::Error::custom(format!(
                "unsupported timestamp value: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Stamped {
        #[serde(with = "super")]
        at: DateTime<Utc>,
        #[serde(default, with = "super::option")]
        maybe: Option<DateTime<Utc>>,
    }

    #[test]
    fn encodes_as_fractional_seconds() {
        let at = Utc.timestamp_millis_opt(1_700_000_000_250).unwrap();
        let json = serde_json::to_value(Stamped { at, maybe: None }).unwrap();
        assert_eq!(json["at"], serde_json::json!(1_700_000_000.25));
        assert!(json["maybe"].is_null());
    }

    #[test]
    fn decodes_python_style_floats() {
        let parsed: Stamped = serde_json::from_str(r#"{"at": 1700000000.5}"#).unwrap();
        assert_eq!(parsed.at.timestamp_millis(), 1_700_000_000_500);
        assert!(parsed.maybe.is_none());
    }
}
