//! Serde helpers for human-readable durations in config structs.
//!
//! Serializes as a millisecond string ("500ms"); accepts "ms", "s",
//! "m", and "h" suffixes or a bare number of milliseconds.

use serde::{Deserializer, Serializer};
use std::time::Duration;

pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format!("{}ms", duration.as_millis()))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    use serde::Deserialize;
    use serde_json::Value;

    match Value::deserialize(deserializer)? {
        Value::String(raw) => parse_duration(&raw).map_err(Error::custom),
        Value::Number(n) => {
            let millis = n
                .as_u64()
                .ok_or_else(|| Error::custom("negative or fractional duration"))?;
            Ok(Duration::from_millis(millis))
        }
        _ => Err(Error::custom("expected a duration string or number")),
    }
}

fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("empty duration".to_string());
    }

    let (digits, unit_millis) = if let Some(stripped) = raw.strip_suffix("ms") {
        (stripped, 1u64)
    } else if let Some(stripped) = raw.strip_suffix('h') {
        (stripped, 3_600_000)
    } else if let Some(stripped) = raw.strip_suffix('m') {
        (stripped, 60_000)
    } else if let Some(stripped) = raw.strip_suffix('s') {
        (stripped, 1_000)
    } else {
        (raw, 1)
    };

    let value: u64 = digits
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration: {raw}"))?;
    Ok(Duration::from_millis(value * unit_millis))
}
