use std::time::Duration;

use serde::{Deserialize, Deserializer};

pub fn deserialize_human_duration_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let buf = Option::<String>::deserialize(deserializer)?;
    buf.map(|b| humantime::parse_duration(&b).map_err(serde::de::Error::custom))
        .transpose()
}

/// Reads a duration in milliseconds from the environment variable `key`.
///
/// An unset variable is `Ok(None)`, a value that is not a number is an error.
pub fn get_duration_from_env(key: &str) -> Result<Option<Duration>, String> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map(|millis| Some(Duration::from_millis(millis)))
            .map_err(|_| format!("`{key}` has to be a number of milliseconds, not `{value}`")),
        Err(_) => Ok(None),
    }
}
