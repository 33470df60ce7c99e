//! Serde helpers for configuration values

/// Serializes `Duration` as floating-point seconds.
///
/// Use with `#[serde(with = "crate::core::serde::duration_secs")]`.
pub mod duration_secs {
    use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|_| de::Error::custom(format!("invalid duration: {} seconds", secs)))
    }
}
