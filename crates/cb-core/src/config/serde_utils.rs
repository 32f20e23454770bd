//! Serde helpers shared by the configuration types

/// `Duration` stored as seconds
///
/// Whole durations are written as integers (`heartbeat_interval = 15`);
/// sub-second durations fall back to a float (`heartbeat_interval = 0.5`).
/// Both forms are accepted when reading. Negative and non-finite values
/// are rejected.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Config {
///     #[serde(with = "cb_core::config::serde_utils::duration_secs")]
///     interval: Duration,
/// }
/// ```
pub mod duration_secs {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Secs {
        Whole(u64),
        Fractional(f64),
    }

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_nanos() == 0 {
            serializer.serialize_u64(duration.as_secs())
        } else {
            serializer.serialize_f64(duration.as_secs_f64())
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Secs::deserialize(deserializer)? {
            Secs::Whole(secs) => Ok(Duration::from_secs(secs)),
            Secs::Fractional(secs) => Duration::try_from_secs_f64(secs)
                .map_err(|e| D::Error::custom(format!("invalid duration {secs}: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Interval {
        #[serde(with = "duration_secs")]
        every: Duration,
    }

    #[test]
    fn test_whole_seconds_written_as_integer() {
        let json = serde_json::to_string(&Interval {
            every: Duration::from_secs(15),
        })
        .unwrap();
        assert_eq!(json, r#"{"every":15}"#);
    }

    #[test]
    fn test_sub_second_written_as_float() {
        let json = serde_json::to_string(&Interval {
            every: Duration::from_millis(250),
        })
        .unwrap();
        assert_eq!(json, r#"{"every":0.25}"#);
    }

    #[test]
    fn test_reads_both_forms() {
        let whole: Interval = toml::from_str("every = 30").unwrap();
        assert_eq!(whole.every, Duration::from_secs(30));

        let frac: Interval = toml::from_str("every = 1.5").unwrap();
        assert_eq!(frac.every, Duration::from_millis(1500));
    }

    #[test]
    fn test_rejects_negative() {
        assert!(toml::from_str::<Interval>("every = -1.0").is_err());
        assert!(toml::from_str::<Interval>("every = \"soon\"").is_err());
    }
}
