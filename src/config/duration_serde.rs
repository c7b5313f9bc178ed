//! Serde helpers for human-readable durations in configuration.

/// Duration written as a humantime string ("30s", "1m30s") and read back from
/// either such a string or a whole number of seconds
pub mod duration {
    use serde::{Deserialize, Deserializer, Serializer, de};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawDuration {
        Seconds(u64),
        Text(String),
    }

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&humantime::format_duration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        match RawDuration::deserialize(deserializer)? {
            RawDuration::Seconds(seconds) => Ok(Duration::from_secs(seconds)),
            RawDuration::Text(text) => humantime::parse_duration(text.trim())
                .map_err(|e| de::Error::custom(format!("invalid duration '{text}': {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, Serialize, Deserialize)]
    struct Shutdown {
        #[serde(with = "super::duration")]
        timeout: Duration,
    }

    #[test]
    fn test_parse_human_readable() {
        let parsed: Shutdown = toml::from_str(r#"timeout = "1m30s""#).unwrap();
        assert_eq!(parsed.timeout, Duration::from_secs(90));
    }

    #[test]
    fn test_parse_seconds() {
        let parsed: Shutdown = toml::from_str("timeout = 45").unwrap();
        assert_eq!(parsed.timeout, Duration::from_secs(45));
    }

    #[test]
    fn test_negative_and_garbage_rejected() {
        assert!(toml::from_str::<Shutdown>("timeout = -5").is_err());
        assert!(toml::from_str::<Shutdown>(r#"timeout = "soon""#).is_err());
    }

    #[test]
    fn test_written_as_humantime() {
        let written = toml::to_string(&Shutdown {
            timeout: Duration::from_secs(150),
        })
        .unwrap();
        assert_eq!(written.trim(), r#"timeout = "2m 30s""#);
    }
}
