use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;

/// Serializes Duration as whole milliseconds
pub fn serialize_duration_ms<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
    millis.serialize(serializer)
}

/// Deserializes Duration from whole milliseconds
pub fn deserialize_duration_ms<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let millis = u64::deserialize(deserializer)?;
    Ok(Duration::from_millis(millis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json;

    #[derive(Serialize, Deserialize)]
    struct Test {
        #[serde(serialize_with = "serialize_duration_ms")]
        #[serde(deserialize_with = "deserialize_duration_ms")]
        interval: Duration,
    }

    #[test]
    fn test_duration_serialization() {
        let original = Test {
            interval: Duration::from_millis(1500),
        };

        let serialized = serde_json::to_string(&original).unwrap();
        assert_eq!(serialized, r#"{"interval":1500}"#);

        let deserialized: Test = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized.interval, original.interval);
    }

    #[test]
    fn test_sub_millisecond_precision_is_dropped() {
        let original = Test {
            interval: Duration::from_micros(2_999),
        };
        let serialized = serde_json::to_string(&original).unwrap();
        assert_eq!(serialized, r#"{"interval":2}"#);
    }
}
