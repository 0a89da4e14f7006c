//! RFC 3339, millisecond-precision (de)serialization for `DateTime<Utc>`
//! wire fields (§6: "timestamps RFC 3339 with millisecond precision").
//! chrono's own `serde` impl round-trips at nanosecond precision, which is
//! more than the contract promises; every `DateTime<Utc>` field that's part
//! of a serialized wire or on-disk JSON shape uses `#[serde(with = "...")]`
//! against this module (or its `option` submodule) instead of chrono's
//! default.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serializer};

pub fn serialize<S>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(serde::de::Error::custom)
}

/// The `Option<DateTime<Utc>>` counterpart, for fields like `endTime` that
/// are absent until a service reaches a terminal state.
pub mod option {
    use super::*;

    pub fn serialize<S>(dt: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match dt {
            Some(dt) => {
                serializer.serialize_some(&dt.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(serde::de::Error::custom)
        })
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Wrapper {
        #[serde(with = "super")]
        at: DateTime<Utc>,
        #[serde(with = "super::option")]
        maybe_at: Option<DateTime<Utc>>,
    }

    #[test]
    fn serializes_at_millisecond_precision() {
        let dt = "2024-01-01T12:00:00.123456789Z".parse::<DateTime<Utc>>().unwrap();
        let wrapper = Wrapper {
            at: dt,
            maybe_at: Some(dt),
        };
        let json = serde_json::to_value(&wrapper).unwrap();
        assert_eq!(json["at"], "2024-01-01T12:00:00.123Z");
        assert_eq!(json["maybe_at"], "2024-01-01T12:00:00.123Z");
    }

    #[test]
    fn none_serializes_to_null_and_round_trips() {
        let wrapper = Wrapper {
            at: Utc::now(),
            maybe_at: None,
        };
        let json = serde_json::to_string(&wrapper).unwrap();
        let parsed: Wrapper = serde_json::from_str(&json).unwrap();
        assert!(parsed.maybe_at.is_none());
    }

    #[test]
    fn round_trips_through_string_form() {
        let dt = Utc::now();
        let wrapper = Wrapper {
            at: dt,
            maybe_at: Some(dt),
        };
        let json = serde_json::to_string(&wrapper).unwrap();
        let parsed: Wrapper = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.at.timestamp_millis(), dt.timestamp_millis());
        assert_eq!(parsed.maybe_at.unwrap().timestamp_millis(), dt.timestamp_millis());
    }
}
