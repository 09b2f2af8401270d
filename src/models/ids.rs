use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

/// Ids arrive from the server either as JSON numbers or as numeric strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Int(i64),
    Str(String),
}

impl RawId {
    fn into_i64(self) -> Result<Option<i64>, String> {
        match self {
            RawId::Int(v) => Ok(Some(v)),
            RawId::Str(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Ok(None);
                }
                trimmed
                    .parse()
                    .map(Some)
                    .map_err(|_| format!("invalid id: {:?}", s))
            }
        }
    }
}

fn deserialize_required<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    RawId::deserialize(deserializer)?
        .into_i64()
        .map_err(de::Error::custom)?
        .ok_or_else(|| de::Error::custom("missing id"))
}

/// Deserialize an optional id. `null`, `""` and `0` all mean "no id".
pub fn deserialize_optional<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: From<i64>,
{
    match Option::<RawId>::deserialize(deserializer)? {
        None => Ok(None),
        Some(raw) => match raw.into_i64().map_err(de::Error::custom)? {
            Some(0) | None => Ok(None),
            Some(v) => Ok(Some(T::from(v))),
        },
    }
}

macro_rules! server_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(v: i64) -> Self {
                Self(v)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse().map(Self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                deserialize_required(deserializer).map(Self)
            }
        }
    };
}

server_id!(
    /// Server-assigned project id.
    ProjectId
);
server_id!(
    /// Server-assigned conversation id.
    ConversationId
);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Deserialize)]
    struct Wrapper {
        #[serde(default, deserialize_with = "deserialize_optional")]
        conversation_id: Option<ConversationId>,
    }

    #[test]
    fn test_ids_accept_numbers_and_strings() {
        let a: ProjectId = serde_json::from_value(json!(7)).unwrap();
        let b: ProjectId = serde_json::from_value(json!("7")).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "7");
        assert!(serde_json::from_value::<ProjectId>(json!("seven")).is_err());
        assert!(serde_json::from_value::<ProjectId>(json!("")).is_err());
    }

    #[test]
    fn test_optional_id_treats_blank_values_as_absent() {
        for value in [json!(null), json!(""), json!(0), json!("0")] {
            let w: Wrapper = serde_json::from_value(json!({ "conversation_id": value })).unwrap();
            assert_eq!(w.conversation_id, None);
        }
        let w: Wrapper = serde_json::from_value(json!({})).unwrap();
        assert_eq!(w.conversation_id, None);

        let w: Wrapper = serde_json::from_value(json!({ "conversation_id": "42" })).unwrap();
        assert_eq!(w.conversation_id, Some(ConversationId(42)));
    }
}
