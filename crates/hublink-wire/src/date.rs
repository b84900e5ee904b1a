//! Wire date format.
//!
//! Dates inside bodies are RFC 3339 timestamps in UTC with a dash-separated
//! calendar date and millisecond fractional seconds, e.g.
//! `2025-02-08T14:03:27.512Z`. Parsing accepts any RFC 3339 offset and
//! normalizes to UTC.
//!
//! Use with serde:
//!
//! ```
//! use chrono::{DateTime, Utc};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Event {
//!     #[serde(with = "hublink_wire::date")]
//!     at: DateTime<Utc>,
//!     #[serde(with = "hublink_wire::date::option", default)]
//!     until: Option<DateTime<Utc>>,
//! }
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{de, Deserialize, Deserializer, Serializer};

/// Render a date in the wire format.
pub fn format(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a wire-format date.
pub fn parse(text: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(text).map(|d| d.with_timezone(&Utc))
}

pub fn serialize<S: Serializer>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format(date))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    let text = String::deserialize(deserializer)?;
    parse(&text).map_err(|e| de::Error::custom(format!("invalid date '{text}': {e}")))
}

/// The same format for optional fields.
pub mod option {
    use super::*;

    pub fn serialize<S: Serializer>(
        date: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match date {
            Some(date) => serializer.serialize_some(&format(date)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(text) => parse(&text)
                .map(Some)
                .map_err(|e| de::Error::custom(format!("invalid date '{text}': {e}"))),
            None => Ok(None),
        }
    }
}
