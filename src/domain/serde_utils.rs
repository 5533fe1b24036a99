//! Shared serialization helpers for the wire form of domain entities.
//!
//! Timestamps go over the wire as milliseconds since the Unix epoch (via
//! `chrono::serde::ts_milliseconds`), durations as whole milliseconds and
//! enums as their integer discriminants.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Deserializer, Serializer};

/// Serialize a `std::time::Duration` as whole milliseconds.
pub mod duration_ms {
    use super::*;

    pub fn serialize<S>(duration: &Duration, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        s.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(d: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Convert a std duration into a chrono delta, saturating on overflow.
pub fn to_time_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

/// `at + duration`, clamped to the latest representable instant
pub fn later_by(at: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    at.checked_add_signed(to_time_delta(duration))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `at - duration`, clamped to the earliest representable instant
pub fn earlier_by(at: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    at.checked_sub_signed(to_time_delta(duration))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Implement `From<Enum> for u8` and `TryFrom<u8> for Enum` so an enum can be
/// serialized through `#[serde(into = "u8", try_from = "u8")]`.
macro_rules! u8_enum_conversions {
    ($ty:ident, $label:literal, { $($variant:ident = $value:literal),+ $(,)? }) => {
        impl From<$ty> for u8 {
            fn from(value: $ty) -> Self {
                match value {
                    $($ty::$variant => $value,)+
                }
            }
        }

        impl TryFrom<u8> for $ty {
            type Error = crate::domain::experiment::ExperimentValidationError;

            fn try_from(
                value: u8,
            ) -> Result<Self, crate::domain::experiment::ExperimentValidationError> {
                match value {
                    $($value => Ok($ty::$variant),)+
                    other => Err(
                        crate::domain::experiment::ExperimentValidationError::UnknownEnumValue(
                            $label, other,
                        ),
                    ),
                }
            }
        }
    };
}

pub(crate) use u8_enum_conversions;
