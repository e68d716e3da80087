use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{
    de::{Deserialize, Deserializer},
    ser::{Serialize, Serializer},
};

use crate::extended::{deserialize_extended, serialize_extended, Embedded};
use crate::marker::ElementType;

/// UTC datetime: signed milliseconds since the UNIX epoch.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DateTime(i64);

impl DateTime {
    pub const MIN: DateTime = DateTime(i64::MIN);
    pub const MAX: DateTime = DateTime(i64::MAX);

    pub fn from_millis(millis: i64) -> DateTime {
        DateTime(millis)
    }

    pub fn timestamp_millis(&self) -> i64 {
        self.0
    }

    pub fn now() -> DateTime {
        DateTime::from_system_time(SystemTime::now())
    }

    /// Convert from a `SystemTime`, saturating at the representable range and truncating
    /// sub-millisecond precision toward negative infinity.
    pub fn from_system_time(time: SystemTime) -> DateTime {
        match time.duration_since(UNIX_EPOCH) {
            Ok(d) => DateTime(i64::try_from(d.as_millis()).unwrap_or(i64::MAX)),
            Err(e) => {
                let d = e.duration();
                let millis = i64::try_from(d.as_millis()).unwrap_or(i64::MAX);
                let rounding = if d.subsec_nanos() % 1_000_000 != 0 { 1 } else { 0 };
                DateTime(millis.saturating_neg().saturating_sub(rounding))
            }
        }
    }

    /// Convert to a `SystemTime`. Returns `None` if the platform can't represent the instant.
    pub fn to_system_time(&self) -> Option<SystemTime> {
        if self.0 >= 0 {
            UNIX_EPOCH.checked_add(Duration::from_millis(self.0 as u64))
        } else {
            UNIX_EPOCH.checked_sub(Duration::from_millis(self.0.unsigned_abs()))
        }
    }
}

impl From<SystemTime> for DateTime {
    fn from(time: SystemTime) -> Self {
        DateTime::from_system_time(time)
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "DateTime({})", self.0)
    }
}

impl Serialize for DateTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serialize_extended(serializer, ElementType::DateTime, &self.0.to_le_bytes())
    }
}

impl<'de> Deserialize<'de> for DateTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match deserialize_extended(deserializer, "DateTime")? {
            Embedded::DateTime(v) => Ok(v),
            other => Err(serde::de::Error::custom(format!(
                "expected DateTime, got {}",
                other.element_type()
            ))),
        }
    }
}
