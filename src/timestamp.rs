use std::fmt;

use serde::{
    de::{Deserialize, Deserializer},
    ser::{Serialize, Serializer},
};

use crate::error::{Error, Result};
use crate::extended::{deserialize_extended, serialize_extended, Embedded};
use crate::marker::ElementType;

/// BSON internal timestamp, as used by replication oplogs.
///
/// On the wire this is 8 bytes: the increment as a little-endian u32, then the seconds as a
/// little-endian u32. Read together as a little-endian u64, the seconds are the high word, so
/// ordering by `(time, increment)` matches ordering by the raw u64.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    /// Seconds since the UNIX epoch.
    pub time: u32,
    /// Ordinal for operations within the same second.
    pub increment: u32,
}

impl Timestamp {
    pub fn new(time: u32, increment: u32) -> Timestamp {
        Timestamp { time, increment }
    }

    pub fn from_u64(v: u64) -> Timestamp {
        Timestamp {
            time: (v >> 32) as u32,
            increment: v as u32,
        }
    }

    pub fn as_u64(&self) -> u64 {
        ((self.time as u64) << 32) | self.increment as u64
    }

    /// Encode the 8 payload bytes onto a vector.
    pub fn encode_vec(&self, vec: &mut Vec<u8>) {
        vec.extend_from_slice(&self.increment.to_le_bytes());
        vec.extend_from_slice(&self.time.to_le_bytes());
    }

    pub fn to_bytes(&self) -> [u8; 8] {
        self.as_u64().to_le_bytes()
    }
}

impl TryFrom<&[u8]> for Timestamp {
    type Error = Error;

    fn try_from(value: &[u8]) -> Result<Self> {
        let raw: [u8; 8] = value.try_into().map_err(|_| {
            Error::BadEncode(format!("Timestamp must be 8 bytes, got {}", value.len()))
        })?;
        Ok(Timestamp::from_u64(u64::from_le_bytes(raw)))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Timestamp({}, {})", self.time, self.increment)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serialize_extended(serializer, ElementType::Timestamp, &self.to_bytes())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match deserialize_extended(deserializer, "Timestamp")? {
            Embedded::Timestamp(v) => Ok(v),
            other => Err(serde::de::Error::custom(format!(
                "expected Timestamp, got {}",
                other.element_type()
            ))),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn wire_bytes() {
        let ts = Timestamp::new(200, 100);
        let mut enc = Vec::new();
        ts.encode_vec(&mut enc);
        assert_eq!(enc, vec![100, 0, 0, 0, 200, 0, 0, 0]);
        assert_eq!(ts.to_bytes().to_vec(), enc);
        assert_eq!(Timestamp::try_from(&enc[..]).unwrap(), ts);
    }

    #[test]
    fn ordering() {
        let a = Timestamp::new(1, 500);
        let b = Timestamp::new(2, 0);
        assert!(a < b);
        assert!(a.as_u64() < b.as_u64());
        assert_eq!(Timestamp::from_u64(b.as_u64()), b);
    }

    #[test]
    fn not_enough_bytes() {
        assert!(Timestamp::try_from(&[0u8; 7][..]).is_err());
    }
}
