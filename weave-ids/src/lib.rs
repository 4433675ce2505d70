//! Opaque 128-bit time-ordered identifiers for graph nodes, edges, and every
//! other row the graph store hands out an ID for.
//!
//! [`Id`] is a time-ordered, UUIDv6-shaped identifier: the timestamp occupies
//! the high bits so IDs generated later sort after earlier ones, which gives
//! the graph store's B-tree indexes good locality on insert.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

static LAST_TIMESTAMP: AtomicU64 = AtomicU64::new(0);

/// A time-ordered, opaque 128-bit identifier.
///
/// The internal layout mirrors UUID version 6: a 60-bit timestamp (100ns
/// intervals since the UUID epoch) split across `time_high`/`time_mid`/
/// `time_low`, a 4-bit version nibble, a 2-bit RFC 4122 variant, and 62 bits
/// of clock sequence + node for uniqueness within the same tick. Callers
/// should treat the value as opaque; only [`Id::new`], [`Display`], and
/// ordering are part of the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id {
    bytes: [u8; 16],
}

#[derive(Debug, thiserror::Error)]
pub enum IdParseError {
    #[error("expected 5 hyphen-separated groups of lengths 8-4-4-4-12, got {0:?}")]
    BadShape(String),
    #[error("invalid hex in id: {0}")]
    BadHex(#[from] std::num::ParseIntError),
}

impl Id {
    /// Generates a new ID, monotonic within this process even when multiple
    /// IDs are requested within the same clock tick.
    pub fn new() -> Self {
        Self::with_node(None, None)
    }

    /// Generates an ID with an explicit node/clock_seq, primarily for
    /// deterministic fixtures in tests.
    pub fn with_node(node: Option<u64>, clock_seq: Option<u16>) -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);

        const UUID_EPOCH_OFFSET: u64 = 0x01b2_1dd2_1381_4000;
        let mut timestamp = nanos / 100 + UUID_EPOCH_OFFSET;

        loop {
            let last = LAST_TIMESTAMP.load(Ordering::SeqCst);
            if timestamp <= last {
                timestamp = last + 1;
            }
            match LAST_TIMESTAMP.compare_exchange(
                last,
                timestamp,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(_) => continue,
            }
        }

        let node = node.unwrap_or_else(weak_random_u48);
        let clock_seq = clock_seq.unwrap_or_else(|| (weak_random_u48() & 0x3FFF) as u16);

        let time_high_and_mid = (timestamp >> 12) & 0xFFFF_FFFF_FFFF;
        let time_low = timestamp & 0x0FFF;

        let mut value: u128 = (time_high_and_mid as u128) << 80;
        value |= (time_low as u128) << 64;
        value |= ((clock_seq & 0x3FFF) as u128) << 48;
        value |= (node & 0xFFFF_FFFF_FFFF) as u128;

        Self::from_int(value)
    }

    fn from_int(mut value: u128) -> Self {
        value &= !(0xC000_u128 << 48);
        value |= 0x8000_u128 << 48;
        value &= !(0xF000_u128 << 64);
        value |= 6_u128 << 76;
        Self {
            bytes: value.to_be_bytes(),
        }
    }

    /// Builds an `Id` from raw bytes previously produced by [`Id::as_bytes`],
    /// e.g. when reading back a BLOB primary key from the graph store.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.bytes
    }

    pub fn as_u128(&self) -> u128 {
        u128::from_be_bytes(self.bytes)
    }

    /// Timestamp as 100ns intervals since the UUID epoch (1582-10-15), for
    /// callers that want to bucket IDs by creation time without a separate
    /// `created_at` column.
    pub fn timestamp(&self) -> u64 {
        let v = self.as_u128();
        let time_low = ((v >> 64) & 0x0FFF) as u64;
        let time_mid = ((v >> 80) & 0xFFFF) as u64;
        let time_high = ((v >> 96) & 0xFFFF_FFFF) as u64;
        (time_high << 28) | (time_mid << 12) | time_low
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.bytes;
        write!(
            f,
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7], b[8], b[9], b[10], b[11], b[12], b[13], b[14], b[15]
        )
    }
}

impl FromStr for Id {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('-').collect();
        let lengths: Vec<usize> = parts.iter().map(|p| p.len()).collect();
        if lengths != [8, 4, 4, 4, 12] {
            return Err(IdParseError::BadShape(s.to_string()));
        }
        let hex: String = parts.concat();
        let mut bytes = [0u8; 16];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)?;
        }
        Ok(Self { bytes })
    }
}

impl Serialize for Id {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Cheap non-cryptographic randomness for the node/clock_seq fields; these
/// only need to disambiguate IDs minted within the same 100ns tick, not
/// resist prediction.
fn weak_random_u48() -> u64 {
    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(42);
    let mut state = seed ^ 0xDEAD_BEEF_CAFE_BABE;
    state ^= state << 13;
    state ^= state >> 7;
    state ^= state << 17;
    state & 0xFFFF_FFFF_FFFF
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_are_unique_under_rapid_generation() {
        let ids: Vec<Id> = (0..500).map(|_| Id::new()).collect();
        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), 500);
    }

    #[test]
    fn ids_sort_by_creation_order() {
        let a = Id::new();
        let b = Id::new();
        let c = Id::new();
        assert!(a <= b);
        assert!(b <= c);
        assert!(a.timestamp() <= b.timestamp());
    }

    #[test]
    fn display_then_parse_roundtrips() {
        let id = Id::new();
        let s = id.to_string();
        let parsed: Id = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn bytes_roundtrip() {
        let id = Id::new();
        let bytes = *id.as_bytes();
        let rebuilt = Id::from_bytes(bytes);
        assert_eq!(id, rebuilt);
    }

    #[test]
    fn parse_rejects_wrong_shape() {
        let err = "not-a-valid-id".parse::<Id>().unwrap_err();
        assert!(matches!(err, IdParseError::BadShape(_)));
    }

    #[test]
    fn serde_roundtrips_through_json() {
        let id = Id::new();
        let json = serde_json::to_string(&id).unwrap();
        let back: Id = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
