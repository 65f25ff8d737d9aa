//! Document identifier.

use chrono::{DateTime, TimeZone, Utc};
use rand::RngCore;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

/// Process-wide increment shared by every generated id.
static COUNTER: AtomicU32 = AtomicU32::new(0);

/// Per-process random component, fixed on first use.
static PROCESS_UNIQUE: OnceLock<[u8; 5]> = OnceLock::new();

/// Unique identifier for a document.
///
/// Layout (12 bytes, rendered as 24 lowercase hex characters):
/// - 4 bytes: seconds since the Unix epoch (big-endian)
/// - 5 bytes: random value chosen once per process
/// - 3 bytes: incrementing counter (big-endian)
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId([u8; 12]);

impl ObjectId {
    /// Creates an object id from raw bytes.
    #[inline]
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    /// Generates a new object id.
    #[must_use]
    pub fn new() -> Self {
        let secs = Utc::now().timestamp().clamp(0, i64::from(u32::MAX)) as u32;
        let process = PROCESS_UNIQUE.get_or_init(|| {
            let mut bytes = [0u8; 5];
            rand::thread_rng().fill_bytes(&mut bytes);
            bytes
        });
        let count = COUNTER.fetch_add(1, Ordering::Relaxed) & 0x00FF_FFFF;

        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(&secs.to_be_bytes());
        bytes[4..9].copy_from_slice(process);
        bytes[9..12].copy_from_slice(&count.to_be_bytes()[1..4]);
        Self(bytes)
    }

    /// Parses a 24-character hex string.
    ///
    /// Returns `None` for anything else.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() != 24 {
            return None;
        }
        let mut bytes = [0u8; 12];
        hex::decode_to_slice(s, &mut bytes).ok()?;
        Some(Self(bytes))
    }

    /// Returns the raw bytes.
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }

    /// Returns the lowercase hex rendering.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Returns the creation time embedded in the id.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        let secs = u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]]);
        Utc.timestamp_opt(i64::from(secs), 0)
            .single()
            .unwrap_or_default()
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId(\"{}\")", self.to_hex())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for ObjectId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("invalid ObjectId: {s:?}"))
    }
}

impl From<[u8; 12]> for ObjectId {
    fn from(bytes: [u8; 12]) -> Self {
        Self::from_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn new_is_unique() {
        let id1 = ObjectId::new();
        let id2 = ObjectId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn hex_is_24_chars() {
        let id = ObjectId::new();
        let hex = id.to_hex();
        assert_eq!(hex.len(), 24);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn parse_roundtrip() {
        let id = ObjectId::new();
        assert_eq!(ObjectId::parse(&id.to_hex()), Some(id));
        assert_eq!(id.to_string().parse::<ObjectId>().unwrap(), id);
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!(ObjectId::parse("abc").is_none());
        assert!(ObjectId::parse("zzzzzzzzzzzzzzzzzzzzzzzz").is_none());
        assert!(ObjectId::parse("0123456789abcdef012345678").is_none());
    }

    #[test]
    fn timestamp_is_recent() {
        let id = ObjectId::new();
        let age = Utc::now() - id.timestamp();
        assert!(age.num_seconds() < 5);
    }

    proptest! {
        #[test]
        fn hex_order_matches_byte_order(a in any::<[u8; 12]>(), b in any::<[u8; 12]>()) {
            let (x, y) = (ObjectId::from_bytes(a), ObjectId::from_bytes(b));
            prop_assert_eq!(ObjectId::parse(&x.to_hex()), Some(x));
            prop_assert_eq!(x.to_hex().cmp(&y.to_hex()), x.cmp(&y));
        }
    }
}
