//! Unix timestamp utilities for payment expiry windows.
//!
//! Requirements, proofs, and receipts all carry [`UnixTimestamp`] values in
//! whole seconds. Expiry deadlines (`expiresAt`) are absolute timestamps
//! computed at issuance and never extended afterwards.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::ops::Add;
use std::time::SystemTime;

/// A Unix timestamp representing seconds since the Unix epoch (1970-01-01T00:00:00Z).
///
/// # Serialization
///
/// Serialized as a stringified integer to avoid loss of precision in JSON,
/// since `JavaScript`'s `Number` type cannot safely represent all 64-bit
/// integers.
///
/// ```json
/// "1699999999"
/// ```
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Ord, Eq)]
pub struct UnixTimestamp(u64);

impl Serialize for UnixTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for UnixTimestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let ts = s
            .parse::<u64>()
            .map_err(|_| serde::de::Error::custom("timestamp must be a non-negative integer"))?;
        Ok(Self(ts))
    }
}

impl Display for UnixTimestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add<u64> for UnixTimestamp {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0.saturating_add(rhs))
    }
}

impl UnixTimestamp {
    /// Creates a new [`UnixTimestamp`] from a raw seconds value.
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    /// Returns the current system time as a [`UnixTimestamp`].
    ///
    /// # Panics
    ///
    /// Panics if the system clock is set to a time before the Unix epoch,
    /// which should never happen on properly configured systems.
    #[must_use]
    pub fn now() -> Self {
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .expect("SystemTime before UNIX epoch?!?")
            .as_secs();
        Self(now)
    }

    /// Returns the timestamp as raw seconds since the Unix epoch.
    #[must_use]
    pub const fn as_secs(&self) -> u64 {
        self.0
    }

    /// Returns how many seconds ago this timestamp was, or zero if it lies in
    /// the future.
    #[must_use]
    pub fn elapsed_secs(&self) -> u64 {
        Self::now().0.saturating_sub(self.0)
    }

    /// Returns `true` if this timestamp is in the past.
    #[must_use]
    pub fn is_past(&self) -> bool {
        *self < Self::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_serde_roundtrip() {
        let ts = UnixTimestamp::from_secs(1_699_999_999);
        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, r#""1699999999""#);
        let back: UnixTimestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ts);
    }

    #[test]
    fn test_rejects_non_numeric() {
        assert!(serde_json::from_str::<UnixTimestamp>(r#""soon""#).is_err());
    }

    #[test]
    fn test_add_seconds() {
        let ts = UnixTimestamp::from_secs(100) + 60;
        assert_eq!(ts.as_secs(), 160);
    }

    #[test]
    fn test_expiry_ordering() {
        let past = UnixTimestamp::from_secs(1);
        assert!(past.is_past());
        assert!(past.elapsed_secs() > 0);

        let future = UnixTimestamp::now() + 3600;
        assert!(!future.is_past());
        assert_eq!(future.elapsed_secs(), 0);
    }
}
