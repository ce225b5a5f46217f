//! Cache Entry Module
//!
//! The envelope written to the store for every cached value.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// `ExpireSeconds` value meaning "no expiration requested".
pub const NO_EXPIRY: i64 = -1;

fn no_expiry() -> i64 {
    NO_EXPIRY
}

/// Saturates instead of wrapping into the negative "no expiry" range.
fn seconds(ttl_secs: u64) -> i64 {
    i64::try_from(ttl_secs).unwrap_or(i64::MAX)
}

// == Cache Entry ==
/// A cached value together with its expiration metadata.
///
/// Always encoded and decoded as a unit. Field names are PascalCase on the
/// wire (`Value`, `ExpireSeconds`, `ForceExpire`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CacheEntry<T> {
    /// Intended TTL in seconds at write time, [`NO_EXPIRY`] for none
    #[serde(default = "no_expiry")]
    pub expire_seconds: i64,
    /// When set, every read re-arms the store TTL with `expire_seconds`
    #[serde(default)]
    pub force_expire: bool,
    /// The stored value
    pub value: T,
}

impl<T> CacheEntry<T> {
    /// Entry that never expires.
    pub fn persistent(value: T) -> Self {
        Self {
            expire_seconds: NO_EXPIRY,
            force_expire: false,
            value,
        }
    }

    /// Entry with a fixed TTL that slides forward on every read.
    pub fn sliding(value: T, ttl_secs: u64) -> Self {
        Self {
            expire_seconds: seconds(ttl_secs),
            force_expire: true,
            value,
        }
    }

    /// Entry bound to an absolute deadline; reads do not extend it.
    pub fn until(value: T, ttl_secs: u64) -> Self {
        Self {
            expire_seconds: seconds(ttl_secs),
            force_expire: false,
            value,
        }
    }

    /// TTL to re-apply after a read, if any.
    pub fn rearm_ttl(&self) -> Option<Duration> {
        if self.force_expire && self.expire_seconds > 0 {
            Some(Duration::from_secs(self.expire_seconds as u64))
        } else {
            None
        }
    }
}

impl<T: Serialize> CacheEntry<T> {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

impl<T: DeserializeOwned> CacheEntry<T> {
    pub fn decode(raw: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(raw)?)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;

    #[test]
    fn test_persistent_entry() {
        let entry = CacheEntry::persistent("v");
        assert_eq!(entry.expire_seconds, NO_EXPIRY);
        assert!(!entry.force_expire);
        assert!(entry.rearm_ttl().is_none());
    }

    #[test]
    fn test_sliding_entry_rearms() {
        let entry = CacheEntry::sliding("v", 30);
        assert_eq!(entry.rearm_ttl(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_huge_ttl_never_reads_as_no_expiry() {
        let entry = CacheEntry::sliding("v", u64::MAX);
        assert_eq!(entry.expire_seconds, i64::MAX);
        assert!(entry.rearm_ttl().is_some());
    }

    #[test]
    fn test_deadline_entry_does_not_rearm() {
        let entry = CacheEntry::until("v", 30);
        assert_eq!(entry.expire_seconds, 30);
        assert!(entry.rearm_ttl().is_none());
    }

    #[test]
    fn test_wire_field_names() {
        let raw = CacheEntry::sliding(7u32, 2).encode().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(json["Value"], 7);
        assert_eq!(json["ExpireSeconds"], 2);
        assert_eq!(json["ForceExpire"], true);
    }

    #[test]
    fn test_decode_foreign_entry_without_metadata() {
        let entry: CacheEntry<String> = CacheEntry::decode(br#"{"Value":"hello"}"#).unwrap();
        assert_eq!(entry.value, "hello");
        assert_eq!(entry.expire_seconds, NO_EXPIRY);
        assert!(!entry.force_expire);
    }

    #[test]
    fn test_decode_malformed_payload() {
        let result = CacheEntry::<String>::decode(b"\x00not-json");
        assert!(matches!(result, Err(CacheError::Decode(_))));
    }

    #[test]
    fn test_decode_wrong_type() {
        let raw = CacheEntry::persistent("text").encode().unwrap();
        assert!(CacheEntry::<u64>::decode(&raw).is_err());
    }
}
