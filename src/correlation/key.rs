//! Correlation key generation.
//!
//! A key is derived from the connection's remote identity, the instant the
//! job was submitted and a fresh random UUID, folded through a hasher whose
//! seed is chosen once per process. Nothing is shared between connections
//! besides that seed, so two generators never need to coordinate.

use serde::{Deserialize, Serialize};
use std::collections::hash_map::RandomState;
use std::fmt;
use std::hash::{BuildHasher, Hash, Hasher};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Length of every generated key, in hex characters.
pub const KEY_LEN: usize = 16;

/// Opaque token binding one submitted job to the connection that submitted it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationKey(String);

impl CorrelationKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for CorrelationKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl From<&str> for CorrelationKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Produces fixed-length correlation keys. Never fails.
#[derive(Debug, Clone, Default)]
pub struct KeyGenerator {
    seed: RandomState,
}

impl KeyGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a key for a job submitted by `remote` at `at`.
    pub fn generate(&self, remote: &str, at: SystemTime) -> CorrelationKey {
        let nanos = at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();

        let mut hasher = self.seed.build_hasher();
        remote.hash(&mut hasher);
        nanos.hash(&mut hasher);
        Uuid::new_v4().as_u128().hash(&mut hasher);

        CorrelationKey(format!("{:0width$x}", hasher.finish(), width = KEY_LEN))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn keys_have_fixed_length() {
        let generator = KeyGenerator::new();
        for _ in 0..100 {
            let key = generator.generate("127.0.0.1:5000", SystemTime::now());
            assert_eq!(key.as_str().len(), KEY_LEN);
            assert!(key.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn same_remote_and_instant_still_differ() {
        let generator = KeyGenerator::new();
        let at = SystemTime::now();

        let keys: HashSet<_> = (0..1000)
            .map(|_| generator.generate("10.0.0.1:443", at))
            .collect();
        assert_eq!(keys.len(), 1000);
    }

    #[test]
    fn key_serializes_as_plain_string() {
        let key = CorrelationKey::from("abcd1234");
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"abcd1234\"");
    }
}
