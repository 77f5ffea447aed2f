// THEORY:
// A `SessionKey` namespaces every artifact written by one comparison. Concurrent
// comparisons stay apart only as long as their keys differ, so generated keys are
// ULIDs (timestamp plus 80 random bits) rather than bare timestamps. Keys name a
// storage directory, so caller-supplied keys are restricted to a safe alphabet.

use crate::error::StorageError;
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey(String);

impl SessionKey {
    /// A fresh, collision-resistant key.
    pub fn generate() -> Self {
        SessionKey(Ulid::new().to_string())
    }

    /// Accepts a caller-chosen key made of ASCII letters, digits, `-` and `_`.
    pub fn new(key: impl Into<String>) -> Result<Self, StorageError> {
        let key = key.into();
        let valid = !key.is_empty()
            && key
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        if valid { Ok(SessionKey(key)) } else { Err(StorageError::InvalidKey(key)) }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for SessionKey {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SessionKey::new(s)
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
