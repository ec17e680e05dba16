//! Browser-profile session identifier used to de-duplicate product views.

use core::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Errors that can occur when accepting a stored [`SessionId`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionIdError {
    #[error("session id cannot be empty")]
    Empty,
    #[error("session id must be at most {max} characters")]
    TooLong { max: usize },
    #[error("session id cannot contain whitespace")]
    Whitespace,
}

/// A durable, client-generated token.
///
/// Created once per profile and kept in local storage; it is not a server
/// entity. Generated ids look like `session_1718000000000_k3j9x2`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const SUFFIX_LEN: usize = 6;

impl SessionId {
    pub const MAX_LENGTH: usize = 128;

    /// Generate a new id from the current time and a random suffix.
    #[must_use]
    pub fn generate() -> Self {
        Self::generate_at(chrono::Utc::now().timestamp_millis())
    }

    /// Generate with an explicit timestamp (milliseconds since the epoch).
    #[must_use]
    pub fn generate_at(unix_millis: i64) -> Self {
        let mut rng = rand::rng();
        let suffix: String = (0..SUFFIX_LEN)
            .map(|_| char::from(BASE36[rng.random_range(0..BASE36.len())]))
            .collect();
        Self(format!("session_{unix_millis}_{suffix}"))
    }

    /// Accept an id read back from storage.
    ///
    /// Ids written by older clients may not follow the generated shape, so
    /// only emptiness, length and whitespace are checked.
    ///
    /// # Errors
    ///
    /// Returns [`SessionIdError`] if the value cannot be a stored id.
    pub fn parse(s: &str) -> Result<Self, SessionIdError> {
        if s.is_empty() {
            return Err(SessionIdError::Empty);
        }
        if s.len() > Self::MAX_LENGTH {
            return Err(SessionIdError::TooLong {
                max: Self::MAX_LENGTH,
            });
        }
        if s.chars().any(char::is_whitespace) {
            return Err(SessionIdError::Whitespace);
        }
        Ok(Self(s.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SessionId {
    type Error = SessionIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}
