//! Password credential type.

use secrecy::{ExposeSecret, SecretString};

/// Errors that can occur when accepting a [`Password`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PasswordError {
    /// Shorter than the platform minimum.
    #[error("password must be at least {min} characters")]
    TooShort {
        /// Minimum allowed length.
        min: usize,
    },
    /// Longer than the platform maximum.
    #[error("password must be at most {max} characters")]
    TooLong {
        /// Maximum allowed length.
        max: usize,
    },
}

/// A sign-in or sign-up password.
///
/// Wrapped in [`SecretString`] so it never shows up in `Debug` output or logs.
/// Only length is checked here; the auth service applies its own policy.
#[derive(Clone)]
pub struct Password(SecretString);

impl Password {
    /// Minimum password length accepted by the auth service.
    pub const MIN_LENGTH: usize = 6;
    /// Maximum password length accepted by the auth service.
    pub const MAX_LENGTH: usize = 72;

    /// Accept a password after checking its length (in characters).
    ///
    /// # Errors
    ///
    /// Returns [`PasswordError`] if the password is too short or too long.
    pub fn new(raw: impl Into<String>) -> Result<Self, PasswordError> {
        let raw = raw.into();
        let len = raw.chars().count();
        if len < Self::MIN_LENGTH {
            return Err(PasswordError::TooShort {
                min: Self::MIN_LENGTH,
            });
        }
        if len > Self::MAX_LENGTH {
            return Err(PasswordError::TooLong {
                max: Self::MAX_LENGTH,
            });
        }
        Ok(Self(SecretString::from(raw)))
    }

    /// Expose the password for the single place that sends it to the auth service.
    #[must_use]
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Password([REDACTED])")
    }
}
