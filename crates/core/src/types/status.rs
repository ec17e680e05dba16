//! Status and category enums shared by the storefront and back office.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

/// Category tag on a notification.
///
/// Stored with the shop's Turkish wire values; the English names are
/// accepted on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum NotificationKind {
    #[default]
    #[serde(rename = "bilgi", alias = "info", alias = "informational")]
    Informational,
    #[serde(rename = "kampanya", alias = "promotional", alias = "promotion")]
    Promotional,
    #[serde(rename = "önemli", alias = "onemli", alias = "critical")]
    Critical,
}

impl NotificationKind {
    /// Value stored in the `type` column.
    #[must_use]
    pub const fn as_wire(self) -> &'static str {
        match self {
            Self::Informational => "bilgi",
            Self::Promotional => "kampanya",
            Self::Critical => "önemli",
        }
    }

    /// Human-readable label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Informational => "Informational",
            Self::Promotional => "Promotional",
            Self::Critical => "Critical",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// Error returned when a string names no known variant.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl FromStr for NotificationKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bilgi" | "info" | "informational" => Ok(Self::Informational),
            "kampanya" | "promotional" | "promotion" => Ok(Self::Promotional),
            "önemli" | "onemli" | "critical" => Ok(Self::Critical),
            other => Err(UnknownVariant {
                kind: "notification kind",
                value: other.to_string(),
            }),
        }
    }
}

/// Role stored in `user_roles`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AppRole {
    Admin,
    #[default]
    User,
    Banned,
}

impl AppRole {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::User => "user",
            Self::Banned => "banned",
        }
    }

    #[must_use]
    pub const fn is_admin(self) -> bool {
        matches!(self, Self::Admin)
    }
}

impl fmt::Display for AppRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppRole {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "admin" => Ok(Self::Admin),
            "user" => Ok(Self::User),
            "banned" => Ok(Self::Banned),
            other => Err(UnknownVariant {
                kind: "role",
                value: other.to_string(),
            }),
        }
    }
}

/// UI colour theme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    #[must_use]
    pub const fn toggled(self) -> Self {
        match self {
            Self::Light => Self::Dark,
            Self::Dark => Self::Light,
        }
    }
}
