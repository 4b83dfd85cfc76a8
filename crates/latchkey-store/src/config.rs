//! Store configuration types.
//!
//! - [`Lifespans`] - token validity periods applied when requesters are built
//! - [`BackendDescriptor`] - which adapter a connection string selects

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::kind::TokenKind;
use crate::requester::expiry_after;

/// Longest accepted lifespan (ten years).
pub const MAX_LIFESPAN: Duration = Duration::from_secs(10 * 365 * 24 * 3600);

/// Token lifespans.
///
/// The store does not own lifespan policy; these values are used by the
/// issuing side when it builds a [`Requester`](crate::Requester).
///
/// # Example (TOML)
///
/// ```toml
/// [lifespans]
/// authorize_code = "10m"
/// access_token = "1h"
/// refresh_token = "30d"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Lifespans {
    /// Authorization code lifetime. Codes should be short-lived.
    #[serde(with = "humantime_serde")]
    pub authorize_code: Duration,

    /// Access token lifetime.
    #[serde(with = "humantime_serde")]
    pub access_token: Duration,

    /// Refresh token lifetime.
    #[serde(with = "humantime_serde")]
    pub refresh_token: Duration,

    /// OpenID Connect ID token lifetime. Not stored, carried for issuers.
    #[serde(with = "humantime_serde")]
    pub id_token: Duration,
}

impl Default for Lifespans {
    fn default() -> Self {
        Self {
            authorize_code: Duration::from_secs(600),        // 10 minutes
            access_token: Duration::from_secs(3600),         // 1 hour
            refresh_token: Duration::from_secs(30 * 24 * 3600), // 30 days
            id_token: Duration::from_secs(3600),             // 1 hour
        }
    }
}

impl Lifespans {
    /// Lifespan of tokens of `kind`.
    #[must_use]
    pub fn for_kind(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::AccessToken => self.access_token,
            TokenKind::RefreshToken => self.refresh_token,
            TokenKind::AuthorizeCode => self.authorize_code,
        }
    }

    /// Expiry of a `kind` token issued at `from`. Saturates instead of
    /// overflowing for lifespans that were never validated.
    #[must_use]
    pub fn expiry_for(&self, kind: TokenKind, from: OffsetDateTime) -> OffsetDateTime {
        expiry_after(from, self.for_kind(kind))
    }

    /// Checks that every lifespan is non-zero and at most [`MAX_LIFESPAN`].
    ///
    /// # Errors
    ///
    /// Returns a description of the first lifespan out of range.
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("authorize_code", self.authorize_code),
            ("access_token", self.access_token),
            ("refresh_token", self.refresh_token),
            ("id_token", self.id_token),
        ] {
            if value.is_zero() {
                return Err(format!("lifespans.{name} must be greater than zero"));
            }
            if value > MAX_LIFESPAN {
                return Err(format!("lifespans.{name} must not exceed 10 years"));
            }
        }
        Ok(())
    }
}

/// Backend selected by a connection string.
///
/// - `memory` - process-local storage, lost on restart
/// - `postgres://…` or `postgresql://…` - PostgreSQL
/// - `mysql://…` - MySQL
#[derive(Clone, PartialEq, Eq)]
pub enum BackendDescriptor {
    Memory,
    Postgres { url: String },
    MySql { url: String },
}

/// Error returned for an unrecognised connection string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DescriptorError {
    #[error("database url is empty")]
    Empty,
    #[error("database url has no scheme (expected memory, postgres:// or mysql://)")]
    MissingScheme,
    #[error("unsupported database url scheme '{0}' (expected memory, postgres:// or mysql://)")]
    UnsupportedScheme(String),
}

impl BackendDescriptor {
    /// Parses a connection string.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty string or an unknown scheme.
    pub fn parse(url: &str) -> Result<Self, DescriptorError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(DescriptorError::Empty);
        }
        if url.eq_ignore_ascii_case("memory") {
            return Ok(Self::Memory);
        }

        let scheme = url.split_once("://").map(|(s, _)| s.to_ascii_lowercase());
        match scheme.as_deref() {
            Some("postgres") | Some("postgresql") => Ok(Self::Postgres {
                url: url.to_string(),
            }),
            Some("mysql") => Ok(Self::MySql {
                url: url.to_string(),
            }),
            Some(other) => Err(DescriptorError::UnsupportedScheme(other.to_string())),
            None => Err(DescriptorError::MissingScheme),
        }
    }

    /// Short backend name for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Postgres { .. } => "postgres",
            Self::MySql { .. } => "mysql",
        }
    }

    /// Returns `true` for backends that persist across restarts.
    #[must_use]
    pub fn is_durable(&self) -> bool {
        !matches!(self, Self::Memory)
    }
}

impl std::str::FromStr for BackendDescriptor {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// Display and Debug both mask credentials so descriptors are safe to log.
impl fmt::Display for BackendDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => f.write_str("memory"),
            Self::Postgres { url } | Self::MySql { url } => f.write_str(&mask_password(url)),
        }
    }
}

impl fmt::Debug for BackendDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BackendDescriptor({self})")
    }
}

/// Masks the password in a database URL for logging.
///
/// Only the userinfo part of the authority is considered: the password runs
/// from the first `:` after the user name to the last `@` before the host.
#[must_use]
pub fn mask_password(url: &str) -> String {
    let Some(authority_start) = url.find("://").map(|p| p + 3) else {
        return url.to_string();
    };
    let rest = &url[authority_start..];
    let authority = &rest[..rest.find(['/', '?', '#']).unwrap_or(rest.len())];

    if let Some(at_pos) = authority.rfind('@')
        && let Some(colon_pos) = authority[..at_pos].find(':')
    {
        let colon_pos = authority_start + colon_pos;
        let at_pos = authority_start + at_pos;
        return format!("{}:****{}", &url[..colon_pos], &url[at_pos..]);
    }
    url.to_string()
}
