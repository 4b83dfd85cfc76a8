//! Token kinds.
//!
//! Each kind is its own signature namespace: the same signature string may
//! exist once per kind without colliding.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The kind of token a session record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// OAuth 2.0 access token.
    AccessToken,
    /// OAuth 2.0 refresh token.
    RefreshToken,
    /// Authorization code issued by the authorize endpoint.
    AuthorizeCode,
}

impl TokenKind {
    /// All token kinds, in a stable order.
    pub const ALL: [TokenKind; 3] = [
        TokenKind::AccessToken,
        TokenKind::RefreshToken,
        TokenKind::AuthorizeCode,
    ];

    /// Returns the stable string form used in storage and logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccessToken => "access_token",
            Self::RefreshToken => "refresh_token",
            Self::AuthorizeCode => "authorize_code",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown token kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown token kind: {0}")]
pub struct UnknownTokenKind(pub String);

impl FromStr for TokenKind {
    type Err = UnknownTokenKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "access_token" => Ok(Self::AccessToken),
            "refresh_token" => Ok(Self::RefreshToken),
            "authorize_code" => Ok(Self::AuthorizeCode),
            other => Err(UnknownTokenKind(other.to_string())),
        }
    }
}
