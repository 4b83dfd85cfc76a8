//! Stored session records.

use std::fmt;

use time::OffsetDateTime;

use crate::kind::TokenKind;
use crate::requester::Requester;

/// One stored session: the tuple `{kind, signature, requester, created_at}`.
///
/// The requester's session payload is kept as JSON; readers decode it into
/// their own type.
#[derive(Clone, PartialEq)]
pub struct SessionRecord {
    pub kind: TokenKind,
    pub signature: String,
    pub requester: Requester<serde_json::Value>,
    pub created_at: OffsetDateTime,
}

impl SessionRecord {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn new(
        kind: TokenKind,
        signature: impl Into<String>,
        requester: Requester<serde_json::Value>,
    ) -> Self {
        Self {
            kind,
            signature: signature.into(),
            requester,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// Expiry of the underlying requester.
    #[must_use]
    pub fn expires_at(&self) -> OffsetDateTime {
        self.requester.expires_at()
    }

    /// Returns `true` if the record has not expired at `now`.
    #[must_use]
    pub fn is_live_at(&self, now: OffsetDateTime) -> bool {
        !self.requester.is_expired_at(now)
    }
}

// Signatures are lookup keys for live tokens and stay out of logs.
impl fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRecord")
            .field("kind", &self.kind)
            .field("signature", &"<redacted>")
            .field("request_id", &self.requester.id())
            .field("client_id", &self.requester.client_id())
            .field("expires_at", &self.requester.expires_at())
            .field("created_at", &self.created_at)
            .finish()
    }
}
