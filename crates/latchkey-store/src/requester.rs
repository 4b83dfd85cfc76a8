//! The request that caused a token to be issued.
//!
//! A [`Requester`] is built once, when a grant is approved, and is read-only
//! afterwards. Replacing a token means building a new requester.
//!
//! The session payload type `S` is chosen by the caller. The store erases it
//! to JSON on write and decodes it back into whatever type the reader asks
//! for, so the store never interprets payload contents.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};

/// Description of the grant that produced a token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Requester<S = serde_json::Value> {
    id: Uuid,
    client_id: String,
    #[serde(default)]
    requested_scopes: Vec<String>,
    #[serde(default)]
    granted_scopes: Vec<String>,
    #[serde(default)]
    requested_audience: Vec<String>,
    #[serde(default)]
    granted_audience: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    requested_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    expires_at: OffsetDateTime,
    session: S,
}

impl<S> Requester<S> {
    /// Creates a requester for `client_id` that expires `lifespan` from now.
    ///
    /// A fresh request id is generated. Use [`Requester::with_id`] to tie
    /// several tokens to the same grant.
    #[must_use]
    pub fn new(client_id: impl Into<String>, session: S, lifespan: Duration) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            client_id: client_id.into(),
            requested_scopes: Vec::new(),
            granted_scopes: Vec::new(),
            requested_audience: Vec::new(),
            granted_audience: Vec::new(),
            requested_at: now,
            expires_at: expiry_after(now, lifespan),
            session,
        }
    }

    /// Sets the request id shared by every token of one grant.
    #[must_use]
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    /// Sets the scopes the client asked for.
    #[must_use]
    pub fn with_requested_scopes<I, T>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.requested_scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the scopes that were granted.
    #[must_use]
    pub fn with_granted_scopes<I, T>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.granted_scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the audience the client asked for.
    #[must_use]
    pub fn with_requested_audience<I, T>(mut self, audience: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.requested_audience = audience.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the audience that was granted.
    #[must_use]
    pub fn with_granted_audience<I, T>(mut self, audience: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.granted_audience = audience.into_iter().map(Into::into).collect();
        self
    }

    /// Overrides the issuance time.
    #[must_use]
    pub fn with_requested_at(mut self, requested_at: OffsetDateTime) -> Self {
        self.requested_at = requested_at;
        self
    }

    /// Overrides the expiry time.
    #[must_use]
    pub fn expiring_at(mut self, expires_at: OffsetDateTime) -> Self {
        self.expires_at = expires_at;
        self
    }

    /// Request id, shared by all tokens issued for the same grant.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn requested_scopes(&self) -> &[String] {
        &self.requested_scopes
    }

    #[must_use]
    pub fn granted_scopes(&self) -> &[String] {
        &self.granted_scopes
    }

    #[must_use]
    pub fn requested_audience(&self) -> &[String] {
        &self.requested_audience
    }

    #[must_use]
    pub fn granted_audience(&self) -> &[String] {
        &self.granted_audience
    }

    #[must_use]
    pub fn requested_at(&self) -> OffsetDateTime {
        self.requested_at
    }

    #[must_use]
    pub fn expires_at(&self) -> OffsetDateTime {
        self.expires_at
    }

    /// The opaque session payload.
    #[must_use]
    pub fn session(&self) -> &S {
        &self.session
    }

    /// Consumes the requester, returning its session payload.
    #[must_use]
    pub fn into_session(self) -> S {
        self.session
    }

    /// Returns `true` if `scope` was granted.
    #[must_use]
    pub fn has_granted_scope(&self, scope: &str) -> bool {
        self.granted_scopes.iter().any(|s| s == scope)
    }

    /// Returns `true` if the requester has expired at `now`.
    ///
    /// The expiry instant itself counts as expired.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }

    /// Returns `true` if the requester has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(OffsetDateTime::now_utc())
    }

    /// Replaces the session payload, keeping every other field.
    pub fn map_session<T>(self, f: impl FnOnce(S) -> T) -> Requester<T> {
        Requester {
            id: self.id,
            client_id: self.client_id,
            requested_scopes: self.requested_scopes,
            granted_scopes: self.granted_scopes,
            requested_audience: self.requested_audience,
            granted_audience: self.granted_audience,
            requested_at: self.requested_at,
            expires_at: self.expires_at,
            session: f(self.session),
        }
    }
}

/// `from + lifespan`, clamped to the latest representable instant.
pub(crate) fn expiry_after(from: OffsetDateTime, lifespan: Duration) -> OffsetDateTime {
    let lifespan = time::Duration::try_from(lifespan).unwrap_or(time::Duration::MAX);
    from.saturating_add(lifespan)
}

impl<S: Serialize> Requester<S> {
    /// Erases the session payload to JSON for storage.
    ///
    /// # Errors
    ///
    /// Returns `Invalid` if the payload cannot be serialized.
    pub fn to_stored(&self) -> StoreResult<Requester<serde_json::Value>> {
        let session = serde_json::to_value(&self.session)
            .map_err(|e| StoreError::invalid(format!("cannot encode session: {e}")))?;
        Ok(Requester {
            id: self.id,
            client_id: self.client_id.clone(),
            requested_scopes: self.requested_scopes.clone(),
            granted_scopes: self.granted_scopes.clone(),
            requested_audience: self.requested_audience.clone(),
            granted_audience: self.granted_audience.clone(),
            requested_at: self.requested_at,
            expires_at: self.expires_at,
            session,
        })
    }
}

impl Requester<serde_json::Value> {
    /// Decodes the stored JSON payload into the caller's session type.
    ///
    /// # Errors
    ///
    /// Returns `Invalid` if the payload does not fit `T`.
    pub fn decode<T: DeserializeOwned>(self) -> StoreResult<Requester<T>> {
        let Requester {
            id,
            client_id,
            requested_scopes,
            granted_scopes,
            requested_audience,
            granted_audience,
            requested_at,
            expires_at,
            session,
        } = self;
        let session = serde_json::from_value(session)
            .map_err(|e| StoreError::invalid(format!("cannot decode session: {e}")))?;
        Ok(Requester {
            id,
            client_id,
            requested_scopes,
            granted_scopes,
            requested_audience,
            granted_audience,
            requested_at,
            expires_at,
            session,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct OpenIdSession {
        subject: String,
        #[serde(default)]
        claims: serde_json::Map<String, serde_json::Value>,
    }

    fn openid_session() -> OpenIdSession {
        OpenIdSession {
            subject: "user-42".to_string(),
            claims: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_new_sets_expiry_from_lifespan() {
        let requester = Requester::new("app1", (), Duration::from_secs(600));
        let lifetime = requester.expires_at() - requester.requested_at();
        assert_eq!(lifetime, time::Duration::seconds(600));
        assert!(!requester.is_expired());
    }

    #[test]
    fn test_huge_lifespan_saturates() {
        let requester = Requester::new("app1", (), Duration::MAX);
        assert!(requester.expires_at() > requester.requested_at());
        assert!(!requester.is_expired());
    }

    #[test]
    fn test_is_expired_at_boundary() {
        let requester = Requester::new("app1", (), Duration::from_secs(60));
        let expiry = requester.expires_at();
        assert!(!requester.is_expired_at(expiry - time::Duration::seconds(1)));
        assert!(requester.is_expired_at(expiry));
        assert!(requester.is_expired_at(expiry + time::Duration::seconds(1)));
    }

    #[test]
    fn test_granted_scope_lookup() {
        let requester = Requester::new("app1", (), Duration::from_secs(60))
            .with_requested_scopes(["openid", "offline"])
            .with_granted_scopes(["openid"]);
        assert!(requester.has_granted_scope("openid"));
        assert!(!requester.has_granted_scope("offline"));
        assert_eq!(requester.requested_scopes(), ["openid", "offline"]);
    }

    #[test]
    fn test_stored_payload_decodes_into_caller_type() {
        let requester = Requester::new("app1", openid_session(), Duration::from_secs(60))
            .with_granted_audience(["https://api.example.com"]);

        let stored = requester.to_stored().unwrap();
        assert_eq!(stored.session()["subject"], json!("user-42"));

        let decoded: Requester<OpenIdSession> = stored.decode().unwrap();
        assert_eq!(decoded, requester);
    }

    #[test]
    fn test_decode_into_wrong_shape_is_invalid() {
        let stored = Requester::new("app1", json!({"unexpected": true}), Duration::from_secs(60));
        let err = stored.decode::<OpenIdSession>().unwrap_err();
        assert!(err.is_invalid());
    }

    #[test]
    fn test_serialized_form_is_camel_case() {
        let requester = Requester::new("app1", json!(null), Duration::from_secs(60));
        let value = serde_json::to_value(&requester).unwrap();
        assert_eq!(value["clientId"], json!("app1"));
        assert!(value.get("expiresAt").is_some());
        assert!(value.get("grantedScopes").is_some());
    }
}
