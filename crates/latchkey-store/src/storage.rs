//! Token session storage contracts.
//!
//! [`CoreStorage`] is the surface an upstream grant handler talks to:
//! create, get and delete for each token kind. [`TokenRevocationStorage`]
//! adds grant-wide revocation by request id.
//!
//! # Security Considerations
//!
//! - Only signatures are stored, never raw tokens
//! - Never log signatures or authorization codes
//! - A successful authorization code fetch does not consume the code; the
//!   caller must delete it explicitly
//!
//! Both traits use generic methods for the session payload and are therefore
//! not object safe. Code that depends on them is generic over the storage
//! type, which lets tests swap in the mock.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::error::StoreResult;
use crate::kind::TokenKind;
use crate::requester::Requester;

/// Create, get and delete sessions keyed by `(kind, signature)`.
#[async_trait]
pub trait CoreStorage: Send + Sync {
    /// Stores a new session for `signature`.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if `signature` is empty
    /// - `Invalid` if the session payload cannot be encoded
    /// - `Conflict` if a live record already exists for `(kind, signature)`
    /// - `Unavailable`, `Canceled` or `DeadlineExceeded`
    ///
    /// On error no record has been created.
    async fn create_session<S>(
        &self,
        ctx: &RequestContext,
        kind: TokenKind,
        signature: &str,
        requester: &Requester<S>,
    ) -> StoreResult<()>
    where
        S: Serialize + Send + Sync;

    /// Fetches the live session for `signature`, decoding its payload as `S`.
    ///
    /// The record is not consumed by reading it.
    ///
    /// # Errors
    ///
    /// - `NotFound` if no live record exists (expired records read as absent)
    /// - `Invalid` if the payload does not decode into `S`
    /// - `InvalidArgument`, `Unavailable`, `Canceled` or `DeadlineExceeded`
    async fn get_session<S>(
        &self,
        ctx: &RequestContext,
        kind: TokenKind,
        signature: &str,
    ) -> StoreResult<Requester<S>>
    where
        S: DeserializeOwned + Send;

    /// Deletes the live session for `signature`.
    ///
    /// # Errors
    ///
    /// - `NotFound` if no live record exists, so a second delete of the same
    ///   signature is detectable
    /// - `InvalidArgument`, `Unavailable`, `Canceled` or `DeadlineExceeded`
    async fn delete_session(
        &self,
        ctx: &RequestContext,
        kind: TokenKind,
        signature: &str,
    ) -> StoreResult<()>;

    async fn create_access_token_session<S>(
        &self,
        ctx: &RequestContext,
        signature: &str,
        requester: &Requester<S>,
    ) -> StoreResult<()>
    where
        S: Serialize + Send + Sync,
    {
        self.create_session(ctx, TokenKind::AccessToken, signature, requester)
            .await
    }

    async fn get_access_token_session<S>(
        &self,
        ctx: &RequestContext,
        signature: &str,
    ) -> StoreResult<Requester<S>>
    where
        S: DeserializeOwned + Send,
    {
        self.get_session(ctx, TokenKind::AccessToken, signature)
            .await
    }

    async fn delete_access_token_session(
        &self,
        ctx: &RequestContext,
        signature: &str,
    ) -> StoreResult<()> {
        self.delete_session(ctx, TokenKind::AccessToken, signature)
            .await
    }

    async fn create_refresh_token_session<S>(
        &self,
        ctx: &RequestContext,
        signature: &str,
        requester: &Requester<S>,
    ) -> StoreResult<()>
    where
        S: Serialize + Send + Sync,
    {
        self.create_session(ctx, TokenKind::RefreshToken, signature, requester)
            .await
    }

    async fn get_refresh_token_session<S>(
        &self,
        ctx: &RequestContext,
        signature: &str,
    ) -> StoreResult<Requester<S>>
    where
        S: DeserializeOwned + Send,
    {
        self.get_session(ctx, TokenKind::RefreshToken, signature)
            .await
    }

    async fn delete_refresh_token_session(
        &self,
        ctx: &RequestContext,
        signature: &str,
    ) -> StoreResult<()> {
        self.delete_session(ctx, TokenKind::RefreshToken, signature)
            .await
    }

    async fn create_authorize_code_session<S>(
        &self,
        ctx: &RequestContext,
        signature: &str,
        requester: &Requester<S>,
    ) -> StoreResult<()>
    where
        S: Serialize + Send + Sync,
    {
        self.create_session(ctx, TokenKind::AuthorizeCode, signature, requester)
            .await
    }

    /// Fetches an authorization code session.
    ///
    /// Codes are single-use, but this read does not invalidate the code. The
    /// caller deletes it once the exchange is accepted; a `NotFound` from that
    /// delete means another request consumed the code first.
    async fn get_authorize_code_session<S>(
        &self,
        ctx: &RequestContext,
        signature: &str,
    ) -> StoreResult<Requester<S>>
    where
        S: DeserializeOwned + Send,
    {
        self.get_session(ctx, TokenKind::AuthorizeCode, signature)
            .await
    }

    async fn delete_authorize_code_session(
        &self,
        ctx: &RequestContext,
        signature: &str,
    ) -> StoreResult<()> {
        self.delete_session(ctx, TokenKind::AuthorizeCode, signature)
            .await
    }
}

/// Grant-wide revocation.
#[async_trait]
pub trait TokenRevocationStorage: Send + Sync {
    /// Removes every `kind` session issued for `request_id`.
    ///
    /// Returns the number of sessions removed. Zero is not an error.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable`, `Canceled` or `DeadlineExceeded`.
    async fn revoke_by_request_id(
        &self,
        ctx: &RequestContext,
        kind: TokenKind,
        request_id: Uuid,
    ) -> StoreResult<u64>;

    async fn revoke_access_tokens(&self, ctx: &RequestContext, request_id: Uuid) -> StoreResult<u64> {
        self.revoke_by_request_id(ctx, TokenKind::AccessToken, request_id)
            .await
    }

    async fn revoke_refresh_tokens(&self, ctx: &RequestContext, request_id: Uuid) -> StoreResult<u64> {
        self.revoke_by_request_id(ctx, TokenKind::RefreshToken, request_id)
            .await
    }
}
