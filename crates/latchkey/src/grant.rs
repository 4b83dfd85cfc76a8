//! Token issuance on top of the session store.
//!
//! These routines implement the storage side of two token-endpoint grants:
//!
//! - authorization code exchange, where a code is usable exactly once; an
//!   exchange that loses the race to delete the code revokes every token
//!   already issued for its grant, while a later replay finds no code and is
//!   simply rejected
//! - refresh token rotation, where each refresh issues a new pair and the old
//!   refresh token stops working
//!
//! They work against any [`CoreStorage`] + [`TokenRevocationStorage`], so the
//! same code runs over a real store or the mock.

use latchkey_store::{
    CoreStorage, Lifespans, RequestContext, Requester, StoreError, TokenKind,
    TokenRevocationStorage, derive_signature, generate_token,
};
use time::OffsetDateTime;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Scopes that entitle a client to a refresh token.
pub const OFFLINE_SCOPES: [&str; 2] = ["offline_access", "offline"];

/// Raw tokens handed to the client. Only their signatures are stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: std::time::Duration,
    pub request_id: Uuid,
}

#[derive(Debug, thiserror::Error)]
pub enum GrantError {
    /// The code or refresh token is unknown, expired or already used.
    #[error("invalid grant: {0}")]
    InvalidGrant(&'static str),

    /// The presenting client is not the one the grant was issued to.
    #[error("grant was issued to another client")]
    ClientMismatch,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl GrantError {
    #[must_use]
    pub fn is_invalid_grant(&self) -> bool {
        matches!(self, Self::InvalidGrant(_) | Self::ClientMismatch)
    }
}

/// Exchanges an authorization code for an access token (and a refresh token
/// when an offline scope was granted).
///
/// The code session is deleted before tokens are issued. If the delete finds
/// nothing, another exchange consumed the code first; the grant is treated as
/// compromised and all of its tokens are revoked.
///
/// # Errors
///
/// - `InvalidGrant` for an unknown, expired or replayed code
/// - `ClientMismatch` if `client_id` differs from the grant's client
/// - `Store` for storage failures
#[instrument(skip_all, fields(client_id = %client_id))]
pub async fn exchange_authorize_code<St>(
    storage: &St,
    ctx: &RequestContext,
    lifespans: &Lifespans,
    code: &str,
    client_id: &str,
) -> Result<IssuedTokens, GrantError>
where
    St: CoreStorage + TokenRevocationStorage,
{
    let code_signature = derive_signature(code);

    let grant: Requester = match storage
        .get_authorize_code_session(ctx, &code_signature)
        .await
    {
        Ok(grant) => grant,
        Err(e) if e.is_not_found() => return Err(GrantError::InvalidGrant("unknown code")),
        Err(e) => return Err(e.into()),
    };

    if grant.client_id() != client_id {
        return Err(GrantError::ClientMismatch);
    }

    match storage
        .delete_authorize_code_session(ctx, &code_signature)
        .await
    {
        Ok(()) => {}
        Err(e) if e.is_not_found() => {
            warn!(request_id = %grant.id(), "authorization code consumed concurrently, revoking grant");
            revoke_grant(storage, ctx, grant.id()).await?;
            return Err(GrantError::InvalidGrant("code already used"));
        }
        Err(e) => return Err(e.into()),
    }

    issue(storage, ctx, lifespans, grant).await
}

/// Rotates a refresh token: the presented token and every access token of
/// the grant are invalidated and a fresh pair is issued under the same
/// request id.
///
/// A refresh token that was already rotated revokes the whole grant.
///
/// # Errors
///
/// Same as [`exchange_authorize_code`].
#[instrument(skip_all, fields(client_id = %client_id))]
pub async fn rotate_refresh_token<St>(
    storage: &St,
    ctx: &RequestContext,
    lifespans: &Lifespans,
    refresh_token: &str,
    client_id: &str,
) -> Result<IssuedTokens, GrantError>
where
    St: CoreStorage + TokenRevocationStorage,
{
    let signature = derive_signature(refresh_token);

    let grant: Requester = match storage.get_refresh_token_session(ctx, &signature).await {
        Ok(grant) => grant,
        Err(e) if e.is_not_found() => {
            return Err(GrantError::InvalidGrant("unknown refresh token"));
        }
        Err(e) => return Err(e.into()),
    };

    if grant.client_id() != client_id {
        return Err(GrantError::ClientMismatch);
    }

    match storage.delete_refresh_token_session(ctx, &signature).await {
        Ok(()) => {}
        Err(e) if e.is_not_found() => {
            warn!(request_id = %grant.id(), "refresh token reused, revoking grant");
            revoke_grant(storage, ctx, grant.id()).await?;
            return Err(GrantError::InvalidGrant("refresh token already used"));
        }
        Err(e) => return Err(e.into()),
    }

    let revoked = storage.revoke_access_tokens(ctx, grant.id()).await?;
    debug!(revoked, "previous access tokens revoked");

    issue(storage, ctx, lifespans, grant).await
}

/// Revokes every access and refresh token issued for `request_id`.
///
/// # Errors
///
/// Returns the first storage failure.
pub async fn revoke_grant<St>(
    storage: &St,
    ctx: &RequestContext,
    request_id: Uuid,
) -> Result<u64, StoreError>
where
    St: TokenRevocationStorage,
{
    let access = storage.revoke_access_tokens(ctx, request_id).await?;
    let refresh = storage.revoke_refresh_tokens(ctx, request_id).await?;
    Ok(access + refresh)
}

async fn issue<St>(
    storage: &St,
    ctx: &RequestContext,
    lifespans: &Lifespans,
    grant: Requester,
) -> Result<IssuedTokens, GrantError>
where
    St: CoreStorage,
{
    let now = OffsetDateTime::now_utc();
    let request_id = grant.id();

    let access_token = generate_token();
    let access = grant
        .clone()
        .expiring_at(lifespans.expiry_for(TokenKind::AccessToken, now));
    storage
        .create_access_token_session(ctx, &derive_signature(&access_token), &access)
        .await?;

    let offline = OFFLINE_SCOPES.iter().any(|s| grant.has_granted_scope(s));
    let refresh_token = if offline {
        let token = generate_token();
        let refresh = grant.expiring_at(lifespans.expiry_for(TokenKind::RefreshToken, now));
        storage
            .create_refresh_token_session(ctx, &derive_signature(&token), &refresh)
            .await?;
        Some(token)
    } else {
        None
    };

    debug!(%request_id, refresh = offline, "tokens issued");
    Ok(IssuedTokens {
        access_token,
        refresh_token,
        expires_in: lifespans.access_token,
        request_id,
    })
}
