//! Store contract exercised against the in-memory backend.

use std::sync::Arc;
use std::time::Duration;

use latchkey_db_memory::{MemoryStorage, create_memory_store};
use latchkey_store::{
    CoreStorage, RequestContext, Requester, StoreError, TokenKind, TokenRevocationStorage,
    TokenStore, derive_signature, generate_token,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio_test::{assert_err, assert_ok};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct OpenIdSession {
    subject: String,
    auth_time: i64,
}

fn session() -> OpenIdSession {
    OpenIdSession {
        subject: "alice".to_string(),
        auth_time: 1_700_000_000,
    }
}

fn requester(lifespan: Duration) -> Requester<OpenIdSession> {
    Requester::new("app1", session(), lifespan)
        .with_requested_scopes(["openid", "offline"])
        .with_granted_scopes(["openid"])
}

fn ctx() -> RequestContext {
    RequestContext::background()
}

#[tokio::test]
async fn test_authorize_code_round_trip() {
    let store = create_memory_store();
    let original = requester(Duration::from_secs(600));

    assert_ok!(
        store
            .create_authorize_code_session(&ctx(), "abc123", &original)
            .await
    );

    let fetched: Requester<OpenIdSession> = assert_ok!(
        store
            .get_authorize_code_session(&ctx(), "abc123")
            .await
    );
    assert_eq!(fetched.client_id(), "app1");
    assert_eq!(fetched.granted_scopes(), ["openid"]);
    assert_eq!(fetched.session(), &session());
    assert_eq!(fetched.id(), original.id());
    assert_eq!(fetched.expires_at(), original.expires_at());

    assert_ok!(store.delete_authorize_code_session(&ctx(), "abc123").await);

    let err = assert_err!(
        store
            .get_authorize_code_session::<OpenIdSession>(&ctx(), "abc123")
            .await
    );
    assert_eq!(err, StoreError::not_found(TokenKind::AuthorizeCode));

    let err = assert_err!(store.delete_authorize_code_session(&ctx(), "abc123").await);
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_second_create_conflicts_and_keeps_first() {
    let store = create_memory_store();
    let first = requester(Duration::from_secs(3600));
    let second = Requester::new("app2", session(), Duration::from_secs(3600));

    assert_ok!(store.create_access_token_session(&ctx(), "sig", &first).await);
    let err = assert_err!(store.create_access_token_session(&ctx(), "sig", &second).await);
    assert_eq!(err, StoreError::conflict(TokenKind::AccessToken));

    let stored: Requester<OpenIdSession> =
        assert_ok!(store.get_access_token_session(&ctx(), "sig").await);
    assert_eq!(stored.client_id(), "app1");
}

#[tokio::test]
async fn test_kinds_are_separate_namespaces() {
    let store = create_memory_store();
    let access = requester(Duration::from_secs(3600));
    let refresh = Requester::new("app2", session(), Duration::from_secs(3600));

    assert_ok!(store.create_access_token_session(&ctx(), "shared", &access).await);
    assert_ok!(store.create_refresh_token_session(&ctx(), "shared", &refresh).await);

    let err = assert_err!(
        store
            .get_authorize_code_session::<OpenIdSession>(&ctx(), "shared")
            .await
    );
    assert!(err.is_not_found());

    assert_ok!(store.delete_access_token_session(&ctx(), "shared").await);

    let still_there: Requester<OpenIdSession> =
        assert_ok!(store.get_refresh_token_session(&ctx(), "shared").await);
    assert_eq!(still_there.client_id(), "app2");
}

#[tokio::test]
async fn test_expired_session_reads_as_absent() {
    let store = create_memory_store();
    let short = requester(Duration::from_secs(60))
        .expiring_at(OffsetDateTime::now_utc() + time::Duration::milliseconds(200));

    assert_ok!(store.create_refresh_token_session(&ctx(), "short", &short).await);
    assert_ok!(
        store
            .get_refresh_token_session::<OpenIdSession>(&ctx(), "short")
            .await
    );

    tokio::time::sleep(Duration::from_millis(300)).await;

    let err = assert_err!(
        store
            .get_refresh_token_session::<OpenIdSession>(&ctx(), "short")
            .await
    );
    assert!(err.is_not_found());
    let err = assert_err!(store.delete_refresh_token_session(&ctx(), "short").await);
    assert!(err.is_not_found());

    // The slot is free again once the old record has expired.
    let fresh = requester(Duration::from_secs(60));
    assert_ok!(store.create_refresh_token_session(&ctx(), "short", &fresh).await);
}

#[tokio::test]
async fn test_empty_signature_is_invalid_argument() {
    let store = create_memory_store();
    let err = assert_err!(
        store
            .create_access_token_session(&ctx(), "", &requester(Duration::from_secs(60)))
            .await
    );
    assert!(err.is_invalid_argument());
    assert!(store.backend().is_empty());
}

#[tokio::test]
async fn test_payload_decoded_into_wrong_shape_is_invalid() {
    #[derive(Debug, Deserialize)]
    struct Other {
        #[allow(dead_code)]
        tenant: u32,
    }

    let store = create_memory_store();
    assert_ok!(
        store
            .create_access_token_session(&ctx(), "sig", &requester(Duration::from_secs(60)))
            .await
    );

    let err = assert_err!(store.get_access_token_session::<Other>(&ctx(), "sig").await);
    assert!(err.is_invalid());
}

#[tokio::test]
async fn test_canceled_context_leaves_store_untouched() {
    let store = create_memory_store();
    let canceled = RequestContext::background();
    canceled.cancel();

    let err = assert_err!(
        store
            .create_access_token_session(&canceled, "sig", &requester(Duration::from_secs(60)))
            .await
    );
    assert_eq!(err, StoreError::Canceled);
    assert!(store.backend().is_empty());
}

#[tokio::test]
async fn test_revoke_grant_removes_every_token_of_the_request() {
    let store = create_memory_store();
    let grant = requester(Duration::from_secs(3600));
    let unrelated = requester(Duration::from_secs(3600));

    for _ in 0..3 {
        let signature = derive_signature(&generate_token());
        assert_ok!(store.create_access_token_session(&ctx(), &signature, &grant).await);
    }
    assert_ok!(store.create_access_token_session(&ctx(), "other", &unrelated).await);
    assert_ok!(store.create_refresh_token_session(&ctx(), "refresh", &grant).await);

    assert_eq!(assert_ok!(store.revoke_access_tokens(&ctx(), grant.id()).await), 3);
    assert_eq!(store.backend().len(TokenKind::AccessToken), 1);
    assert_eq!(assert_ok!(store.revoke_refresh_tokens(&ctx(), grant.id()).await), 1);
}

#[tokio::test]
async fn test_purge_expired_through_store() {
    let store = create_memory_store();
    let stale = requester(Duration::from_secs(60))
        .expiring_at(OffsetDateTime::now_utc() - time::Duration::seconds(1));

    assert_ok!(store.create_access_token_session(&ctx(), "stale", &stale).await);
    assert_ok!(
        store
            .create_access_token_session(&ctx(), "live", &requester(Duration::from_secs(60)))
            .await
    );

    assert_eq!(assert_ok!(store.purge_expired(&ctx()).await), 1);
    assert_eq!(store.backend().total(), 1);
    assert_ok!(store.ping(&ctx()).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_have_one_winner() {
    let store = TokenStore::from_arc(Arc::new(MemoryStorage::new()));
    let mut handles = Vec::new();

    for i in 0..16 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let requester = Requester::new(format!("app{i}"), session(), Duration::from_secs(60));
            store
                .create_authorize_code_session(&RequestContext::background(), "race", &requester)
                .await
        }));
    }

    let mut winners = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => winners += 1,
            Err(e) if e.is_conflict() => conflicts += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(conflicts, 15);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_deletes_have_one_winner() {
    let store = create_memory_store();
    assert_ok!(
        store
            .create_authorize_code_session(&ctx(), "code", &requester(Duration::from_secs(60)))
            .await
    );

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .delete_authorize_code_session(&RequestContext::background(), "code")
                .await
        }));
    }

    let mut deleted = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            deleted += 1;
        }
    }
    assert_eq!(deleted, 1);
}
