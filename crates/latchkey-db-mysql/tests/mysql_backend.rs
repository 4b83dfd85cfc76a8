//! MySQL backend against a real server. Ignored by default; needs Docker.

use std::sync::Arc;
use std::time::Duration;

use latchkey_db_mysql::{MySqlBackend, MySqlConfig, migrations};
use latchkey_store::{
    CoreStorage, RequestContext, Requester, TokenRevocationStorage, TokenStore,
};
use testcontainers::ContainerAsync;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::mysql::Mysql;
use time::OffsetDateTime;

async fn start() -> (ContainerAsync<Mysql>, MySqlBackend) {
    let container = Mysql::default()
        .start()
        .await
        .expect("Failed to start MySQL container");

    let port = container
        .get_host_port_ipv4(3306)
        .await
        .expect("Failed to get port");
    let url = format!("mysql://root@127.0.0.1:{port}/test");

    let backend = MySqlBackend::connect(&MySqlConfig::new(url).with_pool_size(8))
        .await
        .expect("Failed to connect to database");

    (container, backend)
}

fn requester(client_id: &str) -> Requester {
    Requester::new(
        client_id,
        serde_json::json!({"subject": "alice"}),
        Duration::from_secs(600),
    )
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_session_lifecycle() {
    let (_container, backend) = start().await;
    migrations::run(backend.pool()).await.expect("second migration run");

    let store = TokenStore::new(backend);
    let ctx = RequestContext::background();
    let original = requester("app1");

    store
        .create_access_token_session(&ctx, "sig", &original)
        .await
        .expect("create");
    assert!(
        store
            .create_access_token_session(&ctx, "sig", &requester("app2"))
            .await
            .unwrap_err()
            .is_conflict()
    );

    let fetched: Requester = store
        .get_access_token_session(&ctx, "sig")
        .await
        .expect("get");
    assert_eq!(fetched.client_id(), "app1");
    assert_eq!(fetched.expires_at(), original.expires_at());

    store
        .delete_access_token_session(&ctx, "sig")
        .await
        .expect("delete");
    assert!(
        store
            .get_access_token_session::<serde_json::Value>(&ctx, "sig")
            .await
            .unwrap_err()
            .is_not_found()
    );
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_expired_row_is_replaced_and_purged() {
    let (_container, backend) = start().await;
    let store = TokenStore::new(backend);
    let ctx = RequestContext::background();
    let stale = requester("app1").expiring_at(OffsetDateTime::now_utc() - time::Duration::minutes(1));

    store
        .create_refresh_token_session(&ctx, "r1", &stale)
        .await
        .expect("create stale");
    assert!(
        store
            .delete_refresh_token_session(&ctx, "r1")
            .await
            .unwrap_err()
            .is_not_found()
    );

    store
        .create_refresh_token_session(&ctx, "r1", &requester("app2"))
        .await
        .expect("expired row is replaced");

    store
        .create_refresh_token_session(&ctx, "r2", &stale)
        .await
        .expect("create stale");
    assert_eq!(store.purge_expired(&ctx).await.unwrap(), 1);

    let fetched: Requester = store
        .get_refresh_token_session(&ctx, "r1")
        .await
        .expect("get");
    assert_eq!(
        store.revoke_refresh_tokens(&ctx, fetched.id()).await.unwrap(),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires Docker"]
async fn test_concurrent_creates_have_one_winner() {
    let (_container, backend) = start().await;
    let store = TokenStore::from_arc(Arc::new(backend));

    let mut handles = Vec::new();
    for i in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .create_authorize_code_session(
                    &RequestContext::background(),
                    "race",
                    &requester(&format!("app{i}")),
                )
                .await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => winners += 1,
            Err(e) => assert!(e.is_conflict(), "unexpected error: {e}"),
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires Docker"]
async fn test_concurrent_creates_over_expired_row_have_one_winner() {
    let (_container, backend) = start().await;
    let store = TokenStore::from_arc(Arc::new(backend));
    let ctx = RequestContext::background();

    let stale = requester("app0").expiring_at(OffsetDateTime::now_utc() - time::Duration::minutes(1));
    store
        .create_authorize_code_session(&ctx, "stale-race", &stale)
        .await
        .expect("create stale");

    let mut handles = Vec::new();
    for i in 1..=8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .create_authorize_code_session(
                    &RequestContext::background(),
                    "stale-race",
                    &requester(&format!("app{i}")),
                )
                .await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => winners += 1,
            Err(e) => assert!(e.is_conflict(), "unexpected error: {e}"),
        }
    }
    assert_eq!(winners, 1);

    let fetched: Requester = store
        .get_authorize_code_session(&ctx, "stale-race")
        .await
        .expect("winner is readable");
    assert_ne!(fetched.client_id(), "app0");
}
