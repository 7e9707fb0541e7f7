// ============================
// tests/integration/client_session_tests.rs
// ============================
//! Client sessions against a real server.

use crate::test_utils::TestServer;
use backend_lib::BroadcastEvent;
use chrono::Utc;
use shopstatus_common::OnlineUser;
use status_client::{
    CacheInvalidationBridge, CacheKey, ClientConfig, Identity, IdentitySource, LocalQueryCache,
    ReconnectPolicy, SessionHandle, SessionManager, SessionState,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn config(server: &TestServer) -> ClientConfig {
    ClientConfig::new(server.url()).with_reconnect(ReconnectPolicy::Fixed(Duration::from_millis(200)))
}

async fn wait_state(handle: &SessionHandle, want: SessionState) {
    let mut rx = handle.watch_state();
    timeout(WAIT, rx.wait_for(|s| *s == want))
        .await
        .expect("timed out waiting for session state")
        .unwrap();
}

async fn wait_presence(handle: &SessionHandle, pred: impl Fn(&[OnlineUser]) -> bool) {
    let mut rx = handle.watch_presence();
    timeout(WAIT, rx.wait_for(|users| pred(users)))
        .await
        .expect("timed out waiting for presence")
        .unwrap();
}

#[tokio::test]
async fn test_two_sessions_see_each_other() {
    let server = TestServer::start().await;
    let ana = SessionManager::new(
        config(&server),
        IdentitySource::logged_in(Identity::new(1, "Ana")),
    )
    .spawn();
    let bo = SessionManager::new(
        config(&server),
        IdentitySource::logged_in(Identity::new(2, "Bo")),
    )
    .spawn();

    wait_presence(&ana, |users| users.len() == 2).await;
    wait_presence(&bo, |users| users.len() == 2).await;
    assert_eq!(ana.state(), SessionState::Connected);

    bo.shutdown().await;
    wait_presence(&ana, |users| users.len() == 1 && users[0].user_id == 1).await;
    ana.shutdown().await;
}

#[tokio::test]
async fn test_signature_completed_invalidates_repair_queries() {
    let server = TestServer::start().await;
    let (cache, mut refetch) = LocalQueryCache::new();
    cache.insert(CacheKey::Repair(42), serde_json::json!({ "id": 42, "signed": false }));
    cache.insert(CacheKey::Repairs, serde_json::json!([42]));
    cache.insert(CacheKey::Employees, serde_json::json!([]));
    let cache = Arc::new(cache);

    let session = SessionManager::new(
        config(&server),
        IdentitySource::logged_in(Identity::new(1, "Ana")),
    )
    .with_cache_bridge(CacheInvalidationBridge::new(cache.clone()))
    .spawn();
    let mut events = session.subscribe();
    wait_presence(&session, |users| users.len() == 1).await;

    server
        .hub()
        .publish(BroadcastEvent::signature_completed(42, Utc::now()));

    let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert_eq!(event.kind(), "signature-completed");
    assert_eq!(timeout(WAIT, refetch.recv()).await.unwrap(), Some(CacheKey::Repair(42)));
    assert_eq!(timeout(WAIT, refetch.recv()).await.unwrap(), Some(CacheKey::Repairs));
    assert!(!cache.is_stale(CacheKey::Employees));

    session.shutdown().await;
}

#[tokio::test]
async fn test_session_reconnects_after_server_drops_it() {
    let server = TestServer::start().await;
    let session = SessionManager::new(
        config(&server),
        IdentitySource::logged_in(Identity::new(1, "Ana")),
    )
    .spawn();
    wait_presence(&session, |users| users.len() == 1).await;

    let mut states = session.watch_state();
    server.hub().shutdown();

    timeout(WAIT, states.wait_for(|s| *s == SessionState::Disconnected))
        .await
        .unwrap()
        .unwrap();
    timeout(WAIT, states.wait_for(|s| *s == SessionState::Connected))
        .await
        .unwrap()
        .unwrap();
    server.wait_for_connections(1).await;

    session.shutdown().await;
}

#[tokio::test]
async fn test_logout_leaves_the_presence_set() {
    let server = TestServer::start().await;
    let identity = IdentitySource::logged_in(Identity::new(1, "Ana"));
    let session = SessionManager::new(config(&server), identity.clone()).spawn();
    wait_presence(&session, |users| users.len() == 1).await;

    identity.logout();
    wait_state(&session, SessionState::Disconnected).await;
    assert!(session.online_users().is_empty());
    server.wait_for_connections(0).await;
    assert!(server.hub().online_users().is_empty());

    session.shutdown().await;
}
