// ============================
// tests/integration/presence_flow_tests.rs
// ============================
//! Presence over real status sockets.

use crate::test_utils::{
    connect, login, next_message, send, send_raw, try_next_message, user_ids, wait_closed,
    wait_for_presence, TestServer,
};
use backend_lib::config::Settings;
use shopstatus_common::{ClientMessage, Role, ServerMessage};
use std::time::Duration;

#[tokio::test]
async fn test_departed_user_drops_out_with_frozen_last_seen() {
    let server = TestServer::start().await;
    let mut a = login(&server, 1, "Ana", Role::Standard).await;
    let mut b = login(&server, 2, "Bo", Role::Standard).await;

    let both = wait_for_presence(&mut a, |ids| ids == [1, 2]).await;
    let b_last_seen = both
        .iter()
        .find(|u| u.user_id == 2)
        .map(|u| u.last_seen)
        .unwrap();

    b.close(None).await.unwrap();

    let after = wait_for_presence(&mut a, |ids| !ids.contains(&2)).await;
    assert_eq!(user_ids(&after), vec![1]);
    assert_eq!(server.hub().registry().last_seen(2), Some(b_last_seen));
}

#[tokio::test]
async fn test_second_tab_keeps_user_online() {
    let server = TestServer::start().await;
    let mut tab1 = login(&server, 1, "Ana", Role::Standard).await;
    let _tab2 = login(&server, 1, "Ana", Role::Standard).await;
    let mut observer = login(&server, 2, "Bo", Role::Standard).await;
    server.wait_for_connections(3).await;

    tab1.close(None).await.unwrap();
    server.wait_for_connections(2).await;

    send(&mut observer, &ClientMessage::RequestStatus).await;
    let online = wait_for_presence(&mut observer, |_| true).await;
    assert_eq!(user_ids(&online), vec![1, 2]);
    assert_eq!(user_ids(&server.hub().online_users()), vec![1, 2]);
}

#[tokio::test]
async fn test_messages_before_auth_are_ignored() {
    let server = TestServer::start().await;
    let mut ws = connect(&server).await;

    send(&mut ws, &ClientMessage::Heartbeat { user_id: 5 }).await;
    send(&mut ws, &ClientMessage::RequestStatus).await;
    send_raw(&mut ws, r#"{"type":"subscribe","topic":"repairs"}"#).await;
    send_raw(&mut ws, "garbage").await;
    assert!(try_next_message(&mut ws, Duration::from_millis(300)).await.is_none());

    send(
        &mut ws,
        &ClientMessage::Auth {
            user_id: 5,
            username: "Eve".to_string(),
            role: Role::Standard,
        },
    )
    .await;
    assert_eq!(next_message(&mut ws).await, ServerMessage::AuthSuccess);
}

#[tokio::test]
async fn test_heartbeat_is_acknowledged() {
    let server = TestServer::start().await;
    let mut ws = login(&server, 1, "Ana", Role::Standard).await;

    send(&mut ws, &ClientMessage::Heartbeat { user_id: 1 }).await;
    assert_eq!(next_message(&mut ws).await, ServerMessage::HeartbeatAck);
    assert!(matches!(
        next_message(&mut ws).await,
        ServerMessage::StatusUpdate { .. }
    ));
}

#[tokio::test]
async fn test_request_status_answers_only_the_requester() {
    let server = TestServer::start().await;
    let mut a = login(&server, 1, "Ana", Role::Standard).await;
    let mut b = login(&server, 2, "Bo", Role::Standard).await;
    wait_for_presence(&mut a, |ids| ids == [1, 2]).await;

    send(&mut a, &ClientMessage::RequestStatus).await;
    let online = wait_for_presence(&mut a, |_| true).await;
    assert_eq!(user_ids(&online), vec![1, 2]);
    assert!(try_next_message(&mut b, Duration::from_millis(300)).await.is_none());
}

#[tokio::test]
async fn test_unauthenticated_socket_closed_after_grace() {
    let mut settings = Settings::default();
    settings.presence.auth_grace_secs = 1;
    let server = TestServer::with_settings(settings).await;

    let mut ws = connect(&server).await;
    assert!(wait_closed(&mut ws, Duration::from_secs(5)).await);
    server.wait_for_connections(0).await;
}

#[tokio::test]
async fn test_silent_connection_is_swept() {
    let mut settings = Settings::default();
    settings.presence.heartbeat_interval_secs = 1;
    settings.presence.stale_after_secs = 2;
    settings.presence.sweep_interval_secs = 1;
    let server = TestServer::with_settings(settings).await;

    let mut quiet = login(&server, 1, "Ana", Role::Standard).await;
    assert!(wait_closed(&mut quiet, Duration::from_secs(6)).await);
    server.wait_for_connections(0).await;
    assert!(server.hub().online_users().is_empty());
    assert!(server.hub().registry().last_seen(1).is_some());
}
