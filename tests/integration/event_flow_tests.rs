// ============================
// tests/integration/event_flow_tests.rs
// ============================
//! Business events fanned out over real status sockets.

use crate::test_utils::{connect, login, try_next_event, wait_for_presence, TestServer};
use backend_lib::BroadcastEvent;
use chrono::Utc;
use shopstatus_common::{EmployeeAction, Role, ServerMessage, SignatureType};
use std::time::Duration;

const QUIET: Duration = Duration::from_millis(300);
const EXPECT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_signature_request_goes_to_kiosks_only() {
    let server = TestServer::start().await;
    let mut staff = login(&server, 1, "Ana", Role::Standard).await;
    let mut kiosk = login(&server, 90, "Front desk", Role::Kiosk).await;
    wait_for_presence(&mut staff, |ids| ids == [1, 90]).await;

    let report = server.hub().publish(BroadcastEvent::signature_request(
        42,
        SignatureType::Dropoff,
        None,
        Some("Ana".to_string()),
        Utc::now(),
    ));
    assert_eq!(report.delivered, 1);

    match try_next_event(&mut kiosk, EXPECT).await {
        Some(ServerMessage::SignatureRequest {
            repair_id,
            signature_type,
            requested_by,
            ..
        }) => {
            assert_eq!(repair_id, 42);
            assert_eq!(signature_type, SignatureType::Dropoff);
            assert_eq!(requested_by.as_deref(), Some("Ana"));
        },
        other => panic!("expected signature request, got {other:?}"),
    }
    assert!(try_next_event(&mut staff, QUIET).await.is_none());
}

#[tokio::test]
async fn test_signature_request_for_one_kiosk() {
    let server = TestServer::start().await;
    let mut front = login(&server, 90, "Front desk", Role::Kiosk).await;
    let mut back = login(&server, 91, "Back counter", Role::Kiosk).await;

    server.hub().publish(BroadcastEvent::signature_request(
        7,
        SignatureType::Pickup,
        Some(91),
        None,
        Utc::now(),
    ));

    assert!(matches!(
        try_next_event(&mut back, EXPECT).await,
        Some(ServerMessage::SignatureRequest { kiosk_id: Some(91), .. })
    ));
    assert!(try_next_event(&mut front, QUIET).await.is_none());
}

#[tokio::test]
async fn test_broadcast_events_reach_every_authenticated_socket() {
    let server = TestServer::start().await;
    let mut a = login(&server, 1, "Ana", Role::Standard).await;
    let mut kiosk = login(&server, 90, "Front desk", Role::Kiosk).await;
    let mut pending = connect(&server).await;
    server.wait_for_connections(3).await;

    let completed = BroadcastEvent::signature_completed(42, Utc::now());
    let employee = BroadcastEvent::employee_update(EmployeeAction::Created, 12, Utc::now());
    assert_eq!(server.hub().publish(completed.clone()).delivered, 2);
    assert_eq!(server.hub().publish(employee.clone()).delivered, 2);

    for ws in [&mut a, &mut kiosk] {
        assert_eq!(try_next_event(ws, EXPECT).await, Some(completed.message.clone()));
        assert_eq!(try_next_event(ws, EXPECT).await, Some(employee.message.clone()));
    }
    assert!(try_next_event(&mut pending, QUIET).await.is_none());
}

#[tokio::test]
async fn test_kiosk_registration_is_announced() {
    let server = TestServer::start().await;
    let mut staff = login(&server, 1, "Ana", Role::Standard).await;

    server.hub().publish(BroadcastEvent::kiosk_registered(
        93,
        "Side door".to_string(),
        Utc::now(),
    ));
    assert!(matches!(
        try_next_event(&mut staff, EXPECT).await,
        Some(ServerMessage::KioskRegistered { kiosk_id: 93, ref name, .. }) if name == "Side door"
    ));
}
