// ==========================
// tests/unit/router_tests.rs
// ==========================
//! HTTP routes served next to the status socket
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
};
use backend_lib::{config::Settings, ws_router::create_router, AppState};
use shopstatus_common::Role;
use tower::ServiceExt;

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health_route() {
    let response = create_router(AppState::new(&Settings::default()))
        .oneshot(get("/health"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"Healthy");
}

#[tokio::test]
async fn test_online_route_collapses_tabs() {
    let state = AppState::new(&Settings::default());
    let (tab1, _rx1) = state.hub.connect();
    let (tab2, _rx2) = state.hub.connect();
    let (kiosk, _rx3) = state.hub.connect();
    state.hub.authenticate(tab1, 1, "Ana", Role::Standard);
    state.hub.authenticate(tab2, 1, "Ana", Role::Standard);
    state.hub.authenticate(kiosk, 90, "Front desk", Role::Kiosk);

    let response = create_router(state).oneshot(get("/status/online")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["connections"], 3);
    let users = json["onlineUsers"].as_array().unwrap();
    assert_eq!(users.len(), 2);
    assert_eq!(users[0]["userId"], 1);
    assert_eq!(users[0]["isActive"], true);
    assert_eq!(users[1]["username"], "Front desk");
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let response = create_router(AppState::new(&Settings::default()))
        .oneshot(get("/ws"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
