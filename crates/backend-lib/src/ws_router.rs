// ============================
// shopstatus-backend-lib/src/ws_router.rs
// ============================
/** WebSocket router for the shop status channel.
Each socket gets one task that reads client frames, drains the connection's
outbound queue and watches the close signal and auth deadline. */
use crate::{
    error::AppError,
    hub::StatusHub,
    metrics::{WS_ACTIVE, WS_AUTH_TIMEOUT, WS_CONNECTION, WS_DISCONNECTION, WS_PROTOCOL_ERROR},
    registry::{ConnectionId, ConnectionReceiver},
    AppState,
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use serde::Serialize;
use shopstatus_common::{peek_message_type, ClientMessage, OnlineUser};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, error, warn};

/// Path the status socket is served on
pub const WS_PATH: &str = "/ws/status";

/// Create the status router
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(WS_PATH, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/status/online", get(online_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_handler() -> &'static str {
    "Healthy"
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OnlineResponse {
    online_users: Vec<OnlineUser>,
    connections: usize,
}

/// Presence snapshot over plain HTTP
async fn online_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(OnlineResponse {
        online_users: state.hub.online_users(),
        connections: state.hub.registry().len(),
    })
}

/// Upgrade to a status socket
async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.hub))
}

/// Drive one status socket until either side closes it
async fn handle_socket(socket: WebSocket, hub: Arc<StatusHub>) {
    let (mut sender, mut receiver) = socket.split();
    let (id, ConnectionReceiver { mut messages, closed }) = hub.connect();

    counter!(WS_CONNECTION).increment(1);
    gauge!(WS_ACTIVE).increment(1.0);
    debug!(connection = %id, "status socket opened");

    let auth_deadline = tokio::time::sleep(hub.presence_settings().auth_grace());
    tokio::pin!(auth_deadline);
    let mut deadline_armed = true;

    loop {
        tokio::select! {
            inbound = receiver.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    if let Err(e) = handle_text(&hub, id, text.as_str()) {
                        warn!(connection = %id, code = e.error_code(), error = %e, "ignored client message");
                    }
                },
                Some(Ok(Message::Close(_))) | None => break,
                // ping/pong are answered by axum; binary frames are not part of the protocol
                Some(Ok(_)) => {},
                Some(Err(e)) => {
                    debug!(connection = %id, error = %e, "socket read failed");
                    break;
                },
            },
            outbound = messages.recv() => {
                let Some(msg) = outbound else { break };
                let json = match serde_json::to_string(&msg) {
                    Ok(json) => json,
                    Err(e) => {
                        error!(connection = %id, error = %e, "failed to serialize server message");
                        continue;
                    },
                };
                if sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            },
            () = closed.notified() => {
                debug!(connection = %id, "closed by server");
                let _ = sender.send(Message::Close(None)).await;
                break;
            },
            () = &mut auth_deadline, if deadline_armed => {
                deadline_armed = false;
                if hub.expire_if_pending(id) {
                    counter!(WS_AUTH_TIMEOUT).increment(1);
                }
            },
        }
    }

    hub.disconnect(id);
    counter!(WS_DISCONNECTION).increment(1);
    gauge!(WS_ACTIVE).decrement(1.0);
    debug!(connection = %id, "status socket closed");
}

fn handle_text(hub: &StatusHub, id: ConnectionId, text: &str) -> Result<(), AppError> {
    let msg: ClientMessage = serde_json::from_str(text).map_err(|e| {
        counter!(WS_PROTOCOL_ERROR).increment(1);
        match peek_message_type(text) {
            Some(kind) => AppError::Protocol(format!("unhandled message `{kind}`: {e}")),
            None => AppError::Json(e),
        }
    })?;
    hub.handle_message(id, msg)
}
