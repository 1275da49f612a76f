//! WebSocket transport: one connection per UI surface.
//!
//! ## Connection lifecycle
//!
//! 1. The surface connects to `GET /api/ws[?token=<launch token>]`. The
//!    token, when present, is checked before the upgrade completes: a wrong
//!    token gets `403 Forbidden`, the right one asks for main-window trust,
//!    no token at all makes an untrusted surface.
//! 2. All messages are JSON objects with a `"type"` field naming the
//!    command. An optional `"request_id"` is echoed on the reply; the
//!    command argument travels in `"payload"`.
//! 3. On disconnect (clean or not) the surface is closed in the router,
//!    which kills its terminal and cancels its telemetry subscription.
//!
//! ## Message types (client → server)
//!
//! | Type                  | Payload                       | Reply                        |
//! |-----------------------|-------------------------------|------------------------------|
//! | `ping`                | -                             | `pong`                       |
//! | `terminal.spawn`      | `{cols?, rows?}`              | `terminal.spawn.result`      |
//! | `terminal.write`      | string                        | (none unless unauthorized)   |
//! | `terminal.resize`     | `{cols, rows}`                | (none unless unauthorized)   |
//! | `terminal.kill`       | -                             | `terminal.kill.result`       |
//! | `system.getSnapshot`  | -                             | `system.getSnapshot.result`  |
//! | `system.subscribe`    | `intervalMs?`                 | `system.subscribe.result`    |
//! | `system.unsubscribe`  | -                             | `system.unsubscribe.result`  |
//! | `files.*`             | path                          | `files.*.result`             |
//!
//! ## Message types (server → client)
//!
//! | Type              | Key fields                    |
//! |-------------------|-------------------------------|
//! | `pong`            | -                             |
//! | `<cmd>.result`    | `ok`, `error?`, body fields   |
//! | `terminal.output` | `data` (text chunk)           |
//! | `terminal.exit`   | `data.code`                   |
//! | `system.metrics`  | `data` (metrics)              |
//! | `error`           | `code`, `message`             |

use axum::{
    extract::{ws::Message, Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};

use crate::auth::constant_time_eq;
use crate::surface::{Push, SurfaceId, SurfaceKind};
use crate::AppState;

/// Query parameters for the WebSocket upgrade request.
#[derive(Deserialize)]
pub struct WsQuery {
    /// Launch token (query parameter, since browsers cannot set headers on
    /// a WebSocket upgrade).
    pub token: Option<String>,
}

/// HTTP surface of the host.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(crate::routes::health::health))
        .route("/api/ws", get(ws_upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `GET /api/ws?token=<token>` - WebSocket upgrade handler.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let kind = match query.token.as_deref() {
        None => SurfaceKind::Untrusted,
        Some(token) if constant_time_eq(state.launch_token.as_bytes(), token.as_bytes()) => {
            SurfaceKind::Main
        }
        Some(_) => {
            warn!("WebSocket upgrade with wrong launch token refused");
            return (StatusCode::FORBIDDEN, "Forbidden").into_response();
        }
    };

    ws.max_message_size(state.config.server.max_message_bytes)
        .on_upgrade(move |socket| handle_ws(socket, state, kind))
}

/// Build the reply frame for a dispatched command.
fn reply_frame(name: &str, request_id: Option<&Value>, response: &crate::router::Response) -> Value {
    let mut frame = serde_json::to_value(response).unwrap_or_else(|_| json!({"ok": false}));
    frame["type"] = json!(format!("{name}.result"));
    if let Some(rid) = request_id {
        frame["request_id"] = rid.clone();
    }
    frame
}

/// Main WebSocket event loop for one surface.
///
/// Outgoing frames (replies and pushes) are funneled through channels into a
/// single sender task so terminal and telemetry tasks never touch the
/// socket. Incoming commands are dispatched in arrival order, which keeps
/// one surface's terminal input ordered.
async fn handle_ws(socket: axum::extract::ws::WebSocket, state: AppState, kind: SurfaceKind) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    let (tx, mut rx) = mpsc::channel::<Value>(256);
    let (push_tx, mut push_rx) = mpsc::channel::<Push>(256);

    let router = state.router.clone();
    let surface = router.open_surface(kind, push_tx).await;

    let send_task = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                Some(reply) = rx.recv() => reply,
                Some(push) = push_rx.recv() => match serde_json::to_value(&push) {
                    Ok(v) => v,
                    Err(e) => {
                        error!("{surface}: failed to serialize push: {e}");
                        continue;
                    }
                },
                else => break,
            };
            let text = match serde_json::to_string(&msg) {
                Ok(t) => t,
                Err(e) => {
                    error!("WS send: failed to serialize message: {e}");
                    continue;
                }
            };
            if ws_sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = ws_stream.next().await {
        match msg {
            Message::Text(text) => {
                handle_text(&state, surface, &tx, &text).await;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    router.close_surface(surface).await;
    send_task.abort();
}

async fn handle_text(state: &AppState, surface: SurfaceId, tx: &mpsc::Sender<Value>, text: &str) {
    let Ok(parsed) = serde_json::from_str::<Value>(text) else {
        let _ = tx
            .send(json!({
                "type": "error",
                "code": "INVALID_JSON",
                "message": "Failed to parse JSON message"
            }))
            .await;
        return;
    };

    let request_id = parsed.get("request_id");
    let Some(msg_type) = parsed["type"].as_str() else {
        let _ = tx
            .send(json!({
                "type": "error",
                "code": "INVALID_MESSAGE",
                "message": "Missing \"type\" field"
            }))
            .await;
        return;
    };

    if msg_type == "ping" {
        let mut resp = json!({"type": "pong"});
        if let Some(rid) = request_id {
            resp["request_id"] = rid.clone();
        }
        let _ = tx.send(resp).await;
        return;
    }

    let payload = parsed.get("payload").unwrap_or(&Value::Null);
    debug!("{surface}: {msg_type}");
    if let Some(response) = state.router.dispatch(surface, msg_type, payload).await {
        let _ = tx.send(reply_frame(msg_type, request_id, &response)).await;
    }
}
