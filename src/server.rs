//! HTTP surface of the liveness channel.
//!
//! - `GET /ws/node`: persistent node connection (register / PING frames)
//! - `POST /nodes/{external_id}/heartbeat`: polling heartbeat
//! - `GET /health`: process and monitor status

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::errors::CoreError;
use crate::realtime::{ConnectionSession, LivenessTracker};

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let status =
            StatusCode::from_u16(kind.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = json!({
            "error": kind.error_name(),
            "message": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

pub fn router(liveness: Arc<LivenessTracker>) -> Router {
    Router::new()
        .route("/ws/node", get(ws_upgrade))
        .route("/nodes/{external_id}/heartbeat", post(heartbeat))
        .route("/health", get(health))
        .with_state(liveness)
}

/// Serves until the listener fails or the process receives ctrl-c.
pub async fn serve(listener: TcpListener, liveness: Arc<LivenessTracker>) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "liveness channel listening");
    axum::serve(listener, router(liveness))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await
}

pub async fn bind(addr: SocketAddr) -> std::io::Result<TcpListener> {
    TcpListener::bind(addr).await
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(liveness): State<Arc<LivenessTracker>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_node_socket(socket, liveness))
}

async fn handle_node_socket(socket: WebSocket, liveness: Arc<LivenessTracker>) {
    let (mut tx, mut rx) = socket.split();
    let mut session = ConnectionSession::new(liveness);

    while let Some(frame) = rx.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                if let Some(reply) = session.handle_text(text.as_str()).await {
                    if tx.send(Message::Text(reply.into())).await.is_err() {
                        break;
                    }
                }
            }
            Ok(Message::Ping(data)) => {
                let _ = tx.send(Message::Pong(data)).await;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "node socket error");
                break;
            }
        }
    }

    if let Some(id) = session.node_id() {
        warn!(external_id = %id, "node connection closed");
    }
    session.close().await;
}

async fn heartbeat(
    State(liveness): State<Arc<LivenessTracker>>,
    Path(external_id): Path<String>,
) -> Result<Response, CoreError> {
    let update = liveness.record_heartbeat(&external_id).await?;
    Ok(match update {
        Some(update) => (StatusCode::OK, Json(json!({ "recorded": true, "node": update.node })))
            .into_response(),
        None => (StatusCode::ACCEPTED, Json(json!({ "recorded": false }))).into_response(),
    })
}

async fn health(State(liveness): State<Arc<LivenessTracker>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "heartbeat": liveness.monitor().stats(),
    }))
}
