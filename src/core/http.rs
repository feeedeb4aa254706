//! Dashboard HTTP surface using Axum
//!
//! Serves health and metrics plus the websocket endpoint dashboard
//! clients connect to. Clients pick their subscriber groups with
//! subscribe/unsubscribe commands after the upgrade.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Json, Response};
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::warmup::WarmupCoordinator;
use crate::metrics::Metrics;
use crate::push::WsHub;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<WsHub>,
    pub warmup: Arc<WarmupCoordinator>,
    pub metrics: Arc<Metrics>,
    pub start_time: Arc<Instant>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/ws", get(ws_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "uptime_seconds": state.start_time.elapsed().as_secs(),
        "warmed_up": state.warmup.is_warmed_up(),
        "clients": state.hub.client_count(),
        "service": "coindeck-dashboard",
    }))
}

async fn metrics_handler(State(state): State<AppState>) -> Result<String, StatusCode> {
    state
        .metrics
        .export()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.hub.clone()))
}

/// Subscribe/unsubscribe command sent by a dashboard client.
#[derive(Debug, Deserialize)]
struct ClientCommand {
    action: String,
    group: Option<String>,
}

async fn handle_socket(socket: WebSocket, hub: Arc<WsHub>) {
    let (client_id, mut frames) = hub.register();
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Some(frame) => {
                    if sink.send(Message::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => apply_command(&hub, client_id, &text),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(client = %client_id, error = %e, "websocket receive error");
                    break;
                }
            },
        }
    }

    hub.unregister(client_id);
}

fn apply_command(hub: &WsHub, client_id: Uuid, text: &str) {
    let command: ClientCommand = match serde_json::from_str(text) {
        Ok(command) => command,
        Err(e) => {
            warn!(client = %client_id, error = %e, "unparseable client command");
            return;
        }
    };

    match (command.action.as_str(), command.group.as_deref()) {
        ("subscribe", Some(group)) => hub.join_group(client_id, group),
        ("unsubscribe", Some(group)) => hub.leave_group(client_id, group),
        _ => warn!(
            client = %client_id,
            action = %command.action,
            "unsupported client command"
        ),
    }
}
