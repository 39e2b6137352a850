use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::header,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use serde_json::json;
use tokio::{net::TcpListener, signal};
use tracing::{debug, info, warn};
use upnext_core::{listing, ClientRequest};
use uuid::Uuid;

use crate::{config::ServerConfig, room::SharedRoom};

pub struct AppState {
    pub room: SharedRoom,
    metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(room: SharedRoom, metrics: Option<PrometheusHandle>) -> Arc<Self> {
        Arc::new(Self { room, metrics })
    }
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    active_connections: usize,
    total_connections: u64,
    total_requests: u64,
    queue_len: usize,
    cursor: usize,
    queue: String,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(health_handler))
        .route("/debug/stats", get(stats_handler))
        .route("/metrics", get(metrics_handler))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

/// Serves on an already bound listener until `shutdown` resolves.
pub async fn serve_on<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("server shutdown with error")
}

pub async fn run(config: ServerConfig, metrics: Option<PrometheusHandle>) -> Result<()> {
    let state = AppState::new(SharedRoom::new(config.connection_buffer), metrics);

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .context("failed to bind listener")?;
    info!("upnext-server listening on {}", config.listen_addr);

    serve_on(listener, state, shutdown_signal()).await?;

    info!(
        grace_seconds = config.shutdown_grace.as_secs(),
        "shutdown signal received; sleeping for graceful period"
    );
    tokio::time::sleep(config.shutdown_grace).await;
    info!("graceful shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.room.snapshot().await;
    Json(StatsResponse {
        active_connections: snapshot.active_connections,
        total_connections: snapshot.total_connections,
        total_requests: snapshot.total_requests,
        queue_len: snapshot.queue.len(),
        cursor: snapshot.cursor,
        queue: listing(&snapshot.queue),
    })
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let body = state
        .metrics
        .as_ref()
        .map(PrometheusHandle::render)
        .unwrap_or_default();
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}

async fn ws_handler(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: Arc<AppState>) {
    let connection_id = Uuid::new_v4();
    let (mut ws_tx, mut ws_rx) = socket.split();

    let registration = state.room.join(connection_id).await;
    let mut rx = registration.receiver;
    info!(
        connection_id = %connection_id,
        active_connections = registration.active_connections,
        "client connected"
    );

    let writer = tokio::spawn(async move {
        while let Some(push) = rx.recv().await {
            let frame = match push.encode() {
                Ok(frame) => frame,
                Err(err) => {
                    warn!(connection_id = %connection_id, error = %err, "dropping push");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(frame)).await.is_err() {
                return;
            }
        }
        // The room dropped our sender: close so the client reconnects.
        let _ = ws_tx.send(Message::Close(None)).await;
        debug!(connection_id = %connection_id, "writer task finished");
    });

    while let Some(message) = ws_rx.next().await {
        let payload = match message {
            Ok(Message::Text(text)) => text.into_bytes(),
            Ok(Message::Binary(bytes)) => bytes,
            Ok(Message::Close(frame)) => {
                info!(
                    connection_id = %connection_id,
                    reason = ?frame.map(|f| f.reason.to_string()),
                    "client closed websocket"
                );
                break;
            }
            Ok(_) => continue,
            Err(err) => {
                warn!(connection_id = %connection_id, error = %err, "error receiving message");
                break;
            }
        };

        match ClientRequest::decode(&payload) {
            Ok(request) => {
                state.room.handle(connection_id, request).await;
            }
            Err(err) => {
                counter!("upnext_invalid_frames_total", 1);
                warn!(connection_id = %connection_id, error = %err, "ignoring invalid frame");
            }
        }
    }

    let remaining = state.room.leave(connection_id).await;
    writer.abort();
    info!(
        connection_id = %connection_id,
        active_connections = remaining,
        "client disconnected"
    );
}
