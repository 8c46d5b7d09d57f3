use axum::extract::ws::{Message, WebSocket};
use axum::{
    extract::{State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use super::BroadcastHub;
use crate::error::{Error, Result};

#[derive(Clone)]
struct AppState {
    hub: Arc<BroadcastHub>,
    shutdown: CancellationToken,
}

/// WebSocket endpoint in front of a [`BroadcastHub`]
pub struct HubServer {
    hub: Arc<BroadcastHub>,
    listener: TcpListener,
}

impl HubServer {
    /// Bind the listening socket; failure is fatal for the process
    pub async fn bind(hub: Arc<BroadcastHub>, host: &str, port: u16) -> Result<Self> {
        let addr = format!("{host}:{port}");
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| Error::HubBind { addr, source })?;
        Ok(Self { hub, listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `shutdown` fires; open sockets are closed on shutdown
    pub async fn serve(self, shutdown: CancellationToken) -> Result<()> {
        let addr = self.local_addr()?;
        let app = router(Arc::clone(&self.hub), shutdown.clone());

        tracing::info!("Realtime hub listening on ws://{}", addr);
        axum::serve(self.listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await?;
        tracing::info!("Realtime hub stopped");
        Ok(())
    }
}

pub fn router(hub: Arc<BroadcastHub>, shutdown: CancellationToken) -> Router {
    Router::new()
        .route("/", get(websocket_handler))
        .route("/ws", get(websocket_handler))
        .route("/health", get(health))
        .route("/api/latest-page", get(latest_page))
        .layer(CorsLayer::permissive())
        .with_state(AppState { hub, shutdown })
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "subscribers": state.hub.subscriber_count(),
    }))
}

async fn latest_page(State(state): State<AppState>) -> Response {
    match state.hub.latest() {
        Some(page) => Json(page).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no page captured yet" })),
        )
            .into_response(),
    }
}

async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut subscription = state.hub.subscribe();

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                sender.send(Message::Close(None)).await.ok();
                break;
            }
            outgoing = subscription.receiver.recv() => {
                // `None` means the hub dropped this subscriber
                let Some(message) = outgoing else { break };
                let json = match serde_json::to_string(&message) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!("Failed to serialize hub message: {}", e);
                        continue;
                    }
                };
                if sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    tracing::debug!("Message from subscriber {}: {}", subscription.id, text.as_str());
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!("Subscriber {} socket error: {}", subscription.id, e);
                    break;
                }
            },
        }
    }

    state.hub.unsubscribe(subscription.id);
}
