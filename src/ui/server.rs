//! WebSocket and health endpoints for the UI.
//!
//! # Responsibilities
//! - `GET /ws`: upgrade, send a status snapshot, then pump commands in and notifications out
//! - `GET /health`: current connection status as JSON
//! - Drain on the shutdown signal

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::broadcast::{self, error::RecvError};
use tower_http::trace::TraceLayer;

use crate::provider::types::ErrorKind;
use crate::session::ConnectionManager;
use crate::ui::{Command, Dispatcher, Notification, Notifier};

/// Application state injected into handlers.
#[derive(Clone)]
struct UiState {
    dispatcher: Dispatcher,
    manager: ConnectionManager,
    notifier: Notifier,
}

/// HTTP server carrying the UI boundary.
pub struct UiServer {
    router: Router,
}

impl UiServer {
    pub fn new(dispatcher: Dispatcher, manager: ConnectionManager, notifier: Notifier) -> Self {
        let state = UiState {
            dispatcher,
            manager,
            notifier,
        };
        Self {
            router: Self::build_router(state),
        }
    }

    fn build_router(state: UiState) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve until `shutdown` fires, then drain open connections.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "UI server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("UI server received shutdown signal");
            })
            .await?;

        tracing::info!("UI server stopped");
        Ok(())
    }
}

async fn health_handler(State(state): State<UiState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "connection": state.manager.status(),
        "backend": state.manager.backend(),
    }))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<UiState>) -> Response {
    ws.on_upgrade(move |socket| client_session(socket, state)).into_response()
}

type ClientSink = SplitSink<WebSocket, Message>;

async fn send(sink: &mut ClientSink, notification: &Notification) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(notification) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode notification");
            return Ok(());
        }
    };
    sink.send(Message::Text(text.into())).await
}

async fn client_session(socket: WebSocket, state: UiState) {
    let (mut sink, mut stream) = socket.split();
    // Subscribed before the snapshot so nothing published in between is lost.
    let mut notifications = state.notifier.subscribe();
    tracing::info!(clients = state.notifier.receiver_count(), "UI client connected");

    let mut snapshot = vec![Notification::ConnectionStatus {
        status: state.manager.status(),
        backend: state.manager.backend(),
    }];
    if let Some(wallet) = state.manager.tracker().current() {
        snapshot.push(Notification::WalletState(wallet));
    }
    for notification in &snapshot {
        if send(&mut sink, notification).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<Command>(text.as_str()) {
                    Ok(command) => {
                        tracing::debug!(?command, "UI command");
                        state.dispatcher.dispatch(command);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Rejecting malformed UI command");
                        let reply = Notification::WalletError {
                            error: ErrorKind::MalformedRequest,
                            message: format!("invalid command: {e}"),
                        };
                        if send(&mut sink, &reply).await.is_err() {
                            break;
                        }
                    }
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "UI socket read failed");
                    break;
                }
            },
            outgoing = notifications.recv() => match outgoing {
                Ok(notification) => {
                    if send(&mut sink, &notification).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "UI client lagging, stale state updates skipped");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    tracing::info!("UI client disconnected");
}
