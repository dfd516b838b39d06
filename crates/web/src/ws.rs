//! WebSocket endpoint streaming merge / diff / conflicts progress.
//!
//! Clients connect to `/api/git/progress` and receive one JSON message per
//! progress event:
//!
//! ```json
//! {"type": "progress", "task": "fetch: receiving objects", "percentage": 40}
//! ```
//!
//! The progress sink has a single subscriber, so a new connection takes the
//! stream over and the previous connection is closed.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tracing::{debug, warn};

use branchsync_core::progress::{ProgressEvent, ProgressSink};

use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/git/progress", get(ws_handler))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let sink = Arc::clone(&state.progress);
    ws.on_upgrade(move |socket| handle_socket(socket, sink))
}

fn progress_message(event: &ProgressEvent) -> String {
    serde_json::json!({
        "type": "progress",
        "task": event.task,
        "percentage": event.percentage,
    })
    .to_string()
}

async fn handle_socket(mut socket: WebSocket, sink: Arc<ProgressSink>) {
    debug!("progress client connected");
    let mut events = sink.subscribe();

    let welcome = serde_json::json!({ "type": "connected" });
    if let Err(e) = socket.send(Message::Text(welcome.to_string())).await {
        warn!("failed to send welcome message: {}", e);
        return;
    }

    loop {
        tokio::select! {
            event = events.next() => {
                match event {
                    Some(event) => {
                        if let Err(e) = socket.send(Message::Text(progress_message(&event))).await {
                            debug!("progress send error (client disconnected?): {}", e);
                            break;
                        }
                    }
                    None => {
                        debug!("progress subscription taken over by another client");
                        let _ = socket.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("progress client disconnected");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = socket.send(Message::Pong(data)).await {
                            debug!("WebSocket pong error: {}", e);
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("WebSocket receive error: {}", e);
                        break;
                    }
                }
            }
        }
    }

    debug!("progress connection closed");
}
