//! WebSocket push for real-time task sync.
//!
//! Each client receives a full snapshot on connect, then a stream of
//! task events. A client that falls behind the broadcast channel gets
//! a fresh snapshot instead of the dropped events.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::{AppState, TaskView};

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsPush {
    Sync { tasks: Vec<TaskView> },
}

pub(super) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    info!("WebSocket client connecting");
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    info!("WebSocket client connected");

    // Subscribe before the snapshot so no event can fall in between.
    let mut rx = state.broker.subscribe();

    if !send_sync(&mut socket, &state).await {
        return;
    }

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        if let Ok(json) = serde_json::to_string(&event) {
                            if socket.send(Message::Text(json.into())).await.is_err() {
                                debug!("WS client disconnected during send");
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(missed = n, "WS client lagged behind broadcast, re-syncing");
                        if !send_sync(&mut socket, &state).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Event broker closed");
                        break;
                    }
                }
            }

            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("WebSocket client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("WebSocket connection closed");
}

/// Send the full task list. Returns false if the client is gone.
async fn send_sync(socket: &mut WebSocket, state: &AppState) -> bool {
    let tasks = state
        .runner
        .list()
        .await
        .into_iter()
        .map(TaskView::from)
        .collect();

    match serde_json::to_string(&WsPush::Sync { tasks }) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "Failed to serialize task sync");
            true
        }
    }
}
