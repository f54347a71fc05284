//! WebSocket transport binding.
//!
//! One socket serves many sessions: clients create, attach, and drive
//! sessions over a single connection. Each attachment runs its own
//! sequential replay-then-forward task, so a client always sees a
//! session's events in sequence order with no gaps or duplicates.

use std::{collections::HashMap, path::PathBuf, sync::Arc};

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tether_core::{EventStore, SessionId, SessionStatus};
use tether_session::{CreateOptions, Orchestrator};
use tokio::{sync::mpsc, task::JoinHandle};

use crate::protocol::{ClientFrame, ServerFrame};

/// Controls which sessions a client may attach to.
#[derive(Debug, Clone)]
pub struct AttachPolicy {
    /// Permit read-only replay of `Closed` and `Error` sessions.
    pub allow_finished_replay: bool,
}

impl Default for AttachPolicy {
    fn default() -> Self {
        Self {
            allow_finished_replay: true,
        }
    }
}

/// Shared handler state.
#[derive(Clone)]
pub struct WsState {
    pub orchestrator: Arc<Orchestrator>,
    pub policy: AttachPolicy,
}

/// Build the WebSocket router, serving the protocol at `/ws`.
#[must_use]
pub fn router(orchestrator: Arc<Orchestrator>, policy: AttachPolicy) -> axum::Router {
    axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(WsState {
            orchestrator,
            policy,
        })
}

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WsState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: WsState) {
    let (mut sender, mut receiver) = socket.split();

    // Channel for sending frames to the client.
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerFrame>();

    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let json = match serde_json::to_string(&frame) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("Failed to serialize frame: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // Per-session attachment tasks owned by this connection.
    let mut attachments: HashMap<SessionId, JoinHandle<()>> = HashMap::new();

    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s.into(),
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!("WebSocket error: {e}");
                break;
            }
        };

        let frame: ClientFrame = match serde_json::from_str(&text) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!("Invalid client frame: {e}");
                let _ = tx.send(ServerFrame::Error {
                    message: format!("Invalid frame: {e}"),
                });
                continue;
            }
        };

        match frame {
            ClientFrame::Ping => {
                let _ = tx.send(ServerFrame::Pong);
            }
            ClientFrame::Create {
                kind,
                workspace,
                options,
            } => {
                let opts = CreateOptions {
                    workspace: PathBuf::from(workspace),
                    options,
                };
                match state.orchestrator.create_session(&kind, opts).await {
                    Ok(session) => {
                        let _ = tx.send(ServerFrame::Created {
                            session_id: session.id,
                        });
                    }
                    Err(e) => {
                        let _ = tx.send(ServerFrame::Error {
                            message: e.to_string(),
                        });
                    }
                }
            }
            ClientFrame::Attach {
                session_id,
                last_seen_sequence,
            } => {
                let session = match state.orchestrator.get_session(session_id).await {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = tx.send(ServerFrame::Error {
                            message: e.to_string(),
                        });
                        continue;
                    }
                };
                if !attachable(session.status, &state.policy) {
                    let _ = tx.send(ServerFrame::Error {
                        message: format!("session {session_id} is finished and replay is disabled"),
                    });
                    continue;
                }

                let events = state.orchestrator.events();
                let _ = tx.send(ServerFrame::Attached {
                    session_id,
                    latest_sequence: events.sequence(session_id),
                });
                let task = tokio::spawn(forward_events(
                    events,
                    session_id,
                    last_seen_sequence,
                    tx.clone(),
                ));
                if let Some(previous) = attachments.insert(session_id, task) {
                    previous.abort();
                }
            }
            ClientFrame::Detach { session_id } => {
                if let Some(task) = attachments.remove(&session_id) {
                    task.abort();
                }
                let _ = tx.send(ServerFrame::Detached { session_id });
            }
            ClientFrame::Input { session_id, .. } => {
                let Some(bytes) = frame.decode_input() else {
                    let _ = tx.send(ServerFrame::Error {
                        message: "input data is not valid base64".to_string(),
                    });
                    continue;
                };
                match state.orchestrator.send_input(session_id, &bytes).await {
                    Ok(_) => {
                        let _ = tx.send(ServerFrame::Ack {
                            op: "input".to_string(),
                            session_id,
                        });
                    }
                    Err(e) => {
                        let _ = tx.send(ServerFrame::Error {
                            message: e.to_string(),
                        });
                    }
                }
            }
            ClientFrame::Resize {
                session_id,
                cols,
                rows,
            } => match state.orchestrator.resize(session_id, cols, rows).await {
                Ok(_) => {
                    let _ = tx.send(ServerFrame::Ack {
                        op: "resize".to_string(),
                        session_id,
                    });
                }
                Err(e) => {
                    let _ = tx.send(ServerFrame::Error {
                        message: e.to_string(),
                    });
                }
            },
            ClientFrame::Close { session_id } => {
                state.orchestrator.close_session(session_id).await;
                let _ = tx.send(ServerFrame::Ack {
                    op: "close".to_string(),
                    session_id,
                });
            }
        }
    }

    // Connection loss drops subscriptions only; sessions keep running.
    for task in attachments.into_values() {
        task.abort();
    }
    send_task.abort();
}

fn attachable(status: SessionStatus, policy: &AttachPolicy) -> bool {
    match status {
        SessionStatus::Closed | SessionStatus::Error => policy.allow_finished_replay,
        _ => true,
    }
}

/// The attachment body: replay committed events after `since`, then
/// forward live ones. `EventStore::follow` guarantees the no-gaps,
/// no-duplicates ordering.
async fn forward_events(
    events: Arc<EventStore>,
    session_id: SessionId,
    since: u64,
    tx: mpsc::UnboundedSender<ServerFrame>,
) {
    let mut stream = events.follow(session_id, since);
    while let Some(record) = stream.next().await {
        if tx.send(ServerFrame::from(record)).is_err() {
            break;
        }
    }
}
