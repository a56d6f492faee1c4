//! Relay WebSocket handler
//!
//! One session per upgraded socket: a writer task drains the connection's
//! outbound queue, a reader task feeds inbound frames to the broadcaster.
//! Whichever ends first tears the session down.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::CLOSE_FLUSH_TIMEOUT;
use crate::api::server::AppState;
use crate::relay::{ConnectionHandle, Frame};

/// WebSocket handler for the relay endpoint
pub async fn relay_ws(
    ws: WebSocketUpgrade,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let peer = connect_info.map(|ConnectInfo(addr)| addr);
    let max_message_bytes = state.config.server.max_message_bytes;

    ws.max_message_size(max_message_bytes)
        .on_upgrade(move |socket| handle_relay_ws(socket, peer, state))
}

/// Run one relay session to completion
async fn handle_relay_ws(socket: WebSocket, peer: Option<SocketAddr>, state: AppState) {
    let _session = SessionGuard::enter(&state.sessions);
    let (handle, outbound) = ConnectionHandle::new(peer, state.config.server.outbound_buffer);
    let id = handle.id();
    let (sender, mut receiver) = socket.split();

    // Queued before joining so it is always the first frame the peer sees
    if let Err(e) = state.broadcaster.welcome(&handle) {
        warn!(connection = %id, error = %e, "Failed to queue welcome message");
        return;
    }
    state.registry.add(handle.clone());

    info!(
        connection = %id,
        peer = ?peer,
        active = state.registry.len(),
        "Client connected"
    );

    let mut send_task = tokio::spawn(write_frames(handle.clone(), outbound, sender));

    let broadcaster = state.broadcaster.clone();
    let reader_handle = handle.clone();
    let mut receive_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    broadcaster.relay(&reader_handle, &text);
                }
                Ok(Message::Binary(bytes)) => {
                    broadcaster.relay_bytes(&reader_handle, &bytes);
                }
                Ok(Message::Close(_)) => {
                    debug!(connection = %reader_handle.id(), "Relay WebSocket received close");
                    break;
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                    // Pong is handled automatically by axum
                }
                Err(e) => {
                    debug!(connection = %reader_handle.id(), "Relay WebSocket error: {}", e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            debug!(connection = %id, "Send task ended");
        }
        _ = &mut receive_task => {
            debug!(connection = %id, "Receive task ended");
        }
    }

    // Out of the registry before the state changes, so concurrent relays
    // never see this connection as a failed recipient
    state.registry.remove(id);
    handle.mark_closed();

    send_task.abort();
    receive_task.abort();
    let _ = tokio::join!(send_task, receive_task);

    info!(
        connection = %id,
        peer = ?peer,
        active = state.registry.len(),
        "Client disconnected"
    );
}

/// Counts a session as live for as long as it is held
struct SessionGuard {
    sessions: Arc<AtomicUsize>,
}

impl SessionGuard {
    fn enter(sessions: &Arc<AtomicUsize>) -> Self {
        sessions.fetch_add(1, Ordering::Relaxed);
        Self {
            sessions: sessions.clone(),
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.sessions.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Drain the outbound queue onto the socket until the peer goes away or the
/// connection is asked to close
async fn write_frames(
    handle: Arc<ConnectionHandle>,
    mut outbound: mpsc::Receiver<Frame>,
    mut sender: SplitSink<WebSocket, Message>,
) {
    loop {
        tokio::select! {
            biased;

            _ = handle.close_requested() => {
                // Frames queued before the close (e.g. a shutdown notice) still go out
                let flush = async {
                    while let Ok(frame) = outbound.try_recv() {
                        if sender.send(Message::Text(frame.to_string())).await.is_err() {
                            return;
                        }
                    }
                    let _ = sender.send(Message::Close(None)).await;
                };
                if timeout(CLOSE_FLUSH_TIMEOUT, flush).await.is_err() {
                    debug!(connection = %handle.id(), "Timed out flushing closing connection");
                }
                break;
            }
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                // A peer that stops reading can stall this send indefinitely;
                // an eviction must still end the session.
                tokio::select! {
                    biased;

                    _ = handle.close_requested() => {
                        debug!(connection = %handle.id(), "Abandoning blocked write on closed connection");
                        break;
                    }
                    result = sender.send(Message::Text(frame.to_string())) => {
                        if let Err(e) = result {
                            debug!(connection = %handle.id(), "Relay WebSocket write failed: {}", e);
                            break;
                        }
                    }
                }
            }
        }
    }
}
