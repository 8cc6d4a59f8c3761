//! WebSocket upgrade handler and message loop
//!
//! This module handles the HTTP → WebSocket upgrade and runs the per-connection
//! message loop. Each connection gets:
//!
//! 1. A [`ProtocolHandler`] that owns the session state
//! 2. A write loop that forwards [`Outbound`] items to the socket
//! 3. A read loop that feeds text frames to the handler, in arrival order

use super::connection::{ConnectionHandle, Outbound};
use super::session::ProtocolHandler;
use crate::server::host::NotifyHost;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::stream::{SplitSink, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Close reasons must fit in a control frame
const MAX_CLOSE_REASON_BYTES: usize = 123;

/// How long the write loop gets to flush after the read side ends
const WRITE_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Query parameters accepted on the upgrade request
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    pub access_token: Option<String>,
}

/// WebSocket upgrade handler
///
/// This is the axum handler for the configured WebSocket path. A token given
/// as `?access_token=` is tried when the socket opens.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(host): State<Arc<NotifyHost>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, host, params.access_token))
}

/// Handle a single WebSocket connection
async fn handle_socket(socket: WebSocket, host: Arc<NotifyHost>, access_token: Option<String>) {
    let (connection, outbound_rx) = ConnectionHandle::new(host.config.server.outbound_capacity);
    let connection_id = connection.id().to_string();
    let mut session = host.session(connection);

    let (ws_write, mut ws_read) = socket.split();
    let mut write_handle = tokio::spawn(write_loop(
        connection_id.clone(),
        ws_write,
        outbound_rx,
    ));

    session.on_connect(access_token.as_deref()).await;

    while !session.is_closed() {
        let Some(result) = ws_read.next().await else {
            break;
        };

        match result {
            Ok(Message::Text(text)) => {
                session.on_frame(text.as_str()).await;
            }
            Ok(Message::Close(_)) => {
                tracing::debug!(connection_id = %connection_id, "Client sent close frame");
                break;
            }
            Ok(_) => {
                // axum answers pings itself; binary frames are not part of the protocol
            }
            Err(e) => {
                tracing::debug!(
                    connection_id = %connection_id,
                    error = %e,
                    "WebSocket read error"
                );
                break;
            }
        }
    }

    // Cleanup
    session.on_disconnect().await;
    drop(session);

    // Every handle clone is gone once the subscription and registration are,
    // so the write loop sees the channel close after flushing a pending close.
    if tokio::time::timeout(WRITE_DRAIN_TIMEOUT, &mut write_handle)
        .await
        .is_err()
    {
        tracing::debug!(connection_id = %connection_id, "Write loop did not drain in time");
        write_handle.abort();
    }
}

/// Forward outbound items to the socket until the channel closes or a close
/// frame has been sent
async fn write_loop(
    connection_id: String,
    mut ws_write: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<Outbound>,
) {
    while let Some(item) = outbound_rx.recv().await {
        match item {
            Outbound::Message(msg) => match serde_json::to_string(&msg) {
                Ok(json) => {
                    if ws_write.send(Message::Text(json.into())).await.is_err() {
                        tracing::debug!(
                            connection_id = %connection_id,
                            "WebSocket write failed, closing"
                        );
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(
                        connection_id = %connection_id,
                        error = %e,
                        "Failed to serialize ServerMessage"
                    );
                }
            },
            Outbound::Close { status, reason } => {
                let frame = CloseFrame {
                    code: status.code(),
                    reason: truncate_reason(reason).into(),
                };
                if let Err(e) = ws_write.send(Message::Close(Some(frame))).await {
                    tracing::debug!(
                        connection_id = %connection_id,
                        error = %e,
                        "Failed to send close frame"
                    );
                }
                break;
            }
        }
    }

    let _ = ws_write.close().await;
}

fn truncate_reason(mut reason: String) -> String {
    if reason.len() > MAX_CLOSE_REASON_BYTES {
        let mut end = MAX_CLOSE_REASON_BYTES;
        while !reason.is_char_boundary(end) {
            end -= 1;
        }
        reason.truncate(end);
    }
    reason
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_reason_is_kept() {
        assert_eq!(truncate_reason("bye".to_string()), "bye");
    }

    #[test]
    fn test_long_reason_is_truncated_on_char_boundary() {
        let reason = "é".repeat(100);
        let truncated = truncate_reason(reason);

        assert!(truncated.len() <= MAX_CLOSE_REASON_BYTES);
        assert!(truncated.chars().all(|c| c == 'é'));
        assert_eq!(truncated.len(), 122);
    }

    #[test]
    fn test_connect_params_default() {
        let params = ConnectParams::default();
        assert!(params.access_token.is_none());
    }
}
