// =============================================================================
// WebSocket Handler - Push-based chart updates
// =============================================================================
//
// Clients connect to `/api/v1/ws` and receive:
//   1. An immediate `SERIES_SNAPSHOT` on connect.
//   2. Every `ChartUpdate` the session emits afterwards (`SERIES_RESET`,
//      `CANDLE_UPDATE`, `FIT_VIEW`), in order.
//
// A client that falls behind the broadcast buffer gets a fresh snapshot
// instead of the updates it missed.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{Sink, SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use crate::app_state::AppState;
use crate::chart::ChartUpdate;

// =============================================================================
// WebSocket upgrade handler
// =============================================================================

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    info!("WebSocket connection accepted - upgrading");
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

// =============================================================================
// Connection handler
// =============================================================================

/// Manages a single WebSocket connection lifecycle.
///
/// Runs two branches via `tokio::select!`:
///   1. **Push** - forward each broadcast `ChartUpdate`.
///   2. **Recv** - process incoming client messages (Ping/Pong, Close,
///      heartbeat text messages).
async fn handle_ws_connection(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut sequence: u64 = 0;

    let mut updates = match open_feed(&mut sender, &state, &mut sequence).await {
        Ok(updates) => updates,
        Err(e) => {
            warn!(error = %e, "Failed to send initial WebSocket snapshot");
            return;
        }
    };

    loop {
        tokio::select! {
            update = updates.recv() => {
                match forward_update(&mut sender, update, || state.build_snapshot(), &mut sequence).await {
                    Ok(true) => {}
                    Ok(false) => {
                        info!("chart feed closed - disconnecting");
                        break;
                    }
                    Err(e) => {
                        debug!(error = %e, "WebSocket send failed - disconnecting");
                        break;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        debug!(msg = %text, "WebSocket text message received (heartbeat)");
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sender.send(Message::Pong(data)).await {
                            debug!(error = %e, "Failed to send Pong - disconnecting");
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) | Some(Ok(Message::Binary(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        info!("WebSocket Close frame received - disconnecting");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket receive error - disconnecting");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    info!(sent = sequence, "WebSocket connection closed");
}

// =============================================================================
// Helpers
// =============================================================================

/// Subscribe to the chart feed, then send the full snapshot.
///
/// Subscribing first means nothing emitted in between is lost.
async fn open_feed<S>(
    sender: &mut S,
    state: &AppState,
    sequence: &mut u64,
) -> Result<broadcast::Receiver<ChartUpdate>, axum::Error>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    let updates = state.feed.subscribe();
    send_json(sender, &state.build_snapshot(), sequence).await?;
    Ok(updates)
}

/// Push one feed receive result to the client.
///
/// A lagged receiver is answered with `resync()` instead of the missed
/// updates.  Returns `Ok(false)` once the feed is closed.
async fn forward_update<S, F, P>(
    sender: &mut S,
    update: Result<ChartUpdate, RecvError>,
    resync: F,
    sequence: &mut u64,
) -> Result<bool, axum::Error>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
    F: FnOnce() -> P,
    P: Serialize,
{
    match update {
        Ok(update) => send_json(sender, &update, sequence).await?,
        Err(RecvError::Lagged(skipped)) => {
            debug!(skipped, "WebSocket client lagged - resyncing with snapshot");
            send_json(sender, &resync(), sequence).await?
        }
        Err(RecvError::Closed) => return Ok(false),
    }
    Ok(true)
}

/// Serialize `payload` and send it as a text frame.
async fn send_json<S, T>(sender: &mut S, payload: &T, sequence: &mut u64) -> Result<(), axum::Error>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
    T: Serialize,
{
    match serde_json::to_string(payload) {
        Ok(json) => {
            sender.send(Message::Text(json)).await?;
            *sequence += 1;
            Ok(())
        }
        Err(e) => {
            // Serialisation errors are not network errors; don't disconnect.
            warn!(error = %e, "Failed to serialize WebSocket payload");
            Ok(())
        }
    }
}
