//! WebSocket session: one connected peer from upgrade through disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use partywire_core::Frame;
use tracing::{debug, info, instrument, warn};

use crate::connection::Connection;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};
use crate::server::AppState;

/// Run a session for an upgraded socket.
///
/// 1. Joins the room and obtains its context
/// 2. Forwards queued outbound payloads, with periodic Ping frames
/// 3. Routes inbound frames one at a time, in arrival order
/// 4. Leaves the room on close, Pong timeout or server shutdown
#[instrument(skip_all, fields(conn_id = %conn_id, room_id = %room_id))]
pub(crate) async fn run_ws_session<C: Send + Sync + 'static>(
    ws: WebSocket,
    conn_id: String,
    room_id: String,
    state: AppState<C>,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (connection, mut send_rx) = Connection::channel(conn_id, state.config.outbound_buffer);
    let (room, ctx) = state.lobby.join(&room_id, Arc::clone(&connection));

    let started = Instant::now();
    info!(members = room.len(), "client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let session_token = state.shutdown.token().child_token();
    let ping_every = Duration::from_secs(state.config.ping_interval_secs);
    let pong_timeout = Duration::from_secs(state.config.pong_timeout_secs);

    let outbound_conn = Arc::clone(&connection);
    let outbound_token = session_token.clone();
    let outbound = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(ping_every);
        // Skip the immediate first tick
        let _ = ping_interval.tick().await;

        loop {
            tokio::select! {
                () = outbound_token.cancelled() => break,
                msg = send_rx.recv() => {
                    let Some(text) = msg else { break };
                    if ws_tx.send(Message::Text(text.as_ref().into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if !outbound_conn.check_alive() && outbound_conn.last_pong_elapsed() > pong_timeout {
                        warn!(timeout = ?pong_timeout, "client unresponsive, disconnecting");
                        break;
                    }
                    if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = ws_tx.close().await;
        outbound_token.cancel();
    });

    loop {
        let next = tokio::select! {
            () = session_token.cancelled() => break,
            next = ws_rx.next() => next,
        };
        let Some(Ok(msg)) = next else { break };
        connection.mark_alive();

        let frame = match msg {
            Message::Text(text) => Frame::Text(text.as_str().to_owned()),
            Message::Binary(data) => Frame::Binary(data),
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => {
                debug!("client sent close frame");
                break;
            }
        };

        let _ = state.events.on_message(&frame, &connection, &room, &ctx).await;
    }

    session_token.cancel();
    let _ = outbound.await;
    state.lobby.leave(&room_id, connection.id());

    info!(dropped = connection.drop_count(), "client disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
}

// Sessions need a real socket; they are exercised end to end in
// tests/integration.rs.
