//! WebSocket signaling relay
//!
//! Each admitted socket runs two independent tasks: a read loop that
//! classifies inbound frames and forwards them to the opposite peer's
//! queue, and a writer that drains this socket's own queue. The pair
//! never blocks on each other: backpressure on a slow peer is absorbed
//! by its bounded queue (drop-oldest), not by stalling the fast peer's
//! reads.
//!
//! Frame handling:
//! - text frames are shallow-parsed for their `type` tag only and
//!   forwarded as the exact original text; malformed JSON is dropped
//!   without disconnecting;
//! - binary frames pass through opaque and unreordered;
//! - a `disconnection` frame is forwarded first, then the sending
//!   socket is detached;
//! - ping/pong stays at the transport layer.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{close_code, CloseFrame, Message as WsMsg, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use chuan_protocol::frame::{self, Envelope, REASON_PEER_LEFT, TAG_DISCONNECTION};
use chuan_protocol::Role;

use crate::api::{error_body, AppState};
use crate::room::Room;
use crate::socket::{Outbound, PeerSocket};

/// Per-frame read deadline, refreshed on every received frame.
pub const READ_DEADLINE: Duration = Duration::from_secs(60);

/// Per-frame write deadline.
pub const WRITE_DEADLINE: Duration = Duration::from_secs(10);

/// Transport keepalive ping period.
pub const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Maximum accepted WebSocket message size (16 MiB)
const MAX_WS_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Query parameters on the upgrade request
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    code: Option<String>,
    role: Option<String>,
    /// Client-scoped label; logged, never interpreted
    channel: Option<String>,
}

/// `GET /api/ws/webrtc?code=…&role=…&channel=…`
///
/// Admission is checked before the upgrade completes so rejections
/// reach the client as plain 4xx JSON, mirroring the room-info error
/// shape. The slot is claimed again after the upgrade (the pre-check
/// races with other joiners); losing that race closes the fresh
/// socket with a policy close frame.
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Some(code) = query.code.as_deref() else {
        return error_body(StatusCode::BAD_REQUEST, "missing room code");
    };
    let Some(role) = query.role.as_deref().and_then(|r| r.parse::<Role>().ok()) else {
        return error_body(StatusCode::BAD_REQUEST, "role must be 'sender' or 'receiver'");
    };
    let Some(room) = state.registry.lookup(code) else {
        return error_body(StatusCode::NOT_FOUND, "room not found");
    };

    let room_info = room.info();
    if room_info.expired {
        return error_body(StatusCode::GONE, "room has expired");
    }
    let slot_occupied = match role {
        Role::Sender => room_info.sender_online,
        Role::Receiver => room_info.receiver_online,
    };
    if slot_occupied {
        return error_body(
            StatusCode::CONFLICT,
            &format!("role '{role}' is already taken"),
        );
    }

    if let Some(channel) = query.channel.as_deref() {
        debug!(code = %room.code(), %role, channel, "upgrade with channel label");
    }

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let cancel = state.cancel.clone();
    ws.max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, room, role, cancel))
}

/// Drive one admitted socket until it detaches.
async fn handle_socket(socket: WebSocket, room: Arc<Room>, role: Role, cancel: CancellationToken) {
    let peer = Arc::new(PeerSocket::new(role));

    match room.attach(Arc::clone(&peer)) {
        Ok(opposite) => {
            if let Some(opposite) = opposite {
                announce_joined(&peer, &opposite);
            }
        }
        Err(err) => {
            // Slot was claimed between the admission check and here
            warn!(code = %room.code(), %role, %err, "attach rejected after upgrade");
            let mut socket = socket;
            let _ = socket
                .send(WsMsg::Close(Some(CloseFrame {
                    code: close_code::POLICY,
                    reason: Utf8Bytes::from(err.to_string()),
                })))
                .await;
            return;
        }
    }
    info!(code = %room.code(), %role, "peer attached");

    let (sink, stream) = socket.split();
    let writer = tokio::spawn(write_loop(sink, Arc::clone(&peer)));

    read_loop(stream, &room, &peer, &cancel).await;

    detach_and_notify(&room, &peer);
    let _ = writer.await;
    info!(code = %room.code(), %role, "peer detached");
}

/// Enqueue the `peer-joined` pair: each side learns the OTHER role.
pub(crate) fn announce_joined(newcomer: &PeerSocket, opposite: &PeerSocket) {
    opposite
        .queue()
        .push(Outbound::Text(Envelope::peer_joined(newcomer.role()).to_text()));
    newcomer
        .queue()
        .push(Outbound::Text(Envelope::peer_joined(opposite.role()).to_text()));
}

/// Forward a text frame verbatim to the opposite peer, if present.
pub(crate) fn relay_text(room: &Room, from: &PeerSocket, text: &str) -> bool {
    match room.opposite(from.role()) {
        Some(peer) => peer.queue().push(Outbound::Text(text.to_string())),
        None => false,
    }
}

/// Forward a binary frame verbatim to the opposite peer, if present.
pub(crate) fn relay_binary(room: &Room, from: &PeerSocket, data: Bytes) -> bool {
    match room.opposite(from.role()) {
        Some(peer) => peer.queue().push(Outbound::Binary(data)),
        None => false,
    }
}

/// Run detach effects exactly once: clear the slot, close the queue,
/// tell the surviving peer. Safe to call from the read loop and the
/// sweeper concurrently.
pub(crate) fn detach_and_notify(room: &Arc<Room>, socket: &Arc<PeerSocket>) {
    if !socket.begin_detach() {
        return;
    }
    let opposite = room.detach(socket);
    socket.queue().close();
    if let Some(peer) = opposite {
        peer.queue().push(Outbound::Text(
            Envelope::disconnection(REASON_PEER_LEFT).to_text(),
        ));
    }
}

/// Read until error, close, deadline, disconnection frame, or shutdown.
async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    room: &Arc<Room>,
    me: &Arc<PeerSocket>,
    cancel: &CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => {
                me.queue().push(Outbound::Close(close_code::AWAY));
                break;
            }
            next = timeout(READ_DEADLINE, stream.next()) => next,
        };
        let msg = match next {
            Err(_) => {
                debug!(code = %room.code(), role = %me.role(), "read deadline exceeded");
                break;
            }
            Ok(None) | Ok(Some(Err(_))) => break,
            Ok(Some(Ok(msg))) => msg,
        };
        room.touch();

        match msg {
            WsMsg::Text(text) => {
                let Some(tag) = frame::peek_tag(text.as_str()) else {
                    debug!(code = %room.code(), "dropping malformed text frame");
                    continue;
                };
                relay_text(room, me, text.as_str());
                if tag == TAG_DISCONNECTION {
                    // Forwarded first, then the sender leaves
                    break;
                }
            }
            WsMsg::Binary(data) => {
                relay_binary(room, me, data);
            }
            WsMsg::Ping(_) | WsMsg::Pong(_) => {}
            WsMsg::Close(_) => break,
        }
    }
}

/// Drain this socket's queue onto the wire, pinging on an interval.
async fn write_loop(mut sink: SplitSink<WebSocket, WsMsg>, socket: Arc<PeerSocket>) {
    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.tick().await; // the first tick completes immediately

    loop {
        let frame = tokio::select! {
            frame = socket.queue().pop() => frame,
            _ = ping.tick() => {
                if timeout(WRITE_DEADLINE, sink.send(WsMsg::Ping(Bytes::new())))
                    .await
                    .map(|r| r.is_err())
                    .unwrap_or(true)
                {
                    break;
                }
                continue;
            }
        };
        let Some(frame) = frame else {
            // queue closed and drained
            break;
        };
        let msg = match frame {
            Outbound::Text(text) => WsMsg::Text(Utf8Bytes::from(text)),
            Outbound::Binary(data) => WsMsg::Binary(data),
            Outbound::Close(code) => {
                let _ = timeout(
                    WRITE_DEADLINE,
                    sink.send(WsMsg::Close(Some(CloseFrame {
                        code,
                        reason: Utf8Bytes::from_static("server going away"),
                    }))),
                )
                .await;
                break;
            }
        };
        match timeout(WRITE_DEADLINE, sink.send(msg)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                debug!(role = %socket.role(), %err, "write failed");
                break;
            }
            Err(_) => {
                debug!(role = %socket.role(), "write deadline exceeded");
                break;
            }
        }
    }
    let _ = sink.close().await;
}
