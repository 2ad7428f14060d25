//! Per-connection handler: hello, then queue requests, queue pushes and
//! channel traffic until the socket closes.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use spark_common::{ClientFrame, EventId, ParticipantId, ServerFrame};
use spark_matching::{MatchingEngine, QueueChange};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::hub::{ChannelHub, ConnId};
use crate::owners::Owners;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsStream = SplitStream<WebSocketStream<TcpStream>>;

/// Shared by every connection.
#[derive(Clone)]
pub struct ServerState {
    pub engine: Arc<MatchingEngine>,
    pub hub: ChannelHub,
    pub owners: Owners,
    pub hello_timeout: Duration,
}

struct Connection {
    id: ConnId,
    participant: ParticipantId,
    state: ServerState,
    /// Outbox for channel broadcasts from other connections.
    tx: mpsc::Sender<ServerFrame>,
    queues: HashSet<EventId>,
}

/// Handle a single WebSocket connection.
pub async fn handle_connection(
    ws: WebSocketStream<TcpStream>,
    addr: SocketAddr,
    state: ServerState,
) {
    let (mut sink, mut stream) = ws.split();

    // 1. The first frame must identify the participant.
    let Some((participant, display_name)) =
        read_hello(&mut stream, addr, state.hello_timeout).await
    else {
        let _ = send_frame(
            &mut sink,
            &ServerFrame::Error {
                message: "expected hello".into(),
            },
        )
        .await;
        return;
    };

    // Subscribe before welcoming so no change after the welcome is missed.
    let mut changes = state.engine.subscribe();
    let (tx, mut rx) = mpsc::channel::<ServerFrame>(256);
    let mut conn = Connection {
        id: state.hub.next_conn_id(),
        participant,
        state,
        tx,
        queues: HashSet::new(),
    };

    tracing::info!(
        peer = %addr,
        participant = %conn.participant,
        name = %display_name,
        "Client connected"
    );
    if let Some(old) = conn.state.owners.claim(&conn.participant, conn.id).await {
        tracing::info!(
            participant = %conn.participant,
            superseded = old,
            "Participant reconnected; older connection no longer owns its queue entries"
        );
    }

    let welcome = ServerFrame::Welcome {
        participant_id: conn.participant.clone(),
    };
    if send_frame(&mut sink, &welcome).await.is_err() {
        return;
    }

    // 2. Request / push loop.
    loop {
        tokio::select! {
            Some(frame) = rx.recv() => {
                if send_frame(&mut sink, &frame).await.is_err() {
                    break;
                }
            }

            change = changes.recv() => {
                match change {
                    Ok(change) => {
                        if let Some(frame) = conn.queue_frame(change) {
                            if send_frame(&mut sink, &frame).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(
                            participant = %conn.participant,
                            skipped = n,
                            "Queue changes lagged"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        let reply = match serde_json::from_str::<ClientFrame>(&text) {
                            Ok(frame) => conn.handle_frame(frame).await,
                            Err(e) => Some(ServerFrame::Error {
                                message: format!("invalid frame: {e}"),
                            }),
                        };
                        if let Some(reply) = reply {
                            if send_frame(&mut sink, &reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(peer = %addr, error = %e, "WS error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    // 3. Cleanup: an unannounced departure still leaves every queue, so
    // partners are requeued and notified. A superseded connection leaves the
    // queue to its successor. Channels are dropped last.
    tracing::info!(peer = %addr, participant = %conn.participant, "Client disconnected");
    if conn.state.owners.release(&conn.participant, conn.id).await {
        for (event_id, outcome) in conn.state.engine.leave_everywhere(&conn.participant).await {
            tracing::info!(
                participant = %conn.participant,
                event = %event_id,
                requeued = ?outcome.requeued,
                "Left queue on disconnect"
            );
        }
    } else {
        tracing::debug!(
            participant = %conn.participant,
            conn = conn.id,
            "Superseded connection closed; queue entries kept"
        );
    }
    conn.state.hub.leave_all(conn.id).await;
}

impl Connection {
    /// Returns the frame to send back, if any.
    async fn handle_frame(&mut self, frame: ClientFrame) -> Option<ServerFrame> {
        match frame {
            ClientFrame::Hello { .. } => Some(ServerFrame::Error {
                message: "hello already received".into(),
            }),
            ClientFrame::Request { id, op } => {
                tracing::debug!(
                    participant = %self.participant,
                    op = op.name(),
                    event = %op.event_id(),
                    "Queue request"
                );
                let reply = self.state.engine.execute(&self.participant, &op).await;
                Some(ServerFrame::ok(id, reply))
            }
            ClientFrame::SubscribeQueue { event_id } => {
                self.queues.insert(event_id);
                None
            }
            ClientFrame::UnsubscribeQueue { event_id } => {
                self.queues.remove(&event_id);
                None
            }
            ClientFrame::JoinChannel { channel, self_send } => {
                self.state
                    .hub
                    .join(&channel, self.id, self.tx.clone(), self_send)
                    .await;
                None
            }
            ClientFrame::LeaveChannel { channel } => {
                self.state.hub.leave(&channel, self.id).await;
                None
            }
            ClientFrame::Broadcast { channel, payload } => {
                let delivered = self.state.hub.broadcast(&channel, self.id, payload).await;
                tracing::trace!(channel = %channel, delivered, "Broadcast");
                None
            }
            ClientFrame::Heartbeat => None,
        }
    }

    /// A push for this participant's subscribed queue entry.
    fn queue_frame(&self, change: QueueChange) -> Option<ServerFrame> {
        if change.participant_id != self.participant || !self.queues.contains(&change.event_id) {
            return None;
        }
        Some(ServerFrame::QueueChanged {
            event_id: change.event_id,
            is_matched: change.is_matched,
            current_room_id: change.current_room_id,
        })
    }
}

/// Read and parse the first message as a hello.
async fn read_hello(
    stream: &mut WsStream,
    addr: SocketAddr,
    timeout: Duration,
) -> Option<(ParticipantId, String)> {
    let frame = tokio::time::timeout(timeout, stream.next()).await;

    match frame {
        Ok(Some(Ok(Message::Text(text)))) => match serde_json::from_str::<ClientFrame>(&text) {
            Ok(ClientFrame::Hello {
                participant_id,
                display_name,
            }) => Some((participant_id, display_name)),
            Ok(other) => {
                tracing::warn!(peer = %addr, frame = ?other, "First frame was not hello");
                None
            }
            Err(e) => {
                tracing::warn!(peer = %addr, error = %e, "Invalid hello message");
                None
            }
        },
        Ok(Some(Ok(_))) => {
            tracing::warn!(peer = %addr, "Expected text hello, got binary");
            None
        }
        Ok(Some(Err(e))) => {
            tracing::warn!(peer = %addr, error = %e, "WS error during hello");
            None
        }
        Ok(None) => {
            tracing::debug!(peer = %addr, "Connection closed before hello");
            None
        }
        Err(_) => {
            tracing::warn!(peer = %addr, timeout = ?timeout, "Hello timeout");
            None
        }
    }
}

/// Send a frame as a JSON text message.
async fn send_frame(
    sink: &mut WsSink,
    frame: &ServerFrame,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let json = serde_json::to_string(frame)
        .map_err(|e| tokio_tungstenite::tungstenite::Error::Io(std::io::Error::other(e)))?;
    sink.send(Message::Text(json.into())).await
}
