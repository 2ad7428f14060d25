//! Incoming server frame handler.

use std::sync::Mutex;

use spark_common::{MatchNotice, ServerFrame, SessionError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::types::{lock, GatewayEvent, Routes};
use crate::protocol::SignalingMessage;

/// Route a single incoming frame to whoever is waiting for it.
pub(crate) async fn handle_server_frame(
    frame: ServerFrame,
    routes: &Mutex<Routes>,
    event_tx: &mpsc::Sender<GatewayEvent>,
) {
    match frame {
        ServerFrame::Welcome { participant_id } => {
            info!(participant = %participant_id, "Gateway session ready");
        }
        ServerFrame::Response {
            id,
            ok,
            body,
            error,
        } => {
            let Some(waiter) = lock(routes).pending.remove(&id) else {
                debug!(id = %id, "Response for unknown or expired request");
                return;
            };
            let result = match (ok, body) {
                (true, Some(body)) => Ok(body),
                (true, None) => Err(SessionError::SignalingFailure("empty response".into())),
                (false, _) => Err(SessionError::SignalingFailure(
                    error.unwrap_or_else(|| "request failed".into()),
                )),
            };
            let _ = waiter.send(result);
        }
        ServerFrame::QueueChanged {
            event_id,
            is_matched,
            current_room_id,
        } => {
            let notice = MatchNotice {
                is_matched,
                current_room_id,
            };
            let delivered = lock(routes).deliver_notice(&event_id, &notice);
            debug!(event_id = %event_id, is_matched, delivered, "Queue change received");
        }
        ServerFrame::Broadcast { channel, payload } => {
            match serde_json::from_value::<SignalingMessage>(payload) {
                Ok(message) => {
                    let delivered = lock(routes).deliver_signal(&channel, &message);
                    debug!(channel = %channel, kind = ?message.kind, delivered, "Broadcast received");
                }
                Err(e) => debug!(channel = %channel, error = %e, "Ignoring malformed broadcast"),
            }
        }
        ServerFrame::Error { message } => {
            warn!(message = %message, "Gateway error");
            let _ = event_tx.send(GatewayEvent::Error(message)).await;
        }
    }
}
