//! Background WebSocket connection loop with auto-reconnect.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use spark_common::{ClientFrame, ServerFrame};
use spark_config::schema::GatewayConfig;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::handler::handle_server_frame;
use super::types::{lock, GatewayCommand, GatewayEvent, Routes};
use crate::identity::Profile;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

fn build_request(url: &str, access_token: Option<&str>) -> Result<Request, String> {
    let mut request = url.into_client_request().map_err(|e| e.to_string())?;
    if let Some(token) = access_token {
        let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| e.to_string())?;
        request.headers_mut().insert("Authorization", value);
    }
    Ok(request)
}

async fn send_frame<S>(ws_write: &Mutex<S>, frame: &ClientFrame) -> bool
where
    S: futures_util::Sink<WsMessage> + Unpin,
{
    match serde_json::to_string(frame) {
        Ok(json) => ws_write
            .lock()
            .await
            .send(WsMessage::Text(json.into()))
            .await
            .is_ok(),
        Err(e) => {
            warn!(error = %e, "Failed to encode frame");
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Connection Loop
// ---------------------------------------------------------------------------

/// Background task managing the WebSocket connection with auto-reconnect.
pub(crate) async fn connection_loop(
    config: GatewayConfig,
    profile: Profile,
    connected: Arc<RwLock<bool>>,
    routes: Arc<StdMutex<Routes>>,
    event_tx: mpsc::Sender<GatewayEvent>,
    command_rx: mpsc::Receiver<GatewayCommand>,
) {
    let command_rx = Arc::new(Mutex::new(command_rx));
    let shutdown = CancellationToken::new();
    let mut reconnect_delay = config.reconnect_delay_secs;

    loop {
        let request = match build_request(&config.server_url, profile.access_token.as_deref()) {
            Ok(r) => r,
            Err(e) => {
                error!(url = %config.server_url, error = %e, "Invalid gateway URL");
                let _ = event_tx.send(GatewayEvent::Error(format!("Invalid URL: {e}"))).await;
                return;
            }
        };
        info!(url = %config.server_url, "Connecting to gateway");

        match tokio::time::timeout(CONNECT_TIMEOUT, tokio_tungstenite::connect_async(request))
        .await
        {
            Ok(Ok((ws_stream, _))) => {
                reconnect_delay = config.reconnect_delay_secs;
                let (ws_write, ws_read) = ws_stream.split();
                let ws_write = Arc::new(Mutex::new(ws_write));

                // Hello first, then restore subscriptions from before the drop.
                let hello = ClientFrame::Hello {
                    participant_id: profile.participant_id.clone(),
                    display_name: profile.display_name.clone(),
                };
                let restore = lock(&routes).resubscribe_frames();
                let mut sent = send_frame(&ws_write, &hello).await;
                for frame in &restore {
                    sent = sent && send_frame(&ws_write, frame).await;
                }

                if sent {
                    *connected.write().await = true;
                    let _ = event_tx.send(GatewayEvent::Connected).await;

                    let heartbeat_handle = tokio::spawn(heartbeat_task(
                        Arc::clone(&ws_write),
                        config.heartbeat_interval_secs,
                    ));
                    let cmd_handle = tokio::spawn(command_forwarder(
                        Arc::clone(&command_rx),
                        Arc::clone(&ws_write),
                        shutdown.clone(),
                    ));

                    let mut read_stream = ws_read;
                    while let Some(msg_result) = read_stream.next().await {
                        match msg_result {
                            Ok(WsMessage::Text(text)) => {
                                match serde_json::from_str::<ServerFrame>(&text) {
                                    Ok(frame) => {
                                        handle_server_frame(frame, &routes, &event_tx).await;
                                    }
                                    Err(_) => debug!(text = %text, "Unrecognized frame from gateway"),
                                }
                            }
                            Ok(WsMessage::Close(_)) => {
                                info!("Gateway closed connection");
                                break;
                            }
                            Err(e) => {
                                warn!(error = %e, "WebSocket error");
                                break;
                            }
                            _ => {}
                        }
                    }

                    heartbeat_handle.abort();
                    cmd_handle.abort();
                }

                *connected.write().await = false;
                lock(&routes).fail_pending("connection lost");
                let _ = event_tx.send(GatewayEvent::Disconnected).await;
            }
            Ok(Err(e)) => {
                error!(error = %e, "Failed to connect to gateway");
                let _ = event_tx
                    .send(GatewayEvent::Error(format!("Connection failed: {e}")))
                    .await;
            }
            Err(_elapsed) => {
                error!("Gateway connection timed out after 15s");
                let _ = event_tx
                    .send(GatewayEvent::Error("Connection timed out after 15s".to_string()))
                    .await;
            }
        }

        if shutdown.is_cancelled() {
            info!("Gateway client stopped");
            return;
        }

        // Exponential backoff reconnect.
        info!(delay = reconnect_delay, "Reconnecting in {} seconds", reconnect_delay);
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(reconnect_delay)) => {}
            _ = shutdown.cancelled() => return,
        }
        reconnect_delay = (reconnect_delay * 2).min(config.max_reconnect_delay_secs);
    }
}

// ---------------------------------------------------------------------------
// Heartbeat
// ---------------------------------------------------------------------------

async fn heartbeat_task<S>(ws_write: Arc<Mutex<S>>, interval_secs: u64)
where
    S: futures_util::Sink<WsMessage> + Unpin,
{
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    loop {
        interval.tick().await;
        if !send_frame(&ws_write, &ClientFrame::Heartbeat).await {
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// Command Forwarder
// ---------------------------------------------------------------------------

async fn command_forwarder<S>(
    cmd_rx: Arc<Mutex<mpsc::Receiver<GatewayCommand>>>,
    cmd_write: Arc<Mutex<S>>,
    shutdown: CancellationToken,
) where
    S: futures_util::Sink<WsMessage> + Unpin,
{
    let mut rx = cmd_rx.lock().await;
    loop {
        match rx.recv().await {
            Some(GatewayCommand::Send(frame)) => {
                if !send_frame(&cmd_write, &frame).await {
                    warn!("Frame not sent; connection is closing");
                }
            }
            // Every client handle is gone, or disconnect was asked for.
            Some(GatewayCommand::Disconnect) | None => {
                shutdown.cancel();
                let mut writer = cmd_write.lock().await;
                let _ = writer.send(WsMessage::Close(None)).await;
                return;
            }
        }
    }
}
