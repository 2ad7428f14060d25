use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use spark_common::{
    ClientFrame, EventId, ParticipantId, QueueOp, QueueReply, QueueStatus, RoomId, ServerFrame,
    SessionError, StatusResponse,
};
use spark_config::schema::GatewayConfig;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;

use super::*;
use crate::identity::Profile;
use crate::protocol::{IceCandidate, Signal, SignalingMessage};
use crate::queue_api::{QueueApi, QueueSubscriber};
use crate::relay::SignalingRelay;

type Socket = WebSocketStream<TcpStream>;

async fn listen() -> (TcpListener, GatewayConfig) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = GatewayConfig {
        server_url: format!("ws://{}", listener.local_addr().unwrap()),
        heartbeat_interval_secs: 60,
        reconnect_delay_secs: 1,
        max_reconnect_delay_secs: 2,
        request_timeout_secs: 5,
    };
    (listener, config)
}

async fn accept(listener: &TcpListener) -> Socket {
    let (stream, _) = tokio::time::timeout(Duration::from_secs(10), listener.accept())
        .await
        .expect("no connection")
        .unwrap();
    tokio_tungstenite::accept_async(stream).await.unwrap()
}

/// Next non-heartbeat frame from the client.
async fn read_frame(ws: &mut Socket) -> ClientFrame {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match ws.next().await.expect("socket closed").unwrap() {
                WsMessage::Text(text) => {
                    let frame: ClientFrame = serde_json::from_str(&text).unwrap();
                    if frame != ClientFrame::Heartbeat {
                        return frame;
                    }
                }
                _ => continue,
            }
        }
    })
    .await
    .expect("no frame")
}

async fn write_frame(ws: &mut Socket, frame: &ServerFrame) {
    let json = serde_json::to_string(frame).unwrap();
    ws.send(WsMessage::Text(json.into())).await.unwrap();
}

fn profile() -> Profile {
    Profile::new("a1", "Ada")
}

#[tokio::test]
async fn hello_comes_first_and_requests_are_correlated() {
    let (listener, config) = listen().await;
    let (client, _events) = GatewayClient::connect(config, profile());
    let mut ws = accept(&listener).await;

    assert_eq!(
        read_frame(&mut ws).await,
        ClientFrame::Hello {
            participant_id: ParticipantId::from("a1"),
            display_name: "Ada".into(),
        }
    );

    let caller = client.clone();
    let status = tokio::spawn(async move { caller.status(&EventId::from("evt1")).await });

    let ClientFrame::Request { id, op } = read_frame(&mut ws).await else {
        panic!("expected a request");
    };
    assert_eq!(
        op,
        QueueOp::Status {
            event_id: EventId::from("evt1")
        }
    );
    let body = QueueReply::Status(StatusResponse {
        status: QueueStatus::Waiting,
        room_id: None,
        partner_id: None,
    });
    write_frame(&mut ws, &ServerFrame::ok(id, body)).await;

    let status = status.await.unwrap().unwrap();
    assert_eq!(status.status, QueueStatus::Waiting);
    assert!(client.is_connected().await);
}

#[tokio::test]
async fn unanswered_request_times_out() {
    let (listener, mut config) = listen().await;
    config.request_timeout_secs = 1;
    let (client, _events) = GatewayClient::connect(config, profile());
    let mut ws = accept(&listener).await;
    read_frame(&mut ws).await;

    let caller = client.clone();
    let leave = tokio::spawn(async move { caller.leave(&EventId::from("evt1")).await });
    assert!(matches!(read_frame(&mut ws).await, ClientFrame::Request { .. }));

    let err = leave.await.unwrap().unwrap_err();
    assert_eq!(err, SessionError::Timeout("leave request".into()));
}

#[tokio::test]
async fn broadcasts_reach_channel_subscribers() {
    let (listener, config) = listen().await;
    let (client, _events) = GatewayClient::connect(config, profile());
    let mut ws = accept(&listener).await;
    read_frame(&mut ws).await;

    let mut signals = SignalingRelay::subscribe(&client, "room:r1").await.unwrap();
    assert_eq!(
        read_frame(&mut ws).await,
        ClientFrame::JoinChannel {
            channel: "room:r1".into(),
            self_send: false,
        }
    );

    let message = SignalingMessage::new(
        &ParticipantId::from("b2"),
        &Signal::IceCandidate(IceCandidate {
            candidate: "candidate:1 1 udp 2122260223 10.0.0.2 54321 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }),
    )
    .unwrap();
    write_frame(
        &mut ws,
        &ServerFrame::Broadcast {
            channel: "room:r1".into(),
            payload: serde_json::to_value(&message).unwrap(),
        },
    )
    .await;

    let received = tokio::time::timeout(Duration::from_secs(5), signals.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, message);

    signals.unsubscribe();
    assert_eq!(
        read_frame(&mut ws).await,
        ClientFrame::LeaveChannel {
            channel: "room:r1".into()
        }
    );
}

#[tokio::test]
async fn queue_changes_reach_queue_subscribers() {
    let (listener, config) = listen().await;
    let (client, _events) = GatewayClient::connect(config, profile());
    let mut ws = accept(&listener).await;
    read_frame(&mut ws).await;

    let mut notices = QueueSubscriber::subscribe(&client, &EventId::from("evt1"), &ParticipantId::from("a1"))
        .await
        .unwrap();
    assert_eq!(
        read_frame(&mut ws).await,
        ClientFrame::SubscribeQueue {
            event_id: EventId::from("evt1")
        }
    );

    write_frame(
        &mut ws,
        &ServerFrame::QueueChanged {
            event_id: EventId::from("evt1"),
            is_matched: true,
            current_room_id: Some(RoomId::from("r1")),
        },
    )
    .await;
    let notice = tokio::time::timeout(Duration::from_secs(5), notices.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(notice.is_matched);
    assert_eq!(notice.current_room_id, Some(RoomId::from("r1")));
}

#[tokio::test]
async fn reconnect_restores_subscriptions_after_hello() {
    let (listener, config) = listen().await;
    let (client, mut events) = GatewayClient::connect(config, profile());
    let mut ws = accept(&listener).await;
    read_frame(&mut ws).await;

    let _signals = SignalingRelay::subscribe(&client, "room:r1").await.unwrap();
    read_frame(&mut ws).await;
    drop(ws);

    let mut ws = accept(&listener).await;
    assert!(matches!(read_frame(&mut ws).await, ClientFrame::Hello { .. }));
    assert_eq!(
        read_frame(&mut ws).await,
        ClientFrame::JoinChannel {
            channel: "room:r1".into(),
            self_send: false,
        }
    );

    let mut seen = Vec::new();
    while seen.len() < 3 {
        seen.push(events.recv().await.unwrap());
    }
    assert_eq!(
        seen,
        vec![
            GatewayEvent::Connected,
            GatewayEvent::Disconnected,
            GatewayEvent::Connected
        ]
    );
}
