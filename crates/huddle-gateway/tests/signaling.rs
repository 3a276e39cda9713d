//! End-to-end signaling tests against a live gateway.
//!
//! Each test binds its own server on an ephemeral port and talks to it with
//! plain WebSocket clients, the same way a browser would.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use huddle_common::{ClientMessage, ParticipantId, RoomId, ServerMessage};
use huddle_gateway::{AppState, GatewayConfig};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestGateway {
    addr: SocketAddr,
    _shutdown: oneshot::Sender<()>,
}

async fn start_gateway() -> TestGateway {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        let shutdown = async {
            let _ = shutdown_rx.await;
        };
        huddle_gateway::serve(listener, AppState::new(GatewayConfig::default()), shutdown)
            .await
            .unwrap();
    });

    TestGateway {
        addr,
        _shutdown: shutdown_tx,
    }
}

async fn send(client: &mut Client, message: &ClientMessage) {
    let text = serde_json::to_string(message).unwrap();
    client.send(Message::Text(text)).await.unwrap();
}

async fn recv(client: &mut Client) -> ServerMessage {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for a message")
            .expect("socket closed")
            .expect("socket error");
        match frame {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}

async fn assert_silent(client: &mut Client) {
    let result = tokio::time::timeout(Duration::from_millis(200), client.next()).await;
    assert!(result.is_err(), "expected no message, got {:?}", result);
}

/// Connects and consumes the `welcome`, returning the assigned id.
async fn connect(gateway: &TestGateway) -> (Client, ParticipantId) {
    let (mut client, _) = connect_async(format!("ws://{}/ws", gateway.addr))
        .await
        .unwrap();
    match recv(&mut client).await {
        ServerMessage::Welcome {
            participant_id,
            ice_servers,
        } => {
            assert!(!ice_servers.is_empty());
            (client, participant_id)
        }
        other => panic!("expected welcome, got {:?}", other),
    }
}

async fn join(client: &mut Client, room: &str) -> Vec<ParticipantId> {
    send(
        client,
        &ClientMessage::Join {
            room_id: RoomId::from(room),
        },
    )
    .await;
    match recv(client).await {
        ServerMessage::Roster { participants } => participants,
        other => panic!("expected roster, got {:?}", other),
    }
}

#[tokio::test]
async fn test_two_participants_meet_and_talk() {
    let gateway = start_gateway().await;
    let (mut alice, alice_id) = connect(&gateway).await;
    let (mut bob, bob_id) = connect(&gateway).await;
    assert_ne!(alice_id, bob_id);

    assert!(join(&mut alice, "r1").await.is_empty());
    assert_eq!(join(&mut bob, "r1").await, vec![alice_id.clone()]);
    assert_eq!(
        recv(&mut alice).await,
        ServerMessage::ParticipantJoined {
            participant_id: bob_id.clone()
        }
    );

    let payload = json!({
        "type": "offer",
        "sdp": {"type": "offer", "sdp": "v=0\r\n"},
        "extra": [1, "two", null]
    });
    send(
        &mut bob,
        &ClientMessage::Negotiate {
            to: alice_id.clone(),
            payload: payload.clone(),
        },
    )
    .await;
    assert_eq!(
        recv(&mut alice).await,
        ServerMessage::Negotiate {
            from: bob_id.clone(),
            payload
        }
    );

    send(
        &mut alice,
        &ClientMessage::Chat {
            text: "hi bob".into(),
        },
    )
    .await;
    match recv(&mut bob).await {
        ServerMessage::Chat { from, text, .. } => {
            assert_eq!(from, alice_id);
            assert_eq!(text, "hi bob");
        }
        other => panic!("expected chat, got {:?}", other),
    }
    assert_silent(&mut alice).await;

    bob.close(None).await.unwrap();
    assert_eq!(
        recv(&mut alice).await,
        ServerMessage::ParticipantLeft {
            participant_id: bob_id
        }
    );
}

#[tokio::test]
async fn test_chat_stays_in_room() {
    let gateway = start_gateway().await;
    let (mut a, _) = connect(&gateway).await;
    let (mut b, _) = connect(&gateway).await;
    let (mut c, _) = connect(&gateway).await;

    join(&mut a, "r1").await;
    join(&mut b, "r1").await;
    let _joined = recv(&mut a).await;
    join(&mut c, "r2").await;

    send(
        &mut a,
        &ClientMessage::Chat {
            text: "only r1".into(),
        },
    )
    .await;
    assert!(matches!(recv(&mut b).await, ServerMessage::Chat { .. }));
    assert_silent(&mut c).await;
}

#[tokio::test]
async fn test_chat_is_truncated_and_blank_dropped() {
    let gateway = start_gateway().await;
    let (mut a, _) = connect(&gateway).await;
    let (mut b, _) = connect(&gateway).await;
    join(&mut a, "r1").await;
    join(&mut b, "r1").await;
    let _joined = recv(&mut a).await;

    send(&mut a, &ClientMessage::Chat { text: " \t ".into() }).await;
    assert_silent(&mut b).await;

    send(
        &mut a,
        &ClientMessage::Chat {
            text: "y".repeat(600),
        },
    )
    .await;
    match recv(&mut b).await {
        ServerMessage::Chat { text, .. } => assert_eq!(text.chars().count(), 500),
        other => panic!("expected chat, got {:?}", other),
    }
}

#[tokio::test]
async fn test_second_join_is_rejected_and_connection_survives() {
    let gateway = start_gateway().await;
    let (mut a, _) = connect(&gateway).await;
    let (mut b, b_id) = connect(&gateway).await;
    join(&mut a, "r1").await;

    send(
        &mut a,
        &ClientMessage::Join {
            room_id: RoomId::from("r2"),
        },
    )
    .await;
    assert!(matches!(recv(&mut a).await, ServerMessage::Error { .. }));

    join(&mut b, "r1").await;
    assert_eq!(
        recv(&mut a).await,
        ServerMessage::ParticipantJoined { participant_id: b_id }
    );
}

#[tokio::test]
async fn test_negotiate_before_join_is_an_error() {
    let gateway = start_gateway().await;
    let (mut a, _) = connect(&gateway).await;
    let (_b, b_id) = connect(&gateway).await;

    send(
        &mut a,
        &ClientMessage::Negotiate {
            to: b_id,
            payload: json!({}),
        },
    )
    .await;
    assert!(matches!(recv(&mut a).await, ServerMessage::Error { .. }));
}

#[tokio::test]
async fn test_negotiate_to_other_room_is_dropped() {
    let gateway = start_gateway().await;
    let (mut a, _) = connect(&gateway).await;
    let (mut c, c_id) = connect(&gateway).await;
    join(&mut a, "r1").await;
    join(&mut c, "r2").await;

    send(
        &mut a,
        &ClientMessage::Negotiate {
            to: c_id,
            payload: json!({"type": "ice"}),
        },
    )
    .await;
    assert_silent(&mut c).await;
    assert_silent(&mut a).await;
}

#[tokio::test]
async fn test_invalid_json_closes_connection() {
    let gateway = start_gateway().await;
    let (mut a, _) = connect(&gateway).await;

    a.send(Message::Text("{not json".into())).await.unwrap();
    assert!(matches!(recv(&mut a).await, ServerMessage::Error { .. }));

    let next = tokio::time::timeout(Duration::from_secs(5), a.next())
        .await
        .expect("socket should close");
    assert!(matches!(next, None | Some(Ok(Message::Close(_))) | Some(Err(_))));
}

#[tokio::test]
async fn test_health_reports_rooms() {
    let gateway = start_gateway().await;
    let (mut a, _) = connect(&gateway).await;
    join(&mut a, "r1").await;

    let mut stream = TcpStream::connect(gateway.addr).await.unwrap();
    stream
        .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    assert!(response.starts_with("HTTP/1.1 200"));
    let body = response.split("\r\n\r\n").nth(1).unwrap();
    let health: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(health["activeRooms"], 1);
    assert_eq!(health["activeParticipants"], 1);
}
