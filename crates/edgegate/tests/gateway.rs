//! End-to-end tests: real listeners on OS-assigned ports, real clients.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use edgegate::prelude::*;
use edgegate::{EventStoreError, ShutdownController};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite;

// =========================================================================
// Helpers
// =========================================================================

type ClientWs = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

struct Running {
    mqtt: SocketAddr,
    ws: SocketAddr,
    events: Arc<MemoryEventStore>,
    controller: ShutdownController,
    task: JoinHandle<Result<(), GatewayError>>,
}

/// Writes to a shared memory store after a fixed delay.
struct SlowStore {
    inner: Arc<MemoryEventStore>,
    delay: Duration,
}

impl EventStore for SlowStore {
    async fn record(&self, event: Event) -> Result<(), EventStoreError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.record(event).await
    }
}

async fn start_gateway() -> Running {
    start_gateway_with_delay(Duration::ZERO).await
}

/// Starts a gateway on random ports with two things:
/// `secret-a` → thing-A (publish + subscribe on room-1),
/// `secret-b` → thing-B (subscribe on room-2).
async fn start_gateway_with_delay(event_delay: Duration) -> Running {
    let bus = MemoryBus::new();
    let events = Arc::new(MemoryEventStore::new());
    let store_events = SlowStore {
        inner: Arc::clone(&events),
        delay: event_delay,
    };
    let store = StaticIdentityStore::new()
        .with_thing("secret-a", ClientId::new("thing-A"))
        .with_thing("secret-b", ClientId::new("thing-B"));
    let policy = StaticPolicy::new()
        .allow(Rule::new("thing-A", "room-1", Action::Publish))
        .allow(Rule::new("thing-A", "room-1", Action::Subscribe))
        .allow(Rule::new("thing-B", "room-2", Action::Subscribe));
    let auth = AuthCache::new(MemoryCache::new(), store, AuthCacheConfig::default());

    let gateway = GatewayBuilder::new()
        .mqtt_addr("127.0.0.1:0")
        .ws_addr("127.0.0.1:0")
        .instance("e2e")
        .handle_signals(false)
        .build(auth, policy, bus.clone(), &bus, store_events)
        .await
        .expect("gateway should build");

    let mqtt = gateway.mqtt_addr().expect("mqtt addr");
    let ws = gateway.ws_addr().expect("ws addr");
    let controller = gateway.shutdown_controller();
    let task = tokio::spawn(gateway.run());

    // Give the accept loops a moment to start.
    tokio::time::sleep(Duration::from_millis(10)).await;
    Running {
        mqtt,
        ws,
        events,
        controller,
        task,
    }
}

async fn ws_connect(addr: SocketAddr) -> ClientWs {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .expect("should connect");
    ws
}

async fn ws_send(ws: &mut ClientWs, packet: &Packet) {
    let bytes = serde_json::to_vec(packet).expect("encode");
    ws.send(tungstenite::Message::Binary(bytes.into()))
        .await
        .expect("send");
}

async fn ws_recv(ws: &mut ClientWs) -> Packet {
    let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("timed out waiting for packet")
        .expect("stream ended")
        .expect("recv");
    serde_json::from_slice(&msg.into_data()).expect("decode")
}

async fn tcp_send(stream: &mut TcpStream, packet: &Packet) {
    let bytes = serde_json::to_vec(packet).expect("encode");
    stream.write_u32(bytes.len() as u32).await.expect("len");
    stream.write_all(&bytes).await.expect("body");
}

async fn tcp_recv(stream: &mut TcpStream) -> Packet {
    let len = tokio::time::timeout(Duration::from_secs(2), stream.read_u32())
        .await
        .expect("timed out waiting for packet")
        .expect("len");
    let mut buf = vec![0u8; len as usize];
    stream.read_exact(&mut buf).await.expect("body");
    serde_json::from_slice(&buf).expect("decode")
}

fn connect(secret: &str) -> Packet {
    Packet::Connect {
        secret: secret.into(),
    }
}

fn subscribe(topic: &str) -> Packet {
    Packet::Subscribe {
        topics: vec![topic.into()],
    }
}

// =========================================================================
// Tests
// =========================================================================

#[tokio::test]
async fn test_tcp_publish_reaches_websocket_subscriber() {
    let gw = start_gateway().await;

    let mut sub = ws_connect(gw.ws).await;
    ws_send(&mut sub, &connect("secret-a")).await;
    assert_eq!(ws_recv(&mut sub).await, Packet::ConnAck);
    ws_send(&mut sub, &subscribe("channels/room-1/messages/+")).await;
    assert_eq!(
        ws_recv(&mut sub).await,
        Packet::SubAck {
            topics: vec!["channels/room-1/messages/+".into()]
        }
    );

    let mut publisher = TcpStream::connect(gw.mqtt).await.unwrap();
    tcp_send(&mut publisher, &connect("secret-a")).await;
    assert_eq!(tcp_recv(&mut publisher).await, Packet::ConnAck);
    tcp_send(
        &mut publisher,
        &Packet::Publish {
            topic: "channels/room-1/messages/temp".into(),
            payload: br#"{"v":21.5}"#.to_vec(),
        },
    )
    .await;

    assert_eq!(
        ws_recv(&mut sub).await,
        Packet::Deliver {
            topic: "channels/room-1/messages/temp".into(),
            payload: br#"{"v":21.5}"#.to_vec(),
        }
    );

    gw.controller.shutdown();
    gw.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_subscriber_on_other_channel_receives_nothing() {
    let gw = start_gateway().await;

    let mut other = ws_connect(gw.ws).await;
    ws_send(&mut other, &connect("secret-b")).await;
    assert_eq!(ws_recv(&mut other).await, Packet::ConnAck);
    ws_send(&mut other, &subscribe("channels/room-2/messages/#")).await;
    assert!(matches!(ws_recv(&mut other).await, Packet::SubAck { .. }));

    let mut publisher = ws_connect(gw.ws).await;
    ws_send(&mut publisher, &connect("secret-a")).await;
    assert_eq!(ws_recv(&mut publisher).await, Packet::ConnAck);
    ws_send(
        &mut publisher,
        &Packet::Publish {
            topic: "channels/room-1/messages".into(),
            payload: b"private".to_vec(),
        },
    )
    .await;
    // Round-trip a ping so the publish has been handled.
    ws_send(&mut publisher, &Packet::Ping).await;
    assert_eq!(ws_recv(&mut publisher).await, Packet::Pong);

    let nothing = tokio::time::timeout(Duration::from_millis(200), other.next()).await;
    assert!(nothing.is_err(), "thing-B should not see room-1 traffic");

    gw.controller.shutdown();
    gw.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_unauthorized_subscribe_gets_forbidden_and_session_stays_up() {
    let gw = start_gateway().await;

    let mut ws = ws_connect(gw.ws).await;
    ws_send(&mut ws, &connect("secret-b")).await;
    assert_eq!(ws_recv(&mut ws).await, Packet::ConnAck);
    ws_send(&mut ws, &subscribe("channels/room-1/messages")).await;
    assert!(matches!(ws_recv(&mut ws).await, Packet::Error { code: 403, .. }));

    ws_send(&mut ws, &Packet::Ping).await;
    assert_eq!(ws_recv(&mut ws).await, Packet::Pong);

    gw.controller.shutdown();
    gw.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_bad_secret_is_rejected_without_events() {
    let gw = start_gateway().await;

    let mut stream = TcpStream::connect(gw.mqtt).await.unwrap();
    tcp_send(&mut stream, &connect("nope")).await;
    assert!(matches!(tcp_recv(&mut stream).await, Packet::Error { code: 401, .. }));

    gw.controller.shutdown();
    gw.task.await.unwrap().unwrap();
    assert!(gw.events.events().is_empty());
}

#[tokio::test]
async fn test_shutdown_disconnects_open_sessions() {
    let gw = start_gateway().await;

    let mut ws = ws_connect(gw.ws).await;
    ws_send(&mut ws, &connect("secret-a")).await;
    assert_eq!(ws_recv(&mut ws).await, Packet::ConnAck);

    gw.controller.shutdown();
    gw.task.await.unwrap().unwrap();

    let ops: Vec<_> = gw.events.events().iter().map(|e| e.operation).collect();
    assert_eq!(ops, [Operation::Connect, Operation::Disconnect]);
    assert!(gw.events.events().iter().all(|e| e.instance == "e2e"));
}

#[tokio::test]
async fn test_shutdown_waits_for_slow_disconnect_writes() {
    let gw = start_gateway_with_delay(Duration::from_millis(50)).await;

    let mut ws = ws_connect(gw.ws).await;
    ws_send(&mut ws, &connect("secret-a")).await;
    assert_eq!(ws_recv(&mut ws).await, Packet::ConnAck);
    let mut tcp = TcpStream::connect(gw.mqtt).await.unwrap();
    tcp_send(&mut tcp, &connect("secret-b")).await;
    assert_eq!(tcp_recv(&mut tcp).await, Packet::ConnAck);

    gw.controller.shutdown();
    gw.task.await.unwrap().unwrap();

    let disconnects = gw
        .events
        .events()
        .iter()
        .filter(|e| e.operation == Operation::Disconnect)
        .count();
    assert_eq!(disconnects, 2);
}

#[tokio::test]
async fn test_build_on_taken_port_is_startup_error() {
    let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = taken.local_addr().unwrap().to_string();
    let bus = MemoryBus::new();

    let result = GatewayBuilder::new()
        .mqtt_addr(&addr)
        .ws_addr("127.0.0.1:0")
        .build(
            AuthCache::new(
                MemoryCache::new(),
                StaticIdentityStore::new(),
                AuthCacheConfig::default(),
            ),
            StaticPolicy::new(),
            bus.clone(),
            &bus,
            MemoryEventStore::new(),
        )
        .await;

    assert!(matches!(result, Err(GatewayError::Startup(_))));
}
