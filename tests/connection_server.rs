use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use tcode_bridge_lib::device::{event_channel, BindingHandle, BridgeEvent};
use tcode_bridge_lib::server::{ConnectionServer, ProtocolTranslator};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_server(heartbeat: Duration) -> (SocketAddr, broadcast::Receiver<BridgeEvent>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (events, rx) = event_channel(64);
    let translator = ProtocolTranslator::new("Test Server", BindingHandle::unbound(), events.clone());
    let server = ConnectionServer::from_listener(listener, translator, heartbeat, events);
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    (addr, rx)
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
    client
}

/// Next JSON reply, skipping control frames
async fn next_reply(client: &mut Client) -> Value {
    loop {
        let message = timeout(Duration::from_secs(2), client.next())
            .await
            .expect("reply timed out")
            .expect("stream ended")
            .expect("read failed");
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn test_replies_follow_message_order() {
    let (addr, _events) = start_server(Duration::from_secs(30)).await;
    let mut client = connect(addr).await;

    let frame = json!([
        {"RequestServerInfo": {"Id": 1, "ClientName": "player", "MessageVersion": 2}},
        {"StartScanning": {"Id": 2}},
        {"RequestDeviceList": {"Id": 3}}
    ]);
    client.send(Message::Text(frame.to_string())).await.unwrap();

    assert_eq!(
        next_reply(&mut client).await,
        json!([{"ServerInfo": {"Id": 1, "ServerName": "Test Server", "MessageVersion": 2, "MaxPingTime": 0}}])
    );
    assert_eq!(next_reply(&mut client).await, json!([{"Ok": {"Id": 2}}]));
    let devices = next_reply(&mut client).await;
    assert_eq!(devices[0]["DeviceList"]["Id"], 3);
    assert_eq!(devices[0]["DeviceList"]["Devices"][0]["DeviceName"], "TCode device");
}

#[tokio::test]
async fn test_object_with_several_tags_gets_one_reply_per_tag() {
    let (addr, _events) = start_server(Duration::from_secs(30)).await;
    let mut client = connect(addr).await;

    let frame = r#"[{"StartScanning": {"Id": 4}, "StopDeviceCmd": {"Id": 5, "DeviceIndex": 0}, "Bogus": {"Id": 6}}]"#;
    client.send(Message::Text(frame.to_string())).await.unwrap();

    assert_eq!(next_reply(&mut client).await, json!([{"Ok": {"Id": 4}}]));
    assert_eq!(next_reply(&mut client).await, json!([{"Ok": {"Id": 5}}]));
}

#[tokio::test]
async fn test_malformed_frame_is_dropped_and_connection_survives() {
    let (addr, _events) = start_server(Duration::from_secs(30)).await;
    let mut client = connect(addr).await;

    client.send(Message::Text("{not json".to_string())).await.unwrap();
    client.send(Message::Binary(vec![0xff, 0xfe, 0x00])).await.unwrap();
    client.send(Message::Text(r#"[{"LinearCmd": {"Vectors": []}}]"#.to_string())).await.unwrap();
    client
        .send(Message::Text(json!([{"LinearCmd": {"Id": 9, "Vectors": [{"Position": 0.25, "Duration": 300}]}}]).to_string()))
        .await
        .unwrap();

    assert_eq!(next_reply(&mut client).await, json!([{"Ok": {"Id": 9}}]));
}

#[tokio::test]
async fn test_odd_vectors_still_get_ok() {
    let (addr, _events) = start_server(Duration::from_secs(30)).await;
    let mut client = connect(addr).await;

    let frame = json!([
        {"LinearCmd": {"Id": 8, "Vectors": [{"Position": 0.5, "Duration": 300.5}]}},
        {"LinearCmd": {"Id": 10, "Vectors": [{"Position": "0.5", "Duration": "250"}]}},
        {"LinearCmd": {"Id": 11, "Vectors": [{"Position": null}]}},
        {"LinearCmd": {"Id": 12}}
    ]);
    client.send(Message::Text(frame.to_string())).await.unwrap();

    for id in [8, 10, 11, 12] {
        assert_eq!(next_reply(&mut client).await, json!([{"Ok": {"Id": id}}]));
    }
}

#[tokio::test]
async fn test_silent_client_is_terminated_by_heartbeat() {
    let (addr, mut events) = start_server(Duration::from_millis(50)).await;
    let client = connect(addr).await;

    // Never poll the client, so pings go unanswered
    let disconnected = timeout(Duration::from_secs(2), async {
        loop {
            if let Ok(BridgeEvent::ClientDisconnected { .. }) = events.recv().await {
                break;
            }
        }
    })
    .await;
    assert!(disconnected.is_ok(), "heartbeat should have dropped the client");
    drop(client);
}

#[tokio::test]
async fn test_responsive_client_survives_heartbeats() {
    let (addr, mut events) = start_server(Duration::from_millis(50)).await;
    let mut client = connect(addr).await;

    // Keep reading so the client answers each ping
    let deadline = tokio::time::Instant::now() + Duration::from_millis(400);
    while let Ok(Some(message)) = tokio::time::timeout_at(deadline, client.next()).await {
        assert!(matches!(message, Ok(Message::Ping(_))), "unexpected {:?}", message);
    }

    client.send(Message::Text(r#"[{"StartScanning": {"Id": 12}}]"#.to_string())).await.unwrap();
    assert_eq!(next_reply(&mut client).await, json!([{"Ok": {"Id": 12}}]));

    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, BridgeEvent::ClientDisconnected { .. }));
    }
}
