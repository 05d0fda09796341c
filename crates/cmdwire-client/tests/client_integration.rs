//! Integration tests for `cmdwire-client` against a hand-driven server.
//!
//! The "server" here is a bare `TcpListener` that encodes frames with
//! `WireCodec` directly, so every control frame the client reacts to is
//! spelled out in the test.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cmdwire_client::{Client, ClientConfig, ClientCore, ClientEvent};
use cmdwire_core::{
    ClientIdentity, CloseReason, Control, Error, FrameReader, Handler, Message, PayloadType, ProtocolError,
    WireCodec,
};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::time::timeout;

const TIMEOUT: Duration = Duration::from_secs(5);

struct FakeServer {
    codec: WireCodec,
    reader: FrameReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl FakeServer {
    async fn send(&mut self, message: Message) {
        let wire = self.codec.encode(&message).unwrap();
        self.writer.write_all(&wire).await.unwrap();
    }

    async fn send_bytes(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
    }

    async fn next(&mut self) -> Message {
        let body = timeout(TIMEOUT, self.reader.read_frame())
            .await
            .expect("timed out waiting for a frame")
            .unwrap();
        self.codec.decode_body(&body).unwrap()
    }
}

/// Connects a client named `alice` and consumes its hello.
async fn connect() -> (Client, FakeServer) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let client = Client::connect(ClientConfig::new("127.0.0.1", port).with_name("alice"))
        .await
        .unwrap();
    let (socket, _) = listener.accept().await.unwrap();
    let codec = WireCodec::default();
    let (read_half, writer) = socket.into_split();
    let mut server = FakeServer {
        codec,
        reader: FrameReader::new(read_half, codec.frame()),
        writer,
    };
    assert!(matches!(server.next().await, Message::Control(Control::Hello(_))));
    (client, server)
}

fn peer(port: u16, name: &str) -> ClientIdentity {
    let addr: SocketAddr = format!("10.0.0.9:{port}").parse().unwrap();
    ClientIdentity::new(addr, Some(name.to_string()), None)
}

#[tokio::test]
async fn test_peer_notices_fire_connect_and_disconnect_events() {
    // Arrange
    let (mut client, mut server) = connect().await;
    let seen = Arc::new(Mutex::new(Vec::new()));
    for event in [ClientEvent::Connect, ClientEvent::Disconnect] {
        let seen = Arc::clone(&seen);
        client
            .on_event(
                event,
                Handler::with_identity(move |_: &mut ClientCore, who: ClientIdentity| {
                    seen.lock().unwrap().push(format!("{event} {}", who.name.unwrap_or_default()));
                    Ok(())
                }),
            )
            .unwrap();
    }

    // Act
    server.send(Message::Control(Control::PeerJoined(peer(7001, "bob")))).await;
    server.send(Message::Control(Control::PeerLeft(peer(7001, "bob")))).await;
    server.send(Message::command("sync", None)).await;
    timeout(TIMEOUT, client.recv(Some("sync"), &PayloadType::Null))
        .await
        .unwrap()
        .unwrap();

    // Assert
    assert_eq!(
        *seen.lock().unwrap(),
        vec!["client_connect bob".to_string(), "client_disconnect bob".to_string()]
    );
}

#[tokio::test]
async fn test_server_disconnect_fires_hook_and_closes_with_forced_reason() {
    // Arrange
    let (mut client, mut server) = connect().await;
    let kicked = Arc::new(Mutex::new(false));
    let flag = Arc::clone(&kicked);
    client
        .on_event(
            ClientEvent::ForceDisconnect,
            Handler::bare(move |_: &mut ClientCore| {
                *flag.lock().unwrap() = true;
                Ok(())
            }),
        )
        .unwrap();

    // Act
    server.send(Message::Control(Control::Disconnect)).await;
    let result = timeout(TIMEOUT, client.run()).await.unwrap();

    // Assert
    assert!(matches!(result, Err(Error::ConnectionClosed(CloseReason::ForcedByServer))));
    assert!(*kicked.lock().unwrap());
    assert_eq!(client.core().close_reason(), Some(CloseReason::ForcedByServer));
}

#[tokio::test]
async fn test_lookup_round_trips_through_the_server() {
    // Arrange
    let (mut client, mut server) = connect().await;
    let answer = vec![peer(7001, "bob"), peer(7002, "bob")];
    let reply = answer.clone();
    let responder = tokio::spawn(async move {
        let request = server.next().await;
        server.send(Message::Control(Control::ClientInfo(reply))).await;
        request
    });

    // Act
    let found = timeout(TIMEOUT, client.lookup("bob")).await.unwrap().unwrap();

    // Assert
    assert_eq!(found, answer);
    assert_eq!(
        responder.await.unwrap(),
        Message::Control(Control::Lookup("bob".to_string()))
    );
}

#[tokio::test]
async fn test_name_change_is_sent_and_recorded_locally() {
    // Arrange
    let (mut client, mut server) = connect().await;

    // Act
    client.change_name(Some("alicia".to_string())).unwrap();
    let sent = server.next().await;

    // Assert
    assert_eq!(sent, Message::Control(Control::ChangeName(Some("alicia".to_string()))));
    assert_eq!(client.core().name(), Some("alicia"));
}

#[tokio::test]
async fn test_raw_frame_reaches_recv_raw() {
    let (mut client, mut server) = connect().await;

    server.send(Message::Raw(b"\x00\x01 plain".to_vec())).await;
    let bytes = timeout(TIMEOUT, client.recv_raw()).await.unwrap().unwrap();

    assert_eq!(bytes, b"\x00\x01 plain".to_vec());
}

#[tokio::test]
async fn test_spawned_client_forwards_handle_sends() {
    // Arrange
    let (client, mut server) = connect().await;
    let (handle, task) = client.spawn();

    // Act
    handle.send("score", 42i64).unwrap();
    let sent = server.next().await;
    handle.close().unwrap();
    let outcome = timeout(TIMEOUT, task).await.unwrap().unwrap();

    // Assert
    assert_eq!(sent, Message::command("score", Some(b"42".to_vec())));
    assert!(outcome.is_ok());
}

#[tokio::test]
async fn test_corrupt_header_is_reported_before_connection_closed() {
    // Arrange
    let (mut client, mut server) = connect().await;

    // Act
    server.send_bytes(b"not-a-number!!!!garbage").await;
    let first = timeout(TIMEOUT, client.recv(None, &PayloadType::Bytes)).await.unwrap();
    let second = client.update();

    // Assert
    assert!(matches!(first, Err(Error::Protocol(ProtocolError::CorruptHeader { .. }))));
    assert!(matches!(second, Err(Error::ConnectionClosed(CloseReason::ClosedByPeer))));
    assert!(client.core().is_closed());
}
