//! End-to-end menu pagination against a fake dbserver peer (scenario S5):
//! with a batch size of 2 and 5 available items, rendering from offset 0
//! must take exactly 3 `RENDER_MENU_REQ` round trips (batches of 2, 2, 1),
//! each wrapped in a `MENU_HEADER` / `MENU_ITEM`... / `MENU_FOOTER` triad.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use beatlink::dbserver::Client;
use bytes::{BufMut, BytesMut};
use link_proto::field::Field;
use link_proto::message::{self, Message, MessageType};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const TARGET_PLAYER: u8 = 3;
const POSING_AS: u8 = 5;

async fn read_one_message(socket: &mut tokio::net::TcpStream, buf: &mut BytesMut) -> Message {
    let mut chunk = [0u8; 4096];
    loop {
        if let Ok((msg, consumed)) = Message::decode(buf) {
            let _ = buf.split_to(consumed);
            return msg;
        }
        let n = socket.read(&mut chunk).await.unwrap();
        buf.extend_from_slice(&chunk[..n]);
    }
}

async fn read_one_field(socket: &mut tokio::net::TcpStream, buf: &mut BytesMut) -> Field {
    let mut chunk = [0u8; 4096];
    loop {
        if let Ok((field, consumed)) = Field::decode(buf) {
            let _ = buf.split_to(consumed);
            return field;
        }
        let n = socket.read(&mut chunk).await.unwrap();
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Spawns a fake dbserver peer that performs the greeting/setup handshake,
/// then answers exactly one `RENDER_MENU_REQ` per call with `items_in_batch`
/// `MENU_ITEM`s sandwiched between a header and footer. Returns the address
/// and a shared counter of how many `RENDER_MENU_REQ`s it has answered.
async fn spawn_fake_menu_server(
    total_items: u32,
) -> (SocketAddr, Arc<AtomicUsize>, tokio::task::JoinHandle<()>) {
    let round_trips = Arc::new(AtomicUsize::new(0));
    let round_trips_for_server = Arc::clone(&round_trips);

    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = BytesMut::new();

        // Greeting.
        let _ = read_one_field(&mut socket, &mut buf).await;
        let mut reply = BytesMut::new();
        Field::number(4, 1).encode(&mut reply);
        socket.write_all(&reply).await.unwrap();

        // Setup.
        let _ = read_one_message(&mut socket, &mut buf).await;
        let setup_reply = Message::new(
            message::SETUP_TRANSACTION,
            MessageType::MenuAvailable,
            vec![Field::number(4, 0), Field::number(4, TARGET_PLAYER as u32)],
        );
        let mut out = BytesMut::new();
        out.put(setup_reply.encode().unwrap());
        socket.write_all(&out).await.unwrap();

        let mut delivered = 0u32;
        while delivered < total_items {
            let request = read_one_message(&mut socket, &mut buf).await;
            assert_eq!(request.message_type, MessageType::RenderMenuReq);
            let batch = request.arguments[2].as_number().unwrap();
            round_trips_for_server.fetch_add(1, Ordering::SeqCst);

            let header = Message::new(request.transaction, MessageType::MenuHeader, vec![]);
            let mut out = BytesMut::new();
            out.put(header.encode().unwrap());
            for i in 0..batch {
                let item = Message::new(
                    request.transaction,
                    MessageType::MenuItem,
                    vec![Field::number(4, delivered + i)],
                );
                out.put(item.encode().unwrap());
            }
            let footer = Message::new(request.transaction, MessageType::MenuFooter, vec![]);
            out.put(footer.encode().unwrap());
            socket.write_all(&out).await.unwrap();

            delivered += batch;
        }

        // Keep the socket open until the test drops its side.
        let mut sink = [0u8; 64];
        loop {
            match socket.read(&mut sink).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    (addr, round_trips, handle)
}

#[tokio::test]
async fn renders_five_items_in_three_batches_of_two() {
    let (addr, round_trips, _server) = spawn_fake_menu_server(5).await;
    let ip = match addr.ip() {
        std::net::IpAddr::V4(v4) => v4,
        _ => unreachable!("loopback bind is always v4 here"),
    };

    let client = Client::connect(ip, addr.port(), TARGET_PLAYER, POSING_AS, Duration::from_secs(2))
        .await
        .unwrap();
    client.set_menu_batch_size(2);

    let guard = client
        .try_locking_for_menu_operations(Duration::from_secs(2))
        .await
        .unwrap();
    let items = client
        .render_menu_items(&guard, 0, 0, 0, 0, 5)
        .await
        .unwrap();

    assert_eq!(items.len(), 5);
    assert_eq!(round_trips.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn no_menu_results_available_renders_nothing() {
    let (addr, round_trips, _server) = spawn_fake_menu_server(0).await;
    let ip = match addr.ip() {
        std::net::IpAddr::V4(v4) => v4,
        _ => unreachable!("loopback bind is always v4 here"),
    };

    let client = Client::connect(ip, addr.port(), TARGET_PLAYER, POSING_AS, Duration::from_secs(2))
        .await
        .unwrap();
    let guard = client
        .try_locking_for_menu_operations(Duration::from_secs(2))
        .await
        .unwrap();

    let available = Message::new(
        message::SETUP_TRANSACTION,
        MessageType::MenuAvailable,
        vec![
            Field::number(4, MessageType::SearchMenu.to_u16() as u32),
            Field::number(4, message::NO_MENU_RESULTS_AVAILABLE),
        ],
    );
    let items = client
        .render_menu_items_from_available(&guard, 0, 0, 0, &available)
        .await
        .unwrap();

    assert!(items.is_empty());
    assert_eq!(round_trips.load(Ordering::SeqCst), 0);
}
