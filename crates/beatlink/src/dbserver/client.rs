//! Per-player DbServer session: a TCP socket, a monotonically increasing
//! transaction counter, and a re-entrant menu lock, all serialized behind
//! one request mutex.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use bytes::BytesMut;
use link_proto::field::Field;
use link_proto::message::{self, Message, MessageType};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use super::error::ClientError;
use super::health::HealthTracker;
use super::menu_lock::{LockToken, MenuLock, MenuLockGuard};

const DEFAULT_MENU_BATCH_SIZE: u32 = 64;
const READ_CHUNK: usize = 4096;

struct Connection {
    stream: TcpStream,
    buf: BytesMut,
}

impl Connection {
    async fn fill(&mut self, timeout: Duration) -> Result<(), ClientError> {
        let mut chunk = [0u8; READ_CHUNK];
        let n = tokio::time::timeout(timeout, self.stream.read(&mut chunk))
            .await
            .map_err(|_| ClientError::Timeout {
                operation: "dbserver read",
                deadline_ms: timeout.as_millis() as u64,
            })??;
        if n == 0 {
            return Err(ClientError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "dbserver connection closed by peer",
            )));
        }
        self.buf.extend_from_slice(&chunk[..n]);
        Ok(())
    }

    async fn read_field(&mut self, timeout: Duration) -> Result<Field, ClientError> {
        loop {
            match Field::decode(&self.buf) {
                Ok((field, consumed)) => {
                    let _ = self.buf.split_to(consumed);
                    return Ok(field);
                }
                Err(link_proto::FieldError::BufferTooShort { .. }) => {
                    self.fill(timeout).await?;
                }
                Err(e) => return Err(ClientError::Frame(e.into())),
            }
        }
    }

    async fn read_message(&mut self, timeout: Duration) -> Result<Message, ClientError> {
        loop {
            match Message::decode(&self.buf) {
                Ok((msg, consumed)) => {
                    let _ = self.buf.split_to(consumed);
                    return Ok(msg);
                }
                Err(link_proto::FrameError::Field(link_proto::FieldError::BufferTooShort {
                    ..
                })) => {
                    self.fill(timeout).await?;
                }
                Err(e) => return Err(ClientError::Frame(e)),
            }
        }
    }

    async fn write_message(&mut self, msg: &Message) -> Result<(), ClientError> {
        let bytes = msg.encode()?;
        self.stream.write_all(&bytes).await?;
        Ok(())
    }

    async fn write_greeting(&mut self) -> Result<(), ClientError> {
        let mut out = BytesMut::new();
        Field::number(4, 1).encode(&mut out);
        self.stream.write_all(&out).await?;
        Ok(())
    }
}

/// A live session against one player's remote database.
pub struct Client {
    target_player: u8,
    posing_as_player: u8,
    conn: Mutex<Connection>,
    transaction_counter: AtomicU32,
    menu_lock: MenuLock,
    request_timeout: Duration,
    menu_batch_size: AtomicU32,
    health: HealthTracker,
}

impl Client {
    /// Connect to `address:port`, perform the greeting and setup handshake,
    /// and return a ready-to-use session.
    pub async fn connect(
        address: Ipv4Addr,
        port: u16,
        target_player: u8,
        posing_as_player: u8,
        request_timeout: Duration,
    ) -> Result<Self, ClientError> {
        let stream = tokio::time::timeout(
            request_timeout,
            TcpStream::connect((address, port)),
        )
        .await
        .map_err(|_| ClientError::Timeout {
            operation: "dbserver connect",
            deadline_ms: request_timeout.as_millis() as u64,
        })??;

        let mut conn = Connection {
            stream,
            buf: BytesMut::new(),
        };

        conn.write_greeting().await?;
        let greeting = conn.read_field(request_timeout).await?;
        match greeting {
            Field::Number { size: 4, value: 1 } => {}
            _ => {
                return Err(ClientError::HandshakeFailed {
                    reason: "did not receive the expected greeting reply".to_string(),
                })
            }
        }

        let setup = Message::new(
            message::SETUP_TRANSACTION,
            MessageType::Setup,
            vec![Field::number(4, posing_as_player as u32)],
        );
        conn.write_message(&setup).await?;
        let response = conn.read_message(request_timeout).await?;
        if response.message_type != MessageType::MenuAvailable {
            return Err(ClientError::HandshakeFailed {
                reason: format!(
                    "expected MENU_AVAILABLE in response to setup, got {:?}",
                    response.message_type
                ),
            });
        }
        if response.arguments.len() != 2 {
            return Err(ClientError::HandshakeFailed {
                reason: format!(
                    "expected two arguments in setup reply, got {}",
                    response.arguments.len()
                ),
            });
        }
        let reported_player = response.arguments[1].as_number();
        if reported_player != Some(target_player as u32) {
            return Err(ClientError::WrongPlayer {
                expected: target_player,
                actual: reported_player.unwrap_or(0) as u8,
            });
        }

        debug!(target_player, posing_as_player, "dbserver session established");
        let client = Client {
            target_player,
            posing_as_player,
            conn: Mutex::new(conn),
            transaction_counter: AtomicU32::new(0),
            menu_lock: MenuLock::new(),
            request_timeout,
            menu_batch_size: AtomicU32::new(DEFAULT_MENU_BATCH_SIZE),
            health: HealthTracker::new(),
        };
        client.health.record_success();
        Ok(client)
    }

    pub fn target_player(&self) -> u8 {
        self.target_player
    }

    pub fn is_alive(&self) -> bool {
        self.health.is_alive()
    }

    pub fn set_menu_batch_size(&self, size: u32) {
        self.menu_batch_size.store(size.max(1), Ordering::Relaxed);
    }

    /// Best-effort teardown. Errors are swallowed; the socket is shut down
    /// either way.
    pub async fn close(&self) {
        let mut conn = self.conn.lock().await;
        let teardown = Message::new(message::TEARDOWN_TRANSACTION, MessageType::Teardown, vec![]);
        if let Err(e) = conn.write_message(&teardown).await {
            trace!(error = %e, "teardown send failed, closing anyway");
        }
        let _ = conn.stream.shutdown().await;
        self.health.mark_dead();
    }

    fn next_transaction(&self) -> u32 {
        self.transaction_counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Pack the RMST value for this session's posing-as player.
    pub fn build_rmst(&self, menu_id: u8, slot: u8, track_type: u8) -> u32 {
        message::pack_rmst(self.posing_as_player, menu_id, slot, track_type)
    }

    /// Serialize a single request/response round trip over the per-client
    /// request mutex.
    pub async fn simple_request(
        &self,
        request_type: MessageType,
        expected: Option<MessageType>,
        arguments: Vec<Field>,
    ) -> Result<Message, ClientError> {
        let mut conn = self.conn.lock().await;
        let transaction = self.next_transaction();
        let request = Message::new(transaction, request_type, arguments);
        conn.write_message(&request).await?;
        let response = conn.read_message(self.request_timeout).await?;
        if response.transaction != transaction {
            self.health.record_failure(1);
            return Err(ClientError::ProtocolMismatch(format!(
                "expected transaction {transaction}, got {}",
                response.transaction
            )));
        }
        if let Some(expected) = expected {
            if response.message_type != expected {
                self.health.record_failure(1);
                return Err(ClientError::ProtocolMismatch(format!(
                    "expected {expected:?}, got {:?}",
                    response.message_type
                )));
            }
        }
        self.health.record_success();
        Ok(response)
    }

    /// Acquire the session's re-entrant menu lock.
    pub async fn try_locking_for_menu_operations(
        &self,
        timeout: Duration,
    ) -> Result<MenuLockGuard<'_>, ClientError> {
        self.menu_lock.try_lock_for(current_token(), timeout).await
    }

    /// Issue a menu request; the caller must already hold the menu lock.
    pub async fn menu_request(
        &self,
        _guard: &MenuLockGuard<'_>,
        request_type: MessageType,
        menu_id: u8,
        slot: u8,
        track_type: u8,
        arguments: Vec<Field>,
    ) -> Result<Message, ClientError> {
        let mut combined = Vec::with_capacity(arguments.len() + 1);
        combined.push(Field::number(4, self.build_rmst(menu_id, slot, track_type)));
        combined.extend(arguments);

        let response = self
            .simple_request(request_type, Some(MessageType::MenuAvailable), combined)
            .await?;

        let reported_type = response.arguments.first().and_then(Field::as_number);
        if reported_type != Some(request_type.to_u16() as u32) {
            return Err(ClientError::ProtocolMismatch(
                "menu request did not echo its own request type".to_string(),
            ));
        }
        Ok(response)
    }

    /// Render every item described by a `MENU_AVAILABLE` response already
    /// in hand (its count lives at argument index 1).
    pub async fn render_menu_items_from_available(
        &self,
        guard: &MenuLockGuard<'_>,
        menu_id: u8,
        slot: u8,
        track_type: u8,
        available: &Message,
    ) -> Result<Vec<Message>, ClientError> {
        let count = available
            .arguments
            .get(1)
            .and_then(Field::as_number)
            .ok_or_else(|| ClientError::ProtocolMismatch("missing menu results count".to_string()))?;
        if count == message::NO_MENU_RESULTS_AVAILABLE || count == 0 {
            return Ok(vec![]);
        }
        self.render_menu_items(guard, menu_id, slot, track_type, 0, count)
            .await
    }

    /// Render `count` items starting at `offset`, batching round trips by
    /// the configured menu batch size.
    pub async fn render_menu_items(
        &self,
        _guard: &MenuLockGuard<'_>,
        menu_id: u8,
        slot: u8,
        track_type: u8,
        offset: u32,
        count: u32,
    ) -> Result<Vec<Message>, ClientError> {
        let mut results = Vec::with_capacity(count as usize);
        let mut gathered = 0u32;
        let mut current_offset = offset;
        let batch_size = self.menu_batch_size.load(Ordering::Relaxed);

        while gathered < count {
            let batch = (count - gathered).min(batch_size);
            let mut conn = self.conn.lock().await;
            let transaction = self.next_transaction();
            let request = Message::new(
                transaction,
                MessageType::RenderMenuReq,
                vec![
                    Field::number(4, self.build_rmst(menu_id, slot, track_type)),
                    Field::number(4, current_offset),
                    Field::number(4, batch),
                    Field::number(4, 0),
                    Field::number(4, count),
                    Field::number(4, 0),
                ],
            );
            conn.write_message(&request).await?;

            let header = conn.read_message(self.request_timeout).await?;
            if header.transaction != transaction {
                return Err(ClientError::ProtocolMismatch(format!(
                    "expected transaction {transaction}, got {}",
                    header.transaction
                )));
            }
            if header.message_type != MessageType::MenuHeader {
                return Err(ClientError::ProtocolMismatch(format!(
                    "expected MENU_HEADER, got {:?}",
                    header.message_type
                )));
            }

            let mut next = conn.read_message(self.request_timeout).await?;
            while next.message_type == MessageType::MenuItem {
                results.push(next);
                next = conn.read_message(self.request_timeout).await?;
            }
            if next.message_type != MessageType::MenuFooter {
                return Err(ClientError::ProtocolMismatch(format!(
                    "expected MENU_FOOTER, got {:?}",
                    next.message_type
                )));
            }
            drop(conn);

            current_offset += batch;
            gathered += batch;
        }

        Ok(results)
    }

    /// Issue a `SEARCH_MENU` request and render up to `desired_count`
    /// results (all of them, if `None`). Returns the rendered items and the
    /// total result count the server reported.
    pub async fn search(
        &self,
        guard: &MenuLockGuard<'_>,
        menu_id: u8,
        slot: u8,
        query: &str,
        sort: u32,
        desired_count: Option<u32>,
    ) -> Result<(Vec<Message>, u32), ClientError> {
        let query = query.to_uppercase();
        let response = self
            .menu_request(
                guard,
                MessageType::SearchMenu,
                menu_id,
                slot,
                0,
                vec![
                    Field::number(4, sort),
                    Field::number(4, query.len() as u32),
                    Field::StringField(query),
                    Field::number(4, 0),
                ],
            )
            .await?;

        let actual_count = response.arguments.get(1).and_then(Field::as_number).unwrap_or(0);
        if actual_count == 0 || actual_count == message::NO_MENU_RESULTS_AVAILABLE {
            return Ok((vec![], 0));
        }

        let items = match desired_count {
            None => {
                self.render_menu_items_from_available(guard, menu_id, slot, 0, &response)
                    .await?
            }
            Some(desired) => {
                let desired = desired.min(actual_count);
                self.render_menu_items(guard, menu_id, slot, 0, 0, desired).await?
            }
        };
        Ok((items, actual_count))
    }

    /// Fetch more results from an already-issued search, re-running it to
    /// get a fresh count rather than trusting a previously cached one.
    pub async fn search_more(
        &self,
        guard: &MenuLockGuard<'_>,
        menu_id: u8,
        slot: u8,
        query: &str,
        sort: u32,
        offset: u32,
        count: u32,
    ) -> Result<Vec<Message>, ClientError> {
        let query = query.to_uppercase();
        let response = self
            .menu_request(
                guard,
                MessageType::SearchMenu,
                menu_id,
                slot,
                0,
                vec![
                    Field::number(4, sort),
                    Field::number(4, query.len() as u32),
                    Field::StringField(query),
                    Field::number(4, 0),
                ],
            )
            .await?;
        let actual_count = response.arguments.get(1).and_then(Field::as_number).unwrap_or(0);

        if offset + count > actual_count {
            return Err(ClientError::OutOfRange(format!(
                "requested {offset}+{count} exceeds {actual_count} available results"
            )));
        }
        self.render_menu_items(guard, menu_id, slot, 0, offset, count).await
    }
}

/// Derive a token identifying the calling tokio task, for the menu lock's
/// reentrancy check. Falls back to 0 outside a task context (tests calling
/// client methods directly from a `#[tokio::test]` body still get a task
/// id, so this only matters for pathological callers).
fn current_token() -> LockToken {
    tokio::task::try_id()
        .map(|id| {
            use std::hash::{Hash, Hasher};
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            id.hash(&mut hasher);
            hasher.finish()
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};
    use tokio::net::TcpListener;

    async fn spawn_fake_server(
        target_player: u8,
    ) -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = BytesMut::new();
            let mut chunk = [0u8; 4096];

            // Greeting: client sends NumberField(1, size=4).
            loop {
                if Field::decode(&buf).is_ok() {
                    break;
                }
                let n = socket.read(&mut chunk).await.unwrap();
                buf.extend_from_slice(&chunk[..n]);
            }
            let (_, consumed) = Field::decode(&buf).unwrap();
            let _ = buf.split_to(consumed);

            let mut reply = BytesMut::new();
            Field::number(4, 1).encode(&mut reply);
            socket.write_all(&reply).await.unwrap();

            // Setup request.
            loop {
                if Message::decode(&buf).is_ok() {
                    break;
                }
                let n = socket.read(&mut chunk).await.unwrap();
                buf.extend_from_slice(&chunk[..n]);
            }
            let (_, consumed) = Message::decode(&buf).unwrap();
            let _ = buf.split_to(consumed);

            let setup_reply = Message::new(
                message::SETUP_TRANSACTION,
                MessageType::MenuAvailable,
                vec![Field::number(4, 0), Field::number(4, target_player as u32)],
            );
            let mut out = BytesMut::new();
            out.put(setup_reply.encode().unwrap());
            socket.write_all(&out).await.unwrap();

            // Keep the connection open until the test finishes with it.
            let mut sink = [0u8; 64];
            loop {
                match socket.read(&mut sink).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn connect_performs_greeting_and_setup_handshake() {
        let (addr, _server) = spawn_fake_server(3).await;
        let ip = match addr.ip() {
            std::net::IpAddr::V4(v4) => v4,
            _ => unreachable!("loopback bind is always v4 here"),
        };
        let client = Client::connect(ip, addr.port(), 3, 5, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(client.target_player(), 3);
        assert!(client.is_alive());
    }

    #[tokio::test]
    async fn connect_rejects_wrong_player() {
        let (addr, _server) = spawn_fake_server(9).await;
        let ip = match addr.ip() {
            std::net::IpAddr::V4(v4) => v4,
            _ => unreachable!("loopback bind is always v4 here"),
        };
        let err = Client::connect(ip, addr.port(), 3, 5, Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::WrongPlayer { expected: 3, actual: 9 }));
    }
}
