//! DbServer session pool: a connection-state-tracking wrapper keyed by
//! player, with idle eviction for sessions nobody has used in a while.

use std::future::Future;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::dbserver::Client;
use crate::error::LinkError;

/// How long an idle session may sit in the pool before the eviction task
/// closes it. Picked to comfortably outlast the default request/menu
/// timeouts without pinning down a socket forever.
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(15);

struct SessionEntry {
    client: Arc<Client>,
    last_used: Mutex<Instant>,
}

/// Pools one [`Client`] session per player, opening sessions lazily and
/// closing them after a period of disuse.
pub struct ConnectionManager {
    sessions: DashMap<u8, SessionEntry>,
    posing_as_player: u8,
    request_timeout: Duration,
    idle_timeout: Duration,
    idle_check_interval: Duration,
    running: AtomicBool,
    eviction_task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(posing_as_player: u8, request_timeout: Duration) -> Arc<Self> {
        Arc::new(ConnectionManager {
            sessions: DashMap::new(),
            posing_as_player,
            request_timeout,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            idle_check_interval: DEFAULT_IDLE_CHECK_INTERVAL,
            running: AtomicBool::new(false),
            eviction_task: Mutex::new(None),
        })
    }

    pub fn from_config(config: &link_config::LinkConfig, posing_as_player: u8) -> Arc<Self> {
        Self::new(posing_as_player, config.request_timeout())
    }

    /// Start the idle-eviction background task.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let manager = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(manager.idle_check_interval).await;
                if !manager.running.load(Ordering::Acquire) {
                    break;
                }
                manager.evict_idle().await;
            }
        });
        *self.eviction_task.lock().unwrap() = Some(handle);
        info!("connection manager started");
    }

    /// Stop the eviction task and close every pooled session.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.eviction_task.lock().unwrap().take() {
            handle.abort();
        }
        let players: Vec<u8> = self.sessions.iter().map(|e| *e.key()).collect();
        for player in players {
            if let Some((_, entry)) = self.sessions.remove(&player) {
                entry.client.close().await;
            }
        }
        info!("connection manager stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn pooled_session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Acquire (or open) a session to `player` at `address:port` and run
    /// `op` against it. Errors from `op` propagate with `description`
    /// prepended.
    pub async fn invoke_with_client_session<F, Fut, T>(
        &self,
        player: u8,
        address: Ipv4Addr,
        port: u16,
        description: &str,
        op: F,
    ) -> Result<T, LinkError>
    where
        F: FnOnce(Arc<Client>) -> Fut,
        Fut: Future<Output = Result<T, crate::dbserver::ClientError>>,
    {
        if !self.is_running() {
            return Err(LinkError::NotRunning("connection manager"));
        }
        let client = self.session_for(player, address, port).await?;
        op(client).await.map_err(|source| LinkError::SessionFailed {
            player,
            description: description.to_string(),
            source,
        })
    }

    async fn session_for(
        &self,
        player: u8,
        address: Ipv4Addr,
        port: u16,
    ) -> Result<Arc<Client>, LinkError> {
        if let Some(entry) = self.sessions.get(&player) {
            if entry.client.is_alive() {
                *entry.last_used.lock().unwrap() = Instant::now();
                return Ok(entry.client.clone());
            }
        }

        if let Some((_, stale)) = self.sessions.remove(&player) {
            debug!(player, "closing stale dbserver session before reconnect");
            stale.client.close().await;
        }

        let client = Arc::new(
            Client::connect(address, port, player, self.posing_as_player, self.request_timeout)
                .await?,
        );
        self.sessions.insert(
            player,
            SessionEntry {
                client: client.clone(),
                last_used: Mutex::new(Instant::now()),
            },
        );
        info!(player, "opened dbserver session");
        Ok(client)
    }

    async fn evict_idle(&self) {
        let idle: Vec<u8> = self
            .sessions
            .iter()
            .filter(|e| e.last_used.lock().unwrap().elapsed() > self.idle_timeout)
            .map(|e| *e.key())
            .collect();
        for player in idle {
            if let Some((_, entry)) = self.sessions.remove(&player) {
                debug!(player, "evicting idle dbserver session");
                entry.client.close().await;
            }
        }
    }
}
