//! UDP beat/tempo listener.
//!
//! Structurally identical to [`crate::device_finder::DeviceFinder`]'s
//! listener task: bind a socket, parse each datagram, fan out on success,
//! drop silently on failure.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use link_config::LinkConfig;
use link_proto::Beat;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{info, trace, warn};

use crate::error::LinkError;
use crate::listener::ListenerList;

/// Receives parsed [`Beat`] announcements.
pub trait BeatListener: Send + Sync {
    fn new_beat(&self, beat: &Beat);
}

/// Listens for beat/tempo announcements and fans out parsed [`Beat`]s.
pub struct BeatFinder {
    listeners: ListenerList<dyn BeatListener>,
    port: u16,
    running: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl BeatFinder {
    pub fn new(config: &LinkConfig) -> Arc<Self> {
        Arc::new(BeatFinder {
            listeners: ListenerList::new(),
            port: config.beat_port,
            running: AtomicBool::new(false),
            task: Mutex::new(None),
        })
    }

    pub fn add_beat_listener(&self, listener: Arc<dyn BeatListener>) {
        self.listeners.add(listener);
    }

    pub fn remove_beat_listener(&self, listener: &Arc<dyn BeatListener>) {
        self.listeners.remove(listener);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub async fn start(self: &Arc<Self>) -> Result<(), LinkError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let socket = UdpSocket::bind(("0.0.0.0", self.port)).await.map_err(|e| {
            self.running.store(false, Ordering::Release);
            LinkError::Transport(e)
        })?;
        info!(port = self.port, "beat finder listening");

        let finder = self.clone();
        let task = tokio::spawn(async move {
            finder.run(socket).await;
        });
        *self.task.lock().unwrap() = Some(task);
        Ok(())
    }

    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }
        info!("beat finder stopped");
    }

    async fn run(self: Arc<Self>, socket: UdpSocket) {
        let mut buf = [0u8; link_proto::beat::BEAT_PACKET_LEN];
        while self.running.load(Ordering::Acquire) {
            let (len, _peer) = match socket.recv_from(&mut buf).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "beat socket read failed");
                    continue;
                }
            };
            match Beat::parse(&buf[..len]) {
                Ok(beat) => {
                    trace!(device_number = beat.device_number, bpm = beat.bpm, "beat received");
                    self.listeners.deliver(|l| l.new_beat(&beat));
                }
                Err(_) => {
                    trace!(len, "dropped malformed beat packet");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{BigEndian, ByteOrder};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;

    fn sample_packet() -> Vec<u8> {
        let mut buf = vec![0u8; link_proto::beat::BEAT_PACKET_LEN];
        buf[0..10].copy_from_slice(link_proto::beat::BEAT_MAGIC);
        buf[0x0a] = link_proto::beat::BEAT_PACKET_TYPE;
        buf[0x21] = 2;
        BigEndian::write_u16(&mut buf[0x5a..0x5c], 12000);
        buf[0x5c] = 1;
        buf
    }

    struct RecordingListener {
        count: AtomicUsize,
        last: StdMutex<Option<Beat>>,
    }

    impl BeatListener for RecordingListener {
        fn new_beat(&self, beat: &Beat) {
            self.count.fetch_add(1, Ordering::SeqCst);
            *self.last.lock().unwrap() = Some(beat.clone());
        }
    }

    #[tokio::test]
    async fn start_parses_and_fans_out_beats_over_the_wire() {
        let mut config = LinkConfig::default();
        config.beat_port = 0;
        let finder = BeatFinder::new(&config);
        let listener = Arc::new(RecordingListener {
            count: AtomicUsize::new(0),
            last: StdMutex::new(None),
        });
        finder.add_beat_listener(listener.clone());

        let socket = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
        let bound_port = socket.local_addr().unwrap().port();
        drop(socket);
        config.beat_port = bound_port;
        let finder = BeatFinder::new(&config);
        finder.add_beat_listener(listener.clone());
        finder.start().await.unwrap();

        let sender = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
        sender
            .send_to(&sample_packet(), ("127.0.0.1", bound_port))
            .await
            .unwrap();

        for _ in 0..50 {
            if listener.count.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert_eq!(listener.count.load(Ordering::SeqCst), 1);
        assert_eq!(listener.last.lock().unwrap().as_ref().unwrap().device_number, 2);

        finder.stop().await;
    }
}
