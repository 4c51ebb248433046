//! UDP device presence listener: a liveness map refreshed by incoming
//! announcement traffic and reaped by a periodic sweep for peers that have
//! gone quiet.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use dashmap::DashMap;
use link_config::LinkConfig;
use link_proto::constants::DEVICE_ANNOUNCEMENT_PORT;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::error::LinkError;
use crate::listener::ListenerList;
use crate::types::DeviceAnnouncement;

/// Fixed preamble shared with beat packets; this runtime's announcement and
/// beat frames are both members of the same DJ Link packet family.
const MAGIC: &[u8; 10] = link_proto::beat::BEAT_MAGIC;
const PACKET_TYPE_OFFSET: usize = 0x0a;
const ANNOUNCEMENT_PACKET_TYPE: u8 = 0x06;
const NAME_OFFSET: usize = 0x0b;
const NAME_LEN: usize = 20;
const DEVICE_NUMBER_OFFSET: usize = 0x24;
const MAC_OFFSET: usize = 0x26;
const MAC_LEN: usize = 6;
const IP_OFFSET: usize = 0x2c;
const MIN_PACKET_LEN: usize = IP_OFFSET + 4;

fn parse_announcement(buf: &[u8]) -> Option<(u8, String, Ipv4Addr, [u8; 6])> {
    if buf.len() < MIN_PACKET_LEN {
        return None;
    }
    if &buf[0..10] != MAGIC {
        return None;
    }
    if buf[PACKET_TYPE_OFFSET] != ANNOUNCEMENT_PACKET_TYPE {
        return None;
    }
    let name = String::from_utf8_lossy(&buf[NAME_OFFSET..NAME_OFFSET + NAME_LEN])
        .trim_end_matches('\0')
        .to_string();
    let device_number = buf[DEVICE_NUMBER_OFFSET];
    let mut mac = [0u8; MAC_LEN];
    mac.copy_from_slice(&buf[MAC_OFFSET..MAC_OFFSET + MAC_LEN]);
    let ip = Ipv4Addr::new(
        buf[IP_OFFSET],
        buf[IP_OFFSET + 1],
        buf[IP_OFFSET + 2],
        buf[IP_OFFSET + 3],
    );
    Some((device_number, name, ip, mac))
}

/// Receives `deviceFound`/`deviceLost` notifications.
pub trait DeviceListener: Send + Sync {
    fn device_found(&self, device: &DeviceAnnouncement);
    fn device_lost(&self, device: &DeviceAnnouncement);
}

struct Tasks {
    listener: JoinHandle<()>,
    reaper: JoinHandle<()>,
}

/// Tracks live DJ Link devices on the network via their periodic UDP
/// announcements.
pub struct DeviceFinder {
    devices: DashMap<u8, DeviceAnnouncement>,
    listeners: ListenerList<dyn DeviceListener>,
    expiry_interval: std::time::Duration,
    reaper_interval: std::time::Duration,
    port: u16,
    running: AtomicBool,
    tasks: Mutex<Option<Tasks>>,
}

impl DeviceFinder {
    pub fn new(config: &LinkConfig) -> Arc<Self> {
        Arc::new(DeviceFinder {
            devices: DashMap::new(),
            listeners: ListenerList::new(),
            expiry_interval: config.expiry_interval(),
            reaper_interval: config.reaper_interval(),
            port: config.announcement_port,
            running: AtomicBool::new(false),
            tasks: Mutex::new(None),
        })
    }

    pub fn add_device_listener(&self, listener: Arc<dyn DeviceListener>) {
        self.listeners.add(listener);
    }

    pub fn remove_device_listener(&self, listener: &Arc<dyn DeviceListener>) {
        self.listeners.remove(listener);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn current_devices(&self) -> Vec<DeviceAnnouncement> {
        self.devices.iter().map(|e| e.value().clone()).collect()
    }

    pub fn device(&self, device_number: u8) -> Option<DeviceAnnouncement> {
        self.devices.get(&device_number).map(|e| e.value().clone())
    }

    /// Bind the announcement socket and spawn the listener and reaper tasks.
    pub async fn start(self: &Arc<Self>) -> Result<(), LinkError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let socket = UdpSocket::bind(("0.0.0.0", self.port)).await.map_err(|e| {
            self.running.store(false, Ordering::Release);
            LinkError::Transport(e)
        })?;
        info!(port = self.port, "device finder listening");

        let listener_finder = self.clone();
        let listener_task = tokio::spawn(async move {
            listener_finder.run_listener(socket).await;
        });

        let reaper_finder = self.clone();
        let reaper_task = tokio::spawn(async move {
            reaper_finder.run_reaper().await;
        });

        *self.tasks.lock().unwrap() = Some(Tasks {
            listener: listener_task,
            reaper: reaper_task,
        });
        Ok(())
    }

    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(tasks) = self.tasks.lock().unwrap().take() {
            tasks.listener.abort();
            tasks.reaper.abort();
        }
        self.devices.clear();
        info!("device finder stopped");
    }

    async fn run_listener(self: Arc<Self>, socket: UdpSocket) {
        let mut buf = [0u8; 512];
        while self.running.load(Ordering::Acquire) {
            let (len, _peer) = match socket.recv_from(&mut buf).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "device announcement socket read failed");
                    continue;
                }
            };
            let Some((device_number, name, address, mac_address)) =
                parse_announcement(&buf[..len])
            else {
                trace!(len, "dropped malformed announcement packet");
                continue;
            };
            self.handle_announcement(device_number, name, address, mac_address);
        }
    }

    fn handle_announcement(
        &self,
        device_number: u8,
        name: String,
        address: Ipv4Addr,
        mac_address: [u8; 6],
    ) {
        let now = Instant::now();
        let is_new = !self.devices.contains_key(&device_number);
        let announcement = DeviceAnnouncement {
            device_number,
            name,
            address,
            mac_address,
            last_seen: now,
        };
        self.devices.insert(device_number, announcement.clone());
        if is_new {
            debug!(device_number, name = %announcement.name, "device found");
            self.listeners.deliver(|l| l.device_found(&announcement));
        }
    }

    async fn run_reaper(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.reaper_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        while self.running.load(Ordering::Acquire) {
            ticker.tick().await;
            self.reap_expired();
        }
    }

    fn reap_expired(&self) {
        let expired: Vec<u8> = self
            .devices
            .iter()
            .filter(|e| e.last_seen.elapsed() > self.expiry_interval)
            .map(|e| *e.key())
            .collect();
        for device_number in expired {
            if let Some((_, announcement)) = self.devices.remove(&device_number) {
                debug!(device_number, "device lost");
                self.listeners.deliver(|l| l.device_lost(&announcement));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn sample_packet(device_number: u8, name: &str, ip: [u8; 4]) -> Vec<u8> {
        let mut buf = vec![0u8; MIN_PACKET_LEN];
        buf[0..10].copy_from_slice(MAGIC);
        buf[PACKET_TYPE_OFFSET] = ANNOUNCEMENT_PACKET_TYPE;
        let name_bytes = name.as_bytes();
        buf[NAME_OFFSET..NAME_OFFSET + name_bytes.len()].copy_from_slice(name_bytes);
        buf[DEVICE_NUMBER_OFFSET] = device_number;
        buf[MAC_OFFSET..MAC_OFFSET + MAC_LEN].copy_from_slice(&[1, 2, 3, 4, 5, 6]);
        buf[IP_OFFSET..IP_OFFSET + 4].copy_from_slice(&ip);
        buf
    }

    #[test]
    fn parses_a_well_formed_announcement() {
        let packet = sample_packet(2, "CDJ-2000NXS2", [192, 168, 1, 10]);
        let (device_number, name, ip, _mac) = parse_announcement(&packet).unwrap();
        assert_eq!(device_number, 2);
        assert_eq!(name, "CDJ-2000NXS2");
        assert_eq!(ip, Ipv4Addr::new(192, 168, 1, 10));
    }

    #[test]
    fn rejects_short_packets() {
        assert!(parse_announcement(&[0u8; 4]).is_none());
    }

    #[test]
    fn rejects_bad_magic() {
        let mut packet = sample_packet(2, "x", [1, 1, 1, 1]);
        packet[0] = b'Z';
        assert!(parse_announcement(&packet).is_none());
    }

    struct CountingListener {
        found: AtomicUsize,
        lost: AtomicUsize,
    }

    impl DeviceListener for CountingListener {
        fn device_found(&self, _device: &DeviceAnnouncement) {
            self.found.fetch_add(1, Ordering::SeqCst);
        }
        fn device_lost(&self, _device: &DeviceAnnouncement) {
            self.lost.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn handle_announcement_fans_out_only_on_first_sighting() {
        let config = LinkConfig::default();
        let finder = DeviceFinder::new(&config);
        let listener = Arc::new(CountingListener {
            found: AtomicUsize::new(0),
            lost: AtomicUsize::new(0),
        });
        finder.add_device_listener(listener.clone());

        finder.handle_announcement(2, "CDJ-2000NXS2".to_string(), Ipv4Addr::new(10, 0, 0, 1), [0; 6]);
        finder.handle_announcement(2, "CDJ-2000NXS2".to_string(), Ipv4Addr::new(10, 0, 0, 1), [0; 6]);

        assert_eq!(listener.found.load(Ordering::SeqCst), 1);
        assert_eq!(finder.current_devices().len(), 1);
    }

    #[test]
    fn reap_expired_fans_out_device_lost() {
        let mut config = LinkConfig::default();
        config.expiry_interval_ms = 0;
        let finder = DeviceFinder::new(&config);
        let listener = Arc::new(CountingListener {
            found: AtomicUsize::new(0),
            lost: AtomicUsize::new(0),
        });
        finder.add_device_listener(listener.clone());

        finder.handle_announcement(2, "CDJ-2000NXS2".to_string(), Ipv4Addr::new(10, 0, 0, 1), [0; 6]);
        std::thread::sleep(std::time::Duration::from_millis(5));
        finder.reap_expired();

        assert_eq!(listener.lost.load(Ordering::SeqCst), 1);
        assert!(finder.current_devices().is_empty());
    }
}
