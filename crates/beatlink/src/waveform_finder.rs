//! Per-deck waveform preview/detail cache: dual hot caches, a bounded
//! intake queue drained by a single worker, and an `UNANALYZED` retry
//! controller gated by one global flag.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use link_config::LinkConfig;
use link_proto::constants;
use link_proto::field::Field;
use link_proto::menu::MenuTarget;
use link_proto::message::{Message, MessageType};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::connection_manager::ConnectionManager;
use crate::dbserver::{Client, ClientError};
use crate::device_finder::{DeviceFinder, DeviceListener};
use crate::metadata_finder::{MetadataFinder, MountListener, TrackMetadataListener};
use crate::types::{
    DataReference, DeckReference, DeviceAnnouncement, SlotReference, TrackMetadata, TrackMetadataUpdate,
    TrackSourceSlot, TrackType, WaveformDetail, WaveformPreview, WaveformStyle,
};

/// Receives `previewChanged`/`detailChanged` notifications for a deck.
pub trait WaveformListener: Send + Sync {
    fn preview_changed(&self, player: u8, preview: Option<&WaveformPreview>);
    fn detail_changed(&self, player: u8, detail: Option<&WaveformDetail>);
}

fn to_payload_style(style: link_config::WaveformStyle) -> WaveformStyle {
    match style {
        link_config::WaveformStyle::Blue => WaveformStyle::Blue,
        link_config::WaveformStyle::Rgb => WaveformStyle::Rgb,
        link_config::WaveformStyle::ThreeBand => WaveformStyle::ThreeBand,
    }
}

/// The registrations made against collaborators at [`WaveformFinder::start`],
/// kept so [`WaveformFinder::stop`] can undo exactly them.
struct Hooks {
    metadata_listener: Arc<dyn TrackMetadataListener>,
    mount_listener: Arc<dyn MountListener>,
    device_listener: Arc<dyn DeviceListener>,
}

/// Caches rendered waveform previews and details, fetching them through
/// [`MetadataFinder`]'s provider chain or, failing that, a DbServer request
/// mediated by [`ConnectionManager`]. Registers itself as a listener on
/// `MetadataFinder` and `DeviceFinder`; neither of those knows this type
/// exists.
pub struct WaveformFinder {
    preview_cache: Mutex<HashMap<DeckReference, WaveformPreview>>,
    detail_cache: Mutex<HashMap<DeckReference, WaveformDetail>>,
    active_preview_requests: Mutex<HashSet<u8>>,
    active_detail_requests: Mutex<HashSet<u8>>,
    listeners: crate::listener::ListenerList<dyn WaveformListener>,
    find_details: AtomicBool,
    preferred_style: Mutex<link_config::WaveformStyle>,
    running: AtomicBool,
    retrying: AtomicBool,
    queue: Mutex<VecDeque<TrackMetadataUpdate>>,
    queue_capacity: usize,
    notify: Notify,
    worker_task: Mutex<Option<JoinHandle<()>>>,
    hooks: Mutex<Option<Hooks>>,
    metadata_finder: Arc<MetadataFinder>,
    connection_manager: Arc<ConnectionManager>,
    device_finder: Arc<DeviceFinder>,
    dbserver_port: u16,
    maximum_analysis_wait: Duration,
    analysis_update_interval: Duration,
}

impl WaveformFinder {
    pub fn new(
        metadata_finder: Arc<MetadataFinder>,
        connection_manager: Arc<ConnectionManager>,
        device_finder: Arc<DeviceFinder>,
        config: &LinkConfig,
    ) -> Arc<Self> {
        Arc::new(WaveformFinder {
            preview_cache: Mutex::new(HashMap::new()),
            detail_cache: Mutex::new(HashMap::new()),
            active_preview_requests: Mutex::new(HashSet::new()),
            active_detail_requests: Mutex::new(HashSet::new()),
            listeners: crate::listener::ListenerList::new(),
            find_details: AtomicBool::new(true),
            preferred_style: Mutex::new(config.waveform_style),
            running: AtomicBool::new(false),
            retrying: AtomicBool::new(false),
            queue: Mutex::new(VecDeque::new()),
            queue_capacity: config.fetch_queue_capacity,
            notify: Notify::new(),
            worker_task: Mutex::new(None),
            hooks: Mutex::new(None),
            metadata_finder,
            connection_manager,
            device_finder,
            dbserver_port: config.dbserver_port,
            maximum_analysis_wait: config.maximum_analysis_wait(),
            analysis_update_interval: config.analysis_update_interval(),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn find_details(&self) -> bool {
        self.find_details.load(Ordering::Acquire)
    }

    pub fn preferred_style(&self) -> link_config::WaveformStyle {
        *self.preferred_style.lock().unwrap()
    }

    pub fn add_waveform_listener(&self, listener: Arc<dyn WaveformListener>) {
        self.listeners.add(listener);
    }

    pub fn remove_waveform_listener(&self, listener: &Arc<dyn WaveformListener>) {
        self.listeners.remove(listener);
    }

    pub fn latest_preview_for(&self, player: u8) -> Option<WaveformPreview> {
        self.preview_cache.lock().unwrap().get(&DeckReference::playing(player)).cloned()
    }

    pub fn latest_detail_for(&self, player: u8) -> Option<WaveformDetail> {
        self.detail_cache.lock().unwrap().get(&DeckReference::playing(player)).cloned()
    }

    pub fn loaded_previews(&self) -> HashMap<DeckReference, WaveformPreview> {
        self.preview_cache.lock().unwrap().clone()
    }

    pub fn loaded_details(&self) -> HashMap<DeckReference, WaveformDetail> {
        self.detail_cache.lock().unwrap().clone()
    }

    /// Register with `MetadataFinder` and `DeviceFinder`, spawn the worker,
    /// and reprime the caches from whatever is already loaded.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }

        let metadata_listener: Arc<dyn TrackMetadataListener> = self.clone();
        let mount_listener: Arc<dyn MountListener> = self.clone();
        let device_listener: Arc<dyn DeviceListener> = self.clone();
        self.metadata_finder.add_track_metadata_listener(metadata_listener.clone());
        self.metadata_finder.add_mount_listener(mount_listener.clone());
        self.device_finder.add_device_listener(device_listener.clone());
        *self.hooks.lock().unwrap() = Some(Hooks { metadata_listener, mount_listener, device_listener });

        let worker = self.clone();
        let task = tokio::spawn(async move { worker.run_worker().await });
        *self.worker_task.lock().unwrap() = Some(task);

        self.prime_cache();
        info!("waveform finder started");
    }

    /// Unregister from collaborators, stop the worker, and drop everything
    /// cached.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(hooks) = self.hooks.lock().unwrap().take() {
            self.metadata_finder.remove_track_metadata_listener(&hooks.metadata_listener);
            self.metadata_finder.remove_mount_listener(&hooks.mount_listener);
            self.device_finder.remove_device_listener(&hooks.device_listener);
        }
        self.notify.notify_waiters();
        let task = self.worker_task.lock().unwrap().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        self.queue.lock().unwrap().clear();
        self.preview_cache.lock().unwrap().clear();
        self.detail_cache.lock().unwrap().clear();
        self.active_preview_requests.lock().unwrap().clear();
        self.active_detail_requests.lock().unwrap().clear();
        info!("waveform finder stopped");
    }

    /// Enable or disable detail fetching. Disabling drops every cached
    /// detail and broadcasts nulls; enabling reprimes from loaded tracks.
    pub fn set_find_details(self: &Arc<Self>, enabled: bool) {
        if self.find_details.swap(enabled, Ordering::AcqRel) == enabled {
            return;
        }
        if enabled {
            self.prime_cache();
        } else {
            let players: Vec<u8> = {
                let mut cache = self.detail_cache.lock().unwrap();
                let players: Vec<u8> =
                    cache.keys().filter(|k| k.is_playing_position()).map(|k| k.player).collect();
                cache.clear();
                players
            };
            for player in players {
                self.listeners.deliver(|l| l.detail_changed(player, None));
            }
        }
    }

    /// Changing the preferred style invalidates every cached waveform and
    /// reprimes from the current `loadedTracks`.
    pub fn set_preferred_style(self: &Arc<Self>, style: link_config::WaveformStyle) {
        let changed = {
            let mut current = self.preferred_style.lock().unwrap();
            if *current == style {
                false
            } else {
                *current = style;
                true
            }
        };
        if changed {
            self.preview_cache.lock().unwrap().clear();
            self.detail_cache.lock().unwrap().clear();
            self.prime_cache();
        }
    }

    fn prime_cache(self: &Arc<Self>) {
        for (deck, metadata) in self.metadata_finder.get_loaded_tracks() {
            if deck.is_playing_position() {
                self.enqueue_update(TrackMetadataUpdate { player: deck.player, metadata: Some(metadata) });
            }
        }
    }

    fn enqueue_update(&self, update: TrackMetadataUpdate) {
        let dropped = {
            let mut queue = self.queue.lock().unwrap();
            if queue.len() >= self.queue_capacity {
                true
            } else {
                queue.push_back(update);
                false
            }
        };
        if dropped {
            warn!("waveform finder intake queue full, dropping update");
        } else {
            self.notify.notify_one();
        }
    }

    async fn run_worker(self: Arc<Self>) {
        loop {
            if !self.running.load(Ordering::Acquire) {
                break;
            }
            let next = { self.queue.lock().unwrap().pop_front() };
            match next {
                Some(update) => self.handle_update(update).await,
                None => self.notify.notified().await,
            }
        }
    }

    async fn handle_update(self: &Arc<Self>, update: TrackMetadataUpdate) {
        let Some(metadata) = update.metadata.clone() else {
            self.clear_deck(update.player);
            return;
        };
        self.handle_preview_branch(update.clone(), metadata.clone()).await;
        if self.find_details() {
            self.handle_detail_branch(update, metadata).await;
        }
    }

    async fn handle_preview_branch(self: &Arc<Self>, update: TrackMetadataUpdate, metadata: TrackMetadata) {
        let deck0 = DeckReference::playing(update.player);
        let stale = {
            let cache = self.preview_cache.lock().unwrap();
            match cache.get(&deck0) {
                None => true,
                Some(p) => p.data_reference != metadata.track_reference || metadata.track_type == TrackType::Unanalyzed,
            }
        };
        if !stale {
            return;
        }

        let promoted = {
            let cache = self.preview_cache.lock().unwrap();
            cache
                .iter()
                .find(|(k, v)| k.hot_cue != 0 && v.data_reference == metadata.track_reference)
                .map(|(_, v)| v.clone())
        };
        if let Some(preview) = promoted {
            self.store_preview(update.player, preview, &metadata.cue_list);
            return;
        }

        let should_request = self.active_preview_requests.lock().unwrap().insert(update.player);
        if should_request {
            let finder = Arc::clone(self);
            tokio::spawn(async move { finder.fetch_preview_task(update, metadata).await });
        }
    }

    async fn handle_detail_branch(self: &Arc<Self>, update: TrackMetadataUpdate, metadata: TrackMetadata) {
        let deck0 = DeckReference::playing(update.player);
        let stale = {
            let cache = self.detail_cache.lock().unwrap();
            match cache.get(&deck0) {
                None => true,
                Some(d) => d.data_reference != metadata.track_reference || metadata.track_type == TrackType::Unanalyzed,
            }
        };
        if !stale {
            return;
        }

        let promoted = {
            let cache = self.detail_cache.lock().unwrap();
            cache
                .iter()
                .find(|(k, v)| k.hot_cue != 0 && v.data_reference == metadata.track_reference)
                .map(|(_, v)| v.clone())
        };
        if let Some(detail) = promoted {
            self.store_detail(update.player, detail, &metadata.cue_list);
            return;
        }

        let should_request = self.active_detail_requests.lock().unwrap().insert(update.player);
        if should_request {
            let finder = Arc::clone(self);
            tokio::spawn(async move { finder.fetch_detail_task(update, metadata).await });
        }
    }

    fn store_preview(&self, player: u8, preview: WaveformPreview, cue_list: &[crate::types::CueEntry]) {
        {
            let mut cache = self.preview_cache.lock().unwrap();
            cache.insert(DeckReference::playing(player), preview.clone());
            for cue in cue_list.iter().filter(|c| c.hot_cue_number != 0) {
                cache.insert(DeckReference::hot_cue(player, cue.hot_cue_number), preview.clone());
            }
        }
        self.listeners.deliver(|l| l.preview_changed(player, Some(&preview)));
    }

    fn store_detail(&self, player: u8, detail: WaveformDetail, cue_list: &[crate::types::CueEntry]) {
        {
            let mut cache = self.detail_cache.lock().unwrap();
            cache.insert(DeckReference::playing(player), detail.clone());
            for cue in cue_list.iter().filter(|c| c.hot_cue_number != 0) {
                cache.insert(DeckReference::hot_cue(player, cue.hot_cue_number), detail.clone());
            }
        }
        self.listeners.deliver(|l| l.detail_changed(player, Some(&detail)));
    }

    /// Drop the `(player, *)` entries in both caches. The broadcast decision
    /// is made from a snapshot taken before erasing, not by re-querying the
    /// cache afterward — after `retain` runs there is nothing left to query.
    fn clear_deck(&self, player: u8) {
        let deck0 = DeckReference::playing(player);
        let had_preview = {
            let mut cache = self.preview_cache.lock().unwrap();
            let had = cache.contains_key(&deck0);
            cache.retain(|k, _| k.player != player);
            had
        };
        let had_detail = {
            let mut cache = self.detail_cache.lock().unwrap();
            let had = cache.contains_key(&deck0);
            cache.retain(|k, _| k.player != player);
            had
        };
        if had_preview {
            self.listeners.deliver(|l| l.preview_changed(player, None));
        }
        if had_detail {
            self.listeners.deliver(|l| l.detail_changed(player, None));
        }
    }

    fn clear_waveforms_for_slot(&self, slot: SlotReference) {
        self.preview_cache.lock().unwrap().retain(|_, v| v.data_reference.slot != slot);
        self.detail_cache.lock().unwrap().retain(|_, v| v.data_reference.slot != slot);
    }

    async fn fetch_preview_task(self: Arc<Self>, update: TrackMetadataUpdate, metadata: TrackMetadata) {
        match self.request_preview_internal(metadata.track_reference, true).await {
            Some(preview) => self.store_preview(update.player, preview, &metadata.cue_list),
            None => self.maybe_retry_unanalyzed(&update, &metadata),
        }
        self.active_preview_requests.lock().unwrap().remove(&update.player);
    }

    async fn fetch_detail_task(self: Arc<Self>, update: TrackMetadataUpdate, metadata: TrackMetadata) {
        match self.request_detail_internal(metadata.track_reference, true).await {
            Some(detail) => self.store_detail(update.player, detail, &metadata.cue_list),
            None => self.maybe_retry_unanalyzed(&update, &metadata),
        }
        self.active_detail_requests.lock().unwrap().remove(&update.player);
    }

    async fn request_preview_internal(&self, track: DataReference, from_update: bool) -> Option<WaveformPreview> {
        if let Some(details) = self.metadata_finder.get_media_details_for(track.slot) {
            if let Some(preview) = self.metadata_finder.provider_waveform_preview(&details, track) {
                return Some(preview);
            }
        }
        if self.metadata_finder.is_passive() && from_update && track.slot.slot != TrackSourceSlot::Collection {
            return None;
        }
        let device = self.device_finder.device(track.slot.player)?;
        let style = self.preferred_style();
        let outcome = self
            .connection_manager
            .invoke_with_client_session(
                track.slot.player,
                device.address,
                self.dbserver_port,
                "requesting waveform preview",
                move |client| async move { fetch_waveform_preview(&client, track, style).await },
            )
            .await;
        match outcome {
            Ok(preview) => preview,
            Err(e) => {
                warn!(player = track.slot.player, error = %e, "waveform preview request failed");
                None
            }
        }
    }

    async fn request_detail_internal(&self, track: DataReference, from_update: bool) -> Option<WaveformDetail> {
        if let Some(details) = self.metadata_finder.get_media_details_for(track.slot) {
            if let Some(detail) = self.metadata_finder.provider_waveform_detail(&details, track) {
                return Some(detail);
            }
        }
        if self.metadata_finder.is_passive() && from_update && track.slot.slot != TrackSourceSlot::Collection {
            return None;
        }
        let device = self.device_finder.device(track.slot.player)?;
        let style = self.preferred_style();
        let outcome = self
            .connection_manager
            .invoke_with_client_session(
                track.slot.player,
                device.address,
                self.dbserver_port,
                "requesting waveform detail",
                move |client| async move { fetch_waveform_detail(&client, track, style).await },
            )
            .await;
        match outcome {
            Ok(detail) => detail,
            Err(e) => {
                warn!(player = track.slot.player, error = %e, "waveform detail request failed");
                None
            }
        }
    }

    /// At most one retry may be in flight across all players. Only tracks
    /// still `UNANALYZED`, still current for their player, and younger than
    /// `maximum_analysis_wait` are eligible.
    fn maybe_retry_unanalyzed(self: &Arc<Self>, update: &TrackMetadataUpdate, metadata: &TrackMetadata) {
        if metadata.track_type != TrackType::Unanalyzed {
            return;
        }
        if self.metadata_finder.get_latest_metadata_for(update.player).as_ref() != Some(metadata) {
            return;
        }
        let now_nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let age = Duration::from_nanos(now_nanos.saturating_sub(metadata.timestamp_nanos).min(u64::MAX as u128) as u64);
        if age >= self.maximum_analysis_wait {
            return;
        }
        if self.retrying.swap(true, Ordering::AcqRel) {
            return;
        }

        let finder = Arc::clone(self);
        let player = update.player;
        let metadata = metadata.clone();
        tokio::spawn(async move {
            tokio::time::sleep(finder.analysis_update_interval).await;
            finder.retrying.store(false, Ordering::Release);
            if finder.metadata_finder.get_latest_metadata_for(player).as_ref() == Some(&metadata) {
                debug!(player, "retrying unanalyzed waveform fetch");
                finder.enqueue_update(TrackMetadataUpdate { player, metadata: Some(metadata) });
            }
        });
    }
}

impl TrackMetadataListener for WaveformFinder {
    fn metadata_changed(&self, update: &TrackMetadataUpdate) {
        self.enqueue_update(update.clone());
    }
}

impl MountListener for WaveformFinder {
    fn media_mounted(&self, _details: &crate::types::MediaDetails) {}

    fn media_unmounted(&self, slot: SlotReference) {
        self.clear_waveforms_for_slot(slot);
    }
}

impl DeviceListener for WaveformFinder {
    fn device_found(&self, _device: &DeviceAnnouncement) {}

    fn device_lost(&self, device: &DeviceAnnouncement) {
        if device.is_gateway() {
            return;
        }
        self.clear_deck(device.device_number);
    }
}

fn payload_nonempty(msg: &Message) -> bool {
    msg.arguments.get(3).and_then(Field::as_binary).map(|b| !b.is_empty()).unwrap_or(false)
}

async fn fetch_waveform_preview(
    client: &Client,
    track: DataReference,
    style: link_config::WaveformStyle,
) -> Result<Option<WaveformPreview>, ClientError> {
    let slot = track.slot.slot.to_u8();
    let track_type = track.track_type.to_u8();
    let rmst = client.build_rmst(MenuTarget::Root.to_u8(), slot, track_type);

    if style != link_config::WaveformStyle::Blue {
        let (tag, file_type) = match style {
            link_config::WaveformStyle::Rgb => {
                (constants::ANLZ_FILE_TAG_COLOR_WAVEFORM_PREVIEW, constants::ANLZ_FILE_TYPE_EXT)
            }
            link_config::WaveformStyle::ThreeBand => {
                (constants::ANLZ_FILE_TAG_3BAND_WAVEFORM_PREVIEW, constants::ANLZ_FILE_TYPE_2EX)
            }
            link_config::WaveformStyle::Blue => unreachable!(),
        };
        let response = client
            .simple_request(
                MessageType::AnlzTagReq,
                None,
                vec![
                    Field::number(4, rmst),
                    Field::number(4, track.rekordbox_id),
                    Field::number(4, tag),
                    Field::number(4, file_type),
                ],
            )
            .await?;
        if response.message_type == MessageType::AnlzTag && payload_nonempty(&response) {
            let data = response.arguments.get(3).and_then(Field::as_binary).cloned().unwrap_or_default();
            return Ok(Some(WaveformPreview { data_reference: track, style: to_payload_style(style), data }));
        }
    }

    let response = client
        .simple_request(
            MessageType::WavePreviewReq,
            None,
            vec![
                Field::number(4, rmst),
                Field::number(4, 1),
                Field::number(4, track.rekordbox_id),
                Field::number(4, 0),
            ],
        )
        .await?;
    if response.message_type == MessageType::WavePreview && payload_nonempty(&response) {
        let data = response.arguments.get(3).and_then(Field::as_binary).cloned().unwrap_or_default();
        Ok(Some(WaveformPreview { data_reference: track, style: WaveformStyle::Blue, data }))
    } else {
        Ok(None)
    }
}

async fn fetch_waveform_detail(
    client: &Client,
    track: DataReference,
    style: link_config::WaveformStyle,
) -> Result<Option<WaveformDetail>, ClientError> {
    let slot = track.slot.slot.to_u8();
    let track_type = track.track_type.to_u8();
    let rmst = client.build_rmst(MenuTarget::Root.to_u8(), slot, track_type);

    if style != link_config::WaveformStyle::Blue {
        let (tag, file_type) = match style {
            link_config::WaveformStyle::Rgb => {
                (constants::ANLZ_FILE_TAG_COLOR_WAVEFORM_DETAIL, constants::ANLZ_FILE_TYPE_EXT)
            }
            link_config::WaveformStyle::ThreeBand => {
                (constants::ANLZ_FILE_TAG_3BAND_WAVEFORM_DETAIL, constants::ANLZ_FILE_TYPE_2EX)
            }
            link_config::WaveformStyle::Blue => unreachable!(),
        };
        let response = client
            .simple_request(
                MessageType::AnlzTagReq,
                None,
                vec![
                    Field::number(4, rmst),
                    Field::number(4, track.rekordbox_id),
                    Field::number(4, tag),
                    Field::number(4, file_type),
                ],
            )
            .await?;
        if response.message_type == MessageType::AnlzTag && payload_nonempty(&response) {
            let data = response.arguments.get(3).and_then(Field::as_binary).cloned().unwrap_or_default();
            return Ok(Some(WaveformDetail { data_reference: track, style: to_payload_style(style), data }));
        }
    }

    let response = client
        .simple_request(
            MessageType::WaveDetailReq,
            None,
            vec![
                Field::number(4, rmst),
                Field::number(4, 1),
                Field::number(4, track.rekordbox_id),
                Field::number(4, 0),
            ],
        )
        .await?;
    if response.message_type == MessageType::WaveDetail && payload_nonempty(&response) {
        let data = response.arguments.get(3).and_then(Field::as_binary).cloned().unwrap_or_default();
        Ok(Some(WaveformDetail { data_reference: track, style: WaveformStyle::Blue, data }))
    } else {
        Ok(None)
    }
}
