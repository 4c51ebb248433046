//! Per-deck track metadata cache: turns a rendered menu's items into a
//! `TrackMetadata`, and runs active-mode lookups through this crate's own
//! [`crate::connection_manager::ConnectionManager`] for pooled sessions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use link_proto::field::Field;
use link_proto::menu::{MenuItemType, MenuTarget};
use link_proto::message::MessageType;
use tracing::{debug, warn};

use crate::connection_manager::ConnectionManager;
use crate::dbserver::{Client, ClientError};
use crate::device_finder::DeviceListener;
use crate::error::LinkError;
use crate::listener::ListenerList;
use crate::types::{
    CueEntry, DataReference, DeckReference, DeviceAnnouncement, MediaDetails, SlotReference,
    TrackMetadata, TrackMetadataUpdate, TrackType, WaveformDetail, WaveformPreview,
};

/// Receives `metadataChanged` notifications for a deck's loaded track.
pub trait TrackMetadataListener: Send + Sync {
    fn metadata_changed(&self, update: &TrackMetadataUpdate);
}

/// Receives media mount/unmount notifications for a slot.
pub trait MountListener: Send + Sync {
    fn media_mounted(&self, details: &MediaDetails);
    fn media_unmounted(&self, slot: SlotReference);
}

/// A pluggable external source of metadata and waveform data: a PDB-file
/// parser, an HTTP proxy to rekordbox's own database, anything that can
/// answer without a DbServer round trip.
pub trait MetadataProvider: Send + Sync {
    fn get_track_metadata(&self, media: &MediaDetails, track: DataReference) -> Option<TrackMetadata>;
    fn get_cue_list(&self, media: &MediaDetails, track: DataReference) -> Option<Vec<CueEntry>>;
    fn get_waveform_preview(&self, media: &MediaDetails, track: DataReference) -> Option<WaveformPreview>;
    fn get_waveform_detail(&self, media: &MediaDetails, track: DataReference) -> Option<WaveformDetail>;
}

/// Chain-of-responsibility over registered [`MetadataProvider`]s: the first
/// one to answer wins.
#[derive(Default)]
pub struct CompositeProvider {
    providers: Vec<Arc<dyn MetadataProvider>>,
}

impl CompositeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_provider(&mut self, provider: Arc<dyn MetadataProvider>) {
        self.providers.push(provider);
    }

    pub fn get_track_metadata(&self, media: &MediaDetails, track: DataReference) -> Option<TrackMetadata> {
        self.providers.iter().find_map(|p| p.get_track_metadata(media, track))
    }

    pub fn get_cue_list(&self, media: &MediaDetails, track: DataReference) -> Option<Vec<CueEntry>> {
        self.providers.iter().find_map(|p| p.get_cue_list(media, track))
    }

    pub fn get_waveform_preview(&self, media: &MediaDetails, track: DataReference) -> Option<WaveformPreview> {
        self.providers.iter().find_map(|p| p.get_waveform_preview(media, track))
    }

    pub fn get_waveform_detail(&self, media: &MediaDetails, track: DataReference) -> Option<WaveformDetail> {
        self.providers.iter().find_map(|p| p.get_waveform_detail(media, track))
    }
}

/// Caches loaded-track metadata and mounted-media details, issuing its own
/// DbServer lookups in active mode or relying entirely on registered
/// providers in passive mode.
pub struct MetadataFinder {
    loaded_tracks: dashmap::DashMap<DeckReference, TrackMetadata>,
    media_details: dashmap::DashMap<SlotReference, MediaDetails>,
    metadata_listeners: ListenerList<dyn TrackMetadataListener>,
    mount_listeners: ListenerList<dyn MountListener>,
    provider: RwLock<CompositeProvider>,
    passive: AtomicBool,
    running: AtomicBool,
    connection_manager: Arc<ConnectionManager>,
    menu_timeout: Duration,
}

impl MetadataFinder {
    pub fn new(connection_manager: Arc<ConnectionManager>, passive: bool, menu_timeout: Duration) -> Arc<Self> {
        Arc::new(MetadataFinder {
            loaded_tracks: dashmap::DashMap::new(),
            media_details: dashmap::DashMap::new(),
            metadata_listeners: ListenerList::new(),
            mount_listeners: ListenerList::new(),
            provider: RwLock::new(CompositeProvider::new()),
            passive: AtomicBool::new(passive),
            running: AtomicBool::new(false),
            connection_manager,
            menu_timeout,
        })
    }

    pub fn add_provider(&self, provider: Arc<dyn MetadataProvider>) {
        self.provider.write().unwrap().add_provider(provider);
    }

    pub fn is_passive(&self) -> bool {
        self.passive.load(Ordering::Acquire)
    }

    pub fn set_passive(&self, passive: bool) {
        self.passive.store(passive, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn start(&self) {
        self.running.store(true, Ordering::Release);
        debug!("metadata finder started");
    }

    /// Stop the finder: clear both caches.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.loaded_tracks.clear();
        self.media_details.clear();
        debug!("metadata finder stopped");
    }

    pub fn add_track_metadata_listener(&self, listener: Arc<dyn TrackMetadataListener>) {
        self.metadata_listeners.add(listener);
    }

    pub fn remove_track_metadata_listener(&self, listener: &Arc<dyn TrackMetadataListener>) {
        self.metadata_listeners.remove(listener);
    }

    pub fn add_mount_listener(&self, listener: Arc<dyn MountListener>) {
        self.mount_listeners.add(listener);
    }

    pub fn remove_mount_listener(&self, listener: &Arc<dyn MountListener>) {
        self.mount_listeners.remove(listener);
    }

    pub fn get_loaded_tracks(&self) -> HashMap<DeckReference, TrackMetadata> {
        self.loaded_tracks.iter().map(|e| (*e.key(), e.value().clone())).collect()
    }

    pub fn get_latest_metadata_for(&self, player: u8) -> Option<TrackMetadata> {
        self.loaded_tracks.get(&DeckReference::playing(player)).map(|e| e.value().clone())
    }

    pub fn get_media_details_for(&self, slot: SlotReference) -> Option<MediaDetails> {
        self.media_details.get(&slot).map(|e| e.value().clone())
    }

    /// Consult the provider chain for `track`'s waveform preview, given
    /// already-known media details for its slot.
    pub fn provider_waveform_preview(&self, media: &MediaDetails, track: DataReference) -> Option<WaveformPreview> {
        self.provider.read().unwrap().get_waveform_preview(media, track)
    }

    pub fn provider_waveform_detail(&self, media: &MediaDetails, track: DataReference) -> Option<WaveformDetail> {
        self.provider.read().unwrap().get_waveform_detail(media, track)
    }

    /// Record that `details` became available in its slot, fanning out to
    /// mount listeners. Called by whatever surfaces media mount events —
    /// the status-packet protocol that reports them is out of this crate's
    /// scope.
    pub fn handle_media_mounted(&self, details: MediaDetails) {
        let slot = details.slot;
        self.media_details.insert(slot, details.clone());
        debug!(player = slot.player, "media mounted");
        self.mount_listeners.deliver(|l| l.media_mounted(&details));
    }

    /// Record that the media in `slot` was removed: drop it and every
    /// loaded track sourced from it, broadcasting null updates for any
    /// playing-position deck affected.
    pub fn handle_media_unmounted(&self, slot: SlotReference) {
        self.media_details.remove(&slot);
        let affected: Vec<DeckReference> = self
            .loaded_tracks
            .iter()
            .filter(|e| e.value().track_reference.slot == slot)
            .map(|e| *e.key())
            .collect();
        for deck in &affected {
            self.loaded_tracks.remove(deck);
        }
        debug!(player = slot.player, "media unmounted");
        self.mount_listeners.deliver(|l| l.media_unmounted(slot));
        for deck in affected.into_iter().filter(|d| d.is_playing_position()) {
            self.metadata_listeners
                .deliver(|l| l.metadata_changed(&TrackMetadataUpdate { player: deck.player, metadata: None }));
        }
    }

    /// Clear every loaded track belonging to `announcement`'s player (the
    /// gateway is exempt — it never carries loaded-track state).
    pub fn handle_device_lost(&self, announcement: &DeviceAnnouncement) {
        if announcement.is_gateway() {
            return;
        }
        let player = announcement.device_number;
        let affected: Vec<DeckReference> =
            self.loaded_tracks.iter().filter(|e| e.key().player == player).map(|e| *e.key()).collect();
        for deck in &affected {
            self.loaded_tracks.remove(deck);
        }
        if affected.iter().any(|d| d.is_playing_position()) {
            self.metadata_listeners
                .deliver(|l| l.metadata_changed(&TrackMetadataUpdate { player, metadata: None }));
        }
    }

    /// Active-mode metadata fetch for `deck`'s newly loaded `track`: consult
    /// the provider chain first, then fall back to a DbServer round trip
    /// through the connection manager. Updates the cache and fans out on
    /// success either way.
    pub async fn request_track_metadata(
        &self,
        deck: DeckReference,
        track: DataReference,
        address: std::net::Ipv4Addr,
        port: u16,
    ) -> Result<TrackMetadata, LinkError> {
        if let Some(details) = self.get_media_details_for(track.slot) {
            if let Some(found) = self.provider.read().unwrap().get_track_metadata(&details, track) {
                self.store_and_broadcast(deck, found.clone());
                return Ok(found);
            }
        }

        if self.is_passive() {
            return Err(LinkError::Configuration(
                "metadata finder is passive and no provider supplied metadata".to_string(),
            ));
        }

        let menu_timeout = self.menu_timeout;
        let metadata = self
            .connection_manager
            .invoke_with_client_session(deck.player, address, port, "requesting track metadata", move |client| async move {
                fetch_metadata_via_dbserver(&client, track, menu_timeout).await
            })
            .await?;
        self.store_and_broadcast(deck, metadata.clone());
        Ok(metadata)
    }

    fn store_and_broadcast(&self, deck: DeckReference, metadata: TrackMetadata) {
        self.loaded_tracks.insert(deck, metadata.clone());
        if deck.is_playing_position() {
            self.metadata_listeners.deliver(|l| {
                l.metadata_changed(&TrackMetadataUpdate { player: deck.player, metadata: Some(metadata.clone()) })
            });
        }
    }
}

impl DeviceListener for MetadataFinder {
    fn device_found(&self, _device: &DeviceAnnouncement) {}

    fn device_lost(&self, device: &DeviceAnnouncement) {
        self.handle_device_lost(device);
    }
}

async fn fetch_metadata_via_dbserver(
    client: &Client,
    track: DataReference,
    menu_timeout: Duration,
) -> Result<TrackMetadata, ClientError> {
    let guard = client.try_locking_for_menu_operations(menu_timeout).await?;
    let slot = track.slot.slot.to_u8();
    let track_type = track.track_type.to_u8();

    let available = client
        .menu_request(
            &guard,
            MessageType::TrackMetadataReq,
            MenuTarget::Track.to_u8(),
            slot,
            track_type,
            vec![Field::number(4, track.rekordbox_id)],
        )
        .await?;
    let items = client
        .render_menu_items_from_available(&guard, MenuTarget::Track.to_u8(), slot, track_type, &available)
        .await?;

    let cue_list = fetch_cue_list(client, &guard, track).await.unwrap_or_default();

    Ok(parse_track_metadata(track, items, cue_list))
}

async fn fetch_cue_list(
    client: &Client,
    guard: &crate::dbserver::MenuLockGuard<'_>,
    track: DataReference,
) -> Result<Vec<CueEntry>, ClientError> {
    let slot = track.slot.slot.to_u8();
    let track_type = track.track_type.to_u8();
    let available = client
        .menu_request(
            guard,
            MessageType::CueListReq,
            MenuTarget::Track.to_u8(),
            slot,
            track_type,
            vec![Field::number(4, track.rekordbox_id)],
        )
        .await?;
    let items = client
        .render_menu_items_from_available(guard, MenuTarget::Track.to_u8(), slot, track_type, &available)
        .await?;
    Ok(items
        .iter()
        .filter_map(|item| {
            let hot_cue_number = item.arguments.get(1).and_then(Field::as_number)? as u8;
            let position_ms = item.arguments.get(2).and_then(Field::as_number)?;
            Some(CueEntry { hot_cue_number, position_ms })
        })
        .collect())
}

/// Build a [`TrackMetadata`] from a rendered menu's item rows.
///
/// Each item's kind tag lives at argument index 0 (this crate's own
/// convention; the item-kind assignments in [`MenuItemType`] are likewise
/// invented for this crate — see its doc comment), its numeric payload at
/// index 1, its string payload at index 3, and the title row additionally
/// carries an artwork id at index 8.
///
/// `REMIXER` and `ALBUM_TITLE` are parsed as fully independent fields. An
/// easy mistake here is to let `REMIXER` fall through into `ALBUM_TITLE`
/// parsing, silently overwriting the album title with remix credit — that
/// fall-through is deliberately not reproduced.
fn parse_track_metadata(track: DataReference, items: Vec<link_proto::Message>, cue_list: Vec<CueEntry>) -> TrackMetadata {
    let mut metadata = TrackMetadata {
        track_reference: track,
        track_type: track.track_type,
        title: String::new(),
        artist: String::new(),
        album: String::new(),
        genre: String::new(),
        label: String::new(),
        key: String::new(),
        color: String::new(),
        comment: String::new(),
        date_added: String::new(),
        original_artist: String::new(),
        remixer: String::new(),
        duration_secs: 0,
        tempo: 0.0,
        rating: 0,
        year: 0,
        bit_rate: 0,
        artwork_id: 0,
        timestamp_nanos: 0,
        cue_list,
    };

    for item in &items {
        let Some(kind) = item.arguments.first().and_then(Field::as_number) else {
            continue;
        };
        let kind = MenuItemType::from_u8(kind as u8);
        let string_field = || item.arguments.get(3).and_then(Field::as_string).unwrap_or_default().to_string();
        let number_field = || item.arguments.get(1).and_then(Field::as_number).unwrap_or(0);

        match kind {
            MenuItemType::Title => {
                metadata.title = string_field();
                metadata.artwork_id = item.arguments.get(8).and_then(Field::as_number).unwrap_or(0);
            }
            MenuItemType::Artist => metadata.artist = string_field(),
            MenuItemType::OriginalArtist => metadata.original_artist = string_field(),
            MenuItemType::Remixer => metadata.remixer = string_field(),
            MenuItemType::Album => metadata.album = string_field(),
            MenuItemType::Label => metadata.label = string_field(),
            MenuItemType::Time => metadata.duration_secs = number_field(),
            MenuItemType::Bpm => metadata.tempo = number_field() as f64 / 100.0,
            MenuItemType::Comment => metadata.comment = string_field(),
            MenuItemType::Key => metadata.key = string_field(),
            MenuItemType::Rating => metadata.rating = number_field() as u8,
            MenuItemType::Color => metadata.color = string_field(),
            MenuItemType::Genre => metadata.genre = string_field(),
            MenuItemType::DateAdded => metadata.date_added = string_field(),
            MenuItemType::Year => metadata.year = number_field() as u16,
            MenuItemType::Bitrate => metadata.bit_rate = number_field(),
            _ => {
                warn!(kind = ?kind, "ignoring unrecognized track metadata item");
            }
        }
    }

    metadata.timestamp_nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);

    metadata
}
