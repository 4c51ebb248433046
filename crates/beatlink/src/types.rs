//! Core data model shared across finders.

use std::net::Ipv4Addr;
use std::time::Instant;

/// Identity of a live participant on the network.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceAnnouncement {
    pub device_number: u8,
    pub name: String,
    pub address: Ipv4Addr,
    pub mac_address: [u8; 6],
    pub last_seen: Instant,
}

impl DeviceAnnouncement {
    /// Whether this is the rekordbox gateway device, which is tracked for
    /// presence but excluded from waveform/metadata invalidation.
    pub fn is_gateway(&self) -> bool {
        self.device_number == link_proto::constants::GATEWAY_DEVICE_NUMBER
    }
}

/// Removable-media origin for a loaded track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackSourceSlot {
    Collection,
    Sd,
    Usb,
    Cd,
    Unknown(u8),
}

impl TrackSourceSlot {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x04 => TrackSourceSlot::Collection,
            0x02 => TrackSourceSlot::Sd,
            0x03 => TrackSourceSlot::Usb,
            0x01 => TrackSourceSlot::Cd,
            other => TrackSourceSlot::Unknown(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            TrackSourceSlot::Collection => 0x04,
            TrackSourceSlot::Sd => 0x02,
            TrackSourceSlot::Usb => 0x03,
            TrackSourceSlot::Cd => 0x01,
            TrackSourceSlot::Unknown(v) => v,
        }
    }
}

/// Identity key for a piece of removable media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotReference {
    pub player: u8,
    pub slot: TrackSourceSlot,
}

/// Analysis content type behind a `DataReference`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackType {
    Rekordbox,
    Unanalyzed,
    CdDigitalAudio,
}

impl TrackType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => TrackType::Rekordbox,
            5 => TrackType::CdDigitalAudio,
            _ => TrackType::Unanalyzed,
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            TrackType::Rekordbox => 1,
            TrackType::Unanalyzed => 2,
            TrackType::CdDigitalAudio => 5,
        }
    }
}

/// Identifies a loadable piece of analysis content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataReference {
    pub slot: SlotReference,
    pub rekordbox_id: u32,
    pub track_type: TrackType,
}

/// Keys into waveform/metadata hot-caches: a deck, or one of its hot cues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeckReference {
    pub player: u8,
    /// 0 denotes the deck's current playing position.
    pub hot_cue: u8,
}

impl DeckReference {
    pub fn playing(player: u8) -> Self {
        DeckReference { player, hot_cue: 0 }
    }

    pub fn hot_cue(player: u8, hot_cue: u8) -> Self {
        DeckReference { player, hot_cue }
    }

    pub fn is_playing_position(&self) -> bool {
        self.hot_cue == 0
    }
}

/// A single hot-cue entry referenced by a track's cue list.
#[derive(Debug, Clone, PartialEq)]
pub struct CueEntry {
    pub hot_cue_number: u8,
    pub position_ms: u32,
}

/// Aggregated result of a metadata request.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackMetadata {
    pub track_reference: DataReference,
    pub track_type: TrackType,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub genre: String,
    pub label: String,
    pub key: String,
    pub color: String,
    pub comment: String,
    pub date_added: String,
    pub original_artist: String,
    pub remixer: String,
    pub duration_secs: u32,
    pub tempo: f64,
    pub rating: u8,
    pub year: u16,
    pub bit_rate: u32,
    pub artwork_id: u32,
    pub timestamp_nanos: u128,
    pub cue_list: Vec<CueEntry>,
}

/// Details about removable media mounted in a slot.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaDetails {
    pub slot: SlotReference,
    pub name: String,
    pub track_count: u32,
}

/// Delivered whenever a deck's metadata changes (including unload, as `None`).
#[derive(Debug, Clone, PartialEq)]
pub struct TrackMetadataUpdate {
    pub player: u8,
    pub metadata: Option<TrackMetadata>,
}

/// Waveform style, selected by the preferred rendering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveformStyle {
    Blue,
    Rgb,
    ThreeBand,
}

/// Raw waveform payload, tagged with the style it was rendered in.
#[derive(Debug, Clone, PartialEq)]
pub struct WaveformPreview {
    pub data_reference: DataReference,
    pub style: WaveformStyle,
    pub data: bytes::Bytes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WaveformDetail {
    pub data_reference: DataReference,
    pub style: WaveformStyle,
    pub data: bytes::Bytes,
}
