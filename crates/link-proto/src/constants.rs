//! Network-level constants shared across the protocol.

/// UDP port devices announce their presence on.
pub const DEVICE_ANNOUNCEMENT_PORT: u16 = 50000;
/// UDP port beat/tempo packets are broadcast on.
pub const BEAT_PORT: u16 = 50001;
/// UDP port used for the third, less latency-sensitive broadcast channel.
pub const UPDATE_PORT: u16 = 50002;
/// Base TCP port the DbServer protocol is reachable on.
pub const DBSERVER_PORT: u16 = 1051;

/// Device number reserved for the NXS-GW rekordbox gateway. It is tracked
/// for presence purposes but excluded from waveform/metadata invalidation.
pub const GATEWAY_DEVICE_NUMBER: u8 = 25;

/// First 4 bytes sent by a client opening a DbServer connection.
pub const GREETING: u32 = 0x0000_0001;

/// `ANLZ_TAG_REQ` tag/file-type constants selecting which rendered waveform
/// variant to fetch. The preview/detail distinction is carried by which
/// request is issued, not by these values.
pub const ANLZ_FILE_TAG_COLOR_WAVEFORM_PREVIEW: u32 = 0x5057_5632; // "PWV2"
pub const ANLZ_FILE_TAG_COLOR_WAVEFORM_DETAIL: u32 = 0x5057_5633; // "PWV3"
pub const ANLZ_FILE_TAG_3BAND_WAVEFORM_PREVIEW: u32 = 0x5057_5634; // "PWV4"
pub const ANLZ_FILE_TAG_3BAND_WAVEFORM_DETAIL: u32 = 0x5057_5635; // "PWV5"
pub const ANLZ_FILE_TYPE_EXT: u32 = 0x2e45_5854; // ".EXT"
pub const ANLZ_FILE_TYPE_2EX: u32 = 0x2e32_4558; // ".2EX"
