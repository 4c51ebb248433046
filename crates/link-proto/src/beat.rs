//! Beat/tempo announcement parsing.
//!
//! These packets are fixed-size and fixed-layout, unlike the tagged-field
//! DbServer protocol, so this parser works directly on byte offsets rather
//! than going through [`crate::field`].

use crate::error::BeatError;
use crate::pitch::effective_tempo;
use byteorder::{BigEndian, ByteOrder};

/// Fixed preamble that opens every beat packet.
pub const BEAT_MAGIC: &[u8; 10] = b"Qspt1WmJOL";

/// Packet type byte for a beat announcement.
pub const BEAT_PACKET_TYPE: u8 = 0x28;

/// Total length of a beat announcement packet.
pub const BEAT_PACKET_LEN: usize = 96;

const OFFSET_TYPE: usize = 0x0a;
const OFFSET_DEVICE_NAME: usize = 0x0b;
const DEVICE_NAME_LEN: usize = 20;
const OFFSET_DEVICE_NUMBER: usize = 0x21;
const OFFSET_NEXT_BEAT: usize = 0x24;
const OFFSET_SECOND_BEAT: usize = 0x28;
const OFFSET_NEXT_BAR: usize = 0x2c;
const OFFSET_FOURTH_BEAT: usize = 0x30;
const OFFSET_SECOND_BAR: usize = 0x34;
const OFFSET_EIGHTH_BEAT: usize = 0x38;
const OFFSET_PITCH: usize = 0x55;
const OFFSET_BPM: usize = 0x5a;
const OFFSET_BEAT_WITHIN_BAR: usize = 0x5c;

/// A parsed beat/tempo announcement, broadcast by a player once per beat.
#[derive(Debug, Clone, PartialEq)]
pub struct Beat {
    pub device_name: String,
    pub device_number: u8,
    /// Nominal tempo as BPM × 100, independent of pitch (e.g. 12850 means
    /// 128.5 BPM). Kept as the raw integer the wire carries; `effective_tempo`
    /// is where the division by 100 and the pitch scaling happen.
    pub bpm: u16,
    /// Raw pitch value as it appeared on the wire.
    pub pitch: u32,
    /// Position within the current 4-beat bar, 1-4.
    pub beat_within_bar: u8,
    pub next_beat_ms: u32,
    pub second_beat_ms: u32,
    pub next_bar_ms: u32,
    pub fourth_beat_ms: u32,
    pub second_bar_ms: u32,
    pub eighth_beat_ms: u32,
}

impl Beat {
    /// Parse a beat announcement from a raw UDP payload.
    pub fn parse(buf: &[u8]) -> Result<Beat, BeatError> {
        if buf.len() != BEAT_PACKET_LEN {
            return Err(BeatError::WrongLength(buf.len()));
        }
        if &buf[0..10] != BEAT_MAGIC {
            return Err(BeatError::BadMagic);
        }
        if buf[OFFSET_TYPE] != BEAT_PACKET_TYPE {
            return Err(BeatError::BadPacketType(buf[OFFSET_TYPE]));
        }

        let name_bytes = &buf[OFFSET_DEVICE_NAME..OFFSET_DEVICE_NAME + DEVICE_NAME_LEN];
        let device_name = String::from_utf8_lossy(name_bytes)
            .trim_end_matches('\0')
            .to_string();

        let device_number = buf[OFFSET_DEVICE_NUMBER];

        let bpm = BigEndian::read_u16(&buf[OFFSET_BPM..OFFSET_BPM + 2]);

        let pitch = read_u24_be(&buf[OFFSET_PITCH..OFFSET_PITCH + 3]);
        let beat_within_bar = buf[OFFSET_BEAT_WITHIN_BAR];

        Ok(Beat {
            device_name,
            device_number,
            bpm,
            pitch,
            beat_within_bar,
            next_beat_ms: BigEndian::read_u32(&buf[OFFSET_NEXT_BEAT..OFFSET_NEXT_BEAT + 4]),
            second_beat_ms: BigEndian::read_u32(&buf[OFFSET_SECOND_BEAT..OFFSET_SECOND_BEAT + 4]),
            next_bar_ms: BigEndian::read_u32(&buf[OFFSET_NEXT_BAR..OFFSET_NEXT_BAR + 4]),
            fourth_beat_ms: BigEndian::read_u32(&buf[OFFSET_FOURTH_BEAT..OFFSET_FOURTH_BEAT + 4]),
            second_bar_ms: BigEndian::read_u32(&buf[OFFSET_SECOND_BAR..OFFSET_SECOND_BAR + 4]),
            eighth_beat_ms: BigEndian::read_u32(&buf[OFFSET_EIGHTH_BEAT..OFFSET_EIGHTH_BEAT + 4]),
        })
    }

    /// Tempo adjusted for the player's current pitch, in BPM.
    pub fn effective_tempo(&self) -> f64 {
        effective_tempo(self.bpm as f64 / 100.0, self.pitch)
    }

    /// Whether `beat_within_bar` means anything for this sender. Mixers and
    /// other non-player gear (device numbers ≥ 33) don't track bar position.
    pub fn is_beat_within_bar_meaningful(&self) -> bool {
        self.device_number < 33
    }
}

fn read_u24_be(bytes: &[u8]) -> u32 {
    ((bytes[0] as u32) << 16) | ((bytes[1] as u32) << 8) | bytes[2] as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pitch::PITCH_UNITY;
    use pretty_assertions::assert_eq;

    fn sample_packet() -> Vec<u8> {
        let mut buf = vec![0u8; BEAT_PACKET_LEN];
        buf[0..10].copy_from_slice(BEAT_MAGIC);
        buf[OFFSET_TYPE] = BEAT_PACKET_TYPE;
        let name = b"CDJ-2000NXS2";
        buf[OFFSET_DEVICE_NAME..OFFSET_DEVICE_NAME + name.len()].copy_from_slice(name);
        buf[OFFSET_DEVICE_NUMBER] = 2;
        BigEndian::write_u32(&mut buf[OFFSET_NEXT_BEAT..OFFSET_NEXT_BEAT + 4], 200);
        BigEndian::write_u32(&mut buf[OFFSET_SECOND_BEAT..OFFSET_SECOND_BEAT + 4], 700);
        BigEndian::write_u32(&mut buf[OFFSET_NEXT_BAR..OFFSET_NEXT_BAR + 4], 900);
        BigEndian::write_u32(&mut buf[OFFSET_FOURTH_BEAT..OFFSET_FOURTH_BEAT + 4], 1400);
        BigEndian::write_u32(&mut buf[OFFSET_SECOND_BAR..OFFSET_SECOND_BAR + 4], 2300);
        BigEndian::write_u32(&mut buf[OFFSET_EIGHTH_BEAT..OFFSET_EIGHTH_BEAT + 4], 4700);
        BigEndian::write_u16(&mut buf[OFFSET_BPM..OFFSET_BPM + 2], 12000); // 120.00 BPM
        buf[OFFSET_PITCH] = ((PITCH_UNITY >> 16) & 0xff) as u8;
        buf[OFFSET_PITCH + 1] = ((PITCH_UNITY >> 8) & 0xff) as u8;
        buf[OFFSET_PITCH + 2] = (PITCH_UNITY & 0xff) as u8;
        buf[OFFSET_BEAT_WITHIN_BAR] = 1;
        buf
    }

    #[test]
    fn parses_a_well_formed_packet() {
        let packet = sample_packet();
        let beat = Beat::parse(&packet).unwrap();
        assert_eq!(beat.device_name, "CDJ-2000NXS2");
        assert_eq!(beat.device_number, 2);
        assert_eq!(beat.bpm, 12000);
        assert_eq!(beat.beat_within_bar, 1);
        assert_eq!(beat.next_beat_ms, 200);
        assert_eq!(beat.eighth_beat_ms, 4700);
    }

    #[test]
    fn device_number_and_beat_within_bar_are_in_range() {
        let beat = Beat::parse(&sample_packet()).unwrap();
        assert!((1..=255).contains(&beat.device_number));
        assert!((1..=4).contains(&beat.beat_within_bar));
    }

    #[test]
    fn effective_tempo_matches_nominal_at_unity_pitch() {
        let beat = Beat::parse(&sample_packet()).unwrap();
        assert_eq!(beat.effective_tempo(), 120.0);
    }

    #[test]
    fn beat_within_bar_is_meaningful_only_below_device_33() {
        let mut packet = sample_packet();
        packet[OFFSET_DEVICE_NUMBER] = 2;
        assert!(Beat::parse(&packet).unwrap().is_beat_within_bar_meaningful());

        packet[OFFSET_DEVICE_NUMBER] = 33;
        assert!(!Beat::parse(&packet).unwrap().is_beat_within_bar_meaningful());
    }

    #[test]
    fn rejects_wrong_length() {
        let err = Beat::parse(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, BeatError::WrongLength(10)));
    }

    #[test]
    fn rejects_bad_magic() {
        let mut packet = sample_packet();
        packet[0] = b'X';
        let err = Beat::parse(&packet).unwrap_err();
        assert!(matches!(err, BeatError::BadMagic));
    }

    #[test]
    fn rejects_wrong_packet_type() {
        let mut packet = sample_packet();
        packet[OFFSET_TYPE] = 0x00;
        let err = Beat::parse(&packet).unwrap_err();
        assert!(matches!(err, BeatError::BadPacketType(0x00)));
    }
}
