//! Pitch and timing conversions.
//!
//! These are free functions rather than methods on any one type because
//! both the Metronome and the beat parser need them, and neither owns the
//! other.

/// Nominal playback pitch, expressed as the raw 32-bit value that appears
/// on the wire and in beat packets (1,048,576 == 0x100000 is unity / 0%).
pub const PITCH_UNITY: u32 = 0x10_0000;

/// Convert a raw pitch value to a percentage (-100.0 at pitch 0, 0.0 at
/// unity, and unbounded above unity).
pub fn pitch_to_percent(pitch: u32) -> f64 {
    (pitch as f64 - PITCH_UNITY as f64) / PITCH_UNITY as f64 * 100.0
}

/// Inverse of [`pitch_to_percent`].
pub fn percent_to_pitch(percent: f64) -> u32 {
    ((percent / 100.0 + 1.0) * PITCH_UNITY as f64).round() as u32
}

/// Number of half-frames per second in the Pioneer time-code convention.
pub const HALF_FRAMES_PER_SECOND: f64 = 150.0;

/// Convert a half-frame count to milliseconds.
pub fn half_frame_to_ms(half_frames: u32) -> f64 {
    half_frames as f64 / HALF_FRAMES_PER_SECOND * 1000.0
}

/// Convert milliseconds to the nearest half-frame count.
pub fn ms_to_half_frame(ms: f64) -> u32 {
    (ms / 1000.0 * HALF_FRAMES_PER_SECOND).round() as u32
}

/// Effective tempo in BPM given a nominal tempo and the current pitch.
pub fn effective_tempo(nominal_bpm: f64, pitch: u32) -> f64 {
    nominal_bpm * (pitch as f64 / PITCH_UNITY as f64)
}
