//! Monotonic musical-time oracle.
//!
//! State is three scalars — `start_ms`, `tempo`, and the fixed
//! `beats_per_bar`. They're stored as individual atomics rather than behind
//! a lock so `get_snapshot` never blocks a concurrent writer.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Number of beats per bar. Fixed at 4 (no odd-meter support).
pub const BEATS_PER_BAR: u32 = 4;

/// An observation of the Metronome at an instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot {
    pub instant_ms: i64,
    pub start_ms: i64,
    pub tempo: f64,
    pub beats_per_bar: u32,
    /// Current beat number, 1-based, nondecreasing with `instant_ms`.
    pub beat: u32,
    /// Fractional position within the current beat, in [0, 1).
    pub beat_phase: f64,
}

/// Free-running musical-time oracle: `(start_ms, tempo, beats_per_bar=4)`.
#[derive(Debug)]
pub struct Metronome {
    start_ms: AtomicI64,
    tempo_bits: AtomicU64,
}

impl Metronome {
    pub fn new(start_ms: i64, tempo: f64) -> Self {
        Metronome {
            start_ms: AtomicI64::new(start_ms),
            tempo_bits: AtomicU64::new(tempo.to_bits()),
        }
    }

    pub fn start_ms(&self) -> i64 {
        self.start_ms.load(Ordering::Acquire)
    }

    pub fn tempo(&self) -> f64 {
        f64::from_bits(self.tempo_bits.load(Ordering::Acquire))
    }

    fn period_ms(tempo: f64) -> f64 {
        60_000.0 / tempo
    }

    /// Produce a `Snapshot` of musical time at `instant_ms`.
    pub fn get_snapshot(&self, instant_ms: i64) -> Snapshot {
        let start_ms = self.start_ms();
        let tempo = self.tempo();
        let period = Self::period_ms(tempo);

        let beat_pos = (instant_ms - start_ms) as f64 / period + 1.0;
        let beat = beat_pos.floor().max(1.0) as u32;
        let beat_phase = (beat_pos - beat as f64).max(0.0);

        Snapshot {
            instant_ms,
            start_ms,
            tempo,
            beats_per_bar: BEATS_PER_BAR,
            beat,
            beat_phase,
        }
    }

    /// Change tempo to `new_tempo`, preserving the beat number observed at
    /// `now_ms`. Nonpositive tempos are ignored.
    pub fn set_tempo(&self, now_ms: i64, new_tempo: f64) {
        if new_tempo <= 0.0 {
            return;
        }
        let current_beat = self.get_snapshot(now_ms).beat;
        let new_period = Self::period_ms(new_tempo);
        let new_start = now_ms - ((current_beat - 1) as f64 * new_period) as i64;

        self.start_ms.store(new_start, Ordering::Release);
        self.tempo_bits.store(new_tempo.to_bits(), Ordering::Release);
    }

    /// Set the fractional position within the current beat at `now_ms`,
    /// clamping `phase` to [0, 1].
    pub fn set_beat_phase(&self, now_ms: i64, phase: f64) {
        let phase = phase.clamp(0.0, 1.0);
        let current_beat = self.get_snapshot(now_ms).beat;
        let period = Self::period_ms(self.tempo());
        let new_start = now_ms - (((current_beat - 1) as f64 + phase) * period) as i64;
        self.start_ms.store(new_start, Ordering::Release);
    }

    /// Jump so that `now_ms` falls at the start of beat `beat` (1-based).
    pub fn jump_to_beat(&self, now_ms: i64, beat: u32) {
        let beat = beat.max(1);
        let period = Self::period_ms(self.tempo());
        let new_start = now_ms - ((beat - 1) as f64 * period) as i64;
        self.start_ms.store(new_start, Ordering::Release);
    }

    /// Shift `start_ms` by `delta_ms` (used for coarse sync nudges).
    pub fn adjust_start(&self, delta_ms: i64) {
        self.start_ms.fetch_add(delta_ms, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn snapshot_beat_is_monotonic_under_fixed_tempo() {
        let metronome = Metronome::new(0, 120.0);
        let mut last_beat = metronome.get_snapshot(0).beat;
        for t in (0..10_000).step_by(37) {
            let beat = metronome.get_snapshot(t).beat;
            assert!(beat >= last_beat);
            last_beat = beat;
        }
    }

    #[test]
    fn beat_phase_stays_in_unit_range() {
        let metronome = Metronome::new(0, 128.5);
        for t in (0..5_000).step_by(13) {
            let snap = metronome.get_snapshot(t);
            assert!(snap.beat_phase >= 0.0 && snap.beat_phase < 1.0);
        }
    }

    #[test]
    fn set_tempo_preserves_current_beat() {
        // S3: start=0, tempo=120 -> at t=2000, beat=5.
        let metronome = Metronome::new(0, 120.0);
        assert_eq!(metronome.get_snapshot(2000).beat, 5);

        metronome.set_tempo(2000, 60.0);

        assert_eq!(metronome.get_snapshot(2000).beat, 5);
        assert_eq!(metronome.get_snapshot(3000).beat, 6);
    }

    #[test]
    fn set_tempo_ignores_nonpositive_values() {
        let metronome = Metronome::new(0, 120.0);
        metronome.set_tempo(1000, 0.0);
        assert_eq!(metronome.tempo(), 120.0);
        metronome.set_tempo(1000, -5.0);
        assert_eq!(metronome.tempo(), 120.0);
    }

    #[test]
    fn jump_to_beat_lands_exactly_on_the_boundary() {
        let metronome = Metronome::new(0, 120.0);
        metronome.jump_to_beat(10_000, 1);
        let snap = metronome.get_snapshot(10_000);
        assert_eq!(snap.beat, 1);
        assert_eq!(snap.beat_phase, 0.0);
    }

    #[test]
    fn adjust_start_shifts_by_delta() {
        let metronome = Metronome::new(1000, 120.0);
        metronome.adjust_start(-500);
        assert_eq!(metronome.start_ms(), 500);
    }

    #[test]
    fn set_beat_phase_clamps_to_unit_range() {
        let metronome = Metronome::new(0, 120.0);
        metronome.set_beat_phase(1000, 1.5);
        let snap = metronome.get_snapshot(1000);
        assert!((snap.beat_phase - 0.0).abs() < 1e-6 || snap.beat_phase < 1.0);
    }
}
