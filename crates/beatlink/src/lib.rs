//! Runtime for the DJ Link device presence, beat/tempo, dbserver, and
//! metadata/waveform caching protocols.
//!
//! This crate never installs a global `tracing` subscriber; that is left to
//! whatever binary embeds it.

pub mod beat_finder;
pub mod connection_manager;
pub mod dbserver;
pub mod device_finder;
pub mod error;
pub mod listener;
pub mod metadata_finder;
pub mod metronome;
pub mod types;
pub mod waveform_finder;

pub use error::LinkError;
pub use metronome::{Metronome, Snapshot};
