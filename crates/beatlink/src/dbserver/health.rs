//! Connection health tracking, adapted from the reactor client's
//! `HealthTracker`/`ConnectionState` pair: state lives in a small atomic so
//! readers never block a concurrent writer.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unknown = 0,
    Connected = 1,
    Dead = 2,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ConnectionState::Unknown,
            1 => ConnectionState::Connected,
            2 => ConnectionState::Dead,
            _ => ConnectionState::Unknown,
        }
    }
}

#[derive(Debug, Default)]
pub struct HealthTracker {
    state: AtomicU8,
    consecutive_failures: AtomicU32,
}

impl HealthTracker {
    pub fn new() -> Self {
        HealthTracker {
            state: AtomicU8::new(ConnectionState::Unknown as u8),
            consecutive_failures: AtomicU32::new(0),
        }
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Relaxed))
    }

    pub fn is_alive(&self) -> bool {
        self.state() != ConnectionState::Dead
    }

    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.state.store(ConnectionState::Connected as u8, Ordering::Relaxed);
    }

    pub fn record_failure(&self, max_failures: u32) -> u32 {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= max_failures {
            self.state.store(ConnectionState::Dead as u8, Ordering::Relaxed);
        }
        failures
    }

    pub fn mark_dead(&self) {
        self.state.store(ConnectionState::Dead as u8, Ordering::Relaxed);
    }
}
