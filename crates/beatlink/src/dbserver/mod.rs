//! Per-player database-server protocol: sessions, health, and the
//! re-entrant menu lock.

pub mod client;
pub mod error;
pub mod health;
pub mod menu_lock;

pub use client::Client;
pub use error::ClientError;
pub use health::{ConnectionState, HealthTracker};
pub use menu_lock::{LockToken, MenuLock, MenuLockGuard};
