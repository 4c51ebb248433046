//! Crate-root error taxonomy.
//!
//! Component-local error enums stay narrow and convert into `LinkError` via
//! `#[from]` rather than every component reimplementing the full taxonomy.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("operation on player {player} timed out after {deadline_ms}ms")]
    Timeout { player: u8, deadline_ms: u64 },

    #[error("protocol mismatch: {0}")]
    ProtocolMismatch(String),

    #[error(transparent)]
    MalformedField(#[from] link_proto::FrameError),

    #[error("value out of range: {0}")]
    OutOfRange(String),

    #[error("handshake failed with player {player}: {reason}")]
    HandshakeFailed { player: u8, reason: String },

    #[error("expected player {expected}, session reported {actual}")]
    WrongPlayer { expected: u8, actual: u8 },

    #[error("{0} is not running")]
    NotRunning(&'static str),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Client(#[from] crate::dbserver::ClientError),

    #[error("{description} (player {player}): {source}")]
    SessionFailed {
        player: u8,
        description: String,
        #[source]
        source: crate::dbserver::ClientError,
    },
}

impl From<link_proto::BeatError> for LinkError {
    fn from(e: link_proto::BeatError) -> Self {
        LinkError::ProtocolMismatch(e.to_string())
    }
}
