//! Errors raised by a [`super::Client`] session.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed frame: {0}")]
    Frame(#[from] link_proto::FrameError),

    #[error("{operation} timed out after {deadline_ms}ms")]
    Timeout { operation: &'static str, deadline_ms: u64 },

    #[error("handshake failed: {reason}")]
    HandshakeFailed { reason: String },

    #[error("expected player {expected}, session reported {actual}")]
    WrongPlayer { expected: u8, actual: u8 },

    #[error("protocol mismatch: {0}")]
    ProtocolMismatch(String),

    #[error("value out of range: {0}")]
    OutOfRange(String),

    #[error("connection is not established")]
    NotConnected,
}
