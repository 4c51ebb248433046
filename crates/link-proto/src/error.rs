//! Error kinds for the wire codec.
//!
//! These are intentionally narrow: `link-proto` never touches a socket, so
//! its errors only describe malformed bytes. `beatlink` folds these into its
//! own crate-root error via `#[from]`.

use thiserror::Error;

/// Failures decoding a single tagged field.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FieldError {
    #[error("unknown field type tag {0:#04x}")]
    UnknownTypeTag(u8),

    #[error("buffer too short: needed {needed} bytes, had {available}")]
    BufferTooShort { needed: usize, available: usize },

    #[error("string field has odd byte length {0}")]
    OddStringLength(usize),

    #[error("unpaired UTF-16 surrogate in string field")]
    UnpairedSurrogate,
}

/// Failures decoding a framed message.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error(transparent)]
    Field(#[from] FieldError),

    #[error("bad message start marker: {0:#010x}")]
    BadMessageStart(u32),

    #[error("argument count {0} exceeds the protocol maximum of 12")]
    TooManyArguments(u8),

    #[error("argument tag sidecar must be exactly 12 bytes, got {0}")]
    BadSidecarLength(usize),

    #[error("argument {index} tag {tag:#04x} does not match sidecar tag {expected:#04x}")]
    ArgumentTagMismatch { index: usize, tag: u8, expected: u8 },

    #[error("expected {expected} arguments per sidecar, message declared argc={argc}")]
    ArgCountMismatch { expected: usize, argc: u8 },
}

/// Failures parsing a 96-byte beat announcement.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BeatError {
    #[error("packet length {0} is not the expected 96 bytes")]
    WrongLength(usize),

    #[error("magic bytes did not match the fixed beat preamble")]
    BadMagic,

    #[error("packet type byte {0:#04x} is not the beat announcement type (0x28)")]
    BadPacketType(u8),
}
