//! DbServer message framing.
//!
//! A message is `MESSAGE_START`, a transaction number, a message type, an
//! argument count, a 12-byte argument-tag sidecar, then the arguments
//! themselves: a fixed header followed by individually tagged fields
//! rather than a positional layout.

use crate::error::FrameError;
use crate::field::{
    Field, ARG_TAG_BINARY, ARG_TAG_NUMBER, ARG_TAG_STRING,
};
use bytes::{Bytes, BytesMut};

/// Fixed marker that starts every message.
pub const MESSAGE_START: u32 = 0x872349ae;

/// Maximum number of arguments a message may carry.
pub const MAX_ARGS: u8 = 12;

/// Transaction number reserved for the setup handshake.
pub const SETUP_TRANSACTION: u32 = 0xFFFF_FFFE;
/// Transaction number reserved for teardown.
pub const TEARDOWN_TRANSACTION: u32 = 0xFFFF_FFFE;

/// Sentinel availability count meaning "zero items, do not render".
pub const NO_MENU_RESULTS_AVAILABLE: u32 = 0xffff_ffff;

/// Closed set of known message types, falling back to `Unknown` for
/// anything the protocol doesn't name here; unknown values are retained as
/// numeric rather than rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Setup,
    Teardown,
    MenuAvailable,
    MenuHeader,
    MenuItem,
    MenuFooter,
    RenderMenuReq,
    SearchMenu,
    TrackMetadataReq,
    CueListReq,
    WavePreviewReq,
    WavePreview,
    WaveDetailReq,
    WaveDetail,
    AnlzTagReq,
    AnlzTag,
    Unavailable,
    Unknown(u16),
}

impl MessageType {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0x0000 => MessageType::Setup,
            0x0100 => MessageType::Teardown,
            0x4000 => MessageType::MenuAvailable,
            0x4001 => MessageType::MenuHeader,
            0x4101 => MessageType::MenuItem,
            0x4201 => MessageType::MenuFooter,
            0x3000 => MessageType::RenderMenuReq,
            0x1300 => MessageType::SearchMenu,
            0x2002 => MessageType::TrackMetadataReq,
            0x2104 => MessageType::CueListReq,
            0x2004 => MessageType::WavePreviewReq,
            0x4402 => MessageType::WavePreview,
            0x2904 => MessageType::WaveDetailReq,
            0x4a02 => MessageType::WaveDetail,
            0x2c04 => MessageType::AnlzTagReq,
            0x4f02 => MessageType::AnlzTag,
            0x4003 => MessageType::Unavailable,
            other => MessageType::Unknown(other),
        }
    }

    pub fn to_u16(self) -> u16 {
        match self {
            MessageType::Setup => 0x0000,
            MessageType::Teardown => 0x0100,
            MessageType::MenuAvailable => 0x4000,
            MessageType::MenuHeader => 0x4001,
            MessageType::MenuItem => 0x4101,
            MessageType::MenuFooter => 0x4201,
            MessageType::RenderMenuReq => 0x3000,
            MessageType::SearchMenu => 0x1300,
            MessageType::TrackMetadataReq => 0x2002,
            MessageType::CueListReq => 0x2104,
            MessageType::WavePreviewReq => 0x2004,
            MessageType::WavePreview => 0x4402,
            MessageType::WaveDetailReq => 0x2904,
            MessageType::WaveDetail => 0x4a02,
            MessageType::AnlzTagReq => 0x2c04,
            MessageType::AnlzTag => 0x4f02,
            MessageType::Unavailable => 0x4003,
            MessageType::Unknown(v) => v,
        }
    }
}

/// A fully decoded (or to-be-encoded) DbServer message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub transaction: u32,
    pub message_type: MessageType,
    pub arguments: Vec<Field>,
}

impl Message {
    pub fn new(transaction: u32, message_type: MessageType, arguments: Vec<Field>) -> Self {
        Self {
            transaction,
            message_type,
            arguments,
        }
    }

    /// Encode this message to its wire form.
    pub fn encode(&self) -> Result<Bytes, FrameError> {
        if self.arguments.len() > MAX_ARGS as usize {
            return Err(FrameError::TooManyArguments(self.arguments.len() as u8));
        }

        let mut out = BytesMut::new();
        Field::number(4, MESSAGE_START).encode(&mut out);
        Field::number(4, self.transaction).encode(&mut out);
        Field::number(2, self.message_type.to_u16() as u32).encode(&mut out);
        Field::number(1, self.arguments.len() as u32).encode(&mut out);

        let mut sidecar = [0u8; MAX_ARGS as usize];
        for (i, arg) in self.arguments.iter().enumerate() {
            sidecar[i] = arg.argument_tag();
        }
        Field::Binary(Bytes::copy_from_slice(&sidecar)).encode(&mut out);

        for arg in &self.arguments {
            arg.encode(&mut out);
        }

        Ok(out.freeze())
    }

    /// Decode one message from the front of `buf`. Returns the message and
    /// the number of bytes consumed.
    pub fn decode(buf: &[u8]) -> Result<(Message, usize), FrameError> {
        let mut pos = 0usize;

        let (start, n) = Field::decode(&buf[pos..])?;
        pos += n;
        let start = start.as_number().unwrap_or(0);
        if start != MESSAGE_START {
            return Err(FrameError::BadMessageStart(start));
        }

        let (txn, n) = Field::decode(&buf[pos..])?;
        pos += n;
        let transaction = txn.as_number().unwrap_or(0);

        let (ty, n) = Field::decode(&buf[pos..])?;
        pos += n;
        let message_type = MessageType::from_u16(ty.as_number().unwrap_or(0) as u16);

        let (argc_field, n) = Field::decode(&buf[pos..])?;
        pos += n;
        let argc = argc_field.as_number().unwrap_or(0) as u8;
        if argc > MAX_ARGS {
            return Err(FrameError::TooManyArguments(argc));
        }

        let (sidecar_field, n) = Field::decode(&buf[pos..])?;
        pos += n;
        let sidecar = sidecar_field
            .as_binary()
            .ok_or(FrameError::BadSidecarLength(0))?;
        if sidecar.len() != MAX_ARGS as usize {
            return Err(FrameError::BadSidecarLength(sidecar.len()));
        }

        let mut arguments = Vec::with_capacity(argc as usize);
        for i in 0..argc as usize {
            let expected_tag = sidecar[i];

            // Empty-binary elision: if the sidecar calls for a binary
            // argument and the immediately preceding argument was a number
            // field with value 0, no bytes are consumed here — an empty
            // binary is synthesized instead.
            let prev_was_zero_number = i > 0
                && matches!(arguments.get(i - 1), Some(Field::Number { value: 0, .. }));
            if expected_tag == ARG_TAG_BINARY && prev_was_zero_number {
                arguments.push(Field::Binary(Bytes::new()));
                continue;
            }

            let (field, n) = Field::decode(&buf[pos..])?;
            let tag = field.argument_tag();
            if tag != expected_tag {
                return Err(FrameError::ArgumentTagMismatch {
                    index: i,
                    tag,
                    expected: expected_tag,
                });
            }
            pos += n;
            arguments.push(field);
        }

        if arguments.len() != argc as usize {
            return Err(FrameError::ArgCountMismatch {
                expected: arguments.len(),
                argc,
            });
        }

        Ok((
            Message {
                transaction,
                message_type,
                arguments,
            },
            pos,
        ))
    }
}

/// Pack the 32-bit "requesting-menu-slot-type" value.
pub fn pack_rmst(requesting_player: u8, menu_id: u8, slot: u8, track_type: u8) -> u32 {
    ((requesting_player as u32) << 24)
        | ((menu_id as u32) << 16)
        | ((slot as u32) << 8)
        | (track_type as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn setup_request_roundtrip() {
        // S4: SETUP_REQ, transaction=1, one NumberField(5, size=4).
        let msg = Message::new(1, MessageType::Setup, vec![Field::number(4, 5)]);
        let encoded = msg.encode().unwrap();
        let (decoded, consumed) = Message::decode(&encoded).unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(decoded.transaction, 1);
        assert_eq!(decoded.message_type.to_u16(), 0x0000);
        assert_eq!(decoded.arguments.len(), 1);
        assert_eq!(decoded.arguments[0].as_number(), Some(5));
    }

    #[test]
    fn unknown_message_type_is_retained_numerically() {
        let msg = Message::new(7, MessageType::from_u16(0x9999), vec![]);
        let encoded = msg.encode().unwrap();
        let (decoded, _) = Message::decode(&encoded).unwrap();
        assert_eq!(decoded.message_type.to_u16(), 0x9999);
        assert!(matches!(decoded.message_type, MessageType::Unknown(0x9999)));
    }

    #[test]
    fn rejects_too_many_arguments() {
        let args = (0..13).map(|i| Field::number(1, i)).collect();
        let msg = Message::new(1, MessageType::Setup, args);
        let err = msg.encode().unwrap_err();
        assert!(matches!(err, FrameError::TooManyArguments(13)));
    }

    #[test]
    fn rejects_bad_message_start() {
        let mut buf = BytesMut::new();
        Field::number(4, 0xdeadbeef).encode(&mut buf); // wrong start marker
        Field::number(4, 1).encode(&mut buf);
        Field::number(2, 0).encode(&mut buf);
        Field::number(1, 0).encode(&mut buf);
        Field::Binary(Bytes::copy_from_slice(&[0u8; 12])).encode(&mut buf);
        let err = Message::decode(&buf).unwrap_err();
        assert!(matches!(err, FrameError::BadMessageStart(0xdeadbeef)));
    }

    #[test]
    fn empty_binary_elision_on_decode() {
        // Build by hand: sidecar says arg0 = number, arg1 = binary.
        // arg0 = Number(4, 0). Per the elision rule, arg1's binary bytes
        // are omitted from the wire entirely.
        let mut buf = BytesMut::new();
        Field::number(4, MESSAGE_START).encode(&mut buf);
        Field::number(4, 42).encode(&mut buf);
        Field::number(2, 0x4000).encode(&mut buf);
        Field::number(1, 2).encode(&mut buf);
        let mut sidecar = [0u8; 12];
        sidecar[0] = ARG_TAG_NUMBER;
        sidecar[1] = ARG_TAG_BINARY;
        Field::Binary(Bytes::copy_from_slice(&sidecar)).encode(&mut buf);
        Field::number(4, 0).encode(&mut buf); // arg0: number field, value 0
        // arg1 intentionally omitted from the wire.

        let (decoded, consumed) = Message::decode(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(decoded.arguments.len(), 2);
        assert_eq!(decoded.arguments[0].as_number(), Some(0));
        assert_eq!(decoded.arguments[1].as_binary().unwrap().len(), 0);
    }

    #[test]
    fn rmst_packs_player_menu_slot_and_track_type() {
        let rmst = pack_rmst(3, 1, 2, 0);
        assert_eq!(rmst, (3u32 << 24) | (1u32 << 16) | (2u32 << 8));
    }

    #[test]
    fn argument_tag_mismatch_is_rejected() {
        let mut buf = BytesMut::new();
        Field::number(4, MESSAGE_START).encode(&mut buf);
        Field::number(4, 1).encode(&mut buf);
        Field::number(2, 0).encode(&mut buf);
        Field::number(1, 1).encode(&mut buf);
        let mut sidecar = [0u8; 12];
        sidecar[0] = ARG_TAG_STRING; // declare a string...
        Field::Binary(Bytes::copy_from_slice(&sidecar)).encode(&mut buf);
        Field::number(4, 7).encode(&mut buf); // ...but send a number.
        let err = Message::decode(&buf).unwrap_err();
        assert!(matches!(err, FrameError::ArgumentTagMismatch { index: 0, .. }));
    }
}
