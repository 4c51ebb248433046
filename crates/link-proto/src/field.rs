//! Tagged-field codec.
//!
//! Every value on the wire is a type-tagged field: a one-byte discriminant
//! followed by a payload whose shape the tag determines. This module only
//! knows how to read and write single fields; message-level framing
//! (including the empty-binary elision edge case, which needs the sidecar
//! context) lives in [`crate::message`].

use crate::error::FieldError;
use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};

/// Type tag for a 1-byte number field.
pub const TAG_NUMBER_1: u8 = 0x0f;
/// Type tag for a 2-byte number field.
pub const TAG_NUMBER_2: u8 = 0x10;
/// Type tag for a 4-byte number field.
pub const TAG_NUMBER_4: u8 = 0x11;
/// Type tag for a binary field.
pub const TAG_BINARY: u8 = 0x14;
/// Type tag for a UTF-16BE string field.
pub const TAG_STRING: u8 = 0x26;

/// Argument-tag sidecar value for any number field.
pub const ARG_TAG_NUMBER: u8 = 0x06;
/// Argument-tag sidecar value for a string field.
pub const ARG_TAG_STRING: u8 = 0x02;
/// Argument-tag sidecar value for a binary field.
pub const ARG_TAG_BINARY: u8 = 0x03;

/// A single decoded tagged field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    /// A big-endian unsigned integer stored in 1, 2, or 4 bytes on the wire.
    Number { size: u8, value: u32 },
    /// A length-prefixed opaque byte string.
    Binary(Bytes),
    /// A UTF-16BE string with a trailing U+0000 terminator.
    StringField(String),
}

impl Field {
    /// Build a number field, masking `value` to fit the requested wire size.
    pub fn number(size: u8, value: u32) -> Self {
        let mask: u64 = match size {
            1 => 0xff,
            2 => 0xffff,
            4 => 0xffff_ffff,
            _ => panic!("number field size must be 1, 2, or 4"),
        };
        Field::Number {
            size,
            value: (value as u64 & mask) as u32,
        }
    }

    /// The argument-tag sidecar byte that accompanies this field in a message.
    pub fn argument_tag(&self) -> u8 {
        match self {
            Field::Number { .. } => ARG_TAG_NUMBER,
            Field::Binary(_) => ARG_TAG_BINARY,
            Field::StringField(_) => ARG_TAG_STRING,
        }
    }

    /// Numeric value, for callers that know a field must be a number.
    pub fn as_number(&self) -> Option<u32> {
        match self {
            Field::Number { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn as_binary(&self) -> Option<&Bytes> {
        match self {
            Field::Binary(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            Field::StringField(s) => Some(s),
            _ => None,
        }
    }

    /// Append this field's type tag and payload to `out`.
    pub fn encode(&self, out: &mut BytesMut) {
        match self {
            Field::Number { size, value } => {
                let tag = match size {
                    1 => TAG_NUMBER_1,
                    2 => TAG_NUMBER_2,
                    4 => TAG_NUMBER_4,
                    _ => unreachable!("Field::number enforces size"),
                };
                out.put_u8(tag);
                match size {
                    1 => out.put_u8(*value as u8),
                    2 => out.put_u16(*value as u16),
                    4 => out.put_u32(*value),
                    _ => unreachable!(),
                }
            }
            Field::Binary(bytes) => {
                out.put_u8(TAG_BINARY);
                out.put_u32(bytes.len() as u32);
                out.put_slice(bytes);
            }
            Field::StringField(s) => {
                out.put_u8(TAG_STRING);
                let units = encode_utf16be_terminated(s);
                out.put_u32((units.len() / 2) as u32);
                out.put_slice(&units);
            }
        }
    }

    /// Decode a single tagged field starting at `buf[0]`. Returns the field
    /// and the number of bytes consumed. Does not perform the empty-binary
    /// elision special case; that is a message-level concern.
    pub fn decode(buf: &[u8]) -> Result<(Field, usize), FieldError> {
        let tag = *buf.first().ok_or(FieldError::BufferTooShort {
            needed: 1,
            available: 0,
        })?;
        match tag {
            TAG_NUMBER_1 => {
                require(buf, 2)?;
                Ok((Field::number(1, buf[1] as u32), 2))
            }
            TAG_NUMBER_2 => {
                require(buf, 3)?;
                Ok((Field::number(2, BigEndian::read_u16(&buf[1..3]) as u32), 3))
            }
            TAG_NUMBER_4 => {
                require(buf, 5)?;
                Ok((Field::number(4, BigEndian::read_u32(&buf[1..5])), 5))
            }
            TAG_BINARY => {
                require(buf, 5)?;
                let len = BigEndian::read_u32(&buf[1..5]) as usize;
                require(buf, 5 + len)?;
                Ok((
                    Field::Binary(Bytes::copy_from_slice(&buf[5..5 + len])),
                    5 + len,
                ))
            }
            TAG_STRING => {
                require(buf, 5)?;
                let code_units = BigEndian::read_u32(&buf[1..5]) as usize;
                let byte_len = code_units
                    .checked_mul(2)
                    .ok_or(FieldError::OddStringLength(code_units))?;
                require(buf, 5 + byte_len)?;
                let s = decode_utf16be_terminated(&buf[5..5 + byte_len])?;
                Ok((Field::StringField(s), 5 + byte_len))
            }
            other => Err(FieldError::UnknownTypeTag(other)),
        }
    }
}

fn require(buf: &[u8], needed: usize) -> Result<(), FieldError> {
    if buf.len() < needed {
        Err(FieldError::BufferTooShort {
            needed,
            available: buf.len(),
        })
    } else {
        Ok(())
    }
}

/// Encode a string as UTF-16BE with a trailing U+0000 terminator, emitting
/// surrogate pairs for code points ≥ U+10000.
fn encode_utf16be_terminated(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len() * 2 + 2);
    for unit in s.encode_utf16() {
        out.extend_from_slice(&unit.to_be_bytes());
    }
    out.extend_from_slice(&0u16.to_be_bytes());
    out
}

/// Decode a UTF-16BE byte slice (terminator included) back into a `String`,
/// accepting surrogate pairs.
fn decode_utf16be_terminated(bytes: &[u8]) -> Result<String, FieldError> {
    if bytes.len() % 2 != 0 {
        return Err(FieldError::OddStringLength(bytes.len()));
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| BigEndian::read_u16(c))
        .collect();
    // Strip a single trailing NUL terminator if present.
    let units = match units.last() {
        Some(0) => &units[..units.len() - 1],
        _ => &units[..],
    };
    String::from_utf16(units).map_err(|_| FieldError::UnpairedSurrogate)
}
