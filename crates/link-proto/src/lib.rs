//! Wire codec and data model for the DJ Link protocol.
//!
//! This crate knows how to read and write bytes: tagged fields, framed
//! DbServer messages, and fixed-layout beat announcements. It owns no
//! sockets and no async runtime — that lives in `beatlink`, which depends
//! on this crate for everything wire-shaped.

pub mod beat;
pub mod constants;
pub mod error;
pub mod field;
pub mod menu;
pub mod message;
pub mod pitch;

pub use beat::Beat;
pub use error::{BeatError, FieldError, FrameError};
pub use field::Field;
pub use menu::{MenuItemType, MenuTarget};
pub use message::{Message, MessageType};
