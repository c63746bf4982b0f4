//! Wire framing for the daemon's Unix domain socket protocol (§4.F, §6).
//!
//! Frame shape: `[header][body][extra]`. The header is fixed-size and
//! host-native (the socket is local, so there is no cross-endian concern).
//! `body` is exactly the fixed-size payload declared for `type_id`; `extra`
//! is an optional variable-length tail (paths, version/reason strings).
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod codec;
mod error;
mod io;
mod message_codec;

pub use codec::{Frame, FrameHeader, HEADER_LEN, MAGIC, MAX_FRAME};
pub use error::WireError;
pub use io::{read_frame, write_frame};
pub use message_codec::{decode_message, encode_message, encode_parts};

#[cfg(test)]
mod proptests;
