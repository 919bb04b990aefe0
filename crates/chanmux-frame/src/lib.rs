//! Named-channel, named-event message framing.
//!
//! Every transport message carries exactly one frame:
//! - a 4-byte little-endian channel id length
//! - a 4-byte little-endian event name length
//! - the channel id, the event name, then the payload
//!
//! Channel ids and event names are UTF-8 strings of at most 256 bytes. The
//! payload is opaque and runs to the end of the message.

pub mod codec;
pub mod error;
pub mod events;

pub use codec::{decode_frame, encode_frame, Frame, HEADER_SIZE, MAX_FIELD_LEN};
pub use error::{FrameError, FrameField, Result};
