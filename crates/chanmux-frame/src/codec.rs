use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, FrameField, Result};

/// Frame header: channel id length (4) + event name length (4) = 8 bytes.
pub const HEADER_SIZE: usize = 8;

/// Maximum decoded length of the channel id and of the event name.
pub const MAX_FIELD_LEN: usize = 256;

/// One multiplexed message: which channel, which event, what payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The channel this message belongs to.
    pub channel_id: String,
    /// The event carried on the channel.
    pub event_name: String,
    /// The message payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(
        channel_id: impl Into<String>,
        event_name: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            event_name: event_name.into(),
            payload: payload.into(),
        }
    }

    /// The total wire size of this frame (header + fields + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.channel_id.len() + self.event_name.len() + self.payload.len()
    }

    /// Encode this frame into a fresh buffer.
    pub fn encode(&self) -> Result<Bytes> {
        let mut dst = BytesMut::with_capacity(self.wire_size());
        encode_frame(&self.channel_id, &self.event_name, &self.payload, &mut dst)?;
        Ok(dst.freeze())
    }
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────┬──────────────┬────────────┬────────────┬──────────┐
/// │ ChannelLen   │ EventLen     │ ChannelId  │ EventName  │ Payload  │
/// │ (4B LE)      │ (4B LE)      │ (UTF-8)    │ (UTF-8)    │ (rest)   │
/// └──────────────┴──────────────┴────────────┴────────────┴──────────┘
/// ```
///
/// The encoder trusts its caller to keep ids and names short; the
/// [`MAX_FIELD_LEN`] bound is enforced by [`decode_frame`] only.
pub fn encode_frame(
    channel_id: &str,
    event_name: &str,
    payload: &[u8],
    dst: &mut BytesMut,
) -> Result<()> {
    let channel_len = wire_len(FrameField::ChannelId, channel_id)?;
    let event_len = wire_len(FrameField::EventName, event_name)?;

    dst.reserve(HEADER_SIZE + channel_id.len() + event_name.len() + payload.len());
    dst.put_u32_le(channel_len);
    dst.put_u32_le(event_len);
    dst.put_slice(channel_id.as_bytes());
    dst.put_slice(event_name.as_bytes());
    dst.put_slice(payload);
    Ok(())
}

/// Decode one frame from a complete transport message.
///
/// The payload is a zero-copy slice of `message`.
pub fn decode_frame(message: Bytes) -> Result<Frame> {
    if message.len() < HEADER_SIZE {
        return Err(FrameError::TooShort {
            len: message.len(),
            needed: HEADER_SIZE,
        });
    }

    let mut header = &message[..HEADER_SIZE];
    let channel_len = header.get_u32_le() as usize;
    let event_len = header.get_u32_le() as usize;

    // Bounds first: a hostile length must never drive slicing.
    check_field_len(FrameField::ChannelId, channel_len)?;
    check_field_len(FrameField::EventName, event_len)?;

    let payload_start = HEADER_SIZE + channel_len + event_len;
    if message.len() < payload_start {
        return Err(FrameError::TooShort {
            len: message.len(),
            needed: payload_start,
        });
    }

    let channel_end = HEADER_SIZE + channel_len;
    let channel_id = utf8_field(FrameField::ChannelId, &message[HEADER_SIZE..channel_end])?;
    let event_name = utf8_field(FrameField::EventName, &message[channel_end..payload_start])?;

    if channel_id.is_empty() {
        return Err(FrameError::MissingChannelId);
    }
    if event_name.is_empty() {
        return Err(FrameError::MissingEventName);
    }

    Ok(Frame {
        channel_id,
        event_name,
        payload: message.slice(payload_start..),
    })
}

fn wire_len(field: FrameField, value: &str) -> Result<u32> {
    u32::try_from(value.len()).map_err(|_| FrameError::LengthOverflow {
        field,
        len: value.len(),
    })
}

fn check_field_len(field: FrameField, len: usize) -> Result<()> {
    if len > MAX_FIELD_LEN {
        return Err(FrameError::FieldTooLarge {
            field,
            len,
            max: MAX_FIELD_LEN,
        });
    }
    Ok(())
}

fn utf8_field(field: FrameField, raw: &[u8]) -> Result<String> {
    std::str::from_utf8(raw)
        .map(str::to_owned)
        .map_err(|_| FrameError::InvalidUtf8 { field })
}
