use std::fmt;

/// The two string fields of a frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameField {
    ChannelId,
    EventName,
}

impl fmt::Display for FrameField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameField::ChannelId => f.write_str("channel id"),
            FrameField::EventName => f.write_str("event name"),
        }
    }
}

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    /// The message ends before the header or a declared field does.
    #[error("frame too short ({len} bytes, need {needed})")]
    TooShort { len: usize, needed: usize },

    /// A declared field length exceeds the protocol maximum.
    #[error("{field} length {len} exceeds maximum of {max} bytes")]
    FieldTooLarge {
        field: FrameField,
        len: usize,
        max: usize,
    },

    /// The channel id decoded to an empty string.
    #[error("missing channel id")]
    MissingChannelId,

    /// The event name decoded to an empty string.
    #[error("missing event name")]
    MissingEventName,

    /// A header field is not valid UTF-8.
    #[error("{field} is not valid UTF-8")]
    InvalidUtf8 { field: FrameField },

    /// A field is too long to describe with a 32-bit length.
    #[error("{field} length {len} does not fit the 32-bit length field")]
    LengthOverflow { field: FrameField, len: usize },
}

pub type Result<T> = std::result::Result<T, FrameError>;
