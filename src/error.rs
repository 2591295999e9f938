//! Error types
//!
//! Errors are grouped by the stage that raises them:
//! - [`MediaError`]: Annex-B scanning and AVC packaging, scoped to one access unit
//! - [`DeliveryError`]: the delivery queue and the byte sink, scoped to the session

use std::fmt;
use std::io;

use crate::muxer::track::{TrackCodec, TrackId};

/// Crate error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bitstream or packaging error
    #[error("media error: {0}")]
    Media(#[from] MediaError),

    /// Delivery queue or sink error
    #[error("delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    /// No track registered under this id
    #[error("unknown track: {0}")]
    UnknownTrack(TrackId),

    /// Codec has no muxing path
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(TrackCodec),

    /// A track of this codec is already registered
    #[error("track already registered for codec: {0}")]
    DuplicateTrack(TrackCodec),

    /// `start` called on a running session
    #[error("session already started")]
    AlreadyStarted,

    /// `start` called outside a tokio runtime
    #[error("no tokio runtime available to spawn the network worker")]
    NoRuntime,

    /// Underlying I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors raised while turning an encoder buffer into FLV tags
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaError {
    /// No Annex-B start code where one was required
    #[error("annexb start code not found at offset {offset} ({remaining} bytes remaining)")]
    MalformedBitstream { offset: usize, remaining: usize },

    /// SPS/PPS unusable for an AVCDecoderConfigurationRecord
    #[error("invalid parameter set: {0}")]
    InvalidParameterSet(String),

    /// AVC video tag body could not be parsed
    #[error("invalid AVC packet")]
    InvalidAvcPacket,

    /// Tag body does not fit the 24-bit DataSize field
    #[error("tag body of {size} bytes exceeds the FLV limit of {max}")]
    TagTooLarge { size: usize, max: usize },

    /// Buffer metadata points outside the buffer
    #[error("buffer region {offset}+{size} exceeds capacity {capacity}")]
    BufferOutOfBounds {
        offset: usize,
        size: usize,
        capacity: usize,
    },
}

/// Errors raised on the delivery side of the session
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The queue refused a message
    #[error("message rejected: {0}")]
    QueueRejected(RejectReason),

    /// Writing to the byte sink failed; the session is over
    #[error("sink write failed ({kind}): {message}")]
    SinkWriteFailure { kind: io::ErrorKind, message: String },
}

impl DeliveryError {
    pub(crate) fn sink(err: &io::Error) -> Self {
        DeliveryError::SinkWriteFailure {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Why the delivery queue refused a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Session not started, no consumer will ever read it
    NotStarted,
    /// Session stopped
    Stopped,
    /// Queue at capacity
    Full,
    /// The worker hit a sink failure
    SinkFailed,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::NotStarted => write!(f, "session not started"),
            RejectReason::Stopped => write!(f, "session stopped"),
            RejectReason::Full => write!(f, "queue full"),
            RejectReason::SinkFailed => write!(f, "sink failed"),
        }
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;
