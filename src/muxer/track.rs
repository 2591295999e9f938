//! Track registration and per-track sequence state
//!
//! Each video track remembers the last SPS and PPS it saw and whether the
//! matching sequence header has gone out. The state is owned by the producer
//! side only; the network worker never sees it.

use std::fmt;

use bytes::Bytes;

/// Opaque track identifier returned by track registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId(pub(crate) u32);

impl TrackId {
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Codec of a registered track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackCodec {
    /// H.264/AVC video
    Avc,
    /// AAC audio (no muxing path yet)
    Aac,
}

impl fmt::Display for TrackCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackCodec::Avc => write!(f, "AVC"),
            TrackCodec::Aac => write!(f, "AAC"),
        }
    }
}

/// Track format supplied by the encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackFormat {
    pub codec: TrackCodec,
    pub width: u32,
    pub height: u32,
}

impl TrackFormat {
    /// An AVC video format
    pub fn avc(width: u32, height: u32) -> Self {
        Self {
            codec: TrackCodec::Avc,
            width,
            height,
        }
    }
}

/// SPS/PPS bookkeeping for one video track
#[derive(Debug, Clone, Default)]
pub struct TrackState {
    sps: Bytes,
    pps: Bytes,
    sps_changed: bool,
    pps_changed: bool,
    sequence_header_sent: bool,
}

impl TrackState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an SPS. Returns true if it differs from the stored one.
    pub fn observe_sps(&mut self, sps: &[u8]) -> bool {
        if self.sps == sps {
            return false;
        }
        self.sps = Bytes::copy_from_slice(sps);
        self.sps_changed = true;
        true
    }

    /// Record a PPS. Returns true if it differs from the stored one.
    pub fn observe_pps(&mut self, pps: &[u8]) -> bool {
        if self.pps == pps {
            return false;
        }
        self.pps = Bytes::copy_from_slice(pps);
        self.pps_changed = true;
        true
    }

    /// Whether a (new) sequence header is due and can be built
    pub fn should_emit_sequence_header(&self) -> bool {
        let due = !self.sequence_header_sent || self.sps_changed || self.pps_changed;
        due && !self.sps.is_empty() && !self.pps.is_empty()
    }

    /// Record that the current SPS/PPS went out as a sequence header
    pub fn mark_sequence_header_sent(&mut self) {
        self.sps_changed = false;
        self.pps_changed = false;
        self.sequence_header_sent = true;
    }

    /// Whether slice data may be packaged
    pub fn may_emit_ibp(&self) -> bool {
        self.sequence_header_sent
    }

    pub fn sps(&self) -> &Bytes {
        &self.sps
    }

    pub fn pps(&self) -> &Bytes {
        &self.pps
    }

    pub fn sps_changed(&self) -> bool {
        self.sps_changed
    }

    pub fn pps_changed(&self) -> bool {
        self.pps_changed
    }

    pub fn sequence_header_sent(&self) -> bool {
        self.sequence_header_sent
    }
}
