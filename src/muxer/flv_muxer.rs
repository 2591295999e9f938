//! Access-unit assembly
//!
//! Turns one encoder output buffer (an Annex-B access unit) into at most two
//! delivery messages, in this order:
//!
//! ```text
//!   SPS PPS [SEI] IDR          ──► [ seq header (key) ] [ NALU (key) ]
//!   [SEI] non-IDR              ──► [ NALU (inter) ]
//!   SPS' PPS IDR (SPS changed) ──► [ seq header (key) ] [ NALU (key) ]
//! ```
//!
//! A slice is only packaged once its track's sequence header has been
//! accepted by the queue. Until then the slice data is dropped.

use bytes::BytesMut;

use crate::delivery::queue::{DeliveryMessage, MessageSink};
use crate::error::{Error, MediaError, RejectReason, Result};
use crate::media::annexb::split_units;
use crate::media::flv::{VideoFrameType, MAX_TAG_DATA_SIZE};
use crate::media::h264::{level_string, profile_name, AvcPacketType, NaluClass};

use super::packetizer::{mux_avc_to_flv_tag, mux_sequence_header, put_ibp_nalu, AVC_HEADER_SIZE};
use super::track::{TrackCodec, TrackFormat, TrackId, TrackState};

/// First id handed out by track registration
const FIRST_TRACK_ID: u32 = 100;

/// Metadata the encoder attaches to each output buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferInfo {
    /// Start of the valid region within the buffer
    pub offset: usize,
    /// Number of valid bytes
    pub size: usize,
    /// Presentation timestamp in microseconds
    pub presentation_time_us: i64,
    /// Buffer carries codec configuration (SPS/PPS) only
    pub is_config: bool,
}

impl BufferInfo {
    pub fn new(size: usize, presentation_time_us: i64) -> Self {
        Self {
            offset: 0,
            size,
            presentation_time_us,
            is_config: false,
        }
    }

    /// Set the offset of the valid region
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Mark the buffer as codec configuration
    pub fn config(mut self) -> Self {
        self.is_config = true;
        self
    }
}

/// The valid region of an encoder buffer, borrowed for one call
#[derive(Debug, Clone, Copy)]
pub struct RawFrameBuffer<'a> {
    pub data: &'a [u8],
    pub presentation_time_us: i64,
    pub is_config: bool,
}

impl<'a> RawFrameBuffer<'a> {
    /// Cut the valid region described by `info` out of `buffer`
    pub fn new(buffer: &'a [u8], info: &BufferInfo) -> std::result::Result<Self, MediaError> {
        let data = info
            .offset
            .checked_add(info.size)
            .and_then(|end| buffer.get(info.offset..end))
            .ok_or(MediaError::BufferOutOfBounds {
                offset: info.offset,
                size: info.size,
                capacity: buffer.len(),
            })?;

        Ok(Self {
            data,
            presentation_time_us: info.presentation_time_us,
            is_config: info.is_config,
        })
    }

    /// Presentation timestamp in milliseconds, as used for both pts and dts
    pub fn timestamp_ms(&self) -> u32 {
        (self.presentation_time_us.max(0) / 1000) as u32
    }
}

/// What happened to one submitted access unit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleReport {
    /// The access unit contained an IDR slice
    pub keyframe: bool,
    /// A sequence header tag was accepted by the queue
    pub sequence_header_queued: bool,
    /// A NALU tag was accepted by the queue
    pub frame_queued: bool,
    /// Slice data was discarded because no sequence header had gone out
    pub frame_dropped: bool,
    /// Messages the queue refused, with the reason
    pub rejected: Vec<RejectReason>,
}

#[derive(Debug)]
struct Track {
    id: TrackId,
    format: TrackFormat,
    state: TrackState,
}

/// H.264 Annex-B to FLV muxer
///
/// Owns the per-track sequence state; runs entirely on the producer side.
#[derive(Debug)]
pub struct FlvMuxer {
    tracks: Vec<Track>,
    next_id: u32,
}

impl Default for FlvMuxer {
    fn default() -> Self {
        Self::new()
    }
}

impl FlvMuxer {
    pub fn new() -> Self {
        Self {
            tracks: Vec::new(),
            next_id: FIRST_TRACK_ID,
        }
    }

    /// Register a track and get its id.
    ///
    /// Only a single AVC video track is supported.
    pub fn register_track(&mut self, format: TrackFormat) -> Result<TrackId> {
        if format.codec != TrackCodec::Avc {
            return Err(Error::UnsupportedCodec(format.codec));
        }
        if self.tracks.iter().any(|t| t.format.codec == format.codec) {
            return Err(Error::DuplicateTrack(format.codec));
        }

        let id = TrackId(self.next_id);
        self.next_id += 1;
        self.tracks.push(Track {
            id,
            format,
            state: TrackState::new(),
        });

        tracing::info!(
            track = %id,
            codec = %format.codec,
            width = format.width,
            height = format.height,
            "Track registered"
        );
        Ok(id)
    }

    pub fn track_format(&self, id: TrackId) -> Option<&TrackFormat> {
        self.track(id).map(|t| &t.format)
    }

    pub fn track_state(&self, id: TrackId) -> Option<&TrackState> {
        self.track(id).map(|t| &t.state)
    }

    /// Forget all SPS/PPS state; registrations stay
    pub fn reset_tracks(&mut self) {
        for track in &mut self.tracks {
            track.state = TrackState::new();
        }
    }

    fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }

    /// Package one Annex-B access unit and offer the resulting tags to `sink`.
    ///
    /// The whole buffer is scanned before any state changes, so a malformed
    /// buffer leaves the track exactly as it was and enqueues nothing.
    /// Queue rejections are reported in the [`SampleReport`], not as errors.
    pub fn write_video_sample<S>(
        &mut self,
        track_id: TrackId,
        buffer: &[u8],
        info: &BufferInfo,
        sink: &S,
    ) -> Result<SampleReport>
    where
        S: MessageSink + ?Sized,
    {
        let track = self
            .tracks
            .iter_mut()
            .find(|t| t.id == track_id)
            .ok_or(Error::UnknownTrack(track_id))?;

        let frame = RawFrameBuffer::new(buffer, info)?;
        if info.offset > 0 {
            tracing::debug!(
                track = %track_id,
                size = info.size,
                offset = info.offset,
                "Encoded frame with non-zero offset"
            );
        }

        let units = split_units(frame.data)?;
        let ts = frame.timestamp_ms();

        let mut report = SampleReport::default();
        let mut ibp = BytesMut::with_capacity(frame.data.len() + 4 * units.len());
        let mut ibp_count = 0usize;

        for unit in &units {
            let Some(class) = NaluClass::classify(unit.data) else {
                continue;
            };
            match class {
                NaluClass::AccessUnitDelimiter => {}
                NaluClass::Sps => {
                    if track.state.observe_sps(unit.data) {
                        tracing::debug!(track = %track_id, size = unit.size(), "SPS changed");
                    }
                }
                NaluClass::Pps => {
                    if track.state.observe_pps(unit.data) {
                        tracing::debug!(track = %track_id, size = unit.size(), "PPS changed");
                    }
                }
                NaluClass::Idr => {
                    report.keyframe = true;
                    put_ibp_nalu(&mut ibp, unit.data);
                    ibp_count += 1;
                }
                NaluClass::Slice => {
                    put_ibp_nalu(&mut ibp, unit.data);
                    ibp_count += 1;
                }
            }
        }

        let frame_type = if report.keyframe {
            VideoFrameType::Keyframe
        } else {
            VideoFrameType::InterFrame
        };

        let body_size = AVC_HEADER_SIZE + ibp.len();
        if body_size > MAX_TAG_DATA_SIZE {
            tracing::warn!(
                track = %track_id,
                dts = ts,
                size = body_size,
                "Access unit too large for one FLV tag"
            );
            return Err(MediaError::TagTooLarge {
                size: body_size,
                max: MAX_TAG_DATA_SIZE,
            }
            .into());
        }

        // A header that is due but did not make it into the queue blocks this
        // access unit's slices, so they never precede their parameter sets.
        let mut header_blocked = false;

        if track.state.should_emit_sequence_header() {
            let record = match mux_sequence_header(track.state.sps(), track.state.pps()) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(track = %track_id, error = %e, "Cannot build sequence header");
                    return Err(e.into());
                }
            };

            let tag = mux_avc_to_flv_tag(
                &record,
                VideoFrameType::Keyframe,
                AvcPacketType::SequenceHeader,
                ts,
                ts,
            );
            let size = tag.size();
            match sink.offer(DeliveryMessage::new(track_id, VideoFrameType::Keyframe, tag)) {
                Ok(()) => {
                    track.state.mark_sequence_header_sent();
                    report.sequence_header_queued = true;
                    let sps = track.state.sps();
                    tracing::info!(
                        track = %track_id,
                        dts = ts,
                        size,
                        profile = profile_name(sps[1]),
                        level = %level_string(sps[3]),
                        "Queued AVC sequence header"
                    );
                }
                Err(reason) => {
                    tracing::warn!(track = %track_id, dts = ts, %reason, "Sequence header rejected");
                    report.rejected.push(reason);
                    header_blocked = true;
                }
            }
        }

        if ibp_count == 0 {
            return Ok(report);
        }

        if header_blocked || !track.state.may_emit_ibp() {
            report.frame_dropped = true;
            tracing::warn!(
                track = %track_id,
                dts = ts,
                nalus = ibp_count,
                "Dropped frame, no sequence header sent yet"
            );
            return Ok(report);
        }

        let tag = mux_avc_to_flv_tag(&ibp, frame_type, AvcPacketType::Nalu, ts, ts);
        let size = tag.size();
        match sink.offer(DeliveryMessage::new(track_id, frame_type, tag)) {
            Ok(()) => {
                report.frame_queued = true;
                tracing::trace!(track = %track_id, dts = ts, size, nalus = ibp_count, "Queued frame");
            }
            Err(reason) => {
                tracing::warn!(track = %track_id, dts = ts, size, %reason, "Frame rejected");
                report.rejected.push(reason);
            }
        }

        Ok(report)
    }
}
