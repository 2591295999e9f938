//! H.264 to FLV muxing
//!
//! - [`track`]: track registration and SPS/PPS state
//! - [`packetizer`]: AVC payload and tag construction
//! - [`flv_muxer`]: per-access-unit assembly feeding the delivery queue

pub mod flv_muxer;
pub mod packetizer;
pub mod track;

pub use flv_muxer::{BufferInfo, FlvMuxer, RawFrameBuffer, SampleReport};
pub use packetizer::{mux_avc_to_flv_tag, mux_ibp_nalu, mux_sequence_header};
pub use track::{TrackCodec, TrackFormat, TrackId, TrackState};
