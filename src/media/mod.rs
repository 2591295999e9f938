//! Media handling for HTTP-FLV publishing
//!
//! This module provides:
//! - Annex-B start-code scanning
//! - H.264/AVC NAL classification and AVC tag inspection
//! - FLV tag types and byte-stream framing

pub mod annexb;
pub mod flv;
pub mod h264;

pub use annexb::{AnnexbUnit, AnnexbUnits};
pub use flv::{FlvTag, FlvTagType, VideoCodec, VideoFrameType};
pub use h264::{AvcConfig, AvcPacketType, AvcVideoPacket, NaluClass, NaluType};
