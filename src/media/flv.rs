//! FLV tags and the FLV byte-stream envelope
//!
//! An HTTP-FLV publish is an FLV file written progressively: the file header,
//! then one envelope per tag.
//!
//! FLV Header + PreviousTagSize0:
//! ```text
//! +-----------+---------+----------+----------------+------------------+
//! | "FLV" (3) | Ver (1) | Flags(1) | HeaderSize (4) | PrevTagSize0 (4) |
//! +-----------+---------+----------+----------------+------------------+
//! ```
//!
//! FLV Tag (E.4.1) + PreviousTagSize:
//! ```text
//! +--------+-------------+-----------+-------------+---------+-----------------+
//! | Type(1)| DataSize(3) | TS(3+1)   | StreamID(3) | Data(N) | PrevTagSize (4) |
//! +--------+-------------+-----------+-------------+---------+-----------------+
//! ```
//!
//! Video Data:
//! ```text
//! +----------+----------+
//! | FrameType| CodecID  | CodecData...
//! | (4 bits) | (4 bits) |
//! +----------+----------+
//! ```

use bytes::{BufMut, Bytes, BytesMut};

/// FLV tag header size, excluding the trailing PreviousTagSize
pub const TAG_HEADER_SIZE: usize = 11;

/// Largest tag body the 24-bit DataSize field can describe
pub const MAX_TAG_DATA_SIZE: usize = 0xFF_FFFF;

/// FLV file header size (signature, version, flags, header size)
pub const FILE_HEADER_SIZE: usize = 9;

const FLV_SIGNATURE: &[u8; 3] = b"FLV";
const FLV_VERSION: u8 = 0x01;
const FLAG_AUDIO: u8 = 0x04;
const FLAG_VIDEO: u8 = 0x01;

/// FLV tag type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlvTagType {
    Audio,
    Video,
    Script,
}

impl FlvTagType {
    /// TagType field value
    pub fn code(&self) -> u8 {
        match self {
            FlvTagType::Audio => 8,
            FlvTagType::Video => 9,
            FlvTagType::Script => 18,
        }
    }
}

/// An owned FLV tag body with the metadata needed to frame it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlvTag {
    /// Tag type
    pub tag_type: FlvTagType,
    /// Decode timestamp in milliseconds
    pub timestamp: u32,
    /// Tag body (including codec headers)
    pub data: Bytes,
}

/// Video frame type (upper 4 bits of first byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFrameType {
    /// Keyframe (for AVC, a seekable frame)
    Keyframe = 1,
    /// Inter frame (for AVC, a non-seekable frame)
    InterFrame = 2,
    /// Disposable inter frame (H.263 only)
    DisposableInterFrame = 3,
    /// Generated keyframe (reserved for server use)
    GeneratedKeyframe = 4,
    /// Video info/command frame
    VideoInfoFrame = 5,
}

impl VideoFrameType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match (b >> 4) & 0x0F {
            1 => Some(VideoFrameType::Keyframe),
            2 => Some(VideoFrameType::InterFrame),
            3 => Some(VideoFrameType::DisposableInterFrame),
            4 => Some(VideoFrameType::GeneratedKeyframe),
            5 => Some(VideoFrameType::VideoInfoFrame),
            _ => None,
        }
    }

    pub fn is_keyframe(&self) -> bool {
        matches!(
            self,
            VideoFrameType::Keyframe | VideoFrameType::GeneratedKeyframe
        )
    }
}

/// Video codec ID (lower 4 bits of first byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    /// Sorenson H.263
    SorensonH263 = 2,
    /// Screen video
    ScreenVideo = 3,
    /// VP6
    Vp6 = 4,
    /// VP6 with alpha
    Vp6Alpha = 5,
    /// Screen video v2
    ScreenVideoV2 = 6,
    /// AVC (H.264)
    Avc = 7,
}

impl VideoCodec {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b & 0x0F {
            2 => Some(VideoCodec::SorensonH263),
            3 => Some(VideoCodec::ScreenVideo),
            4 => Some(VideoCodec::Vp6),
            5 => Some(VideoCodec::Vp6Alpha),
            6 => Some(VideoCodec::ScreenVideoV2),
            7 => Some(VideoCodec::Avc),
            _ => None,
        }
    }
}

impl FlvTag {
    /// Create a new video tag
    pub fn video(timestamp: u32, data: Bytes) -> Self {
        Self {
            tag_type: FlvTagType::Video,
            timestamp,
            data,
        }
    }

    /// Check if this is a video tag
    pub fn is_video(&self) -> bool {
        self.tag_type == FlvTagType::Video
    }

    /// For video tags, get the frame type
    pub fn video_frame_type(&self) -> Option<VideoFrameType> {
        if self.is_video() && !self.data.is_empty() {
            VideoFrameType::from_byte(self.data[0])
        } else {
            None
        }
    }

    /// Check if this is a keyframe
    pub fn is_keyframe(&self) -> bool {
        self.video_frame_type()
            .map(|ft| ft.is_keyframe())
            .unwrap_or(false)
    }

    /// Check if this is an AVC sequence header
    pub fn is_avc_sequence_header(&self) -> bool {
        if self.is_video() && self.data.len() >= 2 {
            let codec = VideoCodec::from_byte(self.data[0]);
            codec == Some(VideoCodec::Avc) && self.data[1] == 0
        } else {
            false
        }
    }

    /// Get the size of the tag data
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Size of the tag on the wire, envelope and PreviousTagSize included
    pub fn encoded_len(&self) -> usize {
        TAG_HEADER_SIZE + self.data.len() + 4
    }
}

/// Encode the FLV file header followed by PreviousTagSize0
pub fn encode_file_header(has_audio: bool, has_video: bool) -> Bytes {
    let mut flags = 0;
    if has_audio {
        flags |= FLAG_AUDIO;
    }
    if has_video {
        flags |= FLAG_VIDEO;
    }

    let mut buf = BytesMut::with_capacity(FILE_HEADER_SIZE + 4);
    buf.put_slice(FLV_SIGNATURE);
    buf.put_u8(FLV_VERSION);
    buf.put_u8(flags);
    buf.put_u32(FILE_HEADER_SIZE as u32);
    buf.put_u32(0);
    buf.freeze()
}

/// Encode one tag as it appears in the byte stream
///
/// The timestamp is split into its lower 24 bits and the extension byte; the
/// stream id is always 0 and PreviousTagSize is `11 + data size`.
pub fn encode_tag(tag: &FlvTag) -> Bytes {
    let mut buf = BytesMut::with_capacity(tag.encoded_len());
    encode_tag_into(&mut buf, tag);
    buf.freeze()
}

/// Append one encoded tag to `buf`
///
/// The body must not exceed [`MAX_TAG_DATA_SIZE`]; the muxer refuses larger
/// access units before they are queued.
pub fn encode_tag_into(buf: &mut BytesMut, tag: &FlvTag) {
    let data_size = tag.data.len() as u32;

    buf.reserve(tag.encoded_len());
    buf.put_u8(tag.tag_type.code());
    put_u24(buf, data_size);
    put_u24(buf, tag.timestamp & 0x00FF_FFFF);
    buf.put_u8((tag.timestamp >> 24) as u8);
    put_u24(buf, 0);
    buf.put_slice(&tag.data);
    buf.put_u32(TAG_HEADER_SIZE as u32 + data_size);
}

fn put_u24(buf: &mut BytesMut, v: u32) {
    buf.put_u8((v >> 16) as u8);
    buf.put_u8((v >> 8) as u8);
    buf.put_u8(v as u8);
}
