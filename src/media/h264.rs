//! H.264/AVC NAL classification and AVC video tag structures
//!
//! Encoders emit Annex-B, while FLV carries H.264 in AVCC format
//! (length-prefixed NAL units). This module holds the NAL type table, the
//! classification used during access-unit assembly, and readers for the AVC
//! video tag body so produced tags can be inspected.
//!
//! AVC Video Packet Structure:
//! ```text
//! +----------+----------+-----------------+-----------------+
//! |FrameType | CodecID  | AVCPacketType   | CompositionTime | Data
//! | (4 bits) | (4 bits) | (1 byte)        | (3 bytes, SI24) |
//! +----------+----------+-----------------+-----------------+
//! ```
//!
//! AVCDecoderConfigurationRecord (sequence header):
//! ```text
//! configurationVersion (1) | AVCProfileIndication (1) | profile_compatibility (1)
//! | AVCLevelIndication (1) | lengthSizeMinusOne (1, lower 2 bits)
//! | numOfSPS (1, lower 5 bits) | { spsLength (2) | spsNALUnit }*
//! | numOfPPS (1) | { ppsLength (2) | ppsNALUnit }*
//! ```

use bytes::{Buf, Bytes};

use crate::error::MediaError;

use super::flv::{VideoCodec, VideoFrameType};

/// AVC packet type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvcPacketType {
    /// Sequence header (AVCDecoderConfigurationRecord)
    SequenceHeader = 0,
    /// NAL units
    Nalu = 1,
    /// End of sequence
    EndOfSequence = 2,
}

impl AvcPacketType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(AvcPacketType::SequenceHeader),
            1 => Some(AvcPacketType::Nalu),
            2 => Some(AvcPacketType::EndOfSequence),
            _ => None,
        }
    }
}

/// NAL unit type (Table 7-1, ISO/IEC 14496-10)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaluType {
    /// Non-IDR slice
    Slice = 1,
    /// Slice data partition A
    SlicePartA = 2,
    /// Slice data partition B
    SlicePartB = 3,
    /// Slice data partition C
    SlicePartC = 4,
    /// IDR slice (keyframe)
    Idr = 5,
    /// Supplemental enhancement information
    Sei = 6,
    /// Sequence parameter set
    Sps = 7,
    /// Picture parameter set
    Pps = 8,
    /// Access unit delimiter
    Aud = 9,
    /// End of sequence
    EndSeq = 10,
    /// End of stream
    EndStream = 11,
    /// Filler data
    Filler = 12,
    /// Sequence parameter set extension
    SpsExt = 13,
    /// Prefix NAL unit
    Prefix = 14,
    /// Subset sequence parameter set
    SubsetSps = 15,
    /// Slice of an auxiliary coded picture
    AuxSlice = 19,
    /// Coded slice extension
    SliceExt = 20,
}

impl NaluType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b & 0x1F {
            1 => Some(NaluType::Slice),
            2 => Some(NaluType::SlicePartA),
            3 => Some(NaluType::SlicePartB),
            4 => Some(NaluType::SlicePartC),
            5 => Some(NaluType::Idr),
            6 => Some(NaluType::Sei),
            7 => Some(NaluType::Sps),
            8 => Some(NaluType::Pps),
            9 => Some(NaluType::Aud),
            10 => Some(NaluType::EndSeq),
            11 => Some(NaluType::EndStream),
            12 => Some(NaluType::Filler),
            13 => Some(NaluType::SpsExt),
            14 => Some(NaluType::Prefix),
            15 => Some(NaluType::SubsetSps),
            19 => Some(NaluType::AuxSlice),
            20 => Some(NaluType::SliceExt),
            _ => None,
        }
    }

    /// Coded slice of a primary picture (types 1-5)
    pub fn is_vcl(&self) -> bool {
        matches!(
            self,
            NaluType::Slice
                | NaluType::SlicePartA
                | NaluType::SlicePartB
                | NaluType::SlicePartC
                | NaluType::Idr
        )
    }
}

/// How access-unit assembly treats a NAL unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaluClass {
    /// IDR slice; marks the whole access unit as a key frame
    Idr,
    /// Sequence parameter set, routed to track state
    Sps,
    /// Picture parameter set, routed to track state
    Pps,
    /// Access unit delimiter, never forwarded
    AccessUnitDelimiter,
    /// Anything else, forwarded as part of the IBP payload
    Slice,
}

impl NaluClass {
    /// Classify a NAL unit by the low 5 bits of its header byte.
    ///
    /// Returns `None` for an empty unit. Unknown and reserved types fall into
    /// [`NaluClass::Slice`].
    pub fn classify(nalu: &[u8]) -> Option<Self> {
        let header = *nalu.first()?;
        Some(match NaluType::from_byte(header) {
            Some(NaluType::Idr) => NaluClass::Idr,
            Some(NaluType::Sps) => NaluClass::Sps,
            Some(NaluType::Pps) => NaluClass::Pps,
            Some(NaluType::Aud) => NaluClass::AccessUnitDelimiter,
            _ => NaluClass::Slice,
        })
    }
}

/// Profile name for an `AVCProfileIndication` / `profile_idc` value
pub fn profile_name(profile: u8) -> &'static str {
    match profile {
        66 => "Baseline",
        77 => "Main",
        88 => "Extended",
        100 => "High",
        110 => "High 10",
        122 => "High 4:2:2",
        244 => "High 4:4:4",
        _ => "Unknown",
    }
}

/// Level as a dotted string, e.g. `30` -> `"3.0"`
pub fn level_string(level: u8) -> String {
    format!("{}.{}", level / 10, level % 10)
}

/// Decoded AVCDecoderConfigurationRecord
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvcConfig {
    /// AVC profile (66=Baseline, 77=Main, 100=High, etc.)
    pub profile: u8,
    /// Profile compatibility flags
    pub compatibility: u8,
    /// AVC level (e.g., 31 = 3.1)
    pub level: u8,
    /// NALU length field size in bytes
    pub nalu_length_size: u8,
    /// Sequence Parameter Sets
    pub sps: Vec<Bytes>,
    /// Picture Parameter Sets
    pub pps: Vec<Bytes>,
}

impl AvcConfig {
    /// Read a record produced by a sequence header tag
    pub fn parse(mut data: Bytes) -> Result<Self, MediaError> {
        if data.len() < 6 || data[0] != 0x01 {
            return Err(MediaError::InvalidAvcPacket);
        }
        data.advance(1);

        let profile = data.get_u8();
        let compatibility = data.get_u8();
        let level = data.get_u8();
        let nalu_length_size = (data.get_u8() & 0x03) + 1;

        let num_sps = (data.get_u8() & 0x1F) as usize;
        let sps = read_parameter_sets(&mut data, num_sps)?;

        if !data.has_remaining() {
            return Err(MediaError::InvalidAvcPacket);
        }
        let num_pps = data.get_u8() as usize;
        let pps = read_parameter_sets(&mut data, num_pps)?;

        Ok(AvcConfig {
            profile,
            compatibility,
            level,
            nalu_length_size,
            sps,
            pps,
        })
    }

    pub fn profile_name(&self) -> &'static str {
        profile_name(self.profile)
    }

    pub fn level_string(&self) -> String {
        level_string(self.level)
    }
}

fn read_parameter_sets(data: &mut Bytes, count: usize) -> Result<Vec<Bytes>, MediaError> {
    let mut sets = Vec::with_capacity(count);
    for _ in 0..count {
        if data.remaining() < 2 {
            return Err(MediaError::InvalidAvcPacket);
        }
        let len = data.get_u16() as usize;
        if data.remaining() < len {
            return Err(MediaError::InvalidAvcPacket);
        }
        sets.push(data.split_to(len));
    }
    Ok(sets)
}

/// A decoded AVC VIDEODATA tag body
#[derive(Debug, Clone)]
pub struct AvcVideoPacket {
    pub frame_type: VideoFrameType,
    pub packet_type: AvcPacketType,
    /// `pts - dts` in milliseconds
    pub composition_time: i32,
    /// Record (sequence header) or length-prefixed NAL units
    pub data: Bytes,
}

impl AvcVideoPacket {
    /// Parse a full tag body, starting at the FrameType/CodecID byte
    pub fn parse(mut body: Bytes) -> Result<Self, MediaError> {
        if body.len() < 5 {
            return Err(MediaError::InvalidAvcPacket);
        }

        let first = body.get_u8();
        if VideoCodec::from_byte(first) != Some(VideoCodec::Avc) {
            return Err(MediaError::InvalidAvcPacket);
        }
        let frame_type = VideoFrameType::from_byte(first).ok_or(MediaError::InvalidAvcPacket)?;
        let packet_type =
            AvcPacketType::from_byte(body.get_u8()).ok_or(MediaError::InvalidAvcPacket)?;

        // SI24, sign-extended through the top byte
        let raw = ((body.get_u8() as u32) << 16) | ((body.get_u8() as u32) << 8) | body.get_u8() as u32;
        let composition_time = ((raw << 8) as i32) >> 8;

        Ok(AvcVideoPacket {
            frame_type,
            packet_type,
            composition_time,
            data: body,
        })
    }
}

/// Iterator over length-prefixed (AVCC) NAL units
///
/// Stops at the first truncated or empty entry.
pub struct LengthPrefixedNalus<'a> {
    data: &'a [u8],
    length_size: usize,
}

impl<'a> LengthPrefixedNalus<'a> {
    pub fn new(data: &'a [u8], length_size: u8) -> Self {
        Self {
            data,
            length_size: length_size as usize,
        }
    }
}

impl<'a> Iterator for LengthPrefixedNalus<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.len() < self.length_size {
            return None;
        }
        let (prefix, rest) = self.data.split_at(self.length_size);
        let len = prefix
            .iter()
            .fold(0usize, |acc, b| (acc << 8) | *b as usize);
        if len == 0 || rest.len() < len {
            self.data = &[];
            return None;
        }
        let (nalu, rest) = rest.split_at(len);
        self.data = rest;
        Some(nalu)
    }
}
