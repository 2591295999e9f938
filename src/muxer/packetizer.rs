//! AVC to FLV packaging
//!
//! Pure construction of the three byte layouts an AVC FLV stream needs:
//! length-prefixed NAL units, the AVCDecoderConfigurationRecord, and the
//! 5-byte AVC VIDEODATA header in front of either.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::MediaError;
use crate::media::flv::{FlvTag, VideoCodec, VideoFrameType};
use crate::media::h264::AvcPacketType;

/// Size of the NAL unit length field (lengthSizeMinusOne = 3)
pub const NALU_LENGTH_SIZE: usize = 4;

/// FrameType/CodecID + AVCPacketType + CompositionTime
pub const AVC_HEADER_SIZE: usize = 5;

const SI24_MAX: i64 = 0x7F_FFFF;
const SI24_MIN: i64 = -0x80_0000;

/// Package one NAL unit as `length (u32 BE) | payload`
pub fn mux_ibp_nalu(nalu: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(NALU_LENGTH_SIZE + nalu.len());
    put_ibp_nalu(&mut buf, nalu);
    buf.freeze()
}

/// Append one length-prefixed NAL unit to `buf`
pub fn put_ibp_nalu(buf: &mut BytesMut, nalu: &[u8]) {
    buf.put_u32(nalu.len() as u32);
    buf.put_slice(nalu);
}

/// Package the NAL units of one access unit back to back
pub fn mux_ibp_nalus<'a, I>(nalus: I) -> Bytes
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut buf = BytesMut::new();
    for nalu in nalus {
        put_ibp_nalu(&mut buf, nalu);
    }
    buf.freeze()
}

/// Build the AVCDecoderConfigurationRecord for one SPS and one PPS
///
/// Profile and level come from SPS bytes 1 and 3. profile_compatibility is
/// written as 0 and NAL lengths are always 4 bytes.
pub fn mux_sequence_header(sps: &[u8], pps: &[u8]) -> Result<Bytes, MediaError> {
    if sps.len() < 4 {
        return Err(MediaError::InvalidParameterSet(format!(
            "SPS is {} bytes, profile and level need at least 4",
            sps.len()
        )));
    }
    if pps.is_empty() {
        return Err(MediaError::InvalidParameterSet("PPS is empty".into()));
    }
    let sps_len = u16::try_from(sps.len()).map_err(|_| {
        MediaError::InvalidParameterSet(format!("SPS of {} bytes does not fit u16", sps.len()))
    })?;
    let pps_len = u16::try_from(pps.len()).map_err(|_| {
        MediaError::InvalidParameterSet(format!("PPS of {} bytes does not fit u16", pps.len()))
    })?;

    let mut buf = BytesMut::with_capacity(11 + sps.len() + pps.len());
    buf.put_u8(0x01); // configurationVersion
    buf.put_u8(sps[1]); // AVCProfileIndication
    buf.put_u8(0x00); // profile_compatibility
    buf.put_u8(sps[3]); // AVCLevelIndication
    buf.put_u8(0x03); // lengthSizeMinusOne

    buf.put_u8(0x01);
    buf.put_u16(sps_len);
    buf.put_slice(sps);

    buf.put_u8(0x01);
    buf.put_u16(pps_len);
    buf.put_slice(pps);

    Ok(buf.freeze())
}

/// Composition time `pts - dts`, clamped to the SI24 range
pub fn composition_time(dts: u32, pts: u32) -> i32 {
    (pts as i64 - dts as i64).clamp(SI24_MIN, SI24_MAX) as i32
}

/// Wrap an AVC payload into an FLV video tag
///
/// The tag timestamp is the decode timestamp; the presentation offset travels
/// in the CompositionTime field as a two's-complement 24-bit value.
pub fn mux_avc_to_flv_tag(
    payload: &[u8],
    frame_type: VideoFrameType,
    packet_type: AvcPacketType,
    dts: u32,
    pts: u32,
) -> FlvTag {
    let cts = composition_time(dts, pts);

    let mut buf = BytesMut::with_capacity(AVC_HEADER_SIZE + payload.len());
    buf.put_u8(((frame_type as u8) << 4) | VideoCodec::Avc as u8);
    buf.put_u8(packet_type as u8);
    buf.put_u8((cts >> 16) as u8);
    buf.put_u8((cts >> 8) as u8);
    buf.put_u8(cts as u8);
    buf.put_slice(payload);

    FlvTag::video(dts, buf.freeze())
}
