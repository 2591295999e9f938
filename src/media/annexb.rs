//! Annex-B byte stream scanning
//!
//! Hardware and software encoders emit H.264 as an Annex-B byte stream, where
//! every NAL unit is preceded by a start code:
//!
//! ```text
//! +-----------------+----------+-----------------+----------+
//! | N x 00 00 00 01 | NAL unit | N x 00 00 00 01 | NAL unit | ...
//! +-----------------+----------+-----------------+----------+
//! ```
//!
//! The shortest start code is `00 00 01`; any number of extra leading zero
//! bytes is accepted (the usual 4-byte form is `00 00 00 01`). A unit runs
//! until the next start code or the end of the valid region.
//!
//! Scanning never copies: units borrow from the encoder buffer and the only
//! state is the caller's cursor, so a scan can be resumed from any boundary.

use crate::error::MediaError;

use super::h264::NaluType;

/// A NAL unit located inside an Annex-B buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnnexbUnit<'a> {
    /// NAL unit bytes, start code excluded
    pub data: &'a [u8],
    /// Offset of the first NAL byte within the scanned buffer
    pub offset: usize,
    /// Bytes consumed by the start code in front of this unit (>= 3)
    pub start_code_len: usize,
}

impl<'a> AnnexbUnit<'a> {
    /// Size of the NAL unit in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// NAL unit type from the header byte, if the unit is non-empty and the
    /// type is a known one
    pub fn nalu_type(&self) -> Option<NaluType> {
        self.data.first().and_then(|b| NaluType::from_byte(*b))
    }

    /// Offset of the start code preceding this unit
    pub fn start_code_offset(&self) -> usize {
        self.offset - self.start_code_len
    }
}

/// Match a start code (`N x 00` + `00 00 01`) beginning exactly at `pos`.
///
/// Returns the number of bytes the start code occupies.
pub fn start_code_at(data: &[u8], pos: usize) -> Option<usize> {
    let mut i = pos;
    while i + 3 <= data.len() {
        if data[i] != 0x00 || data[i + 1] != 0x00 {
            return None;
        }
        if data[i + 2] == 0x01 {
            return Some(i + 3 - pos);
        }
        i += 1;
    }
    None
}

/// Offset of the first start code at or after `from`, leading zeros included.
///
/// Single pass: a `01` preceded by two or more zeros closes a start code that
/// began at the first zero of the run.
fn find_start_code(data: &[u8], from: usize) -> Option<usize> {
    let mut zeros = 0usize;
    for (i, &b) in data.iter().enumerate().skip(from) {
        match b {
            0x00 => zeros += 1,
            0x01 if zeros >= 2 => return Some(i - zeros),
            _ => zeros = 0,
        }
    }
    None
}

/// Scan one NAL unit starting at `*cursor`.
///
/// On success the cursor is advanced to the start code of the following unit
/// (or to the end of `data`). Returns `None` once the cursor reaches the end.
pub fn next_unit<'a>(
    data: &'a [u8],
    cursor: &mut usize,
) -> Option<Result<AnnexbUnit<'a>, MediaError>> {
    let pos = *cursor;
    if pos >= data.len() {
        return None;
    }

    let start_code_len = match start_code_at(data, pos) {
        Some(len) => len,
        None => {
            return Some(Err(MediaError::MalformedBitstream {
                offset: pos,
                remaining: data.len() - pos,
            }))
        }
    };

    let begin = pos + start_code_len;
    let end = find_start_code(data, begin).unwrap_or(data.len());

    *cursor = end;
    Some(Ok(AnnexbUnit {
        data: &data[begin..end],
        offset: begin,
        start_code_len,
    }))
}

/// Iterator over the NAL units of an Annex-B buffer
///
/// Yields units in stream order. After the first error the iterator is
/// exhausted; [`cursor`](Self::cursor) reports where scanning stopped.
#[derive(Debug, Clone)]
pub struct AnnexbUnits<'a> {
    data: &'a [u8],
    cursor: usize,
    failed: bool,
}

impl<'a> AnnexbUnits<'a> {
    /// Scan `data` from the beginning
    pub fn new(data: &'a [u8]) -> Self {
        Self::resume(data, 0)
    }

    /// Scan `data` from a previously returned cursor
    pub fn resume(data: &'a [u8], cursor: usize) -> Self {
        Self {
            data,
            cursor,
            failed: false,
        }
    }

    /// Offset of the next start code to be scanned
    pub fn cursor(&self) -> usize {
        self.cursor
    }
}

impl<'a> Iterator for AnnexbUnits<'a> {
    type Item = Result<AnnexbUnit<'a>, MediaError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let item = next_unit(self.data, &mut self.cursor)?;
        if item.is_err() {
            self.failed = true;
        }
        Some(item)
    }
}

impl std::iter::FusedIterator for AnnexbUnits<'_> {}

/// Split a buffer into NAL units, failing on the first malformed boundary
pub fn split_units(data: &[u8]) -> Result<Vec<AnnexbUnit<'_>>, MediaError> {
    AnnexbUnits::new(data).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_code_lengths() {
        assert_eq!(start_code_at(&[0x00, 0x00, 0x01, 0x67], 0), Some(3));
        assert_eq!(start_code_at(&[0x00, 0x00, 0x00, 0x01, 0x67], 0), Some(4));
        assert_eq!(
            start_code_at(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x01], 0),
            Some(6)
        );
        assert_eq!(start_code_at(&[0x00, 0x01, 0x67], 0), None);
        assert_eq!(start_code_at(&[0x67, 0x00, 0x00, 0x01], 0), None);
        assert_eq!(start_code_at(&[0x00, 0x00], 0), None);
    }

    #[test]
    fn test_split_mixed_start_codes() {
        let data: &[u8] = &[
            0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0x00, 0x1E, // SPS, 4-byte start code
            0x00, 0x00, 0x01, 0x68, 0xCE, 0x38, // PPS, 3-byte start code
            0x00, 0x00, 0x00, 0x01, 0x65, 0x88, 0x84, 0x00, 0x21, // IDR
        ];

        let units = split_units(data).unwrap();
        assert_eq!(units.len(), 3);

        assert_eq!(units[0].data, &[0x67, 0x42, 0x00, 0x1E]);
        assert_eq!(units[0].start_code_len, 4);
        assert_eq!(units[0].offset, 4);
        assert_eq!(units[0].nalu_type(), Some(NaluType::Sps));

        assert_eq!(units[1].data, &[0x68, 0xCE, 0x38]);
        assert_eq!(units[1].start_code_len, 3);
        assert_eq!(units[1].nalu_type(), Some(NaluType::Pps));

        assert_eq!(units[2].data, &[0x65, 0x88, 0x84, 0x00, 0x21]);
        assert_eq!(units[2].size(), 5);
        assert_eq!(units[2].nalu_type(), Some(NaluType::Idr));
        assert_eq!(units[2].start_code_offset(), 14);
    }

    #[test]
    fn test_single_zero_inside_payload() {
        // 00 00 02 and a lone 00 are payload, not start codes
        let data: &[u8] = &[0x00, 0x00, 0x01, 0x41, 0x00, 0x00, 0x02, 0x00, 0x9A];
        let units = split_units(data).unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].data, &[0x41, 0x00, 0x00, 0x02, 0x00, 0x9A]);
    }

    #[test]
    fn test_n_units_in_order() {
        let mut data = Vec::new();
        let mut expected = Vec::new();
        for i in 0..16u8 {
            if i % 2 == 0 {
                data.extend_from_slice(&[0x00, 0x00, 0x01]);
            } else {
                data.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]);
            }
            let nalu: Vec<u8> = (0..(i as usize + 1)).map(|j| 0x41 + j as u8).collect();
            data.extend_from_slice(&nalu);
            expected.push(nalu);
        }

        let units = split_units(&data).unwrap();
        assert_eq!(units.len(), expected.len());
        for (unit, nalu) in units.iter().zip(&expected) {
            assert_eq!(unit.data, nalu.as_slice());
        }
    }

    #[test]
    fn test_no_start_code_is_malformed() {
        let data: &[u8] = &[0x65, 0x88, 0x84, 0x00];
        let err = split_units(data).unwrap_err();
        assert_eq!(
            err,
            MediaError::MalformedBitstream {
                offset: 0,
                remaining: 4
            }
        );
    }

    #[test]
    fn test_iterator_stops_after_error() {
        let data: &[u8] = &[0x00, 0x01, 0x67];
        let mut units = AnnexbUnits::new(data);
        assert!(matches!(
            units.next(),
            Some(Err(MediaError::MalformedBitstream { offset: 0, .. }))
        ));
        assert!(units.next().is_none());
        assert_eq!(units.cursor(), 0);
    }

    #[test]
    fn test_resume_from_cursor() {
        let data: &[u8] = &[0x00, 0x00, 0x01, 0x67, 0x42, 0x00, 0x00, 0x01, 0x68, 0xCE];

        let mut cursor = 0;
        let first = next_unit(data, &mut cursor).unwrap().unwrap();
        assert_eq!(first.data, &[0x67, 0x42]);
        assert_eq!(cursor, 5);

        // A fresh scan from the same cursor sees the same remainder
        let rest: Vec<_> = AnnexbUnits::resume(data, cursor)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].data, &[0x68, 0xCE]);
        assert_eq!(rest[0].offset, 8);

        assert!(next_unit(data, &mut cursor).unwrap().is_ok());
        assert!(next_unit(data, &mut cursor).is_none());
    }

    #[test]
    fn test_long_zero_padding() {
        const PADDING: usize = 128 * 1024;

        // trailing padding stays in the last unit
        let mut data = vec![0x00, 0x00, 0x00, 0x01, 0x65, 0x88];
        data.resize(data.len() + PADDING, 0x00);
        let units = split_units(&data).unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].size(), 2 + PADDING);
        assert_eq!(&units[0].data[..2], &[0x65, 0x88]);

        // padding followed by 01 is one long start code
        data.extend_from_slice(&[0x01, 0x41, 0x9A]);
        let units = split_units(&data).unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].data, &[0x65, 0x88]);
        assert_eq!(units[1].data, &[0x41, 0x9A]);
        assert_eq!(units[1].start_code_len, PADDING + 1);
        assert_eq!(units[1].start_code_offset(), 6);
    }

    #[test]
    fn test_empty_buffer() {
        assert!(split_units(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_trailing_start_code_yields_empty_unit() {
        let data: &[u8] = &[0x00, 0x00, 0x01, 0x09, 0xF0, 0x00, 0x00, 0x01];
        let units = split_units(data).unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].data, &[0x09, 0xF0]);
        assert!(units[1].data.is_empty());
        assert_eq!(units[1].nalu_type(), None);
    }
}
