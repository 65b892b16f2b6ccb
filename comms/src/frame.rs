//! Binary framing for a pair of f32 matrices plus JSON metadata.
//!
//! Layout, little-endian throughout:
//!
//! ```text
//! [u32 header_len][header_len bytes of JSON metadata][f32; a_length][f32; b_length]
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FrameErr, Result};

type HeaderLen = u32;
const HEADER_LEN_SIZE: usize = size_of::<HeaderLen>();
const F32_SIZE: usize = size_of::<f32>();

/// What the matrices of a frame represent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    /// A worker's adapter delta, uploaded to the aggregator.
    Delta,
    /// The aggregator's current global adapter.
    Global,
}

/// The JSON header of a frame.
///
/// `a_length` and `b_length` are the element counts of both matrices, they tell the
/// decoder where matrix A ends and matrix B begins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub a_length: usize,
    pub b_length: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<FrameKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Scalar metrics travelling with the payload (`num_examples`, `avg_loss`, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, f64>,
}

impl Metadata {
    /// Creates the minimal metadata describing matrices of the given element counts.
    pub fn new(a_length: usize, b_length: usize) -> Self {
        Self {
            a_length,
            b_length,
            kind: None,
            device_id: None,
            model_id: None,
            task: None,
            timestamp: None,
            metrics: BTreeMap::new(),
        }
    }

    /// Returns the metric named `name`, if present.
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }
}

/// A decoded frame: its metadata and owned copies of both matrices.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub metadata: Metadata,
    pub a: Vec<f32>,
    pub b: Vec<f32>,
}

impl Frame {
    /// Encodes this frame, see [`encode`].
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode(&self.metadata, &self.a, &self.b)
    }

    /// Decodes a frame, see [`decode`].
    pub fn decode(buf: &[u8]) -> Result<Self> {
        decode(buf)
    }
}

/// Serializes `metadata`, `a` and `b` into a single frame.
///
/// # Arguments
/// * `metadata` - The frame header, its lengths must describe `a` and `b`.
/// * `a` - The first matrix, flattened.
/// * `b` - The second matrix, flattened.
///
/// # Returns
/// The encoded frame, `LengthMismatch` if the metadata doesn't describe the matrices or
/// `SizeOverflow` if the frame would not fit in an addressable buffer.
pub fn encode(metadata: &Metadata, a: &[f32], b: &[f32]) -> Result<Vec<u8>> {
    check_len("matrix A", a.len(), metadata.a_length)?;
    check_len("matrix B", b.len(), metadata.b_length)?;

    let header = serde_json::to_vec(metadata)?;
    let header_len =
        HeaderLen::try_from(header.len()).map_err(|_| FrameErr::SizeOverflow { what: "header" })?;

    let total = frame_len(header.len(), a.len(), b.len())?;
    let mut buf = Vec::new();
    buf.try_reserve_exact(total)
        .map_err(|_| FrameErr::SizeOverflow { what: "frame" })?;

    buf.extend_from_slice(&header_len.to_le_bytes());
    buf.extend_from_slice(&header);
    extend_f32_le(&mut buf, a);
    extend_f32_le(&mut buf, b);

    Ok(buf)
}

/// Deserializes a frame produced by [`encode`].
///
/// # Arguments
/// * `buf` - The raw frame bytes.
///
/// # Returns
/// The decoded frame, `FrameTooShort` if the buffer is shorter than the lengths it
/// declares, `InvalidHeader` if the metadata can't be parsed or `LengthMismatch` if
/// there are trailing bytes after matrix B.
pub fn decode(buf: &[u8]) -> Result<Frame> {
    let Some((len_buf, rest)) = buf.split_first_chunk::<HEADER_LEN_SIZE>() else {
        return Err(FrameErr::FrameTooShort {
            needed: HEADER_LEN_SIZE,
            got: buf.len(),
        });
    };

    let header_len = HeaderLen::from_le_bytes(*len_buf) as usize;
    if header_len > rest.len() {
        return Err(FrameErr::FrameTooShort {
            needed: HEADER_LEN_SIZE.saturating_add(header_len),
            got: buf.len(),
        });
    }

    let (header, payload) = rest.split_at(header_len);
    let metadata: Metadata = serde_json::from_slice(header)?;

    let needed = metadata
        .a_length
        .checked_add(metadata.b_length)
        .and_then(|n| n.checked_mul(F32_SIZE));

    let needed = match needed {
        Some(needed) if needed <= payload.len() => needed,
        _ => {
            return Err(FrameErr::FrameTooShort {
                needed: needed.map_or(usize::MAX, |n| {
                    n.saturating_add(HEADER_LEN_SIZE + header_len)
                }),
                got: buf.len(),
            });
        }
    };

    if needed != payload.len() {
        return Err(FrameErr::LengthMismatch {
            what: "payload bytes",
            got: payload.len(),
            expected: needed,
        });
    }

    let (a_bytes, b_bytes) = payload.split_at(metadata.a_length * F32_SIZE);
    let a = read_f32_le(a_bytes);
    let b = read_f32_le(b_bytes);

    Ok(Frame { metadata, a, b })
}

/// Computes the total byte length of a frame.
///
/// # Returns
/// The length or `SizeOverflow` if it doesn't fit in `isize::MAX` bytes.
fn frame_len(header_len: usize, a_len: usize, b_len: usize) -> Result<usize> {
    let overflow = |what| FrameErr::SizeOverflow { what };

    let payload = a_len
        .checked_add(b_len)
        .and_then(|n| n.checked_mul(F32_SIZE))
        .ok_or(overflow("payload"))?;

    let total = HEADER_LEN_SIZE
        .checked_add(header_len)
        .and_then(|n| n.checked_add(payload))
        .ok_or(overflow("frame"))?;

    if total > isize::MAX as usize {
        return Err(overflow("frame"));
    }

    Ok(total)
}

fn check_len(what: &'static str, got: usize, expected: usize) -> Result<()> {
    if got != expected {
        return Err(FrameErr::LengthMismatch {
            what,
            got,
            expected,
        });
    }

    Ok(())
}

/// Appends `nums` to `buf` as little-endian bytes.
pub fn extend_f32_le(buf: &mut Vec<u8>, nums: &[f32]) {
    if cfg!(target_endian = "little") {
        buf.extend_from_slice(bytemuck::cast_slice(nums));
    } else {
        nums.iter().for_each(|x| buf.extend_from_slice(&x.to_le_bytes()));
    }
}

/// Reads little-endian f32s from `bytes` into a freshly allocated vector.
///
/// `bytes` may be unaligned, it's always copied. Trailing bytes that don't make up a
/// whole `f32` are ignored.
pub fn read_f32_le(bytes: &[u8]) -> Vec<f32> {
    let mut nums = vec![0f32; bytes.len() / F32_SIZE];
    let whole = nums.len() * F32_SIZE;
    bytemuck::cast_slice_mut::<f32, u8>(&mut nums).copy_from_slice(&bytes[..whole]);

    if cfg!(target_endian = "big") {
        nums.iter_mut()
            .for_each(|x| *x = f32::from_bits(u32::from_le(x.to_bits())));
    }

    nums
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(a: &[f32], b: &[f32]) -> Metadata {
        let mut metadata = Metadata::new(a.len(), b.len());
        metadata.kind = Some(FrameKind::Delta);
        metadata.device_id = Some("device-1".into());
        metadata.model_id = Some("tiny-llama".into());
        metadata.metrics.insert("avg_loss".into(), 0.125);
        metadata
    }

    #[test]
    fn header_length_is_little_endian() {
        let a = [1.0, 2.0];
        let b = [3.0];
        let buf = encode(&Metadata::new(2, 1), &a, &b).unwrap();

        let header_len = u32::from_le_bytes(buf[..4].try_into().unwrap()) as usize;
        assert_eq!(buf.len(), 4 + header_len + 3 * 4);
        assert_eq!(&buf[buf.len() - 4..], &3.0f32.to_le_bytes());
    }

    #[test]
    fn roundtrip_keeps_metadata_and_bits() {
        let a = [f32::MIN_POSITIVE, -0.0, 1.5e-30, f32::MAX];
        let b = [f32::EPSILON, -7.25];
        let metadata = metadata(&a, &b);

        let frame = decode(&encode(&metadata, &a, &b).unwrap()).unwrap();

        assert_eq!(frame.metadata, metadata);
        assert_eq!(
            frame.a.iter().map(|x| x.to_bits()).collect::<Vec<_>>(),
            a.iter().map(|x| x.to_bits()).collect::<Vec<_>>()
        );
        assert_eq!(frame.b, b);
    }

    #[test]
    fn empty_matrices() {
        let frame = decode(&encode(&Metadata::new(0, 0), &[], &[]).unwrap()).unwrap();
        assert!(frame.a.is_empty());
        assert!(frame.b.is_empty());
    }

    #[test]
    fn encode_rejects_lengths_that_disagree_with_metadata() {
        let err = encode(&Metadata::new(3, 1), &[1.0, 2.0], &[3.0]).unwrap_err();
        assert!(matches!(
            err,
            FrameErr::LengthMismatch {
                got: 2,
                expected: 3,
                ..
            }
        ));
    }

    #[test]
    fn decode_needs_the_header_length_field() {
        for len in 0..4 {
            let err = decode(&vec![0; len]).unwrap_err();
            assert!(matches!(err, FrameErr::FrameTooShort { needed: 4, got } if got == len));
        }
    }

    #[test]
    fn huge_header_length_is_too_short_not_a_fault() {
        let mut buf = vec![0u8; 16];
        buf[..4].copy_from_slice(&u32::MAX.to_le_bytes());

        let err = decode(&buf).unwrap_err();
        assert!(matches!(err, FrameErr::FrameTooShort { got: 16, .. }));
    }

    #[test]
    fn declared_matrix_lengths_beyond_buffer_are_too_short() {
        let buf = encode(&Metadata::new(2, 2), &[1.0, 2.0], &[3.0, 4.0]).unwrap();
        let err = decode(&buf[..buf.len() - 1]).unwrap_err();
        assert!(matches!(err, FrameErr::FrameTooShort { .. }));

        let header = br#"{"aLength":18446744073709551615,"bLength":1}"#;
        let mut buf = (header.len() as u32).to_le_bytes().to_vec();
        buf.extend_from_slice(header);
        let err = decode(&buf).unwrap_err();
        assert!(matches!(err, FrameErr::FrameTooShort { .. }));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut buf = encode(&Metadata::new(1, 1), &[1.0], &[2.0]).unwrap();
        buf.extend_from_slice(&[0; 4]);

        let err = decode(&buf).unwrap_err();
        assert!(matches!(err, FrameErr::LengthMismatch { .. }));
    }

    #[test]
    fn invalid_json_header() {
        let mut buf = 3u32.to_le_bytes().to_vec();
        buf.extend_from_slice(b"{{{");

        let err = decode(&buf).unwrap_err();
        assert!(matches!(err, FrameErr::InvalidHeader(_)));
    }

    #[test]
    fn frame_len_overflows() {
        assert!(matches!(
            frame_len(0, usize::MAX, 1),
            Err(FrameErr::SizeOverflow { what: "payload" })
        ));
        assert!(matches!(
            frame_len(0, usize::MAX / 8, usize::MAX / 8),
            Err(FrameErr::SizeOverflow { .. })
        ));
        assert_eq!(frame_len(10, 2, 3).unwrap(), 4 + 10 + 20);
    }
}
