//! Chunk payload compression.
//!
//! Stream layout:
//! - tag: 1 byte (`CompressionType`)
//! - body: records, raw or in an LZ4 / Zstd frame
//! - checksum: 4 bytes (CRC32 of the uncompressed records)
//!
//! Decoding never trusts a stored point count for sizing: output grows with
//! the bytes the codec actually produces and stops one byte past the limit
//! the caller derived from that count.

use bytes::{Buf, BufMut, BytesMut};
use std::io::{Read, Write};
use strata_common::{CompressionType, Result, Schema, StrataError};

/// Size of the stream tag in bytes.
const TAG_SIZE: usize = 1;

/// Size of the trailing checksum in bytes.
const CHECKSUM_SIZE: usize = 4;

/// Zstd level used for chunk payloads.
const ZSTD_LEVEL: i32 = 3;

/// Accumulates packed point records and produces a compressed stream.
pub struct Compressor {
    kind: CompressionType,
    point_size: usize,
    records: BytesMut,
    num_points: usize,
}

impl Compressor {
    /// Creates a compressor for records of `schema`, pre-sized for
    /// `num_points` records.
    pub fn new(schema: &Schema, num_points: usize, kind: CompressionType) -> Self {
        Self {
            kind,
            point_size: schema.point_size(),
            records: BytesMut::with_capacity(num_points.saturating_mul(schema.point_size())),
            num_points: 0,
        }
    }

    /// Appends one packed record.
    pub fn push(&mut self, record: &[u8]) -> Result<()> {
        if record.len() != self.point_size {
            return Err(StrataError::PointSizeMismatch {
                expected: self.point_size,
                actual: record.len(),
            });
        }
        self.records.put_slice(record);
        self.num_points += 1;
        Ok(())
    }

    /// Number of records pushed so far.
    pub fn num_points(&self) -> usize {
        self.num_points
    }

    /// Finishes the stream.
    pub fn finish(self) -> Result<Vec<u8>> {
        let checksum = crc32fast::hash(&self.records);
        let body = match self.kind {
            CompressionType::None => self.records.to_vec(),
            CompressionType::Lz4 => {
                let mut encoder = lz4_flex::frame::FrameEncoder::new(Vec::new());
                encoder.write_all(&self.records)?;
                encoder
                    .finish()
                    .map_err(|e| StrataError::IoError(format!("lz4: {}", e)))?
            }
            CompressionType::Zstd => zstd::stream::encode_all(&self.records[..], ZSTD_LEVEL)?,
        };

        let mut out = BytesMut::with_capacity(TAG_SIZE + body.len() + CHECKSUM_SIZE);
        out.put_u8(self.kind.tag());
        out.put_slice(&body);
        out.put_u32_le(checksum);
        Ok(out.to_vec())
    }
}

/// Decompresses a stream holding at most `max_len` bytes of records.
///
/// A stream that decodes to more than `max_len` bytes is corrupt. A shorter
/// one is returned as-is; callers that require an exact count compare the
/// length themselves.
pub fn decompress(data: &[u8], max_len: usize) -> Result<Vec<u8>> {
    if data.len() < TAG_SIZE + CHECKSUM_SIZE {
        return Err(corrupted("stream too short"));
    }

    let kind = CompressionType::from_tag(data[0])
        .ok_or_else(|| corrupted(&format!("unknown codec tag {}", data[0])))?;
    let body = &data[TAG_SIZE..data.len() - CHECKSUM_SIZE];
    let stored = (&data[data.len() - CHECKSUM_SIZE..]).get_u32_le();

    let records = match kind {
        CompressionType::None => body.to_vec(),
        CompressionType::Lz4 => read_bounded(lz4_flex::frame::FrameDecoder::new(body), max_len)?,
        CompressionType::Zstd => {
            let decoder = zstd::stream::read::Decoder::new(body)
                .map_err(|e| corrupted(&format!("zstd: {}", e)))?;
            read_bounded(decoder, max_len)?
        }
    };
    if records.len() > max_len {
        return Err(corrupted(&format!(
            "payload exceeds {} bytes of records",
            max_len
        )));
    }

    let computed = crc32fast::hash(&records);
    if stored != computed {
        return Err(StrataError::ChecksumMismatch { stored, computed });
    }

    Ok(records)
}

/// Reads at most `max_len + 1` bytes, so an oversized payload is visible
/// without decoding all of it.
fn read_bounded(reader: impl Read, max_len: usize) -> Result<Vec<u8>> {
    let limit = u64::try_from(max_len).unwrap_or(u64::MAX).saturating_add(1);
    let mut out = Vec::new();
    reader
        .take(limit)
        .read_to_end(&mut out)
        .map_err(|e| corrupted(&e.to_string()))?;
    Ok(out)
}

fn corrupted(reason: &str) -> StrataError {
    StrataError::ChunkCorrupted {
        id: "payload".to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_common::{DimInfo, DimType, Point};

    const ALL_CODECS: [CompressionType; 3] = [
        CompressionType::None,
        CompressionType::Lz4,
        CompressionType::Zstd,
    ];

    fn schema() -> Schema {
        Schema::xyz(vec![DimInfo::new("Intensity", DimType::Unsigned, 2)]).unwrap()
    }

    fn records(schema: &Schema, n: usize) -> Vec<Vec<u8>> {
        (0..n)
            .map(|i| {
                let mut r = schema
                    .make_record(&Point::new(i as f64, 100.0, (i % 7) as f64))
                    .unwrap();
                schema.set_f64(&mut r, "Intensity", (i * 3) as f64).unwrap();
                r
            })
            .collect()
    }

    fn stream(schema: &Schema, input: &[Vec<u8>], kind: CompressionType) -> Vec<u8> {
        let mut compressor = Compressor::new(schema, input.len(), kind);
        for r in input {
            compressor.push(r).unwrap();
        }
        compressor.finish().unwrap()
    }

    #[test]
    fn test_compress_decompress_all_codecs() {
        let schema = schema();
        let input = records(&schema, 300);

        for kind in ALL_CODECS {
            let stream = stream(&schema, &input, kind);
            assert_eq!(stream[0], kind.tag());
            let out = decompress(&stream, input.len() * schema.point_size()).unwrap();
            assert_eq!(out, input.concat());
        }
    }

    #[test]
    fn test_codecs_shrink_repetitive_records() {
        let schema = schema();
        let record = schema.make_record(&Point::new(1.0, 1.0, 1.0)).unwrap();
        let input = vec![record; 1000];

        for kind in [CompressionType::Lz4, CompressionType::Zstd] {
            let stream = stream(&schema, &input, kind);
            assert!(stream.len() < 1000 * schema.point_size() / 10, "{:?}", kind);
        }
    }

    #[test]
    fn test_empty_stream() {
        let schema = schema();
        for kind in ALL_CODECS {
            let stream = Compressor::new(&schema, 0, kind).finish().unwrap();
            assert!(decompress(&stream, 0).unwrap().is_empty());
        }
        let raw = Compressor::new(&schema, 0, CompressionType::None).finish().unwrap();
        assert_eq!(raw.len(), TAG_SIZE + CHECKSUM_SIZE);
    }

    #[test]
    fn test_payload_longer_than_limit() {
        let schema = schema();
        let input = records(&schema, 10);

        for kind in ALL_CODECS {
            let stream = stream(&schema, &input, kind);
            let result = decompress(&stream, 4 * schema.point_size());
            assert!(matches!(result, Err(StrataError::ChunkCorrupted { .. })), "{:?}", kind);
        }
    }

    #[test]
    fn test_huge_limit_does_not_reserve() {
        let schema = schema();
        let input = records(&schema, 3);

        for kind in ALL_CODECS {
            let stream = stream(&schema, &input, kind);
            let out = decompress(&stream, usize::MAX).unwrap();
            assert_eq!(out.len(), 3 * schema.point_size());
        }
    }

    #[test]
    fn test_push_wrong_size() {
        let mut compressor = Compressor::new(&schema(), 1, CompressionType::None);
        assert!(matches!(
            compressor.push(&[0u8; 3]),
            Err(StrataError::PointSizeMismatch { .. })
        ));
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let schema = schema();
        let mut stream = stream(&schema, &records(&schema, 4), CompressionType::None);
        stream[5] ^= 0xFF;

        assert!(matches!(
            decompress(&stream, 4 * schema.point_size()),
            Err(StrataError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_garbled_frame() {
        let schema = schema();
        for kind in [CompressionType::Lz4, CompressionType::Zstd] {
            let mut stream = stream(&schema, &records(&schema, 50), kind);
            for byte in &mut stream[TAG_SIZE..TAG_SIZE + 6] {
                *byte = 0xAB;
            }
            assert!(decompress(&stream, 50 * schema.point_size()).is_err(), "{:?}", kind);
        }
    }

    #[test]
    fn test_unknown_tag() {
        let stream = [9u8, 0, 0, 0, 0];
        assert!(matches!(
            decompress(&stream, 0),
            Err(StrataError::ChunkCorrupted { .. })
        ));
    }
}
