//! Compression for large run logs.
//!
//! Logs at or above [`COMPRESS_LOG_MIN_SIZE`] are zlib-compressed before
//! insertion. The `outputLen` column always records the uncompressed size;
//! that length is what tells the reader which path to take on the way out.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use tracing::warn;

use crate::prelude::*;

/// Logs shorter than this are stored as-is.
pub const COMPRESS_LOG_MIN_SIZE: usize = 1024;

pub fn compress(raw: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(raw.len()), Compression::default());
    encoder.write_all(raw)?;
    Ok(encoder.finish()?)
}

pub fn decompress(data: &[u8], original_len: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(original_len);
    ZlibDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}

/// Prepare a log for storage, returning `(payload, uncompressed length)`.
///
/// Compression that fails, or that would not beat the raw text, is
/// non-fatal: the raw text is stored instead.
pub fn encode_for_storage(log: &str) -> (Vec<u8>, i64) {
    let raw = log.as_bytes();
    if raw.len() >= COMPRESS_LOG_MIN_SIZE {
        match compress(raw) {
            Ok(zipped) if zipped.len() < raw.len() => return (zipped, raw.len() as i64),
            Ok(_) => warn!("compressed log not smaller than input, storing raw"),
            Err(err) => warn!("failed to compress log: {err}"),
        }
    }
    (raw.to_vec(), raw.len() as i64)
}

/// Recover a stored log from its payload and recorded length.
pub fn decode_from_storage(data: &[u8], stored_len: i64) -> Result<String> {
    if stored_len as usize >= COMPRESS_LOG_MIN_SIZE {
        let raw = decompress(data, stored_len as usize)?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    } else {
        Ok(String::from_utf8_lossy(data).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_logs_stored_verbatim() {
        let (payload, len) = encode_for_storage("hi\n");
        assert_eq!(payload, b"hi\n");
        assert_eq!(len, 3);
        assert_eq!(decode_from_storage(&payload, len).unwrap(), "hi\n");
    }

    #[test]
    fn large_logs_round_trip_compressed() {
        let log = "a".repeat(4096);
        let (payload, len) = encode_for_storage(&log);
        assert_eq!(len, 4096);
        assert!(payload.len() < 4096);
        assert_eq!(decode_from_storage(&payload, len).unwrap(), log);
    }

    #[test]
    fn round_trip_at_threshold_boundary() {
        for size in [COMPRESS_LOG_MIN_SIZE - 1, COMPRESS_LOG_MIN_SIZE] {
            let log = "x".repeat(size);
            let (payload, len) = encode_for_storage(&log);
            assert_eq!(len as usize, size);
            assert_eq!(decode_from_storage(&payload, len).unwrap(), log);
        }
    }

    #[test]
    fn garbage_payload_fails_to_decode() {
        let garbage = vec![0u8; 2048];
        assert!(decode_from_storage(&garbage, 2048).is_err());
    }
}
