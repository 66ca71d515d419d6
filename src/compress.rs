//! Compression codec (C2): zstd-compress serialized blobs and wrap them in
//! base64 so that every value written through [`crate::store::KvStore`] is a
//! plain UTF-8 string, matching the wire-string-only assumption the rest of
//! the store layer relies on.

use base64::Engine;

const ZSTD_LEVEL: i32 = 3;

/// Compress `data` with zstd and base64-encode the result.
pub fn compress_to_b64(data: &[u8]) -> std::io::Result<String> {
    let compressed = zstd::stream::encode_all(data, ZSTD_LEVEL)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(compressed))
}

/// Reverse of [`compress_to_b64`]. Returns `Err` if the payload is not valid
/// base64 or not a valid zstd frame; callers treat this as a cache miss
/// rather than a hard failure.
pub fn decompress_from_b64(encoded: &str) -> std::io::Result<Vec<u8>> {
    let compressed = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    zstd::stream::decode_all(compressed.as_slice())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_arbitrary_bytes() {
        let payload = b"the quick brown fox jumps over the lazy dog".repeat(50);
        let encoded = compress_to_b64(&payload).unwrap();
        let decoded = decompress_from_b64(&encoded).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn round_trips_empty_input() {
        let encoded = compress_to_b64(b"").unwrap();
        let decoded = decompress_from_b64(&encoded).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn rejects_garbage_payloads() {
        assert!(decompress_from_b64("not base64 at all!!").is_err());
    }

    #[test]
    fn compressed_payload_is_valid_base64() {
        let encoded = compress_to_b64(b"hello world").unwrap();
        assert!(base64::engine::general_purpose::STANDARD
            .decode(&encoded)
            .is_ok());
    }
}
