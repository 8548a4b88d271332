// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The byte layout of entries stored in the distributed tier.
//!
//! ```text
//! +---------+-------+------------+-----------+--------------------------+---------+
//! | version | flags | expires at | tag count | (tag length, tag bytes)* | payload |
//! |   u8    |  u8   |  u64 BE    |  u16 BE   |  u16 BE, UTF-8           |  rest   |
//! +---------+-------+------------+-----------+--------------------------+---------+
//! ```
//!
//! Tags and the absolute expiration (milliseconds since the Unix epoch) travel with the
//! payload, so that a process reading the entry can index it under the tags it was stored
//! with and never keep it longer than the process that stored it intended.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use stratum_tier::{Tag, TagSet};

const VERSION: u8 = 1;
const FLAG_COMPRESSED: u8 = 0b0000_0001;
const HEADER_LEN: usize = 12;

/// Payloads smaller than this are never compressed.
pub(crate) const COMPRESSION_THRESHOLD: usize = 1024;
const COMPRESSION_LEVEL: i32 = 3;

#[derive(Debug, thiserror::Error)]
pub(crate) enum EnvelopeError {
    #[error("unsupported envelope version {0}")]
    UnsupportedVersion(u8),
    #[error("envelope is truncated")]
    Truncated,
    #[error("envelope tag is not valid UTF-8")]
    InvalidTag(#[source] std::str::Utf8Error),
    #[error("tag `{0}` is too long to store")]
    TagTooLong(Tag),
    #[error("entry has too many tags to store")]
    TooManyTags,
    #[error("payload could not be compressed or decompressed")]
    Compression(#[source] std::io::Error),
    #[error("envelope expiration is out of range")]
    InvalidExpiration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Envelope {
    pub expires_at: SystemTime,
    pub tags: TagSet,
    pub payload: Bytes,
}

impl Envelope {
    /// Returns how long the entry has left to live, or zero once it has expired.
    pub fn remaining(&self, now: SystemTime) -> Duration {
        self.expires_at.duration_since(now).unwrap_or_default()
    }
}

/// Wraps `payload`, `tags` and the entry's absolute expiration. The payload is compressed
/// when `compress` is set, it is at least [`COMPRESSION_THRESHOLD`] bytes and compression
/// makes it smaller.
pub(crate) fn encode(payload: &Bytes, tags: &TagSet, expires_at: SystemTime, compress: bool) -> Result<Bytes, EnvelopeError> {
    let compressed = if compress && payload.len() >= COMPRESSION_THRESHOLD {
        let compressed = zstd::bulk::compress(payload, COMPRESSION_LEVEL).map_err(EnvelopeError::Compression)?;
        (compressed.len() < payload.len()).then_some(compressed)
    } else {
        None
    };

    let body: &[u8] = compressed.as_deref().unwrap_or(payload.as_ref());
    let tags_len: usize = tags.iter().map(|tag| 2 + tag.len()).sum();
    let mut buf = BytesMut::with_capacity(HEADER_LEN + tags_len + body.len());

    buf.put_u8(VERSION);
    buf.put_u8(if compressed.is_some() { FLAG_COMPRESSED } else { 0 });
    buf.put_u64(unix_millis(expires_at));
    buf.put_u16(u16::try_from(tags.len()).map_err(|_overflow| EnvelopeError::TooManyTags)?);
    for tag in tags {
        let len = u16::try_from(tag.len()).map_err(|_overflow| EnvelopeError::TagTooLong(tag.clone()))?;
        buf.put_u16(len);
        buf.put_slice(tag.as_bytes());
    }
    buf.put_slice(body);
    Ok(buf.freeze())
}

/// Unwraps an envelope. Decompressed payloads larger than `max_payload_bytes` are rejected.
pub(crate) fn decode(mut bytes: Bytes, max_payload_bytes: usize) -> Result<Envelope, EnvelopeError> {
    if bytes.remaining() < HEADER_LEN {
        return Err(EnvelopeError::Truncated);
    }
    let version = bytes.get_u8();
    if version != VERSION {
        return Err(EnvelopeError::UnsupportedVersion(version));
    }
    let flags = bytes.get_u8();
    let expires_at = UNIX_EPOCH
        .checked_add(Duration::from_millis(bytes.get_u64()))
        .ok_or(EnvelopeError::InvalidExpiration)?;
    let count = bytes.get_u16();

    let mut tags = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        if bytes.remaining() < 2 {
            return Err(EnvelopeError::Truncated);
        }
        let len = usize::from(bytes.get_u16());
        if bytes.remaining() < len {
            return Err(EnvelopeError::Truncated);
        }
        let raw = bytes.split_to(len);
        let tag = std::str::from_utf8(&raw).map_err(EnvelopeError::InvalidTag)?;
        tags.push(Tag::from(tag));
    }

    let payload = if flags & FLAG_COMPRESSED == 0 {
        bytes
    } else {
        Bytes::from(zstd::bulk::decompress(&bytes, max_payload_bytes).map_err(EnvelopeError::Compression)?)
    };

    Ok(Envelope {
        expires_at,
        tags: tags.into_iter().collect(),
        payload,
    })
}

/// Deadlines before the epoch are stored as zero, deadlines too far out as `u64::MAX`.
fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map_or(0, |since| u64::try_from(since.as_millis()).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn in_a_minute() -> SystemTime {
        SystemTime::now() + Duration::from_secs(60)
    }

    fn tags(names: &[&str]) -> TagSet {
        names.iter().copied().collect()
    }

    #[test]
    fn small_payload_is_stored_verbatim() {
        let payload = Bytes::from_static(b"{\"id\":1}");
        let encoded = encode(&payload, &tags(&["users", "tenant:7"]), in_a_minute(), true).unwrap();
        assert_eq!(encoded[1], 0, "small payloads are not compressed");

        let decoded = decode(encoded, 1024).unwrap();
        assert_eq!(decoded.payload, payload);
        assert_eq!(decoded.tags, tags(&["tenant:7", "users"]));
    }

    #[test]
    fn large_repetitive_payload_is_compressed() {
        let payload = Bytes::from(vec![b'a'; 8 * 1024]);
        let encoded = encode(&payload, &TagSet::empty(), in_a_minute(), true).unwrap();
        assert_eq!(encoded[1], FLAG_COMPRESSED);
        assert!(encoded.len() < payload.len());

        let decoded = decode(encoded, 64 * 1024).unwrap();
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn compression_can_be_disabled() {
        let payload = Bytes::from(vec![b'a'; 8 * 1024]);
        let encoded = encode(&payload, &TagSet::empty(), in_a_minute(), false).unwrap();
        assert_eq!(encoded[1], 0);
        assert_eq!(encoded.len(), HEADER_LEN + payload.len());
    }

    #[test]
    fn decompression_is_bounded() {
        let payload = Bytes::from(vec![b'a'; 8 * 1024]);
        let encoded = encode(&payload, &TagSet::empty(), in_a_minute(), true).unwrap();
        assert!(matches!(decode(encoded, 1024), Err(EnvelopeError::Compression(_))));
    }

    #[test]
    fn expiration_travels_with_the_entry() {
        let expires_at = UNIX_EPOCH + Duration::from_millis(1_700_000_000_123);
        let encoded = encode(&Bytes::from_static(b"1"), &TagSet::empty(), expires_at, false).unwrap();

        let decoded = decode(encoded, 1024).unwrap();
        assert_eq!(decoded.expires_at, expires_at);
        assert_eq!(decoded.remaining(expires_at - Duration::from_secs(3)), Duration::from_secs(3));
        assert_eq!(decoded.remaining(expires_at + Duration::from_secs(3)), Duration::ZERO);
    }

    #[test]
    fn malformed_input_is_rejected() {
        // Version and flags, a zero expiration, then `rest`.
        fn raw(version_and_flags: [u8; 2], rest: &[u8]) -> Bytes {
            let mut buf = BytesMut::new();
            buf.put_slice(&version_and_flags);
            buf.put_u64(0);
            buf.put_slice(rest);
            buf.freeze()
        }

        assert!(matches!(decode(Bytes::from_static(b"\x01"), 1024), Err(EnvelopeError::Truncated)));
        assert!(matches!(
            decode(Bytes::from_static(b"\x01\x00\x00\x00"), 1024),
            Err(EnvelopeError::Truncated)
        ));
        assert!(matches!(
            decode(raw([9, 0], b"\x00\x00"), 1024),
            Err(EnvelopeError::UnsupportedVersion(9))
        ));
        // One tag announced, five bytes promised, two present.
        assert!(matches!(
            decode(raw([1, 0], b"\x00\x01\x00\x05ab"), 1024),
            Err(EnvelopeError::Truncated)
        ));
        assert!(matches!(
            decode(raw([1, 0], b"\x00\x01\x00\x01\xff"), 1024),
            Err(EnvelopeError::InvalidTag(_))
        ));
    }

    #[test]
    fn oversized_tag_cannot_be_stored() {
        let long = "t".repeat(usize::from(u16::MAX) + 1);
        let result = encode(&Bytes::new(), &tags(&[long.as_str()]), in_a_minute(), false);
        assert!(matches!(result, Err(EnvelopeError::TagTooLong(_))));
    }
}
