//! Gzip compression of large PUBLISH payloads.
//!
//! Compression is not signalled by any protocol flag. Instead the last
//! `/`-separated level of the topic is replaced with `gzip`, and a receiver
//! inflates the payload of any topic ending in `/gzip`. A topic without a
//! separator has no level to replace, so its payload is never compressed.

use super::{
    pool::BufferPool,
    types::{DecodeError, EncodeError},
};
use bytes::{BufMut, Bytes};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use std::io::{Read, Write};

const TOPIC_SEPARATOR: char = '/';
const GZIP_LEVEL: &str = "gzip";
const GZIP_SUFFIX: &str = "/gzip";

/// Payloads longer than this many bytes are compressed by default.
pub const DEFAULT_COMPRESS_THRESHOLD: usize = 512;

/// Gzip `data` through a pooled scratch buffer.
pub fn compress(data: &[u8], level: u32, pool: &BufferPool) -> Result<Bytes, EncodeError> {
    let mut scratch = pool.acquire();

    let mut encoder = GzEncoder::new((&mut *scratch).writer(), Compression::new(level));
    encoder.write_all(data).map_err(EncodeError::Compress)?;
    encoder.finish().map_err(EncodeError::Compress)?;

    Ok(Bytes::copy_from_slice(&scratch))
}

/// Inflate `data`, failing once the output grows past `limit` bytes.
pub fn decompress(data: &[u8], limit: usize) -> Result<Bytes, DecodeError> {
    let mut decoder = GzDecoder::new(data).take(limit as u64 + 1);
    let mut inflated = Vec::new();
    decoder
        .read_to_end(&mut inflated)
        .map_err(DecodeError::Decompress)?;

    if inflated.len() > limit {
        return Err(DecodeError::InflatedSizeExceeded(limit));
    }

    Ok(inflated.into())
}

/// Replace the last level of `topic` with `gzip`, or `None` when the topic
/// has no separator.
pub fn gzip_topic(topic: &str) -> Option<String> {
    topic
        .rfind(TOPIC_SEPARATOR)
        .map(|pos| format!("{}{}{}", &topic[..pos], TOPIC_SEPARATOR, GZIP_LEVEL))
}

pub fn is_gzip_topic(topic: &str) -> bool {
    topic.ends_with(GZIP_SUFFIX)
}
