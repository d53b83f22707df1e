//! # Request/Response Codec
//!
//! Content-type (JSON vs. MessagePack) and content-encoding (lz4/gzip/
//! deflate) negotiation for `/rpc`, grounded on
//! `original_source/opsiconfd/application/jsonrpc.py`'s `decode_request`/
//! `encode_response`. Response compression is only applied when the
//! uncompressed body exceeds the spec's ~10 000-byte threshold (spec §8
//! boundary behavior).

use core_shared::{ServiceError, ServiceResult};
use serde_json::Value;
use std::io::{Read, Write};

/// Negotiated body shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Json,
    MsgPack,
}

impl ContentType {
    pub fn from_header(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.contains("msgpack") => Self::MsgPack,
            _ => Self::Json,
        }
    }

    pub fn as_header_value(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::MsgPack => "application/msgpack",
        }
    }
}

/// Negotiated compression scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Lz4,
    Gzip,
    Deflate,
}

/// Body below this size is never compressed, even if the client requested
/// it, per spec §8.
pub const MIN_COMPRESS_BYTES: usize = 10_000;

impl Compression {
    pub fn from_content_encoding(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.contains("lz4") => Self::Lz4,
            Some(v) if v.contains("gzip") => Self::Gzip,
            Some(v) if v.contains("deflate") => Self::Deflate,
            _ => Self::None,
        }
    }

    /// Picks the best encoding the client accepts, given a response body
    /// size. Returns `None` when the body is too small to bother.
    pub fn negotiate_response(accept_encoding: Option<&str>, body_len: usize) -> Self {
        if body_len < MIN_COMPRESS_BYTES {
            return Self::None;
        }
        let header = accept_encoding.unwrap_or("");
        if header.contains("lz4") {
            Self::Lz4
        } else if header.contains("gzip") {
            Self::Gzip
        } else if header.contains("deflate") {
            Self::Deflate
        } else {
            Self::None
        }
    }

    pub fn as_header_value(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Lz4 => Some("lz4"),
            Self::Gzip => Some("gzip"),
            Self::Deflate => Some("deflate"),
        }
    }
}

/// Decodes an inbound request body into a [`serde_json::Value`], applying
/// the negotiated decompression and content-type parsing.
pub fn decode_request(
    body: &[u8],
    content_type: ContentType,
    content_encoding: Compression,
) -> ServiceResult<Value> {
    let decompressed = decompress(body, content_encoding)?;
    match content_type {
        ContentType::Json => serde_json::from_slice(&decompressed)
            .map_err(|e| ServiceError::BadRequest { message: format!("invalid JSON body: {e}") }),
        ContentType::MsgPack => rmp_serde::from_slice(&decompressed)
            .map_err(|e| ServiceError::BadRequest { message: format!("invalid MessagePack body: {e}") }),
    }
}

/// Encodes a response value in the requested content type, then compresses
/// it if the negotiated scheme and size threshold call for it. Returns the
/// bytes and the encoding actually applied (may be `None` even if
/// requested, when the body was too small).
pub fn encode_response(
    value: &Value,
    content_type: ContentType,
    accept_encoding: Option<&str>,
) -> ServiceResult<(Vec<u8>, Compression)> {
    let serialized = match content_type {
        ContentType::Json => {
            serde_json::to_vec(value).map_err(|e| ServiceError::Internal { message: e.to_string() })?
        }
        ContentType::MsgPack => {
            rmp_serde::to_vec(value).map_err(|e| ServiceError::Internal { message: e.to_string() })?
        }
    };

    let encoding = Compression::negotiate_response(accept_encoding, serialized.len());
    let compressed = compress(&serialized, encoding)?;
    Ok((compressed, encoding))
}

fn decompress(body: &[u8], encoding: Compression) -> ServiceResult<Vec<u8>> {
    match encoding {
        Compression::None => Ok(body.to_vec()),
        Compression::Lz4 => lz4_flex::decompress_size_prepended(body)
            .map_err(|e| ServiceError::BadRequest { message: format!("lz4 decompression failed: {e}") }),
        Compression::Gzip => {
            let mut decoder = flate2::read::GzDecoder::new(body);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| ServiceError::BadRequest { message: format!("gzip decompression failed: {e}") })?;
            Ok(out)
        }
        Compression::Deflate => {
            let mut decoder = flate2::read::DeflateDecoder::new(body);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| ServiceError::BadRequest { message: format!("deflate decompression failed: {e}") })?;
            Ok(out)
        }
    }
}

fn compress(body: &[u8], encoding: Compression) -> ServiceResult<Vec<u8>> {
    match encoding {
        Compression::None => Ok(body.to_vec()),
        Compression::Lz4 => Ok(lz4_flex::compress_prepend_size(body)),
        Compression::Gzip => {
            let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
            encoder
                .write_all(body)
                .map_err(|e| ServiceError::Internal { message: format!("gzip compression failed: {e}") })?;
            encoder.finish().map_err(|e| ServiceError::Internal { message: format!("gzip compression failed: {e}") })
        }
        Compression::Deflate => {
            let mut encoder = flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::fast());
            encoder
                .write_all(body)
                .map_err(|e| ServiceError::Internal { message: format!("deflate compression failed: {e}") })?;
            encoder
                .finish()
                .map_err(|e| ServiceError::Internal { message: format!("deflate compression failed: {e}") })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn small_body_is_never_compressed() {
        let encoding = Compression::negotiate_response(Some("gzip"), MIN_COMPRESS_BYTES - 1);
        assert_eq!(encoding, Compression::None);
    }

    #[test]
    fn large_body_picks_requested_encoding() {
        let encoding = Compression::negotiate_response(Some("gzip, deflate"), MIN_COMPRESS_BYTES + 1);
        assert_eq!(encoding, Compression::Gzip);
    }

    #[test]
    fn json_round_trips_through_encode_decode() {
        let value = json!({"a": 1, "b": [1, 2, 3]});
        let (bytes, encoding) = encode_response(&value, ContentType::Json, None).unwrap();
        assert_eq!(encoding, Compression::None);
        let decoded = decode_request(&bytes, ContentType::Json, Compression::None).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn msgpack_round_trips_through_encode_decode() {
        let value = json!({"a": 1, "b": "two"});
        let (bytes, _) = encode_response(&value, ContentType::MsgPack, None).unwrap();
        let decoded = decode_request(&bytes, ContentType::MsgPack, Compression::None).unwrap();
        assert_eq!(decoded, value);
    }
}
