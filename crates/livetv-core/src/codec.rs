//! Opaque URL tokens.
//!
//! A token is the zlib-deflated payload encoded as unpadded URL-safe base64,
//! so it can be dropped into a query value without escaping. The payload is
//! the URL itself, optionally followed by one `Name: value` line per header.

use std::collections::BTreeMap;
use std::io::Write;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use flate2::write::ZlibEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};
use thiserror::Error;

/// Inflated payloads larger than this are rejected.
const MAX_PAYLOAD: u64 = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("empty token")]
    Empty,
    #[error("token is not valid base64: {0}")]
    Base64(String),
    #[error("token payload is corrupt: {0}")]
    Inflate(String),
    #[error("token payload is truncated")]
    Truncated,
    #[error("token payload exceeds {MAX_PAYLOAD} bytes")]
    TooLarge,
    #[error("token payload is not UTF-8")]
    Utf8,
}

pub fn encode(url: &str) -> String {
    pack(url)
}

pub fn decode(token: &str) -> Result<String, DecodeError> {
    let (url, _) = decode_with_headers(token)?;
    Ok(url)
}

/// Encodes a URL together with headers to replay upstream.
pub fn encode_with_headers(url: &str, headers: &BTreeMap<String, String>) -> String {
    if headers.is_empty() {
        return pack(url);
    }
    let mut payload = String::from(url);
    for (name, value) in headers {
        payload.push('\n');
        payload.push_str(name.trim());
        payload.push_str(": ");
        payload.push_str(&value.replace(['\r', '\n'], " "));
    }
    pack(&payload)
}

pub fn decode_with_headers(
    token: &str,
) -> Result<(String, BTreeMap<String, String>), DecodeError> {
    let token = token.trim().trim_end_matches('=');
    if token.is_empty() {
        return Err(DecodeError::Empty);
    }

    let compressed = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|e| DecodeError::Base64(e.to_string()))?;

    let inflated = inflate(&compressed)?;
    let payload = String::from_utf8(inflated).map_err(|_| DecodeError::Utf8)?;
    let mut lines = payload.split('\n');
    let url = lines.next().unwrap_or_default().to_string();
    if url.is_empty() {
        return Err(DecodeError::Empty);
    }

    let headers = lines
        .filter_map(|line| line.split_once(": "))
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect();
    Ok((url, headers))
}

fn inflate(compressed: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut inflater = Decompress::new(true);
    let mut out = Vec::with_capacity(compressed.len() * 4 + 64);
    loop {
        if out.len() == out.capacity() {
            out.reserve(out.capacity().max(256));
        }
        let (in_before, out_before) = (inflater.total_in(), inflater.total_out());
        let status = inflater
            .decompress_vec(
                &compressed[in_before as usize..],
                &mut out,
                FlushDecompress::Finish,
            )
            .map_err(|e| DecodeError::Inflate(e.to_string()))?;
        if out.len() as u64 > MAX_PAYLOAD {
            return Err(DecodeError::TooLarge);
        }
        match status {
            Status::StreamEnd => return Ok(out),
            _ if inflater.total_in() == in_before && inflater.total_out() == out_before => {
                return Err(DecodeError::Truncated)
            }
            _ => {}
        }
    }
}

fn pack(payload: &str) -> String {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(payload.len()), Compression::best());
    encoder
        .write_all(payload.as_bytes())
        .expect("writing into a Vec cannot fail");
    let compressed = encoder.finish().expect("writing into a Vec cannot fail");
    URL_SAFE_NO_PAD.encode(compressed)
}
