//! Matched compress/decompress pair for the storage field: zlib-deflated
//! scene JSON, base64 encoded so it survives any text-typed field.

use std::io::{Read, Write};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

pub fn compress_to_base64(text: &str) -> String {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    // writing into a Vec cannot fail
    let _ = encoder.write_all(text.as_bytes());
    let compressed = encoder.finish().unwrap_or_default();
    STANDARD.encode(compressed)
}

/// Decode a stored value. Malformed input (bad base64, bad deflate stream,
/// non-UTF-8 payload) yields `None` — the caller treats it as "no value".
pub fn decompress_from_base64(value: &str) -> Option<String> {
    let compressed = STANDARD.decode(value.trim()).ok()?;
    let mut text = String::new();
    ZlibDecoder::new(compressed.as_slice())
        .read_to_string(&mut text)
        .ok()?;
    Some(text)
}
