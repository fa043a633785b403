use std::io::Read;

use serde::{Deserialize, Serialize};

use vger_types::error::{Result, VgerError};

const TAG_NONE: u8 = 0x00;
const TAG_LZ4: u8 = 0x01;
const TAG_ZSTD: u8 = 0x02;

/// Largest decoded chunk accepted.
const MAX_DECOMPRESS_SIZE: u64 = 32 * 1024 * 1024;

/// Codec used when a chunk is first written. Transfers never pick a codec:
/// the encoded payload moves between repositories unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    #[default]
    Lz4,
    Zstd {
        level: i32,
    },
}

/// Encode `data` as `[codec tag][body]`.
pub fn compress(compression: Compression, data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() / 2 + 16);
    match compression {
        Compression::None => {
            out.push(TAG_NONE);
            out.extend_from_slice(data);
        }
        Compression::Lz4 => {
            out.push(TAG_LZ4);
            out.extend(lz4_flex::compress_prepend_size(data));
        }
        Compression::Zstd { level } => {
            out.push(TAG_ZSTD);
            let body = zstd::bulk::compress(data, level)
                .map_err(|e| VgerError::Other(format!("zstd level {level}: {e}")))?;
            out.extend(body);
        }
    }
    Ok(out)
}

/// Inverse of [`compress`]; the codec comes from the leading tag.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    match data.split_first() {
        None => Err(VgerError::Decompression("empty data".into())),
        Some((&TAG_NONE, body)) => Ok(body.to_vec()),
        Some((&TAG_LZ4, body)) => decode_lz4(body),
        Some((&TAG_ZSTD, body)) => decode_zstd(body),
        Some((&tag, _)) => Err(VgerError::UnknownCompressionTag(tag)),
    }
}

fn too_large(codec: &str) -> VgerError {
    VgerError::Decompression(format!(
        "{codec}: output would exceed {MAX_DECOMPRESS_SIZE} bytes"
    ))
}

fn decode_lz4(body: &[u8]) -> Result<Vec<u8>> {
    let declared = body
        .get(..4)
        .and_then(|len| <[u8; 4]>::try_from(len).ok())
        .map(|len| u64::from(u32::from_le_bytes(len)))
        .ok_or_else(|| VgerError::Decompression("lz4: missing length prefix".into()))?;
    if declared > MAX_DECOMPRESS_SIZE {
        return Err(too_large("lz4"));
    }
    lz4_flex::decompress_size_prepended(body)
        .map_err(|e| VgerError::Decompression(format!("lz4: {e}")))
}

fn decode_zstd(body: &[u8]) -> Result<Vec<u8>> {
    let decoder = zstd::stream::Decoder::new(body)
        .map_err(|e| VgerError::Decompression(format!("zstd: {e}")))?;
    let mut out = Vec::new();
    decoder
        .take(MAX_DECOMPRESS_SIZE + 1)
        .read_to_end(&mut out)
        .map_err(|e| VgerError::Decompression(format!("zstd: {e}")))?;
    if out.len() as u64 > MAX_DECOMPRESS_SIZE {
        return Err(too_large("zstd"));
    }
    Ok(out)
}
