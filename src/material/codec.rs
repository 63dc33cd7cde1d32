//! material/codec — сжатие тела material (0 = как есть, 1 = zstd).

use std::io::Read;

use crate::consts::{MATERIAL_CODEC_NONE, MATERIAL_CODEC_ZSTD, MATERIAL_ZSTD_LEVEL};
use crate::error::{RepairError, Result};

/// Верхняя граница распакованного тела.
const MAX_BODY: u64 = 1 << 30;

pub fn encode_body(codec: u8, body: &[u8]) -> Result<Vec<u8>> {
    match codec {
        MATERIAL_CODEC_NONE => Ok(body.to_vec()),
        MATERIAL_CODEC_ZSTD => zstd::stream::encode_all(body, MATERIAL_ZSTD_LEVEL)
            .map_err(|e| RepairError::new(crate::error::ErrorKind::Io, format!("zstd encode: {}", e))),
        other => Err(RepairError::format(format!("unknown material codec {}", other))),
    }
}

pub fn decode_body(codec: u8, stored: &[u8]) -> Result<Vec<u8>> {
    match codec {
        MATERIAL_CODEC_NONE => Ok(stored.to_vec()),
        MATERIAL_CODEC_ZSTD => {
            let decoder = zstd::stream::read::Decoder::new(stored)
                .map_err(|e| RepairError::corruption(format!("zstd decoder init: {}", e)))?;
            let mut out = Vec::new();
            decoder
                .take(MAX_BODY)
                .read_to_end(&mut out)
                .map_err(|e| RepairError::corruption(format!("zstd decode: {}", e)))?;
            Ok(out)
        }
        other => Err(RepairError::format(format!("unknown material codec {}", other))),
    }
}
