//! Decodes the `.template` inner compressed stream: a sequence of
//! tagged chunks, each independently zlib- or bzip2-framed, terminated
//! by the `DESC` tag that marks the start of the trailer already
//! located by [`super::desc`].

use crate::compress::{self, Kind};
use crate::error::{Error, Result};
use crate::u48::read_u48_le;
use std::io::Read;

/// Overhead per chunk: the two u48 size fields (framed length,
/// decompressed length) that follow the 4-byte tag.
const CHUNK_SIZE_FIELDS_BYTES: u64 = 12;

/// Reads chunks from `r` until the `DESC` tag is seen, decompressing
/// each into a single buffer sized to `total_decompressed` (the sum of
/// every `Data` entry's size in the DESC table). A size mismatch at any
/// point, in an individual chunk or in the stream total, is a
/// `FormatError`.
pub fn decode<R: Read>(r: &mut R, total_decompressed: u64) -> Result<Vec<u8>> {
    let mut out = vec![0u8; total_decompressed as usize];
    let mut pos: usize = 0;

    loop {
        let mut tag = [0u8; 4];
        r.read_exact(&mut tag)
            .map_err(|e| Error::io("template data stream", e))?;
        if &tag == b"DESC" {
            break;
        }
        let kind = match &tag {
            b"DATA" => Kind::Zlib,
            b"BZIP" => Kind::Bzip2,
            other => {
                return Err(Error::FormatError(format!(
                    "unknown template chunk tag {:?}",
                    String::from_utf8_lossy(other)
                )))
            }
        };

        let framed_len = read_u48_le(r).map_err(|e| Error::io("template data stream", e))?;
        let decompressed_len =
            read_u48_le(r).map_err(|e| Error::io("template data stream", e))?;
        let payload_len = framed_len.checked_sub(CHUNK_SIZE_FIELDS_BYTES).ok_or_else(|| {
            Error::FormatError("chunk framed length smaller than its own header".into())
        })?;

        let mut payload = vec![0u8; payload_len as usize];
        r.read_exact(&mut payload)
            .map_err(|e| Error::io("template data stream", e))?;

        if pos as u64 + decompressed_len > total_decompressed {
            return Err(Error::FormatError(
                "template data stream exceeds the declared Data total".into(),
            ));
        }

        let end = pos + decompressed_len as usize;
        let written = compress::decompress(kind, &payload, &mut out[pos..end])?;
        if written as u64 != decompressed_len {
            return Err(Error::FormatError(format!(
                "chunk declared {} decompressed bytes but produced {}",
                decompressed_len, written
            )));
        }
        pos = end;
    }

    if pos as u64 != total_decompressed {
        return Err(Error::FormatError(format!(
            "template data stream total {} does not match declared {}",
            pos, total_decompressed
        )));
    }

    Ok(out)
}
