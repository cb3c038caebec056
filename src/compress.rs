//! One-shot decompression of in-memory buffers, plus whole-file gunzip
//! detection for textual manifests.
//!
//! The `.template` inner stream only ever uses zlib or bzip2 framing
//! (spec.md §4.A, §4.C); gzip only shows up when the caller hands us a
//! gzip-compressed `.jigdo` file to read, which is handled separately
//! by [`maybe_gunzip_in_place`] and never touches the template path.

use crate::error::{Error, Result};
use bzip2::read::BzDecoder;
use flate2::read::{GzDecoder, ZlibDecoder};
use std::io::{Cursor, Read, Write};
use std::io::{Seek, SeekFrom};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Zlib,
    Bzip2,
}

/// Decompresses `input` into `output`, returning the number of bytes
/// written. `output` must already be sized to hold the decompressed
/// data; writing past its end is an error rather than a reallocation.
pub fn decompress(kind: Kind, input: &[u8], output: &mut [u8]) -> Result<usize> {
    let mut cursor = BoundedWriter::new(output);
    let result = match kind {
        Kind::Zlib => {
            let mut dec = ZlibDecoder::new(input);
            std::io::copy(&mut dec, &mut cursor)
        }
        Kind::Bzip2 => {
            let mut dec = BzDecoder::new(input);
            std::io::copy(&mut dec, &mut cursor)
        }
    };
    result
        .map(|n| n as usize)
        .map_err(|e| Error::DecodeError(format!("{:?} decode failed: {}", kind, e)))
}

/// A `Write` sink over a caller-owned slice that errors instead of
/// growing past its end, so `decompress` can detect a decompressed
/// size larger than the DESC table promised.
struct BoundedWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> BoundedWriter<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }
}

impl Write for BoundedWriter<'_> {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        let remaining = self.buf.len() - self.pos;
        if data.len() > remaining {
            return Err(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "decompressed output exceeds allocated buffer",
            ));
        }
        self.buf[self.pos..self.pos + data.len()].copy_from_slice(data);
        self.pos += data.len();
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// If `handle`'s contents are gzip-framed, returns a scratch in-memory
/// handle containing the inflated bytes; otherwise rewinds and returns
/// the original handle untouched. Only used for textual manifests.
pub fn maybe_gunzip_in_place<R: Read + Seek>(mut handle: R) -> Result<Box<dyn Read>> {
    let mut magic = [0u8; 2];
    let read = handle
        .read(&mut magic)
        .map_err(|e| Error::io("manifest", e))?;
    handle
        .seek(SeekFrom::Start(0))
        .map_err(|e| Error::io("manifest", e))?;
    if read == 2 && magic == [0x1f, 0x8b] {
        let mut inflated = Vec::new();
        GzDecoder::new(handle)
            .read_to_end(&mut inflated)
            .map_err(|e| Error::DecodeError(format!("gunzip failed: {}", e)))?;
        Ok(Box::new(Cursor::new(inflated)))
    } else {
        Ok(Box::new(handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;

    fn zlib_compress(data: &[u8]) -> Vec<u8> {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn zlib_round_trip() {
        let compressed = zlib_compress(b"hello");
        let mut out = [0u8; 5];
        let n = decompress(Kind::Zlib, &compressed, &mut out).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&out, b"hello");
    }

    #[test]
    fn zlib_output_too_small_is_an_error() {
        let compressed = zlib_compress(b"hello world");
        let mut out = [0u8; 4];
        assert!(decompress(Kind::Zlib, &compressed, &mut out).is_err());
    }

    #[test]
    fn truncated_input_is_an_error() {
        let compressed = zlib_compress(b"hello world, this is a longer payload");
        let mut out = [0u8; 64];
        assert!(decompress(Kind::Zlib, &compressed[..compressed.len() / 2], &mut out).is_err());
    }

    #[test]
    fn gunzip_detects_magic() {
        use flate2::write::GzEncoder;
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"plain text manifest").unwrap();
        let gz = enc.finish().unwrap();
        let mut reader = maybe_gunzip_in_place(Cursor::new(gz)).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"plain text manifest");
    }

    #[test]
    fn gunzip_passes_through_plain_text() {
        let mut reader = maybe_gunzip_in_place(Cursor::new(b"[Jigdo]\n".to_vec())).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"[Jigdo]\n");
    }
}
