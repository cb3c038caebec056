//! Locates and parses the trailer-indexed DESC record table.
//!
//! The table sits at the very end of the `.template` file. The last 6
//! bytes of the file give its total size (spec.md §4.C); the table
//! itself repeats that size right after a `DESC` tag so the two can be
//! cross-checked before any entry is trusted.

use crate::error::{Error, Result};
use crate::hash::Md5;
use crate::u48::read_u48_le;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Read, Seek, SeekFrom};

/// The terminal entry: declares the target image's total length, its
/// whole-file digest and the rsync block length used by the (unused
/// here) rsync-based matching scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub size: u64,
    pub md5: Md5,
    pub rsync64_block_len: u32,
}

/// A verbatim byte range copied straight out of the template's inner
/// stream into the image, with no external fetch involved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataBlock {
    pub offset: u64,
    pub size: u64,
}

/// A byte range that must be reconstructed by fetching the named
/// component file and placing its bytes at `offset`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub offset: u64,
    pub size: u64,
    pub md5: Md5,
    pub rsync64_initial: u64,
}

/// The fully parsed, order-preserved DESC table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescTable {
    pub image_info: ImageInfo,
    pub data_blocks: Vec<DataBlock>,
    pub files: Vec<FileRecord>,
}

const DESC_TAG: &[u8; 4] = b"DESC";
/// Tag(4) + duplicate size(6) header, plus the trailing size(6) field.
const TABLE_FRAMING_BYTES: u64 = 4 + 6 + 6;

/// Seeks `r` to the end, locates the DESC trailer and parses every
/// entry in file order.
pub fn locate_and_parse<R: Read + Seek>(r: &mut R) -> Result<DescTable> {
    let file_len = r
        .seek(SeekFrom::End(0))
        .map_err(|e| Error::io("template", e))?;
    if file_len < TABLE_FRAMING_BYTES {
        return Err(Error::FormatError("template file too small for a DESC table".into()));
    }

    r.seek(SeekFrom::End(-6)).map_err(|e| Error::io("template", e))?;
    let table_size = read_u48_le(r).map_err(|e| Error::io("template", e))?;
    if table_size < TABLE_FRAMING_BYTES || table_size > file_len {
        return Err(Error::FormatError(format!(
            "implausible DESC table size {}",
            table_size
        )));
    }

    let table_start = file_len - table_size;
    r.seek(SeekFrom::Start(table_start))
        .map_err(|e| Error::io("template", e))?;

    let mut tag = [0u8; 4];
    r.read_exact(&mut tag).map_err(|e| Error::io("template", e))?;
    if &tag != DESC_TAG {
        return Err(Error::FormatError("missing DESC tag at computed offset".into()));
    }
    let duplicate_size = read_u48_le(r).map_err(|e| Error::io("template", e))?;
    if duplicate_size != table_size {
        return Err(Error::FormatError(
            "DESC table size fields disagree".into(),
        ));
    }

    let entries_end = file_len - 6;
    let mut image_offset: u64 = 0;
    let mut data_blocks = Vec::new();
    let mut files = Vec::new();

    let image_info = loop {
        let pos = r
            .stream_position()
            .map_err(|e| Error::io("template", e))?;
        if pos >= entries_end {
            return Err(Error::FormatError(
                "DESC table ended without a terminal ImageInfo entry".into(),
            ));
        }

        let mut type_byte = [0u8; 1];
        r.read_exact(&mut type_byte)
            .map_err(|e| Error::io("template", e))?;
        let entry_size = read_u48_le(r).map_err(|e| Error::io("template", e))?;

        match type_byte[0] {
            // Legacy ImageInfo: MD5 only, no rsync block length.
            1 => {
                let md5 = read_md5(r)?;
                check_terminal(image_offset, entry_size)?;
                break ImageInfo {
                    size: entry_size,
                    md5,
                    rsync64_block_len: 0,
                };
            }
            // ImageInfo: MD5 + rsync block length.
            5 => {
                let md5 = read_md5(r)?;
                let rsync64_block_len = r
                    .read_u32::<LittleEndian>()
                    .map_err(|e| Error::io("template", e))?;
                check_terminal(image_offset, entry_size)?;
                break ImageInfo {
                    size: entry_size,
                    md5,
                    rsync64_block_len,
                };
            }
            // Data: verbatim bytes carried in the inner stream.
            2 => {
                if entry_size == 0 {
                    return Err(Error::FormatError("zero-size Data entry".into()));
                }
                data_blocks.push(DataBlock {
                    offset: image_offset,
                    size: entry_size,
                });
                image_offset += entry_size;
            }
            // Legacy File: MD5 only, no rsync seed.
            3 => {
                if entry_size == 0 {
                    return Err(Error::FormatError("zero-size File entry".into()));
                }
                let md5 = read_md5(r)?;
                files.push(FileRecord {
                    offset: image_offset,
                    size: entry_size,
                    md5,
                    rsync64_initial: 0,
                });
                image_offset += entry_size;
            }
            // File: rsync initial checksum + MD5.
            6 => {
                if entry_size == 0 {
                    return Err(Error::FormatError("zero-size File entry".into()));
                }
                let rsync64_initial = r
                    .read_u64::<LittleEndian>()
                    .map_err(|e| Error::io("template", e))?;
                let md5 = read_md5(r)?;
                files.push(FileRecord {
                    offset: image_offset,
                    size: entry_size,
                    md5,
                    rsync64_initial,
                });
                image_offset += entry_size;
            }
            other => {
                return Err(Error::FormatError(format!(
                    "unknown DESC entry type {}",
                    other
                )))
            }
        }
    };

    let pos = r
        .stream_position()
        .map_err(|e| Error::io("template", e))?;
    if pos != entries_end {
        return Err(Error::FormatError(
            "trailing bytes between terminal ImageInfo and table size field".into(),
        ));
    }

    Ok(DescTable {
        image_info,
        data_blocks,
        files,
    })
}

fn check_terminal(image_offset: u64, entry_size: u64) -> Result<()> {
    if image_offset != entry_size {
        return Err(Error::FormatError(format!(
            "ImageInfo size {} does not match accumulated offset {}",
            entry_size, image_offset
        )));
    }
    Ok(())
}

fn read_md5<R: Read>(r: &mut R) -> Result<Md5> {
    let mut buf = [0u8; 16];
    r.read_exact(&mut buf).map_err(|e| Error::io("template", e))?;
    Ok(Md5(buf))
}
