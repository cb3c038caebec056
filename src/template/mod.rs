//! Decodes a `.template` file: validates its header, parses the
//! trailer DESC table, and can materialize the template's verbatim
//! `Data` byte ranges directly into an [`ImageLayout`].
//!
//! Parsing the DESC table (end of file) and decoding the inner stream
//! (start of file, right after the header) are independent passes; the
//! stream's own `DESC` terminator tag is exactly where the trailer
//! begins, so no explicit offset needs to be threaded between them.

mod desc;
mod header;
mod stream;

pub use desc::{DataBlock, DescTable, FileRecord, ImageInfo};

use crate::error::{Error, Result};
use crate::image::ImageLayout;
use log::debug;
use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

pub struct TemplateDecoder {
    path: PathBuf,
    /// Byte offset of the first byte of the inner compressed stream,
    /// i.e. right after the header's closing CRLF.
    header_end: u64,
    pub table: DescTable,
}

impl TemplateDecoder {
    /// Opens `path`, validates its header and parses its trailer. Does
    /// not yet touch the (potentially large) compressed inner stream;
    /// call [`TemplateDecoder::write_data_blocks`] for that.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| Error::io(path.display().to_string(), e))?;

        let mut header_reader = BufReader::new(
            file.try_clone()
                .map_err(|e| Error::io(path.display().to_string(), e))?,
        );
        let version = header::validate_and_skip(&mut header_reader)?;
        let header_end = header_reader
            .stream_position()
            .map_err(|e| Error::io(path.display().to_string(), e))?;
        debug!("template {}: header version {:?}", path.display(), version);

        let mut trailer_reader = file;
        let table = desc::locate_and_parse(&mut trailer_reader)?;
        debug!(
            "template {}: {} data blocks, {} file entries, image size {}",
            path.display(),
            table.data_blocks.len(),
            table.files.len(),
            table.image_info.size
        );

        Ok(Self {
            path,
            header_end,
            table,
        })
    }

    /// Decodes the inner compressed stream and scatter-writes every
    /// verbatim `Data` range into `image` at its recorded offset.
    /// `File` ranges are left untouched; the caller's scheduler fills
    /// those in separately.
    pub fn write_data_blocks(&self, image: &ImageLayout) -> Result<()> {
        let total: u64 = self.table.data_blocks.iter().map(|b| b.size).sum();
        if total == 0 {
            return Ok(());
        }

        let mut file =
            File::open(&self.path).map_err(|e| Error::io(self.path.display().to_string(), e))?;
        file.seek(SeekFrom::Start(self.header_end))
            .map_err(|e| Error::io(self.path.display().to_string(), e))?;

        let decoded = stream::decode(&mut file, total)?;

        let mut buf_pos = 0usize;
        for block in &self.table.data_blocks {
            let end = buf_pos + block.size as usize;
            image.write_range(block.offset, &decoded[buf_pos..end])?;
            buf_pos = end;
        }
        Ok(())
    }
}
