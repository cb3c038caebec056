//! Validates the `.template` text header and locates the end of it.
//!
//! The header is a single ASCII version line followed by a comment
//! block, both CRLF-terminated (spec.md §4.C). spec.md describes the
//! minimal case as "three CRLF terminators in total" (one for the
//! version line, two for a single-line comment block), but a real
//! comment block may run to any number of lines before its closing
//! blank line, so this reads lines until it hits that blank line
//! rather than assuming a fixed count (see DESIGN.md). Neither piece is
//! length-prefixed, so the only way to find the end of the header is to
//! scan for it.

use crate::error::{Error, Result};
use std::io::Read;

const EXPECTED_PREFIX: &str = "JigsawDownload template 1.";

/// Reads and validates the version line, then discards bytes up to and
/// including the comment block's closing CRLF. Leaves `r` positioned at
/// the first byte of the inner compressed stream. Returns the version
/// line (without its trailing CRLF) for diagnostic logging.
pub fn validate_and_skip<R: Read>(r: &mut R) -> Result<String> {
    let version_line = read_crlf_line(r)?;
    let version_line = String::from_utf8(version_line)
        .map_err(|_| Error::FormatError("template version line is not valid ASCII".into()))?;
    if !version_line.starts_with(EXPECTED_PREFIX) {
        return Err(Error::FormatError(format!(
            "unsupported template version line: {:?}",
            version_line
        )));
    }
    // The comment block is zero or more CRLF-terminated lines, closed by
    // the first empty (blank) line.
    loop {
        let line = read_crlf_line(r)?;
        if line.is_empty() {
            break;
        }
    }
    Ok(version_line)
}

/// Reads bytes up to and including the next CRLF, returning everything
/// before it.
fn read_crlf_line<R: Read>(r: &mut R) -> Result<Vec<u8>> {
    let mut line = Vec::new();
    let mut prev = 0u8;
    let mut byte = [0u8; 1];
    loop {
        let n = r
            .read(&mut byte)
            .map_err(|e| Error::io("template header", e))?;
        if n == 0 {
            return Err(Error::FormatError("truncated template header".into()));
        }
        if prev == b'\r' && byte[0] == b'\n' {
            line.pop(); // drop the trailing '\r' pushed on the prior iteration
            break;
        }
        line.push(byte[0]);
        prev = byte[0];
    }
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn accepts_minimal_header() {
        let mut c = Cursor::new(b"JigsawDownload template 1.0\r\n\r\nDATA...".to_vec());
        let version = validate_and_skip(&mut c).unwrap();
        assert_eq!(version, "JigsawDownload template 1.0");
        let mut rest = Vec::new();
        c.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"DATA...");
    }

    #[test]
    fn accepts_header_with_comment_block() {
        let mut c = Cursor::new(
            b"JigsawDownload template 1.0\r\n# Some comment\r\n# more\r\n\r\nDATA...".to_vec(),
        );
        validate_and_skip(&mut c).unwrap();
        let mut rest = Vec::new();
        c.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"DATA...");
    }

    #[test]
    fn accepts_header_with_a_single_comment_line() {
        // spec.md §4.C's minimal literal reading: version line, one
        // comment line, then the closing blank line (three CRLFs total).
        let mut c = Cursor::new(b"JigsawDownload template 1.0\r\n# one line\r\n\r\nDATA...".to_vec());
        validate_and_skip(&mut c).unwrap();
        let mut rest = Vec::new();
        c.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"DATA...");
    }

    #[test]
    fn rejects_unsupported_major_version() {
        let mut c = Cursor::new(b"JigsawDownload template 2.0\r\n\r\n".to_vec());
        assert!(validate_and_skip(&mut c).is_err());
    }

    #[test]
    fn rejects_truncated_header() {
        let mut c = Cursor::new(b"JigsawDownload template 1.0\r\n".to_vec());
        assert!(validate_and_skip(&mut c).is_err());
    }

    #[test]
    fn rejects_garbage_prefix() {
        let mut c = Cursor::new(b"not a template at all\r\n\r\n".to_vec());
        assert!(validate_and_skip(&mut c).is_err());
    }
}
