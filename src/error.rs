//! Error taxonomy for the reconstruction core.
//!
//! Mirrors the classification in the design doc: malformed input is
//! `FormatError`/`DecodeError`, I/O failures are `IoError`, and
//! per-file fetch/verify problems are `FetchError`/`ChecksumError`/
//! `ResolverError`/`LockError`. Workers turn the latter four into
//! `CommitStatus` transitions rather than propagating them; everything
//! else aborts reconstruction.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("malformed template: {0}")]
    FormatError(String),

    #[error("decompression failed: {0}")]
    DecodeError(String),

    #[error("I/O error on {path}: {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("fetch of {url} failed: {reason}")]
    FetchError { url: String, reason: String },

    #[error("checksum mismatch for {what}: expected {expected}, got {actual}")]
    ChecksumError {
        what: String,
        expected: String,
        actual: String,
    },

    #[error("no mirror available for md5 {0}")]
    ResolverError(String),

    #[error("lock error: {0}")]
    LockError(String),
}

impl Error {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Error::IoError {
            path: path.into(),
            source,
        }
    }
}
