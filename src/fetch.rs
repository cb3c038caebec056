//! The `Fetcher` abstraction: streams a component file's bytes into a
//! caller-owned destination buffer. The scheduler and worker pool only
//! ever see this trait; HTTP and local-file retrieval are concrete,
//! swappable implementations (spec.md §2, §4.G).
//!
//! The progress-reporting wrapper follows the layered-`Read` pattern
//! `coreos-installer` uses for its own downloads, trimmed to the one
//! thing the core needs: a running byte count, not terminal fanciness.

use crate::error::{Error, Result};
use crate::mirror::Source;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Retrieves the bytes for one component file into `dst`, which is
/// already sized to exactly the expected length. `on_progress` is
/// invoked with the cumulative byte count after every underlying read.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, source: &Source, dst: &mut [u8], on_progress: &mut dyn FnMut(u64)) -> Result<()>;
}

struct ProgressReader<'a, R> {
    inner: R,
    position: u64,
    on_progress: &'a mut dyn FnMut(u64),
}

impl<'a, R: Read> Read for ProgressReader<'a, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.position += n as u64;
        (self.on_progress)(self.position);
        Ok(n)
    }
}

/// Fetches over HTTP(S) via a blocking `reqwest` client.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .build()
            .map_err(|e| Error::FetchError {
                url: String::new(),
                reason: format!("building HTTP client: {}", e),
            })?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, source: &Source, dst: &mut [u8], on_progress: &mut dyn FnMut(u64)) -> Result<()> {
        let url = match source {
            Source::Remote(url) => url,
            Source::Local(path) => {
                return Err(Error::FetchError {
                    url: path.display().to_string(),
                    reason: "HttpFetcher cannot fetch a local path".into(),
                })
            }
        };

        let response = self
            .client
            .get(url.clone())
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::FetchError {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let mut reader = ProgressReader {
            inner: response,
            position: 0,
            on_progress,
        };
        reader.read_exact(dst).map_err(|e| Error::FetchError {
            url: url.to_string(),
            reason: format!("short read ({} bytes wanted): {}", dst.len(), e),
        })
    }
}

/// Fetches from a path already present on the local filesystem, e.g. a
/// resolved mirror whose base URL is itself a directory, or a manifest
/// literal entry with no mirror label.
pub struct FileFetcher;

impl Fetcher for FileFetcher {
    fn fetch(&self, source: &Source, dst: &mut [u8], on_progress: &mut dyn FnMut(u64)) -> Result<()> {
        let path = match source {
            Source::Local(path) => path,
            Source::Remote(url) => {
                return Err(Error::FetchError {
                    url: url.to_string(),
                    reason: "FileFetcher cannot fetch a remote URL".into(),
                })
            }
        };
        fetch_path(path, dst, on_progress)
    }
}

/// Routes each fetch to `HttpFetcher` or `FileFetcher` depending on the
/// resolved `Source`, so a single `Fetcher` can serve a manifest that
/// mixes remote mirrors with local-directory matches.
pub struct DispatchFetcher {
    http: HttpFetcher,
    file: FileFetcher,
}

impl DispatchFetcher {
    pub fn new() -> Result<Self> {
        Ok(Self {
            http: HttpFetcher::new()?,
            file: FileFetcher,
        })
    }
}

impl Fetcher for DispatchFetcher {
    fn fetch(&self, source: &Source, dst: &mut [u8], on_progress: &mut dyn FnMut(u64)) -> Result<()> {
        match source {
            Source::Remote(_) => self.http.fetch(source, dst, on_progress),
            Source::Local(_) => self.file.fetch(source, dst, on_progress),
        }
    }
}

fn fetch_path(path: &Path, dst: &mut [u8], on_progress: &mut dyn FnMut(u64)) -> Result<()> {
    let file = File::open(path).map_err(|e| Error::io(path.display().to_string(), e))?;
    let mut reader = ProgressReader {
        inner: file,
        position: 0,
        on_progress,
    };
    reader.read_exact(dst).map_err(|e| Error::FetchError {
        url: path.display().to_string(),
        reason: format!("short read ({} bytes wanted): {}", dst.len(), e),
    })
}
