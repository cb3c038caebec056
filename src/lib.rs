//! Reconstructs a target image file from a `.jigdo` manifest and its
//! matching `.template` file (spec.md §1-§2).
//!
//! [`Reconstructor`] is the library's single entry point: it decodes
//! the template, scatter-writes its verbatim `Data` ranges, then hands
//! every `File` entry to a [`scheduler::Scheduler`] that fetches,
//! verifies and commits them concurrently. Parsing the `.jigdo` text
//! format and wiring up a concrete `Fetcher`/CLI are left to
//! [`jigdo`]/[`fetch`] and the `jigdo-assemble` binary respectively.

pub mod compress;
pub mod error;
pub mod fetch;
pub mod hash;
pub mod image;
pub mod jigdo;
pub mod manifest;
pub mod mirror;
pub mod progress;
pub mod scheduler;
pub mod template;
mod u48;
pub mod worker;

pub use error::{Error, Result};
pub use hash::Md5;
pub use manifest::Manifest;
pub use mirror::MirrorResolver;
pub use scheduler::Scheduler;
pub use template::TemplateDecoder;

use fetch::Fetcher;
use image::ImageLayout;
use log::info;
use std::path::Path;
use std::sync::Arc;

/// Number of bounded retries a `File` entry gets before its status
/// escalates to `FatalError` (spec.md §9, decided in DESIGN.md: exceeds
/// a typical jigdo server's mirror count while still terminating).
pub const MAX_RETRIES: u32 = 5;

/// Worker count used when the caller has no opinion, mirroring
/// `num_cpus::get()` clamped to a sane range.
pub fn default_worker_count() -> usize {
    num_cpus::get().clamp(1, 64)
}

/// Drives a complete reconstruction: decode the template, scatter-write
/// its `Data` ranges, then fetch and verify every `File` entry.
pub struct Reconstructor {
    decoder: TemplateDecoder,
    manifest: Manifest,
}

impl Reconstructor {
    pub fn new(decoder: TemplateDecoder, manifest: Manifest) -> Self {
        Self { decoder, manifest }
    }

    /// Opens `template_path` and builds a `Reconstructor` for it
    /// against the already-parsed `manifest`.
    pub fn open(template_path: impl AsRef<Path>, manifest: Manifest) -> Result<Self> {
        let decoder = TemplateDecoder::open(template_path)?;
        Ok(Self::new(decoder, manifest))
    }

    pub fn image_size(&self) -> u64 {
        self.decoder.table.image_info.size
    }

    /// Opens/sizes the output file, scatter-writes every `Data` range
    /// into it, and builds the [`Scheduler`] that will fetch the
    /// remaining `File` entries. Split out from [`Reconstructor::run`]
    /// so a caller (the CLI) can attach a
    /// [`progress::ProgressReporter`] to the returned `Scheduler`
    /// before calling [`Scheduler::run`] itself.
    ///
    /// `extra_mirrors` is a list of `(label, url-or-path)` pairs applied
    /// via [`MirrorResolver::add_server_mirror`] before any fetching
    /// starts, so a caller-supplied `--mirror` flag goes through the
    /// same existence/canonicalization checks as one wired in any other
    /// way (spec.md §4.E).
    pub fn prepare(
        &self,
        output_path: impl AsRef<Path>,
        local_dirs: Vec<std::path::PathBuf>,
        extra_mirrors: Vec<(String, String)>,
        fetcher: Box<dyn Fetcher>,
    ) -> Result<Arc<Scheduler>> {
        let image = ImageLayout::create_or_open(output_path, self.image_size())?;
        info!(
            "reconstructing {} bytes across {} data block(s) and {} file(s)",
            self.image_size(),
            self.decoder.table.data_blocks.len(),
            self.decoder.table.files.len()
        );

        self.decoder.write_data_blocks(&image)?;

        let mut resolver = MirrorResolver::new(self.manifest.clone(), local_dirs);
        for (label, value) in extra_mirrors {
            resolver.add_server_mirror(label, value)?;
        }
        Ok(Arc::new(Scheduler::new(
            self.decoder.table.files.clone(),
            image,
            self.decoder.table.image_info.md5,
            resolver,
            fetcher,
            MAX_RETRIES,
        )))
    }

    /// Reconstructs the image at `output_path` end to end, with no
    /// progress reporting attached.
    pub fn run(
        &self,
        output_path: impl AsRef<Path>,
        local_dirs: Vec<std::path::PathBuf>,
        extra_mirrors: Vec<(String, String)>,
        fetcher: Box<dyn Fetcher>,
        worker_count: usize,
    ) -> Result<()> {
        self.prepare(output_path, local_dirs, extra_mirrors, fetcher)?
            .run(worker_count)
    }
}
