//! Resolves a component file's MD5 digest to a concrete source: an
//! already-present local copy, or one of possibly several remote
//! mirrors (spec.md §4.E).
//!
//! Mirror choice among several servers sharing a label is uniform
//! random, with a per-digest blacklist of sources that have already
//! failed enough times that retrying them is pointless (spec.md §9
//! Open Question, resolved in DESIGN.md: bounded by the label's own
//! mirror count via an LRU cache).

use crate::error::{Error, Result};
use crate::hash::Md5;
use crate::manifest::{Manifest, ManifestPart, MirrorServer};
use lru::LruCache;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use url::Url;

/// A resolved source for a component file.
#[derive(Debug, Clone)]
pub enum Source {
    Local(PathBuf),
    Remote(Url),
}

impl Source {
    /// Human-readable form used by the progress reporter (spec.md
    /// §4.G: "print each worker's current URI").
    pub fn display(&self) -> String {
        match self {
            Source::Local(path) => format!("file://{}", path.display()),
            Source::Remote(url) => url.to_string(),
        }
    }
}

pub struct MirrorResolver {
    manifest: Manifest,
    local_dirs: Vec<PathBuf>,
    /// One bounded blacklist per digest, populated lazily the first
    /// time a source for that digest fails.
    blacklists: Mutex<HashMap<Md5, LruCache<String, ()>>>,
}

impl MirrorResolver {
    pub fn new(manifest: Manifest, local_dirs: Vec<PathBuf>) -> Self {
        Self {
            manifest,
            local_dirs,
            blacklists: Mutex::new(HashMap::new()),
        }
    }

    /// Registers an additional mirror server at runtime, e.g. from a
    /// `--mirror NAME=URL` CLI flag extending whatever the manifest
    /// itself already declared for `label` (spec.md §4.E). Fails if
    /// `label` names no server already present in the manifest, or if
    /// `value` is empty. A `value` that parses as a local path or a
    /// `file://` URL is canonicalized to an absolute path before being
    /// stored; anything else is kept as a literal remote URL.
    pub fn add_server_mirror(&mut self, label: String, value: String) -> Result<()> {
        if value.trim().is_empty() {
            return Err(Error::ResolverError(format!(
                "empty mirror value for server {:?}",
                label
            )));
        }
        if !self.manifest.servers.iter().any(|s| s.label == label) {
            return Err(Error::ResolverError(format!(
                "no server named {:?} in the manifest",
                label
            )));
        }

        let base_url = if is_local_base(&value) {
            let path = local_base_path(&value);
            let canonical = path.canonicalize().map_err(|e| {
                Error::ResolverError(format!("cannot canonicalize {:?}: {}", path, e))
            })?;
            canonical.display().to_string()
        } else {
            value
        };

        self.manifest.servers.push(MirrorServer { label, base_url });
        Ok(())
    }

    pub fn find_by_md5(&self, md5: &Md5) -> &[ManifestPart] {
        self.manifest.find_by_md5(md5)
    }

    /// Looks for an already-present copy of `part` under any of the
    /// configured local directories, by its relative path's file name.
    pub fn resolve_local(&self, part: &ManifestPart) -> Option<PathBuf> {
        let name = Path::new(&part.path).file_name()?;
        self.local_dirs
            .iter()
            .map(|dir| dir.join(name))
            .find(|candidate| candidate.is_file())
    }

    /// True if any manifest entry sharing `md5` is already present
    /// under a configured local directory (spec.md §4.F setup step 2:
    /// "mark locally-resolvable files"). Used by the scheduler to flag
    /// an entry `LocalCopy` before scheduling ever starts, distinct
    /// from resume verification's re-hash of the output image itself.
    pub fn is_locally_resolvable(&self, md5: &Md5) -> bool {
        self.find_by_md5(md5)
            .iter()
            .any(|part| self.resolve_local(part).is_some())
    }

    /// Picks a source to fetch `md5` from: a local copy if one exists
    /// under any manifest entry sharing that digest, otherwise a
    /// uniformly chosen, non-blacklisted mirror gathered across every
    /// entry sharing the digest (spec.md §4.E: duplicate `files`
    /// entries for one MD5 must all be considered).
    pub fn select_source(&self, md5: &Md5) -> Result<Source> {
        let parts = self.find_by_md5(md5);
        if parts.is_empty() {
            return Err(Error::ResolverError(format!(
                "no manifest entry for digest {}",
                md5
            )));
        }

        for part in parts {
            if let Some(local) = self.resolve_local(part) {
                return Ok(Source::Local(local));
            }
        }

        let mut candidates: Vec<(String, Source)> = Vec::new();
        for part in parts {
            match &part.mirror_label {
                None => {
                    let source = if part.path.contains("://") {
                        let url = Url::parse(&part.path).map_err(|e| {
                            Error::ResolverError(format!(
                                "invalid literal URL {:?}: {}",
                                part.path, e
                            ))
                        })?;
                        Source::Remote(url)
                    } else {
                        Source::Local(PathBuf::from(&part.path))
                    };
                    candidates.push((source_key(&source), source));
                }
                Some(label) => {
                    for server in self.manifest.servers_for_label(label) {
                        let source = self.join_source(server, &part.path)?;
                        candidates.push((source_key(&source), source));
                    }
                }
            }
        }

        if candidates.is_empty() {
            return Err(Error::ResolverError(format!(
                "no servers registered for any mirror label naming digest {}",
                md5
            )));
        }

        Ok(self.choose_candidate(md5, candidates))
    }

    /// Picks among already-joined candidate sources, preferring ones
    /// not in `md5`'s blacklist. Falls back to the full set if every
    /// candidate has failed before, so a fetch is always attempted
    /// rather than giving up early.
    fn choose_candidate(&self, md5: &Md5, candidates: Vec<(String, Source)>) -> Source {
        let mut blacklists = self.blacklists.lock().unwrap();
        let cap = NonZeroUsize::new(candidates.len()).unwrap_or(NonZeroUsize::new(1).unwrap());
        let blacklist = blacklists.entry(*md5).or_insert_with(|| LruCache::new(cap));

        let eligible: Vec<&(String, Source)> = candidates
            .iter()
            .filter(|(key, _)| !blacklist.contains(key))
            .collect();

        let pick = eligible
            .choose(&mut rand::thread_rng())
            .copied()
            .or_else(|| candidates.choose(&mut rand::thread_rng()))
            .expect("candidates is non-empty");
        pick.1.clone()
    }

    /// Records that `source` failed to serve `md5`, so future
    /// [`MirrorResolver::select_source`] calls for the same digest
    /// prefer the remaining mirrors.
    pub fn blacklist_source(&self, md5: &Md5, source: &Source) {
        let mut blacklists = self.blacklists.lock().unwrap();
        if let Some(cache) = blacklists.get_mut(md5) {
            cache.put(source_key(source), ());
        }
    }

    fn join_source(&self, server: &MirrorServer, relative: &str) -> Result<Source> {
        if is_local_base(&server.base_url) {
            Ok(Source::Local(local_base_path(&server.base_url).join(relative)))
        } else {
            let base = Url::parse(&server.base_url).map_err(|e| {
                Error::ResolverError(format!("invalid mirror base url {:?}: {}", server.base_url, e))
            })?;
            let joined = base.join(relative).map_err(|e| {
                Error::ResolverError(format!("invalid relative path {:?}: {}", relative, e))
            })?;
            Ok(Source::Remote(joined))
        }
    }
}

fn source_key(source: &Source) -> String {
    match source {
        Source::Remote(url) => url.to_string(),
        Source::Local(path) => path.display().to_string(),
    }
}

fn is_local_base(base_url: &str) -> bool {
    base_url.starts_with("file://") || !base_url.contains("://")
}

fn local_base_path(base_url: &str) -> PathBuf {
    PathBuf::from(base_url.strip_prefix("file://").unwrap_or(base_url))
}
