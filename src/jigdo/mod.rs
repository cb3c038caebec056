//! Reads the `.jigdo` INI-style manifest into a [`Manifest`].
//!
//! This is a CLI-adjacent concern, not part of the reconstruction core:
//! `Scheduler`/`MirrorResolver` only ever see an already-built
//! [`Manifest`], never this file format directly (spec.md §2 lists the
//! `.jigdo` parser among the explicit non-core collaborators).
//!
//! The format is a handful of `[Section]` blocks of `key=value` lines.
//! `[Jigdo]` only carries the manifest's own format version; `[Image]`
//! names the template file, its advisory MD5, and the image's own
//! suggested filename; `[Servers]` maps a mirror label to its base
//! URL; `[Parts]` maps a base-22 MD5 to either `label:relative/path`
//! or a literal path/URL.

use crate::compress::maybe_gunzip_in_place;
use crate::error::{Error, Result};
use crate::hash::md5_decode;
use crate::manifest::{Manifest, ManifestPart, MirrorServer};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct JigdoInfo {
    pub template_md5: Option<String>,
    pub template_name: Option<String>,
    /// `[Image]`'s `Filename` key: the reconstructed image's own
    /// suggested name, distinct from the `.template` file's name.
    pub image_filename: Option<String>,
}

/// Parses a `.jigdo` file at `path` (optionally gzip-compressed) into a
/// [`Manifest`] plus the `[Image]` section's metadata.
pub fn read_jigdo(path: impl AsRef<Path>) -> Result<(Manifest, JigdoInfo)> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| Error::io(path.display().to_string(), e))?;
    let reader = maybe_gunzip_in_place(file)?;
    parse(reader)
}

fn parse(reader: impl Read) -> Result<(Manifest, JigdoInfo)> {
    let mut info = JigdoInfo::default();
    let mut servers = Vec::new();
    let mut parts = Vec::new();
    let mut section = String::new();

    for line in BufReader::new(reader).lines() {
        let line = line.map_err(|e| Error::io("jigdo manifest", e))?;
        let line = strip_comment(&line);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with('[') && line.ends_with(']') {
            section = line[1..line.len() - 1].to_string();
            continue;
        }

        let (key, value) = line.split_once('=').ok_or_else(|| {
            Error::FormatError(format!("malformed jigdo manifest line: {:?}", line))
        })?;
        let key = key.trim();
        let value = value.trim();

        match section.as_str() {
            // `Version`/`Generator`: only the major version matters
            // and is checked against the template's own header, not
            // here (spec.md §6); nothing to capture.
            "Jigdo" => {}
            "Image" => match key {
                "Template-MD5Sum" => info.template_md5 = Some(value.to_string()),
                "Template" => info.template_name = Some(value.to_string()),
                "Filename" => info.image_filename = Some(value.to_string()),
                _ => {}
            },
            "Servers" => servers.push(MirrorServer {
                label: key.to_string(),
                base_url: value.to_string(),
            }),
            "Parts" => {
                let md5 = md5_decode(key)?;
                let (mirror_label, path) = match value.split_once(':') {
                    Some((label, rest)) => (Some(label.to_string()), rest.to_string()),
                    None => (None, value.to_string()),
                };
                parts.push(ManifestPart {
                    md5,
                    mirror_label,
                    path,
                });
            }
            other => {
                return Err(Error::FormatError(format!(
                    "unknown jigdo manifest section {:?}",
                    other
                )))
            }
        }
    }

    Ok((Manifest::new(servers, parts), info))
}

/// Strips a trailing `#`-introduced comment, respecting none of the
/// base-22 MD5 alphabet's characters as comment starters since `#`
/// never appears in it.
fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    }
}
