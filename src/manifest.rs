//! In-memory representation of a parsed `.jigdo` manifest.
//!
//! Parsing the INI-style `.jigdo` text format itself lives in
//! [`crate::jigdo`], a CLI-adjacent concern; this module only holds the
//! resulting data and the md5-sorted lookup the mirror resolver needs
//! (spec.md §3, §8 #4).

use crate::hash::Md5;

/// One `[Servers]` line: a mirror label and the URL (or local path)
/// prefix that label's relative paths are joined onto. Several entries
/// may share a label to describe alternative mirrors for the same
/// logical server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorServer {
    pub label: String,
    pub base_url: String,
}

/// One `[Parts]` line. `mirror_label` is `None` for a literal entry
/// (the path is used as-is, with no server prefix); `Some(label)` means
/// `path` is relative to every [`MirrorServer`] sharing that label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestPart {
    pub md5: Md5,
    pub mirror_label: Option<String>,
    pub path: String,
}

/// A fully parsed manifest: the mirror server table plus every
/// component file the template references, by content digest.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    pub servers: Vec<MirrorServer>,
    parts: Vec<ManifestPart>,
}

impl Manifest {
    pub fn new(servers: Vec<MirrorServer>, mut parts: Vec<ManifestPart>) -> Self {
        parts.sort_by(|a, b| a.md5.cmp(&b.md5));
        Self { servers, parts }
    }

    pub fn parts(&self) -> &[ManifestPart] {
        &self.parts
    }

    /// Looks up every manifest entry for `md5` via binary search,
    /// extended left and right to cover every entry sharing that
    /// digest (spec.md §3, §4.E: "the manifest format permits multiple
    /// `files` entries to share the same MD5; the resolver must return
    /// all of them"). Empty slice on a miss.
    pub fn find_by_md5(&self, md5: &Md5) -> &[ManifestPart] {
        let Ok(hit) = self.parts.binary_search_by(|part| part.md5.cmp(md5)) else {
            return &[];
        };
        let mut start = hit;
        while start > 0 && self.parts[start - 1].md5 == *md5 {
            start -= 1;
        }
        let mut end = hit + 1;
        while end < self.parts.len() && self.parts[end].md5 == *md5 {
            end += 1;
        }
        &self.parts[start..end]
    }

    /// All mirror servers sharing `label`, in manifest order.
    pub fn servers_for_label<'a>(&'a self, label: &'a str) -> impl Iterator<Item = &'a MirrorServer> {
        self.servers.iter().filter(move |s| s.label == label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn md5(byte: u8) -> Md5 {
        Md5([byte; 16])
    }

    #[test]
    fn find_by_md5_locates_existing_entry() {
        let manifest = Manifest::new(
            vec![],
            vec![
                ManifestPart {
                    md5: md5(3),
                    mirror_label: None,
                    path: "c".into(),
                },
                ManifestPart {
                    md5: md5(1),
                    mirror_label: None,
                    path: "a".into(),
                },
                ManifestPart {
                    md5: md5(2),
                    mirror_label: None,
                    path: "b".into(),
                },
            ],
        );
        assert_eq!(manifest.find_by_md5(&md5(2))[0].path, "b");
        assert!(manifest.find_by_md5(&md5(9)).is_empty());
    }

    #[test]
    fn find_by_md5_returns_every_entry_sharing_a_digest() {
        let manifest = Manifest::new(
            vec![],
            vec![
                ManifestPart {
                    md5: md5(1),
                    mirror_label: Some("A".into()),
                    path: "a/x.bin".into(),
                },
                ManifestPart {
                    md5: md5(1),
                    mirror_label: Some("B".into()),
                    path: "b/x.bin".into(),
                },
                ManifestPart {
                    md5: md5(2),
                    mirror_label: None,
                    path: "y.bin".into(),
                },
            ],
        );
        let hits = manifest.find_by_md5(&md5(1));
        assert_eq!(hits.len(), 2);
        let labels: Vec<_> = hits.iter().map(|p| p.mirror_label.as_deref()).collect();
        assert_eq!(labels, vec![Some("A"), Some("B")]);
    }

    #[test]
    fn servers_for_label_filters_correctly() {
        let manifest = Manifest::new(
            vec![
                MirrorServer {
                    label: "Debian".into(),
                    base_url: "http://a/".into(),
                },
                MirrorServer {
                    label: "Debian".into(),
                    base_url: "http://b/".into(),
                },
                MirrorServer {
                    label: "Other".into(),
                    base_url: "http://c/".into(),
                },
            ],
            vec![],
        );
        let found: Vec<_> = manifest.servers_for_label("Debian").collect();
        assert_eq!(found.len(), 2);
    }
}
