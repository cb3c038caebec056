//! The body of a single worker's assignment: resolve a source, map the
//! destination range, fetch into it, verify, and flush (spec.md §4.G).
//!
//! This is deliberately a single free function rather than a struct —
//! every assignment is independent and carries no state across calls.
//! The scheduler owns the thread pool and the shared status table; this
//! module only knows how to discharge one `FileRecord`.

use crate::fetch::Fetcher;
use crate::hash::md5_of_bytes;
use crate::image::ImageLayout;
use crate::mirror::MirrorResolver;
use crate::template::FileRecord;

/// The result of attempting one `FileRecord`. The scheduler decides,
/// based on this and the entry's retry count, whether to requeue,
/// finish, or escalate to `FatalError`.
pub enum Outcome {
    Done,
    /// Worth retrying: a transient fetch failure or a digest mismatch.
    Transient(String),
    /// Not worth retrying: the resolver has no source for this digest
    /// at all.
    Fatal(String),
}

pub fn run_one(
    record: &FileRecord,
    image: &ImageLayout,
    resolver: &MirrorResolver,
    fetcher: &dyn Fetcher,
    on_source: &mut dyn FnMut(&str),
    on_progress: &mut dyn FnMut(u64),
) -> Outcome {
    let source = match resolver.select_source(&record.md5) {
        Ok(source) => source,
        Err(e) => return Outcome::Fatal(e.to_string()),
    };
    on_source(&source.display());

    // spec.md §4.G step 7: a mapping failure (the destination range
    // cannot be mapped at all, as opposed to a fetch into it failing)
    // is not worth retrying on a different mirror, so it escalates
    // straight to FatalError.
    let (mut map, start) = match image.map_range_mut(record.offset, record.size) {
        Ok(mapped) => mapped,
        Err(e) => return Outcome::Fatal(e.to_string()),
    };
    let end = start + record.size as usize;

    if let Err(e) = fetcher.fetch(&source, &mut map[start..end], on_progress) {
        resolver.blacklist_source(&record.md5, &source);
        return Outcome::Transient(e.to_string());
    }

    let actual = md5_of_bytes(&map[start..end]);
    if actual != record.md5 {
        resolver.blacklist_source(&record.md5, &source);
        return Outcome::Transient(format!(
            "digest mismatch: expected {}, got {}",
            record.md5, actual
        ));
    }

    if let Err(e) = map.flush_async() {
        return Outcome::Transient(e.to_string());
    }

    Outcome::Done
}
