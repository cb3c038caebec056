//! Coordinates a worker pool fetching every `File` entry of a DESC
//! table into the image, with resume support and bounded retries
//! (spec.md §4.F, §5, §9).
//!
//! A single mutex guards the entire per-entry status table; a second,
//! independent mutex guards the much smaller per-worker progress slots
//! that [`crate::progress`] reads. Splitting them keeps a progress
//! snapshot from ever blocking the hot assignment path.

use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::hash::{md5_of_fd, Md5};
use crate::image::ImageLayout;
use crate::mirror::MirrorResolver;
use crate::template::FileRecord;
use crate::worker;
use log::{info, warn};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStatus {
    NotStarted,
    Assigned,
    InProgress,
    Complete,
    /// Satisfied by the pre-flight resume check: the destination range
    /// already held the right bytes, so no fetch ever ran.
    LocalCopy,
    Error,
    FatalError,
}

struct EntryState {
    status: CommitStatus,
    retries: u32,
}

/// A worker's current assignment, as read by the progress reporter.
/// Carries the resolved source URI rather than the bare MD5, matching
/// what spec.md §4.G asks a SIGUSR1-triggered report to print.
#[derive(Debug, Clone)]
pub struct WorkerSlot {
    pub worker_id: usize,
    pub current_uri: Option<String>,
    pub bytes_done: u64,
    pub bytes_total: u64,
}

pub struct Scheduler {
    records: Vec<FileRecord>,
    states: Mutex<Vec<EntryState>>,
    slots: Mutex<Vec<WorkerSlot>>,
    image: ImageLayout,
    image_md5: Md5,
    resolver: MirrorResolver,
    fetcher: Box<dyn Fetcher>,
    max_retries: u32,
}

impl Scheduler {
    pub fn new(
        mut records: Vec<FileRecord>,
        image: ImageLayout,
        image_md5: Md5,
        resolver: MirrorResolver,
        fetcher: Box<dyn Fetcher>,
        max_retries: u32,
    ) -> Self {
        // Recommended, not mandated, by spec.md §4.F step 4: descending
        // size maximizes concurrency by giving the longest fetches the
        // most head start rather than leaving them for last.
        records.sort_by(|a, b| b.size.cmp(&a.size));
        let states = records
            .iter()
            .map(|_| EntryState {
                status: CommitStatus::NotStarted,
                retries: 0,
            })
            .collect();
        Self {
            records,
            states: Mutex::new(states),
            slots: Mutex::new(Vec::new()),
            image,
            image_md5,
            resolver,
            fetcher,
            max_retries,
        }
    }

    /// Runs setup (local-copy marking, resume verification), then
    /// fetches every remaining entry using `worker_count` concurrent
    /// workers. Returns an error if any entry could not be
    /// reconstructed, or if the final whole-image digest does not
    /// match `image_md5` (spec.md §4.F: "success iff the reconstructed
    /// file's whole-file MD5 equals image_info.md5").
    pub fn run(&self, worker_count: usize) -> Result<()> {
        self.mark_local_copies();
        self.resume_check();
        *self.slots.lock().unwrap() = (0..worker_count)
            .map(|worker_id| WorkerSlot {
                worker_id,
                current_uri: None,
                bytes_done: 0,
                bytes_total: 0,
            })
            .collect();

        crossbeam_utils::thread::scope(|scope| {
            for worker_id in 0..worker_count {
                scope.spawn(move |_| self.worker_loop(worker_id));
            }
        })
        .map_err(|_| Error::FormatError("a worker thread panicked".into()))?;

        self.check_all_done()?;
        self.image.sync()?;
        self.verify_whole_image()
    }

    /// Setup step 2 (spec.md §4.F): flags every `NotStarted` entry
    /// whose digest already has a matching copy under a configured
    /// local directory as `LocalCopy`, so it is scheduled first and
    /// `select_source` prefers that copy over a remote mirror. Distinct
    /// from [`Scheduler::resume_check`], which instead inspects bytes
    /// already written into the *output* image.
    fn mark_local_copies(&self) {
        let mut states = self.states.lock().unwrap();
        for (idx, record) in self.records.iter().enumerate() {
            if states[idx].status == CommitStatus::NotStarted
                && self.resolver.is_locally_resolvable(&record.md5)
            {
                states[idx].status = CommitStatus::LocalCopy;
            }
        }
    }

    /// Checks every entry's on-disk bytes against its digest before any
    /// fetch runs, so a prior, interrupted run does not redo work it
    /// already finished correctly. Entries already flagged `LocalCopy`
    /// by [`Scheduler::mark_local_copies`] are skipped: their bytes are
    /// not yet written into the image (spec.md §4.F step 3).
    fn resume_check(&self) {
        if !self.image.existing_file {
            return;
        }
        let mut states = self.states.lock().unwrap();
        for (idx, record) in self.records.iter().enumerate() {
            if states[idx].status == CommitStatus::LocalCopy {
                continue;
            }
            match self.image.hash_range(record.offset, record.size) {
                Ok(digest) if digest == record.md5 => {
                    states[idx].status = CommitStatus::Complete;
                }
                _ => {}
            }
        }
    }

    /// Final acceptance check: the whole reconstructed file's digest
    /// must equal the template's declared `ImageInfo.md5`. Reported as
    /// a failure but the partially- or fully-written image is left in
    /// place either way (spec.md §7 "is not rolled back").
    fn verify_whole_image(&self) -> Result<()> {
        let actual = md5_of_fd(self.image.file());
        if actual != self.image_md5 {
            return Err(Error::ChecksumError {
                what: self.image.path().display().to_string(),
                expected: self.image_md5.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(())
    }

    fn worker_loop(&self, worker_id: usize) {
        while let Some(idx) = self.claim_next() {
            let record = &self.records[idx];
            self.set_slot(worker_id, None, record.size);

            let outcome = worker::run_one(
                record,
                &self.image,
                &self.resolver,
                self.fetcher.as_ref(),
                &mut |uri| self.set_slot_uri(worker_id, uri),
                &mut |done| self.set_slot_progress(worker_id, done),
            );

            self.finish(idx, outcome);
            self.clear_slot(worker_id);
        }
    }

    /// An entry is eligible for assignment iff its status is
    /// `NotStarted`, `Error` (re-eligible after a transient failure) or
    /// `LocalCopy` (spec.md §4.F main loop). `Error` never actually
    /// appears here in practice: [`Scheduler::finish`] transitions a
    /// transient failure straight back to `NotStarted` or on to
    /// `FatalError` under the same lock, but the check is kept
    /// inclusive to match the state-transition diagram literally.
    ///
    /// If any entry has already reached `FatalError`, no further
    /// assignment is made at all: spec.md §4.F "Termination" exits the
    /// whole run as soon as one entry goes fatal, and §5 requires the
    /// same cooperative stop ("setting an entry's status to
    /// `FatalError` will cause the scheduler loop to exit after the
    /// next poll"). Every worker thread observes this the next time it
    /// asks for work, so in-flight fetches finish but no new ones start.
    fn claim_next(&self) -> Option<usize> {
        let mut states = self.states.lock().unwrap();
        if states.iter().any(|s| s.status == CommitStatus::FatalError) {
            return None;
        }
        let idx = states.iter().position(|s| {
            matches!(
                s.status,
                CommitStatus::NotStarted | CommitStatus::Error | CommitStatus::LocalCopy
            )
        })?;
        states[idx].status = CommitStatus::Assigned;
        states[idx].status = CommitStatus::InProgress;
        Some(idx)
    }

    fn finish(&self, idx: usize, outcome: worker::Outcome) {
        let mut states = self.states.lock().unwrap();
        let record = &self.records[idx];
        match outcome {
            worker::Outcome::Done => {
                states[idx].status = CommitStatus::Complete;
            }
            worker::Outcome::Transient(reason) => {
                states[idx].status = CommitStatus::Error;
                if states[idx].retries + 1 >= self.max_retries {
                    warn!(
                        "giving up on {} after {} attempts: {}",
                        record.md5,
                        states[idx].retries + 1,
                        reason
                    );
                    states[idx].status = CommitStatus::FatalError;
                } else {
                    states[idx].retries += 1;
                    info!(
                        "retrying {} (attempt {}): {}",
                        record.md5,
                        states[idx].retries + 1,
                        reason
                    );
                    states[idx].status = CommitStatus::NotStarted;
                }
            }
            worker::Outcome::Fatal(reason) => {
                warn!("cannot reconstruct {}: {}", record.md5, reason);
                states[idx].status = CommitStatus::FatalError;
            }
        }
    }

    fn check_all_done(&self) -> Result<()> {
        let states = self.states.lock().unwrap();
        let failed = states
            .iter()
            .filter(|s| s.status == CommitStatus::FatalError)
            .count();
        if failed > 0 {
            return Err(Error::FetchError {
                url: String::new(),
                reason: format!("{} component file(s) could not be reconstructed", failed),
            });
        }
        Ok(())
    }

    fn set_slot(&self, worker_id: usize, current_uri: Option<String>, bytes_total: u64) {
        let mut slots = self.slots.lock().unwrap();
        if let Some(slot) = slots.get_mut(worker_id) {
            slot.current_uri = current_uri;
            slot.bytes_done = 0;
            slot.bytes_total = bytes_total;
        }
    }

    fn set_slot_uri(&self, worker_id: usize, uri: &str) {
        let mut slots = self.slots.lock().unwrap();
        if let Some(slot) = slots.get_mut(worker_id) {
            slot.current_uri = Some(uri.to_string());
        }
    }

    fn set_slot_progress(&self, worker_id: usize, bytes_done: u64) {
        let mut slots = self.slots.lock().unwrap();
        if let Some(slot) = slots.get_mut(worker_id) {
            slot.bytes_done = bytes_done;
        }
    }

    fn clear_slot(&self, worker_id: usize) {
        self.set_slot(worker_id, None, 0);
    }

    /// A consistent snapshot of every worker's current assignment, for
    /// [`crate::progress`].
    pub fn progress_snapshot(&self) -> Vec<WorkerSlot> {
        self.slots.lock().unwrap().clone()
    }
}
