//! Mutable state for one harvesting run.
//!
//! A [`HarvestSession`] carries the target capacity, the admitted records
//! in arrival order, the fingerprint set, and the lifecycle phase. It is
//! exclusively owned and mutated by the harvester; nothing here is shared
//! or concurrent.

use std::fmt;
use std::path::PathBuf;
use tracing::debug;

use super::dedup::DedupStore;
use crate::models::TweetRecord;

/// Lifecycle phase of a harvest session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Loading,
    Scraping,
    TargetReached,
    Terminated,
    Exhausted,
    Flushing,
    Done,
}

/// Why the scraping loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The configured record target was met.
    TargetReached,
    /// The browser went away or a collaborator failed mid-loop.
    Terminated(String),
    /// Too many consecutive passes admitted nothing new.
    Exhausted,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::TargetReached => f.write_str("target reached"),
            StopReason::Terminated(reason) => write!(f, "terminated: {reason}"),
            StopReason::Exhausted => f.write_str("feed exhausted"),
        }
    }
}

/// What a finished session hands back: where the sheet landed, how many
/// records it holds, and why the loop stopped.
#[derive(Debug)]
pub struct HarvestOutcome {
    pub sheet_path: PathBuf,
    pub record_count: usize,
    pub stop: StopReason,
}

#[derive(Debug)]
pub struct HarvestSession {
    target: usize,
    records: Vec<TweetRecord>,
    dedup: DedupStore,
    phase: Phase,
    idle_passes: u32,
}

impl HarvestSession {
    pub fn new(target: usize) -> Self {
        Self {
            target,
            records: Vec::new(),
            dedup: DedupStore::new(),
            phase: Phase::Init,
            idle_passes: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn set_phase(&mut self, phase: Phase) {
        debug!(from = ?self.phase, to = ?phase, "Session phase transition");
        self.phase = phase;
    }

    pub fn target(&self) -> usize {
        self.target
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// True once the record list has reached the target capacity.
    pub fn is_full(&self) -> bool {
        self.records.len() >= self.target
    }

    /// Admit one extracted record.
    ///
    /// Refuses anything past capacity, blank bodies, and bodies already
    /// seen this session. Returns true when the record was kept. A record
    /// refused for capacity leaves no fingerprint behind.
    pub fn admit(&mut self, record: TweetRecord) -> bool {
        if self.is_full() {
            return false;
        }
        if !self.dedup.admit(&record.body) {
            return false;
        }
        self.records.push(record);
        true
    }

    /// Note the outcome of one full extraction pass and return the
    /// current consecutive-idle count. Any admission resets the count.
    pub fn note_pass(&mut self, admitted: usize) -> u32 {
        if admitted == 0 {
            self.idle_passes += 1;
        } else {
            self.idle_passes = 0;
        }
        self.idle_passes
    }

    pub fn records(&self) -> &[TweetRecord] {
        &self.records
    }
}
