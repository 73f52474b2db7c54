//! Destinations for per-iteration trial records.

use parking_lot::Mutex;
use std::sync::Arc;

use hc_types::CalibResult;

use crate::trial::{Checkpoint, TrialLogEntry};

/// Receives every iteration's record before the controller commits it.
///
/// A failing sink aborts the run: an iteration that could not be persisted
/// is not considered complete.
pub trait TrialSink: Send {
    fn record(&mut self, entry: &TrialLogEntry) -> CalibResult<()>;
}

/// In-memory sink. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemoryTrialSink {
    entries: Arc<Mutex<Vec<TrialLogEntry>>>,
}

impl MemoryTrialSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<TrialLogEntry> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Checkpoint of the most recent entry.
    pub fn checkpoint(&self) -> Option<Checkpoint> {
        self.entries.lock().last().map(TrialLogEntry::checkpoint)
    }
}

impl TrialSink for MemoryTrialSink {
    fn record(&mut self, entry: &TrialLogEntry) -> CalibResult<()> {
        self.entries.lock().push(entry.clone());
        Ok(())
    }
}
