/*!
 * Core delivery path: batching, append-or-create writes, retries
 */

pub mod batch;
pub mod retry;
pub mod writer;

pub use batch::{
    Batcher, CorrelationIds, CorrelationLease, DestinationBatch, CID_FIELD, CID_PLACEHOLDER,
};
pub use retry::{Escalation, ProcessExit, RetryLimit, RetryPolicy, WriteOutcome};

use std::time::Duration;

/// What happened to one destination of a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathReport {
    pub path: String,
    pub events: usize,
    pub bytes: usize,
    pub attempts: u32,
    pub written: bool,
}

/// Statistics about one `multi_receive` call
#[derive(Debug, Clone, Default)]
pub struct DeliveryReport {
    pub paths: Vec<PathReport>,
    /// Events that failed to encode and were skipped
    pub skipped_events: usize,
    pub duration: Duration,
}

impl DeliveryReport {
    pub fn events_written(&self) -> usize {
        self.paths.iter().filter(|p| p.written).map(|p| p.events).sum()
    }

    pub fn events_discarded(&self) -> usize {
        self.paths.iter().filter(|p| !p.written).map(|p| p.events).sum()
    }

    pub fn bytes_written(&self) -> usize {
        self.paths.iter().filter(|p| p.written).map(|p| p.bytes).sum()
    }

    pub fn discarded_paths(&self) -> impl Iterator<Item = &str> {
        self.paths
            .iter()
            .filter(|p| !p.written)
            .map(|p| p.path.as_str())
    }

    pub fn is_complete(&self) -> bool {
        self.paths.iter().all(|p| p.written)
    }

    pub fn path(&self, path: &str) -> Option<&PathReport> {
        self.paths.iter().find(|p| p.path == path)
    }
}
