//! Exec timing accumulation with optional slowest-N retention.

use std::time::Duration;

use serde::Serialize;

use super::types::{ExecutionRecord, SessionBounds, Timestamp};
use crate::utils::serialize_secs;

/// Collects finished [`ExecutionRecord`]s, keeping only the `cap` slowest.
#[derive(Debug, Clone, Default)]
pub struct ExecTimings {
    cap: usize,
    records: Vec<ExecutionRecord>,
}

impl ExecTimings {
    /// A `cap` of zero keeps every record.
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            records: Vec::new(),
        }
    }

    pub fn record(&mut self, record: ExecutionRecord) {
        self.records.push(record);
        if self.cap > 0 {
            self.prune();
        }
    }

    fn prune(&mut self) {
        while self.records.len() > self.cap {
            // `<=` lands on the last of equally fast records, so the
            // earlier-inserted one survives
            let mut fastest = 0;
            for (idx, record) in self.records.iter().enumerate() {
                if record.duration <= self.records[fastest].duration {
                    fastest = idx;
                }
            }
            let evicted = self.records.remove(fastest);
            log::trace!("Evicting {} ({:?})", evicted.image, evicted.duration);
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Sort the retained records by start and attach the session span.
    pub fn finish(mut self, session: &SessionBounds) -> ExecTimingReport {
        // Stable, so equal starts keep insertion order
        self.records.sort_by_key(|record| record.start);
        ExecTimingReport {
            session_start: session.start,
            total_time: session.total_time(),
            exe_runtimes: self.records,
        }
    }
}

/// Timing-mode result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecTimingReport {
    pub session_start: Timestamp,
    /// Span of the whole trace, not of the retained records
    #[serde(serialize_with = "serialize_secs")]
    pub total_time: Duration,
    pub exe_runtimes: Vec<ExecutionRecord>,
}

impl ExecTimingReport {
    /// Offsets of `record`'s start and end from the session start.
    pub fn relative_span(&self, record: &ExecutionRecord) -> (Duration, Duration) {
        let start = record.start.duration_since(self.session_start);
        (start, start.saturating_add(record.duration))
    }
}
