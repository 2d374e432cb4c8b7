//! Live process images keyed by pid.
//!
//! An entry exists only while the image is running. Every transition that ends
//! a run removes (or replaces) the entry and hands back the finished
//! [`ExecutionRecord`], so a pid reused by the kernel later starts a fresh,
//! unrelated record.

use std::collections::HashMap;

use super::types::{ExecutionRecord, Pid, Timestamp};

#[derive(Debug, Clone, PartialEq, Eq)]
struct LiveExec {
    image: String,
    start: Timestamp,
}

impl LiveExec {
    fn close(self, pid: Pid, end: Timestamp) -> ExecutionRecord {
        ExecutionRecord {
            pid,
            image: self.image,
            start: self.start,
            duration: end.duration_since(self.start),
        }
    }
}

#[derive(Debug, Default)]
pub struct PidTracker {
    live: HashMap<Pid, LiveExec>,
}

impl PidTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// `pid` exec'd `image`. A previous image of the same pid ends here.
    pub fn on_exec(
        &mut self,
        pid: Pid,
        time: Timestamp,
        image: impl Into<String>,
    ) -> Option<ExecutionRecord> {
        let next = LiveExec {
            image: image.into(),
            start: time,
        };
        self.live.insert(pid, next).map(|prev| prev.close(pid, time))
    }

    /// `pid` was reaped or killed. Unknown pids (never exec'd, already
    /// closed) produce nothing.
    pub fn on_terminate(&mut self, pid: Pid, time: Timestamp) -> Option<ExecutionRecord> {
        self.live.remove(&pid).map(|live| live.close(pid, time))
    }

    /// The log ended.
    ///
    /// Only a session that starts and ends on the same pid closes its image at
    /// `end`; anything else still live is left unreported.
    pub fn on_stream_end(
        &mut self,
        first_pid: Pid,
        last_pid: Pid,
        end: Timestamp,
    ) -> Option<ExecutionRecord> {
        if first_pid != last_pid {
            return None;
        }
        self.on_terminate(first_pid, end)
    }

    pub fn is_live(&self, pid: Pid) -> bool {
        self.live.contains_key(&pid)
    }

    /// Image currently running in `pid`, if any.
    pub fn live_image(&self, pid: Pid) -> Option<&str> {
        self.live.get(&pid).map(|live| live.image.as_str())
    }
}
