//! Data model shared by the trace-log parser.
//!
//! Timestamps are kept as exact fixed-point values parsed from strace's
//! `-ttt` output (`<secs>.<micros>`), so durations computed from them are
//! exact and reproducible.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::utils::{format_timestamp_rfc3339, serialize_secs};

/// OS process id as printed by the tracer.
///
/// Pids are reused by the kernel, so a pid alone never identifies a process
/// instance; see [`ExecutionRecord`] for that.
pub type Pid = u32;

/// Wall-clock time as an offset from the Unix epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(Duration);

impl Timestamp {
    pub fn from_epoch(since_epoch: Duration) -> Self {
        Self(since_epoch)
    }

    pub fn since_epoch(self) -> Duration {
        self.0
    }

    /// Time elapsed from `earlier` to `self`, zero if `earlier` is later.
    pub fn duration_since(self, earlier: Timestamp) -> Duration {
        self.0.saturating_sub(earlier.0)
    }

    pub fn saturating_add(self, duration: Duration) -> Timestamp {
        Timestamp(self.0.saturating_add(duration))
    }
}

/// A timestamp string that isn't `<digits>[.<digits>]`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid timestamp {0:?}")]
pub struct InvalidTimestamp(pub String);

impl FromStr for Timestamp {
    type Err = InvalidTimestamp;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidTimestamp(s.to_string());
        let (secs, frac) = s.split_once('.').unwrap_or((s, ""));
        if secs.is_empty()
            || !secs.bytes().all(|b| b.is_ascii_digit())
            || !frac.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(invalid());
        }

        let secs: u64 = secs.parse().map_err(|_| invalid())?;
        // Anything past nanosecond precision is dropped
        let digits = &frac[..frac.len().min(9)];
        let mut nanos: u32 = if digits.is_empty() {
            0
        } else {
            digits.parse().map_err(|_| invalid())?
        };
        for _ in digits.len()..9 {
            nanos *= 10;
        }

        Ok(Timestamp(Duration::new(secs, nanos)))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.0.as_secs(), self.0.subsec_micros())
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match format_timestamp_rfc3339(self.0) {
            Some(formatted) => serializer.serialize_str(&formatted),
            None => serializer.serialize_str(&self.to_string()),
        }
    }
}

/// One completed run of a process image: from its `execve` until the next
/// `execve` in the same pid, or until the pid was reaped or killed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionRecord {
    pub pid: Pid,
    /// Executable path (or argv[0] for `execveat`)
    pub image: String,
    pub start: Timestamp,
    #[serde(serialize_with = "serialize_secs")]
    pub duration: Duration,
}

impl ExecutionRecord {
    pub fn end(&self) -> Timestamp {
        self.start.saturating_add(self.duration)
    }

    /// Whether `time` falls within `[start, start + duration)`.
    pub fn contains(&self, time: Timestamp) -> bool {
        self.start <= time && time < self.end()
    }
}

/// A single syscall that touched a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathAccess {
    pub time: Timestamp,
    pub path: String,
    pub syscall: String,
    pub pid: Pid,
}

/// An [`ExecutionRecord`] together with the path accesses made while it ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessRuntime {
    #[serde(flatten)]
    pub process: ExecutionRecord,
    pub path_accesses: Vec<PathAccess>,
}

impl ProcessRuntime {
    pub fn new(process: ExecutionRecord) -> Self {
        Self {
            process,
            path_accesses: Vec::new(),
        }
    }
}

/// First and last observed `(pid, timestamp)` of a trace log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionBounds {
    pub first_pid: Pid,
    pub start: Timestamp,
    pub last_pid: Pid,
    pub end: Timestamp,
}

impl SessionBounds {
    pub fn total_time(&self) -> Duration {
        self.end.duration_since(self.start)
    }
}
