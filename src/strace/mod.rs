//! strace log parsing.
//!
//! Turns the text strace writes into exec timings or per-process file
//! accesses:
//!
//! ```text
//! trace log ──▶ matchers ──▶ pid tracker ──▶ exec timings
//!                   │                   └──▶ file access correlator ──▶ filtered report
//!                   └── path accesses ─────────────┘
//! ```
//!
//! [`matchers`] classifies lines, [`pid_tracker`] turns exec and termination
//! events into finished [`ExecutionRecord`]s, and [`exec_timing`] /
//! [`file_access`] accumulate them. [`ingest`] drives one pass over a log.

pub mod command;
pub mod display;
mod error;
pub mod exec_timing;
pub mod file_access;
pub mod ingest;
pub mod matchers;
pub mod merge;
pub mod pid_tracker;
mod types;

pub use error::{LogPosition, PatternKind, TraceError};
pub use exec_timing::{ExecTimingReport, ExecTimings};
pub use file_access::{
    AccessedFile, DEFAULT_EXCLUDED_PROGRAMS, FileAccessReport, FileFilter, FileFilterSpec, FileSize,
};
pub use ingest::{
    parse_exec_timings, parse_file_accesses, read_file_accesses, trace_execve_timings,
    trace_execve_with_files,
};
pub use merge::DEFAULT_MERGE_TOOL;
pub use types::{
    ExecutionRecord, InvalidTimestamp, PathAccess, Pid, ProcessRuntime, SessionBounds, Timestamp,
};
