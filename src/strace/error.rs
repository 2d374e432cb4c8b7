//! Trace parsing errors.
//!
//! Every fatal failure of the parser surfaces as a single [`TraceError`].
//! Per-item problems that shouldn't abort a report (a path that can no longer
//! be stat'ed) are folded into the result data instead; see
//! [`FileSize::Unknown`](super::FileSize::Unknown).

use std::fmt;

use crate::utils::format_tool_output;

/// Where in the trace log a parse failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogPosition {
    /// The first line, which supplies the session start time
    Start,
    /// The last line, which supplies the session end time
    End,
    /// A 1-based line number in the middle of the log
    Line(usize),
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogPosition::Start => f.write_str("start"),
            LogPosition::End => f.write_str("end"),
            LogPosition::Line(n) => write!(f, "line {n}"),
        }
    }
}

/// Which caller-supplied pattern failed to compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum PatternKind {
    #[strum(serialize = "file regex")]
    FileRegex,
    #[strum(serialize = "program regex")]
    ProgramRegex,
    #[strum(serialize = "program exclude glob")]
    ExcludeGlob,
}

#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    /// A line the parser depends on doesn't have the expected shape
    #[error("cannot parse {position} of trace log ({reason}): {line:?}")]
    Parse {
        position: LogPosition,
        line: String,
        reason: String,
    },

    /// The external log merge step failed; `output` is what the tool wrote
    #[error("{tool} failed to merge trace log fragments ({status}){}", format_tool_output(.output))]
    Merge {
        tool: String,
        status: String,
        output: String,
    },

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// A caller-supplied regex or glob doesn't compile
    #[error("invalid {kind} {pattern:?}: {message}")]
    MalformedPattern {
        kind: PatternKind,
        pattern: String,
        message: String,
    },
}

impl TraceError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        TraceError::Io {
            context: context.into(),
            source,
        }
    }
}
