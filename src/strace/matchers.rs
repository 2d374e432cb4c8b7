//! Recognizers for the strace line shapes the parser cares about.
//!
//! Matchers are an ordered strategy list: a line is offered to each matcher in
//! turn and the first one that claims it wins. The exec and signal shapes come
//! first, then (for the file profile only) the path shapes from most specific
//! to most generic.
//!
//! Lines look like:
//!
//! ```text
//! 17363 1542815326.700248 execve("/snap/brave/44/usr/bin/update-mime-database", [...], 0x1566008 /* 69 vars */) = 0
//! 14157 1542875582.816782 execveat(3, "", ["snap-update-ns", "--from-snap-confine"], 0x7ffce7dd6160 /* 0 vars */, AT_EMPTY_PATH) = 0
//! 17559 1542815330.242750 --- SIGCHLD {si_signo=SIGCHLD, si_code=CLD_EXITED, si_pid=17643, si_uid=1000, si_status=0} ---
//! 20882 1573257274.988650 +++ killed by SIGKILL +++
//! 121041 1574886786.247289 openat(9</snap/chromium/958>, "data-dir", O_RDONLY|O_DIRECTORY) = 10</snap/chromium/958/data-dir>
//! 120994 1574886785.937456 readlinkat(AT_FDCWD, "/snap/chromium/current", ""..., 128) = 3
//! 120990 1574886792.229066 readlink("/snap/chromium/958/etc/fonts/conf.d/65-nonlatin.conf", ""..., 4095) = 30
//! 121188 1574886788.028095 close(3</snap/chromium/958/usr/lib/locale/aa_DJ.utf8/LC_COLLATE>) = 0
//! ```

use std::path::Path;
use std::sync::LazyLock;

use normalize_path::NormalizePath;
use regex::{Captures, Regex};

use super::types::{PathAccess, Pid, Timestamp};

/// Marker strace appends to an fd path whose backing file was unlinked.
pub const DELETED_SUFFIX: &str = " (deleted)";

/// Identifies one line shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum MatcherKind {
    Execve,
    Execveat,
    TerminationSignal,
    KillSignal,
    FdAndPath,
    AbsPathWithCwd,
    AbsPath,
    FdOnly,
}

/// Which matchers a parse uses, following the tracer profile that wrote the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatcherSet {
    /// Exec timing profile: exec and signal shapes only
    Exec,
    /// File profile: exec, signal and path shapes
    Files,
}

/// What a claimed line means to the parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineMatch {
    /// `pid` replaced its image with `image` at `time`
    Exec {
        pid: Pid,
        time: Timestamp,
        image: String,
    },
    /// `pid` was reaped or killed at `time`
    Terminate { pid: Pid, time: Timestamp },
    Access(PathAccess),
}

/// A captured numeric field that doesn't parse.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} line has invalid {field} {value:?}")]
pub struct InvalidField {
    pub kind: MatcherKind,
    pub field: &'static str,
    pub value: String,
}

type Extract = fn(MatcherKind, &Captures<'_>) -> Result<Option<LineMatch>, InvalidField>;

struct LineMatcher {
    kind: MatcherKind,
    regex: Regex,
    extract: Extract,
}

// A successful return value: a plain number, a pointer, or an fd annotated
// with its path.
const RETURN_OK: &str = r"(?:\s*|x[0-9a-f]+|<.*>)$";

static MATCHERS: LazyLock<[LineMatcher; 8]> = LazyLock::new(|| {
    let matcher = |kind: MatcherKind, pattern: &str, extract: Extract| LineMatcher {
        kind,
        regex: Regex::new(pattern).unwrap(),
        extract,
    };
    [
        matcher(
            MatcherKind::Execve,
            r#"([0-9]+) +([0-9.]+) execve\("([^"]+)".*\) = 0"#,
            extract_exec,
        ),
        matcher(
            MatcherKind::Execveat,
            r#"([0-9]+) +([0-9.]+) execveat\(.*\["([^"]+)".*\) = 0"#,
            extract_exec,
        ),
        matcher(
            MatcherKind::TerminationSignal,
            r"[0-9]+ +([0-9.]+).*SIG(?:CHLD|TERM) \{.*si_pid=([0-9]+),",
            extract_signal,
        ),
        matcher(
            MatcherKind::KillSignal,
            r"([0-9]+) +([0-9.]+) \+\+\+ killed by SIGKILL \+\+\+",
            extract_kill,
        ),
        matcher(
            MatcherKind::FdAndPath,
            &format!(
                r#"^([0-9]+) +([0-9]+\.[0-9]+) ([a-zA-Z0-9_]+)\([0-9]+<(/.*?)>, "([^/"][^"]*)".*= [0-9]+{RETURN_OK}"#
            ),
            extract_fd_and_path,
        ),
        matcher(
            MatcherKind::AbsPathWithCwd,
            &format!(
                r#"^([0-9]+) +([0-9]+\.[0-9]+) ([a-zA-Z0-9_]+)\(AT_FDCWD,\s+"(/[^"]*)".*=\s+[0-9]+{RETURN_OK}"#
            ),
            extract_path,
        ),
        matcher(
            MatcherKind::AbsPath,
            &format!(
                r#"^([0-9]+) +([0-9]+\.[0-9]+) ([a-zA-Z0-9_]+)\((AT_FDCWD,\s+)?.*?"(/[^"]*)".*?\) =\s+[0-9]+{RETURN_OK}"#
            ),
            extract_abs_path,
        ),
        matcher(
            MatcherKind::FdOnly,
            &format!(
                r"^([0-9]+)\s+([0-9]+\.[0-9]+)\s+([a-zA-Z0-9_]+)\(.*?[0-9]+<(/.*?)>.*= [0-9]+{RETURN_OK}"
            ),
            extract_path,
        ),
    ]
});

impl MatcherSet {
    fn matchers(self) -> &'static [LineMatcher] {
        match self {
            MatcherSet::Exec => &MATCHERS[..4],
            MatcherSet::Files => &MATCHERS[..],
        }
    }
}

/// Offer `line` to each matcher of `set` in priority order.
///
/// Returns `Ok(None)` when no matcher claims the line.
pub fn match_line(line: &str, set: MatcherSet) -> Result<Option<LineMatch>, InvalidField> {
    for matcher in set.matchers() {
        let Some(caps) = matcher.regex.captures(line) else {
            continue;
        };
        if let Some(found) = (matcher.extract)(matcher.kind, &caps)? {
            return Ok(Some(found));
        }
    }
    Ok(None)
}

/// Trim the deleted-file marker and normalize lexically.
pub fn normalize_access_path(path: &str) -> String {
    let path = path.strip_suffix(DELETED_SUFFIX).unwrap_or(path);
    Path::new(path).normalize().to_string_lossy().into_owned()
}

/// Join an fd's directory with a path relative to it.
pub fn join_fd_path(dir: &str, relative: &str) -> String {
    let dir = dir.strip_suffix(DELETED_SUFFIX).unwrap_or(dir);
    Path::new(dir)
        .join(relative)
        .normalize()
        .to_string_lossy()
        .into_owned()
}

fn parse_pid(kind: MatcherKind, value: &str) -> Result<Pid, InvalidField> {
    value.parse().map_err(|_| InvalidField {
        kind,
        field: "pid",
        value: value.to_string(),
    })
}

fn parse_time(kind: MatcherKind, value: &str) -> Result<Timestamp, InvalidField> {
    value.parse().map_err(|_| InvalidField {
        kind,
        field: "timestamp",
        value: value.to_string(),
    })
}

fn extract_exec(kind: MatcherKind, caps: &Captures<'_>) -> Result<Option<LineMatch>, InvalidField> {
    Ok(Some(LineMatch::Exec {
        pid: parse_pid(kind, &caps[1])?,
        time: parse_time(kind, &caps[2])?,
        image: caps[3].to_string(),
    }))
}

fn extract_signal(kind: MatcherKind, caps: &Captures<'_>) -> Result<Option<LineMatch>, InvalidField> {
    // The pid that matters is the signalled child, not the line's own pid
    Ok(Some(LineMatch::Terminate {
        pid: parse_pid(kind, &caps[2])?,
        time: parse_time(kind, &caps[1])?,
    }))
}

fn extract_kill(kind: MatcherKind, caps: &Captures<'_>) -> Result<Option<LineMatch>, InvalidField> {
    Ok(Some(LineMatch::Terminate {
        pid: parse_pid(kind, &caps[1])?,
        time: parse_time(kind, &caps[2])?,
    }))
}

fn access(
    kind: MatcherKind,
    caps: &Captures<'_>,
    path: String,
) -> Result<Option<LineMatch>, InvalidField> {
    Ok(Some(LineMatch::Access(PathAccess {
        time: parse_time(kind, &caps[2])?,
        path,
        syscall: caps[3].to_string(),
        pid: parse_pid(kind, &caps[1])?,
    })))
}

fn extract_path(kind: MatcherKind, caps: &Captures<'_>) -> Result<Option<LineMatch>, InvalidField> {
    access(kind, caps, normalize_access_path(&caps[4]))
}

fn extract_fd_and_path(
    kind: MatcherKind,
    caps: &Captures<'_>,
) -> Result<Option<LineMatch>, InvalidField> {
    access(kind, caps, join_fd_path(&caps[4], &caps[5]))
}

fn extract_abs_path(
    kind: MatcherKind,
    caps: &Captures<'_>,
) -> Result<Option<LineMatch>, InvalidField> {
    // AT_FDCWD calls belong to the AT_FDCWD shape; one that fell through here
    // had a relative path and isn't claimed
    if caps.get(4).is_some() {
        return Ok(None);
    }
    access(kind, caps, normalize_access_path(&caps[5]))
}
