//! File access correlation and filtering.
//!
//! Path accesses are observed while processes are still running, before the
//! [`ExecutionRecord`] that owns them exists. They are buffered here and
//! assigned to their process once the whole log has been read.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::time::Duration;

use glob::{MatchOptions, Pattern};
use regex::Regex;
use serde::{Serialize, Serializer};

use super::error::{PatternKind, TraceError};
use super::types::{ExecutionRecord, PathAccess, Pid, ProcessRuntime, Timestamp};
use crate::utils::serialize_secs;

/// snapd's own helpers, hidden from file reports unless asked for.
pub const DEFAULT_EXCLUDED_PROGRAMS: &[&str] = &[
    "/usr/bin/snap",
    "/usr/lib/snapd/*",
    "/sbin/apparmor_parser",
    "/snap/core/*/usr/bin/snap",
    "/snap/core/*/usr/lib/snapd/*",
    "/snap/snapd/*/usr/bin/snap",
    "/snap/snapd/*/usr/lib/snapd/*",
];

// `*` must not cross a `/`
const GLOB_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Default)]
pub struct FileAccessCorrelator {
    accesses: Vec<PathAccess>,
    all_paths: BTreeSet<String>,
}

/// Accesses grouped under the process instance that made them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correlation {
    pub processes: Vec<ProcessRuntime>,
    /// Every path seen, attributed or not
    pub all_paths: BTreeSet<String>,
}

impl FileAccessCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, access: PathAccess) {
        if !self.all_paths.contains(&access.path) {
            self.all_paths.insert(access.path.clone());
        }
        self.accesses.push(access);
    }

    pub fn len(&self) -> usize {
        self.accesses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accesses.is_empty()
    }

    /// Attach each access to the first record of the same pid whose
    /// `[start, start + duration)` contains it. Accesses that no record claims
    /// are dropped from the per-process view.
    pub fn correlate(self, records: Vec<ExecutionRecord>) -> Correlation {
        let mut by_pid: HashMap<Pid, Vec<usize>> = HashMap::new();
        for (idx, record) in records.iter().enumerate() {
            by_pid.entry(record.pid).or_default().push(idx);
        }

        let mut processes: Vec<ProcessRuntime> =
            records.into_iter().map(ProcessRuntime::new).collect();
        let mut unattributed = 0usize;
        for access in self.accesses {
            let owner = by_pid.get(&access.pid).and_then(|candidates| {
                candidates
                    .iter()
                    .copied()
                    .find(|&idx| processes[idx].process.contains(access.time))
            });
            match owner {
                Some(idx) => processes[idx].path_accesses.push(access),
                None => unattributed += 1,
            }
        }
        if unattributed > 0 {
            log::debug!("{unattributed} path accesses not attributed to any process");
        }

        Correlation {
            processes,
            all_paths: self.all_paths,
        }
    }
}

/// Caller-facing description of a [`FileFilter`], before compiling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFilterSpec {
    /// Regex a path must match; ignored when `parent_dirs` is non-empty
    pub file_regex: String,
    /// Only report paths under these directories
    pub parent_dirs: Vec<String>,
    pub program_regex: String,
    /// Globs over program image paths to leave out
    pub exclude_programs: Vec<String>,
    /// Report the owning program for each path
    pub show_programs: bool,
}

impl Default for FileFilterSpec {
    fn default() -> Self {
        Self {
            file_regex: ".*".to_string(),
            parent_dirs: Vec::new(),
            program_regex: ".*".to_string(),
            exclude_programs: DEFAULT_EXCLUDED_PROGRAMS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            show_programs: false,
        }
    }
}

impl FileFilterSpec {
    pub fn compile(&self) -> Result<FileFilter, TraceError> {
        let path_regex = if self.parent_dirs.is_empty() {
            self.file_regex.clone()
        } else {
            FileFilter::path_regex_for_parent_dirs(&self.parent_dirs)
        };
        FileFilter::new(
            &path_regex,
            &self.program_regex,
            &self.exclude_programs,
            self.show_programs,
        )
    }
}

/// Which accesses end up in a file report.
#[derive(Debug, Clone)]
pub struct FileFilter {
    path_regex: Regex,
    program_regex: Regex,
    exclude_programs: Vec<Pattern>,
    show_programs: bool,
}

impl FileFilter {
    pub fn new(
        path_regex: &str,
        program_regex: &str,
        exclude_programs: &[impl AsRef<str>],
        show_programs: bool,
    ) -> Result<Self, TraceError> {
        let regex = |kind, pattern: &str| {
            Regex::new(pattern).map_err(|err| TraceError::MalformedPattern {
                kind,
                pattern: pattern.to_string(),
                message: err.to_string(),
            })
        };
        let exclude_programs = exclude_programs
            .iter()
            .map(|glob| {
                let glob = glob.as_ref();
                Pattern::new(glob).map_err(|err| TraceError::MalformedPattern {
                    kind: PatternKind::ExcludeGlob,
                    pattern: glob.to_string(),
                    message: err.to_string(),
                })
            })
            .collect::<Result<_, _>>()?;

        Ok(Self {
            path_regex: regex(PatternKind::FileRegex, path_regex)?,
            program_regex: regex(PatternKind::ProgramRegex, program_regex)?,
            exclude_programs,
            show_programs,
        })
    }

    /// A path regex matching the given directories and anything below them.
    pub fn path_regex_for_parent_dirs(dirs: &[impl AsRef<str>]) -> String {
        let alternatives: Vec<String> = dirs
            .iter()
            .map(|dir| {
                let dir = dir.as_ref();
                let dir = dir.strip_suffix('/').filter(|d| !d.is_empty()).unwrap_or(dir);
                if dir == "/" {
                    "/".to_string()
                } else {
                    format!("{}(?:/|$)", regex::escape(dir))
                }
            })
            .collect();
        format!("^(?:{})", alternatives.join("|"))
    }

    pub fn matches_path(&self, path: &str) -> bool {
        self.path_regex.is_match(path)
    }

    /// Whether accesses made by `image` are reported at all.
    pub fn includes_program(&self, image: &str) -> bool {
        self.program_regex.is_match(image)
            && !self
                .exclude_programs
                .iter()
                .any(|glob| glob.matches_with(image, GLOB_OPTIONS))
    }

    pub fn show_programs(&self) -> bool {
        self.show_programs
    }
}

/// Size of an accessed file at report time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSize {
    Known(u64),
    /// The path couldn't be stat'ed (deleted, no permission, ...)
    Unknown,
}

impl FileSize {
    fn of(path: &str) -> Self {
        match std::fs::metadata(path) {
            Ok(metadata) => FileSize::Known(metadata.len()),
            Err(err) => {
                log::debug!("Cannot stat {path}: {err}");
                FileSize::Unknown
            }
        }
    }
}

impl fmt::Display for FileSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileSize::Known(bytes) => write!(f, "{bytes}"),
            FileSize::Unknown => f.write_str("unknown"),
        }
    }
}

impl Serialize for FileSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FileSize::Known(bytes) => serializer.serialize_u64(*bytes),
            FileSize::Unknown => serializer.serialize_str("unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessedFile {
    pub path: String,
    pub size: FileSize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
}

/// File-mode result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileAccessReport {
    pub session_start: Timestamp,
    #[serde(serialize_with = "serialize_secs")]
    pub total_time: Duration,
    pub processes: Vec<ProcessRuntime>,
    /// Every matching path, whichever process touched it
    pub all_files: Vec<AccessedFile>,
    /// Matching paths touched by included programs, sorted by path
    pub files: Vec<AccessedFile>,
}

impl FileAccessReport {
    pub fn build(
        correlation: Correlation,
        filter: &FileFilter,
        session_start: Timestamp,
        total_time: Duration,
    ) -> Self {
        let mut sizes: HashMap<String, FileSize> = HashMap::new();
        let mut size_of = |path: &str| {
            *sizes
                .entry(path.to_string())
                .or_insert_with(|| FileSize::of(path))
        };

        let mut unique: BTreeSet<(&str, Option<&str>)> = BTreeSet::new();
        for runtime in &correlation.processes {
            let image = runtime.process.image.as_str();
            if !filter.includes_program(image) {
                continue;
            }
            let program = filter.show_programs.then_some(image);
            for access in &runtime.path_accesses {
                if filter.matches_path(&access.path) {
                    unique.insert((access.path.as_str(), program));
                }
            }
        }
        let files = unique
            .into_iter()
            .map(|(path, program)| AccessedFile {
                path: path.to_string(),
                size: size_of(path),
                program: program.map(str::to_string),
            })
            .collect();

        let all_files = correlation
            .all_paths
            .iter()
            .filter(|path| filter.matches_path(path))
            .map(|path| AccessedFile {
                path: path.clone(),
                size: size_of(path),
                program: None,
            })
            .collect();

        Self {
            session_start,
            total_time,
            processes: correlation.processes,
            all_files,
            files,
        }
    }
}
