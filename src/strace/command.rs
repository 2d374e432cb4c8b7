//! strace invocations for the two trace profiles.
//!
//! These only build argument vectors; elevating with sudo and spawning is up
//! to the caller.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Syscalls left out of every trace: they make strace hang on some
/// architectures (`gettimeofday` on arm64).
pub const DEFAULT_EXCLUDED_SYSCALLS: &[&str] = &[
    "select",
    "pselect6",
    "_newselect",
    "clock_gettime",
    "sigaltstack",
    "gettid",
    "gettimeofday",
    "nanosleep",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StraceOptions {
    pub strace_path: PathBuf,
    /// The traced command runs as this user even when strace is root
    pub user: String,
    pub excluded_syscalls: Vec<String>,
}

impl StraceOptions {
    fn base_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            self.strace_path.clone().into(),
            "-u".into(),
            self.user.clone().into(),
            "-f".into(),
        ];
        if !self.excluded_syscalls.is_empty() {
            args.push("-e".into());
            args.push(format!("!{}", self.excluded_syscalls.join(",")).into());
        }
        args
    }

    /// Exec timing profile: only `execve`/`execveat`, microsecond epoch
    /// timestamps, one log (usually a fifo).
    pub fn trace_exec_command(&self, log_path: &Path, cmd: &[String]) -> Vec<OsString> {
        let mut args = self.base_args();
        args.extend(["-ttt", "-e", "trace=execve,execveat", "-o"].map(OsString::from));
        args.push(log_path.into());
        args.extend(cmd.iter().map(OsString::from));
        args
    }

    /// File profile: one log per process under `log_pattern` (for the merge
    /// tool), strings redacted, fds annotated with their paths, no verbose
    /// structures.
    pub fn trace_files_command(&self, log_pattern: &Path, cmd: &[String]) -> Vec<OsString> {
        let mut args = self.base_args();
        args.extend(["-ttt", "-ff", "-s0", "-y", "-everbose=none", "-o"].map(OsString::from));
        args.push(log_pattern.into());
        args.extend(cmd.iter().map(OsString::from));
        args
    }
}
