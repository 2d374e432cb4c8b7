//! Reassembling per-process trace fragments into one chronological log.
//!
//! With `-ff` strace writes one `<pattern>.<pid>` file per process. The merge
//! tool reads those fragments and prints them interleaved by timestamp; its
//! stdout goes straight into `<pattern>` itself.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::process::{Command, Stdio};

use super::error::TraceError;

pub const DEFAULT_MERGE_TOOL: &str = "strace-log-merge";

/// Merge the fragments of `pattern` into `pattern`, truncating it first.
///
/// Returns the merged log positioned at its start. When the tool fails,
/// whatever it wrote to stdout and stderr is carried in
/// [`TraceError::Merge`].
pub fn merge_fragments(tool: &str, pattern: &Path) -> Result<File, TraceError> {
    let mut merged = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(pattern)
        .map_err(|e| TraceError::io(format!("cannot open {}", pattern.display()), e))?;
    let stdout = merged
        .try_clone()
        .map_err(|e| TraceError::io(format!("cannot open {}", pattern.display()), e))?;

    log::debug!("$ {tool} {}", pattern.display());
    let output = Command::new(tool)
        .arg(pattern)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| TraceError::io(format!("cannot run {tool}"), e))?;

    rewind(&mut merged, pattern)?;
    if !output.status.success() {
        let mut captured = String::new();
        if let Err(err) = merged.read_to_string(&mut captured) {
            log::debug!("Cannot read {tool} output back: {err}");
        }
        captured.push_str(&String::from_utf8_lossy(&output.stderr));
        return Err(TraceError::Merge {
            tool: tool.to_string(),
            status: output.status.to_string(),
            output: captured,
        });
    }

    Ok(merged)
}

fn rewind(file: &mut File, path: &Path) -> Result<(), TraceError> {
    file.seek(SeekFrom::Start(0))
        .map(|_| ())
        .map_err(|e| TraceError::io(format!("cannot rewind {}", path.display()), e))
}
