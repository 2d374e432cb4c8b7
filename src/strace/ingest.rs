//! Driving the matchers over a whole trace log.
//!
//! Every parse is one synchronous pass that owns its tracker and accumulators.
//! The first and last non-blank lines must start with `<pid> <timestamp>`;
//! they bound the session.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use super::error::{LogPosition, TraceError};
use super::exec_timing::{ExecTimingReport, ExecTimings};
use super::file_access::{FileAccessCorrelator, FileAccessReport, FileFilter};
use super::matchers::{LineMatch, MatcherSet, match_line, normalize_access_path};
use super::merge::merge_fragments;
use super::pid_tracker::PidTracker;
use super::types::{PathAccess, Pid, SessionBounds, Timestamp};

static SESSION_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([0-9]+)\s+([0-9]+(?:\.[0-9]+)?)(?:\s|$)").unwrap());

fn parse_session_line(line: &str, position: LogPosition) -> Result<(Pid, Timestamp), TraceError> {
    let error = |reason: String| TraceError::Parse {
        position,
        line: line.to_string(),
        reason,
    };
    let caps = SESSION_LINE
        .captures(line)
        .ok_or_else(|| error("expected `<pid> <timestamp>`".to_string()))?;
    let pid: Pid = caps[1]
        .parse()
        .map_err(|_| error(format!("invalid pid {:?}", &caps[1])))?;
    let time: Timestamp = caps[2].parse().map_err(|e| error(format!("{e}")))?;
    Ok((pid, time))
}

/// Feed every line of `reader` to `set` and hand claimed lines to `on_match`.
fn scan<R: BufRead>(
    mut reader: R,
    set: MatcherSet,
    mut on_match: impl FnMut(LineMatch),
) -> Result<SessionBounds, TraceError> {
    let mut buf = Vec::new();
    let mut line_no = 0usize;
    let mut first: Option<(Pid, Timestamp)> = None;
    let mut last_line = String::new();

    loop {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .map_err(|e| TraceError::io("cannot read trace log", e))?;
        if read == 0 {
            break;
        }
        line_no += 1;

        let decoded = String::from_utf8_lossy(&buf);
        let line = decoded.trim_end_matches(['\n', '\r']);
        if line.trim().is_empty() {
            continue;
        }
        if first.is_none() {
            first = Some(parse_session_line(line, LogPosition::Start)?);
        }

        let found = match_line(line, set).map_err(|e| TraceError::Parse {
            position: LogPosition::Line(line_no),
            line: line.to_string(),
            reason: e.to_string(),
        })?;
        if let Some(found) = found {
            on_match(found);
        }

        last_line.clear();
        last_line.push_str(line);
    }

    let Some((first_pid, start)) = first else {
        return Err(TraceError::Parse {
            position: LogPosition::Start,
            line: String::new(),
            reason: "trace log is empty".to_string(),
        });
    };
    let (last_pid, end) = parse_session_line(&last_line, LogPosition::End)?;
    log::debug!("Read {line_no} trace log lines, session {start}..{end}");

    Ok(SessionBounds {
        first_pid,
        start,
        last_pid,
        end,
    })
}

/// Exec timings from an `execve`/`execveat` trace, keeping the `n_slowest`
/// slowest execs (all of them for 0).
pub fn parse_exec_timings<R: BufRead>(
    reader: R,
    n_slowest: usize,
) -> Result<ExecTimingReport, TraceError> {
    let mut tracker = PidTracker::new();
    let mut timings = ExecTimings::new(n_slowest);

    let session = scan(reader, MatcherSet::Exec, |found| {
        let closed = match found {
            LineMatch::Exec { pid, time, image } => tracker.on_exec(pid, time, image),
            LineMatch::Terminate { pid, time } => tracker.on_terminate(pid, time),
            LineMatch::Access(_) => None,
        };
        if let Some(record) = closed {
            timings.record(record);
        }
    })?;

    if let Some(record) = tracker.on_stream_end(session.first_pid, session.last_pid, session.end)
    {
        timings.record(record);
    }
    Ok(timings.finish(&session))
}

/// Read exec timings from the log at `path`, which may be a named pipe still
/// being written by the tracer.
pub fn trace_execve_timings(path: &Path, n_slowest: usize) -> Result<ExecTimingReport, TraceError> {
    let file = open_log(path)?;
    parse_exec_timings(BufReader::new(file), n_slowest)
}

/// File accesses from a merged file-profile trace.
///
/// A successful exec with an absolute image path also counts as an access to
/// that image by the new process.
pub fn parse_file_accesses<R: BufRead>(
    reader: R,
    filter: &FileFilter,
) -> Result<FileAccessReport, TraceError> {
    let mut tracker = PidTracker::new();
    let mut records = Vec::new();
    let mut correlator = FileAccessCorrelator::new();

    let session = scan(reader, MatcherSet::Files, |found| match found {
        LineMatch::Exec { pid, time, image } => {
            if image.starts_with('/') {
                correlator.record(PathAccess {
                    time,
                    path: normalize_access_path(&image),
                    syscall: "execve".to_string(),
                    pid,
                });
            }
            records.extend(tracker.on_exec(pid, time, image));
        }
        LineMatch::Terminate { pid, time } => records.extend(tracker.on_terminate(pid, time)),
        LineMatch::Access(access) => correlator.record(access),
    })?;

    records.extend(tracker.on_stream_end(session.first_pid, session.last_pid, session.end));
    records.sort_by_key(|record| record.start);
    log::debug!(
        "Correlating {} path accesses with {} processes",
        correlator.len(),
        records.len()
    );

    let correlation = correlator.correlate(records);
    Ok(FileAccessReport::build(
        correlation,
        filter,
        session.start,
        session.total_time(),
    ))
}

/// Merge the per-process fragments of `pattern` with `merge_tool`, then read
/// file accesses from the merged log.
pub fn trace_execve_with_files(
    pattern: &Path,
    filter: &FileFilter,
    merge_tool: &str,
) -> Result<FileAccessReport, TraceError> {
    let merged = merge_fragments(merge_tool, pattern)?;
    parse_file_accesses(BufReader::new(merged), filter)
}

/// File accesses from a single, already merged log.
pub fn read_file_accesses(path: &Path, filter: &FileFilter) -> Result<FileAccessReport, TraceError> {
    let file = open_log(path)?;
    parse_file_accesses(BufReader::new(file), filter)
}

fn open_log(path: &Path) -> Result<File, TraceError> {
    File::open(path)
        .map_err(|e| TraceError::io(format!("cannot open trace log {}", path.display()), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strace::file_access::FileFilterSpec;
    use crate::strace::types::ExecutionRecord;
    use std::time::Duration;

    const EXEC_LOG: &str = include_str!("testdata/exec.log");
    const FILES_LOG: &str = include_str!("testdata/files.log");

    fn timings(log: &str, n_slowest: usize) -> ExecTimingReport {
        parse_exec_timings(log.as_bytes(), n_slowest).unwrap()
    }

    fn summary(records: &[ExecutionRecord]) -> Vec<(&str, Duration)> {
        records
            .iter()
            .map(|r| (r.image.as_str(), r.duration))
            .collect()
    }

    fn assert_no_overlaps(records: &[ExecutionRecord]) {
        for (i, a) in records.iter().enumerate() {
            for b in &records[i + 1..] {
                if a.pid == b.pid {
                    assert!(
                        a.end() <= b.start || b.end() <= a.start,
                        "overlapping runs of pid {}: {a:?} {b:?}",
                        a.pid
                    );
                }
            }
        }
    }

    #[test]
    fn test_exec_fixture() {
        let report = timings(EXEC_LOG, 0);
        assert_eq!(
            summary(&report.exe_runtimes),
            [
                ("/usr/bin/snap", Duration::from_millis(10)),
                ("/usr/lib/snapd/snap-confine", Duration::from_millis(40)),
                ("snap-update-ns", Duration::from_millis(20)),
                ("/usr/lib/snapd/snap-exec", Duration::from_millis(10)),
                ("/snap/test-snapd-sh/x2/bin/sh", Duration::from_millis(20)),
                ("/bin/true", Duration::from_micros(2500)),
            ]
        );
        assert_eq!(report.total_time, Duration::from_millis(80));
        assert_eq!(report.session_start, "1542815326.700000".parse().unwrap());
        assert_no_overlaps(&report.exe_runtimes);
    }

    #[test]
    fn test_exec_fixture_slowest() {
        let report = timings(EXEC_LOG, 3);
        assert_eq!(
            summary(&report.exe_runtimes),
            [
                ("/usr/lib/snapd/snap-confine", Duration::from_millis(40)),
                ("snap-update-ns", Duration::from_millis(20)),
                ("/snap/test-snapd-sh/x2/bin/sh", Duration::from_millis(20)),
            ]
        );
        // Total time is the whole session regardless of retention
        assert_eq!(report.total_time, Duration::from_millis(80));
    }

    #[test]
    fn test_second_exec_without_terminate() {
        let log = "\
100 1.000000 execve(\"/a\", [\"/a\"], 0x0 /* 0 vars */) = 0
100 1.500000 execve(\"/b\", [\"/b\"], 0x0 /* 0 vars */) = 0
200 1.700000 +++ exited with 0 +++
";
        let report = timings(log, 0);
        // /b is still live when the log ends on another pid
        assert_eq!(
            summary(&report.exe_runtimes),
            [("/a", Duration::from_millis(500))]
        );
    }

    #[test]
    fn test_pid_reuse() {
        let log = "\
1 1.000000 execve(\"/init\", [\"/init\"], 0x0 /* 0 vars */) = 0
100 1.100000 execve(\"/a\", [\"/a\"], 0x0 /* 0 vars */) = 0
1 1.200000 --- SIGCHLD {si_signo=SIGCHLD, si_code=CLD_EXITED, si_pid=100, si_uid=0, si_status=0} ---
100 1.300000 execve(\"/b\", [\"/b\"], 0x0 /* 0 vars */) = 0
1 1.600000 --- SIGCHLD {si_signo=SIGCHLD, si_code=CLD_EXITED, si_pid=100, si_uid=0, si_status=0} ---
1 1.700000 +++ exited with 0 +++
";
        let report = timings(log, 0);
        assert_eq!(
            summary(&report.exe_runtimes),
            [
                ("/init", Duration::from_millis(700)),
                ("/a", Duration::from_millis(100)),
                ("/b", Duration::from_millis(300)),
            ]
        );
    }

    #[test]
    fn test_non_matching_lines_give_empty_report() {
        let log = "\
42 10.000000 brk(NULL) = 0x5581
42 10.250000 +++ exited with 0 +++
";
        let report = timings(log, 0);
        assert!(report.exe_runtimes.is_empty());
        assert_eq!(report.total_time, Duration::from_millis(250));
    }

    #[test]
    fn test_blank_lines_are_skipped() {
        let log = "\n\n42 10.000000 brk(NULL) = 0x5581\n42 11.000000 +++ exited with 0 +++\n\n  \n";
        assert_eq!(timings(log, 0).total_time, Duration::from_secs(1));
    }

    #[test]
    fn test_empty_log_is_parse_error() {
        let err = parse_exec_timings("".as_bytes(), 0).unwrap_err();
        assert!(
            matches!(
                err,
                TraceError::Parse {
                    position: LogPosition::Start,
                    ..
                }
            ),
            "{err:?}"
        );
    }

    #[test]
    fn test_malformed_first_line() {
        let log = "strace: Process 42 attached\n42 1.0 +++ exited with 0 +++\n";
        match parse_exec_timings(log.as_bytes(), 0).unwrap_err() {
            TraceError::Parse { position, line, .. } => {
                assert_eq!(position, LogPosition::Start);
                assert_eq!(line, "strace: Process 42 attached");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_malformed_last_line() {
        let log = "42 1.0 brk(NULL) = 0x5581\n<... interrupted>\n";
        match parse_exec_timings(log.as_bytes(), 0).unwrap_err() {
            TraceError::Parse { position, line, .. } => {
                assert_eq!(position, LogPosition::End);
                assert_eq!(line, "<... interrupted>");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_bad_number_names_line() {
        let log = "1 1.0 brk(NULL) = 0\n1 1.2.3 execve(\"/a\", [], 0x0) = 0\n1 2.0 +++ exited with 0 +++\n";
        match parse_exec_timings(log.as_bytes(), 0).unwrap_err() {
            TraceError::Parse { position, .. } => assert_eq!(position, LogPosition::Line(2)),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_non_utf8_is_decoded_lossily() {
        let mut log = b"1 1.0 openat(AT_FDCWD, \"/tmp/caf\xe9\", O_RDONLY) = 3\n".to_vec();
        log.extend_from_slice(b"1 2.0 +++ exited with 0 +++\n");
        let report = parse_file_accesses(log.as_slice(), &FileFilterSpec::default().compile().unwrap())
            .unwrap();
        assert_eq!(report.all_files[0].path, "/tmp/caf\u{fffd}");
    }

    #[test]
    fn test_files_fixture() {
        let filter = FileFilterSpec::default().compile().unwrap();
        let report = parse_file_accesses(FILES_LOG.as_bytes(), &filter).unwrap();

        let files: Vec<_> = report.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(
            files,
            [
                "/snap/demo/12/bin/demo",
                "/snap/demo/12/etc/demo.conf",
                "/snap/demo/12/share/icons/app.png",
                "/tmp/.glDNftWu",
            ]
        );
        assert_eq!(report.total_time, Duration::from_millis(12));

        let processes: Vec<_> = report
            .processes
            .iter()
            .map(|p| (p.process.image.as_str(), p.process.duration, p.path_accesses.len()))
            .collect();
        assert_eq!(
            processes,
            [
                ("/snap/demo/12/bin/demo", Duration::from_millis(12), 6),
                ("/usr/lib/snapd/snap-confine", Duration::from_millis(2), 2),
            ]
        );
        let records: Vec<_> = report.processes.iter().map(|p| p.process.clone()).collect();
        assert_no_overlaps(&records);

        let all: Vec<_> = report.all_files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(
            all,
            [
                "/snap/demo/12/bin/demo",
                "/snap/demo/12/etc/demo.conf",
                "/snap/demo/12/share/icons/app.png",
                "/snap/demo/current",
                "/tmp/.glDNftWu",
                "/usr/lib/snapd/snap-confine",
            ]
        );
    }

    #[test]
    fn test_files_fixture_with_snapd_programs() {
        let spec = FileFilterSpec {
            exclude_programs: Vec::new(),
            show_programs: true,
            ..Default::default()
        };
        let report = parse_file_accesses(FILES_LOG.as_bytes(), &spec.compile().unwrap()).unwrap();
        let confine: Vec<_> = report
            .files
            .iter()
            .filter(|f| f.program.as_deref() == Some("/usr/lib/snapd/snap-confine"))
            .map(|f| f.path.as_str())
            .collect();
        assert_eq!(confine, ["/snap/demo/current", "/usr/lib/snapd/snap-confine"]);
    }

    #[test]
    fn test_files_fixture_file_regex() {
        let spec = FileFilterSpec {
            file_regex: r"\.conf$".into(),
            ..Default::default()
        };
        let report = parse_file_accesses(FILES_LOG.as_bytes(), &spec.compile().unwrap()).unwrap();
        let files: Vec<_> = report.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(files, ["/snap/demo/12/etc/demo.conf"]);
    }

    #[test]
    fn test_trace_execve_timings_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exec.log");
        std::fs::write(&path, EXEC_LOG).unwrap();
        let report = trace_execve_timings(&path, 1).unwrap();
        assert_eq!(report.exe_runtimes.len(), 1);
        assert_eq!(report.exe_runtimes[0].image, "/usr/lib/snapd/snap-confine");
    }

    #[cfg(unix)]
    #[test]
    fn test_trace_execve_with_files_merges_first() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let fragment = dir.path().join("fragment");
        std::fs::write(&fragment, FILES_LOG).unwrap();
        let tool = dir.path().join("merge");
        std::fs::write(&tool, format!("#!/bin/sh\ncat '{}'\n", fragment.display())).unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

        let filter = FileFilterSpec::default().compile().unwrap();
        let report = trace_execve_with_files(
            &dir.path().join("trace.log"),
            &filter,
            tool.to_str().unwrap(),
        )
        .unwrap();
        assert_eq!(report.files.len(), 4);
    }

    #[test]
    fn test_missing_log_is_io_error() {
        let err = trace_execve_timings(Path::new("/nonexistent/etrace.log"), 0).unwrap_err();
        assert!(matches!(err, TraceError::Io { .. }), "{err:?}");
    }
}
