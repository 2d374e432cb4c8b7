//! Text rendering of trace reports.

use std::fmt::Write as _;
use std::time::Duration;

use super::exec_timing::ExecTimingReport;
use super::file_access::FileAccessReport;
use crate::utils::format_duration;

/// Render exec timings as a table. Start and stop are microseconds from the
/// start of the session.
pub fn render_exec_timing(report: &ExecTimingReport) -> String {
    let mut out = String::new();

    writeln!(out, "{} exec calls during run:", report.exe_runtimes.len()).unwrap();
    if !report.exe_runtimes.is_empty() {
        writeln!(
            out,
            "{:>10} {:>10} {:>12}  {}",
            "Start(us)", "Stop(us)", "Elapsed", "Exec"
        )
        .unwrap();
        for record in &report.exe_runtimes {
            let (start, stop) = report.relative_span(record);
            writeln!(
                out,
                "{:>10} {:>10} {:>12}  {}",
                start.as_micros(),
                stop.as_micros(),
                format_duration(record.duration),
                record.image
            )
            .unwrap();
        }
    }
    render_total(&mut out, report.total_time);

    out
}

/// Render the files of a file report, with their owning program when the
/// report was built with programs shown.
pub fn render_file_access(report: &FileAccessReport) -> String {
    let mut out = String::new();

    writeln!(out, "{} files accessed during run:", report.files.len()).unwrap();
    let with_programs = report.files.iter().any(|f| f.program.is_some());
    if with_programs {
        let width = report
            .files
            .iter()
            .map(|f| f.path.chars().count())
            .max()
            .unwrap_or(0)
            .max("Path".len());
        writeln!(out, "{:>12}  {:<width$}  {}", "Size", "Path", "Program").unwrap();
        for file in &report.files {
            writeln!(
                out,
                "{:>12}  {:<width$}  {}",
                file.size.to_string(),
                file.path,
                file.program.as_deref().unwrap_or("")
            )
            .unwrap();
        }
    } else if !report.files.is_empty() {
        writeln!(out, "{:>12}  {}", "Size", "Path").unwrap();
        for file in &report.files {
            writeln!(out, "{:>12}  {}", file.size.to_string(), file.path).unwrap();
        }
    }
    render_total(&mut out, report.total_time);

    out
}

fn render_total(out: &mut String, total: Duration) {
    writeln!(out, "Total time: {}", format_duration(total)).unwrap();
}
