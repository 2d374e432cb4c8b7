//! `etrace analyze`: reports from a trace log recorded earlier.

use anyhow::Context;
use etrace::config::EtraceConfig;
use etrace::strace::display::{render_exec_timing, render_file_access};
use etrace::strace::{read_file_accesses, trace_execve_timings, trace_execve_with_files};

use super::{Output, file_filter};
use crate::cli::AnalyzeMode;

pub fn handle_analyze(mode: AnalyzeMode, config: &EtraceConfig) -> anyhow::Result<()> {
    match mode {
        AnalyzeMode::Exec {
            log,
            slowest,
            output,
        } => {
            let mut output = Output::open(&output)?;
            let report = trace_execve_timings(&log, slowest)
                .with_context(|| format!("cannot analyze {}", log.display()))?;
            output.text(&render_exec_timing(&report))?;
            output.json(&report)?;
            output.finish()
        }
        AnalyzeMode::File {
            log,
            merge,
            filter,
            output,
        } => {
            let filter = file_filter(&filter, config)?;
            let mut output = Output::open(&output)?;
            let report = if merge {
                // Fragments are LOG.<pid>; the merged log replaces LOG
                trace_execve_with_files(&log, &filter, &config.merge_tool)
            } else {
                read_file_accesses(&log, &filter)
            }
            .with_context(|| format!("cannot analyze {}", log.display()))?;
            output.text(&render_file_access(&report))?;
            output.json(&report)?;
            output.finish()
        }
    }
}
