//! `etrace file`: which files a program touches while starting up.

use std::time::Duration;

use anyhow::Context;
use etrace::config::EtraceConfig;
use etrace::shell_exec::{add_sudo_if_needed, command_from_argv, current_username, display_argv};
use etrace::strace::command::StraceOptions;
use etrace::strace::display::render_file_access;
use etrace::strace::{FileAccessReport, trace_execve_with_files};
use etrace::utils::{format_duration, serialize_secs};
use etrace::xdotool::XdoTool;
use serde::Serialize;

use super::run::{self, Launch, RunErrors};
use super::{Output, file_filter};
use crate::cli::FileArgs;

#[derive(Debug, Serialize)]
pub struct FileResult {
    /// Missing when the trace couldn't be parsed; see `errors`
    pub file_access: Option<FileAccessReport>,
    #[serde(serialize_with = "serialize_secs")]
    pub time_to_display: Duration,
    pub errors: Vec<String>,
}

pub fn handle_file(args: FileArgs, config: &EtraceConfig) -> anyhow::Result<()> {
    run::check_session_type(&args.run)?;
    let mut output = Output::open(&args.output)?;
    let filter = file_filter(&args.filter, config)?;
    run::check_snap_installed(&args.run, &args.cmd)?;

    let mut errors = RunErrors::default();
    run::run_prepare_script(&args.run, &mut errors);

    let strace = StraceOptions {
        strace_path: config.resolve_strace()?,
        user: current_username()?,
        excluded_syscalls: config.excluded_syscalls.clone(),
    };
    let trace_dir = tempfile::Builder::new()
        .prefix("file-trace")
        .tempdir()
        .context("cannot create a directory for the trace logs")?;
    let log_pattern = trace_dir.path().join("strace.log");

    let target = run::target_command(&args.run, &args.cmd);
    let argv = add_sudo_if_needed(strace.trace_files_command(&log_pattern, &target), &["-E"])?;
    log::debug!("$ {}", display_argv(&argv));
    let mut cmd = command_from_argv(&argv)?;
    run::attach_streams(&mut cmd, &args.run)?;

    let window = if args.run.no_window_wait {
        None
    } else {
        Some(run::window_spec(&args.run, &args.cmd)?)
    };
    let xtool = XdoTool::new(config.window_search_attempts);
    let launch = Launch {
        xtool: &xtool,
        window,
        window_timeout: config.window_timeout(),
        reap: true,
    };

    run::maybe_free_caches(&args.run, config)?;
    let time_to_display = launch.measure(&mut cmd, &mut errors)?;

    let file_access = match trace_execve_with_files(&log_pattern, &filter, &config.merge_tool) {
        Ok(report) => Some(report),
        Err(err) => {
            errors.push(anyhow::Error::new(err).context("cannot extract runtime data"));
            None
        }
    };

    if let Some(report) = &file_access {
        output.text(&render_file_access(report))?;
    }

    run::run_restore_script(&args.run, &mut errors);

    output.text(&format!(
        "Total startup time: {}\n",
        format_duration(time_to_display)
    ))?;
    output.json(&FileResult {
        file_access,
        time_to_display,
        errors: errors.into_vec(),
    })?;
    output.finish()
}
