//! `etrace exec`: startup latency, with exec timings from strace.

use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Context;
use etrace::config::EtraceConfig;
use etrace::shell_exec::{add_sudo_if_needed, command_from_argv, current_username, display_argv};
use etrace::strace::command::StraceOptions;
use etrace::strace::display::render_exec_timing;
use etrace::strace::{ExecTimingReport, TraceError, parse_exec_timings};
use etrace::utils::{format_duration, serialize_secs};
use etrace::xdotool::XdoTool;
use serde::Serialize;

use super::Output;
use super::run::{self, Launch, RunErrors};
use crate::cli::ExecArgs;

#[derive(Debug, Serialize)]
pub struct ExecRun {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exec_timing: Option<ExecTimingReport>,
    #[serde(serialize_with = "serialize_secs")]
    pub time_to_display: Duration,
    /// Traced span of the whole run, or the startup time when not tracing
    #[serde(serialize_with = "serialize_secs")]
    pub time_to_run: Duration,
    pub errors: Vec<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct ExecResult {
    pub runs: Vec<ExecRun>,
}

pub fn handle_exec(args: ExecArgs, config: &EtraceConfig) -> anyhow::Result<()> {
    let mut output = Output::open(&args.output)?;
    run::check_session_type(&args.run)?;
    run::check_snap_installed(&args.run, &args.cmd)?;

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
        reap: !args.no_trace,
    };
    let strace = if args.no_trace {
        None
    } else {
        Some(StraceOptions {
            strace_path: config.resolve_strace()?,
            user: current_username()?,
            excluded_syscalls: config.excluded_syscalls.clone(),
        })
    };

    let mut result = ExecResult::default();
    for n in 1..=args.repeat.max(1) {
        log::info!("Run {n} of {}", args.repeat.max(1));
        let run = run_once(&args, config, &launch, strace.as_ref())?;
        if let Some(timing) = &run.exec_timing {
            output.text(&render_exec_timing(timing))?;
        }
        output.text(&format!(
            "Total startup time: {}\n",
            format_duration(run.time_to_display)
        ))?;
        result.runs.push(run);
    }

    output.json(&result)?;
    output.finish()
}

fn run_once(
    args: &ExecArgs,
    config: &EtraceConfig,
    launch: &Launch<'_>,
    strace: Option<&StraceOptions>,
) -> anyhow::Result<ExecRun> {
    let mut errors = RunErrors::default();
    run::run_prepare_script(&args.run, &mut errors);

    let target = run::target_command(&args.run, &args.cmd);

    let (time_to_display, exec_timing) = match strace {
        None => {
            let argv: Vec<OsString> = target.iter().map(Into::into).collect();
            let mut cmd = command_from_argv(&argv)?;
            run::attach_streams(&mut cmd, &args.run)?;
            run::maybe_free_caches(&args.run, config)?;
            (launch.measure(&mut cmd, &mut errors)?, None)
        }
        Some(strace) => {
            let mut fifo = TraceFifo::create()?;
            let reader = fifo.spawn_reader(args.slowest)?;

            let argv =
                add_sudo_if_needed(strace.trace_exec_command(&fifo.path(), &target), &["-E"])?;
            log::debug!("$ {}", display_argv(&argv));
            let mut cmd = command_from_argv(&argv)?;
            run::attach_streams(&mut cmd, &args.run)?;
            run::maybe_free_caches(&args.run, config)?;
            let measured = launch.measure(&mut cmd, &mut errors);

            // The reader only sees EOF once every writer is gone
            let timing = fifo.finish(reader);
            let startup = measured?;
            let report = timing.context("cannot extract runtime data")?;
            (startup, Some(report))
        }
    };

    run::run_restore_script(&args.run, &mut errors);

    let time_to_run = exec_timing
        .as_ref()
        .map_or(time_to_display, |timing| timing.total_time);
    Ok(ExecRun {
        exec_timing,
        time_to_display,
        time_to_run,
        errors: errors.into_vec(),
    })
}

type ReaderHandle = JoinHandle<Result<ExecTimingReport, TraceError>>;

/// Named pipe strace writes its log to, read while the trace runs.
struct TraceFifo {
    dir: tempfile::TempDir,
    reader: Option<File>,
    /// Write end held open so the reader doesn't see EOF before strace has
    /// opened the pipe, nor blocks forever if strace fails to start
    keepalive: Option<File>,
}

impl TraceFifo {
    fn create() -> anyhow::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("exec-trace")
            .tempdir()
            .context("cannot create a directory for the trace fifo")?;
        let path = dir.path().join("strace.fifo");
        make_fifo(&path)?;
        let open_context = || format!("cannot open trace fifo {}", path.display());
        let keepalive = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .with_context(open_context)?;
        // Doesn't block: the keepalive is a writer
        let reader = File::open(&path).with_context(open_context)?;
        Ok(Self {
            dir,
            reader: Some(reader),
            keepalive: Some(keepalive),
        })
    }

    fn path(&self) -> PathBuf {
        self.dir.path().join("strace.fifo")
    }

    fn spawn_reader(&mut self, n_slowest: usize) -> anyhow::Result<ReaderHandle> {
        let file = self.reader.take().context("trace fifo reader already started")?;
        thread::Builder::new()
            .name("strace-reader".into())
            .spawn(move || parse_exec_timings(BufReader::new(file), n_slowest))
            .context("cannot start the trace reader")
    }

    /// Release the write end and wait for the reader to drain the pipe.
    fn finish(mut self, reader: ReaderHandle) -> Result<ExecTimingReport, TraceError> {
        drop(self.keepalive.take());
        reader.join().unwrap_or_else(|_| {
            Err(TraceError::Io {
                context: "trace reader panicked".into(),
                source: std::io::Error::other("reader thread panicked"),
            })
        })
    }
}

#[cfg(unix)]
fn make_fifo(path: &Path) -> anyhow::Result<()> {
    use nix::sys::stat::Mode;
    nix::unistd::mkfifo(path, Mode::from_bits_truncate(0o640))
        .with_context(|| format!("cannot create trace fifo {}", path.display()))
}

#[cfg(not(unix))]
fn make_fifo(path: &Path) -> anyhow::Result<()> {
    anyhow::bail!("cannot create trace fifo {}: named pipes need unix", path.display())
}
