//! Launching the measured program and waiting for it to be ready.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use etrace::config::EtraceConfig;
use etrace::profiling::{free_caches, run_script};
use etrace::xdotool::{WindowSpec, Xtooler};

use crate::cli::RunArgs;

/// Non-fatal failures of one run. They end up in the run's `errors`.
#[derive(Debug, Default)]
pub struct RunErrors(Vec<String>);

impl RunErrors {
    pub fn push(&mut self, err: anyhow::Error) {
        log::warn!("{err:#}");
        self.0.push(format!("{err:#}"));
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

/// Window waiting only works on X11.
pub fn check_session_type(args: &RunArgs) -> anyhow::Result<()> {
    if args.no_window_wait {
        return Ok(());
    }
    let session_type = std::env::var("XDG_SESSION_TYPE").unwrap_or_default();
    if !session_type.trim().eq_ignore_ascii_case("x11") {
        bail!("graphical session type {session_type:?} is unsupported, only x11 is supported");
    }
    Ok(())
}

/// The command line that is actually launched, with the snap/flatpak wrapper.
pub fn target_command(args: &RunArgs, cmd: &[String]) -> Vec<String> {
    let wrapper: &[&str] = if args.use_snap_run {
        &["snap", "run"]
    } else if args.use_flatpak_run {
        &["flatpak", "run"]
    } else {
        &[]
    };
    wrapper
        .iter()
        .map(|s| s.to_string())
        .chain(cmd.iter().cloned())
        .collect()
}

/// `snap run` of a snap that isn't installed would only measure an error.
pub fn check_snap_installed(args: &RunArgs, cmd: &[String]) -> anyhow::Result<()> {
    if !args.use_snap_run {
        return Ok(());
    }
    let Some(snap) = cmd.first() else {
        return Ok(());
    };
    let status = Command::new("snap")
        .args(["list", snap])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .context("cannot run snap")?;
    if !status.success() {
        bail!("snap {snap} is not installed");
    }
    Ok(())
}

/// Window to wait for: `--class-name`, then `--window-name`, then the class
/// named after the unwrapped command.
pub fn window_spec(args: &RunArgs, cmd: &[String]) -> anyhow::Result<WindowSpec> {
    if let Some(class) = &args.class_name {
        return Ok(WindowSpec::Class(class.clone()));
    }
    if let Some(name) = &args.window_name {
        return Ok(WindowSpec::Name(name.clone()));
    }
    WindowSpec::default_for_command(cmd).context("cannot derive a window class from the command")
}

pub fn run_prepare_script(args: &RunArgs, errors: &mut RunErrors) {
    if let Some(script) = &args.prepare_script
        && let Err(err) = run_script(script, &args.prepare_script_args)
    {
        errors.push(err.context("running prepare script"));
    }
}

pub fn run_restore_script(args: &RunArgs, errors: &mut RunErrors) {
    if let Some(script) = &args.restore_script
        && let Err(err) = run_script(script, &args.restore_script_args)
    {
        errors.push(err.context("running restore script"));
    }
}

/// Drop caches unless asked not to, on the command line or in the config.
pub fn maybe_free_caches(args: &RunArgs, config: &EtraceConfig) -> anyhow::Result<()> {
    if args.keep_vm_caches || config.keep_vm_caches {
        log::debug!("Keeping VM caches");
        return Ok(());
    }
    free_caches()
}

fn open_append(path: &Path) -> anyhow::Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("cannot open {}", path.display()))
}

/// Wire up the launched command's standard streams.
pub fn attach_streams(cmd: &mut Command, args: &RunArgs) -> anyhow::Result<()> {
    cmd.stdin(Stdio::inherit());
    match &args.cmd_stdout {
        Some(path) => cmd.stdout(open_append(path)?),
        None => cmd.stdout(Stdio::inherit()),
    };
    match &args.cmd_stderr {
        Some(path) => cmd.stderr(open_append(path)?),
        None => cmd.stderr(Stdio::inherit()),
    };
    Ok(())
}

/// How the launched process is waited on.
pub struct Launch<'a> {
    pub xtool: &'a dyn Xtooler,
    pub window: Option<WindowSpec>,
    pub window_timeout: Duration,
    /// Reap the launched process even after its window was closed. Tracers
    /// must exit before their logs are complete.
    pub reap: bool,
}

impl Launch<'_> {
    /// Start `cmd` and return the time until its window appeared, or until it
    /// exited when not waiting for a window.
    pub fn measure(&self, cmd: &mut Command, errors: &mut RunErrors) -> anyhow::Result<Duration> {
        let start = Instant::now();
        let mut child = cmd.spawn().with_context(|| {
            format!("cannot start {}", cmd.get_program().to_string_lossy())
        })?;

        let mut wids = Vec::new();
        if let Some(spec) = &self.window {
            match self.xtool.wait_for_window(spec, self.window_timeout) {
                Ok(found) => wids = found,
                Err(err) => errors.push(err.context("waiting for window appearance")),
            }
        }

        if wids.is_empty() {
            wait_child(&mut child, errors);
        }
        let startup = start.elapsed();

        if !wids.is_empty() {
            self.close_windows(&wids, errors);
            if self.reap {
                wait_child(&mut child, errors);
            }
        }

        Ok(startup)
    }

    /// Close the windows, then kill their processes in case closing didn't
    /// take. Pids are collected first since a closed window has none.
    fn close_windows(&self, wids: &[String], errors: &mut RunErrors) {
        let mut pids = Vec::with_capacity(wids.len());
        for wid in wids {
            match self.xtool.pid_for_window(wid) {
                Ok(pid) => pids.push(pid),
                Err(err) => {
                    errors.push(err.context(format!("getting pid for window ID {wid}")));
                    break;
                }
            }
        }

        for wid in wids {
            if let Err(err) = self.xtool.close_window(wid) {
                errors.push(err.context("closing window"));
            }
        }

        for pid in pids {
            if let Err(err) = kill_process(pid) {
                errors.push(err);
            }
        }
    }
}

fn wait_child(child: &mut std::process::Child, errors: &mut RunErrors) {
    match child.wait() {
        Ok(status) if !status.success() => {
            errors.push(anyhow::anyhow!("waiting for command: command exited with {status}"))
        }
        Ok(_) => {}
        Err(err) => errors.push(anyhow::Error::new(err).context("waiting for command")),
    }
}

/// SIGKILL `pid`, ignoring a process that already exited.
#[cfg(unix)]
fn kill_process(pid: u32) -> anyhow::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).with_context(|| format!("invalid window process pid {pid}"))?;
    match kill(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(err) => Err(err).with_context(|| format!("killing window process pid {pid}")),
    }
}

#[cfg(not(unix))]
fn kill_process(pid: u32) -> anyhow::Result<()> {
    bail!("killing window process pid {pid} is only supported on unix")
}
