//! X11 window handling through `xdotool`.

use std::fmt;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use wait_timeout::ChildExt;

use crate::shell_exec::output_err;
use crate::utils::format_tool_output;

/// How to recognize the application's window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowSpec {
    Class(String),
    Name(String),
    ClassName(String),
}

impl WindowSpec {
    /// Window class guessed from the command: the basename of its program.
    pub fn default_for_command(cmd: &[String]) -> Option<Self> {
        let program = cmd.first()?;
        let basename = Path::new(program).file_name()?.to_str()?;
        Some(WindowSpec::Class(basename.to_string()))
    }

    fn search_args(&self) -> [&str; 2] {
        match self {
            WindowSpec::Class(class) => ["--class", class],
            WindowSpec::Name(name) => ["--name", name],
            WindowSpec::ClassName(class_name) => ["--classname", class_name],
        }
    }
}

impl fmt::Display for WindowSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowSpec::Class(class) => write!(f, "class {class}"),
            WindowSpec::Name(name) => write!(f, "name {name}"),
            WindowSpec::ClassName(class_name) => write!(f, "class name {class_name}"),
        }
    }
}

/// X11 window id as printed by xdotool.
pub type WindowId = String;

/// Window operations used while measuring a run.
pub trait Xtooler {
    /// Block until a window matching `spec` is visible, returning the
    /// matching window ids.
    fn wait_for_window(&self, spec: &WindowSpec, timeout: Duration) -> anyhow::Result<Vec<WindowId>>;

    fn close_window(&self, wid: &str) -> anyhow::Result<()>;

    fn pid_for_window(&self, wid: &str) -> anyhow::Result<u32>;
}

#[derive(Debug, Clone)]
pub struct XdoTool {
    program: String,
    attempts: u32,
}

impl XdoTool {
    pub fn new(attempts: u32) -> Self {
        Self {
            program: "xdotool".to_string(),
            attempts: attempts.max(1),
        }
    }

    /// Use a different xdotool binary.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

impl Xtooler for XdoTool {
    fn wait_for_window(&self, spec: &WindowSpec, timeout: Duration) -> anyhow::Result<Vec<WindowId>> {
        let deadline = Instant::now() + timeout;
        let mut last_output = String::new();

        for attempt in 1..=self.attempts {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            log::debug!("Searching for window with {spec} (attempt {attempt})");

            let mut child = Command::new(&self.program)
                .args(["search", "--sync", "--onlyvisible"])
                .args(spec.search_args())
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
                .with_context(|| format!("cannot run {}", self.program))?;

            let Some(status) = child.wait_timeout(remaining)? else {
                let _ = child.kill();
                let _ = child.wait();
                bail!("timed out waiting for window with {spec} to appear");
            };

            let mut stdout = String::new();
            let mut stderr = String::new();
            if let Some(mut out) = child.stdout.take() {
                out.read_to_string(&mut stdout)?;
            }
            if let Some(mut err) = child.stderr.take() {
                err.read_to_string(&mut stderr)?;
            }

            if status.success() {
                let ids: Vec<WindowId> = stdout.split_whitespace().map(str::to_string).collect();
                if !ids.is_empty() {
                    return Ok(ids);
                }
            }
            last_output = stdout + &stderr;
        }

        if Instant::now() >= deadline {
            bail!("timed out waiting for window with {spec} to appear");
        }
        bail!(
            "xdotool failed to find window with {spec}{}",
            format_tool_output(&last_output)
        )
    }

    fn close_window(&self, wid: &str) -> anyhow::Result<()> {
        output_err(Command::new(&self.program).args(["windowkill", wid]))
            .with_context(|| format!("xdotool failed to close window ID {wid}"))?;
        Ok(())
    }

    fn pid_for_window(&self, wid: &str) -> anyhow::Result<u32> {
        let output = output_err(Command::new(&self.program).args(["getwindowpid", wid]))
            .with_context(|| format!("xdotool failed to get pid for window ID {wid}"))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .trim()
            .parse()
            .with_context(|| format!("xdotool printed an invalid pid for window ID {wid}: {stdout:?}"))
    }
}
