//! Running external tools.
//!
//! Tracing needs root, so tracer invocations are prefixed with `sudo` unless
//! etrace already runs as root. Tool failures fold the tool's own output into
//! the error, since that output is usually the only clue to what went wrong.

use std::ffi::{OsStr, OsString};
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};
use std::sync::OnceLock;

use anyhow::{Context, bail};

use crate::utils::format_tool_output;

/// Cached effective-root check for the current process
static IS_ROOT: OnceLock<bool> = OnceLock::new();

pub fn is_root() -> bool {
    *IS_ROOT.get_or_init(|| {
        #[cfg(unix)]
        {
            nix::unistd::Uid::effective().is_root()
        }
        #[cfg(not(unix))]
        {
            false
        }
    })
}

/// Login name of the invoking user, which traced programs run as.
pub fn current_username() -> anyhow::Result<String> {
    #[cfg(unix)]
    {
        let uid = nix::unistd::Uid::current();
        let user = nix::unistd::User::from_uid(uid)
            .with_context(|| format!("cannot look up user {uid}"))?
            .with_context(|| format!("no passwd entry for uid {uid}"))?;
        Ok(user.name)
    }
    #[cfg(not(unix))]
    {
        std::env::var("USER").context("cannot determine the current user")
    }
}

/// Prefix `argv` with `sudo` (and `sudo_args`) unless running as root.
pub fn add_sudo_if_needed(argv: Vec<OsString>, sudo_args: &[&str]) -> anyhow::Result<Vec<OsString>> {
    prefix_sudo(argv, sudo_args, is_root(), || Ok(which::which("sudo")?))
}

fn prefix_sudo(
    argv: Vec<OsString>,
    sudo_args: &[&str],
    is_root: bool,
    find_sudo: impl FnOnce() -> anyhow::Result<PathBuf>,
) -> anyhow::Result<Vec<OsString>> {
    if is_root {
        return Ok(argv);
    }
    let sudo = find_sudo().context("cannot use strace without running as root or without sudo")?;
    let mut prefixed: Vec<OsString> = Vec::with_capacity(argv.len() + sudo_args.len() + 1);
    prefixed.push(sudo.into());
    prefixed.extend(sudo_args.iter().map(OsString::from));
    prefixed.extend(argv);
    Ok(prefixed)
}

/// Build a [`Command`] from a full argument vector (program first).
pub fn command_from_argv(argv: &[OsString]) -> anyhow::Result<Command> {
    let Some((program, args)) = argv.split_first() else {
        bail!("empty command line");
    };
    let mut cmd = Command::new(program);
    cmd.args(args);
    Ok(cmd)
}

/// Render a command line for logs.
pub fn display_argv(argv: &[impl AsRef<OsStr>]) -> String {
    argv.iter()
        .map(|arg| arg.as_ref().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Run `cmd` to completion, capturing stdout and stderr.
///
/// A non-zero exit is an error that carries the combined output.
pub fn output_err(cmd: &mut Command) -> anyhow::Result<Output> {
    let program = cmd.get_program().to_string_lossy().into_owned();
    log::debug!(
        "$ {program} {}",
        display_argv(&cmd.get_args().collect::<Vec<_>>())
    );
    let output = cmd
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("cannot run {program}"))?;
    if !output.status.success() {
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        bail!(
            "{program} failed ({}){}",
            output.status,
            format_tool_output(&combined)
        );
    }
    Ok(output)
}
