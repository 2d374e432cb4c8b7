//! Run preparation: dropping VM caches and user scripts.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::Context;

use crate::shell_exec::{add_sudo_if_needed, command_from_argv, output_err};

/// Drop the page cache, dentries and inodes so every run starts cold.
pub fn free_caches() -> anyhow::Result<()> {
    for level in 1..=3 {
        let argv = add_sudo_if_needed(
            vec![
                "sysctl".into(),
                "-q".into(),
                format!("vm.drop_caches={level}").into(),
            ],
            &[],
        )?;
        output_err(&mut command_from_argv(&argv)?)
            .with_context(|| format!("cannot drop VM caches (level {level})"))?;
    }
    Ok(())
}

/// Run a prepare or restore script with `args`.
///
/// The script is looked up on `PATH` first, then relative to the current
/// directory.
pub fn run_script(name: &Path, args: &[String]) -> anyhow::Result<()> {
    let script = resolve_script(name)?;
    log::info!("Running script {}", script.display());
    let mut cmd = Command::new(&script);
    cmd.args(args);
    output_err(&mut cmd).with_context(|| format!("script {} failed", name.display()))?;
    Ok(())
}

fn resolve_script(name: &Path) -> anyhow::Result<PathBuf> {
    if let Ok(found) = which::which(name) {
        return Ok(found);
    }
    let cwd = std::env::current_dir().context("cannot determine the current directory")?;
    let local = cwd.join(name);
    if local.is_file() {
        return Ok(local);
    }
    anyhow::bail!("cannot find script {}", name.display())
}

/// Argument vector for a script invocation, for logging and dry runs.
pub fn script_argv(name: &Path, args: &[String]) -> Vec<OsString> {
    std::iter::once(name.as_os_str().to_os_string())
        .chain(args.iter().map(OsString::from))
        .collect()
}
