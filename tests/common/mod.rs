//! Shared helpers for the integration tests.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

pub fn etrace_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_etrace"))
}

/// A scratch directory with its own config file, so tests never read the
/// user's real config.
pub struct TestEnv {
    dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn config_path(&self) -> PathBuf {
        self.path().join("config.toml")
    }

    pub fn write_config(&self, content: &str) {
        fs::write(self.config_path(), content).unwrap();
    }

    /// Copy a log from `src/strace/testdata` into the scratch directory.
    pub fn fixture(&self, name: &str) -> PathBuf {
        let source = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("src/strace/testdata")
            .join(name);
        let dest = self.path().join(name);
        fs::copy(source, &dest).unwrap();
        dest
    }

    pub fn write_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    pub fn command(&self) -> Command {
        let mut cmd = Command::new(etrace_bin());
        cmd.env("ETRACE_CONFIG_PATH", self.config_path());
        cmd.env_remove("RUST_LOG");
        cmd.current_dir(self.path());
        cmd
    }

    /// Create an executable shell script in the scratch directory.
    #[cfg(unix)]
    pub fn script(&self, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = self.path().join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }
}

pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

/// Run `cmd`, asserting success, and return stdout.
pub fn run_ok(cmd: &mut Command) -> String {
    let output = cmd.output().unwrap();
    assert!(
        output.status.success(),
        "etrace failed ({}):\n{}",
        output.status,
        stderr(&output)
    );
    stdout(&output)
}
