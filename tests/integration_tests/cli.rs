use serde_json::Value;

use crate::common::{TestEnv, run_ok, stderr};

#[test]
fn test_help() {
    let env = TestEnv::new();
    let stdout = run_ok(env.command().arg("--help"));
    for command in ["exec", "file", "analyze"] {
        assert!(stdout.contains(command), "{stdout}");
    }
}

#[test]
fn test_exec_requires_command() {
    let env = TestEnv::new();
    let output = env.command().args(["exec", "--no-trace"]).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_window_wait_needs_x11() {
    let env = TestEnv::new();
    let output = env
        .command()
        .args(["exec", "--no-trace", "--keep-vm-caches", "--", "true"])
        .env("XDG_SESSION_TYPE", "wayland")
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(
        stderr(&output).contains(r#"graphical session type "wayland" is unsupported, only x11 is supported"#),
        "{}",
        stderr(&output)
    );
}

#[cfg(unix)]
#[test]
fn test_exec_untraced_runs() {
    let env = TestEnv::new();
    let marker = env.path().join("prepared");
    let prepare = env.script("prepare.sh", "echo run >> \"$1\"");

    let stdout = run_ok(
        env.command()
            .args(["exec", "--no-trace", "--no-window-wait", "--keep-vm-caches", "-n", "2", "-j"])
            .arg("--prepare-script")
            .arg(&prepare)
            .arg("--prepare-script-args")
            .arg(&marker)
            .args(["--", "sh", "-c", "exit 0"]),
    );
    let result: Value = serde_json::from_str(&stdout).unwrap();

    let runs = result["runs"].as_array().unwrap();
    assert_eq!(runs.len(), 2);
    for run in runs {
        assert!(run.get("exec_timing").is_none(), "{run}");
        assert!(run["time_to_display"].as_f64().unwrap() >= 0.0);
        assert_eq!(run["time_to_run"], run["time_to_display"]);
        assert_eq!(run["errors"].as_array().unwrap().len(), 0, "{run}");
    }
    assert_eq!(std::fs::read_to_string(marker).unwrap(), "run\nrun\n");
}

#[cfg(unix)]
#[test]
fn test_exec_untraced_failure_is_recorded() {
    let env = TestEnv::new();
    let cmd_stdout = env.path().join("cmd.out");

    let output = env
        .command()
        .args(["exec", "--no-trace", "--no-window-wait", "--keep-vm-caches"])
        .arg("--cmd-stdout")
        .arg(&cmd_stdout)
        .args(["--", "sh", "-c", "echo hello; exit 3"])
        .output()
        .unwrap();

    assert!(output.status.success(), "{}", stderr(&output));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("Total startup time: "), "{stdout}");
    assert!(
        stderr(&output).contains("waiting for command: command exited with exit status: 3"),
        "{}",
        stderr(&output)
    );
    assert_eq!(std::fs::read_to_string(cmd_stdout).unwrap(), "hello\n");
}

#[cfg(unix)]
#[test]
fn test_keep_vm_caches_from_config() {
    let env = TestEnv::new();
    env.write_config("keep_vm_caches = true\n");

    let stdout = run_ok(
        env.command()
            .args(["exec", "--no-trace", "--no-window-wait", "-j", "--", "true"]),
    );
    let result: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(result["runs"].as_array().unwrap().len(), 1);
}
