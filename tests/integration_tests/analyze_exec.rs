use serde_json::Value;

use crate::common::{TestEnv, run_ok, stderr};

#[test]
fn test_analyze_exec_text() {
    let env = TestEnv::new();
    let log = env.fixture("exec.log");

    let stdout = run_ok(env.command().args(["analyze", "exec"]).arg(&log));

    assert_eq!(
        stdout,
        "\
6 exec calls during run:
 Start(us)   Stop(us)      Elapsed  Exec
         0      10000         10ms  /usr/bin/snap
     10000      50000         40ms  /usr/lib/snapd/snap-confine
     25000      45000         20ms  snap-update-ns
     50000      60000         10ms  /usr/lib/snapd/snap-exec
     60000      80000         20ms  /snap/test-snapd-sh/x2/bin/sh
     70000      72500        2.5ms  /bin/true
Total time: 80ms
"
    );
}

#[test]
fn test_analyze_exec_slowest_json() {
    let env = TestEnv::new();
    let log = env.fixture("exec.log");

    let stdout = run_ok(
        env.command()
            .args(["analyze", "exec", "--slowest", "3", "--json"])
            .arg(&log),
    );
    let report: Value = serde_json::from_str(&stdout).unwrap();

    assert_eq!(report["total_time"], 0.08);
    let images: Vec<&str> = report["exe_runtimes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["image"].as_str().unwrap())
        .collect();
    assert_eq!(
        images,
        [
            "/usr/lib/snapd/snap-confine",
            "snap-update-ns",
            "/snap/test-snapd-sh/x2/bin/sh"
        ]
    );
}

#[test]
fn test_analyze_exec_output_file() {
    let env = TestEnv::new();
    let log = env.fixture("exec.log");
    let out = env.write_file("report.txt", "old report\n");

    let stdout = run_ok(
        env.command()
            .args(["analyze", "exec", "-o"])
            .arg(&out)
            .arg(&log),
    );

    assert_eq!(stdout, "");
    let written = std::fs::read_to_string(out).unwrap();
    assert!(written.starts_with("6 exec calls during run:\n"), "{written}");
    assert!(!written.contains("old report"));
}

#[test]
fn test_analyze_exec_bad_first_line() {
    let env = TestEnv::new();
    let log = env.write_file("bad.log", "strace: Process 42 attached\n1 2.0 +++ exited with 0 +++\n");

    let output = env.command().args(["analyze", "exec"]).arg(&log).output().unwrap();

    assert_eq!(output.status.code(), Some(1));
    let stderr = stderr(&output);
    assert!(stderr.contains("cannot analyze"), "{stderr}");
    assert!(stderr.contains("cannot parse start of trace log"), "{stderr}");
    assert!(stderr.contains("strace: Process 42 attached"), "{stderr}");
}

#[test]
fn test_analyze_exec_missing_log() {
    let env = TestEnv::new();

    let output = env
        .command()
        .args(["analyze", "exec", "does-not-exist.log"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(
        stderr(&output).contains("cannot open trace log does-not-exist.log"),
        "{}",
        stderr(&output)
    );
}
