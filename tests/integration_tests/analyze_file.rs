use serde_json::Value;

use crate::common::{TestEnv, run_ok, stderr};

#[test]
fn test_analyze_file_text() {
    let env = TestEnv::new();
    let log = env.fixture("files.log");

    let stdout = run_ok(env.command().args(["analyze", "file"]).arg(&log));

    assert_eq!(
        stdout,
        "\
4 files accessed during run:
        Size  Path
     unknown  /snap/demo/12/bin/demo
     unknown  /snap/demo/12/etc/demo.conf
     unknown  /snap/demo/12/share/icons/app.png
     unknown  /tmp/.glDNftWu
Total time: 12ms
"
    );
}

#[test]
fn test_analyze_file_parent_dirs_json() {
    let env = TestEnv::new();
    let log = env.fixture("files.log");

    let stdout = run_ok(
        env.command()
            .args(["analyze", "file", "--parent-dirs", "/snap/demo/12/etc", "--json"])
            .arg(&log),
    );
    let report: Value = serde_json::from_str(&stdout).unwrap();

    let files = report["files"].as_array().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0]["path"], "/snap/demo/12/etc/demo.conf");
    assert_eq!(files[0]["size"], "unknown");
    assert!(files[0].get("program").is_none());
    assert_eq!(report["processes"].as_array().unwrap().len(), 2);
}

#[test]
fn test_analyze_file_include_snapd_programs() {
    let env = TestEnv::new();
    let log = env.fixture("files.log");

    let stdout = run_ok(
        env.command()
            .args([
                "analyze",
                "file",
                "--include-snapd-programs",
                "--show-programs",
                "--file-regex",
                "^/snap/demo/current$",
            ])
            .arg(&log),
    );

    assert!(stdout.starts_with("1 files accessed during run:\n"), "{stdout}");
    assert!(stdout.contains("/snap/demo/current"), "{stdout}");
    assert!(stdout.contains("/usr/lib/snapd/snap-confine"), "{stdout}");
}

#[test]
fn test_analyze_file_config_excludes() {
    let env = TestEnv::new();
    env.write_config("exclude_programs = [\"/snap/demo/*/bin/*\"]\n");
    let log = env.fixture("files.log");

    let stdout = run_ok(env.command().args(["analyze", "file", "-j"]).arg(&log));
    let report: Value = serde_json::from_str(&stdout).unwrap();

    let paths: Vec<&str> = report["files"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["path"].as_str().unwrap())
        .collect();
    // The user's list replaces the snapd defaults, so snap-confine's own
    // image shows up
    assert_eq!(paths, ["/snap/demo/current", "/usr/lib/snapd/snap-confine"]);
}

#[test]
fn test_analyze_file_invalid_config() {
    let env = TestEnv::new();
    env.write_config("exclude_program = []\n");
    let log = env.fixture("files.log");

    let output = env.command().args(["analyze", "file"]).arg(&log).output().unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(
        stderr(&output).contains("Failed to parse config file"),
        "{}",
        stderr(&output)
    );
}

#[test]
fn test_analyze_file_bad_program_regex() {
    let env = TestEnv::new();
    let log = env.fixture("files.log");

    let output = env
        .command()
        .args(["analyze", "file", "--program-regex", "snap("])
        .arg(&log)
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(
        stderr(&output).contains("invalid program regex \"snap(\""),
        "{}",
        stderr(&output)
    );
}

#[cfg(unix)]
mod merge {
    use super::*;

    /// Stands in for strace-log-merge: prefixes each fragment's lines with
    /// the pid from its file name, then orders everything by timestamp.
    const FAKE_MERGE: &str = r#"for f in "$1".*; do
  pid="${f##*.}"
  sed "s/^/$pid /" "$f"
done | sort -s -n -k2"#;

    fn write_fragments(env: &TestEnv) -> std::path::PathBuf {
        let log = std::fs::read_to_string(env.fixture("files.log")).unwrap();
        for pid in ["5001", "5002"] {
            let prefix = format!("{pid} ");
            let fragment: String = log
                .lines()
                .filter_map(|line| line.strip_prefix(&prefix))
                .map(|line| format!("{line}\n"))
                .collect();
            env.write_file(&format!("trace.log.{pid}"), &fragment);
        }
        env.path().join("trace.log")
    }

    #[test]
    fn test_analyze_file_merges_fragments() {
        let env = TestEnv::new();
        let tool = env.script("fake-merge", FAKE_MERGE);
        env.write_config(&format!("merge_tool = {:?}\n", tool.to_str().unwrap()));
        let pattern = write_fragments(&env);

        let stdout = run_ok(
            env.command()
                .args(["analyze", "file", "--merge"])
                .arg(&pattern),
        );

        assert!(stdout.starts_with("4 files accessed during run:\n"), "{stdout}");
        assert!(stdout.ends_with("Total time: 12ms\n"), "{stdout}");
        let merged = std::fs::read_to_string(&pattern).unwrap();
        assert!(merged.starts_with("5001 1600000000.000000 execve("), "{merged}");
    }

    #[test]
    fn test_analyze_file_merge_failure() {
        let env = TestEnv::new();
        let tool = env.script("fake-merge", "echo 'no fragments match' >&2\nexit 2");
        env.write_config(&format!("merge_tool = {:?}\n", tool.to_str().unwrap()));

        let output = env
            .command()
            .args(["analyze", "file", "--merge", "trace.log"])
            .output()
            .unwrap();

        assert_eq!(output.status.code(), Some(1));
        let stderr = stderr(&output);
        assert!(stderr.contains("failed to merge trace log fragments"), "{stderr}");
        assert!(stderr.contains("no fragments match"), "{stderr}");
    }
}
