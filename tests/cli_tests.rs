//! Command-line behaviour of the `verdict` binary.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;

fn verdict_cmd(dir: &tempfile::TempDir) -> Command {
    let mut cmd = Command::cargo_bin("verdict").expect("binary built");
    cmd.current_dir(dir.path())
        .env_remove("OPENAI_API_KEY")
        .env_remove("LLMFOUNDRY_TOKEN")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn list_shows_builtin_assertions() {
    let dir = tempfile::tempdir().expect("tempdir");
    verdict_cmd(&dir)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("program_sqrt"))
        .stdout(predicate::str::contains("aws_ipv6"));
}

#[test]
fn grade_reads_answer_from_stdin_and_prints_json() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = verdict_cmd(&dir)
        .args(["grade", "--json", "docker_cuda"])
        .write_stdin("Install nvidia-container-toolkit and restart docker.")
        .output()
        .expect("run");

    assert!(output.status.success());
    let value: Value = serde_json::from_slice(&output.stdout).expect("json stdout");
    assert_eq!(value["pass"], Value::Bool(true));
    assert_eq!(value["score"], 1.0);
}

#[test]
fn failing_verdict_still_exits_zero() {
    let dir = tempfile::tempdir().expect("tempdir");
    let answer = dir.path().join("answer.txt");
    std::fs::write(&answer, "Reinstall everything.").expect("write answer");

    verdict_cmd(&dir)
        .args(["grade", "--answer"])
        .arg(&answer)
        .arg("docker_cuda")
        .assert()
        .success()
        .stdout(predicate::str::contains("Passed: 0/1"));
}

#[test]
fn suite_file_is_graded() {
    let dir = tempfile::tempdir().expect("tempdir");
    let suite = dir.path().join("suite.json");
    std::fs::write(
        &suite,
        r#"{"assertions": [
            {"name": "says_hi", "check": {"kind": "text", "extract": {"raw": true},
             "expect": {"mode": "exact", "expected": "hi"}}},
            {"name": "says_bye", "check": {"kind": "text", "extract": {"raw": true},
             "expect": {"mode": "exact", "expected": "bye"}}}
        ]}"#,
    )
    .expect("write suite");

    let output = verdict_cmd(&dir)
        .args(["grade", "--json"])
        .arg(&suite)
        .write_stdin("hi\n")
        .output()
        .expect("run");

    assert!(output.status.success());
    let rows: Value = serde_json::from_slice(&output.stdout).expect("json stdout");
    assert_eq!(rows[0]["assertion"], "says_hi");
    assert_eq!(rows[0]["pass"], Value::Bool(true));
    assert_eq!(rows[1]["pass"], Value::Bool(false));
}

#[test]
fn unknown_target_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    verdict_cmd(&dir)
        .args(["grade", "no_such_assertion"])
        .write_stdin("anything")
        .assert()
        .failure()
        .stderr(predicate::str::contains("No built-in assertion"));
}

#[test]
fn judge_assertion_without_credentials_reports_unavailable() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = verdict_cmd(&dir)
        .args(["grade", "--json", "aws_ipv6"])
        .write_stdin("It allows ::/0 on port 22.")
        .output()
        .expect("run");

    assert!(output.status.success());
    let value: Value = serde_json::from_slice(&output.stdout).expect("json stdout");
    assert_eq!(value["pass"], Value::Bool(false));
    assert!(value["reason"].as_str().unwrap_or_default().starts_with("Judge unavailable"));
}
