use std::fs;
use std::path::PathBuf;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::{TempDir, tempdir};

fn write_script(dir: &TempDir, contents: &str) -> PathBuf {
    let path = dir.path().join("script.txt");
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_run_prints_final_response() {
    let dir = tempdir().unwrap();
    let script = write_script(&dir, "All systems nominal.\n");

    cargo_bin_cmd!("weft")
        .env("WEFT_HOME", dir.path())
        .args(["run", "--session", "agentA", "--query", "status?", "--script"])
        .arg(&script)
        .assert()
        .success()
        .stdout("All systems nominal.\n");
}

#[test]
fn test_run_resolves_tool_call() {
    let dir = tempdir().unwrap();
    let script = write_script(
        &dir,
        "Let me echo that.\n<tool_call>\n{\"name\": \"echo\", \"arguments\": {\"text\": \"ping\"}}\n</tool_call>\n---\nThe echo said ping.\n",
    );

    cargo_bin_cmd!("weft")
        .env("WEFT_HOME", dir.path())
        .args(["run", "--query", "echo ping", "--events", "--script"])
        .arg(&script)
        .assert()
        .success()
        .stdout("The echo said ping.\n")
        .stderr(predicate::str::contains(r#""type":"tool_completed""#))
        .stderr(predicate::str::contains(r#""type":"task_completed""#));
}

#[test]
fn test_run_reports_malformed_tool_call() {
    let dir = tempdir().unwrap();
    let script = write_script(&dir, "<tool_call>{oops}</tool_call>\n");

    cargo_bin_cmd!("weft")
        .env("WEFT_HOME", dir.path())
        .args(["run", "--query", "q", "--script"])
        .arg(&script)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Malformed tool call"));
}

#[test]
fn test_run_reports_exhausted_script() {
    let dir = tempdir().unwrap();
    let script = write_script(
        &dir,
        "<tool_call>{\"name\": \"clock\", \"arguments\": {}}</tool_call>\n",
    );

    cargo_bin_cmd!("weft")
        .env("WEFT_HOME", dir.path())
        .args(["run", "--query", "time?", "--script"])
        .arg(&script)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Script exhausted"));
}

#[test]
fn test_run_missing_script_fails() {
    let dir = tempdir().unwrap();

    cargo_bin_cmd!("weft")
        .env("WEFT_HOME", dir.path())
        .args(["run", "--query", "q", "--script"])
        .arg(dir.path().join("missing.txt"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("read script"));
}
