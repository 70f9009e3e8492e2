//! Integration tests for the `agentflow` binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// A project with a mock `dev` agent, a failing `broken` agent and an
/// approval keyword.
fn create_project() -> TempDir {
    let temp = TempDir::new().unwrap();
    let af_dir = temp.path().join(".agentflow");
    fs::create_dir_all(af_dir.join("agents")).unwrap();

    fs::write(
        af_dir.join("config.toml"),
        "approval_keywords = [\"deploy\"]\ndefault_timeout_seconds = 30\n",
    )
    .unwrap();
    fs::write(
        af_dir.join("agents/dev.md"),
        "---\nname: dev\ndescription: Mock developer\nmodel: mock\nprovider: mock\ntools: [echo]\n---\n\nBe brief.",
    )
    .unwrap();
    fs::write(
        af_dir.join("agents/broken.md"),
        "---\nname: broken\nmodel: mock-fail\nprovider: mock\n---\n\nAlways fails.",
    )
    .unwrap();
    temp
}

fn agentflow(root: &Path) -> Command {
    let mut cmd = Command::cargo_bin("agentflow").unwrap();
    cmd.arg("--root").arg(root).env("RUST_LOG", "warn");
    cmd
}

#[test]
fn test_help_lists_commands() {
    Command::cargo_bin("agentflow")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("approve"))
        .stdout(predicate::str::contains("tools"));
}

#[test]
fn test_run_completes() {
    let project = create_project();
    agentflow(project.path())
        .args(["run", "--role", "dev", "--task", "write notes", "--task-id", "t-cli"])
        .assert()
        .success()
        .stdout(predicate::str::contains("COMPLETED"))
        .stdout(predicate::str::contains("\"task_id\": \"t-cli\""));

    assert!(project.path().join(".agentflow/state/archive/t-cli.json").exists());

    agentflow(project.path())
        .args(["status", "t-cli"])
        .assert()
        .success()
        .stdout(predicate::str::contains("COMPLETED"));
}

#[test]
fn test_failed_workflow_exits_nonzero() {
    let project = create_project();
    agentflow(project.path())
        .args(["run", "--role", "broken", "--task", "anything", "--task-id", "t-broken"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("FAILED"))
        .stderr(predicate::str::contains("t-broken"));
}

#[test]
fn test_approval_across_invocations() {
    let project = create_project();
    agentflow(project.path())
        .args(["run", "--role", "dev", "--task", "deploy the site", "--task-id", "t-gate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("AWAITING_APPROVAL"))
        .stdout(predicate::str::contains("agentflow approve t-gate"));

    agentflow(project.path())
        .args(["approve", "t-gate", "--comment", "looks good", "--by", "alice"])
        .assert()
        .success()
        .stdout(predicate::str::contains("COMPLETED"))
        .stdout(predicate::str::contains("looks good"))
        .stdout(predicate::str::contains("\"actor\": \"alice\""));

    // Deciding twice is an invalid transition.
    agentflow(project.path())
        .args(["reject", "t-gate"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("COMPLETED"));
}

#[test]
fn test_cancel_waiting_workflow() {
    let project = create_project();
    agentflow(project.path())
        .args(["run", "--role", "dev", "--task", "deploy later", "--task-id", "t-stop"])
        .assert()
        .success();

    agentflow(project.path())
        .args(["cancel", "t-stop", "--by", "ops", "--reason", "change freeze"])
        .assert()
        .success()
        .stdout(predicate::str::contains("CANCELLED"))
        .stdout(predicate::str::contains("\"actor\": \"ops\""))
        .stdout(predicate::str::contains("change freeze"));
}

#[test]
fn test_expired_gate_is_rejected_on_next_invocation() {
    let project = create_project();
    fs::write(
        project.path().join(".agentflow/config.toml"),
        "approval_keywords = [\"deploy\"]\napproval_timeout_seconds = 1\n",
    )
    .unwrap();
    agentflow(project.path())
        .args(["run", "--role", "dev", "--task", "deploy soon", "--task-id", "t-lapse"])
        .assert()
        .success()
        .stdout(predicate::str::contains("AWAITING_APPROVAL"));

    std::thread::sleep(std::time::Duration::from_millis(1200));
    agentflow(project.path())
        .args(["status", "t-lapse"])
        .assert()
        .success()
        .stdout(predicate::str::contains("CANCELLED"))
        .stdout(predicate::str::contains("approval timeout"));
}

#[test]
fn test_no_wait_then_status_wait() {
    let project = create_project();
    agentflow(project.path())
        .args(["run", "--role", "dev", "--task", "small job", "--task-id", "t-bg", "--no-wait"])
        .assert()
        .success()
        .stdout(predicate::str::diff("t-bg\n"));

    agentflow(project.path())
        .args(["status", "t-bg", "--wait"])
        .assert()
        .success()
        .stdout(predicate::str::contains("COMPLETED"));
}

#[test]
fn test_unknown_task_fails() {
    let project = create_project();
    agentflow(project.path())
        .args(["status", "missing"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing"));
}

#[test]
fn test_duplicate_task_id_rejected() {
    let project = create_project();
    agentflow(project.path())
        .args(["run", "--role", "dev", "--task", "once", "--task-id", "t-dup"])
        .assert()
        .success();
    agentflow(project.path())
        .args(["run", "--role", "dev", "--task", "twice", "--task-id", "t-dup"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("t-dup"));
}

#[test]
fn test_agents_and_tools() {
    let project = create_project();
    agentflow(project.path())
        .arg("agents")
        .assert()
        .success()
        .stdout(predicate::str::contains("dev"))
        .stdout(predicate::str::contains("mock/mock-fail"))
        .stdout(predicate::str::contains("ready"));

    agentflow(project.path())
        .arg("tools")
        .assert()
        .success()
        .stdout(predicate::str::contains("echo"))
        .stdout(predicate::str::contains("read_file"))
        .stdout(predicate::str::contains("list_files"));
}

#[test]
fn test_empty_project_has_no_agents() {
    let empty = TempDir::new().unwrap();
    agentflow(empty.path())
        .arg("agents")
        .assert()
        .success()
        .stdout(predicate::str::contains("No agents configured"));
}
