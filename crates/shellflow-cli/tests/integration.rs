#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn shellflow(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("shellflow").unwrap();
    cmd.current_dir(dir.path())
        .env("SHELLFLOW_HOME", dir.path().join("home"))
        .env("SHELL", "/bin/sh")
        .env_remove("RUST_LOG");
    cmd
}

fn write_workflow(dir: &TempDir, file: &str, yaml: &str) {
    std::fs::write(dir.path().join(file), yaml).unwrap();
}

fn add_workflow(dir: &TempDir, file: &str, yaml: &str) {
    write_workflow(dir, file, yaml);
    shellflow(dir)
        .args(["workflow", "add", file])
        .assert()
        .success();
}

const GREET: &str = r#"
name: Greet
steps:
  - command: echo hello-{{NAME}}
    description: say hello
"#;

// ---------------------------------------------------------------------------
// shellflow workflow
// ---------------------------------------------------------------------------

#[test]
fn workflow_add_and_list() {
    let dir = TempDir::new().unwrap();
    add_workflow(&dir, "greet.yaml", GREET);

    shellflow(&dir)
        .args(["workflow", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("greet"))
        .stdout(predicate::str::contains("Greet"));
}

#[test]
fn workflow_list_json() {
    let dir = TempDir::new().unwrap();
    add_workflow(&dir, "greet.yaml", GREET);

    let output = shellflow(&dir)
        .args(["--json", "workflow", "list"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value[0]["id"], "greet");
    assert_eq!(value[0]["metadata"]["steps"][0]["command"], "echo hello-{{NAME}}");
}

#[test]
fn workflow_add_twice_replaces() {
    let dir = TempDir::new().unwrap();
    add_workflow(&dir, "greet.yaml", GREET);
    add_workflow(&dir, "greet.yaml", "name: Greet Again\n");

    shellflow(&dir)
        .args(["workflow", "show", "greet"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Greet Again"));
}

#[test]
fn workflow_add_rejects_invalid_id() {
    let dir = TempDir::new().unwrap();
    write_workflow(&dir, "bad.yaml", "id: Bad Id\nname: Bad\n");

    shellflow(&dir)
        .args(["workflow", "add", "bad.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid workflow id"));
}

#[test]
fn workflow_delete_then_show_fails() {
    let dir = TempDir::new().unwrap();
    add_workflow(&dir, "greet.yaml", GREET);

    shellflow(&dir)
        .args(["workflow", "delete", "greet"])
        .assert()
        .success();
    shellflow(&dir)
        .args(["workflow", "show", "greet"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("workflow not found: greet"));
}

// ---------------------------------------------------------------------------
// shellflow vault
// ---------------------------------------------------------------------------

#[test]
fn vault_get_without_scope_prefers_project_over_global() {
    let dir = TempDir::new().unwrap();
    shellflow(&dir)
        .args(["vault", "set", "API_KEY", "g", "--scope", "global"])
        .assert()
        .success();
    shellflow(&dir)
        .args(["vault", "set", "API_KEY", "p", "--scope", "project"])
        .assert()
        .success();

    shellflow(&dir)
        .args(["vault", "get", "API_KEY"])
        .assert()
        .success()
        .stdout("p\n");
}

#[test]
fn vault_workflow_scope_needs_workflow_id() {
    let dir = TempDir::new().unwrap();
    shellflow(&dir)
        .args(["vault", "set", "TOKEN", "x", "--scope", "workflow"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("workflow id"));
}

#[test]
fn vault_set_updates_in_place() {
    let dir = TempDir::new().unwrap();
    for value in ["one", "two"] {
        shellflow(&dir)
            .args(["vault", "set", "K", value, "--workflow", "wf"])
            .assert()
            .success();
    }
    let output = shellflow(&dir)
        .args(["--json", "vault", "list", "--workflow", "wf"])
        .output()
        .unwrap();
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let entries = value.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["value"], "two");
    assert_eq!(entries[0]["scope"], "workflow");
}

#[test]
fn vault_delete_missing_fails() {
    let dir = TempDir::new().unwrap();
    shellflow(&dir)
        .args(["vault", "delete", "NOPE"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

// ---------------------------------------------------------------------------
// shellflow run
// ---------------------------------------------------------------------------

#[test]
fn run_substitutes_override_and_succeeds() {
    let dir = TempDir::new().unwrap();
    add_workflow(&dir, "greet.yaml", GREET);

    shellflow(&dir)
        .args(["run", "greet", "--var", "NAME=world"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hello-world"))
        .stdout(predicate::str::contains("[ SUMMARY ]"))
        .stdout(predicate::str::contains("Scripts: 1/1 completed"));
}

#[test]
fn run_reads_env_file_when_vault_is_off() {
    let dir = TempDir::new().unwrap();
    add_workflow(&dir, "greet.yaml", GREET);
    std::fs::write(dir.path().join(".env"), "NAME=\"from-env\"\n").unwrap();

    shellflow(&dir)
        .args(["run", "greet"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hello-from-env"));
}

#[test]
fn run_with_vault_resolves_scoped_variables() {
    let dir = TempDir::new().unwrap();
    add_workflow(
        &dir,
        "greet.yaml",
        "name: Greet\nuse_vault: true\nsteps:\n  - command: echo hello-{{NAME}}\n",
    );
    shellflow(&dir)
        .args(["vault", "set", "NAME", "global-name"])
        .assert()
        .success();
    shellflow(&dir)
        .args(["vault", "set", "NAME", "scoped-name", "--workflow", "greet"])
        .assert()
        .success();

    shellflow(&dir)
        .args(["run", "greet"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hello-scoped-name"));
}

#[test]
fn run_with_unresolved_variable_fails_before_running() {
    let dir = TempDir::new().unwrap();
    add_workflow(
        &dir,
        "clean.yaml",
        "name: Clean\nuse_vault: true\nsteps:\n  - command: touch {{TARGET}}\n",
    );

    shellflow(&dir)
        .args(["run", "clean"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing required variables: TARGET"));
}

#[test]
fn run_failing_pre_check_skips_steps() {
    let dir = TempDir::new().unwrap();
    add_workflow(
        &dir,
        "guarded.yaml",
        r#"
name: Guarded
pre_checks:
  - command: test -f missing.txt
    description: needs missing.txt
steps:
  - command: touch should-not-exist
"#,
    );

    shellflow(&dir)
        .args(["run", "guarded"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("Prechecks: 0 passed, 1 failed"))
        .stderr(predicate::str::contains("pre-check 1 failed"));
    assert!(!dir.path().join("should-not-exist").exists());
}

#[test]
fn run_action_instead_of_steps() {
    let dir = TempDir::new().unwrap();
    add_workflow(
        &dir,
        "ops.yaml",
        r#"
name: Ops
steps:
  - command: touch step-ran
actions:
  mark:
    command: touch action-ran
"#,
    );

    shellflow(&dir)
        .args(["run", "ops", "--action", "mark"])
        .assert()
        .success();
    assert!(dir.path().join("action-ran").exists());
    assert!(!dir.path().join("step-ran").exists());
}

#[test]
fn run_unknown_workflow_fails() {
    let dir = TempDir::new().unwrap();
    shellflow(&dir)
        .args(["run", "ghost"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot load workflow 'ghost'"));
}

// ---------------------------------------------------------------------------
// shellflow history
// ---------------------------------------------------------------------------

#[test]
fn history_records_runs_newest_first() {
    let dir = TempDir::new().unwrap();
    add_workflow(&dir, "greet.yaml", GREET);
    shellflow(&dir)
        .args(["run", "greet", "--var", "NAME=a"])
        .assert()
        .success();
    shellflow(&dir)
        .args(["run", "greet", "--var", "NAME=b", "--action", "missing"])
        .assert()
        .failure();
    shellflow(&dir)
        .args(["run", "greet", "--var", "NAME=c"])
        .assert()
        .success();

    let output = shellflow(&dir)
        .args(["--json", "history", "--limit", "5"])
        .output()
        .unwrap();
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let runs = value.as_array().unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0]["id"], 2);
    assert_eq!(runs[0]["status"], "success");
    assert_eq!(runs[1]["id"], 1);
}

#[test]
fn history_empty() {
    let dir = TempDir::new().unwrap();
    shellflow(&dir)
        .arg("history")
        .assert()
        .success()
        .stdout(predicate::str::contains("no runs recorded"));
}
