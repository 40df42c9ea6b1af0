use assert_cmd::Command;
use assert_fs::TempDir;
use assert_fs::prelude::*;
use predicates::prelude::*;
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};

fn perfnp_cmd() -> Command {
    let mut cmd = Command::cargo_bin("perfnp").unwrap();
    cmd.env("NO_COLOR", "1");
    cmd.env_remove("RUST_LOG");
    cmd
}

/// Writes `config` as `perfnp.json` into `tmp` and returns its path.
fn write_config(tmp: &TempDir, config: &Value) -> PathBuf {
    let file = tmp.child("perfnp.json");
    file.write_str(&config.to_string()).unwrap();
    file.path().to_path_buf()
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap()
}

/// Experiment whose jobs append their `n` to `counter` and exit with `n % 2`.
#[cfg(unix)]
fn counting_config(counter: &Path) -> Value {
    json!({
        "command": "sh",
        "arguments": [
            "-c",
            format!("echo %n% >> '{}'; exit $((%n% % 2))", counter.display())
        ],
        "parameters": { "n": ["0", "1", "2"] },
        "timeout": 5
    })
}

#[cfg(unix)]
fn counter_lines(counter: &Path) -> Vec<String> {
    fs::read_to_string(counter)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

// ---- run ----

#[cfg(unix)]
#[test]
fn run_prints_csv_and_summary() {
    let tmp = TempDir::new().unwrap();
    let counter = tmp.child("counter");
    let config = write_config(&tmp, &counting_config(counter.path()));

    perfnp_cmd()
        .args(["run", config.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("    Job ID;   Runtime; Exit code; Command"))
        .stdout(predicate::str::contains("         1;         1;         1; sh -c"))
        .stdout(predicate::str::contains("Summary:"))
        .stdout(predicate::str::contains("2/3"));

    assert_eq!(counter_lines(counter.path()), vec!["0", "1", "2"]);
}

#[cfg(unix)]
#[test]
fn run_json_summary() {
    let tmp = TempDir::new().unwrap();
    let counter = tmp.child("counter");
    let config = write_config(&tmp, &counting_config(counter.path()));

    let output = perfnp_cmd()
        .args(["run", config.to_str().unwrap(), "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let summary = stdout_json(&output);
    assert!(summary["run_id"].is_null());
    assert_eq!(summary["timeout"], 5);
    assert_eq!(summary["runs"], 3);
    assert_eq!(summary["successful_runs"], 2);
    assert_eq!(summary["median_all"], 1);
    assert_eq!(summary["median_successful"], 1);
}

#[cfg(unix)]
#[test]
fn csv_written_to_file() {
    let tmp = TempDir::new().unwrap();
    let counter = tmp.child("counter");
    let csv = tmp.child("jobs.csv");
    let config = write_config(&tmp, &counting_config(counter.path()));

    perfnp_cmd()
        .args(["run", config.to_str().unwrap(), "--csv", csv.path().to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Job ID").not())
        .stdout(predicate::str::contains("Summary:"));

    let log = fs::read_to_string(csv.path()).unwrap();
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0], "    Job ID;   Runtime; Exit code; Command");
    assert!(lines[3].starts_with("         2;         1;         0; sh"));
}

#[cfg(unix)]
#[test]
fn csv_path_from_config() {
    let tmp = TempDir::new().unwrap();
    let csv = tmp.child("from-config.csv");
    let config = write_config(
        &tmp,
        &json!({
            "command": "true",
            "arguments": [],
            "timeout": 5,
            "logging": { "job": { "csv": csv.path() } }
        }),
    );

    perfnp_cmd()
        .args(["run", config.to_str().unwrap()])
        .assert()
        .success();

    csv.assert(predicate::str::contains("         0;         1;         0; true"));
}

#[cfg(unix)]
#[test]
fn timed_out_job_is_censored() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(
        &tmp,
        &json!({ "command": "sleep", "arguments": ["5"], "timeout": 1 }),
    );

    let output = perfnp_cmd()
        .args(["run", config.to_str().unwrap(), "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let summary = stdout_json(&output);
    assert_eq!(summary["runs"], 1);
    assert_eq!(summary["successful_runs"], 0);
    assert_eq!(summary["median_all"], 1);
    assert_eq!(summary["median_successful"], 0);
}

#[cfg(unix)]
#[test]
fn toml_config() {
    let tmp = TempDir::new().unwrap();
    let config = tmp.child("perfnp.toml");
    config
        .write_str(
            r#"
command = "sh"
arguments = ["-c", "exit %code%"]
timeout = 5

[parameters]
code = ["0", "3"]
"#,
        )
        .unwrap();

    let output = perfnp_cmd()
        .args(["run", config.path().to_str().unwrap(), "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(stdout_json(&output)["successful_runs"], 1);
}

// ---- ledger and resume ----

#[cfg(unix)]
#[test]
fn resume_skips_finished_jobs() {
    let tmp = TempDir::new().unwrap();
    let counter = tmp.child("counter");
    let db = tmp.child("ledger.sqlite");
    let config = write_config(&tmp, &counting_config(counter.path()));

    let first = perfnp_cmd()
        .args(["run", config.to_str().unwrap(), "--json"])
        .args(["--database", db.path().to_str().unwrap()])
        .output()
        .unwrap();
    assert!(first.status.success());
    let first = stdout_json(&first);

    let second = perfnp_cmd()
        .args(["run", config.to_str().unwrap(), "--json", "--resume"])
        .args(["--database", db.path().to_str().unwrap()])
        .output()
        .unwrap();
    assert!(second.status.success());
    let second = stdout_json(&second);

    assert_eq!(counter_lines(counter.path()), vec!["0", "1", "2"]);
    assert_eq!(second["run_id"], first["run_id"]);
    assert_eq!(second["runs"], 3);
    assert_eq!(second["successful_runs"], 2);
}

#[cfg(unix)]
#[test]
fn resume_runs_only_missing_jobs() {
    use perfnp::ledger::Ledger;
    use perfnp::types::{ExecResult, Job};

    let tmp = TempDir::new().unwrap();
    let counter = tmp.child("counter");
    let db = tmp.child("ledger.sqlite");
    let config = write_config(&tmp, &counting_config(counter.path()));

    let run_id = {
        let mut ledger = Ledger::open(db.path()).unwrap();
        let run_id = ledger.start_run().unwrap();
        let ok = ExecResult::new(0, 1).unwrap();
        ledger
            .record_job(run_id, &Job::new(0, "sh", vec![]), 5, &ok)
            .unwrap();
        ledger
            .record_job(run_id, &Job::new(2, "sh", vec![]), 5, &ok)
            .unwrap();
        run_id
    };

    let output = perfnp_cmd()
        .args(["run", config.to_str().unwrap(), "--json", "--resume"])
        .args(["--database", db.path().to_str().unwrap()])
        .output()
        .unwrap();
    assert!(output.status.success());

    assert_eq!(counter_lines(counter.path()), vec!["1"]);
    let summary = stdout_json(&output);
    assert_eq!(summary["run_id"], run_id);
    assert_eq!(summary["runs"], 3);
    assert_eq!(summary["successful_runs"], 2);
}

#[cfg(unix)]
#[test]
fn without_resume_every_invocation_is_a_new_run() {
    let tmp = TempDir::new().unwrap();
    let db = tmp.child("ledger.sqlite");
    let config = write_config(
        &tmp,
        &json!({ "command": "true", "arguments": [], "timeout": 5 }),
    );

    let run = || {
        let output = perfnp_cmd()
            .args(["run", config.to_str().unwrap(), "--json"])
            .args(["--database", db.path().to_str().unwrap()])
            .output()
            .unwrap();
        assert!(output.status.success());
        stdout_json(&output)["run_id"].as_i64().unwrap()
    };

    let first = run();
    let second = run();
    assert_ne!(first, second);
}

#[cfg(unix)]
#[test]
fn database_from_config_created_with_parents() {
    let tmp = TempDir::new().unwrap();
    let db = tmp.child("nested").child("dir").child("ledger.sqlite");
    let config = write_config(
        &tmp,
        &json!({
            "command": "true",
            "arguments": [],
            "timeout": 5,
            "database": db.path()
        }),
    );

    perfnp_cmd()
        .args(["run", config.to_str().unwrap(), "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"run_id\": 1"));

    db.assert(predicate::path::exists());
}

// ---- history ----

#[cfg(unix)]
#[test]
fn history_lists_recorded_runs() {
    let tmp = TempDir::new().unwrap();
    let counter = tmp.child("counter");
    let db = tmp.child("ledger.sqlite");
    let config = write_config(&tmp, &counting_config(counter.path()));

    perfnp_cmd()
        .args(["run", config.to_str().unwrap(), "--json"])
        .args(["--database", db.path().to_str().unwrap()])
        .assert()
        .success();

    let output = perfnp_cmd()
        .args(["history", "--json", "--database", db.path().to_str().unwrap()])
        .output()
        .unwrap();
    assert!(output.status.success());

    let runs = stdout_json(&output);
    let runs = runs.as_array().unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0]["jobs"], 3);
    assert_eq!(runs[0]["summary"]["successful_runs"], 2);
    assert_eq!(runs[0]["summary"]["timeout"], 5);

    perfnp_cmd()
        .args(["history", "--database", db.path().to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Recorded runs:"))
        .stdout(predicate::str::contains("3 jobs"));
}

#[test]
fn history_without_ledger_fails() {
    let tmp = TempDir::new().unwrap();
    let db = tmp.child("missing.sqlite");

    perfnp_cmd()
        .args(["history", "--database", db.path().to_str().unwrap()])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("No ledger found"));
}

// ---- jobs ----

#[test]
fn jobs_lists_expansion_without_running() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(
        &tmp,
        &json!({
            "command": "perfnp-test-no-such-binary",
            "arguments": ["%a%", "%b%"],
            "parameters": { "a": ["x", "y"], "b": ["1", "2"] },
            "timeout": 5
        }),
    );

    let output = perfnp_cmd()
        .args(["jobs", config.to_str().unwrap()])
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].ends_with("perfnp-test-no-such-binary x 1"));
    assert!(lines[1].ends_with("perfnp-test-no-such-binary x 2"));
    assert!(lines[2].ends_with("perfnp-test-no-such-binary y 1"));
    assert!(lines[3].ends_with("perfnp-test-no-such-binary y 2"));
}

// ---- errors ----

#[test]
fn missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.child("nope.json");

    perfnp_cmd()
        .args(["run", missing.path().to_str().unwrap()])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Failed to read config file"));
}

#[test]
fn empty_parameter_map_rejected() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(
        &tmp,
        &json!({ "command": "true", "arguments": [], "parameters": {}, "timeout": 5 }),
    );

    perfnp_cmd()
        .args(["run", config.to_str().unwrap()])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Invalid configuration"));
}

#[test]
fn malformed_config_rejected() {
    let tmp = TempDir::new().unwrap();
    let config = tmp.child("perfnp.json");
    config.write_str("{ \"command\": ").unwrap();

    perfnp_cmd()
        .args(["run", config.path().to_str().unwrap()])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Failed to parse config file"));
}

#[test]
fn missing_binary_is_fatal() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(
        &tmp,
        &json!({ "command": "perfnp-test-no-such-binary", "arguments": [], "timeout": 5 }),
    );

    perfnp_cmd()
        .args(["run", config.to_str().unwrap()])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Failed to start 'perfnp-test-no-such-binary'"));
}

#[test]
fn no_subcommand_shows_usage() {
    perfnp_cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}
