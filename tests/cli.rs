#![cfg(unix)]

use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

#[test]
fn run_loads_default_env_file() {
    let dir = TempDir::new().expect("temp dir");
    write_file(&dir.path().join(".env"), "ENVFILE_CLI_DEFAULT=from_default\n");

    let output = run_envfile(
        dir.path(),
        &["run", "--", "printenv", "ENVFILE_CLI_DEFAULT"],
        None,
    );

    assert_success(&output);
    assert_eq!(stdout_trimmed(&output), "from_default");
}

#[test]
fn run_passes_multiline_and_escaped_values() {
    let dir = TempDir::new().expect("temp dir");
    write_file(
        &dir.path().join(".env"),
        "ENVFILE_CLI_MULTI=\"line1\nsad\\\"wow\\\"bak\"\n",
    );

    let output = run_envfile(
        dir.path(),
        &["run", "printenv", "ENVFILE_CLI_MULTI"],
        None,
    );

    assert_success(&output);
    assert_eq!(stdout_trimmed(&output), "line1\nsad\"wow\"bak");
}

#[test]
fn run_uses_last_file_precedence_for_selected_files() {
    let dir = TempDir::new().expect("temp dir");
    write_file(&dir.path().join(".env.base"), "ENVFILE_CLI_PRECEDENCE=base\n");
    write_file(&dir.path().join(".env.local"), "ENVFILE_CLI_PRECEDENCE=local\n");

    let output = run_envfile(
        dir.path(),
        &[
            "run",
            "-f",
            ".env.base,.env.local",
            "--",
            "printenv",
            "ENVFILE_CLI_PRECEDENCE",
        ],
        None,
    );

    assert_success(&output);
    assert_eq!(stdout_trimmed(&output), "local");
}

#[test]
fn run_override_flag_controls_existing_environment_precedence() {
    let dir = TempDir::new().expect("temp dir");
    write_file(&dir.path().join(".env"), "ENVFILE_CLI_OVERRIDE=from_file\n");

    let without_override = run_envfile(
        dir.path(),
        &["run", "--", "printenv", "ENVFILE_CLI_OVERRIDE"],
        Some(("ENVFILE_CLI_OVERRIDE", "from_env")),
    );
    assert_success(&without_override);
    assert_eq!(stdout_trimmed(&without_override), "from_env");

    let with_override = run_envfile(
        dir.path(),
        &["run", "-o", "--", "printenv", "ENVFILE_CLI_OVERRIDE"],
        Some(("ENVFILE_CLI_OVERRIDE", "from_env")),
    );
    assert_success(&with_override);
    assert_eq!(stdout_trimmed(&with_override), "from_file");
}

#[test]
fn run_ignore_missing_skips_missing_selected_files() {
    let dir = TempDir::new().expect("temp dir");
    write_file(&dir.path().join(".env.real"), "ENVFILE_CLI_IGNORE=loaded\n");

    let output = run_envfile(
        dir.path(),
        &[
            "run",
            "--ignore-missing",
            "-f",
            "missing.env,.env.real",
            "--",
            "printenv",
            "ENVFILE_CLI_IGNORE",
        ],
        None,
    );

    assert_success(&output);
    assert_eq!(stdout_trimmed(&output), "loaded");
}

#[test]
fn run_fails_when_selected_file_is_missing() {
    let dir = TempDir::new().expect("temp dir");

    let output = run_envfile(
        dir.path(),
        &["run", "-f", "missing.env", "--", "printenv", "HOME"],
        None,
    );

    assert_failure(&output);
    assert!(stderr(&output).contains("failed to load missing.env"));
}

#[test]
fn run_fails_on_malformed_entry_without_starting_command() {
    let dir = TempDir::new().expect("temp dir");
    write_file(&dir.path().join(".env"), "GOOD=1\njusttext\n");

    let output = run_envfile(dir.path(), &["run", "--", "echo", "started"], None);

    assert_failure(&output);
    assert!(stdout_trimmed(&output).is_empty());
    assert!(stderr(&output).contains("line 2"));
}

#[test]
fn run_fails_when_required_key_is_missing() {
    let dir = TempDir::new().expect("temp dir");
    write_file(&dir.path().join(".env"), "PRESENT=1\n");

    let output = run_envfile(
        dir.path(),
        &["run", "-r", "PRESENT,ENVFILE_CLI_ABSENT", "--", "true"],
        None,
    );

    assert_failure(&output);
    assert!(stderr(&output).contains("ENVFILE_CLI_ABSENT"));
}

#[test]
fn run_dir_resolves_relative_files() {
    let dir = TempDir::new().expect("temp dir");
    let conf = dir.path().join("conf");
    std::fs::create_dir_all(&conf).expect("create conf dir");
    write_file(&conf.join(".env"), "ENVFILE_CLI_DIR=from_conf\n");

    let output = run_envfile(
        dir.path(),
        &["run", "-d", "conf", "--", "printenv", "ENVFILE_CLI_DIR"],
        None,
    );

    assert_success(&output);
    assert_eq!(stdout_trimmed(&output), "from_conf");
}

#[test]
fn print_outputs_json_in_file_order() {
    let dir = TempDir::new().expect("temp dir");
    write_file(
        &dir.path().join(".env"),
        "Z=\"a:\" \"b\"\nA=${Z}/c\nML=\"x\ny\"\n",
    );

    let output = run_envfile(
        dir.path(),
        &["print", "--concat-quotes", "--expand"],
        None,
    );

    assert_success(&output);
    let printed: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(
        printed,
        serde_json::json!({ "Z": "a:b", "A": "a:b/c", "ML": "x\ny" })
    );
    let text = String::from_utf8_lossy(&output.stdout);
    let z = text.find("\"Z\"").expect("Z printed");
    let a = text.find("\"A\"").expect("A printed");
    assert!(z < a, "keys should keep file order: {text}");
}

#[test]
fn run_config_loads_files_and_executes_configured_command() {
    let dir = TempDir::new().expect("temp dir");
    let envs = dir.path().join("envs");
    std::fs::create_dir_all(&envs).expect("create envs dir");
    write_file(&envs.join(".env.base"), "ENVFILE_CLI_CONFIG=base\n");
    write_file(&envs.join(".env.test"), "ENVFILE_CLI_CONFIG=test\n");
    write_file(
        &dir.path().join("env.config.json"),
        r#"{
            "test": {
                "files": [".env.base", ".env.test"],
                "dir": "envs",
                "execute": "printenv ENVFILE_CLI_CONFIG"
            }
        }"#,
    );

    let output = run_envfile(dir.path(), &["run", "-c", "test"], None);

    assert_success(&output);
    assert_eq!(stdout_trimmed(&output), "test");
}

#[test]
fn print_config_reads_file_from_config_dir() {
    let dir = TempDir::new().expect("temp dir");
    let conf = dir.path().join("conf");
    std::fs::create_dir_all(&conf).expect("create conf dir");
    write_file(&dir.path().join(".env.dev"), "FROM_CONFIG=yes\n");
    write_file(&conf.join("env.config.json"), r#"{ "dev": { "files": [".env.dev"] } }"#);

    let output = run_envfile(
        dir.path(),
        &["print", "--config", "dev", "--config-dir", "conf"],
        None,
    );

    assert_success(&output);
    let printed: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(printed, serde_json::json!({ "FROM_CONFIG": "yes" }));
}

#[test]
fn config_fails_when_file_is_missing() {
    let dir = TempDir::new().expect("temp dir");

    let output = run_envfile(dir.path(), &["print", "-c", "dev"], None);

    assert_failure(&output);
    assert!(stderr(&output).contains("env.config.json does not exist"));
}

#[test]
fn config_fails_for_undefined_environment() {
    let dir = TempDir::new().expect("temp dir");
    write_file(
        &dir.path().join("env.config.json"),
        r#"{ "dev": { "files": [".env"] } }"#,
    );

    let output = run_envfile(dir.path(), &["run", "-c", "prod"], None);

    assert_failure(&output);
    assert!(stderr(&output).contains("environment `prod` is not defined"));
}

#[test]
fn run_config_without_execute_requires_a_command() {
    let dir = TempDir::new().expect("temp dir");
    write_file(&dir.path().join(".env"), "A=1\n");
    write_file(
        &dir.path().join("env.config.json"),
        r#"{ "dev": { "files": [".env"] } }"#,
    );

    let output = run_envfile(dir.path(), &["run", "-c", "dev"], None);

    assert_failure(&output);
    assert!(stderr(&output).contains("missing command"));
}

fn run_envfile(dir: &Path, args: &[&str], env_pair: Option<(&str, &str)>) -> Output {
    let mut command = Command::new(env!("CARGO_BIN_EXE_envfile"));
    command.current_dir(dir).args(args).env_remove("RUST_LOG");
    if let Some((key, value)) = env_pair {
        command.env(key, value);
    }
    command.output().expect("failed to run envfile binary")
}

fn stdout_trimmed(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout)
        .trim_end()
        .to_string()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "expected success: stdout={:?}, stderr={:?}",
        String::from_utf8_lossy(&output.stdout),
        stderr(output)
    );
}

fn assert_failure(output: &Output) {
    assert!(
        !output.status.success(),
        "expected failure: stdout={:?}, stderr={:?}",
        String::from_utf8_lossy(&output.stdout),
        stderr(output)
    );
}

fn write_file(path: &Path, content: &str) {
    std::fs::write(path, content).expect("failed to write fixture file");
}
