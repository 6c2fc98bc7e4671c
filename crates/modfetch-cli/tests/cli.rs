//! Smoke tests for the `modfetch` binary. None of these reach a real registry.

use std::process::{Command, Output};
use tempfile::TempDir;

fn modfetch(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_modfetch"))
        .args(args)
        .env_remove("MODFETCH_SOURCE")
        .env_remove("MODFETCH_DESTINATION")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to run modfetch")
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn test_help_lists_commands() {
    let output = modfetch(&["--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("plan"));
    assert!(stdout.contains("install"));
    assert!(stdout.contains("--prerelease"));
}

#[test]
fn test_version_command() {
    let output = modfetch(&["version"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("modfetch "));
}

#[test]
fn test_plan_requires_a_spec() {
    let output = modfetch(&["plan"]);
    assert!(!output.status.success());
}

#[test]
fn test_plan_rejects_malformed_requirement() {
    let output = modfetch(&["plan", "Foo>=not-a-version"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("MOD_RANGE_INVALID"));
}

#[test]
fn test_install_requires_destination() {
    let output = modfetch(&["install", "Foo"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("No install destination configured"));
}

#[test]
fn test_invalid_config_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("modfetch.json");
    std::fs::write(&path, r#"{"max_downloads": 0}"#).unwrap();

    let output = modfetch(&["--config", path.to_str().unwrap(), "plan", "Foo"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("max_downloads"));
}

#[test]
fn test_unreachable_registry_fails() {
    let output = modfetch(&[
        "--source",
        "http://127.0.0.1:9/index.json",
        "plan",
        "Foo",
    ]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("MOD_TRANSPORT"));
}
