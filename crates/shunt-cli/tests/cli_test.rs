//! Integration tests for the shunt binary

use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

/// Run `shunt` with an isolated config home so no user config leaks in.
fn shunt(home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_shunt"))
        .args(args)
        .env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join(".config"))
        .env_remove("SHUNT_SYSTEM_DIR")
        .env_remove("SHUNT_STUB_POLICY")
        .env_remove("SHUNT_LOG_LEVEL")
        .env_remove("SHUNT_LOG_FILE")
        .env_remove("SHUNT_PAUSE")
        .output()
        .expect("Failed to execute shunt")
}

#[test]
fn test_config_default_outputs_toml() {
    let home = TempDir::new().unwrap();
    let output = shunt(home.path(), &["config", "default"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("[stub]"));
    assert!(stdout.contains("[attach]"));
    assert!(stdout.contains("policy = \"pause\""));
}

#[cfg(target_os = "linux")]
#[test]
fn test_config_show_reads_global_file() {
    let home = TempDir::new().unwrap();
    let dir = home.path().join(".config").join("shunt");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("config.toml"), "[stub]\npolicy = \"exit\"\n").unwrap();

    let output = shunt(home.path(), &["config", "show"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout.contains("policy = \"exit\""));
}

#[test]
fn test_resolve_missing_module_reports_no_module() {
    let home = TempDir::new().unwrap();
    let sysdir = TempDir::new().unwrap();
    let output = shunt(
        home.path(),
        &[
            "--system-dir",
            sysdir.path().to_str().unwrap(),
            "resolve",
            "version",
            "GetFileVersionInfoW",
        ],
    );
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert_eq!(output.status.code(), Some(1));
    assert!(stdout.contains("version: no module"));
    assert!(stdout.contains("failures=1"));
}

#[test]
fn test_resolve_json_report() {
    let home = TempDir::new().unwrap();
    let sysdir = TempDir::new().unwrap();
    let output = shunt(
        home.path(),
        &[
            "--system-dir",
            sysdir.path().to_str().unwrap(),
            "resolve",
            "version",
            "VerQueryValueW",
            "--json",
        ],
    );

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["library"], "version");
    assert!(report["module"].is_null());
    assert_eq!(report["symbols"][0]["symbol"], "VerQueryValueW");
    assert_eq!(report["symbols"][0]["status"], "no module");
    assert!(report["symbols"][0]["address"].is_null());
    assert_eq!(report["stats"]["load_failures"], 1);
    assert_eq!(report["stats"]["module_loads"], 0);
}

#[test]
fn test_resolve_rejects_path_like_library() {
    let home = TempDir::new().unwrap();
    let output = shunt(home.path(), &["resolve", "../evil", "f"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(!output.status.success());
    assert!(stdout.contains("no module"));
}

#[test]
fn test_doctor_flags_missing_system_dir() {
    let home = TempDir::new().unwrap();
    let missing = home.path().join("nowhere");
    let output = shunt(
        home.path(),
        &["--system-dir", missing.to_str().unwrap(), "doctor"],
    );
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert_eq!(output.status.code(), Some(1));
    assert!(stdout.contains("(missing)"));
    assert!(stdout.contains("Stub policy: Pause"));
    assert!(stdout.contains("Global:"));
}
