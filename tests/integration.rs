use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn hrec_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_hrec"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[store]
backend = "sqlite"

[sqlite]
path = "{}/data/records.sqlite"
max_connections = 2

[logging]
level = "warn"
"#,
        root.display()
    );

    let config_path = config_dir.join("hrec.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

struct Run {
    stdout: String,
    stderr: String,
    code: Option<i32>,
}

impl Run {
    fn success(&self) -> bool {
        self.code == Some(0)
    }
}

fn run_hrec(config_path: &Path, args: &[&str]) -> Run {
    let binary = hrec_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run hrec binary at {:?}: {}", binary, e));

    Run {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        code: output.status.code(),
    }
}

fn add_lab(config_path: &Path, patient: &str, provider: &str, value: &str) -> serde_json::Value {
    let run = run_hrec(
        config_path,
        &[
            "add",
            "lab_result",
            "--patient",
            patient,
            "--provider",
            provider,
            "--field",
            &format!("value={}", value),
            "--field",
            "description=Blood Test",
        ],
    );
    assert!(run.success(), "add failed: stdout={}, stderr={}", run.stdout, run.stderr);
    serde_json::from_str(&run.stdout).unwrap()
}

fn query(config_path: &Path, args: &[&str]) -> Vec<serde_json::Value> {
    let mut full = vec!["query"];
    full.extend_from_slice(args);
    let run = run_hrec(config_path, &full);
    assert!(run.success(), "query failed: stderr={}", run.stderr);
    serde_json::from_str(&run.stdout).unwrap()
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let run = run_hrec(&config_path, &["init"]);
    assert!(run.success(), "init failed: stdout={}, stderr={}", run.stdout, run.stderr);
    assert!(run.stdout.contains("initialized (sqlite)"));
    assert!(tmp.path().join("data/records.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    assert!(run_hrec(&config_path, &["init"]).success(), "First init failed");
    assert!(
        run_hrec(&config_path, &["init"]).success(),
        "Second init failed (not idempotent)"
    );
}

#[test]
fn test_add_then_query() {
    let (_tmp, config_path) = setup_test_env();
    run_hrec(&config_path, &["init"]);

    let stored = add_lab(&config_path, "123", "Dr. Smith", "10.5");
    assert_eq!(stored["type"], "lab_result");
    assert_eq!(stored["patient_id"], "123");
    assert_eq!(stored["provider"], "Dr. Smith");
    assert_eq!(stored["value"], "10.5");
    assert_eq!(stored["description"], "Blood Test");

    let found = query(&config_path, &["--patient", "123", "--type", "lab_result"]);
    assert_eq!(found, vec![stored.clone()]);

    let found = query(&config_path, &["--type", "prescription"]);
    assert!(found.is_empty());

    let id = stored["id"].as_str().unwrap();
    let run = run_hrec(&config_path, &["get", id]);
    assert!(run.success());
    let fetched: serde_json::Value = serde_json::from_str(&run.stdout).unwrap();
    assert_eq!(fetched, stored);
}

#[test]
fn test_add_with_explicit_timestamp() {
    let (_tmp, config_path) = setup_test_env();

    let run = run_hrec(
        &config_path,
        &[
            "add",
            "appointment_note",
            "--patient",
            "9",
            "--field",
            "note=Follow-up in two weeks",
            "--timestamp",
            "2024-03-01T08:30:00Z",
        ],
    );
    assert!(run.success(), "add failed: {}", run.stderr);
    let stored: serde_json::Value = serde_json::from_str(&run.stdout).unwrap();
    assert_eq!(stored["timestamp"], "2024-03-01T08:30:00.000000Z");
    assert_eq!(stored["provider"], "");
}

#[test]
fn test_invalid_type_exits_with_client_error() {
    let (_tmp, config_path) = setup_test_env();

    let run = run_hrec(&config_path, &["add", "invalid_type", "--patient", "123"]);
    assert_eq!(run.code, Some(2));
    assert!(run.stderr.contains("invalid record type: invalid_type"), "stderr={}", run.stderr);

    assert!(query(&config_path, &[]).is_empty());
}

#[test]
fn test_failed_command_closes_store() {
    let (tmp, config_path) = setup_test_env();
    let wal = tmp.path().join("data/records.sqlite-wal");

    add_lab(&config_path, "1", "Dr. Smith", "1.0");
    assert!(!wal.exists(), "WAL left behind after a successful command");

    let run = run_hrec(&config_path, &["add", "invalid_type", "--patient", "1"]);
    assert_eq!(run.code, Some(2));
    assert!(!wal.exists(), "WAL left behind after a failed command");

    let run = run_hrec(&config_path, &["get", "does-not-exist"]);
    assert_eq!(run.code, Some(1));
    assert!(!wal.exists(), "WAL left behind after a not-found lookup");
}

#[test]
fn test_missing_field_exits_with_client_error() {
    let (_tmp, config_path) = setup_test_env();

    let run = run_hrec(
        &config_path,
        &["add", "prescription", "--patient", "123", "--field", "dose=10mg"],
    );
    assert_eq!(run.code, Some(2));
    assert!(run.stderr.contains("missing required field: drug"), "stderr={}", run.stderr);
}

#[test]
fn test_delete_patient() {
    let (_tmp, config_path) = setup_test_env();

    add_lab(&config_path, "9000", "Dr. Smith", "1.0");
    add_lab(&config_path, "9000", "Dr. Jones", "2.0");
    let kept = add_lab(&config_path, "9001", "Dr. Smith", "3.0");

    let run = run_hrec(&config_path, &["delete-patient", "9000"]);
    assert!(run.success(), "delete failed: {}", run.stderr);
    let report: serde_json::Value = serde_json::from_str(&run.stdout).unwrap();
    assert_eq!(report, serde_json::json!({ "deleted": 2 }));

    let run = run_hrec(&config_path, &["delete-patient", "9000"]);
    let report: serde_json::Value = serde_json::from_str(&run.stdout).unwrap();
    assert_eq!(report["deleted"], 0);

    assert!(query(&config_path, &["--patient", "9000"]).is_empty());
    assert_eq!(query(&config_path, &[]), vec![kept]);
}

#[test]
fn test_stats_and_audit() {
    let (_tmp, config_path) = setup_test_env();

    add_lab(&config_path, "1", "Dr. Smith", "1.0");
    add_lab(&config_path, "2", "Dr. Smith", "2.0");

    let run = run_hrec(&config_path, &["stats"]);
    assert!(run.success());
    let stats: serde_json::Value = serde_json::from_str(&run.stdout).unwrap();
    assert_eq!(stats["total"], 2);
    assert_eq!(stats["by_type"]["lab_result"], 2);
    assert_eq!(stats["by_type"]["prescription"], 0);

    let run = run_hrec(&config_path, &["audit"]);
    assert!(run.success(), "audit failed: {}", run.stdout);
    let report: serde_json::Value = serde_json::from_str(&run.stdout).unwrap();
    assert_eq!(report["records"], 2);
    assert!(report["dangling"].as_array().unwrap().is_empty());
}

#[test]
fn test_get_missing_record() {
    let (_tmp, config_path) = setup_test_env();

    let run = run_hrec(&config_path, &["get", "does-not-exist"]);
    assert_eq!(run.code, Some(1));
    assert!(run.stderr.contains("record not found"));
}
