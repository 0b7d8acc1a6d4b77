use assert_cmd::{Command, cargo_bin_cmd};
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn stowage(data_dir: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("stowage");
    cmd.env_remove("STOWAGE_ENV")
        .env_remove("STOWAGE_DATA_DIR")
        .env_remove("STOWAGE_WORK_CACHE_DIR")
        .env_remove("STOWAGE_SQL_URL")
        .env_remove("STOWAGE_SECRETS_CONFIG")
        .env_remove("RUST_LOG")
        .env("NO_COLOR", "1")
        .arg("--data-dir")
        .arg(data_dir);
    cmd
}

fn write_config(data_dir: &Path, roots: serde_json::Value) {
    fs::create_dir_all(data_dir).unwrap();
    let doc = serde_json::json!({ "roots": roots });
    fs::write(
        data_dir.join("storage.json"),
        serde_json::to_vec_pretty(&doc).unwrap()
    )
    .unwrap();
}

fn disk_config(data_dir: &Path, files: &Path) {
    write_config(
        data_dir,
        serde_json::json!([{
            "type": "disk",
            "prefix": "local",
            "name": "Local files",
            "description": "",
            "disk": { "path": files.display().to_string() }
        }])
    );
}

#[test]
fn test_help_lists_commands() {
    cargo_bin_cmd!("stowage")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("roots"))
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("put"));
}

#[test]
fn test_init_creates_template_once() {
    let dir = TempDir::new().unwrap();

    stowage(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized storage config"));

    let content = fs::read_to_string(dir.path().join("storage.json")).unwrap();
    assert!(content.contains("\"prefix\": \"it\""));
    assert!(content.contains("\"disabled\": true"));

    stowage(dir.path())
        .arg("init")
        .assert()
        .success()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn test_init_writes_even_in_production() {
    let dir = TempDir::new().unwrap();
    stowage(dir.path())
        .arg("--production")
        .arg("init")
        .arg("--json")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"created\": true"));
    assert!(dir.path().join("storage.json").exists());
}

#[test]
fn test_roots_json_reports_states() {
    let dir = TempDir::new().unwrap();
    let files = dir.path().join("files");
    write_config(
        dir.path(),
        serde_json::json!([
            {
                "type": "disk",
                "prefix": "local",
                "name": "Local files",
                "description": "",
                "disk": { "path": files.display().to_string() }
            },
            {
                "type": "ftp",
                "prefix": "legacy",
                "name": "Legacy",
                "description": ""
            }
        ])
    );

    let output = stowage(dir.path())
        .arg("roots")
        .arg("--json")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let reports: serde_json::Value = serde_json::from_slice(&output).unwrap();

    assert_eq!(reports[0]["prefix"], "local");
    assert_eq!(reports[0]["state"], "ready");
    assert_eq!(reports[0]["write_mode"], "direct");
    assert_eq!(reports[1]["state"], "failed");
    assert_eq!(reports[1]["error_category"], "unsupported_kind");
    assert_eq!(reports[1]["error"], "unsupported storage type: ftp");
}

#[test]
fn test_roots_resolve_references_through_configured_provider() {
    let dir = TempDir::new().unwrap();
    write_config(
        dir.path(),
        serde_json::json!([{
            "type": "s3",
            "prefix": "bucket",
            "name": "Bucket",
            "description": "",
            "s3": {
                "bucket": "b",
                "region": "us-east-1",
                "accessKey": "secret:access",
                "secretKey": "secret:missing"
            }
        }])
    );
    let secrets = dir.path().join("secrets.json");
    fs::write(
        &secrets,
        r#"{"provider": "local", "secrets": {"access": "AKIA"}}"#
    )
    .unwrap();

    let output = stowage(dir.path())
        .arg("--secrets")
        .arg(&secrets)
        .args(["roots", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let reports: serde_json::Value = serde_json::from_slice(&output).unwrap();

    // The access key came from the file; only the second reference is unknown.
    assert_eq!(reports[0]["error_category"], "secret");
    let error = reports[0]["error"].as_str().unwrap();
    assert!(error.contains("secret 'missing'"), "{error}");
}

#[test]
fn test_unreadable_secret_provider_config_fails() {
    let dir = TempDir::new().unwrap();
    disk_config(dir.path(), &dir.path().join("files"));

    stowage(dir.path())
        .arg("--secrets")
        .arg(dir.path().join("nope.json"))
        .arg("roots")
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read secret provider config"));
}

#[test]
fn test_roots_rejects_duplicate_prefixes() {
    let dir = TempDir::new().unwrap();
    let root = serde_json::json!({
        "type": "disk",
        "prefix": "dup",
        "name": "Dup",
        "description": "",
        "disk": { "path": "/tmp" }
    });
    write_config(dir.path(), serde_json::json!([root.clone(), root]));

    stowage(dir.path())
        .arg("roots")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Duplicate storage prefix 'dup'"));

    stowage(dir.path())
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("problem(s) found"));
}

#[test]
fn test_validate_accepts_seeded_document() {
    let dir = TempDir::new().unwrap();
    stowage(dir.path())
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("is valid (1 roots)"));
}

#[test]
fn test_validate_does_not_create_the_file() {
    let dir = TempDir::new().unwrap();
    stowage(dir.path()).arg("validate").assert().success();
    assert!(!dir.path().join("storage.json").exists());
}

#[test]
fn test_put_cat_ls_rm_round_trip() {
    let dir = TempDir::new().unwrap();
    let files = dir.path().join("files");
    disk_config(dir.path(), &files);

    stowage(dir.path())
        .args(["put", "local", "dash/a.json"])
        .write_stdin("{\"panels\":[]}")
        .assert()
        .success()
        .stdout(predicate::str::contains("local/dash/a.json saved"));
    assert!(files.join("dash/a.json").exists());

    stowage(dir.path())
        .args(["cat", "local", "dash/a.json"])
        .assert()
        .success()
        .stdout("{\"panels\":[]}");

    stowage(dir.path())
        .args(["ls", "local", "dash", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"path\": \"dash/a.json\""));

    stowage(dir.path())
        .args(["rm", "local", "dash/a.json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("deleted"));

    stowage(dir.path())
        .args(["rm", "local", "dash/a.json"])
        .assert()
        .success()
        .stderr(predicate::str::contains("does not exist"));

    stowage(dir.path())
        .args(["cat", "local", "dash/a.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_put_from_file_and_unknown_prefix() {
    let dir = TempDir::new().unwrap();
    let files = dir.path().join("files");
    disk_config(dir.path(), &files);
    let body = dir.path().join("body.json");
    fs::write(&body, "{}").unwrap();

    stowage(dir.path())
        .args(["put", "local", "b.json", "--file"])
        .arg(&body)
        .arg("--json")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"outcome\": \"committed\""));

    stowage(dir.path())
        .args(["put", "missing", "b.json", "--file"])
        .arg(&body)
        .assert()
        .failure()
        .stderr(predicate::str::contains("No storage root registered under prefix 'missing'"));
}
