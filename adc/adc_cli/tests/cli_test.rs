use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;

fn adc() -> Command {
    let mut cmd = Command::cargo_bin("adc").unwrap();
    cmd.env("ADC_LOG_LEVEL", "error");
    cmd
}

fn write_manifest(dir: &Path, json: &str) -> String {
    let path = dir.join("boot.json");
    fs::write(&path, json).unwrap();
    path.to_string_lossy().to_string()
}

#[test]
fn test_create_preset_scaffolds_files() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_str().unwrap();

    adc()
        .args(["create-preset", "user-auth", "--root", root])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created preset 'user-auth'"));

    let version_dir = dir.path().join("presets/user-auth/1.0.0-rust");
    let package = fs::read_to_string(version_dir.join("package.json")).unwrap();
    assert!(package.contains("\"@adc/user-auth\""));
    assert_eq!(fs::read_to_string(version_dir.join("modules.json")).unwrap().trim(), "{}");
    let stub = fs::read_to_string(version_dir.join("index.rs")).unwrap();
    assert!(stub.contains("BaseModule"));
    assert!(stub.contains("impl Component for UserAuthPreset"));

    // Never overwrite an existing preset.
    adc()
        .args(["create-preset", "user-auth", "--root", root])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn test_create_preset_rejects_bad_names() {
    let dir = tempfile::tempdir().unwrap();
    adc()
        .args(["create-preset", "../outside", "--root", dir.path().to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid preset name"));
}

#[test]
fn test_inspect_lists_modules() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_str().unwrap();

    adc()
        .args(["inspect", "--root", root])
        .assert()
        .success()
        .stdout(predicate::str::contains("No modules found"));

    fs::create_dir_all(dir.path().join("providers/files/file-storage/1.2.0-python")).unwrap();
    adc().args(["create-preset", "auth", "--root", root]).assert().success();

    adc()
        .args(["inspect", "--root", root])
        .assert()
        .success()
        .stdout(predicate::str::contains("files/file-storage"))
        .stdout(predicate::str::contains("1.2.0-python"))
        .stdout(predicate::str::contains("auth"))
        .stdout(predicate::str::contains("1.0.0-rust"));
}

#[test]
fn test_boot_reports_non_fatal_failures() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = write_manifest(
        dir.path(),
        r#"{"failOnError": false, "providers": [{"name": "storage"}]}"#,
    );

    adc()
        .args(["boot", "--manifest", &manifest, "--root", dir.path().to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("failed  provider:storage"))
        .stdout(predicate::str::contains("ModuleNotFound"))
        .stdout(predicate::str::contains("0 ready, 1 failed"));
}

#[test]
fn test_boot_json_report() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = write_manifest(dir.path(), r#"{"presets": [{"name": "missing"}]}"#);

    let output = adc()
        .args(["boot", "--json", "--manifest", &manifest, "--root", dir.path().to_str().unwrap()])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["order"][0], "preset:missing");
    assert_eq!(report["failed"][0]["kind"], "ModuleNotFound");
}

#[test]
fn test_fatal_boot_exits_non_zero() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = write_manifest(
        dir.path(),
        r#"{"failOnError": true, "providers": [{"name": "storage"}]}"#,
    );

    adc()
        .args(["boot", "--manifest", &manifest, "--root", dir.path().to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Boot of"))
        .stderr(predicate::str::contains("storage"));
}

#[test]
fn test_cyclic_boot_exits_non_zero() {
    let dir = tempfile::tempdir().unwrap();
    for (name, other) in [("a", "b"), ("b", "a")] {
        let version_dir = dir.path().join(format!("providers/{}/1.0.0-rust", name));
        fs::create_dir_all(&version_dir).unwrap();
        fs::write(version_dir.join("package.json"), "{}").unwrap();
        fs::write(
            version_dir.join("modules.json"),
            format!(r#"{{"providers":[{{"name":"{}"}}]}}"#, other),
        )
        .unwrap();
    }
    let manifest = write_manifest(dir.path(), r#"{"providers": [{"name": "a"}]}"#);

    adc()
        .args(["boot", "--manifest", &manifest, "--root", dir.path().to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Cyclic dependency"));
}

#[test]
fn test_run_missing_app_fails() {
    let dir = tempfile::tempdir().unwrap();
    adc()
        .args(["run-app", "web", "--root", dir.path().to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("App 'web' failed"));
}
