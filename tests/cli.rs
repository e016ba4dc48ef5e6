// tests/cli.rs

//! Exit codes and messages of the ampkg binary.

mod common;

use common::{PASSPHRASE, generate_pki, sample_source};
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn ampkg(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_ampkg"))
        .current_dir(dir)
        .env("RUST_LOG", "warn")
        .args(args)
        .output()
        .expect("failed to run ampkg")
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn test_help_command() {
    let temp = TempDir::new().unwrap();
    let output = ampkg(temp.path(), &["--help"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("create-package"));
}

#[test]
fn test_sign_and_verify_commands() {
    let temp = TempDir::new().unwrap();
    sample_source(&temp.path().join("source"));
    let pki = generate_pki(temp.path(), "developer");
    let ca = pki.ca_cert.to_str().unwrap();
    let p12 = pki.credentials.to_str().unwrap();

    let output = ampkg(temp.path(), &["create-package", "app.ampkg", "source"]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(String::from_utf8_lossy(&output.stdout).contains("com.example.test"));

    // Unsigned package: verification failure, exit code 1, kind on stderr
    let output = ampkg(temp.path(), &["dev-verify-package", "app.ampkg", ca]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("Error [verification]"), "{}", stderr(&output));

    let output = ampkg(
        temp.path(),
        &["dev-sign-package", "app.ampkg", "signed.ampkg", p12, "wrong"],
    );
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("Error [signing]"), "{}", stderr(&output));

    let output = ampkg(
        temp.path(),
        &["dev-sign-package", "app.ampkg", "signed.ampkg", p12, PASSPHRASE],
    );
    assert!(output.status.success(), "{}", stderr(&output));

    let output = ampkg(temp.path(), &["dev-verify-package", "signed.ampkg", ca]);
    assert!(output.status.success(), "{}", stderr(&output));

    let output = ampkg(
        temp.path(),
        &["store-sign-package", "signed.ampkg", "store.ampkg", p12, PASSPHRASE, "hw-1"],
    );
    assert!(output.status.success(), "{}", stderr(&output));

    let output = ampkg(temp.path(), &["store-verify-package", "store.ampkg", ca, "hw-1"]);
    assert!(output.status.success(), "{}", stderr(&output));

    let output = ampkg(temp.path(), &["store-verify-package", "store.ampkg", ca, "hw-2"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("hw-2"), "{}", stderr(&output));
}

#[test]
fn test_extract_command_writes_report() {
    let temp = TempDir::new().unwrap();
    sample_source(&temp.path().join("source"));

    let output = ampkg(temp.path(), &["create-package", "app.ampkg", "source"]);
    assert!(output.status.success(), "{}", stderr(&output));

    let output = ampkg(
        temp.path(),
        &["extract-package", "app.ampkg", "install", "--report", "report.yaml"],
    );
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(temp.path().join("install/code.qml").is_file());

    let yaml = std::fs::read_to_string(temp.path().join("report.yaml")).unwrap();
    let report = ampkg::InstallationReport::from_yaml(&yaml).unwrap();
    assert_eq!(report.package_id(), "com.example.test");
}

#[test]
fn test_missing_source_fails() {
    let temp = TempDir::new().unwrap();
    let output = ampkg(temp.path(), &["extract-package", "missing.ampkg", "install"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("Error [io]"), "{}", stderr(&output));
    assert!(!temp.path().join("install").exists());
}
