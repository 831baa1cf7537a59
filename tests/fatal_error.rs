//! Runs the binary with configurations that must fail before any client connects.

use std::{
    ffi::OsStr,
    path::PathBuf,
    process::{Command, Output},
};

use pretty_assertions::assert_eq;

// Nothing listens on port 1, so reaching the database at all would fail differently.
const UNREACHABLE_URI: &str = "mongodb://127.0.0.1:1/?serverSelectionTimeoutMS=100";

fn data_path(name: &str) -> PathBuf {
    [env!("CARGO_MANIFEST_DIR"), "tests", "data", name]
        .iter()
        .collect()
}

fn demo_command(kms_providers_path: impl AsRef<OsStr>, args: &[&str]) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_csfle-range-demo"));
    command
        .args(args)
        .env("MONGODB_URI", UNREACHABLE_URI)
        .env("KMS_PROVIDERS_PATH", kms_providers_path)
        .env("RUST_LOG", "off")
        .env_remove("KMS_PROVIDER")
        .env_remove("CSFLE_MASTER_KEY")
        .env_remove("CRYPT_SHARED_LIB_PATH");
    command
}

fn run_demo(kms_providers_path: PathBuf, args: &[&str]) -> anyhow::Result<Output> {
    Ok(demo_command(kms_providers_path, args).output()?)
}

#[test]
fn missing_credentials_file() -> anyhow::Result<()> {
    let output = run_demo(PathBuf::from("/nonexistent/csfle/kms_providers.json"), &[])?;

    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8(output.stderr)?;
    assert!(
        stderr.contains(
            "Unable to read KMS credentials file /nonexistent/csfle/kms_providers.json"
        ),
        "{}",
        stderr
    );
    Ok(())
}

#[test]
fn empty_credentials_path_uses_home_default() -> anyhow::Result<()> {
    let output = demo_command("", &[])
        .env("HOME", "/nonexistent/home")
        .output()?;

    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8(output.stderr)?;
    assert!(
        stderr.contains(
            "Unable to read KMS credentials file /nonexistent/home/.csfle/kms_providers.json"
        ),
        "{}",
        stderr
    );
    Ok(())
}

#[test]
fn short_local_key() -> anyhow::Result<()> {
    let output = run_demo(data_path("kms_providers_short_key.json"), &[])?;

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8(output.stderr)?;
    assert!(
        stderr.contains("local: master key must be 96 bytes, got 64"),
        "{}",
        stderr
    );
    Ok(())
}

#[test]
fn provider_not_in_credentials_file() -> anyhow::Result<()> {
    let output = run_demo(
        data_path("kms_providers.json"),
        &[
            "--kms-provider",
            "aws",
            "--master-key",
            r#"{"region": "us-east-1", "key": "arn:aws:kms:us-east-1:1:key/k"}"#,
        ],
    )?;

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8(output.stderr)?;
    assert!(
        stderr.contains("KMS provider aws is not configured in"),
        "{}",
        stderr
    );
    Ok(())
}

#[test]
fn named_provider_flag() -> anyhow::Result<()> {
    let output = run_demo(data_path("kms_providers.json"), &["--kms-provider", "local:one"])?;

    // Rejected by argument parsing.
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8(output.stderr)?;
    assert!(
        stderr.contains("named KMS providers are not supported"),
        "{}",
        stderr
    );
    Ok(())
}

#[test]
fn unreachable_deployment() -> anyhow::Result<()> {
    let output = run_demo(data_path("kms_providers.json"), &[])?;

    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8(output.stderr)?;
    assert!(stderr.contains("Connect failed: "), "{}", stderr);
    Ok(())
}
