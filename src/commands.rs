// src/commands.rs
//! Command handlers for the ampkg CLI

use ampkg::package::{self, FileSource, HttpSource};
use ampkg::{
    ByteSource, CancelHandle, InstallationReport, LogProgress, PackagerConfig, StreamingExtractor,
};
use anyhow::{Context, Result};
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};
use tracing::info;

/// Parse repeated `KEY=VALUE` arguments into a metadata map
///
/// Values are read as YAML scalars, so `count=3` stores a number.
fn parse_metadata(pairs: &[String]) -> Result<Mapping> {
    let mut map = Mapping::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("metadata '{}' is not of the form KEY=VALUE", pair))?;
        let value: Value = serde_yaml::from_str(value).unwrap_or_else(|_| Value::from(value));
        map.insert(Value::from(key), value);
    }
    Ok(map)
}

pub fn cmd_create_package(
    destination: &Path,
    source_dir: &Path,
    extra: &[String],
    extra_signed: &[String],
) -> Result<()> {
    let report = package::create(
        destination,
        source_dir,
        parse_metadata(extra)?,
        parse_metadata(extra_signed)?,
    )
    .with_context(|| format!("Failed to create package from {}", source_dir.display()))?;

    println!("Created package: {}", destination.display());
    println!("  Package id: {}", report.package_id());
    println!("  Entries:    {}", report.files().len());
    println!("  Disk space: {} bytes", report.disk_space_used());
    println!("  Digest:     {}", report.digest());
    Ok(())
}

pub fn cmd_dev_sign_package(
    source: &Path,
    destination: &Path,
    certificate: &Path,
    password: &str,
) -> Result<()> {
    package::developer_sign(source, destination, certificate, password)
        .with_context(|| format!("Failed to developer-sign {}", source.display()))?;
    println!("Developer-signed package written to {}", destination.display());
    Ok(())
}

pub fn cmd_dev_verify_package(source: &Path, certificates: &[PathBuf]) -> Result<()> {
    package::developer_verify(source, certificates)
        .with_context(|| format!("Developer signature check of {} failed", source.display()))?;
    println!("Developer signature of {} is valid", source.display());
    Ok(())
}

pub fn cmd_store_sign_package(
    source: &Path,
    destination: &Path,
    certificate: &Path,
    password: &str,
    hardware_id: &str,
) -> Result<()> {
    package::store_sign(source, destination, certificate, password, hardware_id)
        .with_context(|| format!("Failed to store-sign {}", source.display()))?;
    println!(
        "Store-signed package for '{}' written to {}",
        hardware_id,
        destination.display()
    );
    Ok(())
}

pub fn cmd_store_verify_package(
    source: &Path,
    certificates_and_hardware_id: &[String],
) -> Result<()> {
    let (hardware_id, certificates) = certificates_and_hardware_id
        .split_last()
        .context("missing hardware id")?;
    let certificates: Vec<PathBuf> = certificates.iter().map(PathBuf::from).collect();

    package::store_verify(source, &certificates, hardware_id)
        .with_context(|| format!("Store signature check of {} failed", source.display()))?;
    println!(
        "Store signature of {} is valid for '{}'",
        source.display(),
        hardware_id
    );
    Ok(())
}

pub fn cmd_extract_package(
    source: &str,
    destination: &Path,
    report_path: Option<&Path>,
    config: &PackagerConfig,
) -> Result<()> {
    let cancel = CancelHandle::new();
    let extractor = StreamingExtractor::new(destination)
        .with_config(config.extractor.clone())
        .with_cancel_handle(cancel.clone())
        .with_progress(Box::new(LogProgress::new(source)));

    let report = if source.starts_with("http://") || source.starts_with("https://") {
        info!("Streaming {} into {}", source, destination.display());
        let download = HttpSource::start(source, &config.download, cancel)
            .with_context(|| format!("Failed to start download of {}", source))?;
        run_extractor(extractor, download)?
    } else {
        let file = FileSource::open(Path::new(source))
            .with_context(|| format!("Failed to open {}", source))?;
        run_extractor(extractor, file)?
    };

    if let Some(path) = report_path {
        std::fs::write(path, report.to_yaml()?)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
    }

    println!(
        "Installed {} into {} ({} entries)",
        report.package_id(),
        destination.display(),
        report.files().len()
    );
    println!("  Digest: {}", report.digest());
    println!(
        "  Developer signature: {}",
        if report.developer_signature().is_some() { "present" } else { "none" }
    );
    println!(
        "  Store signature:     {}",
        if report.store_signature().is_some() { "present" } else { "none" }
    );
    Ok(())
}

fn run_extractor<S: ByteSource>(
    mut extractor: StreamingExtractor,
    source: S,
) -> Result<InstallationReport> {
    extractor
        .extract(source)
        .context("Package extraction failed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_metadata() {
        let map = parse_metadata(&["channel=beta".to_string(), "build=42".to_string()]).unwrap();
        assert_eq!(map.get("channel").and_then(Value::as_str), Some("beta"));
        assert_eq!(map.get("build").and_then(Value::as_u64), Some(42));
        assert!(parse_metadata(&["novalue".to_string()]).is_err());
    }
}
