// src/package/manifest.rs
//! Package manifest (info.yaml) loading and asset checks
//!
//! Two layouts are accepted:
//!
//! ```yaml
//! formatType: am-application      # single application
//! formatVersion: 1
//! ---
//! id: com.example.app
//! icon: icon.png
//! code: main.qml
//! ```
//!
//! ```yaml
//! formatType: am-package          # package with one or more applications
//! formatVersion: 1
//! ---
//! id: com.example.pkg
//! icon: icon.png
//! applications:
//!   - id: com.example.pkg.app
//!     code: main.qml
//! ```

use crate::error::{Error, Result};
use crate::filesystem::sanitize_entry_path;
use crate::package::metadata::{check_format_gate, parse_documents};
use serde::Deserialize;
use serde_yaml::Value;
use std::path::Path;
use tracing::debug;

/// File name of the manifest inside a package source directory
pub const MANIFEST_NAME: &str = "info.yaml";

const APPLICATION_FORMAT_TYPE: &str = "am-application";
const PACKAGE_FORMAT_TYPE: &str = "am-package";

/// One application shipped by a package
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ApplicationEntry {
    pub id: String,
    /// Code entry point, relative to the package root
    pub code: String,
}

/// Parsed info.yaml, normalized to the package layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageManifest {
    pub id: String,
    pub icon: String,
    pub applications: Vec<ApplicationEntry>,
}

#[derive(Deserialize)]
struct LegacyDocument {
    id: String,
    icon: String,
    code: String,
}

#[derive(Deserialize)]
struct PackageDocument {
    id: String,
    icon: String,
    #[serde(default)]
    applications: Vec<ApplicationEntry>,
}

impl PackageManifest {
    /// Load `info.yaml` from `source_dir` and check that its assets exist
    pub fn load(source_dir: &Path) -> Result<Self> {
        let path = source_dir.join(MANIFEST_NAME);
        if !path.is_file() {
            return Err(Error::MissingAsset(format!(
                "{} not found in {}",
                MANIFEST_NAME,
                source_dir.display()
            )));
        }

        let manifest = Self::parse(&std::fs::read(&path)?)?;
        manifest.check_assets(source_dir)?;
        debug!(
            "Manifest for {} lists {} application(s)",
            manifest.id,
            manifest.applications.len()
        );
        Ok(manifest)
    }

    /// Parse manifest bytes in either layout
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let docs = parse_documents(bytes)?;
        if docs.len() != 2 {
            return Err(Error::Format(format!(
                "{} must contain 2 YAML documents, found {}",
                MANIFEST_NAME,
                docs.len()
            )));
        }

        let format_type = docs[0]
            .get("formatType")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let manifest = if format_type == APPLICATION_FORMAT_TYPE {
            check_format_gate(&docs[0], APPLICATION_FORMAT_TYPE, &[1])?;
            let doc: LegacyDocument = serde_yaml::from_value(docs[1].clone())?;
            Self {
                applications: vec![ApplicationEntry {
                    id: doc.id.clone(),
                    code: doc.code,
                }],
                id: doc.id,
                icon: doc.icon,
            }
        } else {
            check_format_gate(&docs[0], PACKAGE_FORMAT_TYPE, &[1])?;
            let doc: PackageDocument = serde_yaml::from_value(docs[1].clone())?;
            Self {
                id: doc.id,
                icon: doc.icon,
                applications: doc.applications,
            }
        };

        if manifest.id.is_empty() {
            return Err(Error::Format(format!("{}: empty 'id'", MANIFEST_NAME)));
        }
        if manifest.applications.is_empty() {
            return Err(Error::Format(format!(
                "{}: package '{}' has no applications",
                MANIFEST_NAME, manifest.id
            )));
        }
        Ok(manifest)
    }

    /// Check that the icon and every code entry point exist below `source_dir`
    pub fn check_assets(&self, source_dir: &Path) -> Result<()> {
        require_file(source_dir, "icon", &self.icon)?;
        for app in &self.applications {
            require_file(source_dir, &format!("code of {}", app.id), &app.code)?;
        }
        Ok(())
    }
}

fn require_file(source_dir: &Path, what: &str, relative: &str) -> Result<()> {
    if relative.is_empty() {
        return Err(Error::MissingAsset(format!("{} is not set", what)));
    }
    let path = source_dir.join(sanitize_entry_path(relative)?);
    if !path.is_file() {
        return Err(Error::MissingAsset(format!(
            "{} '{}' does not exist",
            what, relative
        )));
    }
    Ok(())
}
