// src/package/report.rs

//! Installation report
//!
//! The durable record of one successful extraction. The registry that
//! persists installed packages stores it (see [`InstallationReport::to_yaml`])
//! and later uses it to re-verify or uninstall the package.

use crate::error::{Error, Result};
use crate::filesystem::confine_to_root;
use crate::package::digest::{Digest, DigestAccumulator};
use crate::package::metadata::{HeaderMetadata, check_format_gate};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use serde_yaml::Mapping;
use std::fs::{self, File};
use std::io::{self, Read};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tracing::{debug, info, warn};

/// `formatType` of a persisted report
pub const REPORT_FORMAT_TYPE: &str = "am-installation-report";
/// Report version written and read by this module
pub const REPORT_FORMAT_VERSION: i64 = 1;

/// Read-only record of an installed package
///
/// `files` lists payload entries in archive order; directories carry a
/// trailing `/`.
#[derive(Debug, Clone, PartialEq)]
pub struct InstallationReport {
    package_id: String,
    files: Vec<String>,
    disk_space_used: u64,
    digest: Digest,
    developer_signature: Option<Vec<u8>>,
    store_signature: Option<Vec<u8>>,
    extra: Mapping,
    extra_signed: Mapping,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportDocument {
    package_id: String,
    disk_space_used: u64,
    digest: Digest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    developer_signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    store_signature: Option<String>,
    #[serde(default, skip_serializing_if = "Mapping::is_empty")]
    extra: Mapping,
    #[serde(default, skip_serializing_if = "Mapping::is_empty")]
    extra_signed: Mapping,
    #[serde(default)]
    files: Vec<String>,
}

impl InstallationReport {
    pub(crate) fn new(
        header: HeaderMetadata,
        files: Vec<String>,
        digest: Digest,
        developer_signature: Option<Vec<u8>>,
        store_signature: Option<Vec<u8>>,
    ) -> Self {
        Self {
            package_id: header.package_id,
            files,
            disk_space_used: header.disk_space_used,
            digest,
            developer_signature,
            store_signature,
            extra: header.extra,
            extra_signed: header.extra_signed,
        }
    }

    pub fn package_id(&self) -> &str {
        &self.package_id
    }

    /// Installed entries relative to the installation root
    pub fn files(&self) -> &[String] {
        &self.files
    }

    /// Disk usage declared by the package header
    pub fn disk_space_used(&self) -> u64 {
        self.disk_space_used
    }

    /// Digest verified during extraction
    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    pub fn developer_signature(&self) -> Option<&[u8]> {
        self.developer_signature.as_deref()
    }

    pub fn store_signature(&self) -> Option<&[u8]> {
        self.store_signature.as_deref()
    }

    pub fn extra(&self) -> &Mapping {
        &self.extra
    }

    pub fn extra_signed(&self) -> &Mapping {
        &self.extra_signed
    }

    /// Serialize for the package registry
    pub fn to_yaml(&self) -> Result<String> {
        let mut gate = Mapping::new();
        gate.insert("formatType".into(), REPORT_FORMAT_TYPE.into());
        gate.insert("formatVersion".into(), REPORT_FORMAT_VERSION.into());

        let doc = ReportDocument {
            package_id: self.package_id.clone(),
            disk_space_used: self.disk_space_used,
            digest: self.digest,
            developer_signature: self.developer_signature.as_ref().map(|s| BASE64.encode(s)),
            store_signature: self.store_signature.as_ref().map(|s| BASE64.encode(s)),
            extra: self.extra.clone(),
            extra_signed: self.extra_signed.clone(),
            files: self.files.clone(),
        };

        let mut out = serde_yaml::to_string(&gate)?;
        out.push_str("---\n");
        out.push_str(&serde_yaml::to_string(&doc)?);
        Ok(out)
    }

    /// Load a report written by [`InstallationReport::to_yaml`]
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let docs = crate::package::metadata::parse_documents(yaml.as_bytes())?;
        if docs.len() != 2 {
            return Err(Error::Format(format!(
                "installation report must contain 2 YAML documents, found {}",
                docs.len()
            )));
        }
        check_format_gate(&docs[0], REPORT_FORMAT_TYPE, &[REPORT_FORMAT_VERSION])?;

        let doc: ReportDocument = serde_yaml::from_value(docs[1].clone())?;
        Ok(Self {
            package_id: doc.package_id,
            files: doc.files,
            disk_space_used: doc.disk_space_used,
            digest: doc.digest,
            developer_signature: decode_optional(doc.developer_signature, "developerSignature")?,
            store_signature: decode_optional(doc.store_signature, "storeSignature")?,
            extra: doc.extra,
            extra_signed: doc.extra_signed,
        })
    }

    /// Re-derive the digest from the installed files under `root`
    ///
    /// Fails with [`Error::DigestMismatch`] if anything recorded in the report
    /// changed on disk since extraction.
    pub fn verify_installation(&self, root: &Path) -> Result<Digest> {
        let root = root.canonicalize()?;
        let mut digest = DigestAccumulator::new();
        digest.add_header(&self.package_id, &self.extra_signed)?;

        for entry in &self.files {
            if let Some(dir) = entry.strip_suffix('/') {
                let target = confine_to_root(&root, dir)?;
                if !target.is_dir() {
                    return Err(Error::Format(format!(
                        "installed directory '{}' is missing",
                        dir
                    )));
                }
                digest.add_directory(dir);
                continue;
            }

            let target = confine_to_root(&root, entry)?;
            let mut file = File::open(&target)?;
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                let n = file.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                digest.update(&buf[..n]);
            }
            let meta = file.metadata()?;
            digest.add_file_metadata(entry, meta.len(), meta.permissions().mode() & 0o100 != 0);
        }

        let computed = digest.finalize();
        if computed != self.digest {
            return Err(Error::DigestMismatch {
                computed: computed.to_hex(),
                declared: self.digest.to_hex(),
            });
        }
        debug!("Installation of {} verified", self.package_id);
        Ok(computed)
    }

    /// Remove the recorded files and directories below `root`
    ///
    /// Entries are removed in reverse archive order, so children go before
    /// their directories. Directories that still hold unrecorded files are
    /// left in place. The first failure is returned after every entry has
    /// been attempted.
    pub fn remove_installation(&self, root: &Path) -> Result<()> {
        let root = root.canonicalize()?;
        let mut first_error: Option<Error> = None;

        for entry in self.files.iter().rev() {
            let (name, is_dir) = match entry.strip_suffix('/') {
                Some(dir) => (dir, true),
                None => (entry.as_str(), false),
            };

            let result = confine_to_root(&root, name).and_then(|target| {
                let removed = if is_dir {
                    fs::remove_dir(&target)
                } else {
                    fs::remove_file(&target)
                };
                match removed {
                    Ok(()) => Ok(()),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        debug!("{} already gone", target.display());
                        Ok(())
                    }
                    Err(e) if is_dir && e.kind() == io::ErrorKind::DirectoryNotEmpty => {
                        debug!("Keeping non-empty directory {}", target.display());
                        Ok(())
                    }
                    Err(e) => Err(Error::Io(e)),
                }
            });

            if let Err(e) = result {
                if first_error.is_none() {
                    first_error = Some(e);
                } else {
                    warn!("Failed to remove {}: {}", name, e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!("Removed {} from {}", self.package_id, root.display());
                Ok(())
            }
        }
    }
}

fn decode_optional(value: Option<String>, key: &str) -> Result<Option<Vec<u8>>> {
    value
        .map(|s| {
            BASE64
                .decode(s.trim())
                .map_err(|e| Error::Format(format!("installation report: '{}': {}", key, e)))
        })
        .transpose()
}
