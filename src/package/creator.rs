// src/package/creator.rs

//! Package creation
//!
//! [`ContainerWriter`] writes the raw container (header, payload entries,
//! footer fragments) into a gzip-compressed tar stream. [`PackageCreator`]
//! walks a source directory, checks its manifest, and produces a sealed
//! package whose footer carries the digest but no signatures.

use crate::error::{Error, Result};
use crate::package::digest::{DigestAccumulator, DigestingReader};
use crate::package::manifest::PackageManifest;
use crate::package::metadata::{
    self, FooterMetadata, HeaderMetadata, SignatureKind, serialize_signature_fragment,
};
use crate::package::report::InstallationReport;
use crate::package::{FOOTER_PREFIX, HEADER_NAME};
use flate2::Compression;
use flate2::write::GzEncoder;
use serde_yaml::Mapping;
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tar::EntryType;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Entry mtime when SOURCE_DATE_EPOCH is not set (2024-01-01 00:00:00 UTC)
const DEFAULT_MTIME: u64 = 1704067200;

/// Allocation granularity assumed for the disk usage estimate
const BLOCK_SIZE: u64 = 4096;

/// Low-level container writer
///
/// Does not enforce entry ordering; callers are expected to write the
/// header first and footer fragments last.
pub struct ContainerWriter<W: Write> {
    builder: tar::Builder<GzEncoder<W>>,
    mtime: u64,
}

impl<W: Write> ContainerWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            builder: tar::Builder::new(GzEncoder::new(writer, Compression::default())),
            mtime: source_date_epoch(),
        }
    }

    /// Append an entry with an arbitrary name and type
    ///
    /// Names that fit the classic tar name field are stored verbatim, so this
    /// can also produce entries that a well-behaved writer never would.
    pub fn append_entry<R: Read>(
        &mut self,
        name: &str,
        entry_type: EntryType,
        mode: u32,
        size: u64,
        data: R,
    ) -> Result<()> {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(entry_type);
        header.set_mode(mode);
        header.set_size(size);
        header.set_mtime(self.mtime);
        header.set_uid(0);
        header.set_gid(0);

        let bytes = name.as_bytes();
        let slot = &mut header.as_old_mut().name;
        if bytes.len() <= slot.len() {
            slot[..bytes.len()].copy_from_slice(bytes);
            header.set_cksum();
            self.builder.append(&header, data)?;
        } else {
            self.builder.append_data(&mut header, name, data)?;
        }
        Ok(())
    }

    pub fn append_header(&mut self, header: &HeaderMetadata) -> Result<()> {
        let bytes = metadata::serialize_header(header)?;
        self.append_entry(
            HEADER_NAME,
            EntryType::Regular,
            0o644,
            bytes.len() as u64,
            bytes.as_slice(),
        )
    }

    /// Append a directory entry; the name gets a trailing `/`
    pub fn append_directory(&mut self, name: &str) -> Result<()> {
        let name = format!("{}/", name.trim_end_matches('/'));
        self.append_entry(&name, EntryType::Directory, 0o755, 0, io::empty())
    }

    pub fn append_file<R: Read>(
        &mut self,
        name: &str,
        size: u64,
        executable: bool,
        data: R,
    ) -> Result<()> {
        let mode = if executable { 0o755 } else { 0o644 };
        self.append_entry(name, EntryType::Regular, mode, size, data)
    }

    pub fn append_footer(&mut self, footer: &FooterMetadata) -> Result<()> {
        let bytes = metadata::serialize_footer(footer)?;
        self.append_entry(
            FOOTER_PREFIX,
            EntryType::Regular,
            0o644,
            bytes.len() as u64,
            bytes.as_slice(),
        )
    }

    /// Append a footer fragment carrying one signature
    pub fn append_signature(&mut self, kind: SignatureKind, signature: &[u8]) -> Result<()> {
        let bytes = serialize_signature_fragment(kind, signature)?;
        self.append_entry(
            &kind.entry_name(),
            EntryType::Regular,
            0o644,
            bytes.len() as u64,
            bytes.as_slice(),
        )
    }

    /// Finish the tar and gzip streams and return the inner writer
    pub fn finish(self) -> Result<W> {
        let encoder = self.builder.into_inner()?;
        Ok(encoder.finish()?)
    }
}

fn source_date_epoch() -> u64 {
    std::env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(DEFAULT_MTIME)
}

enum SourceKind {
    Directory,
    File,
}

struct SourceEntry {
    relative: String,
    path: PathBuf,
    kind: SourceKind,
}

/// Builds a package from a source directory
#[derive(Debug, Clone)]
pub struct PackageCreator {
    source_dir: PathBuf,
    extra: Mapping,
    extra_signed: Mapping,
}

impl PackageCreator {
    pub fn new(source_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
            extra: Mapping::new(),
            extra_signed: Mapping::new(),
        }
    }

    /// Metadata stored in the header but not covered by the digest
    pub fn with_extra(mut self, extra: Mapping) -> Self {
        self.extra = extra;
        self
    }

    /// Metadata stored in the header and covered by the digest
    pub fn with_extra_signed(mut self, extra_signed: Mapping) -> Self {
        self.extra_signed = extra_signed;
        self
    }

    /// Write the package to `destination`
    pub fn create(&self, destination: &Path) -> Result<InstallationReport> {
        let manifest = PackageManifest::load(&self.source_dir)?;
        let entries = self.scan(destination)?;

        let mut header = HeaderMetadata::new(manifest.id.clone(), disk_space_used(&entries)?);
        header.extra = self.extra.clone();
        header.extra_signed = self.extra_signed.clone();

        let mut digest = DigestAccumulator::new();
        digest.add_header(&header.package_id, &header.extra_signed)?;

        let mut writer = ContainerWriter::new(BufWriter::new(File::create(destination)?));
        writer.append_header(&header)?;

        let mut files = Vec::with_capacity(entries.len());
        for entry in &entries {
            match entry.kind {
                SourceKind::Directory => {
                    writer.append_directory(&entry.relative)?;
                    digest.add_directory(&entry.relative);
                    files.push(format!("{}/", entry.relative));
                }
                SourceKind::File => {
                    let mut source = File::open(&entry.path)?;
                    let meta = source.metadata()?;
                    let size = meta.len();
                    let executable = meta.permissions().mode() & 0o100 != 0;

                    let reader = DigestingReader::new((&mut source).take(size), &mut digest);
                    writer.append_file(&entry.relative, size, executable, reader)?;
                    digest.add_file_metadata(&entry.relative, size, executable);
                    debug!("Added {} ({} bytes)", entry.relative, size);
                    files.push(entry.relative.clone());
                }
            }
        }

        let digest = digest.finalize();
        writer.append_footer(&FooterMetadata::new(digest))?;
        writer
            .finish()?
            .into_inner()
            .map_err(|e| Error::Io(e.into_error()))?
            .sync_all()?;

        info!(
            "Created package {} at {} ({} entries, digest {})",
            header.package_id,
            destination.display(),
            files.len(),
            digest
        );
        Ok(InstallationReport::new(header, files, digest, None, None))
    }

    /// Collect payload entries in a stable order
    fn scan(&self, destination: &Path) -> Result<Vec<SourceEntry>> {
        let excluded = destination.canonicalize().ok();
        let mut entries = Vec::new();

        for entry in WalkDir::new(&self.source_dir)
            .min_depth(1)
            .sort_by_file_name()
        {
            let entry = entry?;
            let path = entry.path();
            if excluded.is_some() && path.canonicalize().ok() == excluded {
                continue;
            }

            let relative = path
                .strip_prefix(&self.source_dir)
                .ok()
                .and_then(Path::to_str)
                .ok_or_else(|| {
                    Error::Format(format!("unsupported file name: {}", path.display()))
                })?
                .to_string();

            let file_type = entry.file_type();
            let kind = if file_type.is_dir() {
                SourceKind::Directory
            } else if file_type.is_file() {
                SourceKind::File
            } else {
                return Err(Error::Format(format!(
                    "'{}' is neither a regular file nor a directory",
                    relative
                )));
            };

            entries.push(SourceEntry {
                relative,
                path: path.to_path_buf(),
                kind,
            });
        }
        Ok(entries)
    }
}

/// Estimated installed size: files rounded up to whole blocks, one block per directory
fn disk_space_used(entries: &[SourceEntry]) -> Result<u64> {
    let mut total = 0u64;
    for entry in entries {
        total += match entry.kind {
            SourceKind::Directory => BLOCK_SIZE,
            SourceKind::File => entry.path.metadata()?.len().div_ceil(BLOCK_SIZE) * BLOCK_SIZE,
        };
    }
    Ok(total.max(1))
}

/// Create a package from `source_dir` at `destination`
pub fn create(
    destination: &Path,
    source_dir: &Path,
    extra: Mapping,
    extra_signed: Mapping,
) -> Result<InstallationReport> {
    PackageCreator::new(source_dir)
        .with_extra(extra)
        .with_extra_signed(extra_signed)
        .create(destination)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::extractor::extract;
    use crate::package::source::FileSource;
    use std::fs;
    use tempfile::TempDir;

    fn sample_source(dir: &Path) {
        fs::write(
            dir.join("info.yaml"),
            "formatType: am-application\nformatVersion: 1\n---\nid: com.example.app\nicon: icon.png\ncode: code.qml\n",
        )
        .unwrap();
        fs::write(dir.join("icon.png"), b"\x89PNG").unwrap();
        fs::write(dir.join("code.qml"), b"// test").unwrap();
        fs::create_dir(dir.join("lib")).unwrap();
        fs::write(dir.join("lib/helper.sh"), b"#!/bin/sh\n").unwrap();
        fs::set_permissions(dir.join("lib/helper.sh"), fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn test_create_then_extract() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir(&src).unwrap();
        sample_source(&src);

        let mut extra = Mapping::new();
        extra.insert("note".into(), "unsigned".into());
        let package = temp.path().join("app.ampkg");
        let created = create(&package, &src, extra, Mapping::new()).unwrap();

        assert_eq!(created.package_id(), "com.example.app");
        assert_eq!(
            created.files(),
            &["code.qml", "icon.png", "info.yaml", "lib/", "lib/helper.sh"]
        );
        // 4 files of one block each plus one directory
        assert_eq!(created.disk_space_used(), 5 * BLOCK_SIZE);

        let dest = temp.path().join("installed");
        let extracted = extract(FileSource::open(&package).unwrap(), &dest).unwrap();
        assert_eq!(extracted.digest(), created.digest());
        assert_eq!(extracted.files(), created.files());
        assert_eq!(
            extracted.extra().get("note").and_then(|v| v.as_str()),
            Some("unsigned")
        );
        assert_eq!(fs::read(dest.join("icon.png")).unwrap(), b"\x89PNG");
    }

    #[test]
    fn test_extra_signed_changes_digest_but_extra_does_not() {
        let temp = TempDir::new().unwrap();
        sample_source(temp.path());
        let out = TempDir::new().unwrap();

        let base = create(&out.path().join("a"), temp.path(), Mapping::new(), Mapping::new())
            .unwrap();

        let mut extra = Mapping::new();
        extra.insert("k".into(), "v".into());
        let with_extra =
            create(&out.path().join("b"), temp.path(), extra.clone(), Mapping::new()).unwrap();
        let with_signed =
            create(&out.path().join("c"), temp.path(), Mapping::new(), extra).unwrap();

        assert_eq!(base.digest(), with_extra.digest());
        assert_ne!(base.digest(), with_signed.digest());
    }

    #[test]
    fn test_missing_manifest_asset() {
        let temp = TempDir::new().unwrap();
        sample_source(temp.path());
        fs::remove_file(temp.path().join("icon.png")).unwrap();
        let out = TempDir::new().unwrap();

        let err = create(&out.path().join("a"), temp.path(), Mapping::new(), Mapping::new())
            .unwrap_err();
        assert!(matches!(err, Error::MissingAsset(_)), "{err:?}");
        assert!(!out.path().join("a").exists());
    }

    #[test]
    fn test_symlinks_rejected() {
        let temp = TempDir::new().unwrap();
        sample_source(temp.path());
        std::os::unix::fs::symlink("icon.png", temp.path().join("alias.png")).unwrap();
        let out = TempDir::new().unwrap();

        let err = create(&out.path().join("a"), temp.path(), Mapping::new(), Mapping::new())
            .unwrap_err();
        assert!(err.to_string().contains("alias.png"));
    }

    #[test]
    fn test_destination_inside_source_is_skipped() {
        let temp = TempDir::new().unwrap();
        sample_source(temp.path());
        let package = temp.path().join("app.ampkg");

        create(&package, temp.path(), Mapping::new(), Mapping::new()).unwrap();
        let again = create(&package, temp.path(), Mapping::new(), Mapping::new()).unwrap();
        assert!(!again.files().iter().any(|f| f == "app.ampkg"));
    }
}
