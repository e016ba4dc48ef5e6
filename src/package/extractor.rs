// src/package/extractor.rs

//! Streaming package extractor
//!
//! Pulls a package from a [`ByteSource`] through the gzip and tar decoders,
//! one archive entry at a time, and installs the payload below a destination
//! root while recomputing the package digest. Nothing is buffered whole:
//! file content goes straight from the decoder to disk and into the digest.
//!
//! Entries are handled strictly in archive order:
//! - the header is parsed before the destination root is even created
//! - payload targets are confined to the destination root
//! - footer fragments are collected and parsed only after the archive ends
//!
//! Files written before a failure or cancellation are left on disk; callers
//! that need all-or-nothing semantics remove them using the destination root.

use crate::config::ExtractorConfig;
use crate::error::{Error, Result};
use crate::filesystem::{confine_to_root, sanitize_entry_path};
use crate::package::digest::DigestAccumulator;
use crate::package::entry::{EntryKind, classify};
use crate::package::metadata::{self, HeaderMetadata};
use crate::package::report::InstallationReport;
use crate::package::source::{ByteSource, SourceReader};
use crate::package::{CancelHandle, FOOTER_PREFIX, HEADER_NAME};
use crate::progress::{ProgressObserver, ProgressReporter};
use flate2::read::GzDecoder;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Where an extraction job currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionState {
    Idle,
    Reading,
    ParsingHeader,
    ExtractingEntries,
    ParsingFooter,
    VerifyingDigest,
    Done,
    Failed,
    Canceled,
}

/// Installs one package from a byte stream
///
/// ```no_run
/// use ampkg::package::{FileSource, StreamingExtractor};
/// use std::path::Path;
///
/// let mut extractor = StreamingExtractor::new("/opt/apps/com.example.app");
/// let report = extractor.extract(FileSource::open(Path::new("app.ampkg"))?)?;
/// println!("installed {} files", report.files().len());
/// # Ok::<(), ampkg::Error>(())
/// ```
pub struct StreamingExtractor {
    destination: PathBuf,
    config: ExtractorConfig,
    cancel: CancelHandle,
    observer: Option<Box<dyn ProgressObserver>>,
    state: ExtractionState,
}

impl fmt::Debug for StreamingExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingExtractor")
            .field("destination", &self.destination)
            .field("config", &self.config)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl StreamingExtractor {
    /// Extractor installing below `destination` (created if missing)
    pub fn new(destination: impl Into<PathBuf>) -> Self {
        Self {
            destination: destination.into(),
            config: ExtractorConfig::default(),
            cancel: CancelHandle::new(),
            observer: None,
            state: ExtractionState::Idle,
        }
    }

    pub fn with_config(mut self, config: ExtractorConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a cancellation flag with the caller
    pub fn with_cancel_handle(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, observer: Box<dyn ProgressObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Handle that cancels this extractor from any thread
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn state(&self) -> ExtractionState {
        self.state
    }

    /// Run the extraction to completion
    ///
    /// Returns [`Error::Canceled`] (never a failure) once the cancel handle
    /// is set, at the next read from `source`.
    pub fn extract<S: ByteSource>(&mut self, source: S) -> Result<InstallationReport> {
        let mut progress = match self.observer.take() {
            Some(observer) => ProgressReporter::new(observer, self.config.progress_steps),
            None => ProgressReporter::silent(),
        };
        self.state = ExtractionState::Reading;

        let result = match self.run(source, &mut progress) {
            Err(e) if !e.is_canceled() && self.cancel.is_canceled() => {
                debug!("Error after cancellation: {}", e);
                Err(Error::Canceled)
            }
            other => other,
        };

        self.state = match &result {
            Ok(_) => {
                progress.finish();
                ExtractionState::Done
            }
            Err(e) if e.is_canceled() => {
                info!("Extraction to {} canceled", self.destination.display());
                ExtractionState::Canceled
            }
            Err(e) => {
                warn!("Extraction to {} failed: {}", self.destination.display(), e);
                ExtractionState::Failed
            }
        };
        self.observer = Some(progress.into_observer());
        result
    }

    fn run<S: ByteSource>(
        &mut self,
        source: S,
        progress: &mut ProgressReporter,
    ) -> Result<InstallationReport> {
        let length = source.length_hint();
        let consumed = Arc::new(AtomicU64::new(0));
        let reader = SourceReader::new(
            source,
            self.cancel.clone(),
            self.config.poll_interval(),
            consumed.clone(),
        );
        let mut archive = tar::Archive::new(GzDecoder::new(reader));

        let mut job = Job {
            destination: &self.destination,
            root: None,
            config: &self.config,
            cancel: &self.cancel,
            state: &mut self.state,
            progress,
            consumed,
            length,
            digest: DigestAccumulator::new(),
            header: None,
            footer: Vec::new(),
            seen_footer: false,
            files: Vec::new(),
            entries: 0,
        };

        let entries = archive.entries().map_err(|e| job.archive_error(e))?;
        for entry in entries {
            let mut entry = entry.map_err(|e| job.archive_error(e))?;
            job.process(&mut entry)?;
        }
        job.finish()
    }
}

/// Extract `source` below `destination` with default settings
pub fn extract<S: ByteSource>(source: S, destination: &Path) -> Result<InstallationReport> {
    StreamingExtractor::new(destination).extract(source)
}

/// State owned by one extraction run
struct Job<'a> {
    destination: &'a Path,
    /// Canonical destination, created once the header has been accepted
    root: Option<PathBuf>,
    config: &'a ExtractorConfig,
    cancel: &'a CancelHandle,
    state: &'a mut ExtractionState,
    progress: &'a mut ProgressReporter,
    consumed: Arc<AtomicU64>,
    length: Option<u64>,
    digest: DigestAccumulator,
    header: Option<HeaderMetadata>,
    footer: Vec<u8>,
    seen_footer: bool,
    files: Vec<String>,
    entries: u64,
}

impl Job<'_> {
    /// Map a decoder error back to what actually went wrong
    fn archive_error(&self, err: io::Error) -> Error {
        if self.cancel.is_canceled() {
            return Error::Canceled;
        }
        match Error::from_io_tunnel(err) {
            Error::Io(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::InvalidData
                        | io::ErrorKind::InvalidInput
                        | io::ErrorKind::UnexpectedEof
                        | io::ErrorKind::Other
                ) =>
            {
                Error::Format(format!("corrupt package archive: {}", e))
            }
            other => other,
        }
    }

    fn process<R: Read>(&mut self, entry: &mut tar::Entry<'_, R>) -> Result<()> {
        if self.cancel.is_canceled() {
            return Err(Error::Canceled);
        }

        let name = entry_name(entry)?;
        let entry_type = entry.header().entry_type();
        match classify(&name, entry_type, self.header.is_some(), self.seen_footer)? {
            EntryKind::Header => self.read_header(entry)?,
            EntryKind::Footer => self.read_footer_fragment(entry, &name)?,
            EntryKind::Directory(path) => self.create_directory(&path)?,
            EntryKind::File(path) => self.write_file(entry, &path)?,
        }

        self.entries += 1;
        self.report_progress();
        Ok(())
    }

    fn root(&self) -> Result<&Path> {
        self.root
            .as_deref()
            .ok_or_else(|| Error::Format(format!("payload entry before {}", HEADER_NAME)))
    }

    fn read_header<R: Read>(&mut self, entry: &mut R) -> Result<()> {
        *self.state = ExtractionState::ParsingHeader;
        let bytes = self.read_metadata(entry, 0, HEADER_NAME)?;
        let header = metadata::parse_header(&bytes)?;
        self.digest
            .add_header(&header.package_id, &header.extra_signed)?;

        fs::create_dir_all(self.destination)?;
        let root = self.destination.canonicalize()?;
        info!("Extracting {} to {}", header.package_id, root.display());
        self.root = Some(root);
        self.header = Some(header);
        *self.state = ExtractionState::ExtractingEntries;
        Ok(())
    }

    fn read_footer_fragment<R: Read>(&mut self, entry: &mut R, name: &str) -> Result<()> {
        self.seen_footer = true;
        let bytes = self.read_metadata(entry, self.footer.len(), name)?;
        debug!("Footer fragment {} ({} bytes)", name, bytes.len());

        if !self.footer.is_empty() && !self.footer.ends_with(b"\n") {
            self.footer.push(b'\n');
        }
        self.footer.extend_from_slice(&bytes);
        Ok(())
    }

    /// Read a metadata entry, bounded by the configured maximum
    fn read_metadata<R: Read>(&self, entry: &mut R, already: usize, name: &str) -> Result<Vec<u8>> {
        let limit = self.config.max_metadata_size.saturating_sub(already);
        let mut bytes = Vec::new();
        entry
            .by_ref()
            .take(limit as u64 + 1)
            .read_to_end(&mut bytes)
            .map_err(|e| self.archive_error(e))?;

        if bytes.len() > limit {
            return Err(Error::Format(format!(
                "metadata entry '{}' exceeds {} bytes",
                name, self.config.max_metadata_size
            )));
        }
        Ok(bytes)
    }

    fn create_directory(&mut self, path: &str) -> Result<()> {
        if !path.is_empty() && Path::new(path).components().all(|c| c == Component::CurDir) {
            return Ok(());
        }

        let relative = normalized(path)?;
        let target = confine_to_root(self.root()?, path)?;
        match fs::symlink_metadata(&target) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(Error::Format(format!(
                    "'{}' already exists and is not a directory",
                    relative
                )));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => fs::create_dir(&target)?,
            Err(e) => return Err(e.into()),
        }

        debug!("Created directory {}", relative);
        self.digest.add_directory(&relative);
        self.files.push(format!("{}/", relative));
        Ok(())
    }

    fn write_file<R: Read>(&mut self, entry: &mut tar::Entry<'_, R>, path: &str) -> Result<()> {
        let relative = normalized(path)?;
        let target = confine_to_root(self.root()?, path)?;
        let executable = entry
            .header()
            .mode()
            .map_err(|e| self.archive_error(e))?
            & 0o100
            != 0;

        let mut file = File::create(&target)?;
        let mut buf = vec![0u8; self.config.buffer_size.max(512)];
        loop {
            let n = entry.read(&mut buf).map_err(|e| self.archive_error(e))?;
            if n == 0 {
                break;
            }
            self.digest.update(&buf[..n]);
            file.write_all(&buf[..n])?;
            self.report_progress();
        }
        drop(file);

        let mode = if executable { 0o755 } else { 0o644 };
        fs::set_permissions(&target, fs::Permissions::from_mode(mode))?;

        // Record what landed on disk, not what the archive claimed
        let meta = fs::metadata(&target)?;
        self.digest.add_file_metadata(
            &relative,
            meta.len(),
            meta.permissions().mode() & 0o100 != 0,
        );

        debug!("Extracted {} ({} bytes)", relative, meta.len());
        self.files.push(relative);
        Ok(())
    }

    fn report_progress(&mut self) {
        let fraction = match self.length {
            Some(len) if len > 0 => self.consumed.load(Ordering::Relaxed) as f64 / len as f64,
            _ => 1.0 - 1.0 / (self.entries as f64 + 1.0),
        };
        self.progress.report(fraction);
    }

    fn finish(self) -> Result<InstallationReport> {
        let header = self.header.ok_or_else(|| {
            Error::Format(format!("package contains no {} entry", HEADER_NAME))
        })?;
        if !self.seen_footer {
            return Err(Error::Format(format!(
                "package contains no {} entry",
                FOOTER_PREFIX
            )));
        }

        *self.state = ExtractionState::ParsingFooter;
        let footer = metadata::parse_footer(&self.footer)?;

        *self.state = ExtractionState::VerifyingDigest;
        let computed = self.digest.finalize();
        if computed != footer.digest {
            return Err(Error::DigestMismatch {
                computed: computed.to_hex(),
                declared: footer.digest.to_hex(),
            });
        }

        info!(
            "Extracted {} ({} entries, digest {})",
            header.package_id,
            self.files.len(),
            computed
        );
        Ok(InstallationReport::new(
            header,
            self.files,
            computed,
            footer.developer_signature,
            footer.store_signature,
        ))
    }
}

fn entry_name<R: Read>(entry: &tar::Entry<'_, R>) -> Result<String> {
    let bytes = entry.path_bytes();
    std::str::from_utf8(&bytes)
        .map(str::to_owned)
        .map_err(|_| {
            Error::Format(format!(
                "entry name is not valid UTF-8: {}",
                String::from_utf8_lossy(&bytes)
            ))
        })
}

fn normalized(path: &str) -> Result<String> {
    Ok(sanitize_entry_path(path)?.to_string_lossy().into_owned())
}
