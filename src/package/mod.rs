// src/package/mod.rs
//! Application package container format
//!
//! A package is one gzip-compressed tar stream:
//!
//! ```text
//! --PACKAGE-HEADER--                  YAML: format gate + id, disk usage, extra metadata
//! <payload directories and files>     installed verbatim below the destination root
//! --PACKAGE-FOOTER--                  YAML: format gate + digest
//! --PACKAGE-FOOTER--<fragment>...     YAML documents appended later (signatures)
//! ```
//!
//! This module implements:
//! - Header/footer metadata codec
//! - Digest accumulation shared by creation and extraction
//! - Entry classification and layout rules
//! - Streaming extraction from local files or live downloads
//! - Package creation from a source directory
//! - Developer and store signing and verification

pub mod creator;
pub mod digest;
pub mod entry;
pub mod extractor;
pub mod manifest;
pub mod metadata;
pub mod report;
pub mod signing;
pub mod source;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub use creator::{ContainerWriter, PackageCreator, create};
pub use digest::{Digest, DigestAccumulator};
pub use entry::{EntryKind, classify};
pub use extractor::{ExtractionState, StreamingExtractor, extract};
pub use manifest::PackageManifest;
pub use metadata::{FooterMetadata, HeaderMetadata, SignatureKind};
pub use report::InstallationReport;
pub use signing::{
    SigningCredentials, developer_sign, developer_verify, store_sign, store_verify, verify_digest,
};
pub use source::{
    ByteSource, ChannelFeeder, ChannelSource, FileSource, HttpSource, ReadOutcome, ReaderSource,
};

/// Name of the mandatory first entry
pub const HEADER_NAME: &str = "--PACKAGE-HEADER--";
/// Prefix shared by all footer fragments
pub const FOOTER_PREFIX: &str = "--PACKAGE-FOOTER--";
/// Entry names starting with this are reserved for metadata
pub const RESERVED_PREFIX: &str = "--";

/// Cooperative cancellation flag, settable from any thread
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; the job stops at its next suspension point
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
