// src/lib.rs

//! ampkg: application package container
//!
//! Creates, installs, signs and verifies application packages: one
//! gzip-compressed tar stream carrying a YAML header, the payload, and a
//! footer with the package digest and its signatures.
//!
//! # Architecture
//!
//! - Streaming: packages are extracted while they download, never buffered whole
//! - Digest-first: every entry feeds one SHA-256 digest, recomputed on install
//! - Two-tier trust: developer signature, then a store signature bound to a device
//! - Confinement: no payload entry can land outside the destination root

pub mod config;
mod error;
pub mod filesystem;
pub mod package;
pub mod progress;

pub use config::PackagerConfig;
pub use error::{Error, ErrorKind, Result};
pub use package::{
    ByteSource, CancelHandle, Digest, ExtractionState, InstallationReport, StreamingExtractor,
};
pub use progress::{CallbackProgress, LogProgress, ProgressObserver, SilentProgress};
