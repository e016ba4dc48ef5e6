// src/error.rs

//! Error types for package creation, extraction, signing and verification

use std::fmt;
use std::io;
use thiserror::Error;

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, Error>;

/// All failures surfaced by the public package operations
#[derive(Error, Debug)]
pub enum Error {
    /// Open/read/write failure on a local file
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Transport failure while streaming a download
    #[error("network error: {0}")]
    Network(String),

    /// Malformed container or metadata (names the offending entry or field)
    #[error("format error: {0}")]
    Format(String),

    /// Metadata document carries a version this implementation does not read
    #[error("unsupported {format_type} format version: {version}")]
    UnsupportedFormatVersion { format_type: String, version: i64 },

    /// Archive entry tried to escape the destination root
    #[error("security violation: {0}")]
    Security(String),

    /// Digest recomputed from the payload differs from the footer's digest
    #[error("package digest mismatch: computed {computed}, package declares {declared}")]
    DigestMismatch { computed: String, declared: String },

    /// Source directory lacks a file the manifest references
    #[error("missing asset: {0}")]
    MissingAsset(String),

    /// PKCS#12 file could not be opened with the given passphrase
    #[error("invalid signing credentials: {0}")]
    InvalidCredentials(String),

    /// Crypto backend failed while producing a signature
    #[error("signing failed: {0}")]
    Signing(String),

    /// Package carries no signature of the requested kind
    #[error("package has no {0} signature")]
    NotSigned(&'static str),

    /// Signature does not verify against the recomputed digest
    #[error("signature invalid: {0}")]
    SignatureInvalid(String),

    /// Signer certificate does not chain up to a supplied CA
    #[error("untrusted certificate chain: {0}")]
    UntrustedChain(String),

    /// Store signature is bound to a different hardware id
    #[error("hardware id mismatch: package is bound to '{bound}', expected '{expected}'")]
    HardwareIdMismatch { bound: String, expected: String },

    /// Operation stopped because cancellation was requested
    #[error("operation canceled")]
    Canceled,
}

/// Coarse error categories, as presented to users
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    IoError,
    NetworkError,
    FormatError,
    SecurityError,
    DigestMismatch,
    SigningError,
    VerificationError,
    Canceled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::IoError => "io",
            ErrorKind::NetworkError => "network",
            ErrorKind::FormatError => "format",
            ErrorKind::SecurityError => "security",
            ErrorKind::DigestMismatch => "digest-mismatch",
            ErrorKind::SigningError => "signing",
            ErrorKind::VerificationError => "verification",
            ErrorKind::Canceled => "canceled",
        };
        f.write_str(name)
    }
}

impl Error {
    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) => ErrorKind::IoError,
            Error::Network(_) => ErrorKind::NetworkError,
            Error::Format(_) | Error::UnsupportedFormatVersion { .. } | Error::MissingAsset(_) => {
                ErrorKind::FormatError
            }
            Error::Security(_) => ErrorKind::SecurityError,
            Error::DigestMismatch { .. } => ErrorKind::DigestMismatch,
            Error::InvalidCredentials(_) | Error::Signing(_) => ErrorKind::SigningError,
            Error::NotSigned(_)
            | Error::SignatureInvalid(_)
            | Error::UntrustedChain(_)
            | Error::HardwareIdMismatch { .. } => ErrorKind::VerificationError,
            Error::Canceled => ErrorKind::Canceled,
        }
    }

    /// Whether this is a cancellation rather than a failure
    pub fn is_canceled(&self) -> bool {
        matches!(self, Error::Canceled)
    }

    /// Recover a crate error that was tunnelled through an `io::Error`
    ///
    /// Byte sources hand their failures to the archive reader as `io::Error`s;
    /// this unwraps them again so a network failure stays a network failure.
    pub(crate) fn from_io_tunnel(err: io::Error) -> Self {
        if err.get_ref().is_some_and(|inner| inner.is::<Error>()) {
            if let Some(inner) = err.into_inner() {
                return match inner.downcast::<Error>() {
                    Ok(original) => *original,
                    Err(other) => Error::Io(io::Error::other(other)),
                };
            }
            return Error::Io(io::Error::other("lost tunnelled error"));
        }
        Error::Io(err)
    }

    /// Wrap this error so it can travel through an `io::Read` implementation
    pub(crate) fn into_io_tunnel(self) -> io::Error {
        io::Error::other(self)
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Format(format!("YAML: {}", err))
    }
}

impl From<walkdir::Error> for Error {
    fn from(err: walkdir::Error) -> Self {
        match err.into_io_error() {
            Some(io_err) => Error::Io(io_err),
            None => Error::Format("filesystem loop in source directory".to_string()),
        }
    }
}
