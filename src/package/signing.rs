// src/package/signing.rs
//! Developer and store signatures
//!
//! Signatures never cover archive bytes directly; they cover the package
//! digest, which both signing and verification re-derive by running a full
//! extraction into a scratch directory.
//!
//! - Developer signature: detached PKCS#7 over the 32 digest bytes
//! - Store signature: PKCS#7 embedding `digest || hardware id`, so the
//!   device binding can be read back from a verified signature
//!
//! Verification checks, in order: the signature itself, that it covers the
//! recomputed digest, the hardware id (store only), then the certificate
//! chain against the caller's CA list.

use crate::error::{Error, Result};
use crate::package::creator::ContainerWriter;
use crate::package::digest::{DIGEST_LEN, Digest};
use crate::package::extractor::StreamingExtractor;
use crate::package::metadata::SignatureKind;
use crate::package::report::InstallationReport;
use crate::package::source::FileSource;
use flate2::read::GzDecoder;
use openssl::pkcs12::Pkcs12;
use openssl::pkcs7::{Pkcs7, Pkcs7Flags};
use openssl::pkey::{PKey, Private};
use openssl::stack::Stack;
use openssl::x509::store::X509StoreBuilder;
use openssl::x509::{X509, X509PurposeId};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, TempDir};
use tracing::{debug, info};

/// Private key and certificate chain loaded from a PKCS#12 bundle
pub struct SigningCredentials {
    key: PKey<Private>,
    certificate: X509,
    chain: Stack<X509>,
}

impl std::fmt::Debug for SigningCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningCredentials")
            .field("subject", &self.certificate.subject_name())
            .finish_non_exhaustive()
    }
}

impl SigningCredentials {
    /// Open a DER-encoded PKCS#12 bundle
    pub fn from_pkcs12(der: &[u8], passphrase: &str) -> Result<Self> {
        let parsed = Pkcs12::from_der(der)
            .map_err(|e| Error::InvalidCredentials(format!("not a PKCS#12 file: {}", e)))?
            .parse2(passphrase)
            .map_err(|e| {
                Error::InvalidCredentials(format!(
                    "cannot open PKCS#12 bundle (wrong passphrase?): {}",
                    e
                ))
            })?;

        let key = parsed
            .pkey
            .ok_or_else(|| Error::InvalidCredentials("PKCS#12 bundle has no private key".into()))?;
        let certificate = parsed
            .cert
            .ok_or_else(|| Error::InvalidCredentials("PKCS#12 bundle has no certificate".into()))?;
        let chain = match parsed.ca {
            Some(chain) => chain,
            None => Stack::new().map_err(|e| Error::Signing(e.to_string()))?,
        };

        Ok(Self {
            key,
            certificate,
            chain,
        })
    }

    pub fn from_file(path: &Path, passphrase: &str) -> Result<Self> {
        let der = std::fs::read(path)?;
        Self::from_pkcs12(&der, passphrase)
    }

    pub fn certificate(&self) -> &X509 {
        &self.certificate
    }

    fn sign(&self, data: &[u8], flags: Pkcs7Flags) -> Result<Vec<u8>> {
        Pkcs7::sign(&self.certificate, &self.key, &self.chain, data, flags)
            .and_then(|p7| p7.to_der())
            .map_err(|e| Error::Signing(e.to_string()))
    }

    /// Detached developer signature over `digest`
    pub fn sign_developer(&self, digest: &Digest) -> Result<Vec<u8>> {
        self.sign(digest.as_bytes(), Pkcs7Flags::BINARY | Pkcs7Flags::DETACHED)
    }

    /// Store signature binding `digest` to `hardware_id`
    pub fn sign_store(&self, digest: &Digest, hardware_id: &str) -> Result<Vec<u8>> {
        let mut content = digest.as_bytes().to_vec();
        content.extend_from_slice(hardware_id.as_bytes());
        self.sign(&content, Pkcs7Flags::BINARY)
    }
}

/// Load CA certificates from PEM (possibly several per file) or DER files
pub fn load_ca_certificates<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<X509>> {
    let mut certs = Vec::new();
    for path in paths {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let loaded = match X509::stack_from_pem(&bytes) {
            Ok(stack) if !stack.is_empty() => stack,
            _ => vec![X509::from_der(&bytes).map_err(|e| {
                Error::Format(format!(
                    "{} is not a PEM or DER certificate: {}",
                    path.display(),
                    e
                ))
            })?],
        };
        debug!("Loaded {} CA certificate(s) from {}", loaded.len(), path.display());
        certs.extend(loaded);
    }
    Ok(certs)
}

/// Check a developer signature against a recomputed digest
pub fn verify_developer_signature(signature: &[u8], digest: &Digest, ca: &[X509]) -> Result<()> {
    let p7 = parse_signature(signature)?;
    let signed = open_signature(&p7, Some(digest.as_bytes()))?;
    if signed != digest.as_bytes() {
        return Err(Error::SignatureInvalid(
            "developer signature does not cover the package digest".into(),
        ));
    }
    check_chain(&p7, Some(digest.as_bytes()), ca, "developer")
}

/// Check a store signature against a recomputed digest and the device's hardware id
pub fn verify_store_signature(
    signature: &[u8],
    digest: &Digest,
    hardware_id: &str,
    ca: &[X509],
) -> Result<()> {
    let p7 = parse_signature(signature)?;
    let signed = open_signature(&p7, None)?;
    if signed.len() < DIGEST_LEN || &signed[..DIGEST_LEN] != digest.as_bytes() {
        return Err(Error::SignatureInvalid(
            "store signature does not cover the package digest".into(),
        ));
    }

    let bound = String::from_utf8_lossy(&signed[DIGEST_LEN..]);
    if bound != hardware_id {
        return Err(Error::HardwareIdMismatch {
            bound: bound.into_owned(),
            expected: hardware_id.to_string(),
        });
    }
    check_chain(&p7, None, ca, "store")
}

fn parse_signature(signature: &[u8]) -> Result<Pkcs7> {
    Pkcs7::from_der(signature)
        .map_err(|e| Error::SignatureInvalid(format!("malformed PKCS#7 signature: {}", e)))
}

/// Verify the signature without a trust anchor and return the signed content
fn open_signature(p7: &Pkcs7, detached: Option<&[u8]>) -> Result<Vec<u8>> {
    let no_certs: Stack<X509> =
        Stack::new().map_err(|e| Error::SignatureInvalid(e.to_string()))?;
    let no_trust = X509StoreBuilder::new()
        .map_err(|e| Error::SignatureInvalid(e.to_string()))?
        .build();

    let mut content = Vec::new();
    p7.verify(
        &no_certs,
        &no_trust,
        detached,
        Some(&mut content),
        Pkcs7Flags::NOVERIFY | Pkcs7Flags::BINARY,
    )
    .map_err(|e| Error::SignatureInvalid(e.to_string()))?;
    Ok(content)
}

fn check_chain(p7: &Pkcs7, detached: Option<&[u8]>, ca: &[X509], label: &str) -> Result<()> {
    if ca.is_empty() {
        return Err(Error::UntrustedChain(format!(
            "no CA certificates given to check the {} signature",
            label
        )));
    }

    let mut store = X509StoreBuilder::new().map_err(|e| Error::UntrustedChain(e.to_string()))?;
    for cert in ca {
        store
            .add_cert(cert.clone())
            .map_err(|e| Error::UntrustedChain(e.to_string()))?;
    }
    // PKCS7_verify otherwise demands an S/MIME signing purpose
    store
        .set_purpose(X509PurposeId::ANY)
        .map_err(|e| Error::UntrustedChain(e.to_string()))?;
    let store = store.build();
    let no_certs: Stack<X509> =
        Stack::new().map_err(|e| Error::UntrustedChain(e.to_string()))?;

    p7.verify(&no_certs, &store, detached, None, Pkcs7Flags::BINARY)
        .map_err(|e| {
            Error::UntrustedChain(format!(
                "{} certificate is not issued by a trusted CA: {}",
                label, e
            ))
        })
}

/// Extract `source` into a scratch directory and return the verified report
fn inspect(source: &Path) -> Result<InstallationReport> {
    let scratch = TempDir::new()?;
    let mut extractor = StreamingExtractor::new(scratch.path());
    let report = extractor.extract(FileSource::open(source)?)?;
    debug!(
        "Verified digest of {}: {}",
        source.display(),
        report.digest()
    );
    Ok(report)
}

/// Recompute the digest of a package file and check it against its footer
pub fn verify_digest(source: &Path) -> Result<Digest> {
    inspect(source).map(|report| *report.digest())
}

/// Copy every entry of `source` to `destination`, then append a signature fragment
fn append_signature(
    source: &Path,
    destination: &Path,
    kind: SignatureKind,
    signature: &[u8],
) -> Result<()> {
    let dir = destination
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let staged = NamedTempFile::new_in(dir)?;

    let mut archive = tar::Archive::new(GzDecoder::new(BufReader::new(File::open(source)?)));
    let mut writer = ContainerWriter::new(BufWriter::new(staged.reopen()?));
    for entry in archive.entries()? {
        let mut entry = entry?;
        let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let entry_type = entry.header().entry_type();
        let mode = entry.header().mode()?;
        let size = entry.header().size()?;
        writer.append_entry(&name, entry_type, mode, size, &mut entry)?;
    }
    writer.append_signature(kind, signature)?;
    writer
        .finish()?
        .into_inner()
        .map_err(|e| Error::Io(e.into_error()))?
        .sync_all()?;

    staged
        .persist(destination)
        .map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Sign `source` with a developer certificate and write the result to `destination`
pub fn developer_sign(
    source: &Path,
    destination: &Path,
    cert_file: &Path,
    passphrase: &str,
) -> Result<()> {
    let credentials = SigningCredentials::from_file(cert_file, passphrase)?;
    debug!(
        "Developer certificate: {:?}",
        credentials.certificate().subject_name()
    );
    let report = inspect(source)?;
    let signature = credentials.sign_developer(report.digest())?;
    append_signature(source, destination, SignatureKind::Developer, &signature)?;
    info!(
        "Developer-signed {} as {}",
        report.package_id(),
        destination.display()
    );
    Ok(())
}

/// Verify the developer signature of `source` against the given CA certificates
pub fn developer_verify(source: &Path, ca_files: &[PathBuf]) -> Result<()> {
    let ca = load_ca_certificates(ca_files)?;
    let report = inspect(source)?;
    let signature = report
        .developer_signature()
        .ok_or(Error::NotSigned(SignatureKind::Developer.label()))?;
    verify_developer_signature(signature, report.digest(), &ca)?;
    info!("Developer signature of {} is valid", report.package_id());
    Ok(())
}

/// Store-sign `source` for one device and write the result to `destination`
pub fn store_sign(
    source: &Path,
    destination: &Path,
    cert_file: &Path,
    passphrase: &str,
    hardware_id: &str,
) -> Result<()> {
    let credentials = SigningCredentials::from_file(cert_file, passphrase)?;
    debug!(
        "Store certificate: {:?}",
        credentials.certificate().subject_name()
    );
    let report = inspect(source)?;
    let signature = credentials.sign_store(report.digest(), hardware_id)?;
    append_signature(source, destination, SignatureKind::Store, &signature)?;
    info!(
        "Store-signed {} for hardware id '{}' as {}",
        report.package_id(),
        hardware_id,
        destination.display()
    );
    Ok(())
}

/// Verify the store signature of `source` for the device `hardware_id`
pub fn store_verify(source: &Path, ca_files: &[PathBuf], hardware_id: &str) -> Result<()> {
    let ca = load_ca_certificates(ca_files)?;
    let report = inspect(source)?;
    let signature = report
        .store_signature()
        .ok_or(Error::NotSigned(SignatureKind::Store.label()))?;
    verify_store_signature(signature, report.digest(), hardware_id, &ca)?;
    info!("Store signature of {} is valid", report.package_id());
    Ok(())
}
