// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use ampkg::package::creator::ContainerWriter;
use ampkg::package::metadata::{parse_footer, parse_header};
use ampkg::package::{DigestAccumulator, FOOTER_PREFIX, HEADER_NAME};
use ampkg::InstallationReport;
use flate2::read::GzDecoder;
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::x509::extension::{BasicConstraints, ExtendedKeyUsage, KeyUsage};
use openssl::x509::{X509, X509Builder, X509NameBuilder, X509NameRef};
use serde_yaml::Mapping;
use std::fs::{self, File};
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tar::EntryType;

/// Passphrase of every generated PKCS#12 bundle
pub const PASSPHRASE: &str = "correct horse";

/// A CA certificate and a PKCS#12 bundle for a leaf it issued
pub struct TestPki {
    pub ca_cert: PathBuf,
    pub credentials: PathBuf,
}

fn generate_key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

fn generate_cert(cn: &str, key: &PKey<Private>, issuer: Option<(&X509, &PKey<Private>)>) -> X509 {
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, cn).unwrap();
    let name = name.build();

    let mut serial = BigNum::new().unwrap();
    serial.rand(64, MsbOption::MAYBE_ZERO, false).unwrap();

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    builder
        .set_serial_number(&serial.to_asn1_integer().unwrap())
        .unwrap();
    builder.set_subject_name(&name).unwrap();
    let issuer_name: &X509NameRef = match issuer {
        Some((ca, _)) => ca.subject_name(),
        None => &name,
    };
    builder.set_issuer_name(issuer_name).unwrap();
    builder.set_pubkey(key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(365).unwrap())
        .unwrap();

    let (constraints, usage) = if issuer.is_none() {
        (
            BasicConstraints::new().critical().ca().build().unwrap(),
            KeyUsage::new()
                .critical()
                .key_cert_sign()
                .crl_sign()
                .build()
                .unwrap(),
        )
    } else {
        (
            BasicConstraints::new().build().unwrap(),
            KeyUsage::new().critical().digital_signature().build().unwrap(),
        )
    };
    builder.append_extension(constraints).unwrap();
    builder.append_extension(usage).unwrap();
    if issuer.is_some() {
        builder
            .append_extension(ExtendedKeyUsage::new().code_signing().build().unwrap())
            .unwrap();
    }

    let signer = issuer.map(|(_, k)| k).unwrap_or(key);
    builder.sign(signer, MessageDigest::sha256()).unwrap();
    builder.build()
}

/// Generate a CA (PEM) and a leaf certificate + key (PKCS#12) under `dir`
pub fn generate_pki(dir: &Path, name: &str) -> TestPki {
    let ca_key = generate_key();
    let ca = generate_cert(&format!("{} CA", name), &ca_key, None);
    let leaf_key = generate_key();
    let leaf = generate_cert(name, &leaf_key, Some((&ca, &ca_key)));

    let p12 = Pkcs12::builder()
        .name(name)
        .pkey(&leaf_key)
        .cert(&leaf)
        .build2(PASSPHRASE)
        .unwrap()
        .to_der()
        .unwrap();

    let ca_cert = dir.join(format!("{}-ca.pem", name));
    let credentials = dir.join(format!("{}.p12", name));
    fs::write(&ca_cert, ca.to_pem().unwrap()).unwrap();
    fs::write(&credentials, p12).unwrap();
    TestPki {
        ca_cert,
        credentials,
    }
}

/// Populate `dir` with info.yaml, icon.png and code.qml
pub fn sample_source(dir: &Path) {
    fs::create_dir_all(dir).unwrap();
    fs::write(
        dir.join("info.yaml"),
        "formatType: am-application\nformatVersion: 1\n---\nid: com.example.test\nicon: icon.png\ncode: code.qml\n",
    )
    .unwrap();
    fs::write(dir.join("icon.png"), b"\x89PNG").unwrap();
    fs::write(dir.join("code.qml"), b"// test").unwrap();
}

/// Create the sample package at `dir/test.ampkg`
pub fn sample_package(dir: &Path) -> (PathBuf, InstallationReport) {
    let source = dir.join("source");
    sample_source(&source);
    let package = dir.join("test.ampkg");
    let report =
        ampkg::package::create(&package, &source, Mapping::new(), Mapping::new()).unwrap();
    (package, report)
}

/// One archive entry held in memory
pub struct RawEntry {
    pub name: String,
    pub entry_type: EntryType,
    pub mode: u32,
    pub data: Vec<u8>,
}

/// Read every entry of a package into memory
pub fn read_entries(package: &Path) -> Vec<RawEntry> {
    let mut archive = tar::Archive::new(GzDecoder::new(File::open(package).unwrap()));
    archive
        .entries()
        .unwrap()
        .map(|entry| {
            let mut entry = entry.unwrap();
            let name = String::from_utf8(entry.path_bytes().into_owned()).unwrap();
            let entry_type = entry.header().entry_type();
            let mode = entry.header().mode().unwrap();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            RawEntry {
                name,
                entry_type,
                mode,
                data,
            }
        })
        .collect()
}

/// Digest the extractor would compute for these entries
pub fn digest_of(entries: &[RawEntry]) -> ampkg::Digest {
    let mut digest = DigestAccumulator::new();
    for entry in entries {
        if entry.name == HEADER_NAME {
            let header = parse_header(&entry.data).unwrap();
            digest
                .add_header(&header.package_id, &header.extra_signed)
                .unwrap();
        } else if entry.name.starts_with(FOOTER_PREFIX) {
            continue;
        } else if entry.entry_type == EntryType::Directory {
            digest.add_directory(entry.name.trim_end_matches('/'));
        } else {
            digest.update(&entry.data);
            digest.add_file_metadata(&entry.name, entry.data.len() as u64, entry.mode & 0o100 != 0);
        }
    }
    digest.finalize()
}

/// Rewrite a package after letting `tamper` edit its payload entries
///
/// With `fix_digest`, the main footer is rewritten to declare the digest of
/// the tampered payload; signature fragments are copied unchanged.
pub fn rebuild_package(
    source: &Path,
    destination: &Path,
    mut tamper: impl FnMut(&mut RawEntry),
    fix_digest: bool,
) {
    let mut entries = read_entries(source);
    for entry in entries.iter_mut() {
        if entry.name != HEADER_NAME && !entry.name.starts_with(FOOTER_PREFIX) {
            tamper(entry);
        }
    }
    let digest = digest_of(&entries);

    let mut writer = ContainerWriter::new(File::create(destination).unwrap());
    for entry in &entries {
        if fix_digest && entry.name == FOOTER_PREFIX {
            let mut footer = parse_footer(&entry.data).unwrap();
            footer.digest = digest;
            writer.append_footer(&footer).unwrap();
        } else {
            writer
                .append_entry(
                    &entry.name,
                    entry.entry_type,
                    entry.mode,
                    entry.data.len() as u64,
                    entry.data.as_slice(),
                )
                .unwrap();
        }
    }
    writer.finish().unwrap();
}

/// Whether a file has its owner-execute bit set
pub fn is_executable(path: &Path) -> bool {
    fs::metadata(path).unwrap().permissions().mode() & 0o100 != 0
}
