// src/package/metadata.rs

//! Header and footer metadata codec
//!
//! Both metadata entries are multi-document YAML streams. The first document
//! is a format gate (`formatType` + `formatVersion`); the remaining documents
//! carry the data. Footers may span several archive entries: later parties
//! append extra documents, and keys in later documents override earlier ones.

use crate::error::{Error, Result};
use crate::package::digest::Digest;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};

/// `formatType` of the header entry
pub const HEADER_FORMAT_TYPE: &str = "am-package-header";
/// `formatType` of the footer entry
pub const FOOTER_FORMAT_TYPE: &str = "am-package-footer";

/// Header versions this codec reads; v1 names the id `applicationId`
pub const HEADER_FORMAT_VERSIONS: &[i64] = &[1, 2];
/// Footer versions this codec reads
pub const FOOTER_FORMAT_VERSIONS: &[i64] = &[1, 2];

/// Header version written by this codec
pub const CURRENT_HEADER_VERSION: i64 = 2;
/// Footer version written by this codec
pub const CURRENT_FOOTER_VERSION: i64 = 2;

const KEY_DIGEST: &str = "digest";
const KEY_DEVELOPER_SIGNATURE: &str = "developerSignature";
const KEY_STORE_SIGNATURE: &str = "storeSignature";

/// Parsed `--PACKAGE-HEADER--` entry
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderMetadata {
    pub format_version: i64,
    pub package_id: String,
    pub disk_space_used: u64,
    /// Free-form metadata, not covered by the digest
    pub extra: Mapping,
    /// Free-form metadata covered by the digest
    pub extra_signed: Mapping,
}

impl HeaderMetadata {
    pub fn new(package_id: impl Into<String>, disk_space_used: u64) -> Self {
        Self {
            format_version: CURRENT_HEADER_VERSION,
            package_id: package_id.into(),
            disk_space_used,
            extra: Mapping::new(),
            extra_signed: Mapping::new(),
        }
    }
}

/// Merged `--PACKAGE-FOOTER--*` entries
#[derive(Debug, Clone, PartialEq)]
pub struct FooterMetadata {
    pub digest: Digest,
    pub developer_signature: Option<Vec<u8>>,
    pub store_signature: Option<Vec<u8>>,
}

impl FooterMetadata {
    pub fn new(digest: Digest) -> Self {
        Self {
            digest,
            developer_signature: None,
            store_signature: None,
        }
    }
}

/// Split a YAML stream into its documents
pub fn parse_documents(bytes: &[u8]) -> Result<Vec<Value>> {
    serde_yaml::Deserializer::from_slice(bytes)
        .map(Value::deserialize)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)
}

/// Check the format-gate document and return the version it declares
pub(crate) fn check_format_gate(doc: &Value, format_type: &str, accepted: &[i64]) -> Result<i64> {
    let map = doc.as_mapping().ok_or_else(|| {
        Error::Format(format!("{}: first document is not a mapping", format_type))
    })?;

    match map.get("formatType").and_then(Value::as_str) {
        Some(found) if found == format_type => {}
        Some(found) => {
            return Err(Error::Format(format!(
                "formatType is '{}', expected '{}'",
                found, format_type
            )));
        }
        None => {
            return Err(Error::Format(format!(
                "{}: missing formatType",
                format_type
            )));
        }
    }

    let version = map
        .get("formatVersion")
        .and_then(Value::as_i64)
        .ok_or_else(|| Error::Format(format!("{}: missing formatVersion", format_type)))?;

    if !accepted.contains(&version) {
        return Err(Error::UnsupportedFormatVersion {
            format_type: format_type.to_string(),
            version,
        });
    }
    Ok(version)
}

/// Read an optional mapping field; `null` counts as empty
fn optional_mapping(map: &Mapping, key: &str) -> Result<Mapping> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(Mapping::new()),
        Some(Value::Mapping(m)) => Ok(m.clone()),
        Some(_) => Err(Error::Format(format!("header field '{}' is not a map", key))),
    }
}

fn format_gate(format_type: &str, version: i64) -> Mapping {
    let mut gate = Mapping::new();
    gate.insert("formatType".into(), format_type.into());
    gate.insert("formatVersion".into(), version.into());
    gate
}

/// Parse the header entry's bytes
pub fn parse_header(bytes: &[u8]) -> Result<HeaderMetadata> {
    let docs = parse_documents(bytes)?;
    if docs.len() < 2 {
        return Err(Error::Format(format!(
            "package header must contain 2 YAML documents, found {}",
            docs.len()
        )));
    }

    let format_version = check_format_gate(&docs[0], HEADER_FORMAT_TYPE, HEADER_FORMAT_VERSIONS)?;

    let map = docs[1]
        .as_mapping()
        .ok_or_else(|| Error::Format("package header data is not a mapping".to_string()))?;

    let id_key = if format_version == 1 {
        "applicationId"
    } else {
        "packageId"
    };
    let package_id = map
        .get(id_key)
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Error::Format(format!("package header: missing or empty '{}'", id_key)))?
        .to_string();

    let disk_space_used = map
        .get("diskSpaceUsed")
        .and_then(Value::as_u64)
        .filter(|used| *used > 0)
        .ok_or_else(|| {
            Error::Format("package header: 'diskSpaceUsed' must be a positive integer".to_string())
        })?;

    Ok(HeaderMetadata {
        format_version,
        package_id,
        disk_space_used,
        extra: optional_mapping(map, "extra")?,
        extra_signed: optional_mapping(map, "extraSigned")?,
    })
}

/// Serialize a header in the current format version
pub fn serialize_header(header: &HeaderMetadata) -> Result<Vec<u8>> {
    let mut data = Mapping::new();
    data.insert("packageId".into(), header.package_id.clone().into());
    data.insert("diskSpaceUsed".into(), header.disk_space_used.into());
    if !header.extra.is_empty() {
        data.insert("extra".into(), Value::Mapping(header.extra.clone()));
    }
    if !header.extra_signed.is_empty() {
        data.insert(
            "extraSigned".into(),
            Value::Mapping(header.extra_signed.clone()),
        );
    }

    let mut out = serde_yaml::to_string(&format_gate(HEADER_FORMAT_TYPE, CURRENT_HEADER_VERSION))?;
    out.push_str("---\n");
    out.push_str(&serde_yaml::to_string(&data)?);
    Ok(out.into_bytes())
}

fn decode_signature(map: &Mapping, key: &str) -> Result<Option<Vec<u8>>> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => BASE64
            .decode(s.trim())
            .map(Some)
            .map_err(|e| Error::Format(format!("package footer: '{}' is not base64: {}", key, e))),
        Some(_) => Err(Error::Format(format!(
            "package footer: '{}' is not a string",
            key
        ))),
    }
}

/// Parse the concatenated bytes of every footer entry
pub fn parse_footer(bytes: &[u8]) -> Result<FooterMetadata> {
    let docs = parse_documents(bytes)?;
    if docs.len() < 2 {
        return Err(Error::Format(format!(
            "package footer must contain at least 2 YAML documents, found {}",
            docs.len()
        )));
    }

    check_format_gate(&docs[0], FOOTER_FORMAT_TYPE, FOOTER_FORMAT_VERSIONS)?;

    let mut merged = Mapping::new();
    for doc in &docs[1..] {
        match doc {
            Value::Null => {}
            Value::Mapping(map) => {
                for (key, value) in map {
                    merged.insert(key.clone(), value.clone());
                }
            }
            _ => {
                return Err(Error::Format(
                    "package footer document is not a mapping".to_string(),
                ));
            }
        }
    }

    let digest = merged
        .get(KEY_DIGEST)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Format("package footer: missing 'digest'".to_string()))?
        .parse()?;

    Ok(FooterMetadata {
        digest,
        developer_signature: decode_signature(&merged, KEY_DEVELOPER_SIGNATURE)?,
        store_signature: decode_signature(&merged, KEY_STORE_SIGNATURE)?,
    })
}

/// Serialize a complete footer (format gate plus one data document)
pub fn serialize_footer(footer: &FooterMetadata) -> Result<Vec<u8>> {
    let mut data = Mapping::new();
    data.insert(KEY_DIGEST.into(), footer.digest.to_hex().into());
    if let Some(sig) = &footer.developer_signature {
        data.insert(KEY_DEVELOPER_SIGNATURE.into(), BASE64.encode(sig).into());
    }
    if let Some(sig) = &footer.store_signature {
        data.insert(KEY_STORE_SIGNATURE.into(), BASE64.encode(sig).into());
    }

    let mut out = serde_yaml::to_string(&format_gate(FOOTER_FORMAT_TYPE, CURRENT_FOOTER_VERSION))?;
    out.push_str("---\n");
    out.push_str(&serde_yaml::to_string(&data)?);
    Ok(out.into_bytes())
}

/// Which signature a footer fragment carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureKind {
    Developer,
    Store,
}

impl SignatureKind {
    pub fn footer_key(self) -> &'static str {
        match self {
            SignatureKind::Developer => KEY_DEVELOPER_SIGNATURE,
            SignatureKind::Store => KEY_STORE_SIGNATURE,
        }
    }

    /// Archive entry name for the appended fragment
    pub fn entry_name(self) -> String {
        match self {
            SignatureKind::Developer => format!("{}developer-signature", super::FOOTER_PREFIX),
            SignatureKind::Store => format!("{}store-signature", super::FOOTER_PREFIX),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SignatureKind::Developer => "developer",
            SignatureKind::Store => "store",
        }
    }
}

/// Serialize an appendable footer fragment carrying one signature
pub fn serialize_signature_fragment(kind: SignatureKind, signature: &[u8]) -> Result<Vec<u8>> {
    let mut data = Mapping::new();
    data.insert(kind.footer_key().into(), BASE64.encode(signature).into());
    let mut out = String::from("---\n");
    out.push_str(&serde_yaml::to_string(&data)?);
    Ok(out.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::digest::DigestAccumulator;

    fn sample_digest() -> Digest {
        let mut acc = DigestAccumulator::new();
        acc.update(b"sample");
        acc.finalize()
    }

    #[test]
    fn test_header_v2() {
        let yaml = b"formatType: am-package-header\nformatVersion: 2\n---\npackageId: com.example.app\ndiskSpaceUsed: 4096\nextra:\n  channel: beta\n";
        let header = parse_header(yaml).unwrap();
        assert_eq!(header.format_version, 2);
        assert_eq!(header.package_id, "com.example.app");
        assert_eq!(header.disk_space_used, 4096);
        assert_eq!(header.extra.get("channel").and_then(Value::as_str), Some("beta"));
        assert!(header.extra_signed.is_empty());
    }

    #[test]
    fn test_header_v1_uses_application_id() {
        let yaml = b"formatType: am-package-header\nformatVersion: 1\n---\napplicationId: com.example.old\ndiskSpaceUsed: 10\n";
        let header = parse_header(yaml).unwrap();
        assert_eq!(header.package_id, "com.example.old");

        // v2 field name is not accepted in a v1 header
        let yaml = b"formatType: am-package-header\nformatVersion: 1\n---\npackageId: com.example.old\ndiskSpaceUsed: 10\n";
        assert!(matches!(parse_header(yaml), Err(Error::Format(_))));
    }

    #[test]
    fn test_header_rejects_bad_gate() {
        let wrong_type = b"formatType: am-package-footer\nformatVersion: 2\n---\npackageId: a\ndiskSpaceUsed: 1\n";
        assert!(matches!(parse_header(wrong_type), Err(Error::Format(_))));

        let wrong_version = b"formatType: am-package-header\nformatVersion: 7\n---\npackageId: a\ndiskSpaceUsed: 1\n";
        assert!(matches!(
            parse_header(wrong_version),
            Err(Error::UnsupportedFormatVersion { version: 7, .. })
        ));

        let single_doc = b"formatType: am-package-header\nformatVersion: 2\n";
        assert!(matches!(parse_header(single_doc), Err(Error::Format(_))));
    }

    #[test]
    fn test_header_requires_positive_disk_space() {
        let yaml = b"formatType: am-package-header\nformatVersion: 2\n---\npackageId: a\ndiskSpaceUsed: 0\n";
        let err = parse_header(yaml).unwrap_err();
        assert!(err.to_string().contains("diskSpaceUsed"));
    }

    #[test]
    fn test_header_serialize_parse() {
        let mut header = HeaderMetadata::new("com.example.app", 8192);
        header
            .extra_signed
            .insert("vendor".into(), "Example Inc.".into());
        let parsed = parse_header(&serialize_header(&header).unwrap()).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_footer_fragments_merge() {
        let digest = sample_digest();
        let mut bytes = serialize_footer(&FooterMetadata::new(digest)).unwrap();
        bytes.extend(serialize_signature_fragment(SignatureKind::Developer, b"first").unwrap());
        bytes.extend(serialize_signature_fragment(SignatureKind::Store, b"store").unwrap());
        bytes.extend(serialize_signature_fragment(SignatureKind::Developer, b"second").unwrap());

        let footer = parse_footer(&bytes).unwrap();
        assert_eq!(footer.digest, digest);
        assert_eq!(footer.developer_signature.as_deref(), Some(&b"second"[..]));
        assert_eq!(footer.store_signature.as_deref(), Some(&b"store"[..]));
    }

    #[test]
    fn test_footer_requires_digest() {
        let yaml = b"formatType: am-package-footer\nformatVersion: 2\n---\nstoreSignature: AAAA\n";
        let err = parse_footer(yaml).unwrap_err();
        assert!(err.to_string().contains("digest"));
    }

    #[test]
    fn test_footer_rejects_non_mapping_document() {
        let yaml = b"formatType: am-package-footer\nformatVersion: 2\n---\n- a\n- b\n";
        assert!(matches!(parse_footer(yaml), Err(Error::Format(_))));
    }
}
