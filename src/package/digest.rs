// src/package/digest.rs

//! Incremental package digest
//!
//! The digest is SHA-256 over a canonical byte sequence built in archive
//! order. Creation and extraction feed exactly the same records:
//!
//! | Record    | Bytes                                                       |
//! |-----------|-------------------------------------------------------------|
//! | header    | `H/<packageId>\0<canonical JSON of extraSigned>\0`          |
//! | directory | `D/0/0755/<path>\0`                                         |
//! | file      | file content, then `F/<size>/<0755\|0644>/<path>\0`         |

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::io::{self, Read};
use std::str::FromStr;

/// Length of a package digest in bytes
pub const DIGEST_LEN: usize = 32;

/// A finalized SHA-256 package digest
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    pub fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl FromStr for Digest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| Error::Format(format!("digest is not valid hex: {}", e)))?;
        let array: [u8; DIGEST_LEN] = bytes.try_into().map_err(|b: Vec<u8>| {
            Error::Format(format!(
                "digest must be {} bytes, got {}",
                DIGEST_LEN,
                b.len()
            ))
        })?;
        Ok(Self(array))
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Streaming SHA-256 over the canonical package byte sequence
///
/// Confined to the thread running the job; payload content is fed
/// chunk by chunk and never buffered whole.
#[derive(Clone, Default)]
pub struct DigestAccumulator {
    hasher: Sha256,
}

impl fmt::Debug for DigestAccumulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigestAccumulator").finish_non_exhaustive()
    }
}

impl DigestAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes
    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Feed the header record
    pub fn add_header(
        &mut self,
        package_id: &str,
        extra_signed: &serde_yaml::Mapping,
    ) -> Result<()> {
        let canonical = canonical_json(extra_signed)?;
        self.update(b"H/");
        self.update(package_id.as_bytes());
        self.update(b"\0");
        self.update(&canonical);
        self.update(b"\0");
        Ok(())
    }

    /// Feed the metadata record of a directory
    pub fn add_directory(&mut self, path: &str) {
        self.update(b"D/0/0755/");
        self.update(path.as_bytes());
        self.update(b"\0");
    }

    /// Feed the metadata record of a regular file (after its content)
    pub fn add_file_metadata(&mut self, path: &str, size: u64, executable: bool) {
        let mode = if executable { "0755" } else { "0644" };
        self.update(format!("F/{}/{}/", size, mode).as_bytes());
        self.update(path.as_bytes());
        self.update(b"\0");
    }

    pub fn finalize(self) -> Digest {
        Digest(self.hasher.finalize().into())
    }
}

/// Serialize a YAML mapping as JSON with sorted keys
fn canonical_json(map: &serde_yaml::Mapping) -> Result<Vec<u8>> {
    // serde_json's default map type is ordered, which sorts keys at every level
    let value = serde_json::to_value(map)
        .map_err(|e| Error::Format(format!("extraSigned is not canonicalizable: {}", e)))?;
    serde_json::to_vec(&value)
        .map_err(|e| Error::Format(format!("extraSigned is not canonicalizable: {}", e)))
}

/// Reader adapter feeding everything it reads into a digest
pub struct DigestingReader<'a, R> {
    inner: R,
    digest: &'a mut DigestAccumulator,
}

impl<'a, R: Read> DigestingReader<'a, R> {
    pub fn new(inner: R, digest: &'a mut DigestAccumulator) -> Self {
        Self { inner, digest }
    }
}

impl<R: Read> Read for DigestingReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.digest.update(&buf[..n]);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(yaml: &str) -> serde_yaml::Mapping {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_empty_digest_is_sha256_of_nothing() {
        let digest = DigestAccumulator::new().finalize();
        assert_eq!(
            digest.to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let mut a = DigestAccumulator::new();
        a.update(b"hello ");
        a.update(b"world");
        let mut b = DigestAccumulator::new();
        b.update(b"hello world");
        assert_eq!(a.finalize(), b.finalize());
    }

    #[test]
    fn test_extra_signed_key_order_is_irrelevant() {
        let mut a = DigestAccumulator::new();
        a.add_header("com.example.app", &mapping("b: 1\na: {y: 2, x: 3}"))
            .unwrap();
        let mut b = DigestAccumulator::new();
        b.add_header("com.example.app", &mapping("a: {x: 3, y: 2}\nb: 1"))
            .unwrap();
        assert_eq!(a.finalize(), b.finalize());
    }

    #[test]
    fn test_executable_bit_changes_digest() {
        let mut a = DigestAccumulator::new();
        a.add_file_metadata("bin/run", 4, false);
        let mut b = DigestAccumulator::new();
        b.add_file_metadata("bin/run", 4, true);
        assert_ne!(a.finalize(), b.finalize());
    }

    #[test]
    fn test_parse_and_display() {
        let digest = DigestAccumulator::new().finalize();
        let parsed: Digest = digest.to_hex().parse().unwrap();
        assert_eq!(parsed, digest);
        assert!("abcd".parse::<Digest>().is_err());
        assert!("zz".parse::<Digest>().is_err());
    }

    #[test]
    fn test_digesting_reader() {
        let mut acc = DigestAccumulator::new();
        let mut out = Vec::new();
        DigestingReader::new(&b"payload"[..], &mut acc)
            .read_to_end(&mut out)
            .unwrap();
        let mut expected = DigestAccumulator::new();
        expected.update(b"payload");
        assert_eq!(out, b"payload");
        assert_eq!(acc.finalize(), expected.finalize());
    }
}
