// src/package/entry.rs

//! Archive entry classification
//!
//! Decides what an archive entry is before any I/O happens, and enforces
//! the container layout: header first and exactly once, payload in the
//! middle, footer fragments last.

use crate::error::{Error, Result};
use crate::package::{FOOTER_PREFIX, HEADER_NAME, RESERVED_PREFIX};
use tar::EntryType;

/// What an archive entry is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    /// The `--PACKAGE-HEADER--` metadata entry
    Header,
    /// One `--PACKAGE-FOOTER--*` metadata fragment
    Footer,
    /// Regular payload file, relative path
    File(String),
    /// Payload directory, relative path with the trailing `/` stripped
    Directory(String),
}

/// Classify an entry given what has been seen so far
pub fn classify(
    name: &str,
    entry_type: EntryType,
    seen_header: bool,
    seen_footer: bool,
) -> Result<EntryKind> {
    if name == HEADER_NAME {
        if seen_header {
            return Err(Error::Format(format!("duplicate {} entry", HEADER_NAME)));
        }
        require_regular(name, entry_type)?;
        return Ok(EntryKind::Header);
    }

    if !seen_header {
        return Err(Error::Format(format!(
            "first entry must be {}, found '{}'",
            HEADER_NAME, name
        )));
    }

    if name.starts_with(FOOTER_PREFIX) {
        require_regular(name, entry_type)?;
        return Ok(EntryKind::Footer);
    }

    if bare_name(name).starts_with(RESERVED_PREFIX) {
        return Err(Error::Format(format!("reserved entry name '{}'", name)));
    }

    if seen_footer {
        return Err(Error::Format(format!(
            "payload entry '{}' found after the package footer",
            name
        )));
    }

    if name.is_empty() {
        return Err(Error::Format("entry with an empty name".to_string()));
    }

    match entry_type {
        EntryType::Regular | EntryType::Continuous => {
            if name.ends_with('/') {
                return Err(Error::Format(format!(
                    "regular file entry '{}' has a directory name",
                    name
                )));
            }
            Ok(EntryKind::File(name.to_string()))
        }
        EntryType::Directory => {
            let stripped = name.strip_suffix('/').unwrap_or(name);
            Ok(EntryKind::Directory(stripped.to_string()))
        }
        other => Err(Error::Format(format!(
            "entry '{}' has unsupported type {:?}",
            name, other
        ))),
    }
}

/// `name` without leading `./` components
fn bare_name(name: &str) -> &str {
    let mut bare = name;
    while let Some(rest) = bare.strip_prefix("./") {
        bare = rest.trim_start_matches('/');
    }
    bare
}

fn require_regular(name: &str, entry_type: EntryType) -> Result<()> {
    if entry_type == EntryType::Regular {
        Ok(())
    } else {
        Err(Error::Format(format!(
            "metadata entry '{}' is not a regular file",
            name
        )))
    }
}
