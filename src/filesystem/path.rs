// src/filesystem/path.rs

//! Path confinement for untrusted archive entries
//!
//! Package payload names come from the archive and cannot be trusted. Every
//! target is checked twice: lexically (no `..`, no absolute paths) and then
//! physically, by canonicalizing the parent directory so symlinks that point
//! outside the destination root are caught too.

use crate::error::{Error, Result};
use std::path::{Component, Path, PathBuf};
use tracing::warn;

/// Lexically validate a relative entry path
///
/// `.` components are dropped; `..`, root and prefix components are rejected
/// as security violations.
///
/// # Examples
///
/// ```
/// use ampkg::filesystem::path::sanitize_entry_path;
/// use std::path::PathBuf;
///
/// assert_eq!(sanitize_entry_path("lib/./a.so").unwrap(), PathBuf::from("lib/a.so"));
/// assert!(sanitize_entry_path("../../etc/passwd").is_err());
/// assert!(sanitize_entry_path("/etc/passwd").is_err());
/// ```
pub fn sanitize_entry_path(path: &str) -> Result<PathBuf> {
    let mut normalized = PathBuf::new();

    for component in Path::new(path).components() {
        match component {
            Component::Normal(c) => normalized.push(c),
            Component::CurDir => {}
            Component::ParentDir => {
                warn!("Path traversal attempt detected: {}", path);
                return Err(Error::Security(format!(
                    "entry '{}' contains a parent directory reference",
                    path
                )));
            }
            Component::RootDir | Component::Prefix(_) => {
                warn!("Absolute entry path rejected: {}", path);
                return Err(Error::Security(format!("entry '{}' is absolute", path)));
            }
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(Error::Format(format!("entry '{}' has an empty path", path)));
    }

    Ok(normalized)
}

/// Resolve the on-disk target of an entry inside `canonical_root`
///
/// `canonical_root` must already be canonical. The entry's parent directory
/// must exist; it is canonicalized (resolving symlinks) and must be the root
/// or a descendant of it. Returns the canonical parent joined with the final
/// path component.
pub fn confine_to_root(canonical_root: &Path, entry: &str) -> Result<PathBuf> {
    let relative = sanitize_entry_path(entry)?;
    let joined = canonical_root.join(&relative);

    let file_name = joined
        .file_name()
        .ok_or_else(|| Error::Format(format!("entry '{}' has no file name", entry)))?
        .to_os_string();
    let parent = joined.parent().unwrap_or(canonical_root);

    let canonical_parent = parent.canonicalize().map_err(|e| {
        Error::Format(format!(
            "parent directory of '{}' is not available: {}",
            entry, e
        ))
    })?;

    if !canonical_parent.starts_with(canonical_root) {
        warn!(
            "Entry {} resolves outside of {}: {}",
            entry,
            canonical_root.display(),
            canonical_parent.display()
        );
        return Err(Error::Security(format!(
            "entry '{}' resolves to {}, outside of {}",
            entry,
            canonical_parent.display(),
            canonical_root.display()
        )));
    }

    let target = canonical_parent.join(file_name);

    // The final component must not be a pre-existing symlink either
    if let Ok(meta) = target.symlink_metadata()
        && meta.file_type().is_symlink()
    {
        warn!("Entry {} would be written through a symlink", entry);
        return Err(Error::Security(format!(
            "entry '{}' would be written through a symlink",
            entry
        )));
    }

    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_normal() {
        assert_eq!(
            sanitize_entry_path("usr/bin/foo").unwrap(),
            PathBuf::from("usr/bin/foo")
        );
        assert_eq!(
            sanitize_entry_path("./a/./b").unwrap(),
            PathBuf::from("a/b")
        );
    }

    #[test]
    fn test_sanitize_traversal_is_security_error() {
        assert!(matches!(
            sanitize_entry_path("../../etc/passwd"),
            Err(Error::Security(_))
        ));
        assert!(matches!(
            sanitize_entry_path("a/../../b"),
            Err(Error::Security(_))
        ));
        assert!(matches!(
            sanitize_entry_path("/etc/passwd"),
            Err(Error::Security(_))
        ));
    }

    #[test]
    fn test_sanitize_empty() {
        assert!(matches!(sanitize_entry_path("."), Err(Error::Format(_))));
        assert!(matches!(sanitize_entry_path(""), Err(Error::Format(_))));
    }

    #[test]
    fn test_confine_inside_root() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();
        std::fs::create_dir(root.join("sub")).unwrap();

        assert_eq!(confine_to_root(&root, "a.txt").unwrap(), root.join("a.txt"));
        assert_eq!(
            confine_to_root(&root, "sub/b.txt").unwrap(),
            root.join("sub/b.txt")
        );
    }

    #[test]
    fn test_confine_missing_parent() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();
        assert!(matches!(
            confine_to_root(&root, "missing/b.txt"),
            Err(Error::Format(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_confine_symlinked_parent_escapes() {
        let temp = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();
        std::os::unix::fs::symlink(outside.path(), root.join("escape")).unwrap();

        let err = confine_to_root(&root, "escape/evil.txt").unwrap_err();
        assert!(matches!(err, Error::Security(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_confine_symlinked_target_rejected() {
        let temp = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();
        std::os::unix::fs::symlink(outside.path().join("x"), root.join("link")).unwrap();

        assert!(matches!(
            confine_to_root(&root, "link"),
            Err(Error::Security(_))
        ));
    }
}
