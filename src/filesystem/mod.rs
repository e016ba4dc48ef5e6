// src/filesystem/mod.rs

//! Filesystem helpers for writing untrusted package payloads
//!
//! Everything an archive asks us to create goes through [`path::confine_to_root`]
//! so that no entry can land outside the destination root.

pub mod path;

pub use path::{confine_to_root, sanitize_entry_path};
