// src/cli.rs
//! CLI definitions for the ampkg packaging tool
//!
//! This module contains the command-line interface definitions using clap.
//! The command implementations are in the `commands` module.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ampkg")]
#[command(version)]
#[command(about = "Create, sign, verify and install application packages", long_about = None)]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a package from a source directory containing info.yaml
    CreatePackage {
        /// Package file to write
        destination: PathBuf,

        /// Directory holding the package contents
        source_dir: PathBuf,

        /// Extra header metadata, not covered by signatures
        #[arg(long = "extra", value_name = "KEY=VALUE")]
        extra: Vec<String>,

        /// Extra header metadata covered by the package digest
        #[arg(long = "extra-signed", value_name = "KEY=VALUE")]
        extra_signed: Vec<String>,
    },

    /// Add a developer signature to a package
    DevSignPackage {
        /// Package to sign
        source: PathBuf,

        /// Signed package to write (may equal the source)
        destination: PathBuf,

        /// PKCS#12 file with the developer key and certificate
        certificate: PathBuf,

        /// Passphrase of the PKCS#12 file
        password: String,
    },

    /// Verify the developer signature of a package
    DevVerifyPackage {
        /// Package to verify
        source: PathBuf,

        /// CA certificates (PEM or DER)
        #[arg(required = true)]
        certificates: Vec<PathBuf>,
    },

    /// Add a store signature bound to a hardware id
    StoreSignPackage {
        /// Package to sign
        source: PathBuf,

        /// Signed package to write (may equal the source)
        destination: PathBuf,

        /// PKCS#12 file with the store key and certificate
        certificate: PathBuf,

        /// Passphrase of the PKCS#12 file
        password: String,

        /// Device the package is signed for
        hardware_id: String,
    },

    /// Verify the store signature of a package for a hardware id
    StoreVerifyPackage {
        /// Package to verify
        source: PathBuf,

        /// CA certificates (PEM or DER), followed by the hardware id
        #[arg(required = true, num_args = 2.., value_name = "CERTS... HARDWARE_ID")]
        certificates_and_hardware_id: Vec<String>,
    },

    /// Install a package from a file or URL into a directory
    ExtractPackage {
        /// Package file path or http(s) URL
        source: String,

        /// Installation directory (created if missing)
        destination: PathBuf,

        /// Write the installation report (YAML) to this file
        #[arg(long, value_name = "FILE")]
        report: Option<PathBuf>,
    },
}
