// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: package file to read
fn source_arg() -> Arg {
    Arg::new("source").required(true).help("Package to read")
}

/// Common argument: PKCS#12 signing credentials
fn certificate_args() -> [Arg; 2] {
    [
        Arg::new("certificate")
            .required(true)
            .help("PKCS#12 file with the signing key and certificate"),
        Arg::new("password")
            .required(true)
            .help("Passphrase of the PKCS#12 file"),
    ]
}

fn build_cli() -> Command {
    Command::new("ampkg")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Create, sign, verify and install application packages")
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE")
                .global(true)
                .help("Configuration file (TOML)"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .global(true)
                .help("Enable debug logging"),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("create-package")
                .about("Create a package from a source directory containing info.yaml")
                .arg(Arg::new("destination").required(true).help("Package file to write"))
                .arg(Arg::new("source_dir").required(true).help("Directory holding the package contents"))
                .arg(
                    Arg::new("extra")
                        .long("extra")
                        .value_name("KEY=VALUE")
                        .action(ArgAction::Append)
                        .help("Extra header metadata, not covered by signatures"),
                )
                .arg(
                    Arg::new("extra_signed")
                        .long("extra-signed")
                        .value_name("KEY=VALUE")
                        .action(ArgAction::Append)
                        .help("Extra header metadata covered by the package digest"),
                ),
        )
        .subcommand(
            Command::new("dev-sign-package")
                .about("Add a developer signature to a package")
                .arg(source_arg())
                .arg(Arg::new("destination").required(true).help("Signed package to write"))
                .args(certificate_args()),
        )
        .subcommand(
            Command::new("dev-verify-package")
                .about("Verify the developer signature of a package")
                .arg(source_arg())
                .arg(
                    Arg::new("certificates")
                        .required(true)
                        .num_args(1..)
                        .help("CA certificates (PEM or DER)"),
                ),
        )
        .subcommand(
            Command::new("store-sign-package")
                .about("Add a store signature bound to a hardware id")
                .arg(source_arg())
                .arg(Arg::new("destination").required(true).help("Signed package to write"))
                .args(certificate_args())
                .arg(Arg::new("hardware_id").required(true).help("Device the package is signed for")),
        )
        .subcommand(
            Command::new("store-verify-package")
                .about("Verify the store signature of a package for a hardware id")
                .arg(source_arg())
                .arg(
                    Arg::new("certificates_and_hardware_id")
                        .required(true)
                        .num_args(2..)
                        .value_name("CERTS... HARDWARE_ID")
                        .help("CA certificates (PEM or DER), followed by the hardware id"),
                ),
        )
        .subcommand(
            Command::new("extract-package")
                .about("Install a package from a file or URL into a directory")
                .arg(Arg::new("source").required(true).help("Package file path or http(s) URL"))
                .arg(Arg::new("destination").required(true).help("Installation directory"))
                .arg(
                    Arg::new("report")
                        .long("report")
                        .value_name("FILE")
                        .help("Write the installation report (YAML) to this file"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();
    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("ampkg.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
