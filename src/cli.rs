// SPDX-License-Identifier: Apache-2.0

//! Command-line surface (spec §6): a single `run` positional form plus
//! `--version`/`--help`, both of which `structopt` derives for us from
//! `Cargo.toml` metadata and these doc comments.

use structopt::StructOpt;

/// Launches an unmodified Linux binary inside a library-OS enclave.
///
/// Configuration beyond the image and executable paths is read from the
/// environment; see the project README for the full variable table.
#[derive(StructOpt, Debug)]
#[structopt(name = "libos-run")]
pub struct Cli {
    /// Path to the disk image backing the enclave's root filesystem.
    pub disk_image: String,

    /// Path to the executable to run inside the enclave.
    pub executable: String,

    /// Arguments passed through to the in-enclave executable.
    pub args: Vec<String>,
}

impl Cli {
    pub fn from_args() -> Self {
        StructOpt::from_args()
    }
}
