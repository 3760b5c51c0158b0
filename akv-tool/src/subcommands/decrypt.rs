// Copyright 2021 Contributors to the Confidential Packaging project.
// SPDX-License-Identifier: MIT

//! Decrypts a ciphertext with a vault RSA key.

use crate::error::Result;
use crate::subcommands::KeyOptions;
use crate::util;

use akv::engine::{KeyUsage, Services};
use akv::keys::RsaPadding;
use std::io::Write;
use std::path::PathBuf;
use structopt::StructOpt;

/// Models the options required by the decrypt command.
#[derive(Debug, StructOpt)]
pub struct Decrypt {
    #[structopt(flatten)]
    key: KeyOptions,

    /// A file holding the base64-encoded ciphertext.
    #[structopt(short = "i", long = "in", parse(from_os_str))]
    input: PathBuf,

    /// The ciphertext uses OAEP padding rather than PKCS#1 v1.5.
    #[structopt(long = "oaep")]
    oaep: bool,
}

impl Decrypt {
    /// Decrypts the input file and writes the plaintext to standard output.
    pub fn run(&self) -> Result<()> {
        let services = self.key.services()?;
        self.execute(&services, &mut std::io::stdout())
    }

    fn execute(&self, services: &Services, out: &mut dyn Write) -> Result<()> {
        let encoded = util::read_input(&self.input)?;
        let text = String::from_utf8_lossy(&encoded);
        let ciphertext = base64::decode(text.trim())?;
        let padding = if self.oaep {
            RsaPadding::Pkcs1Oaep
        } else {
            RsaPadding::Pkcs1
        };

        let key = self.key.load(KeyUsage::Private, services)?;
        let plaintext = key.decrypt(padding, &ciphertext)?;
        out.write_all(&plaintext)?;
        out.flush()?;
        Ok(())
    }
}
