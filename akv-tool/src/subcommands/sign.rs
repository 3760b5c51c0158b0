// Copyright 2021 Contributors to the Confidential Packaging project.
// SPDX-License-Identifier: MIT

//! Signs the digest of a file with a vault key.

use crate::error::Result;
use crate::subcommands::KeyOptions;
use crate::util;

use akv::engine::{KeyUsage, Services};
use akv::keys::{DigestAlgorithm, RsaPadding};
use std::io::Write;
use std::path::PathBuf;
use structopt::StructOpt;

/// Models the options required by the sign command.
#[derive(Debug, StructOpt)]
pub struct Sign {
    #[structopt(flatten)]
    key: KeyOptions,

    /// The file to sign. It is hashed locally; only the digest is sent to the vault.
    #[structopt(short = "i", long = "in", parse(from_os_str))]
    input: PathBuf,

    /// The message digest: sha256, sha384 or sha512. EC keys need the digest that matches their
    /// curve.
    #[structopt(short = "d", long = "digest", default_value = "sha256", parse(try_from_str = util::parse_digest))]
    digest: DigestAlgorithm,

    /// Use RSA-PSS padding instead of PKCS#1 v1.5. Ignored for EC keys.
    #[structopt(long = "pss")]
    pss: bool,
}

impl Sign {
    /// Signs the input file and writes the base64 signature to standard output.
    pub fn run(&self) -> Result<()> {
        let services = self.key.services()?;
        self.execute(&services, &mut std::io::stdout())
    }

    fn execute(&self, services: &Services, out: &mut dyn Write) -> Result<()> {
        let data = util::read_input(&self.input)?;
        let digest = util::digest(self.digest, &data);
        let padding = if self.pss {
            RsaPadding::Pkcs1Pss
        } else {
            RsaPadding::Pkcs1
        };

        let key = self.key.load(KeyUsage::Private, services)?;
        log::info!(
            "Signing {} with {} ({:?}).",
            self.input.display(),
            self.key.key_id,
            self.digest
        );
        let signature = key.sign(Some(self.digest), padding, &digest)?;
        writeln!(out, "{}", base64::encode(signature))?;
        Ok(())
    }
}
