// Copyright 2021 Contributors to the Confidential Packaging project.
// SPDX-License-Identifier: MIT

//! Individual commands supported by akv-tool.

mod decrypt;
mod pubkey;
mod sign;

use crate::error::Result;
use crate::subcommands::decrypt::Decrypt;
use crate::subcommands::pubkey::PubKey;
use crate::subcommands::sign::Sign;
use crate::util;

use akv::engine::soft::{SoftAdapter, SoftKey};
use akv::engine::{load_key, KeyUsage, Services};
use structopt::StructOpt;

/// Options that select a vault key and say how to reach it.
#[derive(Debug, StructOpt)]
pub struct KeyOptions {
    /// The key identifier, in the form `vaultType:vaultName:keyName` where the vault type is
    /// `vault` or `managedHsm`.
    #[structopt(short = "k", long = "key-id")]
    pub key_id: String,

    /// The managed identity token endpoint. If this option is not specified, then it is taken from
    /// the `IDENTITY_ENDPOINT` environment variable, or the instance metadata service is used.
    #[structopt(long = "identity-endpoint")]
    pub identity_endpoint: Option<String>,

    /// The vault REST API version. Defaults to the `AKV_API_VERSION` environment variable, or 7.4.
    #[structopt(long = "api-version")]
    pub api_version: Option<String>,
}

impl KeyOptions {
    /// The managed identity provider and vault client for these options.
    pub fn services(&self) -> Result<Services> {
        let config = util::engine_config(&self.identity_endpoint, &self.api_version);
        log::debug!("Using {:?}", config);
        Ok(Services::from_config(&config)?)
    }

    /// Loads the selected key.
    pub fn load(&self, usage: KeyUsage, services: &Services) -> Result<SoftKey> {
        Ok(load_key(&self.key_id, usage, services, &SoftAdapter::new())?)
    }
}

/// Command-line interface to akv-tool operations.
#[derive(Debug, StructOpt)]
pub enum Subcommand {
    /// Fetches the public part of a vault key and writes it to the console: a PKCS#1 PEM block for
    /// RSA keys, or the curve and coordinates as JSON for EC keys.
    #[structopt(name = "pubkey")]
    PubKey(PubKey),

    /// Hashes a file locally and signs the digest with a vault key. The signature is written to
    /// the console in base64.
    Sign(Sign),

    /// Decrypts a base64-encoded ciphertext with a vault RSA key, writing the plaintext to
    /// standard output.
    Decrypt(Decrypt),
}

impl Subcommand {
    /// Runs the command.
    pub fn run(&self) -> Result<()> {
        match &self {
            Subcommand::PubKey(cmd) => cmd.run(),
            Subcommand::Sign(cmd) => cmd.run(),
            Subcommand::Decrypt(cmd) => cmd.run(),
        }
    }
}
