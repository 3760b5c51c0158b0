// Copyright 2021 Contributors to the Confidential Packaging project.
// SPDX-License-Identifier: MIT

//! Fetches the public part of a vault key and writes it to the console.

use crate::error::Result;
use crate::subcommands::KeyOptions;

use akv::engine::soft::SoftKey;
use akv::engine::{KeyUsage, Services};
use akv::keys::PublicKeyMaterial;
use pkcs1::ToRsaPublicKey;
use std::io::Write;
use structopt::StructOpt;

/// Models the options required by the pubkey command.
#[derive(Debug, StructOpt)]
pub struct PubKey {
    #[structopt(flatten)]
    key: KeyOptions,
}

impl PubKey {
    /// Writes the public key to standard output.
    pub fn run(&self) -> Result<()> {
        let services = self.key.services()?;
        self.execute(&services, &mut std::io::stdout())
    }

    fn execute(&self, services: &Services, out: &mut dyn Write) -> Result<()> {
        let key = self.key.load(KeyUsage::Public, services)?;
        writeln!(out, "{}", render(&key)?)?;
        Ok(())
    }
}

/// Print just the key data with no additional verbosity, so that scripts can forward it as is.
fn render(key: &SoftKey) -> Result<String> {
    if let Some(public_key) = key.rsa_public_key() {
        return Ok(public_key.to_pkcs1_pem()?.trim_end().to_string());
    }
    match key.material() {
        PublicKeyMaterial::Ec { curve, x, y } => {
            let jwk = serde_json::json!({
                "kty": "EC",
                "crv": curve.jwk_name(),
                "x": base64::encode_config(x, base64::URL_SAFE_NO_PAD),
                "y": base64::encode_config(y, base64::URL_SAFE_NO_PAD),
            });
            Ok(serde_json::to_string_pretty(&jwk)?)
        }
        _ => Err(crate::error::ToolErrorKind::NotSupported.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subcommands::testing::{key_options, local_services, TEST_KEY_ID};

    #[test]
    fn test_rsa_key_is_printed_as_pem() {
        let cmd = PubKey {
            key: key_options(TEST_KEY_ID),
        };
        let mut out = Vec::new();
        cmd.execute(&local_services(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("-----BEGIN RSA PUBLIC KEY-----"));
        assert!(text.ends_with("-----END RSA PUBLIC KEY-----\n"));
    }

    #[test]
    fn test_unknown_key_fails() {
        let cmd = PubKey {
            key: key_options("vault:local:missing"),
        };
        let mut out = Vec::new();
        assert!(cmd.execute(&local_services(), &mut out).is_err());
        assert!(out.is_empty());
    }
}
