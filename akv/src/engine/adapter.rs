// Copyright 2021 Contributors to the Confidential Packaging project.
// SPDX-License-Identifier: MIT

//! Key object adapters turn fetched public key material into a key object of some host, and wire
//! that key object up so that its private-key operations reach the vault.

use super::context::RemoteKeyContext;
use crate::keys::{PublicKeyMaterial, Result};

/// Builds and adapts key objects for one host.
pub trait KeyAdapter {
    /// The host's key object.
    type Key;

    /// Builds a key object that carries the given public material. Fails with
    /// `UnsupportedAlgorithm` for key types the host cannot represent.
    fn build(&self, material: &PublicKeyMaterial) -> Result<Self::Key>;

    /// Installs the private-key overrides on the key object and moves the context into it.
    ///
    /// On success the key object owns the context. On failure the context has been dropped, and
    /// the key object is left for the caller to drop.
    fn install(&self, key: &mut Self::Key, context: RemoteKeyContext) -> Result<()>;
}

/// The API family of the crypto library that is running.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Generation {
    /// OpenSSL 1.1: private-key operations are overridden with `RSA_METHOD` and `EC_KEY_METHOD`.
    Legacy,
    /// OpenSSL 3.x: signing is overridden with `EVP_PKEY_METHOD`s.
    Provider,
}

impl Generation {
    /// Picks the generation from an `OPENSSL_VERSION_NUMBER` style value.
    pub fn from_version_number(version: u64) -> Generation {
        if version >= 0x3000_0000 {
            Generation::Provider
        } else {
            Generation::Legacy
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_from_version() {
        assert_eq!(Generation::from_version_number(0x1010_107f), Generation::Legacy);
        assert_eq!(Generation::from_version_number(0x3000_0000), Generation::Provider);
        assert_eq!(Generation::from_version_number(0x3050_0060), Generation::Provider);
    }
}
