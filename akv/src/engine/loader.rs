// Copyright 2021 Contributors to the Confidential Packaging project.
// SPDX-License-Identifier: MIT

//! Loading keys by identifier.

use super::adapter::KeyAdapter;
use super::context::{RemoteKeyContext, Services};
use crate::keys::{Result, VaultReference};

/// What the caller intends to do with a loaded key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyUsage {
    /// The key will be used for private-key operations.
    Private,
    /// Only the public part of the key is needed.
    Public,
}

/// Loads a vault key as a host key object.
///
/// The identifier is parsed, a context is created, a token is obtained, the public key is fetched
/// and built into a key object, and finally the key object is adapted so that its private-key
/// operations are forwarded to the vault. Whatever step fails, everything created up to that
/// point is released before the error is returned. The same happens for both usages; a public key
/// can still be asked to sign, which is then done in the vault.
pub fn load_key<A: KeyAdapter>(
    key_id: &str,
    usage: KeyUsage,
    services: &Services,
    adapter: &A,
) -> Result<A::Key> {
    log::trace!("Loading {:?} key '{}'.", usage, key_id);
    let reference = VaultReference::parse(key_id)?;
    let context = RemoteKeyContext::with_reference(reference, services.clone());

    let material = {
        let token = context.access_token()?;
        context.fetch_public_key(&token)?
    };

    let mut key = adapter.build(&material)?;
    adapter.install(&mut key, context)?;
    log::debug!("Loaded {:?} key '{}'.", usage, key_id);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::context::live_contexts;
    use crate::engine::soft::{SoftAdapter, SoftKey};
    use crate::engine::testing::{MockVault, MOCK_RSA_MODULUS_LEN, TEST_RSA_KEY_PEM};
    use crate::keys::error::{ErrorKind, KeyError};
    use crate::keys::local::LocalMemoryVault;
    use crate::keys::{DigestAlgorithm, PublicKeyMaterial, RsaPadding};
    use rsa::{Hash, PaddingScheme, PublicKey};
    use sha2::{Digest, Sha256};

    fn load(mock: &MockVault, key_id: &str) -> Result<SoftKey> {
        load_key(key_id, KeyUsage::Private, &mock.services(), &SoftAdapter::new())
    }

    fn load_kind(mock: &MockVault, key_id: &str) -> ErrorKind {
        load(mock, key_id).err().unwrap().kind()
    }

    #[test]
    fn test_load_and_sign_round_trip() {
        let mock = MockVault::rsa();
        let before = live_contexts();
        let key = load(&mock, "vault:contoso:signing").unwrap();
        assert!(key.is_remote());
        assert_eq!(live_contexts(), before + 1);

        let digest = Sha256::digest(b"to be signed");
        let signature = key
            .sign(Some(DigestAlgorithm::Sha256), RsaPadding::Pkcs1, &digest)
            .unwrap();
        assert_eq!(signature, vec![0x5a; MOCK_RSA_MODULUS_LEN]);
        assert_eq!(
            mock.calls(),
            vec!["fetch vault:contoso:signing", "sign vault:contoso:signing RS256 32"]
        );
        assert_eq!(mock.inputs(), vec![digest.to_vec()]);

        drop(key);
        assert_eq!(live_contexts(), before);
    }

    #[test]
    fn test_public_usage_is_adapted_too() {
        let mock = MockVault::rsa();
        let key = load_key(
            "vault:contoso:signing",
            KeyUsage::Public,
            &mock.services(),
            &SoftAdapter::new(),
        )
        .unwrap();
        assert!(key.is_remote());
    }

    #[test]
    fn test_every_failure_releases_the_context() {
        let before = live_contexts();
        for _ in 0..3 {
            assert_eq!(
                load_kind(&MockVault::rsa(), "vault:contoso"),
                ErrorKind::ParseError
            );
            assert_eq!(
                load_kind(&MockVault::rsa().failing_credentials(), "vault:contoso:signing"),
                ErrorKind::CredentialError
            );
            assert_eq!(
                load_kind(&MockVault::rsa().failing_fetch(), "vault:contoso:signing"),
                ErrorKind::KeyFetchError
            );
            let other = MockVault::with_material(PublicKeyMaterial::Other {
                kty: String::from("oct-HSM"),
            });
            assert_eq!(
                load_kind(&other, "managedHsm:pool:aes"),
                ErrorKind::UnsupportedAlgorithm
            );
            let broken = MockVault::with_material(PublicKeyMaterial::Rsa {
                n: vec![0x01],
                e: vec![0x01],
            });
            assert_eq!(
                load_kind(&broken, "vault:contoso:broken"),
                ErrorKind::InvalidKeyMaterial
            );
        }
        assert_eq!(live_contexts(), before);
    }

    #[test]
    fn test_credential_failure_makes_no_fetch() {
        let mock = MockVault::rsa().failing_credentials();
        let err = load(&mock, "vault:contoso:signing").err().unwrap();
        assert!(matches!(err, KeyError::CredentialError(_)));
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn test_load_from_local_vault() {
        let reference = VaultReference::parse("vault:local:release").unwrap();
        let mut vault = LocalMemoryVault::new();
        vault.insert_pkcs8_pem(reference, TEST_RSA_KEY_PEM).unwrap();
        let services = Services::local(vault);

        let key = load_key(
            "VAULT:local:release",
            KeyUsage::Private,
            &services,
            &SoftAdapter::new(),
        )
        .unwrap();
        let digest = Sha256::digest(b"release artifact");
        let signature = key
            .sign(Some(DigestAlgorithm::Sha256), RsaPadding::Pkcs1, &digest)
            .unwrap();
        key.rsa_public_key()
            .unwrap()
            .verify(
                PaddingScheme::new_pkcs1v15_sign(Some(Hash::SHA2_256)),
                &digest,
                &signature,
            )
            .unwrap();

        let ciphertext = key.private_encrypt(RsaPadding::Pkcs1, b"session key").unwrap();
        assert_eq!(
            key.decrypt(RsaPadding::Pkcs1, &ciphertext).unwrap(),
            b"session key"
        );
    }
}
