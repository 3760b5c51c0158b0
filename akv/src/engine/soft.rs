// Copyright 2021 Contributors to the Confidential Packaging project.
// SPDX-License-Identifier: MIT

//! An in-process host for vault keys.
//!
//! [SoftKey] is a plain Rust key object with the same shape as the crypto library's key objects: it
//! carries public material, an extension slot, and a pointer to a method table that dispatches its
//! private-key operations. Freshly built keys use a table that refuses every private-key operation.
//! [SoftAdapter] swaps in the remote table from the process-wide registry and attaches the remote
//! key context, after which signing and decryption are done in the vault.
//!
//! This is what the command line tool uses, and it lets the whole load-and-redirect path run
//! without OpenSSL.

use super::adapter::KeyAdapter;
use super::context::RemoteKeyContext;
use super::redirect;
use super::registry::{MethodRegistry, MethodTables};
use super::slot::{ContextSlot, ExtensionSlot};
use crate::keys::error::KeyError;
use crate::keys::{
    DigestAlgorithm, EcCurve, KeyAlgorithm, PublicKeyMaterial, Result, RsaPadding,
};

use rsa::{BigUint, PublicKeyParts, RsaPublicKey};

/// The dispatch table of a [SoftKey].
pub struct SoftKeyMethods {
    pub name: &'static str,
    pub sign: fn(&SoftKey, Option<DigestAlgorithm>, RsaPadding, &[u8]) -> Result<Vec<u8>>,
    pub decrypt: fn(&SoftKey, RsaPadding, &[u8]) -> Result<Vec<u8>>,
    pub private_encrypt: fn(&SoftKey, RsaPadding, &[u8]) -> Result<Vec<u8>>,
    pub finish: fn(&mut SoftKey),
}

fn no_private_key_sign(
    _key: &SoftKey,
    _digest_algorithm: Option<DigestAlgorithm>,
    _padding: RsaPadding,
    _digest: &[u8],
) -> Result<Vec<u8>> {
    Err(KeyError::NoPrivateKey)
}

fn no_private_key(_key: &SoftKey, _padding: RsaPadding, _input: &[u8]) -> Result<Vec<u8>> {
    Err(KeyError::NoPrivateKey)
}

fn not_for_ec(_key: &SoftKey, _padding: RsaPadding, _input: &[u8]) -> Result<Vec<u8>> {
    Err(KeyError::UnsupportedAlgorithm(String::from(
        "encryption with an EC key",
    )))
}

fn no_finish(_key: &mut SoftKey) {}

/// Methods of a key that only has public material.
pub static PUBLIC_ONLY_METHODS: SoftKeyMethods = SoftKeyMethods {
    name: "public key",
    sign: no_private_key_sign,
    decrypt: no_private_key,
    private_encrypt: no_private_key,
    finish: no_finish,
};

fn remote_rsa_sign(
    key: &SoftKey,
    digest_algorithm: Option<DigestAlgorithm>,
    padding: RsaPadding,
    digest: &[u8],
) -> Result<Vec<u8>> {
    redirect::rsa_sign(&key.slot, digest_algorithm, padding, digest, key.size())
}

fn remote_rsa_decrypt(key: &SoftKey, padding: RsaPadding, ciphertext: &[u8]) -> Result<Vec<u8>> {
    redirect::rsa_decrypt(&key.slot, padding, ciphertext)
}

fn remote_rsa_private_encrypt(key: &SoftKey, padding: RsaPadding, input: &[u8]) -> Result<Vec<u8>> {
    redirect::rsa_private_encrypt(&key.slot, padding, input)
}

fn remote_ec_sign(
    key: &SoftKey,
    _digest_algorithm: Option<DigestAlgorithm>,
    _padding: RsaPadding,
    digest: &[u8],
) -> Result<Vec<u8>> {
    match key.curve() {
        Some(curve) => redirect::ec_sign(&key.slot, curve, digest),
        None => Err(KeyError::UnsupportedAlgorithm(String::from(
            "EC signing with a non-EC key",
        ))),
    }
}

fn remote_finish(key: &mut SoftKey) {
    redirect::finish(&mut key.slot);
}

/// The remote method tables for RSA and EC soft keys.
pub struct SoftMethodTables {
    pub rsa: SoftKeyMethods,
    pub ec: SoftKeyMethods,
}

impl MethodTables for SoftMethodTables {
    fn allocate() -> Result<SoftMethodTables> {
        Ok(SoftMethodTables {
            rsa: SoftKeyMethods {
                name: "remote RSA key",
                sign: remote_rsa_sign,
                decrypt: remote_rsa_decrypt,
                private_encrypt: remote_rsa_private_encrypt,
                finish: remote_finish,
            },
            ec: SoftKeyMethods {
                name: "remote EC key",
                sign: remote_ec_sign,
                decrypt: not_for_ec,
                private_encrypt: not_for_ec,
                finish: remote_finish,
            },
        })
    }

    fn release(&self) {}
}

/// The process-wide registry of soft key method tables.
pub static SOFT_REGISTRY: MethodRegistry<SoftMethodTables> = MethodRegistry::new();

/// A key object that holds public key material in process memory.
pub struct SoftKey {
    material: PublicKeyMaterial,
    rsa: Option<RsaPublicKey>,
    slot: ExtensionSlot,
    methods: &'static SoftKeyMethods,
}

impl SoftKey {
    /// Builds a public-only key object. RSA material must form a valid RSA public key, and EC
    /// coordinates must fit the curve.
    pub fn from_material(material: &PublicKeyMaterial) -> Result<SoftKey> {
        let (material, rsa) = match material {
            PublicKeyMaterial::Rsa { n, e } => {
                let public_key =
                    RsaPublicKey::new(BigUint::from_bytes_be(n), BigUint::from_bytes_be(e))?;
                (material.clone(), Some(public_key))
            }
            PublicKeyMaterial::Ec { curve, x, y } => {
                let material = PublicKeyMaterial::Ec {
                    curve: *curve,
                    x: fit_coordinate(x, *curve)?,
                    y: fit_coordinate(y, *curve)?,
                };
                (material, None)
            }
            PublicKeyMaterial::Other { kty } => {
                return Err(KeyError::UnsupportedAlgorithm(format!("key type '{}'", kty)))
            }
        };
        Ok(SoftKey {
            material,
            rsa,
            slot: ExtensionSlot::new(),
            methods: &PUBLIC_ONLY_METHODS,
        })
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        self.material.algorithm()
    }

    pub fn material(&self) -> &PublicKeyMaterial {
        &self.material
    }

    pub fn curve(&self) -> Option<EcCurve> {
        match &self.material {
            PublicKeyMaterial::Ec { curve, .. } => Some(*curve),
            _ => None,
        }
    }

    pub fn rsa_public_key(&self) -> Option<&RsaPublicKey> {
        self.rsa.as_ref()
    }

    /// The modulus size in bytes for RSA keys, or the field size for EC keys.
    pub fn size(&self) -> usize {
        match (&self.rsa, self.curve()) {
            (Some(public_key), _) => public_key.size(),
            (None, Some(curve)) => curve.field_size(),
            (None, None) => 0,
        }
    }

    /// Whether the key's private operations are done in a vault.
    pub fn is_remote(&self) -> bool {
        !self.slot.is_empty()
    }

    /// The name of the method table in use.
    pub fn method_name(&self) -> &'static str {
        self.methods.name
    }

    /// Signs a digest. The padding is ignored for EC keys, which return DER signatures.
    pub fn sign(
        &self,
        digest_algorithm: Option<DigestAlgorithm>,
        padding: RsaPadding,
        digest: &[u8],
    ) -> Result<Vec<u8>> {
        (self.methods.sign)(self, digest_algorithm, padding, digest)
    }

    pub fn decrypt(&self, padding: RsaPadding, ciphertext: &[u8]) -> Result<Vec<u8>> {
        (self.methods.decrypt)(self, padding, ciphertext)
    }

    pub fn private_encrypt(&self, padding: RsaPadding, input: &[u8]) -> Result<Vec<u8>> {
        (self.methods.private_encrypt)(self, padding, input)
    }
}

impl Drop for SoftKey {
    fn drop(&mut self) {
        (self.methods.finish)(self);
    }
}

fn fit_coordinate(coordinate: &[u8], curve: EcCurve) -> Result<Vec<u8>> {
    let size = curve.field_size();
    if coordinate.len() > size {
        return Err(KeyError::InvalidKeyMaterial(format!(
            "a {}-byte coordinate on {}",
            coordinate.len(),
            curve.jwk_name()
        )));
    }
    let mut fitted = vec![0u8; size - coordinate.len()];
    fitted.extend_from_slice(coordinate);
    Ok(fitted)
}

/// Adapts [SoftKey]s with the remote method tables of a registry.
pub struct SoftAdapter {
    registry: &'static MethodRegistry<SoftMethodTables>,
}

impl SoftAdapter {
    /// An adapter that uses the process-wide [SOFT_REGISTRY].
    pub fn new() -> SoftAdapter {
        SoftAdapter::with_registry(&SOFT_REGISTRY)
    }

    pub fn with_registry(registry: &'static MethodRegistry<SoftMethodTables>) -> SoftAdapter {
        SoftAdapter { registry }
    }
}

impl Default for SoftAdapter {
    fn default() -> SoftAdapter {
        SoftAdapter::new()
    }
}

impl KeyAdapter for SoftAdapter {
    type Key = SoftKey;

    fn build(&self, material: &PublicKeyMaterial) -> Result<SoftKey> {
        SoftKey::from_material(material)
    }

    fn install(&self, key: &mut SoftKey, context: RemoteKeyContext) -> Result<()> {
        let tables = self.registry.ensure_initialized()?;
        let methods = match key.algorithm() {
            KeyAlgorithm::Rsa => &tables.rsa,
            KeyAlgorithm::Ec => &tables.ec,
            KeyAlgorithm::Other => {
                return Err(KeyError::UnsupportedAlgorithm(String::from(
                    "only RSA and EC keys can be adapted",
                )))
            }
        };
        key.methods = methods;
        key.slot.attach(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::context::live_contexts;
    use crate::engine::testing::{MockVault, MOCK_RSA_MODULUS_LEN};
    use crate::keys::error::ErrorKind;

    #[test]
    fn test_build_from_material() {
        let key = SoftKey::from_material(&MockVault::rsa().material()).unwrap();
        assert_eq!(key.algorithm(), KeyAlgorithm::Rsa);
        assert_eq!(key.size(), MOCK_RSA_MODULUS_LEN);
        assert!(!key.is_remote());

        let key = SoftKey::from_material(&PublicKeyMaterial::Ec {
            curve: EcCurve::P521,
            x: vec![0x01; 65],
            y: vec![0x02; 66],
        })
        .unwrap();
        assert_eq!(key.size(), 66);
        match key.material() {
            PublicKeyMaterial::Ec { x, .. } => assert_eq!(x[0], 0),
            other => panic!("unexpected material {:?}", other),
        }
    }

    #[test]
    fn test_build_rejects_bad_material() {
        let err = SoftKey::from_material(&PublicKeyMaterial::Other {
            kty: String::from("oct"),
        })
        .err()
        .unwrap();
        assert_eq!(err.kind(), ErrorKind::UnsupportedAlgorithm);

        let err = SoftKey::from_material(&PublicKeyMaterial::Ec {
            curve: EcCurve::P256,
            x: vec![0x01; 33],
            y: vec![0x02; 32],
        })
        .err()
        .unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidKeyMaterial);
    }

    #[test]
    fn test_public_only_key_refuses_private_operations() {
        let key = SoftKey::from_material(&MockVault::rsa().material()).unwrap();
        let err = key
            .sign(Some(DigestAlgorithm::Sha256), RsaPadding::Pkcs1, &[0u8; 32])
            .unwrap_err();
        assert!(matches!(err, KeyError::NoPrivateKey));
        assert!(key.decrypt(RsaPadding::Pkcs1, &[0u8; 128]).is_err());
    }

    #[test]
    fn test_adapted_key_redirects_and_releases() {
        let mock = MockVault::ec(EcCurve::P256);
        let before = live_contexts();
        let adapter = SoftAdapter::new();
        let mut key = adapter.build(&mock.material()).unwrap();
        adapter
            .install(&mut key, mock.context("vault:contoso:ec-key"))
            .unwrap();
        assert!(key.is_remote());
        assert_eq!(key.method_name(), "remote EC key");

        let der = key.sign(None, RsaPadding::Pkcs1, &[4u8; 32]).unwrap();
        assert_eq!(der[0], 0x30);
        assert_eq!(mock.calls(), vec!["sign vault:contoso:ec-key ES256 32"]);
        assert_eq!(mock.inputs(), vec![vec![4u8; 32]]);
        assert_eq!(
            key.decrypt(RsaPadding::Pkcs1, &[0u8; 32]).unwrap_err().kind(),
            ErrorKind::UnsupportedAlgorithm
        );

        drop(key);
        assert_eq!(live_contexts(), before);
    }

    #[test]
    fn test_install_after_teardown_fails() {
        static REGISTRY: MethodRegistry<SoftMethodTables> = MethodRegistry::new();
        let mock = MockVault::rsa();
        let before = live_contexts();
        let adapter = SoftAdapter::with_registry(&REGISTRY);
        REGISTRY.teardown();

        let mut key = adapter.build(&mock.material()).unwrap();
        let err = adapter
            .install(&mut key, mock.context("vault:contoso:rsa-key"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AllocationFailure);
        assert!(!key.is_remote());
        assert_eq!(live_contexts(), before);
    }
}
