// Copyright 2021 Contributors to the Confidential Packaging project.
// SPDX-License-Identifier: MIT

//! Key adapters for the two OpenSSL generations.

use super::key::OsslKey;
use super::methods::OsslTables;
use super::slot::ExDataSlot;
use crate::engine::{ContextSlot, Generation, KeyAdapter, RemoteKeyContext};
use crate::keys::error::KeyError;
use crate::keys::{PublicKeyMaterial, Result};

use akv_sys as ffi;

fn unsupported(key: &OsslKey) -> KeyError {
    KeyError::UnsupportedAlgorithm(format!("EVP_PKEY type {}", key.id()))
}

/// Attaches the context to the RSA or EC key inside `key`, after optionally installing the
/// engine's method on it.
fn attach(
    key: &mut OsslKey,
    tables: &OsslTables,
    context: RemoteKeyContext,
    install_methods: bool,
) -> Result<()> {
    let mut slot = match key.id() {
        ffi::EVP_PKEY_RSA | ffi::EVP_PKEY_RSA_PSS => {
            let rsa = key.rsa_ptr();
            if rsa.is_null() {
                return Err(unsupported(key));
            }
            if install_methods && unsafe { ffi::RSA_set_method(rsa, tables.rsa_method) } != 1 {
                return Err(KeyError::AllocationFailure("RSA_set_method"));
            }
            ExDataSlot::Rsa {
                key: rsa,
                index: tables.rsa_index,
            }
        }
        ffi::EVP_PKEY_EC => {
            let ec = key.ec_key_ptr();
            if ec.is_null() {
                return Err(unsupported(key));
            }
            if install_methods && unsafe { ffi::EC_KEY_set_method(ec, tables.ec_method) } != 1 {
                return Err(KeyError::AllocationFailure("EC_KEY_set_method"));
            }
            ExDataSlot::EcKey {
                key: ec,
                index: tables.ec_index,
            }
        }
        _ => return Err(unsupported(key)),
    };
    slot.attach(context)
}

/// OpenSSL 1.1: the key's `RSA_METHOD` or `EC_KEY_METHOD` is replaced, so every private-key
/// operation on it goes to the vault.
pub struct LegacyAdapter {
    tables: &'static OsslTables,
}

impl LegacyAdapter {
    pub fn new(tables: &'static OsslTables) -> LegacyAdapter {
        LegacyAdapter { tables }
    }
}

impl KeyAdapter for LegacyAdapter {
    type Key = OsslKey;

    fn build(&self, material: &PublicKeyMaterial) -> Result<OsslKey> {
        OsslKey::from_material(material)
    }

    fn install(&self, key: &mut OsslKey, context: RemoteKeyContext) -> Result<()> {
        attach(key, self.tables, context, true)
    }
}

/// OpenSSL 3.x: only the context is attached. Signing reaches the vault through the engine's
/// `EVP_PKEY_METHOD`s.
pub struct ProviderAdapter {
    tables: &'static OsslTables,
}

impl ProviderAdapter {
    pub fn new(tables: &'static OsslTables) -> ProviderAdapter {
        ProviderAdapter { tables }
    }
}

impl KeyAdapter for ProviderAdapter {
    type Key = OsslKey;

    fn build(&self, material: &PublicKeyMaterial) -> Result<OsslKey> {
        OsslKey::from_material(material)
    }

    fn install(&self, key: &mut OsslKey, context: RemoteKeyContext) -> Result<()> {
        attach(key, self.tables, context, false)
    }
}

/// Either adapter, as picked for the running OpenSSL.
pub enum OsslAdapter {
    Legacy(LegacyAdapter),
    Provider(ProviderAdapter),
}

impl OsslAdapter {
    pub fn for_tables(tables: &'static OsslTables) -> OsslAdapter {
        match tables.generation {
            Generation::Legacy => OsslAdapter::Legacy(LegacyAdapter::new(tables)),
            Generation::Provider => OsslAdapter::Provider(ProviderAdapter::new(tables)),
        }
    }
}

impl KeyAdapter for OsslAdapter {
    type Key = OsslKey;

    fn build(&self, material: &PublicKeyMaterial) -> Result<OsslKey> {
        match self {
            OsslAdapter::Legacy(adapter) => adapter.build(material),
            OsslAdapter::Provider(adapter) => adapter.build(material),
        }
    }

    fn install(&self, key: &mut OsslKey, context: RemoteKeyContext) -> Result<()> {
        match self {
            OsslAdapter::Legacy(adapter) => adapter.install(key, context),
            OsslAdapter::Provider(adapter) => adapter.install(key, context),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::context::live_contexts;
    use crate::engine::testing::{MockVault, MOCK_RSA_MODULUS_LEN};
    use crate::engine::{load_key, KeyUsage};
    use crate::keys::EcCurve;
    use crate::ossl::methods::OSSL_REGISTRY;
    use std::os::raw::c_int;
    use std::ptr;

    // The P-256 base point, a valid public key.
    const P256_X: [u8; 32] = [
        0x6b, 0x17, 0xd1, 0xf2, 0xe1, 0x2c, 0x42, 0x47, 0xf8, 0xbc, 0xe6, 0xe5, 0x63, 0xa4, 0x40,
        0xf2, 0x77, 0x03, 0x7d, 0x81, 0x2d, 0xeb, 0x33, 0xa0, 0xf4, 0xa1, 0x39, 0x45, 0xd8, 0x98,
        0xc2, 0x96,
    ];
    const P256_Y: [u8; 32] = [
        0x4f, 0xe3, 0x42, 0xe2, 0xfe, 0x1a, 0x7f, 0x9b, 0x8e, 0xe7, 0xeb, 0x4a, 0x7c, 0x0f, 0x9e,
        0x16, 0x2b, 0xce, 0x33, 0x57, 0x6b, 0x31, 0x5e, 0xce, 0xcb, 0xb6, 0x40, 0x68, 0x37, 0xbf,
        0x51, 0xf5,
    ];

    /// Serves the process-wide method tables without advertising any key type, so that freeing
    /// this engine leaves the tables alone.
    unsafe extern "C" fn borrowed_pkey_meths(
        _e: *mut ffi::ENGINE,
        pmeth: *mut *mut ffi::EVP_PKEY_METHOD,
        nids: *mut *const c_int,
        nid: c_int,
    ) -> c_int {
        if pmeth.is_null() {
            if !nids.is_null() {
                *nids = ptr::null();
            }
            return 0;
        }
        *pmeth = match OSSL_REGISTRY.get() {
            Some(tables) => tables.pkey_method(nid),
            None => ptr::null_mut(),
        };
        (!(*pmeth).is_null()) as c_int
    }

    /// An ENGINE whose `EVP_PKEY_METHOD`s are the engine's, for driving `EVP_PKEY_sign`.
    struct SigningEngine(*mut ffi::ENGINE);

    impl SigningEngine {
        fn new() -> SigningEngine {
            unsafe {
                let e = ffi::ENGINE_new();
                assert!(!e.is_null());
                assert_eq!(ffi::ENGINE_set_pkey_meths(e, Some(borrowed_pkey_meths)), 1);
                SigningEngine(e)
            }
        }

        /// Signs `digest` with SHA-256 parameters, first asking OpenSSL for the signature size.
        /// `room` shrinks the buffer below the reported size.
        fn sign(&self, key: &OsslKey, digest: &[u8], room: usize) -> (c_int, usize, Vec<u8>) {
            unsafe {
                let ctx = ffi::EVP_PKEY_CTX_new(key.as_ptr(), self.0);
                assert!(!ctx.is_null());
                assert_eq!(ffi::EVP_PKEY_sign_init(ctx), 1);
                assert!(ffi::akv_shim_ctx_set_signature_md(ctx, ffi::EVP_sha256()) > 0);

                let mut reported: ffi::size_t = 0;
                let status = ffi::EVP_PKEY_sign(
                    ctx,
                    ptr::null_mut(),
                    &mut reported,
                    digest.as_ptr(),
                    digest.len() as ffi::size_t,
                );
                assert_eq!(status, 1);
                let reported = reported as usize;

                let mut signature = vec![0u8; reported - room];
                let mut siglen = signature.len() as ffi::size_t;
                let status = ffi::EVP_PKEY_sign(
                    ctx,
                    signature.as_mut_ptr(),
                    &mut siglen,
                    digest.as_ptr(),
                    digest.len() as ffi::size_t,
                );
                ffi::EVP_PKEY_CTX_free(ctx);
                if status == 1 {
                    signature.truncate(siglen as usize);
                }
                (status, reported, signature)
            }
        }
    }

    impl Drop for SigningEngine {
        fn drop(&mut self) {
            let _ = unsafe { ffi::ENGINE_free(self.0) };
        }
    }

    fn load(mock: &MockVault, key_id: &str) -> OsslKey {
        let tables = OSSL_REGISTRY.ensure_initialized().unwrap();
        load_key(
            key_id,
            KeyUsage::Private,
            &mock.services(),
            &OsslAdapter::for_tables(tables),
        )
        .unwrap()
    }

    #[test]
    fn test_rsa_sign_through_openssl() {
        let mock = MockVault::rsa();
        let before = live_contexts();
        let key = load(&mock, "vault:contoso:signing");
        assert_eq!(key.id(), ffi::EVP_PKEY_RSA);
        assert_eq!(live_contexts(), before + 1);

        let engine = SigningEngine::new();
        let digest: Vec<u8> = (1..=32u8).collect();
        let (status, reported, signature) = engine.sign(&key, &digest, 0);
        assert_eq!(status, 1);
        assert_eq!(reported, MOCK_RSA_MODULUS_LEN);
        assert_eq!(signature, vec![0x5a; MOCK_RSA_MODULUS_LEN]);
        // The size query does not reach the vault.
        assert_eq!(
            mock.calls(),
            vec!["fetch vault:contoso:signing", "sign vault:contoso:signing RS256 32"]
        );
        assert_eq!(mock.inputs(), vec![digest]);

        drop(key);
        assert_eq!(live_contexts(), before);
    }

    #[test]
    fn test_rsa_sign_into_short_buffer_fails() {
        let mock = MockVault::rsa();
        let key = load(&mock, "vault:contoso:signing");
        let engine = SigningEngine::new();
        let (status, _, signature) = engine.sign(&key, &[9u8; 32], 1);
        assert!(status <= 0);
        assert!(signature.iter().all(|byte| *byte == 0));
    }

    #[test]
    fn test_ec_sign_through_openssl() {
        let mock = MockVault::with_material(PublicKeyMaterial::Ec {
            curve: EcCurve::P256,
            x: P256_X.to_vec(),
            y: P256_Y.to_vec(),
        })
        .with_signature([vec![0x81; 32], vec![0x11; 32]].concat());
        let before = live_contexts();
        let key = load(&mock, "managedHsm:pool:ec-key");
        assert_eq!(key.id(), ffi::EVP_PKEY_EC);

        let engine = SigningEngine::new();
        let digest = [6u8; 32];
        let (status, _, der) = engine.sign(&key, &digest, 0);
        assert_eq!(status, 1);
        // SEQUENCE { INTEGER 00 81.., INTEGER 11.. }
        assert_eq!(der.len(), 2 + 2 + 33 + 2 + 32);
        assert_eq!(&der[..5], &[0x30, 69, 0x02, 33, 0x00]);
        assert_eq!(
            mock.calls(),
            vec!["fetch managedHsm:pool:ec-key", "sign managedHsm:pool:ec-key ES256 32"]
        );
        assert_eq!(mock.inputs(), vec![digest.to_vec()]);

        drop(key);
        assert_eq!(live_contexts(), before);
    }

    #[test]
    fn test_other_material_is_rejected() {
        let mock = MockVault::with_material(PublicKeyMaterial::Other {
            kty: String::from("oct-HSM"),
        });
        let before = live_contexts();
        let tables = OSSL_REGISTRY.ensure_initialized().unwrap();
        let err = load_key(
            "managedHsm:pool:aes",
            KeyUsage::Private,
            &mock.services(),
            &OsslAdapter::for_tables(tables),
        )
        .err()
        .unwrap();
        assert!(matches!(err, KeyError::UnsupportedAlgorithm(_)));
        assert_eq!(live_contexts(), before);
    }
}
