// Copyright 2021 Contributors to the Confidential Packaging project.
// SPDX-License-Identifier: MIT

//! Test doubles shared by the unit tests of this crate.

use super::context::{RemoteKeyContext, Services};
use crate::keys::error::KeyError;
use crate::keys::{
    AccessToken, CredentialProvider, EcCurve, EncryptionAlgorithm, PublicKeyMaterial,
    RemoteKeyClient, Result, SignatureAlgorithm, VaultReference, VaultType,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub use crate::keys::local::TEST_RSA_KEY_PEM;

/// The modulus size of the RSA key that [MockVault::rsa] serves.
pub const MOCK_RSA_MODULUS_LEN: usize = 128;

/// A scripted vault that records every call made to it.
#[derive(Clone)]
pub struct MockVault {
    material: PublicKeyMaterial,
    signature: Vec<u8>,
    plaintext: Vec<u8>,
    fail_credentials: bool,
    fail_fetch: bool,
    fail_operations: bool,
    calls: Arc<Mutex<Vec<String>>>,
    inputs: Arc<Mutex<Vec<Vec<u8>>>>,
    tokens: Arc<AtomicUsize>,
}

impl MockVault {
    pub fn with_material(material: PublicKeyMaterial) -> MockVault {
        MockVault {
            material,
            signature: vec![0x5a; MOCK_RSA_MODULUS_LEN],
            plaintext: b"plaintext".to_vec(),
            fail_credentials: false,
            fail_fetch: false,
            fail_operations: false,
            calls: Arc::new(Mutex::new(Vec::new())),
            inputs: Arc::new(Mutex::new(Vec::new())),
            tokens: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Serves a 1024-bit RSA public key and returns a modulus-sized signature.
    pub fn rsa() -> MockVault {
        let mut n = vec![0xc5; MOCK_RSA_MODULUS_LEN];
        n[MOCK_RSA_MODULUS_LEN - 1] = 0x01;
        MockVault::with_material(PublicKeyMaterial::Rsa {
            n,
            e: vec![0x01, 0x00, 0x01],
        })
    }

    /// Serves an EC public key on the given curve and returns a raw `r || s` signature.
    pub fn ec(curve: EcCurve) -> MockVault {
        let size = curve.field_size();
        let mut signature = vec![0x81; size];
        signature.extend(vec![0x11; size]);
        MockVault::with_material(PublicKeyMaterial::Ec {
            curve,
            x: vec![0x02; size],
            y: vec![0x03; size],
        })
        .with_signature(signature)
    }

    pub fn with_signature(mut self, signature: Vec<u8>) -> MockVault {
        self.signature = signature;
        self
    }

    pub fn failing_credentials(mut self) -> MockVault {
        self.fail_credentials = true;
        self
    }

    pub fn failing_fetch(mut self) -> MockVault {
        self.fail_fetch = true;
        self
    }

    pub fn failing_operations(mut self) -> MockVault {
        self.fail_operations = true;
        self
    }

    pub fn material(&self) -> PublicKeyMaterial {
        self.material.clone()
    }

    pub fn services(&self) -> Services {
        let shared = Arc::new(self.clone());
        Services::new(shared.clone(), shared)
    }

    pub fn context(&self, key_id: &str) -> RemoteKeyContext {
        RemoteKeyContext::with_reference(VaultReference::parse(key_id).unwrap(), self.services())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// The digests, ciphertexts and plaintexts passed to sign, decrypt and encrypt, in call order.
    pub fn inputs(&self) -> Vec<Vec<u8>> {
        self.inputs.lock().unwrap().clone()
    }

    pub fn tokens_issued(&self) -> usize {
        self.tokens.load(Ordering::SeqCst)
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn operation(
        &self,
        name: &str,
        reference: &VaultReference,
        alg: &str,
        input: &[u8],
        output: &[u8],
    ) -> Result<Vec<u8>> {
        self.record(format!("{} {} {} {}", name, reference, alg, input.len()));
        self.inputs.lock().unwrap().push(input.to_vec());
        if self.fail_operations {
            return Err(KeyError::ServiceError(String::from("BadParameter")));
        }
        Ok(output.to_vec())
    }
}

impl CredentialProvider for MockVault {
    fn get_token(&self, _vault_type: VaultType) -> Result<AccessToken> {
        if self.fail_credentials {
            return Err(KeyError::ServiceError(String::from("Identity not found")));
        }
        let issued = self.tokens.fetch_add(1, Ordering::SeqCst);
        Ok(AccessToken::new(format!("token-{}", issued)))
    }
}

impl RemoteKeyClient for MockVault {
    fn fetch_public_key(
        &self,
        reference: &VaultReference,
        _token: &AccessToken,
    ) -> Result<PublicKeyMaterial> {
        self.record(format!("fetch {}", reference));
        if self.fail_fetch {
            return Err(KeyError::ServiceError(String::from("Forbidden")));
        }
        Ok(self.material.clone())
    }

    fn sign(
        &self,
        reference: &VaultReference,
        _token: &AccessToken,
        algorithm: SignatureAlgorithm,
        digest: &[u8],
    ) -> Result<Vec<u8>> {
        self.operation("sign", reference, algorithm.as_str(), digest, &self.signature)
    }

    fn decrypt(
        &self,
        reference: &VaultReference,
        _token: &AccessToken,
        algorithm: EncryptionAlgorithm,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>> {
        self.operation(
            "decrypt",
            reference,
            algorithm.as_str(),
            ciphertext,
            &self.plaintext,
        )
    }

    fn encrypt(
        &self,
        reference: &VaultReference,
        _token: &AccessToken,
        algorithm: EncryptionAlgorithm,
        plaintext: &[u8],
    ) -> Result<Vec<u8>> {
        self.operation(
            "encrypt",
            reference,
            algorithm.as_str(),
            plaintext,
            &[0xe5; MOCK_RSA_MODULUS_LEN],
        )
    }
}
