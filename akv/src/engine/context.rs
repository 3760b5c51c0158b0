// Copyright 2021 Contributors to the Confidential Packaging project.
// SPDX-License-Identifier: MIT

//! The remote key context: the local handle for a key whose private operations happen in a vault.

use crate::keys::error::KeyError;
use crate::keys::local::LocalMemoryVault;
use crate::keys::{
    AccessToken, CredentialProvider, EncryptionAlgorithm, PublicKeyMaterial, RemoteKeyClient,
    Result, SignatureAlgorithm, VaultReference, VaultType,
};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

#[cfg(feature = "key-management")]
use crate::config::EngineConfig;

/// The pair of collaborators that every remote key operation needs.
#[derive(Clone)]
pub struct Services {
    pub credentials: Arc<dyn CredentialProvider>,
    pub client: Arc<dyn RemoteKeyClient>,
}

impl Services {
    pub fn new(
        credentials: Arc<dyn CredentialProvider>,
        client: Arc<dyn RemoteKeyClient>,
    ) -> Services {
        Services {
            credentials,
            client,
        }
    }

    /// The managed identity provider and the REST client, both built from the given configuration.
    #[cfg(feature = "key-management")]
    pub fn from_config(config: &EngineConfig) -> Result<Services> {
        use crate::keys::http::HttpKeyVaultClient;
        use crate::keys::imds::ImdsCredentialProvider;

        Ok(Services {
            credentials: Arc::new(ImdsCredentialProvider::from_config(config)?),
            client: Arc::new(HttpKeyVaultClient::from_config(config)?),
        })
    }

    /// Uses an in-memory vault as both the credential provider and the client.
    pub fn local(vault: LocalMemoryVault) -> Services {
        let vault = Arc::new(vault);
        Services {
            credentials: vault.clone(),
            client: vault,
        }
    }
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Services { .. }")
    }
}

#[cfg(test)]
thread_local! {
    static LIVE_CONTEXTS: std::cell::Cell<isize> = std::cell::Cell::new(0);
}

/// The number of contexts created on the current thread that have not been dropped yet.
#[cfg(test)]
pub(crate) fn live_contexts() -> isize {
    LIVE_CONTEXTS.with(|count| count.get())
}

/// Owns everything needed to perform private-key operations on one vault key.
///
/// A context is attached to at most one key object. Once attached, it is owned by that key object
/// and dropped by the key's teardown. A context that never gets attached is simply dropped by its
/// creator.
///
/// Operations through one context are serialized. A fresh access token is obtained for each
/// operation, and released as soon as the operation completes.
pub struct RemoteKeyContext {
    reference: VaultReference,
    services: Services,
    lock: Mutex<()>,
}

impl RemoteKeyContext {
    /// Creates a context for the named key. No network calls are made.
    pub fn acquire(
        vault_type: VaultType,
        vault_name: &str,
        key_name: &str,
        services: Services,
    ) -> Result<RemoteKeyContext> {
        let reference = VaultReference::new(vault_type, vault_name, key_name)?;
        Ok(RemoteKeyContext::with_reference(reference, services))
    }

    pub fn with_reference(reference: VaultReference, services: Services) -> RemoteKeyContext {
        #[cfg(test)]
        LIVE_CONTEXTS.with(|count| count.set(count.get() + 1));
        log::trace!("Created remote key context for {}.", reference);
        RemoteKeyContext {
            reference,
            services,
            lock: Mutex::new(()),
        }
    }

    pub fn reference(&self) -> &VaultReference {
        &self.reference
    }

    fn serialize(&self) -> MutexGuard<'_, ()> {
        self.lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Obtains a fresh token for this key's vault.
    pub fn access_token(&self) -> Result<AccessToken> {
        self.services
            .credentials
            .get_token(self.reference.vault_type())
            .map_err(KeyError::credential)
    }

    /// Fetches the public part of the key with the given token.
    pub fn fetch_public_key(&self, token: &AccessToken) -> Result<PublicKeyMaterial> {
        let _guard = self.serialize();
        self.services
            .client
            .fetch_public_key(&self.reference, token)
            .map_err(KeyError::key_fetch)
    }

    /// Signs a digest in the vault.
    pub fn sign(&self, algorithm: SignatureAlgorithm, digest: &[u8]) -> Result<Vec<u8>> {
        let _guard = self.serialize();
        let token = self.access_token()?;
        log::debug!("Remote {} signature with {}.", algorithm, self.reference);
        self.services
            .client
            .sign(&self.reference, &token, algorithm, digest)
            .map_err(|err| self.failed("sign", err))
    }

    /// Decrypts a ciphertext in the vault.
    pub fn decrypt(&self, algorithm: EncryptionAlgorithm, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let _guard = self.serialize();
        let token = self.access_token()?;
        log::debug!("Remote {} decryption with {}.", algorithm, self.reference);
        self.services
            .client
            .decrypt(&self.reference, &token, algorithm, ciphertext)
            .map_err(|err| self.failed("decrypt", err))
    }

    /// Runs the vault encrypt operation.
    pub fn encrypt(&self, algorithm: EncryptionAlgorithm, plaintext: &[u8]) -> Result<Vec<u8>> {
        let _guard = self.serialize();
        let token = self.access_token()?;
        log::debug!("Remote {} encryption with {}.", algorithm, self.reference);
        self.services
            .client
            .encrypt(&self.reference, &token, algorithm, plaintext)
            .map_err(|err| self.failed("encrypt", err))
    }

    fn failed(&self, operation: &str, err: KeyError) -> KeyError {
        log::error!("Remote {} with {} failed: {}", operation, self.reference, err);
        KeyError::remote(err)
    }
}

impl fmt::Debug for RemoteKeyContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteKeyContext")
            .field("reference", &self.reference)
            .finish()
    }
}

impl Drop for RemoteKeyContext {
    fn drop(&mut self) {
        #[cfg(test)]
        LIVE_CONTEXTS.with(|count| count.set(count.get() - 1));
        log::trace!("Destroyed remote key context for {}.", self.reference);
    }
}
