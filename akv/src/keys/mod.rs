// Copyright 2021 Contributors to the Confidential Packaging project.
// SPDX-License-Identifier: MIT

//! This module defines the protocols that are needed to use an asymmetric key whose private part is
//! held in a remote vault. The top-level module defines the protocols as traits, and the various
//! sub-modules implement these traits in some useful ways.
//!
//! There are two collaborators involved in every remote key operation: a _credential provider_ and a
//! _remote key client_.
//!
//! The credential provider yields a short-lived bearer token that authorizes calls against a vault.
//! On an Azure compute resource, the token normally comes from the Instance Metadata Service (IMDS)
//! of the platform's managed identity. Tokens are scoped to a vault type: a token for a standard key
//! vault cannot be used against a managed HSM and vice versa.
//!
//! The remote key client talks to the vault itself. It can fetch the public part of a key, so that
//! a local key object can be built from it, and it can perform the private-key operations (signing,
//! decryption) on behalf of the caller. The private key never leaves the vault.
//!
//! Keys are addressed with a [VaultReference], which is normally parsed from a key identifier string
//! of the form `<vault type>:<vault name>:<key name>`. See the [id] module.

pub mod error;
pub mod id;
pub mod local;

#[cfg(feature = "key-management")]
pub mod http;

#[cfg(feature = "key-management")]
pub mod imds;

pub use id::{VaultReference, VaultType, KEY_ID_MAX_SIZE};

use error::KeyError;
use std::fmt;
use zeroize::Zeroizing;

/// Convenient result alias for this module, where errors are of type [KeyError].
pub type Result<T> = std::result::Result<T, error::KeyError>;

/// A bearer token that authorizes calls against a vault.
///
/// The token is owned by whoever requested it. Its bytes are wiped from memory when the value is
/// dropped, on success and failure paths alike.
pub struct AccessToken {
    value: Zeroizing<String>,
}

impl AccessToken {
    /// Wraps the given bearer token.
    pub fn new<S: Into<String>>(value: S) -> AccessToken {
        AccessToken {
            value: Zeroizing::new(value.into()),
        }
    }

    /// The raw token, for use in an `Authorization: Bearer` header.
    pub fn secret(&self) -> &str {
        self.value.as_str()
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccessToken([{} bytes redacted])", self.value.len())
    }
}

/// The asymmetric algorithm family of a key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyAlgorithm {
    Rsa,
    Ec,
    /// Anything the vault can hold that is neither RSA nor EC (symmetric keys, OKP, ...).
    Other,
}

/// The elliptic curves supported by the vault service.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EcCurve {
    /// NIST P-256, also known as secp256r1 or prime256v1.
    P256,
    /// The SECG secp256k1 curve.
    P256K,
    /// NIST P-384 (secp384r1).
    P384,
    /// NIST P-521 (secp521r1).
    P521,
}

impl EcCurve {
    /// Looks up a curve from its JSON Web Key `crv` name. Matching is case-insensitive.
    pub fn from_jwk_name(name: &str) -> Option<EcCurve> {
        [EcCurve::P256, EcCurve::P256K, EcCurve::P384, EcCurve::P521]
            .iter()
            .copied()
            .find(|curve| curve.jwk_name().eq_ignore_ascii_case(name))
    }

    pub fn jwk_name(&self) -> &'static str {
        match self {
            EcCurve::P256 => "P-256",
            EcCurve::P256K => "P-256K",
            EcCurve::P384 => "P-384",
            EcCurve::P521 => "P-521",
        }
    }

    /// Size in bytes of a field element, which is also the size of each of `r` and `s` in the raw
    /// signatures that the vault returns.
    pub fn field_size(&self) -> usize {
        match self {
            EcCurve::P256 | EcCurve::P256K => 32,
            EcCurve::P384 => 48,
            EcCurve::P521 => 66,
        }
    }

    /// The vault signing algorithm that goes with this curve.
    pub fn signature_algorithm(&self) -> SignatureAlgorithm {
        match self {
            EcCurve::P256 => SignatureAlgorithm::Es256,
            EcCurve::P256K => SignatureAlgorithm::Es256K,
            EcCurve::P384 => SignatureAlgorithm::Es384,
            EcCurve::P521 => SignatureAlgorithm::Es512,
        }
    }
}

/// The public part of a vault key, as fetched by a [RemoteKeyClient].
///
/// All integers are unsigned big-endian byte strings, exactly as they appear (base64url-decoded)
/// in the JSON Web Key returned by the vault.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PublicKeyMaterial {
    Rsa { n: Vec<u8>, e: Vec<u8> },
    Ec { curve: EcCurve, x: Vec<u8>, y: Vec<u8> },
    Other { kty: String },
}

impl PublicKeyMaterial {
    pub fn algorithm(&self) -> KeyAlgorithm {
        match self {
            PublicKeyMaterial::Rsa { .. } => KeyAlgorithm::Rsa,
            PublicKeyMaterial::Ec { .. } => KeyAlgorithm::Ec,
            PublicKeyMaterial::Other { .. } => KeyAlgorithm::Other,
        }
    }
}

/// Message digests that can accompany a signature request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    pub fn output_len(&self) -> usize {
        match self {
            DigestAlgorithm::Sha256 => 32,
            DigestAlgorithm::Sha384 => 48,
            DigestAlgorithm::Sha512 => 64,
        }
    }
}

/// RSA padding modes, as selected by the caller of a private-key operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RsaPadding {
    Pkcs1,
    Pkcs1Oaep,
    Pkcs1Pss,
    /// Raw RSA, or any other mode the vault does not offer. Carries the crypto library's code.
    Other(i32),
}

/// Signing algorithm names understood by the vault `sign` operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    Rs256,
    Rs384,
    Rs512,
    Ps256,
    Ps384,
    Ps512,
    Es256,
    Es256K,
    Es384,
    Es512,
}

impl SignatureAlgorithm {
    /// Picks the RSA signing algorithm for a digest and padding mode. Only PKCS#1 v1.5 and PSS
    /// padding can be used for signing.
    pub fn for_rsa(digest: DigestAlgorithm, padding: RsaPadding) -> Result<SignatureAlgorithm> {
        let algorithm = match (padding, digest) {
            (RsaPadding::Pkcs1, DigestAlgorithm::Sha256) => SignatureAlgorithm::Rs256,
            (RsaPadding::Pkcs1, DigestAlgorithm::Sha384) => SignatureAlgorithm::Rs384,
            (RsaPadding::Pkcs1, DigestAlgorithm::Sha512) => SignatureAlgorithm::Rs512,
            (RsaPadding::Pkcs1Pss, DigestAlgorithm::Sha256) => SignatureAlgorithm::Ps256,
            (RsaPadding::Pkcs1Pss, DigestAlgorithm::Sha384) => SignatureAlgorithm::Ps384,
            (RsaPadding::Pkcs1Pss, DigestAlgorithm::Sha512) => SignatureAlgorithm::Ps512,
            (padding, _) => {
                return Err(KeyError::UnsupportedAlgorithm(format!(
                    "RSA signing with {:?} padding",
                    padding
                )))
            }
        };
        Ok(algorithm)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureAlgorithm::Rs256 => "RS256",
            SignatureAlgorithm::Rs384 => "RS384",
            SignatureAlgorithm::Rs512 => "RS512",
            SignatureAlgorithm::Ps256 => "PS256",
            SignatureAlgorithm::Ps384 => "PS384",
            SignatureAlgorithm::Ps512 => "PS512",
            SignatureAlgorithm::Es256 => "ES256",
            SignatureAlgorithm::Es256K => "ES256K",
            SignatureAlgorithm::Es384 => "ES384",
            SignatureAlgorithm::Es512 => "ES512",
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encryption algorithm names understood by the vault `encrypt` and `decrypt` operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncryptionAlgorithm {
    Rsa1_5,
    RsaOaep,
}

impl EncryptionAlgorithm {
    /// Maps the caller's padding mode onto a vault algorithm. Only PKCS#1 v1.5 and OAEP are
    /// accepted; everything else is rejected before any network call is made.
    pub fn for_padding(padding: RsaPadding) -> Result<EncryptionAlgorithm> {
        match padding {
            RsaPadding::Pkcs1 => Ok(EncryptionAlgorithm::Rsa1_5),
            RsaPadding::Pkcs1Oaep => Ok(EncryptionAlgorithm::RsaOaep),
            other => Err(KeyError::UnsupportedAlgorithm(format!(
                "RSA encryption with {:?} padding",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EncryptionAlgorithm::Rsa1_5 => "RSA1_5",
            EncryptionAlgorithm::RsaOaep => "RSA-OAEP",
        }
    }
}

impl fmt::Display for EncryptionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// This trait models a source of bearer tokens for vault calls, such as the managed identity
/// endpoint of the platform.
///
/// The returned token is owned by the caller. Every private-key operation asks for a fresh token,
/// so implementations are free to cache tokens until shortly before they expire, but they are not
/// required to.
pub trait CredentialProvider: Send + Sync {
    /// Obtains a token whose audience is the given type of vault.
    fn get_token(&self, vault_type: VaultType) -> Result<AccessToken>;
}

/// This trait models a remote vault that holds asymmetric key pairs and performs private-key
/// operations on behalf of the caller.
///
/// There are no functions for creating, deleting or enumerating keys. While the vault might well
/// have all of these facilities available, they are not relevant from the perspective of this
/// crate.
pub trait RemoteKeyClient: Send + Sync {
    /// Fetches the public part of the referenced key.
    ///
    /// Keys that are neither RSA nor EC are returned as [PublicKeyMaterial::Other], and are left for
    /// the caller to reject.
    fn fetch_public_key(
        &self,
        reference: &VaultReference,
        token: &AccessToken,
    ) -> Result<PublicKeyMaterial>;

    /// Signs a precomputed digest with the referenced private key.
    ///
    /// RSA signatures are returned as the raw signature block. EC signatures are returned in the
    /// vault's raw `r || s` form, each half being the size of a field element.
    fn sign(
        &self,
        reference: &VaultReference,
        token: &AccessToken,
        algorithm: SignatureAlgorithm,
        digest: &[u8],
    ) -> Result<Vec<u8>>;

    /// Decrypts the given ciphertext with the referenced private key.
    fn decrypt(
        &self,
        reference: &VaultReference,
        token: &AccessToken,
        algorithm: EncryptionAlgorithm,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>>;

    /// Runs the vault `encrypt` operation on the given input with the referenced key.
    fn encrypt(
        &self,
        reference: &VaultReference,
        token: &AccessToken,
        algorithm: EncryptionAlgorithm,
        plaintext: &[u8],
    ) -> Result<Vec<u8>>;
}
