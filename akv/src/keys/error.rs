// Copyright 2021 Contributors to the Confidential Packaging project.
// SPDX-License-Identifier: MIT

//! This module provides the error definitions and protocols for errors that can occur when keys
//! are loaded from a remote vault, and when private-key operations are redirected to it.
//!
//! Every [KeyError] can be classified into an [ErrorKind]. The kind is what crosses the boundary
//! into the host crypto library, where it becomes a reason code on the library's error stack.

use std::fmt;
use thiserror::Error;

/// Specific error types for errors that can occur while using remote keys.
#[derive(Error, Debug)]
pub enum KeyError {
    #[cfg(feature = "key-management")]
    #[error(transparent)]
    WebRequestError(#[from] reqwest::Error),

    #[error(transparent)]
    Base64DecodeError(#[from] base64::DecodeError),

    #[error(transparent)]
    Asn1Error(#[from] picky_asn1_der::Asn1DerError),

    /// Errors relating to JSON processing.
    #[error(transparent)]
    JsonError(#[from] serde_json::Error),

    /// Error coming from the RSA crate, which can happen when public key material is turned into
    /// a local key, or when the in-memory vault is used.
    #[error(transparent)]
    RsaError(#[from] rsa::errors::Error),

    /// Error coming from the PKCS1 crate.
    #[error(transparent)]
    Pkcs1Error(#[from] pkcs1::Error),

    /// Error coming from the PKCS8 crate, which can happen when private keys are imported into the
    /// in-memory vault.
    #[error(transparent)]
    Pkcs8Error(#[from] pkcs8::Error),

    /// The key identifier string is not of the form `<vault type>:<vault name>:<key name>`.
    #[error("Invalid key identifier: {0}")]
    InvalidKeyId(String),

    /// No access token could be obtained for the vault.
    #[error("Failed to obtain an access token: {0}")]
    CredentialError(Box<KeyError>),

    /// The public part of the key could not be fetched from the vault.
    #[error("Failed to fetch the public key from the vault: {0}")]
    KeyFetchError(Box<KeyError>),

    /// The key type, curve, digest or padding mode cannot be handled.
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The public key material returned by the vault does not describe a usable key.
    #[error("Invalid key material: {0}")]
    InvalidKeyMaterial(String),

    /// The vault did not complete a sign, decrypt or encrypt request.
    #[error("Remote key operation failed: {0}")]
    RemoteOperationError(Box<KeyError>),

    /// The crypto library could not allocate an object, or the method tables are gone.
    #[error("Allocation failed: {0}")]
    AllocationFailure(&'static str),

    /// A private-key operation was attempted on a key object that carries no remote key context.
    #[error("The key object has no remote key context attached.")]
    MissingKeyContext,

    /// The remote service answered, but with an error document instead of a result.
    #[error("The remote service reported an error: {0}")]
    ServiceError(String),

    /// The caller's output buffer cannot hold the result.
    #[error("Output buffer too small: {required} bytes required, {provided} provided.")]
    BufferTooSmall { required: usize, provided: usize },

    /// A private-key operation was requested from a key object that only has public material.
    #[error("The key object has no private key.")]
    NoPrivateKey,

    /// The requested key does not exist in the vault.
    #[error("The requested key could not be found in the vault.")]
    KeyNotFound,

    /// Unknown error.
    #[error("An error occurred for which no further information is available.")]
    Unknown,
}

/// The coarse classification of a [KeyError], as reported to the host crypto library.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ParseError,
    CredentialError,
    KeyFetchError,
    UnsupportedAlgorithm,
    InvalidKeyMaterial,
    RemoteOperationError,
    AllocationFailure,
    MissingKeyContext,
}

impl ErrorKind {
    /// The reason code pushed onto the crypto library's error stack for this kind of error.
    pub fn reason_code(&self) -> i32 {
        match self {
            ErrorKind::ParseError => 100,
            ErrorKind::CredentialError => 101,
            ErrorKind::KeyFetchError => 102,
            ErrorKind::UnsupportedAlgorithm => 103,
            ErrorKind::InvalidKeyMaterial => 104,
            ErrorKind::RemoteOperationError => 105,
            ErrorKind::AllocationFailure => 106,
            ErrorKind::MissingKeyContext => 107,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl KeyError {
    /// Classifies this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            KeyError::InvalidKeyId(_) => ErrorKind::ParseError,
            KeyError::CredentialError(_) => ErrorKind::CredentialError,
            KeyError::KeyFetchError(_) | KeyError::KeyNotFound => ErrorKind::KeyFetchError,
            KeyError::UnsupportedAlgorithm(_) => ErrorKind::UnsupportedAlgorithm,
            KeyError::InvalidKeyMaterial(_)
            | KeyError::Base64DecodeError(_)
            | KeyError::Asn1Error(_)
            | KeyError::RsaError(_)
            | KeyError::Pkcs1Error(_)
            | KeyError::Pkcs8Error(_) => ErrorKind::InvalidKeyMaterial,
            KeyError::AllocationFailure(_) => ErrorKind::AllocationFailure,
            KeyError::MissingKeyContext | KeyError::NoPrivateKey => ErrorKind::MissingKeyContext,
            #[cfg(feature = "key-management")]
            KeyError::WebRequestError(_) => ErrorKind::RemoteOperationError,
            KeyError::JsonError(_)
            | KeyError::RemoteOperationError(_)
            | KeyError::ServiceError(_)
            | KeyError::BufferTooSmall { .. }
            | KeyError::Unknown => ErrorKind::RemoteOperationError,
        }
    }

    /// Whether this error already states which stage of a key operation failed, as opposed to a
    /// raw transport, encoding or service error.
    fn is_classified(&self) -> bool {
        matches!(
            self,
            KeyError::InvalidKeyId(_)
                | KeyError::CredentialError(_)
                | KeyError::KeyFetchError(_)
                | KeyError::UnsupportedAlgorithm(_)
                | KeyError::InvalidKeyMaterial(_)
                | KeyError::RemoteOperationError(_)
                | KeyError::AllocationFailure(_)
                | KeyError::MissingKeyContext
                | KeyError::NoPrivateKey
        )
    }

    /// Marks an error as having happened while an access token was obtained.
    pub fn credential(err: KeyError) -> KeyError {
        if err.is_classified() {
            err
        } else {
            KeyError::CredentialError(Box::new(err))
        }
    }

    /// Marks an error as having happened while the public key was fetched.
    pub fn key_fetch(err: KeyError) -> KeyError {
        if err.is_classified() {
            err
        } else {
            KeyError::KeyFetchError(Box::new(err))
        }
    }

    /// Marks an error as having happened during a remote sign, decrypt or encrypt request.
    pub fn remote(err: KeyError) -> KeyError {
        if err.is_classified() {
            err
        } else {
            KeyError::RemoteOperationError(Box::new(err))
        }
    }
}
