// Copyright 2021 Contributors to the Confidential Packaging project.
// SPDX-License-Identifier: MIT

//! The operation redirector: the host-independent half of every overridden private-key operation.
//!
//! Each function looks up the remote key context in the key's slot, maps the caller's parameters
//! onto a vault algorithm, runs the operation remotely, and reshapes the result into what the host
//! expects. A key without a context fails with [KeyError::MissingKeyContext].

use super::context::RemoteKeyContext;
use super::slot::ContextSlot;
use crate::keys::error::KeyError;
use crate::keys::{
    DigestAlgorithm, EcCurve, EncryptionAlgorithm, Result, RsaPadding, SignatureAlgorithm,
};

use picky_asn1::wrapper::IntegerAsn1;
use serde::{Deserialize, Serialize};

/// The DER structure of an ECDSA signature.
#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct EcdsaSigValue {
    r: IntegerAsn1,
    s: IntegerAsn1,
}

fn context<S: ContextSlot + ?Sized>(slot: &S) -> Result<&RemoteKeyContext> {
    slot.get().ok_or_else(|| {
        log::error!("Private key operation on a key without a remote key context.");
        KeyError::MissingKeyContext
    })
}

/// Signs a digest with an RSA key. The signature is returned at exactly the modulus size.
pub fn rsa_sign<S: ContextSlot + ?Sized>(
    slot: &S,
    digest_algorithm: Option<DigestAlgorithm>,
    padding: RsaPadding,
    digest: &[u8],
    modulus_len: usize,
) -> Result<Vec<u8>> {
    let context = context(slot)?;
    let digest_algorithm = digest_algorithm.ok_or_else(|| {
        KeyError::UnsupportedAlgorithm(String::from("RSA signing without a message digest"))
    })?;
    check_digest(digest_algorithm, digest)?;
    let algorithm = SignatureAlgorithm::for_rsa(digest_algorithm, padding)?;
    let signature = context.sign(algorithm, digest)?;
    fit_rsa_signature(signature, modulus_len)
}

/// Decrypts a ciphertext with an RSA key.
pub fn rsa_decrypt<S: ContextSlot + ?Sized>(
    slot: &S,
    padding: RsaPadding,
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    let context = context(slot)?;
    let algorithm = EncryptionAlgorithm::for_padding(padding)?;
    context.decrypt(algorithm, ciphertext)
}

/// The RSA private-encrypt operation, which the vault serves through its encrypt endpoint.
pub fn rsa_private_encrypt<S: ContextSlot + ?Sized>(
    slot: &S,
    padding: RsaPadding,
    input: &[u8],
) -> Result<Vec<u8>> {
    let context = context(slot)?;
    let algorithm = EncryptionAlgorithm::for_padding(padding)?;
    context.encrypt(algorithm, input)
}

/// Signs a digest with an EC key. The signature is returned DER-encoded.
pub fn ec_sign<S: ContextSlot + ?Sized>(slot: &S, curve: EcCurve, digest: &[u8]) -> Result<Vec<u8>> {
    let raw = ec_sign_raw(slot, curve, digest)?;
    ecdsa_der_from_raw(&raw, curve)
}

/// Signs a digest with an EC key, returning the vault's `r || s` form after checking its length.
pub fn ec_sign_raw<S: ContextSlot + ?Sized>(
    slot: &S,
    curve: EcCurve,
    digest: &[u8],
) -> Result<Vec<u8>> {
    let context = context(slot)?;
    let raw = context.sign(curve.signature_algorithm(), digest)?;
    check_raw_ecdsa(&raw, curve)?;
    Ok(raw)
}

/// Detaches and drops the context of a key that is going away. Does nothing if there is none.
pub fn finish<S: ContextSlot + ?Sized>(slot: &mut S) {
    if let Some(context) = slot.detach() {
        log::trace!("Key object for {} is being freed.", context.reference());
    }
}

fn check_digest(algorithm: DigestAlgorithm, digest: &[u8]) -> Result<()> {
    if digest.len() != algorithm.output_len() {
        return Err(KeyError::UnsupportedAlgorithm(format!(
            "a {}-byte digest with {:?}",
            digest.len(),
            algorithm
        )));
    }
    Ok(())
}

/// Left-pads an RSA signature with zeros to the modulus size.
pub fn fit_rsa_signature(signature: Vec<u8>, modulus_len: usize) -> Result<Vec<u8>> {
    if signature.len() > modulus_len {
        return Err(KeyError::RemoteOperationError(Box::new(KeyError::ServiceError(
            format!(
                "a {}-byte signature for a {}-byte modulus",
                signature.len(),
                modulus_len
            ),
        ))));
    }
    if signature.len() == modulus_len {
        return Ok(signature);
    }
    let mut fitted = vec![0u8; modulus_len - signature.len()];
    fitted.extend_from_slice(&signature);
    Ok(fitted)
}

fn check_raw_ecdsa(raw: &[u8], curve: EcCurve) -> Result<()> {
    let size = curve.field_size();
    if raw.len() != 2 * size {
        return Err(KeyError::RemoteOperationError(Box::new(KeyError::ServiceError(
            format!(
                "a {}-byte signature on {}, expected {} bytes",
                raw.len(),
                curve.jwk_name(),
                2 * size
            ),
        ))));
    }
    Ok(())
}

/// Turns an unsigned big-endian byte string into the contents of a DER INTEGER.
fn der_unsigned(bytes: &[u8]) -> IntegerAsn1 {
    let start = bytes
        .iter()
        .position(|b| *b != 0)
        .unwrap_or_else(|| bytes.len().saturating_sub(1));
    let mut contents = Vec::with_capacity(bytes.len() - start + 1);
    if bytes.get(start).map_or(true, |b| b & 0x80 != 0) {
        contents.push(0);
    }
    contents.extend_from_slice(&bytes[start..]);
    IntegerAsn1::from(contents)
}

/// Converts the vault's raw `r || s` ECDSA signature into a DER `ECDSA-Sig-Value`.
pub fn ecdsa_der_from_raw(raw: &[u8], curve: EcCurve) -> Result<Vec<u8>> {
    check_raw_ecdsa(raw, curve)?;
    let (r, s) = raw.split_at(curve.field_size());
    let value = EcdsaSigValue {
        r: der_unsigned(r),
        s: der_unsigned(s),
    };
    Ok(picky_asn1_der::to_vec(&value)?)
}

/// Copies a result into the caller's buffer, returning the number of bytes written.
pub fn write_output(out: &mut [u8], data: &[u8]) -> Result<usize> {
    if out.len() < data.len() {
        return Err(KeyError::BufferTooSmall {
            required: data.len(),
            provided: out.len(),
        });
    }
    out[..data.len()].copy_from_slice(data);
    Ok(data.len())
}
