// Copyright 2021 Contributors to the Confidential Packaging project.
// SPDX-License-Identifier: MIT

//! Building OpenSSL key objects from the public material of a vault key.

use crate::keys::error::KeyError;
use crate::keys::{EcCurve, PublicKeyMaterial, Result};

use akv_sys as ffi;
use std::os::raw::c_int;
use std::ptr;

/// The curve NID OpenSSL uses for a vault curve.
pub fn curve_nid(curve: EcCurve) -> c_int {
    match curve {
        EcCurve::P256 => ffi::NID_X9_62_prime256v1,
        EcCurve::P256K => ffi::NID_secp256k1,
        EcCurve::P384 => ffi::NID_secp384r1,
        EcCurve::P521 => ffi::NID_secp521r1,
    }
}

/// The vault curve for an OpenSSL curve NID.
pub fn curve_from_nid(nid: c_int) -> Option<EcCurve> {
    match nid {
        ffi::NID_X9_62_prime256v1 => Some(EcCurve::P256),
        ffi::NID_secp256k1 => Some(EcCurve::P256K),
        ffi::NID_secp384r1 => Some(EcCurve::P384),
        ffi::NID_secp521r1 => Some(EcCurve::P521),
        _ => None,
    }
}

/// The curve of an EC key object, if it is one the vault knows.
///
/// # Safety
///
/// `key` must point to a live EC key.
pub unsafe fn ec_key_curve(key: *const ffi::EC_KEY) -> Option<EcCurve> {
    let group = ffi::EC_KEY_get0_group(key);
    if group.is_null() {
        return None;
    }
    curve_from_nid(ffi::EC_GROUP_get_curve_name(group))
}

/// An owned `BIGNUM`.
pub(crate) struct BigNum(*mut ffi::BIGNUM);

impl BigNum {
    pub(crate) fn from_be_bytes(bytes: &[u8]) -> Result<BigNum> {
        let bn = unsafe {
            ffi::BN_bin2bn(bytes.as_ptr(), bytes.len() as c_int, ptr::null_mut())
        };
        if bn.is_null() {
            return Err(KeyError::AllocationFailure("BIGNUM"));
        }
        Ok(BigNum(bn))
    }

    pub(crate) fn as_ptr(&self) -> *mut ffi::BIGNUM {
        self.0
    }

    /// Gives up ownership, for calls that take the number over.
    pub(crate) fn into_raw(self) -> *mut ffi::BIGNUM {
        let bn = self.0;
        std::mem::forget(self);
        bn
    }
}

impl Drop for BigNum {
    fn drop(&mut self) {
        unsafe { ffi::BN_free(self.0) };
    }
}

/// An owned `EVP_PKEY` holding the public half of a vault key.
pub struct OsslKey {
    pkey: *mut ffi::EVP_PKEY,
}

impl OsslKey {
    /// Builds a key object for RSA or EC material.
    pub fn from_material(material: &PublicKeyMaterial) -> Result<OsslKey> {
        match material {
            PublicKeyMaterial::Rsa { n, e } => OsslKey::rsa(n, e),
            PublicKeyMaterial::Ec { curve, x, y } => OsslKey::ec(*curve, x, y),
            PublicKeyMaterial::Other { kty } => Err(KeyError::UnsupportedAlgorithm(format!(
                "key type {}",
                kty
            ))),
        }
    }

    fn empty() -> Result<OsslKey> {
        let pkey = unsafe { ffi::EVP_PKEY_new() };
        if pkey.is_null() {
            return Err(KeyError::AllocationFailure("EVP_PKEY"));
        }
        Ok(OsslKey { pkey })
    }

    fn rsa(n: &[u8], e: &[u8]) -> Result<OsslKey> {
        let key = OsslKey::empty()?;
        let modulus = BigNum::from_be_bytes(n)?;
        let exponent = BigNum::from_be_bytes(e)?;
        unsafe {
            let rsa = ffi::RSA_new();
            if rsa.is_null() {
                return Err(KeyError::AllocationFailure("RSA"));
            }
            if ffi::RSA_set0_key(rsa, modulus.as_ptr(), exponent.as_ptr(), ptr::null_mut()) != 1 {
                ffi::RSA_free(rsa);
                return Err(KeyError::InvalidKeyMaterial(String::from(
                    "RSA modulus or exponent rejected",
                )));
            }
            // The RSA key owns both numbers now.
            let _ = modulus.into_raw();
            let _ = exponent.into_raw();
            if ffi::EVP_PKEY_assign(key.pkey, ffi::EVP_PKEY_RSA, rsa as *mut _) != 1 {
                ffi::RSA_free(rsa);
                return Err(KeyError::AllocationFailure("EVP_PKEY_assign"));
            }
        }
        Ok(key)
    }

    fn ec(curve: EcCurve, x: &[u8], y: &[u8]) -> Result<OsslKey> {
        let key = OsslKey::empty()?;
        let x = BigNum::from_be_bytes(x)?;
        let y = BigNum::from_be_bytes(y)?;
        unsafe {
            let ec = ffi::EC_KEY_new_by_curve_name(curve_nid(curve));
            if ec.is_null() {
                return Err(KeyError::UnsupportedAlgorithm(format!(
                    "curve {} is not available",
                    curve.jwk_name()
                )));
            }
            if ffi::EC_KEY_set_public_key_affine_coordinates(ec, x.as_ptr(), y.as_ptr()) != 1 {
                ffi::EC_KEY_free(ec);
                return Err(KeyError::InvalidKeyMaterial(format!(
                    "the public point is not on {}",
                    curve.jwk_name()
                )));
            }
            ffi::EC_KEY_set_asn1_flag(ec, ffi::OPENSSL_EC_NAMED_CURVE);
            if ffi::EVP_PKEY_assign(key.pkey, ffi::EVP_PKEY_EC, ec as *mut _) != 1 {
                ffi::EC_KEY_free(ec);
                return Err(KeyError::AllocationFailure("EVP_PKEY_assign"));
            }
        }
        Ok(key)
    }

    /// The `EVP_PKEY` type of the key.
    pub fn id(&self) -> c_int {
        unsafe { ffi::akv_shim_pkey_id(self.pkey) }
    }

    /// The RSA key inside, or null for other key types.
    pub fn rsa_ptr(&self) -> *mut ffi::RSA {
        unsafe { ffi::akv_shim_pkey_get0_rsa(self.pkey) }
    }

    /// The EC key inside, or null for other key types.
    pub fn ec_key_ptr(&self) -> *mut ffi::EC_KEY {
        unsafe { ffi::akv_shim_pkey_get0_ec_key(self.pkey) }
    }

    /// The key object, still owned by this value.
    pub fn as_ptr(&self) -> *mut ffi::EVP_PKEY {
        self.pkey
    }

    /// Hands the key object over to OpenSSL.
    pub fn into_raw(self) -> *mut ffi::EVP_PKEY {
        let pkey = self.pkey;
        std::mem::forget(self);
        pkey
    }
}

impl Drop for OsslKey {
    fn drop(&mut self) {
        unsafe { ffi::EVP_PKEY_free(self.pkey) };
    }
}
