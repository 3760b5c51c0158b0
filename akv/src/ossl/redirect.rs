// Copyright 2021 Contributors to the Confidential Packaging project.
// SPDX-License-Identifier: MIT

//! The callbacks OpenSSL calls for private-key operations on engine keys.
//!
//! Each callback finds the key's extension data slot, translates OpenSSL's parameters, and hands
//! over to [crate::engine::redirect]. Failures are pushed onto the OpenSSL error stack and reported
//! with the failure value of the callback; nothing unwinds into OpenSSL.

use super::error::report;
use super::key::{ec_key_curve, BigNum};
use super::methods::tables;
use super::slot::ExDataSlot;
use crate::engine::redirect;
use crate::keys::error::KeyError;
use crate::keys::{DigestAlgorithm, EcCurve, Result, RsaPadding};

use akv_sys as ffi;
use std::os::raw::{c_int, c_uint};
use std::panic::{self, AssertUnwindSafe};
use std::slice;

/// Runs a callback body, turning errors and panics into `failure`.
fn guarded<T, F: FnOnce() -> Result<T>>(failure: T, body: F) -> T {
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(value)) => value,
        Ok(Err(err)) => {
            report!(err);
            failure
        }
        Err(_) => {
            log::error!("Panic in an engine callback.");
            report!(KeyError::Unknown);
            failure
        }
    }
}

/// The vault digest algorithm for an OpenSSL digest NID.
pub fn digest_from_nid(nid: c_int) -> Result<DigestAlgorithm> {
    match nid {
        ffi::NID_sha256 => Ok(DigestAlgorithm::Sha256),
        ffi::NID_sha384 => Ok(DigestAlgorithm::Sha384),
        ffi::NID_sha512 => Ok(DigestAlgorithm::Sha512),
        other => Err(KeyError::UnsupportedAlgorithm(format!(
            "message digest with NID {}",
            other
        ))),
    }
}

/// The padding mode for an OpenSSL RSA padding code.
pub fn padding_from_code(code: c_int) -> RsaPadding {
    match code {
        ffi::RSA_PKCS1_PADDING => RsaPadding::Pkcs1,
        ffi::RSA_PKCS1_OAEP_PADDING => RsaPadding::Pkcs1Oaep,
        ffi::RSA_PKCS1_PSS_PADDING => RsaPadding::Pkcs1Pss,
        other => RsaPadding::Other(other),
    }
}

unsafe fn input<'a>(data: *const u8, len: usize) -> &'a [u8] {
    if data.is_null() || len == 0 {
        &[]
    } else {
        slice::from_raw_parts(data, len)
    }
}

unsafe fn rsa_slot(rsa: *mut ffi::RSA) -> Result<ExDataSlot> {
    if rsa.is_null() {
        return Err(KeyError::MissingKeyContext);
    }
    Ok(ExDataSlot::Rsa {
        key: rsa,
        index: tables()?.rsa_index,
    })
}

unsafe fn ec_slot(key: *mut ffi::EC_KEY) -> Result<(ExDataSlot, EcCurve)> {
    if key.is_null() {
        return Err(KeyError::MissingKeyContext);
    }
    let curve = ec_key_curve(key).ok_or_else(|| {
        KeyError::UnsupportedAlgorithm(String::from("an EC key on an unknown curve"))
    })?;
    let slot = ExDataSlot::EcKey {
        key,
        index: tables()?.ec_index,
    };
    Ok((slot, curve))
}

unsafe fn rsa_output<'a>(to: *mut u8, rsa: *mut ffi::RSA) -> Result<&'a mut [u8]> {
    let size = ffi::RSA_size(rsa);
    if to.is_null() || size <= 0 {
        return Err(KeyError::BufferTooSmall {
            required: 1,
            provided: 0,
        });
    }
    Ok(slice::from_raw_parts_mut(to, size as usize))
}

/// `RSA_METHOD` private decryption.
pub unsafe extern "C" fn rsa_priv_dec(
    flen: c_int,
    from: *const u8,
    to: *mut u8,
    rsa: *mut ffi::RSA,
    padding: c_int,
) -> c_int {
    guarded(-1, || {
        let slot = rsa_slot(rsa)?;
        let plaintext =
            redirect::rsa_decrypt(&slot, padding_from_code(padding), input(from, flen as usize))?;
        let written = redirect::write_output(rsa_output(to, rsa)?, &plaintext)?;
        Ok(written as c_int)
    })
}

/// `RSA_METHOD` private encryption, the raw form of PKCS#1 v1.5 signing.
pub unsafe extern "C" fn rsa_priv_enc(
    flen: c_int,
    from: *const u8,
    to: *mut u8,
    rsa: *mut ffi::RSA,
    padding: c_int,
) -> c_int {
    guarded(-1, || {
        let slot = rsa_slot(rsa)?;
        let output = redirect::rsa_private_encrypt(
            &slot,
            padding_from_code(padding),
            input(from, flen as usize),
        )?;
        let written = redirect::write_output(rsa_output(to, rsa)?, &output)?;
        Ok(written as c_int)
    })
}

/// `RSA_METHOD` finish: runs the default finish, then drops the context.
pub unsafe extern "C" fn rsa_finish(rsa: *mut ffi::RSA) -> c_int {
    guarded(0, || {
        let tables = tables()?;
        if let Some(default_finish) = tables.default_rsa_finish {
            let _ = default_finish(rsa);
        }
        let mut slot = ExDataSlot::Rsa {
            key: rsa,
            index: tables.rsa_index,
        };
        redirect::finish(&mut slot);
        Ok(1)
    })
}

/// `EC_KEY_METHOD` sign: a DER signature into `sig`, which holds `ECDSA_size` bytes.
pub unsafe extern "C" fn ec_sign(
    _type: c_int,
    dgst: *const u8,
    dlen: c_int,
    sig: *mut u8,
    siglen: *mut c_uint,
    _kinv: *const ffi::BIGNUM,
    _r: *const ffi::BIGNUM,
    eckey: *mut ffi::EC_KEY,
) -> c_int {
    if !siglen.is_null() {
        *siglen = 0;
    }
    guarded(0, || {
        let (slot, curve) = ec_slot(eckey)?;
        let der = redirect::ec_sign(&slot, curve, input(dgst, dlen as usize))?;
        let size = ffi::ECDSA_size(eckey);
        if sig.is_null() || siglen.is_null() || size <= 0 {
            return Err(KeyError::BufferTooSmall {
                required: der.len(),
                provided: 0,
            });
        }
        let written = redirect::write_output(slice::from_raw_parts_mut(sig, size as usize), &der)?;
        *siglen = written as c_uint;
        Ok(1)
    })
}

/// `EC_KEY_METHOD` sign_sig: the signature as an `ECDSA_SIG`.
pub unsafe extern "C" fn ec_sign_sig(
    dgst: *const u8,
    dgst_len: c_int,
    _in_kinv: *const ffi::BIGNUM,
    _in_r: *const ffi::BIGNUM,
    eckey: *mut ffi::EC_KEY,
) -> *mut ffi::ECDSA_SIG {
    guarded(std::ptr::null_mut(), || {
        let (slot, curve) = ec_slot(eckey)?;
        let raw = redirect::ec_sign_raw(&slot, curve, input(dgst, dgst_len as usize))?;
        let (r, s) = raw.split_at(curve.field_size());
        let r = BigNum::from_be_bytes(r)?;
        let s = BigNum::from_be_bytes(s)?;
        let sig = ffi::ECDSA_SIG_new();
        if sig.is_null() {
            return Err(KeyError::AllocationFailure("ECDSA_SIG"));
        }
        if ffi::ECDSA_SIG_set0(sig, r.as_ptr(), s.as_ptr()) != 1 {
            ffi::ECDSA_SIG_free(sig);
            return Err(KeyError::AllocationFailure("ECDSA_SIG"));
        }
        // The signature owns both numbers now.
        let _ = r.into_raw();
        let _ = s.into_raw();
        Ok(sig)
    })
}

/// `EC_KEY_METHOD` finish.
pub unsafe extern "C" fn ec_finish(eckey: *mut ffi::EC_KEY) {
    guarded((), || {
        let mut slot = ExDataSlot::EcKey {
            key: eckey,
            index: tables()?.ec_index,
        };
        redirect::finish(&mut slot);
        Ok(())
    })
}

unsafe fn ctx_key(ctx: *mut ffi::EVP_PKEY_CTX) -> Result<*mut ffi::EVP_PKEY> {
    let pkey = if ctx.is_null() {
        std::ptr::null_mut()
    } else {
        ffi::EVP_PKEY_CTX_get0_pkey(ctx)
    };
    if pkey.is_null() {
        return Err(KeyError::MissingKeyContext);
    }
    Ok(pkey)
}

unsafe fn ctx_digest(ctx: *mut ffi::EVP_PKEY_CTX) -> Result<Option<DigestAlgorithm>> {
    let mut md = std::ptr::null();
    if ffi::akv_shim_ctx_get_signature_md(ctx, &mut md) <= 0 {
        return Err(KeyError::UnsupportedAlgorithm(String::from(
            "a signing context without a readable digest",
        )));
    }
    if md.is_null() {
        return Ok(None);
    }
    digest_from_nid(ffi::akv_shim_md_type(md)).map(Some)
}

unsafe fn ctx_padding(ctx: *mut ffi::EVP_PKEY_CTX) -> Result<RsaPadding> {
    let mut padding: c_int = 0;
    if ffi::akv_shim_ctx_get_rsa_padding(ctx, &mut padding) <= 0 {
        return Err(KeyError::UnsupportedAlgorithm(String::from(
            "a signing context without a readable padding mode",
        )));
    }
    Ok(padding_from_code(padding))
}

/// Writes a signature into the caller's buffer, whose size is passed in `*siglen`.
unsafe fn write_signature(sig: *mut u8, siglen: *mut ffi::size_t, signature: &[u8]) -> Result<c_int> {
    let out = slice::from_raw_parts_mut(sig, *siglen as usize);
    let written = redirect::write_output(out, signature)?;
    *siglen = written as ffi::size_t;
    Ok(1)
}

/// `EVP_PKEY_METHOD` sign for RSA and RSA-PSS keys.
///
/// Called with a null `sig`, it only reports the signature size, without contacting the vault.
pub unsafe extern "C" fn pkey_rsa_sign(
    ctx: *mut ffi::EVP_PKEY_CTX,
    sig: *mut u8,
    siglen: *mut ffi::size_t,
    tbs: *const u8,
    tbslen: ffi::size_t,
) -> c_int {
    guarded(-1, || {
        let rsa = ffi::akv_shim_pkey_get0_rsa(ctx_key(ctx)?);
        if rsa.is_null() || siglen.is_null() {
            return Err(KeyError::MissingKeyContext);
        }
        let modulus_len = ffi::RSA_size(rsa).max(0) as usize;
        if sig.is_null() {
            *siglen = modulus_len as ffi::size_t;
            return Ok(1);
        }
        let slot = rsa_slot(rsa)?;
        let signature = redirect::rsa_sign(
            &slot,
            ctx_digest(ctx)?,
            ctx_padding(ctx)?,
            input(tbs, tbslen as usize),
            modulus_len,
        )?;
        write_signature(sig, siglen, &signature)
    })
}

/// `EVP_PKEY_METHOD` sign for EC keys, used on OpenSSL 3.x.
pub unsafe extern "C" fn pkey_ec_sign(
    ctx: *mut ffi::EVP_PKEY_CTX,
    sig: *mut u8,
    siglen: *mut ffi::size_t,
    tbs: *const u8,
    tbslen: ffi::size_t,
) -> c_int {
    guarded(-1, || {
        let eckey = ffi::akv_shim_pkey_get0_ec_key(ctx_key(ctx)?);
        if eckey.is_null() || siglen.is_null() {
            return Err(KeyError::MissingKeyContext);
        }
        if sig.is_null() {
            *siglen = ffi::ECDSA_size(eckey).max(0) as ffi::size_t;
            return Ok(1);
        }
        let (slot, curve) = ec_slot(eckey)?;
        let der = redirect::ec_sign(&slot, curve, input(tbs, tbslen as usize))?;
        write_signature(sig, siglen, &der)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_nids() {
        assert_eq!(digest_from_nid(ffi::NID_sha256).unwrap(), DigestAlgorithm::Sha256);
        assert_eq!(digest_from_nid(ffi::NID_sha384).unwrap(), DigestAlgorithm::Sha384);
        assert_eq!(digest_from_nid(ffi::NID_sha512).unwrap(), DigestAlgorithm::Sha512);
        // SHA-1
        assert!(matches!(
            digest_from_nid(64),
            Err(KeyError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_padding_codes() {
        assert_eq!(padding_from_code(ffi::RSA_PKCS1_PADDING), RsaPadding::Pkcs1);
        assert_eq!(padding_from_code(ffi::RSA_PKCS1_OAEP_PADDING), RsaPadding::Pkcs1Oaep);
        assert_eq!(padding_from_code(ffi::RSA_PKCS1_PSS_PADDING), RsaPadding::Pkcs1Pss);
        assert_eq!(
            padding_from_code(ffi::RSA_NO_PADDING),
            RsaPadding::Other(ffi::RSA_NO_PADDING)
        );
    }

    #[test]
    fn test_guarded_maps_errors_and_panics() {
        assert_eq!(guarded(-1, || Ok(7)), 7);
        assert_eq!(guarded(-1, || Err(KeyError::MissingKeyContext)), -1);
        assert_eq!(guarded(0, || -> Result<c_int> { panic!("boom") }), 0);
    }
}
