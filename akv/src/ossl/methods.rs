// Copyright 2021 Contributors to the Confidential Packaging project.
// SPDX-License-Identifier: MIT

//! The OpenSSL method tables of the engine.
//!
//! What gets built depends on the OpenSSL generation that is running. Both generations get
//! `EVP_PKEY_METHOD` copies of the built-in RSA and RSA-PSS methods with signing replaced. OpenSSL
//! 1.1 additionally gets an `RSA_METHOD` and an `EC_KEY_METHOD` that are installed on every loaded
//! key, while OpenSSL 3.x gets an `EVP_PKEY_METHOD` for EC signing instead. The extension data
//! indices that carry the remote key contexts are allocated here too.
//!
//! Ownership of the `EVP_PKEY_METHOD`s passes to OpenSSL once the engine hands them out: when the
//! engine is freed, OpenSSL asks for every method it advertised and frees each one, before calling
//! the engine's destroy function. Releasing the tables therefore only frees the methods that were
//! never handed out.
//!
//! The extension data indices are never freed. Keys loaded through the engine may outlive it, and
//! their contexts are still released through the indices' free callback.

use super::redirect;
use crate::engine::{Generation, MethodRegistry, MethodTables};
use crate::keys::error::KeyError;
use crate::keys::Result;

use akv_sys as ffi;
use std::os::raw::{c_char, c_int};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};

const RSA_METHOD_NAME: &[u8] = b"AKV RSA method\0";

/// The signature of an `RSA_METHOD` finish function.
pub type RsaFinishFn = unsafe extern "C" fn(*mut ffi::RSA) -> c_int;

/// Everything the engine allocates once per process.
pub struct OsslTables {
    pub generation: Generation,
    pub rsa_index: c_int,
    pub ec_index: c_int,
    pub rsa_method: *mut ffi::RSA_METHOD,
    pub ec_method: *mut ffi::EC_KEY_METHOD,
    pub rsa_pkey_method: *mut ffi::EVP_PKEY_METHOD,
    pub rsa_pss_pkey_method: *mut ffi::EVP_PKEY_METHOD,
    pub ec_pkey_method: *mut ffi::EVP_PKEY_METHOD,
    /// The finish function of the default RSA method, which the engine's finish chains to.
    pub default_rsa_finish: Option<RsaFinishFn>,
    /// Whether the RSA, RSA-PSS and EC `EVP_PKEY_METHOD`s, in that order, now belong to OpenSSL.
    handed_out: [AtomicBool; 3],
}

// The tables are written only while they are being allocated and only read afterwards, and
// OpenSSL method objects may be shared between threads.
unsafe impl Send for OsslTables {}
unsafe impl Sync for OsslTables {}

/// The process-wide tables of the OpenSSL engine.
pub static OSSL_REGISTRY: MethodRegistry<OsslTables> = MethodRegistry::new();

/// The OpenSSL generation the engine is running against.
pub fn running_generation() -> Generation {
    Generation::from_version_number(unsafe { ffi::OpenSSL_version_num() } as u64)
}

/// The tables, for use inside method callbacks.
pub fn tables() -> Result<&'static OsslTables> {
    OSSL_REGISTRY
        .get()
        .ok_or(KeyError::AllocationFailure("the engine has been unloaded"))
}

impl OsslTables {
    fn empty(generation: Generation) -> OsslTables {
        OsslTables {
            generation,
            rsa_index: -1,
            ec_index: -1,
            rsa_method: ptr::null_mut(),
            ec_method: ptr::null_mut(),
            rsa_pkey_method: ptr::null_mut(),
            rsa_pss_pkey_method: ptr::null_mut(),
            ec_pkey_method: ptr::null_mut(),
            default_rsa_finish: None,
            handed_out: [AtomicBool::new(false), AtomicBool::new(false), AtomicBool::new(false)],
        }
    }

    unsafe fn populate(&mut self) -> Result<()> {
        self.rsa_index = ffi::akv_shim_new_ex_index(ffi::CRYPTO_EX_INDEX_RSA);
        self.ec_index = ffi::akv_shim_new_ex_index(ffi::CRYPTO_EX_INDEX_EC_KEY);
        if self.rsa_index < 0 || self.ec_index < 0 {
            return Err(KeyError::AllocationFailure("extension data index"));
        }

        self.rsa_pkey_method = pkey_method_with_sign(ffi::EVP_PKEY_RSA, redirect::pkey_rsa_sign)?;
        self.rsa_pss_pkey_method =
            pkey_method_with_sign(ffi::EVP_PKEY_RSA_PSS, redirect::pkey_rsa_sign)?;

        match self.generation {
            Generation::Legacy => {
                self.populate_rsa_method()?;
                self.populate_ec_method()?;
            }
            Generation::Provider => {
                self.ec_pkey_method = pkey_method_with_sign(ffi::EVP_PKEY_EC, redirect::pkey_ec_sign)?;
            }
        }
        Ok(())
    }

    unsafe fn populate_rsa_method(&mut self) -> Result<()> {
        let default = ffi::RSA_PKCS1_OpenSSL();
        self.rsa_method = ffi::RSA_meth_dup(default);
        if self.rsa_method.is_null() {
            return Err(KeyError::AllocationFailure("RSA_METHOD"));
        }
        self.default_rsa_finish = ffi::RSA_meth_get_finish(default);
        let configured = ffi::RSA_meth_set1_name(
            self.rsa_method,
            RSA_METHOD_NAME.as_ptr() as *const c_char,
        ) == 1
            && ffi::RSA_meth_set_priv_dec(self.rsa_method, Some(redirect::rsa_priv_dec)) == 1
            && ffi::RSA_meth_set_priv_enc(self.rsa_method, Some(redirect::rsa_priv_enc)) == 1
            && ffi::RSA_meth_set_finish(self.rsa_method, Some(redirect::rsa_finish)) == 1;
        if !configured {
            return Err(KeyError::AllocationFailure("RSA_METHOD"));
        }
        Ok(())
    }

    unsafe fn populate_ec_method(&mut self) -> Result<()> {
        let default = ffi::EC_KEY_OpenSSL();
        self.ec_method = ffi::EC_KEY_METHOD_new(default);
        if self.ec_method.is_null() {
            return Err(KeyError::AllocationFailure("EC_KEY_METHOD"));
        }
        let mut sign_setup = None;
        ffi::EC_KEY_METHOD_get_sign(default, ptr::null_mut(), &mut sign_setup, ptr::null_mut());
        ffi::EC_KEY_METHOD_set_init(
            self.ec_method,
            None,
            Some(redirect::ec_finish),
            None,
            None,
            None,
            None,
        );
        ffi::EC_KEY_METHOD_set_sign(
            self.ec_method,
            Some(redirect::ec_sign),
            sign_setup,
            Some(redirect::ec_sign_sig),
        );
        Ok(())
    }

    /// Gives the `EVP_PKEY_METHOD` for a key type to OpenSSL, which frees it when the engine is
    /// freed. Returns null if the engine has none.
    pub fn hand_out_pkey_method(&self, nid: c_int) -> *mut ffi::EVP_PKEY_METHOD {
        let method = self.pkey_method(nid);
        let slot = match nid {
            ffi::EVP_PKEY_RSA => Some(0),
            ffi::EVP_PKEY_RSA_PSS => Some(1),
            ffi::EVP_PKEY_EC => Some(2),
            _ => None,
        };
        if let Some(slot) = slot {
            if !method.is_null() {
                self.handed_out[slot].store(true, Ordering::SeqCst);
            }
        }
        method
    }

    /// The `EVP_PKEY_METHOD` for a key type, or null if the engine has none. The engine keeps
    /// ownership.
    pub fn pkey_method(&self, nid: c_int) -> *mut ffi::EVP_PKEY_METHOD {
        match nid {
            ffi::EVP_PKEY_RSA => self.rsa_pkey_method,
            ffi::EVP_PKEY_RSA_PSS => self.rsa_pss_pkey_method,
            ffi::EVP_PKEY_EC if !self.ec_pkey_method.is_null() => self.ec_pkey_method,
            // EC keys on OpenSSL 1.1 sign through their EC_KEY_METHOD.
            ffi::EVP_PKEY_EC => unsafe { ffi::EVP_PKEY_meth_find(nid) as *mut _ },
            _ => ptr::null_mut(),
        }
    }
}

type PkeySignFn = unsafe extern "C" fn(
    *mut ffi::EVP_PKEY_CTX,
    *mut u8,
    *mut ffi::size_t,
    *const u8,
    ffi::size_t,
) -> c_int;

/// Copies the built-in method for a key type and replaces its signing function, keeping the
/// original sign-init function.
unsafe fn pkey_method_with_sign(nid: c_int, sign: PkeySignFn) -> Result<*mut ffi::EVP_PKEY_METHOD> {
    let original = ffi::EVP_PKEY_meth_find(nid);
    if original.is_null() {
        return Err(KeyError::UnsupportedAlgorithm(format!(
            "no built-in method for key type {}",
            nid
        )));
    }
    let method = ffi::EVP_PKEY_meth_new(nid, 0);
    if method.is_null() {
        return Err(KeyError::AllocationFailure("EVP_PKEY_METHOD"));
    }
    ffi::EVP_PKEY_meth_copy(method, original);
    let mut sign_init = None;
    ffi::EVP_PKEY_meth_get_sign(original, &mut sign_init, ptr::null_mut());
    ffi::EVP_PKEY_meth_set_sign(method, sign_init, Some(sign));
    Ok(method)
}

impl MethodTables for OsslTables {
    fn allocate() -> Result<OsslTables> {
        let generation = running_generation();
        log::debug!("Building engine method tables for {:?} OpenSSL.", generation);
        let mut tables = OsslTables::empty(generation);
        if let Err(err) = unsafe { tables.populate() } {
            log::error!("Failed to build the engine method tables: {}", err);
            tables.release();
            return Err(err);
        }
        Ok(tables)
    }

    fn release(&self) {
        unsafe {
            if !self.rsa_method.is_null() {
                ffi::RSA_meth_free(self.rsa_method);
            }
            if !self.ec_method.is_null() {
                ffi::EC_KEY_METHOD_free(self.ec_method);
            }
            let pkey_methods = [
                self.rsa_pkey_method,
                self.rsa_pss_pkey_method,
                self.ec_pkey_method,
            ];
            for (method, handed_out) in pkey_methods.iter().zip(self.handed_out.iter()) {
                if !method.is_null() && !handed_out.load(Ordering::SeqCst) {
                    ffi::EVP_PKEY_meth_free(*method);
                }
            }
        }
    }
}
