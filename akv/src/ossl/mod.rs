// Copyright 2021 Contributors to the Confidential Packaging project.
// SPDX-License-Identifier: MIT

//! The OpenSSL dynamic ENGINE.
//!
//! The shared library built with the `engine` feature exports `bind_engine` and `v_check`, the two
//! symbols OpenSSL's dynamic engine loader looks for. Once bound, the engine is selected with the
//! id `e_akv` and keys are loaded by identifier, for example:
//!
//! ```text
//! openssl pkeyutl -sign -engine e_akv -keyform engine -inkey vault:contoso:release-signing ...
//! ```
//!
//! Logging goes through the `log` facade. Unless the host already installed a logger, the engine
//! installs `env_logger` with the filter from `AKV_LOG_LEVEL`, defaulting to `warn`.

#![allow(clippy::missing_safety_doc)]

pub mod adapter;
pub mod error;
pub mod key;
pub mod methods;
pub mod redirect;
pub mod slot;

use self::adapter::OsslAdapter;
use self::error::report;
use self::methods::{running_generation, OsslTables, OSSL_REGISTRY};
use crate::config::EngineConfig;
use crate::engine::{load_key, Generation, KeyUsage, MethodRegistry, Services};
use crate::keys::error::KeyError;
use crate::keys::Result;

use akv_sys as ffi;
use once_cell::sync::OnceCell;
use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_ulong, c_void};
use std::ptr;

/// The engine id, as given to `-engine`.
pub const ENGINE_ID: &str = "e_akv";
/// The environment variable holding the engine's log filter.
pub const LOG_LEVEL_VAR: &str = "AKV_LOG_LEVEL";

const ENGINE_ID_C: &[u8] = b"e_akv\0";
const ENGINE_NAME_C: &[u8] = b"AKV/HSM engine\0";

static PKEY_NIDS: [c_int; 3] = [ffi::EVP_PKEY_RSA, ffi::EVP_PKEY_RSA_PSS, ffi::EVP_PKEY_EC];

static SERVICES: OnceCell<Services> = OnceCell::new();

/// The vault collaborators, configured from the environment on first use.
fn services() -> Result<&'static Services> {
    SERVICES.get_or_try_init(|| Services::from_config(&EngineConfig::from_env()))
}

fn init_logging() {
    let mut builder = env_logger::Builder::new();
    let _ = builder
        .filter_level(log::LevelFilter::Warn)
        .format_timestamp(None)
        .parse_filters(&std::env::var(LOG_LEVEL_VAR).unwrap_or_default());
    // Leaves a logger the host installed in place.
    let _ = builder.try_init();
}

/// Whether an engine id passed to `bind_engine` is ours. A null id binds unconditionally.
fn accepts_id(id: Option<&[u8]>) -> bool {
    id.map_or(true, |id| id == ENGINE_ID.as_bytes())
}

unsafe fn bind(e: *mut ffi::ENGINE) -> Result<()> {
    let generation = running_generation();
    log::debug!("Binding the engine to {:?} OpenSSL.", generation);

    let mut bound = ffi::ENGINE_set_id(e, ENGINE_ID_C.as_ptr() as *const c_char) == 1
        && ffi::ENGINE_set_name(e, ENGINE_NAME_C.as_ptr() as *const c_char) == 1
        && ffi::ENGINE_set_flags(e, ffi::ENGINE_FLAGS_NO_REGISTER_ALL) == 1
        && ffi::ENGINE_set_init_function(e, Some(engine_init)) == 1
        && ffi::ENGINE_set_finish_function(e, Some(engine_finish)) == 1
        && ffi::ENGINE_set_destroy_function(e, Some(engine_destroy)) == 1
        && ffi::ENGINE_set_load_privkey_function(e, Some(load_private_key)) == 1
        && ffi::ENGINE_set_load_pubkey_function(e, Some(load_public_key)) == 1
        && ffi::ENGINE_set_pkey_meths(e, Some(pkey_meths)) == 1;

    if bound && generation == Generation::Legacy {
        let tables = OSSL_REGISTRY.ensure_initialized()?;
        bound = ffi::ENGINE_set_RSA(e, tables.rsa_method) == 1
            && ffi::ENGINE_set_EC(e, tables.ec_method) == 1;
    }

    if bound {
        Ok(())
    } else {
        Err(KeyError::AllocationFailure("ENGINE setup"))
    }
}

/// The entry point of OpenSSL's dynamic engine loader.
#[no_mangle]
pub unsafe extern "C" fn bind_engine(
    e: *mut ffi::ENGINE,
    id: *const c_char,
    fns: *const ffi::dynamic_fns,
) -> c_int {
    if e.is_null() || fns.is_null() || ffi::akv_shim_dynamic_setup(fns) == 0 {
        return 0;
    }
    let id = if id.is_null() {
        None
    } else {
        Some(CStr::from_ptr(id).to_bytes())
    };
    if !accepts_id(id) {
        return 0;
    }
    init_logging();
    match bind(e) {
        Ok(()) => 1,
        Err(err) => {
            log::error!("Failed to bind the engine: {}", err);
            report!(err);
            0
        }
    }
}

/// Tells the dynamic engine loader which ABI version this engine was built for.
#[no_mangle]
pub extern "C" fn v_check(v: c_ulong) -> c_ulong {
    unsafe {
        if v >= ffi::akv_shim_dynamic_oldest() {
            ffi::akv_shim_dynamic_version()
        } else {
            0
        }
    }
}

unsafe extern "C" fn engine_init(_e: *mut ffi::ENGINE) -> c_int {
    match OSSL_REGISTRY.ensure_initialized() {
        Ok(_) => 1,
        Err(err) => {
            report!(err);
            0
        }
    }
}

unsafe extern "C" fn engine_finish(_e: *mut ffi::ENGINE) -> c_int {
    1
}

/// Called by OpenSSL after it has freed the `EVP_PKEY_METHOD`s it was handed. Operations on keys
/// that outlive the engine fail from here on, but their contexts are still released with them
/// because the extension data indices are never freed.
unsafe extern "C" fn engine_destroy(_e: *mut ffi::ENGINE) -> c_int {
    log::trace!("Engine destroyed.");
    OSSL_REGISTRY.teardown();
    1
}

unsafe fn load(key_id: *const c_char, usage: KeyUsage) -> *mut ffi::EVP_PKEY {
    let loaded = (|| -> Result<key::OsslKey> {
        if key_id.is_null() {
            return Err(KeyError::InvalidKeyId(String::from("(null)")));
        }
        let key_id = CStr::from_ptr(key_id)
            .to_str()
            .map_err(|_| KeyError::InvalidKeyId(String::from("not valid UTF-8")))?;
        let tables = OSSL_REGISTRY.ensure_initialized()?;
        load_key(key_id, usage, services()?, &OsslAdapter::for_tables(tables))
    })();
    match loaded {
        Ok(key) => key.into_raw(),
        Err(err) => {
            log::error!("Failed to load a {:?} key: {}", usage, err);
            report!(err);
            ptr::null_mut()
        }
    }
}

unsafe extern "C" fn load_private_key(
    _e: *mut ffi::ENGINE,
    key_id: *const c_char,
    _ui_method: *mut ffi::UI_METHOD,
    _callback_data: *mut c_void,
) -> *mut ffi::EVP_PKEY {
    load(key_id, KeyUsage::Private)
}

unsafe extern "C" fn load_public_key(
    _e: *mut ffi::ENGINE,
    key_id: *const c_char,
    _ui_method: *mut ffi::UI_METHOD,
    _callback_data: *mut c_void,
) -> *mut ffi::EVP_PKEY {
    load(key_id, KeyUsage::Public)
}

/// With a null `pmeth`, lists the key types the engine serves. Otherwise hands the method for
/// `nid` to OpenSSL through `pmeth`.
///
/// Tables are never allocated here. OpenSSL calls this while freeing the engine, and the tables
/// always exist by the time a key is used: binding or initialising the engine creates them.
unsafe fn serve_pkey_meths(
    registry: &MethodRegistry<OsslTables>,
    pmeth: *mut *mut ffi::EVP_PKEY_METHOD,
    nids: *mut *const c_int,
    nid: c_int,
) -> c_int {
    if pmeth.is_null() {
        if nids.is_null() {
            return 0;
        }
        *nids = PKEY_NIDS.as_ptr();
        return PKEY_NIDS.len() as c_int;
    }
    *pmeth = match registry.get() {
        Some(tables) => tables.hand_out_pkey_method(nid),
        None => ptr::null_mut(),
    };
    if (*pmeth).is_null() {
        0
    } else {
        1
    }
}

unsafe extern "C" fn pkey_meths(
    _e: *mut ffi::ENGINE,
    pmeth: *mut *mut ffi::EVP_PKEY_METHOD,
    nids: *mut *const c_int,
    nid: c_int,
) -> c_int {
    serve_pkey_meths(&OSSL_REGISTRY, pmeth, nids, nid)
}
