// Copyright 2021 Contributors to the Confidential Packaging project.
// SPDX-License-Identifier: MIT

//! Remote key contexts stored in the extension data of OpenSSL key objects.
//!
//! A context is boxed and its raw pointer is stored under an index allocated for the engine. The
//! index carries a free callback, so a context that is still attached when OpenSSL frees the key
//! object is dropped as well.

use crate::engine::{ContextSlot, RemoteKeyContext};
use crate::keys::error::KeyError;
use crate::keys::Result;

use akv_sys as ffi;
use std::os::raw::{c_int, c_void};
use std::ptr;

/// The extension data slot of one RSA or EC key object.
pub enum ExDataSlot {
    Rsa { key: *mut ffi::RSA, index: c_int },
    EcKey { key: *mut ffi::EC_KEY, index: c_int },
}

impl ExDataSlot {
    unsafe fn raw(&self) -> *mut c_void {
        match *self {
            ExDataSlot::Rsa { key, index } => ffi::RSA_get_ex_data(key, index),
            ExDataSlot::EcKey { key, index } => ffi::EC_KEY_get_ex_data(key, index),
        }
    }

    unsafe fn set_raw(&mut self, value: *mut c_void) -> bool {
        let status = match *self {
            ExDataSlot::Rsa { key, index } => ffi::RSA_set_ex_data(key, index, value),
            ExDataSlot::EcKey { key, index } => ffi::EC_KEY_set_ex_data(key, index, value),
        };
        status == 1
    }
}

impl ContextSlot for ExDataSlot {
    fn install(&mut self, context: RemoteKeyContext) -> Result<()> {
        let raw = Box::into_raw(Box::new(context)) as *mut c_void;
        if unsafe { self.set_raw(raw) } {
            Ok(())
        } else {
            drop(unsafe { Box::from_raw(raw as *mut RemoteKeyContext) });
            Err(KeyError::AllocationFailure("key extension data"))
        }
    }

    fn detach(&mut self) -> Option<RemoteKeyContext> {
        let raw = unsafe { self.raw() } as *mut RemoteKeyContext;
        if raw.is_null() {
            return None;
        }
        // Clearing an index that is already set does not allocate.
        let _ = unsafe { self.set_raw(ptr::null_mut()) };
        Some(*unsafe { Box::from_raw(raw) })
    }

    fn get(&self) -> Option<&RemoteKeyContext> {
        unsafe { (self.raw() as *const RemoteKeyContext).as_ref() }
    }
}

/// Releases a context that was still attached when its key object was freed. Called by the free
/// callback of the engine's extension data indices.
#[no_mangle]
pub unsafe extern "C" fn akv_free_context(context: *mut c_void) {
    if !context.is_null() {
        drop(Box::from_raw(context as *mut RemoteKeyContext));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::context::live_contexts;
    use crate::engine::testing::MockVault;
    use crate::ossl::key::OsslKey;
    use crate::ossl::methods::OSSL_REGISTRY;
    use crate::ossl::redirect::rsa_finish;

    fn rsa_slot(key: &OsslKey) -> ExDataSlot {
        ExDataSlot::Rsa {
            key: key.rsa_ptr(),
            index: OSSL_REGISTRY.ensure_initialized().unwrap().rsa_index,
        }
    }

    #[test]
    fn test_attach_get_detach() {
        let mock = MockVault::rsa();
        let before = live_contexts();
        let key = OsslKey::from_material(&mock.material()).unwrap();
        let mut slot = rsa_slot(&key);
        assert!(slot.is_empty());

        slot.attach(mock.context("vault:contoso:one")).unwrap();
        assert_eq!(slot.get().unwrap().reference().key_name(), "one");
        // The displaced context is dropped.
        slot.attach(mock.context("vault:contoso:two")).unwrap();
        assert_eq!(live_contexts(), before + 1);

        let context = slot.detach().unwrap();
        assert_eq!(context.reference().key_name(), "two");
        assert!(slot.detach().is_none());
        assert!(slot.is_empty());
        drop(context);
        assert_eq!(live_contexts(), before);
    }

    #[test]
    fn test_freeing_the_key_releases_an_attached_context() {
        let mock = MockVault::rsa();
        let before = live_contexts();
        let key = OsslKey::from_material(&mock.material()).unwrap();
        rsa_slot(&key)
            .attach(mock.context("vault:contoso:signing"))
            .unwrap();
        assert_eq!(live_contexts(), before + 1);

        drop(key);
        assert_eq!(live_contexts(), before);
    }

    #[test]
    fn test_rsa_finish_detaches_once() {
        let mock = MockVault::rsa();
        let before = live_contexts();
        let key = OsslKey::from_material(&mock.material()).unwrap();
        rsa_slot(&key)
            .attach(mock.context("vault:contoso:signing"))
            .unwrap();

        assert_eq!(unsafe { rsa_finish(key.rsa_ptr()) }, 1);
        assert_eq!(live_contexts(), before);
        assert!(rsa_slot(&key).is_empty());
        assert_eq!(unsafe { rsa_finish(key.rsa_ptr()) }, 1);
        assert_eq!(live_contexts(), before);
    }
}
