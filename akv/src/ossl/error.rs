// Copyright 2021 Contributors to the Confidential Packaging project.
// SPDX-License-Identifier: MIT

//! Reporting engine errors on the OpenSSL error stack.

use crate::keys::error::KeyError;

use akv_sys as ffi;
use once_cell::sync::OnceCell;
use std::ffi::CString;
use std::os::raw::{c_char, c_int};

static LIBRARY_CODE: OnceCell<c_int> = OnceCell::new();

/// The error library code of the engine, allocated on first use.
pub fn library_code() -> c_int {
    *LIBRARY_CODE.get_or_init(|| unsafe { ffi::ERR_get_next_error_library() })
}

/// Pushes an error onto the calling thread's OpenSSL error stack. The reason code comes from the
/// error's kind, and its message is attached as text data. `file` must be nul-terminated.
pub fn push(err: &KeyError, file: &'static str, line: u32) {
    let text = CString::new(err.to_string().replace('\0', " ")).unwrap_or_default();
    unsafe {
        ffi::akv_shim_put_error(
            library_code(),
            err.kind().reason_code(),
            file.as_ptr() as *const c_char,
            line as c_int,
            text.as_ptr(),
        );
    }
}

/// Pushes an error from the caller's location.
macro_rules! report {
    ($err:expr) => {
        $crate::ossl::error::push(&$err, concat!(file!(), "\0"), line!())
    };
}

pub(crate) use report;
