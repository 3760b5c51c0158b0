// Copyright 2021 Contributors to the Confidential Packaging project.
// SPDX-License-Identifier: MIT

//! # FFI Definitions for the OpenSSL ENGINE interface.
//!
//! The bindings cover what an ENGINE needs in order to hand out RSA and EC keys whose private-key
//! operations it implements itself: the ENGINE setters, `RSA_METHOD` and `EC_KEY_METHOD` building,
//! `EVP_PKEY_METHOD` overrides, extension data, and the error stack. They are generated with
//! `bindgen` against whichever OpenSSL headers `openssl-sys` located, so the same crate builds
//! against OpenSSL 1.1 and 3.x.
//!
//! Some of the needed entry points are macros in one generation and functions in the other. A small
//! C shim, compiled with `cc`, wraps each of them in a real function with an `akv_shim_` prefix.
//!
//! Numeric constants from the OpenSSL headers are mostly macros that `bindgen` cannot see through,
//! so the stable ones that are needed are restated below.

#![allow(
    non_snake_case,
    non_camel_case_types,
    non_upper_case_globals,
    dead_code,
    trivial_casts,
    deref_nullptr,
    clippy::all
)]

// Make sure libcrypto is linked.
extern crate openssl_sys;

mod openssl_bindings {
    include!(concat!(env!("OUT_DIR"), "/openssl_bindings.rs"));
}

// Just re-export everything that bindgen creates.
pub use openssl_bindings::*;

use std::os::raw::c_int;

pub const NID_undef: c_int = 0;
pub const NID_sha256: c_int = 672;
pub const NID_sha384: c_int = 673;
pub const NID_sha512: c_int = 674;
pub const NID_X9_62_prime256v1: c_int = 415;
pub const NID_secp256k1: c_int = 714;
pub const NID_secp384r1: c_int = 715;
pub const NID_secp521r1: c_int = 716;

pub const EVP_PKEY_RSA: c_int = 6;
pub const EVP_PKEY_RSA_PSS: c_int = 912;
pub const EVP_PKEY_EC: c_int = 408;

pub const RSA_PKCS1_PADDING: c_int = 1;
pub const RSA_NO_PADDING: c_int = 3;
pub const RSA_PKCS1_OAEP_PADDING: c_int = 4;
pub const RSA_PKCS1_PSS_PADDING: c_int = 6;

pub const CRYPTO_EX_INDEX_EC_KEY: c_int = 8;
pub const CRYPTO_EX_INDEX_RSA: c_int = 9;

pub const ENGINE_FLAGS_NO_REGISTER_ALL: c_int = 0x0008;

pub const OPENSSL_EC_NAMED_CURVE: c_int = 0x001;
