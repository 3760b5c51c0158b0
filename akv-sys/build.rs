// Copyright 2021 Contributors to the Confidential Packaging project.
// SPDX-License-Identifier: MIT

#![deny(
    nonstandard_style,
    dead_code,
    improper_ctypes,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    overflowing_literals,
    path_statements,
    patterns_in_fns_without_body,
    unconditional_recursion,
    unused,
    unused_allocation,
    unused_comparisons,
    unused_parens,
    while_true,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications,
    unused_results
)]

use std::io::{Error, ErrorKind, Result};

const SHIM_DIR: &str = "./src/c";

/// The OpenSSL include directories, as reported by openssl-sys. Empty when openssl-sys found the
/// headers in the compiler's default search path.
fn openssl_include_dirs() -> Vec<String> {
    match std::env::var("DEP_OPENSSL_INCLUDE") {
        Ok(dirs) => std::env::split_paths(&dirs)
            .map(|dir| dir.to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    }
}

fn generate_bindings(include_dirs: &[String], output_dir: &str) -> Result<()> {
    let mut builder = bindgen::Builder::default()
        .header(format!("{}/wrapper.h", SHIM_DIR))
        .clang_arg(format!("-I{}", SHIM_DIR))
        // The ENGINE and low-level key APIs are deprecated in OpenSSL 3; they are still what
        // an ENGINE has to use.
        .clang_arg("-DOPENSSL_SUPPRESS_DEPRECATED")
        .whitelist_function("ENGINE_.*")
        .whitelist_function("RSA_.*")
        .whitelist_function("EC_KEY_.*")
        .whitelist_function("EC_GROUP_get_curve_name")
        .whitelist_function("ECDSA_.*")
        .whitelist_function("EVP_PKEY_new")
        .whitelist_function("EVP_PKEY_free")
        .whitelist_function("EVP_PKEY_assign")
        .whitelist_function("EVP_PKEY_meth_.*")
        .whitelist_function("EVP_PKEY_CTX_get0_pkey")
        .whitelist_function("EVP_PKEY_CTX_new")
        .whitelist_function("EVP_PKEY_CTX_free")
        .whitelist_function("EVP_PKEY_sign_init")
        .whitelist_function("EVP_PKEY_sign")
        .whitelist_function("EVP_sha256")
        .whitelist_function("BN_bin2bn")
        .whitelist_function("BN_free")
        .whitelist_function("ERR_get_next_error_library")
        .whitelist_function("OpenSSL_version_num")
        .whitelist_function("akv_shim_.*")
        .whitelist_type("dynamic_fns")
        // Tell cargo to invalidate the built crate whenever any of the included header files changed.
        .parse_callbacks(Box::new(bindgen::CargoCallbacks));
    for dir in include_dirs {
        builder = builder.clang_arg(format!("-I{}", dir));
    }

    let bindings = builder.generate().map_err(|_| {
        Error::new(
            ErrorKind::Other,
            "Unable to generate bindings for OpenSSL. Is libclang installed?",
        )
    })?;

    bindings.write_to_file(format!("{}/openssl_bindings.rs", output_dir))
}

fn compile_shim(include_dirs: &[String]) {
    let mut build = cc::Build::new();
    let _ = build
        .file(format!("{}/shim.c", SHIM_DIR))
        .include(SHIM_DIR)
        .define("OPENSSL_SUPPRESS_DEPRECATED", None)
        .static_flag(true);
    for dir in include_dirs {
        let _ = build.include(dir);
    }
    build.compile("libakvshim.a");
}

fn main() -> Result<()> {
    let output_dir = std::env::var("OUT_DIR")
        .map_err(|_| Error::new(ErrorKind::Other, "OUT_DIR is not set."))?;
    let include_dirs = openssl_include_dirs();

    println!("cargo:rerun-if-changed={}/shim.c", SHIM_DIR);
    println!("cargo:rerun-if-changed={}/shim.h", SHIM_DIR);
    println!("cargo:rerun-if-changed={}/wrapper.h", SHIM_DIR);
    println!("cargo:rerun-if-env-changed=DEP_OPENSSL_INCLUDE");

    generate_bindings(&include_dirs, &output_dir)?;
    compile_shim(&include_dirs);
    Ok(())
}
