// Copyright 2021 Contributors to the Confidential Packaging project.
// SPDX-License-Identifier: MIT

//! Error definitions/handling.

use thiserror::Error;

/// Errors in akv-tool
#[derive(Error, Debug)]
pub enum Error {
    /// Error emanating from standard I/O.
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// Errors from loading a vault key or from the operations done with it.
    #[error(transparent)]
    KeyError(#[from] akv::keys::error::KeyError),

    /// The input of a command was expected to be base64, but was not.
    #[error(transparent)]
    Base64DecodeError(#[from] base64::DecodeError),

    /// Errors relating to JSON processing.
    #[error(transparent)]
    JsonError(#[from] serde_json::Error),

    /// Errors from encoding public keys.
    #[error(transparent)]
    Pkcs1Error(#[from] pkcs1::Error),

    /// Error emanating from the akv-tool itself.
    #[error(transparent)]
    ToolError(#[from] ToolErrorKind),
}

/// Errors originating in the akv-tool itself.
#[derive(Error, Debug, PartialEq)]
pub enum ToolErrorKind {
    /// Operation not supported by the akv-tool
    #[error("Operation not supported by the akv-tool")]
    NotSupported,

    /// The digest named with `--digest` is not one the vault signs with.
    #[error("Unsupported digest '{0}', expected sha256, sha384 or sha512")]
    UnsupportedDigest(String),

    /// The input file holds no data.
    #[error("The input is empty")]
    EmptyInput,
}

/// A Result type with the Err variant set as a ToolError
pub type Result<T> = std::result::Result<T, Error>;
