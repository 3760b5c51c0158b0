// Copyright 2021 Contributors to the Confidential Packaging project.
// SPDX-License-Identifier: MIT

//! The akv crate lets a crypto toolkit use asymmetric keys that live in Azure Key Vault or Azure
//! Managed HSM. The toolkit sees ordinary key objects; every private-key operation on them is sent
//! to the vault, authenticated with a token from the platform's managed identity. Private key
//! material never leaves the vault.
//!
//! The crate is organised in layers:
//!
//! - [keys] defines key identifiers, the credential and vault client protocols, and default
//!   implementations of them.
//! - [engine] manages the life of a remote key handle and redirects operations on it, independently
//!   of any crypto library.
//! - `ossl`, built with the `engine` feature, binds the engine layer into OpenSSL as a dynamically
//!   loadable ENGINE.

pub mod config;
pub mod engine;
pub mod keys;

#[cfg(feature = "engine")]
pub mod ossl;
