// Copyright 2021 Contributors to the Confidential Packaging project.
// SPDX-License-Identifier: MIT

//! The key-handle lifecycle and operation redirection layer.
//!
//! This module is independent of any particular crypto library. A host plugs in through two seams:
//! a [ContextSlot] on its key objects, and a [KeyAdapter] that builds key objects and installs method
//! overrides on them. The overrides themselves call into the [redirect] functions, which do the
//! actual work against the vault. [soft] is a complete host in plain Rust; the OpenSSL engine in
//! `crate::ossl` is another.
//!
//! The life of a key goes like this:
//!
//! 1. [load_key] parses the key identifier and creates a [RemoteKeyContext].
//! 2. A token is obtained and the public key is fetched.
//! 3. The adapter builds a key object from the public key, takes the method tables from a
//!    [MethodRegistry], and moves the context into the key object's slot.
//! 4. Private-key operations on the key object are redirected to the vault, each with a fresh token.
//! 5. When the key object is freed, its teardown override detaches and drops the context.
//!
//! If anything fails before step 3 completes, the context is dropped on the way out.

pub mod adapter;
pub mod context;
pub mod loader;
pub mod redirect;
pub mod registry;
pub mod slot;
pub mod soft;

#[cfg(test)]
pub(crate) mod testing;

pub use adapter::{Generation, KeyAdapter};
pub use context::{RemoteKeyContext, Services};
pub use loader::{load_key, KeyUsage};
pub use registry::{MethodRegistry, MethodTables};
pub use slot::{ContextSlot, ExtensionSlot};
