// Copyright 2021 Contributors to the Confidential Packaging project.
// SPDX-License-Identifier: MIT

//! The process-wide registry of method override tables.
//!
//! Override tables are created lazily, the first time a key is adapted, and exactly once no matter
//! how many threads race to create them. They are never changed after that. When the engine is
//! unloaded, the tables are released once; from then on the registry refuses to hand them out.

use crate::keys::error::KeyError;
use crate::keys::Result;
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicBool, Ordering};

/// A set of method tables, together with any per-process indices that go with them.
pub trait MethodTables: Sized + Send + Sync {
    /// Creates the tables. Called at most once per registry, unless an earlier attempt failed.
    fn allocate() -> Result<Self>;

    /// Frees whatever [MethodTables::allocate] created. Called at most once.
    fn release(&self);
}

pub struct MethodRegistry<T> {
    tables: OnceCell<T>,
    released: AtomicBool,
}

impl<T> MethodRegistry<T> {
    pub const fn new() -> MethodRegistry<T> {
        MethodRegistry {
            tables: OnceCell::new(),
            released: AtomicBool::new(false),
        }
    }
}

impl<T: MethodTables> MethodRegistry<T> {
    /// Returns the tables, creating them if this is the first call.
    ///
    /// Concurrent first calls block until one of them has finished allocating. If allocation fails,
    /// the error is returned and the next call tries again. After [MethodRegistry::teardown], this
    /// always fails with [KeyError::AllocationFailure].
    pub fn ensure_initialized(&self) -> Result<&T> {
        if self.released.load(Ordering::SeqCst) {
            return Err(KeyError::AllocationFailure("the method tables have been released"));
        }
        self.tables.get_or_try_init(|| {
            log::trace!("Allocating method tables.");
            T::allocate()
        })
    }

    /// The tables, if they have been created and not yet released.
    pub fn get(&self) -> Option<&T> {
        if self.released.load(Ordering::SeqCst) {
            None
        } else {
            self.tables.get()
        }
    }

    /// Releases the tables. Safe to call more than once, and safe to call if the tables were never
    /// created.
    pub fn teardown(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(tables) = self.tables.get() {
            log::trace!("Releasing method tables.");
            tables.release();
        }
    }
}

impl<T: MethodTables> Default for MethodRegistry<T> {
    fn default() -> MethodRegistry<T> {
        MethodRegistry::new()
    }
}
