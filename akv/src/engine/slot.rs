// Copyright 2021 Contributors to the Confidential Packaging project.
// SPDX-License-Identifier: MIT

//! Extension slots: per-key storage for the remote key context.

use super::context::RemoteKeyContext;
use crate::keys::Result;

/// A place on a key object where at most one [RemoteKeyContext] can be kept.
///
/// Contexts move in and out of the slot. Whatever is left in the slot when the key object goes away
/// is dropped with it.
pub trait ContextSlot {
    /// Puts a context into an empty slot. If this fails, the context has been dropped.
    fn install(&mut self, context: RemoteKeyContext) -> Result<()>;

    /// Takes the context out of the slot, leaving it empty.
    fn detach(&mut self) -> Option<RemoteKeyContext>;

    /// The context in the slot, if any.
    fn get(&self) -> Option<&RemoteKeyContext>;

    /// Puts a context into the slot. A context that was already there is dropped first.
    fn attach(&mut self, context: RemoteKeyContext) -> Result<()> {
        if let Some(displaced) = self.detach() {
            log::warn!(
                "Key object already had a remote key context for {}; replacing it with {}.",
                displaced.reference(),
                context.reference()
            );
            drop(displaced);
        }
        self.install(context)
    }

    fn is_empty(&self) -> bool {
        self.get().is_none()
    }
}

/// A slot that lives inside a Rust key object.
#[derive(Debug, Default)]
pub struct ExtensionSlot {
    context: Option<RemoteKeyContext>,
}

impl ExtensionSlot {
    pub fn new() -> ExtensionSlot {
        ExtensionSlot::default()
    }
}

impl ContextSlot for ExtensionSlot {
    fn install(&mut self, context: RemoteKeyContext) -> Result<()> {
        self.context = Some(context);
        Ok(())
    }

    fn detach(&mut self) -> Option<RemoteKeyContext> {
        self.context.take()
    }

    fn get(&self) -> Option<&RemoteKeyContext> {
        self.context.as_ref()
    }
}
