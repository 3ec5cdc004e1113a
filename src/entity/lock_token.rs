//! Scoped reader/writer lock tokens bound to a specific entity's identity.
//!
//! Built on Rust's natural scoped acquisition primitive (`std::sync::RwLock`
//! guards), with an identity check layered on by stamping the owning
//! entity's [`Id`] onto the token at acquisition time.

use std::sync::{RwLockReadGuard, RwLockWriteGuard};

use crate::entity::core::Core;
use crate::entity::kind::Kind;
use crate::id::Id;

/// The data an `Entity`'s lock actually guards.
#[derive(Debug, Clone)]
pub struct EntityData {
    pub core: Core,
    pub kind: Kind,
}

/// A scoped read acquisition, bound to the `Id` of the entity it was taken
/// from. Field getters check this binding before reading.
pub struct ReaderLockToken<'a> {
    pub(crate) entity_id: Id,
    pub(crate) guard: RwLockReadGuard<'a, EntityData>,
}

/// A scoped write acquisition, bound to the `Id` of the entity it was taken
/// from. Field setters check this binding before writing.
pub struct WriterLockToken<'a> {
    pub(crate) entity_id: Id,
    pub(crate) guard: RwLockWriteGuard<'a, EntityData>,
}

/// Common surface both token kinds expose for reads — a writer can always
/// read what it is about to modify.
pub trait ReadToken {
    fn entity_id(&self) -> Id;
    fn data(&self) -> &EntityData;

    fn core(&self) -> &Core {
        &self.data().core
    }

    fn kind(&self) -> &Kind {
        &self.data().kind
    }
}

impl ReadToken for ReaderLockToken<'_> {
    fn entity_id(&self) -> Id {
        self.entity_id
    }

    fn data(&self) -> &EntityData {
        &self.guard
    }
}

impl ReadToken for WriterLockToken<'_> {
    fn entity_id(&self) -> Id {
        self.entity_id
    }

    fn data(&self) -> &EntityData {
        &self.guard
    }
}

impl WriterLockToken<'_> {
    pub fn data_mut(&mut self) -> &mut EntityData {
        &mut self.guard
    }

    pub fn core_mut(&mut self) -> &mut Core {
        &mut self.guard.core
    }

    pub fn kind_mut(&mut self) -> &mut Kind {
        &mut self.guard.kind
    }
}
