//! `CachedEntity` and `EntityRef`: the reference-counted handle that pins a
//! loaded [`Entity`] in a [`crate::site_cache::SiteCache`].
//!
//! `EntityRef` is implemented over `std::sync::Arc`, shared across threads
//! the same way; `Arc::strong_count` stands in for a manual reference
//! counter. Weak references such as `contained_by` are plain `Id`s and are
//! never counted here.

use std::sync::Arc;

use crate::entity::Entity;
use crate::id::Id;

/// One entity loaded into a [`crate::site_cache::SiteCache`] slot. The
/// cache's own map entry holds one `Arc`; every live [`EntityRef`] holds
/// another. `Arc::strong_count(&cached.entity) > 1` means at least one
/// external reference is still live.
pub struct CachedEntity {
    entity: Arc<Entity>,
    /// Set once the owning site (or the entity itself) has been asked to
    /// delete this entity while a reference was still live. Resolved when
    /// the last `EntityRef` drops — see `SiteCache::try_evict`.
    delete_pending: bool,
}

/// Called from [`EntityRef::drop`] when the dropping handle was the last
/// external reference to an entity. [`crate::site_cache::SiteCache`] binds
/// one of these to every ref it mints so a pending delete drains itself
/// without a maintenance thread — see that module's release hook.
pub type ReleaseHook = Arc<dyn Fn(Id) + Send + Sync>;

impl CachedEntity {
    pub fn new(entity: Entity) -> Self {
        CachedEntity { entity: Arc::new(entity), delete_pending: false }
    }

    pub fn id(&self) -> Id {
        self.entity.id()
    }

    /// Mint a new handle pinning this entity; increments the `Arc` count.
    /// `on_release`, if given, fires when this handle (or a clone of it) is
    /// the last external reference to drop.
    pub fn make_ref(&self, on_release: Option<ReleaseHook>) -> EntityRef {
        EntityRef { entity: Arc::clone(&self.entity), on_release }
    }

    /// Number of handles outstanding against this entity, not counting the
    /// cache's own slot.
    pub fn external_ref_count(&self) -> usize {
        Arc::strong_count(&self.entity).saturating_sub(1)
    }

    pub fn is_referenced(&self) -> bool {
        self.external_ref_count() > 0
    }

    pub fn is_delete_pending(&self) -> bool {
        self.delete_pending
    }

    pub fn set_delete_pending(&mut self) {
        self.delete_pending = true;
    }

    /// True iff the entity has unpersisted changes — used by
    /// `SiteCache::try_evict` to refuse evicting dirty entries.
    pub fn is_dirty(&self) -> bool {
        let token = self.entity.lock_read();
        self.entity.is_dirty(&token).unwrap_or(true)
    }

    /// Borrow the entity directly — used by the cache itself (e.g. to check
    /// the dirty bit at commit time) without minting a ref.
    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    /// Clone the backing `Arc` — used by `SiteCache::commit_dirty` to persist
    /// without holding the cache mutex across backend I/O.
    pub fn entity_arc(&self) -> Arc<Entity> {
        Arc::clone(&self.entity)
    }
}

/// A shared, reference-counted handle that pins an [`Entity`] in cache for
/// as long as it is held. Cloning increments the count; dropping the last
/// clone releases the pin, allowing the cache to evict or finish a deferred
/// delete.
pub struct EntityRef {
    entity: Arc<Entity>,
    on_release: Option<ReleaseHook>,
}

impl EntityRef {
    pub fn id(&self) -> Id {
        self.entity.id()
    }

    pub fn entity(&self) -> &Entity {
        &self.entity
    }
}

impl Clone for EntityRef {
    fn clone(&self) -> Self {
        EntityRef { entity: Arc::clone(&self.entity), on_release: self.on_release.clone() }
    }
}

impl Drop for EntityRef {
    /// If this is the last external reference about to go away (the cache's
    /// own slot is the only one left), give the cache a chance to complete a
    /// deferred delete.
    fn drop(&mut self) {
        if let Some(hook) = &self.on_release {
            if Arc::strong_count(&self.entity) == 2 {
                hook(self.entity.id());
            }
        }
    }
}

impl std::ops::Deref for EntityRef {
    type Target = Entity;

    fn deref(&self) -> &Entity {
        &self.entity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::core::{Core, EntityType};
    use crate::entity::kind::Kind;

    fn sample() -> Entity {
        Entity::new(Core::new(Id::new(1, 5), EntityType::Entity, "Rock".into()), Kind::Entity)
    }

    #[test]
    fn ref_count_tracks_live_handles() {
        let cached = CachedEntity::new(sample());
        assert!(!cached.is_referenced());
        let r1 = cached.make_ref(None);
        assert_eq!(cached.external_ref_count(), 1);
        let r2 = r1.clone();
        assert_eq!(cached.external_ref_count(), 2);
        drop(r1);
        assert_eq!(cached.external_ref_count(), 1);
        drop(r2);
        assert!(!cached.is_referenced());
    }

    #[test]
    fn entity_ref_derefs_to_entity() {
        let cached = CachedEntity::new(sample());
        let r = cached.make_ref(None);
        assert_eq!(r.id(), Id::new(1, 5));
        let token = r.lock_read();
        assert_eq!(r.name(&token).unwrap(), "Rock");
    }
}
