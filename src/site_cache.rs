//! `SiteCache`: the in-memory, per-site entity cache.
//!
//! One `SiteCache` per live site, each guarding its own `HashMap<Id,
//! CachedEntity>` behind a single `Mutex` — one lock per logical partition
//! rather than a single global one. Eviction is explicit only: nothing here
//! runs a background sweep. A pending delete (of either a single entity or
//! the whole site) completes itself opportunistically — the next cache
//! touch, or the drop of the last outstanding `EntityRef`, drains it. See
//! `CachedEntity::make_ref`'s release hook in `cache.rs`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::backend::DbBackend;
use crate::cache::{CachedEntity, EntityRef, ReleaseHook};
use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::id::Id;

/// Outcome of a delete request against an entity or a whole site: either it
/// completed immediately, or a reference kept it alive and the delete will
/// finish once the last reference drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Ok,
    Delayed,
}

struct Inner {
    backend: Arc<dyn DbBackend>,
    entities: Mutex<HashMap<Id, CachedEntity>>,
}

pub struct SiteCache {
    site_id: u32,
    inner: Arc<Inner>,
    delete_pending: AtomicBool,
}

impl SiteCache {
    pub fn new(site_id: u32, backend: Arc<dyn DbBackend>) -> Self {
        tracing::debug!(site_id, "site cache created");
        SiteCache {
            site_id,
            inner: Arc::new(Inner { backend, entities: Mutex::new(HashMap::new()) }),
            delete_pending: AtomicBool::new(false),
        }
    }

    pub fn site_id(&self) -> u32 {
        self.site_id
    }

    fn release_hook(&self) -> ReleaseHook {
        let inner = Arc::clone(&self.inner);
        Arc::new(move |id: Id| {
            let mut map = inner.entities.lock().unwrap();
            if let Some(cached) = map.get(&id) {
                // The dropping `EntityRef`'s own `Arc` has not been released
                // yet at this point (`Drop::drop`'s body runs before its
                // field drop glue), so `external_ref_count()` still counts
                // it. A count of 1 here means this hook's caller is the
                // last external reference.
                if cached.is_delete_pending() && cached.external_ref_count() <= 1 {
                    tracing::debug!(%id, "draining deferred delete on last reference drop");
                    if let Err(e) = inner.backend.delete_entity_persistent(id) {
                        tracing::warn!(%id, error = %e, "deferred delete failed");
                        return;
                    }
                    map.remove(&id);
                }
            }
        })
    }

    /// Load `id` into the cache if it is not already resident.
    fn ensure_loaded(&self, id: Id) -> Result<()> {
        {
            let map = self.inner.entities.lock().unwrap();
            if map.contains_key(&id) {
                return Ok(());
            }
        }
        // Backend I/O happens with the mutex released: acquire the
        // site-cache mutex only to read/write the cached pointer, never
        // while blocked on backend I/O.
        let entity = self.inner.backend.load_entity(id)?;
        let mut map = self.inner.entities.lock().unwrap();
        map.entry(id).or_insert_with(|| CachedEntity::new(entity));
        Ok(())
    }

    /// Fetch a handle to `id`, loading it from the backend on a cache miss.
    pub fn get(&self, id: Id) -> Result<EntityRef> {
        self.ensure_loaded(id)?;
        let map = self.inner.entities.lock().unwrap();
        let cached = map.get(&id).expect("ensure_loaded just populated this slot");
        if cached.is_delete_pending() {
            return Err(Error::NotFound(format!("entity {id} is pending deletion")));
        }
        Ok(cached.make_ref(Some(self.release_hook())))
    }

    /// Insert a freshly constructed, not-yet-persisted entity and return a
    /// handle to it. Used by `DatabaseAccess::new_entity`.
    pub fn insert_new(&self, entity: Entity) -> EntityRef {
        let id = entity.id();
        let mut map = self.inner.entities.lock().unwrap();
        let cached = map.entry(id).or_insert_with(|| CachedEntity::new(entity));
        cached.make_ref(Some(self.release_hook()))
    }

    /// Drop `id` from cache unconditionally, without touching the backend.
    /// Used to discard a half-built dump-import entity that was never
    /// persisted.
    pub fn delete_from_cache(&self, id: Id) {
        self.inner.entities.lock().unwrap().remove(&id);
    }

    /// Evict `id` from cache iff it is unreferenced and not dirty. Returns
    /// whether eviction happened.
    pub fn try_evict(&self, id: Id) -> bool {
        let mut map = self.inner.entities.lock().unwrap();
        match map.get(&id) {
            Some(cached) if !cached.is_referenced() && !cached.is_dirty() => {
                map.remove(&id);
                true
            }
            _ => false,
        }
    }

    /// Request deletion of `id`. Deletes immediately if unreferenced,
    /// otherwise marks it and defers to the release hook.
    pub fn delete_entity(&self, id: Id) -> Result<DeleteOutcome> {
        self.ensure_loaded(id)?;
        let mut map = self.inner.entities.lock().unwrap();
        let cached = map.get_mut(&id).expect("ensure_loaded just populated this slot");
        cached.set_delete_pending();
        if cached.is_referenced() {
            tracing::debug!(%id, "entity delete deferred: still referenced");
            Ok(DeleteOutcome::Delayed)
        } else {
            map.remove(&id);
            drop(map);
            self.inner.backend.delete_entity_persistent(id)?;
            tracing::debug!(%id, "entity deleted immediately");
            Ok(DeleteOutcome::Ok)
        }
    }

    /// Mark the whole site for deletion. Callers decide whether that
    /// completes immediately (`is_anything_referenced` is false) or must
    /// wait.
    pub fn set_delete_pending(&self) {
        self.delete_pending.store(true, Ordering::SeqCst);
    }

    pub fn is_delete_pending(&self) -> bool {
        self.delete_pending.load(Ordering::SeqCst)
    }

    /// True iff any entity currently cached for this site has a live
    /// external reference.
    pub fn is_anything_referenced(&self) -> bool {
        let map = self.inner.entities.lock().unwrap();
        map.values().any(CachedEntity::is_referenced)
    }

    /// Ids of entities in this site's cache with unpersisted changes.
    pub fn dirty_ids(&self) -> Vec<Id> {
        let map = self.inner.entities.lock().unwrap();
        map.iter().filter(|(_, c)| c.is_dirty()).map(|(id, _)| *id).collect()
    }

    /// Persist every dirty entity currently cached for this site, clearing
    /// each one's dirty bit on success. Returns the number persisted.
    pub fn commit_dirty(&self) -> Result<usize> {
        let mut count = 0;
        for id in self.dirty_ids() {
            let entity_arc = {
                let map = self.inner.entities.lock().unwrap();
                match map.get(&id) {
                    Some(cached) => cached.entity_arc(),
                    None => continue,
                }
            };
            self.inner.backend.persist_entity(&entity_arc)?;
            let mut token = entity_arc.lock_write();
            entity_arc.clear_dirty(&mut token)?;
            count += 1;
        }
        if count > 0 {
            tracing::debug!(site_id = self.site_id, count, "committed dirty entities");
        }
        Ok(count)
    }
}
