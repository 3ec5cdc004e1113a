//! `DatabaseAccess`: the low-level entry point composing [`crate::backend`]
//! and [`crate::site_cache`] into site and entity lifecycle operations.
//!
//! An explicit struct built once at startup and passed by reference to
//! every caller, never a global. There is no singleton here: tests and
//! embedders are free to run several `DatabaseAccess` instances side by
//! side, each over its own backend.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::backend::DbBackend;
use crate::cache::EntityRef;
use crate::config::Limits;
use crate::entity::core::EntityType;
use crate::error::{Error, Result};
use crate::id::Id;
use crate::site_cache::{DeleteOutcome, SiteCache};

/// The four entities every site is bootstrapped with, in allocation order:
/// a root Region, a system-owned Player, a default Room, and an
/// administrator Player. Their ids (1-4) are reserved and can never be
/// deleted.
const RESERVED_ENTITY_COUNT: u32 = 4;

pub struct DatabaseAccess {
    backend: Arc<dyn DbBackend>,
    limits: Limits,
    /// Guards the site list itself (insertion/removal of whole sites); each
    /// `SiteCache`'s own mutex still guards that site's entity map
    /// independently.
    sites: Mutex<BTreeMap<u32, Arc<SiteCache>>>,
}

impl DatabaseAccess {
    /// Build a handle over `backend`, discovering whatever sites it already
    /// knows about. Idempotent: calling this again (e.g. against the same
    /// backend reopened) just rediscovers the same sites, since nothing here
    /// is process-global.
    pub fn startup(backend: Arc<dyn DbBackend>, limits: Limits) -> Result<Self> {
        let mut sites = BTreeMap::new();
        for site_id in backend.all_site_ids()? {
            sites.insert(site_id, Arc::new(SiteCache::new(site_id, Arc::clone(&backend))));
        }
        tracing::info!(site_count = sites.len(), "database access started");
        Ok(DatabaseAccess { backend, limits, sites: Mutex::new(sites) })
    }

    /// Consume the handle, making the shutdown point explicit in caller
    /// code — there is no process-wide state to tear down beyond what
    /// dropping `self` already releases.
    pub fn destroy(self) {
        tracing::info!("database access shut down");
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    fn site_cache(&self, site_id: u32) -> Result<Arc<SiteCache>> {
        self.sites
            .lock()
            .unwrap()
            .get(&site_id)
            .cloned()
            .ok_or_else(|| Error::BadArguments(format!("no such site {site_id}")))
    }

    // --- Site lifecycle --------------------------------------------------

    /// Allocate a new site, bootstrap its four reserved entities, and
    /// return its id.
    pub fn new_site(&self, name: &str) -> Result<u32> {
        if name.trim().is_empty() {
            return Err(Error::BadArguments("site name must not be empty".into()));
        }
        let site_id = self.backend.allocate_site()?;
        self.backend.set_site_name(site_id, name)?;
        let cache = Arc::new(SiteCache::new(site_id, Arc::clone(&self.backend)));
        self.sites.lock().unwrap().insert(site_id, Arc::clone(&cache));
        self.bootstrap_site(site_id, &cache)?;
        tracing::info!(site_id, name, "site created");
        Ok(site_id)
    }

    fn bootstrap_site(&self, site_id: u32, cache: &SiteCache) -> Result<()> {
        let root = self.new_entity_in(cache, EntityType::Region, site_id, Id::DEFAULT, "Root Region")?;
        let system = self.new_entity_in(cache, EntityType::Player, site_id, Id::DEFAULT, "System")?;
        let room = self.new_entity_in(cache, EntityType::Room, site_id, system.id(), "Default Room")?;
        let admin = self.new_entity_in(cache, EntityType::Player, site_id, Id::DEFAULT, "Administrator")?;

        for (entity, flag) in [(&system, "system"), (&admin, "administrator")] {
            let mut token = entity.lock_write();
            entity.add_flag(&mut token, flag)?;
        }
        {
            let mut token = room.lock_write();
            room.set_contained_by(&mut token, root.id())?;
        }
        debug_assert_eq!(root.id().entity_id(), 1);
        debug_assert_eq!(system.id().entity_id(), 2);
        debug_assert_eq!(room.id().entity_id(), 3);
        debug_assert_eq!(admin.id().entity_id(), 4);
        Ok(())
    }

    /// Request deletion of a whole site. Returns immediately if nothing in
    /// it is referenced, otherwise the site is marked and torn down
    /// opportunistically as references drain.
    pub fn delete_site(&self, site_id: u32) -> Result<DeleteOutcome> {
        let cache = self.site_cache(site_id)?;
        cache.set_delete_pending();
        if cache.is_anything_referenced() {
            tracing::info!(site_id, "site delete deferred: entities still referenced");
            Ok(DeleteOutcome::Delayed)
        } else {
            self.teardown_site(site_id)?;
            Ok(DeleteOutcome::Ok)
        }
    }

    fn teardown_site(&self, site_id: u32) -> Result<()> {
        self.backend.delete_site(site_id)?;
        self.sites.lock().unwrap().remove(&site_id);
        tracing::info!(site_id, "site torn down");
        Ok(())
    }

    /// Sweep every site marked for deletion and complete any whose
    /// references have since drained. Cheap (O(sites)); called
    /// opportunistically from `get_entity`/`commit_all`, and safe to call
    /// directly from a maintenance loop.
    pub fn reap_pending_sites(&self) -> Result<()> {
        let pending: Vec<u32> = {
            let sites = self.sites.lock().unwrap();
            sites
                .values()
                .filter(|c| c.is_delete_pending() && !c.is_anything_referenced())
                .map(|c| c.site_id())
                .collect()
        };
        for site_id in pending {
            self.teardown_site(site_id)?;
        }
        Ok(())
    }

    pub fn all_site_ids(&self) -> Vec<u32> {
        self.sites.lock().unwrap().keys().copied().collect()
    }

    pub fn site_name(&self, site_id: u32) -> Result<String> {
        self.backend.site_name(site_id)
    }

    pub fn set_site_name(&self, site_id: u32, name: &str) -> Result<()> {
        self.site_cache(site_id)?;
        self.backend.set_site_name(site_id, name)
    }

    pub fn site_description(&self, site_id: u32) -> Result<String> {
        self.backend.site_description(site_id)
    }

    pub fn set_site_description(&self, site_id: u32, description: &str) -> Result<()> {
        self.site_cache(site_id)?;
        self.backend.set_site_description(site_id, description)
    }

    pub fn site_salt(&self, site_id: u32) -> Result<Vec<u8>> {
        self.backend.site_salt(site_id)
    }

    // --- Entity lifecycle -------------------------------------------------

    /// Allocate and construct a new entity within `site_id`. `owner ==
    /// Id::DEFAULT` means "owned by itself" (a temporary self-owner state
    /// while an entity is still being built up, used permanently by
    /// Players); otherwise `owner` must already exist in the same site.
    pub fn new_entity(&self, entity_type: EntityType, site_id: u32, owner: Id, name: &str) -> Result<EntityRef> {
        let cache = self.site_cache(site_id)?;
        self.new_entity_in(&cache, entity_type, site_id, owner, name)
    }

    fn new_entity_in(
        &self,
        cache: &SiteCache,
        entity_type: EntityType,
        site_id: u32,
        owner: Id,
        name: &str,
    ) -> Result<EntityRef> {
        if name.trim().is_empty() {
            return Err(Error::BadArguments("entity name must not be empty".into()));
        }
        if name.len() > self.limits.max_name_length {
            return Err(Error::BadArguments(format!("entity name exceeds {} bytes", self.limits.max_name_length)));
        }
        let entity_id = self.backend.allocate_entity_id(site_id)?;
        let id = Id::new(site_id, entity_id);
        let entity = self.backend.construct_entity(entity_type, id, id, name)?;

        if !owner.is_default() && owner != id {
            if owner.site_id() != site_id {
                return Err(Error::BadArguments(format!("owner {owner} is not in site {site_id}")));
            }
            cache.get(owner).map_err(|_| Error::BadArguments(format!("owner {owner} does not exist")))?;
            let mut token = entity.lock_write();
            entity.set_owner(&mut token, owner)?;
        }

        let entity_ref = cache.insert_new(entity);
        tracing::debug!(%id, ?entity_type, "entity created");
        Ok(entity_ref)
    }

    /// Fetch a handle to `id`.
    pub fn get_entity(&self, id: Id) -> Result<EntityRef> {
        let cache = self.site_cache(id.site_id())?;
        cache.get(id)
    }

    /// Request deletion of `id`. Reserved ids (1-4 within every site) and
    /// `Capability` entities can never be deleted; anything else behaves
    /// like `SiteCache::delete_entity`.
    pub fn delete_entity(&self, id: Id) -> Result<DeleteOutcome> {
        if id.entity_id() >= 1 && id.entity_id() <= RESERVED_ENTITY_COUNT {
            return Err(Error::Impossible(format!("{id} is a reserved entity and cannot be deleted")));
        }
        let cache = self.site_cache(id.site_id())?;
        let entity_ref = cache.get(id)?;
        let entity_type = entity_ref.entity_type(&entity_ref.lock_read())?;
        drop(entity_ref);
        if entity_type == EntityType::Capability {
            return Err(Error::Impossible(format!("{id} is a Capability and cannot be deleted")));
        }
        cache.delete_entity(id)
    }

    pub fn find(&self, site_id: u32, entity_type: Option<EntityType>, name: &str, exact: bool) -> Result<Vec<Id>> {
        self.site_cache(site_id)?;
        self.backend.find(site_id, entity_type, name, exact)
    }

    /// Entities directly contained by (or, for actions/exits, scoped to)
    /// `container`. Implemented as a backend-wide scan plus a
    /// `contained_by`/`action_contained_by` filter rather than a maintained
    /// reverse index (see DESIGN.md) — acceptable here since sites are
    /// expected to be modest in size and this is not on the per-command hot
    /// path the way `get_entity` is.
    pub fn contents_of(&self, container: Id) -> Result<Vec<Id>> {
        let cache = self.site_cache(container.site_id())?;
        let candidates = self.backend.find(container.site_id(), None, "", false)?;
        let mut out = Vec::new();
        for id in candidates {
            let entity_ref = match cache.get(id) {
                Ok(r) => r,
                Err(_) => continue,
            };
            let token = entity_ref.lock_read();
            let location = match entity_ref.entity_type(&token)? {
                EntityType::Action | EntityType::Exit => entity_ref.action_contained_by(&token).ok(),
                _ => entity_ref.contained_by(&token).ok(),
            };
            if location == Some(container) {
                out.push(id);
            }
        }
        out.sort();
        Ok(out)
    }

    /// Persist every dirty entity across every site, clearing dirty bits on
    /// success, then sweep any site/entity deletes that were deferred.
    /// Returns the number of entities persisted.
    pub fn commit_all(&self) -> Result<usize> {
        let caches: Vec<Arc<SiteCache>> = self.sites.lock().unwrap().values().cloned().collect();
        let mut total = 0;
        for cache in &caches {
            total += cache.commit_dirty()?;
        }
        self.reap_pending_sites()?;
        tracing::debug!(total, "commit_all complete");
        Ok(total)
    }

    /// Evict `id` from its site's cache iff unreferenced and not dirty.
    pub fn try_evict(&self, id: Id) -> Result<bool> {
        let cache = self.site_cache(id.site_id())?;
        Ok(cache.try_evict(id))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::backend::lmdb::LmdbBackend;

    fn open() -> (tempfile::TempDir, DatabaseAccess) {
        let dir = tempfile::tempdir().unwrap();
        let backend: Arc<dyn DbBackend> = Arc::new(LmdbBackend::open(dir.path(), 16 * 1024 * 1024).unwrap());
        let db = DatabaseAccess::startup(backend, Limits::default()).unwrap();
        (dir, db)
    }

    /// Wraps a real backend and counts `delete_entity_persistent` calls, so
    /// tests can assert a deferred delete actually reached the backend
    /// rather than inferring it from the cache's own `delete_pending` flag.
    struct CountingBackend {
        inner: LmdbBackend,
        deletes: AtomicUsize,
    }

    impl DbBackend for CountingBackend {
        fn allocate_site(&self) -> Result<u32> {
            self.inner.allocate_site()
        }
        fn delete_site(&self, site_id: u32) -> Result<()> {
            self.inner.delete_site(site_id)
        }
        fn allocate_entity_id(&self, site_id: u32) -> Result<u32> {
            self.inner.allocate_entity_id(site_id)
        }
        fn construct_entity(&self, entity_type: EntityType, id: Id, owner: Id, name: &str) -> Result<crate::entity::Entity> {
            self.inner.construct_entity(entity_type, id, owner, name)
        }
        fn persist_entity(&self, entity: &crate::entity::Entity) -> Result<()> {
            self.inner.persist_entity(entity)
        }
        fn load_entity(&self, id: Id) -> Result<crate::entity::Entity> {
            self.inner.load_entity(id)
        }
        fn delete_entity_persistent(&self, id: Id) -> Result<()> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            self.inner.delete_entity_persistent(id)
        }
        fn delete_entity_memory(&self, entity: &crate::entity::Entity) -> Result<()> {
            self.inner.delete_entity_memory(entity)
        }
        fn find(&self, site_id: u32, entity_type: Option<EntityType>, name: &str, exact: bool) -> Result<Vec<Id>> {
            self.inner.find(site_id, entity_type, name, exact)
        }
        fn all_site_ids(&self) -> Result<Vec<u32>> {
            self.inner.all_site_ids()
        }
        fn site_name(&self, site_id: u32) -> Result<String> {
            self.inner.site_name(site_id)
        }
        fn set_site_name(&self, site_id: u32, name: &str) -> Result<()> {
            self.inner.set_site_name(site_id, name)
        }
        fn site_description(&self, site_id: u32) -> Result<String> {
            self.inner.site_description(site_id)
        }
        fn set_site_description(&self, site_id: u32, description: &str) -> Result<()> {
            self.inner.set_site_description(site_id, description)
        }
        fn site_salt(&self, site_id: u32) -> Result<Vec<u8>> {
            self.inner.site_salt(site_id)
        }
    }

    #[test]
    fn new_site_bootstraps_reserved_entities() {
        let (_dir, db) = open();
        let site = db.new_site("Test Site").unwrap();
        let root = db.get_entity(Id::new(site, 1)).unwrap();
        assert_eq!(root.entity_type(&root.lock_read()).unwrap(), EntityType::Region);
        let admin = db.get_entity(Id::new(site, 4)).unwrap();
        assert!(admin.has_flag(&admin.lock_read(), "administrator").unwrap());
    }

    #[test]
    fn reserved_entities_cannot_be_deleted() {
        let (_dir, db) = open();
        let site = db.new_site("Test Site").unwrap();
        assert!(matches!(db.delete_entity(Id::new(site, 1)), Err(Error::Impossible(_))));
    }

    #[test]
    fn create_and_read_round_trip() {
        let (_dir, db) = open();
        let site = db.new_site("Test Site").unwrap();
        let owner = db.get_entity(Id::new(site, 2)).unwrap().id();
        let thing = db.new_entity(EntityType::Thing, site, owner, "Rock").unwrap();
        let fetched = db.get_entity(thing.id()).unwrap();
        assert_eq!(fetched.name(&fetched.lock_read()).unwrap(), "Rock");
    }

    #[test]
    fn delete_while_referenced_is_delayed_then_completes_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(CountingBackend {
            inner: LmdbBackend::open(dir.path(), 16 * 1024 * 1024).unwrap(),
            deletes: AtomicUsize::new(0),
        });
        let db = DatabaseAccess::startup(Arc::clone(&backend) as Arc<dyn DbBackend>, Limits::default()).unwrap();

        let site = db.new_site("Test Site").unwrap();
        let owner = db.get_entity(Id::new(site, 2)).unwrap().id();
        let thing = db.new_entity(EntityType::Thing, site, owner, "Rock").unwrap();
        db.commit_all().unwrap();
        let id = thing.id();
        let pinned = db.get_entity(id).unwrap();
        assert_eq!(db.delete_entity(id).unwrap(), DeleteOutcome::Delayed);
        assert!(matches!(db.get_entity(id), Err(Error::NotFound(_))));
        assert_eq!(backend.deletes.load(Ordering::SeqCst), 0);
        drop(pinned);
        drop(thing);
        // The release hook runs synchronously on the final drop above, and
        // must have actually reached the backend, not just hidden the
        // entity behind the pending flag.
        assert!(matches!(db.get_entity(id), Err(Error::NotFound(_))));
        assert_eq!(backend.deletes.load(Ordering::SeqCst), 1);
    }
}
