//! `DbBackend`: the persistence contract required of any storage layer,
//! plus the concrete [`lmdb`] implementation over `heed`.
//!
//! Kept as a trait rather than a concrete type so the entity/cache layers
//! above never need to know they're talking to LMDB specifically.

pub mod lmdb;

use crate::entity::core::EntityType;
use crate::entity::Entity;
use crate::error::Result;
use crate::id::Id;

/// Everything a concrete persistence layer must provide. `DatabaseAccess`
/// and `SiteCache` are the only callers; clients never see this directly.
pub trait DbBackend: Send + Sync {
    /// Allocate and register a new site, returning its id. Site ids are
    /// assigned monotonically and never reused.
    fn allocate_site(&self) -> Result<u32>;

    /// Remove all persisted state for `site_id`. Idempotent on an
    /// already-deleted site.
    fn delete_site(&self, site_id: u32) -> Result<()>;

    /// Allocate the next entity id within `site_id`. Monotone per site;
    /// ids are never reused within a site even across deletes.
    fn allocate_entity_id(&self, site_id: u32) -> Result<u32>;

    /// Build a fresh in-memory `Entity` of `entity_type`, bound to `id`,
    /// owned by `owner`, named `name`. The caller owns the result; it is
    /// not yet persisted.
    fn construct_entity(&self, entity_type: EntityType, id: Id, owner: Id, name: &str) -> Result<Entity>;

    /// Durably write `entity`'s current state. Does not clear the entity's
    /// dirty bit — the caller (`DatabaseAccess::commit_all`) does that once
    /// every entity in a commit batch has been written successfully.
    fn persist_entity(&self, entity: &Entity) -> Result<()>;

    /// Load a previously persisted entity by id. The caller owns the
    /// result. Fails with `Error::NotFound` if `id` was never persisted.
    fn load_entity(&self, id: Id) -> Result<Entity>;

    /// Remove `id`'s persisted state. The backend does not check whether
    /// the entity is referenced — that policy lives in
    /// `SiteCache`/`DatabaseAccess`.
    fn delete_entity_persistent(&self, id: Id) -> Result<()>;

    /// Release any backend-side bookkeeping paired with
    /// `construct_entity`/`load_entity` for an entity that is being
    /// discarded from memory without ever having been persisted (e.g. a
    /// half-built dump-import entity that gets rolled back).
    fn delete_entity_memory(&self, entity: &Entity) -> Result<()>;

    /// Backend-assisted name lookup: entities of `entity_type` within
    /// `site_id` whose name matches `name`, exactly or by substring
    /// depending on `exact`.
    fn find(&self, site_id: u32, entity_type: Option<EntityType>, name: &str, exact: bool) -> Result<Vec<Id>>;

    /// All site ids this backend currently knows about.
    fn all_site_ids(&self) -> Result<Vec<u32>>;

    /// Per-site display name (distinct from any Entity's `name`).
    fn site_name(&self, site_id: u32) -> Result<String>;

    fn set_site_name(&self, site_id: u32, name: &str) -> Result<()>;

    fn site_description(&self, site_id: u32) -> Result<String>;

    fn set_site_description(&self, site_id: u32, description: &str) -> Result<()>;

    /// The per-site salt used for password hashing. Generated once at
    /// `allocate_site` time.
    fn site_salt(&self, site_id: u32) -> Result<Vec<u8>>;
}
