//! `LmdbBackend`: a concrete [`super::DbBackend`] over `heed`/LMDB.
//!
//! One `heed::Env`, a handful of named `heed::Database`s, big-endian
//! integer keys via `byteorder`. Entity and `PropertyData`/`Lock` values
//! use this crate's own hand-rolled tagged-byte encoders rather than a
//! generic serialization framework, so that the on-disk layout stays a
//! stable, explicit byte format independent of any derive macro's output.

use std::path::Path;
use std::sync::Mutex;

use heed::types::{Bytes, Str, U32};
use heed::{Database, Env, EnvOpenOptions, RoTxn, RwTxn};

use crate::auth;
use crate::entity::core::EntityType;
use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::id::Id;

use super::DbBackend;

type IdKeyDb = Database<Bytes, Bytes>;
type SiteKeyDb = Database<U32<byteorder::BigEndian>, Bytes>;
type SiteStrDb = Database<U32<byteorder::BigEndian>, Str>;
type CounterDb = Database<U32<byteorder::BigEndian>, U32<byteorder::BigEndian>>;

fn err<E: std::fmt::Display>(e: E) -> Error {
    Error::DatabaseError(e.to_string())
}

struct Dbs {
    /// `Id` bytes -> serialized `Entity`.
    entities: IdKeyDb,
    /// site id -> display name.
    site_names: SiteStrDb,
    /// site id -> description.
    site_descriptions: SiteStrDb,
    /// site id -> 16-byte password salt.
    site_salts: SiteKeyDb,
    /// site id -> next entity id to allocate.
    site_next_entity_id: CounterDb,
    /// site id -> 1 iff the site still exists (tombstone-free delete would
    /// otherwise leave its counters behind).
    site_live: Database<U32<byteorder::BigEndian>, heed::types::U8>,
    /// `(site_id, entity_type_tag, lowercased name)` -> `Id` bytes, used by
    /// [`LmdbBackend::find`].
    name_index: Database<Bytes, Bytes>,
    /// single-row counter db; the next site id to allocate lives under
    /// [`NEXT_SITE_ID_KEY`].
    next_site_id: CounterDb,
}

/// The only key ever stored in `Dbs::next_site_id`.
const NEXT_SITE_ID_KEY: u32 = 0;

/// A `heed`/LMDB-backed [`DbBackend`]. One `LmdbBackend` owns one
/// environment directory; `DatabaseAccess` is handed a single instance at
/// startup and threads it through every site cache — no global mutable
/// state, an explicit handle instead.
pub struct LmdbBackend {
    env: Env,
    dbs: Dbs,
    /// `heed`'s `RwTxn` is `!Sync`; serialise writers with a single-writer
    /// discipline rather than relying on LMDB's own lock file alone.
    write_lock: Mutex<()>,
}

impl LmdbBackend {
    /// Open (creating if necessary) an LMDB environment at `path`.
    pub fn open(path: &Path, map_size_bytes: usize) -> Result<Self> {
        std::fs::create_dir_all(path).map_err(err)?;
        // SAFETY: LMDB requires no other process touches this path
        // concurrently while the environment is open; callers own that
        // guarantee for the directory they hand us.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size_bytes)
                .max_dbs(8)
                .open(path)
                .map_err(err)?
        };
        let mut txn = env.write_txn().map_err(err)?;
        let dbs = Dbs {
            entities: env.create_database(&mut txn, Some("entities")).map_err(err)?,
            site_names: env.create_database(&mut txn, Some("site_names")).map_err(err)?,
            site_descriptions: env.create_database(&mut txn, Some("site_descriptions")).map_err(err)?,
            site_salts: env.create_database(&mut txn, Some("site_salts")).map_err(err)?,
            site_next_entity_id: env.create_database(&mut txn, Some("site_next_entity_id")).map_err(err)?,
            site_live: env.create_database(&mut txn, Some("site_live")).map_err(err)?,
            name_index: env.create_database(&mut txn, Some("name_index")).map_err(err)?,
            next_site_id: env.create_database(&mut txn, Some("next_site_id")).map_err(err)?,
        };
        txn.commit().map_err(err)?;
        Ok(LmdbBackend { env, dbs, write_lock: Mutex::new(()) })
    }

    fn read_txn(&self) -> Result<RoTxn<'_>> {
        self.env.read_txn().map_err(err)
    }

    fn write_txn(&self) -> Result<RwTxn<'_>> {
        self.env.write_txn().map_err(err)
    }

    fn name_index_key(site_id: u32, entity_type: EntityType, name: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(4 + 1 + name.len());
        key.extend_from_slice(&site_id.to_be_bytes());
        key.push(entity_type_tag(entity_type));
        key.extend_from_slice(name.to_ascii_lowercase().as_bytes());
        key
    }

    fn update_name_index(&self, txn: &mut RwTxn<'_>, old: Option<(EntityType, &str)>, new: (u32, EntityType, &str, Id)) -> Result<()> {
        let (site_id, entity_type, name, id) = new;
        if let Some((old_type, old_name)) = old {
            let old_key = Self::name_index_key(site_id, old_type, old_name);
            self.dbs.name_index.delete(txn, &old_key).map_err(err)?;
        }
        let key = Self::name_index_key(site_id, entity_type, name);
        self.dbs.name_index.put(txn, &key, &id.to_bytes()).map_err(err)?;
        Ok(())
    }

    fn require_site_live(&self, txn: &RoTxn<'_>, site_id: u32) -> Result<()> {
        match self.dbs.site_live.get(txn, &site_id).map_err(err)? {
            Some(1) => Ok(()),
            _ => Err(Error::BadArguments(format!("unknown or deleted site {site_id}"))),
        }
    }
}

impl DbBackend for LmdbBackend {
    fn allocate_site(&self) -> Result<u32> {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut txn = self.write_txn()?;
        let next = self.dbs.next_site_id.get(&txn, &NEXT_SITE_ID_KEY).map_err(err)?.unwrap_or(1);
        self.dbs.next_site_id.put(&mut txn, &NEXT_SITE_ID_KEY, &(next + 1)).map_err(err)?;
        self.dbs.site_live.put(&mut txn, &next, &1).map_err(err)?;
        self.dbs.site_next_entity_id.put(&mut txn, &next, &1).map_err(err)?;
        self.dbs.site_names.put(&mut txn, &next, "").map_err(err)?;
        self.dbs.site_descriptions.put(&mut txn, &next, "").map_err(err)?;
        self.dbs.site_salts.put(&mut txn, &next, &auth::generate_site_salt()).map_err(err)?;
        txn.commit().map_err(err)?;
        Ok(next)
    }

    fn delete_site(&self, site_id: u32) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut txn = self.write_txn()?;
        self.dbs.site_live.delete(&mut txn, &site_id).map_err(err)?;

        let prefix = site_id.to_be_bytes();
        let stale: Vec<Vec<u8>> = self
            .dbs
            .entities
            .prefix_iter(&txn, &prefix)
            .map_err(err)?
            .map(|item| item.map(|(k, _)| k.to_vec()).map_err(err))
            .collect::<Result<_>>()?;
        for key in stale {
            self.dbs.entities.delete(&mut txn, &key).map_err(err)?;
        }
        let stale_names: Vec<Vec<u8>> = self
            .dbs
            .name_index
            .prefix_iter(&txn, &prefix)
            .map_err(err)?
            .map(|item| item.map(|(k, _)| k.to_vec()).map_err(err))
            .collect::<Result<_>>()?;
        for key in stale_names {
            self.dbs.name_index.delete(&mut txn, &key).map_err(err)?;
        }
        txn.commit().map_err(err)?;
        Ok(())
    }

    fn allocate_entity_id(&self, site_id: u32) -> Result<u32> {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut txn = self.write_txn()?;
        self.require_site_live(&txn, site_id)?;
        let next = self.dbs.site_next_entity_id.get(&txn, &site_id).map_err(err)?.unwrap_or(1);
        self.dbs.site_next_entity_id.put(&mut txn, &site_id, &(next + 1)).map_err(err)?;
        txn.commit().map_err(err)?;
        Ok(next)
    }

    fn construct_entity(&self, entity_type: EntityType, id: Id, owner: Id, name: &str) -> Result<Entity> {
        if name.is_empty() {
            return Err(Error::BadArguments("entity name must not be empty".into()));
        }
        let core = crate::entity::core::Core::new(id, entity_type, name.to_string());
        let mut core = core;
        core.owner = owner;
        let kind = default_kind_for(entity_type, id);
        Ok(Entity::new(core, kind))
    }

    fn persist_entity(&self, entity: &Entity) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        let token = entity.lock_read();
        let id = entity.id();
        let bytes = entity.serialize(&token)?;
        let entity_type = entity.entity_type(&token)?;
        let name = entity.name(&token)?;
        drop(token);

        let mut txn = self.write_txn()?;
        let old_name = self
            .dbs
            .entities
            .get(&txn, &id.to_bytes())
            .map_err(err)?
            .map(Entity::deserialize)
            .transpose()?
            .map(|old| {
                let token = old.lock_read();
                let old_type = old.entity_type(&token)?;
                let old_name = old.name(&token)?;
                Ok::<_, Error>((old_type, old_name))
            })
            .transpose()?;

        self.dbs.entities.put(&mut txn, &id.to_bytes(), &bytes).map_err(err)?;
        self.update_name_index(
            &mut txn,
            old_name.as_ref().map(|(t, n)| (*t, n.as_str())),
            (id.site_id(), entity_type, &name, id),
        )?;
        txn.commit().map_err(err)?;
        Ok(())
    }

    fn load_entity(&self, id: Id) -> Result<Entity> {
        let txn = self.read_txn()?;
        let bytes = self
            .dbs
            .entities
            .get(&txn, &id.to_bytes())
            .map_err(err)?
            .ok_or_else(|| Error::NotFound(format!("entity {id} not found")))?;
        Entity::deserialize(bytes)
    }

    fn delete_entity_persistent(&self, id: Id) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut txn = self.write_txn()?;
        if let Some(bytes) = self.dbs.entities.get(&txn, &id.to_bytes()).map_err(err)? {
            let old = Entity::deserialize(bytes)?;
            let token = old.lock_read();
            let old_type = old.entity_type(&token)?;
            let old_name = old.name(&token)?;
            drop(token);
            let key = Self::name_index_key(id.site_id(), old_type, &old_name);
            self.dbs.name_index.delete(&mut txn, &key).map_err(err)?;
        }
        self.dbs.entities.delete(&mut txn, &id.to_bytes()).map_err(err)?;
        txn.commit().map_err(err)?;
        Ok(())
    }

    fn delete_entity_memory(&self, _entity: &Entity) -> Result<()> {
        // Nothing to release: construct_entity allocates no backend-side
        // bookkeeping beyond the entity id counter, which is never reused.
        Ok(())
    }

    fn find(&self, site_id: u32, entity_type: Option<EntityType>, name: &str, exact: bool) -> Result<Vec<Id>> {
        let txn = self.read_txn()?;
        let lowered = name.to_ascii_lowercase();
        let mut out = Vec::new();

        let scan_type = |txn: &RoTxn<'_>, t: EntityType, out: &mut Vec<Id>| -> Result<()> {
            let mut prefix = site_id.to_be_bytes().to_vec();
            prefix.push(entity_type_tag(t));
            for item in self.dbs.name_index.prefix_iter(txn, &prefix).map_err(err)? {
                let (key, value) = item.map_err(err)?;
                let indexed_name = std::str::from_utf8(&key[prefix.len()..]).unwrap_or("");
                let matches = if exact { indexed_name == lowered } else { indexed_name.contains(&lowered) };
                if matches {
                    out.push(Id::from_bytes(value)?);
                }
            }
            Ok(())
        };

        match entity_type {
            Some(t) => scan_type(&txn, t, &mut out)?,
            None => {
                for t in ALL_ENTITY_TYPES {
                    scan_type(&txn, t, &mut out)?;
                }
            }
        }
        Ok(out)
    }

    fn all_site_ids(&self) -> Result<Vec<u32>> {
        let txn = self.read_txn()?;
        let mut out = Vec::new();
        for item in self.dbs.site_live.iter(&txn).map_err(err)? {
            let (site_id, live) = item.map_err(err)?;
            if live == 1 {
                out.push(site_id);
            }
        }
        Ok(out)
    }

    fn site_name(&self, site_id: u32) -> Result<String> {
        let txn = self.read_txn()?;
        self.require_site_live(&txn, site_id)?;
        Ok(self.dbs.site_names.get(&txn, &site_id).map_err(err)?.unwrap_or("").to_string())
    }

    fn set_site_name(&self, site_id: u32, name: &str) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut txn = self.write_txn()?;
        self.require_site_live(&txn, site_id)?;
        self.dbs.site_names.put(&mut txn, &site_id, name).map_err(err)?;
        txn.commit().map_err(err)?;
        Ok(())
    }

    fn site_description(&self, site_id: u32) -> Result<String> {
        let txn = self.read_txn()?;
        self.require_site_live(&txn, site_id)?;
        Ok(self.dbs.site_descriptions.get(&txn, &site_id).map_err(err)?.unwrap_or("").to_string())
    }

    fn set_site_description(&self, site_id: u32, description: &str) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut txn = self.write_txn()?;
        self.require_site_live(&txn, site_id)?;
        self.dbs.site_descriptions.put(&mut txn, &site_id, description).map_err(err)?;
        txn.commit().map_err(err)?;
        Ok(())
    }

    fn site_salt(&self, site_id: u32) -> Result<Vec<u8>> {
        let txn = self.read_txn()?;
        self.require_site_live(&txn, site_id)?;
        Ok(self.dbs.site_salts.get(&txn, &site_id).map_err(err)?.unwrap_or(&[]).to_vec())
    }
}

const ALL_ENTITY_TYPES: [EntityType; 15] = [
    EntityType::Entity,
    EntityType::PropertyEntity,
    EntityType::ContainerPropertyEntity,
    EntityType::Thing,
    EntityType::Puppet,
    EntityType::Vehicle,
    EntityType::Player,
    EntityType::Guest,
    EntityType::Action,
    EntityType::Exit,
    EntityType::Room,
    EntityType::Region,
    EntityType::Group,
    EntityType::Capability,
    EntityType::Program,
];

fn entity_type_tag(t: EntityType) -> u8 {
    ALL_ENTITY_TYPES.iter().position(|x| *x == t).expect("exhaustive table") as u8
}

/// The empty `Kind` payload appropriate for a freshly constructed entity of
/// `entity_type`. `DumpReader`/`DatabasePrims::create_entity` fill in the
/// subtype-specific fields afterwards under a writer token.
fn default_kind_for(entity_type: EntityType, id: Id) -> crate::entity::kind::Kind {
    use crate::entity::kind::{ActionFields, ContainerFields, Kind, ProgramFields};
    use std::collections::BTreeMap;

    let root = Id::new(id.site_id(), 1);
    let container = || ContainerFields { contained_by: root, linked_programs: Default::default() };
    let apps = BTreeMap::new;

    match entity_type {
        EntityType::Entity => Kind::Entity,
        EntityType::PropertyEntity => Kind::PropertyEntity { application_properties: apps() },
        EntityType::ContainerPropertyEntity => {
            Kind::ContainerPropertyEntity { container: container(), application_properties: apps() }
        }
        EntityType::Thing => Kind::Thing {
            container: container(),
            application_properties: apps(),
            thing_home: root,
            thing_lock: crate::lock::Lock::by_id(Id::DEFAULT).negated(),
        },
        EntityType::Room => Kind::Room { container: container(), application_properties: apps() },
        EntityType::Region => Kind::Region { container: container(), application_properties: apps() },
        EntityType::Player => Kind::Player {
            container: container(),
            application_properties: apps(),
            player_home: root,
            player_display_name: String::new(),
            password_hash: String::new(),
        },
        EntityType::Guest => Kind::Guest { container: container(), application_properties: apps() },
        EntityType::Puppet => {
            Kind::Puppet { container: container(), application_properties: apps(), puppet_display_name: String::new() }
        }
        EntityType::Vehicle => Kind::Vehicle {
            container: container(),
            application_properties: apps(),
            vehicle_interior: Id::DEFAULT,
            vehicle_controller: Id::DEFAULT,
        },
        EntityType::Action => Kind::Action { action: ActionFields::new(root), application_properties: apps() },
        EntityType::Exit => {
            Kind::Exit { action: ActionFields::new(root), application_properties: apps(), arrive_message: String::new() }
        }
        EntityType::Group => Kind::Group { application_properties: apps(), members: Vec::new() },
        EntityType::Capability => Kind::Capability { application_properties: apps() },
        EntityType::Program => Kind::Program { application_properties: apps(), program: ProgramFields::default() },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_backend() -> (tempfile::TempDir, LmdbBackend) {
        let dir = tempdir().unwrap();
        let backend = LmdbBackend::open(dir.path(), 16 * 1024 * 1024).unwrap();
        (dir, backend)
    }

    #[test]
    fn allocate_site_is_monotone() {
        let (_dir, backend) = open_backend();
        assert_eq!(backend.allocate_site().unwrap(), 1);
        assert_eq!(backend.allocate_site().unwrap(), 2);
    }

    #[test]
    fn allocate_entity_id_is_monotone_per_site() {
        let (_dir, backend) = open_backend();
        let site = backend.allocate_site().unwrap();
        assert_eq!(backend.allocate_entity_id(site).unwrap(), 1);
        assert_eq!(backend.allocate_entity_id(site).unwrap(), 2);
    }

    #[test]
    fn persist_and_load_round_trips() {
        let (_dir, backend) = open_backend();
        let site = backend.allocate_site().unwrap();
        let id = Id::new(site, backend.allocate_entity_id(site).unwrap());
        let entity = backend.construct_entity(EntityType::Player, id, id, "Alice").unwrap();
        backend.persist_entity(&entity).unwrap();

        let loaded = backend.load_entity(id).unwrap();
        let token = loaded.lock_read();
        assert_eq!(loaded.name(&token).unwrap(), "Alice");
    }

    #[test]
    fn find_matches_exact_and_partial() {
        let (_dir, backend) = open_backend();
        let site = backend.allocate_site().unwrap();
        let id = Id::new(site, backend.allocate_entity_id(site).unwrap());
        let entity = backend.construct_entity(EntityType::Player, id, id, "Alice").unwrap();
        backend.persist_entity(&entity).unwrap();

        assert_eq!(backend.find(site, Some(EntityType::Player), "Alice", true).unwrap(), vec![id]);
        assert_eq!(backend.find(site, Some(EntityType::Player), "lic", false).unwrap(), vec![id]);
        assert!(backend.find(site, Some(EntityType::Player), "Bob", true).unwrap().is_empty());
    }

    #[test]
    fn delete_site_removes_its_entities() {
        let (_dir, backend) = open_backend();
        let site = backend.allocate_site().unwrap();
        let id = Id::new(site, backend.allocate_entity_id(site).unwrap());
        let entity = backend.construct_entity(EntityType::Thing, id, id, "Rock").unwrap();
        backend.persist_entity(&entity).unwrap();

        backend.delete_site(site).unwrap();
        assert!(backend.load_entity(id).is_err());
        assert!(!backend.all_site_ids().unwrap().contains(&site));
    }
}
