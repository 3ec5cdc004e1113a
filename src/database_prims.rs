//! `DatabasePrims`: the security-checked facade clients actually call.
//! `DatabaseAccess` itself performs no capability checks — it is the
//! low-level site/entity lifecycle layer. Every method here binds a
//! requester `Id` to the call and enforces the owner/admin/flag security
//! table before touching the requested field, so a command parser never
//! has to re-derive those checks at every call site.

use crate::database_access::DatabaseAccess;
use crate::entity::core::EntityType;
use crate::error::{Error, Result};
use crate::id::Id;
use crate::lock::LockContext;
use crate::name_match::{self, MatchKind, MatchOutcome};
use crate::property::data::PropertyData;
use crate::security::{Flag, Security};
use crate::site_cache::DeleteOutcome;

/// Security-checked operations layered over a [`DatabaseAccess`] handle.
/// Holds no state of its own beyond the borrow — cheap to construct per
/// call, as a request-scoped wrapper.
pub struct DatabasePrims<'a> {
    db: &'a DatabaseAccess,
}

impl<'a> DatabasePrims<'a> {
    pub fn new(db: &'a DatabaseAccess) -> Self {
        DatabasePrims { db }
    }

    pub fn database(&self) -> &'a DatabaseAccess {
        self.db
    }

    // --- Entity-level field security ---------------------------------------

    fn check_read_field(&self, requester: Id, target: Id, basic: bool) -> Result<()> {
        let entity = self.db.get_entity(target)?;
        let token = entity.lock_read();
        let owner = entity.owner(&token)?;
        let security = entity.security(&token)?;
        let allowed = requester == owner
            || security.is_admin(&requester)
            || security.has_flag(&requester, false, Flag::Read)
            || (basic && security.has_flag(&requester, false, Flag::Basic));
        if allowed {
            Ok(())
        } else {
            Err(Error::SecurityViolation(format!("{requester} may not read {target}")))
        }
    }

    fn check_write_field(&self, requester: Id, target: Id) -> Result<()> {
        let entity = self.db.get_entity(target)?;
        let token = entity.lock_read();
        let owner = entity.owner(&token)?;
        let security = entity.security(&token)?;
        let allowed = requester == owner || security.is_admin(&requester) || security.has_flag(&requester, false, Flag::Write);
        if allowed {
            Ok(())
        } else {
            Err(Error::SecurityViolation(format!("{requester} may not write {target}")))
        }
    }

    fn check_owner_or_admin(&self, requester: Id, target: Id) -> Result<()> {
        let entity = self.db.get_entity(target)?;
        let token = entity.lock_read();
        let owner = entity.owner(&token)?;
        let security = entity.security(&token)?;
        if requester == owner || security.is_admin(&requester) {
            Ok(())
        } else {
            Err(Error::SecurityViolation(format!("{requester} is not owner/admin of {target}")))
        }
    }

    // --- Application-level property security --------------------------------

    fn application_name_of(path: &str) -> Result<&str> {
        let trimmed = path.trim_start_matches('/');
        let name = trimmed.split('/').next().unwrap_or("");
        if name.is_empty() {
            return Err(Error::BadArguments("property path has no application segment".into()));
        }
        Ok(name)
    }

    fn check_app_read(&self, requester: Id, entity_id: Id, app_name: &str) -> Result<()> {
        let entity = self.db.get_entity(entity_id)?;
        let token = entity.lock_read();
        let owner = entity.application_owner(&token, app_name)?;
        let security = entity.application_security(&token, app_name)?;
        let allowed = requester == owner || security.is_admin(&requester) || security.has_flag(&requester, false, Flag::Read);
        if allowed {
            Ok(())
        } else {
            Err(Error::SecurityViolation(format!("{requester} may not read application {app_name} on {entity_id}")))
        }
    }

    fn check_app_write(&self, requester: Id, entity_id: Id, app_name: &str) -> Result<()> {
        let entity = self.db.get_entity(entity_id)?;
        let token = entity.lock_read();
        let owner = entity.application_owner(&token, app_name)?;
        let security = entity.application_security(&token, app_name)?;
        let allowed = requester == owner || security.is_admin(&requester) || security.has_flag(&requester, false, Flag::Write);
        if allowed {
            Ok(())
        } else {
            Err(Error::SecurityViolation(format!("{requester} may not write application {app_name} on {entity_id}")))
        }
    }

    fn check_app_owner_or_admin(&self, requester: Id, entity_id: Id, app_name: &str) -> Result<()> {
        let entity = self.db.get_entity(entity_id)?;
        let token = entity.lock_read();
        let owner = entity.application_owner(&token, app_name)?;
        let security = entity.application_security(&token, app_name)?;
        if requester == owner || security.is_admin(&requester) {
            Ok(())
        } else {
            Err(Error::SecurityViolation(format!("{requester} is not owner/admin of application {app_name} on {entity_id}")))
        }
    }

    // --- Entity identity / type ---------------------------------------------

    /// `true` iff `id` currently refers to something in the database.
    pub fn is_entity_valid(&self, id: Id) -> bool {
        self.db.get_entity(id).is_ok()
    }

    pub fn get_entity_type(&self, id: Id) -> Result<EntityType> {
        let entity = self.db.get_entity(id)?;
        let token = entity.lock_read();
        entity.entity_type(&token)
    }

    /// Diagnostic text rendering, basic-field readable.
    pub fn entity_to_string(&self, requester: Id, id: Id) -> Result<String> {
        self.check_read_field(requester, id, true)?;
        let entity = self.db.get_entity(id)?;
        let token = entity.lock_read();
        entity.to_string_display(&token, self.db.limits())
    }

    /// `contained_by` for most kinds; `action_contained_by` for actions and
    /// exits. A basic field — readable with just the `basic` flag.
    pub fn get_entity_location(&self, requester: Id, id: Id) -> Result<Id> {
        self.check_read_field(requester, id, true)?;
        let entity = self.db.get_entity(id)?;
        let token = entity.lock_read();
        match entity.entity_type(&token)? {
            EntityType::Action | EntityType::Exit => entity.action_contained_by(&token),
            _ => entity.contained_by(&token),
        }
    }

    /// Entities directly contained by (or scoped to) `container`, optionally
    /// filtered to one [`EntityType`].
    pub fn get_contents(&self, requester: Id, container: Id, filter: Option<EntityType>) -> Result<Vec<Id>> {
        self.check_read_field(requester, container, true)?;
        let mut ids = self.db.contents_of(container)?;
        if let Some(entity_type) = filter {
            ids.retain(|id| {
                self.db
                    .get_entity(*id)
                    .ok()
                    .and_then(|e| e.entity_type(&e.lock_read()).ok())
                    == Some(entity_type)
            });
        }
        Ok(ids)
    }

    /// Parse the canonical/shorthand id text form.
    pub fn convert_string_to_id(&self, default_site: Option<u32>, text: &str) -> Result<Id> {
        Id::parse(text, default_site)
    }

    pub fn convert_id_to_name(&self, requester: Id, id: Id) -> Result<String> {
        self.check_read_field(requester, id, true)?;
        let entity = self.db.get_entity(id)?;
        let token = entity.lock_read();
        entity.name(&token)
    }

    /// Name-resolution pipeline, delegated to [`name_match`].
    pub fn match_name_to_id(
        &self,
        requester: Id,
        search: &str,
        exact: bool,
        kind: MatchKind,
        online_players: &[Id],
    ) -> Result<MatchOutcome> {
        name_match::match_name_to_id(self.db, requester, search, exact, kind, online_players)
    }

    // --- Creation / deletion -------------------------------------------------

    /// Whether `requester` holds the `create_entity` capability for
    /// `entity_type` within `site_id`: either a site administrator (flagged
    /// at bootstrap), or admin/read-listed on a `Capability` entity named
    /// `create_entity:<type>`. `Capability` is never itself creatable
    /// through this path.
    fn has_create_capability(&self, requester: Id, site_id: u32, entity_type: EntityType) -> Result<bool> {
        if let Ok(entity) = self.db.get_entity(requester) {
            let token = entity.lock_read();
            if entity.has_flag(&token, "administrator").unwrap_or(false) {
                return Ok(true);
            }
        }
        let cap_name = format!("create_entity:{}", entity_type.as_str());
        for cap_id in self.db.find(site_id, Some(EntityType::Capability), &cap_name, true)? {
            let cap = self.db.get_entity(cap_id)?;
            let token = cap.lock_read();
            let security = cap.security(&token)?;
            if security.is_admin(&requester) || security.has_flag(&requester, false, Flag::Read) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Create a new entity of `entity_type`, owned by `owner` (`Id::DEFAULT`
    /// for self-owned), checking `requester` holds the matching
    /// `create_entity` capability first. `Capability` may never be created
    /// this way — it is system-only.
    pub fn create_entity(
        &self,
        requester: Id,
        site_id: u32,
        entity_type: EntityType,
        owner: Id,
        name: &str,
    ) -> Result<crate::cache::EntityRef> {
        if entity_type == EntityType::Capability {
            return Err(Error::SecurityViolation("Capability entities cannot be created via create_entity".into()));
        }
        if !self.has_create_capability(requester, site_id, entity_type)? {
            return Err(Error::SecurityViolation(format!(
                "{requester} lacks the create_entity capability for {entity_type}"
            )));
        }
        self.db.new_entity(entity_type, site_id, owner, name)
    }

    /// Delete `target`, checking `requester` is owner/admin and that
    /// `target` is none of the entities policy forbids deleting outright:
    /// the requester itself, the currently running program (if any), or the
    /// requester's current container. Reserved ids and `Capability`
    /// entities are rejected one level down by
    /// [`DatabaseAccess::delete_entity`].
    pub fn delete_entity(&self, requester: Id, target: Id, running_program: Option<Id>) -> Result<DeleteOutcome> {
        if target == requester {
            return Err(Error::Impossible(format!("{requester} cannot delete itself")));
        }
        if running_program == Some(target) {
            return Err(Error::Impossible(format!("{target} is the currently running program")));
        }
        if let Ok(requester_entity) = self.db.get_entity(requester) {
            let token = requester_entity.lock_read();
            if let Ok(container) = requester_entity.contained_by(&token) {
                if container == target {
                    return Err(Error::Impossible(format!("{target} is {requester}'s current container")));
                }
            }
        }
        self.check_owner_or_admin(requester, target)?;
        self.db.delete_entity(target)
    }

    // --- Entity-level security ----------------------------------------------

    pub fn get_entity_security(&self, requester: Id, id: Id) -> Result<Security> {
        self.check_read_field(requester, id, false)?;
        let entity = self.db.get_entity(id)?;
        let token = entity.lock_read();
        entity.security(&token)
    }

    pub fn set_entity_security_other(&self, requester: Id, id: Id, flag: Flag, value: bool) -> Result<()> {
        self.check_write_field(requester, id)?;
        let entity = self.db.get_entity(id)?;
        let mut security = entity.security(&entity.lock_read())?;
        security.set_other_flag(flag, value);
        let mut token = entity.lock_write();
        entity.set_security(&mut token, security)
    }

    pub fn set_entity_security_list(&self, requester: Id, id: Id, flag: Flag, value: bool) -> Result<()> {
        self.check_write_field(requester, id)?;
        let entity = self.db.get_entity(id)?;
        let mut security = entity.security(&entity.lock_read())?;
        security.set_list_flag(flag, value);
        let mut token = entity.lock_write();
        entity.set_security(&mut token, security)
    }

    pub fn set_entity_security_add_admin(&self, requester: Id, id: Id, admin: Id) -> Result<()> {
        self.check_owner_or_admin(requester, id)?;
        let entity = self.db.get_entity(id)?;
        let mut security = entity.security(&entity.lock_read())?;
        security.add_admin(admin);
        let mut token = entity.lock_write();
        entity.set_security(&mut token, security)
    }

    pub fn set_entity_security_remove_admin(&self, requester: Id, id: Id, admin: &Id) -> Result<()> {
        self.check_owner_or_admin(requester, id)?;
        let entity = self.db.get_entity(id)?;
        let mut security = entity.security(&entity.lock_read())?;
        security.remove_admin(admin);
        let mut token = entity.lock_write();
        entity.set_security(&mut token, security)
    }

    // --- Application-level security -----------------------------------------

    pub fn get_application_security(&self, requester: Id, entity_id: Id, app_name: &str) -> Result<Security> {
        self.check_app_read(requester, entity_id, app_name)?;
        let entity = self.db.get_entity(entity_id)?;
        let token = entity.lock_read();
        entity.application_security(&token, app_name)
    }

    pub fn set_application_security_other(
        &self,
        requester: Id,
        entity_id: Id,
        app_name: &str,
        flag: Flag,
        value: bool,
    ) -> Result<()> {
        self.check_app_write(requester, entity_id, app_name)?;
        let entity = self.db.get_entity(entity_id)?;
        let mut security = entity.application_security(&entity.lock_read(), app_name)?;
        security.set_other_flag(flag, value);
        let mut token = entity.lock_write();
        entity.set_application_security(&mut token, app_name, security)
    }

    pub fn set_application_security_add_admin(&self, requester: Id, entity_id: Id, app_name: &str, admin: Id) -> Result<()> {
        self.check_app_owner_or_admin(requester, entity_id, app_name)?;
        let entity = self.db.get_entity(entity_id)?;
        let mut security = entity.application_security(&entity.lock_read(), app_name)?;
        security.add_admin(admin);
        let mut token = entity.lock_write();
        entity.set_application_security(&mut token, app_name, security)
    }

    pub fn set_application_security_remove_admin(&self, requester: Id, entity_id: Id, app_name: &str, admin: &Id) -> Result<()> {
        self.check_app_owner_or_admin(requester, entity_id, app_name)?;
        let entity = self.db.get_entity(entity_id)?;
        let mut security = entity.application_security(&entity.lock_read(), app_name)?;
        security.remove_admin(admin);
        let mut token = entity.lock_write();
        entity.set_application_security(&mut token, app_name, security)
    }

    // --- Application properties ----------------------------------------------

    /// Create application `app_name` on `entity_id`, owned by `owner`.
    /// Requires the entity-level `write` right (the application has no
    /// security of its own yet to check against).
    pub fn create_application(&self, requester: Id, entity_id: Id, app_name: &str, owner: Id) -> Result<()> {
        self.check_write_field(requester, entity_id)?;
        let entity = self.db.get_entity(entity_id)?;
        let mut token = entity.lock_write();
        entity.create_application(&mut token, app_name, owner)
    }

    pub fn get_application_property(&self, requester: Id, entity_id: Id, path: &str) -> Result<Option<PropertyData>> {
        let app_name = Self::application_name_of(path)?;
        self.check_app_read(requester, entity_id, app_name)?;
        let entity = self.db.get_entity(entity_id)?;
        let token = entity.lock_read();
        entity.get_property(&token, path)
    }

    pub fn set_application_property(&self, requester: Id, entity_id: Id, path: &str, value: PropertyData) -> Result<()> {
        let app_name = Self::application_name_of(path)?;
        self.check_app_write(requester, entity_id, app_name)?;
        let entity = self.db.get_entity(entity_id)?;
        let mut token = entity.lock_write();
        entity.set_property(&mut token, path, value)
    }

    /// Typed convenience reader: errors with [`Error::BadArguments`] if the
    /// stored value is not a `String`.
    pub fn get_application_property_string(&self, requester: Id, entity_id: Id, path: &str) -> Result<Option<String>> {
        match self.get_application_property(requester, entity_id, path)? {
            None => Ok(None),
            Some(PropertyData::String(s)) => Ok(Some(s)),
            Some(_) => Err(Error::BadArguments(format!("{path} is not a string property"))),
        }
    }

    pub fn set_application_property_string(&self, requester: Id, entity_id: Id, path: &str, value: String) -> Result<()> {
        self.set_application_property(requester, entity_id, path, PropertyData::String(value))
    }

    pub fn get_application_property_integer(&self, requester: Id, entity_id: Id, path: &str) -> Result<Option<i64>> {
        match self.get_application_property(requester, entity_id, path)? {
            None => Ok(None),
            Some(PropertyData::Integer(i)) => Ok(Some(i)),
            Some(_) => Err(Error::BadArguments(format!("{path} is not an integer property"))),
        }
    }

    pub fn set_application_property_integer(&self, requester: Id, entity_id: Id, path: &str, value: i64) -> Result<()> {
        self.set_application_property(requester, entity_id, path, PropertyData::Integer(value))
    }

    pub fn get_application_property_float(&self, requester: Id, entity_id: Id, path: &str) -> Result<Option<f64>> {
        match self.get_application_property(requester, entity_id, path)? {
            None => Ok(None),
            Some(PropertyData::Float(f)) => Ok(Some(f)),
            Some(_) => Err(Error::BadArguments(format!("{path} is not a float property"))),
        }
    }

    pub fn set_application_property_float(&self, requester: Id, entity_id: Id, path: &str, value: f64) -> Result<()> {
        self.set_application_property(requester, entity_id, path, PropertyData::Float(value))
    }

    pub fn get_application_property_boolean(&self, requester: Id, entity_id: Id, path: &str) -> Result<Option<bool>> {
        match self.get_application_property(requester, entity_id, path)? {
            None => Ok(None),
            Some(PropertyData::Boolean(b)) => Ok(Some(b)),
            Some(_) => Err(Error::BadArguments(format!("{path} is not a boolean property"))),
        }
    }

    pub fn set_application_property_boolean(&self, requester: Id, entity_id: Id, path: &str, value: bool) -> Result<()> {
        self.set_application_property(requester, entity_id, path, PropertyData::Boolean(value))
    }

    pub fn get_application_property_id(&self, requester: Id, entity_id: Id, path: &str) -> Result<Option<Id>> {
        match self.get_application_property(requester, entity_id, path)? {
            None => Ok(None),
            Some(PropertyData::Id(id)) => Ok(Some(id)),
            Some(_) => Err(Error::BadArguments(format!("{path} is not an id property"))),
        }
    }

    pub fn set_application_property_id(&self, requester: Id, entity_id: Id, path: &str, value: Id) -> Result<()> {
        self.set_application_property(requester, entity_id, path, PropertyData::Id(value))
    }

    // --- Locks ---------------------------------------------------------------

    /// Evaluate `action_id`'s `action_lock` against `requester`. Errors if
    /// `action_id` is not an `Action`/`Exit`.
    pub fn can_use_action(&self, requester: Id, action_id: Id) -> Result<bool> {
        let action = self.db.get_entity(action_id)?;
        let token = action.lock_read();
        if !matches!(action.entity_type(&token)?, EntityType::Action | EntityType::Exit) {
            return Err(Error::BadEntityType(format!("{action_id} is not an Action or Exit")));
        }
        let lock = action.action_lock(&token)?;
        drop(token);
        let ctx = DbLockContext { db: self.db };
        Ok(lock.evaluate(&requester, &ctx))
    }
}

/// Adapts [`DatabaseAccess`] to the [`LockContext`] a [`crate::lock::Lock`]
/// needs to evaluate `ByGroup`/`ByProperty` predicates, without the `lock`
/// module depending on the entity/cache layers directly.
struct DbLockContext<'a> {
    db: &'a DatabaseAccess,
}

impl LockContext for DbLockContext<'_> {
    fn is_member_of_group(&self, requester: &Id, group: &Id) -> bool {
        let Ok(entity) = self.db.get_entity(*group) else { return false };
        let token = entity.lock_read();
        entity.is_member(&token, requester).unwrap_or(false)
    }

    fn property_of(&self, requester: &Id, path: &str) -> Option<PropertyData> {
        let entity = self.db.get_entity(*requester).ok()?;
        let token = entity.lock_read();
        entity.get_property(&token, path).ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::lmdb::LmdbBackend;
    use crate::backend::DbBackend;
    use crate::config::Limits;
    use std::sync::Arc;

    fn open() -> (tempfile::TempDir, DatabaseAccess) {
        let dir = tempfile::tempdir().unwrap();
        let backend: Arc<dyn DbBackend> = Arc::new(LmdbBackend::open(dir.path(), 16 * 1024 * 1024).unwrap());
        let db = DatabaseAccess::startup(backend, Limits::default()).unwrap();
        (dir, db)
    }

    #[test]
    fn administrator_can_create_any_type() {
        let (_dir, db) = open();
        let site = db.new_site("Test").unwrap();
        let admin = Id::new(site, 4);
        let prims = DatabasePrims::new(&db);
        let thing = prims.create_entity(admin, site, EntityType::Thing, admin, "Rock").unwrap();
        assert_eq!(thing.name(&thing.lock_read()).unwrap(), "Rock");
    }

    #[test]
    fn ordinary_player_cannot_create_without_capability() {
        let (_dir, db) = open();
        let site = db.new_site("Test").unwrap();
        let system = Id::new(site, 2);
        let player = db.new_entity(EntityType::Player, site, Id::DEFAULT, "Alice").unwrap();
        let prims = DatabasePrims::new(&db);
        let err = prims.create_entity(player.id(), site, EntityType::Thing, system, "Rock").unwrap_err();
        assert!(matches!(err, Error::SecurityViolation(_)));
    }

    #[test]
    fn capability_cannot_be_created_via_create_entity() {
        let (_dir, db) = open();
        let site = db.new_site("Test").unwrap();
        let admin = Id::new(site, 4);
        let prims = DatabasePrims::new(&db);
        let err = prims.create_entity(admin, site, EntityType::Capability, admin, "cap").unwrap_err();
        assert!(matches!(err, Error::SecurityViolation(_)));
    }

    #[test]
    fn delete_refuses_self_and_current_container() {
        let (_dir, db) = open();
        let site = db.new_site("Test").unwrap();
        let admin = Id::new(site, 4);
        let room = Id::new(site, 3);
        let prims = DatabasePrims::new(&db);

        assert!(matches!(prims.delete_entity(admin, admin, None).unwrap_err(), Error::Impossible(_)));

        {
            let entity = db.get_entity(admin).unwrap();
            let mut token = entity.lock_write();
            entity.set_contained_by(&mut token, room).unwrap();
        }
        assert!(matches!(prims.delete_entity(admin, room, None).unwrap_err(), Error::Impossible(_)));
    }

    #[test]
    fn application_property_round_trip_with_security() {
        let (_dir, db) = open();
        let site = db.new_site("Test").unwrap();
        let owner = db.new_entity(EntityType::Player, site, Id::DEFAULT, "Alice").unwrap().id();
        let thing = db.new_entity(EntityType::Thing, site, owner, "Rock").unwrap();
        let prims = DatabasePrims::new(&db);

        prims.create_application(owner, thing.id(), "mush", owner).unwrap();
        prims.set_application_property_integer(owner, thing.id(), "mush/counter", 42).unwrap();
        assert_eq!(prims.get_application_property_integer(owner, thing.id(), "mush/counter").unwrap(), Some(42));

        let stranger = db.new_entity(EntityType::Player, site, Id::DEFAULT, "Bob").unwrap().id();
        let err = prims
            .set_application_property_integer(stranger, thing.id(), "mush/counter", 7)
            .unwrap_err();
        assert!(matches!(err, Error::SecurityViolation(_)));
    }

    #[test]
    fn can_use_action_evaluates_lock() {
        let (_dir, db) = open();
        let site = db.new_site("Test").unwrap();
        let owner = Id::new(site, 2);
        let room = Id::new(site, 3);
        let exit = db.new_entity(EntityType::Exit, site, owner, "North").unwrap();
        let allowed = Id::new(site, 4);
        {
            let mut token = exit.lock_write();
            exit.set_action_contained_by(&mut token, room).unwrap();
            exit.set_action_lock(&mut token, crate::lock::Lock::by_id(allowed)).unwrap();
        }
        let prims = DatabasePrims::new(&db);
        assert!(prims.can_use_action(allowed, exit.id()).unwrap());
        assert!(!prims.can_use_action(owner, exit.id()).unwrap());
    }
}
