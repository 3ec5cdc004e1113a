//! `Core`: the fields every Entity carries regardless of kind, plus the
//! `Field` enum used to track what changed for notification purposes.
//!
//! Holds the common record (id, type, version, name, owner, security,
//! timestamps) all concrete entity types build on.

use std::collections::BTreeSet;
use std::fmt;

use crate::error::{Error, Result};
use crate::id::Id;
use crate::security::Security;
use crate::timestamp::TimeStamp;

/// The concrete kind tag stored alongside `Core`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityType {
    Entity,
    PropertyEntity,
    ContainerPropertyEntity,
    Thing,
    Puppet,
    Vehicle,
    Player,
    Guest,
    Action,
    Exit,
    Room,
    Region,
    Group,
    Capability,
    Program,
}

impl EntityType {
    /// The lowercase token used for this type in dump files and
    /// `DatabasePrims::create_entity` callers.
    pub fn as_str(self) -> &'static str {
        match self {
            EntityType::Entity => "entity",
            EntityType::PropertyEntity => "property_entity",
            EntityType::ContainerPropertyEntity => "container_property_entity",
            EntityType::Thing => "thing",
            EntityType::Puppet => "puppet",
            EntityType::Vehicle => "vehicle",
            EntityType::Player => "player",
            EntityType::Guest => "guest",
            EntityType::Action => "action",
            EntityType::Exit => "exit",
            EntityType::Room => "room",
            EntityType::Region => "region",
            EntityType::Group => "group",
            EntityType::Capability => "capability",
            EntityType::Program => "program",
        }
    }

    /// Inverse of [`EntityType::as_str`], case-insensitive.
    pub fn parse(s: &str) -> Result<EntityType> {
        match s.to_ascii_lowercase().as_str() {
            "entity" => Ok(EntityType::Entity),
            "property_entity" => Ok(EntityType::PropertyEntity),
            "container_property_entity" => Ok(EntityType::ContainerPropertyEntity),
            "thing" => Ok(EntityType::Thing),
            "puppet" => Ok(EntityType::Puppet),
            "vehicle" => Ok(EntityType::Vehicle),
            "player" => Ok(EntityType::Player),
            "guest" => Ok(EntityType::Guest),
            "action" => Ok(EntityType::Action),
            "exit" => Ok(EntityType::Exit),
            "room" => Ok(EntityType::Room),
            "region" => Ok(EntityType::Region),
            "group" => Ok(EntityType::Group),
            "capability" => Ok(EntityType::Capability),
            "program" => Ok(EntityType::Program),
            other => Err(Error::BadArguments(format!("unknown entity type {other:?}"))),
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies a single mutable field, for change-list and reverse-index
/// bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Name,
    Owner,
    Note,
    RegistrationName,
    RegistrationCategory,
    Flags,
    Security,
    ContainedBy,
    LinkedPrograms,
    ActionContainedBy,
    ActionTargets,
    ActionCommands,
    ActionSuccessMessage,
    ActionFailMessage,
    ActionLock,
    ThingHome,
    ThingLock,
    ArriveMessage,
    PlayerHome,
    PlayerDisplayName,
    Password,
    PuppetDisplayName,
    VehicleInterior,
    VehicleController,
    ProgramLanguage,
    ProgramSourceCode,
    ProgramCompiledCode,
    ProgramIncludes,
    ProgramRuntimeSec,
    ProgramRegName,
    GroupMembers,
    ApplicationProperties,
}

/// Whether a [`Field`] holds a reference (an `Id`, or a collection of them)
/// — these additionally get recorded on the reference-change list so the
/// backend can maintain reverse indexes.
impl Field {
    pub fn is_reference(self) -> bool {
        matches!(
            self,
            Field::Owner
                | Field::ContainedBy
                | Field::LinkedPrograms
                | Field::ActionContainedBy
                | Field::ActionTargets
                | Field::ThingHome
                | Field::PlayerHome
                | Field::VehicleInterior
                | Field::VehicleController
                | Field::ProgramIncludes
                | Field::GroupMembers
        )
    }
}

/// The ids added to and removed from a reference-valued field between two
/// writes — queued on [`Core::reference_changes`] for the backend's reverse
/// index maintenance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceDelta {
    pub removed: Vec<Id>,
    pub added: Vec<Id>,
}

/// Fields common to every Entity, independent of its [`crate::entity::kind::Kind`].
#[derive(Debug, Clone)]
pub struct Core {
    pub(crate) id: Id,
    pub(crate) entity_type: EntityType,
    pub(crate) version: u32,
    pub(crate) instance: u32,
    pub(crate) name: String,
    pub(crate) owner: Id,
    pub(crate) note: String,
    pub(crate) registration_name: String,
    pub(crate) registration_category: String,
    pub(crate) flags: BTreeSet<String>,
    pub(crate) security: Security,
    pub(crate) created: TimeStamp,
    pub(crate) modified: TimeStamp,
    pub(crate) accessed: TimeStamp,
    pub(crate) dirty: bool,
    pub(crate) changed_fields: Vec<Field>,
    pub(crate) reference_changes: Vec<(Field, ReferenceDelta)>,
}

impl Core {
    /// A freshly allocated entity: self-owned, empty note/registration, no
    /// flags, default `Security`, all three timestamps set to `now`.
    pub fn new(id: Id, entity_type: EntityType, name: String) -> Self {
        let now = TimeStamp::now();
        Core {
            id,
            entity_type,
            version: 1,
            instance: 1,
            name,
            owner: id,
            note: String::new(),
            registration_name: String::new(),
            registration_category: String::new(),
            flags: BTreeSet::new(),
            security: Security::new(),
            created: now,
            modified: now,
            accessed: now,
            dirty: true,
            changed_fields: Vec::new(),
            reference_changes: Vec::new(),
        }
    }

    pub fn id(&self) -> Id {
        self.id
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn instance(&self) -> u32 {
        self.instance
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> Id {
        self.owner
    }

    pub fn note(&self) -> &str {
        &self.note
    }

    pub fn flags(&self) -> &BTreeSet<String> {
        &self.flags
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }

    pub fn security(&self) -> &Security {
        &self.security
    }

    pub fn created(&self) -> TimeStamp {
        self.created
    }

    pub fn modified(&self) -> TimeStamp {
        self.modified
    }

    pub fn accessed(&self) -> TimeStamp {
        self.accessed
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn changed_fields(&self) -> &[Field] {
        &self.changed_fields
    }

    pub fn reference_changes(&self) -> &[(Field, ReferenceDelta)] {
        &self.reference_changes
    }

    /// Clear dirty/changed-field/reference-change state; called by the
    /// backend once a commit has durably written this entity.
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
        self.changed_fields.clear();
        self.reference_changes.clear();
    }

    pub fn touch_accessed(&mut self) {
        self.accessed = TimeStamp::now();
    }

    /// Record that `field` changed: push onto the change list, set dirty,
    /// stamp `modified`.
    pub fn notify_field_changed(&mut self, field: Field) {
        if !self.changed_fields.contains(&field) {
            self.changed_fields.push(field);
        }
        self.dirty = true;
        self.modified = TimeStamp::now();
    }

    /// As [`Core::notify_field_changed`], additionally recording a
    /// before/after id diff for reverse-index maintenance.
    pub fn notify_reference_changed(&mut self, field: Field, delta: ReferenceDelta) {
        self.notify_field_changed(field);
        self.reference_changes.push((field, delta));
    }

    pub fn set_name(&mut self, name: String) {
        self.name = name;
        self.notify_field_changed(Field::Name);
    }

    pub fn set_owner(&mut self, owner: Id) {
        let delta = ReferenceDelta { removed: vec![self.owner], added: vec![owner] };
        self.owner = owner;
        self.notify_reference_changed(Field::Owner, delta);
    }

    pub fn set_note(&mut self, note: String) {
        self.note = note;
        self.notify_field_changed(Field::Note);
    }

    pub fn set_registration(&mut self, name: String, category: String) {
        self.registration_name = name;
        self.registration_category = category;
        self.notify_field_changed(Field::RegistrationName);
        self.notify_field_changed(Field::RegistrationCategory);
    }

    pub fn add_flag(&mut self, flag: impl Into<String>) {
        self.flags.insert(flag.into());
        self.notify_field_changed(Field::Flags);
    }

    pub fn remove_flag(&mut self, flag: &str) -> bool {
        let removed = self.flags.remove(flag);
        if removed {
            self.notify_field_changed(Field::Flags);
        }
        removed
    }

    pub fn set_security(&mut self, security: Security) {
        self.security = security;
        self.notify_field_changed(Field::Security);
    }

    /// Bump `version`/`instance` and reset change tracking — used when
    /// cloning an entity: the clone copies all fields, marks every field
    /// changed, and starts with no live references.
    pub fn cloned_with_new_identity(&self, new_id: Id) -> Self {
        let mut copy = self.clone();
        copy.id = new_id;
        copy.version = self.version.wrapping_add(1);
        copy.instance += 1;
        copy.dirty = true;
        copy.changed_fields = all_common_fields();
        copy.reference_changes.clear();
        copy
    }
}

fn all_common_fields() -> Vec<Field> {
    vec![
        Field::Name,
        Field::Owner,
        Field::Note,
        Field::RegistrationName,
        Field::RegistrationCategory,
        Field::Flags,
        Field::Security,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_entity_is_self_owned_and_dirty() {
        let core = Core::new(Id::new(1, 5), EntityType::Player, "Alice".into());
        assert_eq!(core.owner(), core.id());
        assert!(core.is_dirty());
    }

    #[test]
    fn set_owner_records_reference_change() {
        let mut core = Core::new(Id::new(1, 5), EntityType::Player, "Alice".into());
        core.clear_dirty();
        core.set_owner(Id::new(1, 1));
        assert!(core.is_dirty());
        assert_eq!(core.reference_changes().len(), 1);
        assert_eq!(core.reference_changes()[0].1.added, vec![Id::new(1, 1)]);
        assert_eq!(core.reference_changes()[0].1.removed, vec![Id::new(1, 5)]);
    }

    #[test]
    fn clear_dirty_resets_change_tracking() {
        let mut core = Core::new(Id::new(1, 5), EntityType::Thing, "Rock".into());
        core.clear_dirty();
        assert!(!core.is_dirty());
        assert!(core.changed_fields().is_empty());
    }

    #[test]
    fn entity_type_parse_is_case_insensitive_and_round_trips() {
        assert_eq!(EntityType::parse("Player").unwrap(), EntityType::Player);
        assert_eq!(EntityType::parse("PLAYER").unwrap(), EntityType::Player);
        for t in [EntityType::Entity, EntityType::ContainerPropertyEntity, EntityType::Program] {
            assert_eq!(EntityType::parse(t.as_str()).unwrap(), t);
        }
        assert!(EntityType::parse("not_a_type").is_err());
    }
}
