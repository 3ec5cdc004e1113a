//! The polymorphic Entity record: a shared [`core::Core`] plus a
//! subtype-specific [`kind::Kind`], guarded by a per-entity reader/writer
//! lock ([`lock_token`]).

pub mod core;
pub mod kind;
pub mod lock_token;

use std::sync::RwLock;

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::id::Id;
use crate::lock::Lock;
use crate::property::application::ApplicationProperties;
use crate::property::data::PropertyData;
use crate::security::Security;
use crate::timestamp::TimeStamp;

pub use self::core::{Core, EntityType, Field, ReferenceDelta};
pub use self::kind::{ActionFields, ContainerFields, Kind, ProgramFields};
pub use self::lock_token::{EntityData, ReadToken, ReaderLockToken, WriterLockToken};

/// A persisted, identified record: a type, fields, and (for most kinds)
/// properties, behind one reader/writer lock.
pub struct Entity {
    id: Id,
    data: RwLock<EntityData>,
}

impl Entity {
    pub fn new(core: Core, kind: Kind) -> Self {
        let id = core.id();
        Entity { id, data: RwLock::new(EntityData { core, kind }) }
    }

    /// The entity's id — stable for the entity's lifetime, readable without
    /// a lock token.
    pub fn id(&self) -> Id {
        self.id
    }

    /// Acquire a reader token. Blocks if a writer holds the lock.
    pub fn lock_read(&self) -> ReaderLockToken<'_> {
        ReaderLockToken { entity_id: self.id, guard: self.data.read().expect("entity lock poisoned") }
    }

    /// Acquire a writer token. Blocks until no readers or writer hold the
    /// lock.
    pub fn lock_write(&self) -> WriterLockToken<'_> {
        WriterLockToken { entity_id: self.id, guard: self.data.write().expect("entity lock poisoned") }
    }

    fn check_token(&self, token_entity_id: Id) -> Result<()> {
        if token_entity_id != self.id {
            return Err(Error::LockError(format!(
                "token bound to {token_entity_id} used against entity {}",
                self.id
            )));
        }
        Ok(())
    }

    // --- Core field accessors -------------------------------------------

    pub fn entity_type<T: ReadToken>(&self, token: &T) -> Result<EntityType> {
        self.check_token(token.entity_id())?;
        Ok(token.core().entity_type())
    }

    pub fn name<T: ReadToken>(&self, token: &T) -> Result<String> {
        self.check_token(token.entity_id())?;
        Ok(token.core().name().to_string())
    }

    pub fn set_name(&self, token: &mut WriterLockToken<'_>, name: String) -> Result<()> {
        self.check_token(token.entity_id())?;
        if name.is_empty() {
            return Err(Error::BadArguments("entity name must not be empty".into()));
        }
        token.core_mut().set_name(name);
        Ok(())
    }

    pub fn owner<T: ReadToken>(&self, token: &T) -> Result<Id> {
        self.check_token(token.entity_id())?;
        Ok(token.core().owner())
    }

    pub fn set_owner(&self, token: &mut WriterLockToken<'_>, owner: Id) -> Result<()> {
        self.check_token(token.entity_id())?;
        if owner.is_default() {
            return Err(Error::BadArguments("owner must not be the default id".into()));
        }
        token.core_mut().set_owner(owner);
        Ok(())
    }

    pub fn note<T: ReadToken>(&self, token: &T) -> Result<String> {
        self.check_token(token.entity_id())?;
        Ok(token.core().note().to_string())
    }

    pub fn set_note(&self, token: &mut WriterLockToken<'_>, note: String) -> Result<()> {
        self.check_token(token.entity_id())?;
        token.core_mut().set_note(note);
        Ok(())
    }

    pub fn has_flag<T: ReadToken>(&self, token: &T, flag: &str) -> Result<bool> {
        self.check_token(token.entity_id())?;
        Ok(token.core().has_flag(flag))
    }

    pub fn add_flag(&self, token: &mut WriterLockToken<'_>, flag: impl Into<String>) -> Result<()> {
        self.check_token(token.entity_id())?;
        token.core_mut().add_flag(flag);
        Ok(())
    }

    pub fn remove_flag(&self, token: &mut WriterLockToken<'_>, flag: &str) -> Result<bool> {
        self.check_token(token.entity_id())?;
        Ok(token.core_mut().remove_flag(flag))
    }

    pub fn security<T: ReadToken>(&self, token: &T) -> Result<Security> {
        self.check_token(token.entity_id())?;
        Ok(token.core().security().clone())
    }

    pub fn set_security(&self, token: &mut WriterLockToken<'_>, security: Security) -> Result<()> {
        self.check_token(token.entity_id())?;
        token.core_mut().set_security(security);
        Ok(())
    }

    pub fn created<T: ReadToken>(&self, token: &T) -> Result<TimeStamp> {
        self.check_token(token.entity_id())?;
        Ok(token.core().created())
    }

    pub fn modified<T: ReadToken>(&self, token: &T) -> Result<TimeStamp> {
        self.check_token(token.entity_id())?;
        Ok(token.core().modified())
    }

    pub fn accessed<T: ReadToken>(&self, token: &T) -> Result<TimeStamp> {
        self.check_token(token.entity_id())?;
        Ok(token.core().accessed())
    }

    pub fn is_dirty<T: ReadToken>(&self, token: &T) -> Result<bool> {
        self.check_token(token.entity_id())?;
        Ok(token.core().is_dirty())
    }

    /// Clear dirty/change-tracking state — invoked by the backend after a
    /// successful persist.
    pub fn clear_dirty(&self, token: &mut WriterLockToken<'_>) -> Result<()> {
        self.check_token(token.entity_id())?;
        token.core_mut().clear_dirty();
        Ok(())
    }

    // --- Container fields -------------------------------------------------

    pub fn contained_by<T: ReadToken>(&self, token: &T) -> Result<Id> {
        self.check_token(token.entity_id())?;
        token
            .kind()
            .container()
            .map(|c| c.contained_by)
            .ok_or_else(|| Error::BadEntityType("entity has no contained_by field".into()))
    }

    pub fn set_contained_by(&self, token: &mut WriterLockToken<'_>, contained_by: Id) -> Result<()> {
        self.check_token(token.entity_id())?;
        let old = token
            .kind()
            .container()
            .map(|c| c.contained_by)
            .ok_or_else(|| Error::BadEntityType("entity has no contained_by field".into()))?;
        token.kind_mut().container_mut().expect("checked above").contained_by = contained_by;
        token.core_mut().notify_reference_changed(
            Field::ContainedBy,
            ReferenceDelta { removed: vec![old], added: vec![contained_by] },
        );
        Ok(())
    }

    pub fn linked_programs<T: ReadToken>(&self, token: &T) -> Result<Vec<Id>> {
        self.check_token(token.entity_id())?;
        token
            .kind()
            .container()
            .map(|c| c.linked_programs.iter().copied().collect())
            .ok_or_else(|| Error::BadEntityType("entity has no linked_programs field".into()))
    }

    pub fn add_linked_program(&self, token: &mut WriterLockToken<'_>, program: Id) -> Result<bool> {
        self.check_token(token.entity_id())?;
        let added = token
            .kind_mut()
            .container_mut()
            .ok_or_else(|| Error::BadEntityType("entity has no linked_programs field".into()))?
            .linked_programs
            .insert(program);
        if added {
            token.core_mut().notify_reference_changed(
                Field::LinkedPrograms,
                ReferenceDelta { removed: Vec::new(), added: vec![program] },
            );
        }
        Ok(added)
    }

    pub fn remove_linked_program(&self, token: &mut WriterLockToken<'_>, program: &Id) -> Result<bool> {
        self.check_token(token.entity_id())?;
        let removed = token
            .kind_mut()
            .container_mut()
            .ok_or_else(|| Error::BadEntityType("entity has no linked_programs field".into()))?
            .linked_programs
            .remove(program);
        if removed {
            token.core_mut().notify_reference_changed(
                Field::LinkedPrograms,
                ReferenceDelta { removed: vec![*program], added: Vec::new() },
            );
        }
        Ok(removed)
    }

    // --- Thing fields ---------------------------------------------------

    pub fn thing_home<T: ReadToken>(&self, token: &T) -> Result<Id> {
        self.check_token(token.entity_id())?;
        match token.kind() {
            Kind::Thing { thing_home, .. } => Ok(*thing_home),
            _ => Err(Error::BadEntityType("not a Thing".into())),
        }
    }

    pub fn set_thing_home(&self, token: &mut WriterLockToken<'_>, home: Id) -> Result<()> {
        self.check_token(token.entity_id())?;
        match token.kind_mut() {
            Kind::Thing { thing_home, .. } => {
                let old = *thing_home;
                *thing_home = home;
                token.core_mut().notify_reference_changed(
                    Field::ThingHome,
                    ReferenceDelta { removed: vec![old], added: vec![home] },
                );
                Ok(())
            }
            _ => Err(Error::BadEntityType("not a Thing".into())),
        }
    }

    pub fn thing_lock<T: ReadToken>(&self, token: &T) -> Result<Lock> {
        self.check_token(token.entity_id())?;
        match token.kind() {
            Kind::Thing { thing_lock, .. } => Ok(thing_lock.clone()),
            _ => Err(Error::BadEntityType("not a Thing".into())),
        }
    }

    /// Set `thing_lock`. The validated `Lock` passed in is the one actually
    /// stored, not a default placeholder.
    pub fn set_thing_lock(&self, token: &mut WriterLockToken<'_>, lock: Lock) -> Result<()> {
        self.check_token(token.entity_id())?;
        match token.kind_mut() {
            Kind::Thing { thing_lock, .. } => {
                *thing_lock = lock;
                token.core_mut().notify_field_changed(Field::ThingLock);
                Ok(())
            }
            _ => Err(Error::BadEntityType("not a Thing".into())),
        }
    }

    // --- Exit fields ------------------------------------------------------

    pub fn action_contained_by<T: ReadToken>(&self, token: &T) -> Result<Id> {
        self.check_token(token.entity_id())?;
        token
            .kind()
            .action()
            .map(|a| a.action_contained_by)
            .ok_or_else(|| Error::BadEntityType("entity has no action_contained_by field".into()))
    }

    pub fn set_action_contained_by(&self, token: &mut WriterLockToken<'_>, contained_by: Id) -> Result<()> {
        self.check_token(token.entity_id())?;
        let old = token
            .kind()
            .action()
            .map(|a| a.action_contained_by)
            .ok_or_else(|| Error::BadEntityType("entity has no action_contained_by field".into()))?;
        token.kind_mut().action_mut().expect("checked above").action_contained_by = contained_by;
        token.core_mut().notify_reference_changed(
            Field::ActionContainedBy,
            ReferenceDelta { removed: vec![old], added: vec![contained_by] },
        );
        Ok(())
    }

    pub fn action_success_message<T: ReadToken>(&self, token: &T) -> Result<String> {
        self.check_token(token.entity_id())?;
        token
            .kind()
            .action()
            .map(|a| a.action_success_message.clone())
            .ok_or_else(|| Error::BadEntityType("entity has no action_success_message field".into()))
    }

    pub fn set_action_success_message(&self, token: &mut WriterLockToken<'_>, message: String) -> Result<()> {
        self.check_token(token.entity_id())?;
        token
            .kind_mut()
            .action_mut()
            .ok_or_else(|| Error::BadEntityType("entity has no action_success_message field".into()))?
            .action_success_message = message;
        token.core_mut().notify_field_changed(Field::ActionSuccessMessage);
        Ok(())
    }

    pub fn action_fail_message<T: ReadToken>(&self, token: &T) -> Result<String> {
        self.check_token(token.entity_id())?;
        token
            .kind()
            .action()
            .map(|a| a.action_fail_message.clone())
            .ok_or_else(|| Error::BadEntityType("entity has no action_fail_message field".into()))
    }

    pub fn set_action_fail_message(&self, token: &mut WriterLockToken<'_>, message: String) -> Result<()> {
        self.check_token(token.entity_id())?;
        token
            .kind_mut()
            .action_mut()
            .ok_or_else(|| Error::BadEntityType("entity has no action_fail_message field".into()))?
            .action_fail_message = message;
        token.core_mut().notify_field_changed(Field::ActionFailMessage);
        Ok(())
    }

    pub fn arrive_message<T: ReadToken>(&self, token: &T) -> Result<String> {
        self.check_token(token.entity_id())?;
        match token.kind() {
            Kind::Exit { arrive_message, .. } => Ok(arrive_message.clone()),
            _ => Err(Error::BadEntityType("not an Exit".into())),
        }
    }

    pub fn set_arrive_message(&self, token: &mut WriterLockToken<'_>, message: String) -> Result<()> {
        self.check_token(token.entity_id())?;
        match token.kind_mut() {
            Kind::Exit { arrive_message, .. } => {
                *arrive_message = message;
                token.core_mut().notify_field_changed(Field::ArriveMessage);
                Ok(())
            }
            _ => Err(Error::BadEntityType("not an Exit".into())),
        }
    }

    // --- Player fields (home, display name) --------------------------------

    pub fn player_home<T: ReadToken>(&self, token: &T) -> Result<Id> {
        self.check_token(token.entity_id())?;
        match token.kind() {
            Kind::Player { player_home, .. } => Ok(*player_home),
            _ => Err(Error::BadEntityType("not a Player".into())),
        }
    }

    pub fn set_player_home(&self, token: &mut WriterLockToken<'_>, home: Id) -> Result<()> {
        self.check_token(token.entity_id())?;
        match token.kind_mut() {
            Kind::Player { player_home, .. } => {
                let old = *player_home;
                *player_home = home;
                token.core_mut().notify_reference_changed(
                    Field::PlayerHome,
                    ReferenceDelta { removed: vec![old], added: vec![home] },
                );
                Ok(())
            }
            _ => Err(Error::BadEntityType("not a Player".into())),
        }
    }

    pub fn set_player_display_name(&self, token: &mut WriterLockToken<'_>, display_name: String) -> Result<()> {
        self.check_token(token.entity_id())?;
        match token.kind_mut() {
            Kind::Player { player_display_name, .. } => {
                *player_display_name = display_name;
                token.core_mut().notify_field_changed(Field::PlayerDisplayName);
                Ok(())
            }
            _ => Err(Error::BadEntityType("not a Player".into())),
        }
    }

    // --- Puppet fields ----------------------------------------------------

    pub fn puppet_display_name<T: ReadToken>(&self, token: &T) -> Result<String> {
        self.check_token(token.entity_id())?;
        match token.kind() {
            Kind::Puppet { puppet_display_name, .. } => Ok(puppet_display_name.clone()),
            _ => Err(Error::BadEntityType("not a Puppet".into())),
        }
    }

    pub fn set_puppet_display_name(&self, token: &mut WriterLockToken<'_>, display_name: String) -> Result<()> {
        self.check_token(token.entity_id())?;
        match token.kind_mut() {
            Kind::Puppet { puppet_display_name, .. } => {
                *puppet_display_name = display_name;
                token.core_mut().notify_field_changed(Field::PuppetDisplayName);
                Ok(())
            }
            _ => Err(Error::BadEntityType("not a Puppet".into())),
        }
    }

    // --- Vehicle fields -----------------------------------------------------

    pub fn vehicle_interior<T: ReadToken>(&self, token: &T) -> Result<Id> {
        self.check_token(token.entity_id())?;
        match token.kind() {
            Kind::Vehicle { vehicle_interior, .. } => Ok(*vehicle_interior),
            _ => Err(Error::BadEntityType("not a Vehicle".into())),
        }
    }

    pub fn set_vehicle_interior(&self, token: &mut WriterLockToken<'_>, interior: Id) -> Result<()> {
        self.check_token(token.entity_id())?;
        match token.kind_mut() {
            Kind::Vehicle { vehicle_interior, .. } => {
                let old = *vehicle_interior;
                *vehicle_interior = interior;
                token.core_mut().notify_reference_changed(
                    Field::VehicleInterior,
                    ReferenceDelta { removed: vec![old], added: vec![interior] },
                );
                Ok(())
            }
            _ => Err(Error::BadEntityType("not a Vehicle".into())),
        }
    }

    pub fn vehicle_controller<T: ReadToken>(&self, token: &T) -> Result<Id> {
        self.check_token(token.entity_id())?;
        match token.kind() {
            Kind::Vehicle { vehicle_controller, .. } => Ok(*vehicle_controller),
            _ => Err(Error::BadEntityType("not a Vehicle".into())),
        }
    }

    pub fn set_vehicle_controller(&self, token: &mut WriterLockToken<'_>, controller: Id) -> Result<()> {
        self.check_token(token.entity_id())?;
        match token.kind_mut() {
            Kind::Vehicle { vehicle_controller, .. } => {
                let old = *vehicle_controller;
                *vehicle_controller = controller;
                token.core_mut().notify_reference_changed(
                    Field::VehicleController,
                    ReferenceDelta { removed: vec![old], added: vec![controller] },
                );
                Ok(())
            }
            _ => Err(Error::BadEntityType("not a Vehicle".into())),
        }
    }

    // --- Action fields ------------------------------------------------------

    pub fn action_targets<T: ReadToken>(&self, token: &T) -> Result<Vec<Id>> {
        self.check_token(token.entity_id())?;
        token
            .kind()
            .action()
            .map(|a| a.action_targets.clone())
            .ok_or_else(|| Error::BadEntityType("entity has no action_targets field".into()))
    }

    pub fn add_action_target(&self, token: &mut WriterLockToken<'_>, target: Id) -> Result<bool> {
        self.check_token(token.entity_id())?;
        let added = token
            .kind_mut()
            .action_mut()
            .ok_or_else(|| Error::BadEntityType("entity has no action_targets field".into()))?
            .add_target(target);
        if added {
            token.core_mut().notify_reference_changed(
                Field::ActionTargets,
                ReferenceDelta { removed: Vec::new(), added: vec![target] },
            );
        }
        Ok(added)
    }

    pub fn action_commands<T: ReadToken>(&self, token: &T) -> Result<Vec<String>> {
        self.check_token(token.entity_id())?;
        token
            .kind()
            .action()
            .map(|a| a.action_commands.clone())
            .ok_or_else(|| Error::BadEntityType("entity has no action_commands field".into()))
    }

    pub fn set_action_commands(&self, token: &mut WriterLockToken<'_>, commands: Vec<String>) -> Result<()> {
        self.check_token(token.entity_id())?;
        token
            .kind_mut()
            .action_mut()
            .ok_or_else(|| Error::BadEntityType("entity has no action_commands field".into()))?
            .action_commands = commands;
        token.core_mut().notify_field_changed(Field::ActionCommands);
        Ok(())
    }

    pub fn action_lock<T: ReadToken>(&self, token: &T) -> Result<Lock> {
        self.check_token(token.entity_id())?;
        token
            .kind()
            .action()
            .map(|a| a.action_lock.clone())
            .ok_or_else(|| Error::BadEntityType("entity has no action_lock field".into()))
    }

    pub fn set_action_lock(&self, token: &mut WriterLockToken<'_>, lock: Lock) -> Result<()> {
        self.check_token(token.entity_id())?;
        token
            .kind_mut()
            .action_mut()
            .ok_or_else(|| Error::BadEntityType("entity has no action_lock field".into()))?
            .action_lock = lock;
        token.core_mut().notify_field_changed(Field::ActionLock);
        Ok(())
    }

    // --- Player fields --------------------------------------------------

    pub fn player_display_name<T: ReadToken>(&self, token: &T) -> Result<String> {
        self.check_token(token.entity_id())?;
        match token.kind() {
            Kind::Player { player_display_name, .. } => Ok(player_display_name.clone()),
            _ => Err(Error::BadEntityType("not a Player".into())),
        }
    }

    /// Hash `password` with `site_salt` and store the result. There is no
    /// setter that accepts an already-hashed value (§4.18).
    pub fn set_password(&self, token: &mut WriterLockToken<'_>, site_salt: &[u8], password: &str) -> Result<()> {
        self.check_token(token.entity_id())?;
        let hash = crate::auth::hash_password(site_salt, password);
        match token.kind_mut() {
            Kind::Player { password_hash, .. } => {
                *password_hash = hash;
                token.core_mut().notify_field_changed(Field::Password);
                Ok(())
            }
            _ => Err(Error::BadEntityType("not a Player".into())),
        }
    }

    pub fn verify_password<T: ReadToken>(&self, token: &T, site_salt: &[u8], candidate: &str) -> Result<bool> {
        self.check_token(token.entity_id())?;
        match token.kind() {
            Kind::Player { password_hash, .. } => Ok(crate::auth::verify_password(site_salt, candidate, password_hash)),
            _ => Err(Error::BadEntityType("not a Player".into())),
        }
    }

    // --- Program fields ---------------------------------------------------

    pub fn program_runtime_sec<T: ReadToken>(&self, token: &T) -> Result<f64> {
        self.check_token(token.entity_id())?;
        match token.kind() {
            Kind::Program { program, .. } => Ok(program.program_runtime_sec()),
            _ => Err(Error::BadEntityType("not a Program".into())),
        }
    }

    pub fn add_to_program_runtime(&self, token: &mut WriterLockToken<'_>, delta_sec: f64) -> Result<()> {
        self.check_token(token.entity_id())?;
        match token.kind_mut() {
            Kind::Program { program, .. } => {
                program.add_to_program_runtime(delta_sec)?;
                token.core_mut().notify_field_changed(Field::ProgramRuntimeSec);
                Ok(())
            }
            _ => Err(Error::BadEntityType("not a Program".into())),
        }
    }

    pub fn program_language<T: ReadToken>(&self, token: &T) -> Result<String> {
        self.check_token(token.entity_id())?;
        match token.kind() {
            Kind::Program { program, .. } => Ok(program.program_language.clone()),
            _ => Err(Error::BadEntityType("not a Program".into())),
        }
    }

    pub fn set_program_language(&self, token: &mut WriterLockToken<'_>, language: String) -> Result<()> {
        self.check_token(token.entity_id())?;
        match token.kind_mut() {
            Kind::Program { program, .. } => {
                program.program_language = language;
                token.core_mut().notify_field_changed(Field::ProgramLanguage);
                Ok(())
            }
            _ => Err(Error::BadEntityType("not a Program".into())),
        }
    }

    pub fn program_source_code<T: ReadToken>(&self, token: &T) -> Result<Vec<String>> {
        self.check_token(token.entity_id())?;
        match token.kind() {
            Kind::Program { program, .. } => Ok(program.program_source_code.clone()),
            _ => Err(Error::BadEntityType("not a Program".into())),
        }
    }

    pub fn set_program_source_code(&self, token: &mut WriterLockToken<'_>, lines: Vec<String>) -> Result<()> {
        self.check_token(token.entity_id())?;
        match token.kind_mut() {
            Kind::Program { program, .. } => {
                program.program_source_code = lines;
                token.core_mut().notify_field_changed(Field::ProgramSourceCode);
                Ok(())
            }
            _ => Err(Error::BadEntityType("not a Program".into())),
        }
    }

    pub fn program_compiled_code<T: ReadToken>(&self, token: &T) -> Result<Vec<u8>> {
        self.check_token(token.entity_id())?;
        match token.kind() {
            Kind::Program { program, .. } => Ok(program.program_compiled_code.clone()),
            _ => Err(Error::BadEntityType("not a Program".into())),
        }
    }

    pub fn set_program_compiled_code(&self, token: &mut WriterLockToken<'_>, bytes: Vec<u8>) -> Result<()> {
        self.check_token(token.entity_id())?;
        match token.kind_mut() {
            Kind::Program { program, .. } => {
                program.program_compiled_code = bytes;
                token.core_mut().notify_field_changed(Field::ProgramCompiledCode);
                Ok(())
            }
            _ => Err(Error::BadEntityType("not a Program".into())),
        }
    }

    /// The first program include by ascending `Id` order, or `Id::DEFAULT`
    /// if there are none.
    pub fn first_program_include<T: ReadToken>(&self, token: &T) -> Result<Id> {
        self.check_token(token.entity_id())?;
        match token.kind() {
            Kind::Program { program, .. } => Ok(program.program_includes.iter().next().copied().unwrap_or(Id::DEFAULT)),
            _ => Err(Error::BadEntityType("not a Program".into())),
        }
    }

    /// The last program include by ascending `Id` order, or `Id::DEFAULT`
    /// if there are none (see [`Entity::first_program_include`]).
    pub fn last_program_include<T: ReadToken>(&self, token: &T) -> Result<Id> {
        self.check_token(token.entity_id())?;
        match token.kind() {
            Kind::Program { program, .. } => Ok(program.program_includes.iter().next_back().copied().unwrap_or(Id::DEFAULT)),
            _ => Err(Error::BadEntityType("not a Program".into())),
        }
    }

    pub fn add_program_include(&self, token: &mut WriterLockToken<'_>, include: Id) -> Result<bool> {
        self.check_token(token.entity_id())?;
        match token.kind_mut() {
            Kind::Program { program, .. } => {
                let added = program.program_includes.insert(include);
                if added {
                    token.core_mut().notify_reference_changed(
                        Field::ProgramIncludes,
                        ReferenceDelta { removed: Vec::new(), added: vec![include] },
                    );
                }
                Ok(added)
            }
            _ => Err(Error::BadEntityType("not a Program".into())),
        }
    }

    pub fn program_reg_name<T: ReadToken>(&self, token: &T) -> Result<String> {
        self.check_token(token.entity_id())?;
        match token.kind() {
            Kind::Program { program, .. } => Ok(program.program_reg_name.clone()),
            _ => Err(Error::BadEntityType("not a Program".into())),
        }
    }

    pub fn set_program_reg_name(&self, token: &mut WriterLockToken<'_>, reg_name: String) -> Result<()> {
        self.check_token(token.entity_id())?;
        match token.kind_mut() {
            Kind::Program { program, .. } => {
                program.program_reg_name = reg_name;
                token.core_mut().notify_field_changed(Field::ProgramRegName);
                Ok(())
            }
            _ => Err(Error::BadEntityType("not a Program".into())),
        }
    }

    // --- Group fields -----------------------------------------------------

    pub fn is_member<T: ReadToken>(&self, token: &T, id: &Id) -> Result<bool> {
        self.check_token(token.entity_id())?;
        Ok(token.kind().is_member(id))
    }

    pub fn group_members<T: ReadToken>(&self, token: &T) -> Result<Vec<Id>> {
        self.check_token(token.entity_id())?;
        match token.kind() {
            Kind::Group { members, .. } => Ok(members.clone()),
            _ => Err(Error::BadEntityType("not a Group".into())),
        }
    }

    pub fn add_member(&self, token: &mut WriterLockToken<'_>, id: Id) -> Result<bool> {
        self.check_token(token.entity_id())?;
        match token.kind_mut() {
            Kind::Group { members, .. } => {
                if members.contains(&id) {
                    return Ok(false);
                }
                members.push(id);
                token.core_mut().notify_reference_changed(
                    Field::GroupMembers,
                    ReferenceDelta { removed: Vec::new(), added: vec![id] },
                );
                Ok(true)
            }
            _ => Err(Error::BadEntityType("not a Group".into())),
        }
    }

    pub fn remove_member(&self, token: &mut WriterLockToken<'_>, id: &Id) -> Result<bool> {
        self.check_token(token.entity_id())?;
        match token.kind_mut() {
            Kind::Group { members, .. } => {
                let before = members.len();
                members.retain(|m| m != id);
                let removed = members.len() != before;
                if removed {
                    token.core_mut().notify_reference_changed(
                        Field::GroupMembers,
                        ReferenceDelta { removed: vec![*id], added: Vec::new() },
                    );
                }
                Ok(removed)
            }
            _ => Err(Error::BadEntityType("not a Group".into())),
        }
    }

    // --- Registration fields -------------------------------------------------

    pub fn registration_name<T: ReadToken>(&self, token: &T) -> Result<String> {
        self.check_token(token.entity_id())?;
        Ok(token.core().registration_name.clone())
    }

    pub fn registration_category<T: ReadToken>(&self, token: &T) -> Result<String> {
        self.check_token(token.entity_id())?;
        Ok(token.core().registration_category.clone())
    }

    pub fn set_registration(&self, token: &mut WriterLockToken<'_>, name: String, category: String) -> Result<()> {
        self.check_token(token.entity_id())?;
        token.core_mut().set_registration(name, category);
        Ok(())
    }

    // --- Application properties --------------------------------------------

    pub fn application_names<T: ReadToken>(&self, token: &T) -> Result<Vec<String>> {
        self.check_token(token.entity_id())?;
        token
            .kind()
            .application_properties()
            .map(|apps| apps.keys().cloned().collect())
            .ok_or_else(|| Error::BadEntityType("entity has no application properties".into()))
    }

    pub fn create_application(&self, token: &mut WriterLockToken<'_>, name: impl Into<String>, owner: Id) -> Result<()> {
        self.check_token(token.entity_id())?;
        let name = name.into();
        let apps = token
            .kind_mut()
            .application_properties_mut()
            .ok_or_else(|| Error::BadEntityType("entity has no application properties".into()))?;
        if apps.contains_key(&name) {
            return Err(Error::BadArguments(format!("application {name} already exists")));
        }
        apps.insert(name.clone(), ApplicationProperties::new(name, owner));
        token.core_mut().notify_field_changed(Field::ApplicationProperties);
        Ok(())
    }

    /// Fetch a property value. `path` is `<application>/<directory path>`.
    pub fn get_property<T: ReadToken>(&self, token: &T, path: &str) -> Result<Option<PropertyData>> {
        self.check_token(token.entity_id())?;
        let (app_name, rest) = split_application_path(path)?;
        let apps = token
            .kind()
            .application_properties()
            .ok_or_else(|| Error::BadEntityType("entity has no application properties".into()))?;
        let app = apps.get(app_name).ok_or_else(|| Error::NotFound(format!("no application named {app_name}")))?;
        Ok(app.directory().get(rest))
    }

    pub fn set_property(&self, token: &mut WriterLockToken<'_>, path: &str, value: PropertyData) -> Result<()> {
        self.check_token(token.entity_id())?;
        let (app_name, rest) = split_application_path(path)?;
        let apps = token
            .kind_mut()
            .application_properties_mut()
            .ok_or_else(|| Error::BadEntityType("entity has no application properties".into()))?;
        let app = apps
            .get_mut(app_name)
            .ok_or_else(|| Error::NotFound(format!("no application named {app_name}")))?;
        app.directory_mut().set(rest, value)?;
        token.core_mut().notify_field_changed(Field::ApplicationProperties);
        Ok(())
    }

    /// Security governing one named application — properties carry their
    /// own security, distinct from the entity's own.
    pub fn application_security<T: ReadToken>(&self, token: &T, app_name: &str) -> Result<Security> {
        self.check_token(token.entity_id())?;
        let apps = token
            .kind()
            .application_properties()
            .ok_or_else(|| Error::BadEntityType("entity has no application properties".into()))?;
        let app = apps.get(app_name).ok_or_else(|| Error::NotFound(format!("no application named {app_name}")))?;
        Ok(app.security().clone())
    }

    pub fn set_application_security(
        &self,
        token: &mut WriterLockToken<'_>,
        app_name: &str,
        security: Security,
    ) -> Result<()> {
        self.check_token(token.entity_id())?;
        let apps = token
            .kind_mut()
            .application_properties_mut()
            .ok_or_else(|| Error::BadEntityType("entity has no application properties".into()))?;
        let app = apps.get_mut(app_name).ok_or_else(|| Error::NotFound(format!("no application named {app_name}")))?;
        *app.security_mut() = security;
        token.core_mut().notify_field_changed(Field::ApplicationProperties);
        Ok(())
    }

    pub fn application_owner<T: ReadToken>(&self, token: &T, app_name: &str) -> Result<Id> {
        self.check_token(token.entity_id())?;
        let apps = token
            .kind()
            .application_properties()
            .ok_or_else(|| Error::BadEntityType("entity has no application properties".into()))?;
        let app = apps.get(app_name).ok_or_else(|| Error::NotFound(format!("no application named {app_name}")))?;
        Ok(app.owner())
    }

    /// Copy all fields into a new Entity bound to `new_id`. The clone marks
    /// every field changed and starts with no live references.
    pub fn clone_with_new_identity(&self, new_id: Id) -> Entity {
        let token = self.lock_read();
        let new_core = token.core().cloned_with_new_identity(new_id);
        let new_kind = token.kind().clone();
        drop(token);
        Entity::new(new_core, new_kind)
    }

    /// Approximate memory usage, in bytes.
    pub fn mem_used<T: ReadToken>(&self, token: &T) -> Result<usize> {
        self.check_token(token.entity_id())?;
        let core = token.core();
        let mut total = std::mem::size_of::<Core>()
            + core.name().len()
            + core.note().len()
            + core.security().mem_used();
        if let Some(apps) = token.kind().application_properties() {
            for app in apps.values() {
                for (path, value) in app.directory().iter_values() {
                    total += path.len() + value.mem_used();
                }
            }
        }
        Ok(total)
    }

    /// A diagnostic rendering — not the dump export format.
    pub fn to_string_display<T: ReadToken>(&self, token: &T, limits: &Limits) -> Result<String> {
        self.check_token(token.entity_id())?;
        let core = token.core();
        let mut out = format!(
            "{} ({:?}) name={:?} owner={} version={}\n",
            core.id(),
            core.entity_type(),
            core.name(),
            core.owner(),
            core.version()
        );
        if let Some(apps) = token.kind().application_properties() {
            for (name, app) in apps {
                out.push_str(&format!("@{name}:\n{}", app.directory().to_string_display(limits)));
            }
        }
        Ok(out)
    }

    /// Serialize the full entity (core + kind payload) to a tagged byte
    /// buffer, matching the style of [`crate::property::data::PropertyData::serialize`].
    pub fn serialize<T: ReadToken>(&self, token: &T) -> Result<Vec<u8>> {
        self.check_token(token.entity_id())?;
        Ok(wire::encode(token.core(), token.kind()))
    }

    /// Reconstruct an `Entity` from bytes produced by [`Entity::serialize`].
    pub fn deserialize(bytes: &[u8]) -> Result<Entity> {
        let (core, kind) = wire::decode(bytes)?;
        Ok(Entity::new(core, kind))
    }
}

fn split_application_path(path: &str) -> Result<(&str, &str)> {
    let trimmed = path.trim_start_matches('/');
    let (app, rest) = trimmed
        .split_once('/')
        .map(|(a, r)| (a, r))
        .unwrap_or((trimmed, ""));
    if app.is_empty() {
        return Err(Error::BadArguments("property path has no application segment".into()));
    }
    Ok((app, rest))
}

/// Manual tagged-byte wire format for `Core` + `Kind`, grounded on the same
/// dispatch pattern as `PropertyData::serialize`/`deserialize`.
mod wire {
    use super::*;

    struct Writer(Vec<u8>);

    impl Writer {
        fn new() -> Self {
            Writer(Vec::new())
        }
        fn u8(&mut self, v: u8) {
            self.0.push(v);
        }
        fn u32(&mut self, v: u32) {
            self.0.extend_from_slice(&v.to_be_bytes());
        }
        fn u64(&mut self, v: u64) {
            self.0.extend_from_slice(&v.to_be_bytes());
        }
        fn id(&mut self, id: Id) {
            self.0.extend_from_slice(&id.to_bytes());
        }
        fn bytes(&mut self, b: &[u8]) {
            self.u32(b.len() as u32);
            self.0.extend_from_slice(b);
        }
        fn string(&mut self, s: &str) {
            self.bytes(s.as_bytes());
        }
        fn ids(&mut self, ids: &[Id]) {
            self.u32(ids.len() as u32);
            for id in ids {
                self.id(*id);
            }
        }
        fn strings(&mut self, strings: &[String]) {
            self.u32(strings.len() as u32);
            for s in strings {
                self.string(s);
            }
        }
        fn into_vec(self) -> Vec<u8> {
            self.0
        }
    }

    struct Reader<'a> {
        bytes: &'a [u8],
        pos: usize,
    }

    impl<'a> Reader<'a> {
        fn new(bytes: &'a [u8]) -> Self {
            Reader { bytes, pos: 0 }
        }
        fn u8(&mut self) -> Result<u8> {
            let b = *self.bytes.get(self.pos).ok_or_else(|| Error::DatabaseError("truncated entity buffer".into()))?;
            self.pos += 1;
            Ok(b)
        }
        fn u32(&mut self) -> Result<u32> {
            let slice = self
                .bytes
                .get(self.pos..self.pos + 4)
                .ok_or_else(|| Error::DatabaseError("truncated entity buffer".into()))?;
            self.pos += 4;
            Ok(u32::from_be_bytes(slice.try_into().unwrap()))
        }
        fn u64(&mut self) -> Result<u64> {
            let slice = self
                .bytes
                .get(self.pos..self.pos + 8)
                .ok_or_else(|| Error::DatabaseError("truncated entity buffer".into()))?;
            self.pos += 8;
            Ok(u64::from_be_bytes(slice.try_into().unwrap()))
        }
        fn id(&mut self) -> Result<Id> {
            let slice = self
                .bytes
                .get(self.pos..self.pos + 8)
                .ok_or_else(|| Error::DatabaseError("truncated entity buffer".into()))?;
            self.pos += 8;
            Id::from_bytes(slice)
        }
        fn bytes_owned(&mut self) -> Result<Vec<u8>> {
            let len = self.u32()? as usize;
            let slice = self
                .bytes
                .get(self.pos..self.pos + len)
                .ok_or_else(|| Error::DatabaseError("truncated entity buffer".into()))?;
            self.pos += len;
            Ok(slice.to_vec())
        }
        fn string(&mut self) -> Result<String> {
            String::from_utf8(self.bytes_owned()?).map_err(|e| Error::DatabaseError(e.to_string()))
        }
        fn ids(&mut self) -> Result<Vec<Id>> {
            let len = self.u32()? as usize;
            (0..len).map(|_| self.id()).collect()
        }
        fn strings(&mut self) -> Result<Vec<String>> {
            let len = self.u32()? as usize;
            (0..len).map(|_| self.string()).collect()
        }
    }

    fn entity_type_tag(t: EntityType) -> u8 {
        match t {
            EntityType::Entity => 0,
            EntityType::PropertyEntity => 1,
            EntityType::ContainerPropertyEntity => 2,
            EntityType::Thing => 3,
            EntityType::Puppet => 4,
            EntityType::Vehicle => 5,
            EntityType::Player => 6,
            EntityType::Guest => 7,
            EntityType::Action => 8,
            EntityType::Exit => 9,
            EntityType::Room => 10,
            EntityType::Region => 11,
            EntityType::Group => 12,
            EntityType::Capability => 13,
            EntityType::Program => 14,
        }
    }

    fn entity_type_from_tag(tag: u8) -> Result<EntityType> {
        Ok(match tag {
            0 => EntityType::Entity,
            1 => EntityType::PropertyEntity,
            2 => EntityType::ContainerPropertyEntity,
            3 => EntityType::Thing,
            4 => EntityType::Puppet,
            5 => EntityType::Vehicle,
            6 => EntityType::Player,
            7 => EntityType::Guest,
            8 => EntityType::Action,
            9 => EntityType::Exit,
            10 => EntityType::Room,
            11 => EntityType::Region,
            12 => EntityType::Group,
            13 => EntityType::Capability,
            14 => EntityType::Program,
            other => return Err(Error::DatabaseError(format!("unknown EntityType tag {other}"))),
        })
    }

    const SECURITY_FLAGS: [crate::security::Flag; 4] = [
        crate::security::Flag::Read,
        crate::security::Flag::Write,
        crate::security::Flag::Basic,
        crate::security::Flag::Chown,
    ];

    fn write_security(w: &mut Writer, security: &Security, is_property: bool) {
        w.u8(is_property as u8);
        w.ids(security.admin_ids());
        w.ids(security.list_ids());
        let mut list_bits = 0u8;
        let mut other_bits = 0u8;
        for (i, flag) in SECURITY_FLAGS.iter().enumerate() {
            if security.get_list_flag(*flag) {
                list_bits |= 1 << i;
            }
            if security.get_other_flag(*flag) {
                other_bits |= 1 << i;
            }
        }
        w.u8(list_bits);
        w.u8(other_bits);
    }

    fn read_security(r: &mut Reader) -> Result<Security> {
        let is_property = r.u8()? != 0;
        let admin_ids = r.ids()?;
        let list_ids = r.ids()?;
        let list_bits = r.u8()?;
        let other_bits = r.u8()?;
        let mut security = if is_property { Security::new_property() } else { Security::new() };
        for id in admin_ids {
            security.add_admin(id);
        }
        for id in list_ids {
            security.add_to_list(id);
        }
        for (i, flag) in SECURITY_FLAGS.iter().enumerate() {
            security.set_list_flag(*flag, list_bits & (1 << i) != 0);
            security.set_other_flag(*flag, other_bits & (1 << i) != 0);
        }
        Ok(security)
    }

    fn write_applications(w: &mut Writer, apps: &std::collections::BTreeMap<String, ApplicationProperties>) {
        w.u32(apps.len() as u32);
        for app in apps.values() {
            w.string(app.name());
            w.id(app.owner());
            write_security(w, app.security(), true);
            let values = app.directory().iter_values();
            w.u32(values.len() as u32);
            for (path, value) in values {
                w.string(&path);
                w.bytes(&value.serialize());
            }
        }
    }

    fn read_applications(r: &mut Reader) -> Result<std::collections::BTreeMap<String, ApplicationProperties>> {
        let count = r.u32()?;
        let mut apps = std::collections::BTreeMap::new();
        for _ in 0..count {
            let name = r.string()?;
            let owner = r.id()?;
            let security = read_security(r)?;
            let mut app = ApplicationProperties::new(name.clone(), owner);
            *app.security_mut() = security;
            let value_count = r.u32()?;
            for _ in 0..value_count {
                let path = r.string()?;
                let value_bytes = r.bytes_owned()?;
                let value = PropertyData::deserialize(&value_bytes)?;
                app.directory_mut().set(&path, value)?;
            }
            apps.insert(name, app);
        }
        Ok(apps)
    }

    fn write_container(w: &mut Writer, c: &ContainerFields) {
        w.id(c.contained_by);
        w.ids(&c.linked_programs.iter().copied().collect::<Vec<_>>());
    }

    fn read_container(r: &mut Reader) -> Result<ContainerFields> {
        let contained_by = r.id()?;
        let linked_programs = r.ids()?.into_iter().collect();
        Ok(ContainerFields { contained_by, linked_programs })
    }

    fn write_action(w: &mut Writer, a: &ActionFields) {
        w.id(a.action_contained_by);
        w.ids(&a.action_targets);
        w.strings(&a.action_commands);
        w.string(&a.action_success_message);
        w.string(&a.action_fail_message);
        w.bytes(&a.action_lock.serialize());
    }

    fn read_action(r: &mut Reader) -> Result<ActionFields> {
        let action_contained_by = r.id()?;
        let action_targets = r.ids()?;
        let action_commands = r.strings()?;
        let action_success_message = r.string()?;
        let action_fail_message = r.string()?;
        let lock_bytes = r.bytes_owned()?;
        let action_lock = Lock::deserialize(&lock_bytes)?;
        Ok(ActionFields {
            action_contained_by,
            action_targets,
            action_commands,
            action_success_message,
            action_fail_message,
            action_lock,
        })
    }

    pub(super) fn encode(core: &Core, kind: &Kind) -> Vec<u8> {
        let mut w = Writer::new();
        w.u8(entity_type_tag(core.entity_type()));
        w.id(core.id());
        w.u32(core.version());
        w.u32(core.instance());
        w.string(core.name());
        w.id(core.owner());
        w.string(core.note());
        w.strings(&core.flags().iter().cloned().collect::<Vec<_>>());
        write_security(&mut w, core.security(), false);
        w.u64(core.created().epoch_millis());
        w.u64(core.modified().epoch_millis());
        w.u64(core.accessed().epoch_millis());

        match kind {
            Kind::Entity => {}
            Kind::PropertyEntity { application_properties } => write_applications(&mut w, application_properties),
            Kind::ContainerPropertyEntity { container, application_properties } => {
                write_container(&mut w, container);
                write_applications(&mut w, application_properties);
            }
            Kind::Thing { container, application_properties, thing_home, thing_lock } => {
                write_container(&mut w, container);
                write_applications(&mut w, application_properties);
                w.id(*thing_home);
                w.bytes(&thing_lock.serialize());
            }
            Kind::Room { container, application_properties } | Kind::Region { container, application_properties } => {
                write_container(&mut w, container);
                write_applications(&mut w, application_properties);
            }
            Kind::Player { container, application_properties, player_home, player_display_name, password_hash } => {
                write_container(&mut w, container);
                write_applications(&mut w, application_properties);
                w.id(*player_home);
                w.string(player_display_name);
                w.string(password_hash);
            }
            Kind::Guest { container, application_properties } => {
                write_container(&mut w, container);
                write_applications(&mut w, application_properties);
            }
            Kind::Puppet { container, application_properties, puppet_display_name } => {
                write_container(&mut w, container);
                write_applications(&mut w, application_properties);
                w.string(puppet_display_name);
            }
            Kind::Vehicle { container, application_properties, vehicle_interior, vehicle_controller } => {
                write_container(&mut w, container);
                write_applications(&mut w, application_properties);
                w.id(*vehicle_interior);
                w.id(*vehicle_controller);
            }
            Kind::Action { action, application_properties } => {
                write_action(&mut w, action);
                write_applications(&mut w, application_properties);
            }
            Kind::Exit { action, application_properties, arrive_message } => {
                write_action(&mut w, action);
                write_applications(&mut w, application_properties);
                w.string(arrive_message);
            }
            Kind::Group { application_properties, members } => {
                write_applications(&mut w, application_properties);
                w.ids(members);
            }
            Kind::Capability { application_properties } => write_applications(&mut w, application_properties),
            Kind::Program { application_properties, program } => {
                write_applications(&mut w, application_properties);
                w.string(&program.program_language);
                w.strings(&program.program_source_code);
                w.bytes(&program.program_compiled_code);
                w.ids(&program.program_includes.iter().copied().collect::<Vec<_>>());
                w.u64(program.program_runtime_sec().to_bits());
                w.string(&program.program_reg_name);
            }
        }
        w.into_vec()
    }

    pub(super) fn decode(bytes: &[u8]) -> Result<(Core, Kind)> {
        let mut r = Reader::new(bytes);
        let entity_type = entity_type_from_tag(r.u8()?)?;
        let id = r.id()?;
        let version = r.u32()?;
        let instance = r.u32()?;
        let name = r.string()?;
        let owner = r.id()?;
        let note = r.string()?;
        let flags = r.strings()?.into_iter().collect();
        let security = read_security(&mut r)?;
        let created = TimeStamp::from_epoch_millis(r.u64()?);
        let modified = TimeStamp::from_epoch_millis(r.u64()?);
        let accessed = TimeStamp::from_epoch_millis(r.u64()?);

        let mut core = Core::new(id, entity_type, name);
        core.owner = owner;
        core.version = version;
        core.instance = instance;
        core.note = note;
        core.flags = flags;
        core.security = security;
        core.created = created;
        core.modified = modified;
        core.accessed = accessed;
        core.clear_dirty();

        let kind = match entity_type {
            EntityType::Entity => Kind::Entity,
            EntityType::PropertyEntity => Kind::PropertyEntity { application_properties: read_applications(&mut r)? },
            EntityType::ContainerPropertyEntity => Kind::ContainerPropertyEntity {
                container: read_container(&mut r)?,
                application_properties: read_applications(&mut r)?,
            },
            EntityType::Thing => {
                let container = read_container(&mut r)?;
                let application_properties = read_applications(&mut r)?;
                let thing_home = r.id()?;
                let thing_lock = Lock::deserialize(&r.bytes_owned()?)?;
                Kind::Thing { container, application_properties, thing_home, thing_lock }
            }
            EntityType::Room => Kind::Room {
                container: read_container(&mut r)?,
                application_properties: read_applications(&mut r)?,
            },
            EntityType::Region => Kind::Region {
                container: read_container(&mut r)?,
                application_properties: read_applications(&mut r)?,
            },
            EntityType::Player => {
                let container = read_container(&mut r)?;
                let application_properties = read_applications(&mut r)?;
                let player_home = r.id()?;
                let player_display_name = r.string()?;
                let password_hash = r.string()?;
                Kind::Player { container, application_properties, player_home, player_display_name, password_hash }
            }
            EntityType::Guest => Kind::Guest {
                container: read_container(&mut r)?,
                application_properties: read_applications(&mut r)?,
            },
            EntityType::Puppet => {
                let container = read_container(&mut r)?;
                let application_properties = read_applications(&mut r)?;
                let puppet_display_name = r.string()?;
                Kind::Puppet { container, application_properties, puppet_display_name }
            }
            EntityType::Vehicle => {
                let container = read_container(&mut r)?;
                let application_properties = read_applications(&mut r)?;
                let vehicle_interior = r.id()?;
                let vehicle_controller = r.id()?;
                Kind::Vehicle { container, application_properties, vehicle_interior, vehicle_controller }
            }
            EntityType::Action => Kind::Action {
                action: read_action(&mut r)?,
                application_properties: read_applications(&mut r)?,
            },
            EntityType::Exit => {
                let action = read_action(&mut r)?;
                let application_properties = read_applications(&mut r)?;
                let arrive_message = r.string()?;
                Kind::Exit { action, application_properties, arrive_message }
            }
            EntityType::Group => {
                let application_properties = read_applications(&mut r)?;
                let members = r.ids()?;
                Kind::Group { application_properties, members }
            }
            EntityType::Capability => Kind::Capability { application_properties: read_applications(&mut r)? },
            EntityType::Program => {
                let application_properties = read_applications(&mut r)?;
                let program_language = r.string()?;
                let program_source_code = r.strings()?;
                let program_compiled_code = r.bytes_owned()?;
                let program_includes = r.ids()?.into_iter().collect();
                let program_runtime_sec = f64::from_bits(r.u64()?);
                let program_reg_name = r.string()?;
                let program = ProgramFields {
                    program_language,
                    program_source_code,
                    program_compiled_code,
                    program_includes,
                    program_runtime_sec,
                    program_reg_name,
                };
                Kind::Program { application_properties, program }
            }
        };

        Ok((core, kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::kind::ContainerFields;

    fn new_player(id: Id) -> Entity {
        let core = Core::new(id, EntityType::Player, "Alice".into());
        let kind = Kind::Player {
            container: ContainerFields { contained_by: Id::new(id.site_id(), 3), linked_programs: Default::default() },
            application_properties: Default::default(),
            player_home: Id::new(id.site_id(), 3),
            player_display_name: "Alice".into(),
            password_hash: String::new(),
        };
        Entity::new(core, kind)
    }

    #[test]
    fn wrong_entity_token_is_rejected() {
        let a = new_player(Id::new(1, 5));
        let b = new_player(Id::new(1, 6));
        let token = b.lock_read();
        assert!(matches!(a.name(&token), Err(Error::LockError(_))));
    }

    #[test]
    fn writer_token_required_to_set_name() {
        let entity = new_player(Id::new(1, 5));
        let mut token = entity.lock_write();
        entity.set_name(&mut token, "Alicia".into()).unwrap();
        assert_eq!(entity.name(&token).unwrap(), "Alicia");
    }

    #[test]
    fn set_password_then_verify() {
        let entity = new_player(Id::new(1, 5));
        let salt = [7u8; 16];
        let mut token = entity.lock_write();
        entity.set_password(&mut token, &salt, "hunter2").unwrap();
        assert!(entity.verify_password(&token, &salt, "hunter2").unwrap());
        assert!(!entity.verify_password(&token, &salt, "wrong").unwrap());
    }

    #[test]
    fn application_property_round_trip() {
        let entity = new_player(Id::new(1, 5));
        let mut token = entity.lock_write();
        entity.create_application(&mut token, "mush", Id::new(1, 5)).unwrap();
        entity.set_property(&mut token, "mush/counter", PropertyData::Integer(42)).unwrap();
        assert_eq!(entity.get_property(&token, "mush/counter").unwrap(), Some(PropertyData::Integer(42)));
    }

    #[test]
    fn serialize_roundtrips_player() {
        let entity = new_player(Id::new(1, 5));
        {
            let mut token = entity.lock_write();
            entity.create_application(&mut token, "mush", Id::new(1, 5)).unwrap();
            entity.set_property(&mut token, "mush/color", PropertyData::String("red".into())).unwrap();
        }
        let token = entity.lock_read();
        let bytes = entity.serialize(&token).unwrap();
        drop(token);

        let restored = Entity::deserialize(&bytes).unwrap();
        let restored_token = restored.lock_read();
        assert_eq!(restored.name(&restored_token).unwrap(), "Alice");
        assert_eq!(
            restored.get_property(&restored_token, "mush/color").unwrap(),
            Some(PropertyData::String("red".into()))
        );
    }
}
