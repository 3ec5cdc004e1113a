//! `Kind`: the subtype-specific payload that rides alongside [`super::core::Core`].
//!
//! Rather than a deep inheritance chain, each leaf kind embeds the shared
//! field groups it needs (`ContainerFields`, `ActionFields`) as composed
//! structs.

use std::collections::{BTreeMap, BTreeSet};

use crate::id::Id;
use crate::lock::Lock;
use crate::property::application::ApplicationProperties;

/// Fields shared by every entity that can hold other entities
/// (`ContainerPropertyEntity` and its descendants).
#[derive(Debug, Clone, Default)]
pub struct ContainerFields {
    pub contained_by: Id,
    pub linked_programs: BTreeSet<Id>,
}

/// Fields shared by `ActionEntity` and its descendants (`Exit`).
#[derive(Debug, Clone)]
pub struct ActionFields {
    pub action_contained_by: Id,
    /// Insertion-ordered, duplicate-free.
    pub action_targets: Vec<Id>,
    pub action_commands: Vec<String>,
    pub action_success_message: String,
    pub action_fail_message: String,
    pub action_lock: Lock,
}

impl ActionFields {
    pub fn new(action_contained_by: Id) -> Self {
        ActionFields {
            action_contained_by,
            action_targets: Vec::new(),
            action_commands: Vec::new(),
            action_success_message: String::new(),
            action_fail_message: String::new(),
            action_lock: Lock::by_id(Id::DEFAULT).negated(),
        }
    }

    /// Insert `target`, preserving order and rejecting duplicates.
    pub fn add_target(&mut self, target: Id) -> bool {
        if self.action_targets.contains(&target) {
            return false;
        }
        self.action_targets.push(target);
        true
    }

    pub fn remove_target(&mut self, target: &Id) -> bool {
        let before = self.action_targets.len();
        self.action_targets.retain(|t| t != target);
        self.action_targets.len() != before
    }
}

/// Program-specific fields. `program_runtime_sec` is accumulate-only —
/// there is no raw setter.
#[derive(Debug, Clone, Default)]
pub struct ProgramFields {
    pub program_language: String,
    pub program_source_code: Vec<String>,
    pub program_compiled_code: Vec<u8>,
    pub program_includes: BTreeSet<Id>,
    program_runtime_sec: f64,
    pub program_reg_name: String,
}

impl ProgramFields {
    pub fn program_runtime_sec(&self) -> f64 {
        self.program_runtime_sec
    }

    /// Accumulate additional execution time. Negative deltas are rejected.
    pub fn add_to_program_runtime(&mut self, delta_sec: f64) -> Result<(), crate::error::Error> {
        if delta_sec < 0.0 {
            return Err(crate::error::Error::BadArguments(
                "program runtime delta must be non-negative".into(),
            ));
        }
        self.program_runtime_sec += delta_sec;
        Ok(())
    }
}

/// The subtype-specific payload of an Entity. Every variant except
/// `Entity`/`Capability` carries `application_properties`, its named
/// property subtrees.
#[derive(Debug, Clone)]
pub enum Kind {
    /// The bare root type: no container, no action, no properties.
    Entity,
    PropertyEntity { application_properties: BTreeMap<String, ApplicationProperties> },
    ContainerPropertyEntity {
        container: ContainerFields,
        application_properties: BTreeMap<String, ApplicationProperties>,
    },
    Thing {
        container: ContainerFields,
        application_properties: BTreeMap<String, ApplicationProperties>,
        thing_home: Id,
        thing_lock: Lock,
    },
    Room {
        container: ContainerFields,
        application_properties: BTreeMap<String, ApplicationProperties>,
    },
    Region {
        container: ContainerFields,
        application_properties: BTreeMap<String, ApplicationProperties>,
    },
    Player {
        container: ContainerFields,
        application_properties: BTreeMap<String, ApplicationProperties>,
        player_home: Id,
        player_display_name: String,
        /// `hex(sha256(site_salt || password))`; never plaintext (§4.18).
        password_hash: String,
    },
    Guest {
        container: ContainerFields,
        application_properties: BTreeMap<String, ApplicationProperties>,
    },
    Puppet {
        container: ContainerFields,
        application_properties: BTreeMap<String, ApplicationProperties>,
        puppet_display_name: String,
    },
    Vehicle {
        container: ContainerFields,
        application_properties: BTreeMap<String, ApplicationProperties>,
        vehicle_interior: Id,
        vehicle_controller: Id,
    },
    Action {
        action: ActionFields,
        application_properties: BTreeMap<String, ApplicationProperties>,
    },
    Exit {
        action: ActionFields,
        application_properties: BTreeMap<String, ApplicationProperties>,
        arrive_message: String,
    },
    /// Direct membership only — no transitive nesting of groups.
    Group {
        application_properties: BTreeMap<String, ApplicationProperties>,
        members: Vec<Id>,
    },
    Capability { application_properties: BTreeMap<String, ApplicationProperties> },
    Program {
        application_properties: BTreeMap<String, ApplicationProperties>,
        program: ProgramFields,
    },
}

impl Kind {
    /// The `application_properties` map, for every kind that has one.
    pub fn application_properties(&self) -> Option<&BTreeMap<String, ApplicationProperties>> {
        match self {
            Kind::Entity => None,
            Kind::PropertyEntity { application_properties }
            | Kind::ContainerPropertyEntity { application_properties, .. }
            | Kind::Thing { application_properties, .. }
            | Kind::Room { application_properties, .. }
            | Kind::Region { application_properties, .. }
            | Kind::Player { application_properties, .. }
            | Kind::Guest { application_properties, .. }
            | Kind::Puppet { application_properties, .. }
            | Kind::Vehicle { application_properties, .. }
            | Kind::Action { application_properties, .. }
            | Kind::Exit { application_properties, .. }
            | Kind::Group { application_properties, .. }
            | Kind::Capability { application_properties }
            | Kind::Program { application_properties, .. } => Some(application_properties),
        }
    }

    pub fn application_properties_mut(&mut self) -> Option<&mut BTreeMap<String, ApplicationProperties>> {
        match self {
            Kind::Entity => None,
            Kind::PropertyEntity { application_properties }
            | Kind::ContainerPropertyEntity { application_properties, .. }
            | Kind::Thing { application_properties, .. }
            | Kind::Room { application_properties, .. }
            | Kind::Region { application_properties, .. }
            | Kind::Player { application_properties, .. }
            | Kind::Guest { application_properties, .. }
            | Kind::Puppet { application_properties, .. }
            | Kind::Vehicle { application_properties, .. }
            | Kind::Action { application_properties, .. }
            | Kind::Exit { application_properties, .. }
            | Kind::Group { application_properties, .. }
            | Kind::Capability { application_properties }
            | Kind::Program { application_properties, .. } => Some(application_properties),
        }
    }

    /// The `ContainerFields`, for every kind that descends from
    /// `ContainerPropertyEntity`.
    pub fn container(&self) -> Option<&ContainerFields> {
        match self {
            Kind::ContainerPropertyEntity { container, .. }
            | Kind::Thing { container, .. }
            | Kind::Room { container, .. }
            | Kind::Region { container, .. }
            | Kind::Player { container, .. }
            | Kind::Guest { container, .. }
            | Kind::Puppet { container, .. }
            | Kind::Vehicle { container, .. } => Some(container),
            _ => None,
        }
    }

    pub fn container_mut(&mut self) -> Option<&mut ContainerFields> {
        match self {
            Kind::ContainerPropertyEntity { container, .. }
            | Kind::Thing { container, .. }
            | Kind::Room { container, .. }
            | Kind::Region { container, .. }
            | Kind::Player { container, .. }
            | Kind::Guest { container, .. }
            | Kind::Puppet { container, .. }
            | Kind::Vehicle { container, .. } => Some(container),
            _ => None,
        }
    }

    /// The `ActionFields`, for `Action` and `Exit`.
    pub fn action(&self) -> Option<&ActionFields> {
        match self {
            Kind::Action { action, .. } | Kind::Exit { action, .. } => Some(action),
            _ => None,
        }
    }

    pub fn action_mut(&mut self) -> Option<&mut ActionFields> {
        match self {
            Kind::Action { action, .. } | Kind::Exit { action, .. } => Some(action),
            _ => None,
        }
    }

    /// True iff `id` is a direct member of this `Group`. Always `false` for
    /// non-`Group` kinds.
    pub fn is_member(&self, id: &Id) -> bool {
        match self {
            Kind::Group { members, .. } => members.contains(id),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_targets_preserve_order_and_reject_duplicates() {
        let mut action = ActionFields::new(Id::new(1, 1));
        assert!(action.add_target(Id::new(1, 10)));
        assert!(action.add_target(Id::new(1, 20)));
        assert!(!action.add_target(Id::new(1, 10)));
        assert_eq!(action.action_targets, vec![Id::new(1, 10), Id::new(1, 20)]);
    }

    #[test]
    fn program_runtime_only_accumulates() {
        let mut program = ProgramFields::default();
        program.add_to_program_runtime(1.5).unwrap();
        program.add_to_program_runtime(2.5).unwrap();
        assert_eq!(program.program_runtime_sec(), 4.0);
        assert!(program.add_to_program_runtime(-1.0).is_err());
    }

    #[test]
    fn group_membership_is_direct_only() {
        let kind = Kind::Group { application_properties: BTreeMap::new(), members: vec![Id::new(1, 5)] };
        assert!(kind.is_member(&Id::new(1, 5)));
        assert!(!kind.is_member(&Id::new(1, 6)));
    }
}
