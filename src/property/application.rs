//! `ApplicationProperties`: one named top-level property tree owned by an
//! entity (e.g. `@mush`, `@system`), each with its own security.

use crate::id::Id;
use crate::property::directory::PropertyDirectory;
use crate::security::PropertySecurity;

/// A single named property application: its directory tree, the id that
/// owns it, and the security governing read/write access to it.
#[derive(Clone, Debug)]
pub struct ApplicationProperties {
    name: String,
    owner: Id,
    security: PropertySecurity,
    directory: PropertyDirectory,
}

impl ApplicationProperties {
    pub fn new(name: impl Into<String>, owner: Id) -> Self {
        ApplicationProperties {
            name: name.into(),
            owner,
            security: PropertySecurity::new_property(),
            directory: PropertyDirectory::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> Id {
        self.owner
    }

    pub fn set_owner(&mut self, owner: Id) {
        self.owner = owner;
    }

    pub fn security(&self) -> &PropertySecurity {
        &self.security
    }

    pub fn security_mut(&mut self) -> &mut PropertySecurity {
        &mut self.security
    }

    pub fn directory(&self) -> &PropertyDirectory {
        &self.directory
    }

    pub fn directory_mut(&mut self) -> &mut PropertyDirectory {
        &mut self.directory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::data::PropertyData;

    #[test]
    fn directory_is_independently_mutable() {
        let mut app = ApplicationProperties::new("mush", Id::new(1, 10));
        app.directory_mut().set("color", PropertyData::String("red".into())).unwrap();
        assert_eq!(app.directory().get("color"), Some(PropertyData::String("red".into())));
        assert_eq!(app.name(), "mush");
    }
}
