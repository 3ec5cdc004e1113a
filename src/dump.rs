//! Text dump import: a line-oriented state machine that reads the
//! `MUTGOS DUMP VERSION 1` ... `MUTGOS DUMP END` format and produces a
//! fully wired database via [`DatabaseAccess`].
//!
//! The outer state machine cycles through ENTITY / SECURITY / FIELDS /
//! PROPERTIES (with LOCK / DOCUMENT / SET sub-states for individual field
//! and property values), resolving `$name` references through a symbol
//! table that rejects forward references across entities. This module
//! talks to [`DatabaseAccess`] directly rather than through
//! [`crate::database_prims`] — importing a dump is a privileged,
//! whole-database operation, not a client request subject to per-field
//! security checks.

use std::collections::HashMap;

use crate::database_access::DatabaseAccess;
use crate::entity::core::EntityType;
use crate::error::{Error, Result};
use crate::id::Id;
use crate::lock::Lock;
use crate::property::data::{PropertyData, Variant};
use crate::security::{Flag, Security};

/// Summary of a completed import.
#[derive(Debug, Clone, Default)]
pub struct DumpOutcome {
    pub sites_created: Vec<u32>,
    pub entities_created: usize,
}

/// Read `text` (a complete dump file) into `db`. On any parse or database
/// error, the half-built entity currently under construction (if any) is
/// rolled back via [`DatabaseAccess::delete_entity`] before the error is
/// returned; entities already committed by earlier `mkentity`/`end entity`
/// pairs are left in place.
pub fn import(db: &DatabaseAccess, text: &str) -> Result<DumpOutcome> {
    let mut parser = Parser::new(db);
    match parser.run(text) {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            if let Some(pending) = parser.pending_new_entity.take() {
                let _ = db.delete_entity(pending);
            }
            Err(e)
        }
    }
}

/// A line-value's shape after the `=` in a `FIELDS`/property declaration.
enum FieldValue<'a> {
    Literal(&'a str),
    Lines(usize),
    LockId,
    LockNegId,
    LockProperty,
    LockNegProperty,
}

struct Parser<'a> {
    db: &'a DatabaseAccess,
    symbols: HashMap<String, Id>,
    site: Option<u32>,
    /// Set while a `mkentity`-created entity has not yet reached `end
    /// entity`; cleared on success so [`import`] won't roll it back.
    pending_new_entity: Option<Id>,
    outcome: DumpOutcome,
}

impl<'a> Parser<'a> {
    fn new(db: &'a DatabaseAccess) -> Self {
        Parser {
            db,
            symbols: HashMap::new(),
            site: None,
            pending_new_entity: None,
            outcome: DumpOutcome::default(),
        }
    }

    fn run(&mut self, text: &str) -> Result<DumpOutcome> {
        let mut lines = LineSource::new(text);

        let (line_no, header) = lines
            .next_token_line()
            .ok_or_else(|| Error::BadArguments("empty dump input".into()))?;
        if header != "MUTGOS DUMP VERSION 1" {
            return Err(syntax_error(line_no, "expected 'MUTGOS DUMP VERSION 1'"));
        }

        loop {
            let Some((line_no, line)) = lines.next_token_line() else {
                return Err(Error::BadArguments("unexpected end of input before MUTGOS DUMP END".into()));
            };
            if line == "MUTGOS DUMP END" {
                break;
            }
            self.top_level(&mut lines, line_no, line)?;
        }

        Ok(std::mem::take(&mut self.outcome))
    }

    fn top_level(&mut self, lines: &mut LineSource, line_no: usize, line: &str) -> Result<()> {
        let (command, rest) = split_first_token(line);
        match command {
            "mksite" => {
                let name = rest.trim();
                if name.is_empty() {
                    return Err(syntax_error(line_no, "mksite requires a name"));
                }
                let site_id = self.db.new_site(name)?;
                self.site = Some(site_id);
                self.outcome.sites_created.push(site_id);
                Ok(())
            }
            "setsite" => {
                let site_id: u32 = rest
                    .trim()
                    .parse()
                    .map_err(|_| syntax_error(line_no, "setsite requires a numeric site id"))?;
                if !self.db.all_site_ids().contains(&site_id) {
                    return Err(syntax_error(line_no, format!("no such site {site_id}")));
                }
                self.site = Some(site_id);
                Ok(())
            }
            "end" if rest.trim() == "site" => {
                self.site = None;
                Ok(())
            }
            "mkentity" => self.mkentity(lines, line_no, rest),
            "modentity" => self.modentity(lines, line_no, rest),
            other => Err(syntax_error(line_no, format!("unexpected top-level command {other:?}"))),
        }
    }

    fn current_site(&self, line_no: usize) -> Result<u32> {
        self.site.ok_or_else(|| syntax_error(line_no, "no site selected"))
    }

    fn mkentity(&mut self, lines: &mut LineSource, line_no: usize, rest: &str) -> Result<()> {
        let site_id = self.current_site(line_no)?;
        let mut tokens = rest.split_whitespace();
        let type_token = tokens.next().ok_or_else(|| syntax_error(line_no, "mkentity requires a type"))?;
        let entity_type = EntityType::parse(type_token).map_err(|_| syntax_error(line_no, format!("unknown entity type {type_token:?}")))?;
        let symbol = tokens.next();

        let placeholder = format!("_dump_unnamed_{}", self.outcome.entities_created);
        let entity = self.db.new_entity(entity_type, site_id, Id::DEFAULT, &placeholder)?;
        self.outcome.entities_created += 1;
        self.pending_new_entity = Some(entity.id());

        if let Some(sym) = symbol {
            self.bind_symbol(line_no, sym, entity.id())?;
        }

        self.entity_state(lines, entity.id())?;
        self.pending_new_entity = None;
        Ok(())
    }

    fn modentity(&mut self, lines: &mut LineSource, line_no: usize, rest: &str) -> Result<()> {
        let id = self.resolve_symbol(line_no, rest.trim())?;
        // Fails loudly if the symbol resolved to an id that no longer exists.
        self.db.get_entity(id)?;
        self.entity_state(lines, id)
    }

    fn bind_symbol(&mut self, line_no: usize, sym: &str, id: Id) -> Result<()> {
        let name = sym.strip_prefix('$').ok_or_else(|| syntax_error(line_no, format!("expected $name, got {sym:?}")))?;
        self.symbols.insert(name.to_string(), id);
        Ok(())
    }

    fn resolve_symbol(&self, line_no: usize, token: &str) -> Result<Id> {
        let name = token
            .strip_prefix('$')
            .ok_or_else(|| syntax_error(line_no, format!("expected $name, got {token:?}")))?;
        self.symbols
            .get(name)
            .copied()
            .ok_or_else(|| syntax_error(line_no, format!("unbound symbol ${name}")))
    }

    /// Outer `ENTITY` state: `owner`/`name`/`flag`/`print` plus the three
    /// sub-state entry points, until `end entity`.
    fn entity_state(&mut self, lines: &mut LineSource, id: Id) -> Result<()> {
        loop {
            let (line_no, line) = lines
                .next_token_line()
                .ok_or_else(|| Error::BadArguments("unexpected end of input inside ENTITY".into()))?;
            let (command, rest) = split_first_token(line);
            match command {
                "print" => {
                    let entity = self.db.get_entity(id)?;
                    let token = entity.lock_read();
                    tracing::debug!(entity = %id, "{}", entity.to_string_display(&token, self.db.limits())?);
                }
                "owner" => {
                    let owner = self.resolve_symbol(line_no, rest.trim())?;
                    let entity = self.db.get_entity(id)?;
                    let mut token = entity.lock_write();
                    entity.set_owner(&mut token, owner)?;
                }
                "name" => {
                    let entity = self.db.get_entity(id)?;
                    let mut token = entity.lock_write();
                    entity.set_name(&mut token, rest.trim().to_string())?;
                }
                "flag" => {
                    let entity = self.db.get_entity(id)?;
                    let mut token = entity.lock_write();
                    entity.add_flag(&mut token, rest.trim().to_string())?;
                }
                "security" => self.security_state(lines, id, None)?,
                "fields" => self.fields_state(lines, id)?,
                "properties" => self.properties_state(lines, id)?,
                "end" if rest.trim() == "entity" => return Ok(()),
                other => return Err(syntax_error(line_no, format!("unexpected ENTITY command {other:?}"))),
            }
        }
    }

    /// `SECURITY` state. `app_name` is `Some` when entered from
    /// `PROPERTIES` (governing that application's `PropertySecurity`
    /// instead of the entity's own `Security`).
    fn security_state(&mut self, lines: &mut LineSource, id: Id, app_name: Option<&str>) -> Result<()> {
        let mut security = self.load_security(id, app_name)?;
        loop {
            let (line_no, line) = lines
                .next_token_line()
                .ok_or_else(|| Error::BadArguments("unexpected end of input inside SECURITY".into()))?;
            let (command, rest) = split_first_token(line);
            match command {
                "group" => {
                    let who = self.resolve_symbol(line_no, rest.trim())?;
                    security.add_to_list(who);
                }
                "admin" => {
                    let who = self.resolve_symbol(line_no, rest.trim())?;
                    security.add_admin(who);
                }
                "flag" => {
                    let (scope, flag_name) = split_first_token(rest.trim());
                    let flag = parse_flag(line_no, flag_name.trim())?;
                    match scope {
                        "group" => {
                            security.set_list_flag(flag, true);
                        }
                        "other" => {
                            security.set_other_flag(flag, true);
                        }
                        other => return Err(syntax_error(line_no, format!("unknown security flag scope {other:?}"))),
                    }
                }
                "end" if rest.trim() == "security" => {
                    self.store_security(id, app_name, security)?;
                    return Ok(());
                }
                other => return Err(syntax_error(line_no, format!("unexpected SECURITY command {other:?}"))),
            }
        }
    }

    fn load_security(&self, id: Id, app_name: Option<&str>) -> Result<Security> {
        let entity = self.db.get_entity(id)?;
        let token = entity.lock_read();
        match app_name {
            Some(app) => entity.application_security(&token, app),
            None => entity.security(&token),
        }
    }

    fn store_security(&self, id: Id, app_name: Option<&str>, security: Security) -> Result<()> {
        let entity = self.db.get_entity(id)?;
        let mut token = entity.lock_write();
        match app_name {
            Some(app) => entity.set_application_security(&mut token, app, security),
            None => entity.set_security(&mut token, security),
        }
    }

    /// `FIELDS` state: `<field> = <value>` assignments until `end fields`.
    fn fields_state(&mut self, lines: &mut LineSource, id: Id) -> Result<()> {
        loop {
            let (line_no, line) = lines
                .next_token_line()
                .ok_or_else(|| Error::BadArguments("unexpected end of input inside FIELDS".into()))?;
            if line == "end fields" {
                return Ok(());
            }
            let (field, value_text) = split_on_equals(line).ok_or_else(|| syntax_error(line_no, "expected '<field> = <value>'"))?;
            let value = parse_field_value(value_text);
            self.apply_field(lines, id, line_no, field.trim(), value)?;
        }
    }

    fn apply_field(&mut self, lines: &mut LineSource, id: Id, line_no: usize, field: &str, value: FieldValue<'_>) -> Result<()> {
        let entity = self.db.get_entity(id)?;

        macro_rules! literal {
            () => {
                match value {
                    FieldValue::Literal(s) => s,
                    _ => return Err(syntax_error(line_no, format!("{field} expects a literal or $var value"))),
                }
            };
        }
        macro_rules! id_value {
            () => {
                self.resolve_symbol(line_no, literal!().trim())?
            };
        }

        match field {
            "name" => {
                let mut token = entity.lock_write();
                entity.set_name(&mut token, literal!().trim().to_string())?;
            }
            "note" => {
                let mut token = entity.lock_write();
                entity.set_note(&mut token, literal!().trim().to_string())?;
            }
            "registration_name" => {
                let category = entity.registration_category(&entity.lock_read())?;
                let mut token = entity.lock_write();
                entity.set_registration(&mut token, literal!().trim().to_string(), category)?;
            }
            "registration_category" => {
                let name = entity.registration_name(&entity.lock_read())?;
                let mut token = entity.lock_write();
                entity.set_registration(&mut token, name, literal!().trim().to_string())?;
            }
            "owner" => {
                let owner = id_value!();
                let mut token = entity.lock_write();
                entity.set_owner(&mut token, owner)?;
            }
            "contained_by" => {
                let target = id_value!();
                let mut token = entity.lock_write();
                entity.set_contained_by(&mut token, target)?;
            }
            "linked_programs" => {
                let target = id_value!();
                let mut token = entity.lock_write();
                entity.add_linked_program(&mut token, target)?;
            }
            "action_contained_by" => {
                let target = id_value!();
                let mut token = entity.lock_write();
                entity.set_action_contained_by(&mut token, target)?;
            }
            "action_targets" => {
                let target = id_value!();
                let mut token = entity.lock_write();
                entity.add_action_target(&mut token, target)?;
            }
            "action_commands" => {
                let commands = literal!().split(',').map(|s| s.trim().to_string()).collect();
                let mut token = entity.lock_write();
                entity.set_action_commands(&mut token, commands)?;
            }
            "action_success_message" => {
                let mut token = entity.lock_write();
                entity.set_action_success_message(&mut token, literal!().trim().to_string())?;
            }
            "action_fail_message" => {
                let mut token = entity.lock_write();
                entity.set_action_fail_message(&mut token, literal!().trim().to_string())?;
            }
            "action_lock" => {
                let lock = self.parse_lock(lines, line_no, value)?;
                let mut token = entity.lock_write();
                entity.set_action_lock(&mut token, lock)?;
            }
            "thing_home" => {
                let target = id_value!();
                let mut token = entity.lock_write();
                entity.set_thing_home(&mut token, target)?;
            }
            "thing_lock" => {
                let lock = self.parse_lock(lines, line_no, value)?;
                let mut token = entity.lock_write();
                entity.set_thing_lock(&mut token, lock)?;
            }
            "arrive_message" => {
                let mut token = entity.lock_write();
                entity.set_arrive_message(&mut token, literal!().trim().to_string())?;
            }
            "player_home" => {
                let target = id_value!();
                let mut token = entity.lock_write();
                entity.set_player_home(&mut token, target)?;
            }
            "player_display_name" => {
                let mut token = entity.lock_write();
                entity.set_player_display_name(&mut token, literal!().trim().to_string())?;
            }
            "password" => {
                let site_id = entity.id().site_id();
                let salt = self.db.site_salt(site_id)?;
                let mut token = entity.lock_write();
                entity.set_password(&mut token, &salt, literal!().trim())?;
            }
            "puppet_display_name" => {
                let mut token = entity.lock_write();
                entity.set_puppet_display_name(&mut token, literal!().trim().to_string())?;
            }
            "vehicle_interior" => {
                let target = id_value!();
                let mut token = entity.lock_write();
                entity.set_vehicle_interior(&mut token, target)?;
            }
            "vehicle_controller" => {
                let target = id_value!();
                let mut token = entity.lock_write();
                entity.set_vehicle_controller(&mut token, target)?;
            }
            "program_language" => {
                let mut token = entity.lock_write();
                entity.set_program_language(&mut token, literal!().trim().to_string())?;
            }
            "program_source_code" => {
                let FieldValue::Lines(n) = value else {
                    return Err(syntax_error(line_no, "program_source_code expects 'lines N'"));
                };
                let body = read_document_body(lines, n)?;
                let mut token = entity.lock_write();
                entity.set_program_source_code(&mut token, body)?;
            }
            "program_includes" => {
                let target = id_value!();
                let mut token = entity.lock_write();
                entity.add_program_include(&mut token, target)?;
            }
            "program_reg_name" => {
                let mut token = entity.lock_write();
                entity.set_program_reg_name(&mut token, literal!().trim().to_string())?;
            }
            "group_members" => {
                let target = id_value!();
                let mut token = entity.lock_write();
                entity.add_member(&mut token, target)?;
            }
            other => return Err(syntax_error(line_no, format!("unknown field {other:?}"))),
        }
        Ok(())
    }

    /// `PROPERTIES` state: `security <app> $owner` sub-blocks and
    /// `<type> <path> = <value>` declarations until `end properties`.
    fn properties_state(&mut self, lines: &mut LineSource, id: Id) -> Result<()> {
        loop {
            let (line_no, line) = lines
                .next_token_line()
                .ok_or_else(|| Error::BadArguments("unexpected end of input inside PROPERTIES".into()))?;
            if line == "end properties" {
                return Ok(());
            }
            let (command, rest) = split_first_token(line);
            if command == "security" {
                let (app_name, owner_token) = split_first_token(rest.trim());
                let owner = self.resolve_symbol(line_no, owner_token.trim())?;
                {
                    let entity = self.db.get_entity(id)?;
                    if !entity.application_names(&entity.lock_read())?.iter().any(|n| n == app_name) {
                        let mut token = entity.lock_write();
                        entity.create_application(&mut token, app_name, owner)?;
                    }
                }
                self.security_state(lines, id, Some(app_name))?;
                continue;
            }
            let (head, value_text) = split_on_equals(line).ok_or_else(|| syntax_error(line_no, "expected '<type> <path> = <value>'"))?;
            self.property_decl(lines, id, line_no, head.trim(), value_text)?;
        }
    }

    fn property_decl(&mut self, lines: &mut LineSource, id: Id, line_no: usize, head: &str, value_text: &str) -> Result<()> {
        let mut tokens = head.split_whitespace();
        let type_token = tokens.next().ok_or_else(|| syntax_error(line_no, "missing property type"))?;

        if type_token == "set" {
            let elem_token = tokens.next().ok_or_else(|| syntax_error(line_no, "set requires an element type"))?;
            let path = tokens.next().ok_or_else(|| syntax_error(line_no, "set requires a path"))?;
            let elem_variant = variant_from_token(line_no, elem_token)?;
            let n = parse_count(line_no, value_text, "items")?;
            let items = read_raw_body(lines, n)?;
            let entity = self.db.get_entity(id)?;
            let limits = self.db.limits();
            let mut set = PropertyData::empty_set();
            for item in items {
                let element = PropertyData::set_from_string(elem_variant, &item)?;
                set.set_insert(element, limits)?;
            }
            let mut token = entity.lock_write();
            entity.set_property(&mut token, path, set)?;
            return Ok(());
        }

        let path = tokens.next().ok_or_else(|| syntax_error(line_no, "property declaration requires a path"))?;
        let value = match type_token {
            "string" => PropertyData::String(value_text.trim().to_string()),
            "integer" => PropertyData::Integer(
                value_text.trim().parse().map_err(|_| syntax_error(line_no, format!("not an integer: {value_text}")))?,
            ),
            "float" => PropertyData::Float(
                value_text.trim().parse().map_err(|_| syntax_error(line_no, format!("not a float: {value_text}")))?,
            ),
            "boolean" => PropertyData::set_from_string(Variant::Boolean, value_text.trim())?,
            "id" => PropertyData::Id(self.resolve_symbol(line_no, value_text.trim())?),
            "document" => {
                let n = parse_count(line_no, value_text, "lines")?;
                let body = read_document_body(lines, n)?;
                PropertyData::document_from_str(&body.join("\n"), self.db.limits())?
            }
            other => return Err(syntax_error(line_no, format!("unknown property type {other:?}"))),
        };

        let entity = self.db.get_entity(id)?;
        let mut token = entity.lock_write();
        entity.set_property(&mut token, path, value)?;
        Ok(())
    }

    /// A `LOCK` sub-state entered from a `FIELDS`/property declaration.
    fn parse_lock(&mut self, lines: &mut LineSource, line_no: usize, value: FieldValue<'_>) -> Result<Lock> {
        let negate = matches!(value, FieldValue::LockNegId | FieldValue::LockNegProperty);
        let lock = match value {
            FieldValue::LockId | FieldValue::LockNegId => {
                let (_, var_line) = lines
                    .next_token_line()
                    .ok_or_else(|| Error::BadArguments("unexpected end of input inside LOCK".into()))?;
                let target = self.resolve_symbol(line_no, var_line.trim())?;
                Lock::by_id(target)
            }
            FieldValue::LockProperty | FieldValue::LockNegProperty => {
                let (decl_line_no, decl) = lines
                    .next_token_line()
                    .ok_or_else(|| Error::BadArguments("unexpected end of input inside LOCK".into()))?;
                let (head, value_text) = split_on_equals(decl).ok_or_else(|| syntax_error(decl_line_no, "expected a property declaration"))?;
                let mut tokens = head.trim().split_whitespace();
                let type_token = tokens.next().ok_or_else(|| syntax_error(decl_line_no, "missing property type"))?;
                let path = tokens.next().ok_or_else(|| syntax_error(decl_line_no, "missing property path"))?;
                let variant = variant_from_token(decl_line_no, type_token)?;
                let property_value = if variant == Variant::Id {
                    PropertyData::Id(self.resolve_symbol(decl_line_no, value_text.trim())?)
                } else {
                    PropertyData::set_from_string(variant, value_text.trim())?
                };
                Lock::by_property(path.to_string(), property_value)
            }
            FieldValue::Literal(_) | FieldValue::Lines(_) => {
                return Err(syntax_error(line_no, "expected 'id', '!id', 'property', or '!property'"));
            }
        };

        let (end_line_no, end_line) = lines
            .next_token_line()
            .ok_or_else(|| Error::BadArguments("unexpected end of input inside LOCK".into()))?;
        if end_line != "end lock" {
            return Err(syntax_error(end_line_no, "expected 'end lock'"));
        }

        Ok(if negate { lock.negated() } else { lock })
    }
}

fn parse_flag(line_no: usize, name: &str) -> Result<Flag> {
    match name.to_ascii_lowercase().as_str() {
        "read" => Ok(Flag::Read),
        "write" => Ok(Flag::Write),
        "basic" => Ok(Flag::Basic),
        "chown" => Ok(Flag::Chown),
        other => Err(syntax_error(line_no, format!("unknown security flag {other:?}"))),
    }
}

fn variant_from_token(line_no: usize, token: &str) -> Result<Variant> {
    match token {
        "string" => Ok(Variant::String),
        "integer" => Ok(Variant::Integer),
        "float" => Ok(Variant::Float),
        "boolean" => Ok(Variant::Boolean),
        "id" => Ok(Variant::Id),
        other => Err(syntax_error(line_no, format!("{other:?} cannot be a set element type"))),
    }
}

fn parse_count(line_no: usize, value_text: &str, keyword: &str) -> Result<usize> {
    let mut tokens = value_text.trim().split_whitespace();
    let head = tokens.next().ok_or_else(|| syntax_error(line_no, format!("expected '{keyword} N'")))?;
    if head != keyword {
        return Err(syntax_error(line_no, format!("expected '{keyword} N', got {head:?}")));
    }
    tokens
        .next()
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| syntax_error(line_no, format!("expected a count after '{keyword}'")))
}

/// Read `n` lines verbatim for a `Document` body, honoring an early
/// `.end` short-circuit, then consume the trailing `end lines` marker.
fn read_document_body(lines: &mut LineSource, n: usize) -> Result<Vec<String>> {
    let body = read_raw_body(lines, n)?;
    let (line_no, end) = lines
        .next_raw_line()
        .ok_or_else(|| Error::BadArguments("unexpected end of input before 'end lines'".into()))?;
    if end.trim() != "end lines" {
        return Err(syntax_error(line_no, "expected 'end lines'"));
    }
    Ok(body)
}

/// Shared by `Document` (`end lines`) and `Set` (`end items`) bodies: read
/// up to `n` verbatim lines, stopping early on a bare `.end` line.
fn read_raw_body(lines: &mut LineSource, n: usize) -> Result<Vec<String>> {
    let mut body = Vec::with_capacity(n);
    for _ in 0..n {
        let (_, line) = lines
            .next_raw_line()
            .ok_or_else(|| Error::BadArguments("unexpected end of input inside a document/set body".into()))?;
        if line == ".end" {
            break;
        }
        body.push(line.to_string());
    }
    Ok(body)
}

fn parse_field_value(value_text: &str) -> FieldValue<'_> {
    let trimmed = value_text.trim();
    match trimmed {
        "id" => FieldValue::LockId,
        "!id" => FieldValue::LockNegId,
        "property" => FieldValue::LockProperty,
        "!property" => FieldValue::LockNegProperty,
        _ if trimmed.starts_with("lines ") => {
            trimmed[6..].trim().parse().map(FieldValue::Lines).unwrap_or(FieldValue::Literal(value_text))
        }
        _ => FieldValue::Literal(value_text),
    }
}

fn split_first_token(line: &str) -> (&str, &str) {
    match line.find(char::is_whitespace) {
        Some(idx) => (&line[..idx], line[idx..].trim_start()),
        None => (line, ""),
    }
}

/// Splits `"<head> = <value>"` on the first standalone `=`, trimming
/// whitespace from the head.
fn split_on_equals(line: &str) -> Option<(&str, &str)> {
    let idx = line.find('=')?;
    Some((line[..idx].trim_end(), line[idx + 1..].trim_start()))
}

fn syntax_error(line_no: usize, message: impl Into<String>) -> Error {
    Error::BadArguments(format!("dump line {line_no}: {}", message.into()))
}

/// Tokenized line iterator over dump text: `next_token_line` skips blank
/// lines and `#`-comments; `next_raw_line` does not, since `Document`/`Set`
/// bodies are read verbatim.
struct LineSource<'a> {
    lines: std::str::Lines<'a>,
    line_no: usize,
}

impl<'a> LineSource<'a> {
    fn new(text: &'a str) -> Self {
        LineSource { lines: text.lines(), line_no: 0 }
    }

    fn next_raw_line(&mut self) -> Option<(usize, &'a str)> {
        let line = self.lines.next()?;
        self.line_no += 1;
        Some((self.line_no, line))
    }

    fn next_token_line(&mut self) -> Option<(usize, &'a str)> {
        loop {
            let (line_no, line) = self.next_raw_line()?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            return Some((line_no, trimmed));
        }
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
    fn imports_a_site_with_one_extra_player() {
        let (_dir, db) = open();
        let text = "\
MUTGOS DUMP VERSION 1
# a minimal site
mksite Test Realm
mkentity player $alice
name Alice
owner $alice
flag wizard
end entity
end site
MUTGOS DUMP END
";
        let outcome = import(&db, text).unwrap();
        assert_eq!(outcome.sites_created.len(), 1);
        assert_eq!(outcome.entities_created, 1);

        let site_id = outcome.sites_created[0];
        let alice_id = Id::new(site_id, 5);
        let alice = db.get_entity(alice_id).unwrap();
        let token = alice.lock_read();
        assert_eq!(alice.name(&token).unwrap(), "Alice");
        assert_eq!(alice.owner(&token).unwrap(), alice_id);
        assert!(alice.has_flag(&token, "wizard").unwrap());
    }

    #[test]
    fn imports_fields_properties_and_security() {
        let (_dir, db) = open();
        let text = "\
MUTGOS DUMP VERSION 1
mksite Test Realm
mkentity player $bob
name Bob
fields
player_display_name = Bob the Builder
end fields
properties
security mush $bob
flag other read
end security
string mush/greeting = hello there
integer mush/count = 3
end properties
end entity
end site
MUTGOS DUMP END
";
        let outcome = import(&db, text).unwrap();
        let site_id = outcome.sites_created[0];
        let bob_id = Id::new(site_id, 5);
        let bob = db.get_entity(bob_id).unwrap();
        let token = bob.lock_read();
        assert_eq!(bob.player_display_name(&token).unwrap(), "Bob the Builder");
        assert_eq!(bob.get_property(&token, "mush/greeting").unwrap(), Some(PropertyData::String("hello there".into())));
        assert_eq!(bob.get_property(&token, "mush/count").unwrap(), Some(PropertyData::Integer(3)));
        let security = bob.application_security(&token, "mush").unwrap();
        assert!(security.get_other_flag(Flag::Read));
    }

    #[test]
    fn unbound_symbol_is_a_hard_error_and_rolls_back() {
        let (_dir, db) = open();
        let text = "\
MUTGOS DUMP VERSION 1
mksite Test Realm
mkentity player $carl
owner $nobody
end entity
end site
MUTGOS DUMP END
";
        let before = db.all_site_ids();
        assert!(import(&db, text).is_err());
        // The site itself was already created before the failing entity;
        // only the half-built entity is rolled back.
        assert_eq!(db.all_site_ids().len(), before.len() + 1);
    }

    #[test]
    fn document_and_set_bodies_round_trip() {
        let (_dir, db) = open();
        let text = "\
MUTGOS DUMP VERSION 1
mksite Test Realm
mkentity thing $rock
name Rock
properties
document mush/desc = lines 2
A heavy rock.
It does not move.
end lines
set integer mush/sizes = items 3
1
2
3
end items
end properties
end entity
end site
MUTGOS DUMP END
";
        let outcome = import(&db, text).unwrap();
        let site_id = outcome.sites_created[0];
        let rock_id = Id::new(site_id, 5);
        let rock = db.get_entity(rock_id).unwrap();
        let token = rock.lock_read();
        assert_eq!(
            rock.get_property(&token, "mush/desc").unwrap(),
            Some(PropertyData::Document(vec!["A heavy rock.".into(), "It does not move.".into()]))
        );
        let PropertyData::Set(items) = rock.get_property(&token, "mush/sizes").unwrap().unwrap() else {
            panic!("expected a set");
        };
        assert_eq!(items.len(), 3);
    }

    #[test]
    fn action_lock_by_id_round_trips() {
        let (_dir, db) = open();
        let text = "\
MUTGOS DUMP VERSION 1
mksite Test Realm
mkentity player $alice
name Alice
end entity
mkentity exit $north
name North
fields
action_lock = id
$alice
end lock
end fields
end entity
end site
MUTGOS DUMP END
";
        let outcome = import(&db, text).unwrap();
        let site_id = outcome.sites_created[0];
        let alice_id = Id::new(site_id, 5);
        let north_id = Id::new(site_id, 6);
        let exit = db.get_entity(north_id).unwrap();
        let token = exit.lock_read();
        let lock = exit.action_lock(&token).unwrap();
        assert_eq!(lock, Lock::by_id(alice_id));
    }
}
