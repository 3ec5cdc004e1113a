//! Name-resolution pipeline: turning user-typed search strings into entity
//! ids.
//!
//! The online players list, sessions, and the command parser that calls
//! this are external collaborators, so this module never maintains session
//! state itself — callers pass in whatever "currently online" set they
//! track.

use crate::database_access::DatabaseAccess;
use crate::entity::core::EntityType;
use crate::error::Result;
use crate::id::Id;

/// What kind of thing a name search is looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Player,
    /// Entities in general (nouns) — contents of the environment are
    /// searched, not just actions.
    Entity,
    /// Verbs/aliases attached to actions and exits.
    Action,
}

/// The result of a name search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    Found(Id),
    NotFound,
    /// Two or more candidates tied at the same match quality.
    Ambiguous,
}

/// Resolve `search` against the environment of `requester`. `exact` controls
/// whether entity-name comparisons (not alias comparisons, which are always
/// exact) accept a substring match. `online_players` is the caller-maintained
/// set of ids currently logged in — needed for the player partial-match
/// step, since session tracking is out of scope for this crate.
pub fn match_name_to_id(
    db: &DatabaseAccess,
    requester: Id,
    search: &str,
    exact: bool,
    kind: MatchKind,
    online_players: &[Id],
) -> Result<MatchOutcome> {
    if search.eq_ignore_ascii_case("me") {
        return Ok(MatchOutcome::Found(requester));
    }
    if search.eq_ignore_ascii_case("here") {
        let here = requester_container(db, requester)?;
        return Ok(match here {
            Some(id) => MatchOutcome::Found(id),
            None => MatchOutcome::NotFound,
        });
    }

    match kind {
        MatchKind::Player => match_player(db, requester, search, online_players),
        MatchKind::Entity | MatchKind::Action => match_environment(db, requester, search, exact, kind),
    }
}

fn requester_container(db: &DatabaseAccess, requester: Id) -> Result<Option<Id>> {
    let entity = match db.get_entity(requester) {
        Ok(e) => e,
        Err(_) => return Ok(None),
    };
    let token = entity.lock_read();
    Ok(entity.contained_by(&token).ok())
}

/// Exact case-insensitive site match, then a unique partial/exact match
/// among currently online players, then a final exact-match database
/// lookup.
fn match_player(db: &DatabaseAccess, requester: Id, search: &str, online_players: &[Id]) -> Result<MatchOutcome> {
    let site_id = requester.site_id();

    if let Some(outcome) = exact_player_lookup(db, site_id, search)? {
        return Ok(outcome);
    }

    let mut best: Option<Id> = None;
    let mut ambiguous = false;
    for &candidate in online_players {
        if candidate.site_id() != site_id {
            continue;
        }
        let entity = match db.get_entity(candidate) {
            Ok(e) => e,
            Err(_) => continue,
        };
        let token = entity.lock_read();
        let name = match entity.name(&token) {
            Ok(n) => n,
            Err(_) => continue,
        };
        let matches = name.eq_ignore_ascii_case(search) || name.to_ascii_lowercase().contains(&search.to_ascii_lowercase());
        if matches {
            match best {
                None => best = Some(candidate),
                Some(existing) if existing != candidate => ambiguous = true,
                _ => {}
            }
        }
    }
    if let Some(id) = best {
        return Ok(if ambiguous { MatchOutcome::Ambiguous } else { MatchOutcome::Found(id) });
    }

    match exact_player_lookup(db, site_id, search)? {
        Some(outcome) => Ok(outcome),
        None => Ok(MatchOutcome::NotFound),
    }
}

fn exact_player_lookup(db: &DatabaseAccess, site_id: u32, search: &str) -> Result<Option<MatchOutcome>> {
    let candidates = db.find(site_id, Some(EntityType::Player), "", false)?;
    let mut found: Option<Id> = None;
    for candidate in candidates {
        let entity = match db.get_entity(candidate) {
            Ok(e) => e,
            Err(_) => continue,
        };
        let token = entity.lock_read();
        if entity.name(&token).map(|n| n.eq_ignore_ascii_case(search)).unwrap_or(false) {
            found = Some(candidate);
            break;
        }
    }
    Ok(found.map(MatchOutcome::Found))
}

/// Walk inventory, then current room, then the enclosing region chain,
/// checking action aliases first (exact only) and then entity names (exact,
/// or exact-or-partial for `MatchKind::Entity` depending on `exact`).
fn match_environment(db: &DatabaseAccess, requester: Id, search: &str, exact: bool, kind: MatchKind) -> Result<MatchOutcome> {
    let mut scopes = Vec::new();
    scopes.push(requester);
    if let Some(room) = requester_container(db, requester)? {
        let mut current = room;
        let mut depth = 0;
        loop {
            scopes.push(current);
            depth += 1;
            if depth > db.limits().max_contained_by_depth {
                break;
            }
            let entity = match db.get_entity(current) {
                Ok(e) => e,
                Err(_) => break,
            };
            let token = entity.lock_read();
            match entity.contained_by(&token) {
                Ok(parent) if !parent.is_default() && parent != current => current = parent,
                _ => break,
            }
        }
    }

    let mut exact_best: Option<Id> = None;
    let mut exact_ambiguous = false;
    let mut partial_best: Option<Id> = None;
    let mut partial_ambiguous = false;

    'scopes: for scope in scopes {
        let contents = db.contents_of(scope).unwrap_or_default();

        for &candidate in &contents {
            let entity = match db.get_entity(candidate) {
                Ok(e) => e,
                Err(_) => continue,
            };
            let token = entity.lock_read();
            let entity_type = entity.entity_type(&token)?;

            if matches!(entity_type, EntityType::Action | EntityType::Exit) {
                if let Ok(commands) = entity.action_commands(&token) {
                    if commands.iter().any(|alias| alias.eq_ignore_ascii_case(search)) {
                        record(&mut exact_best, &mut exact_ambiguous, candidate);
                        continue;
                    }
                }
            }

            if kind == MatchKind::Entity {
                if let Ok(name) = entity.name(&token) {
                    if name.eq_ignore_ascii_case(search) {
                        record(&mut exact_best, &mut exact_ambiguous, candidate);
                    } else if !exact && name.to_ascii_lowercase().contains(&search.to_ascii_lowercase()) {
                        record(&mut partial_best, &mut partial_ambiguous, candidate);
                    }
                }
            }
        }

        if exact_best.is_some() {
            break 'scopes;
        }
    }

    if let Some(id) = exact_best {
        return Ok(if exact_ambiguous { MatchOutcome::Ambiguous } else { MatchOutcome::Found(id) });
    }
    if let Some(id) = partial_best {
        return Ok(if partial_ambiguous { MatchOutcome::Ambiguous } else { MatchOutcome::Found(id) });
    }
    Ok(MatchOutcome::NotFound)
}

fn record(best: &mut Option<Id>, ambiguous: &mut bool, candidate: Id) {
    match *best {
        None => *best = Some(candidate),
        Some(existing) if existing != candidate => *ambiguous = true,
        _ => {}
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
    fn me_and_here_resolve_without_a_database_search() {
        let (_dir, db) = open();
        let site = db.new_site("Test").unwrap();
        let player = db.get_entity(Id::new(site, 2)).unwrap().id();
        let room = db.get_entity(Id::new(site, 3)).unwrap().id();
        {
            let entity = db.get_entity(player).unwrap();
            let mut token = entity.lock_write();
            entity.set_contained_by(&mut token, room).unwrap();
        }
        assert_eq!(
            match_name_to_id(&db, player, "me", false, MatchKind::Entity, &[]).unwrap(),
            MatchOutcome::Found(player)
        );
        assert_eq!(
            match_name_to_id(&db, player, "here", false, MatchKind::Entity, &[]).unwrap(),
            MatchOutcome::Found(room)
        );
    }

    #[test]
    fn action_alias_is_exact_only_and_beats_later_scopes() {
        let (_dir, db) = open();
        let site = db.new_site("Test").unwrap();
        let owner = db.get_entity(Id::new(site, 2)).unwrap().id();
        let room = db.get_entity(Id::new(site, 3)).unwrap().id();

        let exit = db.new_entity(EntityType::Exit, site, owner, "Exit to north").unwrap();
        {
            let mut token = exit.lock_write();
            exit.set_action_contained_by(&mut token, room).unwrap();
            exit.set_action_commands(&mut token, vec!["go".into(), "move".into()]).unwrap();
        }

        let outcome = match_name_to_id(&db, owner, "go", false, MatchKind::Action, &[]).unwrap();
        assert_eq!(outcome, MatchOutcome::Found(exit.id()));

        let outcome = match_name_to_id(&db, owner, "exit", false, MatchKind::Entity, &[]).unwrap();
        assert_eq!(outcome, MatchOutcome::Found(exit.id()));
    }

    #[test]
    fn two_actions_with_the_same_alias_are_ambiguous() {
        let (_dir, db) = open();
        let site = db.new_site("Test").unwrap();
        let owner = db.get_entity(Id::new(site, 2)).unwrap().id();
        let room = db.get_entity(Id::new(site, 3)).unwrap().id();

        for _ in 0..2 {
            let exit = db.new_entity(EntityType::Exit, site, owner, "An exit").unwrap();
            let mut token = exit.lock_write();
            exit.set_action_contained_by(&mut token, room).unwrap();
            exit.set_action_commands(&mut token, vec!["go".into()]).unwrap();
        }

        let outcome = match_name_to_id(&db, owner, "go", false, MatchKind::Action, &[]).unwrap();
        assert_eq!(outcome, MatchOutcome::Ambiguous);
    }

    #[test]
    fn player_exact_name_match_is_case_insensitive() {
        let (_dir, db) = open();
        let site = db.new_site("Test").unwrap();
        let owner = db.get_entity(Id::new(site, 2)).unwrap().id();
        let alice = db.new_entity(EntityType::Player, site, owner, "Alice").unwrap();

        let outcome = match_name_to_id(&db, alice.id(), "ALICE", false, MatchKind::Player, &[]).unwrap();
        assert_eq!(outcome, MatchOutcome::Found(alice.id()));
    }
}
