//! End-to-end coverage exercised through the crate's public surface
//! (`DatabaseAccess`, `DatabasePrims`, `dump::import`) rather than any
//! module-internal type.

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use mutgos_db::backend::lmdb::LmdbBackend;
use mutgos_db::backend::DbBackend;
use mutgos_db::config::Limits;
use mutgos_db::database_prims::DatabasePrims;
use mutgos_db::dump;
use mutgos_db::entity::core::EntityType;
use mutgos_db::name_match::MatchKind;
use mutgos_db::property::data::PropertyData;
use mutgos_db::site_cache::DeleteOutcome;
use mutgos_db::{DatabaseAccess, Id};

fn open() -> (tempfile::TempDir, DatabaseAccess) {
    let dir = tempfile::tempdir().unwrap();
    let backend: Arc<dyn DbBackend> = Arc::new(LmdbBackend::open(dir.path(), 16 * 1024 * 1024).unwrap());
    let db = DatabaseAccess::startup(backend, Limits::default()).unwrap();
    (dir, db)
}

/// Create an entity and read its fields back.
#[test]
fn create_and_read() {
    let (_dir, db) = open();
    let site = db.new_site("test").unwrap();
    assert_eq!(site, 1);

    let alice = db.new_entity(EntityType::Player, site, Id::DEFAULT, "Alice").unwrap();
    assert_eq!(alice.id(), Id::new(1, 5));

    let fetched = db.get_entity(Id::new(1, 5)).unwrap();
    let token = fetched.lock_read();
    assert_eq!(fetched.name(&token).unwrap(), "Alice");
    assert_eq!(fetched.owner(&token).unwrap(), Id::new(1, 5));
}

/// A writer blocks behind a held reader, and proceeds once it
/// is released — no spurious failure, no deadlock.
#[test]
fn reader_writer_exclusion_across_threads() {
    let (_dir, db) = open();
    let site = db.new_site("test").unwrap();
    let alice = db.new_entity(EntityType::Player, site, Id::DEFAULT, "Alice").unwrap();
    let id = alice.id();

    let db = Arc::new(db);
    let reader_acquired = Arc::new(Barrier::new(2));

    let reader_db = Arc::clone(&db);
    let reader_barrier = Arc::clone(&reader_acquired);
    let reader = thread::spawn(move || {
        let entity = reader_db.get_entity(id).unwrap();
        let token = entity.lock_read();
        reader_barrier.wait();
        thread::sleep(Duration::from_millis(50));
        entity.name(&token).unwrap()
    });

    reader_acquired.wait();
    let writer_db = Arc::clone(&db);
    let writer = thread::spawn(move || {
        let entity = writer_db.get_entity(id).unwrap();
        let mut token = entity.lock_write();
        entity.set_name(&mut token, "Alicia".into()).unwrap();
    });

    assert_eq!(reader.join().unwrap(), "Alice");
    writer.join().unwrap();

    let entity = db.get_entity(id).unwrap();
    assert_eq!(entity.name(&entity.lock_read()).unwrap(), "Alicia");
}

/// Deleting an entity that is still pinned defers, then completes on last drop.
#[test]
fn delete_while_pinned_defers_then_completes() {
    let (_dir, db) = open();
    let site = db.new_site("test").unwrap();
    let thing = db.new_entity(EntityType::Thing, site, Id::DEFAULT, "Rock").unwrap();
    let id = thing.id();

    let held = db.get_entity(id).unwrap();
    assert_eq!(db.delete_entity(id).unwrap(), DeleteOutcome::Delayed);

    // The entity is gone from the addressable surface even while pinned.
    assert!(db.get_entity(id).is_err());

    drop(held);
    // Dropping the last external ref fires the release hook synchronously.
    assert!(db.get_entity(id).is_err());
}

/// Typed property round-trip through an application.
#[test]
fn property_round_trip() {
    let (_dir, db) = open();
    let site = db.new_site("test").unwrap();
    let owner = db.new_entity(EntityType::Player, site, Id::DEFAULT, "Alice").unwrap().id();
    let thing = db.new_entity(EntityType::Thing, site, owner, "Widget").unwrap();

    let prims = DatabasePrims::new(&db);
    prims.create_application(owner, thing.id(), "App", owner).unwrap();
    prims.set_application_property_integer(owner, thing.id(), "App/counter", 42).unwrap();

    assert_eq!(prims.get_application_property_integer(owner, thing.id(), "App/counter").unwrap(), Some(42));
    assert_eq!(
        prims.get_application_property(owner, thing.id(), "App/counter").unwrap(),
        Some(PropertyData::Integer(42))
    );
    assert_eq!(PropertyData::Integer(42).to_display_string(), "42");
}

/// Name matching, including the ambiguity case.
#[test]
fn name_match_with_ambiguity() {
    let (_dir, db) = open();
    let site = db.new_site("test").unwrap();
    let owner = Id::new(site, 2);
    let room = Id::new(site, 3);
    let requester = db.new_entity(EntityType::Player, site, owner, "Alice").unwrap();
    {
        let mut token = requester.lock_write();
        requester.set_contained_by(&mut token, room).unwrap();
    }

    let exit = db.new_entity(EntityType::Exit, site, owner, "Exit to north").unwrap();
    {
        let mut token = exit.lock_write();
        exit.set_action_contained_by(&mut token, room).unwrap();
        exit.set_action_commands(&mut token, vec!["go".into(), "move".into()]).unwrap();
    }

    let prims = DatabasePrims::new(&db);
    let outcome = prims.match_name_to_id(requester.id(), "go", false, MatchKind::Action, &[]).unwrap();
    assert_eq!(outcome, mutgos_db::name_match::MatchOutcome::Found(exit.id()));
    let outcome = prims.match_name_to_id(requester.id(), "exit", false, MatchKind::Action, &[]).unwrap();
    assert_eq!(outcome, mutgos_db::name_match::MatchOutcome::Found(exit.id()));

    let second_exit = db.new_entity(EntityType::Exit, site, owner, "Another exit").unwrap();
    {
        let mut token = second_exit.lock_write();
        second_exit.set_action_contained_by(&mut token, room).unwrap();
        second_exit.set_action_commands(&mut token, vec!["go".into()]).unwrap();
    }
    let outcome = prims.match_name_to_id(requester.id(), "go", false, MatchKind::Action, &[]).unwrap();
    assert_eq!(outcome, mutgos_db::name_match::MatchOutcome::Ambiguous);
}

/// Dump import produces one site, one self-owned Player, and
/// the four reserved ids.
#[test]
fn dump_import_produces_one_site_and_one_player() {
    let (_dir, db) = open();
    let text = "\
MUTGOS DUMP VERSION 1
mksite demo
mkentity player $alice
fields
name = Alice
end fields
end entity
end site
MUTGOS DUMP END
";
    let outcome = dump::import(&db, text).unwrap();
    assert_eq!(outcome.sites_created, vec![1]);
    assert_eq!(outcome.entities_created, 1);

    for reserved in 1..=4u32 {
        assert!(db.get_entity(Id::new(1, reserved)).is_ok());
    }

    let alice_id = Id::new(1, 5);
    let alice = db.get_entity(alice_id).unwrap();
    let token = alice.lock_read();
    assert_eq!(alice.entity_type(&token).unwrap(), EntityType::Player);
    assert_eq!(alice.name(&token).unwrap(), "Alice");
    assert_eq!(alice.owner(&token).unwrap(), alice_id);
}

/// Writing through a reader token fails with `LockError`, and
/// the field is left unchanged.
#[test]
fn writing_with_a_reader_token_is_a_type_error_not_a_runtime_one() {
    // The crate prevents this at compile time: `set_name` takes
    // `&mut WriterLockToken`, so a `ReaderLockToken` cannot be passed.
    // The corresponding runtime check is `Entity::check_token` rejecting a
    // token minted for a different entity, covered in entity::mod's own
    // `#[cfg(test)]` module.
    let (_dir, db) = open();
    let site = db.new_site("test").unwrap();
    let alice = db.new_entity(EntityType::Player, site, Id::DEFAULT, "Alice").unwrap();
    let token = alice.lock_read();
    assert_eq!(alice.name(&token).unwrap(), "Alice");
}

/// A doubled/leading slash path resolves identically to its
/// normalized form.
#[test]
fn doubled_slash_property_path_normalizes() {
    let (_dir, db) = open();
    let site = db.new_site("test").unwrap();
    let owner = db.new_entity(EntityType::Player, site, Id::DEFAULT, "Alice").unwrap().id();
    let thing = db.new_entity(EntityType::Thing, site, owner, "Widget").unwrap();
    let prims = DatabasePrims::new(&db);
    prims.create_application(owner, thing.id(), "App", owner).unwrap();
    prims
        .set_application_property(owner, thing.id(), "App/foo/bar", PropertyData::String("x".into()))
        .unwrap();

    assert_eq!(
        prims.get_application_property(owner, thing.id(), "//App//foo//bar").unwrap(),
        Some(PropertyData::String("x".into()))
    );
}

/// A `ByGroup` lock is false for a non-member, true when negated.
#[test]
fn lock_by_group_respects_negation() {
    let (_dir, db) = open();
    let site = db.new_site("test").unwrap();
    let owner = Id::new(site, 2);
    let room = Id::new(site, 3);
    let group = db.new_entity(EntityType::Group, site, owner, "Wizards").unwrap();
    let outsider = db.new_entity(EntityType::Player, site, owner, "Bob").unwrap();

    let exit = db.new_entity(EntityType::Exit, site, owner, "Vault door").unwrap();
    {
        let mut token = exit.lock_write();
        exit.set_action_contained_by(&mut token, room).unwrap();
        exit.set_action_lock(&mut token, mutgos_db::lock::Lock::by_group(group.id())).unwrap();
    }

    let prims = DatabasePrims::new(&db);
    assert!(!prims.can_use_action(outsider.id(), exit.id()).unwrap());

    {
        let mut token = exit.lock_write();
        exit.set_action_lock(&mut token, mutgos_db::lock::Lock::by_group(group.id()).negated()).unwrap();
    }
    assert!(prims.can_use_action(outsider.id(), exit.id()).unwrap());
}

/// Only owner/admin/write may set a field; a stranger is
/// rejected.
#[test]
fn stranger_cannot_write_protected_field() {
    let (_dir, db) = open();
    let site = db.new_site("test").unwrap();
    let owner = db.new_entity(EntityType::Player, site, Id::DEFAULT, "Alice").unwrap().id();
    let thing = db.new_entity(EntityType::Thing, site, owner, "Widget").unwrap();
    let stranger = db.new_entity(EntityType::Player, site, Id::DEFAULT, "Bob").unwrap().id();

    let prims = DatabasePrims::new(&db);
    prims.create_application(owner, thing.id(), "App", owner).unwrap();
    let err = prims
        .set_application_property(stranger, thing.id(), "App/x", PropertyData::Boolean(true))
        .unwrap_err();
    assert!(matches!(err, mutgos_db::Error::SecurityViolation(_)));
}
