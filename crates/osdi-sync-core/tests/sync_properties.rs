//! Engine-wide guarantees: one link per record, stable mappings, failures
//! that stay with their record, and runs that never overlap.

use chrono::{Duration, Utc};
use osdi_sync_core::entities::person::PersonMapper;
use osdi_sync_core::model::{Contact, EntityKind, RemotePerson, ResourceType, SyncObject};
use osdi_sync_core::storage::{format_ts, Database, HorizonMark, LockName, ProcessLock, Settings};
use osdi_sync_core::store::{LocalCrm, MemoryRemote, ObjectStore, RemoteSystem, WriteContext};
use osdi_sync_core::sync::{
    BatchSyncer, Mapper, ProcessProbe, Registry, SyncContext, SyncState, SyncStateRepository,
};
use osdi_sync_core::{DatabaseError, SyncOrigin};
use proptest::prelude::*;
use std::rc::Rc;

// ============================================================================
// Test Helpers
// ============================================================================

struct Harness {
    remote: Rc<MemoryRemote>,
    ctx: SyncContext,
}

impl Harness {
    fn new() -> Self {
        let remote = Rc::new(MemoryRemote::new());
        let system: Rc<dyn RemoteSystem> = remote.clone();
        let ctx = SyncContext::new(Rc::new(Database::open_memory().unwrap()), system, 1);
        Self { remote, ctx }
    }

    fn crm(&self) -> &LocalCrm {
        &self.ctx.local
    }

    fn settings(&self) -> Settings {
        Settings::new(Rc::clone(&self.ctx.db))
    }

    fn people_batch(&self) -> BatchSyncer {
        let people = Registry::standard().build(EntityKind::Person, &self.ctx).unwrap();
        BatchSyncer::new(self.settings(), vec![people])
    }

    fn save_contact(&self, first: &str, last: &str, email: &str) -> Contact {
        let mut contact = Contact::new(first, last, email);
        self.crm().save(&mut contact, &WriteContext::user()).unwrap();
        contact
    }
}

/// Probe with a fixed pid that reports every other process as dead.
struct LonelyProbe;

impl ProcessProbe for LonelyProbe {
    fn current_pid(&self) -> u32 {
        4242
    }

    fn is_alive(&self, pid: u32) -> bool {
        pid == 4242
    }
}

fn link(local: &str, remote: &str) -> SyncState {
    let mut state = SyncState::new(EntityKind::Person, 1);
    state.local_id = Some(local.into());
    state.remote_id = Some(remote.into());
    state
}

// ============================================================================
// One link per record
// ============================================================================

#[test]
fn test_each_id_links_at_most_once() {
    let repo = SyncStateRepository::new(Rc::new(Database::open_memory().unwrap()));
    repo.save(&mut link("1", "a")).unwrap();

    assert!(matches!(repo.save(&mut link("1", "b")), Err(DatabaseError::Conflict(_))));
    assert!(matches!(repo.save(&mut link("2", "a")), Err(DatabaseError::Conflict(_))));
    assert_eq!(repo.count(EntityKind::Person, 1).unwrap(), 1);

    // The same ids are free in another entity type and another profile.
    let mut tag = SyncState::new(EntityKind::Tag, 1);
    tag.local_id = Some("1".into());
    tag.remote_id = Some("a".into());
    repo.save(&mut tag).unwrap();
    let mut other_profile = link("1", "a");
    other_profile.sync_profile_id = 2;
    repo.save(&mut other_profile).unwrap();
}

#[test]
fn test_remote_already_linked_elsewhere_is_not_relinked() {
    let h = Harness::new();
    let people = Registry::standard().build(EntityKind::Person, &h.ctx).unwrap();
    let first = h.save_contact("Fizz", "Bang", "a@x.com");
    let linked = people.sync_local_id(first.id().unwrap()).unwrap();

    // A second contact with the same address matches the same remote person.
    let second = h.save_contact("Fizz", "Bang", "a@x.com");
    let report = people.sync_local_id(second.id().unwrap()).unwrap();

    assert!(report.is_error());
    assert_eq!(report.message, "error finding match");
    assert_eq!(h.ctx.states().count(EntityKind::Person, 1).unwrap(), 1);
    let state = h
        .ctx
        .states()
        .find_for_remote(EntityKind::Person, linked.remote_id.as_deref().unwrap(), 1)
        .unwrap()
        .unwrap();
    assert_eq!(state.local_id.as_deref(), first.id());
}

// ============================================================================
// Mapping stability
// ============================================================================

fn name() -> impl Strategy<Value = String> {
    "[A-Z][a-z]{0,8}( [A-Z][a-z]{0,8})?"
}

fn optional_text() -> impl Strategy<Value = Option<String>> {
    proptest::option::of("[A-Za-z0-9][A-Za-z0-9 ]{0,12}[A-Za-z0-9]")
}

fn contact_strategy() -> impl Strategy<Value = Contact> {
    (
        (name(), name(), "[a-z]{1,8}@[a-z]{1,8}\\.org"),
        proptest::option::of("\\+?[0-9]{3}[ -]?[0-9]{3}[ -]?[0-9]{4}"),
        (optional_text(), optional_text(), optional_text()),
        (any::<bool>(), any::<bool>()),
    )
        .prop_map(|((first, last, email), phone, (street, city, country), (opt_out, no_email))| {
            let mut contact = Contact::new(&first, &last, &email);
            contact.set_id("1".into());
            contact.phone.set(phone);
            contact.street_address.set(street);
            contact.city.set(city);
            contact.country.set(country);
            contact.is_opt_out.set(opt_out);
            contact.do_not_email.set(no_email);
            contact.mark_saved();
            contact
        })
}

proptest! {
    #[test]
    fn test_person_mapping_round_trip_changes_nothing(contact in contact_strategy()) {
        let mut person = RemotePerson::default();
        PersonMapper.map_local_to_remote(&contact, &mut person).unwrap();
        person.set_id("p-1".into());
        person.mark_saved();

        let mut back = contact.clone();
        PersonMapper.map_remote_to_local(&person, &mut back).unwrap();
        prop_assert!(!back.is_altered(), "round trip altered {:?}", back.altered_fields());

        PersonMapper.map_local_to_remote(&contact, &mut person).unwrap();
        prop_assert!(!person.is_altered(), "second mapping altered {:?}", person.altered_fields());
    }
}

#[test]
fn test_unchanged_mapping_writes_nothing() {
    let h = Harness::new();
    for n in 0..3 {
        h.save_contact("Fizz", &format!("Bang{n}"), &format!("f{n}@x.com"));
    }
    let batch = h.people_batch();
    assert_eq!(batch.batch_sync_from_local().unwrap(), Some(3));
    let writes = h.remote.write_count();

    // Pulling the freshly written people back finds nothing to change.
    h.settings()
        .reset_horizon(EntityKind::Person, SyncOrigin::Remote)
        .unwrap();
    batch.batch_sync_from_remote().unwrap();
    assert_eq!(h.remote.write_count(), writes);
    let contacts: Vec<Contact> = h.crm().find(&[]).unwrap();
    assert_eq!(contacts.len(), 3);
}

// ============================================================================
// Error isolation
// ============================================================================

#[test]
fn test_one_failing_record_does_not_stop_the_batch() {
    let h = Harness::new();
    h.save_contact("Ada", "Lovelace", "ada@x.com");
    let boom = h.save_contact("Boom", "Boom", "boom@x.com");
    h.save_contact("Grace", "Hopper", "grace@x.com");
    h.remote.fail_when_filtered_by("boom@x.com");

    let batch = h.people_batch();
    assert_eq!(batch.batch_sync_from_local().unwrap(), Some(2));

    let people = h.remote.documents(ResourceType::People);
    assert_eq!(people.len(), 2);
    assert!(people.iter().all(|p| p["email_address"] != "boom@x.com"));
    assert!(h
        .ctx
        .states()
        .find_for_local(EntityKind::Person, boom.id().unwrap(), 1)
        .unwrap()
        .is_none());

    // The horizon stays behind the failure, so the record comes up again.
    let mark = h.settings().horizon(EntityKind::Person, SyncOrigin::Local).unwrap();
    assert!(mark.latest_synced < boom.modified_date());
    assert_eq!(batch.batch_sync_from_local().unwrap(), Some(2));
    assert_eq!(h.remote.documents(ResourceType::People).len(), 2);
}

#[test]
fn test_unlistable_entity_keeps_its_horizon() {
    let h = Harness::new();
    let mark = HorizonMark {
        last_run_started: Some(Utc::now()),
        latest_synced: None,
    };
    h.settings()
        .set_horizon(EntityKind::Person, SyncOrigin::Remote, &mark)
        .unwrap();
    let cutoff = mark.horizon(Duration::seconds(30)).unwrap();
    h.remote.fail_when_filtered_by(&format_ts(cutoff));

    assert_eq!(h.people_batch().batch_sync_from_remote().unwrap(), Some(0));
    assert_eq!(
        h.settings().horizon(EntityKind::Person, SyncOrigin::Remote).unwrap(),
        mark
    );
}

// ============================================================================
// Concurrency guard
// ============================================================================

#[test]
fn test_live_lock_holder_blocks_batch() {
    let h = Harness::new();
    h.save_contact("Fizz", "Bang", "a@x.com");
    let held = ProcessLock::start(std::process::id(), Utc::now());
    h.settings().set_lock(LockName::Batch, &held).unwrap();

    assert_eq!(h.people_batch().batch_sync_from_local().unwrap(), None);
    assert_eq!(h.ctx.states().count(EntityKind::Person, 1).unwrap(), 0);
    assert!(h.remote.documents(ResourceType::People).is_empty());
    assert_eq!(h.settings().lock(LockName::Batch).unwrap(), Some(held));
}

#[test]
fn test_full_rescan_waits_for_the_lock() {
    let h = Harness::new();
    h.save_contact("Fizz", "Bang", "a@x.com");
    let mark = HorizonMark {
        last_run_started: Some(Utc::now()),
        latest_synced: Some(Utc::now() - Duration::minutes(5)),
    };
    h.settings()
        .set_horizon(EntityKind::Person, SyncOrigin::Local, &mark)
        .unwrap();
    let held = ProcessLock::start(std::process::id(), Utc::now());
    h.settings().set_lock(LockName::Batch, &held).unwrap();

    let batch = h.people_batch().with_full_rescan(true);
    assert_eq!(batch.batch_sync_from_local().unwrap(), None);
    assert_eq!(
        h.settings().horizon(EntityKind::Person, SyncOrigin::Local).unwrap(),
        mark
    );
}

#[test]
fn test_full_rescan_picks_up_records_behind_the_horizon() {
    let h = Harness::new();
    h.save_contact("Fizz", "Bang", "a@x.com");
    let ahead = HorizonMark {
        last_run_started: Some(Utc::now() + Duration::hours(1)),
        latest_synced: Some(Utc::now() + Duration::hours(1)),
    };
    h.settings()
        .set_horizon(EntityKind::Person, SyncOrigin::Local, &ahead)
        .unwrap();

    assert_eq!(h.people_batch().batch_sync_from_local().unwrap(), Some(0));
    assert!(h.remote.documents(ResourceType::People).is_empty());

    let batch = h.people_batch().with_full_rescan(true);
    assert_eq!(batch.batch_sync_from_local().unwrap(), Some(1));
    assert_eq!(h.remote.documents(ResourceType::People).len(), 1);
}

#[test]
fn test_dead_lock_holder_is_taken_over() {
    let h = Harness::new();
    h.save_contact("Fizz", "Bang", "a@x.com");
    h.settings()
        .set_lock(LockName::Batch, &ProcessLock::start(7, Utc::now()))
        .unwrap();

    let batch = h.people_batch().with_probe(LonelyProbe);
    assert_eq!(batch.batch_sync_from_local().unwrap(), Some(1));

    let lock = h.settings().lock(LockName::Batch).unwrap().unwrap();
    assert_eq!(lock.pid, 4242);
    assert!(!lock.is_running());
}

#[test]
fn test_finished_run_releases_the_lock() {
    let h = Harness::new();
    let batch = h.people_batch().with_probe(LonelyProbe);
    assert_eq!(batch.batch_sync_from_local().unwrap(), Some(0));
    assert_eq!(batch.batch_sync_from_local().unwrap(), Some(0));
    assert!(h.settings().lock(LockName::Batch).unwrap().is_some_and(|l| !l.is_running()));
}
