// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Integration tests for the installation slot manager over a real directory
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: 11 tests
//!
//! TEST_SCENARIOS:
//!   - test_fresh_store_boots_slot_zero(): first boot creates store + slot dirs
//!   - test_roll_forward_scenario(): request + apply roll-forward on 3 slots
//!   - test_revert_scenario(): fallback to successful slot, failed slot demoted
//!   - test_roll_forward_noop(): no pending request leaves the file untouched
//!   - test_reserved_slot_never_selected(): N=4 never hands out slot 0
//!   - test_state_survives_restart(): uninitialize + initialize reloads the file
//!   - test_corrupt_store_rebuilt(): garbage on disk yields a fresh store
//!   - test_boot_attempt_budget(): decrement to zero then revert
//!   - test_concurrent_callers(): one service shared across threads
//!   - test_save_load_round_trip(): encode to disk and decode back
//!   - test_random_calls_keep_disk_consistent(): random call sequences with restarts
//!     always leave a priority permutation on disk that agrees with the service

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use proptest::prelude::*;
use updates::record::{decode, encode};
use updates::{
    BlobStore, FsBlobStore, InstallationStore, SlotConfig, SlotManager, SlotService,
    INSTALLATION_NOT_SUCCESSFUL, INSTALLATION_SUCCESSFUL, STATUS_ERROR, STATUS_OK,
    STORE_FILE_NAME,
};

fn config(root: &Path) -> SlotConfig {
    SlotConfig::new(2, root.join("storage")).with_content_dir(root.join("content"))
}

fn read_store(root: &Path) -> InstallationStore {
    let bytes = fs::read(root.join("storage").join(STORE_FILE_NAME)).expect("store file");
    decode(&bytes).expect("decode store file")
}

fn priorities(store: &InstallationStore) -> Vec<u32> {
    store.installations.iter().map(|r| r.priority).collect()
}

fn write_store(root: &Path, store: &InstallationStore) {
    fs::create_dir_all(root.join("storage")).expect("storage dir");
    let mut blob = FsBlobStore::new(root.join("storage").join(STORE_FILE_NAME));
    blob.replace(&encode(store).expect("encode")).expect("write store");
}

#[test]
fn test_fresh_store_boots_slot_zero() {
    let dir = tempfile::tempdir().expect("tempdir");
    let service = SlotService::open(config(dir.path()));
    assert_eq!(service.initialize(3), STATUS_OK);
    assert_eq!(service.get_current_installation_index(), 0);

    let store = read_store(dir.path());
    assert_eq!(store, InstallationStore::fresh(3, 3));
    assert!(dir.path().join("storage/installation_1").is_dir());
    assert!(dir.path().join("storage/installation_2").is_dir());
    assert!(!dir.path().join("storage/installation_0").exists());
}

#[test]
fn test_roll_forward_scenario() {
    let dir = tempfile::tempdir().expect("tempdir");
    let service = SlotService::open(config(dir.path()));
    assert_eq!(service.initialize(3), STATUS_OK);

    assert_eq!(service.request_roll_forward_to_installation(2), STATUS_OK);
    assert_eq!(read_store(dir.path()).roll_forward_to_installation, Some(2));
    assert_eq!(service.roll_forward_if_needed(), STATUS_OK);

    let store = read_store(dir.path());
    assert_eq!(priorities(&store), vec![1, 2, 0]);
    assert_eq!(store.roll_forward_to_installation, None);
    assert_eq!(service.get_current_installation_index(), 2);
}

#[test]
fn test_revert_scenario() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut store = InstallationStore::fresh(3, 3);
    for (record, priority) in store.installations.iter_mut().zip([1, 2, 0]) {
        record.priority = priority;
    }
    store.installations[0].is_successful = true;
    write_store(dir.path(), &store);

    let service = SlotService::open(config(dir.path()));
    assert_eq!(service.initialize(3), STATUS_OK);
    assert_eq!(service.get_current_installation_index(), 2);

    assert_eq!(service.revert_to_successful_installation(), 0);
    let reverted = read_store(dir.path());
    assert_eq!(priorities(&reverted), vec![0, 1, 2]);
    assert_eq!(service.get_installation_status(2), INSTALLATION_NOT_SUCCESSFUL);
    assert_eq!(service.get_installation_status(0), INSTALLATION_SUCCESSFUL);
    assert_eq!(service.get_current_installation_index(), 0);
}

#[test]
fn test_roll_forward_noop() {
    let dir = tempfile::tempdir().expect("tempdir");
    let service = SlotService::open(config(dir.path()));
    assert_eq!(service.initialize(3), STATUS_OK);
    let before = fs::read(dir.path().join("storage").join(STORE_FILE_NAME)).expect("store");

    assert_eq!(service.roll_forward_if_needed(), STATUS_OK);
    let after = fs::read(dir.path().join("storage").join(STORE_FILE_NAME)).expect("store");
    assert_eq!(before, after);
    assert_eq!(service.get_current_installation_index(), 0);
}

#[test]
fn test_reserved_slot_never_selected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let service = SlotService::open(config(dir.path()));
    assert_eq!(service.initialize(4), STATUS_OK);

    for _ in 0..8 {
        let selected = service.select_new_installation_index();
        assert!(selected > 0 && selected < 4, "selected {selected}");
        assert_eq!(service.mark_installation_successful(selected), STATUS_OK);
        assert_eq!(service.request_roll_forward_to_installation(selected), STATUS_OK);
        assert_eq!(service.roll_forward_if_needed(), STATUS_OK);
        assert_eq!(service.get_current_installation_index(), selected);
    }
}

#[test]
fn test_state_survives_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let service = SlotService::open(config(dir.path()));
    assert_eq!(service.initialize(3), STATUS_OK);
    let target = service.select_new_installation_index();
    assert_eq!(target, 2);
    assert_eq!(service.request_roll_forward_to_installation(target), STATUS_OK);
    service.uninitialize();

    // Pending request is durable and applied by the next process.
    let service = SlotService::open(config(dir.path()));
    assert_eq!(service.initialize(3), STATUS_OK);
    assert_eq!(service.get_current_installation_index(), 0);
    assert_eq!(service.roll_forward_if_needed(), STATUS_OK);
    assert_eq!(service.get_current_installation_index(), 2);
}

#[test]
fn test_corrupt_store_rebuilt() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::create_dir_all(dir.path().join("storage")).expect("storage dir");
    fs::write(dir.path().join("storage").join(STORE_FILE_NAME), b"\x00garbage").expect("write");

    let service = SlotService::open(config(dir.path()));
    assert_eq!(service.initialize(3), STATUS_OK);
    assert_eq!(service.get_current_installation_index(), 0);
    assert_eq!(read_store(dir.path()), InstallationStore::fresh(3, 3));
}

#[test]
fn test_boot_attempt_budget() {
    let dir = tempfile::tempdir().expect("tempdir");
    let service = SlotService::open(config(dir.path()));
    assert_eq!(service.initialize(3), STATUS_OK);
    assert_eq!(service.mark_installation_successful(0), STATUS_OK);

    let slot = service.select_new_installation_index();
    assert_eq!(service.request_roll_forward_to_installation(slot), STATUS_OK);
    assert_eq!(service.roll_forward_if_needed(), STATUS_OK);
    assert_eq!(service.get_current_installation_index(), slot);

    for _ in 0..3 {
        assert_eq!(service.decrement_installation_num_tries(slot), STATUS_OK);
    }
    assert_eq!(service.get_installation_num_tries_left(slot), 0);
    assert_eq!(service.decrement_installation_num_tries(slot), STATUS_ERROR);

    assert_eq!(service.revert_to_successful_installation(), 0);
    let store = read_store(dir.path());
    assert_eq!(store.installations[slot as usize].priority, 2);
    assert!(!store.installations[slot as usize].is_successful);
}

#[test]
fn test_concurrent_callers() {
    let dir = tempfile::tempdir().expect("tempdir");
    let service = Arc::new(SlotService::open(config(dir.path())));
    assert_eq!(service.initialize(3), STATUS_OK);
    assert_eq!(service.select_new_installation_index(), 2);

    let mut handles = Vec::new();
    for _ in 0..4 {
        let service = Arc::clone(&service);
        handles.push(thread::spawn(move || {
            let mut ok = 0;
            for _ in 0..2 {
                if service.decrement_installation_num_tries(2) == STATUS_OK {
                    ok += 1;
                }
            }
            ok
        }));
    }
    let total: i32 = handles.into_iter().map(|h| h.join().expect("thread")).sum();

    // Exactly the budget is consumed, never more.
    assert_eq!(total, 3);
    assert_eq!(service.get_installation_num_tries_left(2), 0);
    assert_eq!(read_store(dir.path()).installations[2].num_tries_left, 0);
}

#[test]
fn test_save_load_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut store = InstallationStore::fresh(5, 3);
    store.installations[3].is_successful = true;
    store.installations[4].num_tries_left = 0;
    store.installations[1].priority = 4;
    store.installations[4].priority = 1;
    store.roll_forward_to_installation = Some(3);
    write_store(dir.path(), &store);
    assert_eq!(read_store(dir.path()), store);

    let config = SlotConfig::new(5, dir.path().join("storage"))
        .with_content_dir(dir.path().join("content"));
    let blob = FsBlobStore::new(dir.path().join("storage").join(STORE_FILE_NAME));
    let mut manager = SlotManager::new(&config, blob).expect("manager");
    manager.initialize().expect("initialize");
    assert_eq!(manager.store().expect("store"), &store);
}

#[derive(Debug, Clone)]
enum Call {
    Decrement(i32),
    Mark(i32),
    Request(i32),
    Select,
    RollForward,
    Revert,
    Restart,
}

fn call_strategy(n: i32) -> impl Strategy<Value = Call> {
    // One index past the end so rejected calls are exercised too.
    let index = -1..=n;
    prop_oneof![
        index.clone().prop_map(Call::Decrement),
        index.clone().prop_map(Call::Mark),
        index.prop_map(Call::Request),
        Just(Call::Select),
        Just(Call::RollForward),
        Just(Call::Revert),
        Just(Call::Restart),
    ]
}

fn session() -> impl Strategy<Value = (i32, Vec<Call>)> {
    (2i32..6).prop_flat_map(|n| (Just(n), proptest::collection::vec(call_strategy(n), 1..24)))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn test_random_calls_keep_disk_consistent((n, calls) in session()) {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut service = SlotService::open(config(dir.path()));
        prop_assert_eq!(service.initialize(n), STATUS_OK);

        for call in calls {
            let before = read_store(dir.path());
            let status = match call {
                Call::Decrement(i) => service.decrement_installation_num_tries(i),
                Call::Mark(i) => service.mark_installation_successful(i),
                Call::Request(i) => service.request_roll_forward_to_installation(i),
                Call::Select => {
                    let selected = service.select_new_installation_index();
                    prop_assert!(n <= 2 || selected != 0, "reserved slot selected");
                    selected
                }
                Call::RollForward => service.roll_forward_if_needed(),
                Call::Revert => service.revert_to_successful_installation(),
                Call::Restart => {
                    service.uninitialize();
                    service = SlotService::open(config(dir.path()));
                    service.initialize(n)
                }
            };

            let store = read_store(dir.path());
            prop_assert!(store.validate_priorities().is_ok(), "broken store on disk: {}", store);
            prop_assert_eq!(store.len(), n as usize);
            let current = store.find_current().expect("current slot");
            prop_assert_eq!(service.get_current_installation_index(), current as i32);
            if status == STATUS_ERROR {
                prop_assert_eq!(&store, &before);
            }
        }
    }
}
