//! Scenario: Sign-out clear and stale refresh results
//!
//! # Invariants under test
//!
//! 1. After clear_quiz_data(account), resolve(account) is Missing and the
//!    view shows `missing` with no result.
//! 2. Clearing one account leaves another account's record intact.
//! 3. A refresh suspended on the remote when the account is cleared returns
//!    Superseded and neither persists nor applies what it fetched.
//! 4. A refresh started while the clear is removing the record waits for the
//!    clear to finish and never brings the cleared result back.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tqs_cache::CacheLookup;
use tqs_controller::{ControllerSettings, RefreshOutcome};
use tqs_schemas::{ResolvedState, SyncStatus};
use tqs_testkit::{quiz_result, FakeRemote, FaultyStore, Harness, StaticIdentity};

#[tokio::test]
async fn sign_out_resolves_missing() {
    let h = Harness::new(
        FakeRemote::new(),
        Arc::new(StaticIdentity::signed_in("acc-1", Some("tok"))),
    );
    h.seed_local("acc-1", &quiz_result(Some("ADV01"), 1, 1_000), SyncStatus::Synced)
        .unwrap();
    h.seed_local("acc-2", &quiz_result(Some("REL01"), 1, 1_000), SyncStatus::Synced)
        .unwrap();

    h.controller.refresh(true).await;
    assert_eq!(h.controller.status(), ResolvedState::Completed);

    let gen_before = h.controller.generation();
    h.controller.clear_quiz_data("acc-1").unwrap();

    assert_eq!(h.cache.resolve("acc-1"), CacheLookup::Missing);
    assert!(matches!(h.cache.resolve("acc-2"), CacheLookup::Found { .. }));
    let v = h.controller.view();
    assert_eq!(v.status, ResolvedState::Missing);
    assert!(v.quiz_result.is_none());
    assert!(h.controller.generation() > gen_before);
}

#[tokio::test]
async fn refresh_in_flight_during_clear_is_superseded() {
    let h = Harness::new(
        FakeRemote::with_state(quiz_result(Some("ADV02"), 2, 2_000)),
        Arc::new(StaticIdentity::signed_in("acc-1", Some("tok"))),
    );
    h.remote.hold_fetches();

    let ctl = Arc::clone(&h.controller);
    let running = tokio::spawn(async move { ctl.refresh(true).await });
    h.remote.fetch_entered().await;

    h.controller.clear_quiz_data("acc-1").unwrap();
    h.remote.release_fetches(1);

    assert_eq!(running.await.unwrap(), RefreshOutcome::Superseded);
    assert_eq!(h.cache.resolve("acc-1"), CacheLookup::Missing);
    assert_eq!(h.controller.status(), ResolvedState::Missing);
    assert!(h.controller.view().quiz_result.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn refresh_racing_clear_never_restores_record() {
    let store = Arc::new(FaultyStore::new());
    let h = Harness::with_store(
        store.clone(),
        FakeRemote::new(),
        Arc::new(StaticIdentity::signed_in("acc-1", Some("tok"))),
        ControllerSettings::default(),
    );
    h.seed_local("acc-1", &quiz_result(Some("ADV01"), 1, 1_000), SyncStatus::Synced)
        .unwrap();

    // Start a refresh from inside the record removal and give it time to run
    // before the removal is applied.
    let spawned: Arc<Mutex<Option<JoinHandle<RefreshOutcome>>>> = Arc::new(Mutex::new(None));
    let slot = spawned.clone();
    let ctl = Arc::downgrade(&h.controller);
    let rt = tokio::runtime::Handle::current();
    store.on_remove(move |key| {
        if !key.starts_with("quiz-result:") {
            return;
        }
        if let Some(ctl) = ctl.upgrade() {
            let task = rt.spawn(async move { ctl.refresh(true).await });
            *slot.lock().unwrap() = Some(task);
            std::thread::sleep(Duration::from_millis(50));
        }
    });

    let ctl = Arc::clone(&h.controller);
    tokio::task::spawn_blocking(move || ctl.clear_quiz_data("acc-1"))
        .await
        .unwrap()
        .unwrap();

    let task = spawned.lock().unwrap().take().expect("refresh started during clear");
    assert_eq!(task.await.unwrap(), RefreshOutcome::Missing);
    assert_eq!(h.cache.resolve("acc-1"), CacheLookup::Missing);
    let v = h.controller.view();
    assert_eq!(v.status, ResolvedState::Missing);
    assert!(v.quiz_result.is_none());
}
