//! Single-document watches

use std::sync::Arc;

use docwatch_core::domain::document::MIME_FOLDER;
use docwatch_core::domain::{ModifiedMarker, WatchTarget};
use docwatch_core::ports::SubscriberScope;
use docwatch_monitor::hub::SubscriberHub;
use docwatch_monitor::{ChangeReconciler, MonitorError, Notification};

use crate::common::*;

async fn watched_file() -> Harness {
    let h = harness();
    h.store.put_text("d1", "Plan", "t1", "alpha");
    h.reconciler.register_file_watch(&doc("d1")).await.unwrap();
    h
}

#[tokio::test]
async fn test_setup_records_baseline_without_dispatch() {
    let h = harness();
    h.store.put_text("d1", "Plan", "t1", "alpha");

    let channel = h.reconciler.register_file_watch(&doc("d1")).await.unwrap();

    assert_eq!(channel.target, WatchTarget::File(doc("d1")));
    assert!(channel.id.as_str().starts_with("d1-"));
    assert_eq!(channel.resource_id.as_deref(), Some("res-1"));
    assert_eq!(
        h.reconciler.document(&doc("d1")).unwrap().modified,
        ModifiedMarker::new("t1")
    );
    assert_eq!(h.sink.count(), 0);

    let state = h.store.state.lock().unwrap();
    assert_eq!(
        state.watch_requests[0].address,
        "https://hooks.example.com/notifications"
    );
}

#[tokio::test]
async fn test_unchanged_marker_completes_without_dispatch() {
    let h = watched_file().await;

    let report = h.reconciler.handle_notification(&file_notification("d1")).await;

    assert_eq!(report.unchanged, 1);
    assert_eq!(report.dispatched, 0);
    assert_eq!(h.sink.count(), 0);
    assert!(h.store.content_fetches().is_empty());
}

#[tokio::test]
async fn test_changed_document_is_published_to_its_room() {
    let h = watched_file().await;
    h.store.edit("d1", "t2", "alpha\nrevised");

    let report = h.reconciler.handle_notification(&file_notification("d1")).await;

    assert_eq!(report.dispatched, 1);
    let events = h.sink.events();
    assert_eq!(events[0].0.sequence_number, 1);
    assert_eq!(events[0].0.full_text, "alpha\nrevised");
    assert_eq!(events[0].1, SubscriberScope::Room(doc("d1")));

    let again = h.reconciler.handle_notification(&file_notification("d1")).await;
    assert_eq!(again.unchanged, 1);
    assert_eq!(h.sink.count(), 1);
}

#[tokio::test]
async fn test_every_marker_transition_is_dispatched() {
    let h = watched_file().await;

    h.store.edit("d1", "t2", "second");
    h.reconciler.reconcile_file(&doc("d1")).await;
    h.store.edit("d1", "t1", "back to first");
    h.reconciler.reconcile_file(&doc("d1")).await;

    let texts: Vec<_> = h.sink.events().into_iter().map(|(e, _)| e.full_text).collect();
    assert_eq!(texts, vec!["second".to_string(), "back to first".to_string()]);
    assert_eq!(
        h.reconciler.document(&doc("d1")).unwrap().modified,
        ModifiedMarker::new("t1")
    );
}

#[tokio::test]
async fn test_registering_twice_keeps_one_channel() {
    let h = watched_file().await;
    let first = h.reconciler.file_channel(&doc("d1")).unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;

    let second = h.reconciler.register_file_watch(&doc("d1")).await.unwrap();

    assert_ne!(first.id, second.id);
    assert_eq!(h.reconciler.channels().len(), 1);
    assert_eq!(h.reconciler.file_channel(&doc("d1")).unwrap().id, second.id);
    assert_eq!(h.store.stopped(), vec![first.id]);
}

#[tokio::test]
async fn test_setup_without_credential_is_auth_error() {
    let h = harness_with(FixedCredentials::missing(), settings());
    h.store.put_text("d1", "Plan", "t1", "alpha");

    let err = h.reconciler.register_file_watch(&doc("d1")).await.unwrap_err();

    assert!(matches!(err, MonitorError::Auth(_)));
    assert_eq!(h.store.watch_requests(), 0);
}

#[tokio::test]
async fn test_rejected_channel_is_registration_error() {
    let h = harness();
    h.store.put_text("d1", "Plan", "t1", "alpha");
    h.store.state.lock().unwrap().reject_watches = true;

    let err = h.reconciler.register_file_watch(&doc("d1")).await.unwrap_err();

    match err {
        MonitorError::Registration { target, reason } => {
            assert_eq!(target, "file:d1");
            assert!(reason.contains("not enabled"));
        }
        e => panic!("unexpected error: {e:?}"),
    }
    assert!(h.reconciler.file_channel(&doc("d1")).is_none());
}

#[tokio::test]
async fn test_unknown_trashed_or_folder_targets_are_rejected() {
    let h = harness();
    assert!(matches!(
        h.reconciler.register_file_watch(&doc("missing")).await,
        Err(MonitorError::Registration { .. })
    ));

    h.store.put_text("d1", "Plan", "t1", "alpha");
    h.store.trash("d1");
    assert!(matches!(
        h.reconciler.register_file_watch(&doc("d1")).await,
        Err(MonitorError::Registration { .. })
    ));

    h.store
        .state
        .lock()
        .unwrap()
        .metadata
        .insert(doc("f1"), metadata("f1", "Sub", MIME_FOLDER, "m", &[FOLDER]));
    assert!(matches!(
        h.reconciler.register_file_watch(&doc("f1")).await,
        Err(MonitorError::Registration { .. })
    ));
    assert_eq!(h.store.watch_requests(), 0);
}

#[tokio::test]
async fn test_trashed_document_is_forgotten_but_stays_watched() {
    let h = watched_file().await;
    h.store.trash("d1");

    let report = h.reconciler.handle_notification(&file_notification("d1")).await;

    assert_eq!(report.removed, 1);
    assert!(h.reconciler.document(&doc("d1")).is_none());
    assert!(h.reconciler.file_channel(&doc("d1")).is_some());
    assert_eq!(h.sink.count(), 0);
}

#[tokio::test]
async fn test_metadata_failure_is_counted_not_raised() {
    let h = watched_file().await;
    h.store.fail_metadata("d1");

    let report = h.reconciler.handle_notification(&file_notification("d1")).await;

    assert_eq!(report.failed, 1);
    assert_eq!(h.sink.count(), 0);
}

#[tokio::test]
async fn test_notifications_that_match_nothing_are_ignored() {
    let h = watched_file().await;
    h.store.edit("d1", "t2", "changed");

    let sync = Notification {
        resource_state: Some("sync".to_string()),
        ..file_notification("d1")
    };
    assert!(h.reconciler.handle_notification(&sync).await.ignored);
    assert!(h
        .reconciler
        .handle_notification(&file_notification("other"))
        .await
        .ignored);
    assert!(h
        .reconciler
        .handle_notification(&Notification::new("https://www.googleapis.com/drive/v3/about"))
        .await
        .ignored);

    assert_eq!(h.sink.count(), 0);
}

#[tokio::test]
async fn test_room_members_receive_file_events_through_hub() {
    let store = Arc::new(FakeStore::new());
    store.put_text("d1", "Plan", "t1", "alpha");
    let hub = Arc::new(SubscriberHub::default());
    let reconciler = ChangeReconciler::new(
        store.clone(),
        Arc::new(FixedCredentials::valid()),
        hub.clone(),
        settings(),
    );
    let mut member = hub.subscribe();
    let mut outsider = hub.subscribe();
    hub.join(member.id, doc("d1"));

    reconciler.register_file_watch(&doc("d1")).await.unwrap();
    store.edit("d1", "t2", "alpha revised");
    reconciler.reconcile_file(&doc("d1")).await;

    let event = member.events.recv().await.unwrap();
    assert_eq!(event.full_text, "alpha revised");
    assert_eq!(event.document_name, "Plan");
    assert!(outsider.events.try_recv().is_err());
}

#[tokio::test]
async fn test_file_watch_keeps_pending_folder_baseline() {
    let h = harness();
    h.store.put_text("d1", "Plan", "t1", "alpha");
    h.reconciler.register_folder_watch(&folder()).await.unwrap();
    h.sink.clear();

    // Edited after the folder scan, before its change is processed
    h.store.edit("d1", "t2", "alpha revised");
    h.reconciler.register_file_watch(&doc("d1")).await.unwrap();
    assert_eq!(
        h.reconciler.document(&doc("d1")).unwrap().modified,
        ModifiedMarker::new("t1")
    );

    h.store.set_changes("start-1", &[("d1", false)], Next::CaughtUp("c2"));
    let report = h.reconciler.handle_notification(&changes_notification()).await;

    assert_eq!(report.dispatched, 1);
    assert_eq!(h.sink.events()[0].0.full_text, "alpha revised");
}

#[tokio::test]
async fn test_document_locks_are_released_after_each_operation() {
    let h = harness();
    h.store.put_text("d1", "Plan", "t1", "alpha");
    h.store.put_text("d2", "Notes", "t2", "beta");

    h.reconciler.register_file_watch(&doc("d1")).await.unwrap();
    h.reconciler.register_file_watch(&doc("d2")).await.unwrap();
    h.reconciler.register_file_watch(&doc("missing")).await.unwrap_err();
    assert_eq!(h.reconciler.lock_count(), 0);

    h.store.edit("d1", "t1b", "alpha revised");
    let report = h.reconciler.reconcile_file(&doc("d1")).await;
    assert_eq!(report.dispatched, 1);
    assert_eq!(h.reconciler.lock_count(), 0);
}
