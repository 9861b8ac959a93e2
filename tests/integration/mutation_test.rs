//! Mutation coordinator tests: optimistic durability, failure reporting
//! and the all-or-nothing quantity rule

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

use qms_sync::client::remote::FetchScript;
use qms_sync::client::{MutationState, RemoteError};
use qms_sync::shared::{CollectionName, FetchState, RecordDelta, SyncError, SyncEvent, SyncEventKind};

use crate::common::*;

const LOT_INSPECTED: &str = "/lots/records/0/InspectedQuantity";

/// Wait for the first event about `correlation_id`
async fn event_for(events: &mut broadcast::Receiver<SyncEvent>, correlation_id: Uuid) -> SyncEvent {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("event within two seconds")
            .expect("event channel open");
        if event.correlation_id() == Some(correlation_id) {
            return event;
        }
    }
}

fn store_bytes(harness: &Harness) -> Vec<u8> {
    serde_json::to_vec(&harness.facade.store().snapshot()).expect("store serializes")
}

#[tokio::test]
async fn test_over_remaining_quantity_is_rejected_without_writes() {
    let harness = Harness::scenario().await;
    let before = store_bytes(&harness);

    let result = harness
        .coordinator
        .submit(
            &CollectionName::lots(),
            RecordDelta::update("L1").with("UnrestrictedQuantity", 3.0),
        )
        .await;

    assert_err!(result, SyncError::Validation { .. });
    assert_eq!(store_bytes(&harness), before);
    assert_eq!(harness.coordinator.stats().await.total, 0);
    assert_eq!(harness.client.create_calls(), 0);
}

#[tokio::test]
async fn test_split_over_remaining_applies_no_part() {
    let harness = Harness::scenario().await;
    let before = store_bytes(&harness);

    // Each part fits on its own; together they exceed the 2.0 remaining
    let delta = RecordDelta::update("L1")
        .with("UnrestrictedQuantity", 1.0)
        .with("BlockedQuantity", 0.75)
        .with("ScrapQuantity", 0.5);
    let result = harness.coordinator.submit(&CollectionName::lots(), delta).await;

    match result {
        Err(SyncError::Validation { field, .. }) => assert_eq!(field, "InspectedQuantity"),
        other => panic!("Expected a validation error, got {:?}", other),
    }
    assert_eq!(store_bytes(&harness), before);
}

#[tokio::test]
async fn test_booking_within_remaining_persists() {
    let harness = Harness::scenario().await;
    let mut events = harness.coordinator.subscribe_events();

    let id = assert_ok!(
        harness
            .coordinator
            .submit(
                &CollectionName::lots(),
                RecordDelta::update("L1").with("UnrestrictedQuantity", 1.5),
            )
            .await
    );

    assert_store_number!(harness.facade.store(), LOT_INSPECTED, 11.5);
    assert_eq!(harness.coordinator.pending(&CollectionName::lots()).await.len(), 1);

    let event = event_for(&mut events, id).await;
    assert_matches!(event.kind, SyncEventKind::MutationPersisted { correlation_id } if correlation_id == id);
    let mutation = harness.coordinator.mutation(id).await.expect("mutation kept until pruned");
    assert_eq!(mutation.state, MutationState::Persisted);

    // A reload reflects the persisted value and prunes the mutation
    let outcome = assert_ok!(harness.facade.load(&CollectionName::lots(), DEADLINE).await);
    assert_eq!(outcome.state, FetchState::Ready);
    assert_store_number!(harness.facade.store(), LOT_INSPECTED, 11.5);
    assert_eq!(harness.coordinator.stats().await.total, 0);
}

#[tokio::test]
async fn test_store_reflects_submit_before_persist_completes() {
    let harness = Harness::scenario().await;
    harness
        .client
        .set_latency(CollectionName::lots(), Duration::from_millis(300))
        .await;

    let id = assert_ok!(
        harness
            .coordinator
            .submit(
                &CollectionName::lots(),
                RecordDelta::update("L1").with("SampleQuantity", 0.5),
            )
            .await
    );

    assert_store_number!(harness.facade.store(), LOT_INSPECTED, 10.5);
    assert_store_number!(harness.facade.store(), "/lots/records/0/SampleQuantity", 0.5);
    let mutation = harness.coordinator.mutation(id).await.expect("mutation queued");
    assert_matches!(
        mutation.state,
        MutationState::AppliedLocally | MutationState::PersistPending
    );
}

#[tokio::test]
async fn test_failed_persist_keeps_value_and_reports() {
    let harness = Harness::scenario().await;
    harness
        .client
        .fail_creates(
            CollectionName::lots(),
            Some(RemoteError::Server {
                status: 500,
                body: "dump".to_string(),
            }),
        )
        .await;
    let mut events = harness.coordinator.subscribe_events();

    let id = assert_ok!(
        harness
            .coordinator
            .submit(
                &CollectionName::lots(),
                RecordDelta::update("L1").with("BlockedQuantity", 2.0),
            )
            .await
    );

    let event = event_for(&mut events, id).await;
    match event.kind {
        SyncEventKind::MutationFailed { error, message, .. } => {
            assert_eq!(error, Some(SyncError::Server { status: 500 }));
            assert_eq!(message, "Server error: HTTP 500");
        }
        other => panic!("Expected MutationFailed, got {:?}", other),
    }

    let mutation = harness.coordinator.mutation(id).await.expect("failed mutation kept");
    assert_eq!(mutation.state, MutationState::PersistFailed);
    assert_eq!(mutation.last_error.as_deref(), Some("Server error: HTTP 500"));
    assert_store_number!(harness.facade.store(), LOT_INSPECTED, 12.0);
}

#[tokio::test]
async fn test_failed_mutation_survives_reload() {
    let harness = Harness::scenario().await;
    harness
        .client
        .fail_creates(CollectionName::lots(), Some(RemoteError::Network("offline".into())))
        .await;

    let outcome = assert_ok!(
        harness
            .coordinator
            .submit_and_wait(
                &CollectionName::lots(),
                RecordDelta::update("L1").with("UnrestrictedQuantity", 1.0),
            )
            .await
    );
    assert_eq!(outcome.state, MutationState::PersistFailed);

    // The server still says 10; the unsaved local booking wins in the view
    let reload = assert_ok!(harness.facade.load(&CollectionName::lots(), DEADLINE).await);
    assert_eq!(reload.state, FetchState::Ready);
    assert_store_number!(harness.facade.store(), LOT_INSPECTED, 11.0);
    assert_eq!(harness.coordinator.stats().await.persist_failed, 1);

    // Once the backend recovers, a retry lands and the next reload prunes it
    harness.client.fail_creates(CollectionName::lots(), None).await;
    let retried = assert_ok!(harness.coordinator.retry_and_wait(outcome.correlation_id).await);
    assert_eq!(retried.state, MutationState::Persisted);
    assert_ok!(harness.facade.load(&CollectionName::lots(), DEADLINE).await);
    assert_store_number!(harness.facade.store(), LOT_INSPECTED, 11.0);
    assert!(harness.coordinator.pending(&CollectionName::lots()).await.is_empty());
}

#[tokio::test]
async fn test_persists_in_submission_order() {
    let harness = Harness::scenario().await;

    for quantity in [0.25, 0.5, 0.75] {
        assert_ok!(
            harness
                .coordinator
                .submit(
                    &CollectionName::lots(),
                    RecordDelta::update("L1").with("SampleQuantity", quantity),
                )
                .await
        );
    }
    let last = assert_ok!(
        harness
            .coordinator
            .submit_and_wait(
                &CollectionName::lots(),
                RecordDelta::update("L1").with("ScrapQuantity", 0.1),
            )
            .await
    );
    assert_eq!(last.state, MutationState::Persisted);

    let created = harness.client.created().await;
    let inspected: Vec<f64> = created
        .iter()
        .map(|(_, record)| record.number("InspectedQuantity"))
        .collect();
    assert_eq!(inspected.len(), 4);
    assert!(inspected.windows(2).all(|w| w[0] < w[1]));
    assert_store_number!(harness.facade.store(), LOT_INSPECTED, 11.6);
}

#[tokio::test]
async fn test_writes_to_derived_fields_are_rejected() {
    let harness = Harness::scenario().await;
    let result = harness
        .coordinator
        .submit(
            &CollectionName::lots(),
            RecordDelta::update("L1").with("ProgressPercent", 100.0),
        )
        .await;
    assert_err!(result, SyncError::Validation { .. });
}

#[tokio::test]
async fn test_update_of_unknown_record_is_not_found() {
    let harness = Harness::scenario().await;
    let result = harness
        .coordinator
        .submit(
            &CollectionName::lots(),
            RecordDelta::update("missing").with("SampleQuantity", 0.1),
        )
        .await;
    assert_err!(result, SyncError::NotFound { .. });
}

#[tokio::test]
async fn test_insert_with_missing_required_field_is_rejected() {
    let harness = Harness::scenario().await;
    let result = harness
        .coordinator
        .submit(
            &CollectionName::results(),
            RecordDelta::insert().with("InspectionLotNumber", "L1"),
        )
        .await;

    match result {
        Err(SyncError::Validation { field, .. }) => assert_eq!(field, "PlantCode"),
        other => panic!("Expected a validation error, got {:?}", other),
    }
    assert!(assert_ok!(harness.facade.records(&CollectionName::results())).is_empty());
}

#[tokio::test]
async fn test_discard_of_persisted_mutation_is_refused() {
    let harness = Harness::scenario().await;
    let outcome = assert_ok!(
        harness
            .coordinator
            .submit_and_wait(
                &CollectionName::lots(),
                RecordDelta::update("L1").with("SampleQuantity", 0.5),
            )
            .await
    );

    let result = harness.coordinator.discard(outcome.correlation_id).await;
    assert_err!(result, SyncError::Validation { .. });
    assert_store_number!(harness.facade.store(), LOT_INSPECTED, 10.5);
}

#[tokio::test]
async fn test_discard_keeps_later_booking_on_same_lot() {
    let harness = Harness::scenario().await;
    harness
        .client
        .fail_creates(CollectionName::lots(), Some(RemoteError::Network("offline".into())))
        .await;

    let unrestricted = assert_ok!(
        harness
            .coordinator
            .submit_and_wait(
                &CollectionName::lots(),
                RecordDelta::update("L1").with("UnrestrictedQuantity", 0.5),
            )
            .await
    );
    let scrap = assert_ok!(
        harness
            .coordinator
            .submit_and_wait(
                &CollectionName::lots(),
                RecordDelta::update("L1").with("ScrapQuantity", 0.5),
            )
            .await
    );
    assert_store_number!(harness.facade.store(), LOT_INSPECTED, 11.0);

    assert_ok!(harness.coordinator.discard(unrestricted.correlation_id).await);

    let store = harness.facade.store();
    assert_store_number!(store, LOT_INSPECTED, 10.5);
    assert_store_number!(store, "/lots/records/0/ScrapQuantity", 0.5);
    assert_eq!(store.get("/lots/records/0/UnrestrictedQuantity"), None);

    let remaining = harness.coordinator.mutation(scrap.correlation_id).await.expect("later booking kept");
    assert_eq!(remaining.state, MutationState::PersistFailed);
    assert_eq!(
        remaining.overlay.get("InspectedQuantity").map(|v| v.as_f64()),
        Some(10.5)
    );
    assert_eq!(remaining.payload.number("InspectedQuantity"), 10.5);

    // The server still says 10; the reload must not bring the discarded half back
    assert_ok!(harness.facade.load(&CollectionName::lots(), DEADLINE).await);
    assert_store_number!(store, LOT_INSPECTED, 10.5);
    assert_store_number!(store, "/lots/records/0/ScrapQuantity", 0.5);
    assert_eq!(store.get("/lots/records/0/UnrestrictedQuantity"), None);

    harness.client.fail_creates(CollectionName::lots(), None).await;
    let retried = assert_ok!(harness.coordinator.retry_and_wait(scrap.correlation_id).await);
    assert_eq!(retried.state, MutationState::Persisted);
    let created = harness.client.created().await;
    let (_, sent) = created.last().expect("retry reached the server");
    assert_eq!(sent.number("InspectedQuantity"), 10.5);
    assert!(!sent.contains("UnrestrictedQuantity"));

    assert_ok!(harness.facade.load(&CollectionName::lots(), DEADLINE).await);
    assert_store_number!(store, LOT_INSPECTED, 10.5);
    assert!(harness.coordinator.pending(&CollectionName::lots()).await.is_empty());
}

#[tokio::test]
async fn test_discard_refused_while_later_booking_is_saving() {
    let harness = Harness::scenario().await;
    harness
        .client
        .fail_creates(CollectionName::lots(), Some(RemoteError::Network("offline".into())))
        .await;
    let failed = assert_ok!(
        harness
            .coordinator
            .submit_and_wait(
                &CollectionName::lots(),
                RecordDelta::update("L1").with("UnrestrictedQuantity", 0.5),
            )
            .await
    );

    harness.client.fail_creates(CollectionName::lots(), None).await;
    harness
        .client
        .set_latency(CollectionName::lots(), Duration::from_millis(300))
        .await;
    let mut events = harness.coordinator.subscribe_events();
    let saving = assert_ok!(
        harness
            .coordinator
            .submit(
                &CollectionName::lots(),
                RecordDelta::update("L1").with("ScrapQuantity", 0.5),
            )
            .await
    );

    let result = harness.coordinator.discard(failed.correlation_id).await;
    assert_err!(result, SyncError::Validation { .. });
    assert_store_number!(harness.facade.store(), LOT_INSPECTED, 11.0);
    assert_eq!(harness.coordinator.pending(&CollectionName::lots()).await.len(), 2);

    let event = event_for(&mut events, saving).await;
    assert_matches!(event.kind, SyncEventKind::MutationPersisted { .. });
}

#[tokio::test]
async fn test_load_overlapping_persist_keeps_local_value() {
    let harness = Harness::scenario().await;
    harness
        .client
        .set_latency(CollectionName::lots(), Duration::from_millis(100))
        .await;
    // The next fetch answers late with what the server held before the write
    harness
        .client
        .script_fetch(
            CollectionName::lots(),
            FetchScript::ok(Duration::from_millis(300), vec![lot("L1", "12.000", "10.000")]),
        )
        .await;
    let mut events = harness.coordinator.subscribe_events();

    let id = assert_ok!(
        harness
            .coordinator
            .submit(
                &CollectionName::lots(),
                RecordDelta::update("L1").with("UnrestrictedQuantity", 1.5),
            )
            .await
    );
    let mutation = harness.coordinator.mutation(id).await.expect("mutation queued");
    assert_eq!(mutation.state, MutationState::PersistPending);

    // Issued while the create is in flight, committed after it lands
    let outcome = assert_ok!(harness.facade.load(&CollectionName::lots(), DEADLINE).await);
    assert_eq!(outcome.state, FetchState::Ready);
    assert!(!outcome.superseded);

    let event = event_for(&mut events, id).await;
    assert_matches!(event.kind, SyncEventKind::MutationPersisted { .. });
    assert_store_number!(harness.facade.store(), LOT_INSPECTED, 11.5);
    let mutation = harness.coordinator.mutation(id).await.expect("kept until a later load");
    assert_eq!(mutation.state, MutationState::Persisted);

    // A load issued after persistence reflects the write and prunes it
    assert_ok!(harness.facade.load(&CollectionName::lots(), DEADLINE).await);
    assert_store_number!(harness.facade.store(), LOT_INSPECTED, 11.5);
    assert!(harness.coordinator.pending(&CollectionName::lots()).await.is_empty());
}
