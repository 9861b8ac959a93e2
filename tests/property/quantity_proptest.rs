//! Property-based tests for the quantity booking rule

use proptest::prelude::*;

use qms_sync::client::offline::optimistic::{apply, QUANTITY_EPSILON};
use qms_sync::shared::config::default_collections;
use qms_sync::shared::{CollectionName, Record, RecordDelta, SyncError};

use crate::common::Harness;

const PARTS: [&str; 4] = [
    "UnrestrictedQuantity",
    "BlockedQuantity",
    "ScrapQuantity",
    "SampleQuantity",
];

fn booking() -> impl Strategy<Value = (f64, f64, Vec<f64>)> {
    (0.0f64..100.0)
        .prop_flat_map(|actual| (Just(actual), 0.0..=actual))
        .prop_flat_map(|(actual, inspected)| {
            (
                Just(actual),
                Just(inspected),
                prop::collection::vec(0.0f64..40.0, 1..=PARTS.len()),
            )
        })
}

proptest! {
    #[test]
    fn test_booking_is_all_or_nothing((actual, inspected, parts) in booking()) {
        let lots = default_collections().remove(0);
        let records = vec![Record::new()
            .with("InspectionLotNumber", "L1")
            .with("ActualQuantity", actual)
            .with("InspectedQuantity", inspected)];

        let mut delta = RecordDelta::update("L1");
        for (field, value) in PARTS.iter().zip(&parts) {
            delta = delta.with(*field, *value);
        }
        let sum: f64 = parts.iter().sum();
        let remaining = actual - inspected;

        match apply(&lots, &records, &delta) {
            Ok(applied) => {
                prop_assert!(sum <= remaining + QUANTITY_EPSILON);
                let recorded = applied.after.number("InspectedQuantity");
                prop_assert!((recorded - (inspected + sum)).abs() < 1e-6);
                prop_assert!(recorded <= actual + 1e-6);
                for (field, value) in PARTS.iter().zip(&parts) {
                    prop_assert!((applied.after.number(field) - value).abs() < 1e-9);
                }
            }
            Err(err) => {
                prop_assert!(sum > remaining + QUANTITY_EPSILON);
                let is_recorded_field = matches!(
                    &err,
                    SyncError::Validation { field, .. } if field == "InspectedQuantity"
                );
                prop_assert!(is_recorded_field);
            }
        }
    }

    #[test]
    fn test_negative_parts_are_rejected(part in -100.0f64..-0.001) {
        let lots = default_collections().remove(0);
        let records = vec![Record::new()
            .with("InspectionLotNumber", "L1")
            .with("ActualQuantity", 100.0)
            .with("InspectedQuantity", 0.0)];
        let delta = RecordDelta::update("L1").with("ScrapQuantity", part);

        let is_validation = matches!(apply(&lots, &records, &delta), Err(SyncError::Validation { .. }));
        prop_assert!(is_validation);
    }

    #[test]
    fn test_rejected_booking_leaves_store_unchanged(excess in 0.001f64..50.0) {
        tokio_test::block_on(async {
            let harness = Harness::scenario().await;
            let before = serde_json::to_vec(&harness.facade.store().snapshot()).unwrap();

            // 2.0 remains on the scenario lot
            let delta = RecordDelta::update("L1")
                .with("UnrestrictedQuantity", 1.0)
                .with("BlockedQuantity", 1.0 + excess);
            let result = harness.coordinator.submit(&CollectionName::lots(), delta).await;

            assert!(matches!(result, Err(SyncError::Validation { .. })));
            let after = serde_json::to_vec(&harness.facade.store().snapshot()).unwrap();
            assert_eq!(before, after);
            assert_eq!(harness.coordinator.stats().await.total, 0);
        });
    }
}
