//! Fallback Data Provider
//!
//! Static substitute records served when a collection cannot be fetched.
//! `get` is pure: no I/O, no failure mode, and an empty result for
//! collections without a dataset.

use std::collections::HashMap;

use crate::shared::collection::CollectionName;
use crate::shared::record::Record;

/// Static substitute datasets per collection
#[derive(Debug, Clone, Default)]
pub struct FallbackProvider {
    datasets: HashMap<CollectionName, Vec<Record>>,
}

impl FallbackProvider {
    /// Provider without any dataset
    pub fn empty() -> Self {
        Self::default()
    }

    /// Provider carrying the built-in demo datasets
    pub fn builtin() -> Self {
        Self::empty()
            .with_dataset(CollectionName::lots(), demo_lots())
            .with_dataset(CollectionName::results(), demo_results())
            .with_dataset(CollectionName::usage(), demo_usage_decisions())
    }

    /// Add or replace the dataset of a collection
    pub fn with_dataset(mut self, collection: CollectionName, records: Vec<Record>) -> Self {
        self.datasets.insert(collection, records);
        self
    }

    /// Substitute records for a collection
    pub fn get(&self, collection: &CollectionName) -> Vec<Record> {
        self.datasets.get(collection).cloned().unwrap_or_default()
    }

    pub fn has_dataset(&self, collection: &CollectionName) -> bool {
        self.datasets
            .get(collection)
            .map(|records| !records.is_empty())
            .unwrap_or(false)
    }
}

fn demo_lots() -> Vec<Record> {
    vec![Record::new()
        .with("InspectionLotNumber", "50000000032")
        .with("Plant", "0001")
        .with("PlantDescription", "werk_01")
        .with("LotOrigin", "05")
        .with("ActualQuantity", "12.000")
        .with("InspectedQuantity", "10.000")
        .with("UsageDecisionCode", "")
        .with("SelectedMaterial", "34")
        .with("UnitOfMeasure", "EA")
        .with("UsageDecisionStatus", "Pending")]
}

fn demo_results() -> Vec<Record> {
    vec![Record::new()
        .with("ResultId", "DEMO-1")
        .with("InspectionLotNumber", "50000000002")
        .with("PlantCode", "0001")
        .with("InspectorName", "TRAINEE")
        .with("RecordedDate", "2025-06-24T00:00:00")
        .with("UsageDecisionCode", "A")
        .with("StockCode", "100")
        .with("ResultCategory", "Unrestricted Stock")
        .with("RecordingStatus", "View Only")]
}

fn demo_usage_decisions() -> Vec<Record> {
    vec![Record::new()
        .with("InspectionLotNumber", "50000000032")
        .with("Plant", "0001")
        .with("LotQuantity", "12.000")
        .with("InspectedQuantity", "10.000")
        .with("UsageDecisionCode", "")
        .with("DecisionStatus", "Blocked")
        .with("DecisionMessage", "Cannot proceed")]
}
