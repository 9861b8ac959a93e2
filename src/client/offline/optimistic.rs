//! # Optimistic Delta Application
//!
//! Computes the local effect of a [`RecordDelta`] against the records
//! currently held for a collection. Nothing is written here: the result is
//! either a complete [`AppliedDelta`] or an error, so a rejected write leaves
//! the store untouched.
//!
//! Quantity bookings are all-or-nothing. The parts of a composite write must
//! be finite, non-negative, and sum to no more than `total - recorded`.

use std::collections::BTreeMap;

use crate::client::derive;
use crate::shared::config::{CollectionConfig, QuantityRule};
use crate::shared::error::{SyncError, SyncResult};
use crate::shared::record::{FieldValue, Record, RecordDelta};

/// Tolerance for quantity comparisons
pub const QUANTITY_EPSILON: f64 = 1e-9;

/// Prefix of client-side temporary keys
pub const TEMP_KEY_PREFIX: &str = "local-";

/// Outcome of applying a delta locally
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedDelta {
    /// Position of the updated record, `None` for inserts
    pub index: Option<usize>,
    /// Key of the affected record
    pub key: String,
    pub inserted: bool,
    /// Whether `key` is a client-side temporary key
    pub temporary_key: bool,
    /// Record before the write
    pub before: Option<Record>,
    /// Record after the write, derived fields recomputed
    pub after: Record,
    /// Field values written
    pub overlay: BTreeMap<String, FieldValue>,
    /// Body for the remote create
    pub payload: Record,
}

pub fn is_temporary_key(key: &str) -> bool {
    key.starts_with(TEMP_KEY_PREFIX)
}

pub fn temporary_key() -> String {
    format!("{}{}", TEMP_KEY_PREFIX, uuid::Uuid::new_v4())
}

/// Apply `delta` to `records` without mutating them
pub fn apply(config: &CollectionConfig, records: &[Record], delta: &RecordDelta) -> SyncResult<AppliedDelta> {
    if delta.fields.is_empty() {
        return Err(SyncError::validation("fields", "delta carries no fields"));
    }
    if let Some(field) = delta.fields.keys().find(|f| derive::is_derived(config, f)) {
        return Err(SyncError::validation(field.clone(), "derived fields are read-only"));
    }

    let key_field = config.key_field.as_str();
    let (index, key, is_temporary, base) = match &delta.key {
        Some(key) => {
            let index = records
                .iter()
                .position(|r| r.key(key_field).as_deref() == Some(key.as_str()))
                .ok_or_else(|| SyncError::not_found(config.name.as_str(), key.clone()))?;
            if let Some(value) = delta.fields.get(key_field) {
                if value.to_key_string().as_deref() != Some(key.as_str()) {
                    return Err(SyncError::validation(key_field, "the key of a record cannot change"));
                }
            }
            (Some(index), key.clone(), false, records[index].clone())
        }
        None => {
            for field in &config.required_on_insert {
                if delta.fields.get(field).map(FieldValue::is_blank).unwrap_or(true) {
                    return Err(SyncError::validation(field.clone(), "is required"));
                }
            }
            let given = delta
                .fields
                .get(key_field)
                .filter(|v| !v.is_blank())
                .and_then(FieldValue::to_key_string);
            match given {
                Some(key) => {
                    if records.iter().any(|r| r.key(key_field).as_deref() == Some(key.as_str())) {
                        return Err(SyncError::validation(
                            key_field,
                            format!("a record with key '{}' already exists", key),
                        ));
                    }
                    (None, key, false, Record::new())
                }
                None => (None, temporary_key(), true, Record::new()),
            }
        }
    };

    let mut working = base.clone();
    let mut written: Vec<String> = Vec::new();
    let parts = config
        .quantity
        .as_ref()
        .map(|rule| rule.part_fields.as_slice())
        .unwrap_or(&[]);

    for (field, value) in &delta.fields {
        if !parts.contains(field) {
            working.set(field.clone(), value.clone());
            written.push(field.clone());
        }
    }
    if index.is_none() {
        working.set(key_field, key.clone());
        written.push(key_field.to_string());
    }

    if let Some(rule) = &config.quantity {
        written.extend(apply_quantity(rule, &mut working, delta)?);
    }

    let after = derive::prepare(config, working);
    let overlay: BTreeMap<String, FieldValue> = if index.is_none() {
        derive::strip_derived(config, &after).fields().clone()
    } else {
        written
            .iter()
            .filter_map(|f| after.get(f).map(|v| (f.clone(), v.clone())))
            .collect()
    };

    let mut payload: Record = overlay.clone().into_iter().collect();
    if is_temporary {
        payload.remove(key_field);
    } else {
        payload.set(key_field, key.clone());
    }

    Ok(AppliedDelta {
        index,
        key,
        inserted: index.is_none(),
        temporary_key: is_temporary,
        before: index.map(|_| base),
        after,
        overlay,
        payload,
    })
}

/// Validate and accumulate quantity parts onto `working`. Returns the
/// fields that were written.
fn apply_quantity(rule: &QuantityRule, working: &mut Record, delta: &RecordDelta) -> SyncResult<Vec<String>> {
    let total = working.number(&rule.total_field);

    if let Some(value) = delta.fields.get(&rule.recorded_field) {
        let recorded = quantity(&rule.recorded_field, value)?;
        if recorded > total + QUANTITY_EPSILON {
            return Err(SyncError::validation(
                rule.recorded_field.clone(),
                format!("{} exceeds the total quantity {}", recorded, total),
            ));
        }
        working.set(rule.recorded_field.clone(), recorded);
    }

    let mut parts = Vec::new();
    for field in &rule.part_fields {
        if let Some(value) = delta.fields.get(field) {
            parts.push((field.clone(), quantity(field, value)?));
        }
    }
    if parts.is_empty() {
        return Ok(Vec::new());
    }

    let recorded = working.number(&rule.recorded_field);
    let remaining = total - recorded;
    let sum: f64 = parts.iter().map(|(_, v)| v).sum();
    if sum > remaining + QUANTITY_EPSILON {
        return Err(SyncError::validation(
            rule.recorded_field.clone(),
            format!("booked quantity {} exceeds the remaining quantity {}", sum, remaining),
        ));
    }

    let mut written = Vec::with_capacity(parts.len() + 1);
    for (field, value) in parts {
        let current = working.number(&field);
        working.set(field.clone(), current + value);
        written.push(field);
    }
    working.set(rule.recorded_field.clone(), recorded + sum);
    written.push(rule.recorded_field.clone());
    Ok(written)
}

/// Finite, non-negative quantity from a field value
fn quantity(field: &str, value: &FieldValue) -> SyncResult<f64> {
    let parsed = match value {
        FieldValue::Number(n) => Some(*n),
        FieldValue::Text(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(n) if n.is_finite() && n >= 0.0 => Ok(n),
        Some(_) => Err(SyncError::validation(field, "quantity must be finite and not negative")),
        None => Err(SyncError::validation(field, "quantity must be a number")),
    }
}
