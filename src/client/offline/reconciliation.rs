//! # State Reconciliation
//!
//! Merges authoritative load results with the mutations that are still
//! outstanding for a collection. Mutations are replayed in submission order
//! and their written values win over the fetched values, so a load that
//! predates a mutation never erases the user's input.
//!
//! [`replay`] recomputes the effect of a run of mutations over a new base
//! image of their record. It is used when an earlier mutation is discarded
//! and the later ones must stop carrying its effect.

use uuid::Uuid;

use crate::client::derive;
use crate::client::offline::optimistic::{self, AppliedDelta};
use crate::client::offline::queue::PendingMutation;
use crate::shared::config::CollectionConfig;
use crate::shared::error::SyncResult;
use crate::shared::record::Record;

/// Summary of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationResult {
    /// Fetched records whose fields were overridden by local values
    pub merged: usize,
    /// Locally inserted records absent from the fetch and re-added
    pub reinserted: usize,
    /// Updates whose record no longer exists remotely
    pub orphaned: usize,
}

/// Overlay `pending` (already filtered to the outstanding ones, in
/// submission order) onto `fetched`. Derived fields of every touched record
/// are recomputed.
pub fn overlay(
    config: &CollectionConfig,
    fetched: &mut Vec<Record>,
    pending: &[PendingMutation],
) -> ReconciliationResult {
    let mut result = ReconciliationResult::default();
    let key_field = config.key_field.as_str();

    for mutation in pending {
        let position = fetched
            .iter()
            .position(|r| r.key(key_field).as_deref() == Some(mutation.key.as_str()));

        match position {
            Some(index) => {
                let record = &mut fetched[index];
                record.merge_fields(&mutation.overlay);
                derive::attach_derived(config.derived, record);
                result.merged += 1;
            }
            None if mutation.inserted => {
                let mut record = mutation.after.clone();
                derive::attach_derived(config.derived, &mut record);
                fetched.push(record);
                result.reinserted += 1;
            }
            None => {
                tracing::debug!(
                    "[Sync] Record {} of {} vanished remotely; dropping its local overlay",
                    mutation.key,
                    config.name
                );
                result.orphaned += 1;
            }
        }
    }

    result
}

/// Re-apply `chain` (updates of one record, in submission order) over
/// `base`. Returns the resulting record and each mutation's new effect.
/// Fails without side effects when a delta no longer validates.
pub fn replay(
    config: &CollectionConfig,
    base: Record,
    chain: &[PendingMutation],
) -> SyncResult<(Record, Vec<(Uuid, AppliedDelta)>)> {
    let mut current = base;
    let mut rebased = Vec::with_capacity(chain.len());

    for mutation in chain {
        // The record may have been rekeyed since the delta was submitted
        let mut delta = mutation.delta.clone();
        delta.key = Some(mutation.key.clone());

        let applied = optimistic::apply(config, std::slice::from_ref(&current), &delta)?;
        current = applied.after.clone();
        rebased.push((mutation.correlation_id, applied));
    }

    Ok((current, rebased))
}
