//! # Mutation Queue
//!
//! Holds every pending mutation from the moment its local effect is applied
//! until it is pruned after persistence or explicitly discarded.
//!
//! ## Features
//!
//! - **Submission Order**: mutations are kept in the order they were submitted
//! - **Status Tracking**: each mutation moves through [`MutationState`]
//! - **Overlay Source**: outstanding mutations are replayed over load results
//! - **Pruning**: persisted mutations are dropped once a later load commits

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::optimistic::AppliedDelta;
use crate::shared::collection::CollectionName;
use crate::shared::record::{FieldValue, Record, RecordDelta};

/// Persistence status of a pending mutation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MutationState {
    /// Visible in the store, persistence not yet requested
    AppliedLocally,
    /// Remote create in flight or queued behind earlier mutations
    PersistPending,
    /// Remote create succeeded
    Persisted,
    /// Remote create failed; the local effect is kept
    PersistFailed,
}

/// Queued write with its local effect and persistence metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingMutation {
    /// Client-generated correlation id
    pub correlation_id: Uuid,
    /// Target collection
    pub collection: CollectionName,
    /// Key of the affected record (temporary for unpersisted inserts)
    pub key: String,
    /// Whether the mutation inserted a new record
    pub inserted: bool,
    /// Delta as submitted
    pub delta: RecordDelta,
    /// Field values this mutation wrote, replayed over later load results
    pub overlay: BTreeMap<String, FieldValue>,
    /// Record before the mutation, `None` for inserts
    pub before: Option<Record>,
    /// Record after the mutation, including derived fields
    pub after: Record,
    /// Body sent to the remote create
    pub payload: Record,
    /// Current status
    pub state: MutationState,
    /// Logical time at which the local effect was applied
    pub created_at: u64,
    /// Logical time at which the server confirmed the write
    pub persisted_at: Option<u64>,
    /// Timestamp when queued
    pub queued_at: String,
    /// Timestamp of last persist attempt
    pub last_attempt: Option<String>,
    /// Error message from last failure
    pub last_error: Option<String>,
    /// Number of persist attempts
    pub attempts: u32,
}

impl PendingMutation {
    /// Not yet handed to the server, so its effect can still be undone
    pub fn is_unsent(&self) -> bool {
        matches!(
            self.state,
            MutationState::AppliedLocally | MutationState::PersistFailed
        )
    }

    /// Whether a load issued at logical time `issued_at` may predate this
    /// mutation's persistence and must therefore be overlaid with it
    pub fn is_outstanding_at(&self, issued_at: u64) -> bool {
        match self.persisted_at {
            Some(persisted_at) => self.state != MutationState::Persisted || persisted_at > issued_at,
            None => true,
        }
    }
}

/// Queue statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Total mutations held
    pub total: usize,
    /// Applied locally, persistence not yet requested
    pub applied_locally: usize,
    /// Waiting for or running the remote create
    pub persist_pending: usize,
    /// Confirmed by the server, not yet pruned
    pub persisted: usize,
    /// Failed and awaiting retry or discard
    pub persist_failed: usize,
}

/// Submission-ordered pending mutations
#[derive(Debug, Default)]
pub struct MutationQueue {
    mutations: RwLock<VecDeque<PendingMutation>>,
}

impl MutationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn enqueue(&self, mutation: PendingMutation) {
        self.mutations.write().await.push_back(mutation);
    }

    pub async fn get(&self, correlation_id: &Uuid) -> Option<PendingMutation> {
        self.mutations
            .read()
            .await
            .iter()
            .find(|m| m.correlation_id == *correlation_id)
            .cloned()
    }

    /// Move a mutation to `state`. Returns `false` when it is unknown.
    pub async fn set_state(&self, correlation_id: &Uuid, state: MutationState) -> bool {
        let mut mutations = self.mutations.write().await;
        match mutations.iter_mut().find(|m| m.correlation_id == *correlation_id) {
            Some(m) => {
                m.state = state;
                if state == MutationState::PersistPending {
                    m.last_error = None;
                }
                true
            }
            None => false,
        }
    }

    /// Record the start of a persist attempt
    pub async fn start_attempt(&self, correlation_id: &Uuid) {
        let mut mutations = self.mutations.write().await;
        if let Some(m) = mutations.iter_mut().find(|m| m.correlation_id == *correlation_id) {
            m.attempts += 1;
            m.last_attempt = Some(chrono::Utc::now().to_rfc3339());
        }
    }

    pub async fn mark_persisted(&self, correlation_id: &Uuid, at: u64) {
        let mut mutations = self.mutations.write().await;
        if let Some(m) = mutations.iter_mut().find(|m| m.correlation_id == *correlation_id) {
            m.state = MutationState::Persisted;
            m.persisted_at = Some(at);
            m.last_error = None;
        }
    }

    pub async fn mark_failed(&self, correlation_id: &Uuid, error: String) {
        let mut mutations = self.mutations.write().await;
        if let Some(m) = mutations.iter_mut().find(|m| m.correlation_id == *correlation_id) {
            m.state = MutationState::PersistFailed;
            m.last_error = Some(error);
        }
    }

    pub async fn remove(&self, correlation_id: &Uuid) -> Option<PendingMutation> {
        let mut mutations = self.mutations.write().await;
        let index = mutations
            .iter()
            .position(|m| m.correlation_id == *correlation_id)?;
        mutations.remove(index)
    }

    /// Remove an unsent mutation and install the recomputed effects of the
    /// later mutations on its record. Nothing changes and `false` is
    /// returned unless all of them are still unsent.
    pub async fn discard(&self, correlation_id: &Uuid, rebased: Vec<(Uuid, AppliedDelta)>) -> bool {
        let mut mutations = self.mutations.write().await;
        let unsent = |id: &Uuid| mutations.iter().any(|m| m.correlation_id == *id && m.is_unsent());
        if !unsent(correlation_id) || !rebased.iter().all(|(id, _)| unsent(id)) {
            return false;
        }

        for (id, applied) in rebased {
            if let Some(m) = mutations.iter_mut().find(|m| m.correlation_id == id) {
                m.before = applied.before;
                m.after = applied.after;
                m.overlay = applied.overlay;
                m.payload = applied.payload;
            }
        }
        mutations.retain(|m| m.correlation_id != *correlation_id);
        true
    }

    /// Mutations of a collection, in submission order
    pub async fn for_collection(&self, collection: &CollectionName) -> Vec<PendingMutation> {
        self.mutations
            .read()
            .await
            .iter()
            .filter(|m| &m.collection == collection)
            .cloned()
            .collect()
    }

    /// Mutations a load issued at `issued_at` must be overlaid with
    pub async fn outstanding_for(&self, collection: &CollectionName, issued_at: u64) -> Vec<PendingMutation> {
        self.mutations
            .read()
            .await
            .iter()
            .filter(|m| &m.collection == collection && m.is_outstanding_at(issued_at))
            .cloned()
            .collect()
    }

    /// Drop persisted mutations already reflected by a load issued at
    /// `issued_at`. Returns the number removed.
    pub async fn prune_persisted(&self, collection: &CollectionName, issued_at: u64) -> usize {
        let mut mutations = self.mutations.write().await;
        let before = mutations.len();
        mutations.retain(|m| &m.collection != collection || m.is_outstanding_at(issued_at));
        before - mutations.len()
    }

    /// Replace a temporary key with the server-assigned one
    pub async fn rekey(&self, collection: &CollectionName, old_key: &str, new_key: &str, key_field: &str) {
        let mut mutations = self.mutations.write().await;
        for m in mutations
            .iter_mut()
            .filter(|m| &m.collection == collection && m.key == old_key)
        {
            m.key = new_key.to_string();
            m.after.set(key_field, new_key);
            if m.payload.contains(key_field) {
                m.payload.set(key_field, new_key);
            }
            if m.overlay.contains_key(key_field) {
                m.overlay.insert(key_field.to_string(), FieldValue::from(new_key));
            }
        }
    }

    /// Merge server-provided fields into the recorded after-image
    pub async fn merge_canonical(&self, correlation_id: &Uuid, canonical: &Record) {
        let mut mutations = self.mutations.write().await;
        if let Some(m) = mutations.iter_mut().find(|m| m.correlation_id == *correlation_id) {
            m.after.merge_missing(canonical);
        }
    }

    pub async fn count_by_state(&self, state: MutationState) -> usize {
        self.mutations
            .read()
            .await
            .iter()
            .filter(|m| m.state == state)
            .count()
    }

    pub async fn stats(&self) -> QueueStats {
        let mutations = self.mutations.read().await;
        let mut stats = QueueStats {
            total: mutations.len(),
            ..QueueStats::default()
        };
        for m in mutations.iter() {
            match m.state {
                MutationState::AppliedLocally => stats.applied_locally += 1,
                MutationState::PersistPending => stats.persist_pending += 1,
                MutationState::Persisted => stats.persisted += 1,
                MutationState::PersistFailed => stats.persist_failed += 1,
            }
        }
        stats
    }

    pub async fn len(&self) -> usize {
        self.mutations.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.mutations.read().await.is_empty()
    }
}
