/**
 * Sync Event System
 *
 * Events emitted by the sync façade and the mutation coordinator. They are
 * delivered over a `tokio::sync::broadcast` channel so that several UI
 * consumers can observe state transitions and persistence outcomes.
 * Persist failures in particular are surfaced here so that unsaved user
 * input can be offered for retry.
 */
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::shared::collection::CollectionName;
use crate::shared::error::SyncError;
use crate::shared::fetch_state::FetchState;

/// Kind of sync event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEventKind {
    /// Fetch state of a collection changed
    StateChanged {
        state: FetchState,
        generation: u64,
    },
    /// A pending mutation reached the server
    MutationPersisted {
        correlation_id: Uuid,
    },
    /// A pending mutation could not be persisted; its local effect is kept
    MutationFailed {
        correlation_id: Uuid,
        #[serde(skip)]
        error: Option<SyncError>,
        message: String,
    },
    /// A non-persisted mutation was rolled back on request
    MutationDiscarded {
        correlation_id: Uuid,
    },
}

/// Event broadcast to all subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncEvent {
    /// Collection the event refers to
    pub collection: CollectionName,
    /// What happened
    pub kind: SyncEventKind,
    /// Timestamp when the event occurred
    pub timestamp: String,
}

impl SyncEvent {
    /// Create a new event
    pub fn new(collection: CollectionName, kind: SyncEventKind) -> Self {
        Self {
            collection,
            kind,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn state_changed(collection: CollectionName, state: FetchState, generation: u64) -> Self {
        Self::new(collection, SyncEventKind::StateChanged { state, generation })
    }

    pub fn persisted(collection: CollectionName, correlation_id: Uuid) -> Self {
        Self::new(collection, SyncEventKind::MutationPersisted { correlation_id })
    }

    pub fn failed(collection: CollectionName, correlation_id: Uuid, error: SyncError) -> Self {
        Self::new(
            collection,
            SyncEventKind::MutationFailed {
                correlation_id,
                message: error.to_string(),
                error: Some(error),
            },
        )
    }

    pub fn discarded(collection: CollectionName, correlation_id: Uuid) -> Self {
        Self::new(collection, SyncEventKind::MutationDiscarded { correlation_id })
    }

    /// Correlation id of the mutation this event refers to, if any
    pub fn correlation_id(&self) -> Option<Uuid> {
        match &self.kind {
            SyncEventKind::StateChanged { .. } => None,
            SyncEventKind::MutationPersisted { correlation_id }
            | SyncEventKind::MutationFailed { correlation_id, .. }
            | SyncEventKind::MutationDiscarded { correlation_id } => Some(*correlation_id),
        }
    }
}
