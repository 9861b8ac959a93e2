/**
 * Shared Sync Context
 *
 * The `SyncContext` is the state container shared by the sync façade and
 * the mutation coordinator. It holds:
 * - the configuration and the session the components were built for
 * - the remote client and the fallback provider
 * - the view store and the pending mutation queue
 * - the event broadcast channel
 * - a logical clock ordering loads against mutations
 * - the commit lock serializing every write of collection records
 *
 * # Commit lock
 *
 * Load commits, optimistic applies and persist reconciliation all
 * read-modify-write `/c/records`. Holding `commit_lock` across the read
 * and the write keeps those sequences from interleaving.
 */

use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};

use crate::client::fallback::FallbackProvider;
use crate::client::offline::queue::MutationQueue;
use crate::client::remote::{RemoteServiceClient, RequestContext};
use crate::client::session::Session;
use crate::client::store::ViewStore;
use crate::shared::collection::CollectionName;
use crate::shared::config::{AppConfig, CollectionConfig};
use crate::shared::error::{SyncError, SyncResult};
use crate::shared::event::SyncEvent;
use crate::shared::record::Record;

/// Capacity of the event broadcast channel
pub const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Broadcast sender for sync events
pub type SyncEventBroadcast = broadcast::Sender<SyncEvent>;

pub struct SyncContext {
    pub config: AppConfig,
    pub session: Session,
    pub client: Arc<dyn RemoteServiceClient>,
    pub fallback: FallbackProvider,
    pub store: ViewStore,
    pub queue: MutationQueue,
    pub events: SyncEventBroadcast,
    clock: AtomicU64,
    pub commit_lock: Mutex<()>,
}

impl SyncContext {
    pub fn new(
        config: AppConfig,
        session: Session,
        client: Arc<dyn RemoteServiceClient>,
        fallback: FallbackProvider,
        store: ViewStore,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            session,
            client,
            fallback,
            store,
            queue: MutationQueue::new(),
            events,
            clock: AtomicU64::new(0),
            commit_lock: Mutex::new(()),
        }
    }

    /// Advance the logical clock and return the new time
    pub fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Configuration of a collection
    pub fn collection(&self, name: &CollectionName) -> SyncResult<&CollectionConfig> {
        self.config
            .collection(name)
            .ok_or_else(|| SyncError::UnknownCollection(name.to_string()))
    }

    /// Request settings for the active session
    pub fn request(&self, deadline: Duration) -> SyncResult<RequestContext> {
        self.session.ensure_active()?;
        Ok(self.session.request(deadline))
    }

    /// Broadcast an event. Having no subscribers is not an error.
    pub fn emit(&self, event: SyncEvent) {
        match self.events.send(event) {
            Ok(count) => tracing::debug!("[Sync] Event delivered to {} subscribers", count),
            Err(_) => tracing::trace!("[Sync] Event dropped, no subscribers"),
        }
    }

    /// Records currently materialized for a collection
    pub fn read_records(&self, collection: &CollectionName) -> SyncResult<Vec<Record>> {
        match self.store.get(&collection.path("records")) {
            Some(Value::Array(items)) => items.iter().map(Record::from_json).collect(),
            Some(Value::Null) | None => Ok(Vec::new()),
            Some(_) => Err(SyncError::serialization(format!(
                "{} is not an array",
                collection.path("records")
            ))),
        }
    }

    /// Store write replacing the records of a collection
    pub fn records_write(collection: &CollectionName, records: &[Record]) -> (String, Value) {
        (
            collection.path("records"),
            Value::Array(records.iter().map(Record::to_json).collect()),
        )
    }
}
