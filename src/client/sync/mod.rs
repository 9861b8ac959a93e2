//! # Sync Façade
//!
//! Decides, per collection, which source populates the view store and owns
//! the collection's [`FetchState`].
//!
//! ## Load policy
//!
//! 1. Publish `Loading`.
//! 2. Fetch from the remote client, bounded by the caller's deadline.
//! 3. On success: normalize, attach derived fields, replay outstanding
//!    mutations, publish `Ready`.
//! 4. On any failure: substitute the fallback records and publish
//!    `Degraded`, or `Failed` when there are none. Prior records are always
//!    overwritten so the store never mixes live and substitute data.
//!
//! Every store write happens before the matching event is broadcast, and
//! each commit is a single atomic batch.
//!
//! ## Supersession
//!
//! Each load takes the next value of a per-collection generation counter.
//! Starting a load cancels the in-flight one for the same collection, and a
//! result is committed only when its generation is still the latest. Loads
//! of different collections run independently.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use qms_sync::client::sync::SyncFacade;
//! use qms_sync::shared::CollectionName;
//! use std::time::Duration;
//!
//! # async fn run(facade: SyncFacade) -> Result<(), Box<dyn std::error::Error>> {
//! let outcome = facade.load(&CollectionName::lots(), Duration::from_secs(10)).await?;
//! if outcome.state.is_degraded() {
//!     println!("showing substitute data");
//! }
//! # Ok(())
//! # }
//! ```

pub mod dashboard;

pub use dashboard::DashboardCounts;

use futures_util::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};

use crate::client::context::SyncContext;
use crate::client::derive;
use crate::client::fallback::FallbackProvider;
use crate::client::offline::reconciliation;
use crate::client::remote::{Query, RemoteError, RemoteServiceClient};
use crate::client::session::Session;
use crate::client::store::ViewStore;
use crate::shared::collection::CollectionName;
use crate::shared::config::{AppConfig, CollectionConfig};
use crate::shared::error::{SyncError, SyncResult};
use crate::shared::event::SyncEvent;
use crate::shared::fetch_state::FetchState;
use crate::shared::record::Record;

/// Result of a load
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOutcome {
    pub collection: CollectionName,
    /// State published by this load
    pub state: FetchState,
    /// Generation the load ran under
    pub generation: u64,
    /// Records written to the store
    pub record_count: usize,
    /// A later load replaced this one; nothing was written
    pub superseded: bool,
    /// Remote error that triggered the fallback
    pub error: Option<SyncError>,
}

/// Result of a count
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountOutcome {
    pub value: u64,
    /// The value is a substitute
    pub degraded: bool,
    #[serde(skip)]
    pub error: Option<SyncError>,
}

/// Reachability of one collection's service
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum ServiceStatus {
    /// The service answered its `$count` with this many records
    Connected(u64),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectivityReport {
    pub collection: CollectionName,
    pub status: ServiceStatus,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    state: FetchState,
    cancel: Option<oneshot::Sender<()>>,
}

/// Read side of the sync layer
#[derive(Clone)]
pub struct SyncFacade {
    ctx: Arc<SyncContext>,
    slots: Arc<Mutex<HashMap<CollectionName, Slot>>>,
}

impl std::fmt::Debug for SyncFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncFacade")
            .field("session", &self.ctx.session.username())
            .field("client", &self.ctx.client.name())
            .finish()
    }
}

impl SyncFacade {
    /// Create a façade for `session`. Every configured collection starts
    /// `Idle` with an empty record list.
    pub fn new(
        config: AppConfig,
        session: Session,
        client: Arc<dyn RemoteServiceClient>,
        fallback: FallbackProvider,
        store: ViewStore,
    ) -> Self {
        let mut writes = Vec::new();
        for collection in &config.collections {
            let name = &collection.name;
            writes.push((name.path("records"), json!([])));
            writes.push((name.path("state"), json!(FetchState::Idle.as_str())));
            writes.push((name.path("degraded"), json!(false)));
            writes.push((name.path("generation"), json!(0)));
        }
        if let Err(err) = store.set_many(writes) {
            tracing::error!("[Sync] Could not initialize the view store: {}", err);
        }

        tracing::info!(
            "[Sync] Façade ready for {} using the {} transport",
            session.username(),
            client.name()
        );
        Self {
            ctx: Arc::new(SyncContext::new(config, session, client, fallback, store)),
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub(crate) fn context(&self) -> Arc<SyncContext> {
        Arc::clone(&self.ctx)
    }

    pub fn store(&self) -> &ViewStore {
        &self.ctx.store
    }

    pub fn session(&self) -> &Session {
        &self.ctx.session
    }

    pub fn config(&self) -> &AppConfig {
        &self.ctx.config
    }

    /// Receive state changes and mutation outcomes.
    ///
    /// Events are best-effort: a receiver more than
    /// [`EVENT_CHANNEL_CAPACITY`](crate::client::context::EVENT_CHANNEL_CAPACITY)
    /// events behind gets `RecvError::Lagged` and misses them. On a lag,
    /// re-read the fetch states and the coordinator's `pending()` list,
    /// which always hold the current truth.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.ctx.events.subscribe()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<CollectionName, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load every record of a collection
    pub async fn load(&self, collection: &CollectionName, deadline: Duration) -> SyncResult<LoadOutcome> {
        self.load_filtered(collection, Query::new(), deadline).await
    }

    /// Load the records matching `query`. Fallback records are filtered
    /// with the same query.
    pub async fn load_filtered(
        &self,
        collection: &CollectionName,
        query: Query,
        deadline: Duration,
    ) -> SyncResult<LoadOutcome> {
        let config = self.ctx.collection(collection)?.clone();
        let request = self.ctx.request(deadline)?;

        let (generation, issued_at, cancelled) = self.begin(collection).await?;
        tracing::debug!(
            "[Sync] Loading {} (generation {}, deadline {:?})",
            collection,
            generation,
            deadline
        );

        let result = tokio::select! {
            result = self.ctx.client.fetch(&config, &query, &request) => Some(result),
            _ = cancelled => None,
        };

        match result {
            Some(result) => self.commit(&config, &query, generation, issued_at, result).await,
            None => {
                tracing::debug!("[Sync] Load of {} generation {} cancelled", collection, generation);
                Ok(self.superseded(collection, generation))
            }
        }
    }

    /// Reset the collection to `Idle`, then load it again from the remote,
    /// whatever its current state.
    pub async fn refresh(&self, collection: &CollectionName, deadline: Duration) -> SyncResult<LoadOutcome> {
        self.ctx.collection(collection)?;
        self.ctx.session.ensure_active()?;
        {
            let _commit = self.ctx.commit_lock.lock().await;
            let generation = {
                let mut slots = self.slots();
                let slot = slots.entry(collection.clone()).or_default();
                slot.state = FetchState::Idle;
                slot.generation
            };
            self.ctx
                .store
                .set(&collection.path("state"), json!(FetchState::Idle.as_str()))?;
            self.ctx
                .emit(SyncEvent::state_changed(collection.clone(), FetchState::Idle, generation));
        }
        self.load(collection, deadline).await
    }

    /// Start a new generation, cancelling the in-flight load
    async fn begin(&self, collection: &CollectionName) -> SyncResult<(u64, u64, oneshot::Receiver<()>)> {
        let _commit = self.ctx.commit_lock.lock().await;
        let (tx, rx) = oneshot::channel();
        let generation = {
            let mut slots = self.slots();
            let slot = slots.entry(collection.clone()).or_default();
            slot.generation += 1;
            slot.state = FetchState::Loading;
            if let Some(previous) = slot.cancel.replace(tx) {
                let _ = previous.send(());
            }
            slot.generation
        };
        let issued_at = self.ctx.tick();

        self.ctx.store.set_many(vec![
            (collection.path("state"), json!(FetchState::Loading.as_str())),
            (collection.path("generation"), json!(generation)),
        ])?;
        self.ctx
            .emit(SyncEvent::state_changed(collection.clone(), FetchState::Loading, generation));
        Ok((generation, issued_at, rx))
    }

    async fn commit(
        &self,
        config: &CollectionConfig,
        query: &Query,
        generation: u64,
        issued_at: u64,
        result: Result<Vec<Record>, RemoteError>,
    ) -> SyncResult<LoadOutcome> {
        let collection = &config.name;
        let _commit = self.ctx.commit_lock.lock().await;
        if self.generation(collection) != generation {
            tracing::debug!(
                "[Sync] Discarding stale result for {} generation {}",
                collection,
                generation
            );
            return Ok(self.superseded(collection, generation));
        }

        let (state, records, error) = match result {
            Ok(records) => (FetchState::Ready, records, None),
            Err(err) => {
                let error = SyncError::from(err);
                let substitute = if config.fallback {
                    query.apply(self.ctx.fallback.get(collection))
                } else {
                    Vec::new()
                };
                let state = if substitute.is_empty() {
                    FetchState::Failed
                } else {
                    FetchState::Degraded
                };
                tracing::warn!(
                    "[Sync] Fetch of {} failed ({}); {} substitute records, state {}",
                    collection,
                    error,
                    substitute.len(),
                    state
                );
                (state, substitute, Some(error))
            }
        };

        let mut records: Vec<Record> = records
            .into_iter()
            .map(|record| derive::prepare(config, record))
            .collect();
        let outstanding = self.ctx.queue.outstanding_for(collection, issued_at).await;
        if !outstanding.is_empty() {
            let merged = reconciliation::overlay(config, &mut records, &outstanding);
            tracing::debug!("[Sync] Replayed local mutations over {}: {:?}", collection, merged);
        }

        let last_error = error
            .as_ref()
            .map(|e| Value::String(e.to_string()))
            .unwrap_or(Value::Null);
        self.ctx.store.set_many(vec![
            SyncContext::records_write(collection, &records),
            (collection.path("state"), json!(state.as_str())),
            (collection.path("degraded"), json!(state.is_degraded())),
            (collection.path("lastUpdated"), json!(chrono::Utc::now().to_rfc3339())),
            (collection.path("lastError"), last_error),
            (collection.path("generation"), json!(generation)),
        ])?;

        {
            let mut slots = self.slots();
            let slot = slots.entry(collection.clone()).or_default();
            slot.state = state;
            slot.cancel = None;
        }

        if state == FetchState::Ready {
            let pruned = self.ctx.queue.prune_persisted(collection, issued_at).await;
            if pruned > 0 {
                tracing::debug!("[Sync] Pruned {} persisted mutations of {}", pruned, collection);
            }
        }

        self.ctx
            .emit(SyncEvent::state_changed(collection.clone(), state, generation));
        tracing::info!(
            "[Sync] {} is {} with {} records (generation {})",
            collection,
            state,
            records.len(),
            generation
        );

        Ok(LoadOutcome {
            collection: collection.clone(),
            state,
            generation,
            record_count: records.len(),
            superseded: false,
            error,
        })
    }

    fn generation(&self, collection: &CollectionName) -> u64 {
        self.slots().get(collection).map(|s| s.generation).unwrap_or(0)
    }

    fn superseded(&self, collection: &CollectionName, generation: u64) -> LoadOutcome {
        LoadOutcome {
            collection: collection.clone(),
            state: self.slots().get(collection).map(|s| s.state).unwrap_or_default(),
            generation,
            record_count: 0,
            superseded: true,
            error: None,
        }
    }

    /// Count the records of a collection. A failed count yields the
    /// collection's substitute count, flagged as degraded.
    pub async fn count(&self, collection: &CollectionName, deadline: Duration) -> SyncResult<CountOutcome> {
        let config = self.ctx.collection(collection)?;
        let request = self.ctx.request(deadline)?;

        match self.ctx.client.count(config, &Query::new(), &request).await {
            Ok(value) => Ok(CountOutcome {
                value,
                degraded: false,
                error: None,
            }),
            Err(err) => {
                let value = if config.fallback {
                    config.fallback_count.unwrap_or(0)
                } else {
                    0
                };
                tracing::warn!(
                    "[Sync] Count of {} failed ({}); using substitute {}",
                    collection,
                    err,
                    value
                );
                Ok(CountOutcome {
                    value,
                    degraded: true,
                    error: Some(err.into()),
                })
            }
        }
    }

    /// Count every configured collection concurrently
    pub async fn check_connectivity(&self, deadline: Duration) -> SyncResult<Vec<ConnectivityReport>> {
        let request = self.ctx.request(deadline)?;
        let checks = self.ctx.config.collections.iter().map(|config| {
            let request = request.clone();
            async move {
                let status = match self.ctx.client.count(config, &Query::new(), &request).await {
                    Ok(count) => ServiceStatus::Connected(count),
                    Err(err) => ServiceStatus::Failed(err.to_string()),
                };
                ConnectivityReport {
                    collection: config.name.clone(),
                    status,
                }
            }
        });

        let reports = join_all(checks).await;
        for report in &reports {
            match &report.status {
                ServiceStatus::Connected(count) => {
                    tracing::info!("[Sync] {} service connected ({} records)", report.collection, count)
                }
                ServiceStatus::Failed(reason) => {
                    tracing::warn!("[Sync] {} service failed: {}", report.collection, reason)
                }
            }
        }
        Ok(reports)
    }

    pub fn fetch_state(&self, collection: &CollectionName) -> SyncResult<FetchState> {
        self.ctx.collection(collection)?;
        self.ctx.session.ensure_active()?;
        Ok(self.slots().get(collection).map(|s| s.state).unwrap_or_default())
    }

    /// Records currently held for a collection
    pub fn records(&self, collection: &CollectionName) -> SyncResult<Vec<Record>> {
        self.ctx.collection(collection)?;
        self.ctx.session.ensure_active()?;
        self.ctx.read_records(collection)
    }

    /// The record with `key`
    pub fn record(&self, collection: &CollectionName, key: &str) -> SyncResult<Record> {
        let config = self.ctx.collection(collection)?;
        self.ctx.session.ensure_active()?;
        self.ctx
            .read_records(collection)?
            .into_iter()
            .find(|r| r.key(&config.key_field).as_deref() == Some(key))
            .ok_or_else(|| SyncError::not_found(collection.as_str(), key))
    }
}
