//! # Optimistic Mutation Coordinator
//!
//! Applies local writes to the view store immediately, then persists them
//! through the remote client without ever losing user input.
//!
//! ## Architecture
//!
//! - `optimistic.rs`: computes the local effect of a delta and validates it
//! - `queue.rs`: submission-ordered queue of pending mutations
//! - `persist.rs`: per-collection workers running the remote creates
//! - `reconciliation.rs`: replays outstanding mutations over load results
//!
//! ## Guarantees
//!
//! - A validation failure is reported before anything is written.
//! - Once `submit` returns, the store reflects the delta, whatever the
//!   persist outcome.
//! - A failed persist keeps the local effect, marks the mutation
//!   `PersistFailed` and broadcasts `MutationFailed`. Only an explicit
//!   [`MutationCoordinator::discard`] rolls it back.
//! - Mutations of one collection are persisted in submission order.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use qms_sync::client::offline::MutationCoordinator;
//! use qms_sync::client::sync::SyncFacade;
//! use qms_sync::shared::{CollectionName, RecordDelta};
//!
//! # async fn run(facade: SyncFacade) -> Result<(), Box<dyn std::error::Error>> {
//! let coordinator = MutationCoordinator::new(&facade);
//! let delta = RecordDelta::update("50000000032").with("UnrestrictedQuantity", 1.5);
//! let id = coordinator.submit(&CollectionName::lots(), delta).await?;
//! println!("booked as {}", id);
//! # Ok(())
//! # }
//! ```

pub mod optimistic;
pub mod persist;
pub mod queue;
pub mod reconciliation;

pub use optimistic::AppliedDelta;
pub use persist::PersistJob;
pub use queue::{MutationQueue, MutationState, PendingMutation, QueueStats};
pub use reconciliation::ReconciliationResult;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, mpsc, oneshot};
use uuid::Uuid;

use crate::client::context::SyncContext;
use crate::client::derive;
use crate::client::sync::SyncFacade;
use crate::shared::collection::CollectionName;
use crate::shared::error::{SyncError, SyncResult};
use crate::shared::event::SyncEvent;
use crate::shared::record::RecordDelta;

/// Persist outcome reported by the `*_and_wait` variants
#[derive(Debug, Clone, PartialEq)]
pub struct MutationOutcome {
    pub correlation_id: Uuid,
    pub state: MutationState,
    /// Persist error, when the state is `PersistFailed`
    pub error: Option<SyncError>,
}

/// Write side of the sync layer
#[derive(Clone)]
pub struct MutationCoordinator {
    ctx: Arc<SyncContext>,
    workers: Arc<Mutex<HashMap<CollectionName, mpsc::UnboundedSender<PersistJob>>>>,
}

impl std::fmt::Debug for MutationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationCoordinator")
            .field("session", &self.ctx.session.username())
            .finish()
    }
}

impl MutationCoordinator {
    /// Coordinator sharing the store, queue and session of `facade`
    pub fn new(facade: &SyncFacade) -> Self {
        Self {
            ctx: facade.context(),
            workers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Receive persist outcomes.
    ///
    /// The channel holds a bounded backlog. A receiver that falls behind
    /// gets `RecvError::Lagged` and the skipped events, `MutationFailed`
    /// included, are gone. After a lag, re-read [`pending`](Self::pending)
    /// or [`stats`](Self::stats): the queue is the durable record of every
    /// failed mutation.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.ctx.events.subscribe()
    }

    /// Apply `delta` locally and start persisting it. Returns once the
    /// store reflects the delta.
    pub async fn submit(&self, collection: &CollectionName, delta: RecordDelta) -> SyncResult<Uuid> {
        let correlation_id = self.apply_locally(collection, delta).await?;
        self.dispatch(collection, correlation_id, None).await?;
        Ok(correlation_id)
    }

    /// [`submit`](Self::submit), then wait for the persist outcome
    pub async fn submit_and_wait(&self, collection: &CollectionName, delta: RecordDelta) -> SyncResult<MutationOutcome> {
        let correlation_id = self.apply_locally(collection, delta).await?;
        self.dispatch_and_wait(collection, correlation_id).await
    }

    /// Attempt a `PersistFailed` mutation again
    pub async fn retry(&self, correlation_id: Uuid) -> SyncResult<()> {
        let collection = self.prepare_retry(correlation_id).await?;
        self.dispatch(&collection, correlation_id, None).await
    }

    /// [`retry`](Self::retry), then wait for the persist outcome
    pub async fn retry_and_wait(&self, correlation_id: Uuid) -> SyncResult<MutationOutcome> {
        let collection = self.prepare_retry(correlation_id).await?;
        self.dispatch_and_wait(&collection, correlation_id).await
    }

    /// Roll back a mutation that was not persisted. An inserted record is
    /// removed. For an update, the touched fields get their pre-submit
    /// values back and every later unsent mutation on the same record is
    /// replayed over that image, so its local effect and its payload no
    /// longer include the discarded change.
    ///
    /// Refused while a later mutation on the same record is being or has
    /// been persisted, since its payload already carries this change, and
    /// for an insert that later mutations build on.
    pub async fn discard(&self, correlation_id: Uuid) -> SyncResult<()> {
        self.ctx.session.ensure_active()?;
        let _commit = self.ctx.commit_lock.lock().await;

        let mutation = self
            .ctx
            .queue
            .get(&correlation_id)
            .await
            .ok_or(SyncError::UnknownMutation(correlation_id))?;
        if !mutation.is_unsent() {
            return Err(SyncError::validation(
                "state",
                format!("a {:?} mutation cannot be discarded", mutation.state),
            ));
        }

        let later: Vec<PendingMutation> = self
            .ctx
            .queue
            .for_collection(&mutation.collection)
            .await
            .into_iter()
            .skip_while(|m| m.correlation_id != correlation_id)
            .skip(1)
            .filter(|m| m.key == mutation.key)
            .collect();
        if let Some(sent) = later.iter().find(|m| !m.is_unsent()) {
            return Err(SyncError::validation(
                "state",
                format!(
                    "mutation {} on record {} is {:?} and already includes this change",
                    sent.correlation_id, mutation.key, sent.state
                ),
            ));
        }
        if mutation.inserted && !later.is_empty() {
            return Err(SyncError::validation(
                "state",
                format!("record {} has later changes; discard those first", mutation.key),
            ));
        }

        let config = self.ctx.collection(&mutation.collection)?;
        let key_field = config.key_field.as_str();
        let mut records = self.ctx.read_records(&mutation.collection)?;
        let position = records
            .iter()
            .position(|r| r.key(key_field).as_deref() == Some(mutation.key.as_str()));

        let mut rebased = Vec::new();
        match (position, &mutation.before) {
            (Some(index), _) if mutation.inserted => {
                records.remove(index);
            }
            (Some(index), Some(before)) => {
                let mut record = records[index].clone();
                let touched = std::iter::once(&mutation)
                    .chain(later.iter())
                    .flat_map(|m| m.overlay.keys());
                for field in touched {
                    match before.get(field) {
                        Some(value) => record.set(field.clone(), value.clone()),
                        None => {
                            record.remove(field);
                        }
                    }
                }

                let (mut record, replayed) = reconciliation::replay(config, record, &later).map_err(|err| {
                    tracing::warn!(
                        "[Mutation] Cannot discard {}: later changes to {} no longer apply: {}",
                        correlation_id,
                        mutation.key,
                        err
                    );
                    err
                })?;
                derive::attach_derived(config.derived, &mut record);
                records[index] = record;
                rebased = replayed;
            }
            _ => {}
        }

        let replayed = rebased.len();
        if !self.ctx.queue.discard(&correlation_id, rebased).await {
            return Err(SyncError::validation(
                "state",
                "a mutation on this record was sent while discarding",
            ));
        }
        self.ctx
            .store
            .set_many(vec![SyncContext::records_write(&mutation.collection, &records)])?;
        self.ctx
            .emit(SyncEvent::discarded(mutation.collection.clone(), correlation_id));
        tracing::info!(
            "[Mutation] {} discarded on {} ({} later change(s) replayed)",
            correlation_id,
            mutation.collection,
            replayed
        );
        Ok(())
    }

    /// Mutations held for a collection, in submission order
    pub async fn pending(&self, collection: &CollectionName) -> Vec<PendingMutation> {
        self.ctx.queue.for_collection(collection).await
    }

    pub async fn mutation(&self, correlation_id: Uuid) -> Option<PendingMutation> {
        self.ctx.queue.get(&correlation_id).await
    }

    pub async fn stats(&self) -> QueueStats {
        self.ctx.queue.stats().await
    }

    async fn apply_locally(&self, collection: &CollectionName, delta: RecordDelta) -> SyncResult<Uuid> {
        self.ctx.session.ensure_active()?;
        let config = self.ctx.collection(collection)?;
        let correlation_id = Uuid::new_v4();

        let _commit = self.ctx.commit_lock.lock().await;
        let mut records = self.ctx.read_records(collection)?;
        let applied = optimistic::apply(config, &records, &delta).map_err(|err| {
            tracing::warn!("[Mutation] Rejected write to {}: {}", collection, err);
            err
        })?;

        match applied.index {
            Some(index) => records[index] = applied.after.clone(),
            None => records.push(applied.after.clone()),
        }
        self.ctx
            .store
            .set_many(vec![SyncContext::records_write(collection, &records)])?;

        let mutation = PendingMutation {
            correlation_id,
            collection: collection.clone(),
            key: applied.key,
            inserted: applied.inserted,
            delta,
            overlay: applied.overlay,
            before: applied.before,
            after: applied.after,
            payload: applied.payload,
            state: MutationState::AppliedLocally,
            created_at: self.ctx.tick(),
            persisted_at: None,
            queued_at: chrono::Utc::now().to_rfc3339(),
            last_attempt: None,
            last_error: None,
            attempts: 0,
        };
        tracing::debug!(
            "[Mutation] {} applied locally to {} record {}",
            correlation_id,
            collection,
            mutation.key
        );
        self.ctx.queue.enqueue(mutation).await;
        Ok(correlation_id)
    }

    async fn prepare_retry(&self, correlation_id: Uuid) -> SyncResult<CollectionName> {
        self.ctx.session.ensure_active()?;
        let mutation = self
            .ctx
            .queue
            .get(&correlation_id)
            .await
            .ok_or(SyncError::UnknownMutation(correlation_id))?;
        if mutation.state != MutationState::PersistFailed {
            return Err(SyncError::validation(
                "state",
                format!("a {:?} mutation cannot be retried", mutation.state),
            ));
        }
        tracing::info!(
            "[Mutation] Retrying {} (attempt {})",
            correlation_id,
            mutation.attempts + 1
        );
        Ok(mutation.collection)
    }

    async fn dispatch_and_wait(&self, collection: &CollectionName, correlation_id: Uuid) -> SyncResult<MutationOutcome> {
        let (tx, rx) = oneshot::channel();
        self.dispatch(collection, correlation_id, Some(tx)).await?;
        let result = rx
            .await
            .map_err(|_| SyncError::network("persist worker stopped before reporting"))?;
        let state = self
            .ctx
            .queue
            .get(&correlation_id)
            .await
            .map(|m| m.state)
            .unwrap_or(MutationState::Persisted);
        Ok(MutationOutcome {
            correlation_id,
            state,
            error: result.err(),
        })
    }

    /// Hand a mutation to its collection's persist worker
    async fn dispatch(
        &self,
        collection: &CollectionName,
        correlation_id: Uuid,
        respond: Option<oneshot::Sender<SyncResult<()>>>,
    ) -> SyncResult<()> {
        self.ctx
            .queue
            .set_state(&correlation_id, MutationState::PersistPending)
            .await;

        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        let job = PersistJob {
            correlation_id,
            respond,
        };
        let job = match workers.get(collection) {
            Some(sender) => match sender.send(job) {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(job)) => job,
            },
            None => job,
        };

        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(persist::run_worker(
            Arc::clone(&self.ctx),
            collection.clone(),
            receiver,
        ));
        sender
            .send(job)
            .map_err(|_| SyncError::network("persist worker unavailable"))?;
        workers.insert(collection.clone(), sender);
        Ok(())
    }
}
