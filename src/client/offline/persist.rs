//! # Persist Worker
//!
//! One worker task per collection drains an unbounded channel of persist
//! jobs, so the remote creates of a collection run strictly in the order
//! they were dispatched. Creates of different collections run concurrently.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::client::context::SyncContext;
use crate::client::derive;
use crate::client::offline::optimistic::is_temporary_key;
use crate::client::offline::queue::{MutationState, PendingMutation};
use crate::shared::collection::CollectionName;
use crate::shared::config::CollectionConfig;
use crate::shared::error::{SyncError, SyncResult};
use crate::shared::event::SyncEvent;
use crate::shared::record::Record;

/// Request to persist one pending mutation
#[derive(Debug)]
pub struct PersistJob {
    pub correlation_id: Uuid,
    /// Receives the persist outcome, if the submitter waits for it
    pub respond: Option<oneshot::Sender<SyncResult<()>>>,
}

/// Drain `jobs` until every sender is gone
pub async fn run_worker(
    ctx: Arc<SyncContext>,
    collection: CollectionName,
    mut jobs: mpsc::UnboundedReceiver<PersistJob>,
) {
    tracing::debug!("[Mutation] Persist worker for {} started", collection);
    while let Some(job) = jobs.recv().await {
        let outcome = persist(&ctx, &collection, job.correlation_id).await;
        if let Some(respond) = job.respond {
            let _ = respond.send(outcome);
        }
    }
    tracing::debug!("[Mutation] Persist worker for {} stopped", collection);
}

async fn persist(ctx: &SyncContext, collection: &CollectionName, correlation_id: Uuid) -> SyncResult<()> {
    let mutation = ctx
        .queue
        .get(&correlation_id)
        .await
        .ok_or(SyncError::UnknownMutation(correlation_id))?;
    if mutation.state != MutationState::PersistPending {
        tracing::debug!(
            "[Mutation] Skipping {} in state {:?}",
            correlation_id,
            mutation.state
        );
        return Ok(());
    }
    let config = ctx.collection(collection)?.clone();

    ctx.queue.start_attempt(&correlation_id).await;
    let created = match ctx.request(ctx.config.fetch_timeout()) {
        Ok(request) => ctx
            .client
            .create(&config, &mutation.payload, &request)
            .await
            .map_err(SyncError::from),
        Err(err) => Err(err),
    };

    match created {
        Ok(canonical) => {
            reconcile_persisted(ctx, &config, &mutation, &canonical).await?;
            ctx.emit(SyncEvent::persisted(collection.clone(), correlation_id));
            tracing::info!("[Mutation] {} persisted to {}", correlation_id, collection);
            Ok(())
        }
        Err(err) => {
            ctx.queue.mark_failed(&correlation_id, err.to_string()).await;
            ctx.emit(SyncEvent::failed(collection.clone(), correlation_id, err.clone()));
            tracing::error!(
                "[Mutation] {} on {} failed to persist, local change kept: {}",
                correlation_id,
                collection,
                err
            );
            Err(err)
        }
    }
}

/// Mark the mutation persisted and fold the server's canonical fields into
/// the stored record without touching local values
async fn reconcile_persisted(
    ctx: &SyncContext,
    config: &CollectionConfig,
    mutation: &PendingMutation,
    canonical: &Record,
) -> SyncResult<()> {
    let key_field = config.key_field.as_str();
    let canonical = derive::strip_derived(config, canonical);
    let new_key = canonical
        .key(key_field)
        .filter(|k| is_temporary_key(&mutation.key) && *k != mutation.key);

    let _commit = ctx.commit_lock.lock().await;
    let at = ctx.tick();
    ctx.queue.mark_persisted(&mutation.correlation_id, at).await;

    if canonical.is_empty() {
        return Ok(());
    }

    let mut records = ctx.read_records(&config.name)?;
    if let Some(record) = records
        .iter_mut()
        .find(|r| r.key(key_field).as_deref() == Some(mutation.key.as_str()))
    {
        record.merge_missing(&canonical);
        if let Some(key) = &new_key {
            record.set(key_field, key.clone());
        }
        derive::attach_derived(config.derived, record);
        ctx.store
            .set_many(vec![SyncContext::records_write(&config.name, &records)])?;
    }

    ctx.queue
        .merge_canonical(&mutation.correlation_id, &canonical)
        .await;
    if let Some(key) = new_key {
        tracing::debug!("[Mutation] {} assigned key {} for {}", config.name, key, mutation.key);
        ctx.queue
            .rekey(&config.name, &mutation.key, &key, key_field)
            .await;
    }
    Ok(())
}
