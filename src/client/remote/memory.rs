//! In-memory transport
//!
//! Serves collections from process memory. Latency and failures can be
//! injected per collection, and individual fetch responses can be scripted,
//! which makes the transport suitable for demos and for exercising the
//! fallback and supersession paths of the sync façade.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

use super::{with_deadline, Query, RemoteError, RemoteServiceClient, RequestContext};
use crate::shared::collection::CollectionName;
use crate::shared::config::CollectionConfig;
use crate::shared::record::Record;

/// One scripted fetch response
#[derive(Debug, Clone)]
pub struct FetchScript {
    /// Delay before the response is produced
    pub delay: Duration,
    /// Response to produce
    pub result: Result<Vec<Record>, RemoteError>,
}

impl FetchScript {
    pub fn ok(delay: Duration, records: Vec<Record>) -> Self {
        Self {
            delay,
            result: Ok(records),
        }
    }

    pub fn err(delay: Duration, error: RemoteError) -> Self {
        Self {
            delay,
            result: Err(error),
        }
    }
}

#[derive(Debug, Default)]
struct CollectionBehavior {
    latency: Duration,
    failure: Option<RemoteError>,
    create_failure: Option<RemoteError>,
}

/// In-process `RemoteServiceClient`
#[derive(Debug, Default)]
pub struct InMemoryClient {
    datasets: RwLock<HashMap<CollectionName, Vec<Record>>>,
    behaviors: RwLock<HashMap<CollectionName, CollectionBehavior>>,
    scripts: RwLock<HashMap<CollectionName, VecDeque<FetchScript>>>,
    created: RwLock<Vec<(CollectionName, Record)>>,
    fetch_calls: AtomicU64,
    create_calls: AtomicU64,
    next_key: AtomicU64,
}

impl InMemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the records served for a collection
    pub async fn set_records(&self, collection: impl Into<CollectionName>, records: Vec<Record>) {
        self.datasets.write().await.insert(collection.into(), records);
    }

    /// Records currently held for a collection
    pub async fn records(&self, collection: impl Into<CollectionName>) -> Vec<Record> {
        self.datasets
            .read()
            .await
            .get(&collection.into())
            .cloned()
            .unwrap_or_default()
    }

    /// Delay every call against a collection
    pub async fn set_latency(&self, collection: impl Into<CollectionName>, latency: Duration) {
        self.behaviors
            .write()
            .await
            .entry(collection.into())
            .or_default()
            .latency = latency;
    }

    /// Fail reads and counts of a collection with `error` (or stop failing)
    pub async fn fail_reads(&self, collection: impl Into<CollectionName>, error: Option<RemoteError>) {
        self.behaviors
            .write()
            .await
            .entry(collection.into())
            .or_default()
            .failure = error;
    }

    /// Fail creates against a collection with `error` (or stop failing)
    pub async fn fail_creates(&self, collection: impl Into<CollectionName>, error: Option<RemoteError>) {
        self.behaviors
            .write()
            .await
            .entry(collection.into())
            .or_default()
            .create_failure = error;
    }

    /// Queue a scripted response for the next fetch of a collection
    pub async fn script_fetch(&self, collection: impl Into<CollectionName>, script: FetchScript) {
        self.scripts
            .write()
            .await
            .entry(collection.into())
            .or_default()
            .push_back(script);
    }

    /// Records received through `create`, in arrival order
    pub async fn created(&self) -> Vec<(CollectionName, Record)> {
        self.created.read().await.clone()
    }

    pub fn fetch_calls(&self) -> u64 {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> u64 {
        self.create_calls.load(Ordering::SeqCst)
    }

    async fn behavior(&self, collection: &CollectionName) -> (Duration, Option<RemoteError>, Option<RemoteError>) {
        let behaviors = self.behaviors.read().await;
        match behaviors.get(collection) {
            Some(b) => (b.latency, b.failure.clone(), b.create_failure.clone()),
            None => (Duration::ZERO, None, None),
        }
    }

    async fn read_all(&self, collection: &CollectionName, query: &Query) -> Result<Vec<Record>, RemoteError> {
        let (latency, failure, _) = self.behavior(collection).await;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if let Some(err) = failure {
            return Err(err);
        }
        Ok(query.apply(self.records(collection.clone()).await))
    }
}

#[async_trait]
impl RemoteServiceClient for InMemoryClient {
    async fn fetch(
        &self,
        target: &CollectionConfig,
        query: &Query,
        ctx: &RequestContext,
    ) -> Result<Vec<Record>, RemoteError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let script = self
            .scripts
            .write()
            .await
            .get_mut(&target.name)
            .and_then(VecDeque::pop_front);

        with_deadline(ctx.deadline, async {
            match script {
                Some(script) => {
                    tokio::time::sleep(script.delay).await;
                    script.result.map(|records| query.apply(records))
                }
                None => self.read_all(&target.name, query).await,
            }
        })
        .await
    }

    async fn count(
        &self,
        target: &CollectionConfig,
        query: &Query,
        ctx: &RequestContext,
    ) -> Result<u64, RemoteError> {
        with_deadline(ctx.deadline, async {
            let records = self.read_all(&target.name, query).await?;
            Ok(records.len() as u64)
        })
        .await
    }

    async fn create(
        &self,
        target: &CollectionConfig,
        record: &Record,
        ctx: &RequestContext,
    ) -> Result<Record, RemoteError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let (latency, _, failure) = self.behavior(&target.name).await;

        with_deadline(ctx.deadline, async {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            if let Some(err) = failure {
                return Err(err);
            }

            let mut stored = record.clone();
            if stored.key(&target.key_field).is_none() {
                let next = self.next_key.fetch_add(1, Ordering::SeqCst) + 1;
                stored.set(target.key_field.clone(), format!("{}-{}", target.entity_set, next));
            }

            self.created
                .write()
                .await
                .push((target.name.clone(), record.clone()));

            let key = stored.key(&target.key_field);
            let mut datasets = self.datasets.write().await;
            let rows = datasets.entry(target.name.clone()).or_default();
            match rows.iter_mut().find(|r| r.key(&target.key_field) == key) {
                Some(existing) => existing.merge_fields(stored.fields()),
                None => rows.push(stored.clone()),
            }
            Ok(stored)
        })
        .await
    }

    async fn read_entity(
        &self,
        target: &CollectionConfig,
        keys: &[(String, String)],
        ctx: &RequestContext,
    ) -> Result<Option<Record>, RemoteError> {
        with_deadline(ctx.deadline, async {
            let records = self.read_all(&target.name, &Query::new()).await?;
            Ok(records.into_iter().find(|r| {
                keys.iter()
                    .all(|(field, value)| r.key(field).as_deref() == Some(value.as_str()))
            }))
        })
        .await
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
