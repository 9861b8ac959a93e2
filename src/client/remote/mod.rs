//! # Remote Service Client
//!
//! Transport abstraction over the inspection, result and usage-decision
//! services. The sync façade only ever talks to a
//! `dyn RemoteServiceClient`; one implementation exists per transport:
//!
//! - `odata.rs`: HTTP transport speaking the OData v2 JSON dialect
//! - `memory.rs`: in-process transport with latency and failure injection
//!
//! Every call is bounded by the deadline carried in [`RequestContext`].
//! Exceeding it yields [`RemoteError::Timeout`] and drops the in-flight
//! request future, which releases the underlying connection. No retries
//! happen at this layer.

pub mod memory;
pub mod odata;

pub use memory::{FetchScript, InMemoryClient};
pub use odata::ODataClient;

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::shared::config::CollectionConfig;
use crate::shared::error::SyncError;
use crate::shared::record::Record;

/// Transport-level failure
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RemoteError {
    /// The deadline expired before a response arrived
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// No response was received
    #[error("network error: {0}")]
    Network(String),
    /// The service answered with a non-success status
    #[error("server error: HTTP {status}")]
    Server {
        status: u16,
        body: String,
    },
    /// The response body could not be decoded
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RemoteError> for SyncError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Timeout(deadline) => SyncError::Timeout {
                elapsed_ms: deadline.as_millis() as u64,
            },
            RemoteError::Network(message) => SyncError::Network { message },
            RemoteError::Server { status, .. } => SyncError::Server { status },
            RemoteError::Decode(message) => SyncError::Serialization { message },
        }
    }
}

/// Credentials attached to outgoing requests
#[derive(Clone, PartialEq)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Per-call settings
#[derive(Debug, Clone, PartialEq)]
pub struct RequestContext {
    /// Upper bound for the whole call
    pub deadline: Duration,
    /// Credentials of the active session
    pub basic_auth: Option<BasicAuth>,
}

impl RequestContext {
    pub fn new(deadline: Duration) -> Self {
        Self {
            deadline,
            basic_auth: None,
        }
    }

    pub fn with_auth(mut self, auth: Option<BasicAuth>) -> Self {
        self.basic_auth = auth;
        self
    }
}

/// Single filter condition
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Field equals value
    Eq { field: String, value: String },
    /// Field contains value
    Contains { field: String, value: String },
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn contains(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Contains {
            field: field.into(),
            value: value.into(),
        }
    }

    /// OData `$filter` expression
    fn to_odata(&self) -> String {
        match self {
            Self::Eq { field, value } => format!("{} eq '{}'", field, escape_literal(value)),
            Self::Contains { field, value } => {
                format!("substringof('{}',{})", escape_literal(value), field)
            }
        }
    }

    fn matches(&self, record: &Record) -> bool {
        match self {
            Self::Eq { field, value } => record.key(field).as_deref() == Some(value.as_str()),
            Self::Contains { field, value } => record
                .key(field)
                .map(|v| v.contains(value.as_str()))
                .unwrap_or(false),
        }
    }
}

/// Filter and paging options of a read
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub top: Option<usize>,
    pub skip: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn top(mut self, top: usize) -> Self {
        self.top = Some(top);
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty() && self.top.is_none() && self.skip.is_none()
    }

    /// Whether a record passes every filter
    pub fn matches(&self, record: &Record) -> bool {
        self.filters.iter().all(|f| f.matches(record))
    }

    /// Apply filters and paging to an in-memory record set
    pub fn apply(&self, records: Vec<Record>) -> Vec<Record> {
        records
            .into_iter()
            .filter(|r| self.matches(r))
            .skip(self.skip.unwrap_or(0))
            .take(self.top.unwrap_or(usize::MAX))
            .collect()
    }

    /// `$filter` value, if any filter is set
    pub fn odata_filter(&self) -> Option<String> {
        if self.filters.is_empty() {
            return None;
        }
        Some(
            self.filters
                .iter()
                .map(Filter::to_odata)
                .collect::<Vec<_>>()
                .join(" and "),
        )
    }

    /// Query parameters for a collection read
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = vec![("$format".to_string(), "json".to_string())];
        if let Some(filter) = self.odata_filter() {
            params.push(("$filter".to_string(), filter));
        }
        if let Some(top) = self.top {
            params.push(("$top".to_string(), top.to_string()));
        }
        if let Some(skip) = self.skip {
            params.push(("$skip".to_string(), skip.to_string()));
        }
        params
    }
}

/// Escape a string literal for an OData expression
pub fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

/// Render a key predicate such as `bname='u',password='p'`
pub fn key_predicate(keys: &[(String, String)]) -> String {
    keys.iter()
        .map(|(k, v)| format!("{}='{}'", k, escape_literal(v)))
        .collect::<Vec<_>>()
        .join(",")
}

/// Run `fut` under `deadline`, mapping expiry to [`RemoteError::Timeout`].
/// The future is dropped on expiry.
pub async fn with_deadline<T, F>(deadline: Duration, fut: F) -> Result<T, RemoteError>
where
    F: Future<Output = Result<T, RemoteError>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::Timeout(deadline)),
    }
}

/// Read/create access to named entity collections
#[async_trait]
pub trait RemoteServiceClient: Send + Sync {
    /// Read the records of a collection
    async fn fetch(
        &self,
        target: &CollectionConfig,
        query: &Query,
        ctx: &RequestContext,
    ) -> Result<Vec<Record>, RemoteError>;

    /// Count the records of a collection
    async fn count(
        &self,
        target: &CollectionConfig,
        query: &Query,
        ctx: &RequestContext,
    ) -> Result<u64, RemoteError>;

    /// Create a record, returning the server's canonical version
    async fn create(
        &self,
        target: &CollectionConfig,
        record: &Record,
        ctx: &RequestContext,
    ) -> Result<Record, RemoteError>;

    /// Read one entity addressed by key; `None` when it does not exist
    async fn read_entity(
        &self,
        target: &CollectionConfig,
        keys: &[(String, String)],
        ctx: &RequestContext,
    ) -> Result<Option<Record>, RemoteError>;

    /// Transport name, for logging
    fn name(&self) -> &'static str;
}
