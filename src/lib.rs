//! QMS Sync - Main Library
//!
//! QMS Sync is the data layer behind a quality-management inspection
//! front-end. It reads inspection lots, inspection results and usage
//! decisions from remote OData services, writes user input back, and keeps
//! the screens working when the backend is slow or unreachable.
//!
//! # Overview
//!
//! This library provides:
//! - Per-collection loads with deadlines, fallback data and an explicit
//!   fetch state (`Idle`, `Loading`, `Ready`, `Degraded`, `Failed`)
//! - Supersession of in-flight loads so stale results never overwrite
//!   newer ones
//! - Optimistic mutations that are visible immediately and never lost on a
//!   failed save
//! - A path-addressed view store the screens bind to
//! - A broadcast channel of sync events
//!
//! # Module Structure
//!
//! - **`shared`** - Types without I/O
//!   - Records, deltas, collection names
//!   - Fetch state, events, errors
//!   - Configuration
//!
//! - **`client`** - The sync layer itself
//!   - Remote service clients (OData over reqwest, in-memory)
//!   - Session handling and fallback data
//!   - View store, sync façade and mutation coordinator
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use qms_sync::client::{FallbackProvider, ODataClient, Session, SyncFacade, ViewStore};
//! use qms_sync::shared::{AppConfig, CollectionName};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::default();
//! let client = Arc::new(ODataClient::new(config.base_url.clone()));
//! let facade = SyncFacade::new(
//!     config,
//!     Session::demo(),
//!     client,
//!     FallbackProvider::builtin(),
//!     ViewStore::new(),
//! );
//! let outcome = facade.load(&CollectionName::lots(), facade.config().fetch_timeout()).await?;
//! println!("lots are {:?}", outcome.state);
//! # Ok(())
//! # }
//! ```
//!
//! # Thread Safety
//!
//! - The façade and coordinator are `Clone` and share one `SyncContext`
//! - Record writes are serialized by a commit lock; events go through a
//!   `broadcast::Sender`
//! - Store subscribers are called synchronously on the writing task
//!
//! # Error Handling
//!
//! Fallible operations return `SyncResult<T>`. Remote failures during a
//! load are absorbed into the fetch state; the error is still reported in
//! the load outcome and at `/<collection>/lastError`.

/// Shared types and data structures
pub mod shared;

/// Sync façade, mutation coordinator and their collaborators
pub mod client;
