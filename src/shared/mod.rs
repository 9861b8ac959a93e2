//! Shared Module
//!
//! This module contains the data model shared by every layer of the sync
//! client: records and deltas, collection names, the fetch lifecycle,
//! events, errors and configuration.
//!
//! # Overview
//!
//! The shared types carry no I/O. They are serializable so that the view
//! store can hold them as JSON and so that configuration can be read from
//! TOML.

/// Record and delta types
pub mod record;

/// Collection identifiers
pub mod collection;

/// Fetch lifecycle state
pub mod fetch_state;

/// Sync events
pub mod event;

/// Shared error types
pub mod error;

/// Application configuration
pub mod config;

/// Re-export commonly used types for convenience
pub use record::{FieldValue, Record, RecordDelta};
pub use collection::CollectionName;
pub use fetch_state::FetchState;
pub use event::{SyncEvent, SyncEventKind};
pub use error::{SyncError, SyncResult};
pub use config::{AppConfig, AppConfigBuilder, CollectionConfig, ConfigError, DerivedRules, QuantityRule};
