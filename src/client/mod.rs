//! Sync Client Module
//!
//! The read/write façade between inspection screens and the remote OData
//! services.
//!
//! # Architecture
//!
//! - **`config`** - Configuration loading (file, environment)
//! - **`session`** - Login and the active session
//! - **`remote`** - Remote service client trait, OData and in-memory clients
//! - **`fallback`** - Substitute datasets used while the backend is down
//! - **`store`** - Path-addressed view store with change subscriptions
//! - **`derive`** - Normalization and derived display fields
//! - **`sync`** - Collection loads, counts and the dashboard aggregate
//! - **`offline`** - Optimistic mutations, the pending queue and persistence
//! - **`context`** - State shared by the façade and the coordinator
//!
//! # Module Structure
//!
//! ```text
//! client/
//! ├── mod.rs       - Module exports and documentation
//! ├── main.rs      - Command-line entry point (binary)
//! ├── config.rs    - Configuration loading
//! ├── context.rs   - Shared sync context
//! ├── derive.rs    - Derived fields
//! ├── fallback.rs  - Fallback datasets
//! ├── session.rs   - Sessions
//! ├── store.rs     - View store
//! ├── remote/      - Remote clients
//! ├── sync/        - Sync façade and dashboard
//! └── offline/     - Mutation coordinator
//! ```

pub mod config;
pub mod context;
pub mod derive;
pub mod fallback;
pub mod offline;
pub mod remote;
pub mod session;
pub mod store;
pub mod sync;

// Re-export commonly used types
pub use config::Config;
pub use fallback::FallbackProvider;
pub use offline::{MutationCoordinator, MutationOutcome, MutationState};
pub use remote::{InMemoryClient, ODataClient, Query, RemoteError, RemoteServiceClient};
pub use session::{Session, SessionManager};
pub use store::{Subscription, ViewStore};
pub use sync::{DashboardCounts, LoadOutcome, SyncFacade};
