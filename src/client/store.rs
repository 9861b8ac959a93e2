//! # Local View State Store
//!
//! In-memory, observable key-path store holding the materialized records,
//! fetch states and derived fields UI consumers bind to. Paths are JSON
//! pointers (`/lots/records/0/InspectionLotNumber`).
//!
//! ## Write discipline
//!
//! Writes are serialized by a write gate that is held until every affected
//! subscriber has been notified, so a subscriber never observes a
//! half-applied write and notifications arrive in write order. A batch
//! written through [`ViewStore::set_many`] is applied atomically and each
//! affected subscriber is notified once.
//!
//! Callbacks run on the writing task while the gate is held. They must not
//! write to the store.
//!
//! ## Usage
//!
//! ```rust
//! use qms_sync::client::store::ViewStore;
//! use serde_json::json;
//!
//! let store = ViewStore::new();
//! let subscription = store.subscribe("/lots/state", |state| {
//!     println!("lots are now {}", state);
//! });
//! store.set("/lots/state", json!("loading")).unwrap();
//! subscription.unsubscribe();
//! ```

use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::shared::error::{SyncError, SyncResult};

type Callback = Arc<dyn Fn(&Value) + Send + Sync>;

struct Subscriber {
    id: u64,
    path: Vec<String>,
    pointer: String,
    callback: Callback,
}

struct StoreInner {
    root: Mutex<Value>,
    subscribers: Mutex<Vec<Subscriber>>,
    write_gate: Mutex<()>,
    next_id: AtomicU64,
}

/// Observable key-path store. Clones share the same state.
#[derive(Clone)]
pub struct ViewStore {
    inner: Arc<StoreInner>,
}

impl std::fmt::Debug for ViewStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewStore")
            .field("subscribers", &lock(&self.inner.subscribers).len())
            .finish()
    }
}

/// Handle returned by [`ViewStore::subscribe`]. Dropping it unsubscribes.
#[must_use = "dropping the subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    store: Weak<StoreInner>,
}

impl Subscription {
    /// Stop receiving notifications
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(store) = self.store.upgrade() {
            lock(&store.subscribers).retain(|s| s.id != self.id);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ViewStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StoreInner {
                root: Mutex::new(Value::Object(Map::new())),
                subscribers: Mutex::new(Vec::new()),
                write_gate: Mutex::new(()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Value at `path`, `None` when absent or when the path is malformed
    pub fn get(&self, path: &str) -> Option<Value> {
        let pointer = to_pointer(&parse_path(path).ok()?);
        lock(&self.inner.root).pointer(&pointer).cloned()
    }

    /// Write a single value
    pub fn set(&self, path: &str, value: Value) -> SyncResult<()> {
        self.set_many(vec![(path.to_string(), value)])
    }

    /// Write several values atomically. Either every write is applied or,
    /// when one path is invalid, none is.
    pub fn set_many(&self, writes: Vec<(String, Value)>) -> SyncResult<()> {
        let _gate = lock(&self.inner.write_gate);

        let mut touched = Vec::with_capacity(writes.len());
        {
            let mut root = lock(&self.inner.root);
            let mut next = root.clone();
            for (path, value) in writes {
                let segments = parse_path(&path)?;
                assign(&mut next, &segments, value)?;
                touched.push(segments);
            }
            *root = next;
        }

        self.notify(&touched);
        Ok(())
    }

    /// Copy of the whole tree
    pub fn snapshot(&self) -> Value {
        lock(&self.inner.root).clone()
    }

    /// Observe writes at, above or below `path`. The callback receives the
    /// current value at `path` (`Null` when absent).
    pub fn subscribe<F>(&self, path: &str, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let segments = parse_path(path).unwrap_or_default();
        lock(&self.inner.subscribers).push(Subscriber {
            id,
            pointer: to_pointer(&segments),
            path: segments,
            callback: Arc::new(callback),
        });
        Subscription {
            id,
            store: Arc::downgrade(&self.inner),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.subscribers).len()
    }

    fn notify(&self, touched: &[Vec<String>]) {
        let affected: Vec<(String, Callback)> = lock(&self.inner.subscribers)
            .iter()
            .filter(|s| touched.iter().any(|w| related(&s.path, w)))
            .map(|s| (s.pointer.clone(), Arc::clone(&s.callback)))
            .collect();

        for (pointer, callback) in affected {
            let value = lock(&self.inner.root)
                .pointer(&pointer)
                .cloned()
                .unwrap_or(Value::Null);
            callback(&value);
        }
    }
}

impl Default for ViewStore {
    fn default() -> Self {
        Self::new()
    }
}

/// One path is a segment prefix of the other
fn related(a: &[String], b: &[String]) -> bool {
    a.iter().zip(b.iter()).all(|(x, y)| x == y)
}

/// Split a JSON pointer into unescaped segments
pub fn parse_path(path: &str) -> SyncResult<Vec<String>> {
    if path.is_empty() || path == "/" {
        return Ok(Vec::new());
    }
    let rest = path
        .strip_prefix('/')
        .ok_or_else(|| SyncError::validation("path", format!("'{}' must start with '/'", path)))?;
    Ok(rest
        .split('/')
        .map(|s| s.replace("~1", "/").replace("~0", "~"))
        .collect())
}

/// Escape a single path segment
pub fn escape_segment(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

/// Canonical JSON pointer for parsed segments; the root is `""`
fn to_pointer(segments: &[String]) -> String {
    segments
        .iter()
        .map(|segment| format!("/{}", escape_segment(segment)))
        .collect()
}

fn assign(root: &mut Value, segments: &[String], value: Value) -> SyncResult<()> {
    let Some((last, parents)) = segments.split_last() else {
        *root = value;
        return Ok(());
    };

    let mut node = root;
    for segment in parents {
        node = match node {
            Value::Object(map) => map
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Map::new())),
            Value::Array(items) => {
                let index = array_index(segment, items.len())?;
                if index == items.len() {
                    items.push(Value::Object(Map::new()));
                }
                &mut items[index]
            }
            _ => {
                return Err(SyncError::validation(
                    "path",
                    format!("segment '{}' traverses a scalar", segment),
                ))
            }
        };
    }

    match node {
        Value::Object(map) => {
            map.insert(last.clone(), value);
            Ok(())
        }
        Value::Array(items) => {
            let index = array_index(last, items.len())?;
            if index == items.len() {
                items.push(value);
            } else {
                items[index] = value;
            }
            Ok(())
        }
        _ => Err(SyncError::validation(
            "path",
            format!("segment '{}' addresses into a scalar", last),
        )),
    }
}

/// Index into an array of `len` items; `-` and `len` append
fn array_index(segment: &str, len: usize) -> SyncResult<usize> {
    if segment == "-" {
        return Ok(len);
    }
    match segment.parse::<usize>() {
        Ok(index) if index <= len => Ok(index),
        _ => Err(SyncError::validation(
            "path",
            format!("'{}' is not a valid index for an array of {}", segment, len),
        )),
    }
}
