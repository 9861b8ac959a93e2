//! Collection names
//!
//! A collection is a named logical remote resource, e.g. inspection lots.
//! Names are fixed at configuration time and double as the top-level
//! segment of every view-store path belonging to the collection.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a logical remote resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionName(String);

impl CollectionName {
    /// Inspection lots
    pub const LOTS: &'static str = "lots";
    /// Recorded inspection results
    pub const RESULTS: &'static str = "results";
    /// Usage decisions
    pub const USAGE: &'static str = "usage";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn lots() -> Self {
        Self::new(Self::LOTS)
    }

    pub fn results() -> Self {
        Self::new(Self::RESULTS)
    }

    pub fn usage() -> Self {
        Self::new(Self::USAGE)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// View-store path of a child node of this collection
    pub fn path(&self, child: &str) -> String {
        format!("/{}/{}", self.0, child)
    }
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CollectionName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for CollectionName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for CollectionName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
