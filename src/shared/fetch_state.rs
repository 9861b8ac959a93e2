//! Fetch lifecycle state
//!
//! Every collection carries the state of its most recent sync attempt.
//!
//! ```text
//! Idle ──load──▶ Loading ──ok──────────────▶ Ready
//!                   │ ──timeout/network──────▶ Degraded
//!                   │ ──server error─────────▶ Degraded | Failed (no fallback)
//! Ready/Degraded/Failed ──refresh──▶ Loading
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a collection's most recent sync attempt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchState {
    /// Nothing requested yet
    #[default]
    Idle,
    /// A remote fetch is in flight
    Loading,
    /// Live data from the remote service
    Ready,
    /// Substitute data shown because the remote was unavailable
    Degraded,
    /// Remote failed and no substitute data exists
    Failed,
}

impl FetchState {
    /// Whether a sync attempt has finished
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::Degraded | Self::Failed)
    }

    /// Whether consumers are looking at non-authoritative data
    pub fn is_degraded(self) -> bool {
        matches!(self, Self::Degraded | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Degraded => "degraded",
            Self::Failed => "failed",
        }
    }

    /// Parse the store representation
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "idle" => Some(Self::Idle),
            "loading" => Some(Self::Loading),
            "ready" => Some(Self::Ready),
            "degraded" => Some(Self::Degraded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for FetchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
