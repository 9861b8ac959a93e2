//! Dashboard aggregation
//!
//! Loads the inspection lots, then counts lots, results and usage decisions
//! concurrently and publishes the aggregate at `/dashboard/counts`.

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::SyncFacade;
use crate::shared::collection::CollectionName;
use crate::shared::error::SyncResult;
use crate::shared::record::Record;

/// Store path of the dashboard aggregate
pub const DASHBOARD_COUNTS_PATH: &str = "/dashboard/counts";
pub const DASHBOARD_UPDATED_PATH: &str = "/dashboard/lastUpdated";

/// Headline numbers of the dashboard
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardCounts {
    pub total_inspections: u64,
    pub pending_inspections: u64,
    pub completed_inspections: u64,
    pub total_results: u64,
    pub total_usage_decisions: u64,
    /// At least one number comes from substitute data
    pub degraded: bool,
}

/// A lot still waiting for its usage decision
pub fn is_pending(lot: &Record) -> bool {
    lot.text("UsageDecisionStatus") == Some("Pending")
        || lot.get("UsageDecisionCode").map(|v| v.is_blank()).unwrap_or(true)
}

pub fn is_completed(lot: &Record) -> bool {
    lot.text("UsageDecisionStatus") == Some("Decision Made")
}

impl SyncFacade {
    /// Refresh the lots and the dashboard counts
    pub async fn load_dashboard(&self) -> SyncResult<DashboardCounts> {
        let fetch_timeout = self.config().fetch_timeout();
        let count_timeout = self.config().count_timeout();

        let (lots_name, results_name, usage_name) = (
            CollectionName::lots(),
            CollectionName::results(),
            CollectionName::usage(),
        );

        let lots = self.load(&lots_name, fetch_timeout).await?;

        let (lot_count, result_count, usage_count) = tokio::join!(
            self.count(&lots_name, count_timeout),
            self.count(&results_name, count_timeout),
            self.count(&usage_name, count_timeout),
        );
        let (lot_count, result_count, usage_count) = (lot_count?, result_count?, usage_count?);

        let records = self.records(&lots_name)?;
        let counts = DashboardCounts {
            total_inspections: lot_count.value,
            pending_inspections: records.iter().filter(|r| is_pending(r)).count() as u64,
            completed_inspections: records.iter().filter(|r| is_completed(r)).count() as u64,
            total_results: result_count.value,
            total_usage_decisions: usage_count.value,
            degraded: lots.state.is_degraded()
                || lot_count.degraded
                || result_count.degraded
                || usage_count.degraded,
        };

        self.store().set_many(vec![
            (DASHBOARD_COUNTS_PATH.to_string(), serde_json::to_value(&counts)?),
            (
                DASHBOARD_UPDATED_PATH.to_string(),
                json!(chrono::Utc::now().to_rfc3339()),
            ),
        ])?;

        tracing::info!(
            "[Sync] Dashboard: {} inspections ({} pending, {} completed), {} results, {} usage decisions{}",
            counts.total_inspections,
            counts.pending_inspections,
            counts.completed_inspections,
            counts.total_results,
            counts.total_usage_decisions,
            if counts.degraded { " [degraded]" } else { "" }
        );
        Ok(counts)
    }
}
