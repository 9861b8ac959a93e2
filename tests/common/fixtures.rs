//! Record fixtures and a façade harness backed by the in-memory client

use std::sync::Arc;
use std::time::Duration;

use qms_sync::client::{
    FallbackProvider, InMemoryClient, MutationCoordinator, Session, SyncFacade, ViewStore,
};
use qms_sync::shared::{AppConfig, CollectionName, Record};

/// Deadline used by tests that do not exercise timeouts
pub const DEADLINE: Duration = Duration::from_secs(2);

/// An inspection lot as the service returns it (decimals as text)
pub fn lot(key: &str, actual: &str, inspected: &str) -> Record {
    Record::new()
        .with("InspectionLotNumber", key)
        .with("Plant", "0001")
        .with("ActualQuantity", actual)
        .with("InspectedQuantity", inspected)
        .with("UsageDecisionStatus", "Pending")
        .with("UsageDecisionCode", "")
}

/// Façade and coordinator wired to an in-memory backend
pub struct Harness {
    pub client: Arc<InMemoryClient>,
    pub facade: SyncFacade,
    pub coordinator: MutationCoordinator,
}

impl Harness {
    /// Backend holding `lots`, no fallback data
    pub async fn with_lots(lots: Vec<Record>) -> Self {
        Self::build(lots, FallbackProvider::empty()).await
    }

    pub async fn build(lots: Vec<Record>, fallback: FallbackProvider) -> Self {
        let client = Arc::new(InMemoryClient::new());
        client.set_records(CollectionName::lots(), lots).await;
        let facade = SyncFacade::new(
            AppConfig::default(),
            Session::demo(),
            client.clone(),
            fallback,
            ViewStore::new(),
        );
        let coordinator = MutationCoordinator::new(&facade);
        Self {
            client,
            facade,
            coordinator,
        }
    }

    /// The scenario lot: 12 actual, 10 already inspected
    pub async fn scenario() -> Self {
        let harness = Self::with_lots(vec![lot("L1", "12.000", "10.000")]).await;
        assert_ok!(harness.facade.load(&CollectionName::lots(), DEADLINE).await);
        harness
    }
}
