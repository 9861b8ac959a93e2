/**
 * QMS Sync Client Entry Point
 *
 * Logs in, loads the inspection dashboard and prints the inspection lots.
 * With `book <lot> <quantity>` it also books an unrestricted quantity on a
 * lot through the mutation coordinator and waits for the persist outcome.
 *
 * Environment:
 * - `QMS_USER` / `QMS_PASSWORD`: credentials, demo session when unset
 * - `QMS_CONFIG`, `QMS_API_URL`, `QMS_*_TIMEOUT_MS`: see `client::config`
 */

use std::sync::Arc;

use qms_sync::client::{
    Config, FallbackProvider, MutationCoordinator, ODataClient, RemoteServiceClient,
    SessionManager, SyncFacade, ViewStore,
};
use qms_sync::shared::{CollectionName, RecordDelta};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file if present
    dotenv::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&env_filter))
        .init();

    let config = Config::load()?;
    eprintln!("[STARTUP] OData root {}", config.base_url());
    let app = config.into_app();

    let client: Arc<dyn RemoteServiceClient> = Arc::new(ODataClient::new(app.base_url.clone()));
    let sessions = SessionManager::new(app.clone(), Arc::clone(&client));
    let session = match (std::env::var("QMS_USER"), std::env::var("QMS_PASSWORD")) {
        (Ok(user), Ok(password)) => sessions.login(&user, &password, app.fetch_timeout()).await?,
        _ => sessions.demo_login().await,
    };
    eprintln!("[STARTUP] Signed in as {} ({:?})", session.display_name(), session.mode());

    let store = ViewStore::new();
    let _state_watch = store.subscribe(&CollectionName::lots().path("state"), |state| {
        tracing::debug!("[Client] lots state -> {}", state);
    });
    let facade = SyncFacade::new(app, session, client, FallbackProvider::builtin(), store);

    let counts = facade.load_dashboard().await?;
    if counts.degraded {
        println!("!! Backend unreachable, showing sample data");
    }
    println!(
        "Inspections: {} ({} pending, {} completed) | Results: {} | Usage decisions: {}",
        counts.total_inspections,
        counts.pending_inspections,
        counts.completed_inspections,
        counts.total_results,
        counts.total_usage_decisions
    );

    let args: Vec<String> = std::env::args().skip(1).collect();
    if let [command, lot, quantity] = args.as_slice() {
        if command == "book" {
            let quantity: f64 = quantity.parse()?;
            let coordinator = MutationCoordinator::new(&facade);
            let delta = RecordDelta::update(lot.clone()).with("UnrestrictedQuantity", quantity);
            let outcome = coordinator.submit_and_wait(&CollectionName::lots(), delta).await?;
            match outcome.error {
                Some(err) => println!("Booked locally, not saved yet: {}", err),
                None => println!("Booked {} on lot {} ({:?})", quantity, lot, outcome.state),
            }
        }
    }

    for lot in facade.records(&CollectionName::lots())? {
        println!(
            "{:<14} {:<10} {:>8} / {:<8} {:>3}%  {}",
            lot.text("InspectionLotNumber").unwrap_or("-"),
            lot.text("Plant").unwrap_or("-"),
            lot.number("InspectedQuantity"),
            lot.number("ActualQuantity"),
            lot.number("ProgressPercent"),
            lot.text("StatusText").unwrap_or_default()
        );
    }

    Ok(())
}
