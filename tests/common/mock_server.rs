//! Mock server helpers for integration tests
//!
//! Wraps wiremock with the OData v2 conventions the HTTP transport expects:
//! `{d:{results:[..]}}` envelopes, plain-text `$count` bodies and entity
//! reads addressed by key predicate.

use serde_json::{json, Value};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use qms_sync::shared::{AppConfig, CollectionConfig, CollectionName};

/// Configuration whose services all live on the mock server
pub fn odata_config(server: &MockServer) -> AppConfig {
    AppConfig::builder()
        .base_url(server.uri())
        .fetch_timeout_ms(1_000)
        .count_timeout_ms(500)
        .build()
        .expect("mock server config is valid")
}

pub fn collection_config(config: &AppConfig, name: CollectionName) -> CollectionConfig {
    config
        .collection(&name)
        .cloned()
        .unwrap_or_else(|| panic!("collection {} is configured", name))
}

/// URL path of an entity set, e.g. `/ZQM_INSPECT_PR_CDS/ZQM_INSPECT_PR`
pub fn entity_set_path(target: &CollectionConfig) -> String {
    format!("/{}/{}", target.service, target.entity_set)
}

/// OData v2 verbose collection envelope
pub fn verbose_envelope(rows: Vec<Value>) -> Value {
    json!({ "d": { "results": rows } })
}

/// Serve `rows` for reads of the collection
pub async fn mount_collection(server: &MockServer, target: &CollectionConfig, rows: Vec<Value>) {
    Mock::given(method("GET"))
        .and(path(entity_set_path(target)))
        .respond_with(ResponseTemplate::new(200).set_body_json(verbose_envelope(rows)))
        .mount(server)
        .await;
}

/// Answer reads of the collection with `status`
pub async fn mount_failure(server: &MockServer, target: &CollectionConfig, status: u16) {
    Mock::given(method("GET"))
        .and(path(entity_set_path(target)))
        .respond_with(ResponseTemplate::new(status).set_body_string("backend unavailable"))
        .mount(server)
        .await;
}

/// Serve `rows` only after `delay`
pub async fn mount_slow_collection(
    server: &MockServer,
    target: &CollectionConfig,
    rows: Vec<Value>,
    delay: Duration,
) {
    Mock::given(method("GET"))
        .and(path(entity_set_path(target)))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(verbose_envelope(rows))
                .set_delay(delay),
        )
        .mount(server)
        .await;
}

/// Serve a `$count` read
pub async fn mount_count(server: &MockServer, target: &CollectionConfig, count: u64) {
    Mock::given(method("GET"))
        .and(path(format!("{}/$count", entity_set_path(target))))
        .respond_with(ResponseTemplate::new(200).set_body_string(count.to_string()))
        .mount(server)
        .await;
}
