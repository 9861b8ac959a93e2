//! HTTP transport tests against a mock OData service

use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{basic_auth, body_partial_json, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use qms_sync::client::remote::{BasicAuth, Filter, Query, RequestContext};
use qms_sync::client::{ODataClient, RemoteError, RemoteServiceClient};
use qms_sync::shared::{CollectionName, Record};

use crate::common::*;

fn context() -> RequestContext {
    RequestContext::new(Duration::from_secs(1))
}

#[tokio::test]
async fn test_fetch_reads_verbose_envelope() {
    let server = MockServer::start().await;
    let config = odata_config(&server);
    let lots = collection_config(&config, CollectionName::lots());
    Mock::given(method("GET"))
        .and(path(entity_set_path(&lots)))
        .and(query_param("$format", "json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(verbose_envelope(vec![
            json!({ "InspectionLotNumber": "50000000032", "ActualQuantity": "12.000" }),
            json!({ "InspectionLotNumber": "50000000033", "ActualQuantity": "4.000" }),
        ])))
        .mount(&server)
        .await;

    let client = ODataClient::new(server.uri());
    let records = assert_ok!(client.fetch(&lots, &Query::new(), &context()).await);

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].text("InspectionLotNumber"), Some("50000000032"));
    assert_eq!(records[1].text("ActualQuantity"), Some("4.000"));
}

#[tokio::test]
async fn test_fetch_sends_filter_and_paging() {
    let server = MockServer::start().await;
    let config = odata_config(&server);
    let lots = collection_config(&config, CollectionName::lots());
    Mock::given(method("GET"))
        .and(path(entity_set_path(&lots)))
        .and(query_param("$filter", "Plant eq '0001'"))
        .and(query_param("$top", "5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let client = ODataClient::new(server.uri());
    let query = Query::new().filter(Filter::eq("Plant", "0001")).top(5);
    let records = assert_ok!(client.fetch(&lots, &query, &context()).await);
    assert!(records.is_empty());
}

#[tokio::test]
async fn test_server_error_carries_status_and_body() {
    let server = MockServer::start().await;
    let config = odata_config(&server);
    let results = collection_config(&config, CollectionName::results());
    mount_failure(&server, &results, 503).await;

    let client = ODataClient::new(server.uri());
    let err = client
        .fetch(&results, &Query::new(), &context())
        .await
        .unwrap_err();

    assert_eq!(
        err,
        RemoteError::Server {
            status: 503,
            body: "backend unavailable".to_string()
        }
    );
}

#[tokio::test]
async fn test_slow_response_times_out() {
    let server = MockServer::start().await;
    let config = odata_config(&server);
    let lots = collection_config(&config, CollectionName::lots());
    mount_slow_collection(&server, &lots, vec![], Duration::from_millis(800)).await;

    let client = ODataClient::new(server.uri());
    let deadline = Duration::from_millis(100);
    let err = client
        .fetch(&lots, &Query::new(), &RequestContext::new(deadline))
        .await
        .unwrap_err();

    assert_eq!(err, RemoteError::Timeout(deadline));
}

#[tokio::test]
async fn test_unparseable_body_is_a_decode_error() {
    let server = MockServer::start().await;
    let config = odata_config(&server);
    let lots = collection_config(&config, CollectionName::lots());
    Mock::given(method("GET"))
        .and(path(entity_set_path(&lots)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "d": { "bname": "x" } })))
        .mount(&server)
        .await;

    let client = ODataClient::new(server.uri());
    let err = client.fetch(&lots, &Query::new(), &context()).await.unwrap_err();
    assert_err!(Err::<(), _>(err), RemoteError::Decode(_));
}

#[tokio::test]
async fn test_count_reads_plain_text() {
    let server = MockServer::start().await;
    let config = odata_config(&server);
    let usage = collection_config(&config, CollectionName::usage());
    mount_count(&server, &usage, 57).await;

    let client = ODataClient::new(server.uri());
    let count = assert_ok!(client.count(&usage, &Query::new(), &context()).await);
    assert_eq!(count, 57);
}

#[tokio::test]
async fn test_create_posts_json_with_credentials() {
    let server = MockServer::start().await;
    let config = odata_config(&server);
    let results = collection_config(&config, CollectionName::results());
    Mock::given(method("POST"))
        .and(path(entity_set_path(&results)))
        .and(basic_auth("K901900", "secret"))
        .and(body_partial_json(json!({ "InspectionLotNumber": "50000000032" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "d": {
                "ResultId": "R-100",
                "InspectionLotNumber": "50000000032",
                "PlantCode": "0001"
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = ODataClient::new(server.uri());
    let ctx = context().with_auth(Some(BasicAuth {
        username: "K901900".to_string(),
        password: "secret".to_string(),
    }));
    let record = Record::new()
        .with("InspectionLotNumber", "50000000032")
        .with("PlantCode", "0001");

    let created = assert_ok!(client.create(&results, &record, &ctx).await);
    assert_eq!(created.text("ResultId"), Some("R-100"));
}

#[tokio::test]
async fn test_create_without_content_returns_empty_record() {
    let server = MockServer::start().await;
    let config = odata_config(&server);
    let lots = collection_config(&config, CollectionName::lots());
    Mock::given(method("POST"))
        .and(path(entity_set_path(&lots)))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let client = ODataClient::new(server.uri());
    let record = Record::new().with("InspectionLotNumber", "L1");
    let created = assert_ok!(client.create(&lots, &record, &context()).await);
    assert!(created.is_empty());
}

#[tokio::test]
async fn test_read_entity_missing_is_none() {
    let server = MockServer::start().await;
    let config = odata_config(&server);
    let lots = collection_config(&config, CollectionName::lots());
    Mock::given(method("GET"))
        .and(path_regex(r"^/ZQM_INSPECT_PR_CDS/ZQM_INSPECT_PR\(.*\)$"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = ODataClient::new(server.uri());
    let keys = vec![("InspectionLotNumber".to_string(), "404".to_string())];
    let found = assert_ok!(client.read_entity(&lots, &keys, &context()).await);
    assert!(found.is_none());
}

#[tokio::test]
async fn test_unreachable_service_is_a_network_error() {
    // Nothing listens on the discard port
    let client = ODataClient::new("http://127.0.0.1:9");
    let config = qms_sync::shared::AppConfig::default();
    let lots = collection_config(&config, CollectionName::lots());

    let err = client.fetch(&lots, &Query::new(), &context()).await.unwrap_err();
    assert_err!(Err::<(), _>(err), RemoteError::Network(_) | RemoteError::Timeout(_));
}
