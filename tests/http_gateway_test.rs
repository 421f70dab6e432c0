//! HttpGateway against a mocked storage node

use std::fs;
use std::time::Duration;

use feed_publisher::gateway::{GatewayError, HttpGateway, HttpGatewayConfig, StorageGateway};
use feed_publisher::keystore::SigningIdentity;
use feed_publisher::pointer::verify_entry;
use feed_publisher::types::{ContentReference, ManifestOptions, PointerTopic, RedundancyLevel};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, header, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const REFERENCE: &str = "c0ffee00c0ffee00c0ffee00c0ffee00c0ffee00c0ffee00c0ffee00c0ffee00";

fn gateway(server: &MockServer) -> HttpGateway {
    HttpGateway::new(HttpGatewayConfig {
        base_url: format!("{}/", server.uri()),
        timeout: Duration::from_secs(5),
    })
    .unwrap()
}

#[tokio::test]
async fn test_list_allocations_maps_stamps() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/stamps"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "stamps": [
                {"batchID": "aa", "batchTTL": 0, "usable": true, "depth": 20, "amount": "1", "label": ""},
                {"batchID": "bb", "batchTTL": 3600, "usable": true, "label": "site"}
            ]
        })))
        .mount(&server)
        .await;

    let allocations = gateway(&server).list_allocations().await.unwrap();

    assert_eq!(allocations.len(), 2);
    assert_eq!(allocations[0].id, "aa");
    assert!(!allocations[0].is_eligible());
    assert_eq!(allocations[0].label, None);
    assert_eq!(allocations[1].ttl_secs, 3600);
    assert_eq!(allocations[1].label.as_deref(), Some("site"));
}

#[tokio::test]
async fn test_tag_lifecycle() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tags"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"uid": 7, "split": 0})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tags/7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "uid": 7, "split": 500, "seen": 100, "synced": 150
        })))
        .mount(&server)
        .await;

    let gw = gateway(&server);
    let tag = gw.create_upload_tag().await.unwrap();
    assert_eq!(tag.id, 7);

    let tag = gw.retrieve_tag(7).await.unwrap();
    assert_eq!(tag.split, 500);
    assert_eq!(tag.progress(), 250);
    assert!(!tag.is_complete());
}

#[tokio::test]
async fn test_unknown_tag_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tags/99"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = gateway(&server).retrieve_tag(99).await.unwrap_err();
    assert!(matches!(err, GatewayError::NotFound(_)));
}

#[tokio::test]
async fn test_upload_directory_sends_collection_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bzz"))
        .and(header("swarm-postage-batch-id", "bb"))
        .and(header("swarm-tag", "7"))
        .and(header("swarm-collection", "true"))
        .and(header("swarm-index-document", "index.html"))
        .and(header("swarm-error-document", "404.html"))
        .and(header("swarm-pin", "true"))
        .and(header("swarm-encrypt", "false"))
        .and(header("swarm-deferred-upload", "true"))
        .and(header("swarm-redundancy-level", "2"))
        .and(body_string_contains("run()"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"reference": REFERENCE})))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("index.html"), "<h1>home</h1>").unwrap();
    fs::create_dir_all(dir.path().join("assets")).unwrap();
    fs::write(dir.path().join("assets/app.js"), "run()").unwrap();

    let options = ManifestOptions {
        error_document: Some("404.html".to_string()),
        pin: true,
        redundancy: Some(RedundancyLevel::Strong),
        ..ManifestOptions::default()
    };
    let reference = gateway(&server)
        .upload_directory("bb", dir.path(), 7, &options)
        .await
        .unwrap();

    assert_eq!(reference.as_str(), REFERENCE);
}

#[tokio::test]
async fn test_upload_rejection_surfaces_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bzz"))
        .respond_with(ResponseTemplate::new(402).set_body_string("batch exhausted"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("index.html"), "home").unwrap();

    let err = gateway(&server)
        .upload_directory("bb", dir.path(), 1, &ManifestOptions::default())
        .await
        .unwrap_err();

    match err {
        GatewayError::Server { status, message } => {
            assert_eq!(status, 402);
            assert_eq!(message, "batch exhausted");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_create_pointer_manifest() {
    let server = MockServer::start().await;
    let topic = PointerTopic::from_name("website");
    let owner = "ABCDEF0123456789ABCDEF0123456789ABCDEF01";

    Mock::given(method("POST"))
        .and(path(format!("/feeds/{}/{}", owner, topic.to_hex())))
        .and(query_param("type", "sequence"))
        .and(header("swarm-postage-batch-id", "bb"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"reference": REFERENCE})))
        .mount(&server)
        .await;

    let manifest = gateway(&server)
        .create_pointer_manifest("bb", &topic, owner)
        .await
        .unwrap();

    assert_eq!(manifest.address, REFERENCE);
    assert_eq!(manifest.owner, owner.to_lowercase());
    assert_eq!(manifest.topic, topic.to_hex());
}

#[tokio::test]
async fn test_first_feed_entry_uses_index_zero() {
    let server = MockServer::start().await;
    let identity = SigningIdentity::generate();
    let topic = PointerTopic::from_name("website");

    Mock::given(method("GET"))
        .and(path(format!("/feeds/{}/{}", identity.address(), topic.to_hex())))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/soc/[0-9a-f]{40}/[0-9a-f]{64}$"))
        .and(header("swarm-postage-batch-id", "bb"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"reference": REFERENCE})))
        .expect(1)
        .mount(&server)
        .await;

    let reference = ContentReference::parse(&"ab".repeat(32)).unwrap();
    let entry = gateway(&server)
        .write_pointer_entry("bb", &identity, &topic, &reference)
        .await
        .unwrap();

    assert_eq!(entry.index, 0);
    assert_eq!(entry.reference, reference);
    assert_eq!(entry.entry_reference.as_deref(), Some(REFERENCE));
    assert!(verify_entry(&identity.verifying_key(), &topic, &entry));

    let requests = server.received_requests().await.unwrap();
    let write = requests.iter().find(|r| r.method.as_str() == "POST").unwrap();
    let signature = write
        .url
        .query_pairs()
        .find(|(k, _)| k == "sig")
        .map(|(_, v)| v.into_owned())
        .unwrap();
    assert_eq!(signature, entry.signature);
    assert_eq!(write.body.len(), 8 + 32);
}

#[tokio::test]
async fn test_feed_entry_continues_from_next_index() {
    let server = MockServer::start().await;
    let identity = SigningIdentity::generate();
    let topic = PointerTopic::from_name("website");

    Mock::given(method("GET"))
        .and(path(format!("/feeds/{}/{}", identity.address(), topic.to_hex())))
        .and(query_param("type", "sequence"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("swarm-feed-index-next", "000000000000000a")
                .set_body_bytes(Vec::new()),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/soc/"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"reference": REFERENCE})))
        .mount(&server)
        .await;

    let reference = ContentReference::parse(&"cd".repeat(32)).unwrap();
    let entry = gateway(&server)
        .write_pointer_entry("bb", &identity, &topic, &reference)
        .await
        .unwrap();

    assert_eq!(entry.index, 10);
    assert!(verify_entry(&identity.verifying_key(), &topic, &entry));
}

#[tokio::test]
async fn test_feed_lookup_without_index_header_fails() {
    let server = MockServer::start().await;
    let identity = SigningIdentity::generate();
    let topic = PointerTopic::from_name("website");

    Mock::given(method("GET"))
        .and(path_regex(r"^/feeds/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let reference = ContentReference::parse(&"cd".repeat(32)).unwrap();
    let err = gateway(&server)
        .write_pointer_entry("bb", &identity, &topic, &reference)
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::InvalidResponse(_)));
}
