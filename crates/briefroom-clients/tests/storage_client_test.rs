//! Object storage client tests against a local HTTP fake.

use briefroom_clients::{StorageConfig, SupabaseDocumentStore};
use briefroom_core::{DocumentSource, DocumentStore, Error};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn store_for(server: &MockServer) -> SupabaseDocumentStore {
    SupabaseDocumentStore::new(StorageConfig::new(server.uri(), "svc-key"))
        .expect("Failed to create storage client")
}

#[tokio::test]
async fn test_storage_download_is_authenticated() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/storage/v1/object/documents/doc-1/report.pdf"))
        .and(header("authorization", "Bearer svc-key"))
        .and(header("apikey", "svc-key"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.7".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let bytes = store_for(&server)
        .fetch(&DocumentSource::Storage {
            path: "doc-1/report.pdf".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(bytes, b"%PDF-1.7".to_vec());
}

#[tokio::test]
async fn test_missing_object_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/storage/v1/object/documents/missing.pdf"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let result = store_for(&server)
        .fetch(&DocumentSource::Storage {
            path: "missing.pdf".to_string(),
        })
        .await;
    assert!(matches!(result, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn test_server_error_is_storage_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/storage/v1/object/documents/flaky.pdf"))
        .respond_with(ResponseTemplate::new(503).set_body_string("try later"))
        .mount(&server)
        .await;

    let result = store_for(&server)
        .fetch(&DocumentSource::Storage {
            path: "flaky.pdf".to_string(),
        })
        .await;
    match result {
        Err(Error::Storage(msg)) => assert!(msg.contains("503"), "{}", msg),
        other => panic!("expected storage error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_external_url_is_plain_get() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/public/brief.md"))
        .respond_with(ResponseTemplate::new(200).set_body_string("# Brief"))
        .expect(1)
        .mount(&server)
        .await;

    let bytes = store_for(&server)
        .fetch(&DocumentSource::ExternalUrl {
            url: format!("{}/public/brief.md", server.uri()),
        })
        .await
        .unwrap();
    assert_eq!(bytes, b"# Brief".to_vec());
}
