//! Integration tests for metadata lookups, folder listings and content retrieval

use docwatch_core::ports::{CredentialRejected, IDocumentStore};
use docwatch_drive::DriveError;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

use crate::common::{self, TOKEN};

#[tokio::test]
async fn test_get_metadata_maps_fields() {
    let (server, store) = common::setup_store().await;
    common::mount_metadata(
        &server,
        "doc1",
        common::file_json("doc1", "Report", "text/csv", "2026-01-15T10:00:00.000Z", "f1"),
    )
    .await;

    let meta = store.get_metadata(TOKEN, &common::doc("doc1")).await.unwrap();
    assert_eq!(meta.name, "Report");
    assert_eq!(meta.mime_type, "text/csv");
    assert_eq!(meta.modified.as_str(), "2026-01-15T10:00:00.000Z");
    assert!(meta.is_child_of(&common::folder("f1")));
}

#[tokio::test]
async fn test_get_metadata_sends_bearer_token() {
    let (server, store) = common::setup_store().await;
    Mock::given(method("GET"))
        .and(path("/drive/v3/files/doc1"))
        .and(header("Authorization", "Bearer test-access-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::file_json(
            "doc1", "a", "text/csv", "t1", "f1",
        )))
        .expect(1)
        .mount(&server)
        .await;

    store.get_metadata(TOKEN, &common::doc("doc1")).await.unwrap();
}

#[tokio::test]
async fn test_get_metadata_not_found() {
    let (server, store) = common::setup_store().await;
    Mock::given(method("GET"))
        .and(path("/drive/v3/files/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("File not found"))
        .mount(&server)
        .await;

    let err = store
        .get_metadata(TOKEN, &common::doc("missing"))
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DriveError>(),
        Some(DriveError::NotFound(_))
    ));
    assert!(err.downcast_ref::<CredentialRejected>().is_none());
}

#[tokio::test]
async fn test_unauthorized_is_typed() {
    let (server, store) = common::setup_store().await;
    Mock::given(method("GET"))
        .and(path("/drive/v3/files/doc1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = store.get_metadata(TOKEN, &common::doc("doc1")).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DriveError>(),
        Some(DriveError::Unauthorized(_))
    ));
    assert!(err.downcast_ref::<CredentialRejected>().is_some());
}

#[tokio::test]
async fn test_list_folder_pagination() {
    let (server, store) = common::setup_store().await;
    let folder = common::folder("f1");

    Mock::given(method("GET"))
        .and(path("/drive/v3/files"))
        .and(query_param("q", "'f1' in parents and trashed = false"))
        .and(query_param("pageToken", "p2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "files": [common::file_json("d3", "C", "text/csv", "t3", "f1")]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/drive/v3/files"))
        .and(query_param("q", "'f1' in parents and trashed = false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "files": [
                common::file_json("d1", "A", "text/csv", "t1", "f1"),
                common::file_json("d2", "B", "text/csv", "t2", "f1")
            ],
            "nextPageToken": "p2"
        })))
        .mount(&server)
        .await;

    let first = store.list_folder(TOKEN, &folder, None).await.unwrap();
    assert_eq!(first.items.len(), 2);
    assert_eq!(first.next_page_token.as_deref(), Some("p2"));

    let second = store.list_folder(TOKEN, &folder, Some("p2")).await.unwrap();
    assert_eq!(second.items.len(), 1);
    assert_eq!(second.items[0].id.as_str(), "d3");
    assert!(second.next_page_token.is_none());
}

#[tokio::test]
async fn test_list_folder_skips_unreadable_entries() {
    let (server, store) = common::setup_store().await;
    Mock::given(method("GET"))
        .and(path("/drive/v3/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "files": [
                {"id": "nomod", "name": "no modifiedTime"},
                common::file_json("d1", "A", "text/csv", "t1", "f1")
            ]
        })))
        .mount(&server)
        .await;

    let page = store
        .list_folder(TOKEN, &common::folder("f1"), None)
        .await
        .unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].id.as_str(), "d1");
}

#[tokio::test]
async fn test_download_returns_bytes() {
    let (server, store) = common::setup_store().await;
    Mock::given(method("GET"))
        .and(path("/drive/v3/files/doc1"))
        .and(query_param("alt", "media"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"a,b\n1,2\n".to_vec()))
        .mount(&server)
        .await;

    let bytes = store.download(TOKEN, &common::doc("doc1")).await.unwrap();
    assert_eq!(bytes, b"a,b\n1,2\n");
}

#[tokio::test]
async fn test_export_passes_target_mime() {
    let (server, store) = common::setup_store().await;
    Mock::given(method("GET"))
        .and(path("/drive/v3/files/doc1/export"))
        .and(query_param("mimeType", "text/plain"))
        .respond_with(ResponseTemplate::new(200).set_body_string("plain"))
        .mount(&server)
        .await;

    let bytes = store
        .export(TOKEN, &common::doc("doc1"), "text/plain")
        .await
        .unwrap();
    assert_eq!(bytes, b"plain");
}

#[tokio::test]
async fn test_server_error_is_typed() {
    let (server, store) = common::setup_store().await;
    Mock::given(method("GET"))
        .and(path("/drive/v3/files/doc1"))
        .and(query_param("alt", "media"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = store.download(TOKEN, &common::doc("doc1")).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DriveError>(),
        Some(DriveError::ServerError(_))
    ));
}
