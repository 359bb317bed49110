//! Integration tests for the change feed

use docwatch_core::domain::newtypes::ChangeCursor;
use docwatch_core::ports::{CursorInvalidated, IDocumentStore};
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::common::{self, TOKEN};

fn cursor(s: &str) -> ChangeCursor {
    ChangeCursor::new(s.to_string()).unwrap()
}

#[tokio::test]
async fn test_get_start_cursor() {
    let (server, store) = common::setup_store().await;
    Mock::given(method("GET"))
        .and(path("/drive/v3/changes/startPageToken"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"startPageToken": "100"})),
        )
        .mount(&server)
        .await;

    let start = store.get_start_cursor(TOKEN).await.unwrap();
    assert_eq!(start.as_str(), "100");
}

#[tokio::test]
async fn test_list_changes_follows_one_page_per_call() {
    let (server, store) = common::setup_store().await;
    common::mount_changes_page(
        &server,
        "100",
        serde_json::json!({
            "nextPageToken": "101",
            "changes": [{"fileId": "d1", "removed": false, "changeType": "file"}]
        }),
    )
    .await;
    common::mount_changes_page(
        &server,
        "101",
        serde_json::json!({
            "newStartPageToken": "150",
            "changes": [{"fileId": "d2", "removed": true, "changeType": "file"}]
        }),
    )
    .await;

    let first = store.list_changes(TOKEN, &cursor("100")).await.unwrap();
    assert_eq!(first.changes.len(), 1);
    assert!(!first.is_caught_up());
    let next = first.next_cursor().unwrap().clone();
    assert_eq!(next.as_str(), "101");

    let second = store.list_changes(TOKEN, &next).await.unwrap();
    assert!(second.is_caught_up());
    assert!(second.changes[0].removed);
    assert_eq!(second.next_cursor().unwrap().as_str(), "150");
}

#[tokio::test]
async fn test_list_changes_gone_is_cursor_invalidated() {
    let (server, store) = common::setup_store().await;
    Mock::given(method("GET"))
        .and(path("/drive/v3/changes"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;

    let err = store.list_changes(TOKEN, &cursor("1")).await.unwrap_err();
    let invalid = err.downcast_ref::<CursorInvalidated>().unwrap();
    assert_eq!(invalid.cursor, "1");
}

#[tokio::test]
async fn test_list_changes_not_found_is_cursor_invalidated() {
    let (server, store) = common::setup_store().await;
    Mock::given(method("GET"))
        .and(path("/drive/v3/changes"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = store.list_changes(TOKEN, &cursor("1")).await.unwrap_err();
    assert!(err.downcast_ref::<CursorInvalidated>().is_some());
}

#[tokio::test]
async fn test_list_changes_server_error_is_not_invalidation() {
    let (server, store) = common::setup_store().await;
    Mock::given(method("GET"))
        .and(path("/drive/v3/changes"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = store.list_changes(TOKEN, &cursor("1")).await.unwrap_err();
    assert!(err.downcast_ref::<CursorInvalidated>().is_none());
}
