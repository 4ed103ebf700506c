//! User service over HTTP, checked through its exported telemetry.

mod common;

use axum::http::StatusCode;
use common::{children_of, TestApp};
use demo_services::ServiceKind;
use op_telemetry::{AttributeValue, SpanKind, SpanStatus};
use serde_json::json;

fn ada() -> serde_json::Value {
    json!({"name": "Ada", "email": "ada@example.com", "password": "pw"})
}

#[tokio::test]
async fn test_create_user_returns_row_and_records_success() {
    let app = TestApp::start(ServiceKind::Users);

    let (status, body) = app.post_json("/users/", ada()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"id": 1, "name": "Ada", "email": "ada@example.com"}));

    let spans = app.spans("create_user").await;
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].status, SpanStatus::Ok);
    assert_eq!(
        app.exporter.metric_total(
            "user_service_request_count",
            &[("operation", "create_user".into()), ("outcome", "success".into())]
        ),
        1.0
    );
    assert_eq!(app.exporter.metric_total("user_created_count", &[]), 1.0);
    assert_eq!(app.exporter.metric_total("active_users", &[]), 1.0);
}

#[tokio::test]
async fn test_request_span_tree() {
    let app = TestApp::start(ServiceKind::Users);
    app.post_json("/users/", ada()).await;

    let http = app.spans("http_request").await;
    assert_eq!(http.len(), 1);
    let request = &http[0];
    assert_eq!(request.kind, SpanKind::Server);
    assert_eq!(request.status, SpanStatus::Ok);
    assert_eq!(request.attributes.get("http.status_code"), Some(&AttributeValue::Int(200)));
    assert_eq!(request.attributes.get("http.route"), Some(&AttributeValue::from("/users/")));

    let all = app.exporter.spans();
    let handler = children_of(request, &all);
    assert_eq!(handler.len(), 1);
    assert_eq!(handler[0].name, "create_user");

    let mut db: Vec<&str> = children_of(handler[0], &all)
        .iter()
        .map(|s| s.name.as_str())
        .collect();
    db.sort_unstable();
    assert_eq!(db, vec!["db.insert", "db.select_by_email"]);
    assert!(children_of(handler[0], &all).iter().all(|s| s.kind == SpanKind::Client));
}

#[tokio::test]
async fn test_get_missing_user_is_404_with_failure_telemetry() {
    let app = TestApp::start(ServiceKind::Users);

    let (status, body) = app.get("/users/42").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({"detail": "User not found"}));

    let get_user = app.spans("get_user").await;
    assert_eq!(get_user.len(), 1);
    assert_eq!(get_user[0].status, SpanStatus::Error);
    assert_eq!(get_user[0].status_message.as_deref(), Some("User not found"));

    let http = app.exporter.spans_named("http_request");
    assert_eq!(http[0].status, SpanStatus::Error);
    assert_eq!(http[0].attributes.get("http.status_code"), Some(&AttributeValue::Int(404)));

    // The lookup itself succeeded; only the handler failed.
    assert_eq!(app.exporter.spans_named("db.select")[0].status, SpanStatus::Ok);
    assert_eq!(
        app.exporter.metric_total(
            "user_service_request_count",
            &[
                ("operation", "get_user".into()),
                ("outcome", "failure".into()),
                ("error.kind", "not_found".into())
            ]
        ),
        1.0
    );
}

#[tokio::test]
async fn test_duplicate_email_is_400() {
    let app = TestApp::start(ServiceKind::Users);
    app.post_json("/users/", ada()).await;

    let (status, body) = app.post_json("/users/", ada()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Email ada@example.com already registered");

    app.flush().await;
    assert_eq!(app.exporter.metric_total("user_created_count", &[]), 1.0);
    assert_eq!(app.exporter.spans_named("db.insert").len(), 1);
}

#[tokio::test]
async fn test_update_and_delete_lifecycle() {
    let app = TestApp::start(ServiceKind::Users);
    app.post_json("/users/", ada()).await;

    let (status, body) = app
        .put_json("/users/1", json!({"name": "Ada L.", "email": "ada@example.com"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "User updated successfully");

    let (_, users) = app.get("/users/").await;
    assert_eq!(users, json!([{"id": 1, "name": "Ada L.", "email": "ada@example.com"}]));

    let (status, body) = app.delete("/users/1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "User deleted successfully");

    let (status, _) = app.delete("/users/1").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app
        .put_json("/users/1", json!({"name": "x", "email": "x@example.com"}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    app.flush().await;
    assert_eq!(app.exporter.metric_total("user_updated_count", &[]), 1.0);
    assert_eq!(app.exporter.metric_total("user_deleted_count", &[]), 1.0);
    // +1 on create, -1 on delete
    assert_eq!(app.exporter.metric_total("active_users", &[]), 0.0);
}

#[tokio::test]
async fn test_invalid_email_is_rejected() {
    let app = TestApp::start(ServiceKind::Users);
    let (status, _) = app
        .post_json("/users/", json!({"name": "Bob", "email": "bob", "password": "pw"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    app.flush().await;
    assert!(app.exporter.spans_named("db.insert").is_empty());
    assert_eq!(
        app.exporter.metric_total(
            "user_service_request_count",
            &[("operation", "create_user".into()), ("error.kind", "bad_request".into())]
        ),
        1.0
    );
}

#[tokio::test]
async fn test_every_span_ends() {
    let app = TestApp::start(ServiceKind::Users);
    for i in 0..20 {
        let email = format!("user{i}@example.com");
        app.post_json("/users/", json!({"name": "u", "email": email, "password": "pw"}))
            .await;
        app.get(&format!("/users/{}", i + 100)).await;
    }
    assert_eq!(app.ctx.tracer().open_spans(), 0);
    assert_eq!(app.ctx.tracer().orphaned_children(), 0);

    let snapshot = app.ctx.shutdown().await;
    assert_eq!(snapshot.dropped_records, 0);
    assert_eq!(snapshot.misuse_errors, 0);
}
