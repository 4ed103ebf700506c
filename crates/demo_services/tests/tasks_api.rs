//! Task service over HTTP, checked through its exported telemetry.

mod common;

use axum::http::StatusCode;
use common::{children_of, TestApp};
use demo_services::ServiceKind;
use op_telemetry::{AttributeValue, SpanKind, SpanStatus};
use serde_json::{json, Value};
use std::time::Duration;

/// Polls `uri` until the task (or group) reports a result.
async fn wait_for_result(app: &TestApp, uri: &str) -> Value {
    for _ in 0..200 {
        let (status, body) = app.get(uri).await;
        assert_eq!(status, StatusCode::OK);
        if body["result"] != "Not ready" {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("{uri} never became ready");
}

#[tokio::test]
async fn test_add_then_check() {
    let app = TestApp::start(ServiceKind::Tasks);

    let (status, body) = app.post("/add?x=2&y=3").await;
    assert_eq!(status, StatusCode::OK);
    let task_id = body["task_id"].as_str().unwrap().to_string();

    let body = wait_for_result(&app, &format!("/check/{task_id}")).await;
    assert_eq!(body["task_id"], task_id.as_str());
    assert_eq!(body["status"], "SUCCESS");
    assert_eq!(body["result"], 5);
}

#[tokio::test]
async fn test_multiply_then_check() {
    let app = TestApp::start(ServiceKind::Tasks);

    let (_, body) = app.post("/multiply?x=6&y=7").await;
    let task_id = body["task_id"].as_str().unwrap().to_string();

    let body = wait_for_result(&app, &format!("/check/{task_id}")).await;
    assert_eq!(body["result"], 42);
}

#[tokio::test]
async fn test_group_reports_every_member() {
    let app = TestApp::start(ServiceKind::Tasks);

    let (status, body) = app.post("/multiply_and_add?x=3&y=4").await;
    assert_eq!(status, StatusCode::OK);
    let group_id = body["group_task_id"].as_str().unwrap().to_string();

    let body = wait_for_result(&app, &format!("/check_group/{group_id}")).await;
    assert_eq!(body["group_task_id"], group_id.as_str());
    assert_eq!(body["status"], json!(["SUCCESS", "SUCCESS"]));
    assert_eq!(body["result"], json!([12, 7]));
}

#[tokio::test]
async fn test_unknown_task_reports_pending() {
    let app = TestApp::start(ServiceKind::Tasks);

    let (status, body) = app.get("/check/does-not-exist").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"task_id": "does-not-exist", "status": "PENDING", "result": "Not ready"})
    );

    let fetch = app.spans("task_queue.fetch").await;
    assert_eq!(fetch[0].status, SpanStatus::Ok);
    let http = app.exporter.spans_named("http_request");
    assert_eq!(http[0].attributes.get("http.status_code"), Some(&AttributeValue::Int(200)));
    assert_eq!(
        http[0].attributes.get("http.route"),
        Some(&AttributeValue::from("/check/{task_id}"))
    );
}

#[tokio::test]
async fn test_unknown_group_is_404() {
    let app = TestApp::start(ServiceKind::Tasks);

    let (status, body) = app.get("/check_group/does-not-exist").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], "Group does-not-exist not found");

    let fetch = app.spans("task_queue.fetch_group").await;
    assert_eq!(fetch[0].status, SpanStatus::Error);
    let http = app.exporter.spans_named("http_request");
    assert_eq!(http[0].status, SpanStatus::Error);
    assert_eq!(
        app.exporter.metric_total(
            "task_service_request_count",
            &[
                ("operation", "http_request".into()),
                ("http.route", "/check_group/{group_task_id}".into()),
                ("http.status_code", 404_i64.into())
            ]
        ),
        1.0
    );
}

#[tokio::test]
async fn test_missing_operand_is_400_and_still_traced() {
    let app = TestApp::start(ServiceKind::Tasks);

    let (status, _) = app.post("/add?x=2").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let http = app.spans("http_request").await;
    assert_eq!(http.len(), 1);
    assert_eq!(http[0].status, SpanStatus::Error);
    assert!(app.exporter.spans_named("task_queue.submit").is_empty());
}

#[tokio::test]
async fn test_submit_is_child_of_request_span() {
    let app = TestApp::start(ServiceKind::Tasks);
    app.post("/add?x=1&y=1").await;

    let http = app.spans("http_request").await;
    let all = app.exporter.spans();
    let children = children_of(&http[0], &all);
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].name, "task_queue.submit");
    assert_eq!(children[0].kind, SpanKind::Producer);
    assert_eq!(
        children[0].attributes.get("messaging.destination.name"),
        Some(&AttributeValue::from("queue_add"))
    );

    assert_eq!(
        app.exporter.metric_total(
            "task_service_request_count",
            &[("operation", "http_request".into()), ("http.route", "/add".into())]
        ),
        1.0
    );
    assert_eq!(
        app.exporter.metric_total(
            "task_service_request_count",
            &[("operation", "task_queue.submit".into())]
        ),
        1.0
    );
}

#[tokio::test]
async fn test_health_is_not_instrumented() {
    let app = TestApp::start(ServiceKind::Tasks);

    let (status, body) = app.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "task-service");

    assert!(app.spans("http_request").await.is_empty());
}
