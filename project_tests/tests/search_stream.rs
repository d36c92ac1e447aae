//! End-to-end tests of `POST /api/movies` against the scripted backend.

use axum::body::Body;
use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use http_body_util::BodyExt;
use project_tests::{MockBackend, Reply, body_text, init_line, movie_line, open_gateway, post_json};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceExt;

fn item_count(frame: &str) -> usize {
    let snapshot: Value = serde_json::from_str(frame).unwrap();
    snapshot["recommendations"].as_array().unwrap().len()
}

fn frames(body: &str) -> Vec<&str> {
    body.split('\n').collect()
}

#[tokio::test]
async fn init_and_two_movies_stream_three_snapshots_then_final() {
    let backend = MockBackend::start(Reply::Lines(vec![
        init_line("q"),
        movie_line(1, "Alien"),
        movie_line(2, "Aliens"),
    ]))
    .await
    .unwrap();
    let app = open_gateway(&backend.url).unwrap();

    let response = app.oneshot(post_json("/api/movies", &json!({"query": "q"}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_TYPE], "application/x-ndjson");

    let body = body_text(response).await.unwrap();
    let frames = frames(&body);

    // Three newline-terminated snapshots, then the unterminated closing one.
    assert_eq!(body.matches('\n').count(), 3);
    assert_eq!(frames.iter().map(|f| item_count(f)).collect::<Vec<_>>(), vec![0, 1, 2, 2]);
    for frame in &frames {
        let snapshot: Value = serde_json::from_str(frame).unwrap();
        assert_eq!(snapshot["query"], "q");
    }

    assert_eq!(backend.calls(), 1);
    assert_eq!(backend.bodies(), vec![json!({"query": "q"})]);
}

#[tokio::test]
async fn duplicates_and_bad_lines_do_not_break_the_stream() {
    let backend = MockBackend::start(Reply::Lines(vec![
        movie_line(7, "Heat"),
        "{\"type\":\"movie\",\"data\":{oops\n".to_string(),
        movie_line(7, "Heat again"),
        "{\"type\":\"movie\",\"data\":{\"id\":8,\"ti".to_string(),
        "tle\":\"Ronin\"}}\n".to_string(),
    ]))
    .await
    .unwrap();
    let app = open_gateway(&backend.url).unwrap();

    let response = app
        .oneshot(post_json("/api/movies", &json!({"query": "crime"})))
        .await
        .unwrap();
    let body = body_text(response).await.unwrap();

    let counts: Vec<usize> = frames(&body).iter().map(|f| item_count(f)).collect();
    assert_eq!(counts, vec![1, 1, 2, 2]);

    let last: Value = serde_json::from_str(frames(&body).last().unwrap()).unwrap();
    assert_eq!(
        last["recommendations"],
        json!([{"id": 7, "title": "Heat"}, {"id": 8, "title": "Ronin"}])
    );
}

#[tokio::test]
async fn blank_query_is_rejected_without_calling_the_backend() {
    let backend = MockBackend::start(Reply::Lines(vec![])).await.unwrap();
    let app = open_gateway(&backend.url).unwrap();

    for body in [json!({"query": ""}), json!({"query": "   "}), json!({})] {
        let response = app.clone().oneshot(post_json("/api/movies", &body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let error: Value = serde_json::from_str(&body_text(response).await.unwrap()).unwrap();
        assert_eq!(error, json!({"error": "Query parameter is required"}));
    }

    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn malformed_body_is_a_bad_request() {
    let backend = MockBackend::start(Reply::Lines(vec![])).await.unwrap();
    let app = open_gateway(&backend.url).unwrap();

    let mut request = post_json("/api/movies", &json!({}));
    *request.body_mut() = Body::from("{not json");
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn backend_status_and_detail_are_passed_through() {
    let backend = MockBackend::start(Reply::Status(503, r#"{"detail":"overloaded"}"#.into()))
        .await
        .unwrap();
    let app = open_gateway(&backend.url).unwrap();

    let response = app.oneshot(post_json("/api/movies", &json!({"query": "q"}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let error: Value = serde_json::from_str(&body_text(response).await.unwrap()).unwrap();
    assert_eq!(error, json!({"error": "overloaded"}));
}

#[tokio::test]
async fn backend_error_without_detail_uses_generic_message() {
    let backend = MockBackend::start(Reply::Status(502, "{}".into())).await.unwrap();
    let app = open_gateway(&backend.url).unwrap();

    let response = app.oneshot(post_json("/api/movies", &json!({"query": "q"}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let error: Value = serde_json::from_str(&body_text(response).await.unwrap()).unwrap();
    assert_eq!(error, json!({"error": "Failed to fetch movie recommendations"}));
}

#[tokio::test]
async fn unreadable_error_body_keeps_status_and_uses_generic_message() {
    let backend = MockBackend::start(Reply::BrokenStatus(503, r#"{"detail":"overl"#.into()))
        .await
        .unwrap();
    let app = open_gateway(&backend.url).unwrap();

    let response = app.oneshot(post_json("/api/movies", &json!({"query": "q"}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let error: Value = serde_json::from_str(&body_text(response).await.unwrap()).unwrap();
    assert_eq!(error, json!({"error": "Failed to fetch movie recommendations"}));
}

#[tokio::test]
async fn unreachable_backend_is_an_internal_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);
    let app = open_gateway(&url).unwrap();

    let response = app.oneshot(post_json("/api/movies", &json!({"query": "q"}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let error: Value = serde_json::from_str(&body_text(response).await.unwrap()).unwrap();
    assert_eq!(error, json!({"error": "An unexpected error occurred"}));
}

#[tokio::test]
async fn json_document_becomes_a_single_final_snapshot() {
    let backend = MockBackend::start(Reply::Document(
        r#"{"recommendations":[{"id":1,"title":"Up"},{"title":"no id"},{"id":2,"title":"Coco"}]}"#.into(),
    ))
    .await
    .unwrap();
    let app = open_gateway(&backend.url).unwrap();

    let response = app
        .oneshot(post_json("/api/movies", &json!({"query": "pixar"})))
        .await
        .unwrap();
    let body = body_text(response).await.unwrap();

    assert!(!body.contains('\n'));
    let snapshot: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(
        snapshot,
        json!({"recommendations": [{"id":1,"title":"Up"},{"id":2,"title":"Coco"}], "query": "pixar"})
    );
}

#[tokio::test]
async fn document_under_another_label_still_yields_its_items() {
    let document = r#"{"recommendations":[{"id":1,"title":"Up"},{"id":2,"title":"Coco"}]}"#;

    for label in [None, Some("text/plain"), Some("application/x-ndjson")] {
        let backend = MockBackend::start(Reply::Labelled(label, document.into()))
            .await
            .unwrap();
        let app = open_gateway(&backend.url).unwrap();

        let response = app
            .oneshot(post_json("/api/movies", &json!({"query": "pixar"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await.unwrap();

        assert!(!body.contains('\n'), "{label:?}");
        let snapshot: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(
            snapshot,
            json!({"recommendations": [{"id":1,"title":"Up"},{"id":2,"title":"Coco"}], "query": "pixar"}),
            "{label:?}"
        );
    }
}

#[tokio::test]
async fn event_stream_labelled_as_json_still_yields_its_items() {
    let lines = [init_line("q"), movie_line(1, "Alien"), movie_line(2, "Aliens")].concat();
    let backend = MockBackend::start(Reply::Labelled(Some("application/json"), lines))
        .await
        .unwrap();
    let app = open_gateway(&backend.url).unwrap();

    let response = app.oneshot(post_json("/api/movies", &json!({"query": "q"}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_text(response).await.unwrap();

    let snapshot: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(
        snapshot,
        json!({"recommendations": [{"id":1,"title":"Alien"},{"id":2,"title":"Aliens"}], "query": "q"})
    );
}

#[tokio::test]
async fn broken_backend_stream_aborts_the_response() {
    let backend = MockBackend::start(Reply::Truncated(vec![init_line("q"), movie_line(1, "Alien")]))
        .await
        .unwrap();
    let app = open_gateway(&backend.url).unwrap();

    let response = app.oneshot(post_json("/api/movies", &json!({"query": "q"}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // The caller must see an error, not a normally completed body.
    assert!(axum::body::to_bytes(response.into_body(), usize::MAX).await.is_err());
}

#[tokio::test]
async fn json_accept_header_gets_buffered_final_snapshot() {
    let backend = MockBackend::start(Reply::Lines(vec![
        init_line("q"),
        movie_line(1, "Alien"),
        movie_line(2, "Aliens"),
    ]))
    .await
    .unwrap();
    let app = open_gateway(&backend.url).unwrap();

    let mut request = post_json("/api/movies", &json!({"query": "q"}));
    request
        .headers_mut()
        .insert(ACCEPT, HeaderValue::from_static("application/json"));
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
    let snapshot: Value = serde_json::from_str(&body_text(response).await.unwrap()).unwrap();
    assert_eq!(snapshot["recommendations"].as_array().unwrap().len(), 2);
    assert_eq!(snapshot["query"], "q");
}

#[tokio::test]
async fn caller_going_away_tears_down_the_backend_stream() {
    let backend = MockBackend::start(Reply::Endless).await.unwrap();
    let app = open_gateway(&backend.url).unwrap();

    let response = app
        .oneshot(post_json("/api/movies", &json!({"query": "endless"})))
        .await
        .unwrap();
    let mut body = response.into_body();

    let first = body.frame().await.unwrap().unwrap().into_data().unwrap();
    assert_eq!(item_count(std::str::from_utf8(&first).unwrap().trim_end()), 0);
    assert!(!backend.stream_dropped());

    drop(body);
    assert!(backend.wait_for_drop(Duration::from_secs(5)).await);
}
