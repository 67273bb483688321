use axum::http::{self, Request, StatusCode};
use http_body_util::BodyExt;
use mock_server::{app, pattern_byte, Echo, HELLO_BODY, HELLO_ETAG};
use tower::ServiceExt;

async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> bytes::Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

fn request(method: &str, uri: &str) -> Request<String> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(String::new())
        .unwrap()
}

// --- hello ---

#[tokio::test]
async fn hello_returns_fixed_body_and_cache_headers() {
    let resp = app().oneshot(request("GET", "/hello")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let headers = resp.headers().clone();
    assert_eq!(headers[http::header::ETAG], HELLO_ETAG);
    assert_eq!(headers[http::header::CACHE_CONTROL], "max-age=60");
    assert!(headers.contains_key("x-request-id"));
    assert!(headers.contains_key("x-internal-trace"));
    assert_eq!(body_bytes(resp).await, HELLO_BODY.as_bytes());
}

#[tokio::test]
async fn hello_answers_head() {
    let resp = app().oneshot(request("HEAD", "/hello")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[http::header::ETAG], HELLO_ETAG);
}

#[tokio::test]
async fn request_ids_differ_between_calls() {
    let first = app().oneshot(request("GET", "/hello")).await.unwrap();
    let second = app().oneshot(request("GET", "/hello")).await.unwrap();
    assert_ne!(first.headers()["x-request-id"], second.headers()["x-request-id"]);
}

// --- status ---

#[tokio::test]
async fn status_route_returns_requested_code() {
    let resp = app().oneshot(request("GET", "/status/404")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_bytes(resp).await, &b"status 404"[..]);
}

#[tokio::test]
async fn status_route_rejects_codes_out_of_range() {
    let resp = app().oneshot(request("GET", "/status/1000")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn status_route_rejects_non_numeric_codes() {
    let resp = app().oneshot(request("GET", "/status/teapot")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// --- bytes ---

#[tokio::test]
async fn bytes_route_returns_exact_length_pattern() {
    let resp = app().oneshot(request("GET", "/bytes/100")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_bytes(resp).await;
    assert_eq!(body.len(), 100);
    assert!(body.iter().enumerate().all(|(i, b)| *b == pattern_byte(i)));
}

#[tokio::test]
async fn bytes_route_caps_size() {
    let resp = app().oneshot(request("GET", "/bytes/2000000")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

// --- echo ---

#[tokio::test]
async fn echo_reflects_method_body_and_content_type() {
    let req = Request::builder()
        .method("PUT")
        .uri("/echo")
        .header(http::header::CONTENT_TYPE, "text/plain")
        .body("replace me".to_string())
        .unwrap();
    let resp = app().oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let echo: Echo = body_json(resp).await;
    assert_eq!(echo.method, "PUT");
    assert_eq!(echo.content_type.as_deref(), Some("text/plain"));
    assert_eq!(echo.body, "replace me");
}

#[tokio::test]
async fn echo_accepts_delete_without_body() {
    let resp = app().oneshot(request("DELETE", "/echo")).await.unwrap();

    let echo: Echo = body_json(resp).await;
    assert_eq!(echo.method, "DELETE");
    assert!(echo.content_type.is_none());
    assert!(echo.body.is_empty());
}

// --- headers ---

#[tokio::test]
async fn headers_route_lists_request_headers() {
    let req = Request::builder()
        .uri("/headers")
        .header("X-Device", "t-deck")
        .body(String::new())
        .unwrap();
    let resp = app().oneshot(req).await.unwrap();

    let seen: std::collections::BTreeMap<String, String> = body_json(resp).await;
    assert_eq!(seen.get("x-device").map(String::as_str), Some("t-deck"));
}

// --- redirect ---

#[tokio::test]
async fn redirect_points_at_hello() {
    let resp = app().oneshot(request("GET", "/redirect")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(resp.headers()[http::header::LOCATION], "/hello");
}

// --- delay ---

#[tokio::test]
async fn delay_waits_then_answers() {
    let started = std::time::Instant::now();
    let resp = app().oneshot(request("GET", "/delay/50")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert!(started.elapsed() >= std::time::Duration::from_millis(50));
    assert_eq!(body_bytes(resp).await, &b"waited 50ms"[..]);
}

// --- unknown ---

#[tokio::test]
async fn unknown_route_returns_404() {
    let resp = app().oneshot(request("GET", "/nope")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
