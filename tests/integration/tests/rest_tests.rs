//! REST integration tests
//!
//! Every test runs the REST engine against its own axum mock.
//!
//! Run with: cargo test -p integration-tests --test rest_tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use cord_rest::{routes, Attachment, Method, RequestOptions, RestError, RestResponse};
use futures_util::future::join_all;
use integration_tests::*;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::time::Instant;

#[derive(Default)]
struct Hits {
    count: AtomicUsize,
    log: Mutex<Vec<(String, Instant)>>,
}

impl Hits {
    fn record(&self, label: impl Into<String>) -> usize {
        self.log.lock().push((label.into(), Instant::now()));
        self.count.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    fn labels(&self) -> Vec<String> {
        self.log.lock().iter().map(|(label, _)| label.clone()).collect()
    }

    fn first_hit(&self, label: &str) -> Option<Instant> {
        self.log
            .lock()
            .iter()
            .find(|(seen, _)| seen == label)
            .map(|(_, at)| *at)
    }
}

// ============================================================================
// Rate limits
// ============================================================================

#[tokio::test]
async fn test_429_retried_after_retry_after() {
    init_test_tracing();

    async fn handler(State(hits): State<Arc<Hits>>) -> Response {
        if hits.record("get") == 1 {
            too_many_requests(0.2, false)
        } else {
            ok_json(json!({"id": CHANNEL_ID}))
        }
    }

    let hits = Arc::new(Hits::default());
    let app = Router::new()
        .route("/api/v10/channels/:id", get(handler))
        .with_state(hits.clone());
    let server = TestServer::start(app).await.unwrap();
    let rest = server.rest_router();

    let started = Instant::now();
    let response = rest
        .get(&format!("channels/{CHANNEL_ID}"), RequestOptions::new())
        .await
        .unwrap();

    assert_eq!(response.as_json().unwrap()["id"], CHANNEL_ID);
    assert_eq!(hits.count(), 2);
    assert!(started.elapsed() >= Duration::from_millis(190));
}

#[tokio::test]
async fn test_429_does_not_consume_retry_budget() {
    async fn handler(State(hits): State<Arc<Hits>>) -> Response {
        match hits.record("get") {
            1..=3 => too_many_requests(0.01, false),
            _ => ok_json(json!({})),
        }
    }

    let hits = Arc::new(Hits::default());
    let app = Router::new()
        .route("/api/v10/users/@me", get(handler))
        .with_state(hits.clone());
    let server = TestServer::start(app).await.unwrap();
    let rest = server.rest_router();

    rest.get(routes::CURRENT_USER, RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(hits.count(), 4);
}

#[tokio::test]
async fn test_429_without_retry_after_waits_for_bucket_reset() {
    async fn handler(State(hits): State<Arc<Hits>>) -> Response {
        if hits.record("get") == 1 {
            // Exhausted bucket, but no retry-after header
            let headers = bucket_headers("chan", 0, 0.3);
            let body = json!({"message": "You are being rate limited.", "global": false});
            (StatusCode::TOO_MANY_REQUESTS, headers, Json(body)).into_response()
        } else {
            ok_json(json!({"id": CHANNEL_ID}))
        }
    }

    let hits = Arc::new(Hits::default());
    let app = Router::new()
        .route("/api/v10/channels/:id", get(handler))
        .with_state(hits.clone());
    let server = TestServer::start(app).await.unwrap();
    let rest = server.rest_router();

    let started = Instant::now();
    rest.get(&format!("channels/{CHANNEL_ID}"), RequestOptions::new())
        .await
        .unwrap();

    assert_eq!(hits.count(), 2);
    assert!(started.elapsed() >= Duration::from_millis(250));
}

#[tokio::test]
async fn test_bucket_requests_run_in_submission_order() {
    async fn handler(
        State(hits): State<Arc<Hits>>,
        Json(body): Json<Value>,
    ) -> impl IntoResponse {
        let n = body["n"].as_u64().unwrap_or_default();
        hits.record(n.to_string());
        // Slow enough that later requests pile up behind this one
        tokio::time::sleep(Duration::from_millis(20)).await;
        (bucket_headers("msgbucket", 4, 0.05), Json(json!({"n": n})))
    }

    let hits = Arc::new(Hits::default());
    let app = Router::new()
        .route("/api/v10/channels/:id/messages", post(handler))
        .with_state(hits.clone());
    let server = TestServer::start(app).await.unwrap();
    let rest = server.rest_router();

    let path = format!("channels/{CHANNEL_ID}/messages");
    let requests = (0..6).map(|n| {
        let rest = rest.clone();
        let path = path.clone();
        async move {
            rest.post(&path, RequestOptions::new().json(json!({"n": n})))
                .await
        }
    });
    let results = join_all(requests).await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(hits.labels(), ["0", "1", "2", "3", "4", "5"]);
}

#[tokio::test]
async fn test_exhausted_bucket_waits_for_reset() {
    async fn handler(State(hits): State<Arc<Hits>>, Json(body): Json<Value>) -> impl IntoResponse {
        hits.record(body["n"].to_string());
        (bucket_headers("typing", 0, 0.3), StatusCode::NO_CONTENT)
    }

    let hits = Arc::new(Hits::default());
    let app = Router::new()
        .route("/api/v10/channels/:id/typing", post(handler))
        .with_state(hits.clone());
    let server = TestServer::start(app).await.unwrap();
    let rest = server.rest_router();

    // Both queue on the same dispatcher before the first response arrives
    let path = format!("channels/{CHANNEL_ID}/typing");
    let results = join_all((0..2).map(|n| {
        rest.post(&path, RequestOptions::new().json(json!({"n": n})))
    }))
    .await;

    for result in results {
        assert!(result.unwrap().is_empty());
    }
    let first = hits.first_hit("0").unwrap();
    let second = hits.first_hit("1").unwrap();
    assert!(second.duration_since(first) >= Duration::from_millis(250));
}

#[tokio::test]
async fn test_global_pause_blocks_other_buckets() {
    async fn handler(State(hits): State<Arc<Hits>>, Path(id): Path<String>) -> Response {
        let hit = hits.record(id.clone());
        if id == CHANNEL_ID && hit == 1 {
            too_many_requests(0.4, true)
        } else {
            ok_json(json!({"id": id}))
        }
    }

    let hits = Arc::new(Hits::default());
    let app = Router::new()
        .route("/api/v10/channels/:id", get(handler))
        .with_state(hits.clone());
    let server = TestServer::start(app).await.unwrap();
    let rest = server.rest_router();

    let first = {
        let rest = rest.clone();
        tokio::spawn(async move {
            rest.get(&format!("channels/{CHANNEL_ID}"), RequestOptions::new())
                .await
        })
    };

    // Let the first request hit the global limit
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rest.is_globally_limited());

    rest.get(&format!("channels/{OTHER_CHANNEL_ID}"), RequestOptions::new())
        .await
        .unwrap();
    first.await.unwrap().unwrap();

    let limited_at = hits.first_hit(CHANNEL_ID).unwrap();
    let other_at = hits.first_hit(OTHER_CHANNEL_ID).unwrap();
    assert!(other_at.duration_since(limited_at) >= Duration::from_millis(350));
}

#[tokio::test]
async fn test_bucket_hash_learned_from_headers() {
    async fn handler(State(hits): State<Arc<Hits>>) -> impl IntoResponse {
        hits.record("messages");
        (bucket_headers("abcd1234", 4, 1.0), Json(json!([])))
    }

    let hits = Arc::new(Hits::default());
    let app = Router::new()
        .route("/api/v10/channels/:id/messages", get(handler))
        .with_state(hits.clone());
    let server = TestServer::start(app).await.unwrap();
    let rest = server.rest_router();

    let path = format!("channels/{CHANNEL_ID}/messages");
    rest.get(&path, RequestOptions::new()).await.unwrap();

    let bucket_route = format!("channels/{CHANNEL_ID}/messages");
    assert_eq!(
        rest.bucket_hash(Method::Get, &bucket_route).as_deref(),
        Some("abcd1234")
    );

    // The next request goes to a dispatcher keyed by the learned hash
    rest.get(&path, RequestOptions::new()).await.unwrap();
    let dispatcher = rest
        .dispatcher(&format!("{CHANNEL_ID}:abcd1234"))
        .expect("dispatcher for learned hash");
    assert_eq!(dispatcher.remaining(), 4);

    // Both dispatchers are idle; sweeping drops the mapping too
    assert_eq!(rest.sweep(), 2);
    assert!(rest.bucket_hash(Method::Get, &bucket_route).is_none());
}

// ============================================================================
// Failures and retries
// ============================================================================

#[tokio::test]
async fn test_transient_status_retried_within_budget() {
    async fn flaky(State(hits): State<Arc<Hits>>) -> Response {
        if hits.record("flaky") <= 2 {
            StatusCode::BAD_GATEWAY.into_response()
        } else {
            ok_json(json!({"ok": true}))
        }
    }

    let hits = Arc::new(Hits::default());
    let app = Router::new()
        .route("/api/v10/gateway/bot", get(flaky))
        .with_state(hits.clone());
    let server = TestServer::start(app).await.unwrap();
    let rest = server.rest_router();

    let response = rest
        .get(routes::GATEWAY_BOT, RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(response.as_json().unwrap()["ok"], true);
    assert_eq!(hits.count(), 3);
}

#[tokio::test]
async fn test_transient_status_fails_when_budget_spent() {
    async fn broken(State(hits): State<Arc<Hits>>) -> Response {
        hits.record("broken");
        StatusCode::SERVICE_UNAVAILABLE.into_response()
    }

    let hits = Arc::new(Hits::default());
    let app = Router::new()
        .route("/api/v10/gateway/bot", get(broken))
        .with_state(hits.clone());
    let server = TestServer::start(app).await.unwrap();
    let rest = server.rest_router();

    let err = rest
        .get(routes::GATEWAY_BOT, RequestOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(503));
    // One attempt plus the default budget of two retries
    assert_eq!(hits.count(), 3);
}

#[tokio::test]
async fn test_api_error_body_surfaced() {
    async fn missing() -> Response {
        api_error(StatusCode::NOT_FOUND, 10003, "Unknown Channel")
    }

    let app = Router::new().route("/api/v10/channels/:id", get(missing));
    let server = TestServer::start(app).await.unwrap();
    let rest = server.rest_router();

    let err = rest
        .get(&format!("channels/{CHANNEL_ID}"), RequestOptions::new())
        .await
        .unwrap_err();

    assert!(matches!(err, RestError::Api { status: 404, .. }));
    assert_eq!(err.api_code(), Some(10003));
    assert!(err.to_string().contains("Unknown Channel"));
}

#[tokio::test]
async fn test_connection_refused_is_transport_error() {
    let (listener, addr) = bind_local().await.unwrap();
    drop(listener);

    let rest = cord_rest::RestRouter::new(cord_common::RestConfig {
        api_url: format!("http://{addr}/api"),
        sweep_interval_ms: 0,
        ..cord_common::RestConfig::default()
    })
    .unwrap()
    .with_token(cord_common::Token::bot(TEST_TOKEN));

    let err = rest
        .get(routes::GATEWAY_BOT, RequestOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RestError::Transport { attempts: 3, .. }));
}

// ============================================================================
// Request shape
// ============================================================================

#[tokio::test]
async fn test_headers_sent() {
    async fn echo(headers: HeaderMap) -> Response {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default()
                .to_string()
        };
        ok_json(json!({
            "authorization": header("authorization"),
            "user_agent": header("user-agent"),
            "reason": header("x-audit-log-reason"),
        }))
    }

    let app = Router::new().route("/api/v10/guilds/:id/bans/:user", axum::routing::put(echo));
    let server = TestServer::start(app).await.unwrap();
    let rest = server.rest_router();

    let response = rest
        .request_route(
            Method::Put,
            routes::GUILD_BAN,
            &[GUILD_ID, "80351110224678912"],
            RequestOptions::new().reason("spam & abuse"),
        )
        .await
        .unwrap();
    let body = response.as_json().unwrap();

    assert_eq!(body["authorization"], format!("Bot {TEST_TOKEN}"));
    assert!(body["user_agent"].as_str().unwrap().starts_with("DiscordBot ("));
    assert_eq!(body["reason"], "spam%20%26%20abuse");
}

#[tokio::test]
async fn test_multipart_attachments() {
    async fn upload(headers: HeaderMap, body: Bytes) -> Response {
        let content_type = headers
            .get("content-type")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = String::from_utf8_lossy(&body).to_string();
        ok_json(json!({"content_type": content_type, "body": body}))
    }

    let app = Router::new().route("/api/v10/channels/:id/messages", post(upload));
    let server = TestServer::start(app).await.unwrap();
    let rest = server.rest_router();

    let options = RequestOptions::new()
        .json(json!({"content": "two files"}))
        .file(Attachment::new("a.txt", "first").with_content_type("text/plain"))
        .file(Attachment::new("b.bin", vec![1u8, 2, 3]));

    let response = rest
        .request_route(Method::Post, routes::CHANNEL_MESSAGES, &[CHANNEL_ID], options)
        .await
        .unwrap();
    let RestResponse::Json(echo) = response else {
        panic!("expected JSON");
    };

    assert!(echo["content_type"]
        .as_str()
        .unwrap()
        .starts_with("multipart/form-data"));
    let body = echo["body"].as_str().unwrap();
    assert!(body.contains(r#"name="files[0]"; filename="a.txt""#));
    assert!(body.contains(r#"name="files[1]"; filename="b.bin""#));
    assert!(body.contains(r#"name="payload_json""#));
    assert!(body.contains(r#"{"content":"two files"}"#));
}

#[tokio::test]
async fn test_non_json_body_returned_raw() {
    async fn avatar() -> Response {
        ([("content-type", "image/png")], vec![0x89u8, b'P', b'N', b'G']).into_response()
    }

    let app = Router::new().route("/api/v10/users/:id", get(avatar));
    let server = TestServer::start(app).await.unwrap();
    let rest = server.rest_router();

    let response = rest
        .get("users/80351110224678912", RequestOptions::new().without_auth())
        .await
        .unwrap();
    assert_eq!(response.into_bytes().as_ref(), &[0x89u8, b'P', b'N', b'G']);
}
