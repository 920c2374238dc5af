//! Test fixtures and payload builders
//!
//! Gateway frames in the shapes the platform sends them, and REST
//! responses carrying rate-limit headers.

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use cord_gateway::protocol::{GatewayMessage, HelloPayload};
use serde_json::{json, Value};

pub const CHANNEL_ID: &str = "81384788765712384";
pub const OTHER_CHANNEL_ID: &str = "81384788765712385";
pub const GUILD_ID: &str = "197038439483310086";
pub const OTHER_GUILD_ID: &str = "197038439483310087";
pub const SESSION_ID: &str = "9a0f0b2c7e1d4d6f";

pub fn hello(interval_ms: u64) -> GatewayMessage {
    GatewayMessage::hello(HelloPayload::with_interval(interval_ms))
}

/// READY listing `guilds` as unavailable
pub fn ready(sequence: u64, guilds: &[&str], resume_url: Option<&str>) -> GatewayMessage {
    let guilds: Vec<Value> = guilds
        .iter()
        .map(|id| json!({"id": id, "unavailable": true}))
        .collect();

    let mut data = json!({
        "v": 10,
        "session_id": SESSION_ID,
        "guilds": guilds,
        "user": {"id": "80351110224678912", "username": "cord", "bot": true},
    });
    if let Some(url) = resume_url {
        data["resume_gateway_url"] = json!(url);
    }

    GatewayMessage::dispatch("READY", sequence, data)
}

pub fn resumed(sequence: u64) -> GatewayMessage {
    GatewayMessage::dispatch("RESUMED", sequence, Value::Null)
}

pub fn guild_create(sequence: u64, id: &str) -> GatewayMessage {
    GatewayMessage::dispatch(
        "GUILD_CREATE",
        sequence,
        json!({"id": id, "name": "cord test", "channels": []}),
    )
}

pub fn message_create(sequence: u64, content: &str) -> GatewayMessage {
    GatewayMessage::dispatch(
        "MESSAGE_CREATE",
        sequence,
        json!({"channel_id": CHANNEL_ID, "content": content}),
    )
}

pub fn typing_start(sequence: u64) -> GatewayMessage {
    GatewayMessage::dispatch("TYPING_START", sequence, json!({"channel_id": CHANNEL_ID}))
}

/// Rate-limit headers for a successful response
pub fn bucket_headers(bucket: &str, remaining: u32, reset_after: f64) -> HeaderMap {
    let mut headers = HeaderMap::new();
    insert(&mut headers, "x-ratelimit-bucket", bucket);
    insert(&mut headers, "x-ratelimit-limit", "5");
    insert(&mut headers, "x-ratelimit-remaining", &remaining.to_string());
    insert(&mut headers, "x-ratelimit-reset-after", &reset_after.to_string());
    headers
}

/// 429 in the platform's shape
pub fn too_many_requests(retry_after: f64, global: bool) -> Response {
    let mut headers = HeaderMap::new();
    insert(&mut headers, "retry-after", &retry_after.to_string());
    if global {
        insert(&mut headers, "x-ratelimit-global", "true");
        insert(&mut headers, "x-ratelimit-scope", "global");
    } else {
        insert(&mut headers, "x-ratelimit-remaining", "0");
        insert(&mut headers, "x-ratelimit-reset-after", &retry_after.to_string());
    }

    let body = json!({
        "message": "You are being rate limited.",
        "retry_after": retry_after,
        "global": global,
    });
    (StatusCode::TOO_MANY_REQUESTS, headers, Json(body)).into_response()
}

pub fn ok_json(body: Value) -> Response {
    (StatusCode::OK, Json(body)).into_response()
}

pub fn api_error(status: StatusCode, code: u64, message: &str) -> Response {
    (status, Json(json!({"code": code, "message": message}))).into_response()
}

fn insert(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(HeaderName::from_static(name), value);
    }
}
