//! Rate-limit response headers

use reqwest::header::{HeaderMap, RETRY_AFTER};
use std::time::Duration;

pub const REMAINING: &str = "x-ratelimit-remaining";
pub const RESET_AFTER: &str = "x-ratelimit-reset-after";
pub const BUCKET: &str = "x-ratelimit-bucket";
pub const GLOBAL: &str = "x-ratelimit-global";

/// Parsed rate-limit headers of one response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitHeaders {
    pub remaining: Option<i64>,
    pub reset_after: Option<Duration>,
    pub bucket: Option<String>,
    pub global: bool,
    pub retry_after: Option<Duration>,
}

impl RateLimitHeaders {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            remaining: header_str(headers, REMAINING).and_then(|v| v.parse().ok()),
            reset_after: header_str(headers, RESET_AFTER).and_then(parse_seconds),
            bucket: header_str(headers, BUCKET)
                .filter(|v| !v.is_empty())
                .map(str::to_string),
            global: header_str(headers, GLOBAL).is_some_and(|v| !v.eq_ignore_ascii_case("false")),
            retry_after: header_str(headers, RETRY_AFTER.as_str()).and_then(parse_seconds),
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name)?.to_str().ok().map(str::trim)
}

/// Seconds, possibly fractional (`"0.25"`)
fn parse_seconds(raw: &str) -> Option<Duration> {
    let secs: f64 = raw.parse().ok()?;
    Duration::try_from_secs_f64(secs.max(0.0)).ok()
}
