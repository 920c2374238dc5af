//! One bucket's admission and retry policy

use parking_lot::Mutex;
use reqwest::StatusCode;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::error::{RestError, RestResult};
use crate::gate::{GateReservation, RateGate};
use crate::headers::RateLimitHeaders;
use crate::request::PreparedRequest;
use crate::response::{parse_body, parse_error_body, RestResponse};
use crate::retry::{classify_error, classify_status, RetryReason};
use crate::router::RouterShared;

/// Wait after a 429 that carries neither `retry-after` nor a reset window
pub(crate) const RATE_LIMIT_FALLBACK: Duration = Duration::from_secs(1);

/// Rate-limit state of one bucket
#[derive(Debug)]
struct BucketState {
    remaining: i64,
    reset_at: Option<Instant>,
    /// Router hash-map keys served by this bucket, dropped on sweep
    route_keys: HashSet<String>,
}

/// Executes the requests of one `{major parameter}:{bucket hash}` bucket
/// strictly one at a time, in submission order.
pub struct RestDispatcher {
    id: String,
    hash: String,
    gate: RateGate,
    state: Mutex<BucketState>,
    shared: Arc<RouterShared>,
}

impl RestDispatcher {
    pub(crate) fn new(id: String, hash: String, shared: Arc<RouterShared>) -> Self {
        Self {
            id,
            hash,
            gate: RateGate::new(),
            state: Mutex::new(BucketState {
                remaining: 1,
                reset_at: None,
                route_keys: HashSet::new(),
            }),
            shared,
        }
    }

    /// `{major parameter}:{bucket hash}`
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn remaining(&self) -> i64 {
        self.state.lock().remaining
    }

    /// Callers holding or waiting for the gate
    pub fn queued(&self) -> usize {
        self.gate.len()
    }

    pub fn is_locally_limited(&self) -> bool {
        self.local_delay().is_some()
    }

    pub fn is_limited(&self) -> bool {
        self.shared.global.is_limited() || self.is_locally_limited()
    }

    /// Nothing queued and no active limit; safe to sweep
    pub fn is_inactive(&self) -> bool {
        self.gate.is_empty() && !self.is_limited()
    }

    fn local_delay(&self) -> Option<Duration> {
        let state = self.state.lock();
        if state.remaining > 0 {
            return None;
        }
        let reset_at = state.reset_at?;
        let delay = reset_at.saturating_duration_since(Instant::now());
        (!delay.is_zero()).then_some(delay)
    }

    pub(crate) fn take_route_keys(&self) -> HashSet<String> {
        std::mem::take(&mut self.state.lock().route_keys)
    }

    /// Hold a place in this bucket's queue; keeps the dispatcher from
    /// being swept until the reservation is admitted and released
    pub(crate) fn reserve(&self) -> GateReservation {
        self.gate.reserve()
    }

    /// Execute one request once every earlier reservation has finished
    pub(crate) async fn push(
        &self,
        reservation: GateReservation,
        request: PreparedRequest,
    ) -> RestResult<RestResponse> {
        let _ticket = reservation.admit().await;

        self.state.lock().route_keys.insert(request.route_key.clone());

        self.shared.global.wait().await;

        if let Some(delay) = self.local_delay() {
            tracing::debug!(
                bucket = %self.id,
                wait_ms = delay.as_millis() as u64,
                "Bucket exhausted, waiting for reset"
            );
            sleep(delay).await;
        }

        self.execute(&request).await
    }

    async fn execute(&self, request: &PreparedRequest) -> RestResult<RestResponse> {
        let mut attempts = 0u32;
        let mut retries = 0u32;

        loop {
            attempts += 1;

            let response = match request.build(&self.shared.http)?.send().await {
                Ok(response) => response,
                Err(err) => {
                    if self.should_retry(request, classify_error(&err), &mut retries) {
                        self.retry_pause().await;
                        continue;
                    }
                    return Err(transport_error(request, attempts, err));
                }
            };

            let status = response.status();
            let headers = response.headers().clone();
            let limits = RateLimitHeaders::from_headers(&headers);
            self.update_limits(request, &limits);

            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after = rate_limit_delay(limits.retry_after, self.local_delay());
                tracing::warn!(
                    bucket = %self.id,
                    method = %request.method,
                    route = %request.route.bucket_route,
                    global = limits.global,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "Rate limited, retrying after delay"
                );
                sleep(retry_after).await;
                self.shared.global.wait().await;
                continue;
            }

            if !status.is_success() && self.should_retry(request, classify_status(status), &mut retries) {
                self.retry_pause().await;
                continue;
            }

            let body = match response.bytes().await {
                Ok(body) => body,
                Err(err) => {
                    if self.should_retry(request, classify_error(&err), &mut retries) {
                        self.retry_pause().await;
                        continue;
                    }
                    return Err(transport_error(request, attempts, err));
                }
            };

            if status.is_success() {
                tracing::trace!(
                    bucket = %self.id,
                    method = %request.method,
                    status = status.as_u16(),
                    "Request completed"
                );
                return parse_body(&headers, body);
            }

            return Err(RestError::Api {
                status: status.as_u16(),
                method: request.method,
                path: request.route.endpoint.clone(),
                body: parse_error_body(&headers, &body),
            });
        }
    }

    /// Consume one unit of retry budget when the failure is transient
    fn should_retry(
        &self,
        request: &PreparedRequest,
        reason: Option<RetryReason>,
        retries: &mut u32,
    ) -> bool {
        let Some(reason) = reason else {
            return false;
        };
        if *retries >= self.shared.config.retry_limit {
            return false;
        }
        *retries += 1;
        tracing::warn!(
            bucket = %self.id,
            method = %request.method,
            path = %request.route.endpoint,
            reason = reason.as_str(),
            retry = *retries,
            limit = self.shared.config.retry_limit,
            "Transient failure, retrying"
        );
        true
    }

    async fn retry_pause(&self) {
        let delay = self.shared.config.retry_delay();
        if !delay.is_zero() {
            sleep(delay).await;
        }
    }

    fn update_limits(&self, request: &PreparedRequest, limits: &RateLimitHeaders) {
        let now = Instant::now();
        let offset_ms = self.shared.config.time_offset_ms;

        {
            let mut state = self.state.lock();
            state.remaining = limits.remaining.unwrap_or(1).max(0);
            state.reset_at = Some(match limits.reset_after {
                Some(reset_after) => now + with_offset(reset_after, offset_ms),
                None => now,
            });
        }

        if let Some(hash) = &limits.bucket {
            if *hash != self.hash {
                let previous = self
                    .shared
                    .hashes
                    .insert(request.route_key.clone(), hash.clone());
                if previous.as_deref() != Some(hash.as_str()) {
                    tracing::debug!(
                        route = %request.route_key,
                        from = %self.hash,
                        to = %hash,
                        "Bucket hash remapped"
                    );
                }
            }
        }

        if limits.global {
            let retry_after =
                with_offset(limits.retry_after.unwrap_or(RATE_LIMIT_FALLBACK), offset_ms);
            self.shared.global.pause_for(retry_after);
            tracing::warn!(
                bucket = %self.id,
                pause_ms = retry_after.as_millis() as u64,
                "Globally rate limited"
            );
        }
    }
}

impl std::fmt::Debug for RestDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestDispatcher")
            .field("id", &self.id)
            .field("remaining", &self.remaining())
            .field("queued", &self.queued())
            .finish()
    }
}

fn transport_error(request: &PreparedRequest, attempts: u32, source: reqwest::Error) -> RestError {
    RestError::Transport {
        method: request.method,
        path: request.route.endpoint.clone(),
        attempts,
        source,
    }
}

/// How long to back off after a 429: the server's `retry-after`, else the
/// bucket's reset window, else [`RATE_LIMIT_FALLBACK`]
pub(crate) fn rate_limit_delay(retry_after: Option<Duration>, local: Option<Duration>) -> Duration {
    retry_after.or(local).unwrap_or(RATE_LIMIT_FALLBACK)
}

/// Apply the configured signed offset to a server-declared duration
pub(crate) fn with_offset(duration: Duration, offset_ms: i64) -> Duration {
    let offset = Duration::from_millis(offset_ms.unsigned_abs());
    if offset_ms >= 0 {
        duration + offset
    } else {
        duration.saturating_sub(offset)
    }
}
