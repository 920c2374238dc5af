//! Bucket routing, global gate, and dispatcher pool

use cord_common::{RestConfig, Token};
use dashmap::DashMap;
use parking_lot::RwLock;
use reqwest::header::HeaderValue;
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::dispatcher::RestDispatcher;
use crate::error::{RestError, RestResult};
use crate::global::GlobalRateLimit;
use crate::request::{PreparedRequest, RequestOptions};
use crate::response::RestResponse;
use crate::route::{Method, RouteDescriptor};

/// State shared by the router and all of its dispatchers
pub(crate) struct RouterShared {
    pub http: reqwest::Client,
    pub config: RestConfig,
    /// Versioned base URL with a trailing slash, ready for `join`
    pub base_url: Url,
    pub user_agent: HeaderValue,
    pub token: RwLock<Option<Token>>,
    pub global: GlobalRateLimit,
    /// `"{method}:{bucket route}"` -> server-issued bucket hash
    pub hashes: DashMap<String, String>,
}

struct RouterInner {
    shared: Arc<RouterShared>,
    /// `"{major parameter}:{bucket hash}"` -> dispatcher
    handlers: DashMap<String, Arc<RestDispatcher>>,
    shutdown: CancellationToken,
}

impl RouterInner {
    fn sweep(&self) -> usize {
        let mut swept = 0;
        self.handlers.retain(|_, dispatcher| {
            if !dispatcher.is_inactive() {
                return true;
            }
            for key in dispatcher.take_route_keys() {
                self.shared.hashes.remove(&key);
            }
            swept += 1;
            false
        });
        swept
    }
}

impl Drop for RouterInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Entry point of the REST engine. Cheap to clone.
#[derive(Clone)]
pub struct RestRouter {
    inner: Arc<RouterInner>,
}

impl RestRouter {
    /// Build the router and, inside a tokio runtime, start the idle sweeper
    pub fn new(config: RestConfig) -> RestResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(RestError::Client)?;

        let base_url = Url::parse(&format!("{}/", config.base_url()))
            .map_err(|e| RestError::InvalidRoute(format!("{}: {e}", config.base_url())))?;

        let user_agent = HeaderValue::from_str(&config.user_agent)
            .map_err(|e| RestError::InvalidRequest(format!("user agent: {e}")))?;

        let router = Self {
            inner: Arc::new(RouterInner {
                shared: Arc::new(RouterShared {
                    http,
                    config,
                    base_url,
                    user_agent,
                    token: RwLock::new(None),
                    global: GlobalRateLimit::new(),
                    hashes: DashMap::new(),
                }),
                handlers: DashMap::new(),
                shutdown: CancellationToken::new(),
            }),
        };

        router.spawn_sweeper();
        Ok(router)
    }

    pub fn with_token(self, token: Token) -> Self {
        self.set_token(Some(token));
        self
    }

    pub fn set_token(&self, token: Option<Token>) {
        *self.inner.shared.token.write() = token;
    }

    pub fn token(&self) -> Option<Token> {
        self.inner.shared.token.read().clone()
    }

    pub fn config(&self) -> &RestConfig {
        &self.inner.shared.config
    }

    /// Resolve a route template for `method`.
    ///
    /// Single-message deletes of messages older than two weeks get their
    /// own bucket route.
    pub fn resolve_route(
        &self,
        method: Method,
        template: &str,
        params: &[&str],
    ) -> RestResult<RouteDescriptor> {
        let route = RouteDescriptor::resolve(template, params)?;
        Ok(with_method_bucket(route, method))
    }

    /// Send a request for an already-substituted path
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> RestResult<RestResponse> {
        let route = with_method_bucket(RouteDescriptor::from_path(path), method);
        self.dispatch(method, route, options).await
    }

    /// Resolve `template` with `params` and send the request
    pub async fn request_route(
        &self,
        method: Method,
        template: &str,
        params: &[&str],
        options: RequestOptions,
    ) -> RestResult<RestResponse> {
        let route = self.resolve_route(method, template, params)?;
        self.dispatch(method, route, options).await
    }

    pub async fn get(&self, path: &str, options: RequestOptions) -> RestResult<RestResponse> {
        self.request(Method::Get, path, options).await
    }

    pub async fn post(&self, path: &str, options: RequestOptions) -> RestResult<RestResponse> {
        self.request(Method::Post, path, options).await
    }

    pub async fn put(&self, path: &str, options: RequestOptions) -> RestResult<RestResponse> {
        self.request(Method::Put, path, options).await
    }

    pub async fn patch(&self, path: &str, options: RequestOptions) -> RestResult<RestResponse> {
        self.request(Method::Patch, path, options).await
    }

    pub async fn delete(&self, path: &str, options: RequestOptions) -> RestResult<RestResponse> {
        self.request(Method::Delete, path, options).await
    }

    /// Route a resolved request to its bucket's dispatcher.
    ///
    /// Fails with `TokenMissing` before any I/O when authorization is
    /// required and no token is set.
    pub async fn dispatch(
        &self,
        method: Method,
        route: RouteDescriptor,
        options: RequestOptions,
    ) -> RestResult<RestResponse> {
        let shared = &self.inner.shared;

        let authorization = if options.auth {
            let token = self
                .token()
                .filter(|token| !token.is_empty())
                .ok_or(RestError::TokenMissing)?;
            let mut value = HeaderValue::from_str(&token.authorization())
                .map_err(|e| RestError::InvalidRequest(format!("authorization: {e}")))?;
            value.set_sensitive(true);
            Some(value)
        } else {
            None
        };

        let url = shared
            .base_url
            .join(&route.endpoint)
            .map_err(|e| RestError::InvalidRoute(format!("{}: {e}", route.endpoint)))?;

        let route_key = format!("{method}:{}", route.bucket_route);
        let hash = shared
            .hashes
            .get(&route_key)
            .map(|hash| hash.value().clone())
            .unwrap_or_else(|| format!("{method}-{}", route.bucket_route));
        let handler_id = format!("{}:{hash}", route.major_parameter);

        // Reserved under the shard lock the sweeper's `retain` also takes,
        // so a dispatcher is never swept between lookup and queueing
        let (dispatcher, reservation) = {
            let entry = self
                .inner
                .handlers
                .entry(handler_id.clone())
                .or_insert_with(|| {
                    tracing::debug!(bucket = %handler_id, "Creating dispatcher");
                    Arc::new(RestDispatcher::new(
                        handler_id.clone(),
                        hash.clone(),
                        Arc::clone(shared),
                    ))
                });
            let reservation = entry.value().reserve();
            (Arc::clone(entry.value()), reservation)
        };

        let request = PreparedRequest {
            method,
            url,
            route: Arc::new(route),
            route_key,
            authorization,
            user_agent: shared.user_agent.clone(),
            options: Arc::new(options),
        };

        dispatcher.push(reservation, request).await
    }

    /// Remove idle dispatchers and the hash mappings they learned
    pub fn sweep(&self) -> usize {
        self.inner.sweep()
    }

    pub fn dispatcher_count(&self) -> usize {
        self.inner.handlers.len()
    }

    pub fn dispatcher(&self, id: &str) -> Option<Arc<RestDispatcher>> {
        self.inner.handlers.get(id).map(|d| Arc::clone(d.value()))
    }

    /// Server-issued hash learned for `method` + `bucket_route`
    pub fn bucket_hash(&self, method: Method, bucket_route: &str) -> Option<String> {
        self.inner
            .shared
            .hashes
            .get(&format!("{method}:{bucket_route}"))
            .map(|hash| hash.value().clone())
    }

    pub fn is_globally_limited(&self) -> bool {
        self.inner.shared.global.is_limited()
    }

    /// Stop the sweeper. In-flight requests complete normally. Idempotent.
    pub fn destroy(&self) {
        if !self.inner.shutdown.is_cancelled() {
            tracing::debug!("REST router destroyed");
            self.inner.shutdown.cancel();
        }
    }

    fn spawn_sweeper(&self) {
        let Some(interval) = self.inner.shared.config.sweep_interval() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No tokio runtime, idle bucket sweeping disabled");
            return;
        };

        let weak: Weak<RouterInner> = Arc::downgrade(&self.inner);
        let shutdown = self.inner.shutdown.clone();

        runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(inner) = weak.upgrade() else {
                            break;
                        };
                        let swept = inner.sweep();
                        if swept > 0 {
                            tracing::debug!(swept, remaining = inner.handlers.len(), "Swept idle buckets");
                        }
                    }
                }
            }
        });
    }
}

impl std::fmt::Debug for RestRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestRouter")
            .field("base_url", &self.inner.shared.base_url.as_str())
            .field("dispatchers", &self.inner.handlers.len())
            .field("globally_limited", &self.is_globally_limited())
            .finish()
    }
}

fn with_method_bucket(mut route: RouteDescriptor, method: Method) -> RouteDescriptor {
    route.bucket_route = route.bucket_for(method, chrono::Utc::now().timestamp_millis());
    route
}
