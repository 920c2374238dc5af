//! Per-request options and their translation into an HTTP request
//!
//! `RequestOptions` is what callers build; `PreparedRequest` is the
//! router's resolved form that can be turned into a fresh
//! `reqwest::RequestBuilder` for every attempt (multipart forms are
//! consumed on send, so retries rebuild them from the stored bytes).

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, USER_AGENT};
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::sync::Arc;
use url::Url;

use crate::error::RestError;
use crate::route::{Method, RouteDescriptor};

pub const AUDIT_LOG_REASON: &str = "x-audit-log-reason";

/// A file uploaded with a multipart request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub data: Bytes,
    pub content_type: Option<String>,
}

impl Attachment {
    pub fn new(filename: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            filename: filename.into(),
            data: data.into(),
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Per-request options
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub query: Vec<(String, String)>,
    /// JSON body, or the `payload_json` part when files are attached
    pub json: Option<Value>,
    pub files: Vec<Attachment>,
    /// Audit log reason, sent percent-encoded
    pub reason: Option<String>,
    pub headers: HeaderMap,
    /// Send the `Authorization` header (default true)
    pub auth: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            query: Vec::new(),
            json: None,
            files: Vec::new(),
            reason: None,
            headers: HeaderMap::new(),
            auth: true,
        }
    }
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.json = Some(body);
        self
    }

    pub fn file(mut self, attachment: Attachment) -> Self {
        self.files.push(attachment);
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn without_auth(mut self) -> Self {
        self.auth = false;
        self
    }
}

/// A request bound to a URL, bucket and credentials
#[derive(Debug, Clone)]
pub(crate) struct PreparedRequest {
    pub method: Method,
    pub url: Url,
    pub route: Arc<RouteDescriptor>,
    /// `"{method}:{bucket route}"`, the key of the router's hash map
    pub route_key: String,
    pub authorization: Option<HeaderValue>,
    pub user_agent: HeaderValue,
    pub options: Arc<RequestOptions>,
}

impl PreparedRequest {
    /// Fresh builder for one attempt
    pub fn build(&self, client: &reqwest::Client) -> Result<reqwest::RequestBuilder, RestError> {
        let mut builder = client
            .request(self.method.into(), self.url.clone())
            .header(USER_AGENT, self.user_agent.clone());

        if !self.options.query.is_empty() {
            builder = builder.query(&self.options.query);
        }
        if let Some(authorization) = &self.authorization {
            builder = builder.header(AUTHORIZATION, authorization.clone());
        }
        if let Some(reason) = &self.options.reason {
            let encoded = urlencoding::encode(reason);
            let value = HeaderValue::from_str(&encoded)
                .map_err(|e| RestError::InvalidRequest(format!("audit log reason: {e}")))?;
            builder = builder.header(AUDIT_LOG_REASON, value);
        }
        if !self.options.headers.is_empty() {
            builder = builder.headers(self.options.headers.clone());
        }

        if !self.options.files.is_empty() {
            builder = builder.multipart(self.multipart()?);
        } else if let Some(json) = &self.options.json {
            builder = builder.json(json);
        }

        Ok(builder)
    }

    fn multipart(&self) -> Result<Form, RestError> {
        let mut form = Form::new();

        for (index, file) in self.options.files.iter().enumerate() {
            let mut part = Part::stream(reqwest::Body::from(file.data.clone()))
                .file_name(file.filename.clone());
            if let Some(content_type) = &file.content_type {
                part = part
                    .mime_str(content_type)
                    .map_err(|e| RestError::InvalidRequest(format!("{}: {e}", file.filename)))?;
            }
            form = form.part(format!("files[{index}]"), part);
        }

        if let Some(json) = &self.options.json {
            let part = Part::text(json.to_string())
                .mime_str("application/json")
                .map_err(|e| RestError::InvalidRequest(e.to_string()))?;
            form = form.part("payload_json", part);
        }

        Ok(form)
    }
}
