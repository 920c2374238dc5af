//! Route descriptors
//!
//! A route is resolved once into the literal endpoint that goes on the
//! wire and the bucket route used to key rate-limit state. In the bucket
//! route only the major parameter stays literal:
//!
//! ```text
//! channels/81384788765712384/messages/175928847299117063
//!   endpoint      channels/81384788765712384/messages/175928847299117063
//!   bucket route  channels/81384788765712384/messages/:id
//!   major         81384788765712384
//! ```

use cord_core::Snowflake;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::RestError;

/// Messages older than this are deleted through a separate bucket
pub const OLD_MESSAGE_AGE: Duration = Duration::from_secs(60 * 60 * 24 * 14);

/// Major parameter used by routes without a channel, guild or webhook
pub const GLOBAL_MAJOR: &str = "global";

/// HTTP methods supported by the API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// A resolved route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDescriptor {
    /// Literal path relative to the versioned base URL
    pub endpoint: String,
    /// Rate-limit skeleton of the path
    pub bucket_route: String,
    /// Channel/guild id, webhook id + token, or `global`
    pub major_parameter: String,
    /// Present for `channels/{id}/messages/{id}` routes
    pub message_id: Option<Snowflake>,
}

impl RouteDescriptor {
    /// Substitute `{name}` placeholders in `template` positionally.
    ///
    /// ```
    /// use cord_rest::RouteDescriptor;
    ///
    /// let route = RouteDescriptor::resolve(
    ///     "channels/{channel_id}/messages/{message_id}",
    ///     &["81384788765712384", "175928847299117063"],
    /// )
    /// .unwrap();
    /// assert_eq!(route.bucket_route, "channels/81384788765712384/messages/:id");
    /// ```
    pub fn resolve(template: &str, params: &[&str]) -> Result<Self, RestError> {
        let mut endpoint = String::with_capacity(template.len() + params.len() * 20);
        let mut values = params.iter();
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            let close = rest[open..]
                .find('}')
                .map(|offset| open + offset)
                .ok_or_else(|| RestError::InvalidRoute(format!("unclosed placeholder in {template}")))?;

            let value = values.next().ok_or_else(|| {
                RestError::InvalidRoute(format!(
                    "{template} expects more than {} parameter(s)",
                    params.len()
                ))
            })?;
            if value.is_empty() || value.contains('/') || value.contains('?') {
                return Err(RestError::InvalidRoute(format!(
                    "invalid value {value:?} for {}",
                    &rest[open..=close]
                )));
            }

            endpoint.push_str(&rest[..open]);
            endpoint.push_str(value);
            rest = &rest[close + 1..];
        }
        endpoint.push_str(rest);

        if values.next().is_some() {
            return Err(RestError::InvalidRoute(format!(
                "{template} takes fewer than {} parameter(s)",
                params.len()
            )));
        }

        Ok(Self::from_path(&endpoint))
    }

    /// Describe an already-substituted path
    pub fn from_path(path: &str) -> Self {
        let endpoint = path.trim_matches('/').to_string();
        let segments: Vec<&str> = endpoint.split('/').filter(|s| !s.is_empty()).collect();

        let major_parameter = match segments.as_slice() {
            ["channels" | "guilds", id, ..] => (*id).to_string(),
            ["webhooks", id, token, ..] => format!("{id}{token}"),
            ["webhooks", id] => (*id).to_string(),
            _ => GLOBAL_MAJOR.to_string(),
        };

        let major_prefix = matches!(
            segments.first(),
            Some(&("channels" | "guilds" | "webhooks"))
        );

        let mut bucket = Vec::with_capacity(segments.len());
        for (index, segment) in segments.iter().enumerate() {
            // Reaction sub-routes share the bucket of the reactions route
            if index > 0 && segments[index - 1] == "reactions" {
                break;
            }
            if index == 1 && major_prefix {
                bucket.push(*segment);
            } else if is_snowflake(segment) {
                bucket.push(":id");
            } else {
                bucket.push(*segment);
            }
        }

        let message_id = match segments.as_slice() {
            ["channels", _, "messages", id, ..] => id.parse().ok(),
            _ => None,
        };

        Self {
            bucket_route: bucket.join("/"),
            endpoint,
            major_parameter,
            message_id,
        }
    }

    /// Bucket route for one request, including the old-message variant.
    ///
    /// `now_millis` is Unix time in milliseconds.
    pub fn bucket_for(&self, method: Method, now_millis: i64) -> String {
        if method == Method::Delete && self.is_single_message() {
            if let Some(id) = self.message_id {
                if id.age_at(now_millis) > OLD_MESSAGE_AGE {
                    return format!("{}/:old-message", self.bucket_route);
                }
            }
        }
        self.bucket_route.clone()
    }

    fn is_single_message(&self) -> bool {
        let mut segments = self.endpoint.split('/');
        matches!(
            (
                segments.next(),
                segments.next(),
                segments.next(),
                segments.next(),
                segments.next()
            ),
            (Some("channels"), Some(_), Some("messages"), Some(_), None)
        )
    }
}

fn is_snowflake(segment: &str) -> bool {
    (17..=20).contains(&segment.len()) && segment.bytes().all(|b| b.is_ascii_digit())
}
