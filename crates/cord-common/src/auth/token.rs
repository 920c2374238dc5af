//! Authentication token handling
//!
//! The REST engine sends `Authorization: <type> <secret>`; the gateway
//! Identify/Resume payloads carry the bare secret.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Token type enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TokenType {
    #[default]
    Bot,
    Bearer,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bot => "Bot",
            Self::Bearer => "Bearer",
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error when parsing a token type from string
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown token type: {0}")]
pub struct TokenTypeParseError(pub String);

impl FromStr for TokenType {
    type Err = TokenTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bot" => Ok(Self::Bot),
            "bearer" => Ok(Self::Bearer),
            _ => Err(TokenTypeParseError(s.to_string())),
        }
    }
}

/// Credentials for one client
///
/// `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    kind: TokenType,
    secret: String,
}

impl Token {
    pub fn new(kind: TokenType, secret: impl Into<String>) -> Self {
        Self {
            kind,
            secret: secret.into().trim().to_string(),
        }
    }

    pub fn bot(secret: impl Into<String>) -> Self {
        Self::new(TokenType::Bot, secret)
    }

    pub fn bearer(secret: impl Into<String>) -> Self {
        Self::new(TokenType::Bearer, secret)
    }

    pub fn kind(&self) -> TokenType {
        self.kind
    }

    /// Bare secret, as sent in gateway Identify/Resume
    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn is_empty(&self) -> bool {
        self.secret.is_empty()
    }

    /// Value for the `Authorization` header
    pub fn authorization(&self) -> String {
        format!("{} {}", self.kind, self.secret)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("kind", &self.kind)
            .field("secret", &"[redacted]")
            .finish()
    }
}
