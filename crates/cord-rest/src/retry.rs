//! Classification of transient failures
//!
//! 429 is deliberately absent: rate-limit waits are handled by the
//! dispatcher and never consume the retry budget.

use reqwest::StatusCode;
use std::error::Error as StdError;
use std::io;

/// Why a request is retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    Timeout,
    Connect,
    ServerError,
    RequestTimeout,
}

impl RetryReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connect => "connect",
            Self::ServerError => "server_error",
            Self::RequestTimeout => "request_timeout",
        }
    }
}

/// Statuses retried up to the retry limit: 408 plus gateway/edge 5xx
pub fn classify_status(status: StatusCode) -> Option<RetryReason> {
    match status.as_u16() {
        408 => Some(RetryReason::RequestTimeout),
        500 | 502 | 503 | 504 | 521 | 522 | 524 => Some(RetryReason::ServerError),
        _ => None,
    }
}

/// Transport errors retried up to the retry limit
pub fn classify_error(err: &reqwest::Error) -> Option<RetryReason> {
    if err.is_timeout() {
        return Some(RetryReason::Timeout);
    }
    if err.is_connect() {
        return Some(RetryReason::Connect);
    }

    // Resets and broken pipes surface as io errors deep in the source chain
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            return classify_io(io_err.kind());
        }
        source = cause.source();
    }
    None
}

fn classify_io(kind: io::ErrorKind) -> Option<RetryReason> {
    match kind {
        io::ErrorKind::TimedOut => Some(RetryReason::Timeout),
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::AddrInUse
        | io::ErrorKind::AddrNotAvailable
        | io::ErrorKind::UnexpectedEof => Some(RetryReason::Connect),
        _ => None,
    }
}
