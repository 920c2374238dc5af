//! # cord-rest
//!
//! REST engine: every request is routed to a per-bucket dispatcher that
//! honours the server's rate-limit headers, a shared global pause, and a
//! bounded retry policy for transient failures.

mod dispatcher;
pub mod error;
mod gate;
mod global;
mod headers;
pub mod request;
mod response;
mod retry;
pub mod route;
mod router;
pub mod routes;

pub use dispatcher::RestDispatcher;
pub use error::{RestError, RestResult};
pub use gate::{GateReservation, GateTicket, RateGate};
pub use global::GlobalRateLimit;
pub use headers::RateLimitHeaders;
pub use request::{Attachment, RequestOptions};
pub use response::RestResponse;
pub use retry::RetryReason;
pub use route::{Method, RouteDescriptor};
pub use router::RestRouter;
