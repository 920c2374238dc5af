//! Error payloads returned by the remote API

mod api_error;

pub use api_error::ApiErrorBody;
