//! Integration test utilities for cord
//!
//! Mock REST and gateway servers built on axum, bound to local ports, plus
//! fixture payloads.

pub mod fixtures;
pub mod mock_gateway;

pub use fixtures::*;
pub use helpers::*;
pub use mock_gateway::{MockConnection, MockGateway};
