//! # cord-core
//!
//! Value types shared by the REST and Gateway engines.
//! This crate has no I/O and no async runtime dependency.

pub mod value_objects;

// Re-export commonly used types at crate root
pub use value_objects::{Intents, Snowflake, SnowflakeParseError};
