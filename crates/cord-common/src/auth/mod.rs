//! Credentials used by both the REST and Gateway engines

mod token;

pub use token::{Token, TokenType, TokenTypeParseError};
