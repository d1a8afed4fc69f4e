//! Core types for pingfetch
//!
//! Request identity, request options and the crate-wide error type shared by
//! the cache, the batch scheduler and the façade.

pub mod error;
pub mod key;
pub mod options;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use error::{ErrorContext, FetchError, FetchResult};
pub use key::RequestKey;
pub use options::FetchOptions;
