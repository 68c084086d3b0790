pub mod config;
pub mod detect;
pub mod error;
pub mod explain;
pub mod model;
pub mod pipeline;
pub mod preprocessing;
pub mod server;
pub mod storage;

#[cfg(test)]
mod integration_tests;
#[cfg(test)]
mod observability_tests;

// Re-export common types
pub use error::InferenceError;
