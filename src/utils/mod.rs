//! Shared utilities: error taxonomy, logging setup and thread helpers

pub mod error;
pub mod logging;
pub mod threads;

pub use error::{ErrorResponse, RecorderError, RecorderResult};
