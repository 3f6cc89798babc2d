//! Common types and utilities shared across relcore.
//!
//! This module contains fundamental primitives used throughout the codebase:
//! - Configuration constants and index sizing
//! - Error types
//! - Stream identifiers

pub mod config;
pub mod error;
mod stream_id;

pub use config::{EngineConfig, IndexConfig};
pub use error::{Error, Result};
pub use stream_id::StreamId;
