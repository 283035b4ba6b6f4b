//! Core types for the price feed engine
//!
//! This crate provides shared types used across all components:
//! - Rate observations and source feeds
//! - Aggregates, target prices and feed decisions
//! - Feed configuration with per-asset resolution
//! - Error types

pub mod types;
pub mod decisions;
pub mod config;
pub mod errors;

pub use types::*;
pub use decisions::*;
pub use config::*;
pub use errors::*;
