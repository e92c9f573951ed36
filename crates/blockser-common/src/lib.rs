//! blockser common - shared types and utilities
//!
//! This crate provides the identifiers, error definitions and configuration
//! used across the blockser crates.

pub mod config;
pub mod error;
pub mod types;

pub use config::{Config, OutstandingRequests, SerializerConfig, WireConfig};
pub use error::{Error, Result};
pub use types::*;
