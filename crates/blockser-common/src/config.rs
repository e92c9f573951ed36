//! Configuration types for blockser
//!
//! Plain serde structs with defaults. A full configuration can be loaded
//! from TOML; every section and field is optional.

use crate::error::{Error, Result};
use crate::types::BlockSize;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default maximum query size accepted by the wire codec (64 MiB)
pub const DEFAULT_MAX_QUERY_SIZE: u32 = 64 * 1024 * 1024;

/// Default maximum response payload size emitted by the wire codec
pub const DEFAULT_MAX_RESPONSE_SIZE: u32 = u32::MAX;

/// Root configuration for blockser
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Serializer write path configuration
    pub serializer: SerializerConfig,
    /// Query wire codec configuration
    pub wire: WireConfig,
}

impl Config {
    /// Parse a configuration from a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    /// Reject configurations the write path cannot run with
    pub fn validate(&self) -> Result<()> {
        self.serializer.validate()?;
        self.wire.validate()
    }
}

/// Outstanding request limit attached to an I/O account
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutstandingRequests {
    /// No limit on requests in flight
    #[default]
    Unlimited,
    /// At most this many requests in flight
    Bounded(usize),
}

/// Serializer write path configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerializerConfig {
    /// Block size used for blocks without a per-block override
    pub block_size: BlockSize,
    /// Priority given to I/O accounts created without an explicit one
    pub default_io_priority: i32,
    /// Outstanding request limit for default I/O accounts
    pub outstanding_requests: OutstandingRequests,
}

impl Default for SerializerConfig {
    fn default() -> Self {
        Self {
            block_size: BlockSize::DEFAULT,
            default_io_priority: 100,
            outstanding_requests: OutstandingRequests::Unlimited,
        }
    }
}

impl SerializerConfig {
    fn validate(&self) -> Result<()> {
        if self.block_size.ser_value() == 0 {
            return Err(Error::configuration("serializer.block_size must be non-zero"));
        }
        if self.outstanding_requests == OutstandingRequests::Bounded(0) {
            return Err(Error::configuration(
                "serializer.outstanding_requests must allow at least one request",
            ));
        }
        Ok(())
    }
}

/// Query wire codec configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WireConfig {
    /// Queries with a size at or above this are rejected
    pub max_query_size: u32,
    /// Responses with a payload at or above this are replaced by an error
    pub max_response_size: u32,
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            max_query_size: DEFAULT_MAX_QUERY_SIZE,
            max_response_size: DEFAULT_MAX_RESPONSE_SIZE,
        }
    }
}

impl WireConfig {
    fn validate(&self) -> Result<()> {
        if self.max_query_size == 0 {
            return Err(Error::configuration("wire.max_query_size must be non-zero"));
        }
        if self.max_response_size == 0 {
            return Err(Error::configuration(
                "wire.max_response_size must be non-zero",
            ));
        }
        Ok(())
    }
}
