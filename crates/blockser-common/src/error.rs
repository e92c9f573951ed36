//! Error types for blockser
//!
//! This module defines the common error types shared by the workspace
//! crates. Write-path invariant violations live in
//! `blockser_serializer::SerializerError`; wire framing errors live in
//! `blockser_wire::WireError`.

use thiserror::Error;

/// Common result type for blockser operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for blockser
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("block not found: {block_id}")]
    BlockNotFound { block_id: u64 },

    #[error(
        "checksum mismatch for block at offset {offset}: expected {expected:#010x}, got {actual:#010x}"
    )]
    ChecksumMismatch {
        offset: u64,
        expected: u32,
        actual: u32,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Check if this is a not found error
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::BlockNotFound { .. })
    }

    /// Check if this error indicates corrupted data
    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        matches!(self, Self::ChecksumMismatch { .. })
    }
}
