//! Error types for the wire codec

use thiserror::Error;

/// Result type alias for wire operations
pub type Result<T> = std::result::Result<T, WireError>;

/// Framing and transport errors
#[derive(Debug, Error)]
pub enum WireError {
    /// Transport failure, including the peer closing the connection
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Query exceeded the size limit; the connection must be closed
    #[error("query size {size} exceeds limit {limit}")]
    QueryTooLarge { size: u32, limit: u32 },

    /// Response could not be encoded
    #[error("response encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

impl WireError {
    /// Check whether the peer went away between frames
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}
