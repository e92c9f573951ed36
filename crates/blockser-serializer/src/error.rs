//! Serializer write path error types

use blockser_common::{BlockId, ContextId};
use thiserror::Error;

/// Serializer write path error
///
/// Every variant except [`SerializerError::Engine`] is an invariant
/// violation: a caller or storage engine broke its contract. These are
/// never retried; the operation that hit one is abandoned before any index
/// mutation is committed.
#[derive(Error, Debug)]
pub enum SerializerError {
    /// Buffer handle already holds a buffer
    #[error("buffer handle already holds a buffer")]
    BufferAlreadyHeld,

    /// Buffer handle holds nothing
    #[error("buffer handle holds no buffer")]
    BufferNotHeld,

    /// Entry point invoked from a context other than the engine's home
    #[error("serializer bound to {expected} invoked from {actual}")]
    WrongContext {
        expected: ContextId,
        actual: ContextId,
    },

    /// Storage engine returned the wrong number of block tokens
    #[error("block write for {block_id} returned {actual} tokens, expected {expected}")]
    TokenCountMismatch {
        block_id: BlockId,
        expected: usize,
        actual: usize,
    },

    /// Completion sink was dropped without signaling
    #[error("completion for block write was dropped before it signaled")]
    CompletionDropped,

    /// Failure reported by the storage engine itself
    #[error("storage engine error: {0}")]
    Engine(#[from] blockser_common::Error),
}

impl SerializerError {
    /// Check if this error is a contract breach rather than an engine failure
    #[must_use]
    pub const fn is_invariant_violation(&self) -> bool {
        !matches!(self, Self::Engine(_))
    }
}

/// Result type for serializer operations
pub type SerializerResult<T> = Result<T, SerializerError>;
