//! blockser serializer - block write path
//!
//! This crate implements the write side of a block serializer:
//! - Write requests (update, delete, touch) over shared buffers
//! - One-shot completion barriers bridging engine I/O to async waits
//! - Batch orchestration: issue every block write, wait for all of them,
//!   then commit the index mutations in a single engine call
//! - An in-memory reference engine for tests and embedding

pub mod batch;
pub mod buffer;
pub mod completion;
pub mod context;
mod dispatch;
pub mod engine;
pub mod error;
pub mod mem;
pub mod write;

// Re-exports
pub use batch::{do_writes, serializer_block_write};
pub use buffer::{SerBuffer, SerializerDataPtr};
pub use completion::{CompletionBarrier, CompletionSignal, completion_barrier};
pub use context::ExecutionContext;
pub use engine::{
    BlockToken, BufWriteInfo, CompletionSink, IndexWriteOp, IoAccount, IoCallback, Serializer,
    StandardBlockToken, TokenAction, WriteLaunchedCallback,
};
pub use error::{SerializerError, SerializerResult};
pub use mem::{BlockWriteRecord, CompletionMode, IndexCommitRecord, IndexEntry, MemSerializer};
pub use write::{UpdateWrite, WriteAction, WriteRequest};
