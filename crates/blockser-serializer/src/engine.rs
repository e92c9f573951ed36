//! Storage engine contract
//!
//! The write path drives an external block-storage engine through the
//! [`Serializer`] trait. This module defines that trait together with the
//! values that cross it:
//! - [`BlockToken`]: shared handle to persisted block content
//! - [`BufWriteInfo`]: one block write descriptor
//! - [`IndexWriteOp`]: one pending index mutation
//! - [`IoAccount`]: opaque scheduling account
//! - observer traits for launch and completion events

use crate::buffer::SerBuffer;
use async_trait::async_trait;
use blockser_common::{BlockId, BlockSize, ContextId, OutstandingRequests, Recency};
use std::fmt;
use std::sync::Arc;

/// Physical identity of a block's persisted content
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StandardBlockToken {
    block_id: BlockId,
    offset: u64,
    block_size: BlockSize,
}

impl StandardBlockToken {
    /// Create a token for content written at `offset`
    #[must_use]
    pub const fn new(block_id: BlockId, offset: u64, block_size: BlockSize) -> Self {
        Self {
            block_id,
            offset,
            block_size,
        }
    }

    /// Logical block this content was written for
    #[must_use]
    pub const fn block_id(&self) -> BlockId {
        self.block_id
    }

    /// Offset of the content in the engine's address space
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Size reserved for the content
    #[must_use]
    pub const fn block_size(&self) -> BlockSize {
        self.block_size
    }
}

/// Reference-counted block token, shared by the index and readers
pub type BlockToken = Arc<StandardBlockToken>;

/// Descriptor for a single block write
pub struct BufWriteInfo {
    /// Buffer holding the content; shares storage with the caller's buffer
    pub buf: SerBuffer,
    /// Size of the block as the engine stores it
    pub block_size: BlockSize,
    /// Target block
    pub block_id: BlockId,
}

impl BufWriteInfo {
    /// Create a write descriptor
    #[must_use]
    pub const fn new(buf: SerBuffer, block_size: BlockSize, block_id: BlockId) -> Self {
        Self {
            buf,
            block_size,
            block_id,
        }
    }
}

impl fmt::Debug for BufWriteInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufWriteInfo")
            .field("buf_len", &self.buf.len())
            .field("block_size", &self.block_size)
            .field("block_id", &self.block_id)
            .finish()
    }
}

/// What an index mutation does to the stored token
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenAction {
    /// Replace the stored token
    Set(BlockToken),
    /// Drop the stored token, leaving a tombstone
    Clear,
    /// Keep the stored token
    Unchanged,
}

/// A pending change to the block id -> (token, recency) mapping
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexWriteOp {
    pub block_id: BlockId,
    pub token: TokenAction,
    pub recency: Recency,
}

impl IndexWriteOp {
    /// Create an index mutation
    #[must_use]
    pub const fn new(block_id: BlockId, token: TokenAction, recency: Recency) -> Self {
        Self {
            block_id,
            token,
            recency,
        }
    }
}

/// Scheduling account passed through to the storage engine
///
/// Only affects fairness among concurrent batches, never the ordering the
/// write path guarantees.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IoAccount {
    id: u64,
    priority: i32,
    outstanding: OutstandingRequests,
}

impl IoAccount {
    /// Create an account
    #[must_use]
    pub const fn new(id: u64, priority: i32, outstanding: OutstandingRequests) -> Self {
        Self {
            id,
            priority,
            outstanding,
        }
    }

    /// Engine-assigned account id
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Scheduling priority
    #[must_use]
    pub const fn priority(&self) -> i32 {
        self.priority
    }

    /// Limit on requests in flight for this account
    #[must_use]
    pub const fn outstanding_requests(&self) -> OutstandingRequests {
        self.outstanding
    }
}

/// Observer notified when a block write becomes durable
pub trait IoCallback: Send + Sync {
    fn on_io_complete(&self);
}

/// Observer notified when a block write has claimed its slot
///
/// Fires synchronously at issue time with the new token, before the write
/// is durable.
pub trait WriteLaunchedCallback: Send + Sync {
    fn on_write_launched(&self, token: &BlockToken);
}

/// One-shot sink the engine signals when a `block_writes` call completes
pub trait CompletionSink: Send {
    fn on_io_complete(self: Box<Self>);
}

/// Block storage engine driven by the write path
///
/// Every method must be called from the engine's home context; the write
/// path checks this through [`crate::ExecutionContext`].
#[async_trait]
pub trait Serializer: Send + Sync {
    /// Context this engine instance is pinned to
    fn home_context(&self) -> ContextId;

    /// Default block size of this engine
    fn block_size(&self) -> BlockSize;

    /// Size the engine stores `block_id` with
    fn block_size_for(&self, _block_id: BlockId) -> BlockSize {
        self.block_size()
    }

    /// Allocate a zeroed buffer of the engine's block size
    fn malloc(&self) -> SerBuffer;

    /// Allocate a buffer holding a copy of `source`
    fn clone_buffer(&self, source: &SerBuffer) -> SerBuffer;

    /// Create an I/O account with an explicit outstanding request limit
    ///
    /// Callers on the write path go through
    /// [`crate::ExecutionContext::make_io_account_with_limit`], which checks
    /// context affinity first.
    fn make_io_account_with_limit(&self, priority: i32, limit: OutstandingRequests) -> IoAccount;

    /// Create an I/O account with no outstanding request limit
    fn make_io_account(&self, priority: i32) -> IoAccount {
        self.make_io_account_with_limit(priority, OutstandingRequests::Unlimited)
    }

    /// Start writing blocks; returns one token per descriptor, in order
    ///
    /// `sink` is signaled exactly once, when every write in the call has
    /// completed.
    fn block_writes(
        &self,
        writes: Vec<BufWriteInfo>,
        account: &IoAccount,
        sink: Box<dyn CompletionSink>,
    ) -> Vec<BlockToken>;

    /// Atomically apply index mutations: all become visible or none do
    async fn index_write(
        &self,
        ops: Vec<IndexWriteOp>,
        account: &IoAccount,
    ) -> blockser_common::Result<()>;
}
