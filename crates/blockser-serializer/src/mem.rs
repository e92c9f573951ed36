//! In-memory reference storage engine
//!
//! [`MemSerializer`] implements the [`Serializer`] contract without a disk:
//! - Block content is kept by offset, sharing the caller's buffer storage,
//!   with a CRC32C per write for read verification
//! - The index is a `BTreeMap` updated under a single lock per
//!   `index_write`, so a commit is visible all at once
//! - Completion delivery is selectable ([`CompletionMode`]) so tests can
//!   hold writes in flight
//!
//! The engine refuses to commit an index mutation whose token refers to a
//! block write that has not completed yet.

use crate::buffer::SerBuffer;
use crate::engine::{
    BlockToken, BufWriteInfo, CompletionSink, IndexWriteOp, IoAccount, Serializer,
    StandardBlockToken, TokenAction,
};
use async_trait::async_trait;
use blockser_common::{
    BlockId, BlockSize, ContextId, Error, OutstandingRequests, Recency, Result, SerializerConfig,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, trace};

/// How block write completions are delivered
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CompletionMode {
    /// Signal inside `block_writes`, before it returns
    ///
    /// The write is complete before its token is handed back, so a request's
    /// completion observer runs before its launch observer. Use `Spawned` or
    /// `Manual` to see launch before completion.
    #[default]
    Immediate,
    /// Signal from a spawned tokio task
    Spawned,
    /// Hold completions until `complete_next` / `complete_pending`
    Manual,
}

/// Current index state of one block
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    /// Token of the live content; `None` for tombstones and touched-only blocks
    pub token: Option<BlockToken>,
    /// Recency of the entry
    pub recency: Recency,
}

/// Record of one block write issued to the engine
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockWriteRecord {
    pub block_id: BlockId,
    pub offset: u64,
    pub account_id: u64,
}

/// Record of one committed index write
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexCommitRecord {
    pub account_id: u64,
    pub ops: Vec<IndexWriteOp>,
}

struct StoredBlock {
    data: SerBuffer,
    crc: u32,
}

#[derive(Default)]
struct MemState {
    next_offset: u64,
    blocks: HashMap<u64, StoredBlock>,
    completed: HashSet<u64>,
    index: BTreeMap<BlockId, IndexEntry>,
    block_sizes: HashMap<BlockId, BlockSize>,
    writes: Vec<BlockWriteRecord>,
    commits: Vec<IndexCommitRecord>,
}

/// Completion of one `block_writes` call, waiting to be delivered
struct PendingCompletion {
    state: Arc<Mutex<MemState>>,
    offsets: Vec<u64>,
    sink: Box<dyn CompletionSink>,
}

impl PendingCompletion {
    fn fire(self) {
        self.state.lock().completed.extend(self.offsets.iter().copied());
        // Lock released: the sink may run observers that call back in.
        self.sink.on_io_complete();
    }
}

/// In-memory storage engine pinned to one execution context
pub struct MemSerializer {
    home: ContextId,
    block_size: BlockSize,
    default_priority: i32,
    default_outstanding: OutstandingRequests,
    completion_mode: CompletionMode,
    next_account_id: AtomicU64,
    state: Arc<Mutex<MemState>>,
    pending: Mutex<VecDeque<PendingCompletion>>,
}

impl MemSerializer {
    /// Create an engine pinned to `home`
    #[must_use]
    pub fn new(home: ContextId, config: &SerializerConfig) -> Self {
        Self {
            home,
            block_size: config.block_size,
            default_priority: config.default_io_priority,
            default_outstanding: config.outstanding_requests,
            completion_mode: CompletionMode::default(),
            next_account_id: AtomicU64::new(1),
            state: Arc::new(Mutex::new(MemState::default())),
            pending: Mutex::new(VecDeque::new()),
        }
    }

    /// Select how completions are delivered
    #[must_use]
    pub const fn with_completion_mode(mut self, mode: CompletionMode) -> Self {
        self.completion_mode = mode;
        self
    }

    /// Completion delivery mode
    #[must_use]
    pub const fn completion_mode(&self) -> CompletionMode {
        self.completion_mode
    }

    /// I/O account with the configured default priority and limit
    #[must_use]
    pub fn default_io_account(&self) -> IoAccount {
        self.make_io_account_with_limit(self.default_priority, self.default_outstanding)
    }

    /// Store `block_id` with a size other than the default
    pub fn set_block_size(&self, block_id: BlockId, size: BlockSize) {
        self.state.lock().block_sizes.insert(block_id, size);
    }

    /// Current index entry for a block
    #[must_use]
    pub fn index_read(&self, block_id: BlockId) -> Option<IndexEntry> {
        self.state.lock().index.get(&block_id).cloned()
    }

    /// Read back the content a token refers to
    pub fn block_read(&self, token: &BlockToken) -> Result<SerBuffer> {
        let state = self.state.lock();
        let stored = state
            .blocks
            .get(&token.offset())
            .ok_or(Error::BlockNotFound {
                block_id: token.block_id().get(),
            })?;

        let actual = crc32c::crc32c(stored.data.as_slice());
        if actual != stored.crc {
            error!(offset = token.offset(), "stored block failed checksum");
            return Err(Error::ChecksumMismatch {
                offset: token.offset(),
                expected: stored.crc,
                actual,
            });
        }
        Ok(stored.data.share())
    }

    /// Block writes issued so far, in issue order
    #[must_use]
    pub fn block_write_log(&self) -> Vec<BlockWriteRecord> {
        self.state.lock().writes.clone()
    }

    /// Index writes committed so far, in commit order
    #[must_use]
    pub fn index_commits(&self) -> Vec<IndexCommitRecord> {
        self.state.lock().commits.clone()
    }

    /// Number of `block_writes` calls whose completion is being held
    #[must_use]
    pub fn pending_completions(&self) -> usize {
        self.pending.lock().len()
    }

    /// Deliver the oldest held completion; returns false if none is held
    pub fn complete_next(&self) -> bool {
        let Some(next) = self.pending.lock().pop_front() else {
            return false;
        };
        next.fire();
        true
    }

    /// Deliver every held completion; returns how many were delivered
    pub fn complete_pending(&self) -> usize {
        let drained: Vec<_> = self.pending.lock().drain(..).collect();
        let count = drained.len();
        for completion in drained {
            completion.fire();
        }
        count
    }

    fn deliver(&self, completion: PendingCompletion) {
        match self.completion_mode {
            CompletionMode::Immediate => completion.fire(),
            CompletionMode::Spawned => {
                tokio::spawn(async move {
                    tokio::task::yield_now().await;
                    completion.fire();
                });
            }
            CompletionMode::Manual => self.pending.lock().push_back(completion),
        }
    }
}

#[async_trait]
impl Serializer for MemSerializer {
    fn home_context(&self) -> ContextId {
        self.home
    }

    fn block_size(&self) -> BlockSize {
        self.block_size
    }

    fn block_size_for(&self, block_id: BlockId) -> BlockSize {
        self.state
            .lock()
            .block_sizes
            .get(&block_id)
            .copied()
            .unwrap_or(self.block_size)
    }

    fn malloc(&self) -> SerBuffer {
        SerBuffer::zeroed(self.block_size.as_usize())
    }

    fn clone_buffer(&self, source: &SerBuffer) -> SerBuffer {
        SerBuffer::from_vec(source.as_slice().to_vec())
    }

    fn make_io_account_with_limit(&self, priority: i32, limit: OutstandingRequests) -> IoAccount {
        let id = self.next_account_id.fetch_add(1, Ordering::Relaxed);
        IoAccount::new(id, priority, limit)
    }

    fn block_writes(
        &self,
        writes: Vec<BufWriteInfo>,
        account: &IoAccount,
        sink: Box<dyn CompletionSink>,
    ) -> Vec<BlockToken> {
        let mut tokens = Vec::with_capacity(writes.len());
        let mut offsets = Vec::with_capacity(writes.len());
        {
            let mut state = self.state.lock();
            for write in writes {
                let offset = state.next_offset;
                state.next_offset += u64::from(write.block_size.ser_value());

                let crc = crc32c::crc32c(write.buf.as_slice());
                state.blocks.insert(
                    offset,
                    StoredBlock {
                        data: write.buf,
                        crc,
                    },
                );
                state.writes.push(BlockWriteRecord {
                    block_id: write.block_id,
                    offset,
                    account_id: account.id(),
                });
                trace!(block_id = %write.block_id, offset, "block write issued");

                offsets.push(offset);
                tokens.push(Arc::new(StandardBlockToken::new(
                    write.block_id,
                    offset,
                    write.block_size,
                )));
            }
        }

        self.deliver(PendingCompletion {
            state: Arc::clone(&self.state),
            offsets,
            sink,
        });
        tokens
    }

    async fn index_write(&self, ops: Vec<IndexWriteOp>, account: &IoAccount) -> Result<()> {
        let mut state = self.state.lock();

        // Validate the whole batch first so a rejected commit changes nothing
        for op in &ops {
            if let TokenAction::Set(token) = &op.token
                && !state.completed.contains(&token.offset())
            {
                error!(
                    block_id = %op.block_id,
                    offset = token.offset(),
                    "index write references an incomplete block write"
                );
                return Err(Error::internal(format!(
                    "index write for block {} references incomplete write at offset {}",
                    op.block_id,
                    token.offset()
                )));
            }
        }

        for op in &ops {
            let entry = state.index.entry(op.block_id).or_insert(IndexEntry {
                token: None,
                recency: Recency::DISTANT_PAST,
            });
            match &op.token {
                TokenAction::Set(token) => entry.token = Some(Arc::clone(token)),
                TokenAction::Clear => entry.token = None,
                TokenAction::Unchanged => {}
            }
            entry.recency = op.recency;
        }

        debug!(ops = ops.len(), account = account.id(), "index write committed");
        state.commits.push(IndexCommitRecord {
            account_id: account.id(),
            ops,
        });
        Ok(())
    }
}
