//! Batch write orchestration
//!
//! [`do_writes`] commits a batch of write requests in three strictly
//! ordered steps:
//! 1. Issue every request, collecting index mutations and barriers
//! 2. Wait for every barrier
//! 3. Submit all index mutations as one atomic index write
//!
//! The index never references a token whose block write has not
//! completed. If issuing or waiting fails, nothing is committed, but every
//! block write already issued is still waited on before returning.
//!
//! [`serializer_block_write`] is the one-block shortcut for callers that
//! manage the index themselves.

use crate::buffer::SerBuffer;
use crate::completion::{CompletionBarrier, completion_barrier};
use crate::context::ExecutionContext;
use crate::dispatch::{perform_write, single_token};
use crate::engine::{BlockToken, BufWriteInfo, IoAccount, Serializer};
use crate::error::SerializerResult;
use crate::write::WriteRequest;
use blockser_common::BlockId;
use futures::future::join_all;
use tracing::debug;

/// Write a batch of requests and commit their index mutations atomically
pub async fn do_writes<S: Serializer + ?Sized>(
    ctx: &ExecutionContext,
    ser: &S,
    writes: &[WriteRequest],
    account: &IoAccount,
) -> SerializerResult<()> {
    ctx.check(ser)?;

    let mut barriers: Vec<CompletionBarrier> = Vec::with_capacity(writes.len());
    let mut index_write_ops = Vec::with_capacity(writes.len());

    // Step 1: Write buffers and assemble index operations
    let mut issue_error = None;
    for write in writes {
        match perform_write(write, ser, account, &mut barriers) {
            Ok(op) => index_write_ops.push(op),
            Err(e) => {
                issue_error = Some(e);
                break;
            }
        }
    }
    debug!(
        writes = writes.len(),
        block_writes = barriers.len(),
        account = account.id(),
        "issued batch"
    );

    // Step 2: Wait on all block writes, in any order. Writes already issued
    // are waited on even if issuing a later one failed.
    let waited = join_all(barriers.into_iter().map(CompletionBarrier::wait)).await;
    if let Some(e) = issue_error {
        debug!(issued = index_write_ops.len(), "batch aborted after issue failure");
        return Err(e);
    }
    for result in waited {
        result?;
    }

    // Step 3: Commit the index operations
    ser.index_write(index_write_ops, account).await?;
    debug!(writes = writes.len(), "committed batch");
    Ok(())
}

/// Write one block and wait for it, without touching the index
pub async fn serializer_block_write<S: Serializer + ?Sized>(
    ctx: &ExecutionContext,
    ser: &S,
    buf: &SerBuffer,
    block_id: BlockId,
    account: &IoAccount,
) -> SerializerResult<BlockToken> {
    ctx.check(ser)?;

    let (signal, barrier) = completion_barrier(None);
    let info = BufWriteInfo::new(buf.share(), ser.block_size_for(block_id), block_id);
    let tokens = ser.block_writes(vec![info], account, Box::new(signal));
    let token = single_token(tokens, block_id);

    // The write was issued either way; wait for it before reporting
    let waited = barrier.wait().await;
    let token = token?;
    waited?;
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{CompletionSink, IndexWriteOp, IoCallback, StandardBlockToken, TokenAction};
    use crate::error::SerializerError;
    use crate::mem::{CompletionMode, MemSerializer};
    use async_trait::async_trait;
    use blockser_common::{BlockSize, ContextId, OutstandingRequests, Recency, SerializerConfig};
    use parking_lot::Mutex;
    use rand::Rng;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn setup(mode: CompletionMode) -> (ExecutionContext, MemSerializer) {
        init_tracing();
        let ctx = ExecutionContext::new_unique();
        let ser = MemSerializer::new(ctx.id(), &SerializerConfig::default())
            .with_completion_mode(mode);
        (ctx, ser)
    }

    fn filled(byte: u8) -> SerBuffer {
        SerBuffer::from_vec(vec![byte; 4096])
    }

    #[derive(Default)]
    struct CountingObserver {
        calls: AtomicUsize,
    }

    impl IoCallback for CountingObserver {
        fn on_io_complete(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_mixed_batch_scenario() {
        let (ctx, ser) = setup(CompletionMode::Immediate);
        let account = ser.make_io_account(1);
        let buf_a = filled(0xA1);

        let writes = vec![
            WriteRequest::update(BlockId::new(1), Recency::new(5), &buf_a, None, None),
            WriteRequest::delete(BlockId::new(2)),
            WriteRequest::touch(BlockId::new(3), Recency::new(7)),
        ];
        do_writes(&ctx, &ser, &writes, &account).await.unwrap();

        let commits = ser.index_commits();
        assert_eq!(commits.len(), 1);
        let ops = &commits[0].ops;
        assert_eq!(ops.len(), 3);

        let TokenAction::Set(token_a) = &ops[0].token else {
            panic!("expected Set, got {:?}", ops[0].token);
        };
        assert_eq!(
            ops[0],
            IndexWriteOp::new(
                BlockId::new(1),
                TokenAction::Set(token_a.clone()),
                Recency::new(5)
            )
        );
        assert_eq!(
            ops[1],
            IndexWriteOp::new(BlockId::new(2), TokenAction::Clear, Recency::INVALID)
        );
        assert_eq!(
            ops[2],
            IndexWriteOp::new(BlockId::new(3), TokenAction::Unchanged, Recency::new(7))
        );

        let stored = ser.block_read(token_a).unwrap();
        assert_eq!(stored.as_slice(), buf_a.as_slice());
    }

    #[tokio::test]
    async fn test_commit_waits_for_every_barrier() {
        let (ctx, ser) = setup(CompletionMode::Manual);
        let account = ser.make_io_account(1);
        let (a, b) = (filled(1), filled(2));
        let writes = vec![
            WriteRequest::update(BlockId::new(1), Recency::new(1), &a, None, None),
            WriteRequest::touch(BlockId::new(5), Recency::new(2)),
            WriteRequest::update(BlockId::new(2), Recency::new(3), &b, None, None),
        ];

        let batch = do_writes(&ctx, &ser, &writes, &account);
        tokio::pin!(batch);

        assert!(futures::poll!(batch.as_mut()).is_pending());
        assert_eq!(ser.pending_completions(), 2);
        assert!(ser.index_commits().is_empty());

        // One of two writes done: still no commit
        assert!(ser.complete_next());
        assert!(futures::poll!(batch.as_mut()).is_pending());
        assert!(ser.index_commits().is_empty());

        assert!(ser.complete_next());
        batch.await.unwrap();
        assert_eq!(ser.index_commits().len(), 1);
        assert_eq!(ser.pending_completions(), 0);
    }

    #[tokio::test]
    async fn test_batch_preserves_order_and_count() {
        let (ctx, ser) = setup(CompletionMode::Spawned);
        let account = ser.make_io_account(1);
        let mut rng = rand::thread_rng();
        let buffers: Vec<SerBuffer> = (0..32u8).map(filled).collect();

        let writes: Vec<WriteRequest> = buffers
            .iter()
            .enumerate()
            .map(|(i, buf)| {
                let id = BlockId::new(i as u64);
                match rng.gen_range(0..3) {
                    0 => WriteRequest::update(id, Recency::new(i as u64), buf, None, None),
                    1 => WriteRequest::delete(id),
                    _ => WriteRequest::touch(id, Recency::new(i as u64)),
                }
            })
            .collect();

        do_writes(&ctx, &ser, &writes, &account).await.unwrap();

        let commits = ser.index_commits();
        assert_eq!(commits.len(), 1);
        let ops = &commits[0].ops;
        assert_eq!(ops.len(), writes.len());
        for (write, op) in writes.iter().zip(ops) {
            assert_eq!(write.block_id(), op.block_id);
            match &op.token {
                TokenAction::Set(token) => {
                    assert!(write.is_update());
                    assert_eq!(token.block_id(), op.block_id);
                }
                TokenAction::Clear => assert!(op.recency.is_invalid()),
                TokenAction::Unchanged => assert!(!op.recency.is_invalid()),
            }
        }
        let updates = writes.iter().filter(|w| w.is_update()).count();
        assert_eq!(ser.block_write_log().len(), updates);
    }

    #[tokio::test]
    async fn test_completion_observers_run_once_per_update() {
        let (ctx, ser) = setup(CompletionMode::Spawned);
        let account = ser.make_io_account(1);
        let observer = Arc::new(CountingObserver::default());
        let (a, b) = (filled(1), filled(2));

        let writes = vec![
            WriteRequest::update(
                BlockId::new(1),
                Recency::new(1),
                &a,
                Some(observer.clone()),
                None,
            ),
            WriteRequest::update(
                BlockId::new(2),
                Recency::new(1),
                &b,
                Some(observer.clone()),
                None,
            ),
            WriteRequest::delete(BlockId::new(3)),
        ];
        do_writes(&ctx, &ser, &writes, &account).await.unwrap();

        assert_eq!(observer.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_batch_commits_under_same_account() {
        let (ctx, ser) = setup(CompletionMode::Immediate);
        let account = ser.make_io_account_with_limit(4, OutstandingRequests::Bounded(8));
        let buf = filled(3);

        do_writes(
            &ctx,
            &ser,
            &[WriteRequest::update(BlockId::new(1), Recency::new(1), &buf, None, None)],
            &account,
        )
        .await
        .unwrap();

        assert_eq!(ser.block_write_log()[0].account_id, account.id());
        assert_eq!(ser.index_commits()[0].account_id, account.id());
    }

    #[tokio::test]
    async fn test_empty_batch_commits_nothing_but_once() {
        let (ctx, ser) = setup(CompletionMode::Immediate);
        let account = ser.make_io_account(1);

        do_writes(&ctx, &ser, &[], &account).await.unwrap();

        let commits = ser.index_commits();
        assert_eq!(commits.len(), 1);
        assert!(commits[0].ops.is_empty());
    }

    #[tokio::test]
    async fn test_batch_from_foreign_context_is_rejected() {
        let (_ctx, ser) = setup(CompletionMode::Immediate);
        let foreign = ExecutionContext::new_unique();
        let account = ser.make_io_account(1);
        let buf = filled(1);

        let err = do_writes(
            &foreign,
            &ser,
            &[WriteRequest::update(BlockId::new(1), Recency::new(1), &buf, None, None)],
            &account,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, SerializerError::WrongContext { .. }));
        assert!(ser.block_write_log().is_empty());
        assert!(ser.index_commits().is_empty());
    }

    #[tokio::test]
    async fn test_interleaved_batches_on_one_context() {
        let (ctx, ser) = setup(CompletionMode::Manual);
        let account = ser.make_io_account(1);
        let (a, b) = (filled(1), filled(2));
        let first = [WriteRequest::update(BlockId::new(1), Recency::new(1), &a, None, None)];
        let second = [WriteRequest::update(BlockId::new(2), Recency::new(2), &b, None, None)];

        let batch_one = do_writes(&ctx, &ser, &first, &account);
        let batch_two = do_writes(&ctx, &ser, &second, &account);
        tokio::pin!(batch_one, batch_two);

        assert!(futures::poll!(batch_one.as_mut()).is_pending());
        assert!(futures::poll!(batch_two.as_mut()).is_pending());
        assert_eq!(ser.pending_completions(), 2);

        // Completing only the first write releases only the first batch
        assert!(ser.complete_next());
        batch_one.await.unwrap();
        assert_eq!(ser.index_commits().len(), 1);
        assert!(futures::poll!(batch_two.as_mut()).is_pending());

        assert!(ser.complete_next());
        batch_two.await.unwrap();
        assert_eq!(ser.index_commits().len(), 2);
        assert!(ser.index_read(BlockId::new(2)).is_some());
    }

    #[tokio::test]
    async fn test_single_block_write_returns_token_after_completion() {
        let (ctx, ser) = setup(CompletionMode::Manual);
        let account = ser.make_io_account(1);
        let buf = filled(0xB0);

        let write = serializer_block_write(&ctx, &ser, &buf, BlockId::new(9), &account);
        tokio::pin!(write);
        assert!(futures::poll!(write.as_mut()).is_pending());
        assert_eq!(ser.pending_completions(), 1);

        ser.complete_pending();
        let token = write.await.unwrap();

        let log = ser.block_write_log();
        assert_eq!(log.len(), 1);
        assert_eq!(token.block_id(), BlockId::new(9));
        assert_eq!(token.offset(), log[0].offset);
        assert_eq!(ser.block_read(&token).unwrap().as_slice(), buf.as_slice());

        // No index mutation is produced
        assert!(ser.index_commits().is_empty());
        assert!(ser.index_read(BlockId::new(9)).is_none());
    }

    /// Engine that returns a configurable number of tokens per block write
    struct MiscountingSerializer {
        home: ContextId,
        tokens_per_write: usize,
        index_writes: Mutex<usize>,
    }

    #[async_trait]
    impl Serializer for MiscountingSerializer {
        fn home_context(&self) -> ContextId {
            self.home
        }

        fn block_size(&self) -> BlockSize {
            BlockSize::DEFAULT
        }

        fn malloc(&self) -> SerBuffer {
            SerBuffer::zeroed(self.block_size().as_usize())
        }

        fn clone_buffer(&self, source: &SerBuffer) -> SerBuffer {
            SerBuffer::from_vec(source.as_slice().to_vec())
        }

        fn make_io_account_with_limit(
            &self,
            priority: i32,
            limit: OutstandingRequests,
        ) -> IoAccount {
            IoAccount::new(0, priority, limit)
        }

        fn block_writes(
            &self,
            writes: Vec<BufWriteInfo>,
            _account: &IoAccount,
            sink: Box<dyn CompletionSink>,
        ) -> Vec<BlockToken> {
            sink.on_io_complete();
            writes
                .iter()
                .flat_map(|w| {
                    (0..self.tokens_per_write).map(move |i| {
                        Arc::new(StandardBlockToken::new(w.block_id, i as u64, w.block_size))
                    })
                })
                .collect()
        }

        async fn index_write(
            &self,
            _ops: Vec<IndexWriteOp>,
            _account: &IoAccount,
        ) -> blockser_common::Result<()> {
            *self.index_writes.lock() += 1;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_token_count_mismatch_aborts_before_commit() {
        let ctx = ExecutionContext::new_unique();
        let ser = MiscountingSerializer {
            home: ctx.id(),
            tokens_per_write: 2,
            index_writes: Mutex::new(0),
        };
        let account = ser.make_io_account(1);
        let buf = filled(1);

        let err = do_writes(
            &ctx,
            &ser,
            &[WriteRequest::update(BlockId::new(1), Recency::new(1), &buf, None, None)],
            &account,
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            SerializerError::TokenCountMismatch { expected: 1, actual: 2, .. }
        ));
        assert!(err.is_invariant_violation());
        assert_eq!(*ser.index_writes.lock(), 0);

        let zero = MiscountingSerializer {
            home: ctx.id(),
            tokens_per_write: 0,
            index_writes: Mutex::new(0),
        };
        let err = serializer_block_write(&ctx, &zero, &buf, BlockId::new(1), &account)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SerializerError::TokenCountMismatch { actual: 0, .. }
        ));
    }

    /// Engine that duplicates the token for one block and otherwise defers
    /// to a `MemSerializer`
    struct DuplicatingSerializer {
        inner: MemSerializer,
        duplicate_for: BlockId,
    }

    #[async_trait]
    impl Serializer for DuplicatingSerializer {
        fn home_context(&self) -> ContextId {
            self.inner.home_context()
        }

        fn block_size(&self) -> BlockSize {
            self.inner.block_size()
        }

        fn malloc(&self) -> SerBuffer {
            self.inner.malloc()
        }

        fn clone_buffer(&self, source: &SerBuffer) -> SerBuffer {
            self.inner.clone_buffer(source)
        }

        fn make_io_account_with_limit(
            &self,
            priority: i32,
            limit: OutstandingRequests,
        ) -> IoAccount {
            self.inner.make_io_account_with_limit(priority, limit)
        }

        fn block_writes(
            &self,
            writes: Vec<BufWriteInfo>,
            account: &IoAccount,
            sink: Box<dyn CompletionSink>,
        ) -> Vec<BlockToken> {
            let duplicate = writes.iter().any(|w| w.block_id == self.duplicate_for);
            let mut tokens = self.inner.block_writes(writes, account, sink);
            if duplicate && let Some(token) = tokens.first().cloned() {
                tokens.push(token);
            }
            tokens
        }

        async fn index_write(
            &self,
            ops: Vec<IndexWriteOp>,
            account: &IoAccount,
        ) -> blockser_common::Result<()> {
            self.inner.index_write(ops, account).await
        }
    }

    #[tokio::test]
    async fn test_issue_failure_waits_for_issued_writes() {
        let (ctx, inner) = setup(CompletionMode::Manual);
        let ser = DuplicatingSerializer {
            inner,
            duplicate_for: BlockId::new(2),
        };
        let account = ser.make_io_account(1);
        let observer = Arc::new(CountingObserver::default());
        let buffers = [filled(1), filled(2), filled(3)];
        let writes: Vec<WriteRequest> = buffers
            .iter()
            .zip(1..)
            .map(|(buf, id)| {
                WriteRequest::update(
                    BlockId::new(id),
                    Recency::new(1),
                    buf,
                    Some(observer.clone()),
                    None,
                )
            })
            .collect();

        let batch = do_writes(&ctx, &ser, &writes, &account);
        tokio::pin!(batch);

        // Block 2 failed to issue, but blocks 1 and 2 are in flight
        assert!(futures::poll!(batch.as_mut()).is_pending());
        assert_eq!(ser.inner.pending_completions(), 2);
        assert_eq!(ser.inner.block_write_log().len(), 2);

        assert!(ser.inner.complete_next());
        assert!(futures::poll!(batch.as_mut()).is_pending());

        assert!(ser.inner.complete_next());
        let err = batch.await.unwrap_err();
        assert!(matches!(err, SerializerError::TokenCountMismatch { actual: 2, .. }));
        assert_eq!(ser.inner.pending_completions(), 0);
        assert_eq!(observer.calls.load(Ordering::SeqCst), 2);
        assert!(ser.inner.index_commits().is_empty());
    }

    /// Engine that drops the completion sink for one block unsignaled
    struct DroppingSerializer {
        inner: MemSerializer,
        drop_for: BlockId,
    }

    #[async_trait]
    impl Serializer for DroppingSerializer {
        fn home_context(&self) -> ContextId {
            self.inner.home_context()
        }

        fn block_size(&self) -> BlockSize {
            self.inner.block_size()
        }

        fn malloc(&self) -> SerBuffer {
            self.inner.malloc()
        }

        fn clone_buffer(&self, source: &SerBuffer) -> SerBuffer {
            self.inner.clone_buffer(source)
        }

        fn make_io_account_with_limit(
            &self,
            priority: i32,
            limit: OutstandingRequests,
        ) -> IoAccount {
            self.inner.make_io_account_with_limit(priority, limit)
        }

        fn block_writes(
            &self,
            writes: Vec<BufWriteInfo>,
            account: &IoAccount,
            sink: Box<dyn CompletionSink>,
        ) -> Vec<BlockToken> {
            if writes.iter().any(|w| w.block_id == self.drop_for) {
                drop(sink);
                return writes
                    .iter()
                    .map(|w| Arc::new(StandardBlockToken::new(w.block_id, u64::MAX, w.block_size)))
                    .collect();
            }
            self.inner.block_writes(writes, account, sink)
        }

        async fn index_write(
            &self,
            ops: Vec<IndexWriteOp>,
            account: &IoAccount,
        ) -> blockser_common::Result<()> {
            self.inner.index_write(ops, account).await
        }
    }

    #[tokio::test]
    async fn test_dropped_completion_still_waits_for_the_rest() {
        let (ctx, inner) = setup(CompletionMode::Manual);
        let ser = DroppingSerializer {
            inner,
            drop_for: BlockId::new(1),
        };
        let account = ser.make_io_account(1);
        let (a, b) = (filled(1), filled(2));
        let writes = [
            WriteRequest::update(BlockId::new(1), Recency::new(1), &a, None, None),
            WriteRequest::update(BlockId::new(2), Recency::new(1), &b, None, None),
        ];

        let batch = do_writes(&ctx, &ser, &writes, &account);
        tokio::pin!(batch);

        // Block 1's completion is already gone; block 2 is still in flight
        assert!(futures::poll!(batch.as_mut()).is_pending());
        assert_eq!(ser.inner.pending_completions(), 1);

        assert!(ser.inner.complete_next());
        let err = batch.await.unwrap_err();
        assert!(matches!(err, SerializerError::CompletionDropped));
        assert_eq!(ser.inner.pending_completions(), 0);
        assert!(ser.inner.index_commits().is_empty());
    }

    #[tokio::test]
    async fn test_single_block_mismatch_waits_for_write() {
        let (ctx, inner) = setup(CompletionMode::Manual);
        let ser = DuplicatingSerializer {
            inner,
            duplicate_for: BlockId::new(4),
        };
        let account = ser.make_io_account(1);
        let buf = filled(4);

        let write = serializer_block_write(&ctx, &ser, &buf, BlockId::new(4), &account);
        tokio::pin!(write);
        assert!(futures::poll!(write.as_mut()).is_pending());

        assert_eq!(ser.inner.complete_pending(), 1);
        let err = write.await.unwrap_err();
        assert!(matches!(err, SerializerError::TokenCountMismatch { actual: 2, .. }));
    }
}
