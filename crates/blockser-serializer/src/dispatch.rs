//! Write dispatch
//!
//! Turns one [`WriteRequest`] into calls against the storage engine and
//! the [`IndexWriteOp`] that records it. Only updates touch the engine's
//! block-write primitive; deletes and touches are pure index changes.

use crate::completion::{CompletionBarrier, completion_barrier};
use crate::engine::{BlockToken, BufWriteInfo, IndexWriteOp, IoAccount, Serializer, TokenAction};
use crate::error::{SerializerError, SerializerResult};
use crate::write::{WriteAction, WriteRequest};
use blockser_common::{BlockId, Recency};
use tracing::{error, trace};

/// Issue one write request
///
/// For updates, a completion barrier is pushed onto `barriers`; the caller
/// must wait on it before committing the returned index mutation. Context
/// affinity is checked by the caller.
pub(crate) fn perform_write<S: Serializer + ?Sized>(
    write: &WriteRequest,
    ser: &S,
    account: &IoAccount,
    barriers: &mut Vec<CompletionBarrier>,
) -> SerializerResult<IndexWriteOp> {
    let block_id = write.block_id();

    match write.action() {
        WriteAction::Update(update) => {
            let (signal, barrier) = completion_barrier(update.io_callback().cloned());
            barriers.push(barrier);

            let info =
                BufWriteInfo::new(update.buf().share(), ser.block_size_for(block_id), block_id);
            let tokens = ser.block_writes(vec![info], account, Box::new(signal));
            let token = single_token(tokens, block_id)?;

            if let Some(launch_callback) = update.launch_callback() {
                launch_callback.on_write_launched(&token);
            }

            trace!(%block_id, offset = token.offset(), "issued block write");
            Ok(IndexWriteOp::new(
                block_id,
                TokenAction::Set(token),
                update.recency(),
            ))
        }
        WriteAction::Delete => Ok(IndexWriteOp::new(
            block_id,
            TokenAction::Clear,
            Recency::INVALID,
        )),
        WriteAction::Touch { recency } => Ok(IndexWriteOp::new(
            block_id,
            TokenAction::Unchanged,
            *recency,
        )),
    }
}

/// Unwrap the single token a one-block write must return
pub(crate) fn single_token(
    tokens: Vec<BlockToken>,
    block_id: BlockId,
) -> SerializerResult<BlockToken> {
    match <[BlockToken; 1]>::try_from(tokens) {
        Ok([token]) => Ok(token),
        Err(tokens) => {
            error!(
                %block_id,
                returned = tokens.len(),
                "storage engine returned wrong number of block tokens"
            );
            Err(SerializerError::TokenCountMismatch {
                block_id,
                expected: 1,
                actual: tokens.len(),
            })
        }
    }
}
