//! Execution context affinity
//!
//! A storage engine instance runs on one cooperative execution context.
//! Callers hold an [`ExecutionContext`] for the context they run on and
//! pass it to every write path entry point, which checks it against the
//! engine's home context before touching the engine.
//!
//! The handle is `!Send`: it names the context it was created
//! on and cannot migrate to another thread.

use crate::engine::{IoAccount, Serializer};
use crate::error::{SerializerError, SerializerResult};
use blockser_common::{ContextId, OutstandingRequests};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::error;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Handle naming the execution context the caller runs on
#[derive(Debug)]
pub struct ExecutionContext {
    id: ContextId,
    _not_send: PhantomData<*const ()>,
}

impl ExecutionContext {
    /// Create a handle for a known context
    #[must_use]
    pub const fn new(id: ContextId) -> Self {
        Self {
            id,
            _not_send: PhantomData,
        }
    }

    /// Create a handle for a fresh, process-unique context
    #[must_use]
    pub fn new_unique() -> Self {
        Self::new(ContextId::new(
            NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
        ))
    }

    /// Context identity
    #[must_use]
    pub const fn id(&self) -> ContextId {
        self.id
    }

    /// Check that `ser` is pinned to this context
    pub fn check<S: Serializer + ?Sized>(&self, ser: &S) -> SerializerResult<()> {
        let expected = ser.home_context();
        if expected != self.id {
            error!(
                expected = %expected,
                actual = %self.id,
                "serializer invoked from foreign execution context"
            );
            return Err(SerializerError::WrongContext {
                expected,
                actual: self.id,
            });
        }
        Ok(())
    }

    /// Create an unlimited I/O account on `ser` from this context
    pub fn make_io_account<S: Serializer + ?Sized>(
        &self,
        ser: &S,
        priority: i32,
    ) -> SerializerResult<IoAccount> {
        self.make_io_account_with_limit(ser, priority, OutstandingRequests::Unlimited)
    }

    /// Create an I/O account on `ser` from this context
    pub fn make_io_account_with_limit<S: Serializer + ?Sized>(
        &self,
        ser: &S,
        priority: i32,
        limit: OutstandingRequests,
    ) -> SerializerResult<IoAccount> {
        self.check(ser)?;
        Ok(ser.make_io_account_with_limit(priority, limit))
    }
}
