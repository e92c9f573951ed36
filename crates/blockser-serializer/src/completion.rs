//! One-shot completion barriers
//!
//! A barrier bridges the storage engine's asynchronous completion
//! notification to a suspending wait. It is split into two halves:
//! - [`CompletionSignal`]: the completion sink handed to the engine
//! - [`CompletionBarrier`]: the awaitable kept by the write path
//!
//! Signaling runs the chained observer, if any, and only then releases the
//! waiter. Both halves are consumed on use, so a barrier cannot be signaled
//! or waited on twice.

use crate::engine::{CompletionSink, IoCallback};
use crate::error::{SerializerError, SerializerResult};
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Create a barrier, optionally chained to a completion observer
#[must_use]
pub fn completion_barrier(
    observer: Option<Arc<dyn IoCallback>>,
) -> (CompletionSignal, CompletionBarrier) {
    let (tx, rx) = oneshot::channel();
    (CompletionSignal { tx, observer }, CompletionBarrier { rx })
}

/// Signaling half of a completion barrier
pub struct CompletionSignal {
    tx: oneshot::Sender<()>,
    observer: Option<Arc<dyn IoCallback>>,
}

impl CompletionSignal {
    /// Run the chained observer, then release the waiter
    pub fn signal(self) {
        if let Some(observer) = &self.observer {
            observer.on_io_complete();
        }
        // The waiter may have been dropped with its batch; nothing to wake.
        let _ = self.tx.send(());
    }
}

impl CompletionSink for CompletionSignal {
    fn on_io_complete(self: Box<Self>) {
        self.signal();
    }
}

impl fmt::Debug for CompletionSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionSignal")
            .field("has_observer", &self.observer.is_some())
            .finish()
    }
}

/// Waiting half of a completion barrier
#[derive(Debug)]
pub struct CompletionBarrier {
    rx: oneshot::Receiver<()>,
}

impl CompletionBarrier {
    /// Suspend until the barrier is signaled
    ///
    /// Resolves without suspending if the signal already ran. Fails if the
    /// signaling half was dropped without signaling.
    pub async fn wait(self) -> SerializerResult<()> {
        self.rx
            .await
            .map_err(|_| SerializerError::CompletionDropped)
    }
}
