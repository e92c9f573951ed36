//! Serializer write requests
//!
//! A [`WriteRequest`] describes one logical mutation of a block: replace
//! its content, delete it, or touch its recency. Requests are built right
//! before submission and are read-only afterwards.

use crate::buffer::SerBuffer;
use crate::engine::{IoCallback, WriteLaunchedCallback};
use blockser_common::{BlockId, Recency};
use std::fmt;
use std::sync::Arc;

/// Payload of an update request
pub struct UpdateWrite {
    buf: SerBuffer,
    recency: Recency,
    io_callback: Option<Arc<dyn IoCallback>>,
    launch_callback: Option<Arc<dyn WriteLaunchedCallback>>,
}

impl UpdateWrite {
    /// Buffer holding the new content
    #[must_use]
    pub const fn buf(&self) -> &SerBuffer {
        &self.buf
    }

    /// Recency of the new content
    #[must_use]
    pub const fn recency(&self) -> Recency {
        self.recency
    }

    /// Observer notified when the write is durable
    #[must_use]
    pub const fn io_callback(&self) -> Option<&Arc<dyn IoCallback>> {
        self.io_callback.as_ref()
    }

    /// Observer notified when the write has claimed its slot
    #[must_use]
    pub const fn launch_callback(&self) -> Option<&Arc<dyn WriteLaunchedCallback>> {
        self.launch_callback.as_ref()
    }
}

impl fmt::Debug for UpdateWrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateWrite")
            .field("buf", &self.buf)
            .field("recency", &self.recency)
            .field("has_io_callback", &self.io_callback.is_some())
            .field("has_launch_callback", &self.launch_callback.is_some())
            .finish()
    }
}

/// The mutation a request performs
#[derive(Debug)]
pub enum WriteAction {
    /// Replace the block's content
    Update(UpdateWrite),
    /// Tombstone the block
    Delete,
    /// Bump the block's recency, keeping its content
    Touch { recency: Recency },
}

/// One logical block mutation
#[derive(Debug)]
pub struct WriteRequest {
    block_id: BlockId,
    action: WriteAction,
}

impl WriteRequest {
    /// Touch a block's recency without rewriting it
    #[must_use]
    pub const fn touch(block_id: BlockId, recency: Recency) -> Self {
        Self {
            block_id,
            action: WriteAction::Touch { recency },
        }
    }

    /// Replace a block's content with `buf`
    ///
    /// The request shares `buf`'s storage; nothing is copied.
    #[must_use]
    pub fn update(
        block_id: BlockId,
        recency: Recency,
        buf: &SerBuffer,
        io_callback: Option<Arc<dyn IoCallback>>,
        launch_callback: Option<Arc<dyn WriteLaunchedCallback>>,
    ) -> Self {
        Self {
            block_id,
            action: WriteAction::Update(UpdateWrite {
                buf: buf.share(),
                recency,
                io_callback,
                launch_callback,
            }),
        }
    }

    /// Delete a block
    #[must_use]
    pub const fn delete(block_id: BlockId) -> Self {
        Self {
            block_id,
            action: WriteAction::Delete,
        }
    }

    /// Target block
    #[must_use]
    pub const fn block_id(&self) -> BlockId {
        self.block_id
    }

    /// The mutation this request performs
    #[must_use]
    pub const fn action(&self) -> &WriteAction {
        &self.action
    }

    /// Check whether this request writes block content
    #[must_use]
    pub const fn is_update(&self) -> bool {
        matches!(self.action, WriteAction::Update(_))
    }
}
