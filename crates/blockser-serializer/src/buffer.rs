//! Serializer buffers and the owning buffer handle
//!
//! A [`SerBuffer`] is allocated through the storage engine. Handing it to
//! a block write shares the storage instead of copying it; the engine keeps
//! its share alive until it no longer needs the bytes. Writing through
//! [`SerBuffer::as_mut_slice`] while a share is outstanding detaches the
//! writer onto a private copy, so in-flight writes never observe it.

use crate::context::ExecutionContext;
use crate::engine::Serializer;
use crate::error::{SerializerError, SerializerResult};
use std::fmt;
use std::sync::Arc;
use tracing::error;

/// Buffer allocated by a storage engine
pub struct SerBuffer {
    data: Arc<Vec<u8>>,
}

impl SerBuffer {
    /// Create a zero-filled buffer
    #[must_use]
    pub fn zeroed(len: usize) -> Self {
        Self::from_vec(vec![0u8; len])
    }

    /// Wrap existing bytes without copying
    #[must_use]
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(data),
        }
    }

    /// Another handle onto the same storage
    #[must_use]
    pub fn share(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
        }
    }

    /// Check whether two handles refer to the same storage
    #[must_use]
    pub fn shares_storage_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// Buffer length
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the buffer is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Buffer contents
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Mutable buffer contents
    ///
    /// Copies the storage first if another handle still shares it.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        Arc::make_mut(&mut self.data).as_mut_slice()
    }

    /// Copy `src` into the start of the buffer
    ///
    /// Copies at most `self.len()` bytes; returns the number copied.
    pub fn copy_from(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.len());
        self.as_mut_slice()[..n].copy_from_slice(&src[..n]);
        n
    }
}

impl fmt::Debug for SerBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerBuffer")
            .field("len", &self.data.len())
            .field("shares", &Arc::strong_count(&self.data))
            .finish()
    }
}

/// Handle owning at most one engine-allocated buffer
///
/// Double allocation and double release are caller bugs and are reported
/// as invariant violations.
#[derive(Debug, Default)]
pub struct SerializerDataPtr {
    ptr: Option<SerBuffer>,
}

impl SerializerDataPtr {
    /// Create an empty handle
    #[must_use]
    pub const fn new() -> Self {
        Self { ptr: None }
    }

    /// Check whether a buffer is held
    #[must_use]
    pub const fn has(&self) -> bool {
        self.ptr.is_some()
    }

    /// The held buffer, if any
    #[must_use]
    pub const fn get(&self) -> Option<&SerBuffer> {
        self.ptr.as_ref()
    }

    /// The held buffer, mutably
    pub fn get_mut(&mut self) -> Option<&mut SerBuffer> {
        self.ptr.as_mut()
    }

    /// Allocate a fresh buffer from the engine
    pub fn init_malloc<S: Serializer + ?Sized>(
        &mut self,
        ctx: &ExecutionContext,
        ser: &S,
    ) -> SerializerResult<()> {
        ctx.check(ser)?;
        if self.ptr.is_some() {
            error!("init_malloc on a buffer handle that already holds a buffer");
            return Err(SerializerError::BufferAlreadyHeld);
        }
        self.ptr = Some(ser.malloc());
        Ok(())
    }

    /// Allocate a deep copy of `other`'s buffer through the engine
    pub fn init_clone<S: Serializer + ?Sized>(
        &mut self,
        ctx: &ExecutionContext,
        ser: &S,
        other: &Self,
    ) -> SerializerResult<()> {
        ctx.check(ser)?;
        let Some(source) = other.ptr.as_ref() else {
            error!("init_clone from an empty buffer handle");
            return Err(SerializerError::BufferNotHeld);
        };
        if self.ptr.is_some() {
            error!("init_clone into a buffer handle that already holds a buffer");
            return Err(SerializerError::BufferAlreadyHeld);
        }
        self.ptr = Some(ser.clone_buffer(source));
        Ok(())
    }

    /// Release the held buffer
    pub fn free(&mut self) -> SerializerResult<()> {
        if self.ptr.take().is_none() {
            error!("free on an empty buffer handle");
            return Err(SerializerError::BufferNotHeld);
        }
        Ok(())
    }

    /// Exchange buffers with another handle
    pub fn swap(&mut self, other: &mut Self) {
        std::mem::swap(&mut self.ptr, &mut other.ptr);
    }
}
