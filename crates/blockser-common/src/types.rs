//! Core type definitions for blockser
//!
//! Identifiers and ordering markers shared by the serializer write path,
//! the reference storage engine and the configuration layer.

use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical block identifier
///
/// Stable across physical relocations of the block's content.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, From, Into, Display,
)]
#[display("{_0}")]
pub struct BlockId(u64);

impl BlockId {
    /// Create a block ID from its raw value
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw value
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({})", self.0)
    }
}

/// Recency timestamp attached to the current version of a block
///
/// Used by the storage engine to resolve conflicting writes and to order
/// replication. [`Recency::INVALID`] marks a block with no live content.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Recency(u64);

impl Recency {
    /// Marker for tombstoned blocks
    pub const INVALID: Self = Self(u64::MAX);

    /// Smallest valid recency
    pub const DISTANT_PAST: Self = Self(0);

    /// Create a recency from a raw timestamp
    ///
    /// `u64::MAX` is reserved; passing it yields [`Recency::INVALID`].
    #[must_use]
    pub const fn new(timestamp: u64) -> Self {
        Self(timestamp)
    }

    /// Get the raw timestamp
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Check whether this is the tombstone marker
    #[must_use]
    pub const fn is_invalid(self) -> bool {
        self.0 == u64::MAX
    }

    /// The next recency after this one
    ///
    /// Saturates below the invalid marker.
    #[must_use]
    pub const fn next(self) -> Self {
        if self.0 >= u64::MAX - 1 {
            Self(u64::MAX - 1)
        } else {
            Self(self.0 + 1)
        }
    }
}

impl Default for Recency {
    fn default() -> Self {
        Self::DISTANT_PAST
    }
}

impl fmt::Debug for Recency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_invalid() {
            write!(f, "Recency(invalid)")
        } else {
            write!(f, "Recency({})", self.0)
        }
    }
}

impl fmt::Display for Recency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_invalid() {
            write!(f, "invalid")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Size of a block as the serializer stores it (payload plus header)
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    From,
    Into,
    Display,
)]
#[display("{_0}B")]
pub struct BlockSize(u32);

impl BlockSize {
    /// Default serializer block size (4 KiB)
    pub const DEFAULT: Self = Self(4096);

    /// Create a block size from a byte count
    #[must_use]
    pub const fn new(bytes: u32) -> Self {
        Self(bytes)
    }

    /// Size in bytes as stored by the serializer
    #[must_use]
    pub const fn ser_value(self) -> u32 {
        self.0
    }

    /// Size in bytes as a `usize`, for buffer allocation
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl Default for BlockSize {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Identity of a cooperative execution context
///
/// A storage engine instance is pinned to exactly one context; every
/// serializer entry point checks the caller's context against it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, From, Into, Display)]
#[display("ctx-{_0}")]
pub struct ContextId(u64);

impl ContextId {
    /// Create a context ID from its raw value
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Debug for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContextId({})", self.0)
    }
}
