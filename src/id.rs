//! Actuator identifiers and the process-wide allocator that hands them out.
//!
//! Every actuator in every dataflow built by one process gets a distinct
//! [`ActuatorId`]. The id doubles as the id of the observation the actuator
//! produces, which is what lets a later dataflow hook onto an earlier one.

use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{DataflowError, DataflowResult};

/// Unique, niche-optimized identifier for an actuator and its observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ActuatorId(NonZeroU64);

impl ActuatorId {
    /// Create an `ActuatorId` from a raw `u64`.
    ///
    /// Returns `None` if `raw` is zero.
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(ActuatorId)
    }

    /// Get the underlying `u64` value.
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl std::fmt::Display for ActuatorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "act:{}", self.0)
    }
}

/// Source of fresh actuator ids.
///
/// Implementations must never return the same id twice within a process, even
/// when called from many threads at once.
pub trait IdAllocator: Send + Sync + std::fmt::Debug {
    fn next_id(&self) -> DataflowResult<ActuatorId>;
}

/// Lock-free monotonic allocator.
///
/// Safe to share across threads via `Arc<AtomicIdAllocator>`.
#[derive(Debug)]
pub struct AtomicIdAllocator {
    next: AtomicU64,
}

impl AtomicIdAllocator {
    /// Create a new allocator that starts from ID 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Create an allocator that resumes from a given ID.
    ///
    /// Useful when a restored digital twin already holds observations.
    pub fn starting_from(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start.max(1)),
        }
    }

    /// Return the next ID that *would* be allocated, without consuming it.
    pub fn peek_next(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for AtomicIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdAllocator for AtomicIdAllocator {
    /// Allocate the next actuator ID.
    ///
    /// Once `u64::MAX` has been handed out the counter saturates and every
    /// further call fails, so ids are never reused.
    fn next_id(&self) -> DataflowResult<ActuatorId> {
        let raw = self
            .next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                if n == 0 {
                    None
                } else {
                    Some(n.checked_add(1).unwrap_or(0))
                }
            })
            .map_err(|_| DataflowError::IdSpaceExhausted)?;
        ActuatorId::new(raw).ok_or(DataflowError::IdSpaceExhausted)
    }
}
