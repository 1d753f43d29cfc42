//! Custom event id allocation.
//!
//! Custom events are named system events the caller wants delivered. Each
//! name gets one id from a bounded range above the internal system events;
//! asking for the same name again returns the same id. Allocations outlive
//! sessions and are subscribed again every time the simulator becomes
//! available.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

use crate::error::{ClientError, Result};
use crate::ids::{CUSTOM_EVENT_MAX, CUSTOM_EVENT_MIN, is_reserved_name};

/// A fired custom event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomEvent {
    /// Allocated id.
    pub id: u32,
    /// Name the id was allocated for.
    pub name: Arc<str>,
    /// Event specific value.
    pub data: u32,
}

#[derive(Debug)]
struct AllocatorInner {
    // u64 so that a range ending at u32::MAX can still be exhausted cleanly
    next: u64,
    by_name: HashMap<Arc<str>, u32>,
    by_id: HashMap<u32, Arc<str>>,
}

/// Hands out custom event ids from a fixed range.
#[derive(Debug)]
pub struct CustomEventAllocator {
    start: u32,
    end: u32,
    inner: RwLock<AllocatorInner>,
}

impl Default for CustomEventAllocator {
    fn default() -> Self {
        Self::with_range(CUSTOM_EVENT_MIN, CUSTOM_EVENT_MAX)
    }
}

impl CustomEventAllocator {
    /// Creates an allocator over the default custom event range.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an allocator over `start..=end`.
    pub fn with_range(start: u32, end: u32) -> Self {
        Self {
            start,
            end,
            inner: RwLock::new(AllocatorInner {
                next: u64::from(start),
                by_name: HashMap::new(),
                by_id: HashMap::new(),
            }),
        }
    }

    /// Returns the id for `name`, allocating one on first use.
    ///
    /// # Errors
    ///
    /// - [`ClientError::ReservedName`] if `name` is a built-in event name.
    /// - [`ClientError::EventIdsExhausted`] if the range is used up. Existing
    ///   allocations are unaffected.
    pub fn allocate(&self, name: &str) -> Result<u32> {
        if is_reserved_name(name) {
            return Err(ClientError::ReservedName(name.to_string()));
        }

        if let Some(id) = self.lookup(name) {
            return Ok(id);
        }

        let mut inner = self.inner.write();
        // Another caller may have allocated between the read and the write lock
        if let Some(&id) = inner.by_name.get(name) {
            return Ok(id);
        }

        if inner.next > u64::from(self.end) {
            return Err(ClientError::EventIdsExhausted {
                start: self.start,
                end: self.end,
            });
        }

        let id = inner.next as u32;
        inner.next += 1;
        let name: Arc<str> = Arc::from(name);
        inner.by_name.insert(Arc::clone(&name), id);
        inner.by_id.insert(id, Arc::clone(&name));
        debug!(event = %name, id, "Custom event allocated");
        Ok(id)
    }

    /// The id already allocated for `name`.
    pub fn lookup(&self, name: &str) -> Option<u32> {
        self.inner.read().by_name.get(name).copied()
    }

    /// The name an id was allocated for.
    pub fn name_of(&self, id: u32) -> Option<Arc<str>> {
        self.inner.read().by_id.get(&id).cloned()
    }

    /// Returns `true` if `id` lies in this allocator's range.
    pub const fn in_range(&self, id: u32) -> bool {
        id >= self.start && id <= self.end
    }

    /// Every allocation, ordered by id.
    pub fn allocations(&self) -> Vec<(u32, Arc<str>)> {
        let mut all: Vec<_> = self
            .inner
            .read()
            .by_id
            .iter()
            .map(|(id, name)| (*id, Arc::clone(name)))
            .collect();
        all.sort_unstable_by_key(|(id, _)| *id);
        all
    }

    /// Number of allocated ids.
    pub fn len(&self) -> usize {
        self.inner.read().by_id.len()
    }

    /// Returns `true` if nothing has been allocated.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids still available.
    pub fn remaining(&self) -> u64 {
        (u64::from(self.end) + 1).saturating_sub(self.inner.read().next)
    }
}
