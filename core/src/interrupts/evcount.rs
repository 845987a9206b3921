//! # Event Counters
//!
//! Every established handler gets a named counter, bumped each time it
//! claims an interrupt. Counters are registered globally so they can be
//! listed without walking the per-CPU dispatch tables.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

/// Claimed-interrupt counter for one handler
#[derive(Debug)]
pub struct EventCounter {
    name: &'static str,
    irq: usize,
    count: AtomicU64,
}

impl EventCounter {
    /// Zeroed counter
    pub const fn new(name: &'static str, irq: usize) -> Self {
        Self {
            name,
            irq,
            count: AtomicU64::new(0),
        }
    }

    /// Handler name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Line the handler is attached to
    pub fn irq(&self) -> usize {
        self.irq
    }

    /// Interrupts claimed so far
    #[inline]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn increment(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time counter reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventSample {
    /// Handler name
    pub name: &'static str,
    /// Line
    pub irq: usize,
    /// Claimed interrupts
    pub count: u64,
}

/// Set of live counters
#[derive(Debug)]
pub struct EventRegistry {
    counters: Mutex<Vec<Arc<EventCounter>>>,
}

impl EventRegistry {
    /// Empty registry
    pub const fn new() -> Self {
        Self {
            counters: Mutex::new(Vec::new()),
        }
    }

    /// Add a counter
    pub fn attach(&self, counter: Arc<EventCounter>) {
        self.counters.lock().push(counter);
    }

    /// Remove a counter previously attached
    pub fn detach(&self, counter: &Arc<EventCounter>) {
        self.counters.lock().retain(|c| !Arc::ptr_eq(c, counter));
    }

    /// Number of registered counters
    pub fn len(&self) -> usize {
        self.counters.lock().len()
    }

    /// Whether no counters are registered
    pub fn is_empty(&self) -> bool {
        self.counters.lock().is_empty()
    }

    /// Read every counter, in attach order
    pub fn snapshot(&self) -> Vec<EventSample> {
        self.counters
            .lock()
            .iter()
            .map(|c| EventSample {
                name: c.name(),
                irq: c.irq(),
                count: c.count(),
            })
            .collect()
    }

    /// Sum over all counters
    pub fn total(&self) -> u64 {
        self.counters.lock().iter().map(|c| c.count()).sum()
    }
}

impl Default for EventRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// System-wide interrupt counters
pub static INTR_EVCOUNTS: EventRegistry = EventRegistry::new();
