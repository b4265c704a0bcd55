//! Per-engine admission control
//!
//! Each engine owns a fixed number of concurrency slots. Admission never
//! queues: a request either takes a slot immediately or is rejected, which
//! is the backpressure signal the dispatcher sees through heartbeats.

use opml_common::METRICS;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Bounds in-flight jobs for a single engine
#[derive(Debug)]
pub struct AdmissionController {
    /// Engine name, used for logs and metric labels
    name: &'static str,

    /// Jobs currently holding a slot
    in_flight: AtomicUsize,

    /// Maximum concurrent jobs
    capacity: usize,
}

impl AdmissionController {
    /// Create a controller with `capacity` slots (at least one)
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            in_flight: AtomicUsize::new(0),
            capacity: capacity.max(1),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Take a slot if one is free
    ///
    /// Returns false without side effects when the engine is at capacity.
    /// Every successful call must be paired with exactly one [`release`](Self::release).
    pub fn try_acquire(&self) -> bool {
        let acquired = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < self.capacity).then_some(current + 1)
            })
            .is_ok();

        if acquired {
            METRICS.engines.in_flight.with_label_values(&[self.name]).inc();
            trace!(engine = self.name, load = self.load(), "Admission slot acquired");
        }
        acquired
    }

    /// Return a slot taken by [`try_acquire`](Self::try_acquire)
    pub fn release(&self) {
        let released = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| current.checked_sub(1))
            .is_ok();

        if released {
            METRICS.engines.in_flight.with_label_values(&[self.name]).dec();
        } else {
            debug_assert!(false, "release without matching acquire on {}", self.name);
        }
    }

    /// Take a slot that is returned when the permit drops
    pub fn try_permit(self: &Arc<Self>) -> Option<AdmissionPermit> {
        self.try_acquire().then(|| AdmissionPermit {
            controller: Arc::clone(self),
        })
    }

    /// Current in-flight count, for reporting only
    pub fn load(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn is_saturated(&self) -> bool {
        self.load() >= self.capacity
    }
}

/// Scoped admission slot
///
/// Dropping the permit releases the slot, so every exit path (success,
/// error, timeout, panic unwinding) gives it back exactly once.
#[derive(Debug)]
pub struct AdmissionPermit {
    controller: Arc<AdmissionController>,
}

impl AdmissionPermit {
    pub fn engine(&self) -> &'static str {
        self.controller.name()
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.controller.release();
    }
}
