//! # Borrow Tracking Module
//!
//! This module implements a **per-resource read/write borrow tracker**.
//!
//! ## Purpose
//!
//! The dependency tracker decides *when* a job may start; this module checks,
//! at the moment it starts, that the decision was right:
//!
//! - Multiple jobs may **read** the same component kind concurrently.
//! - Only one job may **write** a component kind at a time.
//! - No job may read a component kind while another job writes it.
//!
//! Acquisition never waits. A conflicting state means the job graph was
//! recorded wrongly, so the job fails with [`ExecutionError::BorrowConflict`]
//! instead of racing.
//!
//! ## State Encoding
//!
//! Each resource maps to one `AtomicUsize` with the following meaning:
//!
//! | State | Meaning |
//! |------:|--------|
//! | `0` | Unlocked |
//! | `1` | Write-locked (exclusive writer) |
//! | `>= 2` | Read-locked (`state - 1` active readers) |
//!
//! ## Resources
//!
//! Every component kind is a resource, plus one implicit
//! [`Resource::Structure`] covering entity existence and component presence.
//! Ordinary jobs read it; replay jobs write it.
//!
//! ## RAII Integration
//!
//! The [`BorrowGuard`] type acquires a job's full borrow set up front and
//! releases it when dropped, including when the job body panics.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::engine::component::component_name;
use crate::engine::error::{AccessError, ECSError, ExecutionError};
use crate::engine::types::{ComponentID, COMPONENT_CAP};

/// A unit of data the scheduler orders jobs around.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Resource {
    /// Values of one component kind.
    Component(ComponentID),
    /// Entity existence and component presence.
    Structure,
}

impl Resource {
    #[inline]
    fn slot(self) -> usize {
        match self {
            Resource::Component(component_id) => component_id as usize,
            Resource::Structure => COMPONENT_CAP,
        }
    }
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Resource::Component(component_id) => {
                write!(f, "component {} ({})", component_name(*component_id), component_id)
            }
            Resource::Structure => f.write_str("world structure"),
        }
    }
}

/// Tracks runtime read/write borrows for each resource.
pub struct BorrowTracker {
    /// Per-resource atomic borrow state; the last slot is the structure.
    states: [AtomicUsize; COMPONENT_CAP + 1],
}

impl Default for BorrowTracker {
    fn default() -> Self { Self::new() }
}

impl BorrowTracker {
    /// Creates a new `BorrowTracker` with all resources unlocked.
    pub fn new() -> Self {
        Self { states: std::array::from_fn(|_| AtomicUsize::new(0)) }
    }

    /// Attempts a **shared (read) borrow**.
    ///
    /// ## State Transitions
    ///
    /// - `0 → 2` : first reader
    /// - `N → N+1` : additional reader
    /// - `1` : fails, a writer is present
    pub fn try_acquire_read(&self, resource: Resource) -> Result<(), ExecutionError> {
        let state = &self.states[resource.slot()];
        let mut current_state = state.load(Ordering::Acquire);
        loop {
            if current_state == 1 {
                return Err(ExecutionError::BorrowConflict { resource });
            }
            let next = if current_state == 0 { 2 } else { current_state + 1 };
            match state.compare_exchange_weak(current_state, next, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return Ok(()),
                Err(observed) => current_state = observed,
            }
        }
    }

    /// Releases a previously acquired **shared (read) borrow**.
    pub fn release_read(&self, resource: Resource) {
        let state = &self.states[resource.slot()];
        let mut current_state = state.load(Ordering::Acquire);
        loop {
            debug_assert!(current_state >= 2);
            let next = if current_state == 2 { 0 } else { current_state - 1 };
            match state.compare_exchange_weak(current_state, next, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return,
                Err(observed) => current_state = observed,
            }
        }
    }

    /// Attempts an **exclusive (write) borrow**.
    ///
    /// ## State Transition
    ///
    /// - `0 → 1`; any other state fails.
    pub fn try_acquire_write(&self, resource: Resource) -> Result<(), ExecutionError> {
        self.states[resource.slot()]
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| ExecutionError::BorrowConflict { resource })
    }

    /// Releases a previously acquired **exclusive (write) borrow**.
    pub fn release_write(&self, resource: Resource) {
        let previous_state = self.states[resource.slot()].swap(0, Ordering::AcqRel);
        debug_assert!(previous_state == 1);
    }

    /// Returns `true` if no resource is borrowed.
    pub fn is_idle(&self) -> bool {
        self.states.iter().all(|state| state.load(Ordering::Acquire) == 0)
    }
}

/// RAII guard representing a job's full borrow lifetime.
///
/// When created, this guard acquires all requested read borrows, then all
/// requested write borrows. If any acquisition fails, the borrows already
/// taken are released before the error is returned.
pub struct BorrowGuard<'a> {
    tracker: &'a BorrowTracker,
    reads: Vec<Resource>,
    writes: Vec<Resource>,
}

impl<'a> BorrowGuard<'a> {
    /// Creates a new `BorrowGuard` and acquires all requested borrows.
    ///
    /// ## Errors
    /// - [`AccessError::Conflict`] if a component kind is both read and written.
    /// - [`ExecutionError::BorrowConflict`] if a resource is held in a
    ///   conflicting mode.
    pub fn new(
        tracker: &'a BorrowTracker,
        reads: &[Resource],
        writes: &[Resource],
    ) -> Result<Self, ECSError> {
        let mut r = reads.to_vec();
        let mut w = writes.to_vec();

        r.sort_unstable();
        w.sort_unstable();

        r.dedup();
        w.dedup();

        for resource in &r {
            if w.binary_search(resource).is_ok() {
                let component_id = match *resource {
                    Resource::Component(component_id) => component_id,
                    Resource::Structure => COMPONENT_CAP as ComponentID,
                };
                return Err(AccessError::Conflict {
                    component_id,
                    name: component_name(component_id),
                }
                .into());
            }
        }

        let mut guard = Self { tracker, reads: Vec::with_capacity(r.len()), writes: Vec::with_capacity(w.len()) };
        for resource in r {
            tracker.try_acquire_read(resource)?;
            guard.reads.push(resource);
        }
        for resource in w {
            tracker.try_acquire_write(resource)?;
            guard.writes.push(resource);
        }
        Ok(guard)
    }
}

impl Drop for BorrowGuard<'_> {
    /// Releases all acquired borrows in reverse order.
    fn drop(&mut self) {
        for &resource in self.writes.iter().rev() { self.tracker.release_write(resource); }
        for &resource in self.reads.iter().rev() { self.tracker.release_read(resource); }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readers_share_writers_exclude() {
        let tracker = BorrowTracker::new();
        let a = Resource::Component(3);

        tracker.try_acquire_read(a).unwrap();
        tracker.try_acquire_read(a).unwrap();
        assert_eq!(tracker.try_acquire_write(a), Err(ExecutionError::BorrowConflict { resource: a }));

        tracker.release_read(a);
        tracker.release_read(a);
        tracker.try_acquire_write(a).unwrap();
        assert!(tracker.try_acquire_read(a).is_err());
        tracker.release_write(a);
        assert!(tracker.is_idle());
    }

    #[test]
    fn structure_is_tracked_separately_from_components() {
        let tracker = BorrowTracker::new();
        tracker.try_acquire_write(Resource::Structure).unwrap();
        tracker.try_acquire_write(Resource::Component(0)).unwrap();
        assert!(tracker.try_acquire_read(Resource::Structure).is_err());
        tracker.release_write(Resource::Structure);
        tracker.release_write(Resource::Component(0));
        assert!(tracker.is_idle());
    }

    #[test]
    fn failed_guard_releases_partial_acquisitions() {
        let tracker = BorrowTracker::new();
        let held = Resource::Component(9);
        tracker.try_acquire_write(held).unwrap();

        let result = BorrowGuard::new(&tracker, &[Resource::Structure, Resource::Component(1)], &[held]);
        assert!(matches!(
            result,
            Err(ECSError::Execution(ExecutionError::BorrowConflict { resource })) if resource == held
        ));

        tracker.release_write(held);
        assert!(tracker.is_idle());
    }

    #[test]
    fn guard_rejects_read_and_write_of_same_kind() {
        let tracker = BorrowTracker::new();
        let result = BorrowGuard::new(&tracker, &[Resource::Component(4)], &[Resource::Component(4)]);
        assert!(matches!(result, Err(ECSError::Access(AccessError::Conflict { component_id: 4, .. }))));
        assert!(tracker.is_idle());
    }

    #[test]
    fn guard_releases_on_drop() {
        let tracker = BorrowTracker::new();
        {
            let _guard = BorrowGuard::new(
                &tracker,
                &[Resource::Structure, Resource::Component(2), Resource::Component(2)],
                &[Resource::Component(5)],
            )
            .unwrap();
            assert!(!tracker.is_idle());
        }
        assert!(tracker.is_idle());
    }
}
