//! # Dependency Tracking
//!
//! Per resource, the tracker remembers the last job that wrote it and the
//! jobs that have read it since. Recording a new job yields its wait set:
//!
//! - a **write** waits for the last writer and every reader since, then
//!   becomes the last writer (readers are cleared);
//! - a **read** waits for the last writer only, then joins the readers.
//!
//! Per resource, writers are therefore totally ordered in schedule order and
//! every reader observes the most recent writer scheduled before it. Jobs
//! whose resources are disjoint never appear in each other's wait sets.
//!
//! The tracker lives for one tick and is owned by the scheduling context.

use std::collections::HashMap;

use crate::engine::access::AccessDescriptor;
use crate::engine::borrow::Resource;
use crate::engine::handle::{JobHandle, WaitSet};
use crate::engine::types::AccessMode;

/// Access history of one resource.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DependencyRecord {
    /// Most recently scheduled writer.
    pub last_writer: Option<JobHandle>,
    /// Readers scheduled since the last writer.
    pub last_readers: Vec<JobHandle>,
}

/// Readers/writer history for every resource touched in a tick.
#[derive(Debug, Default)]
pub struct DependencyTracker {
    records: HashMap<Resource, DependencyRecord>,
}

impl DependencyTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self { Self::default() }

    /// Records `handle` as accessing every kind in `descriptor` and returns
    /// the handles it must wait for.
    pub fn record(&mut self, handle: JobHandle, descriptor: &AccessDescriptor) -> WaitSet {
        let mut wait = WaitSet::new();
        for (component_id, access) in descriptor.iter() {
            self.record_access(handle, Resource::Component(component_id), access.mode, &mut wait);
        }
        wait
    }

    /// Records a single access, adding its dependencies to `wait`.
    pub fn record_access(&mut self, handle: JobHandle, resource: Resource, mode: AccessMode, wait: &mut WaitSet) {
        let record = self.records.entry(resource).or_default();
        match mode {
            AccessMode::Write => {
                wait.extend(record.last_writer);
                wait.extend(record.last_readers.drain(..));
                record.last_writer = Some(handle);
            }
            AccessMode::Read => {
                wait.extend(record.last_writer);
                record.last_readers.push(handle);
            }
        }
    }

    /// Wait set a job with `descriptor` would get, without recording it.
    pub fn preview(&self, descriptor: &AccessDescriptor) -> WaitSet {
        let mut wait = WaitSet::new();
        for (component_id, access) in descriptor.iter() {
            let Some(record) = self.records.get(&Resource::Component(component_id)) else { continue };
            wait.extend(record.last_writer);
            if access.mode == AccessMode::Write {
                wait.extend(record.last_readers.iter().copied());
            }
        }
        wait
    }

    /// Current record for `resource`, if it has been accessed.
    pub fn record_of(&self, resource: Resource) -> Option<&DependencyRecord> { self.records.get(&resource) }

    /// Forgets all history.
    pub fn clear(&mut self) { self.records.clear(); }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::Locality;

    fn h(index: u32) -> JobHandle { JobHandle::new(0, 0, index) }

    fn reads(ids: &[u16]) -> AccessDescriptor {
        ids.iter().fold(AccessDescriptor::builder(), |b, &id| b.read_id(id, Locality::Direct)).build().unwrap()
    }

    fn writes(ids: &[u16]) -> AccessDescriptor {
        ids.iter().fold(AccessDescriptor::builder(), |b, &id| b.write_id(id, Locality::Direct)).build().unwrap()
    }

    #[test]
    fn disjoint_jobs_do_not_wait() {
        let mut tracker = DependencyTracker::new();
        assert!(tracker.record(h(0), &writes(&[1])).is_empty());
        assert!(tracker.record(h(1), &writes(&[2])).is_empty());
        assert!(tracker.record(h(2), &reads(&[3])).is_empty());
    }

    #[test]
    fn writers_are_chained_in_schedule_order() {
        let mut tracker = DependencyTracker::new();
        let w0 = tracker.record(h(0), &writes(&[1]));
        let w1 = tracker.record(h(1), &writes(&[1]));
        let w2 = tracker.record(h(2), &writes(&[1]));
        assert!(w0.is_empty());
        assert_eq!(w1.as_slice(), &[h(0)]);
        assert_eq!(w2.as_slice(), &[h(1)]);
    }

    #[test]
    fn readers_share_and_writer_waits_for_all_of_them() {
        let mut tracker = DependencyTracker::new();
        tracker.record(h(0), &writes(&[1]));
        assert_eq!(tracker.record(h(1), &reads(&[1])).as_slice(), &[h(0)]);
        assert_eq!(tracker.record(h(2), &reads(&[1])).as_slice(), &[h(0)]);

        let preview = tracker.preview(&writes(&[1]));
        let writer = tracker.record(h(3), &writes(&[1]));
        assert_eq!(writer, preview);
        assert_eq!(writer.as_slice(), &[h(0), h(1), h(2)]);

        let record = tracker.record_of(Resource::Component(1)).unwrap();
        assert_eq!(record.last_writer, Some(h(3)));
        assert!(record.last_readers.is_empty());
    }

    #[test]
    fn wait_set_is_union_over_kinds() {
        let mut tracker = DependencyTracker::new();
        tracker.record(h(0), &writes(&[1]));
        tracker.record(h(1), &writes(&[2]));
        let both = tracker.record(h(2), &reads(&[1, 2]));
        assert_eq!(both.as_slice(), &[h(0), h(1)]);
    }

    #[test]
    fn structure_write_waits_for_every_reader() {
        let mut tracker = DependencyTracker::new();
        let mut ignored = WaitSet::new();
        tracker.record_access(h(0), Resource::Structure, AccessMode::Read, &mut ignored);
        tracker.record_access(h(1), Resource::Structure, AccessMode::Read, &mut ignored);

        let mut replay = WaitSet::new();
        tracker.record_access(h(2), Resource::Structure, AccessMode::Write, &mut replay);
        assert_eq!(replay.as_slice(), &[h(0), h(1)]);

        let mut after = WaitSet::new();
        tracker.record_access(h(3), Resource::Structure, AccessMode::Read, &mut after);
        assert_eq!(after.as_slice(), &[h(2)]);

        tracker.clear();
        assert!(tracker.record_of(Resource::Structure).is_none());
    }
}
