//! Job handles and wait sets.
//!
//! A [`JobHandle`] names one scheduled job: the scheduler that issued it, the
//! tick (epoch) it was issued in, and its index in that tick's job table.
//! Handles are ordered by issue order, which is what makes the job graph
//! acyclic by construction: a job can only wait on handles issued before it.
//!
//! A [`WaitSet`] is the sorted, duplicate-free set of handles a job must wait
//! for before it may start.

use crate::engine::types::Tick;

/// Identifier of a scheduled job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobHandle {
    context: u32,
    epoch: Tick,
    index: u32,
}

impl JobHandle {
    #[inline]
    pub(crate) const fn new(context: u32, epoch: Tick, index: u32) -> Self {
        Self { context, epoch, index }
    }

    /// Scheduler that issued this handle.
    #[inline] pub fn context(self) -> u32 { self.context }

    /// Tick in which this handle was issued.
    #[inline] pub fn epoch(self) -> Tick { self.epoch }

    /// Issue position within its tick.
    #[inline] pub fn index(self) -> u32 { self.index }

    #[inline]
    pub(crate) fn slot(self) -> usize { self.index as usize }
}

impl std::fmt::Display for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "job#{}@{}.{}", self.index, self.context, self.epoch)
    }
}

/// Sorted set of handles a job waits for.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct WaitSet {
    handles: Vec<JobHandle>,
}

impl WaitSet {
    /// Creates an empty wait set.
    pub fn new() -> Self { Self::default() }

    /// Adds `handle`, keeping the set sorted.
    pub fn insert(&mut self, handle: JobHandle) {
        if let Err(position) = self.handles.binary_search(&handle) {
            self.handles.insert(position, handle);
        }
    }

    /// Adds every handle of `handles`.
    pub fn extend<I: IntoIterator<Item = JobHandle>>(&mut self, handles: I) {
        for handle in handles {
            self.insert(handle);
        }
    }

    /// Returns `true` if `handle` is in the set.
    pub fn contains(&self, handle: JobHandle) -> bool { self.handles.binary_search(&handle).is_ok() }

    /// Handles in issue order.
    pub fn iter(&self) -> impl Iterator<Item = JobHandle> + '_ { self.handles.iter().copied() }

    /// Handles as a sorted slice.
    pub fn as_slice(&self) -> &[JobHandle] { &self.handles }

    /// Number of handles.
    pub fn len(&self) -> usize { self.handles.len() }

    /// Returns `true` if the job has nothing to wait for.
    pub fn is_empty(&self) -> bool { self.handles.is_empty() }

    /// Union of two wait sets.
    pub fn union(&self, other: &WaitSet) -> WaitSet {
        let mut out = self.clone();
        out.extend(other.iter());
        out
    }
}

impl FromIterator<JobHandle> for WaitSet {
    fn from_iter<I: IntoIterator<Item = JobHandle>>(iter: I) -> Self {
        let mut handles: Vec<JobHandle> = iter.into_iter().collect();
        handles.sort_unstable();
        handles.dedup();
        Self { handles }
    }
}
