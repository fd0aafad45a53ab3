//! # Access Descriptors
//!
//! An [`AccessDescriptor`] is the contract a job signs before it is scheduled:
//! for every component kind it touches, the [`AccessMode`] (read or write) and
//! the [`Locality`] (only the iterated entity, or any entity by identity).
//!
//! ## Purpose
//! The descriptor drives three decisions:
//! - the dependency tracker derives the job's wait set from it,
//! - the scheduler picks an execution mode from it (a random write forbids
//!   parallel chunks),
//! - the running job checks every data access against it.
//!
//! ## Invariants
//! - A kind appears at most once, with exactly one mode.
//! - Declaring a kind both `Read` and `Write` is rejected at build time.
//! - Entries are sorted by `ComponentID`.
//! - A descriptor is immutable once built.

use crate::engine::borrow::Resource;
use crate::engine::component::{component_id_of, component_name, Component};
use crate::engine::error::{AccessError, ECSError, ECSResult};
use crate::engine::types::{AccessMode, ComponentID, Locality, Signature, COMPONENT_CAP};

/// Declared access to one component kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct KindAccess {
    /// Read or write.
    pub mode: AccessMode,
    /// Iterated entity only, or any entity.
    pub locality: Locality,
}

/// Immutable mapping from component kind to declared access.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccessDescriptor {
    entries: Vec<(ComponentID, KindAccess)>,
    reads: Signature,
    writes: Signature,
    random: Signature,
}

impl AccessDescriptor {
    /// Starts a new descriptor.
    pub fn builder() -> AccessDescriptorBuilder { AccessDescriptorBuilder::default() }

    /// Descriptor touching no component kind.
    pub fn empty() -> Self { Self::default() }

    /// Declared access for `component_id`, if any.
    pub fn get(&self, component_id: ComponentID) -> Option<KindAccess> {
        self.entries
            .binary_search_by_key(&component_id, |(id, _)| *id)
            .ok()
            .map(|index| self.entries[index].1)
    }

    /// Declared entries, in ascending `ComponentID` order.
    pub fn iter(&self) -> impl Iterator<Item = (ComponentID, KindAccess)> + '_ {
        self.entries.iter().copied()
    }

    /// Number of declared kinds.
    pub fn len(&self) -> usize { self.entries.len() }

    /// Returns `true` if no kind is declared.
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Kinds declared `Read`.
    pub fn reads(&self) -> &Signature { &self.reads }

    /// Kinds declared `Write`.
    pub fn writes(&self) -> &Signature { &self.writes }

    /// Kinds declared `Random`, in either mode.
    pub fn random(&self) -> &Signature { &self.random }

    /// Returns `true` if some kind is written with `Random` locality.
    ///
    /// Such a job may write any entity's value, so its chunks cannot run in
    /// parallel.
    pub fn requires_sequential(&self) -> bool { self.writes.intersects(&self.random) }

    /// Returns `true` if two jobs with these descriptors must be ordered.
    pub fn conflicts_with(&self, other: &AccessDescriptor) -> bool {
        self.writes.intersects(&other.reads)
            || self.writes.intersects(&other.writes)
            || self.reads.intersects(&other.writes)
    }

    /// Borrow set of a job with this descriptor: `(reads, writes)`.
    pub(crate) fn resources(&self) -> (Vec<Resource>, Vec<Resource>) {
        let reads = self.reads.iterate_over_components().map(Resource::Component).collect();
        let writes = self.writes.iterate_over_components().map(Resource::Component).collect();
        (reads, writes)
    }

    /// Checks that `component_id` may be read for the iterated entity.
    pub fn check_iterate_read(&self, component_id: ComponentID) -> Result<(), AccessError> {
        match self.get(component_id) {
            Some(_) => Ok(()),
            None => Err(violation(component_id, AccessMode::Read, Locality::Direct)),
        }
    }

    /// Checks that `component_id` may be written for the iterated entity.
    pub fn check_iterate_write(&self, component_id: ComponentID) -> Result<(), AccessError> {
        match self.get(component_id) {
            Some(KindAccess { mode: AccessMode::Write, .. }) => Ok(()),
            _ => Err(violation(component_id, AccessMode::Write, Locality::Direct)),
        }
    }

    /// Checks that `component_id` may be read on any entity.
    pub fn check_lookup(&self, component_id: ComponentID) -> Result<(), AccessError> {
        match self.get(component_id) {
            Some(KindAccess { locality: Locality::Random, .. }) => Ok(()),
            _ => Err(violation(component_id, AccessMode::Read, Locality::Random)),
        }
    }

    /// Checks that `component_id` may be written on any entity.
    pub fn check_modify(&self, component_id: ComponentID) -> Result<(), AccessError> {
        match self.get(component_id) {
            Some(KindAccess { mode: AccessMode::Write, locality: Locality::Random }) => Ok(()),
            _ => Err(violation(component_id, AccessMode::Write, Locality::Random)),
        }
    }
}

fn violation(component_id: ComponentID, mode: AccessMode, locality: Locality) -> AccessError {
    AccessError::Violation { component_id, name: component_name(component_id), mode, locality }
}

/// Builder for [`AccessDescriptor`].
///
/// Typed declarations register their component type on first use; a
/// registry failure is held and reported by [`AccessDescriptorBuilder::build`].
#[derive(Default)]
pub struct AccessDescriptorBuilder {
    requests: Vec<(ComponentID, AccessMode, Locality)>,
    error: Option<ECSError>,
}

impl AccessDescriptorBuilder {
    fn typed<T: Component>(mut self, mode: AccessMode, locality: Locality) -> Self {
        match component_id_of::<T>() {
            Ok(component_id) => self.requests.push((component_id, mode, locality)),
            Err(e) => {
                self.error.get_or_insert(e.into());
            }
        }
        self
    }

    /// Declares `T` as `Read` / `Direct`.
    pub fn read<T: Component>(self) -> Self { self.typed::<T>(AccessMode::Read, Locality::Direct) }

    /// Declares `T` as `Read` / `Random`.
    pub fn read_random<T: Component>(self) -> Self { self.typed::<T>(AccessMode::Read, Locality::Random) }

    /// Declares `T` as `Write` / `Direct`.
    pub fn write<T: Component>(self) -> Self { self.typed::<T>(AccessMode::Write, Locality::Direct) }

    /// Declares `T` as `Write` / `Random`.
    pub fn write_random<T: Component>(self) -> Self { self.typed::<T>(AccessMode::Write, Locality::Random) }

    /// Declares a read of `component_id` with the given locality.
    pub fn read_id(mut self, component_id: ComponentID, locality: Locality) -> Self {
        self.requests.push((component_id, AccessMode::Read, locality));
        self
    }

    /// Declares a write of `component_id` with the given locality.
    pub fn write_id(mut self, component_id: ComponentID, locality: Locality) -> Self {
        self.requests.push((component_id, AccessMode::Write, locality));
        self
    }

    /// Finalizes the descriptor.
    ///
    /// Repeating a kind with the same mode merges the declarations, with
    /// `Random` taking precedence over `Direct`.
    ///
    /// ## Errors
    /// - [`AccessError::UnknownKind`] if an id is not below `COMPONENT_CAP`.
    /// - [`AccessError::Conflict`] if a kind is declared both `Read` and `Write`.
    /// - A registry error held from a typed declaration.
    pub fn build(self) -> ECSResult<AccessDescriptor> {
        if let Some(e) = self.error {
            return Err(e);
        }
        if let Some(&(component_id, _, _)) = self.requests.iter().find(|(id, _, _)| *id as usize >= COMPONENT_CAP) {
            return Err(AccessError::UnknownKind { component_id, capacity: COMPONENT_CAP }.into());
        }

        let mut requests = self.requests;
        requests.sort_by_key(|(component_id, _, _)| *component_id);

        let mut descriptor = AccessDescriptor::default();
        for (component_id, mode, locality) in requests {
            if let Some((last_id, access)) = descriptor.entries.last_mut() {
                if *last_id == component_id {
                    if access.mode != mode {
                        return Err(AccessError::Conflict { component_id, name: component_name(component_id) }.into());
                    }
                    access.locality = access.locality.max(locality);
                    continue;
                }
            }
            descriptor.entries.push((component_id, KindAccess { mode, locality }));
        }

        for &(component_id, access) in &descriptor.entries {
            match access.mode {
                AccessMode::Read => descriptor.reads.set(component_id),
                AccessMode::Write => descriptor.writes.set(component_id),
            }
            if access.locality == Locality::Random {
                descriptor.random.set(component_id);
            }
        }
        Ok(descriptor)
    }
}
