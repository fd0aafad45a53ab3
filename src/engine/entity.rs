//! Entity handles and the slot allocator.
//!
//! An [`Entity`] packs a slot index and a version into one `u64`. The
//! [`Entities`] allocator hands out indices, recycles freed ones and bumps
//! their version so stale handles never alias a new occupant.

use crate::engine::error::CapacityError;
use crate::engine::types::{EntityCount, EntityID, IndexID, VersionID, INDEX_BITS, INDEX_CAP, INDEX_MASK};

/// Stable entity handle: a slot index and a version packed into a `u64`.
///
/// The version makes handles of destroyed entities stale: once an index is
/// reused, the new occupant carries a higher version.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Entity(pub EntityID);

#[inline]
const fn make_id(index: IndexID, version: VersionID) -> EntityID {
    ((version as EntityID) << INDEX_BITS) | (index as EntityID)
}

impl Entity {
    /// Packs `index` and `version` into a handle.
    #[inline]
    pub const fn new(index: IndexID, version: VersionID) -> Self { Entity(make_id(index, version)) }

    /// Slot index of the entity.
    #[inline] pub fn index(self) -> IndexID { (self.0 & INDEX_MASK) as IndexID }

    /// Version of the slot when this handle was issued.
    #[inline] pub fn version(self) -> VersionID { (self.0 >> INDEX_BITS) as VersionID }

    /// Index as a column position.
    #[inline] pub fn slot(self) -> usize { self.index() as usize }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "E{}v{}", self.index(), self.version())
    }
}

/// Entity allocator.
///
/// Fresh indices are handed out sequentially; freed indices are reused last
/// in, first out, with their version bumped on release.
#[derive(Default, Clone, Debug)]
pub struct Entities {
    versions: Vec<VersionID>,
    free_store: Vec<IndexID>,
    alive: Vec<bool>,
    live: EntityCount,
}

impl Entities {
    /// Creates an empty allocator.
    pub fn new() -> Self { Self::default() }

    /// Allocates an entity, reusing the most recently freed index first.
    ///
    /// ## Errors
    /// [`CapacityError`] once every index is in use.
    pub fn spawn(&mut self) -> Result<Entity, CapacityError> {
        let index = match self.free_store.pop() {
            Some(index) => index,
            None => {
                let next = self.versions.len() as EntityID;
                let capacity = INDEX_CAP as EntityID + 1;
                if next + 1 > capacity {
                    return Err(CapacityError { entities_needed: next + 1, capacity });
                }
                self.versions.push(0);
                self.alive.push(false);
                next as IndexID
            }
        };

        let slot = index as usize;
        self.alive[slot] = true;
        self.live += 1;
        Ok(Entity::new(index, self.versions[slot]))
    }

    /// Checks that `additional` more entities can be spawned.
    ///
    /// ## Errors
    /// [`CapacityError`] if the fresh indices needed would exceed the cap.
    pub fn check_capacity(&self, additional: usize) -> Result<(), CapacityError> {
        let fresh = additional.saturating_sub(self.free_store.len()) as EntityID;
        let needed = (self.versions.len() as EntityID).saturating_add(fresh);
        let capacity = INDEX_CAP as EntityID + 1;
        if needed > capacity {
            return Err(CapacityError { entities_needed: needed, capacity });
        }
        Ok(())
    }

    /// Frees `entity`; `false` if it was not alive.
    pub fn despawn(&mut self, entity: Entity) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        let slot = entity.slot();
        self.versions[slot] = self.versions[slot].wrapping_add(1);
        self.alive[slot] = false;
        self.free_store.push(entity.index());
        self.live -= 1;
        true
    }

    /// Returns `true` if `entity` is live and its version is current.
    pub fn is_alive(&self, entity: Entity) -> bool {
        let slot = entity.slot();
        self.alive.get(slot).copied().unwrap_or(false) && self.versions[slot] == entity.version()
    }

    /// Live entity occupying `slot`, if any.
    pub fn entity_at(&self, slot: usize) -> Option<Entity> {
        if self.alive.get(slot).copied().unwrap_or(false) {
            Some(Entity::new(slot as IndexID, self.versions[slot]))
        } else {
            None
        }
    }

    /// Number of slots ever allocated; iteration ranges cover `0..slot_count`.
    #[inline] pub fn slot_count(&self) -> usize { self.versions.len() }

    /// Number of live entities.
    #[inline] pub fn live_count(&self) -> EntityCount { self.live }

    /// Live entities in slot order.
    pub fn iter(&self) -> impl Iterator<Item = Entity> + '_ {
        (0..self.slot_count()).filter_map(move |slot| self.entity_at(slot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packing_round_trips_index_and_version() {
        let e = Entity::new(42, 7);
        assert_eq!(e.index(), 42);
        assert_eq!(e.version(), 7);
        assert_eq!(e.to_string(), "E42v7");
    }

    #[test]
    fn fresh_indices_are_sequential() {
        let mut entities = Entities::new();
        let a = entities.spawn().unwrap();
        let b = entities.spawn().unwrap();
        assert_eq!((a.index(), b.index()), (0, 1));
        assert_eq!(entities.live_count(), 2);
        assert_eq!(entities.slot_count(), 2);
    }

    #[test]
    fn despawn_makes_handle_stale_and_reuses_index() {
        let mut entities = Entities::new();
        let a = entities.spawn().unwrap();
        let _b = entities.spawn().unwrap();
        assert!(entities.despawn(a));
        assert!(!entities.is_alive(a));
        assert!(!entities.despawn(a));

        let c = entities.spawn().unwrap();
        assert_eq!(c.index(), a.index());
        assert_eq!(c.version(), a.version() + 1);
        assert!(entities.is_alive(c));
        assert!(!entities.is_alive(a));
        assert_eq!(entities.entity_at(a.slot()), Some(c));
    }

    #[test]
    fn capacity_counts_free_indices_first() {
        let mut entities = Entities::new();
        let a = entities.spawn().unwrap();
        entities.despawn(a);
        assert!(entities.check_capacity(1).is_ok());
        assert!(entities.check_capacity(1_000).is_ok());

        let err = entities.check_capacity(usize::MAX).unwrap_err();
        assert_eq!(err.capacity, INDEX_CAP as EntityID + 1);
        assert!(err.entities_needed > err.capacity);
    }

    #[test]
    fn unknown_slots_are_not_alive() {
        let entities = Entities::new();
        assert!(!entities.is_alive(Entity::new(999, 0)));
        assert_eq!(entities.entity_at(3), None);
        assert_eq!(entities.iter().count(), 0);
    }
}
