//! Entity-component store.
//!
//! This module defines [`World`], the concrete store the scheduler runs jobs
//! against, and the [`ComponentStore`] contract the deferred mutation buffer
//! replays into.
//!
//! ## Layout
//!
//! One [`Attribute<T>`] column per registered component kind, indexed by
//! entity slot. Columns are created lazily the first time a value of their
//! kind is stored.
//!
//! ## Concurrency model
//!
//! The store is internally mutable and uses `UnsafeCell` so that jobs can
//! share a `&World` while writing component values. Safety is enforced by
//! *API discipline*, not the borrow checker:
//!
//! * Structural mutation goes through `&mut World`, or through replay jobs
//!   holding the structure write borrow.
//! * Jobs read and write component values only as their access descriptors
//!   allow, ordered by the dependency tracker and checked by the
//!   [`BorrowTracker`].
//! * No `&World` is reachable from user code while jobs run: a tick borrows
//!   the world mutably for its whole duration.

use std::cell::UnsafeCell;

use crate::engine::borrow::BorrowTracker;
use crate::engine::component::{check_value_type, component_id_of, registered_component_id, Component, ComponentValue};
use crate::engine::entity::{Entities, Entity};
use crate::engine::error::{CapacityError, ECSResult, LookupError, TypeMismatchError};
use crate::engine::query::Query;
use crate::engine::storage::{Attribute, TypeErasedAttribute};
use crate::engine::types::{build_signature, ComponentID, EntityCount, COMPONENT_CAP, UNREGISTERED_COMPONENT};

/// Structural operations a deferred mutation buffer replays into.
pub trait ComponentStore {
    /// Creates a new entity with no components.
    fn create_entity(&mut self) -> ECSResult<Entity>;

    /// Checks that `additional` entities can be created.
    ///
    /// ## Errors
    /// [`CapacityError`] if the allocator would run out of indices.
    fn check_capacity(&self, additional: usize) -> Result<(), CapacityError>;

    /// Destroys `entity` and drops its components; `false` if it was not alive.
    fn destroy_entity(&mut self, entity: Entity) -> bool;

    /// Returns `true` if `entity` exists.
    fn is_alive(&self, entity: Entity) -> bool;

    /// Returns `true` if `entity` is alive and has a `component_id` value.
    fn contains_component(&self, entity: Entity, component_id: ComponentID) -> bool;

    /// Sets a type-erased value on a live entity.
    ///
    /// ## Errors
    /// - [`LookupError::EntityNotFound`] if `entity` is not alive.
    /// - [`TypeMismatchError`] if `value` is not of the registered type.
    fn insert_value(&mut self, entity: Entity, component_id: ComponentID, value: Box<dyn ComponentValue>) -> ECSResult<()>;

    /// Removes a component; `false` if there was nothing to remove.
    fn remove_value(&mut self, entity: Entity, component_id: ComponentID) -> bool;
}

/// Store state behind the world's `UnsafeCell`.
#[derive(Default)]
pub(crate) struct WorldData {
    entities: Entities,
    columns: Vec<Option<Box<dyn TypeErasedAttribute>>>,
    generation: u64,
}

impl WorldData {
    #[inline]
    pub(crate) fn entities(&self) -> &Entities { &self.entities }

    #[inline]
    pub(crate) fn slot_count(&self) -> usize { self.entities.slot_count() }

    pub(crate) fn column<T: Component>(&self, component_id: ComponentID) -> Option<&Attribute<T>> {
        self.columns
            .get(component_id as usize)?
            .as_ref()?
            .as_any()
            .downcast_ref::<Attribute<T>>()
    }

    fn column_mut<T: Component>(&mut self, component_id: ComponentID) -> Result<&mut Attribute<T>, TypeMismatchError> {
        let index = component_id as usize;
        if self.columns.len() <= index {
            self.columns.resize_with(index + 1, || None);
        }
        let column = self.columns[index].get_or_insert_with(|| Box::new(Attribute::<T>::default()));
        let expected = column.element_type_name();
        column.as_any_mut().downcast_mut::<Attribute<T>>().ok_or(TypeMismatchError {
            component_id,
            expected,
            actual: std::any::type_name::<T>(),
        })
    }

    pub(crate) fn erased_column(&self, component_id: ComponentID) -> Option<&dyn TypeErasedAttribute> {
        self.columns.get(component_id as usize)?.as_deref()
    }

    /// Value of `entity`'s `T` component, with the reason when absent.
    pub(crate) fn locate<T: Component>(&self, component_id: ComponentID, entity: Entity) -> Result<&T, LookupError> {
        if !self.entities.is_alive(entity) {
            return Err(LookupError::EntityNotFound(entity));
        }
        self.column::<T>(component_id)
            .and_then(|column| column.get(entity.slot()))
            .ok_or(LookupError::KindNotPresent { entity, component_id })
    }

    fn bump(&mut self) { self.generation = self.generation.wrapping_add(1); }
}

impl ComponentStore for WorldData {
    fn create_entity(&mut self) -> ECSResult<Entity> {
        let entity = self.entities.spawn()?;
        self.bump();
        Ok(entity)
    }

    fn check_capacity(&self, additional: usize) -> Result<(), CapacityError> {
        self.entities.check_capacity(additional)
    }

    fn destroy_entity(&mut self, entity: Entity) -> bool {
        if !self.entities.despawn(entity) {
            return false;
        }
        for column in self.columns.iter_mut().flatten() {
            column.remove_slot(entity.slot());
        }
        self.bump();
        true
    }

    fn is_alive(&self, entity: Entity) -> bool { self.entities.is_alive(entity) }

    fn contains_component(&self, entity: Entity, component_id: ComponentID) -> bool {
        self.entities.is_alive(entity)
            && self.erased_column(component_id).is_some_and(|column| column.contains_slot(entity.slot()))
    }

    fn insert_value(&mut self, entity: Entity, component_id: ComponentID, value: Box<dyn ComponentValue>) -> ECSResult<()> {
        if !self.entities.is_alive(entity) {
            return Err(LookupError::EntityNotFound(entity).into());
        }
        let index = component_id as usize;
        if self.columns.len() <= index {
            self.columns.resize_with(index + 1, || None);
        }
        if self.columns[index].is_none() {
            check_value_type(component_id, &*value)?;
            self.columns[index] = Some(value.empty_column());
        }
        if let Some(column) = self.columns[index].as_mut() {
            column.insert_value(component_id, entity.slot(), value)?;
        }
        self.bump();
        Ok(())
    }

    fn remove_value(&mut self, entity: Entity, component_id: ComponentID) -> bool {
        if !self.entities.is_alive(entity) {
            return false;
        }
        let removed = self
            .columns
            .get_mut(component_id as usize)
            .and_then(|column| column.as_mut())
            .is_some_and(|column| column.remove_slot(entity.slot()));
        if removed {
            self.bump();
        }
        removed
    }
}

/// Entity-component store shared with running jobs.
pub struct World {
    data: UnsafeCell<WorldData>,
    borrows: BorrowTracker,
}

// SAFETY: shared access from jobs follows the discipline in the module docs;
// structural mutation through `&World` only happens in replay jobs holding the
// structure write borrow.
unsafe impl Sync for World {}

impl Default for World {
    fn default() -> Self { Self::new() }
}

impl World {
    /// Creates an empty world.
    pub fn new() -> Self {
        Self { data: UnsafeCell::new(WorldData::default()), borrows: BorrowTracker::new() }
    }

    #[inline]
    pub(crate) fn data_shared(&self) -> &WorldData {
        // SAFETY: exclusive access through `&World` only exists inside a
        // replay job, which no other holder of a shared view overlaps.
        unsafe { &*self.data.get() }
    }

    /// Exclusive view of the store through a shared reference.
    ///
    /// # Safety
    /// The caller must hold the structure write borrow in [`World::borrows`]
    /// and no reference obtained from [`World::data_shared`] may be live.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn data_exclusive(&self) -> &mut WorldData {
        unsafe { &mut *self.data.get() }
    }

    #[inline]
    fn data_mut(&mut self) -> &mut WorldData { self.data.get_mut() }

    #[inline]
    pub(crate) fn borrows(&self) -> &BorrowTracker { &self.borrows }

    /// Creates a new entity with no components.
    pub fn create_entity(&mut self) -> ECSResult<Entity> { self.data_mut().create_entity() }

    /// Destroys `entity`, dropping its components. Returns `false` if it was
    /// not alive.
    pub fn destroy_entity(&mut self, entity: Entity) -> bool { self.data_mut().destroy_entity(entity) }

    /// Returns `true` if `entity` exists.
    pub fn is_alive(&self, entity: Entity) -> bool { self.data_shared().entities.is_alive(entity) }

    /// Sets the `T` component of `entity`, returning the previous value.
    ///
    /// ## Errors
    /// [`LookupError::EntityNotFound`] if `entity` is not alive.
    pub fn set<T: Component>(&mut self, entity: Entity, value: T) -> ECSResult<Option<T>> {
        let component_id = component_id_of::<T>()?;
        let data = self.data_mut();
        if !data.entities.is_alive(entity) {
            return Err(LookupError::EntityNotFound(entity).into());
        }
        let previous = data.column_mut::<T>(component_id)?.insert(entity.slot(), value);
        data.bump();
        Ok(previous)
    }

    /// Removes and returns the `T` component of `entity`.
    pub fn remove<T: Component>(&mut self, entity: Entity) -> Option<T> {
        let component_id = registered_component_id::<T>()?;
        let data = self.data_mut();
        if !data.entities.is_alive(entity) {
            return None;
        }
        let removed = data.column_mut::<T>(component_id).ok()?.remove(entity.slot());
        if removed.is_some() {
            data.bump();
        }
        removed
    }

    /// The `T` component of `entity`, if it has one.
    pub fn get<T: Component>(&self, entity: Entity) -> Option<&T> { self.lookup::<T>(entity).ok() }

    /// Mutable access to the `T` component of `entity`.
    pub fn get_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        let component_id = registered_component_id::<T>()?;
        let data = self.data_mut();
        if !data.entities.is_alive(entity) {
            return None;
        }
        data.column_mut::<T>(component_id).ok()?.get_mut(entity.slot())
    }

    /// The `T` component of `entity`, or why it is absent.
    ///
    /// ## Errors
    /// - [`LookupError::EntityNotFound`] if `entity` is not alive.
    /// - [`LookupError::KindNotPresent`] if it has no `T` component. The id is
    ///   [`UNREGISTERED_COMPONENT`] when `T` could not be registered.
    pub fn lookup<T: Component>(&self, entity: Entity) -> Result<&T, LookupError> {
        let data = self.data_shared();
        match component_id_of::<T>() {
            Ok(component_id) => data.locate::<T>(component_id, entity),
            Err(_) if !data.entities.is_alive(entity) => Err(LookupError::EntityNotFound(entity)),
            Err(_) => Err(LookupError::KindNotPresent { entity, component_id: UNREGISTERED_COMPONENT }),
        }
    }

    /// Returns `true` if `entity` has a `T` component.
    pub fn has<T: Component>(&self, entity: Entity) -> bool {
        registered_component_id::<T>().is_some_and(|id| self.data_shared().contains_component(entity, id))
    }

    /// Entities having every kind in `component_ids`.
    ///
    /// The query borrows the world, so it sees a fixed snapshot and can be
    /// iterated any number of times. An id outside the registry's range
    /// matches nothing.
    pub fn query(&self, component_ids: &[ComponentID]) -> Query<'_> {
        if component_ids.iter().any(|&id| id as usize >= COMPONENT_CAP) {
            return Query::nothing(self.data_shared());
        }
        Query::new(self.data_shared(), build_signature(component_ids))
    }

    /// Every `(entity, &T)` pair, in slot order.
    pub fn query_read<T: Component>(&self) -> impl Iterator<Item = (Entity, &T)> + '_ {
        let data = self.data_shared();
        registered_component_id::<T>()
            .and_then(|component_id| data.column::<T>(component_id))
            .into_iter()
            .flat_map(move |column| {
                column
                    .iter()
                    .filter_map(move |(slot, value)| data.entities.entity_at(slot).map(|entity| (entity, value)))
            })
    }

    /// Live entities, in slot order.
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ { self.data_shared().entities.iter() }

    /// Number of live entities.
    pub fn entity_count(&self) -> EntityCount { self.data_shared().entities.live_count() }

    /// Number of entity slots ever allocated; jobs iterate `0..slot_count`.
    pub fn slot_count(&self) -> usize { self.data_shared().slot_count() }

    /// Counter bumped by every structural change.
    pub fn generation(&self) -> u64 { self.data_shared().generation }
}

impl ComponentStore for World {
    fn create_entity(&mut self) -> ECSResult<Entity> { self.data_mut().create_entity() }
    fn check_capacity(&self, additional: usize) -> Result<(), CapacityError> {
        self.data_shared().check_capacity(additional)
    }
    fn destroy_entity(&mut self, entity: Entity) -> bool { self.data_mut().destroy_entity(entity) }
    fn is_alive(&self, entity: Entity) -> bool { self.data_shared().is_alive(entity) }

    fn contains_component(&self, entity: Entity, component_id: ComponentID) -> bool {
        self.data_shared().contains_component(entity, component_id)
    }

    fn insert_value(&mut self, entity: Entity, component_id: ComponentID, value: Box<dyn ComponentValue>) -> ECSResult<()> {
        self.data_mut().insert_value(entity, component_id, value)
    }

    fn remove_value(&mut self, entity: Entity, component_id: ComponentID) -> bool {
        self.data_mut().remove_value(entity, component_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::error::{ECSError, StoreError};

    #[derive(Clone, Debug, PartialEq)]
    struct Mass(f32);

    #[derive(Clone, Debug, PartialEq)]
    struct Label(&'static str);

    #[test]
    fn set_get_remove_round_trip() {
        let mut world = World::new();
        let e = world.create_entity().unwrap();
        assert_eq!(world.set(e, Mass(1.0)).unwrap(), None);
        assert_eq!(world.set(e, Mass(2.0)).unwrap(), Some(Mass(1.0)));
        world.get_mut::<Mass>(e).unwrap().0 += 1.0;
        assert_eq!(world.get::<Mass>(e), Some(&Mass(3.0)));
        assert!(world.has::<Mass>(e));
        assert_eq!(world.remove::<Mass>(e), Some(Mass(3.0)));
        assert!(!world.has::<Mass>(e));
    }

    #[test]
    fn lookup_distinguishes_missing_entity_and_kind() {
        let mut world = World::new();
        let e = world.create_entity().unwrap();
        world.set(e, Mass(1.0)).unwrap();
        let ghost = Entity::new(999, 0);

        assert_eq!(world.lookup::<Mass>(ghost), Err(LookupError::EntityNotFound(ghost)));
        let label_id = component_id_of::<Label>().unwrap();
        assert_eq!(
            world.lookup::<Label>(e),
            Err(LookupError::KindNotPresent { entity: e, component_id: label_id })
        );
    }

    #[test]
    fn destroy_drops_components_and_stales_handle() {
        let mut world = World::new();
        let e = world.create_entity().unwrap();
        world.set(e, Mass(1.0)).unwrap();
        world.set(e, Label("a")).unwrap();
        assert!(world.destroy_entity(e));
        assert!(!world.destroy_entity(e));

        let reused = world.create_entity().unwrap();
        assert_eq!(reused.index(), e.index());
        assert_eq!(world.get::<Mass>(reused), None);
        assert_eq!(world.get::<Label>(reused), None);
        assert!(world.set(e, Mass(5.0)).is_err());
    }

    #[test]
    fn query_matches_entities_with_all_kinds_and_restarts() {
        let mut world = World::new();
        let both = world.create_entity().unwrap();
        let only_mass = world.create_entity().unwrap();
        world.set(both, Mass(1.0)).unwrap();
        world.set(both, Label("both")).unwrap();
        world.set(only_mass, Mass(2.0)).unwrap();

        let ids = [component_id_of::<Mass>().unwrap(), component_id_of::<Label>().unwrap()];
        let query = world.query(&ids);
        assert_eq!(query.iter().collect::<Vec<_>>(), vec![both]);
        assert_eq!(query.iter().count(), 1);

        let masses: Vec<f32> = world.query_read::<Mass>().map(|(_, m)| m.0).collect();
        assert_eq!(masses, vec![1.0, 2.0]);
    }

    #[test]
    fn out_of_range_ids_match_nothing() {
        let mut world = World::new();
        let e = world.create_entity().unwrap();
        world.set(e, Mass(1.0)).unwrap();
        let mass_id = component_id_of::<Mass>().unwrap();

        assert_eq!(world.query(&[COMPONENT_CAP as ComponentID]).count(), 0);
        assert_eq!(world.query(&[mass_id, 300]).count(), 0);
        assert!(!world.query(&[UNREGISTERED_COMPONENT]).contains(e));
        assert_eq!(world.query(&[mass_id]).count(), 1);
    }

    #[test]
    fn unregistered_sentinel_names_no_kind() {
        assert!(UNREGISTERED_COMPONENT as usize >= COMPONENT_CAP);
        assert_eq!(crate::engine::component::component_description(UNREGISTERED_COMPONENT), None);
    }

    #[test]
    fn type_erased_insert_rejects_wrong_type() {
        let mut world = World::new();
        let e = world.create_entity().unwrap();
        let mass_id = component_id_of::<Mass>().unwrap();
        let err = world.insert_value(e, mass_id, Box::new(Label("x"))).unwrap_err();
        assert!(matches!(err, ECSError::Store(StoreError::TypeMismatch(_))));
        assert!(!world.contains_component(e, mass_id));

        world.insert_value(e, mass_id, Box::new(Mass(4.0))).unwrap();
        assert!(world.contains_component(e, mass_id));
    }

    #[test]
    fn generation_counts_structural_changes() {
        let mut world = World::new();
        let start = world.generation();
        let e = world.create_entity().unwrap();
        world.set(e, Mass(1.0)).unwrap();
        world.destroy_entity(e);
        assert_eq!(world.generation(), start + 3);
    }
}
