//! Slot-indexed attribute storage and type-erased access for component columns.
//!
//! This module implements [`Attribute<T>`], the column that stores every value
//! of one component kind, and [`TypeErasedAttribute`], the dynamically-typed
//! interface the store uses to keep heterogeneous columns side by side.
//!
//! # Storage model
//!
//! A column is indexed by entity slot:
//!
//! ```text
//! slots: Vec<Option<UnsafeCell<T>>>
//! ```
//!
//! `slots[i]` holds the value of the entity occupying slot `i`, if it has one.
//! Presence lives outside the cell, so it can be tested through a shared
//! reference while other threads mutate the values of other slots.
//!
//! # Shared mutation
//!
//! Jobs run against a shared `&World`. Writes to a component value go through
//! the slot's `UnsafeCell` ([`Attribute::slot_mut_unchecked`]). Soundness rests
//! on the scheduling discipline:
//!
//! - a column is written by at most one job at a time (dependency tracking,
//!   verified by the borrow tracker when the job starts),
//! - within a parallel job, each chunk only touches the slots of its own range,
//! - presence (`Some` / `None`) only changes through `&mut self`, i.e. through
//!   replay under the structure write borrow or outside a tick.
//!
//! # Type erasure
//!
//! [`TypeErasedAttribute`] exposes the element `TypeId`, `as_any` downcasting
//! hooks and the structural operations the deferred mutation buffer needs
//! (`insert_value`, `remove_slot`) without knowing `T`.

use std::{
    any::{type_name, Any, TypeId},
    cell::UnsafeCell,
};

use crate::engine::component::{Component, ComponentValue};
use crate::engine::error::TypeMismatchError;
use crate::engine::types::ComponentID;

/// Column of component values indexed by entity slot.
pub struct Attribute<T> {
    slots: Vec<Option<UnsafeCell<T>>>,
    length: usize,
}

// SAFETY: shared access to a slot's value is either a read or a write
// serialized by the scheduler's access discipline (see module docs). Presence
// is only changed through `&mut self`.
unsafe impl<T: Send + Sync> Sync for Attribute<T> {}

impl<T> Default for Attribute<T> {
    fn default() -> Self {
        Self { slots: Vec::new(), length: 0 }
    }
}

impl<T> Attribute<T> {
    /// Number of slots currently holding a value.
    #[inline]
    pub fn len(&self) -> usize { self.length }

    /// Returns `true` if no slot holds a value.
    #[inline]
    pub fn is_empty(&self) -> bool { self.length == 0 }

    /// Returns `true` if `slot` holds a value.
    #[inline]
    pub fn contains(&self, slot: usize) -> bool {
        matches!(self.slots.get(slot), Some(Some(_)))
    }

    /// Stores `value` at `slot`, returning the previous value if any.
    pub fn insert(&mut self, slot: usize, value: T) -> Option<T> {
        if slot >= self.slots.len() {
            self.slots.resize_with(slot + 1, || None);
        }
        let previous = self.slots[slot].replace(UnsafeCell::new(value));
        if previous.is_none() {
            self.length += 1;
        }
        previous.map(UnsafeCell::into_inner)
    }

    /// Removes and returns the value at `slot`.
    pub fn remove(&mut self, slot: usize) -> Option<T> {
        let previous = self.slots.get_mut(slot)?.take();
        if previous.is_some() {
            self.length -= 1;
        }
        previous.map(UnsafeCell::into_inner)
    }

    /// Returns the value at `slot` through exclusive access.
    #[inline]
    pub fn get_mut(&mut self, slot: usize) -> Option<&mut T> {
        self.slots.get_mut(slot)?.as_mut().map(UnsafeCell::get_mut)
    }

    /// Returns the value at `slot`.
    #[inline]
    pub fn get(&self, slot: usize) -> Option<&T> {
        match self.slots.get(slot) {
            // SAFETY: `slot_mut_unchecked` callers guarantee no other reference
            // to this value is live while their `&mut T` exists.
            Some(Some(cell)) => Some(unsafe { &*cell.get() }),
            _ => None,
        }
    }

    /// Returns a mutable reference to the value at `slot` through a shared
    /// reference to the column.
    ///
    /// # Safety
    /// No other reference to the value at `slot` (including ones obtained
    /// from [`Attribute::get`]) may be live for the lifetime of the returned
    /// reference.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn slot_mut_unchecked(&self, slot: usize) -> Option<&mut T> {
        match self.slots.get(slot) {
            // SAFETY: exclusivity is guaranteed by the caller.
            Some(Some(cell)) => Some(unsafe { &mut *cell.get() }),
            _ => None,
        }
    }

    /// Iterates `(slot, &value)` over occupied slots, in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        (0..self.slots.len()).filter_map(move |slot| self.get(slot).map(|value| (slot, value)))
    }

    /// Drops every stored value.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.length = 0;
    }
}

/// Dynamically-typed interface over an [`Attribute<T>`].
pub trait TypeErasedAttribute: Any + Send + Sync {
    /// Returns an immutable `&dyn Any` reference to this attribute.
    fn as_any(&self) -> &dyn Any;

    /// Returns a mutable `&mut dyn Any` reference to this attribute.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// `TypeId` of the element type.
    fn element_type_id(&self) -> TypeId;

    /// Human-readable element type name.
    fn element_type_name(&self) -> &'static str;

    /// Number of occupied slots.
    fn length(&self) -> usize;

    /// Returns `true` if `slot` holds a value.
    fn contains_slot(&self, slot: usize) -> bool;

    /// Removes the value at `slot`, returning whether one was present.
    fn remove_slot(&mut self, slot: usize) -> bool;

    /// Stores a type-erased value at `slot`, replacing any previous value.
    ///
    /// ## Errors
    /// [`TypeMismatchError`] if the value's type differs from the element type.
    fn insert_value(
        &mut self,
        component_id: ComponentID,
        slot: usize,
        value: Box<dyn ComponentValue>,
    ) -> Result<(), TypeMismatchError>;
}

impl<T: Component> TypeErasedAttribute for Attribute<T> {
    fn as_any(&self) -> &dyn Any { self }
    fn as_any_mut(&mut self) -> &mut dyn Any { self }

    fn element_type_id(&self) -> TypeId { TypeId::of::<T>() }
    fn element_type_name(&self) -> &'static str { type_name::<T>() }

    fn length(&self) -> usize { self.length }
    fn contains_slot(&self, slot: usize) -> bool { self.contains(slot) }
    fn remove_slot(&mut self, slot: usize) -> bool { self.remove(slot).is_some() }

    fn insert_value(
        &mut self,
        component_id: ComponentID,
        slot: usize,
        value: Box<dyn ComponentValue>,
    ) -> Result<(), TypeMismatchError> {
        let actual = value.value_type_name();
        let value = value.into_any().downcast::<T>().map_err(|_| TypeMismatchError {
            component_id,
            expected: type_name::<T>(),
            actual,
        })?;
        self.insert(slot, *value);
        Ok(())
    }
}
