//! # Component Registry
//!
//! This module provides a global registry that assigns stable `ComponentID`
//! values to Rust component types, together with the type-erased value the
//! store and the deferred mutation buffer rely on.
//!
//! ## Purpose
//! Access descriptors, the dependency tracker and the borrow tracker all
//! speak in compact `ComponentID`s. The registry is the single
//! registration-time mapping `TypeId -> ComponentID`, so no string or hash
//! lookup of type names ever happens on the hot path.
//!
//! ## Design
//! - Components are registered once and assigned a compact `ComponentID` in
//!   `[0, COMPONENT_CAP)`, sequentially in registration order.
//! - Values travel through deferred buffers as `Box<dyn ComponentValue>`; a
//!   value knows how to build the empty column it belongs in.
//!
//! ## Invariants
//! - `ComponentID` values are unique and stable for the lifetime of the process.
//! - Every registered id has a descriptor whose `type_id` is the Rust type.
//!
//! ## Concurrency
//! The registry sits behind a `parking_lot::RwLock`: lookups take the read
//! lock, registration takes the write lock. Jobs resolve their ids when their
//! descriptors are built, never while iterating.

use std::{
    any::{type_name, Any, TypeId},
    collections::HashMap,
    mem::{align_of, size_of},
    sync::OnceLock,
};

use parking_lot::RwLock;

use crate::engine::error::{RegistryError, TypeMismatchError};
use crate::engine::storage::{Attribute, TypeErasedAttribute};
use crate::engine::types::{ComponentID, COMPONENT_CAP};

/// Marker for types that can be stored as components.
///
/// Implemented for every `Send + Sync + Clone + 'static` type. `Clone` is
/// what lets a deferred buffer be cloned and replayed into several stores.
pub trait Component: Send + Sync + Clone + 'static {}

impl<T: Send + Sync + Clone + 'static> Component for T {}

/// A component value with its type erased.
///
/// Deferred `SetComponent` records own one of these; the store downcasts it
/// back into the concrete column when the record is replayed.
pub trait ComponentValue: Send + Sync {
    /// Clones the value behind the box.
    fn clone_value(&self) -> Box<dyn ComponentValue>;

    /// Converts the box into `Any` so the store can downcast it.
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;

    /// `TypeId` of the concrete value.
    fn value_type_id(&self) -> TypeId;

    /// Rust type name of the concrete value.
    fn value_type_name(&self) -> &'static str;

    /// Empty column able to store values of this type.
    fn empty_column(&self) -> Box<dyn TypeErasedAttribute>;
}

impl<T: Component> ComponentValue for T {
    fn clone_value(&self) -> Box<dyn ComponentValue> { Box::new(self.clone()) }
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> { self }
    fn value_type_id(&self) -> TypeId { TypeId::of::<T>() }
    fn value_type_name(&self) -> &'static str { type_name::<T>() }
    fn empty_column(&self) -> Box<dyn TypeErasedAttribute> { Box::new(Attribute::<T>::default()) }
}

impl std::fmt::Debug for dyn ComponentValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ComponentValue<{}>", self.value_type_name())
    }
}

/// Describes a registered component type.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ComponentDesc {
    /// Runtime identifier assigned to this component type.
    pub component_id: ComponentID,

    /// Rust type name for diagnostics.
    pub name: &'static str,

    /// Runtime `TypeId` of the component.
    pub type_id: TypeId,

    /// Size of the component type in bytes.
    pub size: usize,

    /// Alignment of the component type in bytes.
    pub align: usize,
}

impl ComponentDesc {
    /// Constructs a descriptor for type `T` with the given id.
    #[inline]
    pub fn of<T: 'static>(component_id: ComponentID) -> Self {
        Self {
            component_id,
            name: type_name::<T>(),
            type_id: TypeId::of::<T>(),
            size: size_of::<T>(),
            align: align_of::<T>(),
        }
    }

    /// Returns `true` if this descriptor refers to type `T`.
    #[inline]
    pub fn matches_type<T: 'static>(&self) -> bool { self.type_id == TypeId::of::<T>() }
}

impl std::fmt::Display for ComponentDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ComponentDesc {{ id: {}, name: {}, size: {}, align: {} }}",
            self.component_id, self.name, self.size, self.align
        )
    }
}

/// Global mapping between Rust component types and compact `ComponentID` values.
///
/// ## Invariants
/// - Every entry in `by_type` has a matching `by_id[id]`.
/// - `next_id <= COMPONENT_CAP`.
struct ComponentRegistry {
    next_id: usize,
    by_type: HashMap<TypeId, ComponentID>,
    by_id: Vec<Option<ComponentDesc>>,
}

static REGISTRY: OnceLock<RwLock<ComponentRegistry>> = OnceLock::new();

fn component_registry() -> &'static RwLock<ComponentRegistry> {
    REGISTRY.get_or_init(|| {
        RwLock::new(ComponentRegistry {
            next_id: 0,
            by_type: HashMap::new(),
            by_id: vec![None; COMPONENT_CAP],
        })
    })
}

impl ComponentRegistry {
    /// Registers `T`, returning the existing id if it is already registered.
    fn register<T: Component>(&mut self) -> Result<ComponentID, RegistryError> {
        let type_id = TypeId::of::<T>();
        if let Some(&existing) = self.by_type.get(&type_id) {
            return Ok(existing);
        }
        if self.next_id >= COMPONENT_CAP {
            return Err(RegistryError::CapacityExceeded {
                name: type_name::<T>(),
                capacity: COMPONENT_CAP,
            });
        }

        let id = self.next_id as ComponentID;
        self.next_id += 1;
        self.by_type.insert(type_id, id);
        self.by_id[id as usize] = Some(ComponentDesc::of::<T>(id));
        Ok(id)
    }

    /// Returns the `ComponentID` associated with a `TypeId`, if registered.
    fn component_id_of_type_id(&self, type_id: TypeId) -> Option<ComponentID> {
        self.by_type.get(&type_id).copied()
    }

    /// Returns the descriptor for a `ComponentID`, if registered.
    fn description(&self, component_id: ComponentID) -> Option<&ComponentDesc> {
        self.by_id.get(component_id as usize).and_then(|o| o.as_ref())
    }
}

/// Registers component type `T` in the global registry and returns its id.
///
/// Registering the same type twice returns the same id.
///
/// ## Errors
/// [`RegistryError::CapacityExceeded`] once `COMPONENT_CAP` types exist.
pub fn register_component<T: Component>() -> Result<ComponentID, RegistryError> {
    if let Some(id) = registered_component_id::<T>() {
        return Ok(id);
    }
    component_registry().write().register::<T>()
}

/// Returns the id of `T`, registering it on first use.
#[inline]
pub fn component_id_of<T: Component>() -> Result<ComponentID, RegistryError> {
    register_component::<T>()
}

/// Returns the id of `T` if it has already been registered.
pub fn registered_component_id<T: 'static>() -> Option<ComponentID> {
    component_registry().read().component_id_of_type_id(TypeId::of::<T>())
}

/// Returns a copy of the descriptor for `component_id`, if registered.
pub fn component_description(component_id: ComponentID) -> Option<ComponentDesc> {
    component_registry().read().description(component_id).copied()
}

/// Returns the registered type name for `component_id`, for diagnostics.
pub fn component_name(component_id: ComponentID) -> &'static str {
    component_description(component_id)
        .map(|desc| desc.name)
        .unwrap_or("<unregistered>")
}

/// Checks that `value` is of the type registered for `component_id`.
///
/// ## Errors
/// [`TypeMismatchError`] if the types differ or `component_id` is not
/// registered.
pub fn check_value_type(component_id: ComponentID, value: &dyn ComponentValue) -> Result<(), TypeMismatchError> {
    match component_description(component_id) {
        Some(desc) if desc.type_id == value.value_type_id() => Ok(()),
        registered => Err(TypeMismatchError {
            component_id,
            expected: registered.map(|desc| desc.name).unwrap_or("<unregistered>"),
            actual: value.value_type_name(),
        }),
    }
}
