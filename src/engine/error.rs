//! Error types for access control, scheduling, execution and storage.
//!
//! Each error type models one family of failures and carries enough context
//! (component ids and names, job names, handles) to be actionable in logs.
//! All of them convert into the aggregate [`ECSError`] so orchestration code
//! can use `?` throughout and still return a single type.
//!
//! ## Propagation
//! * [`AccessError::Conflict`], [`AccessError::UnknownKind`] and the
//!   [`ScheduleError`] variants are raised synchronously by descriptor
//!   construction and schedule calls; they leave
//!   tracker and job graph state untouched.
//! * [`AccessError::Violation`] and [`ExecutionError`] variants are raised
//!   inside a running job and fail that job only.
//! * [`LookupError`] is the non-fatal "absent" result of a random lookup.
//!
//! Every type here is `Clone`: a job's outcome is stored once and may be
//! observed both by the coordinator waiting on it and by the tick report.

use thiserror::Error;

use crate::engine::entity::Entity;
use crate::engine::handle::JobHandle;
use crate::engine::types::{AccessMode, ComponentID, Locality};
use crate::engine::borrow::Resource;

/// Result alias used across the crate.
pub type ECSResult<T> = Result<T, ECSError>;

/// Declared access does not permit the requested use of a component kind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    /// A descriptor declared the same kind both `Read` and `Write`.
    #[error("component {name} ({component_id}) declared both read and write; declare write only")]
    Conflict {
        /// Offending component.
        component_id: ComponentID,
        /// Registered component name.
        name: &'static str,
    },

    /// A descriptor named a component id outside the registry's range.
    #[error("component id {component_id} is out of range (capacity {capacity})")]
    UnknownKind {
        /// Offending component id.
        component_id: ComponentID,
        /// Registry capacity.
        capacity: usize,
    },

    /// A job used a kind in a way its descriptor does not declare.
    #[error("access violation on component {name} ({component_id}): {mode}/{locality} access not declared")]
    Violation {
        /// Offending component.
        component_id: ComponentID,
        /// Registered component name.
        name: &'static str,
        /// Requested access mode.
        mode: AccessMode,
        /// Requested locality.
        locality: Locality,
    },

    /// A random access targeted a kind already borrowed by the running iteration.
    #[error("component {name} ({component_id}) is already borrowed by the current iteration")]
    Aliased {
        /// Offending component.
        component_id: ComponentID,
        /// Registered component name.
        name: &'static str,
    },
}

/// A schedule call referenced a job handle it may not depend on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    /// The handle was not issued strictly before the job being scheduled.
    #[error("cyclic dependency: {handle} was not issued before the dependent job")]
    CyclicDependency {
        /// Offending handle.
        handle: JobHandle,
    },

    /// The handle belongs to a tick that has already completed.
    #[error("stale job handle {handle}: its tick has already completed")]
    StaleHandle {
        /// Offending handle.
        handle: JobHandle,
    },

    /// The handle was issued by a different scheduler.
    #[error("job handle {handle} was issued by another scheduler")]
    ForeignHandle {
        /// Offending handle.
        handle: JobHandle,
    },
}

/// Failures raised while a job runs or while the worker pool is managed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    /// A resource was still borrowed when a job started.
    ///
    /// With a correctly recorded dependency graph this never happens; it is
    /// reported instead of allowing a data race.
    #[error("{resource} is already borrowed in a conflicting mode")]
    BorrowConflict {
        /// Contended resource.
        resource: Resource,
    },

    /// A job returned an error.
    #[error("job `{job}` ({handle}) failed: {source}")]
    JobFailed {
        /// Job name.
        job: String,
        /// Job handle.
        handle: JobHandle,
        /// Underlying failure.
        source: Box<ECSError>,
    },

    /// A job body panicked.
    #[error("job `{job}` panicked: {message}")]
    JobPanicked {
        /// Job name.
        job: String,
        /// Panic payload, when it was a string.
        message: String,
    },

    /// The worker pool could not be built.
    #[error("failed to build worker pool: {0}")]
    ThreadPool(String),
}

/// Absent result of a component lookup. Non-fatal by design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LookupError {
    /// The entity does not exist or was destroyed.
    #[error("entity {0} not found")]
    EntityNotFound(Entity),

    /// The entity exists but has no component of the requested kind.
    #[error("entity {entity} has no component {component_id}")]
    KindNotPresent {
        /// Entity that was looked up.
        entity: Entity,
        /// Requested component kind.
        component_id: ComponentID,
    },
}

/// Returned when the entity allocator has no index left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("entity limit reached ({entities_needed} needed; capacity {capacity})")]
pub struct CapacityError {
    /// Total entities the operation attempted to allocate.
    pub entities_needed: u64,
    /// Current capacity limiting the operation.
    pub capacity: u64,
}

/// Returned when a value is written into a column of a different type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("type mismatch for component {component_id}: column stores {expected}, value is {actual}")]
pub struct TypeMismatchError {
    /// Component column addressed.
    pub component_id: ComponentID,
    /// Column element type.
    pub expected: &'static str,
    /// Provided value type.
    pub actual: &'static str,
}

/// Structural store failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Entity allocation failed.
    #[error(transparent)]
    Capacity(#[from] CapacityError),

    /// A value did not match its column type.
    #[error(transparent)]
    TypeMismatch(#[from] TypeMismatchError),
}

/// Component registry failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// More than `COMPONENT_CAP` component types were registered.
    #[error("component capacity exceeded while registering {name} (capacity {capacity})")]
    CapacityExceeded {
        /// Type that could not be registered.
        name: &'static str,
        /// Configured capacity.
        capacity: usize,
    },
}

/// Configuration loading failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The configuration text could not be parsed.
    #[error("failed to parse scheduler configuration: {0}")]
    Parse(String),

    /// A field holds a value the scheduler cannot use.
    #[error("invalid scheduler configuration: {0}")]
    Invalid(&'static str),
}

/// Aggregate error for the crate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ECSError {
    /// Access declaration or use failed.
    #[error(transparent)]
    Access(#[from] AccessError),

    /// A schedule call was rejected.
    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    /// A job or the worker pool failed.
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// A required entity or component was absent.
    #[error(transparent)]
    Lookup(#[from] LookupError),

    /// A structural store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The component registry rejected a type.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Configuration was invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<CapacityError> for ECSError {
    fn from(e: CapacityError) -> Self { ECSError::Store(StoreError::Capacity(e)) }
}

impl From<TypeMismatchError> for ECSError {
    fn from(e: TypeMismatchError) -> Self { ECSError::Store(StoreError::TypeMismatch(e)) }
}
