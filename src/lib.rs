//! # ecs-jobs
//!
//! Access-checked job scheduling over an entity-component store.
//!
//! ## Design Goals
//! - Jobs declare, per component kind, whether they read or write and
//!   whether they touch only the iterated entity or any entity
//! - Conflicting jobs are ordered by a readers/writer dependency tracker;
//!   disjoint jobs run in parallel on a rayon pool
//! - Every data access is checked against the declaration before it runs
//! - Structural changes are recorded in deferred command buffers and applied
//!   by replay jobs at synchronization points
//!
//! ## Example
//!
//! ```rust
//! use ecs_jobs::prelude::*;
//!
//! #[derive(Clone)]
//! struct Position(f32);
//! #[derive(Clone)]
//! struct Velocity(f32);
//!
//! let mut world = World::new();
//! let e = world.create_entity().unwrap();
//! world.set(e, Position(0.0)).unwrap();
//! world.set(e, Velocity(2.0)).unwrap();
//!
//! let mut scheduler = Scheduler::new(SchedulerConfig::default()).unwrap();
//! scheduler.add_system(FnSystem::new("integrate", |ctx| {
//!     let access = AccessDescriptor::builder().read::<Velocity>().write::<Position>().build()?;
//!     ctx.schedule(
//!         Job::new("integrate", access, |chunk| {
//!             let dt = chunk.time().delta as f32;
//!             chunk.for_each_read_write::<Velocity, Position, _>(|_, v, p| {
//!                 p.0 += v.0 * dt;
//!                 Ok(())
//!             })
//!         }),
//!         &[],
//!     )?;
//!     Ok(())
//! }));
//!
//! scheduler.run(&mut world, 0.5).unwrap();
//! assert_eq!(world.get::<Position>(e).map(|p| p.0), Some(1.0));
//! ```

#![forbid(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![allow(clippy::module_inception)]

pub mod engine;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports (Public API)
// ─────────────────────────────────────────────────────────────────────────────

// Store

pub use engine::world::{
    World,
    ComponentStore,
};

pub use engine::entity::{
    Entity,
    Entities,
};

pub use engine::component::{
    Component,
    ComponentValue,
    ComponentDesc,
    register_component,
    component_id_of,
    registered_component_id,
    component_description,
    component_name,
    check_value_type,
};

pub use engine::query::Query;

// Access and scheduling

pub use engine::access::{
    AccessDescriptor,
    AccessDescriptorBuilder,
    KindAccess,
};

pub use engine::borrow::{
    BorrowGuard,
    BorrowTracker,
    Resource,
};

pub use engine::dependency::{
    DependencyRecord,
    DependencyTracker,
};

pub use engine::handle::{
    JobHandle,
    WaitSet,
};

pub use engine::job::{
    Chunk,
    ExecutionMode,
    ExecutionRequest,
    Job,
    Row,
};

pub use engine::context::SchedulerContext;

pub use engine::scheduler::{
    JobSummary,
    Scheduler,
    TickReport,
};

pub use engine::systems::{
    FnSystem,
    System,
};

pub use engine::config::{
    SchedulerConfig,
    DEFAULT_CHUNK_SIZE,
};

// Deferred commands

pub use engine::commands::{
    Command,
    CommandBuffer,
    EntityRef,
    PendingEntity,
    ReplayReport,
};

pub use engine::error::{
    ECSResult,
    ECSError,
    AccessError,
    ScheduleError,
    ExecutionError,
    LookupError,
    CapacityError,
    TypeMismatchError,
    StoreError,
    RegistryError,
    ConfigError,
};

pub use engine::types::{
    AccessMode,
    ComponentID,
    EntityID,
    Locality,
    Signature,
    Tick,
    TickTime,
    COMPONENT_CAP,
    UNREGISTERED_COMPONENT,
};

// ─────────────────────────────────────────────────────────────────────────────
// Prelude
// ─────────────────────────────────────────────────────────────────────────────

/// Commonly used types.
///
/// Import with:
/// ```rust
/// use ecs_jobs::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        AccessDescriptor,
        Chunk,
        CommandBuffer,
        ECSError,
        ECSResult,
        Entity,
        FnSystem,
        Job,
        JobHandle,
        LookupError,
        Row,
        Scheduler,
        SchedulerConfig,
        SchedulerContext,
        System,
        TickTime,
        World,
    };
}
