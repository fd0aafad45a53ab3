//! ECS System Abstractions
//!
//! A **system** is the per-tick unit of simulation logic. It does not touch
//! component data itself: during `update` it schedules jobs through the
//! [`SchedulerContext`], declaring the access each job needs, and the
//! scheduler decides when and where those jobs run.
//!
//! ## Tick protocol
//!
//! For every tick, [`Scheduler::run`](crate::engine::scheduler::Scheduler::run):
//!
//! 1. calls [`System::setup`] on every system, in registration order, with
//!    shared access to the world (no jobs are running),
//! 2. calls [`System::update`] on every system, in registration order, on the
//!    coordinating thread,
//! 3. waits for every job the tick scheduled.
//!
//! Jobs scheduled by earlier systems are ordered before conflicting jobs of
//! later systems, so registration order is also data-flow order.
//!
//! ## Function-backed Systems
//!
//! [`FnSystem`] wraps closures so simple systems need no dedicated type.

use crate::engine::context::SchedulerContext;
use crate::engine::error::ECSResult;
use crate::engine::world::World;

/// A unit of per-tick logic.
///
/// Systems must be `Send`: the coordinating thread is one of the pool's
/// workers.
pub trait System: Send {
    /// Human-readable name, used in logs.
    fn name(&self) -> &str;

    /// Inspects the world before any job of the tick runs.
    fn setup(&mut self, _world: &World) {}

    /// Schedules this system's jobs for the tick.
    fn update(&mut self, ctx: &mut SchedulerContext<'_, '_>) -> ECSResult<()>;
}

type SetupFn = Box<dyn FnMut(&World) + Send>;
type UpdateFn = Box<dyn FnMut(&mut SchedulerContext<'_, '_>) -> ECSResult<()> + Send>;

/// A [`System`] backed by closures.
pub struct FnSystem {
    name: String,
    setup: Option<SetupFn>,
    update: UpdateFn,
}

impl FnSystem {
    /// Creates a system whose `update` is `update`.
    pub fn new<U>(name: impl Into<String>, update: U) -> Self
    where
        U: FnMut(&mut SchedulerContext<'_, '_>) -> ECSResult<()> + Send + 'static,
    {
        Self { name: name.into(), setup: None, update: Box::new(update) }
    }

    /// Adds a `setup` step.
    #[must_use]
    pub fn with_setup<S>(mut self, setup: S) -> Self
    where
        S: FnMut(&World) + Send + 'static,
    {
        self.setup = Some(Box::new(setup));
        self
    }
}

impl System for FnSystem {
    fn name(&self) -> &str { &self.name }

    fn setup(&mut self, world: &World) {
        if let Some(setup) = self.setup.as_mut() {
            setup(world);
        }
    }

    fn update(&mut self, ctx: &mut SchedulerContext<'_, '_>) -> ECSResult<()> {
        (self.update)(ctx)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::engine::access::AccessDescriptor;
    use crate::engine::config::SchedulerConfig;
    use crate::engine::job::Job;
    use crate::engine::scheduler::Scheduler;

    #[derive(Clone, Debug, PartialEq)]
    struct Counter(u32);

    #[test]
    fn setup_sees_world_before_updates_run() {
        let mut world = World::new();
        let e = world.create_entity().unwrap();
        world.set(e, Counter(0)).unwrap();

        let observed = Arc::new(AtomicUsize::new(usize::MAX));
        let seen = Arc::clone(&observed);
        let system = FnSystem::new("increment", |ctx| {
            let access = AccessDescriptor::builder().write::<Counter>().build()?;
            ctx.schedule(
                Job::new("increment", access, |chunk| {
                    chunk.for_each_write::<Counter, _>(|_, counter| {
                        counter.0 += 1;
                        Ok(())
                    })
                }),
                &[],
            )?;
            Ok(())
        })
        .with_setup(move |world| {
            let value = world.get::<Counter>(e).map_or(0, |c| c.0 as usize);
            seen.store(value, Ordering::SeqCst);
        });

        let mut scheduler = Scheduler::new(SchedulerConfig::default().with_worker_threads(2)).unwrap();
        scheduler.add_system(system);
        scheduler.run(&mut world, 1.0).unwrap();
        assert_eq!(observed.load(Ordering::SeqCst), 0);
        scheduler.run(&mut world, 1.0).unwrap();
        assert_eq!(observed.load(Ordering::SeqCst), 1);
        assert_eq!(world.get::<Counter>(e), Some(&Counter(2)));
    }

    #[test]
    fn update_error_aborts_the_tick() {
        let mut scheduler = Scheduler::new(SchedulerConfig::default().with_worker_threads(1)).unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&runs);
        scheduler.add_system(FnSystem::new("broken", |_| {
            AccessDescriptor::builder().read::<Counter>().write::<Counter>().build().map(|_| ())
        }));
        scheduler.add_system(FnSystem::new("after", move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        assert!(scheduler.run(&mut World::new(), 1.0).is_err());
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.tick(), 1);
    }
}
