//! ECS job scheduling and tick execution.
//!
//! This module is responsible for:
//! * owning the worker pool and the registered systems,
//! * choosing how each job runs from its declared access,
//! * driving one tick: `setup`, then `update` on every system, then draining
//!   every job the tick scheduled.
//!
//! ## Scheduling model
//!
//! Jobs are ordered per resource by a readers/writer discipline recorded in
//! the [`SchedulerContext`]; jobs touching disjoint kinds run concurrently.
//! Each job runs in one of three modes:
//!
//! | mode | chosen when | runs |
//! |------|-------------|------|
//! | `Parallel` | `Auto` request, no `Write` + `Random` kind | chunks of `chunk_size` slots on any worker |
//! | `Sequential` | `Single` request, or a `Write` + `Random` kind | one chunk on one worker |
//! | `Inline` | `Inline` request | one chunk on the coordinating thread |
//!
//! ## Structural synchronization
//!
//! Deferred commands are applied only by replay jobs, which hold the
//! structure resource exclusively. A tick does not return until every job it
//! scheduled has finished.

use std::sync::atomic::{AtomicU32, Ordering};

use tracing::debug_span;

use crate::engine::access::AccessDescriptor;
use crate::engine::commands::ReplayReport;
use crate::engine::config::SchedulerConfig;
use crate::engine::context::SchedulerContext;
use crate::engine::error::{ECSError, ECSResult, ExecutionError};
use crate::engine::handle::{JobHandle, WaitSet};
use crate::engine::job::{ExecutionMode, ExecutionRequest};
use crate::engine::systems::System;
use crate::engine::types::{Tick, TickTime};
use crate::engine::world::World;

static NEXT_SCHEDULER_ID: AtomicU32 = AtomicU32::new(0);

/// Final state of one job of a tick.
#[derive(Clone, Debug, PartialEq)]
pub struct JobSummary {
    /// Handle the job was issued.
    pub handle: JobHandle,
    /// Job name (`"replay"` for replay jobs).
    pub name: String,
    /// Mode the job ran in.
    pub mode: ExecutionMode,
    /// Outcome of the job.
    pub outcome: Result<(), ECSError>,
    /// Handles the job waited for.
    pub wait: WaitSet,
    /// What a replay job applied.
    pub replay: Option<ReplayReport>,
}

/// Every job a tick ran, in issue order.
#[derive(Clone, Debug, PartialEq)]
pub struct TickReport {
    /// Tick number.
    pub tick: Tick,
    /// Per-job summaries.
    pub jobs: Vec<JobSummary>,
}

impl TickReport {
    /// Jobs that failed.
    pub fn failed(&self) -> impl Iterator<Item = &JobSummary> {
        self.jobs.iter().filter(|job| job.outcome.is_err())
    }
}

/// Owns the worker pool and the systems, and runs ticks.
pub struct Scheduler {
    id: u32,
    pool: rayon::ThreadPool,
    config: SchedulerConfig,
    systems: Vec<Box<dyn System>>,
    tick: Tick,
    elapsed: f64,
}

impl Scheduler {
    /// Builds a scheduler and its worker pool.
    ///
    /// ## Errors
    /// [`ConfigError`](crate::engine::error::ConfigError) for an invalid
    /// configuration, [`ExecutionError::ThreadPool`] if the pool cannot start.
    pub fn new(config: SchedulerConfig) -> ECSResult<Self> {
        config.validate()?;

        let thread_name = config.thread_name.clone();
        let mut builder = rayon::ThreadPoolBuilder::new().thread_name(move |i| format!("{thread_name}-{i}"));
        if config.worker_threads > 0 {
            builder = builder.num_threads(config.worker_threads);
        }
        let pool = builder.build().map_err(|e| ExecutionError::ThreadPool(e.to_string()))?;

        let id = NEXT_SCHEDULER_ID.fetch_add(1, Ordering::Relaxed);
        Ok(Self { id, pool, config, systems: Vec::new(), tick: 0, elapsed: 0.0 })
    }

    /// Appends a system; systems update in registration order.
    pub fn add_system(&mut self, system: impl System + 'static) {
        self.systems.push(Box::new(system));
    }

    /// Active configuration.
    pub fn config(&self) -> &SchedulerConfig { &self.config }

    /// Number of ticks run so far.
    pub fn tick(&self) -> Tick { self.tick }

    /// Worker threads in the pool.
    pub fn worker_threads(&self) -> usize { self.pool.current_num_threads() }

    /// Chooses how a job with `descriptor` runs for `request`.
    ///
    /// A `Write` + `Random` kind never runs in parallel.
    pub fn select_mode(descriptor: &AccessDescriptor, request: ExecutionRequest) -> ExecutionMode {
        match request {
            ExecutionRequest::Inline => ExecutionMode::Inline,
            ExecutionRequest::Single => ExecutionMode::Sequential,
            ExecutionRequest::Auto if descriptor.requires_sequential() => ExecutionMode::Sequential,
            ExecutionRequest::Auto => ExecutionMode::Parallel,
        }
    }

    /// Runs one tick over the registered systems.
    ///
    /// ## Errors
    /// The first error returned by a system's `update`, or
    /// [`ExecutionError::JobFailed`] for the first job that failed. Either
    /// way every scheduled job has finished before this returns.
    pub fn run(&mut self, world: &mut World, delta: f64) -> ECSResult<TickReport> {
        let mut systems = std::mem::take(&mut self.systems);
        for system in systems.iter_mut() {
            system.setup(world);
        }
        let result = self.tick_with(world, delta, |ctx| {
            for system in systems.iter_mut() {
                let _span = debug_span!("system", name = system.name()).entered();
                system.update(ctx)?;
            }
            Ok(())
        });
        self.systems = systems;
        result
    }

    /// Runs one tick driven by `drive` instead of the registered systems.
    ///
    /// ## Errors
    /// As for [`Scheduler::run`].
    pub fn run_with<F>(&mut self, world: &mut World, delta: f64, drive: F) -> ECSResult<TickReport>
    where
        F: FnOnce(&mut SchedulerContext<'_, '_>) -> ECSResult<()> + Send,
    {
        self.tick_with(world, delta, drive)
    }

    fn tick_with<F>(&mut self, world: &mut World, delta: f64, drive: F) -> ECSResult<TickReport>
    where
        F: FnOnce(&mut SchedulerContext<'_, '_>) -> ECSResult<()> + Send,
    {
        self.tick += 1;
        let tick = self.tick;
        self.elapsed += delta;
        let time = TickTime { tick, delta, elapsed: self.elapsed };

        let span = debug_span!("tick", tick, scheduler = self.id);
        let world: &World = world;
        let (chunk_size, id) = (self.config.chunk_size, self.id);

        // `drive` runs on a pool thread, so the span is entered there.
        let (driven, report) = self.pool.scope(|scope| {
            let _entered = span.enter();
            let mut ctx = SchedulerContext::new(scope, world, chunk_size, id, tick, time);
            let driven = drive(&mut ctx);
            (driven, ctx.into_report(tick))
        });

        driven?;
        let failure = report.failed().find_map(|job| {
            job.outcome.as_ref().err().map(|error| ExecutionError::JobFailed {
                job: job.name.clone(),
                handle: job.handle,
                source: Box::new(error.clone()),
            })
        });
        match failure {
            Some(error) => Err(error.into()),
            None => Ok(report),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::job::Job;

    #[derive(Clone)]
    struct Pos(f32);
    #[derive(Clone)]
    struct Vel(f32);

    #[test]
    fn write_random_never_runs_in_parallel() {
        let random_write = AccessDescriptor::builder().read::<Vel>().write_random::<Pos>().build().unwrap();
        let direct = AccessDescriptor::builder().read::<Vel>().write::<Pos>().build().unwrap();

        assert_eq!(Scheduler::select_mode(&random_write, ExecutionRequest::Auto), ExecutionMode::Sequential);
        assert_eq!(Scheduler::select_mode(&random_write, ExecutionRequest::Inline), ExecutionMode::Inline);
        assert_eq!(Scheduler::select_mode(&direct, ExecutionRequest::Auto), ExecutionMode::Parallel);
        assert_eq!(Scheduler::select_mode(&direct, ExecutionRequest::Single), ExecutionMode::Sequential);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let err = Scheduler::new(SchedulerConfig::default().with_chunk_size(0)).err();
        assert!(matches!(err, Some(ECSError::Config(_))));
    }

    #[test]
    fn tick_counter_and_time_advance() {
        let mut scheduler = Scheduler::new(SchedulerConfig::default().with_worker_threads(1)).unwrap();
        let mut world = World::new();
        scheduler.run_with(&mut world, 0.5, |ctx| {
            assert_eq!(ctx.time().tick, 1);
            Ok(())
        })
        .unwrap();
        let report = scheduler
            .run_with(&mut world, 0.25, |ctx| {
                assert_eq!(ctx.time().elapsed, 0.75);
                ctx.schedule(Job::new("noop", AccessDescriptor::empty(), |_| Ok(())), &[]).map(|_| ())
            })
            .unwrap();
        assert_eq!(scheduler.tick(), 2);
        assert_eq!(report.tick, 2);
        assert_eq!(report.jobs.len(), 1);
        assert_eq!(report.jobs[0].mode, ExecutionMode::Parallel);
        assert_eq!(scheduler.worker_threads(), 1);
    }

    #[test]
    fn drive_error_is_returned_after_jobs_drain() {
        let mut scheduler = Scheduler::new(SchedulerConfig::default().with_worker_threads(2)).unwrap();
        let mut world = World::new();
        let result = scheduler.run_with(&mut world, 1.0, |ctx| {
            ctx.schedule(Job::new("noop", AccessDescriptor::empty(), |_| Ok(())), &[])?;
            AccessDescriptor::builder().read::<Pos>().write::<Pos>().build().map(|_| ())
        });
        assert!(matches!(result, Err(ECSError::Access(_))));
        assert!(world.borrows().is_idle());
    }
}
