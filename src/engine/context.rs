//! # Scheduler Context
//!
//! Per-tick scheduling state: the dependency tracker, the epoch-tagged job
//! table and the continuation-based dispatcher.
//!
//! ## Purpose
//!
//! A [`SchedulerContext`] exists for the duration of one tick. The
//! coordinating thread issues every schedule call through it; workers only
//! run jobs and release their dependants.
//!
//! ## Design
//!
//! - Each scheduled job gets one entry in the job table and a [`JobHandle`]
//!   naming that entry. Handles carry the scheduler id and tick epoch, so a
//!   handle from another scheduler or an earlier tick is rejected.
//! - A job is spawned on the worker pool only when its last dependency
//!   completes: every job keeps a list of pending launches waiting on it, and
//!   each launch counts its outstanding dependencies. No worker ever blocks
//!   on a handle.
//! - Inline jobs wait for their dependencies on the coordinating thread,
//!   helping the pool run queued work meanwhile.
//!
//! ## Invariants
//!
//! - Every job reads [`Resource::Structure`]; replay jobs write it. A replay
//!   therefore runs alone with exclusive access to the store.
//! - A failed job still completes and releases its dependants. Its deferred
//!   buffer is discarded.
//! - A job's outcome, once stored, never changes.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::engine::borrow::{BorrowGuard, Resource};
use crate::engine::commands::{CommandBuffer, ReplayReport};
use crate::engine::dependency::DependencyTracker;
use crate::engine::error::{ECSError, ECSResult, ExecutionError, ScheduleError};
use crate::engine::handle::{JobHandle, WaitSet};
use crate::engine::job::{execute, ExecutionMode, Job};
use crate::engine::scheduler::{JobSummary, Scheduler, TickReport};
use crate::engine::types::{AccessMode, Tick, TickTime};
use crate::engine::world::World;

type Launch<'scope> = Box<dyn FnOnce(&rayon::Scope<'scope>) + Send + 'scope>;

/// A job body waiting for its dependencies.
struct PendingLaunch<'scope> {
    remaining: AtomicUsize,
    launch: Mutex<Option<Launch<'scope>>>,
}

impl<'scope> PendingLaunch<'scope> {
    fn new(launch: Launch<'scope>) -> Self {
        // Starts at one so the launch cannot fire while dependencies are
        // still being registered.
        Self { remaining: AtomicUsize::new(1), launch: Mutex::new(Some(launch)) }
    }

    fn release(&self, scope: &rayon::Scope<'scope>) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            if let Some(launch) = self.launch.lock().take() {
                scope.spawn(move |s| launch(s));
            }
        }
    }
}

#[derive(Default)]
struct JobSlot<'scope> {
    finished: bool,
    outcome: Option<Result<(), ECSError>>,
    output: Option<CommandBuffer>,
    replay: Option<ReplayReport>,
    dependents: Vec<Arc<PendingLaunch<'scope>>>,
}

/// One entry of the job table.
struct JobState<'scope> {
    name: String,
    handle: JobHandle,
    mode: ExecutionMode,
    wait: WaitSet,
    done: AtomicBool,
    inner: Mutex<JobSlot<'scope>>,
}

impl<'scope> JobState<'scope> {
    fn new(name: String, handle: JobHandle, mode: ExecutionMode, wait: WaitSet) -> Self {
        Self { name, handle, mode, wait, done: AtomicBool::new(false), inner: Mutex::new(JobSlot::default()) }
    }

    #[inline]
    fn is_done(&self) -> bool { self.done.load(Ordering::Acquire) }

    /// Registers `pending` to be released when this job finishes.
    ///
    /// Returns `false` if the job has already finished.
    fn add_dependent(&self, pending: &Arc<PendingLaunch<'scope>>) -> bool {
        let mut slot = self.inner.lock();
        if slot.finished {
            return false;
        }
        pending.remaining.fetch_add(1, Ordering::AcqRel);
        slot.dependents.push(Arc::clone(pending));
        true
    }

    fn finish(
        &self,
        scope: &rayon::Scope<'scope>,
        outcome: Result<(), ECSError>,
        output: Option<CommandBuffer>,
        replay: Option<ReplayReport>,
    ) {
        if let Err(error) = &outcome {
            warn!(job = %self.name, handle = %self.handle, %error, "job failed");
        }
        let dependents = {
            let mut slot = self.inner.lock();
            slot.finished = true;
            slot.outcome = Some(outcome);
            slot.output = output;
            slot.replay = replay;
            std::mem::take(&mut slot.dependents)
        };
        self.done.store(true, Ordering::Release);
        for pending in dependents {
            pending.release(scope);
        }
    }

    fn outcome(&self) -> Result<(), ECSError> {
        self.inner.lock().outcome.clone().unwrap_or(Ok(()))
    }

    fn summary(&self) -> JobSummary {
        let slot = self.inner.lock();
        JobSummary {
            handle: self.handle,
            name: self.name.clone(),
            mode: self.mode,
            outcome: slot.outcome.clone().unwrap_or(Ok(())),
            wait: self.wait.clone(),
            replay: slot.replay.clone(),
        }
    }
}

/// Blocks until `state` is done, running queued pool work meanwhile.
fn help_until_done(state: &JobState<'_>) {
    while !state.is_done() {
        match rayon::yield_now() {
            Some(rayon::Yield::Executed) => {}
            _ => std::thread::yield_now(),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Runs `job` under its borrow guard and returns its outcome and buffer.
fn run_job(
    world: &World,
    job: &Job,
    mode: ExecutionMode,
    time: TickTime,
    chunk_size: usize,
) -> (Result<(), ECSError>, Option<CommandBuffer>) {
    let (mut reads, writes) = job.access().resources();
    reads.push(Resource::Structure);

    let result = catch_unwind(AssertUnwindSafe(|| -> ECSResult<CommandBuffer> {
        let _guard = BorrowGuard::new(world.borrows(), &reads, &writes)?;
        execute(job, mode, world.data_shared(), time, chunk_size)
    }));

    match result {
        Ok(Ok(buffer)) => (Ok(()), Some(buffer)),
        Ok(Err(error)) => (Err(error), None),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            (Err(ExecutionError::JobPanicked { job: job.name().to_string(), message }.into()), None)
        }
    }
}

/// Replays the buffers of `producers`, in order, with exclusive store access.
///
/// The buffers are joined and replayed as one, so either all of them are
/// applied or the store is left untouched.
fn run_replay(world: &World, producers: &[Arc<JobState<'_>>]) -> ECSResult<ReplayReport> {
    let _guard = BorrowGuard::new(world.borrows(), &[], &[Resource::Structure])?;

    let mut combined = CommandBuffer::new();
    for producer in producers {
        let (failed, output) = {
            let mut slot = producer.inner.lock();
            (matches!(slot.outcome, Some(Err(_))), slot.output.take())
        };
        match output {
            Some(buffer) => combined.append(buffer),
            None if failed => {
                warn!(job = %producer.name, handle = %producer.handle, "discarding deferred buffer of failed job");
            }
            None => debug!(job = %producer.name, handle = %producer.handle, "deferred buffer already replayed"),
        }
    }

    // SAFETY: the structure write borrow is held, so no other job is running,
    // and the coordinating thread holds no reference into the store.
    let data = unsafe { world.data_exclusive() };
    combined.replay(data)
}

/// Scheduling state for one tick.
///
/// Obtained from [`Scheduler::run`] (through [`System::update`]) or
/// [`Scheduler::run_with`]; it cannot outlive the tick.
///
/// [`System::update`]: crate::engine::systems::System::update
pub struct SchedulerContext<'a, 'scope> {
    scope: &'a rayon::Scope<'scope>,
    world: &'scope World,
    chunk_size: usize,
    context_id: u32,
    epoch: Tick,
    time: TickTime,
    tracker: DependencyTracker,
    jobs: Vec<Arc<JobState<'scope>>>,
}

impl<'a, 'scope> SchedulerContext<'a, 'scope> {
    pub(crate) fn new(
        scope: &'a rayon::Scope<'scope>,
        world: &'scope World,
        chunk_size: usize,
        context_id: u32,
        epoch: Tick,
        time: TickTime,
    ) -> Self {
        Self { scope, world, chunk_size, context_id, epoch, time, tracker: DependencyTracker::new(), jobs: Vec::new() }
    }

    /// Time context of the tick.
    pub fn time(&self) -> TickTime { self.time }

    /// Dependency records of the jobs scheduled so far.
    pub fn tracker(&self) -> &DependencyTracker { &self.tracker }

    /// Number of jobs scheduled this tick.
    pub fn job_count(&self) -> usize { self.jobs.len() }

    fn validate(&self, handle: JobHandle) -> Result<&Arc<JobState<'scope>>, ScheduleError> {
        if handle.context() != self.context_id {
            return Err(ScheduleError::ForeignHandle { handle });
        }
        if handle.epoch() != self.epoch {
            return Err(ScheduleError::StaleHandle { handle });
        }
        self.jobs.get(handle.slot()).ok_or(ScheduleError::CyclicDependency { handle })
    }

    fn validate_all(&self, handles: &[JobHandle]) -> Result<(), ScheduleError> {
        handles.iter().try_for_each(|&handle| self.validate(handle).map(|_| ()))
    }

    fn next_handle(&self) -> JobHandle {
        JobHandle::new(self.context_id, self.epoch, self.jobs.len() as u32)
    }

    /// Schedules `job` after everything it conflicts with and after `after`.
    ///
    /// The job runs once every handle in its wait set has completed. Inline
    /// jobs have already run when this returns.
    ///
    /// ## Errors
    /// [`ScheduleError`] if a handle in `after` is foreign, stale or not
    /// issued before this job. Nothing is recorded in that case.
    pub fn schedule(&mut self, job: Job, after: &[JobHandle]) -> ECSResult<JobHandle> {
        self.validate_all(after)?;

        let handle = self.next_handle();
        let mut wait = self.tracker.record(handle, job.access());
        self.tracker.record_access(handle, Resource::Structure, AccessMode::Read, &mut wait);
        wait.extend(after.iter().copied());

        let mode = Scheduler::select_mode(job.access(), job.request());
        let state = Arc::new(JobState::new(job.name().to_string(), handle, mode, wait));
        self.jobs.push(Arc::clone(&state));
        debug!(job = job.name(), %handle, %mode, waits = state.wait.len(), "scheduled job");

        if mode == ExecutionMode::Inline {
            for dependency in state.wait.iter() {
                help_until_done(&self.jobs[dependency.slot()]);
            }
            let (outcome, output) = run_job(self.world, &job, mode, self.time, self.chunk_size);
            state.finish(self.scope, outcome, output, None);
            return Ok(handle);
        }

        let world = self.world;
        let time = self.time;
        let chunk_size = self.chunk_size;
        let task_state = Arc::clone(&state);
        let launch: Launch<'scope> = Box::new(move |scope: &rayon::Scope<'scope>| {
            let (outcome, output) = run_job(world, &job, mode, time, chunk_size);
            task_state.finish(scope, outcome, output, None);
        });
        self.dispatch(&state, launch);
        Ok(handle)
    }

    /// Schedules a replay of the deferred buffers of `producers`, in order.
    ///
    /// The replay waits for every job scheduled before it and every job
    /// scheduled after it waits for the replay. A producer's buffer is
    /// consumed by the first replay that lists it. Buffers of failed
    /// producers are discarded.
    ///
    /// ## Errors
    /// As for [`SchedulerContext::schedule`].
    pub fn schedule_replay(&mut self, producers: &[JobHandle]) -> ECSResult<JobHandle> {
        self.validate_all(producers)?;
        let producer_states: Vec<Arc<JobState<'scope>>> =
            producers.iter().map(|handle| Arc::clone(&self.jobs[handle.slot()])).collect();

        let handle = self.next_handle();
        let mut wait = WaitSet::new();
        self.tracker.record_access(handle, Resource::Structure, AccessMode::Write, &mut wait);
        wait.extend(producers.iter().copied());

        let mode = ExecutionMode::Sequential;
        let state = Arc::new(JobState::new("replay".to_string(), handle, mode, wait));
        self.jobs.push(Arc::clone(&state));
        debug!(%handle, producers = producers.len(), waits = state.wait.len(), "scheduled replay");

        let world = self.world;
        let task_state = Arc::clone(&state);
        let launch: Launch<'scope> = Box::new(move |scope: &rayon::Scope<'scope>| {
            let result = catch_unwind(AssertUnwindSafe(|| run_replay(world, &producer_states)));
            match result {
                Ok(Ok(report)) => {
                    debug!(handle = %task_state.handle, applied = report.applied, skipped = report.skipped,
                        created = report.created.len(), "replayed deferred buffers");
                    task_state.finish(scope, Ok(()), None, Some(report));
                }
                Ok(Err(error)) => task_state.finish(scope, Err(error), None, None),
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    let error = ExecutionError::JobPanicked { job: task_state.name.clone(), message };
                    task_state.finish(scope, Err(error.into()), None, None);
                }
            }
        });
        self.dispatch(&state, launch);
        Ok(handle)
    }

    /// Spawns `launch` once every job in `state`'s wait set has finished.
    fn dispatch(&self, state: &JobState<'scope>, launch: Launch<'scope>) {
        let pending = Arc::new(PendingLaunch::new(launch));
        for dependency in state.wait.iter() {
            self.jobs[dependency.slot()].add_dependent(&pending);
        }
        pending.release(self.scope);
    }

    /// Waits for `handle` and returns its outcome.
    ///
    /// ## Errors
    /// A [`ScheduleError`] for an invalid handle, otherwise the job's own
    /// failure.
    pub fn complete(&self, handle: JobHandle) -> ECSResult<()> {
        let state = self.validate(handle)?;
        help_until_done(state);
        state.outcome()
    }

    /// Returns `true` if `handle` has finished.
    pub fn is_complete(&self, handle: JobHandle) -> ECSResult<bool> {
        Ok(self.validate(handle)?.is_done())
    }

    /// Wait set computed for `handle` when it was scheduled.
    pub fn wait_set(&self, handle: JobHandle) -> ECSResult<&WaitSet> {
        Ok(&self.validate(handle)?.wait)
    }

    /// Waits for the replay job `handle` and returns what it applied.
    ///
    /// `None` for jobs that are not replays or replays that failed.
    pub fn replay_report(&self, handle: JobHandle) -> ECSResult<Option<ReplayReport>> {
        let state = self.validate(handle)?;
        help_until_done(state);
        let report = state.inner.lock().replay.clone();
        Ok(report)
    }

    /// Waits for every job scheduled so far.
    pub fn wait_all(&self) {
        for state in &self.jobs {
            help_until_done(state);
        }
    }

    pub(crate) fn into_report(self, tick: u64) -> TickReport {
        self.wait_all();
        let unreplayed = self
            .jobs
            .iter()
            .filter(|state| state.inner.lock().output.as_ref().is_some_and(|buffer| !buffer.is_empty()))
            .count();
        if unreplayed > 0 {
            warn!(tick, unreplayed, "dropping deferred buffers that were never replayed");
        }
        TickReport { tick, jobs: self.jobs.iter().map(|state| state.summary()).collect() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::access::AccessDescriptor;
    use crate::engine::config::SchedulerConfig;
    use crate::engine::error::AccessError;

    #[derive(Clone, Debug, PartialEq)]
    struct Mass(f32);
    #[derive(Clone, Debug, PartialEq)]
    struct Charge(f32);

    fn scheduler() -> Scheduler {
        Scheduler::new(SchedulerConfig::default().with_worker_threads(2).with_chunk_size(4)).unwrap()
    }

    fn world(n: usize) -> World {
        let mut world = World::new();
        for i in 0..n {
            let e = world.create_entity().unwrap();
            world.set(e, Mass(i as f32)).unwrap();
            world.set(e, Charge(1.0)).unwrap();
        }
        world
    }

    fn noop(name: &str, access: AccessDescriptor) -> Job {
        Job::new(name.to_string(), access, |_| Ok(()))
    }

    #[test]
    fn handle_not_yet_issued_is_cyclic() {
        let mut scheduler = scheduler();
        let mut world = world(1);
        scheduler
            .run_with(&mut world, 1.0, |ctx| {
                let future = JobHandle::new(ctx.context_id, ctx.epoch, 5);
                let err = ctx.schedule(noop("a", AccessDescriptor::empty()), &[future]).unwrap_err();
                assert_eq!(err, ECSError::from(ScheduleError::CyclicDependency { handle: future }));
                assert_eq!(ctx.job_count(), 0);
                assert!(ctx.tracker().record_of(Resource::Structure).is_none());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn writers_wait_on_each_other_and_readers() {
        let mut scheduler = scheduler();
        let mut world = world(8);
        scheduler
            .run_with(&mut world, 1.0, |ctx| {
                let write = AccessDescriptor::builder().write::<Mass>().build()?;
                let read = AccessDescriptor::builder().read::<Mass>().build()?;
                let w1 = ctx.schedule(noop("w1", write.clone()), &[])?;
                let r1 = ctx.schedule(noop("r1", read), &[])?;
                let w2 = ctx.schedule(noop("w2", write), &[])?;
                assert!(ctx.wait_set(r1)?.contains(w1));
                assert!(ctx.wait_set(w2)?.contains(w1));
                assert!(ctx.wait_set(w2)?.contains(r1));
                ctx.complete(w2)
            })
            .unwrap();
    }

    #[test]
    fn explicit_dependencies_join_the_wait_set() {
        let mut scheduler = scheduler();
        let mut world = world(2);
        scheduler
            .run_with(&mut world, 1.0, |ctx| {
                let a = ctx.schedule(noop("a", AccessDescriptor::builder().read::<Mass>().build()?), &[])?;
                let b = ctx.schedule(noop("b", AccessDescriptor::builder().read::<Charge>().build()?), &[a])?;
                assert_eq!(ctx.wait_set(b)?.as_slice(), &[a]);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn inline_job_is_complete_on_return() {
        let mut scheduler = scheduler();
        let mut world = world(16);
        scheduler
            .run_with(&mut world, 1.0, |ctx| {
                let write = AccessDescriptor::builder().write::<Mass>().build()?;
                let double = ctx.schedule(
                    Job::new("double", write.clone(), |chunk| {
                        chunk.for_each_write::<Mass, _>(|_, mass| {
                            mass.0 *= 2.0;
                            Ok(())
                        })
                    }),
                    &[],
                )?;
                let check = ctx.schedule(
                    Job::new("check", write, |chunk| {
                        assert_eq!(chunk.mode(), ExecutionMode::Inline);
                        chunk.for_each_write::<Mass, _>(|row, mass| {
                            assert_eq!(mass.0, 2.0 * row.entity().index() as f32);
                            Ok(())
                        })
                    })
                    .inline(),
                    &[],
                )?;
                assert!(ctx.is_complete(double)?);
                assert!(ctx.is_complete(check)?);
                ctx.complete(check)
            })
            .unwrap();
    }

    #[test]
    fn failed_job_releases_dependants_and_reports_error() {
        let mut scheduler = scheduler();
        let mut world = world(4);
        let result = scheduler.run_with(&mut world, 1.0, |ctx| {
            let read = AccessDescriptor::builder().read::<Mass>().build()?;
            let bad = ctx.schedule(
                Job::new("bad", read, |chunk| {
                    chunk.for_each_write::<Charge, _>(|_, _| Ok(()))
                }),
                &[],
            )?;
            let after = ctx.schedule(noop("after", AccessDescriptor::empty()), &[bad])?;
            assert!(matches!(ctx.complete(bad), Err(ECSError::Access(AccessError::Violation { .. }))));
            assert_eq!(ctx.complete(after), Ok(()));
            Ok(())
        });
        assert!(matches!(result, Err(ECSError::Execution(ExecutionError::JobFailed { ref job, .. })) if job == "bad"));
    }

    #[test]
    fn replay_waits_for_producers_and_orders_later_jobs() {
        let mut scheduler = scheduler();
        let mut world = world(3);
        scheduler
            .run_with(&mut world, 1.0, |ctx| {
                let read = AccessDescriptor::builder().read::<Mass>().build()?;
                let spawner = ctx.schedule(
                    Job::new("spawner", read.clone(), |chunk| {
                        chunk.for_each_read::<Mass, _>(|row, mass| {
                            let child = row.commands().create();
                            row.commands().set_component(child, Mass(mass.0 + 100.0))
                        })
                    }),
                    &[],
                )?;
                let replay = ctx.schedule_replay(&[spawner])?;
                let counter = ctx.schedule(
                    Job::new("count", read, |chunk| {
                        let mut seen = 0;
                        chunk.for_each_read::<Mass, _>(|_, _| {
                            seen += 1;
                            Ok(())
                        })?;
                        assert_eq!(seen, 6);
                        Ok(())
                    })
                    .single(),
                    &[],
                )?;
                assert!(ctx.wait_set(replay)?.contains(spawner));
                assert!(ctx.wait_set(counter)?.contains(replay));

                let report = ctx.replay_report(replay)?.unwrap_or_default();
                assert_eq!(report.created.len(), 3);
                assert_eq!(report.applied, 6);
                ctx.complete(counter)
            })
            .unwrap();
        assert_eq!(world.entity_count(), 6);
    }

    #[test]
    fn panicking_job_is_reported() {
        let mut scheduler = scheduler();
        let mut world = world(1);
        let result = scheduler.run_with(&mut world, 1.0, |ctx| {
            let handle = ctx.schedule(
                Job::new("boom", AccessDescriptor::empty(), |_| panic!("exploded")).single(),
                &[],
            )?;
            let err = ctx.complete(handle).unwrap_err();
            assert_eq!(
                err,
                ECSError::from(ExecutionError::JobPanicked { job: "boom".to_string(), message: "exploded".to_string() })
            );
            Ok(())
        });
        assert!(result.is_err());
        assert!(world.borrows().is_idle());
    }
}
