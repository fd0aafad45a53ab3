//! Jobs and the data view they run against.
//!
//! A [`Job`] is a named body plus the [`AccessDescriptor`] it promises to
//! stay within. When the scheduler runs it, the body is called once per
//! [`Chunk`]: a contiguous range of entity slots together with typed
//! iteration, random access into other entities and a private deferred
//! buffer.
//!
//! ## Access checks
//!
//! Every data access made through a chunk is checked against the job's
//! descriptor before it executes:
//!
//! | operation | requires |
//! |-----------|----------|
//! | iterate `&T` | `T` declared (any mode) |
//! | iterate `&mut T` | `T` declared `Write` |
//! | `lookup` / `locate` `T` | `T` declared `Random` |
//! | `modify` `T` | `T` declared `Write` + `Random` |
//!
//! A failed check fails the job with [`AccessError::Violation`].
//!
//! ## Aliasing
//!
//! While a row closure holds `&R` / `&mut W` for the iterated entity, the
//! row's random access refuses to look up `W` or modify `R` and `W`
//! ([`AccessError::Aliased`]). Together with `Write` + `Random` jobs never
//! running in parallel chunks, this keeps every `&mut T` unique.

use std::ops::Range;

use rayon::prelude::*;
use tracing::trace;

use crate::engine::access::AccessDescriptor;
use crate::engine::commands::CommandBuffer;
use crate::engine::component::{component_id_of, component_name, Component};
use crate::engine::entity::Entity;
use crate::engine::error::{AccessError, ECSResult, LookupError};
use crate::engine::types::{build_signature, ComponentID, Signature, TickTime};
use crate::engine::world::WorldData;

/// How the caller wants a job to run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ExecutionRequest {
    /// Let the scheduler choose from the descriptor.
    #[default]
    Auto,
    /// One worker task over the full range.
    Single,
    /// On the scheduling thread, before `schedule` returns.
    Inline,
}

/// How a job actually runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExecutionMode {
    /// Chunks of `chunk_size` slots on any worker.
    Parallel,
    /// One task, one chunk, on a worker.
    Sequential,
    /// One chunk on the scheduling thread.
    Inline,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Parallel => f.write_str("parallel"),
            ExecutionMode::Sequential => f.write_str("sequential"),
            ExecutionMode::Inline => f.write_str("inline"),
        }
    }
}

type JobBody = dyn Fn(&mut Chunk<'_>) -> ECSResult<()> + Send + Sync;

/// A unit of work: a body, the access it declares and an execution request.
pub struct Job {
    name: String,
    access: AccessDescriptor,
    request: ExecutionRequest,
    body: Box<JobBody>,
}

impl Job {
    /// Creates a job the scheduler may run in any mode its access allows.
    pub fn new<F>(name: impl Into<String>, access: AccessDescriptor, body: F) -> Self
    where
        F: Fn(&mut Chunk<'_>) -> ECSResult<()> + Send + Sync + 'static,
    {
        Self { name: name.into(), access, request: ExecutionRequest::Auto, body: Box::new(body) }
    }

    /// Requests a single sequential task.
    #[must_use]
    pub fn single(mut self) -> Self {
        self.request = ExecutionRequest::Single;
        self
    }

    /// Requests inline execution on the scheduling thread.
    #[must_use]
    pub fn inline(mut self) -> Self {
        self.request = ExecutionRequest::Inline;
        self
    }

    /// Name used in logs and reports.
    pub fn name(&self) -> &str { &self.name }

    /// Declared access.
    pub fn access(&self) -> &AccessDescriptor { &self.access }

    /// Requested execution, before the scheduler picks a mode.
    pub fn request(&self) -> ExecutionRequest { self.request }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("access", &self.access)
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

/// Random access into component data of any entity.
#[derive(Clone, Copy)]
struct RandomAccess<'a> {
    data: &'a WorldData,
    access: &'a AccessDescriptor,
    iter_reads: Signature,
    iter_writes: Signature,
}

impl<'a> RandomAccess<'a> {
    fn aliased(component_id: ComponentID) -> AccessError {
        AccessError::Aliased { component_id, name: component_name(component_id) }
    }

    fn locate<T: Component>(&self, entity: Entity) -> ECSResult<Result<&'a T, LookupError>> {
        let component_id = component_id_of::<T>()?;
        self.access.check_lookup(component_id)?;
        if self.iter_writes.has(component_id) {
            return Err(Self::aliased(component_id).into());
        }
        Ok(self.data.locate::<T>(component_id, entity))
    }

    fn modify<T: Component, R>(&mut self, entity: Entity, f: impl FnOnce(&mut T) -> R) -> ECSResult<Option<R>> {
        let component_id = component_id_of::<T>()?;
        self.access.check_modify(component_id)?;
        if self.iter_reads.has(component_id) || self.iter_writes.has(component_id) {
            return Err(Self::aliased(component_id).into());
        }
        if !self.data.entities().is_alive(entity) {
            return Ok(None);
        }
        let Some(column) = self.data.column::<T>(component_id) else { return Ok(None) };
        // SAFETY: a `Write` + `Random` kind only runs in a single chunk, the
        // job holds the kind's write borrow, the kind is not borrowed by the
        // running iteration, and `&mut self` excludes outstanding lookups.
        let value = unsafe { column.slot_mut_unchecked(entity.slot()) };
        Ok(value.map(f))
    }
}

/// The entity being visited by a row closure, with random access and the
/// chunk's deferred buffer.
pub struct Row<'r> {
    entity: Entity,
    time: TickTime,
    random: RandomAccess<'r>,
    commands: &'r mut CommandBuffer,
}

impl Row<'_> {
    /// Entity being visited.
    #[inline]
    pub fn entity(&self) -> Entity { self.entity }

    /// Time context of the tick.
    #[inline]
    pub fn time(&self) -> TickTime { self.time }

    /// Reads another entity's `T`; `None` if the entity or value is absent.
    pub fn lookup<T: Component>(&self, entity: Entity) -> ECSResult<Option<&T>> {
        Ok(self.random.locate::<T>(entity)?.ok())
    }

    /// Like [`Row::lookup`], reporting why a value is absent.
    pub fn locate<T: Component>(&self, entity: Entity) -> ECSResult<Result<&T, LookupError>> {
        self.random.locate::<T>(entity)
    }

    /// Applies `f` to another entity's `T`; `None` if absent.
    pub fn modify<T: Component, R>(&mut self, entity: Entity, f: impl FnOnce(&mut T) -> R) -> ECSResult<Option<R>> {
        self.random.modify::<T, R>(entity, f)
    }

    /// Deferred buffer of the chunk.
    #[inline]
    pub fn commands(&mut self) -> &mut CommandBuffer { self.commands }
}

/// A slot range of one job invocation.
pub struct Chunk<'a> {
    data: &'a WorldData,
    access: &'a AccessDescriptor,
    mode: ExecutionMode,
    range: Range<usize>,
    index: usize,
    time: TickTime,
    commands: CommandBuffer,
}

impl<'a> Chunk<'a> {
    /// Entity slots this chunk covers.
    #[inline] pub fn range(&self) -> Range<usize> { self.range.clone() }

    /// Position of this chunk within its job.
    #[inline] pub fn chunk_index(&self) -> usize { self.index }

    /// Mode the job runs in.
    #[inline] pub fn mode(&self) -> ExecutionMode { self.mode }

    /// Time context of the tick.
    #[inline] pub fn time(&self) -> TickTime { self.time }

    /// Deferred buffer of this chunk.
    #[inline] pub fn commands(&mut self) -> &mut CommandBuffer { &mut self.commands }

    /// Live entities in this chunk's range.
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        let entities = self.data.entities();
        self.range.clone().filter_map(move |slot| entities.entity_at(slot))
    }

    fn random_access(&self, iter_reads: Signature, iter_writes: Signature) -> RandomAccess<'a> {
        RandomAccess { data: self.data, access: self.access, iter_reads, iter_writes }
    }

    /// Reads any entity's `T`; `None` if the entity or value is absent.
    pub fn lookup<T: Component>(&self, entity: Entity) -> ECSResult<Option<&T>> {
        Ok(self.locate::<T>(entity)?.ok())
    }

    /// Like [`Chunk::lookup`], reporting why a value is absent.
    pub fn locate<T: Component>(&self, entity: Entity) -> ECSResult<Result<&T, LookupError>> {
        self.random_access(Signature::default(), Signature::default()).locate::<T>(entity)
    }

    /// Applies `f` to any entity's `T`; `None` if absent.
    pub fn modify<T: Component, R>(&mut self, entity: Entity, f: impl FnOnce(&mut T) -> R) -> ECSResult<Option<R>> {
        self.random_access(Signature::default(), Signature::default()).modify::<T, R>(entity, f)
    }

    fn check_iteration(&self, reads: &[ComponentID], write: Option<ComponentID>) -> ECSResult<()> {
        for &component_id in reads {
            self.access.check_iterate_read(component_id)?;
        }
        if let Some(component_id) = write {
            self.access.check_iterate_write(component_id)?;
            if reads.contains(&component_id) {
                return Err(RandomAccess::aliased(component_id).into());
            }
        }
        Ok(())
    }

    /// Visits every entity in range that has an `R`.
    pub fn for_each_read<R, F>(&mut self, mut f: F) -> ECSResult<()>
    where
        R: Component,
        F: FnMut(&mut Row<'_>, &R) -> ECSResult<()>,
    {
        let r = component_id_of::<R>()?;
        self.check_iteration(&[r], None)?;
        let data = self.data;
        let Some(reads) = data.column::<R>(r) else { return Ok(()) };
        let random = self.random_access(build_signature(&[r]), Signature::default());

        for slot in self.range.clone() {
            let Some(entity) = data.entities().entity_at(slot) else { continue };
            let Some(value) = reads.get(slot) else { continue };
            let mut row = Row { entity, time: self.time, random, commands: &mut self.commands };
            f(&mut row, value)?;
        }
        Ok(())
    }

    /// Visits every entity in range that has a `W`, with mutable access.
    pub fn for_each_write<W, F>(&mut self, mut f: F) -> ECSResult<()>
    where
        W: Component,
        F: FnMut(&mut Row<'_>, &mut W) -> ECSResult<()>,
    {
        let w = component_id_of::<W>()?;
        self.check_iteration(&[], Some(w))?;
        let data = self.data;
        let Some(writes) = data.column::<W>(w) else { return Ok(()) };
        let random = self.random_access(Signature::default(), build_signature(&[w]));

        for slot in self.range.clone() {
            let Some(entity) = data.entities().entity_at(slot) else { continue };
            // SAFETY: the job holds the write borrow of `W`, chunks cover
            // disjoint ranges, and the row cannot reach `W` values.
            let Some(value) = (unsafe { writes.slot_mut_unchecked(slot) }) else { continue };
            let mut row = Row { entity, time: self.time, random, commands: &mut self.commands };
            f(&mut row, value)?;
        }
        Ok(())
    }

    /// Visits every entity in range that has both an `R` and a `W`.
    pub fn for_each_read_write<R, W, F>(&mut self, mut f: F) -> ECSResult<()>
    where
        R: Component,
        W: Component,
        F: FnMut(&mut Row<'_>, &R, &mut W) -> ECSResult<()>,
    {
        let r = component_id_of::<R>()?;
        let w = component_id_of::<W>()?;
        self.check_iteration(&[r], Some(w))?;
        let data = self.data;
        let (Some(reads), Some(writes)) = (data.column::<R>(r), data.column::<W>(w)) else { return Ok(()) };
        let random = self.random_access(build_signature(&[r]), build_signature(&[w]));

        for slot in self.range.clone() {
            let Some(entity) = data.entities().entity_at(slot) else { continue };
            let Some(read) = reads.get(slot) else { continue };
            // SAFETY: as in `for_each_write`; `R` and `W` are distinct kinds.
            let Some(write) = (unsafe { writes.slot_mut_unchecked(slot) }) else { continue };
            let mut row = Row { entity, time: self.time, random, commands: &mut self.commands };
            f(&mut row, read, write)?;
        }
        Ok(())
    }

    /// Visits every entity in range that has an `A`, a `B` and a `W`.
    pub fn for_each_read2_write<A, B, W, F>(&mut self, mut f: F) -> ECSResult<()>
    where
        A: Component,
        B: Component,
        W: Component,
        F: FnMut(&mut Row<'_>, &A, &B, &mut W) -> ECSResult<()>,
    {
        let a = component_id_of::<A>()?;
        let b = component_id_of::<B>()?;
        let w = component_id_of::<W>()?;
        self.check_iteration(&[a, b], Some(w))?;
        let data = self.data;
        let (Some(reads_a), Some(reads_b), Some(writes)) =
            (data.column::<A>(a), data.column::<B>(b), data.column::<W>(w))
        else {
            return Ok(());
        };
        let random = self.random_access(build_signature(&[a, b]), build_signature(&[w]));

        for slot in self.range.clone() {
            let Some(entity) = data.entities().entity_at(slot) else { continue };
            let (Some(value_a), Some(value_b)) = (reads_a.get(slot), reads_b.get(slot)) else { continue };
            // SAFETY: as in `for_each_write`; `W` differs from `A` and `B`.
            let Some(write) = (unsafe { writes.slot_mut_unchecked(slot) }) else { continue };
            let mut row = Row { entity, time: self.time, random, commands: &mut self.commands };
            f(&mut row, value_a, value_b, write)?;
        }
        Ok(())
    }
}

/// Splits `0..slots` into contiguous ranges of at most `chunk_size` slots.
///
/// Always returns at least one (possibly empty) range.
pub(crate) fn partition(slots: usize, chunk_size: usize) -> Vec<Range<usize>> {
    if slots == 0 {
        return vec![0..0];
    }
    let chunk_size = chunk_size.max(1);
    (0..slots).step_by(chunk_size).map(|start| start..(start + chunk_size).min(slots)).collect()
}

fn run_chunk(
    job: &Job,
    mode: ExecutionMode,
    data: &WorldData,
    range: Range<usize>,
    index: usize,
    time: TickTime,
) -> ECSResult<CommandBuffer> {
    let mut chunk = Chunk { data, access: &job.access, mode, range, index, time, commands: CommandBuffer::new() };
    (job.body)(&mut chunk)?;
    Ok(chunk.commands)
}

/// Runs every chunk of `job` and returns their deferred buffers merged in
/// chunk order.
///
/// The caller holds the job's borrows for the duration of the call.
pub(crate) fn execute(
    job: &Job,
    mode: ExecutionMode,
    data: &WorldData,
    time: TickTime,
    chunk_size: usize,
) -> ECSResult<CommandBuffer> {
    let slots = data.slot_count();
    match mode {
        ExecutionMode::Parallel => {
            let ranges = partition(slots, chunk_size);
            trace!(job = job.name(), chunks = ranges.len(), slots, "running parallel chunks");
            let results: Vec<ECSResult<CommandBuffer>> = ranges
                .into_par_iter()
                .enumerate()
                .map(|(index, range)| run_chunk(job, mode, data, range, index, time))
                .collect();

            let mut merged = CommandBuffer::new();
            for result in results {
                merged.append(result?);
            }
            Ok(merged)
        }
        ExecutionMode::Sequential | ExecutionMode::Inline => {
            trace!(job = job.name(), slots, %mode, "running single chunk");
            run_chunk(job, mode, data, 0..slots, 0, time)
        }
    }
}
