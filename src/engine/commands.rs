//! # Commands
//!
//! This module defines the deferred mutation buffer jobs use to change the
//! structure of the store.
//!
//! ## Purpose
//! Jobs run against a shared store and may not create or destroy entities, or
//! add or remove components, while other jobs iterate. Instead they append
//! [`Command`] records to a [`CommandBuffer`], which a replay job applies at a
//! synchronization point.
//!
//! ## Design
//! - Commands are plain data describing *what* change should occur.
//! - A buffer is append-only; records are replayed in strict append order.
//! - Entities created inside a buffer are addressed by [`PendingEntity`]
//!   until replay assigns them a real [`Entity`].
//!
//! ## Invariants
//! - A `DestroyEntity` makes every later record in the same buffer that
//!   targets the same entity a no-op.
//! - Destroying an entity that is already dead is a no-op.
//! - Records targeting a dead entity are skipped, never an error.
//! - Replaying clones of one buffer into identical stores yields identical
//!   stores.

use std::collections::HashSet;

use crate::engine::component::{check_value_type, component_id_of, Component, ComponentValue};
use crate::engine::entity::Entity;
use crate::engine::error::ECSResult;
use crate::engine::types::ComponentID;
use crate::engine::world::ComponentStore;

/// Entity created by a buffer that has not been replayed yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PendingEntity(u32);

impl PendingEntity {
    /// Position of this entity among the creations of its buffer.
    #[inline]
    pub fn index(self) -> u32 { self.0 }
}

/// Target of a deferred record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityRef {
    /// An entity that already exists in the store.
    Existing(Entity),
    /// An entity created earlier in the same buffer.
    Pending(PendingEntity),
}

impl From<Entity> for EntityRef {
    fn from(entity: Entity) -> Self { EntityRef::Existing(entity) }
}

impl From<PendingEntity> for EntityRef {
    fn from(pending: PendingEntity) -> Self { EntityRef::Pending(pending) }
}

/// Deferred structural mutation.
pub enum Command {
    /// Creates a new entity.
    CreateEntity {
        /// Name of the entity inside the buffer.
        pending: PendingEntity,
    },

    /// Destroys an entity and drops all of its components.
    DestroyEntity {
        /// Entity to destroy.
        target: EntityRef,
    },

    /// Sets (adds or replaces) a component value.
    SetComponent {
        /// Entity receiving the value.
        target: EntityRef,
        /// Kind of the value.
        component_id: ComponentID,
        /// Value to store; must match the registered type of `component_id`.
        value: Box<dyn ComponentValue>,
    },

    /// Removes a component.
    RemoveComponent {
        /// Entity losing the component.
        target: EntityRef,
        /// Kind to remove.
        component_id: ComponentID,
    },
}

impl Command {
    fn target(&self) -> Option<EntityRef> {
        match self {
            Command::CreateEntity { .. } => None,
            Command::DestroyEntity { target }
            | Command::SetComponent { target, .. }
            | Command::RemoveComponent { target, .. } => Some(*target),
        }
    }

    fn offset_pending(&mut self, offset: u32) {
        let shift = |target: &mut EntityRef| {
            if let EntityRef::Pending(pending) = target {
                pending.0 += offset;
            }
        };
        match self {
            Command::CreateEntity { pending } => pending.0 += offset,
            Command::DestroyEntity { target }
            | Command::SetComponent { target, .. }
            | Command::RemoveComponent { target, .. } => shift(target),
        }
    }
}

impl Clone for Command {
    fn clone(&self) -> Self {
        match self {
            Command::CreateEntity { pending } => Command::CreateEntity { pending: *pending },
            Command::DestroyEntity { target } => Command::DestroyEntity { target: *target },
            Command::SetComponent { target, component_id, value } => Command::SetComponent {
                target: *target,
                component_id: *component_id,
                value: (**value).clone_value(),
            },
            Command::RemoveComponent { target, component_id } => {
                Command::RemoveComponent { target: *target, component_id: *component_id }
            }
        }
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::CreateEntity { pending } => f.debug_struct("CreateEntity").field("pending", pending).finish(),
            Command::DestroyEntity { target } => f.debug_struct("DestroyEntity").field("target", target).finish(),
            Command::SetComponent { target, component_id, value } => f
                .debug_struct("SetComponent")
                .field("target", target)
                .field("component_id", component_id)
                .field("value", value)
                .finish(),
            Command::RemoveComponent { target, component_id } => f
                .debug_struct("RemoveComponent")
                .field("target", target)
                .field("component_id", component_id)
                .finish(),
        }
    }
}

/// Outcome of replaying a buffer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Records that changed the store.
    pub applied: usize,
    /// Records that were no-ops (dead or destroyed targets, absent components).
    pub skipped: usize,
    /// Entities created, in creation order.
    pub created: Vec<Entity>,
}

/// Append-only log of deferred mutations.
#[derive(Clone, Debug, Default)]
pub struct CommandBuffer {
    commands: Vec<Command>,
    pending_count: u32,
}

impl CommandBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self { Self::default() }

    /// Records the creation of an entity and returns its in-buffer name.
    pub fn create(&mut self) -> PendingEntity {
        let pending = PendingEntity(self.pending_count);
        self.pending_count += 1;
        self.commands.push(Command::CreateEntity { pending });
        pending
    }

    /// Records the destruction of `target`.
    pub fn destroy(&mut self, target: impl Into<EntityRef>) {
        self.commands.push(Command::DestroyEntity { target: target.into() });
    }

    /// Records setting `value` on `target`.
    ///
    /// ## Errors
    /// A registry error if `T` cannot be registered.
    pub fn set_component<T: Component>(&mut self, target: impl Into<EntityRef>, value: T) -> ECSResult<()> {
        let component_id = component_id_of::<T>()?;
        self.set_component_value(target, component_id, Box::new(value));
        Ok(())
    }

    /// Records setting a type-erased value on `target`.
    pub fn set_component_value(
        &mut self,
        target: impl Into<EntityRef>,
        component_id: ComponentID,
        value: Box<dyn ComponentValue>,
    ) {
        self.commands.push(Command::SetComponent { target: target.into(), component_id, value });
    }

    /// Records removing the `T` component of `target`.
    ///
    /// ## Errors
    /// A registry error if `T` cannot be registered.
    pub fn remove_component<T: Component>(&mut self, target: impl Into<EntityRef>) -> ECSResult<()> {
        let component_id = component_id_of::<T>()?;
        self.commands.push(Command::RemoveComponent { target: target.into(), component_id });
        Ok(())
    }

    /// Moves every record of `other` to the end of this buffer.
    ///
    /// Pending entities of `other` are renumbered so they stay distinct from
    /// the ones already in this buffer.
    pub fn append(&mut self, mut other: CommandBuffer) {
        let offset = self.pending_count;
        if offset > 0 {
            for command in &mut other.commands {
                command.offset_pending(offset);
            }
        }
        self.pending_count += other.pending_count;
        self.commands.append(&mut other.commands);
    }

    /// Number of records.
    pub fn len(&self) -> usize { self.commands.len() }

    /// Returns `true` if nothing was recorded.
    pub fn is_empty(&self) -> bool { self.commands.is_empty() }

    /// Records in append order.
    pub fn iter(&self) -> impl Iterator<Item = &Command> { self.commands.iter() }

    /// Checks that every record can be applied to `store`, without changing it.
    ///
    /// Capacity is checked against the store as it is now; indices freed by
    /// destroys in this buffer are not counted.
    ///
    /// ## Errors
    /// - [`CapacityError`](crate::engine::error::CapacityError) if the store
    ///   cannot create every entity the buffer creates.
    /// - [`TypeMismatchError`](crate::engine::error::TypeMismatchError) if a
    ///   set value is not of the registered type of its kind.
    pub fn validate<S: ComponentStore + ?Sized>(&self, store: &S) -> ECSResult<()> {
        store.check_capacity(self.pending_count as usize)?;
        for command in &self.commands {
            if let Command::SetComponent { component_id, value, .. } = command {
                check_value_type(*component_id, &**value)?;
            }
        }
        Ok(())
    }

    /// Applies every record to `store`, in append order.
    ///
    /// The buffer is validated first, so a replay either applies every record
    /// or leaves the store untouched.
    ///
    /// ## Errors
    /// As for [`CommandBuffer::validate`].
    pub fn replay<S: ComponentStore + ?Sized>(self, store: &mut S) -> ECSResult<ReplayReport> {
        self.validate(store)?;

        let mut report = ReplayReport::default();
        let mut created: Vec<Option<Entity>> = vec![None; self.pending_count as usize];
        let mut destroyed: HashSet<Entity> = HashSet::new();

        for command in self.commands {
            let target = command.target().and_then(|target| match target {
                EntityRef::Existing(entity) => Some(entity),
                EntityRef::Pending(pending) => created.get(pending.0 as usize).copied().flatten(),
            });
            let live_target = target.filter(|entity| !destroyed.contains(entity) && store.is_alive(*entity));

            let applied = match command {
                Command::CreateEntity { pending } => {
                    let entity = store.create_entity()?;
                    if let Some(slot) = created.get_mut(pending.0 as usize) {
                        *slot = Some(entity);
                    }
                    report.created.push(entity);
                    true
                }
                Command::DestroyEntity { .. } => match live_target {
                    Some(entity) => {
                        destroyed.insert(entity);
                        store.destroy_entity(entity)
                    }
                    None => false,
                },
                Command::SetComponent { component_id, value, .. } => match live_target {
                    Some(entity) => {
                        store.insert_value(entity, component_id, value)?;
                        true
                    }
                    None => false,
                },
                Command::RemoveComponent { component_id, .. } => match live_target {
                    Some(entity) => store.remove_value(entity, component_id),
                    None => false,
                },
            };

            if applied { report.applied += 1 } else { report.skipped += 1 }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::error::{ECSError, StoreError, TypeMismatchError};
    use crate::engine::world::World;

    #[derive(Clone, Debug, PartialEq)]
    struct Tag(u32);

    #[test]
    fn pending_entities_resolve_on_replay() {
        let mut world = World::new();
        let mut buffer = CommandBuffer::new();
        let a = buffer.create();
        buffer.set_component(a, Tag(1)).unwrap();
        let b = buffer.create();
        buffer.set_component(b, Tag(2)).unwrap();

        let report = buffer.replay(&mut world).unwrap();
        assert_eq!(report.applied, 4);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.created.len(), 2);
        assert_eq!(world.get::<Tag>(report.created[0]), Some(&Tag(1)));
        assert_eq!(world.get::<Tag>(report.created[1]), Some(&Tag(2)));
    }

    #[test]
    fn destroy_dominates_later_records() {
        let mut world = World::new();
        let e = world.create_entity().unwrap();
        world.set(e, Tag(0)).unwrap();

        let mut buffer = CommandBuffer::new();
        buffer.destroy(e);
        buffer.set_component(e, Tag(9)).unwrap();
        buffer.remove_component::<Tag>(e).unwrap();
        buffer.destroy(e);

        let report = buffer.replay(&mut world).unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(report.skipped, 3);
        assert!(!world.is_alive(e));
        assert_eq!(world.get::<Tag>(e), None);
    }

    #[test]
    fn destroyed_pending_entity_ignores_later_sets() {
        let mut world = World::new();
        let mut buffer = CommandBuffer::new();
        let p = buffer.create();
        buffer.destroy(p);
        buffer.set_component(p, Tag(5)).unwrap();

        let report = buffer.replay(&mut world).unwrap();
        assert_eq!(report.applied, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(world.entity_count(), 0);
        assert_eq!(world.query_read::<Tag>().count(), 0);
    }

    #[test]
    fn append_renumbers_pending_entities() {
        let mut first = CommandBuffer::new();
        let a = first.create();
        first.set_component(a, Tag(1)).unwrap();

        let mut second = CommandBuffer::new();
        let b = second.create();
        second.set_component(b, Tag(2)).unwrap();

        first.append(second);
        assert_eq!(first.len(), 4);

        let mut world = World::new();
        let report = first.replay(&mut world).unwrap();
        let tags: Vec<u32> = report.created.iter().map(|e| world.get::<Tag>(*e).unwrap().0).collect();
        assert_eq!(tags, vec![1, 2]);
    }

    #[test]
    fn cloned_buffers_replay_identically() {
        let build_world = || {
            let mut world = World::new();
            for i in 0..4 {
                let e = world.create_entity().unwrap();
                world.set(e, Tag(i)).unwrap();
            }
            world
        };
        let mut left = build_world();
        let mut right = build_world();

        let mut buffer = CommandBuffer::new();
        let victim = left.entities().nth(1).unwrap();
        buffer.destroy(victim);
        let fresh = buffer.create();
        buffer.set_component(fresh, Tag(40)).unwrap();
        buffer.set_component(left.entities().next().unwrap(), Tag(10)).unwrap();

        buffer.clone().replay(&mut left).unwrap();
        buffer.replay(&mut right).unwrap();

        let snapshot = |world: &World| -> Vec<(Entity, Tag)> {
            world.query_read::<Tag>().map(|(e, t)| (e, t.clone())).collect()
        };
        assert_eq!(snapshot(&left), snapshot(&right));
        assert_eq!(left.generation(), right.generation());
    }

    #[test]
    fn cloned_set_record_keeps_its_value() {
        let mut buffer = CommandBuffer::new();
        let p = buffer.create();
        buffer.set_component(p, Tag(3)).unwrap();

        let copy = buffer.clone();
        match copy.iter().nth(1) {
            Some(Command::SetComponent { value, .. }) => {
                assert_eq!((**value).value_type_id(), std::any::TypeId::of::<Tag>());
            }
            other => panic!("expected a set record, got {other:?}"),
        }
        assert_eq!(copy.len(), buffer.len());
    }

    #[test]
    fn mistyped_value_leaves_store_untouched() {
        let mut world = World::new();
        let e = world.create_entity().unwrap();
        world.set(e, Tag(1)).unwrap();
        let tag_id = component_id_of::<Tag>().unwrap();
        let before = world.generation();

        let mut buffer = CommandBuffer::new();
        let child = buffer.create();
        buffer.set_component(child, Tag(2)).unwrap();
        buffer.destroy(e);
        buffer.set_component_value(child, tag_id, Box::new(7u8));

        let err = buffer.replay(&mut world).unwrap_err();
        assert!(matches!(err, ECSError::Store(StoreError::TypeMismatch(TypeMismatchError { component_id, .. })) if component_id == tag_id));
        assert_eq!(world.entity_count(), 1);
        assert!(world.is_alive(e));
        assert_eq!(world.get::<Tag>(e), Some(&Tag(1)));
        assert_eq!(world.generation(), before);
    }

    #[test]
    fn removing_absent_component_is_skipped() {
        let mut world = World::new();
        let e = world.create_entity().unwrap();
        let mut buffer = CommandBuffer::new();
        buffer.remove_component::<Tag>(e).unwrap();
        let report = buffer.replay(&mut world).unwrap();
        assert_eq!((report.applied, report.skipped), (0, 1));
    }
}
