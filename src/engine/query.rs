//! Entity queries over the store.
//!
//! A [`Query`] selects the live entities that have every component kind of a
//! [`Signature`]. It borrows the store, so the set it describes cannot change
//! while it exists; iterating it twice yields the same entities in the same
//! (slot) order.

use crate::engine::entity::Entity;
use crate::engine::storage::TypeErasedAttribute;
use crate::engine::types::Signature;
use crate::engine::world::WorldData;

/// Restartable, lazy selection of entities by component kinds.
pub struct Query<'w> {
    data: &'w WorldData,
    signature: Signature,
    columns: Option<Vec<&'w dyn TypeErasedAttribute>>,
}

impl<'w> Query<'w> {
    pub(crate) fn new(data: &'w WorldData, signature: Signature) -> Self {
        // A kind that has never been stored matches nothing.
        let columns = signature
            .iterate_over_components()
            .map(|component_id| data.erased_column(component_id))
            .collect::<Option<Vec<_>>>();
        Self { data, signature, columns }
    }

    /// Query that matches no entity.
    pub(crate) fn nothing(data: &'w WorldData) -> Self {
        Self { data, signature: Signature::default(), columns: None }
    }

    /// Kinds an entity must have to match.
    pub fn signature(&self) -> &Signature { &self.signature }

    /// Iterates matching entities in slot order.
    pub fn iter(&self) -> impl Iterator<Item = Entity> + '_ {
        let columns = self.columns.as_deref().unwrap_or(&[]);
        let matches_nothing = self.columns.is_none();
        let entities = self.data.entities();
        (0..self.data.slot_count())
            .filter(move |_| !matches_nothing)
            .filter(move |&slot| columns.iter().all(|column| column.contains_slot(slot)))
            .filter_map(move |slot| entities.entity_at(slot))
    }

    /// Number of matching entities.
    pub fn count(&self) -> usize { self.iter().count() }

    /// Returns `true` if `entity` is alive and matches.
    pub fn contains(&self, entity: Entity) -> bool {
        self.data.entities().is_alive(entity)
            && self
                .columns
                .as_ref()
                .is_some_and(|columns| columns.iter().all(|column| column.contains_slot(entity.slot())))
    }
}
