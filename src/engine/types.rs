//! Core identifiers, bit layouts and signatures.
//!
//! This module defines the small, copyable types shared by every other part of
//! the engine: entity identifiers, component identifiers, the bitset
//! [`Signature`] used for access sets, and the access vocabulary
//! ([`AccessMode`], [`Locality`]) that job descriptors are written in.
//!
//! ## Entity Representation
//!
//! Entities are encoded as a packed 64-bit integer:
//!
//! ```text
//! | version (32) | index (32) |
//! ```
//!
//! - **Index** identifies the slot the entity occupies in component columns.
//! - **Version** enables stale-entity detection after destruction.
//!
//! ## Component Signatures
//!
//! Components are identified by compact [`ComponentID`] values. A
//! [`Signature`] is a fixed-size bitset over all component IDs and supports
//! fast intersection tests, which is what conflict detection between access
//! descriptors reduces to.

/// Bit-width type used for compile-time layout calculations.
pub type Bits = u8;

/// Globally unique entity identifier encoded as a packed 64-bit value.
pub type EntityID = u64;

/// Slot index of an entity.
pub type IndexID = u32;

/// Generation counter used to detect stale entities.
pub type VersionID = u32;

/// Count of live entities.
pub type EntityCount = u32;

/// Simulation tick counter.
pub type Tick = u64;

/// Total number of bits in an [`EntityID`].
pub const ENTITY_BITS: Bits = 64;

/// Number of bits reserved for entity versioning.
pub const VERSION_BITS: Bits = 32;

/// Number of bits reserved for the entity slot index.
pub const INDEX_BITS: Bits = ENTITY_BITS - VERSION_BITS;

const _: [(); 1] = [(); (INDEX_BITS > 0) as usize];
const _: [(); 1] = [(); (VERSION_BITS < ENTITY_BITS) as usize];

const fn mask(bits: Bits) -> EntityID {
    if bits == 0 { 0 } else { ((1 as EntityID) << bits) - 1 }
}

/// Mask selecting the index portion of an [`EntityID`].
pub const INDEX_MASK: EntityID = mask(INDEX_BITS);

/// Maximum number of entity slots.
pub const INDEX_CAP: IndexID = INDEX_MASK as IndexID;

/// Unique identifier for a component type.
pub type ComponentID = u16;

/// Maximum number of registered component types.
pub const COMPONENT_CAP: usize = 256;

/// Component id reported for a type the registry could not admit.
///
/// Never assigned to a registered type.
pub const UNREGISTERED_COMPONENT: ComponentID = ComponentID::MAX;

const _: [(); 1] = [(); (COMPONENT_CAP <= UNREGISTERED_COMPONENT as usize) as usize];

/// Number of `u64` words required to represent a full component signature.
pub const SIGNATURE_SIZE: usize = (COMPONENT_CAP + 63) / 64;

/// Bitset representing a set of components.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Signature {
    /// Packed component bitset.
    pub components: [u64; SIGNATURE_SIZE],
}

impl Default for Signature {
    fn default() -> Self {
        Self {
            components: [0u64; SIGNATURE_SIZE],
        }
    }
}

impl Signature {
    /// Sets the bit corresponding to `component_id`.
    ///
    /// # Panics
    /// If `component_id` is not below [`COMPONENT_CAP`].
    #[inline]
    pub fn set(&mut self, component_id: ComponentID) {
        let index = (component_id as usize) / 64;
        let bits = (component_id as usize) % 64;
        self.components[index] |= 1u64 << bits;
    }

    /// Clears the bit corresponding to `component_id`.
    #[inline]
    pub fn clear(&mut self, component_id: ComponentID) {
        let index = (component_id as usize) / 64;
        let bits = (component_id as usize) % 64;
        self.components[index] &= !(1u64 << bits);
    }

    /// Returns `true` if `component_id` is present in this signature.
    #[inline]
    pub fn has(&self, component_id: ComponentID) -> bool {
        let index = (component_id as usize) / 64;
        let bits = (component_id as usize) % 64;
        (self.components[index] >> bits) & 1 == 1
    }

    /// Returns `true` if all components in `signature` are present.
    #[inline]
    pub fn contains_all(&self, signature: &Signature) -> bool {
        self.components
            .iter()
            .zip(signature.components.iter())
            .all(|(a, b)| (a & b) == *b)
    }

    /// Returns `true` if the two signatures share at least one component.
    #[inline]
    pub fn intersects(&self, other: &Signature) -> bool {
        self.components
            .iter()
            .zip(other.components.iter())
            .any(|(a, b)| (a & b) != 0)
    }

    /// Returns `true` if no component bit is set.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.components.iter().all(|&word| word == 0)
    }

    /// Returns the union of two signatures.
    #[inline]
    pub fn union(&self, other: &Signature) -> Signature {
        let mut out = *self;
        for (word, other_word) in out.components.iter_mut().zip(other.components.iter()) {
            *word |= other_word;
        }
        out
    }

    /// Iterates over all component IDs set in this signature, in ascending order.
    pub fn iterate_over_components(&self) -> impl Iterator<Item = ComponentID> + '_ {
        self.components
            .iter()
            .enumerate()
            .flat_map(|(word_index, &word)| {
                let base = word_index * 64;
                let mut bits = word;
                std::iter::from_fn(move || {
                    if bits == 0 {
                        return None;
                    }
                    let tz = bits.trailing_zeros() as usize;
                    bits &= bits - 1;
                    Some((base + tz) as ComponentID)
                })
            })
    }
}

/// Builds a component signature from a list of component IDs.
pub fn build_signature(component_ids: &[ComponentID]) -> Signature {
    let mut signature = Signature::default();
    for &component_id in component_ids { signature.set(component_id); }
    signature
}

/// Access mode for a component.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AccessMode {
    /// Read-only access.
    Read,
    /// Exclusive write access.
    Write,
}

/// Which entities a job may address for a component kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Locality {
    /// Only the entity currently being iterated.
    Direct,
    /// Any entity, looked up by identity.
    Random,
}

impl std::fmt::Display for AccessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessMode::Read => f.write_str("read"),
            AccessMode::Write => f.write_str("write"),
        }
    }
}

impl std::fmt::Display for Locality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Locality::Direct => f.write_str("direct"),
            Locality::Random => f.write_str("random"),
        }
    }
}

/// Scoped, read-only time context handed to every job of a tick.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TickTime {
    /// Index of the tick, starting at 1 for the first tick run.
    pub tick: Tick,
    /// Seconds since the previous tick.
    pub delta: f64,
    /// Seconds accumulated over all ticks, including this one.
    pub elapsed: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_iterates_set_bits_in_order() {
        let signature = build_signature(&[130, 3, 64, 3]);
        let ids: Vec<ComponentID> = signature.iterate_over_components().collect();
        assert_eq!(ids, vec![3, 64, 130]);
    }

    #[test]
    fn intersection_and_containment() {
        let a = build_signature(&[1, 2, 200]);
        let b = build_signature(&[200]);
        let c = build_signature(&[5]);
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
        assert!(a.contains_all(&b));
        assert!(!b.contains_all(&a));
        assert!(a.union(&c).has(5));
        assert!(Signature::default().is_empty());
    }

    #[test]
    fn clear_removes_only_one_bit() {
        let mut signature = build_signature(&[7, 8]);
        signature.clear(7);
        assert!(!signature.has(7));
        assert!(signature.has(8));
    }
}
