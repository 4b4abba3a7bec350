//! Entity identifiers and the recycling pool.
//!
//! An [`Entity`] is a 64-bit handle that packs a *generation* counter in the
//! high 32 bits and an *index* in the low 32 bits. The generation is bumped
//! every time an index is released, which allows immediate stale-handle
//! detection.
//!
//! Index bit 31 is reserved: it marks *virtual* entities minted by a
//! [`CommandBuffer`](crate::command::CommandBuffer) before a real identifier
//! exists. Virtual entities never pass pool validity checks.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// Reserved index bit marking a virtual (not-yet-created) entity.
pub(crate) const VIRTUAL_BIT: u32 = 1 << 31;

/// A generational entity identifier.
///
/// Layout: `[generation: u32 | index: u32]`
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entity(u64);

impl Entity {
    /// Construct an `Entity` from an index and generation.
    #[inline]
    pub fn new(index: u32, generation: u32) -> Self {
        Self((generation as u64) << 32 | index as u64)
    }

    /// The index portion (low 32 bits).
    #[inline]
    pub fn index(self) -> u32 {
        self.0 as u32
    }

    /// The generation portion (high 32 bits).
    #[inline]
    pub fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Whether this is a virtual entity minted by a command buffer.
    ///
    /// Virtual entities are placeholders that only resolve to real entities
    /// when the buffer that minted them is applied at a sync point.
    #[inline]
    pub fn is_virtual(self) -> bool {
        self.index() & VIRTUAL_BIT != 0
    }

    /// Raw `u64` representation.
    #[inline]
    pub fn to_raw(self) -> u64 {
        self.0
    }

    /// Reconstruct from a raw `u64`.
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_virtual() {
            write!(f, "Entity(virtual {})", self.index() & !VIRTUAL_BIT)
        } else {
            write!(f, "Entity({}v{})", self.index(), self.generation())
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index(), self.generation())
    }
}

// ---------------------------------------------------------------------------
// EntityPool
// ---------------------------------------------------------------------------

/// Allocates and recycles [`Entity`] handles with generational tracking.
///
/// Released indices are kept on a LIFO stack so the most recently freed slot
/// is reused first, keeping the live index range compact.
#[derive(Debug)]
pub struct EntityPool {
    /// Current generation for each index slot.
    generations: Vec<u32>,
    /// Free-list of recyclable indices (LIFO stack).
    free: Vec<u32>,
}

impl EntityPool {
    /// Create a new, empty pool.
    pub fn new() -> Self {
        Self {
            generations: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Create a pool with pre-reserved capacity for `entities` slots and
    /// `recycled` free-list entries.
    pub fn with_capacity(entities: usize, recycled: usize) -> Self {
        Self {
            generations: Vec::with_capacity(entities),
            free: Vec::with_capacity(recycled),
        }
    }

    /// Allocate the next [`Entity`].
    ///
    /// Pops a recycled index with its stored generation if one is available,
    /// otherwise grows and returns a fresh index at generation 0.
    pub fn next(&mut self) -> Entity {
        if let Some(index) = self.free.pop() {
            // Generation was already bumped on release.
            Entity::new(index, self.generations[index as usize])
        } else {
            let index = self.generations.len() as u32;
            debug_assert!(index & VIRTUAL_BIT == 0, "entity index space exhausted");
            self.generations.push(0);
            Entity::new(index, 0)
        }
    }

    /// Release an entity, incrementing the stored generation for its index so
    /// that any outstanding handles become stale, and pushing the index onto
    /// the free stack.
    ///
    /// Returns `false` if the handle is virtual, out of range, or stale;
    /// the pool is unchanged in that case.
    pub fn release(&mut self, entity: Entity) -> bool {
        if entity.is_virtual() {
            return false;
        }
        let idx = entity.index() as usize;
        if idx >= self.generations.len() || self.generations[idx] != entity.generation() {
            return false;
        }
        self.generations[idx] = self.generations[idx].wrapping_add(1);
        self.free.push(entity.index());
        true
    }

    /// Returns `true` if `entity` was allocated and has not been released
    /// since its generation was issued. Virtual entities are never valid.
    pub fn is_valid(&self, entity: Entity) -> bool {
        if entity.is_virtual() {
            return false;
        }
        let idx = entity.index() as usize;
        idx < self.generations.len() && self.generations[idx] == entity.generation()
    }

    /// Total number of index slots ever allocated (live + recycled).
    pub fn allocated(&self) -> usize {
        self.generations.len()
    }
}

impl Default for EntityPool {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
