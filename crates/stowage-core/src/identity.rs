//! Identity registry: stable IDs and recyclable volatile indices.
//!
//! Every entity carries two identities. The stable ID is assigned once (by
//! the caller or by [`IdentityRegistry::register_next_id`]) and is what
//! external references and lookups use. The volatile index is a dense slot
//! number used for array-backed storage; released indices are handed out
//! again, always lowest first.
//!
//! Registries are per-type and per-instance.

use std::collections::BTreeSet;

use crate::error::KernelError;
use crate::id::{ENTITY_KIND_COUNT, EntityKind, VolatileIndex};

// ---------------------------------------------------------------------------
// Stable IDs
// ---------------------------------------------------------------------------

/// Stable-ID bookkeeping for one entity type.
#[derive(Debug, Clone, Default)]
pub struct IdAllocator {
    live: BTreeSet<u32>,
    /// One past the highest ID ever issued or claimed. Reaches `u32::MAX + 1`
    /// once the top ID is taken.
    next: u64,
}

impl IdAllocator {
    /// Issue an ID above every ID ever issued or claimed for this type.
    ///
    /// The ID is not marked live; the factory that uses it claims it. Fails
    /// once `u32::MAX` has been issued or claimed.
    pub fn register_next(&mut self, kind: EntityKind) -> Result<u32, KernelError> {
        let id = u32::try_from(self.next).map_err(|_| KernelError::IdentityExhausted { kind })?;
        self.next += 1;
        Ok(id)
    }

    /// Mark `id` live. Fails if an entity with that ID already exists.
    pub fn claim(&mut self, kind: EntityKind, id: u32) -> Result<(), KernelError> {
        if !self.live.insert(id) {
            return Err(KernelError::DuplicateIdentity { kind, id });
        }
        self.next = self.next.max(u64::from(id) + 1);
        Ok(())
    }

    /// Forget a live ID. The high-water mark is kept so it is never reissued.
    pub fn release(&mut self, id: u32) -> bool {
        self.live.remove(&id)
    }

    pub fn is_live(&self, id: u32) -> bool {
        self.live.contains(&id)
    }
}

// ---------------------------------------------------------------------------
// Volatile indices
// ---------------------------------------------------------------------------

/// Dense index pool for one entity type.
///
/// Held indices are always a subset of `0..high`, and every index in that
/// range that is not held sits in `free`. Allocation takes the smallest free
/// index, or `high` when there is none.
#[derive(Debug, Clone, Default)]
pub struct VolatileIndexPool {
    free: BTreeSet<u32>,
    high: u32,
}

impl VolatileIndexPool {
    pub fn allocate(&mut self) -> VolatileIndex {
        if let Some(idx) = self.free.pop_first() {
            return VolatileIndex(idx);
        }
        let idx = self.high;
        self.high += 1;
        VolatileIndex(idx)
    }

    /// Return `index` to the pool. Releasing an index that is not held is a
    /// no-op and returns false.
    pub fn release(&mut self, index: VolatileIndex) -> bool {
        let idx = index.0;
        if idx >= self.high || self.free.contains(&idx) {
            return false;
        }
        self.free.insert(idx);
        // Shrink the high-water mark over trailing free slots.
        while self.high > 0 && self.free.remove(&(self.high - 1)) {
            self.high -= 1;
        }
        true
    }

    pub fn is_held(&self, index: VolatileIndex) -> bool {
        index.0 < self.high && !self.free.contains(&index.0)
    }

    pub fn held_count(&self) -> usize {
        self.high as usize - self.free.len()
    }

    /// One past the highest held index.
    pub fn high_water(&self) -> u32 {
        self.high
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Per-type stable-ID allocators and volatile index pools for one instance.
#[derive(Debug, Clone, Default)]
pub struct IdentityRegistry {
    ids: [IdAllocator; ENTITY_KIND_COUNT],
    indices: [VolatileIndexPool; ENTITY_KIND_COUNT],
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh stable ID for `kind`.
    pub fn register_next_id(&mut self, kind: EntityKind) -> Result<u32, KernelError> {
        self.ids[kind.index()].register_next(kind)
    }

    /// Record a stable ID as live. Duplicate live IDs are rejected.
    pub fn claim_id(&mut self, kind: EntityKind, id: u32) -> Result<(), KernelError> {
        self.ids[kind.index()].claim(kind, id)
    }

    pub fn release_id(&mut self, kind: EntityKind, id: u32) -> bool {
        self.ids[kind.index()].release(id)
    }

    pub fn is_live(&self, kind: EntityKind, id: u32) -> bool {
        self.ids[kind.index()].is_live(id)
    }

    pub fn allocate_volatile_index(&mut self, kind: EntityKind) -> VolatileIndex {
        self.indices[kind.index()].allocate()
    }

    pub fn release_volatile_index(&mut self, kind: EntityKind, index: VolatileIndex) -> bool {
        self.indices[kind.index()].release(index)
    }

    pub fn index_pool(&self, kind: EntityKind) -> &VolatileIndexPool {
        &self.indices[kind.index()]
    }

    /// Claim an optional caller-supplied ID (or a fresh one) and allocate an
    /// index. Nothing is recorded if the claim fails.
    pub fn admit(
        &mut self,
        kind: EntityKind,
        requested: Option<u32>,
    ) -> Result<(u32, VolatileIndex), KernelError> {
        let id = match requested {
            Some(id) => id,
            None => self.register_next_id(kind)?,
        };
        self.claim_id(kind, id)?;
        Ok((id, self.allocate_volatile_index(kind)))
    }

    /// Undo [`admit`](Self::admit) for a removed entity.
    pub fn retire(&mut self, kind: EntityKind, id: u32, index: VolatileIndex) {
        self.release_id(kind, id);
        self.release_volatile_index(kind, index);
    }
}
