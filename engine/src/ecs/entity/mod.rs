//! Entity identifiers and allocation.
//!
//! An [`Entity`] is a 64-bit handle made of a slot index and a generation:
//!
//! ```text
//!  63        48 47          32 31                        0
//! ┌────────────┬──────────────┬───────────────────────────┐
//! │  reserved  │  generation  │           index           │
//! └────────────┴──────────────┴───────────────────────────┘
//! ```
//!
//! The top 16 bits are never set on a live entity. They are used by
//! [`component::Id`](crate::ecs::component::Id) to mark relationship entries (child-of,
//! instance-of) inside a signature.
//!
//! # Generation Tracking
//!
//! When an entity is freed its slot goes to a dead pool and its generation is bumped. A handle
//! that outlived the entity carries the old generation, so every lookup keyed by the full 64 bits
//! misses and reports `NotFound`:
//!
//! ```rust,ignore
//! let entity = allocator.alloc(); // index 0, generation 0
//! allocator.free(entity);
//! let reused = allocator.alloc(); // index 0, generation 1
//! assert_ne!(entity, reused);
//! ```

use std::{
    fmt,
    sync::{
        RwLock,
        atomic::{AtomicU32, Ordering},
    },
};

use crossbeam::queue::SegQueue;

/// Mask of the bits an entity handle may use.
pub(crate) const ENTITY_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

/// How many times an entity slot has been recycled. Wraps after 65535 reuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u16);

impl Generation {
    const FIRST: Self = Self(0);

    #[inline]
    pub fn next(&self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    #[inline]
    pub fn value(&self) -> u16 {
        self.0
    }
}

/// A handle to an entity in a world.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Entity(u64);

impl Entity {
    #[inline]
    pub(crate) const fn new(index: u32, generation: Generation) -> Self {
        Self(((generation.0 as u64) << 32) | index as u64)
    }

    /// Rebuild an entity from raw bits, discarding anything outside the entity range.
    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits & ENTITY_MASK)
    }

    #[inline]
    pub const fn to_bits(&self) -> u64 {
        self.0
    }

    /// The slot index of this entity.
    #[inline]
    pub const fn index(&self) -> usize {
        (self.0 & 0xFFFF_FFFF) as usize
    }

    #[inline]
    pub const fn generation(&self) -> Generation {
        Generation((self.0 >> 32) as u16)
    }

    /// The same slot with the next generation.
    #[inline]
    pub fn genned(&self) -> Self {
        Self::new(self.index() as u32, self.generation().next())
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({}v{})", self.index(), self.generation().0)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index(), self.generation().0)
    }
}

const CHUNK_SIZE: usize = 4096;

/// Current generation of every slot, stored in fixed chunks so readers never see a reallocation.
#[derive(Default, Debug)]
struct Generations {
    chunks: RwLock<Vec<Box<[AtomicU32; CHUNK_SIZE]>>>,
}

impl Generations {
    const fn new() -> Self {
        Self {
            chunks: RwLock::new(Vec::new()),
        }
    }

    fn get(&self, index: u32) -> Generation {
        let chunk_idx = index as usize / CHUNK_SIZE;
        let slot_idx = index as usize % CHUNK_SIZE;

        let chunks = self.chunks.read().unwrap_or_else(|e| e.into_inner());
        Generation(if chunk_idx < chunks.len() {
            chunks[chunk_idx][slot_idx].load(Ordering::Acquire) as u16
        } else {
            0
        })
    }

    fn increment(&self, index: u32) {
        self.ensure_capacity(index);
        let chunk_idx = index as usize / CHUNK_SIZE;
        let slot_idx = index as usize % CHUNK_SIZE;

        let chunks = self.chunks.read().unwrap_or_else(|e| e.into_inner());
        chunks[chunk_idx][slot_idx].fetch_add(1, Ordering::Release);
    }

    fn ensure_capacity(&self, index: u32) {
        let chunk_idx = index as usize / CHUNK_SIZE;
        let chunks_len = self.chunks.read().unwrap_or_else(|e| e.into_inner()).len();

        if chunk_idx >= chunks_len {
            let mut chunks = self.chunks.write().unwrap_or_else(|e| e.into_inner());
            while chunks.len() <= chunk_idx {
                chunks.push(Box::new(std::array::from_fn(|_| AtomicU32::new(0))));
            }
        }
    }
}

/// Hands out entity handles and recycles freed slots.
///
/// Allocation is lock-free for the common path: fresh indices come from an atomic counter and
/// recycled ones from a `SegQueue`, so commands recorded on worker threads can reserve entities
/// without touching the world.
#[derive(Default, Debug)]
pub struct Allocator {
    generations: Generations,

    dead_pool: SegQueue<u32>,

    next_index: AtomicU32,
}

impl Allocator {
    #[inline]
    pub const fn new() -> Self {
        Self {
            generations: Generations::new(),
            dead_pool: SegQueue::new(),
            next_index: AtomicU32::new(0),
        }
    }

    /// Allocate a single entity, reusing a freed slot when one is available.
    pub fn alloc(&self) -> Entity {
        if let Some(index) = self.dead_pool.pop() {
            return Entity::new(index, self.generations.get(index));
        }

        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        self.generations.ensure_capacity(index);
        Entity::new(index, Generation::FIRST)
    }

    /// Allocate `count` entities at once.
    pub fn alloc_many(&self, count: usize) -> Vec<Entity> {
        let mut alloced = Vec::with_capacity(count);
        while alloced.len() < count
            && let Some(index) = self.dead_pool.pop()
        {
            alloced.push(Entity::new(index, self.generations.get(index)));
        }

        let remaining = (count - alloced.len()) as u32;
        if remaining > 0 {
            let start = self.next_index.fetch_add(remaining, Ordering::Relaxed);
            let end = start + remaining;
            self.generations.ensure_capacity(end - 1);
            alloced.extend((start..end).map(|index| Entity::new(index, Generation::FIRST)));
        }

        alloced
    }

    /// Return an entity slot to the pool. The slot's generation is bumped so the old handle can
    /// no longer be resolved.
    pub fn free(&self, entity: Entity) {
        let index = entity.index() as u32;
        self.generations.increment(index);
        self.dead_pool.push(index);
    }

    /// Check whether the handle still carries the current generation of its slot.
    pub fn is_current(&self, entity: Entity) -> bool {
        let index = entity.index() as u32;
        index < self.next_index.load(Ordering::Relaxed)
            && self.generations.get(index) == entity.generation()
    }

    /// Number of slots handed out so far, live or dead.
    pub fn high_water_mark(&self) -> usize {
        self.next_index.load(Ordering::Relaxed) as usize
    }
}
