use crate::ecs::{
    entity::Entity,
    error::{Error, Result},
    storage::{
        TableId,
        map::{IndexMap, MemoryUsage},
        row::Row,
    },
};

/// Where an entity's data lives: a table and a row in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record {
    pub table: TableId,
    pub row: Row,
}

impl Record {
    #[inline]
    pub const fn new(table: TableId, row: Row) -> Self {
        Self { table, row }
    }
}

/// Maps every live entity to its [`Record`].
///
/// Keys are the full 64-bit entity handle, so a stale handle (older generation) misses and
/// reports [`Error::NotFound`] even when its slot has been reused.
///
/// During a migration the record is the last thing written: while rows are being staged the
/// index still points at the old location, which stays valid until the final `set`.
pub struct EntityIndex {
    records: IndexMap<Record>,
}

impl EntityIndex {
    #[inline]
    pub fn new() -> Self {
        Self {
            records: IndexMap::new(),
        }
    }

    /// Pre-size for `hint` entities. The index never shrinks below this on `clear`.
    #[inline]
    pub fn with_capacity(hint: usize) -> Self {
        Self {
            records: IndexMap::with_capacity(hint),
        }
    }

    #[inline]
    pub fn get(&self, entity: Entity) -> Result<Record> {
        self.records
            .get(entity.to_bits())
            .copied()
            .ok_or(Error::NotFound(entity))
    }

    #[inline]
    pub fn contains(&self, entity: Entity) -> bool {
        self.records.contains_key(entity.to_bits())
    }

    /// Insert or move an entity.
    #[inline]
    pub fn set(&mut self, entity: Entity, record: Record) {
        self.records.set(entity.to_bits(), record);
    }

    /// Point an existing entity at a new row in its current table.
    ///
    /// # Panics
    /// Panics in debug builds if the entity is not indexed.
    #[inline]
    pub(crate) fn set_row(&mut self, entity: Entity, row: Row) {
        let record = self.records.get_mut(entity.to_bits());
        debug_assert!(
            record.is_some(),
            "invariant violation: {entity} moved rows but has no record"
        );
        if let Some(record) = record {
            record.row = row;
        }
    }

    #[inline]
    pub fn remove(&mut self, entity: Entity) -> Result<Record> {
        self.records
            .remove(entity.to_bits())
            .ok_or(Error::NotFound(entity))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Every indexed entity with its record, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (Entity, Record)> + '_ {
        self.records
            .iter()
            .map(|(bits, record)| (Entity::from_bits(bits), *record))
    }

    #[inline]
    pub fn clear(&mut self) {
        self.records.clear();
    }

    #[inline]
    pub fn memory_usage(&self) -> MemoryUsage {
        self.records.memory_usage()
    }
}

impl Default for EntityIndex {
    fn default() -> Self {
        Self::new()
    }
}
