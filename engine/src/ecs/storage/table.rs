use std::fmt;

use log::trace;

use crate::ecs::{
    component::{Id as ComponentId, Signature},
    entity::Entity,
    error::{Error, Result},
    storage::{
        column::Column,
        map::{IndexMap, MemoryUsage},
        row::Row,
    },
};

/// The identifier for a table in storage.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(u32);

impl Id {
    /// The table with the empty signature. Entities without components live here.
    pub const ROOT: Id = Id(0);

    #[inline]
    pub const fn new(id: u32) -> Self {
        Id(id)
    }

    /// Get the index for this Id.
    #[inline]
    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table {}", self.0)
    }
}

/// Cached transitions out of a table for one signature entry.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    /// The table reached by adding the entry.
    pub add: Option<Id>,
    /// The table reached by removing the entry.
    pub remove: Option<Id>,
}

/// A table stores the entities of one signature and their component data in columns.
///
/// ```text
///             entities   Position   Velocity        (Frozen tag: no column)
///  row 0  ->  e4         {1, 2}     {0, 1}
///  row 1  ->  e9         {5, 5}     {1, 0}
///  row 2  ->  e2         {0, 0}     {2, 2}
/// ```
///
/// Only components with a non-zero sized [`TypeInfo`](crate::ecs::world::TypeInfo) get a column;
/// tags, links and zero-sized components exist only in the signature.
///
/// # Invariants
/// - `entities.len()` equals the length of every column
/// - the column map holds exactly one entry per column
pub struct Table {
    id: Id,

    signature: Signature,

    /// The entities stored in this table (one per row).
    entities: Vec<Entity>,

    /// One column per data component, in signature order.
    columns: Vec<Column>,

    /// Component entity bits -> column index.
    column_map: IndexMap<usize>,

    /// Signature entry bits -> cached neighbour tables.
    edges: IndexMap<Edge>,
}

impl Table {
    /// Create a table. `columns` must be empty and follow signature order.
    pub fn new(id: Id, signature: Signature, columns: Vec<Column>) -> Self {
        let mut column_map = IndexMap::with_capacity(columns.len());
        for (index, column) in columns.iter().enumerate() {
            debug_assert!(column.is_empty());
            column_map.set(column.component().to_bits(), index);
        }
        Self {
            id,
            signature,
            entities: Vec::new(),
            columns,
            column_map,
            edges: IndexMap::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> Id {
        self.id
    }

    #[inline]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Get the number of entities (rows) in the table.
    #[inline]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    #[inline]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    #[inline]
    pub fn entity(&self, row: Row) -> Option<Entity> {
        self.entities.get(row.index()).copied()
    }

    #[inline]
    pub(crate) fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Index of the column storing `component`, if it has one in this table.
    #[inline]
    pub fn column_index(&self, component: Entity) -> Option<usize> {
        self.column_map.get(component.to_bits()).copied()
    }

    #[inline]
    pub(crate) fn column(&self, index: usize) -> &Column {
        &self.columns[index]
    }

    #[inline]
    pub(crate) fn column_mut(&mut self, index: usize) -> &mut Column {
        &mut self.columns[index]
    }

    /// Get the column storing `component`.
    #[inline]
    pub(crate) fn column_for(&self, component: Entity) -> Option<&Column> {
        self.column_index(component).map(|index| &self.columns[index])
    }

    #[inline]
    pub(crate) fn column_for_mut(&mut self, component: Entity) -> Option<&mut Column> {
        self.column_index(component)
            .map(move |index| &mut self.columns[index])
    }

    /// The cached transitions for `id`.
    #[inline]
    pub fn edge(&self, id: ComponentId) -> Edge {
        self.edges.get_or_default(id.to_bits())
    }

    #[inline]
    pub(crate) fn set_add_edge(&mut self, id: ComponentId, to: Id) {
        self.edges.get_or_insert_with(id.to_bits(), Edge::default).add = Some(to);
    }

    #[inline]
    pub(crate) fn set_remove_edge(&mut self, id: ComponentId, to: Id) {
        self.edges
            .get_or_insert_with(id.to_bits(), Edge::default)
            .remove = Some(to);
    }

    /// Reserve room for `additional` rows in the entity list and every column.
    pub fn try_reserve(&mut self, additional: usize) -> Result<()> {
        self.entities
            .try_reserve(additional)
            .map_err(|_| Error::OutOfMemory {
                bytes: additional * size_of::<Entity>(),
            })?;
        for column in self.columns.iter_mut() {
            column.try_reserve(additional)?;
        }
        Ok(())
    }

    /// Reserve room for exactly `additional` more rows.
    pub fn try_reserve_exact(&mut self, additional: usize) -> Result<()> {
        self.entities
            .try_reserve_exact(additional)
            .map_err(|_| Error::OutOfMemory {
                bytes: additional * size_of::<Entity>(),
            })?;
        for column in self.columns.iter_mut() {
            column.try_reserve_exact(additional)?;
        }
        Ok(())
    }

    /// Append `entity` once every column has been given a value for the new row.
    pub(crate) fn push_entity(&mut self, entity: Entity) -> Row {
        let row = Row::new(self.entities.len());
        self.entities.push(entity);

        #[cfg(debug_assertions)]
        self.verify_invariants();

        row
    }

    /// Remove the row at `row`, dropping its values. Returns the entity swapped into `row`, if any.
    pub fn swap_remove(&mut self, row: Row) -> Option<Entity> {
        for column in self.columns.iter_mut() {
            column.swap_remove(row);
        }
        self.swap_remove_entity(row)
    }

    /// Remove the row at `row` after some of its values were moved to another table. Columns for
    /// which `moved` returns true are not dropped. Returns the entity swapped into `row`, if any.
    ///
    /// # Safety
    /// Every column flagged by `moved` must have had its value at `row` moved out bitwise.
    pub(crate) unsafe fn swap_remove_moved(
        &mut self,
        row: Row,
        moved: impl Fn(Entity) -> bool,
    ) -> Option<Entity> {
        for column in self.columns.iter_mut() {
            if moved(column.component()) {
                unsafe { column.swap_remove_moved(row) };
            } else {
                column.swap_remove(row);
            }
        }
        self.swap_remove_entity(row)
    }

    fn swap_remove_entity(&mut self, row: Row) -> Option<Entity> {
        let last = self.entities.len() - 1;
        self.entities.swap_remove(row.index());
        trace!("{} swap removed {row}", self.id);

        #[cfg(debug_assertions)]
        self.verify_invariants();

        (row.index() != last).then(|| self.entities[row.index()])
    }

    /// Bytes reserved and used by the entity list, columns and lookup maps.
    pub fn memory_usage(&self) -> MemoryUsage {
        let entities = MemoryUsage {
            reserved: self.entities.capacity() * size_of::<Entity>(),
            used: self.entities.len() * size_of::<Entity>(),
        };
        self.columns
            .iter()
            .map(Column::memory_usage)
            .fold(entities, |total, usage| total + usage)
            + self.column_map.memory_usage()
            + self.edges.memory_usage()
    }

    /// Verify that all columns have the same length as the entities vector.
    ///
    /// # Panics
    /// Panics if any column length differs from the entity count.
    pub fn verify_invariants(&self) {
        for column in self.columns.iter() {
            assert_eq!(
                column.len(),
                self.entities.len(),
                "invariant violation: column for {} has {} rows, {} has {} entities",
                column.component(),
                column.len(),
                self.id,
                self.entities.len()
            );
        }
    }
}
