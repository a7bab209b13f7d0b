use std::{
    any::Any,
    cell::Cell,
    ops::{Deref, DerefMut, Range},
};

use crate::ecs::{
    component::Component,
    entity::Entity,
    error::{Error, Result},
    query::{MatchRecord, TermMatch},
    storage::TableId,
    system::Commands,
    world::World,
};

/// Releases one borrow of a column of the batch's table when dropped.
#[derive(Debug)]
struct BorrowGuard<'b> {
    flag: &'b Cell<isize>,
}

impl Drop for BorrowGuard<'_> {
    fn drop(&mut self) {
        let readers = self.flag.get();
        self.flag.set(if readers < 0 { 0 } else { readers - 1 });
    }
}

#[derive(Debug)]
enum Values<'a, C> {
    Owned(&'a [C]),
    Shared(&'a C),
}

/// Read access to one term for a batch: one value per row, or one value read from another
/// entity and shared by every row.
#[derive(Debug)]
pub struct Field<'a, C> {
    values: Values<'a, C>,
    _guard: Option<BorrowGuard<'a>>,
}

impl<C> Field<'_, C> {
    /// The value for `row` of the batch.
    ///
    /// # Panics
    /// Panics if an owned field has no value at `row`.
    #[inline]
    pub fn get(&self, row: usize) -> &C {
        match &self.values {
            Values::Owned(values) => &values[row],
            Values::Shared(value) => value,
        }
    }

    #[inline]
    pub fn is_shared(&self) -> bool {
        matches!(self.values, Values::Shared(_))
    }

    #[inline]
    pub fn as_slice(&self) -> Option<&[C]> {
        match &self.values {
            Values::Owned(values) => Some(*values),
            Values::Shared(_) => None,
        }
    }
}

impl<C> std::ops::Index<usize> for Field<'_, C> {
    type Output = C;

    fn index(&self, row: usize) -> &C {
        self.get(row)
    }
}

/// Write access to the rows of the batch for one owned term.
#[derive(Debug)]
pub struct FieldMut<'a, C> {
    values: &'a mut [C],
    _guard: BorrowGuard<'a>,
}

impl<C> Deref for FieldMut<'_, C> {
    type Target = [C];

    #[inline]
    fn deref(&self) -> &[C] {
        self.values
    }
}

impl<C> DerefMut for FieldMut<'_, C> {
    #[inline]
    fn deref_mut(&mut self) -> &mut [C] {
        self.values
    }
}

impl<'r, C> IntoIterator for &'r mut FieldMut<'_, C> {
    type Item = &'r mut C;
    type IntoIter = std::slice::IterMut<'r, C>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter_mut()
    }
}

/// One batch of rows handed to a system callback: a contiguous row range of one matched table.
///
/// Fields are addressed by term index, in filter order. Owned terms give one value per row,
/// shared terms one value for the whole batch. Only owned fields are writable, and only for the
/// rows of this batch; other batches of the same table may be running on other threads.
///
/// Borrows follow the rules of `RefCell` per column of the matched table: any number of
/// [`Field`]s, or one [`FieldMut`], until they are dropped. A shared term whose value lives in
/// the matched table counts as a read of that column.
///
/// ```rust,ignore
/// world.add_system(System::new("move", OnUpdate, filter, |rows| {
///     let velocity = rows.field::<Velocity>(1)?;
///     for (i, p) in rows.field_mut::<Position>(0)?.iter_mut().enumerate() {
///         p.x += velocity[i].x * rows.delta_time();
///     }
///     Ok(())
/// }));
/// ```
///
/// A batch never hands out the world it came from:
///
/// ```compile_fail
/// fn peek(rows: &rusty_ecs::ecs::Rows<'_>) {
///     let _ = rows.world();
/// }
/// ```
pub struct Rows<'w> {
    world: &'w World,
    record: &'w MatchRecord<'w>,
    range: Range<usize>,
    delta_time: f32,
    param: Option<&'w (dyn Any + Send + Sync)>,
    /// Per column of the matched table: readers, or -1 while written.
    borrows: Box<[Cell<isize>]>,
}

impl<'w> Rows<'w> {
    pub(crate) fn new(
        world: &'w World,
        record: &'w MatchRecord<'w>,
        range: Range<usize>,
        delta_time: f32,
    ) -> Self {
        debug_assert!(range.end <= record.row_count(), "batch past the end of the table");
        let columns = record.table().columns().len();
        Self {
            world,
            record,
            range,
            delta_time,
            param: None,
            borrows: (0..columns).map(|_| Cell::new(0)).collect(),
        }
    }

    pub(crate) fn with_param(mut self, param: &'w (dyn Any + Send + Sync)) -> Self {
        self.param = Some(param);
        self
    }

    /// Number of rows in the batch.
    #[inline]
    pub fn count(&self) -> usize {
        self.range.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    /// The entities of the batch, one per row.
    #[inline]
    pub fn entities(&self) -> &'w [Entity] {
        &self.record.entity_ids()[self.range.clone()]
    }

    /// The rows of the table covered by this batch.
    #[inline]
    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    #[inline]
    pub fn table_id(&self) -> TableId {
        self.record.table_id()
    }

    /// How term `index` was resolved for this batch.
    #[inline]
    pub fn term(&self, index: usize) -> Option<&TermMatch> {
        self.record.term(index)
    }

    /// The entity named by term `index`: the component, or the alternative that won an `Or`.
    /// This is how [`Source::Handle`](crate::ecs::query::Source::Handle) terms are read.
    pub fn handle(&self, index: usize) -> Result<Entity> {
        self.record
            .term(index)
            .map(|term| term.component)
            .ok_or(Error::NoSuchTerm { term: index })
    }

    /// The component entity of `C`, registering it on first use.
    #[inline]
    pub fn component<C: Component>(&self) -> Entity {
        self.world.component::<C>()
    }

    #[inline]
    pub fn delta_time(&self) -> f32 {
        self.delta_time
    }

    /// The value passed to [`World::run_system_range`], when it is a `P`.
    #[inline]
    pub fn param<P: Any>(&self) -> Option<&'w P> {
        self.param?.downcast_ref::<P>()
    }

    /// Queue structural changes, applied once the current phase has finished.
    #[inline]
    pub fn commands(&self) -> Commands<'w> {
        self.world.commands()
    }

    /// Read the values of term `index`.
    ///
    /// # Panics
    /// Panics if the column the values live in is currently written.
    pub fn field<C: Component>(&self, index: usize) -> Result<Field<'_, C>> {
        let term = self.present_term(index)?;
        match term.source() {
            Some(source) => {
                let storage = self.world.storage();
                let guard = storage
                    .record(source)
                    .ok()
                    .filter(|record| record.table == self.table_id())
                    .and_then(|_| self.record.table().column_index(term.component))
                    .map(|column| self.borrow(index, column, false));
                let value = storage
                    .get::<C>(source, term.component)?
                    .ok_or(Error::NoSuchTerm { term: index })?;
                Ok(Field {
                    values: Values::Shared(value),
                    _guard: guard,
                })
            }
            None => {
                let (column, ptr) = self.column_ptr::<C>(index, term)?;
                let guard = self.borrow(index, column, false);
                // SAFETY: type checked, `range` lies within the table, and writers of the column
                // are excluded by the guard.
                let values = unsafe { std::slice::from_raw_parts(ptr, self.range.len()) };
                Ok(Field {
                    values: Values::Owned(values),
                    _guard: Some(guard),
                })
            }
        }
    }

    /// Write access to the values of owned term `index`.
    ///
    /// # Panics
    /// Panics if the column the values live in is already borrowed.
    pub fn field_mut<C: Component>(&self, index: usize) -> Result<FieldMut<'_, C>> {
        let term = self.present_term(index)?;
        if term.is_shared() {
            return Err(Error::ReadOnly { term: index });
        }
        let (column, ptr) = self.column_ptr::<C>(index, term)?;
        let guard = self.borrow(index, column, true);
        // SAFETY: type checked, `range` lies within the table and is not handed to any other
        // batch, and the guard makes this the only borrow of the column.
        let values = unsafe { std::slice::from_raw_parts_mut(ptr, self.range.len()) };
        Ok(FieldMut {
            values,
            _guard: guard,
        })
    }

    /// Write one value of owned term `index`. `row` is relative to the batch.
    ///
    /// # Panics
    /// Panics if `row` is outside the batch.
    pub fn set<C: Component>(&mut self, index: usize, row: usize, value: C) -> Result<()> {
        self.field_mut::<C>(index)?[row] = value;
        Ok(())
    }

    fn present_term(&self, index: usize) -> Result<&TermMatch> {
        self.record
            .term(index)
            .filter(|term| term.is_present())
            .ok_or(Error::NoSuchTerm { term: index })
    }

    /// The column of owned term `index` and a pointer to the first value of the batch in it.
    fn column_ptr<C: Component>(&self, index: usize, term: &TermMatch) -> Result<(usize, *mut C)> {
        let column = term.column().ok_or(Error::NoSuchTerm { term: index })?;
        let ptr = self
            .record
            .table()
            .column(column)
            .typed_ptr::<C>(self.range.start)?;
        Ok((column, ptr))
    }

    fn borrow(&self, index: usize, column: usize, exclusive: bool) -> BorrowGuard<'_> {
        let flag = &self.borrows[column];
        match (flag.get(), exclusive) {
            (0, true) => flag.set(-1),
            (readers, false) if readers >= 0 => flag.set(readers + 1),
            _ => panic!("term {index} is already borrowed"),
        }
        BorrowGuard { flag }
    }
}
