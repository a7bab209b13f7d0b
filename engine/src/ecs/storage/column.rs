use std::{any::TypeId, ptr::NonNull};

use crate::ecs::{
    component::Component,
    entity::Entity,
    error::{Error, Result},
    storage::{
        map::MemoryUsage,
        mem::IndexedMemory,
        row::Row,
    },
    world::TypeInfo,
};

/// Type-erased, contiguous storage for the values of one component in one table.
///
/// Similar to `Vec<T>` without the `T`: the element layout and the drop, clone and default
/// functions come from the component's [`TypeInfo`]. Typed access checks the requested Rust type
/// against the stored one and reports [`Error::TypeMismatch`] instead of reinterpreting memory.
///
/// Table migration works on raw slots through the `unsafe` push/detach functions. Their contract
/// is the usual one for type-erased storage:
/// - every slot in `0..len` is initialized with a value of the column's type
/// - capacity for a push has been reserved with [`Column::try_reserve`] beforehand
/// - a value moved out bitwise is never dropped in its old slot
pub struct Column {
    data: IndexedMemory,

    /// Number of initialized slots.
    len: usize,

    /// The component entity stored here.
    component: Entity,

    info: TypeInfo,
}

impl Column {
    #[inline]
    pub fn new(component: Entity, info: TypeInfo) -> Self {
        Self {
            data: IndexedMemory::new(info.layout(), 2),
            len: 0,
            component,
            info,
        }
    }

    #[inline]
    pub fn component(&self) -> Entity {
        self.component
    }

    #[inline]
    pub fn info(&self) -> &TypeInfo {
        &self.info
    }

    #[inline]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// Make room for `additional` more values without reallocating.
    #[inline]
    pub fn try_reserve(&mut self, additional: usize) -> Result<()> {
        self.data.try_reserve(self.len + additional)
    }

    /// Like [`try_reserve`](Self::try_reserve), without over-allocating.
    #[inline]
    pub fn try_reserve_exact(&mut self, additional: usize) -> Result<()> {
        self.data.try_reserve_exact(self.len + additional)
    }

    pub(crate) fn check_type<C: Component>(&self) -> Result<()> {
        if TypeId::of::<C>() == self.info.type_id() {
            Ok(())
        } else {
            Err(Error::TypeMismatch {
                expected: self.info.name(),
                found: TypeInfo::of::<C>().name(),
            })
        }
    }

    /// Push a typed value, growing as needed.
    pub fn push<C: Component>(&mut self, value: C) -> Result<()> {
        self.check_type::<C>()?;
        self.try_reserve(1)?;
        // SAFETY: type checked, capacity reserved, slot `len` is uninitialized.
        unsafe {
            (self.data.ptr_at(self.len).as_ptr() as *mut C).write(value);
        }
        self.len += 1;
        Ok(())
    }

    #[inline]
    fn next_slot(&self) -> NonNull<u8> {
        debug_assert!(
            self.len < self.data.capacity(),
            "push without reserved capacity"
        );
        self.data.ptr_at(self.len)
    }

    /// Push a value by moving its bytes from `src`.
    ///
    /// # Safety
    /// `src` must hold an initialized value of this column's type that the caller will not use or
    /// drop again. Capacity must already be reserved.
    pub unsafe fn push_moved(&mut self, src: NonNull<u8>) {
        let dst = self.next_slot();
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), dst.as_ptr(), self.info.layout().size());
        }
        self.len += 1;
    }

    /// Push a clone of the value at `src`.
    ///
    /// # Safety
    /// `src` must hold an initialized value of this column's type. Capacity must already be
    /// reserved.
    pub unsafe fn push_cloned(&mut self, src: NonNull<u8>) {
        let dst = self.next_slot();
        unsafe { (self.info.clone_fn())(src, dst) };
        self.len += 1;
    }

    /// Push a default constructed value.
    ///
    /// # Safety
    /// Capacity must already be reserved.
    pub unsafe fn push_default(&mut self) {
        let dst = self.next_slot();
        unsafe { (self.info.default_fn())(dst) };
        self.len += 1;
    }

    /// Pointer to the value at `row`.
    ///
    /// # Panics
    /// Panics in debug builds if `row` is not initialized.
    #[inline]
    pub(crate) fn ptr_at(&self, row: Row) -> NonNull<u8> {
        debug_assert!(self.is_row_valid(row), "invalid {row}");
        self.data.ptr_at(row.index())
    }

    /// Typed pointer to the value at `start`. Batches derive their row slices from it, so
    /// no reference to the whole column is ever formed while workers write disjoint ranges.
    pub(crate) fn typed_ptr<C: Component>(&self, start: usize) -> Result<*mut C> {
        self.check_type::<C>()?;
        debug_assert!(start <= self.len, "start {start} past length {}", self.len);
        // SAFETY: `start` is at most `len`, within the allocation or one past it.
        Ok(unsafe { (self.data.as_ptr().as_ptr() as *mut C).add(start) })
    }

    pub(crate) fn get<C: Component>(&self, row: Row) -> Result<Option<&C>> {
        self.check_type::<C>()?;
        if !self.is_row_valid(row) {
            return Ok(None);
        }
        // SAFETY: type checked and row initialized.
        Ok(Some(unsafe { &*(self.data.ptr_at(row.index()).as_ptr() as *const C) }))
    }

    pub(crate) fn get_mut<C: Component>(&mut self, row: Row) -> Result<Option<&mut C>> {
        self.check_type::<C>()?;
        if !self.is_row_valid(row) {
            return Ok(None);
        }
        // SAFETY: type checked, row initialized and `&mut self` is exclusive.
        Ok(Some(unsafe {
            &mut *(self.data.ptr_at(row.index()).as_ptr() as *mut C)
        }))
    }


    /// Drop the value at `row` and move the last value into its place.
    ///
    /// # Panics
    /// Panics in debug builds if `row` is not initialized.
    pub fn swap_remove(&mut self, row: Row) {
        debug_assert!(self.is_row_valid(row), "invalid {row}");
        let last = self.len - 1;
        let removed = self.data.ptr_at(row.index());
        let last_ptr = self.data.ptr_at(last);

        if row.index() != last {
            // SAFETY: distinct initialized slots of the same size.
            unsafe {
                std::ptr::swap_nonoverlapping(
                    removed.as_ptr(),
                    last_ptr.as_ptr(),
                    self.info.layout().size(),
                );
            }
        }
        self.len -= 1;
        // SAFETY: the removed value now sits in the last slot, outside `0..len`.
        unsafe { (self.info.drop_fn())(last_ptr) };
    }

    /// Move the last value into `row` without dropping what was there.
    ///
    /// # Safety
    /// The value at `row` must already have been moved out with [`Column::push_moved`] into
    /// another column, so it is treated as uninitialized.
    pub unsafe fn swap_remove_moved(&mut self, row: Row) {
        debug_assert!(self.is_row_valid(row), "invalid {row}");
        let last = self.len - 1;
        if row.index() != last {
            unsafe {
                std::ptr::copy_nonoverlapping(
                    self.data.ptr_at(last).as_ptr(),
                    self.data.ptr_at(row.index()).as_ptr(),
                    self.info.layout().size(),
                );
            }
        }
        self.len -= 1;
    }

    /// Drop the value at `row` and shift every later value down by one, keeping order.
    ///
    /// # Panics
    /// Panics in debug builds if `row` is not initialized.
    pub fn remove(&mut self, row: Row) {
        debug_assert!(self.is_row_valid(row), "invalid {row}");
        let size = self.info.layout().size();
        let removed = self.data.ptr_at(row.index());
        let tail = self.len - row.index() - 1;
        // SAFETY: row is initialized; the tail shift stays inside `0..len`.
        unsafe {
            (self.info.drop_fn())(removed);
            if tail > 0 {
                std::ptr::copy(
                    self.data.ptr_at(row.index() + 1).as_ptr(),
                    removed.as_ptr(),
                    tail * size,
                );
            }
        }
        self.len -= 1;
    }

    /// Drop every value.
    pub fn clear(&mut self) {
        let len = self.len;
        // Set first so a panicking destructor cannot cause a double drop.
        self.len = 0;
        for i in 0..len {
            // SAFETY: slots `0..len` were initialized.
            unsafe { (self.info.drop_fn())(self.data.ptr_at(i)) };
        }
    }

    pub fn memory_usage(&self) -> MemoryUsage {
        MemoryUsage {
            reserved: self.data.allocated_bytes(),
            used: self.len * self.info.layout().size(),
        }
    }

    #[inline]
    pub fn is_row_valid(&self, row: Row) -> bool {
        row.index() < self.len
    }
}

impl Drop for Column {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;
    use crate::ecs::entity::Allocator;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }
    impl Component for Position {}

    #[derive(Debug, Default, Clone)]
    struct Counted(Option<Arc<AtomicUsize>>);
    impl Component for Counted {}

    impl Drop for Counted {
        fn drop(&mut self) {
            if let Some(counter) = &self.0 {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn column<C: Component>() -> Column {
        let allocator = Allocator::new();
        Column::new(allocator.alloc(), TypeInfo::of::<C>())
    }

    fn values<C: Component + Clone>(col: &Column) -> Vec<C> {
        (0..col.len())
            .map(|row| col.get::<C>(Row::new(row)).unwrap().unwrap().clone())
            .collect()
    }

    #[test]
    fn push_and_read_back() {
        // Given
        let mut col = column::<Position>();

        // When
        col.push(Position { x: 1.0, y: 2.0 }).unwrap();
        col.push(Position { x: 3.0, y: 4.0 }).unwrap();

        // Then
        assert_eq!(col.len(), 2);
        assert_eq!(
            col.get::<Position>(Row::new(1)).unwrap(),
            Some(&Position { x: 3.0, y: 4.0 })
        );
        assert_eq!(col.get::<Position>(Row::new(2)).unwrap(), None);
        assert_eq!(values::<Position>(&col).len(), 2);
    }

    #[test]
    fn wrong_type_is_rejected() {
        let mut col = column::<Position>();
        col.push(Position::default()).unwrap();

        let result = col.get::<Counted>(Row::new(0));

        assert_eq!(
            result.err(),
            Some(Error::TypeMismatch {
                expected: "Position",
                found: "Counted"
            })
        );
    }

    #[test]
    fn swap_remove_moves_last_and_drops_removed() {
        // Given
        let dropped = Arc::new(AtomicUsize::new(0));
        let mut col = column::<Counted>();
        for _ in 0..3 {
            col.push(Counted(Some(dropped.clone()))).unwrap();
        }
        col.push(Counted(None)).unwrap();

        // When
        col.swap_remove(Row::new(0));

        // Then - the untracked last value now lives in row 0
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
        assert_eq!(col.len(), 3);
        assert!(col.get::<Counted>(Row::new(0)).unwrap().unwrap().0.is_none());
    }

    #[test]
    fn moved_values_are_not_dropped_twice() {
        // Given
        let dropped = Arc::new(AtomicUsize::new(0));
        let mut src = column::<Counted>();
        let mut dst = column::<Counted>();
        src.push(Counted(Some(dropped.clone()))).unwrap();
        src.push(Counted(Some(dropped.clone()))).unwrap();

        // When
        dst.try_reserve(1).unwrap();
        unsafe {
            dst.push_moved(src.ptr_at(Row::new(0)));
            src.swap_remove_moved(Row::new(0));
        }

        // Then
        assert_eq!(dropped.load(Ordering::SeqCst), 0);
        assert_eq!((src.len(), dst.len()), (1, 1));
        drop(src);
        drop(dst);
        assert_eq!(dropped.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn push_cloned_and_default() {
        let mut col = column::<Position>();
        let prefab = Position { x: 10.0, y: 20.0 };

        col.try_reserve(2).unwrap();
        unsafe {
            col.push_cloned(NonNull::from(&prefab).cast());
            col.push_default();
        }

        assert_eq!(values::<Position>(&col), vec![prefab, Position::default()]);
    }

    #[test]
    fn remove_keeps_order() {
        // Given
        let mut col = column::<Position>();
        for i in 0..4 {
            col.push(Position { x: i as f32, y: 0.0 }).unwrap();
        }

        // When
        col.remove(Row::new(1));

        // Then
        let xs: Vec<f32> = values::<Position>(&col).iter().map(|p| p.x).collect();
        assert_eq!(xs, vec![0.0, 2.0, 3.0]);
    }

    #[test]
    fn typed_ptr_points_at_the_row() {
        // Given
        let mut col = column::<Position>();
        col.try_reserve_exact(3).unwrap();
        for i in 0..3 {
            col.push(Position { x: i as f32, y: 0.0 }).unwrap();
        }

        // When
        let ptr = col.typed_ptr::<Position>(2).unwrap();

        // Then
        assert_eq!(col.capacity(), 3);
        assert_eq!(unsafe { &*ptr }, &Position { x: 2.0, y: 0.0 });
        assert!(col.typed_ptr::<Counted>(0).is_err());
    }

    #[test]
    fn clear_drops_everything() {
        let dropped = Arc::new(AtomicUsize::new(0));
        let mut col = column::<Counted>();
        for _ in 0..5 {
            col.push(Counted(Some(dropped.clone()))).unwrap();
        }

        col.clear();

        assert!(col.is_empty());
        assert_eq!(dropped.load(Ordering::SeqCst), 5);
        assert!(col.memory_usage().reserved > 0);
        assert_eq!(col.memory_usage().used, 0);
    }
}
