//! Raw, type-erased element memory.
//!
//! [`IndexedMemory`] owns one contiguous allocation of uniformly sized elements and hands out
//! pointers by index. It does not know whether a slot is initialized and never drops values; that
//! is the job of [`Column`](super::column::Column), which layers length tracking and the
//! component's drop/clone functions on top.
//!
//! Growth is fallible. Table migration reserves destination space before touching the source row
//! so an allocation failure surfaces as [`Error::OutOfMemory`] with the world unchanged.
//!
//! # Growth
//!
//! [`IndexedMemory::try_reserve`] grows to `factor` times the current capacity, or to the request
//! when that is larger. [`IndexedMemory::try_reserve_exact`] grows to exactly the request and is
//! used when the final row count is known up front, as in bulk creation.
//!
//! Zero-sized element layouts never allocate; every index maps to the same aligned dangling
//! pointer and the capacity is unbounded.

use std::{
    alloc::{self, Layout},
    cmp,
    ptr::{self, NonNull},
};

use crate::ecs::error::{Error, Result};

/// A contiguous block of memory holding elements of one layout, addressed by index.
///
/// # Safety
///
/// The caller must only read initialized slots, drop values before they are overwritten or the
/// block is freed, and stay within [`capacity`](Self::capacity).
pub struct IndexedMemory {
    ptr: NonNull<u8>,
    capacity: usize,
    element_layout: Layout,
    /// Capacity multiplier applied by `try_reserve`.
    factor: usize,
}

impl IndexedMemory {
    /// An empty block. Nothing is allocated until the first reservation.
    pub fn new(element_layout: Layout, factor: usize) -> Self {
        let zero_sized = element_layout.size() == 0;
        Self {
            ptr: Self::dangling(element_layout),
            capacity: if zero_sized { usize::MAX } else { 0 },
            element_layout,
            factor: factor.max(1),
        }
    }

    fn dangling(layout: Layout) -> NonNull<u8> {
        // SAFETY: alignment is never zero.
        unsafe { NonNull::new_unchecked(ptr::without_provenance_mut(layout.align())) }
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently allocated.
    #[inline]
    pub fn allocated_bytes(&self) -> usize {
        if self.element_layout.size() == 0 {
            0
        } else {
            self.capacity * self.element_layout.size()
        }
    }

    /// Pointer to the slot at `index`.
    ///
    /// # Panics
    /// Panics in debug builds if `index >= capacity()`.
    #[inline]
    pub fn ptr_at(&self, index: usize) -> NonNull<u8> {
        debug_assert!(
            index < self.capacity,
            "index {} out of bounds (capacity: {})",
            index,
            self.capacity
        );
        // SAFETY: in bounds of the allocation, or a zero byte offset for ZSTs.
        unsafe { NonNull::new_unchecked(self.ptr.as_ptr().add(index * self.element_layout.size())) }
    }

    /// Pointer to the first slot.
    #[inline]
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Make sure at least `required` elements fit, growing by the configured factor.
    pub fn try_reserve(&mut self, required: usize) -> Result<()> {
        if required <= self.capacity {
            return Ok(());
        }
        let new_capacity = cmp::max(self.capacity.saturating_mul(self.factor), required);
        self.try_grow_to(new_capacity)
    }

    /// Make sure at least `required` elements fit, growing to exactly that capacity.
    pub fn try_reserve_exact(&mut self, required: usize) -> Result<()> {
        if required <= self.capacity {
            return Ok(());
        }
        self.try_grow_to(required)
    }

    fn array_layout(&self, capacity: usize) -> Result<Layout> {
        capacity
            .checked_mul(self.element_layout.size())
            .and_then(|size| Layout::from_size_align(size, self.element_layout.align()).ok())
            .ok_or(Error::OutOfMemory { bytes: usize::MAX })
    }

    /// Grow the allocation to `capacity` elements, moving existing bytes.
    fn try_grow_to(&mut self, capacity: usize) -> Result<()> {
        debug_assert!(self.element_layout.size() > 0);
        let new_layout = self.array_layout(capacity)?;

        let new_ptr = if self.capacity == 0 {
            // SAFETY: non-zero size, checked above.
            unsafe { alloc::alloc(new_layout) }
        } else {
            let old_layout = self.array_layout(self.capacity)?;
            // SAFETY: ptr was allocated with old_layout by this block.
            unsafe { alloc::realloc(self.ptr.as_ptr(), old_layout, new_layout.size()) }
        };

        // On failure the old block is still valid and owned by us.
        let ptr = NonNull::new(new_ptr).ok_or(Error::OutOfMemory {
            bytes: new_layout.size(),
        })?;
        self.ptr = ptr;
        self.capacity = capacity;
        Ok(())
    }
}

impl Drop for IndexedMemory {
    fn drop(&mut self) {
        if self.element_layout.size() == 0 || self.capacity == 0 {
            return;
        }
        if let Ok(layout) = self.array_layout(self.capacity) {
            // SAFETY: allocated with this layout in try_grow_to.
            unsafe { alloc::dealloc(self.ptr.as_ptr(), layout) }
        }
    }
}

// SAFETY: the block owns its allocation. Column only stores `Component` types, which are
// `Send + Sync`.
unsafe impl Send for IndexedMemory {}
unsafe impl Sync for IndexedMemory {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_memory_is_empty() {
        let mem = IndexedMemory::new(Layout::new::<u32>(), 2);
        assert_eq!(mem.capacity(), 0);
        assert_eq!(mem.allocated_bytes(), 0);
    }

    #[test]
    fn reserve_grows_by_factor() {
        // Given
        let mut mem = IndexedMemory::new(Layout::new::<u32>(), 2);

        // When
        mem.try_reserve(3).unwrap();
        let first = mem.capacity();
        mem.try_reserve(4).unwrap();

        // Then
        assert_eq!(first, 3);
        assert_eq!(mem.capacity(), 6);
        assert_eq!(mem.allocated_bytes(), 24);
    }

    #[test]
    fn reserve_within_capacity_is_a_no_op() {
        let mut mem = IndexedMemory::new(Layout::new::<u64>(), 2);
        mem.try_reserve_exact(16).unwrap();
        let ptr = mem.as_ptr();

        mem.try_reserve(10).unwrap();

        assert_eq!(mem.capacity(), 16);
        assert_eq!(mem.as_ptr(), ptr);
    }

    #[test]
    fn reserve_exact_ignores_factor() {
        let mut mem = IndexedMemory::new(Layout::new::<u32>(), 4);
        mem.try_reserve_exact(5).unwrap();
        mem.try_reserve_exact(6).unwrap();
        assert_eq!(mem.capacity(), 6);
    }

    #[test]
    fn realloc_preserves_data() {
        // Given
        let mut mem = IndexedMemory::new(Layout::new::<i32>(), 1);
        mem.try_reserve(2).unwrap();
        unsafe {
            (mem.ptr_at(0).as_ptr() as *mut i32).write(42);
            (mem.ptr_at(1).as_ptr() as *mut i32).write(99);
        }

        // When
        mem.try_reserve(100).unwrap();

        // Then
        unsafe {
            assert_eq!((mem.ptr_at(0).as_ptr() as *const i32).read(), 42);
            assert_eq!((mem.ptr_at(1).as_ptr() as *const i32).read(), 99);
        }
    }

    #[test]
    fn impossible_reservation_is_out_of_memory() {
        let mut mem = IndexedMemory::new(Layout::new::<u64>(), 1);

        let result = mem.try_reserve(usize::MAX / 2);

        assert!(matches!(result, Err(Error::OutOfMemory { .. })));
        assert_eq!(mem.capacity(), 0);
    }

    #[test]
    fn zero_sized_layout_never_allocates() {
        struct Marker;
        let mut mem = IndexedMemory::new(Layout::new::<Marker>(), 1);

        mem.try_reserve(1_000_000).unwrap();

        assert_eq!(mem.allocated_bytes(), 0);
        assert_eq!(mem.ptr_at(0), mem.ptr_at(999_999));
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    #[cfg(debug_assertions)]
    fn ptr_at_bounds_check_debug() {
        let mut mem = IndexedMemory::new(Layout::new::<u32>(), 1);
        mem.try_reserve(5).unwrap();
        let _ = mem.ptr_at(10);
    }

    #[test]
    fn factor_applies_to_current_capacity() {
        // Given
        let mut mem = IndexedMemory::new(Layout::new::<u32>(), 2);
        mem.try_reserve_exact(10).unwrap();

        // When
        mem.try_reserve(11).unwrap();
        let doubled = mem.capacity();
        mem.try_reserve(45).unwrap();

        // Then
        assert_eq!(doubled, 20);
        assert_eq!(mem.capacity(), 45);
    }
}
