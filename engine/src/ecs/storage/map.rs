//! Integer keyed hash map with O(1) removal.
//!
//! [`IndexMap`] is the index structure behind every hot lookup in storage: entity → record,
//! signature hash → table, component → column and table edges. It is tuned for heavy churn
//! (entities gain and lose components every frame) rather than for general purpose use.
//!
//! # Layout
//!
//! ```text
//! buckets:  [ 2 | - | 0 | - ]          bucket = key % bucket_count
//!             │       │
//!             ▼       ▼
//! nodes:    [ {k:6, prev:-, next:-},   0
//!             {k:4, prev:2, next:-},   1
//!             {k:8, prev:-, next:1} ]  2
//! ```
//!
//! Nodes live in one dense `Vec` and are chained per bucket with `prev`/`next` **indices**, never
//! addresses, so the pool may reallocate freely. Insertion prepends to the chain. Removal unlinks
//! the node and then swap-removes it from the pool, patching the links of the node that moved
//! into its slot (its neighbours, or the bucket head when it starts a chain).
//!
//! # Growth
//!
//! | Event | Action |
//! |-------|--------|
//! | first insert into an empty map | 2 buckets |
//! | `len / bucket_count > 0.75` | double the buckets, relink every node |
//! | `clear()` | shrink buckets to `max(len / 0.75, minimum)` when that is below 75% of the current count |
//!
//! The minimum is the bucket count derived from the hint given to [`IndexMap::with_capacity`].

use std::mem;

use log::trace;

const LOAD_FACTOR: f32 = 0.75;

/// Bucket count needed to hold `count` nodes under the load factor.
#[inline]
fn buckets_for(count: usize) -> usize {
    (count as f32 / LOAD_FACTOR).ceil() as usize
}

/// Position of a node in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NodeIndex(u32);

impl NodeIndex {
    #[inline]
    fn new(index: usize) -> Self {
        debug_assert!(index <= u32::MAX as usize, "node pool overflow");
        Self(index as u32)
    }

    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
struct Node<V> {
    key: u64,
    value: V,
    prev: Option<NodeIndex>,
    next: Option<NodeIndex>,
}

/// Bytes held by a map: `reserved` counts allocated capacity, `used` what live entries need.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MemoryUsage {
    pub reserved: usize,
    pub used: usize,
}

impl std::ops::Add for MemoryUsage {
    type Output = MemoryUsage;

    fn add(self, rhs: Self) -> Self::Output {
        MemoryUsage {
            reserved: self.reserved + rhs.reserved,
            used: self.used + rhs.used,
        }
    }
}

/// Hash map from `u64` keys to `V` with chained buckets and a dense node pool.
#[derive(Debug, Clone)]
pub struct IndexMap<V> {
    /// Head node of each bucket chain.
    buckets: Vec<Option<NodeIndex>>,

    /// Dense node pool, in insertion order until removals swap nodes around.
    nodes: Vec<Node<V>>,

    /// Bucket count `clear` never shrinks below.
    min_buckets: usize,
}

impl<V> IndexMap<V> {
    /// Create an empty map. No memory is allocated until the first insert.
    #[inline]
    pub const fn new() -> Self {
        Self {
            buckets: Vec::new(),
            nodes: Vec::new(),
            min_buckets: 0,
        }
    }

    /// Create a map sized for `hint` entries without growing.
    pub fn with_capacity(hint: usize) -> Self {
        let bucket_count = buckets_for(hint);
        Self {
            buckets: vec![None; bucket_count],
            nodes: Vec::with_capacity(hint),
            min_buckets: bucket_count,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[inline]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    #[inline]
    fn bucket_of(&self, key: u64) -> usize {
        (key % self.buckets.len() as u64) as usize
    }

    fn find(&self, key: u64) -> Option<NodeIndex> {
        if self.buckets.is_empty() {
            return None;
        }
        let mut cursor = self.buckets[self.bucket_of(key)];
        while let Some(index) = cursor {
            let node = &self.nodes[index.index()];
            if node.key == key {
                return Some(index);
            }
            cursor = node.next;
        }
        None
    }

    #[inline]
    pub fn get(&self, key: u64) -> Option<&V> {
        self.find(key).map(|index| &self.nodes[index.index()].value)
    }

    #[inline]
    pub fn get_mut(&mut self, key: u64) -> Option<&mut V> {
        self.find(key)
            .map(move |index| &mut self.nodes[index.index()].value)
    }

    #[inline]
    pub fn contains_key(&self, key: u64) -> bool {
        self.find(key).is_some()
    }

    /// Insert or update `key`. Returns the previous value when the key was present.
    pub fn set(&mut self, key: u64, value: V) -> Option<V> {
        if let Some(index) = self.find(key) {
            return Some(mem::replace(&mut self.nodes[index.index()].value, value));
        }

        if self.buckets.is_empty() {
            self.rehash(2);
        }

        let index = NodeIndex::new(self.nodes.len());
        let bucket = self.bucket_of(key);
        let head = self.buckets[bucket];
        self.nodes.push(Node {
            key,
            value,
            prev: None,
            next: head,
        });
        if let Some(head) = head {
            self.nodes[head.index()].prev = Some(index);
        }
        self.buckets[bucket] = Some(index);

        if self.nodes.len() as f32 / self.buckets.len() as f32 > LOAD_FACTOR {
            self.rehash(self.buckets.len() * 2);
        }
        None
    }

    /// Get the value for `key`, inserting the result of `make` first when absent.
    pub fn get_or_insert_with(&mut self, key: u64, make: impl FnOnce() -> V) -> &mut V {
        let index = match self.find(key) {
            Some(index) => index,
            None => {
                self.set(key, make());
                // New nodes are pushed last and relinking never moves nodes.
                NodeIndex::new(self.nodes.len() - 1)
            }
        };
        &mut self.nodes[index.index()].value
    }

    /// Remove `key`, returning its value, or `None` when the key is not present.
    pub fn remove(&mut self, key: u64) -> Option<V> {
        let index = self.find(key)?;
        self.unlink(index);

        let last = NodeIndex::new(self.nodes.len() - 1);
        let removed = self.nodes.swap_remove(index.index());

        if index != last {
            // The last node now lives at `index`; repoint everything that referenced it.
            let moved = &self.nodes[index.index()];
            let (prev, next, key) = (moved.prev, moved.next, moved.key);
            match prev {
                Some(prev) => self.nodes[prev.index()].next = Some(index),
                None => {
                    let bucket = self.bucket_of(key);
                    self.buckets[bucket] = Some(index);
                }
            }
            if let Some(next) = next {
                self.nodes[next.index()].prev = Some(index);
            }
        }

        Some(removed.value)
    }

    fn unlink(&mut self, index: NodeIndex) {
        let node = &self.nodes[index.index()];
        let (prev, next, key) = (node.prev, node.next, node.key);
        match prev {
            Some(prev) => self.nodes[prev.index()].next = next,
            None => {
                let bucket = self.bucket_of(key);
                self.buckets[bucket] = next;
            }
        }
        if let Some(next) = next {
            self.nodes[next.index()].prev = prev;
        }
    }

    /// Rebuild every chain for a new bucket count. Node positions do not change.
    fn rehash(&mut self, bucket_count: usize) {
        trace!(
            "index map rehash: {} -> {} buckets ({} nodes)",
            self.buckets.len(),
            bucket_count,
            self.nodes.len()
        );
        self.buckets.clear();
        self.buckets.resize(bucket_count, None);

        for i in 0..self.nodes.len() {
            let index = NodeIndex::new(i);
            let bucket = self.bucket_of(self.nodes[i].key);
            let head = self.buckets[bucket];
            let node = &mut self.nodes[i];
            node.prev = None;
            node.next = head;
            if let Some(head) = head {
                self.nodes[head.index()].prev = Some(index);
            }
            self.buckets[bucket] = Some(index);
        }
    }

    /// Make room for `additional` more entries without growing on insert.
    pub fn reserve(&mut self, additional: usize) {
        self.nodes.reserve(additional);
        let needed = buckets_for(self.nodes.len() + additional);
        if needed > self.buckets.len() {
            self.rehash(needed);
        }
    }

    /// Remove every entry. The bucket array shrinks towards the configured minimum.
    pub fn clear(&mut self) {
        let target = buckets_for(self.nodes.len()).max(self.min_buckets);
        self.nodes.clear();
        if (target as f32) < self.buckets.len() as f32 * LOAD_FACTOR {
            self.buckets = vec![None; target];
        } else {
            self.buckets.fill(None);
        }
    }

    /// Bytes reserved by and used by this map.
    pub fn memory_usage(&self) -> MemoryUsage {
        let header = mem::size_of::<Self>();
        let bucket = mem::size_of::<Option<NodeIndex>>();
        let node = mem::size_of::<Node<V>>();
        MemoryUsage {
            reserved: header + self.buckets.capacity() * bucket + self.nodes.capacity() * node,
            used: header + self.nodes.len() * (bucket + node),
        }
    }

    /// Iterate every `(key, value)` pair once, bucket by bucket.
    #[inline]
    pub fn iter(&self) -> Iter<'_, V> {
        Iter {
            map: self,
            bucket: 0,
            cursor: None,
            remaining: self.nodes.len(),
        }
    }

    #[inline]
    pub fn keys(&self) -> impl Iterator<Item = u64> + '_ {
        self.iter().map(|(key, _)| key)
    }

    #[inline]
    pub fn values(&self) -> impl Iterator<Item = &V> + '_ {
        self.iter().map(|(_, value)| value)
    }

    /// Mutable access to every value, in pool order.
    #[inline]
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> + '_ {
        self.nodes.iter_mut().map(|node| &mut node.value)
    }

    /// Check every chain link and bucket head.
    ///
    /// # Panics
    /// Panics when a link invariant is broken.
    pub fn verify_links(&self) {
        let mut seen = 0;
        for (bucket, head) in self.buckets.iter().enumerate() {
            let mut prev = None;
            let mut cursor = *head;
            while let Some(index) = cursor {
                let node = &self.nodes[index.index()];
                assert_eq!(
                    node.prev, prev,
                    "invariant violation: node {} prev link mismatch",
                    index.0
                );
                assert_eq!(
                    self.bucket_of(node.key),
                    bucket,
                    "invariant violation: key {} chained in wrong bucket",
                    node.key
                );
                seen += 1;
                prev = cursor;
                cursor = node.next;
            }
        }
        assert_eq!(
            seen,
            self.nodes.len(),
            "invariant violation: chains reach {} of {} nodes",
            seen,
            self.nodes.len()
        );
    }
}

impl<V: Copy + Default> IndexMap<V> {
    /// Get the value for `key`, or `V::default()` when absent.
    #[inline]
    pub fn get_or_default(&self, key: u64) -> V {
        self.get(key).copied().unwrap_or_default()
    }
}

impl<V> Default for IndexMap<V> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Extend<(u64, V)> for IndexMap<V> {
    fn extend<T: IntoIterator<Item = (u64, V)>>(&mut self, iter: T) {
        for (key, value) in iter {
            self.set(key, value);
        }
    }
}

impl<V> FromIterator<(u64, V)> for IndexMap<V> {
    fn from_iter<T: IntoIterator<Item = (u64, V)>>(iter: T) -> Self {
        let mut map = IndexMap::new();
        map.extend(iter);
        map
    }
}

/// Iterator over the entries of an [`IndexMap`].
pub struct Iter<'a, V> {
    map: &'a IndexMap<V>,
    bucket: usize,
    cursor: Option<NodeIndex>,
    remaining: usize,
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = (u64, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(index) = self.cursor {
                let node = &self.map.nodes[index.index()];
                self.cursor = node.next;
                self.remaining -= 1;
                return Some((node.key, &node.value));
            }
            if self.bucket >= self.map.buckets.len() {
                return None;
            }
            self.cursor = self.map.buckets[self.bucket];
            self.bucket += 1;
        }
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<V> ExactSizeIterator for Iter<'_, V> {}
