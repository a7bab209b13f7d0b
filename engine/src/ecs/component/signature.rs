use std::{
    cmp::Ordering,
    hash::{DefaultHasher, Hash, Hasher},
    sync::Arc,
};

use crate::ecs::{
    component::{Id, Role},
    entity::Entity,
};

/// A canonical, sorted and deduplicated set of signature entries. Identifies a table.
///
/// All set operations are merge scans over the sorted entries; signatures are small (usually
/// fewer than 32 entries) so this beats hashing and needs no tie breaking. Clones share the
/// backing slice (see [`Signature::ptr_eq`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    ids: Arc<[Id]>,
}

impl Signature {
    /// Build a signature from ids in any order, duplicates allowed.
    #[inline]
    pub fn new(ids: impl Into<Vec<Id>>) -> Self {
        let mut ids = ids.into();
        ids.sort();
        ids.dedup();
        Self { ids: ids.into() }
    }

    #[inline]
    pub fn empty() -> Self {
        Self {
            ids: Arc::from([]),
        }
    }

    /// Build from ids the caller guarantees are sorted and unique.
    #[inline]
    fn from_sorted(ids: Vec<Id>) -> Self {
        debug_assert!(ids.windows(2).all(|w| w[0] < w[1]), "ids not sorted");
        Self { ids: ids.into() }
    }

    #[inline]
    pub fn ids(&self) -> &[Id] {
        &self.ids
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    #[inline]
    pub fn contains(&self, id: Id) -> bool {
        self.ids.binary_search(&id).is_ok()
    }

    /// True when every entry of `other` is in `self`.
    pub fn contains_all(&self, other: &Signature) -> bool {
        other.is_subset(self)
    }

    pub fn contains_any(&self, other: &Signature) -> bool {
        let (mut i, mut j) = (0, 0);
        while i < self.ids.len() && j < other.ids.len() {
            match self.ids[i].cmp(&other.ids[j]) {
                Ordering::Less => i += 1,
                Ordering::Greater => j += 1,
                Ordering::Equal => return true,
            }
        }
        false
    }

    /// True when every entry of `self` is in `of`.
    pub fn is_subset(&self, of: &Signature) -> bool {
        if self.ids.len() > of.ids.len() {
            return false;
        }
        let mut j = 0;
        for id in self.ids.iter() {
            loop {
                match of.ids.get(j) {
                    None => return false,
                    Some(other) => match other.cmp(id) {
                        Ordering::Less => j += 1,
                        Ordering::Equal => {
                            j += 1;
                            break;
                        }
                        Ordering::Greater => return false,
                    },
                }
            }
        }
        true
    }

    pub fn union(&self, other: &Signature) -> Self {
        let mut ids = Vec::with_capacity(self.ids.len() + other.ids.len());
        let (mut i, mut j) = (0, 0);
        while i < self.ids.len() && j < other.ids.len() {
            match self.ids[i].cmp(&other.ids[j]) {
                Ordering::Less => {
                    ids.push(self.ids[i]);
                    i += 1;
                }
                Ordering::Greater => {
                    ids.push(other.ids[j]);
                    j += 1;
                }
                Ordering::Equal => {
                    ids.push(self.ids[i]);
                    i += 1;
                    j += 1;
                }
            }
        }
        ids.extend_from_slice(&self.ids[i..]);
        ids.extend_from_slice(&other.ids[j..]);
        Self::from_sorted(ids)
    }

    pub fn difference(&self, other: &Signature) -> Self {
        let mut ids = Vec::with_capacity(self.ids.len());
        let mut j = 0;
        for &id in self.ids.iter() {
            while j < other.ids.len() && other.ids[j] < id {
                j += 1;
            }
            if other.ids.get(j) != Some(&id) {
                ids.push(id);
            }
        }
        Self::from_sorted(ids)
    }

    pub fn intersection(&self, other: &Signature) -> Self {
        let mut ids = Vec::with_capacity(self.ids.len().min(other.ids.len()));
        let (mut i, mut j) = (0, 0);
        while i < self.ids.len() && j < other.ids.len() {
            match self.ids[i].cmp(&other.ids[j]) {
                Ordering::Less => i += 1,
                Ordering::Greater => j += 1,
                Ordering::Equal => {
                    ids.push(self.ids[i]);
                    i += 1;
                    j += 1;
                }
            }
        }
        Self::from_sorted(ids)
    }

    /// This signature plus `id`.
    pub fn with(&self, id: Id) -> Self {
        match self.ids.binary_search(&id) {
            Ok(_) => self.clone(),
            Err(pos) => {
                let mut ids = Vec::with_capacity(self.ids.len() + 1);
                ids.extend_from_slice(&self.ids[..pos]);
                ids.push(id);
                ids.extend_from_slice(&self.ids[pos..]);
                Self::from_sorted(ids)
            }
        }
    }

    /// This signature minus `id`.
    pub fn without(&self, id: Id) -> Self {
        match self.ids.binary_search(&id) {
            Err(_) => self.clone(),
            Ok(pos) => {
                let mut ids = self.ids.to_vec();
                ids.remove(pos);
                Self::from_sorted(ids)
            }
        }
    }

    /// Targets of every link with the given role, in signature order.
    pub fn targets(&self, role: Role) -> impl Iterator<Item = Entity> + '_ {
        self.ids.iter().filter_map(move |id| id.target(role))
    }

    /// A content hash, stable for the life of the process.
    pub fn content_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.ids.hash(&mut hasher);
        hasher.finish()
    }

    /// True when both signatures share the same backing allocation.
    #[inline]
    pub fn ptr_eq(&self, other: &Signature) -> bool {
        Arc::ptr_eq(&self.ids, &other.ids)
    }
}

impl From<Vec<Id>> for Signature {
    #[inline]
    fn from(value: Vec<Id>) -> Self {
        Signature::new(value)
    }
}

impl From<&[Id]> for Signature {
    #[inline]
    fn from(value: &[Id]) -> Self {
        Signature::new(value.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::entity::Allocator;

    fn ids(n: usize) -> Vec<Id> {
        let allocator = Allocator::new();
        (0..n).map(|_| Id::of(allocator.alloc())).collect()
    }

    #[test]
    fn new_sorts_and_dedupes() {
        // Given
        let ids = ids(3);

        // When
        let sig = Signature::new(vec![ids[2], ids[0], ids[1], ids[2], ids[0]]);

        // Then
        assert_eq!(sig.ids(), &[ids[0], ids[1], ids[2]]);
        assert_eq!(sig.content_hash(), Signature::new(ids.clone()).content_hash());
    }

    #[test]
    fn union_merges() {
        let ids = ids(4);
        let a = Signature::new(vec![ids[0], ids[2]]);
        let b = Signature::new(vec![ids[1], ids[2], ids[3]]);

        assert_eq!(a.union(&b).ids(), &ids[..]);
        assert_eq!(a.union(&Signature::empty()), a);
    }

    #[test]
    fn difference_and_intersection() {
        let ids = ids(4);
        let a = Signature::new(ids.clone());
        let b = Signature::new(vec![ids[1], ids[3]]);

        assert_eq!(a.difference(&b).ids(), &[ids[0], ids[2]]);
        assert_eq!(a.intersection(&b), b);
        assert!(b.difference(&a).is_empty());
    }

    #[test]
    fn subset_and_contains() {
        // Given
        let ids = ids(4);
        let full = Signature::new(vec![ids[0], ids[1], ids[2]]);
        let part = Signature::new(vec![ids[0], ids[2]]);
        let other = Signature::new(vec![ids[0], ids[3]]);

        // Then
        assert!(part.is_subset(&full));
        assert!(full.contains_all(&part));
        assert!(full.contains_all(&full));
        assert!(!other.is_subset(&full));
        assert!(full.contains_any(&other));
        assert!(!full.contains_any(&Signature::new(vec![ids[3]])));
        assert!(Signature::empty().is_subset(&full));
        assert!(full.contains(ids[1]));
        assert!(!full.contains(ids[3]));
    }

    #[test]
    fn with_and_without() {
        let ids = ids(3);
        let sig = Signature::new(vec![ids[0], ids[2]]);

        let added = sig.with(ids[1]);
        assert_eq!(added.ids(), &ids[..]);
        assert!(sig.with(ids[0]).ptr_eq(&sig));

        let removed = added.without(ids[2]);
        assert_eq!(removed.ids(), &ids[..2]);
        assert!(removed.without(ids[2]).ptr_eq(&removed));
    }

    #[test]
    fn targets_filter_by_role() {
        let allocator = Allocator::new();
        let c = allocator.alloc();
        let parent = allocator.alloc();
        let prefab = allocator.alloc();
        let sig = Signature::new(vec![Id::child_of(parent), Id::of(c), Id::instance_of(prefab)]);

        assert_eq!(sig.targets(Role::ChildOf).collect::<Vec<_>>(), vec![parent]);
        assert_eq!(sig.targets(Role::InstanceOf).collect::<Vec<_>>(), vec![prefab]);
        assert_eq!(sig.ids()[0], Id::of(c));
    }
}
