use crate::ecs::{
    component::Signature,
    storage::{TableId, map::IndexMap},
};

/// Registry of every signature that has a table, in table id order.
///
/// Lookup is by content hash with a full comparison on collision, so two equal signatures built
/// independently resolve to the same table.
#[derive(Default)]
pub struct Archetypes {
    /// Canonical signatures indexed by table id.
    signatures: Vec<Signature>,

    /// Content hash -> tables with that hash.
    by_hash: IndexMap<Vec<TableId>>,
}

impl Archetypes {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn with_capacity(hint: usize) -> Self {
        Self {
            signatures: Vec::with_capacity(hint),
            by_hash: IndexMap::with_capacity(hint),
        }
    }

    /// Find the table registered for `signature`.
    pub fn find(&self, signature: &Signature) -> Option<TableId> {
        self.by_hash
            .get(signature.content_hash())?
            .iter()
            .copied()
            .find(|id| self.signatures[id.index()] == *signature)
    }

    /// Register a new signature and return the table id it must be stored under.
    ///
    /// # Panics
    /// Panics in debug builds if the signature is already registered.
    pub fn insert(&mut self, signature: Signature) -> TableId {
        debug_assert!(
            self.find(&signature).is_none(),
            "invariant violation: signature registered twice"
        );
        let id = TableId::new(self.signatures.len() as u32);
        self.by_hash
            .get_or_insert_with(signature.content_hash(), Vec::new)
            .push(id);
        self.signatures.push(signature);
        id
    }

    #[inline]
    pub fn signature(&self, id: TableId) -> Option<&Signature> {
        self.signatures.get(id.index())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::{component::Id, entity::Allocator};

    #[test]
    fn equal_content_resolves_to_one_table() {
        // Given
        let allocator = Allocator::new();
        let (a, b) = (allocator.alloc(), allocator.alloc());
        let mut archetypes = Archetypes::new();
        let root = archetypes.insert(Signature::empty());
        let ab = archetypes.insert(Signature::new(vec![Id::of(a), Id::of(b)]));

        // When
        let reordered = Signature::new(vec![Id::of(b), Id::of(a)]);

        // Then
        assert_eq!(root, TableId::ROOT);
        assert_eq!(archetypes.find(&reordered), Some(ab));
        assert_eq!(archetypes.signature(ab), Some(&reordered));
        assert_eq!(archetypes.find(&Signature::new(vec![Id::of(a)])), None);
    }

    #[test]
    fn ids_follow_insertion_order() {
        let allocator = Allocator::new();
        let mut archetypes = Archetypes::with_capacity(4);
        let ids: Vec<_> = (0..5)
            .map(|_| archetypes.insert(Signature::new(vec![Id::of(allocator.alloc())])))
            .collect();

        assert_eq!(ids[4], TableId::new(4));
        assert_eq!(archetypes.len(), 5);
    }
}
