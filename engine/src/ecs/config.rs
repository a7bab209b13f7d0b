/// Settings applied when a [`World`](crate::ecs::World) is created.
///
/// ```rust,ignore
/// let world = World::with_config(WorldConfig::default().with_threads(4).with_entity_hint(10_000));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldConfig {
    /// Worker threads used to split system iteration. `1` runs everything on the caller.
    pub threads: usize,

    /// Expected number of entities. Pre-sizes the entity index and is the size it never shrinks
    /// below.
    pub entity_hint: usize,

    /// Expected number of tables. Pre-sizes the signature lookup.
    pub table_hint: usize,

    /// How many links an inheritance or containment walk may follow before giving up.
    pub max_depth: usize,
}

impl WorldConfig {
    pub const DEFAULT_MAX_DEPTH: usize = 32;

    #[inline]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    #[inline]
    pub fn with_entity_hint(mut self, entity_hint: usize) -> Self {
        self.entity_hint = entity_hint;
        self
    }

    #[inline]
    pub fn with_table_hint(mut self, table_hint: usize) -> Self {
        self.table_hint = table_hint;
        self
    }

    #[inline]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            threads: 1,
            entity_hint: 0,
            table_hint: 16,
            max_depth: Self::DEFAULT_MAX_DEPTH,
        }
    }
}
