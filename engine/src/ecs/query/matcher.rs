use fixedbitset::FixedBitSet;
use log::debug;

use crate::ecs::{
    component::{Id, Role, Signature},
    entity::Entity,
    query::{Filter, Oper, Source, Term},
    storage::{Storage, Table, TableId},
};

/// How a term was satisfied for one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolved {
    /// Read from each matched entity. `column` is `None` for tags and zero-sized components.
    Owned { column: Option<usize> },
    /// Read from one other entity (a prefab, a container or a fixed entity).
    Shared { source: Entity },
    /// Nothing to read: a `Not` term, or an optional term that did not resolve.
    Absent,
    /// Only the component's handle is passed on.
    Handle,
}

/// The resolution of one term for one match record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermMatch {
    /// The component that was matched. For `Or` terms, the alternative that won.
    pub component: Entity,
    pub resolved: Resolved,
}

impl TermMatch {
    #[inline]
    pub fn is_shared(&self) -> bool {
        matches!(self.resolved, Resolved::Shared { .. })
    }

    #[inline]
    pub fn is_present(&self) -> bool {
        !matches!(self.resolved, Resolved::Absent)
    }

    /// The entity the value is read from when shared.
    #[inline]
    pub fn source(&self) -> Option<Entity> {
        match self.resolved {
            Resolved::Shared { source } => Some(source),
            _ => None,
        }
    }

    /// The column in the matched table when owned.
    #[inline]
    pub fn column(&self) -> Option<usize> {
        match self.resolved {
            Resolved::Owned { column } => column,
            _ => None,
        }
    }
}

/// One table matched by a filter, with every term resolved.
#[derive(Clone)]
pub struct MatchRecord<'w> {
    table: &'w Table,
    terms: Vec<TermMatch>,
}

impl<'w> MatchRecord<'w> {
    #[inline]
    pub fn table(&self) -> &'w Table {
        self.table
    }

    #[inline]
    pub fn table_id(&self) -> TableId {
        self.table.id()
    }

    #[inline]
    pub fn row_count(&self) -> usize {
        self.table.len()
    }

    #[inline]
    pub fn entity_ids(&self) -> &'w [Entity] {
        self.table.entities()
    }

    #[inline]
    pub fn terms(&self) -> &[TermMatch] {
        &self.terms
    }

    #[inline]
    pub fn term(&self, index: usize) -> Option<&TermMatch> {
        self.terms.get(index)
    }
}

impl std::fmt::Debug for MatchRecord<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchRecord")
            .field("table", &self.table.id())
            .field("rows", &self.table.len())
            .field("terms", &self.terms)
            .finish()
    }
}

/// A filter with a cache of the tables whose own signature passes it.
///
/// The cache only covers what a table's signature decides on its own (owned terms, and whether
/// links exist at all). Values reached through links are resolved every time records are
/// produced, so a container or prefab that gains a component later is picked up. New tables are
/// picked up by [`Query::update`], which only inspects tables created since the last call.
pub struct Query {
    filter: Filter,

    /// The builtin prefab tag. Tables holding it are skipped unless the filter names it.
    prefab: Entity,

    /// Matched tables, for membership checks.
    matched: FixedBitSet,

    /// Matched tables in creation order.
    tables: Vec<TableId>,

    /// Number of tables inspected so far.
    watermark: usize,
}

impl Query {
    pub fn new(filter: Filter, prefab: Entity) -> Self {
        Self {
            filter,
            prefab,
            matched: FixedBitSet::new(),
            tables: Vec::new(),
            watermark: 0,
        }
    }

    #[inline]
    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    /// Matched tables, in creation order.
    #[inline]
    pub fn tables(&self) -> &[TableId] {
        &self.tables
    }

    #[inline]
    pub fn matches_table(&self, table: TableId) -> bool {
        self.matched.contains(table.index())
    }

    /// Inspect tables created since the last update. Returns how many new tables matched.
    pub fn update(&mut self, storage: &Storage) -> usize {
        let tables = storage.tables();
        if self.watermark >= tables.len() {
            return 0;
        }

        self.matched.grow(tables.len());
        let before = self.tables.len();
        for table in &tables[self.watermark..] {
            if table.id() != TableId::ROOT && self.static_match(table.signature()) {
                self.matched.insert(table.id().index());
                self.tables.push(table.id());
            }
        }
        self.watermark = tables.len();

        let added = self.tables.len() - before;
        if added > 0 {
            debug!("query matched {added} new tables ({} total)", self.tables.len());
        }
        added
    }

    /// Resolve every cached, non-empty table into match records.
    pub fn records<'w>(&self, storage: &'w Storage) -> Vec<MatchRecord<'w>> {
        let mut records = Vec::new();
        for id in &self.tables {
            let table = storage.get_table(*id);
            if table.is_empty() {
                continue;
            }
            for terms in self.resolve_table(storage, table) {
                records.push(MatchRecord { table, terms });
            }
        }
        records
    }

    /// Decide what a table's signature alone can decide.
    fn static_match(&self, signature: &Signature) -> bool {
        if signature.contains(Id::of(self.prefab)) && !self.filter.names(self.prefab) {
            return false;
        }

        let owned = |component: &Entity| signature.contains(Id::of(*component));
        let linked = |role| signature.targets(role).next().is_some();

        self.filter.terms().iter().all(|term| {
            let mut components = term.components().iter();
            match (term.oper(), term.source()) {
                (Oper::And, Source::Owned) | (Oper::Or, Source::Owned) => components.any(owned),
                (Oper::Not, Source::Owned) | (Oper::Not, Source::Prefab) => {
                    !components.any(owned)
                }
                (Oper::And, Source::Prefab) | (Oper::Or, Source::Prefab) => {
                    components.any(owned) || linked(Role::InstanceOf)
                }
                (Oper::And, Source::Container) | (Oper::Or, Source::Container) => {
                    linked(Role::ChildOf)
                }
                (Oper::Optional, _)
                | (Oper::Not, _)
                | (_, Source::Entity(_))
                | (_, Source::Handle) => true,
            }
        })
    }

    /// Resolve every term for `table`. Returns one term list per match record: none when a term
    /// fails, several when an owned `Or` term matches more than one alternative.
    fn resolve_table(&self, storage: &Storage, table: &Table) -> Vec<Vec<TermMatch>> {
        let mut records = vec![Vec::with_capacity(self.filter.len())];
        for term in self.filter.terms() {
            let Some(options) = self.resolve_term(storage, table, term) else {
                return Vec::new();
            };
            if let [only] = options.as_slice() {
                records.iter_mut().for_each(|terms| terms.push(*only));
            } else {
                records = records
                    .into_iter()
                    .flat_map(|terms| {
                        options.iter().map(move |option| {
                            let mut terms = terms.clone();
                            terms.push(*option);
                            terms
                        })
                    })
                    .collect();
            }
        }
        records
    }

    /// The possible resolutions of one term, or `None` when the table is rejected.
    fn resolve_term(
        &self,
        storage: &Storage,
        table: &Table,
        term: &Term,
    ) -> Option<Vec<TermMatch>> {
        let resolve = |component: Entity| {
            self.resolve(storage, table, term.source(), component)
                .map(|resolved| TermMatch {
                    component,
                    resolved,
                })
        };
        let absent = TermMatch {
            component: term.component(),
            resolved: Resolved::Absent,
        };

        match term.oper() {
            Oper::And => resolve(term.component()).map(|found| vec![found]),
            Oper::Not => match resolve(term.component()) {
                Some(_) => None,
                None => Some(vec![absent]),
            },
            Oper::Optional => Some(vec![resolve(term.component()).unwrap_or(absent)]),
            // Every owned alternative is its own record.
            Oper::Or if term.source() == Source::Owned => {
                let found: Vec<_> = term.components().iter().filter_map(|c| resolve(*c)).collect();
                (!found.is_empty()).then_some(found)
            }
            // Shared alternatives: the first declared one any ancestor provides.
            Oper::Or => term
                .components()
                .iter()
                .find_map(|c| resolve(*c))
                .map(|found| vec![found]),
        }
    }

    fn resolve(
        &self,
        storage: &Storage,
        table: &Table,
        source: Source,
        component: Entity,
    ) -> Option<Resolved> {
        let signature = table.signature();
        let owned = || Resolved::Owned {
            column: table.column_index(component),
        };
        let shared = |source| Resolved::Shared { source };

        match source {
            Source::Owned => signature.contains(Id::of(component)).then(owned),
            Source::Prefab if signature.contains(Id::of(component)) => Some(owned()),
            // The prefab tag marks templates; instances do not inherit it.
            Source::Prefab if component == self.prefab => None,
            Source::Prefab => storage.resolve_prefab(signature, component).map(shared),
            Source::Container => storage.resolve_container(signature, component).map(shared),
            Source::Entity(entity) => storage
                .resolve_owner(entity, component)
                .ok()
                .flatten()
                .map(shared),
            Source::Handle => Some(Resolved::Handle),
        }
    }
}
