//! Table storage and the mutation engine.
//!
//! Entities with the **exact same signature** live in the same [`Table`]. Adding or removing a
//! signature entry moves the entity to the neighbouring table, so the storage layer is mostly a
//! migration engine plus the lookups that make migration cheap:
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │  Storage                                                       │
//! │  - owns tables, the signature registry and the entity index    │
//! │  - moves entities between tables on add / remove               │
//! │  - resolves inherited (prefab) and container values            │
//! └────────┬───────────────────┬───────────────────┬───────────────┘
//!          │                   │                   │
//! ┌────────▼────────┐ ┌────────▼────────┐ ┌────────▼───────┐
//! │  Archetypes     │ │  EntityIndex    │ │  Tables        │
//! │  - Signature →  │ │  - Entity →     │ │  - columns     │
//! │    table id     │ │    Record       │ │  - edge cache  │
//! └─────────────────┘ └─────────────────┘ └────────┬───────┘
//!                                                  │
//!                                         ┌────────▼────────┐
//!                                         │  Column         │
//!                                         │  IndexedMemory  │
//!                                         └─────────────────┘
//! ```
//!
//! Every lookup structure (entity index, signature lookup, column map, edges) is an
//! [`IndexMap`].
//!
//! # Migration
//!
//! Moving entity `e` from table `S` to table `D`:
//!
//! ```text
//!   S [Position, Velocity]                  D [Position]
//!   ┌────┬──────────┬──────────┐            ┌────┬──────────┐
//!   │ e  │ {1, 2}   │ {0, 1}   │  ──move──▶ │ .. │ ..       │
//!   │ f  │ {5, 5}   │ {1, 0}   │            │ e  │ {1, 2}   │  (bytes moved, not cloned)
//!   └────┴──────────┴──────────┘            └────┴──────────┘
//!   row of e is swap-removed: f takes its place, Velocity of e is dropped
//! ```
//!
//! 1. Reserve one row in every column of `D`. Failing here reports
//!    [`Error::OutOfMemory`](crate::ecs::Error::OutOfMemory) with `e` untouched.
//! 2. Fill each column of `D`: move the bytes when `S` has the column, clone the value of the
//!    prefab `e` inherits it from (an override), or construct the default.
//! 3. Push `e` to the entity list of `D`.
//! 4. Swap-remove the row in `S`, skipping the drop for moved columns.
//! 5. Point the entity swapped into the vacated row at its new row.
//! 6. Update the record of `e`. Until this point the record still names the old, intact row.
//!
//! Adding an entry the entity already has, or removing one it does not have, is a no-op.
//!
//! # Inheritance
//!
//! A signature may hold `instance-of` links (prefabs) and `child-of` links (containers). Values
//! reached through links are never copied on link creation; they are resolved on read, breadth
//! first in signature order, and every walk stops after `max_depth` links.

use std::{collections::VecDeque, ptr::NonNull};

use fixedbitset::FixedBitSet;
use log::{debug, trace, warn};

pub use archetype::Archetypes;
pub use column::Column;
pub use index::{EntityIndex, Record};
pub use map::{IndexMap, MemoryUsage};
pub use row::Row;
pub use table::{Edge, Id as TableId, Table};

use crate::ecs::{
    component::{Component, Id, Role, Signature},
    config::WorldConfig,
    entity::Entity,
    error::Result,
    world::TypeRegistry,
};

pub(crate) mod archetype;
pub(crate) mod column;
pub(crate) mod index;
pub mod map;
pub(crate) mod mem;
pub(crate) mod row;
pub(crate) mod table;

/// How a destination column gets its value during a migration.
enum Fill {
    Move(NonNull<u8>),
    Clone(NonNull<u8>),
    Default,
}

/// Central storage container: tables, the signature registry and the entity index.
///
/// ```rust,ignore
/// let mut storage = Storage::new(&WorldConfig::default());
/// storage.insert(entity)?;
/// storage.add_id(entity, Id::of(position), &types)?;
/// assert!(storage.owns(entity, Id::of(position))?);
/// ```
pub struct Storage {
    /// Tables indexed by id. Never shrinks.
    tables: Vec<Table>,

    archetypes: Archetypes,

    index: EntityIndex,

    /// Longest link chain followed when resolving inherited values.
    max_depth: usize,
}

impl Storage {
    /// Create storage holding only the root table.
    pub fn new(config: &WorldConfig) -> Self {
        let mut archetypes = Archetypes::with_capacity(config.table_hint);
        let root = archetypes.insert(Signature::empty());
        debug_assert_eq!(root, TableId::ROOT);
        Self {
            tables: vec![Table::new(root, Signature::empty(), Vec::new())],
            archetypes,
            index: EntityIndex::with_capacity(config.entity_hint),
            max_depth: config.max_depth,
        }
    }

    #[inline]
    pub fn index(&self) -> &EntityIndex {
        &self.index
    }

    #[inline]
    pub fn archetypes(&self) -> &Archetypes {
        &self.archetypes
    }

    #[inline]
    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    #[inline]
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Get an existing table by id.
    ///
    /// # Panics
    /// - if the id is out of bounds
    pub(crate) fn get_table(&self, table_id: TableId) -> &Table {
        assert!(
            table_id.index() < self.tables.len(),
            "table id out of bounds"
        );
        &self.tables[table_id.index()]
    }

    #[inline]
    pub fn record(&self, entity: Entity) -> Result<Record> {
        self.index.get(entity)
    }

    #[inline]
    pub fn contains(&self, entity: Entity) -> bool {
        self.index.contains(entity)
    }

    pub fn signature_of(&self, entity: Entity) -> Result<&Signature> {
        let record = self.index.get(entity)?;
        Ok(self.tables[record.table.index()].signature())
    }

    /// True when the entity's own signature holds `id`.
    pub fn owns(&self, entity: Entity, id: Id) -> Result<bool> {
        Ok(self.signature_of(entity)?.contains(id))
    }

    /// Find the table for `signature`, creating it on first use.
    pub fn table_for(&mut self, signature: &Signature, types: &TypeRegistry) -> TableId {
        if let Some(id) = self.archetypes.find(signature) {
            return id;
        }

        let columns = signature
            .ids()
            .iter()
            .filter(|id| id.is_plain())
            .filter_map(|id| {
                let component = id.entity();
                types
                    .info(component)
                    .filter(|info| !info.is_zero_sized())
                    .map(|info| Column::new(component, info))
            })
            .collect::<Vec<_>>();

        let id = self.archetypes.insert(signature.clone());
        debug!(
            "created {id} for {signature:?} ({} columns)",
            columns.len()
        );
        self.tables.push(Table::new(id, signature.clone(), columns));
        id
    }

    /// The table reached from `from` by adding `id`, through the edge cache.
    pub fn traverse_add(&mut self, from: TableId, id: Id, types: &TypeRegistry) -> TableId {
        if let Some(to) = self.tables[from.index()].edge(id).add {
            return to;
        }
        let signature = self.tables[from.index()].signature().with(id);
        let to = self.table_for(&signature, types);
        self.tables[from.index()].set_add_edge(id, to);
        if from != to {
            self.tables[to.index()].set_remove_edge(id, from);
        }
        trace!("edge {from} + {id:?} -> {to}");
        to
    }

    /// The table reached from `from` by removing `id`, through the edge cache.
    pub fn traverse_remove(&mut self, from: TableId, id: Id, types: &TypeRegistry) -> TableId {
        if let Some(to) = self.tables[from.index()].edge(id).remove {
            return to;
        }
        let signature = self.tables[from.index()].signature().without(id);
        let to = self.table_for(&signature, types);
        self.tables[from.index()].set_remove_edge(id, to);
        if from != to {
            self.tables[to.index()].set_add_edge(id, from);
        }
        trace!("edge {from} - {id:?} -> {to}");
        to
    }

    /// Index a new entity in the root table.
    pub fn insert(&mut self, entity: Entity) -> Result<Record> {
        debug_assert!(
            !self.index.contains(entity),
            "invariant violation: {entity} inserted twice"
        );
        let root = &mut self.tables[TableId::ROOT.index()];
        root.try_reserve(1)?;
        let record = Record::new(TableId::ROOT, root.push_entity(entity));
        self.index.set(entity, record);
        Ok(record)
    }

    /// Index `entities` directly in the table of `signature`, reserving its rows once. Inherited
    /// values are cloned into owned columns, every other column gets the default.
    pub fn insert_many(
        &mut self,
        entities: &[Entity],
        signature: &Signature,
        types: &TypeRegistry,
    ) -> Result<TableId> {
        let to = self.table_for(signature, types);
        self.tables[to.index()].try_reserve_exact(entities.len())?;

        let fills = {
            let table = &self.tables[to.index()];
            table
                .columns()
                .iter()
                .map(|column| self.inherited_ptr(table.signature(), column.component()))
                .collect::<Vec<_>>()
        };

        let table = &mut self.tables[to.index()];
        for &entity in entities {
            debug_assert!(
                !self.index.contains(entity),
                "invariant violation: {entity} inserted twice"
            );
            for (index, fill) in fills.iter().enumerate() {
                let column = table.column_mut(index);
                // SAFETY: capacity reserved above, so pushes never move the cloned sources.
                unsafe {
                    match fill {
                        Some(src) => column.push_cloned(*src),
                        None => column.push_default(),
                    }
                }
            }
            let row = table.push_entity(entity);
            self.index.set(entity, Record::new(to, row));
        }
        trace!("inserted {} entities into {to}", entities.len());
        Ok(to)
    }

    /// Add a single entry. A no-op when the entity already has it.
    pub fn add_id(&mut self, entity: Entity, id: Id, types: &TypeRegistry) -> Result<Record> {
        let from = self.index.get(entity)?;
        let to = self.traverse_add(from.table, id, types);
        self.move_entity(entity, from, to)
    }

    /// Remove a single entry. A no-op when the entity does not have it.
    pub fn remove_id(&mut self, entity: Entity, id: Id, types: &TypeRegistry) -> Result<Record> {
        let from = self.index.get(entity)?;
        let to = self.traverse_remove(from.table, id, types);
        self.move_entity(entity, from, to)
    }

    /// Add every entry of `signature` in a single move.
    pub fn add_signature(
        &mut self,
        entity: Entity,
        signature: &Signature,
        types: &TypeRegistry,
    ) -> Result<Record> {
        let from = self.index.get(entity)?;
        let current = self.tables[from.table.index()].signature();
        if current.contains_all(signature) {
            return Ok(from);
        }
        let target = current.union(signature);
        let to = self.table_for(&target, types);
        self.move_entity(entity, from, to)
    }

    /// Remove every entry of `signature` in a single move.
    pub fn remove_signature(
        &mut self,
        entity: Entity,
        signature: &Signature,
        types: &TypeRegistry,
    ) -> Result<Record> {
        let from = self.index.get(entity)?;
        let current = self.tables[from.table.index()].signature();
        if !current.contains_any(signature) {
            return Ok(from);
        }
        let target = current.difference(signature);
        let to = self.table_for(&target, types);
        self.move_entity(entity, from, to)
    }

    /// Drop the entity's row and remove its record.
    pub fn delete(&mut self, entity: Entity) -> Result<()> {
        let record = self.index.get(entity)?;
        let swapped = self.tables[record.table.index()].swap_remove(record.row);
        if let Some(swapped) = swapped {
            self.index.set_row(swapped, record.row);
        }
        self.index.remove(entity)?;
        trace!("deleted {entity} from {}", record.table);
        Ok(())
    }

    /// Move `entity` from its current record to table `to`.
    fn move_entity(&mut self, entity: Entity, from: Record, to: TableId) -> Result<Record> {
        if from.table == to {
            return Ok(from);
        }
        trace!("moving {entity} from {} to {to}", from.table);

        // 1. Stage. Nothing below reallocates the destination.
        self.tables[to.index()].try_reserve(1)?;

        // 2. Plan each destination column from shared borrows.
        let fills = {
            let source = &self.tables[from.table.index()];
            let destination = &self.tables[to.index()];
            destination
                .columns()
                .iter()
                .map(|column| {
                    let component = column.component();
                    if let Some(index) = source.column_index(component) {
                        return Fill::Move(source.column(index).ptr_at(from.row));
                    }
                    match self.inherited_ptr(destination.signature(), component) {
                        Some(ptr) => Fill::Clone(ptr),
                        None => Fill::Default,
                    }
                })
                .collect::<Vec<_>>()
        };

        let destination = &mut self.tables[to.index()];
        for (index, fill) in fills.into_iter().enumerate() {
            let column = destination.column_mut(index);
            // SAFETY: capacity reserved above; moved sources are detached without drop below,
            // cloned sources live in other rows and are not touched by the push.
            unsafe {
                match fill {
                    Fill::Move(src) => column.push_moved(src),
                    Fill::Clone(src) => column.push_cloned(src),
                    Fill::Default => column.push_default(),
                }
            }
        }

        // 3. Push the entity.
        let row = destination.push_entity(entity);

        // 4. Detach the source row.
        let (source, destination) = if from.table.index() < to.index() {
            let (head, tail) = self.tables.split_at_mut(to.index());
            (&mut head[from.table.index()], &tail[0])
        } else {
            let (head, tail) = self.tables.split_at_mut(from.table.index());
            (&mut tail[0], &head[to.index()])
        };
        // SAFETY: every column shared with the destination had its value moved in step 2.
        let swapped = unsafe {
            source.swap_remove_moved(from.row, |component| {
                destination.column_index(component).is_some()
            })
        };

        // 5. Fix the entity that took the vacated row.
        if let Some(swapped) = swapped {
            self.index.set_row(swapped, from.row);
        }

        // 6. The moving entity's record, last.
        let record = Record::new(to, row);
        self.index.set(entity, record);
        Ok(record)
    }

    /// Pointer to the value of `component` that an entity with `signature` inherits.
    fn inherited_ptr(&self, signature: &Signature, component: Entity) -> Option<NonNull<u8>> {
        let owner = self.resolve_prefab(signature, component)?;
        self.component_ptr(owner, component)
    }

    /// Walk the links with `role` breadth first, calling `visit` on each linked entity until it
    /// returns an owner. Each entity is expanded once, so cycles and shared ancestors cost one
    /// visit. Stale links are skipped. Gives up after `max_depth` links.
    fn walk(
        &self,
        start: &Signature,
        role: Role,
        mut visit: impl FnMut(Entity, &Signature) -> Option<Entity>,
    ) -> Option<Entity> {
        let mut visited = FixedBitSet::new();
        let mut queue: VecDeque<(Entity, usize)> =
            start.targets(role).map(|target| (target, 1)).collect();

        while let Some((entity, depth)) = queue.pop_front() {
            let slot = entity.index();
            visited.grow(slot + 1);
            if visited.put(slot) {
                continue;
            }
            if depth > self.max_depth {
                warn!(
                    "{role:?} walk reached depth {} at {entity}, treating as unresolved",
                    self.max_depth
                );
                return None;
            }
            let Ok(record) = self.index.get(entity) else {
                continue;
            };
            let signature = self.tables[record.table.index()].signature();
            if let Some(owner) = visit(entity, signature) {
                return Some(owner);
            }
            queue.extend(
                signature
                    .targets(role)
                    .filter(|target| !visited.contains(target.index()))
                    .map(|target| (target, depth + 1)),
            );
        }
        None
    }

    /// The prefab an entity with `signature` inherits `component` from.
    pub fn resolve_prefab(&self, signature: &Signature, component: Entity) -> Option<Entity> {
        let id = Id::of(component);
        self.walk(signature, Role::InstanceOf, |prefab, prefab_signature| {
            prefab_signature.contains(id).then_some(prefab)
        })
    }

    /// The entity providing `component` to an entity with `signature` through its containers. A
    /// container provides a component it owns or inherits from its own prefabs.
    pub fn resolve_container(&self, signature: &Signature, component: Entity) -> Option<Entity> {
        let id = Id::of(component);
        self.walk(signature, Role::ChildOf, |parent, parent_signature| {
            if parent_signature.contains(id) {
                Some(parent)
            } else {
                self.resolve_prefab(parent_signature, component)
            }
        })
    }

    /// The entity providing `component` to `entity`: itself when owned, else a prefab.
    pub fn resolve_owner(&self, entity: Entity, component: Entity) -> Result<Option<Entity>> {
        let signature = self.signature_of(entity)?;
        if signature.contains(Id::of(component)) {
            return Ok(Some(entity));
        }
        Ok(self.resolve_prefab(signature, component))
    }

    /// Pointer to the value of `component` owned by `owner`, if it has a column.
    pub fn component_ptr(&self, owner: Entity, component: Entity) -> Option<NonNull<u8>> {
        let record = self.index.get(owner).ok()?;
        let column = self.tables[record.table.index()].column_for(component)?;
        Some(column.ptr_at(record.row))
    }

    /// Typed read of the value of `component` owned by `owner`.
    pub fn get<C: Component>(&self, owner: Entity, component: Entity) -> Result<Option<&C>> {
        let record = self.index.get(owner)?;
        match self.tables[record.table.index()].column_for(component) {
            Some(column) => column.get::<C>(record.row),
            None => Ok(None),
        }
    }

    /// Typed write access to the value of `component` owned by `owner`.
    pub fn get_mut<C: Component>(
        &mut self,
        owner: Entity,
        component: Entity,
    ) -> Result<Option<&mut C>> {
        let record = self.index.get(owner)?;
        match self.tables[record.table.index()].column_for_mut(component) {
            Some(column) => column.get_mut::<C>(record.row),
            None => Ok(None),
        }
    }

    /// Bytes reserved and used by every table and the entity index.
    pub fn memory_usage(&self) -> MemoryUsage {
        self.tables
            .iter()
            .map(Table::memory_usage)
            .fold(self.index.memory_usage(), |total, usage| total + usage)
    }

    /// Check that every record points at a row holding its entity.
    ///
    /// # Panics
    /// Panics when a record and its table disagree.
    pub fn verify_invariants(&self) {
        let mut rows = 0;
        for table in &self.tables {
            table.verify_invariants();
            rows += table.len();
        }
        assert_eq!(
            rows,
            self.index.len(),
            "invariant violation: {} rows for {} records",
            rows,
            self.index.len()
        );
        for (entity, record) in self.index.iter() {
            assert_eq!(
                self.tables[record.table.index()].entity(record.row),
                Some(entity),
                "invariant violation: record of {entity} points at {} {}",
                record.table,
                record.row
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::{entity::Allocator, error::Error};

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }
    impl Component for Position {}

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Velocity {
        dx: f32,
        dy: f32,
    }
    impl Component for Velocity {}

    struct Fixture {
        allocator: Allocator,
        types: TypeRegistry,
        storage: Storage,
        position: Entity,
        velocity: Entity,
        tag: Entity,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_config(WorldConfig::default())
        }

        fn with_config(config: WorldConfig) -> Self {
            let allocator = Allocator::new();
            let types = TypeRegistry::new();
            let position = types.register::<Position>(|| allocator.alloc());
            let velocity = types.register::<Velocity>(|| allocator.alloc());
            let tag = allocator.alloc();
            Self {
                allocator,
                types,
                storage: Storage::new(&config),
                position,
                velocity,
                tag,
            }
        }

        fn spawn(&mut self) -> Entity {
            let entity = self.allocator.alloc();
            self.storage.insert(entity).unwrap();
            entity
        }

        fn add(&mut self, entity: Entity, component: Entity) -> Record {
            self.storage
                .add_id(entity, Id::of(component), &self.types)
                .unwrap()
        }

        fn set_position(&mut self, entity: Entity, value: Position) {
            self.add(entity, self.position);
            *self
                .storage
                .get_mut::<Position>(entity, self.position)
                .unwrap()
                .unwrap() = value;
        }
    }

    #[test]
    fn new_storage_has_root_table() {
        let f = Fixture::new();
        assert_eq!(f.storage.tables().len(), 1);
        assert!(f.storage.get_table(TableId::ROOT).signature().is_empty());
    }

    #[test]
    fn add_then_remove() {
        // Given
        let mut f = Fixture::new();
        let e = f.spawn();

        // When
        f.add(e, f.position);
        f.add(e, f.velocity);
        f.add(e, f.tag);

        // Then
        for c in [f.position, f.velocity, f.tag] {
            assert!(f.storage.owns(e, Id::of(c)).unwrap());
        }

        // When
        f.storage
            .remove_id(e, Id::of(f.position), &f.types)
            .unwrap();

        // Then
        assert!(!f.storage.owns(e, Id::of(f.position)).unwrap());
        assert!(f.storage.owns(e, Id::of(f.velocity)).unwrap());
        f.storage.verify_invariants();
    }

    #[test]
    fn add_present_is_a_no_op() {
        // Given
        let mut f = Fixture::new();
        let e = f.spawn();
        f.set_position(e, Position { x: 1.0, y: 2.0 });
        let before = f.storage.record(e).unwrap();
        let tables = f.storage.tables().len();

        // When
        let after = f.add(e, f.position);

        // Then
        assert_eq!(before, after);
        assert_eq!(f.storage.tables().len(), tables);
        assert_eq!(
            f.storage.get::<Position>(e, f.position).unwrap(),
            Some(&Position { x: 1.0, y: 2.0 })
        );
    }

    #[test]
    fn migration_moves_values_and_fixes_swapped_row() {
        // Given
        let mut f = Fixture::new();
        let a = f.spawn();
        let b = f.spawn();
        f.set_position(a, Position { x: 1.0, y: 1.0 });
        f.set_position(b, Position { x: 2.0, y: 2.0 });

        // When - a leaves row 0 of the Position table, b is swapped into it
        f.add(a, f.velocity);

        // Then
        let rb = f.storage.record(b).unwrap();
        assert_eq!(rb.row, Row::new(0));
        assert_eq!(
            f.storage.get::<Position>(a, f.position).unwrap(),
            Some(&Position { x: 1.0, y: 1.0 })
        );
        assert_eq!(
            f.storage.get::<Velocity>(a, f.velocity).unwrap(),
            Some(&Velocity::default())
        );
        assert_eq!(
            f.storage.get::<Position>(b, f.position).unwrap(),
            Some(&Position { x: 2.0, y: 2.0 })
        );
        f.storage.verify_invariants();
    }

    #[test]
    fn edges_are_reused() {
        // Given
        let mut f = Fixture::new();
        let a = f.spawn();
        let b = f.spawn();
        f.add(a, f.position);

        // When
        let tables = f.storage.tables().len();
        f.add(b, f.position);

        // Then
        assert_eq!(f.storage.tables().len(), tables);
        let root = f.storage.get_table(TableId::ROOT);
        let to = root.edge(Id::of(f.position)).add.unwrap();
        assert_eq!(
            f.storage.get_table(to).edge(Id::of(f.position)).remove,
            Some(TableId::ROOT)
        );
    }

    #[test]
    fn delete_fixes_swapped_record() {
        // Given
        let mut f = Fixture::new();
        let entities: Vec<_> = (0..3).map(|_| f.spawn()).collect();
        for (i, e) in entities.iter().enumerate() {
            f.set_position(*e, Position { x: i as f32, y: 0.0 });
        }
        let table = f.storage.record(entities[0]).unwrap().table;

        // When
        f.storage.delete(entities[0]).unwrap();

        // Then
        assert_eq!(
            f.storage.record(entities[0]),
            Err(Error::NotFound(entities[0]))
        );
        assert_eq!(f.storage.get_table(table).len(), 2);
        assert_eq!(f.storage.record(entities[2]).unwrap().row, Row::new(0));
        assert_eq!(
            f.storage.get::<Position>(entities[2], f.position).unwrap(),
            Some(&Position { x: 2.0, y: 0.0 })
        );
        assert_eq!(f.storage.delete(entities[0]), Err(Error::NotFound(entities[0])));
        f.storage.verify_invariants();
    }

    #[test]
    fn instance_link_does_not_copy_and_add_overrides() {
        // Given
        let mut f = Fixture::new();
        let prefab = f.spawn();
        f.set_position(prefab, Position { x: 10.0, y: 20.0 });
        let e = f.spawn();

        // When
        f.storage
            .add_id(e, Id::instance_of(prefab), &f.types)
            .unwrap();

        // Then - inherited, not owned
        assert!(!f.storage.owns(e, Id::of(f.position)).unwrap());
        assert_eq!(f.storage.resolve_owner(e, f.position).unwrap(), Some(prefab));

        // When - adding the component clones the prefab value
        f.add(e, f.position);

        // Then
        assert_eq!(f.storage.resolve_owner(e, f.position).unwrap(), Some(e));
        assert_eq!(
            f.storage.get::<Position>(e, f.position).unwrap(),
            Some(&Position { x: 10.0, y: 20.0 })
        );
    }

    #[test]
    fn add_signature_moves_once() {
        let mut f = Fixture::new();
        let e = f.spawn();
        let sig = Signature::new(vec![Id::of(f.position), Id::of(f.velocity)]);

        let record = f.storage.add_signature(e, &sig, &f.types).unwrap();

        assert_eq!(f.storage.get_table(record.table).signature(), &sig);
        // root + final table only
        assert_eq!(f.storage.tables().len(), 2);

        let record = f.storage.remove_signature(e, &sig, &f.types).unwrap();
        assert_eq!(record.table, TableId::ROOT);
    }

    #[test]
    fn container_resolution_walks_parents() {
        // Given - grandparent owns Position, parent inherits Velocity from a prefab
        let mut f = Fixture::new();
        let grandparent = f.spawn();
        f.set_position(grandparent, Position { x: 1.0, y: 1.0 });
        let prefab = f.spawn();
        f.add(prefab, f.velocity);
        let parent = f.spawn();
        f.storage
            .add_id(parent, Id::child_of(grandparent), &f.types)
            .unwrap();
        f.storage
            .add_id(parent, Id::instance_of(prefab), &f.types)
            .unwrap();
        let child = f.spawn();
        f.storage
            .add_id(child, Id::child_of(parent), &f.types)
            .unwrap();
        let sig = f.storage.signature_of(child).unwrap().clone();

        // Then
        assert_eq!(f.storage.resolve_container(&sig, f.velocity), Some(prefab));
        assert_eq!(
            f.storage.resolve_container(&sig, f.position),
            Some(grandparent)
        );
        assert_eq!(f.storage.resolve_container(&sig, f.tag), None);
    }

    #[test]
    fn cyclic_links_fail_closed() {
        // Given
        let mut f = Fixture::with_config(WorldConfig::default().with_max_depth(4));
        let a = f.spawn();
        let b = f.spawn();
        f.storage.add_id(a, Id::instance_of(b), &f.types).unwrap();
        f.storage.add_id(b, Id::instance_of(a), &f.types).unwrap();
        let sig = f.storage.signature_of(a).unwrap().clone();

        // Then
        assert_eq!(f.storage.resolve_prefab(&sig, f.position), None);
    }

    #[test]
    fn dense_link_cycles_visit_each_entity_once() {
        // Given - four entities, each an instance of the other three
        let mut f = Fixture::new();
        let nodes: Vec<_> = (0..4).map(|_| f.spawn()).collect();
        for (i, node) in nodes.iter().enumerate() {
            let links: Vec<_> = nodes
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, other)| Id::instance_of(*other))
                .collect();
            f.storage
                .add_signature(*node, &Signature::new(links), &f.types)
                .unwrap();
        }
        let sig = f.storage.signature_of(nodes[0]).unwrap().clone();

        // Then - terminates at the default depth bound
        assert_eq!(f.storage.max_depth(), 32);
        assert_eq!(f.storage.resolve_prefab(&sig, f.position), None);

        // When - one node of the cycle gains the component
        f.add(nodes[3], f.position);

        // Then
        assert_eq!(f.storage.resolve_prefab(&sig, f.position), Some(nodes[3]));
    }

    #[test]
    fn stale_links_are_skipped() {
        let mut f = Fixture::new();
        let prefab = f.spawn();
        f.add(prefab, f.position);
        let e = f.spawn();
        f.storage
            .add_id(e, Id::instance_of(prefab), &f.types)
            .unwrap();

        f.storage.delete(prefab).unwrap();

        assert_eq!(f.storage.resolve_owner(e, f.position).unwrap(), None);
    }

    #[test]
    fn unknown_entity_is_not_found() {
        let mut f = Fixture::new();
        let ghost = f.allocator.alloc();

        assert_eq!(
            f.storage.add_id(ghost, Id::of(f.position), &f.types),
            Err(Error::NotFound(ghost))
        );
        assert_eq!(f.storage.signature_of(ghost).err(), Some(Error::NotFound(ghost)));
    }

    #[test]
    #[should_panic(expected = "table id out of bounds")]
    fn get_table_out_of_bounds() {
        let f = Fixture::new();
        f.storage.get_table(TableId::new(999));
    }

    #[test]
    fn insert_many_fills_one_table() {
        // Given
        let mut f = Fixture::new();
        let prefab = f.spawn();
        f.set_position(prefab, Position { x: 10.0, y: 20.0 });
        let entities: Vec<_> = (0..5).map(|_| f.allocator.alloc()).collect();
        let sig = Signature::new(vec![
            Id::instance_of(prefab),
            Id::of(f.position),
            Id::of(f.velocity),
        ]);

        // When
        let table = f.storage.insert_many(&entities, &sig, &f.types).unwrap();

        // Then
        assert_eq!(f.storage.get_table(table).len(), 5);
        assert_eq!(f.storage.get_table(table).signature(), &sig);
        for (row, e) in entities.iter().enumerate() {
            assert_eq!(f.storage.record(*e).unwrap(), Record::new(table, Row::new(row)));
            assert_eq!(
                f.storage.get::<Position>(*e, f.position).unwrap(),
                Some(&Position { x: 10.0, y: 20.0 })
            );
            assert_eq!(
                f.storage.get::<Velocity>(*e, f.velocity).unwrap(),
                Some(&Velocity::default())
            );
        }
        f.storage.verify_invariants();
    }

    #[test]
    fn memory_usage_grows_with_entities() {
        let mut f = Fixture::new();
        let before = f.storage.memory_usage();
        for _ in 0..100 {
            let e = f.spawn();
            f.add(e, f.position);
        }
        let after = f.storage.memory_usage();
        assert!(after.used > before.used);
        assert!(after.reserved >= after.used);
    }
}
