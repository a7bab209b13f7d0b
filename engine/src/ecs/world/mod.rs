//! The World is the central container for all entities, components, and systems in the ECS.
//!
//! # Architecture
//!
//! The World coordinates several subsystems:
//! - **Entity Allocator**: hands out entity handles and recycles freed slots
//! - **Type Registry**: maps Rust types and names to component entities
//! - **Storage**: tables of component data, the entity index and the migration engine
//! - **Schedule**: systems grouped by phase, with their cached queries
//! - **Command Buffer**: structural changes recorded by systems, applied after each phase
//!
//! # Example
//!
//! ```ignore
//! let mut world = World::new();
//!
//! let prefab = world.new_prefab()?;
//! world.set(prefab, Position { x: 10.0, y: 20.0 })?;
//!
//! let e = world.instantiate(prefab)?;
//! assert_eq!(world.get::<Position>(e)?, Some(&Position { x: 10.0, y: 20.0 }));
//!
//! // The instance gets its own copy on write, the prefab keeps its value
//! world.set(e, Position { x: 20.0, y: 30.0 })?;
//! ```
mod type_registry;

use std::{
    any::Any,
    ops::{Bound, RangeBounds},
};

use log::{debug, info};

pub use type_registry::{TypeInfo, TypeRegistry};

use crate::{
    core::tasks::Executor,
    ecs::{
        component::{Component, Id, Signature},
        config::WorldConfig,
        entity::{Allocator, Entity},
        error::{Error, Result},
        query::{Filter, MatchRecord, Query},
        schedule::{self, Label, Schedule},
        storage::{MemoryUsage, Storage},
        system::{self, CommandBuffer, Commands, System},
    },
};

/// Entities, their components and the systems that run over them.
pub struct World {
    config: WorldConfig,

    allocator: Allocator,

    types: TypeRegistry,

    storage: Storage,

    schedule: Schedule,

    commands: CommandBuffer,

    /// Present when more than one thread is configured.
    executor: Option<Executor>,

    /// Builtin tag marking prefabs.
    prefab: Entity,

    frames: u64,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    /// Name the builtin prefab tag is registered under.
    pub const PREFAB: &'static str = "Prefab";

    pub fn new() -> Self {
        Self::with_config(WorldConfig::default())
    }

    pub fn with_config(config: WorldConfig) -> Self {
        let allocator = Allocator::new();
        let types = TypeRegistry::new();
        let prefab = allocator.alloc();
        types.register_name(Self::PREFAB, prefab);

        let executor = (config.threads > 1).then(|| Executor::new(config.threads));
        info!("world created with {config:?}");

        Self {
            storage: Storage::new(&config),
            config,
            allocator,
            types,
            schedule: Schedule::new(),
            commands: CommandBuffer::new(),
            executor,
            prefab,
            frames: 0,
        }
    }

    #[inline]
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    #[inline]
    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    #[inline]
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    #[inline]
    pub fn allocator(&self) -> &Allocator {
        &self.allocator
    }

    #[inline]
    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    #[inline]
    pub fn schedule_mut(&mut self) -> &mut Schedule {
        &mut self.schedule
    }

    #[inline]
    pub fn executor(&self) -> Option<&Executor> {
        self.executor.as_ref()
    }

    /// The builtin tag carried by prefabs.
    #[inline]
    pub fn prefab_tag(&self) -> Entity {
        self.prefab
    }

    /// Number of completed [`progress`](Self::progress) calls.
    #[inline]
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// The component entity of `C`, registering it on first use.
    #[inline]
    pub fn component<C: Component>(&self) -> Entity {
        self.types.register::<C>(|| self.allocator.alloc())
    }

    /// A new entity with no components.
    pub fn new_entity(&mut self) -> Result<Entity> {
        let entity = self.allocator.alloc();
        if let Err(err) = self.storage.insert(entity) {
            self.allocator.free(entity);
            return Err(err);
        }
        Ok(entity)
    }

    /// A new entity created directly in the table of `signature`.
    pub fn new_with(&mut self, signature: &Signature) -> Result<Entity> {
        let entity = self.new_entity()?;
        if let Err(err) = self.storage.add_signature(entity, signature, &self.types) {
            self.delete(entity)?;
            return Err(err);
        }
        Ok(entity)
    }

    /// `count` new entities created together in the table of `signature`. The table reserves its
    /// rows once and inherited values are cloned the same way [`World::new_with`] does.
    pub fn new_batch(&mut self, signature: &Signature, count: usize) -> Result<Vec<Entity>> {
        let entities = self.allocator.alloc_many(count);
        match self.storage.insert_many(&entities, signature, &self.types) {
            Ok(table) => {
                debug!("created {count} entities in {table}");
                Ok(entities)
            }
            Err(err) => {
                for entity in entities {
                    self.allocator.free(entity);
                }
                Err(err)
            }
        }
    }

    /// A new entity tagged as a prefab. Queries skip prefabs unless they name the tag.
    pub fn new_prefab(&mut self) -> Result<Entity> {
        self.new_with(&Signature::new(vec![Id::of(self.prefab)]))
    }

    /// A new entity inheriting every component of `prefab`.
    pub fn instantiate(&mut self, prefab: Entity) -> Result<Entity> {
        if !self.storage.contains(prefab) {
            return Err(Error::NotFound(prefab));
        }
        self.new_with(&Signature::new(vec![Id::instance_of(prefab)]))
    }

    /// Store an entity whose handle was allocated ahead of time by [`Commands`].
    pub(crate) fn insert_reserved(&mut self, entity: Entity, signature: &Signature) -> Result<()> {
        if !self.allocator.is_current(entity) {
            return Err(Error::NotFound(entity));
        }
        self.storage.insert(entity)?;
        if !signature.is_empty() {
            self.storage.add_signature(entity, signature, &self.types)?;
        }
        Ok(())
    }

    /// Delete the entity and free its handle. Links other entities hold to it go stale and are
    /// skipped by resolution.
    pub fn delete(&mut self, entity: Entity) -> Result<()> {
        self.storage.delete(entity)?;
        self.allocator.free(entity);
        Ok(())
    }

    #[inline]
    pub fn contains(&self, entity: Entity) -> bool {
        self.storage.contains(entity)
    }

    pub fn signature_of(&self, entity: Entity) -> Result<&Signature> {
        self.storage.signature_of(entity)
    }

    /// Add `C` with its default value, or a copy of the value the entity inherits.
    pub fn add<C: Component>(&mut self, entity: Entity) -> Result<()> {
        let component = self.component::<C>();
        self.add_id(entity, Id::of(component))
    }

    /// Add a component, tag or link. A no-op when the entity already has it.
    pub fn add_id(&mut self, entity: Entity, id: Id) -> Result<()> {
        self.storage.add_id(entity, id, &self.types).map(drop)
    }

    /// Add several entries with a single move.
    pub fn add_signature(&mut self, entity: Entity, signature: &Signature) -> Result<()> {
        self.storage
            .add_signature(entity, signature, &self.types)
            .map(drop)
    }

    pub fn remove<C: Component>(&mut self, entity: Entity) -> Result<()> {
        let component = self.component::<C>();
        self.remove_id(entity, Id::of(component))
    }

    /// Remove a component, tag or link. A no-op when the entity does not have it.
    pub fn remove_id(&mut self, entity: Entity, id: Id) -> Result<()> {
        self.storage.remove_id(entity, id, &self.types).map(drop)
    }

    pub fn remove_signature(&mut self, entity: Entity, signature: &Signature) -> Result<()> {
        self.storage
            .remove_signature(entity, signature, &self.types)
            .map(drop)
    }

    /// Write `value`. When the entity only inherits `C` it gets its own copy first; the prefab
    /// and its other instances keep the inherited value.
    pub fn set<C: Component>(&mut self, entity: Entity, value: C) -> Result<()> {
        if let Some(slot) = self.get_mut::<C>(entity)? {
            *slot = value;
        }
        Ok(())
    }

    /// The value of `C` owned by the entity, else inherited from its prefabs.
    pub fn get<C: Component>(&self, entity: Entity) -> Result<Option<&C>> {
        let component = self.lookup::<C>()?;
        match self.storage.resolve_owner(entity, component)? {
            Some(owner) => self.storage.get::<C>(owner, component),
            None => Ok(None),
        }
    }

    /// Write access to the entity's own value of `C`, adding it first (a copy of the inherited
    /// value, or the default). `None` for zero-sized components, which have no storage.
    pub fn get_mut<C: Component>(&mut self, entity: Entity) -> Result<Option<&mut C>> {
        let component = self.component::<C>();
        self.storage.add_id(entity, Id::of(component), &self.types)?;
        self.storage.get_mut::<C>(entity, component)
    }

    /// True when the entity owns or inherits `C`.
    pub fn has<C: Component>(&self, entity: Entity) -> Result<bool> {
        match self.types.get::<C>() {
            Some(component) => self.has_id(entity, component),
            None => self.storage.signature_of(entity).map(|_| false),
        }
    }

    /// True when the entity owns or inherits `component`. The prefab tag is never inherited.
    pub fn has_id(&self, entity: Entity, component: Entity) -> Result<bool> {
        let signature = self.storage.signature_of(entity)?;
        if signature.contains(Id::of(component)) {
            return Ok(true);
        }
        if component == self.prefab {
            return Ok(false);
        }
        Ok(self.storage.resolve_prefab(signature, component).is_some())
    }

    /// True when the entity owns `C` itself.
    pub fn has_owned<C: Component>(&self, entity: Entity) -> Result<bool> {
        match self.types.get::<C>() {
            Some(component) => self.storage.owns(entity, Id::of(component)),
            None => self.storage.signature_of(entity).map(|_| false),
        }
    }

    /// Place `child` in `parent`. Container terms of the child resolve through it.
    pub fn adopt(&mut self, child: Entity, parent: Entity) -> Result<()> {
        if !self.storage.contains(parent) {
            return Err(Error::NotFound(parent));
        }
        self.add_id(child, Id::child_of(parent))
    }

    pub fn orphan(&mut self, child: Entity, parent: Entity) -> Result<()> {
        self.remove_id(child, Id::child_of(parent))
    }

    /// Make `entity` inherit the components of `prefab`. Nothing is copied.
    pub fn inherit(&mut self, entity: Entity, prefab: Entity) -> Result<()> {
        if !self.storage.contains(prefab) {
            return Err(Error::NotFound(prefab));
        }
        self.add_id(entity, Id::instance_of(prefab))
    }

    pub fn disinherit(&mut self, entity: Entity, prefab: Entity) -> Result<()> {
        self.remove_id(entity, Id::instance_of(prefab))
    }

    /// Match `filter` once against the current tables.
    pub fn query(&self, filter: &Filter) -> Vec<MatchRecord<'_>> {
        let mut query = Query::new(filter.clone(), self.prefab);
        query.update(&self.storage);
        query.records(&self.storage)
    }

    pub fn add_system(&mut self, system: System) -> system::Id {
        self.schedule.add_system(system, self.prefab, &self.storage)
    }

    /// Run every phase of the pipeline once. Commands are flushed after each phase. Stops at the
    /// first phase with a failing system.
    pub fn progress(&mut self, delta_time: f32) -> Result<()> {
        let phases: Vec<_> = self.schedule.pipeline().phases().collect();
        for phase in phases {
            self.run_phase_id(phase, delta_time)?;
        }
        self.frames += 1;
        Ok(())
    }

    /// Run the systems of one phase, then flush commands.
    pub fn run_phase<L: Label>(&mut self, phase: L, delta_time: f32) -> Result<()> {
        self.run_phase_id(phase.id(), delta_time)
    }

    fn run_phase_id(&mut self, phase: schedule::Id, delta_time: f32) -> Result<()> {
        self.schedule.update(&self.storage);
        let result = self
            .schedule
            .systems_in(phase)
            .iter()
            .try_for_each(|id| self.schedule.run_system(*id, self, delta_time));
        self.flush();
        result
    }

    /// Run one system outside the pipeline, then flush commands. This is the only way systems
    /// registered in [`Manual`](crate::ecs::schedule::Manual) run.
    pub fn run_system(&mut self, id: system::Id, delta_time: f32) -> Result<()> {
        self.schedule.update(&self.storage);
        let result = self.schedule.run_system(id, self, delta_time);
        self.flush();
        result
    }

    /// Run one system over part of its matched rows, then flush commands. Rows are counted across
    /// the matched tables in creation order, so `rows` acts as an offset and a limit. The batches
    /// run on the calling thread and can read `param` through [`Rows::param`].
    ///
    /// [`Rows::param`]: crate::ecs::Rows::param
    pub fn run_system_range<R: RangeBounds<usize>>(
        &mut self,
        id: system::Id,
        delta_time: f32,
        rows: R,
        param: &(dyn Any + Send + Sync),
    ) -> Result<()> {
        let start = match rows.start_bound() {
            Bound::Included(&start) => start,
            Bound::Excluded(&start) => start.saturating_add(1),
            Bound::Unbounded => 0,
        };
        let end = match rows.end_bound() {
            Bound::Included(&end) => end.saturating_add(1),
            Bound::Excluded(&end) => end,
            Bound::Unbounded => usize::MAX,
        };

        self.schedule.update(&self.storage);
        let result = self
            .schedule
            .run_system_range(id, self, delta_time, start..end, param);
        self.flush();
        result
    }

    /// Record deferred changes.
    #[inline]
    pub fn commands(&self) -> Commands<'_> {
        Commands::new(self, &self.commands)
    }

    /// Apply every recorded command. Returns how many were applied.
    pub fn flush(&mut self) -> usize {
        let commands = std::mem::take(&mut self.commands);
        let applied = commands.flush(self);
        self.commands = commands;
        applied
    }

    /// Bytes reserved and used by storage.
    pub fn memory_usage(&self) -> MemoryUsage {
        self.storage.memory_usage()
    }

    fn lookup<C: Component>(&self) -> Result<Entity> {
        self.types
            .get::<C>()
            .ok_or_else(|| Error::UnknownComponent(TypeInfo::of::<C>().name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::storage::Row;

    #[derive(Debug, Default, Clone, Copy, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }
    impl Component for Position {}

    #[derive(Debug, Default, Clone, Copy, PartialEq)]
    struct Velocity {
        dx: f32,
        dy: f32,
    }
    impl Component for Velocity {}

    #[derive(Debug, Default, Clone, Copy, PartialEq)]
    struct Frozen;
    impl Component for Frozen {}

    #[test]
    fn has_follows_add_and_remove() {
        // Given
        let mut world = World::new();
        let e = world.new_entity().unwrap();
        let position = Id::of(world.component::<Position>());
        let velocity = Id::of(world.component::<Velocity>());

        // When
        world
            .add_signature(e, &Signature::new(vec![position, velocity]))
            .unwrap();

        // Then
        assert!(world.has::<Position>(e).unwrap());
        assert!(world.has::<Velocity>(e).unwrap());

        world.remove_signature(e, &Signature::new(vec![position])).unwrap();
        assert!(!world.has::<Position>(e).unwrap());
        assert!(world.has::<Velocity>(e).unwrap());
    }

    #[test]
    fn adding_present_component_is_a_noop() {
        // Given
        let mut world = World::new();
        let e = world.new_entity().unwrap();
        world.set(e, Position { x: 1.0, y: 2.0 }).unwrap();
        let before = world.storage().record(e).unwrap();

        // When
        world.add::<Position>(e).unwrap();

        // Then
        assert_eq!(world.storage().record(e).unwrap(), before);
        assert_eq!(
            world.get::<Position>(e).unwrap(),
            Some(&Position { x: 1.0, y: 2.0 })
        );
    }

    #[test]
    fn set_on_instance_overrides_without_touching_prefab() {
        // Given
        let mut world = World::new();
        let prefab = world.new_prefab().unwrap();
        world.set(prefab, Position { x: 10.0, y: 20.0 }).unwrap();
        let e = world.instantiate(prefab).unwrap();
        let sibling = world.instantiate(prefab).unwrap();
        assert!(!world.has_owned::<Position>(e).unwrap());
        assert!(world.has::<Position>(e).unwrap());

        // When
        world.set(e, Position { x: 20.0, y: 30.0 }).unwrap();

        // Then
        assert_eq!(
            world.get::<Position>(e).unwrap(),
            Some(&Position { x: 20.0, y: 30.0 })
        );
        assert_eq!(
            world.get::<Position>(prefab).unwrap(),
            Some(&Position { x: 10.0, y: 20.0 })
        );
        assert_eq!(
            world.get::<Position>(sibling).unwrap(),
            Some(&Position { x: 10.0, y: 20.0 })
        );

        // Removing the override shows the inherited value again
        world.remove::<Position>(e).unwrap();
        assert_eq!(
            world.get::<Position>(e).unwrap(),
            Some(&Position { x: 10.0, y: 20.0 })
        );
    }

    #[test]
    fn get_mut_copies_inherited_value() {
        let mut world = World::new();
        let prefab = world.new_prefab().unwrap();
        world.set(prefab, Velocity { dx: 1.0, dy: 1.0 }).unwrap();
        let e = world.instantiate(prefab).unwrap();

        world.get_mut::<Velocity>(e).unwrap().unwrap().dx = 5.0;

        assert_eq!(
            world.get::<Velocity>(e).unwrap(),
            Some(&Velocity { dx: 5.0, dy: 1.0 })
        );
        assert!(world.has_owned::<Velocity>(e).unwrap());
    }

    #[test]
    fn prefab_tag_is_not_inherited() {
        let mut world = World::new();
        let prefab = world.new_prefab().unwrap();
        let e = world.instantiate(prefab).unwrap();

        assert!(world.has_id(prefab, world.prefab_tag()).unwrap());
        assert!(!world.has_id(e, world.prefab_tag()).unwrap());
        assert_eq!(world.types().lookup(World::PREFAB), Some(world.prefab_tag()));
    }

    #[test]
    fn delete_fixes_swapped_record() {
        // Given
        let mut world = World::new();
        let entities: Vec<_> = (0..3)
            .map(|i| {
                let e = world.new_entity().unwrap();
                world.set(e, Position { x: i as f32, y: 0.0 }).unwrap();
                e
            })
            .collect();
        let table = world.storage().record(entities[0]).unwrap().table;

        // When
        world.delete(entities[0]).unwrap();

        // Then
        assert_eq!(world.storage().get_table(table).len(), 2);
        assert_eq!(
            world.storage().record(entities[0]),
            Err(Error::NotFound(entities[0]))
        );
        assert_eq!(world.storage().record(entities[2]).unwrap().row, Row::new(0));
        assert_eq!(
            world.get::<Position>(entities[2]).unwrap(),
            Some(&Position { x: 2.0, y: 0.0 })
        );
        world.storage().verify_invariants();
    }

    #[test]
    fn add_then_remove_scenario() {
        // Given
        let mut world = World::new();
        let e = world.new_entity().unwrap();

        // When
        world.set(e, Position { x: 1.0, y: 1.0 }).unwrap();
        world.set(e, Velocity { dx: 2.0, dy: 2.0 }).unwrap();
        world.remove::<Position>(e).unwrap();

        // Then
        assert!(!world.has::<Position>(e).unwrap());
        assert_eq!(
            world.get::<Velocity>(e).unwrap(),
            Some(&Velocity { dx: 2.0, dy: 2.0 })
        );
        assert_eq!(world.signature_of(e).unwrap().len(), 1);
        world.storage().verify_invariants();
    }

    #[test]
    fn stale_handles_are_not_found() {
        // Given
        let mut world = World::new();
        let e = world.new_entity().unwrap();
        world.delete(e).unwrap();

        // When
        let reused = world.new_entity().unwrap();

        // Then
        assert_eq!(reused.index(), e.index());
        assert!(!world.contains(e));
        assert_eq!(world.add::<Position>(e), Err(Error::NotFound(e)));
        assert_eq!(world.delete(e), Err(Error::NotFound(e)));
        assert!(world.contains(reused));
    }

    #[test]
    fn zero_sized_components_are_tags() {
        let mut world = World::new();
        let e = world.new_entity().unwrap();

        world.set(e, Frozen).unwrap();

        assert!(world.has::<Frozen>(e).unwrap());
        assert_eq!(world.get::<Frozen>(e).unwrap(), None);
        let record = world.storage().record(e).unwrap();
        assert!(world.storage().get_table(record.table).columns().is_empty());
    }

    #[test]
    fn unknown_component_reads() {
        let mut world = World::new();
        let e = world.new_entity().unwrap();

        assert_eq!(
            world.get::<Velocity>(e),
            Err(Error::UnknownComponent("Velocity"))
        );
        assert!(!world.has::<Velocity>(e).unwrap());
    }

    #[test]
    fn links_require_live_targets() {
        let mut world = World::new();
        let child = world.new_entity().unwrap();
        let parent = world.new_entity().unwrap();
        world.delete(parent).unwrap();

        assert_eq!(world.adopt(child, parent), Err(Error::NotFound(parent)));
        assert_eq!(world.inherit(child, parent), Err(Error::NotFound(parent)));
        assert_eq!(world.instantiate(parent), Err(Error::NotFound(parent)));
    }
}
