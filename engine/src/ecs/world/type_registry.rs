//! Runtime type descriptors for component entities.
//!
//! Every component is an entity. The [`TypeRegistry`] maps a Rust type to that entity and the
//! entity to a [`TypeInfo`] describing how to store the component in a type-erased column
//! (layout, drop, clone and default construction). Entities without a `TypeInfo` are tags: they
//! can appear in a signature but get no column.
//!
//! The registry is owned by a world and filled through explicit calls, there is no global state:
//!
//! ```rust,ignore
//! let position = world.component::<Position>();
//! assert_eq!(world.types().get::<Position>(), Some(position));
//! assert_eq!(world.types().lookup("Position"), Some(position));
//! ```

use std::{
    alloc::Layout,
    any::TypeId as StdTypeId,
    ptr::NonNull,
    sync::RwLock,
};

use dashmap::{DashMap, Entry};
use log::warn;

use crate::ecs::{component::Component, entity::Entity};

/// Describes how to store values of one component type without knowing it statically.
#[derive(Debug, Clone, Copy)]
pub struct TypeInfo {
    /// Short, human readable name used by the filter parser and error messages.
    name: &'static str,

    type_id: StdTypeId,

    layout: Layout,

    drop_fn: unsafe fn(NonNull<u8>),

    /// Clone the value at the first pointer into the uninitialized slot at the second.
    clone_fn: unsafe fn(NonNull<u8>, NonNull<u8>),

    /// Write a default value into an uninitialized slot.
    default_fn: unsafe fn(NonNull<u8>),
}

impl TypeInfo {
    /// Build the descriptor for `C`.
    pub fn of<C: Component>() -> Self {
        let drop_fn = if std::mem::needs_drop::<C>() {
            Self::drop_impl::<C>
        } else {
            Self::drop_noop
        };
        Self {
            name: short_name(std::any::type_name::<C>()),
            type_id: StdTypeId::of::<C>(),
            layout: Layout::new::<C>(),
            drop_fn,
            clone_fn: Self::clone_impl::<C>,
            default_fn: Self::default_impl::<C>,
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn type_id(&self) -> StdTypeId {
        self.type_id
    }

    #[inline]
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Zero-sized components behave like tags: no column is allocated for them.
    #[inline]
    pub fn is_zero_sized(&self) -> bool {
        self.layout.size() == 0
    }

    #[inline]
    pub fn drop_fn(&self) -> unsafe fn(NonNull<u8>) {
        self.drop_fn
    }

    #[inline]
    pub fn clone_fn(&self) -> unsafe fn(NonNull<u8>, NonNull<u8>) {
        self.clone_fn
    }

    #[inline]
    pub fn default_fn(&self) -> unsafe fn(NonNull<u8>) {
        self.default_fn
    }

    unsafe fn drop_impl<C>(ptr: NonNull<u8>) {
        unsafe {
            std::ptr::drop_in_place(ptr.as_ptr() as *mut C);
        }
    }

    unsafe fn drop_noop(_ptr: NonNull<u8>) {}

    unsafe fn clone_impl<C: Clone>(src: NonNull<u8>, dst: NonNull<u8>) {
        unsafe {
            let value = (*(src.as_ptr() as *const C)).clone();
            std::ptr::write(dst.as_ptr() as *mut C, value);
        }
    }

    unsafe fn default_impl<C: Default>(dst: NonNull<u8>) {
        unsafe {
            std::ptr::write(dst.as_ptr() as *mut C, C::default());
        }
    }
}

/// The last path segment of a type name without its generic arguments, so
/// `app::Wrapper<other::Inner>` becomes `Wrapper`.
fn short_name(full: &'static str) -> &'static str {
    let base = full.split_once('<').map_or(full, |(base, _)| base);
    base.rsplit("::").next().unwrap_or(base)
}

/// Maps Rust types and names to component entities, and component entities to [`TypeInfo`].
pub struct TypeRegistry {
    /// Rust type -> component entity.
    type_map: DashMap<StdTypeId, Entity>,

    /// Name -> entity, for components and named tags.
    names: DashMap<String, Entity>,

    /// Descriptors indexed by entity slot. The entity is stored alongside to reject stale
    /// handles that reuse the slot.
    types: RwLock<Vec<Option<(Entity, TypeInfo)>>>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    #[inline]
    pub fn new() -> Self {
        Self {
            type_map: DashMap::new(),
            names: DashMap::new(),
            types: RwLock::new(Vec::new()),
        }
    }

    /// Register `C`, calling `alloc` for its entity only when it is not registered yet.
    /// Returns the component entity either way.
    pub fn register<C: Component>(&self, alloc: impl FnOnce() -> Entity) -> Entity {
        if let Some(existing) = self.type_map.get(&StdTypeId::of::<C>()) {
            return *existing;
        }

        match self.type_map.entry(StdTypeId::of::<C>()) {
            Entry::Occupied(occupied) => *occupied.get(),
            Entry::Vacant(vacant) => {
                let entity = alloc();
                let info = TypeInfo::of::<C>();
                self.insert_info(entity, info);
                self.insert_name(info.name(), entity);
                vacant.insert(entity);
                entity
            }
        }
    }

    /// Attach a descriptor to an existing entity, turning it into a component.
    pub fn register_info(&self, entity: Entity, info: TypeInfo) {
        self.insert_info(entity, info);
        self.insert_name(info.name(), entity);
    }

    /// Names of different types can collide once shortened. The first registration keeps it.
    fn insert_name(&self, name: &str, entity: Entity) {
        match self.names.entry(name.to_string()) {
            Entry::Occupied(occupied) if *occupied.get() != entity => warn!(
                "component name '{name}' already resolves to {}, {entity} can only be used by type",
                occupied.get()
            ),
            Entry::Occupied(_) => {}
            Entry::Vacant(vacant) => {
                vacant.insert(entity);
            }
        }
    }

    fn insert_info(&self, entity: Entity, info: TypeInfo) {
        let mut types = self.types.write().unwrap_or_else(|e| e.into_inner());
        let index = entity.index();
        if index >= types.len() {
            types.resize(index + 1, None);
        }
        types[index] = Some((entity, info));
    }

    /// Give an entity a name the filter parser can resolve. The first registration wins.
    pub fn register_name(&self, name: impl Into<String>, entity: Entity) -> Entity {
        *self.names.entry(name.into()).or_insert(entity)
    }

    /// Get the component entity of `C`, if registered.
    #[inline]
    pub fn get<C: 'static>(&self) -> Option<Entity> {
        self.type_map
            .get(&StdTypeId::of::<C>())
            .map(|entry| *entry.value())
    }

    /// Resolve a name registered for a component or tag.
    #[inline]
    pub fn lookup(&self, name: &str) -> Option<Entity> {
        self.names.get(name).map(|entry| *entry.value())
    }

    /// The name registered for `entity`: its type name for components, else any name given
    /// with [`register_name`](Self::register_name).
    pub fn name_of(&self, entity: Entity) -> Option<String> {
        if let Some(info) = self.info(entity) {
            return Some(info.name().to_string());
        }
        self.names
            .iter()
            .find(|entry| *entry.value() == entity)
            .map(|entry| entry.key().clone())
    }

    /// Get the descriptor of a component entity. Tags and unknown entities return `None`.
    #[inline]
    pub fn info(&self, entity: Entity) -> Option<TypeInfo> {
        let types = self.types.read().unwrap_or_else(|e| e.into_inner());
        types
            .get(entity.index())
            .and_then(|slot| *slot)
            .filter(|(owner, _)| *owner == entity)
            .map(|(_, info)| info)
    }

    /// Get the descriptor of `C`, if registered.
    #[inline]
    pub fn info_of<C: 'static>(&self) -> Option<TypeInfo> {
        self.get::<C>().and_then(|entity| self.info(entity))
    }

    /// Number of registered component types.
    #[inline]
    pub fn len(&self) -> usize {
        self.type_map.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.type_map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::ecs::entity::Allocator;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }
    impl Component for Position {}

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Name(String);
    impl Component for Name {}

    #[test]
    fn register_is_idempotent() {
        // Given
        let allocator = Allocator::new();
        let registry = TypeRegistry::new();

        // When
        let first = registry.register::<Position>(|| allocator.alloc());
        let second = registry.register::<Position>(|| allocator.alloc());

        // Then
        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
        assert_eq!(allocator.high_water_mark(), 1);
    }

    #[test]
    fn info_describes_layout_and_name() {
        let allocator = Allocator::new();
        let registry = TypeRegistry::new();
        let id = registry.register::<Position>(|| allocator.alloc());

        let info = registry.info(id).unwrap();
        assert_eq!(info.name(), "Position");
        assert_eq!(info.layout(), Layout::new::<Position>());
        assert_eq!(registry.lookup("Position"), Some(id));
        assert!(registry.info_of::<Name>().is_none());
    }

    #[test]
    fn names_resolve_both_ways() {
        let allocator = Allocator::new();
        let registry = TypeRegistry::new();
        let id = registry.register::<Position>(|| allocator.alloc());
        let tag = registry.register_name("Frozen", allocator.alloc());

        assert_eq!(registry.name_of(id).as_deref(), Some("Position"));
        assert_eq!(registry.name_of(tag).as_deref(), Some("Frozen"));
        assert_eq!(registry.lookup("Frozen"), Some(tag));
        assert_eq!(registry.name_of(allocator.alloc()), None);
    }

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Wrapper<T>(T);
    impl<T: Clone + Default + Send + Sync + 'static> Component for Wrapper<T> {}

    mod other {
        use crate::ecs::component::Component;

        #[derive(Debug, Default, Clone, PartialEq)]
        pub struct Position;
        impl Component for Position {}
    }

    #[test]
    fn generic_names_drop_their_arguments() {
        assert_eq!(TypeInfo::of::<Wrapper<Position>>().name(), "Wrapper");
        assert_eq!(short_name("a::Wrapper<b::Inner<c::Deep>>"), "Wrapper");
        assert_eq!(short_name("Plain"), "Plain");
    }

    #[test]
    fn colliding_names_keep_the_first_type() {
        // Given
        let allocator = Allocator::new();
        let registry = TypeRegistry::new();
        let first = registry.register::<Position>(|| allocator.alloc());
        let wrapped = registry.register::<Wrapper<Position>>(|| allocator.alloc());

        // When
        let second = registry.register::<other::Position>(|| allocator.alloc());
        let other_wrapped = registry.register::<Wrapper<Name>>(|| allocator.alloc());

        // Then
        assert_ne!(first, second);
        assert_ne!(wrapped, other_wrapped);
        assert_eq!(registry.lookup("Position"), Some(first));
        assert_eq!(registry.lookup("Wrapper"), Some(wrapped));
        assert_eq!(registry.get::<other::Position>(), Some(second));
        assert_eq!(registry.name_of(second).as_deref(), Some("Position"));
    }

    #[test]
    fn stale_entity_has_no_info() {
        let allocator = Allocator::new();
        let registry = TypeRegistry::new();
        let id = registry.register::<Position>(|| allocator.alloc());

        assert!(registry.info(id.genned()).is_none());
    }

    #[test]
    fn clone_and_default_fns_work_type_erased() {
        // Given
        let info = TypeInfo::of::<Name>();
        let src = Name("prefab".into());
        let mut dst = std::mem::MaybeUninit::<Name>::uninit();
        let mut def = std::mem::MaybeUninit::<Name>::uninit();

        // When
        let (cloned, defaulted) = unsafe {
            (info.clone_fn())(
                NonNull::from(&src).cast(),
                NonNull::new_unchecked(dst.as_mut_ptr() as *mut u8),
            );
            (info.default_fn())(NonNull::new_unchecked(def.as_mut_ptr() as *mut u8));
            (dst.assume_init(), def.assume_init())
        };

        // Then
        assert_eq!(cloned, src);
        assert_eq!(defaulted, Name::default());
    }

    #[test]
    fn concurrent_registration_yields_one_entity() {
        let allocator = Arc::new(Allocator::new());
        let registry = Arc::new(TypeRegistry::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let allocator = Arc::clone(&allocator);
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.register::<Position>(|| allocator.alloc()))
            })
            .collect();

        let ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(registry.len(), 1);
    }
}
