use std::fmt;

mod signature;

pub use signature::Signature;

use crate::ecs::entity::{ENTITY_MASK, Entity};

/// Marker trait for data that can be stored in a table column.
///
/// Components are plain data: `Default` is used when a component is added without a value and
/// `Clone` when an instance overrides a value it inherits from a prefab.
///
/// ```rust,ignore
/// #[derive(Debug, Default, Clone, Copy, PartialEq)]
/// struct Position { x: f32, y: f32 }
///
/// impl Component for Position {}
/// ```
pub trait Component: 'static + Sized + Send + Sync + Clone + Default {}

/// The relationship carried by a signature entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// A component or tag owned by the entity.
    Plain,
    /// The entity is contained by the target (container link).
    ChildOf,
    /// The entity inherits from the target prefab.
    InstanceOf,
}

/// A signature entry: an entity id, optionally flagged with a relationship role.
///
/// Role bits live above the entity range so relationship entries always sort after plain
/// components in a [`Signature`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(u64);

impl Id {
    pub(crate) const CHILD_OF: u64 = 1 << 63;
    pub(crate) const INSTANCE_OF: u64 = 1 << 62;
    const ROLE_MASK: u64 = Self::CHILD_OF | Self::INSTANCE_OF;

    /// A plain entry for a component or tag entity.
    #[inline]
    pub const fn of(entity: Entity) -> Self {
        Self(entity.to_bits())
    }

    /// A container link to `parent`.
    #[inline]
    pub const fn child_of(parent: Entity) -> Self {
        Self(parent.to_bits() | Self::CHILD_OF)
    }

    /// A prefab link to `prefab`.
    #[inline]
    pub const fn instance_of(prefab: Entity) -> Self {
        Self(prefab.to_bits() | Self::INSTANCE_OF)
    }

    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits & (ENTITY_MASK | Self::ROLE_MASK))
    }

    #[inline]
    pub const fn to_bits(&self) -> u64 {
        self.0
    }

    /// The entity this entry refers to, without role bits.
    #[inline]
    pub const fn entity(&self) -> Entity {
        Entity::from_bits(self.0)
    }

    #[inline]
    pub const fn role(&self) -> Role {
        if self.0 & Self::CHILD_OF != 0 {
            Role::ChildOf
        } else if self.0 & Self::INSTANCE_OF != 0 {
            Role::InstanceOf
        } else {
            Role::Plain
        }
    }

    #[inline]
    pub const fn is_plain(&self) -> bool {
        self.0 & Self::ROLE_MASK == 0
    }

    /// The link target if this entry carries `role`.
    #[inline]
    pub fn target(&self, role: Role) -> Option<Entity> {
        (self.role() == role && role != Role::Plain).then(|| self.entity())
    }
}

impl From<Entity> for Id {
    #[inline]
    fn from(value: Entity) -> Self {
        Self::of(value)
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.role() {
            Role::Plain => write!(f, "Id({})", self.entity()),
            Role::ChildOf => write!(f, "ChildOf({})", self.entity()),
            Role::InstanceOf => write!(f, "InstanceOf({})", self.entity()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::entity::Allocator;

    #[test]
    fn roles_round_trip() {
        // Given
        let allocator = Allocator::new();
        let e = allocator.alloc();

        // Then
        assert_eq!(Id::of(e).role(), Role::Plain);
        assert_eq!(Id::child_of(e).role(), Role::ChildOf);
        assert_eq!(Id::instance_of(e).role(), Role::InstanceOf);
        assert_eq!(Id::child_of(e).entity(), e);
        assert_eq!(Id::instance_of(e).target(Role::InstanceOf), Some(e));
        assert_eq!(Id::instance_of(e).target(Role::ChildOf), None);
        assert_eq!(Id::of(e).target(Role::Plain), None);
    }

    #[test]
    fn links_sort_after_plain_ids() {
        let allocator = Allocator::new();
        let a = allocator.alloc();
        let b = allocator.alloc();

        assert!(Id::of(b) < Id::instance_of(a));
        assert!(Id::instance_of(b) < Id::child_of(a));
    }
}
