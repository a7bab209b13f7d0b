//! Systems: a filter, a phase and a callback run over every matched batch of rows.
//!
//! ```rust,ignore
//! let filter = Filter::parse("Position, Velocity", &world)?;
//! let id = world.add_system(System::new("move", OnUpdate, filter, |rows| {
//!     let velocity = rows.field::<Velocity>(1)?;
//!     for (i, p) in rows.field_mut::<Position>(0)?.iter_mut().enumerate() {
//!         p.x += velocity[i].dx * rows.delta_time();
//!     }
//!     Ok(())
//! }));
//! ```
//!
//! Callbacks only see the columns of their batch, never the world. Structural changes go through
//! [`Rows::commands`](crate::ecs::query::Rows::commands) and are applied when the phase ends.

mod command;

pub use command::{Command, CommandBuffer, Commands};

use std::fmt;

use crate::ecs::{
    error::Result,
    query::{Filter, Rows},
    schedule::{self, Label},
};

/// A system identifier, handed out in registration order.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(u32);

impl Id {
    /// Construct a new system Id from a raw u32 value.
    #[inline]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the index of this system if it were to live in indexable storage (e.g. Vec)
    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// The work a system does for one batch.
pub type Callback = Box<dyn Fn(&mut Rows<'_>) -> Result<()> + Send + Sync + 'static>;

/// A system that can be executed on a world.
pub struct System {
    name: String,

    phase: schedule::Id,

    phase_name: &'static str,

    filter: Filter,

    callback: Callback,

    /// Never split over worker threads.
    single_threaded: bool,
}

impl System {
    pub fn new<L: Label>(
        name: impl Into<String>,
        phase: L,
        filter: Filter,
        callback: impl Fn(&mut Rows<'_>) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            phase: phase.id(),
            phase_name: L::name(),
            filter,
            callback: Box::new(callback),
            single_threaded: false,
        }
    }

    /// Keep every batch of this system on the calling thread.
    #[inline]
    pub fn single_threaded(mut self) -> Self {
        self.single_threaded = true;
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn phase(&self) -> schedule::Id {
        self.phase
    }

    #[inline]
    pub fn phase_name(&self) -> &'static str {
        self.phase_name
    }

    #[inline]
    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    /// True when the rows of one table may be split over worker threads. Systems reading shared
    /// terms stay serial: the entity a shared value is read from can be a row of the same table.
    #[inline]
    pub fn is_parallel(&self) -> bool {
        !self.single_threaded && !self.filter.has_shared_terms()
    }

    /// Run the callback over one batch.
    #[inline]
    pub fn run(&self, rows: &mut Rows<'_>) -> Result<()> {
        (self.callback)(rows)
    }
}

impl fmt::Debug for System {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("System")
            .field("name", &self.name)
            .field("phase", &self.phase_name)
            .field("terms", &self.filter.len())
            .field("single_threaded", &self.single_threaded)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::{
        entity::Allocator,
        query::{Source, Term},
        schedule::{OnUpdate, PreStore},
    };

    #[test]
    fn systems_with_shared_terms_stay_serial() {
        // Given
        let allocator = Allocator::new();
        let (position, mass) = (allocator.alloc(), allocator.alloc());
        let owned = Filter::new().with(Term::new(position));
        let shared = owned.clone().with(Term::new(mass).from(Source::Container));

        // When
        let a = System::new("a", OnUpdate, owned.clone(), |_| Ok(()));
        let b = System::new("b", OnUpdate, shared, |_| Ok(()));
        let c = System::new("c", PreStore, owned, |_| Ok(())).single_threaded();

        // Then
        assert!(a.is_parallel());
        assert!(!b.is_parallel());
        assert!(!c.is_parallel());
        assert_eq!(c.phase(), PreStore.id());
        assert_eq!(c.phase_name(), "PreStore");
        assert_eq!(a.name(), "a");
    }
}
