//! Filters, table matching and batch iteration.
//!
//! A [`Filter`] is a list of [`Term`]s. Each term names one component (or, for `Or`, a list of
//! alternatives), an operator and the entity the value is read from:
//!
//! | Source | Where the value comes from |
//! |--------|----------------------------|
//! | [`Source::Owned`] | the matched entity itself |
//! | [`Source::Prefab`] | the entity, else the prefabs it is an instance of |
//! | [`Source::Container`] | the containers (parents) of the entity, or their prefabs |
//! | [`Source::Entity`] | one fixed entity, or its prefabs |
//! | [`Source::Handle`] | nowhere: the term only passes the component's handle |
//!
//! Filters can be built with the term constructors or parsed from the text form:
//!
//! ```rust,ignore
//! // Position and Velocity owned, any Mass from a container, no Frozen tag
//! let filter = Filter::parse("Position, Velocity, CONTAINER.Mass, !Frozen", &world)?;
//!
//! let filter = Filter::new()
//!     .with(Term::new(position))
//!     .with(Term::new(mass).from(Source::Container))
//!     .with(Term::not(frozen));
//! ```
//!
//! A [`Query`] caches which tables pass the owned terms and produces [`MatchRecord`]s, which the
//! schedule hands to system callbacks as [`Rows`] batches.

mod matcher;
mod parse;
mod rows;

pub use matcher::{MatchRecord, Query, Resolved, TermMatch};
pub use rows::{Field, FieldMut, Rows};

use crate::ecs::entity::Entity;

/// How a term constrains a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Oper {
    /// The component must be present.
    And,
    /// The component must be absent.
    Not,
    /// The component is reported when present and never rejects.
    Optional,
    /// At least one of the alternatives must be present.
    Or,
}

/// Where a term reads its component from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Owned,
    Prefab,
    Container,
    Entity(Entity),
    /// No value is read and no table is rejected. Callbacks get the component entity itself
    /// through [`Rows::handle`].
    Handle,
}

impl Source {
    /// True when the value may come from an entity other than the matched one.
    #[inline]
    pub fn is_shared(&self) -> bool {
        !matches!(self, Source::Owned | Source::Handle)
    }
}

/// One clause of a [`Filter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    oper: Oper,
    source: Source,
    /// The component, or the alternatives of an `Or` term in declared order.
    components: Vec<Entity>,
}

impl Term {
    /// The component must be present.
    #[inline]
    pub fn new(component: Entity) -> Self {
        Self {
            oper: Oper::And,
            source: Source::Owned,
            components: vec![component],
        }
    }

    /// The component must be absent.
    #[inline]
    pub fn not(component: Entity) -> Self {
        Self {
            oper: Oper::Not,
            ..Self::new(component)
        }
    }

    #[inline]
    pub fn optional(component: Entity) -> Self {
        Self {
            oper: Oper::Optional,
            ..Self::new(component)
        }
    }

    /// At least one of `alternatives` must be present. Alternatives are tried in the given order.
    ///
    /// # Panics
    /// Panics if `alternatives` is empty.
    pub fn or(alternatives: impl IntoIterator<Item = Entity>) -> Self {
        let components: Vec<_> = alternatives.into_iter().collect();
        assert!(!components.is_empty(), "or term needs an alternative");
        Self {
            oper: Oper::Or,
            source: Source::Owned,
            components,
        }
    }

    /// Read the component from `source` instead of the matched entity.
    #[inline]
    pub fn from(mut self, source: Source) -> Self {
        self.source = source;
        self
    }

    #[inline]
    pub fn oper(&self) -> Oper {
        self.oper
    }

    #[inline]
    pub fn source(&self) -> Source {
        self.source
    }

    /// The component of a single-component term, or the first alternative of an `Or`.
    #[inline]
    pub fn component(&self) -> Entity {
        self.components[0]
    }

    #[inline]
    pub fn components(&self) -> &[Entity] {
        &self.components
    }

    #[inline]
    pub fn names(&self, component: Entity) -> bool {
        self.components.contains(&component)
    }
}

/// An ordered list of terms. Term indices are the field indices used by [`Rows`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    terms: Vec<Term>,
}

impl Filter {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn with(mut self, term: Term) -> Self {
        self.terms.push(term);
        self
    }

    #[inline]
    pub fn push(&mut self, term: Term) {
        self.terms.push(term);
    }

    #[inline]
    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// True when any term mentions `component`.
    #[inline]
    pub fn names(&self, component: Entity) -> bool {
        self.terms.iter().any(|term| term.names(component))
    }

    /// True when any term may read a value from another entity.
    #[inline]
    pub fn has_shared_terms(&self) -> bool {
        self.terms.iter().any(|term| term.source.is_shared())
    }
}

impl From<Vec<Term>> for Filter {
    fn from(terms: Vec<Term>) -> Self {
        Self { terms }
    }
}
