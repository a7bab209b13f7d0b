use std::fmt;

use crate::ecs::entity::Entity;

/// Errors reported by world and storage operations.
///
/// Broken internal invariants are not represented here: they are checked with debug assertions
/// and panic, since they can only come from a bug in this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// An allocation could not be satisfied. The operation was abandoned before any entity moved.
    OutOfMemory { bytes: usize },

    /// The entity was deleted or never existed.
    NotFound(Entity),

    /// A typed access named a Rust type that was never registered as a component.
    UnknownComponent(&'static str),

    /// A typed access did not match the component type stored for the term or column.
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// Mutable access was requested for a term resolved from another entity.
    ReadOnly { term: usize },

    /// The term index does not exist or has no data for this batch.
    NoSuchTerm { term: usize },

    /// A filter expression could not be parsed.
    Parse { expr: String, reason: String },

    /// A task running on a worker thread panicked.
    TaskFailed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::OutOfMemory { bytes } => write!(f, "out of memory allocating {bytes} bytes"),
            Error::NotFound(entity) => write!(f, "entity {entity} not found"),
            Error::UnknownComponent(name) => write!(f, "component {name} is not registered"),
            Error::TypeMismatch { expected, found } => {
                write!(f, "type mismatch: expected {expected}, found {found}")
            }
            Error::ReadOnly { term } => write!(f, "term {term} is shared and read-only"),
            Error::NoSuchTerm { term } => write!(f, "term {term} has no data in this batch"),
            Error::Parse { expr, reason } => write!(f, "invalid filter '{expr}': {reason}"),
            Error::TaskFailed => write!(f, "a worker task failed"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
