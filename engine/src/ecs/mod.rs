//! Archetype storage and query core.
//!
//! Entities with the same set of components live in the same [`storage::Table`], one column per
//! component. Adding or removing a component moves the entity to the table of its new
//! signature. Entities can inherit components from prefabs and read components of their
//! containers; [`query`] resolves both when systems iterate.

pub mod component;
pub mod config;
pub mod entity;
pub mod error;
pub mod query;
pub mod schedule;
pub mod storage;
pub mod system;
pub mod world;

pub use component::{Component, Id, Signature};
pub use config::WorldConfig;
pub use entity::Entity;
pub use error::{Error, Result};
pub use query::{Field, FieldMut, Filter, Rows, Source, Term};
pub use schedule::Schedule;
pub use system::{Commands, System};
pub use world::World;
