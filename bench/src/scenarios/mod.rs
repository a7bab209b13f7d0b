//! Realistic scenario benchmarks.
//!
//! These scenarios simulate real-world ECS usage patterns with representative
//! entity counts, component combinations, and system workloads.
//!
//! # Scenarios
//!
//! - **Particles**: High entity count, values shared from a prefab, short lifetimes
//! - **Hierarchy**: Children reading a component of their container every frame

pub mod hierarchy;
pub mod particles;

pub use hierarchy::{HierarchyConfig, HierarchyScenario};
pub use particles::{ParticleConfig, ParticleScenario};

/// Common trait for benchmark scenarios.
pub trait Scenario {
    /// Human-readable name of the scenario.
    fn name(&self) -> &'static str;

    /// Brief description of what this scenario tests.
    fn description(&self) -> &'static str;

    /// Number of entities in this scenario.
    fn entity_count(&self) -> usize;

    /// Set up the scenario (spawn entities, register systems).
    fn setup(&mut self);

    /// Run one frame of the scenario.
    fn update(&mut self);

    /// Clean up the scenario.
    fn teardown(&mut self);
}
