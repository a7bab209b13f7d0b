//! Common component types used across benchmarks.
//!
//! These components are designed to be representative of real game components
//! in terms of size and access patterns.

use rusty_ecs::ecs::{Component, Entity, World};

// =============================================================================
// Transform Components
// =============================================================================

/// 3D position component (12 bytes).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}
impl Component for Position {}

/// 3D velocity component (12 bytes).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Velocity {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}
impl Component for Velocity {}

/// Rotation as euler angles (12 bytes).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Rotation {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}
impl Component for Rotation {}

/// 4x4 transformation matrix (64 bytes).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub matrix: [[f32; 4]; 4],
}
impl Component for Transform {}

impl Default for Transform {
    fn default() -> Self {
        Self {
            matrix: [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ],
        }
    }
}

/// Read by children through their container.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Mass(pub f32);
impl Component for Mass {}

// =============================================================================
// Particle System Components
// =============================================================================

/// A Particle marker
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Particle;
impl Component for Particle {}

/// Particle lifetime tracking.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Lifetime {
    pub remaining: f32,
    pub total: f32,
}
impl Component for Lifetime {}

/// RGBA color (16 bytes).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}
impl Component for Color {}

/// Particle size/scale.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}
impl Component for Size {}

// =============================================================================
// Fragmentation Test Components
// =============================================================================

/// Shared data component for fragmentation tests.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Data {
    pub value: f64,
}
impl Component for Data {}

/// Tag entities used to split otherwise identical entities over `count` tables.
pub fn markers(world: &World, count: usize) -> Vec<Entity> {
    (0..count)
        .map(|i| {
            let marker = world.allocator().alloc();
            world.types().register_name(format!("Marker{i}"), marker);
            marker
        })
        .collect()
}
