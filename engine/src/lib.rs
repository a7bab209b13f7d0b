pub mod core;
pub mod ecs;
