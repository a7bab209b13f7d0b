//! Benchmark utilities for the ECS core.
//!
//! - **Microbenchmarks**: the index map, spawning, iteration and table migration
//! - **Scenario benchmarks**: whole frames of prefab-heavy and container-heavy worlds
//!
//! # Running Benchmarks
//!
//! ```bash
//! # Run all benchmarks
//! cargo bench -p rusty_bench
//!
//! # Run specific benchmark group
//! cargo bench -p rusty_bench -- migrate
//! ```
//!
//! Results are written to `target/criterion/` with HTML reports for visualization.

pub mod components;
pub mod scenarios;
