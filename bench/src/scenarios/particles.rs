//! Particle system benchmark scenario.
//!
//! Simulates a high-volume particle system with:
//! - 100,000 particles instantiated from one prefab
//! - Owned components: Position, Velocity, Lifetime, Color
//! - Inherited components: Size and the Particle tag
//! - Systems: movement, lifetime decay, fade, and a deferred despawn/respawn of dead particles
//!
//! This scenario tests:
//! - High entity count iteration, split over worker threads
//! - Shared values read through a prefab
//! - Deferred delete and spawn throughput (particles dying and respawning)

use std::sync::{Arc, Mutex};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rusty_ecs::ecs::{
    Commands, Entity, Filter, Id, Result, Signature, System, World, WorldConfig,
    schedule::{OnUpdate, PostUpdate},
};

use crate::components::{Color, Lifetime, Particle, Position, Size, Velocity};
use crate::scenarios::Scenario;

/// Configuration for the particle benchmark.
#[derive(Debug, Clone)]
pub struct ParticleConfig {
    /// Total number of particles to maintain.
    pub particle_count: usize,
    /// Simulated delta time per frame.
    pub delta_time: f32,
    /// Random seed for reproducibility.
    pub seed: u64,
    /// The number of executor threads to use.
    pub executor_threads: usize,
}

impl Default for ParticleConfig {
    fn default() -> Self {
        Self {
            particle_count: 100_000,
            delta_time: 1.0 / 60.0, // 60 FPS
            seed: 12345,
            executor_threads: 4,
        }
    }
}

struct ParticleFactory {
    rng: ChaCha8Rng,
    /// Signature of a fresh particle: the prefab link plus its owned components.
    signature: Signature,
}

impl ParticleFactory {
    fn new(world: &World, template: Entity, seed: u64) -> Self {
        let signature = Signature::new(vec![
            Id::instance_of(template),
            Id::of(world.component::<Position>()),
            Id::of(world.component::<Velocity>()),
            Id::of(world.component::<Lifetime>()),
            Id::of(world.component::<Color>()),
        ]);
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            signature,
        }
    }

    fn create_particle(&mut self) -> (Position, Velocity, Lifetime, Color) {
        let rng = &mut self.rng;
        let pos = Position {
            x: rng.gen_range(-100.0..100.0),
            y: rng.gen_range(-100.0..100.0),
            z: rng.gen_range(-100.0..100.0),
        };
        let vel = Velocity {
            x: rng.gen_range(-10.0..10.0),
            y: rng.gen_range(-10.0..10.0),
            z: rng.gen_range(-10.0..10.0),
        };
        let lifetime = Lifetime {
            remaining: rng.gen_range(1.0..5.0),
            total: 5.0,
        };
        let color = Color {
            r: rng.gen_range(0.0..1.0),
            g: rng.gen_range(0.0..1.0),
            b: rng.gen_range(0.0..1.0),
            a: 1.0,
        };
        (pos, vel, lifetime, color)
    }

    fn spawn(&mut self, world: &mut World) -> Result<Entity> {
        let entity = world.new_with(&self.signature)?;
        let (pos, vel, lifetime, color) = self.create_particle();
        world.set(entity, pos)?;
        world.set(entity, vel)?;
        world.set(entity, lifetime)?;
        world.set(entity, color)?;
        Ok(entity)
    }

    fn spawn_deferred(&mut self, commands: Commands<'_>) -> Entity {
        let entity = commands.spawn_with(self.signature.clone());
        let (pos, vel, lifetime, color) = self.create_particle();
        commands.set(entity, pos);
        commands.set(entity, vel);
        commands.set(entity, lifetime);
        commands.set(entity, color);
        entity
    }
}

fn system_movement(world: &World) -> System {
    let filter = Filter::parse("Position, Velocity", world).unwrap();
    System::new("movement", OnUpdate, filter, |rows| {
        let dt = rows.delta_time();
        let vel = rows.field::<Velocity>(1)?;
        for (i, pos) in rows.field_mut::<Position>(0)?.iter_mut().enumerate() {
            pos.x += vel[i].x * dt;
            pos.y += vel[i].y * dt;
            pos.z += vel[i].z * dt;
        }
        Ok(())
    })
}

fn system_lifetime_decay(world: &World) -> System {
    let filter = Filter::parse("Lifetime", world).unwrap();
    System::new("lifetime_decay", OnUpdate, filter, |rows| {
        let dt = rows.delta_time();
        for lifetime in rows.field_mut::<Lifetime>(0)?.iter_mut() {
            lifetime.remaining -= dt;
        }
        Ok(())
    })
}

/// Fade with remaining lifetime, smaller particles fading faster.
fn system_fade(world: &World) -> System {
    let filter = Filter::parse("Lifetime, Color, PREFAB.Size", world).unwrap();
    System::new("fade", OnUpdate, filter, |rows| {
        let lifetime = rows.field::<Lifetime>(0)?;
        let size = rows.field::<Size>(2)?;
        for (i, color) in rows.field_mut::<Color>(1)?.iter_mut().enumerate() {
            let scale = (size[i].width * size[i].height).min(1.0);
            color.a = (lifetime[i].remaining / lifetime[i].total).max(0.0) * scale;
        }
        Ok(())
    })
}

/// Replace dead particles (lifetime <= 0) with fresh ones.
fn system_respawn(world: &World, factory: Arc<Mutex<ParticleFactory>>) -> System {
    let filter = Filter::parse("Lifetime", world).unwrap();
    System::new("respawn", PostUpdate, filter, move |rows| {
        let commands = rows.commands();
        let lifetime = rows.field::<Lifetime>(0)?;
        let mut factory = factory.lock().unwrap();
        for (i, entity) in rows.entities().iter().enumerate() {
            if lifetime[i].remaining <= 0.0 {
                commands.delete(*entity);
                factory.spawn_deferred(commands);
            }
        }
        Ok(())
    })
    .single_threaded()
}

/// Particle system benchmark scenario.
pub struct ParticleScenario {
    config: ParticleConfig,
    world: World,
}

impl ParticleScenario {
    /// Create a new particle scenario with default config.
    pub fn new() -> Self {
        Self::with_config(ParticleConfig::default())
    }

    /// Create a new particle scenario with custom config.
    pub fn with_config(config: ParticleConfig) -> Self {
        let world = World::with_config(
            WorldConfig::default()
                .with_threads(config.executor_threads)
                .with_entity_hint(config.particle_count),
        );
        Self { world, config }
    }

    /// Get current particle count.
    pub fn current_count(&self) -> usize {
        self.particles().len()
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    fn particles(&self) -> Vec<Entity> {
        let filter = Filter::parse("Lifetime, PREFAB.Particle", &self.world).unwrap();
        self.world
            .query(&filter)
            .iter()
            .flat_map(|record| record.entity_ids().iter().copied())
            .collect()
    }
}

impl Default for ParticleScenario {
    fn default() -> Self {
        Self::new()
    }
}

impl Scenario for ParticleScenario {
    fn name(&self) -> &'static str {
        "particles"
    }

    fn description(&self) -> &'static str {
        "High-volume particle system with prefab values, movement, lifetime, and respawn"
    }

    fn entity_count(&self) -> usize {
        self.config.particle_count
    }

    fn setup(&mut self) {
        let template = self.world.new_prefab().unwrap();
        self.world.add::<Particle>(template).unwrap();
        self.world
            .set(
                template,
                Size {
                    width: 0.5,
                    height: 1.5,
                },
            )
            .unwrap();

        let mut factory = ParticleFactory::new(&self.world, template, self.config.seed);
        for _ in 0..self.config.particle_count {
            factory.spawn(&mut self.world).unwrap();
        }

        let systems = [
            system_movement(&self.world),
            system_lifetime_decay(&self.world),
            system_fade(&self.world),
            system_respawn(&self.world, Arc::new(Mutex::new(factory))),
        ];
        for system in systems {
            self.world.add_system(system);
        }
    }

    fn update(&mut self) {
        self.world.progress(self.config.delta_time).unwrap();
    }

    fn teardown(&mut self) {
        for entity in self.particles() {
            self.world.delete(entity).unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario(particle_count: usize) -> ParticleScenario {
        ParticleScenario::with_config(ParticleConfig {
            particle_count,
            executor_threads: 2,
            ..Default::default()
        })
    }

    #[test]
    fn particle_scenario_setup() {
        let mut scenario = scenario(100);

        scenario.setup();
        assert_eq!(scenario.current_count(), 100);

        scenario.teardown();
        assert_eq!(scenario.current_count(), 0);
    }

    #[test]
    fn particle_scenario_update() {
        let mut scenario = ParticleScenario::with_config(ParticleConfig {
            particle_count: 100,
            delta_time: 0.5,
            executor_threads: 2,
            ..Default::default()
        });
        scenario.setup();

        // Long enough for every first generation particle to die
        for _ in 0..12 {
            scenario.update();
        }

        // Dead particles were replaced one for one
        assert_eq!(scenario.current_count(), 100);
        assert_eq!(scenario.world().frames(), 12);
        scenario.teardown();
    }
}
