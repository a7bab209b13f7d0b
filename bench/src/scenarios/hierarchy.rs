//! Container hierarchy benchmark scenario.
//!
//! Simulates groups of bodies moving with their group:
//! - `group_count` containers, each with `children_per_group` children
//! - Every other container carries a Mass, the rest a Rotation
//! - Each frame a few children change container, moving them between tables
//!
//! This scenario tests:
//! - Resolving values through container links for many small tables
//! - Or terms across containers
//! - Table migration driven by link changes

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rusty_ecs::ecs::{Entity, Filter, System, World, schedule::OnUpdate};

use crate::components::{Mass, Position, Rotation, Velocity};
use crate::scenarios::Scenario;

/// Configuration for the hierarchy benchmark.
#[derive(Debug, Clone)]
pub struct HierarchyConfig {
    pub group_count: usize,
    pub children_per_group: usize,
    /// Children moved to another container every frame.
    pub moves_per_frame: usize,
    pub delta_time: f32,
    pub seed: u64,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            group_count: 100,
            children_per_group: 100,
            moves_per_frame: 10,
            delta_time: 1.0 / 60.0,
            seed: 12345,
        }
    }
}

fn system_follow(world: &World) -> System {
    let filter = Filter::parse("Position, Velocity, CONTAINER.Mass | CONTAINER.Rotation", world)
        .unwrap();
    System::new("follow", OnUpdate, filter, |rows| {
        let dt = rows.delta_time();
        let mass = rows.component::<Mass>();
        let factor = match rows.term(2) {
            Some(term) if term.component == mass => 1.0 / rows.field::<Mass>(2)?.get(0).0.max(1.0),
            _ => rows.field::<Rotation>(2)?.get(0).y,
        };
        let vel = rows.field::<Velocity>(1)?;
        for (i, pos) in rows.field_mut::<Position>(0)?.iter_mut().enumerate() {
            pos.x += vel[i].x * factor * dt;
            pos.y += vel[i].y * factor * dt;
        }
        Ok(())
    })
}

/// Container hierarchy benchmark scenario.
pub struct HierarchyScenario {
    config: HierarchyConfig,
    world: World,
    rng: ChaCha8Rng,
    groups: Vec<Entity>,
    children: Vec<(Entity, usize)>,
}

impl HierarchyScenario {
    pub fn new() -> Self {
        Self::with_config(HierarchyConfig::default())
    }

    pub fn with_config(config: HierarchyConfig) -> Self {
        Self {
            world: World::new(),
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            groups: Vec::new(),
            children: Vec::new(),
            config,
        }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    /// Move a random child to a random container.
    fn move_child(&mut self) {
        if self.children.is_empty() {
            return;
        }
        let slot = self.rng.gen_range(0..self.children.len());
        let to = self.rng.gen_range(0..self.groups.len());
        let (child, from) = self.children[slot];
        self.world.orphan(child, self.groups[from]).unwrap();
        self.world.adopt(child, self.groups[to]).unwrap();
        self.children[slot].1 = to;
    }
}

impl Default for HierarchyScenario {
    fn default() -> Self {
        Self::new()
    }
}

impl Scenario for HierarchyScenario {
    fn name(&self) -> &'static str {
        "hierarchy"
    }

    fn description(&self) -> &'static str {
        "Children reading Mass or Rotation through their container, with reparenting churn"
    }

    fn entity_count(&self) -> usize {
        self.config.group_count * (self.config.children_per_group + 1)
    }

    fn setup(&mut self) {
        for g in 0..self.config.group_count {
            let group = self.world.new_entity().unwrap();
            if g % 2 == 0 {
                self.world.set(group, Mass(self.rng.gen_range(1.0..10.0))).unwrap();
            } else {
                let y = self.rng.gen_range(-1.0..1.0);
                self.world.set(group, Rotation { x: 0.0, y, z: 0.0 }).unwrap();
            }
            self.groups.push(group);

            for _ in 0..self.config.children_per_group {
                let child = self.world.new_entity().unwrap();
                self.world.set(child, Position::default()).unwrap();
                let velocity = Velocity {
                    x: self.rng.gen_range(-1.0..1.0),
                    y: self.rng.gen_range(-1.0..1.0),
                    z: 0.0,
                };
                self.world.set(child, velocity).unwrap();
                self.world.adopt(child, group).unwrap();
                self.children.push((child, g));
            }
        }

        let system = system_follow(&self.world);
        self.world.add_system(system);
    }

    fn update(&mut self) {
        for _ in 0..self.config.moves_per_frame {
            self.move_child();
        }
        self.world.progress(self.config.delta_time).unwrap();
    }

    fn teardown(&mut self) {
        for (child, _) in self.children.drain(..) {
            self.world.delete(child).unwrap();
        }
        for group in self.groups.drain(..) {
            self.world.delete(group).unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn children_follow_their_container() {
        let mut scenario = HierarchyScenario::with_config(HierarchyConfig {
            group_count: 4,
            children_per_group: 5,
            moves_per_frame: 2,
            ..Default::default()
        });
        scenario.setup();

        for _ in 0..5 {
            scenario.update();
        }

        let filter = Filter::parse("Position, CONTAINER.Mass | CONTAINER.Rotation", scenario.world())
            .unwrap();
        let matched: usize = scenario
            .world()
            .query(&filter)
            .iter()
            .map(|record| record.row_count())
            .sum();
        assert_eq!(matched, 20);
        assert_eq!(scenario.world().frames(), 5);

        scenario.teardown();
        assert!(scenario.world().query(&filter).is_empty());
    }
}
