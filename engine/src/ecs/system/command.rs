//! Deferred command buffer for entity and component operations.
//!
//! Systems never get the world while they run, so structural changes (creating and deleting
//! entities, adding and removing components, writing values of other entities) are queued here
//! and applied once the current phase has finished.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Phase                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  System A ──push──┐                                         │
//! │  System B ──push──┼──► CommandBuffer ──flush──► World       │
//! │  worker   ──push──┘         ▲                               │
//! │                             │                               │
//! │                     (after the phase)                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Commands are applied in push order. Entity handles for new entities are allocated when the
//! command is recorded so later commands in the same phase can refer to them.

use crossbeam::queue::SegQueue;
use log::warn;

use crate::ecs::{
    component::{Component, Id, Signature},
    entity::Entity,
    error::Result,
    world::World,
};

type Write = Box<dyn FnOnce(&mut World, Entity) -> Result<()> + Send>;

/// A deferred entity command.
pub enum Command {
    /// Create an entity with the given signature. The handle is allocated when recording.
    Spawn { entity: Entity, signature: Signature },

    /// Delete an entity and free its handle.
    Delete { entity: Entity },

    /// Add every entry of `signature` in one move.
    Add { entity: Entity, signature: Signature },

    /// Remove every entry of `signature` in one move.
    Remove { entity: Entity, signature: Signature },

    /// Write a typed value, adding the component first when the entity does not own it.
    Set { entity: Entity, write: Write },
}

impl Command {
    /// Apply the command to `world`.
    pub fn apply(self, world: &mut World) -> Result<()> {
        match self {
            Command::Spawn { entity, signature } => world.insert_reserved(entity, &signature),
            Command::Delete { entity } => world.delete(entity),
            Command::Add { entity, signature } => world.add_signature(entity, &signature),
            Command::Remove { entity, signature } => world.remove_signature(entity, &signature),
            Command::Set { entity, write } => write(world, entity),
        }
    }

    /// The entity the command targets.
    pub fn entity(&self) -> Entity {
        match self {
            Command::Spawn { entity, .. }
            | Command::Delete { entity }
            | Command::Add { entity, .. }
            | Command::Remove { entity, .. }
            | Command::Set { entity, .. } => *entity,
        }
    }
}

/// Thread-safe command queue.
///
/// `push` is lock-free and can be called from worker threads; `drain` should be called from a
/// single thread.
#[derive(Default)]
pub struct CommandBuffer {
    commands: SegQueue<Command>,
}

impl CommandBuffer {
    /// Create a new empty command buffer.
    pub fn new() -> Self {
        Self {
            commands: SegQueue::new(),
        }
    }

    /// Push a command to the buffer.
    #[inline]
    pub fn push(&self, command: Command) {
        self.commands.push(command);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Drain all commands from the buffer in FIFO order.
    pub fn drain(&self) -> Vec<Command> {
        let mut commands = Vec::with_capacity(self.commands.len());
        while let Some(cmd) = self.commands.pop() {
            commands.push(cmd);
        }
        commands
    }

    /// Apply every queued command to the world, in push order. A command that fails (for
    /// instance because an earlier command deleted its entity) is logged and skipped.
    ///
    /// Returns the number of commands applied.
    pub fn flush(&self, world: &mut World) -> usize {
        let mut applied = 0;
        for command in self.drain() {
            let entity = command.entity();
            match command.apply(world) {
                Ok(()) => applied += 1,
                Err(err) => warn!("deferred command on {entity} skipped: {err}"),
            }
        }
        applied
    }
}

/// Records commands into a world's buffer.
#[derive(Clone, Copy)]
pub struct Commands<'w> {
    world: &'w World,
    buffer: &'w CommandBuffer,
}

impl<'w> Commands<'w> {
    pub(crate) fn new(world: &'w World, buffer: &'w CommandBuffer) -> Self {
        Self { world, buffer }
    }

    /// Reserve a new empty entity.
    pub fn spawn(&self) -> Entity {
        self.spawn_with(Signature::empty())
    }

    /// Reserve a new entity created with `signature`.
    pub fn spawn_with(&self, signature: Signature) -> Entity {
        let entity = self.world.allocator().alloc();
        self.buffer.push(Command::Spawn { entity, signature });
        entity
    }

    /// Reserve a new instance of `prefab`.
    pub fn instantiate(&self, prefab: Entity) -> Entity {
        self.spawn_with(Signature::new(vec![Id::instance_of(prefab)]))
    }

    pub fn delete(&self, entity: Entity) {
        self.buffer.push(Command::Delete { entity });
    }

    pub fn add<C: Component>(&self, entity: Entity) {
        self.add_id(entity, Id::of(self.world.component::<C>()));
    }

    pub fn add_id(&self, entity: Entity, id: Id) {
        self.add_signature(entity, Signature::new(vec![id]));
    }

    pub fn add_signature(&self, entity: Entity, signature: Signature) {
        self.buffer.push(Command::Add { entity, signature });
    }

    pub fn remove<C: Component>(&self, entity: Entity) {
        self.remove_id(entity, Id::of(self.world.component::<C>()));
    }

    pub fn remove_id(&self, entity: Entity, id: Id) {
        self.buffer.push(Command::Remove {
            entity,
            signature: Signature::new(vec![id]),
        });
    }

    /// Write `value`, adding `C` first when the entity does not own it.
    pub fn set<C: Component>(&self, entity: Entity, value: C) {
        self.buffer.push(Command::Set {
            entity,
            write: Box::new(move |world, entity| world.set(entity, value)),
        });
    }

    /// Place `child` in `parent`.
    pub fn adopt(&self, child: Entity, parent: Entity) {
        self.add_id(child, Id::child_of(parent));
    }

    pub fn orphan(&self, child: Entity, parent: Entity) {
        self.remove_id(child, Id::child_of(parent));
    }
}
