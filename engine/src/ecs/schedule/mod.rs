//! Phases and the systems registered in them.
//!
//! ```text
//! World::progress(delta)
//!   ├── OnLoad      ─► [systems...] ─► flush commands
//!   ├── PreUpdate   ─► [systems...] ─► flush commands
//!   ├── OnUpdate    ─► [systems...] ─► flush commands
//!   ├── ...
//!   └── OnStore     ─► [systems...] ─► flush commands
//! ```
//!
//! Systems of a phase run one after the other in registration order. Within a system the
//! matched tables are visited in creation order; with more than one worker thread the rows of
//! each table are split into contiguous ranges, one per worker, that run concurrently and are all
//! joined before the next table starts. The set of tables and rows is frozen for the whole
//! phase because structural changes are deferred to the command buffer.
//!
//! Custom phases are declared with [`define_phase!`](crate::define_phase) and put in the
//! pipeline with [`Schedule::set_pipeline`].

mod phase;

use std::{any::Any, collections::HashMap, ops::Range};

use crossbeam::queue::SegQueue;
use log::{debug, trace};

pub use phase::{
    Id, Label, Manual, OnLoad, OnStore, OnUpdate, OnValidate, PostUpdate, PreStore, PreUpdate,
    Sequence,
};

use crate::{
    core::tasks::Executor,
    ecs::{
        entity::Entity,
        error::{Error, Result},
        query::{MatchRecord, Query, Rows},
        storage::{Storage, TableId},
        system::{self, System},
        world::World,
    },
};

struct Scheduled {
    system: System,
    query: Query,
}

/// Every registered system, grouped by phase, plus the order phases run in.
pub struct Schedule {
    /// Systems indexed by their Id.
    systems: Vec<Scheduled>,

    /// Phase -> systems in registration order.
    phases: HashMap<Id, Vec<system::Id>>,

    pipeline: Sequence,
}

impl Default for Schedule {
    fn default() -> Self {
        Self::new()
    }
}

impl Schedule {
    /// An empty schedule running the builtin pipeline.
    pub fn new() -> Self {
        Self {
            systems: Vec::new(),
            phases: HashMap::new(),
            pipeline: Sequence::pipeline(),
        }
    }

    /// Register a system. `prefab` is the builtin tag whose tables the system skips unless its
    /// filter names it.
    pub(crate) fn add_system(
        &mut self,
        system: System,
        prefab: Entity,
        storage: &Storage,
    ) -> system::Id {
        let id = system::Id::new(self.systems.len() as u32);
        let mut query = Query::new(system.filter().clone(), prefab);
        query.update(storage);
        debug!(
            "registered system '{}' in {} matching {} tables",
            system.name(),
            system.phase_name(),
            query.tables().len()
        );

        self.phases.entry(system.phase()).or_default().push(id);
        self.systems.push(Scheduled { system, query });
        id
    }

    #[inline]
    pub fn system(&self, id: system::Id) -> Option<&System> {
        self.systems.get(id.index()).map(|entry| &entry.system)
    }

    /// Tables currently matched by the system's filter.
    #[inline]
    pub fn matched_tables(&self, id: system::Id) -> Option<&[TableId]> {
        self.systems.get(id.index()).map(|entry| entry.query.tables())
    }

    /// Systems registered in `phase`, in registration order.
    #[inline]
    pub fn systems_in(&self, phase: Id) -> &[system::Id] {
        self.phases.get(&phase).map(Vec::as_slice).unwrap_or_default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.systems.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    /// The phases run by one frame, in order.
    #[inline]
    pub fn pipeline(&self) -> &Sequence {
        &self.pipeline
    }

    #[inline]
    pub fn set_pipeline(&mut self, pipeline: Sequence) {
        self.pipeline = pipeline;
    }

    /// Match tables created since the last update.
    pub(crate) fn update(&mut self, storage: &Storage) {
        for entry in self.systems.iter_mut() {
            entry.query.update(storage);
        }
    }

    /// Run one system over every matched batch. Stops at the first batch that fails.
    pub(crate) fn run_system(&self, id: system::Id, world: &World, delta_time: f32) -> Result<()> {
        let Some(entry) = self.systems.get(id.index()) else {
            return Ok(());
        };
        let system = &entry.system;
        let records = entry.query.records(world.storage());
        trace!("running '{}' over {} records", system.name(), records.len());

        let executor = world.executor().filter(|_| system.is_parallel());
        for record in &records {
            match executor {
                Some(executor) if record.row_count() > 1 => {
                    run_parallel(system, record, world, delta_time, executor)?
                }
                _ => {
                    let mut rows = Rows::new(world, record, 0..record.row_count(), delta_time);
                    system.run(&mut rows)?;
                }
            }
        }
        Ok(())
    }

    /// Run one system on the thread of the caller over the matched rows in `range`, counted
    /// across the matched tables in creation order. Every batch can read `param`.
    pub(crate) fn run_system_range(
        &self,
        id: system::Id,
        world: &World,
        delta_time: f32,
        range: Range<usize>,
        param: &(dyn Any + Send + Sync),
    ) -> Result<()> {
        let Some(entry) = self.systems.get(id.index()) else {
            return Ok(());
        };
        let system = &entry.system;
        let records = entry.query.records(world.storage());
        trace!(
            "running '{}' over rows {range:?} of {} records",
            system.name(),
            records.len()
        );

        let mut offset = 0;
        for record in &records {
            if offset >= range.end {
                break;
            }
            let count = record.row_count();
            let batch = clip(&range, offset, count);
            offset += count;
            if batch.is_empty() {
                continue;
            }
            let mut rows = Rows::new(world, record, batch, delta_time).with_param(param);
            system.run(&mut rows)?;
        }
        Ok(())
    }
}

/// The part of `range` falling in a table whose rows start at `offset`, relative to the table.
fn clip(range: &Range<usize>, offset: usize, count: usize) -> Range<usize> {
    let start = range.start.saturating_sub(offset).min(count);
    let end = range.end.saturating_sub(offset).min(count);
    start..end.max(start)
}

/// Run `system` over `record` split into one range per worker and wait for all of them.
fn run_parallel(
    system: &System,
    record: &MatchRecord<'_>,
    world: &World,
    delta_time: f32,
    executor: &Executor,
) -> Result<()> {
    let errors = SegQueue::new();
    executor
        .scope(|s| {
            for range in split_rows(record.row_count(), executor.size()) {
                let errors = &errors;
                s.spawn(move || {
                    let mut rows = Rows::new(world, record, range, delta_time);
                    if let Err(err) = system.run(&mut rows) {
                        errors.push(err);
                    }
                });
            }
        })
        .map_err(|_| Error::TaskFailed)?;

    match errors.pop() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Split `count` rows into at most `parts` contiguous, non-empty ranges covering every row once.
/// The remainder is spread over the first ranges.
pub(crate) fn split_rows(count: usize, parts: usize) -> Vec<Range<usize>> {
    let parts = parts.clamp(1, count.max(1));
    let (size, remainder) = (count / parts, count % parts);
    let mut start = 0;
    (0..parts)
        .map(|i| {
            let len = size + usize::from(i < remainder);
            let range = start..start + len;
            start += len;
            range
        })
        .filter(|range| !range.is_empty())
        .collect()
}
