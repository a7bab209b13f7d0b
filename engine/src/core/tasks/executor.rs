use std::{
    marker::PhantomData,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use crossbeam::{
    channel::{Receiver, SendError, Sender, unbounded},
    sync::WaitGroup,
};
use log::{debug, warn};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// A fixed pool of worker threads fed from one channel.
///
/// Work is submitted through [`Executor::scope`], which may borrow from the caller's stack and
/// returns only once every task spawned in it has finished.
pub struct Executor {
    sender: Sender<Message>,
    workers: Vec<Worker>,
}

enum Message {
    Task(Task),
    Shutdown,
}

struct Worker {
    id: usize,
    handle: Option<thread::JoinHandle<()>>,
}

/// Error returned when a task did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskError {
    /// A task panicked. The panic was contained in the worker.
    TaskFailed,
}

impl Executor {
    /// Creates a new executor with the specified number of worker threads.
    ///
    /// # Panics
    /// Panics if `size` is zero.
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "thread pool size must be greater than 0");

        let (sender, receiver) = unbounded();
        let workers = (0..size)
            .map(|id| Worker::new(id, receiver.clone()))
            .collect();
        debug!("executor started with {size} workers");

        Executor { sender, workers }
    }

    /// Returns the number of worker threads in the pool.
    #[inline]
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Run `f` with a scope for spawning tasks that borrow non-`'static` data. Blocks until every
    /// spawned task has finished, even when `f` or a task panics.
    ///
    /// Returns `TaskFailed` when any task panicked.
    ///
    /// ```rust,ignore
    /// let mut data = vec![1, 2, 3, 4];
    /// executor.scope(|s| {
    ///     for item in &mut data {
    ///         s.spawn(move || *item *= 2);
    ///     }
    /// })?;
    /// assert_eq!(data, vec![2, 4, 6, 8]);
    /// ```
    pub fn scope<'env, F, R>(&'env self, f: F) -> Result<R, TaskError>
    where
        F: FnOnce(&Scope<'env>) -> R,
    {
        let scope = Scope {
            executor: self,
            pending: Some(WaitGroup::new()),
            panicked: Arc::new(AtomicBool::new(false)),
            _phantom: PhantomData,
        };

        let result = f(&scope);
        let panicked = scope.join();

        if panicked {
            Err(TaskError::TaskFailed)
        } else {
            Ok(result)
        }
    }

    fn submit(&self, task: Task) {
        // Only fails once every worker is gone; run the task here instead of losing it.
        if let Err(SendError(Message::Task(task))) = self.sender.send(Message::Task(task)) {
            task();
        }
    }
}

/// A scope for spawning tasks that can borrow non-`'static` data.
pub struct Scope<'env> {
    executor: &'env Executor,

    /// One clone per running task. Taken when the scope joins.
    pending: Option<WaitGroup>,

    panicked: Arc<AtomicBool>,

    _phantom: PhantomData<std::cell::Cell<&'env ()>>,
}

impl<'env> Scope<'env> {
    /// Spawn a task on the pool. It finishes before the enclosing [`Executor::scope`] returns.
    pub fn spawn<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'env,
    {
        let Some(pending) = self.pending.clone() else {
            return;
        };
        let panicked = Arc::clone(&self.panicked);

        let task: Box<dyn FnOnce() + Send + 'env> = Box::new(move || {
            if catch_unwind(AssertUnwindSafe(f)).is_err() {
                panicked.store(true, Ordering::Release);
            }
            drop(pending);
        });

        // SAFETY: the scope waits for every task holding a `pending` clone before it is dropped,
        // and it cannot outlive `'env`, so the borrowed data outlives the task.
        let task: Task = unsafe { std::mem::transmute(task) };
        self.executor.submit(task);
    }

    /// Wait for every spawned task. Returns true when any of them panicked.
    fn join(mut self) -> bool {
        self.wait();
        self.panicked.load(Ordering::Acquire)
    }

    fn wait(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.wait();
        }
    }
}

impl Drop for Scope<'_> {
    fn drop(&mut self) {
        self.wait();
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        for _ in &self.workers {
            let _ = self.sender.send(Message::Shutdown);
        }

        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take()
                && handle.join().is_err()
            {
                warn!("worker {} exited abnormally", worker.id);
            }
        }
    }
}

impl Worker {
    fn new(id: usize, receiver: Receiver<Message>) -> Self {
        let handle = thread::Builder::new()
            .name(format!("rusty-ecs-worker-{id}"))
            .spawn(move || {
                while let Ok(Message::Task(task)) = receiver.recv() {
                    task();
                }
            })
            .map_err(|err| warn!("failed to start worker {id}: {err}"))
            .ok();

        Worker { id, handle }
    }
}
