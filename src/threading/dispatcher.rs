use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::physics::evolution::Evolution;
use crate::physics::handles::EvolutionId;
use crate::threading::persistent_task::PersistentTask;

pub type GlobalCommand = Box<dyn FnOnce() + Send>;
pub type TaskCommand = Box<dyn FnOnce(&mut PersistentTask) + Send>;
pub type SolverCommand = Box<dyn FnOnce(&mut Evolution) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadingMode {
    /// Evolutions advance on their own thread at a fixed rate.
    DedicatedThread,
    /// Evolutions advance only when the caller ticks the module.
    SingleThreaded,
}

/// Routes work to the physics thread.
///
/// Commands posted to one queue run in the order they were posted. Queues drain global first, then task, then
/// solver. Fetch a dispatcher from the module for every use: switching the threading mode replaces it.
pub trait Dispatcher: Send + Sync {
    fn enqueue_global(&self, command: GlobalCommand);
    fn enqueue_task(&self, command: TaskCommand);
    fn enqueue_solver(&self, evolution: EvolutionId, command: SolverCommand);
    fn mode(&self) -> ThreadingMode;
}

/// Receiving ends of a dedicated dispatcher, owned by the persistent task.
pub struct CommandQueues {
    pub(crate) global: Receiver<GlobalCommand>,
    pub(crate) task: Receiver<TaskCommand>,
    pub(crate) solver: Receiver<(EvolutionId, SolverCommand)>,
}

/// Queues commands for the dedicated physics thread.
pub struct DedicatedDispatcher {
    global: Sender<GlobalCommand>,
    task: Sender<TaskCommand>,
    solver: Sender<(EvolutionId, SolverCommand)>,
}

impl DedicatedDispatcher {
    /// Creates a dispatcher and the queues it feeds.
    pub fn new() -> (Self, CommandQueues) {
        let (global, global_receiver) = mpsc::channel();
        let (task, task_receiver) = mpsc::channel();
        let (solver, solver_receiver) = mpsc::channel();
        (
            Self { global, task, solver },
            CommandQueues {
                global: global_receiver,
                task: task_receiver,
                solver: solver_receiver,
            },
        )
    }
}

impl Dispatcher for DedicatedDispatcher {
    fn enqueue_global(&self, command: GlobalCommand) {
        if self.global.send(command).is_err() {
            tracing::warn!("physics task is gone, dropping global command");
        }
    }

    fn enqueue_task(&self, command: TaskCommand) {
        if self.task.send(command).is_err() {
            tracing::warn!("physics task is gone, dropping task command");
        }
    }

    fn enqueue_solver(&self, evolution: EvolutionId, command: SolverCommand) {
        if self.solver.send((evolution, command)).is_err() {
            tracing::warn!(%evolution, "physics task is gone, dropping solver command");
        }
    }

    fn mode(&self) -> ThreadingMode {
        ThreadingMode::DedicatedThread
    }
}

/// Runs commands immediately on the calling thread.
///
/// Commands must not enqueue further task or solver commands through the same dispatcher: the task is
/// already locked while they run.
pub struct SingleThreadDispatcher {
    task: Arc<Mutex<PersistentTask>>,
}

impl SingleThreadDispatcher {
    pub fn new(task: Arc<Mutex<PersistentTask>>) -> Self {
        Self { task }
    }
}

impl Dispatcher for SingleThreadDispatcher {
    fn enqueue_global(&self, command: GlobalCommand) {
        command();
    }

    fn enqueue_task(&self, command: TaskCommand) {
        command(&mut self.task.lock());
    }

    fn enqueue_solver(&self, evolution: EvolutionId, command: SolverCommand) {
        let mut task = self.task.lock();
        match task.evolution_mut(evolution) {
            Some(target) => command(target),
            None => tracing::warn!(%evolution, "solver command for unknown evolution dropped"),
        }
    }

    fn mode(&self) -> ThreadingMode {
        ThreadingMode::SingleThreaded
    }
}
