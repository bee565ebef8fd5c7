use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{PhysicsError, TaskError};
use crate::physics::evolution::Evolution;
use crate::physics::handles::{EvolutionId, ProxyId};
use crate::threading::dispatcher::{CommandQueues, SolverCommand};
use crate::threading::event::Event;
use crate::threading::proxy::{write_cache_lock, CacheLock, ProxyBinding};
use crate::utilities::thread_dispatcher::ThreadDispatcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    Idle = 0,
    Running = 1,
    ShuttingDown = 2,
    Terminated = 3,
}

impl TaskState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::ShuttingDown,
            3 => Self::Terminated,
            _ => Self::Idle,
        }
    }
}

/// State of a task that other threads observe.
#[derive(Debug)]
pub struct TaskShared {
    state: AtomicU8,
    shutdown_requested: AtomicBool,
    shutdown_event: Event,
    last_error: Mutex<Option<TaskError>>,
}

impl Default for TaskShared {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(TaskState::Idle as u8),
            shutdown_requested: AtomicBool::new(false),
            shutdown_event: Event::new(),
            last_error: Mutex::new(None),
        }
    }
}

impl TaskShared {
    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Asks the run loop to stop after the current tick.
    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::Release);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Acquire)
    }

    /// Triggered once the run loop has exited.
    pub fn shutdown_event(&self) -> &Event {
        &self.shutdown_event
    }

    pub fn last_error(&self) -> Option<TaskError> {
        self.last_error.lock().clone()
    }

    pub(crate) fn set_error(&self, error: TaskError) {
        *self.last_error.lock() = Some(error);
    }

    /// Prepares for another run after a previous one shut down.
    pub(crate) fn rearm(&self) {
        self.shutdown_requested.store(false, Ordering::Release);
        self.shutdown_event.reset();
        self.set_state(TaskState::Idle);
    }
}

struct EvolutionSlot {
    evolution: Evolution,
    pending: Vec<SolverCommand>,
}

impl EvolutionSlot {
    /// Runs queued commands, then advances and caches results if any proxy is registered.
    fn advance(&mut self, dt: f32) -> Result<(), TaskError> {
        let pending = std::mem::take(&mut self.pending);
        let evolution = &mut self.evolution;
        let id = evolution.id();
        panic::catch_unwind(AssertUnwindSafe(|| {
            for command in pending {
                command(evolution);
            }
            if evolution.has_proxies() {
                evolution.advance_by(dt);
                evolution.cache_results();
            }
        }))
        .map_err(|payload| TaskError::from_panic(id, payload.as_ref()))
    }
}

/// Owns every evolution and advances them tick by tick, either from its own thread or from the caller's.
pub struct PersistentTask {
    evolutions: BTreeMap<EvolutionId, EvolutionSlot>,
    cache_lock: Arc<CacheLock>,
    queues: Option<CommandQueues>,
    shared: Arc<TaskShared>,
    workers: ThreadDispatcher,
    target_dt: f32,
    tick_count: u64,
}

impl std::fmt::Debug for PersistentTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentTask")
            .field("evolutions", &self.evolutions.keys().collect::<Vec<_>>())
            .field("target_dt", &self.target_dt)
            .field("tick_count", &self.tick_count)
            .field("state", &self.shared.state())
            .finish()
    }
}

impl PersistentTask {
    pub fn new(cache_lock: Arc<CacheLock>, target_hz: f32) -> Self {
        let mut task = Self {
            evolutions: BTreeMap::new(),
            cache_lock,
            queues: None,
            shared: Arc::new(TaskShared::default()),
            workers: ThreadDispatcher::global(),
            target_dt: 1.0 / 60.0,
            tick_count: 0,
        };
        task.set_target_hz(target_hz);
        task
    }

    pub fn shared(&self) -> Arc<TaskShared> {
        self.shared.clone()
    }

    pub fn state(&self) -> TaskState {
        self.shared.state()
    }

    pub fn request_shutdown(&self) {
        self.shared.request_shutdown();
    }

    pub(crate) fn attach_queues(&mut self, queues: CommandQueues) {
        self.queues = Some(queues);
    }

    /// Runs everything still queued, then disconnects the queues.
    pub(crate) fn detach_queues(&mut self) {
        self.drain_commands();
        self.queues = None;
    }

    pub fn set_target_hz(&mut self, target_hz: f32) {
        if !target_hz.is_finite() || target_hz <= 0.0 {
            tracing::warn!(target_hz, "target rate must be positive, keeping the current rate");
            return;
        }
        self.target_dt = 1.0 / target_hz;
    }

    #[inline]
    pub fn target_dt(&self) -> f32 {
        self.target_dt
    }

    /// Completed ticks.
    #[inline]
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn add_evolution(&mut self, evolution: Evolution) {
        let id = evolution.id();
        if self.evolutions.contains_key(&id) {
            tracing::error!(evolution = %id, "evolution id already in use, ignoring the new evolution");
            return;
        }
        self.evolutions.insert(
            id,
            EvolutionSlot {
                evolution,
                pending: Vec::new(),
            },
        );
        tracing::debug!(evolution = %id, "evolution added");
    }

    /// Removes an evolution. Refuses while proxies are still registered with it, since their results would be
    /// lost.
    pub fn remove_evolution(&mut self, id: EvolutionId) -> Result<Evolution, PhysicsError> {
        let slot = self.evolutions.get(&id).ok_or(PhysicsError::UnknownEvolution(id))?;
        let proxies = slot.evolution.proxy_count();
        if proxies > 0 {
            tracing::error!(evolution = %id, proxies, "refusing to destroy an evolution with registered proxies");
            return Err(PhysicsError::EvolutionHasProxies { evolution: id, proxies });
        }
        let slot = self.evolutions.remove(&id).ok_or(PhysicsError::UnknownEvolution(id))?;
        if !slot.pending.is_empty() {
            tracing::debug!(evolution = %id, dropped = slot.pending.len(), "pending solver commands dropped");
        }
        tracing::debug!(evolution = %id, "evolution removed");
        Ok(slot.evolution)
    }

    pub fn evolution(&self, id: EvolutionId) -> Option<&Evolution> {
        self.evolutions.get(&id).map(|slot| &slot.evolution)
    }

    pub fn evolution_mut(&mut self, id: EvolutionId) -> Option<&mut Evolution> {
        self.evolutions.get_mut(&id).map(|slot| &mut slot.evolution)
    }

    pub fn evolution_count(&self) -> usize {
        self.evolutions.len()
    }

    pub fn add_proxy(&mut self, evolution: EvolutionId, binding: ProxyBinding) -> Result<(), PhysicsError> {
        match self.evolutions.get_mut(&evolution) {
            Some(slot) => {
                slot.evolution.add_proxy(binding);
                Ok(())
            }
            None => {
                binding.abandon();
                Err(PhysicsError::UnknownEvolution(evolution))
            }
        }
    }

    pub fn remove_proxy(&mut self, evolution: EvolutionId, proxy: ProxyId) -> bool {
        self.evolutions
            .get_mut(&evolution)
            .is_some_and(|slot| slot.evolution.remove_proxy(proxy))
    }

    fn drain_commands(&mut self) {
        while let Some(command) = self.queues.as_ref().and_then(|queues| queues.global.try_recv().ok()) {
            command();
        }
        while let Some(command) = self.queues.as_ref().and_then(|queues| queues.task.try_recv().ok()) {
            command(self);
        }
        while let Some((id, command)) = self.queues.as_ref().and_then(|queues| queues.solver.try_recv().ok()) {
            match self.evolutions.get_mut(&id) {
                Some(slot) => slot.pending.push(command),
                None => tracing::warn!(evolution = %id, "solver command for unknown evolution dropped"),
            }
        }
    }

    /// One scheduler iteration: drain the queues, advance every evolution with proxies by `dt` in parallel,
    /// then flip all result caches at once.
    pub fn tick(&mut self, dt: f32) -> Result<(), TaskError> {
        self.drain_commands();

        let mut slots: Vec<&mut EvolutionSlot> = self.evolutions.values_mut().collect();
        let outcomes = self.workers.map_mut(&mut slots, |slot| slot.advance(dt));
        if let Some(error) = outcomes.into_iter().find_map(Result::err) {
            return Err(error);
        }

        let exclusive = write_cache_lock(&self.cache_lock);
        for slot in self.evolutions.values() {
            slot.evolution.flip_caches(&exclusive);
        }
        drop(exclusive);

        self.tick_count += 1;
        Ok(())
    }

    /// Ticks at the target rate until shutdown is requested or a tick fails.
    pub fn run(&mut self) {
        self.shared.set_state(TaskState::Running);
        tracing::debug!(target_dt = self.target_dt, "physics task running");
        while !self.shared.is_shutdown_requested() {
            let started = Instant::now();
            if let Err(error) = self.tick(self.target_dt) {
                tracing::error!(%error, "physics task stopped");
                self.shared.set_error(error);
                break;
            }
            let budget = Duration::from_secs_f32(self.target_dt);
            let elapsed = started.elapsed();
            match budget.checked_sub(elapsed) {
                Some(remaining) => thread::sleep(remaining),
                None => tracing::debug!(?elapsed, ?budget, "physics tick ran behind"),
            }
        }
        self.shared.set_state(TaskState::ShuttingDown);
        tracing::debug!(ticks = self.tick_count, "physics task shutting down");
        self.shared.set_state(TaskState::Terminated);
        self.shared.shutdown_event().trigger();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::handles::EvolutionHandle;
    use crate::physics::particles::ParticleSet;
    use crate::physics::solver_config::SolverConfig;
    use crate::threading::dispatcher::{DedicatedDispatcher, Dispatcher};
    use crate::threading::proxy::{ProxyCallbacks, SyncTarget};

    struct Counter;

    impl ProxyCallbacks for Counter {
        type Results = u32;

        fn cache_results(&mut self, _particles: &ParticleSet, _owned: &[usize], results: &mut u32) {
            *results += 1;
        }
    }

    fn task() -> PersistentTask {
        PersistentTask::new(Arc::new(CacheLock::new(())), 60.0)
    }

    fn config() -> SolverConfig {
        SolverConfig {
            parallel: false,
            ..Default::default()
        }
    }

    #[test]
    fn only_evolutions_with_proxies_advance() {
        let mut task = task();
        task.add_evolution(Evolution::new(EvolutionId(0), config()));
        task.add_evolution(Evolution::new(EvolutionId(1), config()));
        let (binding, mut handle) = ProxyBinding::new(
            ProxyId(0),
            EvolutionHandle { id: EvolutionId(1) },
            Counter,
            task.cache_lock.clone(),
        );
        task.add_proxy(EvolutionId(1), binding).unwrap();
        task.tick(1.0 / 60.0).unwrap();
        assert_eq!(task.evolution(EvolutionId(0)).map(Evolution::time), Some(0.0));
        assert!(task.evolution(EvolutionId(1)).is_some_and(|evolution| evolution.time() > 0.0));
        handle.sync_to_cache();
        assert_eq!(*handle.results(), 1);
        assert_eq!(task.tick_count(), 1);
    }

    #[test]
    fn evolution_with_proxies_is_not_removed() {
        let mut task = task();
        task.add_evolution(Evolution::new(EvolutionId(0), config()));
        let (binding, _handle) =
            ProxyBinding::new(ProxyId(0), EvolutionHandle { id: EvolutionId(0) }, Counter, task.cache_lock.clone());
        task.add_proxy(EvolutionId(0), binding).unwrap();
        assert!(matches!(
            task.remove_evolution(EvolutionId(0)),
            Err(PhysicsError::EvolutionHasProxies { proxies: 1, .. })
        ));
        assert!(task.remove_proxy(EvolutionId(0), ProxyId(0)));
        assert!(task.remove_evolution(EvolutionId(0)).is_ok());
        assert!(matches!(task.remove_evolution(EvolutionId(0)), Err(PhysicsError::UnknownEvolution(_))));
    }

    #[test]
    fn proxy_for_unknown_evolution_is_abandoned() {
        let mut task = task();
        let (binding, handle) =
            ProxyBinding::new(ProxyId(0), EvolutionHandle { id: EvolutionId(9) }, Counter, task.cache_lock.clone());
        assert!(task.add_proxy(EvolutionId(9), binding).is_err());
        assert!(handle.is_destroyed());
    }

    #[test]
    fn panicking_command_becomes_task_error() {
        let mut task = task();
        let (dispatcher, queues) = DedicatedDispatcher::new();
        task.attach_queues(queues);
        task.add_evolution(Evolution::new(EvolutionId(5), config()));
        dispatcher.enqueue_solver(EvolutionId(5), Box::new(|_| panic!("bad command")));
        let error = task.tick(0.01).unwrap_err();
        assert!(matches!(
            error,
            TaskError::SolverPanicked { evolution: EvolutionId(5), ref message } if message == "bad command"
        ));
        assert_eq!(task.tick_count(), 0);
    }

    #[test]
    fn queues_drain_global_then_task_then_solver() {
        let mut task = task();
        let (dispatcher, queues) = DedicatedDispatcher::new();
        task.attach_queues(queues);
        let order = Arc::new(Mutex::new(Vec::new()));

        let log = order.clone();
        dispatcher.enqueue_solver(EvolutionId(0), Box::new(move |_| log.lock().push("solver")));
        let log = order.clone();
        dispatcher.enqueue_task(Box::new(move |task| {
            log.lock().push("task");
            task.add_evolution(Evolution::new(EvolutionId(0), config()));
        }));
        let log = order.clone();
        dispatcher.enqueue_global(Box::new(move || log.lock().push("global")));

        task.tick(0.01).unwrap();
        assert_eq!(*order.lock(), vec!["global", "task", "solver"]);
    }

    #[test]
    fn run_loop_stops_on_request() {
        let mut task = task();
        let shared = task.shared();
        let runner = thread::spawn(move || {
            task.run();
            task
        });
        while shared.state() != TaskState::Running {
            thread::yield_now();
        }
        shared.request_shutdown();
        assert!(shared.shutdown_event().wait_timeout(Duration::from_secs(5)));
        let task = runner.join().unwrap();
        assert_eq!(task.state(), TaskState::Terminated);
    }
}
