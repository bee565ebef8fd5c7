use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::config::ModuleConfig;
use crate::error::{PhysicsError, TaskError};
use crate::physics::evolution::Evolution;
use crate::physics::handles::{EvolutionHandle, EvolutionId, ProxyId};
use crate::physics::solver_config::SolverConfig;
use crate::threading::dispatcher::{DedicatedDispatcher, Dispatcher, SingleThreadDispatcher, ThreadingMode};
use crate::threading::persistent_task::{PersistentTask, TaskShared, TaskState};
use crate::threading::proxy::{CacheLock, ProxyBinding, ProxyCallbacks, ProxyHandle, SyncTarget};
use crate::threading::scoped_thread_lock::ScopedThreadLock;

/// Extra time a dedicated-thread `query` waits on top of one tick.
const QUERY_GRACE: Duration = Duration::from_secs(2);

/// Outcome of `PhysicsModule::sync`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncResult {
    /// True if the physics thread was stalled while the caches were read.
    pub got_exact_lock: bool,
}

enum TaskRuntime {
    Dedicated(JoinHandle<PersistentTask>),
    SingleThreaded(Arc<Mutex<PersistentTask>>),
    /// Shut down. The task is kept so evolutions survive a later mode switch.
    Stopped(Mutex<PersistentTask>),
}

struct ModuleInner {
    dispatcher: Arc<dyn Dispatcher>,
    runtime: TaskRuntime,
    shared: Arc<TaskShared>,
}

/// Entry point for callers: creates evolutions, registers proxies, hands out dispatchers and reads results.
pub struct PhysicsModule {
    config: ModuleConfig,
    cache_lock: Arc<CacheLock>,
    next_evolution: AtomicU32,
    next_proxy: AtomicU32,
    inner: RwLock<ModuleInner>,
}

impl std::fmt::Debug for PhysicsModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicsModule")
            .field("mode", &self.threading_mode())
            .field("state", &self.state())
            .finish()
    }
}

fn start(mut task: PersistentTask, mode: ThreadingMode) -> Result<ModuleInner, TaskError> {
    let shared = task.shared();
    shared.rearm();
    match mode {
        ThreadingMode::DedicatedThread => {
            let (dispatcher, queues) = DedicatedDispatcher::new();
            task.attach_queues(queues);
            let handle = thread::Builder::new()
                .name("pbd-physics".to_string())
                .spawn(move || {
                    task.run();
                    task
                })
                .map_err(|error| TaskError::Spawn(error.to_string()))?;
            Ok(ModuleInner {
                dispatcher: Arc::new(dispatcher),
                runtime: TaskRuntime::Dedicated(handle),
                shared,
            })
        }
        ThreadingMode::SingleThreaded => {
            let task = Arc::new(Mutex::new(task));
            Ok(ModuleInner {
                dispatcher: Arc::new(SingleThreadDispatcher::new(task.clone())),
                runtime: TaskRuntime::SingleThreaded(task),
                shared,
            })
        }
    }
}

/// Stops the runtime and takes the task back. Commands still queued run first.
fn stop(runtime: TaskRuntime, shared: &TaskShared, cache_lock: &Arc<CacheLock>, target_hz: f32) -> PersistentTask {
    match runtime {
        TaskRuntime::Dedicated(handle) => {
            shared.request_shutdown();
            match handle.join() {
                Ok(mut task) => {
                    task.detach_queues();
                    task
                }
                Err(_) => {
                    tracing::error!("physics thread panicked outside a solver, its evolutions are lost");
                    PersistentTask::new(cache_lock.clone(), target_hz)
                }
            }
        }
        TaskRuntime::SingleThreaded(task) => {
            let task = std::mem::replace(&mut *task.lock(), PersistentTask::new(cache_lock.clone(), target_hz));
            shared.set_state(TaskState::Terminated);
            shared.shutdown_event().trigger();
            task
        }
        TaskRuntime::Stopped(task) => task.into_inner(),
    }
}

impl PhysicsModule {
    pub fn new(config: ModuleConfig) -> Result<Self, PhysicsError> {
        let config = config.sanitized();
        let cache_lock = Arc::new(CacheLock::new(()));
        let mode = if config.dedicated_thread {
            ThreadingMode::DedicatedThread
        } else {
            ThreadingMode::SingleThreaded
        };
        let inner = start(PersistentTask::new(cache_lock.clone(), config.target_hz), mode)?;
        tracing::debug!(?mode, target_hz = config.target_hz, "physics module started");
        Ok(Self {
            config,
            cache_lock,
            next_evolution: AtomicU32::new(0),
            next_proxy: AtomicU32::new(0),
            inner: RwLock::new(inner),
        })
    }

    /// Default settings with environment overrides applied.
    pub fn with_defaults() -> Result<Self, PhysicsError> {
        let mut config = ModuleConfig::default();
        config.apply_env_overrides();
        Self::new(config)
    }

    #[inline]
    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    /// Current dispatcher. Fetch it for every use; switching modes replaces it.
    pub fn dispatcher(&self) -> Arc<dyn Dispatcher> {
        self.inner.read().dispatcher.clone()
    }

    pub fn threading_mode(&self) -> ThreadingMode {
        self.inner.read().dispatcher.mode()
    }

    pub fn state(&self) -> TaskState {
        self.inner.read().shared.state()
    }

    /// Error that stopped the task, if any.
    pub fn last_error(&self) -> Option<TaskError> {
        self.inner.read().shared.last_error()
    }

    pub fn create_evolution(&self, config: SolverConfig) -> EvolutionHandle {
        let id = EvolutionId(self.next_evolution.fetch_add(1, Ordering::Relaxed));
        self.dispatcher()
            .enqueue_task(Box::new(move |task| task.add_evolution(Evolution::new(id, config))));
        EvolutionHandle { id }
    }

    /// Destroys an evolution. Refused and logged while proxies are still registered with it.
    pub fn destroy_evolution(&self, handle: EvolutionHandle) {
        self.dispatcher().enqueue_task(Box::new(move |task| {
            if let Err(error) = task.remove_evolution(handle.id) {
                tracing::error!(%error, "evolution not destroyed");
            }
        }));
    }

    pub fn register_proxy<C: ProxyCallbacks>(&self, evolution: EvolutionHandle, callbacks: C) -> ProxyHandle<C::Results> {
        let id = ProxyId(self.next_proxy.fetch_add(1, Ordering::Relaxed));
        let (binding, handle) = ProxyBinding::new(id, evolution, callbacks, self.cache_lock.clone());
        self.dispatcher().enqueue_task(Box::new(move |task| {
            if let Err(error) = task.add_proxy(evolution.id, binding) {
                tracing::error!(%error, proxy = %id, "proxy not registered");
            }
        }));
        handle
    }

    /// Queues removal of a proxy. Later calls for the same handle do nothing.
    pub fn unregister_proxy<R: Clone + Default>(&self, handle: &ProxyHandle<R>) {
        if !handle.mark_unregistered() {
            return;
        }
        let (evolution, proxy) = (handle.evolution().id, handle.id());
        self.dispatcher().enqueue_task(Box::new(move |task| {
            if !task.remove_proxy(evolution, proxy) {
                tracing::warn!(%evolution, %proxy, "proxy was not registered");
            }
        }));
    }

    pub fn set_target_hz(&self, target_hz: f32) {
        self.dispatcher()
            .enqueue_task(Box::new(move |task| task.set_target_hz(target_hz)));
    }

    /// Refreshes `targets` from the flipped caches. With `force_blocking` the physics thread is stalled first,
    /// waiting at most `sync_timeout_ms`.
    pub fn sync(&self, targets: &mut [&mut dyn SyncTarget], force_blocking: bool) -> SyncResult {
        let lock = force_blocking
            .then(|| ScopedThreadLock::acquire(self, Duration::from_millis(self.config.sync_timeout_ms)));
        for target in targets.iter_mut() {
            target.sync_to_cache();
        }
        SyncResult {
            got_exact_lock: lock.as_ref().is_some_and(ScopedThreadLock::did_get_lock),
        }
    }

    /// Runs one scheduler iteration on the caller's thread. Only valid in single-threaded mode.
    pub fn tick(&self, dt: f32) -> Result<(), PhysicsError> {
        let inner = self.inner.read();
        let TaskRuntime::SingleThreaded(task) = &inner.runtime else {
            tracing::warn!(mode = ?inner.dispatcher.mode(), "tick ignored, the module is not single threaded");
            return Ok(());
        };
        if inner.shared.state() == TaskState::Terminated || inner.shared.last_error().is_some() {
            return Err(PhysicsError::TaskNotRunning);
        }
        let result = task.lock().tick(dt);
        result.map_err(|error| {
            tracing::error!(%error, "physics task stopped");
            inner.shared.set_error(error.clone());
            inner.shared.set_state(TaskState::Terminated);
            PhysicsError::Task(error)
        })
    }

    /// Runs `query` against the task on the physics thread and returns its result. In dedicated mode this waits
    /// for the next tick.
    pub fn query<R, F>(&self, query: F) -> Result<R, PhysicsError>
    where
        R: Send + 'static,
        F: FnOnce(&mut PersistentTask) -> R + Send + 'static,
    {
        let dispatcher = {
            let mut guard = self.inner.write();
            let inner = &mut *guard;
            match &mut inner.runtime {
                TaskRuntime::SingleThreaded(task) => return Ok(query(&mut task.lock())),
                TaskRuntime::Stopped(task) => return Ok(query(task.get_mut())),
                TaskRuntime::Dedicated(_) => inner.dispatcher.clone(),
            }
        };
        let (sender, receiver) = mpsc::channel();
        dispatcher.enqueue_task(Box::new(move |task| {
            let _ = sender.send(query(task));
        }));
        let wait = Duration::from_secs_f32(1.0 / self.config.target_hz) + QUERY_GRACE;
        receiver.recv_timeout(wait).map_err(|_| PhysicsError::TaskNotRunning)
    }

    /// Switches between a dedicated physics thread and caller-driven ticking. Evolutions and proxies carry over;
    /// commands queued for the old runtime run before the switch completes.
    pub fn set_threading_mode(&self, mode: ThreadingMode) -> Result<(), PhysicsError> {
        let mut inner = self.inner.write();
        if inner.dispatcher.mode() == mode && !matches!(inner.runtime, TaskRuntime::Stopped(_)) {
            return Ok(());
        }
        let runtime = std::mem::replace(
            &mut inner.runtime,
            TaskRuntime::Stopped(Mutex::new(PersistentTask::new(self.cache_lock.clone(), self.config.target_hz))),
        );
        let task = stop(runtime, &inner.shared, &self.cache_lock, self.config.target_hz);
        *inner = start(task, mode)?;
        tracing::debug!(?mode, "threading mode switched");
        Ok(())
    }

    /// Stops the physics thread after its current tick. Evolutions are kept until the module drops.
    pub fn shutdown(&self) {
        let mut inner = self.inner.write();
        if matches!(inner.runtime, TaskRuntime::Stopped(_)) {
            return;
        }
        let runtime = std::mem::replace(
            &mut inner.runtime,
            TaskRuntime::Stopped(Mutex::new(PersistentTask::new(self.cache_lock.clone(), self.config.target_hz))),
        );
        let task = stop(runtime, &inner.shared, &self.cache_lock, self.config.target_hz);
        inner.runtime = TaskRuntime::Stopped(Mutex::new(task));
        tracing::debug!("physics module shut down");
    }
}

impl Drop for PhysicsModule {
    fn drop(&mut self) {
        self.shutdown();
    }
}
