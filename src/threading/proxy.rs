use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError};

use crossbeam_utils::sync::{ShardedLock, ShardedLockReadGuard, ShardedLockWriteGuard};
use parking_lot::RwLock;

use crate::physics::collision_detection::broad_phase::PairExclusions;
use crate::physics::handles::{EvolutionHandle, IndexRemap, ProxyId};
use crate::physics::particles::ParticleSet;

/// Lock shared by every results cache of a module. Writers of the inactive half and readers of the active
/// half take the read side; flipping takes the write side.
pub type CacheLock = ShardedLock<()>;

pub(crate) fn read_cache_lock(lock: &CacheLock) -> ShardedLockReadGuard<'_, ()> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write_cache_lock(lock: &CacheLock) -> ShardedLockWriteGuard<'_, ()> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Physics-thread side of a simulated object.
///
/// Every hook runs on the physics thread during `advance_by`. `owned` lists the particle indices this proxy
/// created; it is kept up to date across compaction.
pub trait ProxyCallbacks: Send + 'static {
    type Results: Clone + Default + Send + Sync + 'static;

    /// Creates bodies. Indices pushed onto `owned` become owned by this proxy.
    fn create_rigid_bodies(&mut self, _particles: &mut ParticleSet, _owned: &mut Vec<usize>) {}

    fn parameter_update(&mut self, _particles: &mut ParticleSet, _owned: &[usize], _time: f32) {}

    /// Adds pairs that must not collide during this frame.
    fn disable_collisions(&mut self, _owned: &[usize], _exclusions: &mut PairExclusions) {}

    /// Accumulates forces for the coming sub-step.
    fn add_forces(&mut self, _particles: &mut ParticleSet, _owned: &[usize], _dt: f32) {}

    /// Sets kinematic targets for the coming sub-step.
    fn kinematic_update(&mut self, _particles: &mut ParticleSet, _owned: &[usize], _time: f32) {}

    fn start_frame(&mut self, _dt: f32) {}

    fn end_frame(&mut self, _dt: f32) {}

    /// Called after compaction, once `owned` was already rewritten.
    fn remap_indices(&mut self, _remap: &IndexRemap) {}

    /// Copies simulation state into `results`, the buffer the caller will see after the next flip.
    fn cache_results(&mut self, particles: &ParticleSet, owned: &[usize], results: &mut Self::Results);
}

/// Double-buffered results of one proxy.
pub struct ResultsCache<R> {
    buffers: [RwLock<R>; 2],
    active: AtomicUsize,
    lock: Arc<CacheLock>,
}

impl<R: Clone + Default> ResultsCache<R> {
    pub fn new(lock: Arc<CacheLock>) -> Self {
        Self {
            buffers: [RwLock::new(R::default()), RwLock::new(R::default())],
            active: AtomicUsize::new(0),
            lock,
        }
    }

    /// Writes the inactive half.
    pub fn write_inactive(&self, write: impl FnOnce(&mut R)) {
        let _shared = read_cache_lock(&self.lock);
        let inactive = 1 - self.active.load(Ordering::Acquire);
        write(&mut self.buffers[inactive].write());
    }

    /// Swaps the halves. The write half of the cache lock must be held.
    pub fn flip(&self, _exclusive: &ShardedLockWriteGuard<'_, ()>) {
        self.active.fetch_xor(1, Ordering::AcqRel);
    }

    /// Copies the active half.
    pub fn read_active(&self) -> R {
        let _shared = read_cache_lock(&self.lock);
        let active = self.active.load(Ordering::Acquire);
        self.buffers[active].read().clone()
    }

    /// Overwrites both halves with `results`.
    pub fn write_both(&self, results: R) {
        let _exclusive = write_cache_lock(&self.lock);
        *self.buffers[0].write() = results.clone();
        *self.buffers[1].write() = results;
    }
}

#[derive(Debug, Default)]
pub(crate) struct ProxyState {
    pub(crate) unregistered: AtomicBool,
    pub(crate) destroyed: AtomicBool,
}

/// Something the caller refreshes from the physics results during `PhysicsModule::sync`.
pub trait SyncTarget {
    fn sync_to_cache(&mut self);
}

/// Caller side of a registered proxy.
pub struct ProxyHandle<R> {
    id: ProxyId,
    evolution: EvolutionHandle,
    cache: Arc<ResultsCache<R>>,
    state: Arc<ProxyState>,
    results: R,
}

impl<R: Clone + Default> ProxyHandle<R> {
    pub(crate) fn new(id: ProxyId, evolution: EvolutionHandle, cache: Arc<ResultsCache<R>>, state: Arc<ProxyState>) -> Self {
        Self {
            id,
            evolution,
            cache,
            state,
            results: R::default(),
        }
    }

    #[inline]
    pub fn id(&self) -> ProxyId {
        self.id
    }

    #[inline]
    pub fn evolution(&self) -> EvolutionHandle {
        self.evolution
    }

    /// Results copied by the last `sync_to_cache`.
    #[inline]
    pub fn results(&self) -> &R {
        &self.results
    }

    /// True once the physics thread removed the proxy and handed over its final results.
    pub fn is_destroyed(&self) -> bool {
        self.state.destroyed.load(Ordering::Acquire)
    }

    pub fn is_unregistered(&self) -> bool {
        self.state.unregistered.load(Ordering::Acquire)
    }

    /// Marks the handle unregistered. Returns false if it already was.
    pub(crate) fn mark_unregistered(&self) -> bool {
        !self.state.unregistered.swap(true, Ordering::AcqRel)
    }
}

impl<R: Clone + Default> SyncTarget for ProxyHandle<R> {
    fn sync_to_cache(&mut self) {
        self.results = self.cache.read_active();
    }
}

/// Type-erased proxy as stored by an evolution.
pub(crate) trait SolverProxy: Send {
    fn create_rigid_bodies(&mut self, particles: &mut ParticleSet, owned: &mut Vec<usize>);
    fn parameter_update(&mut self, particles: &mut ParticleSet, owned: &[usize], time: f32);
    fn disable_collisions(&mut self, owned: &[usize], exclusions: &mut PairExclusions);
    fn add_forces(&mut self, particles: &mut ParticleSet, owned: &[usize], dt: f32);
    fn kinematic_update(&mut self, particles: &mut ParticleSet, owned: &[usize], time: f32);
    fn start_frame(&mut self, dt: f32);
    fn end_frame(&mut self, dt: f32);
    fn remap_indices(&mut self, remap: &IndexRemap);
    fn cache_results(&mut self, particles: &ParticleSet, owned: &[usize]);
    fn flip_cache(&self, exclusive: &ShardedLockWriteGuard<'_, ()>);
    fn sync_before_destroy(&mut self, particles: &ParticleSet, owned: &[usize]);
    fn mark_destroyed(&self);
}

struct BoundProxy<C: ProxyCallbacks> {
    callbacks: C,
    cache: Arc<ResultsCache<C::Results>>,
    state: Arc<ProxyState>,
}

impl<C: ProxyCallbacks> SolverProxy for BoundProxy<C> {
    fn create_rigid_bodies(&mut self, particles: &mut ParticleSet, owned: &mut Vec<usize>) {
        self.callbacks.create_rigid_bodies(particles, owned);
    }

    fn parameter_update(&mut self, particles: &mut ParticleSet, owned: &[usize], time: f32) {
        self.callbacks.parameter_update(particles, owned, time);
    }

    fn disable_collisions(&mut self, owned: &[usize], exclusions: &mut PairExclusions) {
        self.callbacks.disable_collisions(owned, exclusions);
    }

    fn add_forces(&mut self, particles: &mut ParticleSet, owned: &[usize], dt: f32) {
        self.callbacks.add_forces(particles, owned, dt);
    }

    fn kinematic_update(&mut self, particles: &mut ParticleSet, owned: &[usize], time: f32) {
        self.callbacks.kinematic_update(particles, owned, time);
    }

    fn start_frame(&mut self, dt: f32) {
        self.callbacks.start_frame(dt);
    }

    fn end_frame(&mut self, dt: f32) {
        self.callbacks.end_frame(dt);
    }

    fn remap_indices(&mut self, remap: &IndexRemap) {
        self.callbacks.remap_indices(remap);
    }

    fn cache_results(&mut self, particles: &ParticleSet, owned: &[usize]) {
        let callbacks = &mut self.callbacks;
        self.cache
            .write_inactive(|results| callbacks.cache_results(particles, owned, results));
    }

    fn flip_cache(&self, exclusive: &ShardedLockWriteGuard<'_, ()>) {
        self.cache.flip(exclusive);
    }

    fn sync_before_destroy(&mut self, particles: &ParticleSet, owned: &[usize]) {
        let mut results = self.cache.read_active();
        self.callbacks.cache_results(particles, owned, &mut results);
        self.cache.write_both(results);
        self.mark_destroyed();
    }

    fn mark_destroyed(&self) {
        self.state.destroyed.store(true, Ordering::Release);
    }
}

/// A proxy registered with an evolution, together with the particles it owns.
pub struct ProxyBinding {
    id: ProxyId,
    pub(crate) owned: Vec<usize>,
    pub(crate) proxy: Box<dyn SolverProxy>,
}

impl std::fmt::Debug for ProxyBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyBinding")
            .field("id", &self.id)
            .field("owned", &self.owned)
            .finish()
    }
}

impl ProxyBinding {
    /// Binds `callbacks` to a fresh results cache and returns the binding with its caller-side handle.
    pub fn new<C: ProxyCallbacks>(
        id: ProxyId,
        evolution: EvolutionHandle,
        callbacks: C,
        lock: Arc<CacheLock>,
    ) -> (Self, ProxyHandle<C::Results>) {
        let cache = Arc::new(ResultsCache::new(lock));
        let state = Arc::new(ProxyState::default());
        let binding = Self {
            id,
            owned: Vec::new(),
            proxy: Box::new(BoundProxy {
                callbacks,
                cache: cache.clone(),
                state: state.clone(),
            }),
        };
        (binding, ProxyHandle::new(id, evolution, cache, state))
    }

    #[inline]
    pub fn id(&self) -> ProxyId {
        self.id
    }

    /// Particles created by this proxy.
    #[inline]
    pub fn owned(&self) -> &[usize] {
        &self.owned
    }

    /// Marks a binding that never reached an evolution as destroyed so its handle stops waiting on it.
    pub(crate) fn abandon(self) {
        self.proxy.mark_destroyed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn writes_become_visible_only_after_flip() {
        let lock = Arc::new(CacheLock::new(()));
        let cache = ResultsCache::<u32>::new(lock.clone());
        cache.write_inactive(|value| *value = 7);
        assert_eq!(cache.read_active(), 0);
        cache.flip(&write_cache_lock(&lock));
        assert_eq!(cache.read_active(), 7);
    }

    #[test]
    fn readers_never_see_torn_buffers() {
        const LEN: usize = 64;
        let lock = Arc::new(CacheLock::new(()));
        let cache = Arc::new(ResultsCache::<Vec<u64>>::new(lock.clone()));
        cache.write_both(vec![0; LEN]);
        let done = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                let done = done.clone();
                thread::spawn(move || {
                    let mut last = 0;
                    while !done.load(Ordering::Acquire) {
                        let snapshot = cache.read_active();
                        assert_eq!(snapshot.len(), LEN);
                        assert!(snapshot.iter().all(|&value| value == snapshot[0]), "torn read");
                        assert!(snapshot[0] >= last, "went backwards");
                        last = snapshot[0];
                    }
                })
            })
            .collect();

        for generation in 1..=2000u64 {
            cache.write_inactive(|buffer| buffer.iter_mut().for_each(|value| *value = generation));
            cache.flip(&write_cache_lock(&lock));
        }
        done.store(true, Ordering::Release);
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(cache.read_active()[0], 2000);
    }
}
