//! Multi-threaded engine
//!
//! Owns the process-wide [`memory::MemoryRegion`], the shared
//! [`SlotAllocator`], and one OS thread per core, each running its own
//! [`ThreadScheduler`]. Construction wires up every thread's inbox and
//! wake event before any of them starts looping, so
//! [`ThreadScheduler::spawn`] can route to any other worker from the
//! first tick onward.

use crate::config::EngineConfig;
use crate::memory;
use crate::poller::EventId as WakeEventId;
use crate::routine::RoutineFn;
use crate::scheduler::ThreadScheduler;
use crate::slots::SlotAllocator;

use groutine_core::error::{SchedError, SchedResult};
use groutine_core::id::RoutineId;
use groutine_core::lcrq::{Lcrq, LcrqHandle};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex, OnceLock};
use std::thread::JoinHandle;

/// A running pool of scheduler threads sharing one routine address
/// space. Construction blocks until every worker thread has its poller
/// up and its wake event registered; [`Engine::spawn`] is usable
/// immediately after `new` returns, even before [`Engine::join`] is
/// called.
pub struct Engine {
    config: EngineConfig,
    inboxes: Arc<Vec<Arc<Lcrq>>>,
    wake_events: Arc<Vec<OnceLock<WakeEventId>>>,
    slot_alloc: Arc<SlotAllocator>,
    alive: Arc<AtomicUsize>,
    handles: Vec<JoinHandle<()>>,
    /// One externally-usable push handle per worker inbox, for spawning
    /// from outside any scheduler thread (e.g. the initial routine).
    external_push: Vec<Mutex<LcrqHandle>>,
}

impl Engine {
    /// Reserve the process's memory region, start `config.max_nb_cores`
    /// scheduler threads, and block until all of them are ready to
    /// receive work.
    pub fn new(config: EngineConfig) -> SchedResult<Self> {
        config.validate().map_err(|e| SchedError::InvalidConfig(e.to_string()))?;
        memory::init_memory_region(config.max_routines)?;

        let n = config.max_nb_cores;
        let inboxes: Arc<Vec<Arc<Lcrq>>> =
            Arc::new((0..n).map(|_| Arc::new(Lcrq::new(n))).collect());
        let wake_events: Arc<Vec<OnceLock<WakeEventId>>> =
            Arc::new((0..n).map(|_| OnceLock::new()).collect());
        let slot_alloc = Arc::new(SlotAllocator::new(config.max_routines));
        let alive = Arc::new(AtomicUsize::new(0));
        let external_push = (0..n).map(|_| Mutex::new(LcrqHandle::new())).collect();

        // Every thread's scheduler must exist (and have registered its
        // wake event) before any of them starts looping, or an early
        // cross-thread post could target an empty `OnceLock`.
        let start_barrier = Arc::new(Barrier::new(n + 1));
        let mut handles = Vec::with_capacity(n);

        for worker_id in 0..n {
            let config = config.clone();
            let inboxes = inboxes.clone();
            let wake_events = wake_events.clone();
            let slot_alloc = slot_alloc.clone();
            let alive = alive.clone();
            let start_barrier = start_barrier.clone();
            let stack_size = config.stack_size;

            let handle = std::thread::Builder::new()
                .name(format!("groutine-worker-{worker_id}"))
                .stack_size(stack_size)
                .spawn(move || {
                    crate::tls::set_worker_id(worker_id as u32);
                    groutine_core::kprint::set_worker_id(worker_id as u32);
                    let sched = ThreadScheduler::new(
                        worker_id as u32,
                        config,
                        inboxes,
                        wake_events,
                        slot_alloc,
                        alive,
                    )
                    .expect("failed to initialize worker poller");
                    start_barrier.wait();
                    sched.run();
                })
                .expect("failed to spawn scheduler thread");
            handles.push(handle);
        }

        start_barrier.wait();

        Ok(Self { config, inboxes, wake_events, slot_alloc, alive, handles, external_push })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Number of routines currently alive (spawned, not yet finished)
    /// across the whole engine.
    pub fn alive_count(&self) -> usize {
        self.alive.load(Ordering::Relaxed)
    }

    /// Place a new routine on `owner_thread`'s ready queue from outside
    /// any scheduler thread. `parent` is [`RoutineId::NONE`] for
    /// top-level spawns.
    pub fn spawn(&self, owner_thread: u32, parent: RoutineId, f: RoutineFn) -> SchedResult<RoutineId> {
        let id = self.slot_alloc.allocate()?;
        crate::routine::prepare(id, parent, owner_thread, f)?;
        self.alive.fetch_add(1, Ordering::Relaxed);

        let handle = self.external_push[owner_thread as usize].lock().unwrap();
        self.inboxes[owner_thread as usize].push(&handle, crate::scheduler::encode_schedule(id));
        if let Some(w) = self.wake_events[owner_thread as usize].get() {
            crate::poller::Poller::send_event(*w);
        }
        Ok(id)
    }

    /// Spawn onto the least-numbered worker, a simple round-robin-free
    /// placement adequate for an initial/top-level routine; subsequent
    /// routines usually spawn from inside a routine and inherit its
    /// own thread via [`ThreadScheduler::spawn`].
    pub fn spawn_any(&self, f: RoutineFn) -> SchedResult<RoutineId> {
        self.spawn(0, RoutineId::NONE, f)
    }

    /// Ask every worker to shut down once its ready queue drains and no
    /// routine remains alive anywhere, then join all worker threads.
    pub fn shutdown_and_join(mut self) {
        for (i, inbox) in self.inboxes.iter().enumerate() {
            let handle = self.external_push[i].lock().unwrap();
            inbox.push(&handle, crate::scheduler::shutdown_command());
            if let Some(w) = self.wake_events[i].get() {
                crate::poller::Poller::send_event(*w);
            }
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_engine_runs_one_routine_to_completion() {
        let config = EngineConfig::new().max_nb_cores(1).max_routines(16);
        let engine = Engine::new(config).expect("engine starts");
        let (tx, rx) = mpsc::channel();

        engine
            .spawn_any(Box::new(move || {
                tx.send(()).unwrap();
            }))
            .expect("spawn succeeds");

        rx.recv_timeout(std::time::Duration::from_secs(2)).expect("routine ran");
        engine.shutdown_and_join();
    }
}
