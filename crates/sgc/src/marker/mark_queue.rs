//! Mark Queue - Work-Stealing Queues for Marking
//!
//! Architecture:
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                   GLOBAL INJECTOR                        │
//! │      (roots, SATB drains, work returned on cancel)       │
//! └─────────────────────────────────────────────────────────┘
//!                             │
//!         ┌───────────────────┼───────────────────┐
//!         ▼                   ▼                   ▼
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Worker 0    │◀─▶│  Worker 1    │◀─▶│  Worker N    │
//! │  LIFO deque  │   │  LIFO deque  │   │  LIFO deque  │
//! └──────────────┘   └──────────────┘   └──────────────┘
//!            steal_batch_and_pop between workers
//! ```
//!
//! Each worker deque lives in a slot the worker takes for the duration of
//! a phase and gives back empty at the end.

use crate::object::ObjRef;
use crossbeam_deque::{Injector, Steal, Stealer, Worker};
use parking_lot::Mutex;
use rand::distributions::{Distribution, Uniform};
use rand::thread_rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

/// Shared queues of one marking context
pub struct MarkQueueSet {
    injector: Injector<ObjRef>,
    workers: Vec<Mutex<Option<Worker<ObjRef>>>>,
    stealers: Vec<Stealer<ObjRef>>,
}

impl MarkQueueSet {
    pub fn new(nworkers: usize) -> Self {
        let nworkers = nworkers.max(1);
        let mut workers = Vec::with_capacity(nworkers);
        let mut stealers = Vec::with_capacity(nworkers);
        for _ in 0..nworkers {
            let w = Worker::new_lifo();
            stealers.push(w.stealer());
            workers.push(Mutex::new(Some(w)));
        }
        Self {
            injector: Injector::new(),
            workers,
            stealers,
        }
    }

    pub fn nworkers(&self) -> usize {
        self.workers.len()
    }

    pub fn push(&self, obj: ObjRef) {
        self.injector.push(obj);
    }

    /// Take worker `id`'s deque for a phase
    pub fn take_worker(&self, id: usize) -> Option<Worker<ObjRef>> {
        self.workers.get(id).and_then(|slot| slot.lock().take())
    }

    /// Give the deque back, moving leftover work to the injector
    pub fn return_worker(&self, id: usize, worker: Worker<ObjRef>) {
        while let Some(obj) = worker.pop() {
            self.injector.push(obj);
        }
        if let Some(slot) = self.workers.get(id) {
            *slot.lock() = Some(worker);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.injector.is_empty() && self.stealers.iter().all(|s| s.is_empty())
    }

    /// Drop all pending work
    pub fn clear(&self) {
        loop {
            match self.injector.steal() {
                Steal::Empty => break,
                Steal::Success(_) | Steal::Retry => continue,
            }
        }
        for slot in &self.workers {
            if let Some(w) = slot.lock().as_ref() {
                while w.pop().is_some() {}
            }
        }
    }
}

/// Termination protocol for a fixed set of workers
///
/// A worker that finds no work anywhere offers termination. Once every
/// worker has offered at the same time, all of them exit.
pub struct Terminator {
    const_nworkers: usize,
    nworkers: AtomicUsize,
}

impl Terminator {
    pub fn new(number_workers: usize) -> Self {
        Self {
            const_nworkers: number_workers,
            nworkers: AtomicUsize::new(number_workers),
        }
    }

    pub fn try_terminate(&self) -> bool {
        if self.const_nworkers == 1 {
            return true;
        }
        if self.nworkers.fetch_sub(1, Ordering::AcqRel) == 1 {
            return true;
        }
        thread::sleep(Duration::from_micros(1));
        self.zero_or_increase_workers()
    }

    fn zero_or_increase_workers(&self) -> bool {
        let mut nworkers = self.nworkers.load(Ordering::Acquire);
        loop {
            if nworkers == 0 {
                return true;
            }
            match self.nworkers.compare_exchange(
                nworkers,
                nworkers + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return false,
                Err(actual) => nworkers = actual,
            }
        }
    }
}

/// One worker's view of the queues during a phase
pub struct MarkTask<'a> {
    id: usize,
    worker: Worker<ObjRef>,
    queues: &'a MarkQueueSet,
}

impl<'a> MarkTask<'a> {
    pub fn new(id: usize, worker: Worker<ObjRef>, queues: &'a MarkQueueSet) -> Self {
        Self { id, worker, queues }
    }

    #[inline]
    pub fn push(&self, obj: ObjRef) {
        self.worker.push(obj);
    }

    pub fn pop(&self) -> Option<ObjRef> {
        self.worker
            .pop()
            .or_else(|| self.pop_global())
            .or_else(|| self.steal())
    }

    fn pop_global(&self) -> Option<ObjRef> {
        loop {
            match self.queues.injector.steal_batch_and_pop(&self.worker) {
                Steal::Empty => return None,
                Steal::Success(obj) => return Some(obj),
                Steal::Retry => continue,
            }
        }
    }

    fn steal(&self) -> Option<ObjRef> {
        let stealers = &self.queues.stealers;
        if stealers.len() == 1 {
            return None;
        }
        let mut rng = thread_rng();
        let range = Uniform::new(0, stealers.len());
        for _ in 0..2 * stealers.len() {
            let mut victim = self.id;
            while victim == self.id {
                victim = range.sample(&mut rng);
            }
            loop {
                match stealers[victim].steal_batch_and_pop(&self.worker) {
                    Steal::Empty => break,
                    Steal::Success(obj) => return Some(obj),
                    Steal::Retry => continue,
                }
            }
        }
        None
    }

    /// Return the deque to its slot, spilling leftovers to the injector
    pub fn finish(self) {
        self.queues.return_worker(self.id, self.worker);
    }
}
