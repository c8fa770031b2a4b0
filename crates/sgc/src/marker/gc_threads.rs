//! GC Threads - Worker Gang for Parallel Phases
//!
//! Every parallel phase (marking, evacuation, update refs) runs as one task
//! on `n` scoped worker threads. The task receives its worker id and
//! returns when the phase work is exhausted or cancelled; `run_task`
//! returns once every worker has finished.
//!
//! Workers are spawned per task with `std::thread::scope`, so tasks may
//! borrow the collector state directly. If a thread cannot be spawned the
//! worker runs inline on the calling thread.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

/// Named group of GC workers
pub struct WorkGang {
    name: &'static str,
    max_workers: usize,
    tasks_run: AtomicUsize,
}

impl WorkGang {
    pub fn new(name: &'static str, max_workers: usize) -> Self {
        Self {
            name,
            max_workers: max_workers.max(1),
            tasks_run: AtomicUsize::new(0),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn tasks_run(&self) -> usize {
        self.tasks_run.load(Ordering::Relaxed)
    }

    /// Run `task(worker_id)` on `active` workers and wait for all of them
    pub fn run_task<F>(&self, active: usize, task: F)
    where
        F: Fn(usize) + Sync,
    {
        let active = active.clamp(1, self.max_workers);
        self.tasks_run.fetch_add(1, Ordering::Relaxed);

        if active == 1 {
            task(0);
            return;
        }

        let task = &task;
        thread::scope(|scope| {
            for id in 1..active {
                let spawned = thread::Builder::new()
                    .name(format!("{}#{}", self.name, id))
                    .spawn_scoped(scope, move || task(id));
                if let Err(e) = spawned {
                    log::warn!(
                        target: "sgc",
                        "Failed to spawn {} worker {}: {}; running inline",
                        self.name,
                        id,
                        e
                    );
                    task(id);
                }
            }
            task(0);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_worker_runs_once() {
        let gang = WorkGang::new("test-worker", 4);
        let hits: Vec<AtomicUsize> = (0..4).map(|_| AtomicUsize::new(0)).collect();
        gang.run_task(4, |id| {
            hits[id].fetch_add(1, Ordering::Relaxed);
        });
        assert!(hits.iter().all(|h| h.load(Ordering::Relaxed) == 1));
        assert_eq!(gang.tasks_run(), 1);
    }

    #[test]
    fn test_active_is_clamped() {
        let gang = WorkGang::new("test-worker", 2);
        let count = AtomicUsize::new(0);
        gang.run_task(16, |_| {
            count.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(count.load(Ordering::Relaxed), 2);
    }
}
