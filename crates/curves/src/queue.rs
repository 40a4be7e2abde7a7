use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// Nothing queued and nothing running.
    Idle,
    /// Jobs are waiting for a slot.
    Dispatching,
    /// The queue is empty but jobs are still running.
    Draining,
}

/// FIFO of pending jobs plus slot accounting. Never hands out more than
/// `limit` jobs without a matching `complete`.
#[derive(Debug)]
pub struct RequestQueue<J> {
    pending: VecDeque<J>,
    in_flight: usize,
    limit: usize,
    peak: usize,
}

impl<J> RequestQueue<J> {
    pub fn new(limit: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            in_flight: 0,
            limit: limit.max(1),
            peak: 0,
        }
    }

    pub fn push(&mut self, job: J) {
        self.pending.push_back(job);
    }

    /// Takes the next job if a slot is free, claiming the slot.
    pub fn next_dispatch(&mut self) -> Option<J> {
        if self.in_flight >= self.limit {
            return None;
        }
        let job = self.pending.pop_front()?;
        self.in_flight += 1;
        self.peak = self.peak.max(self.in_flight);
        Some(job)
    }

    /// Releases a slot claimed by `next_dispatch`.
    pub fn complete(&mut self) {
        debug_assert!(self.in_flight > 0, "complete without dispatch");
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    pub fn state(&self) -> QueueState {
        if !self.pending.is_empty() {
            QueueState::Dispatching
        } else if self.in_flight > 0 {
            QueueState::Draining
        } else {
            QueueState::Idle
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Highest number of simultaneously running jobs observed.
    pub fn peak(&self) -> usize {
        self.peak
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs submitted jobs on worker threads, at most `limit` at a time.
/// A finishing job pumps the queue before its thread exits.
#[derive(Clone)]
pub struct FetchPool {
    queue: Arc<Mutex<RequestQueue<Job>>>,
}

impl FetchPool {
    pub fn new(limit: usize) -> Self {
        Self {
            queue: Arc::new(Mutex::new(RequestQueue::new(limit))),
        }
    }

    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        lock(&self.queue).push(Box::new(job));
        pump(&self.queue);
    }

    pub fn state(&self) -> QueueState {
        lock(&self.queue).state()
    }

    pub fn in_flight(&self) -> usize {
        lock(&self.queue).in_flight()
    }

    pub fn peak_in_flight(&self) -> usize {
        lock(&self.queue).peak()
    }
}

fn lock<J>(queue: &Mutex<RequestQueue<J>>) -> MutexGuard<'_, RequestQueue<J>> {
    // Jobs run outside the lock, so a poisoned guard still holds consistent
    // accounting.
    queue.lock().unwrap_or_else(PoisonError::into_inner)
}

fn pump(queue: &Arc<Mutex<RequestQueue<Job>>>) {
    loop {
        let Some(job) = lock(queue).next_dispatch() else {
            return;
        };
        let worker_queue = Arc::clone(queue);
        let spawned = thread::Builder::new()
            .name("curve-fetch".into())
            .spawn(move || {
                let _slot = SlotGuard(Arc::clone(&worker_queue));
                job();
            });
        if let Err(err) = spawned {
            warn!(error = %err, "failed to spawn curve fetch worker");
            lock(queue).complete();
            return;
        }
    }
}

/// Releases the slot and pumps the queue even if the job panics.
struct SlotGuard(Arc<Mutex<RequestQueue<Job>>>);

impl Drop for SlotGuard {
    fn drop(&mut self) {
        lock(&self.0).complete();
        pump(&self.0);
    }
}
