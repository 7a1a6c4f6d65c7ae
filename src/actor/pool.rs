// actor/pool.rs - Arbiter Worker Pool

use actix::prelude::*;
use actix_rt::{Arbiter, ArbiterHandle};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::info;

use crate::actor::AgentActor;

/// Round-robin set of arbiters that agent actors are started on.
///
/// With zero workers agents run on the arbiter of the caller, which must be
/// inside a running actix system.
pub struct WorkerPool {
    arbiters: Vec<ArbiterHandle>,
    next: AtomicUsize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        let arbiters: Vec<ArbiterHandle> = (0..workers).map(|_| Arbiter::new().handle()).collect();
        if workers > 0 {
            info!(workers, "Started agent worker arbiters");
        }

        Self {
            arbiters,
            next: AtomicUsize::new(0),
        }
    }

    pub fn size(&self) -> usize {
        self.arbiters.len()
    }

    /// Start an actor on the next arbiter
    pub fn spawn(&self, actor: AgentActor) -> Addr<AgentActor> {
        if self.arbiters.is_empty() {
            return actor.start();
        }

        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.arbiters.len();
        AgentActor::start_in_arbiter(&self.arbiters[idx], move |_ctx| actor)
    }

    /// Stop all worker arbiters
    pub fn shutdown(&self) {
        for arbiter in &self.arbiters {
            arbiter.stop();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
