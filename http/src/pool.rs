//! Reusable contexts.
//!
//! `acquire` hands out a boxed [`Context`] already reset for the new
//! request; `release` takes it back. Ownership moves with the box, so a
//! pooled context can never be reachable from two requests at once.

use crate::context::{Context, ContextSettings};
use crate::transport::{Inbound, ResponseSink};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Contexts created because the pool was empty.
    pub allocated: u64,
    /// Acquisitions served from the pool.
    pub reused: u64,
    /// Contexts returned and kept.
    pub released: u64,
    /// Contexts returned while the pool was full, and dropped.
    pub discarded: u64,
    pub idle: usize,
    pub capacity: usize,
}

pub struct ContextPool {
    idle: Mutex<Vec<Box<Context>>>,
    capacity: usize,
    settings: Arc<ContextSettings>,
    allocated: AtomicU64,
    reused: AtomicU64,
    released: AtomicU64,
    discarded: AtomicU64,
}

impl ContextPool {
    pub fn new(capacity: usize, settings: ContextSettings) -> Self {
        Self {
            idle: Mutex::new(Vec::with_capacity(capacity.min(64))),
            capacity,
            settings: Arc::new(settings),
            allocated: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            released: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> &ContextSettings {
        &self.settings
    }

    /// A context bound to `inbound` and `sink`, with no leftover state.
    pub fn acquire(&self, inbound: Inbound, sink: Arc<dyn ResponseSink>) -> Box<Context> {
        let pooled = self.idle.lock().pop();
        match pooled {
            Some(mut ctx) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                ctx.reset(inbound, sink);
                ctx
            }
            None => {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                Box::new(Context::with_settings(inbound, sink, self.settings.clone()))
            }
        }
    }

    /// Return a context. The request, its sink and all per-request values
    /// are dropped immediately.
    pub fn release(&self, mut ctx: Box<Context>) {
        ctx.detach();
        let mut idle = self.idle.lock();
        if idle.len() < self.capacity {
            idle.push(ctx);
            self.released.fetch_add(1, Ordering::Relaxed);
        } else {
            self.discarded.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocated: self.allocated.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            idle: self.idle.lock().len(),
            capacity: self.capacity,
        }
    }
}

impl Default for ContextPool {
    fn default() -> Self {
        Self::new(1024, ContextSettings::default())
    }
}

impl std::fmt::Debug for ContextPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextPool")
            .field("stats", &self.stats())
            .finish()
    }
}
