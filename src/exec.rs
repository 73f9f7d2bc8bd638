//! Worker thread execution with an injected diagnostic sink
//!
//! Workers run on a rayon pool. Every pool thread holds an activation on the
//! sink from its start handler until its exit handler, and the pool itself
//! holds one for as long as it is alive.

use crate::config::Config;
use crate::diagnostics::{DiagnosticSink, SinkActivation};
use crate::error::{Result, StoreError};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::cell::RefCell;

thread_local! {
    static WORKER_ACTIVATION: RefCell<Option<SinkActivation>> = const { RefCell::new(None) };
}

/// Number of worker threads the configuration allows (at least one)
pub fn available_cores(config: &Config) -> usize {
    config.number_of_threads.max(1)
}

/// Thread pool whose workers share one diagnostic sink
pub struct WorkerPool {
    pool: ThreadPool,
    sink: DiagnosticSink,
    _activation: SinkActivation,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.threads())
            .field("sink", &self.sink)
            .finish()
    }
}

impl WorkerPool {
    /// Build a pool of `threads` workers (at least one)
    pub fn new(sink: &DiagnosticSink, threads: usize) -> Result<Self> {
        let activation = sink.activate();
        let start_sink = sink.clone();
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|index| format!("gzvol-worker-{}", index))
            .start_handler(move |index| {
                tracing::trace!(worker = index, "worker started");
                let activation = start_sink.activate();
                WORKER_ACTIVATION.with(|slot| *slot.borrow_mut() = Some(activation));
            })
            .exit_handler(|index| {
                tracing::trace!(worker = index, "worker exiting");
                WORKER_ACTIVATION.with(|slot| slot.borrow_mut().take());
            })
            .build()
            .map_err(|e| StoreError::Task(e.to_string()))?;

        Ok(Self {
            pool,
            sink: sink.clone(),
            _activation: activation,
        })
    }

    /// Pool sized from the configuration
    pub fn from_config(config: &Config, sink: &DiagnosticSink) -> Result<Self> {
        Self::new(sink, available_cores(config))
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn sink(&self) -> &DiagnosticSink {
        &self.sink
    }

    /// Run `f(worker_index, sink)` once on every worker and wait for all
    pub fn broadcast<F>(&self, f: F)
    where
        F: Fn(usize, &DiagnosticSink) + Sync,
    {
        let sink = &self.sink;
        self.pool.broadcast(|ctx| f(ctx.index(), sink));
    }

    /// Apply `f` to every item on the pool; results come back in input order
    pub fn map<T, R, F>(&self, items: Vec<T>, f: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        F: Fn(T, &DiagnosticSink) -> R + Sync,
    {
        let sink = &self.sink;
        self.pool
            .install(|| items.into_par_iter().map(|item| f(item, sink)).collect())
    }
}

/// Run `f(worker_index, sink)` on a pool of `threads` workers and wait for all
pub fn run_workers<F>(sink: &DiagnosticSink, threads: usize, f: F) -> Result<()>
where
    F: Fn(usize, &DiagnosticSink) + Sync,
{
    WorkerPool::new(sink, threads)?.broadcast(f);
    Ok(())
}

/// Run `f` over every item on a pool of `threads` workers, keeping input order
pub fn map_parallel<T, R, F>(
    sink: &DiagnosticSink,
    threads: usize,
    items: Vec<T>,
    f: F,
) -> Result<Vec<R>>
where
    T: Send,
    R: Send,
    F: Fn(T, &DiagnosticSink) -> R + Sync,
{
    Ok(WorkerPool::new(sink, threads)?.map(items, f))
}
