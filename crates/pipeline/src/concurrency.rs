//! Concurrency planning module for auto-cfr
//!
//! Derives the worker pool size and queue bound from CPU core count and configuration.

use crate::config::Config;

/// Concurrency plan derived from configuration and system resources
#[derive(Debug, Clone, PartialEq)]
pub struct ConcurrencyPlan {
    /// Total logical CPU cores available
    pub total_cores: u32,
    /// Number of worker tasks, each running one encoder at a time
    pub workers: u32,
    /// Capacity of the bounded job queue feeding the workers
    pub queue_capacity: u32,
}

impl ConcurrencyPlan {
    /// Derive a concurrency plan from configuration
    ///
    /// - `workers = 0` means one worker per available core
    /// - `queue_capacity = 0` means twice the worker count
    pub fn derive(cfg: &Config) -> Self {
        Self::derive_with_cores(cfg, num_cpus::get() as u32)
    }

    fn derive_with_cores(cfg: &Config, total_cores: u32) -> Self {
        let total_cores = total_cores.max(1);

        let workers = if cfg.scheduler.workers > 0 {
            cfg.scheduler.workers
        } else {
            total_cores
        };

        let queue_capacity = if cfg.scheduler.queue_capacity > 0 {
            cfg.scheduler.queue_capacity
        } else {
            workers.saturating_mul(2)
        };

        Self {
            total_cores,
            workers,
            queue_capacity,
        }
    }

    /// Plan with an explicit worker count, mostly for tests and embedding.
    pub fn fixed(workers: u32) -> Self {
        let workers = workers.max(1);
        Self {
            total_cores: num_cpus::get() as u32,
            workers,
            queue_capacity: workers.saturating_mul(2),
        }
    }
}

/// Public function to derive a concurrency plan from configuration
pub fn derive_plan(cfg: &Config) -> ConcurrencyPlan {
    ConcurrencyPlan::derive(cfg)
}
