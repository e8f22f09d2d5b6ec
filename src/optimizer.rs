use dashmap::DashMap;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PerformanceConfig;
use crate::metrics::{Collector, Metrics, SystemCollector};
use crate::worker::{PoolStats, WorkerPool};

/// Invoked when process memory crosses the soft watermark.
pub type ReliefHook = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Owns one worker pool per service and watches process memory.
pub struct PoolRegistry {
    config: PerformanceConfig,
    pools: DashMap<String, Arc<WorkerPool>>,
    relief_hooks: Mutex<Vec<ReliefHook>>,
    watcher: CancellationToken,
}

impl PoolRegistry {
    /// Build the registry and, when a memory ceiling is configured, start
    /// the memory watcher. Must be called inside a tokio runtime.
    pub fn new(config: PerformanceConfig) -> Arc<Self> {
        let config = config.normalized();
        info!(
            max_workers = config.max_workers,
            queue_size = config.queue_size,
            max_parallelism = config.max_parallelism,
            max_memory_mb = config.max_memory_mb,
            gc_percent = config.gc_percent,
            "pool registry configured"
        );
        let registry = Arc::new(Self {
            config,
            pools: DashMap::new(),
            relief_hooks: Mutex::new(Vec::new()),
            watcher: CancellationToken::new(),
        });
        if registry.soft_limit_bytes().is_some() {
            spawn_memory_watcher(Arc::downgrade(&registry), registry.watcher.clone());
        }
        registry
    }

    /// Worker threads the runtime should be built with.
    pub fn runtime_worker_threads(config: &PerformanceConfig) -> usize {
        config.clone().normalized().max_parallelism.max(1)
    }

    pub fn config(&self) -> &PerformanceConfig {
        &self.config
    }

    /// The pool for `service`, created and started on first use. Concurrent
    /// first calls still build exactly one pool.
    pub fn get_or_create_pool(&self, service: &str) -> Arc<WorkerPool> {
        if let Some(pool) = self.pools.get(service) {
            return Arc::clone(pool.value());
        }
        self.pools
            .entry(service.to_string())
            .or_insert_with(|| {
                let pool = WorkerPool::new(service, self.config.max_workers, self.config.queue_size);
                pool.start();
                Arc::new(pool)
            })
            .value()
            .clone()
    }

    pub fn add_relief_hook(&self, hook: ReliefHook) {
        self.relief_hooks.lock().push(hook);
    }

    pub fn pool_stats(&self) -> Vec<PoolStats> {
        let mut stats: Vec<PoolStats> = self.pools.iter().map(|p| p.value().stats()).collect();
        stats.sort_by(|a, b| a.service.cmp(&b.service));
        stats
    }

    pub fn total_in_flight(&self) -> usize {
        self.pools.iter().map(|p| p.value().in_flight()).sum()
    }

    fn soft_limit_bytes(&self) -> Option<u64> {
        if self.config.max_memory_mb == 0 {
            return None;
        }
        let ceiling = self.config.max_memory_mb * 1024 * 1024;
        Some(ceiling / 100 * self.config.gc_percent as u64)
    }

    /// Run the relief hooks if `used_bytes` is past the watermark. Never
    /// rejects work; returns whether relief ran.
    pub async fn relieve_if_needed(&self, used_bytes: u64) -> bool {
        let Some(limit) = self.soft_limit_bytes() else {
            return false;
        };
        if used_bytes <= limit {
            return false;
        }
        warn!(
            used_mb = used_bytes / 1024 / 1024,
            limit_mb = limit / 1024 / 1024,
            "memory above watermark, requesting relief"
        );
        let hooks = self.relief_hooks.lock().clone();
        for hook in hooks {
            hook().await;
        }
        true
    }

    /// Stop the memory watcher and every pool, waiting up to the worker idle
    /// timeout for each to drain.
    pub async fn shutdown(&self) {
        self.watcher.cancel();
        let pools: Vec<Arc<WorkerPool>> = self.pools.iter().map(|p| Arc::clone(p.value())).collect();
        for pool in pools {
            pool.stop_and_wait(self.config.worker_idle_timeout).await;
        }
        info!("pool registry shut down");
    }
}

impl Drop for PoolRegistry {
    fn drop(&mut self) {
        self.watcher.cancel();
    }
}

impl Collector for PoolRegistry {
    fn name(&self) -> &str {
        "pools"
    }

    fn collect(&self, metrics: &mut Metrics) {
        metrics.active_tasks = self.total_in_flight() as u64;
    }
}

fn spawn_memory_watcher(registry: Weak<PoolRegistry>, cancel: CancellationToken) {
    let every = match registry.upgrade() {
        Some(r) => r.config.memory_check_interval,
        None => return,
    };
    tokio::spawn(async move {
        let system = SystemCollector::new();
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(registry) = registry.upgrade() else { break };
                    if let Some(used) = system.memory_bytes() {
                        registry.relieve_if_needed(used).await;
                    }
                }
            }
        }
        debug!("memory watcher stopped");
    });
}
