use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use parking_lot::Mutex;
use prometheus::{
    Counter, Gauge, HistogramVec, IntCounter, IntCounterVec, register_counter, register_gauge,
    register_histogram_vec, register_int_counter, register_int_counter_vec,
};
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{Pid, ProcessExt, System, SystemExt};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::CacheStats;

lazy_static! {
    pub static ref HTTP_REQUESTS: IntCounter =
        register_int_counter!("feed_gateway_http_requests_total", "Total HTTP requests served").unwrap();
    pub static ref API_REQUESTS: IntCounterVec = register_int_counter_vec!(
        "feed_gateway_api_requests_total",
        "Upstream requests by service and outcome",
        &["service", "outcome"]
    )
    .unwrap();
    pub static ref API_LATENCY: HistogramVec = register_histogram_vec!(
        "feed_gateway_api_latency_seconds",
        "Upstream request latency in seconds",
        &["service"]
    )
    .unwrap();
    pub static ref RATE_LIMITED: IntCounterVec = register_int_counter_vec!(
        "feed_gateway_rate_limited_total",
        "Requests denied by the rate limiter",
        &["service"]
    )
    .unwrap();
    pub static ref QUEUE_REJECTIONS: IntCounterVec = register_int_counter_vec!(
        "feed_gateway_pool_queue_rejections_total",
        "Jobs rejected because a worker pool queue was full",
        &["service"]
    )
    .unwrap();
    pub static ref CACHE_HITS: Counter =
        register_counter!("feed_gateway_cache_hits_total", "Total cache hits").unwrap();
    pub static ref CACHE_MISSES: Counter =
        register_counter!("feed_gateway_cache_misses_total", "Total cache misses").unwrap();
    pub static ref CACHE_SIZE: Gauge =
        register_gauge!("feed_gateway_cache_size_bytes", "Bytes currently held by the cache").unwrap();
}

fn serialize_ms<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(value.as_secs_f64() * 1000.0)
}

/// Count, error count and a cheap running latency average.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RequestStats {
    pub count: u64,
    pub error_count: u64,
    #[serde(rename = "avg_latency_ms", serialize_with = "serialize_ms")]
    pub avg_latency: Duration,
}

impl RequestStats {
    // (old + sample) / 2, deliberately approximate
    fn record(&mut self, duration: Duration, is_error: bool) {
        self.count += 1;
        if is_error {
            self.error_count += 1;
        }
        self.avg_latency = if self.count == 1 {
            duration
        } else {
            (self.avg_latency + duration) / 2
        };
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServiceStats {
    #[serde(flatten)]
    pub requests: RequestStats,
    pub rate_limited: u64,
    pub queue_full: u64,
    pub fallback_successes: u64,
}

/// Why the dispatcher turned a request away before it reached upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    RateLimited,
    QueueFull,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Metrics {
    pub http: RequestStats,
    pub services: HashMap<String, ServiceStats>,
    pub widgets: HashMap<String, RequestStats>,
    pub cache: CacheStats,
    pub memory_bytes: u64,
    pub active_tasks: u64,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Source of periodically refreshed figures. Collectors run without the
/// metrics lock held and only fill the gauges: `cache`, `memory_bytes` and
/// `active_tasks`.
pub trait Collector: Send + Sync {
    fn name(&self) -> &str;
    fn collect(&self, metrics: &mut Metrics);
}

/// Accumulates request telemetry; readers get an owned copy.
#[derive(Default)]
pub struct Monitor {
    metrics: Mutex<Metrics>,
    collectors: Mutex<Vec<Arc<dyn Collector>>>,
    running: Mutex<Option<CancellationToken>>,
}

impl Monitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_collector(&self, collector: Arc<dyn Collector>) {
        self.collectors.lock().push(collector);
    }

    /// Spawn the collection loop. A second call while running is a no-op.
    pub fn start(self: &Arc<Self>, parent: &CancellationToken, every: Duration) {
        let cancel = {
            let mut running = self.running.lock();
            if running.is_some() {
                return;
            }
            let cancel = parent.child_token();
            *running = Some(cancel.clone());
            cancel
        };

        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_ms = every.as_millis() as u64, "metrics monitor started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => monitor.collect(),
                }
            }
            debug!("metrics monitor stopped");
        });
    }

    pub fn stop(&self) {
        if let Some(cancel) = self.running.lock().take() {
            cancel.cancel();
        }
    }

    /// One collection pass over every collector. The metrics lock is only
    /// taken to read and write back the gauges.
    pub fn collect(&self) {
        let collectors = self.collectors.lock().clone();
        let mut gauges = {
            let current = self.metrics.lock();
            Metrics {
                cache: current.cache,
                memory_bytes: current.memory_bytes,
                active_tasks: current.active_tasks,
                ..Metrics::default()
            }
        };
        for collector in &collectors {
            collector.collect(&mut gauges);
        }

        let mut metrics = self.metrics.lock();
        metrics.cache = gauges.cache;
        metrics.memory_bytes = gauges.memory_bytes;
        metrics.active_tasks = gauges.active_tasks;
        metrics.last_updated = Some(Utc::now());
    }

    pub fn record_http_request(&self, duration: Duration, is_error: bool) {
        HTTP_REQUESTS.inc();
        self.metrics.lock().http.record(duration, is_error);
    }

    pub fn record_api_request(&self, service: &str, duration: Duration, is_error: bool) {
        let outcome = if is_error { "error" } else { "success" };
        API_REQUESTS.with_label_values(&[service, outcome]).inc();
        API_LATENCY
            .with_label_values(&[service])
            .observe(duration.as_secs_f64());
        self.metrics
            .lock()
            .services
            .entry(service.to_string())
            .or_default()
            .requests
            .record(duration, is_error);
    }

    pub fn record_rejection(&self, service: &str, rejection: Rejection) {
        let mut metrics = self.metrics.lock();
        let stats = metrics.services.entry(service.to_string()).or_default();
        match rejection {
            Rejection::RateLimited => {
                RATE_LIMITED.with_label_values(&[service]).inc();
                stats.rate_limited += 1;
            }
            Rejection::QueueFull => {
                QUEUE_REJECTIONS.with_label_values(&[service]).inc();
                stats.queue_full += 1;
            }
        }
    }

    pub fn record_fallback_success(&self, service: &str) {
        self.metrics
            .lock()
            .services
            .entry(service.to_string())
            .or_default()
            .fallback_successes += 1;
    }

    pub fn record_widget_load(&self, widget: &str, duration: Duration, is_error: bool) {
        self.metrics
            .lock()
            .widgets
            .entry(widget.to_string())
            .or_default()
            .record(duration, is_error);
    }

    /// Deep copy of the current figures.
    pub fn get_metrics(&self) -> Metrics {
        self.metrics.lock().clone()
    }
}

/// Process memory via sysinfo.
pub struct SystemCollector {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl SystemCollector {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            pid: sysinfo::get_current_pid().ok(),
        }
    }

    /// Resident memory of this process in bytes.
    pub fn memory_bytes(&self) -> Option<u64> {
        let pid = self.pid?;
        let mut system = self.system.lock();
        if !system.refresh_process(pid) {
            return None;
        }
        system.process(pid).map(|process| process.memory())
    }
}

impl Default for SystemCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for SystemCollector {
    fn name(&self) -> &str {
        "system"
    }

    fn collect(&self, metrics: &mut Metrics) {
        if let Some(bytes) = self.memory_bytes() {
            metrics.memory_bytes = bytes;
        }
    }
}
