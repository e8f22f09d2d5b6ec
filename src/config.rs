use clap::Parser;
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::MAX_TTL;
use crate::error::ConfigError;

// CLI argument structure
#[derive(Parser, Debug, Clone)]
#[command(name = "feed-gateway")]
#[command(about = "Rate-limited, cached aggregation gateway for third-party feeds")]
pub struct Args {
    // YAML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    // Overrides server.port
    #[arg(short, long)]
    pub port: Option<u16>,

    // Overrides server.host
    #[arg(long)]
    pub host: Option<String>,

    // tracing filter used when RUST_LOG is unset
    #[arg(long, default_value = "feed_gateway=info")]
    pub log_level: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    pub server: ServerConfig,
    pub api_sources: HashMap<String, ApiSourceConfig>,
    pub rate_limit: RateLimitConfig,
    pub cache: CacheConfig,
    pub performance: PerformanceConfig,
    pub monitor: MonitorConfig,
    pub health: HealthConfig,
    pub widgets: Vec<WidgetConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Deadline for one proxied request or widget load
    #[serde(deserialize_with = "deserialize_duration")]
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// One upstream integration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ApiSourceConfig {
    pub base_url: String,
    /// Requests per rate-limit window; 0 means use the global default
    pub rate_limit: u32,
    #[serde(deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
    pub headers: HashMap<String, String>,
    pub token: Option<String>,
    pub fallbacks: Vec<String>,
}

impl Default for ApiSourceConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            rate_limit: 0,
            timeout: Duration::from_secs(10),
            headers: HashMap::new(),
            token: None,
            fallbacks: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RateLimitConfig {
    pub default_limit: u32,
    #[serde(deserialize_with = "deserialize_duration")]
    pub window: Duration,
    pub services: HashMap<String, u32>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_limit: 60,
            window: Duration::from_secs(60),
            services: HashMap::new(),
        }
    }
}

impl RateLimitConfig {
    pub fn limit_for(&self, service: &str) -> u32 {
        self.services
            .get(service)
            .copied()
            .unwrap_or(self.default_limit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheType {
    Memory,
    Disk,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CacheConfig {
    #[serde(rename = "type")]
    pub cache_type: CacheType,
    #[serde(deserialize_with = "deserialize_duration")]
    pub ttl: Duration,
    /// Byte capacity; 0 disables eviction
    pub max_size: u64,
    pub path: PathBuf,
    #[serde(deserialize_with = "deserialize_duration")]
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_type: CacheType::Memory,
            ttl: Duration::from_secs(300),
            max_size: 0,
            path: PathBuf::from("./cache"),
            sweep_interval: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PerformanceConfig {
    /// Workers per service pool; 0 means twice the available parallelism
    pub max_workers: usize,
    /// Grace period a stopping pool waits for its workers to exit
    #[serde(deserialize_with = "deserialize_duration")]
    pub worker_idle_timeout: Duration,
    pub queue_size: usize,
    /// Soft watermark as a percentage of max-memory-mb
    pub gc_percent: u32,
    /// 0 disables the memory ceiling
    pub max_memory_mb: u64,
    /// Runtime worker threads; 0 means available parallelism
    pub max_parallelism: usize,
    #[serde(deserialize_with = "deserialize_duration")]
    pub memory_check_interval: Duration,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_workers: 0,
            worker_idle_timeout: Duration::from_secs(30),
            queue_size: 1000,
            gc_percent: 100,
            max_memory_mb: 0,
            max_parallelism: 0,
            memory_check_interval: Duration::from_secs(30),
        }
    }
}

impl PerformanceConfig {
    /// Fill the zero-valued knobs from the host's parallelism.
    pub fn normalized(mut self) -> Self {
        let parallelism = available_parallelism();
        if self.max_workers == 0 {
            self.max_workers = parallelism * 2;
        }
        if self.max_parallelism == 0 {
            self.max_parallelism = parallelism;
        }
        if self.queue_size == 0 {
            self.queue_size = 1000;
        }
        if self.gc_percent == 0 {
            self.gc_percent = 100;
        }
        self
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct MonitorConfig {
    #[serde(deserialize_with = "deserialize_duration")]
    pub interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct HealthConfig {
    #[serde(deserialize_with = "deserialize_duration")]
    pub interval: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WidgetConfig {
    #[serde(rename = "type")]
    pub widget_type: String,
    #[serde(default)]
    pub title: String,
    pub service: String,
    #[serde(default, deserialize_with = "deserialize_opt_duration")]
    pub cache: Option<Duration>,
    #[serde(default = "default_widget_limit")]
    pub limit: usize,
    #[serde(default)]
    pub items: Vec<WidgetItemConfig>,
}

fn default_widget_limit() -> usize {
    10
}

/// One account, channel or repository a feed widget pulls from.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WidgetItemConfig {
    pub id: String,
    pub path: String,
    #[serde(default)]
    pub params: HashMap<String, serde_json::Value>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(raw)?;
        let config = config.normalized();
        config.validate()?;
        Ok(config)
    }

    /// Apply defaults that depend on other sections.
    pub fn normalized(mut self) -> Self {
        self.performance = self.performance.normalized();
        for (name, source) in &self.api_sources {
            if source.rate_limit > 0 {
                self.rate_limit
                    .services
                    .entry(name.clone())
                    .or_insert(source.rate_limit);
            }
        }
        if self.rate_limit.default_limit == 0 {
            self.rate_limit.default_limit = 60;
        }
        if self.rate_limit.window.is_zero() {
            self.rate_limit.window = Duration::from_secs(60);
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, source) in &self.api_sources {
            check_duration(&format!("api source {name} timeout"), source.timeout)?;
            if source.base_url.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "api source {name} has an empty base-url"
                )));
            }
            for fallback in &source.fallbacks {
                if fallback == name {
                    return Err(ConfigError::Invalid(format!(
                        "api source {name} lists itself as a fallback"
                    )));
                }
                if !self.api_sources.contains_key(fallback) {
                    return Err(ConfigError::Invalid(format!(
                        "api source {name} falls back to unknown source {fallback}"
                    )));
                }
            }
        }
        check_duration("server request-timeout", self.server.request_timeout)?;
        check_duration("cache ttl", self.cache.ttl)?;
        check_duration("cache sweep-interval", self.cache.sweep_interval)?;
        check_duration("performance memory-check-interval", self.performance.memory_check_interval)?;
        check_duration("monitor interval", self.monitor.interval)?;
        check_duration("health interval", self.health.interval)?;
        for widget in &self.widgets {
            if let Some(ttl) = widget.cache {
                check_duration(&format!("widget {} cache", widget.title), ttl)?;
            }
            if !self.api_sources.contains_key(&widget.service) {
                return Err(ConfigError::Invalid(format!(
                    "widget {} uses unknown service {}",
                    widget.widget_type, widget.service
                )));
            }
        }
        Ok(())
    }

    pub fn fallbacks_for(&self, service: &str) -> Vec<String> {
        self.api_sources
            .get(service)
            .map(|s| s.fallbacks.clone())
            .unwrap_or_default()
    }
}

// zero timers fail every call or spin; anything past MAX_TTL would overflow deadlines
fn check_duration(what: &str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::Invalid(format!("{what} must be greater than zero")));
    }
    if value > MAX_TTL {
        return Err(ConfigError::Invalid(format!(
            "{what} exceeds the maximum of {} days",
            MAX_TTL.as_secs() / 86_400
        )));
    }
    Ok(())
}

pub fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Parse "250ms", "30s", "5m", "1h" or a bare number of seconds.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let value: u64 = digits.parse().ok()?;
    match unit.trim() {
        "" | "s" => Some(Duration::from_secs(value)),
        "ms" => Some(Duration::from_millis(value)),
        "m" => value.checked_mul(60).map(Duration::from_secs),
        "h" => value.checked_mul(3600).map(Duration::from_secs),
        _ => None,
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Seconds(u64),
    Text(String),
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    match RawDuration::deserialize(deserializer)? {
        RawDuration::Seconds(secs) => Ok(Duration::from_secs(secs)),
        RawDuration::Text(text) => parse_duration(&text)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid duration: {text}"))),
    }
}

fn deserialize_opt_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_duration(deserializer).map(Some)
}
