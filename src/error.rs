use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GatewayError>;

/// Errors surfaced by the request dispatcher.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No client is registered under the requested name
    #[error("service client not found: {0}")]
    ServiceNotFound(String),

    /// The service's token bucket is empty
    #[error("rate limit exceeded for service: {0}")]
    RateLimited(String),

    /// The service's worker pool queue is at capacity
    #[error("job queue is full for service: {0}")]
    QueueFull(String),

    /// The caller's token was cancelled before a result arrived
    #[error("request cancelled for service: {0}")]
    ContextCancelled(String),

    /// The worker pool shut down before the job produced a result
    #[error("worker pool closed for service: {0}")]
    PoolClosed(String),

    #[error("upstream failure from {service}: {source}")]
    Upstream {
        service: String,
        #[source]
        source: ClientError,
    },

    #[error("all services failed for: {service} (tried {attempts})")]
    AllServicesFailed { service: String, attempts: usize },
}

impl GatewayError {
    /// Stable label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::ServiceNotFound(_) => "not_found",
            GatewayError::RateLimited(_) => "rate_limited",
            GatewayError::QueueFull(_) => "queue_full",
            GatewayError::ContextCancelled(_) => "cancelled",
            GatewayError::PoolClosed(_) => "pool_closed",
            GatewayError::Upstream { .. } => "upstream",
            GatewayError::AllServicesFailed { .. } => "all_failed",
        }
    }

    /// Throttling outcomes callers should treat as "retry later".
    pub fn is_backpressure(&self) -> bool {
        matches!(
            self,
            GatewayError::RateLimited(_) | GatewayError::QueueFull(_)
        )
    }
}

/// Errors produced by an upstream client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("invalid method: {0}")]
    InvalidMethod(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("upstream returned status {0}")]
    Status(u16),

    #[error("failed to encode request body: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Transport(err.to_string())
    }
}

/// Errors produced by cache backends.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Missing or expired key
    #[error("cache miss: {0}")]
    NotFound(String),

    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache backend error: {0}")]
    Backend(String),
}

impl CacheError {
    pub fn is_miss(&self) -> bool {
        matches!(self, CacheError::NotFound(_))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
