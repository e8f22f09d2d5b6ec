use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{ApiClient, ClientRegistry};
use crate::config::Config;
use crate::error::{ClientError, GatewayError, Result};
use crate::metrics::{Monitor, Rejection, SystemCollector};
use crate::models::{ApiRequest, ApiResponse, Job};
use crate::optimizer::PoolRegistry;
use crate::rate_limit::RateLimiter;

/// Metrics label for requests naming a service with no registered client.
pub const UNKNOWN_SERVICE: &str = "unknown";

/// Child of `parent` that also cancels itself once `timeout` elapses.
pub fn deadline_token(parent: &CancellationToken, timeout: Duration) -> CancellationToken {
    let token = parent.child_token();
    let timer = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = timer.cancelled() => {}
            _ = tokio::time::sleep(timeout) => timer.cancel(),
        }
    });
    token
}

// one upstream call racing the caller's token; >= 400 counts as failure
async fn call_upstream(
    client: &dyn ApiClient,
    req: &ApiRequest,
    cancel: &CancellationToken,
) -> std::result::Result<ApiResponse, ClientError> {
    let resp = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(ClientError::Cancelled),
        resp = client.request(req) => resp?,
    };
    if resp.is_success() {
        Ok(resp)
    } else {
        Err(ClientError::Status(resp.status))
    }
}

/// Routes a named-service request through rate limiting, the service's
/// worker pool and, on failure, its fallback chain.
pub struct Dispatcher {
    clients: Arc<ClientRegistry>,
    limiter: RateLimiter,
    pools: Arc<PoolRegistry>,
    monitor: Arc<Monitor>,
    fallbacks: HashMap<String, Vec<String>>,
    next_job: AtomicU64,
}

impl Dispatcher {
    pub fn new(
        clients: Arc<ClientRegistry>,
        limiter: RateLimiter,
        pools: Arc<PoolRegistry>,
        monitor: Arc<Monitor>,
        fallbacks: HashMap<String, Vec<String>>,
    ) -> Self {
        Self {
            clients,
            limiter,
            pools,
            monitor,
            fallbacks,
            next_job: AtomicU64::new(0),
        }
    }

    /// Wire clients, limiter and pools from configuration. The pool registry
    /// and process memory are registered as monitor collectors.
    pub fn from_config(
        config: &Config,
        monitor: Arc<Monitor>,
    ) -> std::result::Result<Self, ClientError> {
        let clients = Arc::new(ClientRegistry::from_sources(&config.api_sources)?);
        let pools = PoolRegistry::new(config.performance.clone());
        monitor.add_collector(pools.clone());
        monitor.add_collector(Arc::new(SystemCollector::new()));
        let fallbacks = config
            .api_sources
            .keys()
            .map(|name| (name.clone(), config.fallbacks_for(name)))
            .filter(|(_, chain)| !chain.is_empty())
            .collect();
        info!(services = ?clients.names(), "dispatcher ready");
        Ok(Self::new(
            clients,
            RateLimiter::new(config.rate_limit.clone()),
            pools,
            monitor,
            fallbacks,
        ))
    }

    pub fn clients(&self) -> &Arc<ClientRegistry> {
        &self.clients
    }

    pub fn pools(&self) -> &Arc<PoolRegistry> {
        &self.pools
    }

    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn get_client(&self, service: &str) -> Result<Arc<dyn ApiClient>> {
        self.clients
            .get(service)
            .ok_or_else(|| GatewayError::ServiceNotFound(service.to_string()))
    }

    /// Fetch fresh data for `service`, walking the fallback chain once if
    /// the primary path fails upstream. Never consults a cache.
    pub async fn request_with_fallback(
        &self,
        cancel: &CancellationToken,
        service: &str,
        req: &ApiRequest,
    ) -> Result<ApiResponse> {
        let start = Instant::now();
        // unknown names share one label so callers cannot grow the series
        let client = match self.get_client(service) {
            Ok(client) => client,
            Err(err) => {
                self.monitor
                    .record_api_request(UNKNOWN_SERVICE, start.elapsed(), true);
                debug!(service = %service, "no client registered");
                return Err(err);
            }
        };
        let primary = self.request_primary(cancel, service, client, req).await;
        self.monitor
            .record_api_request(service, start.elapsed(), primary.is_err());

        let err = match primary {
            Ok(resp) => return Ok(resp),
            Err(err) => err,
        };
        match err {
            GatewayError::Upstream { .. } | GatewayError::PoolClosed(_) => {
                warn!(service = %service, error = %err, "primary request failed");
            }
            _ => return Err(err),
        }

        self.try_fallbacks(cancel, service, req).await
    }

    async fn request_primary(
        &self,
        cancel: &CancellationToken,
        service: &str,
        client: Arc<dyn ApiClient>,
        req: &ApiRequest,
    ) -> Result<ApiResponse> {
        if !self.limiter.allow(service) {
            self.monitor.record_rejection(service, Rejection::RateLimited);
            warn!(service = %service, "rate limited");
            return Err(GatewayError::RateLimited(service.to_string()));
        }

        let pool = self.pools.get_or_create_pool(service);
        let id = format!("{}-{}", service, self.next_job.fetch_add(1, Ordering::Relaxed));
        let job_req = req.clone();
        let (job, result_rx) = Job::new(id, cancel.clone(), move |token| async move {
            call_upstream(client.as_ref(), &job_req, &token).await
        });
        if let Err(err) = pool.submit(job) {
            if matches!(err, GatewayError::QueueFull(_)) {
                self.monitor.record_rejection(service, Rejection::QueueFull);
                warn!(service = %service, "worker pool queue full");
            }
            return Err(err);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(service = %service, "caller cancelled while waiting on job");
                Err(GatewayError::ContextCancelled(service.to_string()))
            }
            result = result_rx => match result {
                Ok(Ok(resp)) => Ok(resp),
                Ok(Err(ClientError::Cancelled)) => Err(GatewayError::ContextCancelled(service.to_string())),
                Ok(Err(source)) => Err(GatewayError::Upstream {
                    service: service.to_string(),
                    source,
                }),
                Err(_) => Err(GatewayError::PoolClosed(service.to_string())),
            },
        }
    }

    // fallbacks bypass rate limiting and pools, and are never chained further
    async fn try_fallbacks(
        &self,
        cancel: &CancellationToken,
        service: &str,
        req: &ApiRequest,
    ) -> Result<ApiResponse> {
        let chain = self.fallbacks.get(service).map(Vec::as_slice).unwrap_or(&[]);
        let mut attempts = 1;
        for fallback in chain {
            if cancel.is_cancelled() {
                return Err(GatewayError::ContextCancelled(service.to_string()));
            }
            let Some(client) = self.clients.get(fallback) else {
                warn!(service = %service, fallback = %fallback, "fallback client not registered");
                continue;
            };
            attempts += 1;

            let start = Instant::now();
            let result = call_upstream(client.as_ref(), req, cancel).await;
            self.monitor
                .record_api_request(fallback, start.elapsed(), result.is_err());
            match result {
                Ok(resp) => {
                    self.monitor.record_fallback_success(service);
                    info!(service = %service, fallback = %fallback, "served by fallback");
                    return Ok(resp);
                }
                Err(ClientError::Cancelled) => {
                    return Err(GatewayError::ContextCancelled(service.to_string()));
                }
                Err(e) => warn!(service = %service, fallback = %fallback, error = %e, "fallback failed"),
            }
        }
        Err(GatewayError::AllServicesFailed {
            service: service.to_string(),
            attempts,
        })
    }

    pub async fn shutdown(&self) {
        self.monitor.stop();
        self.pools.shutdown().await;
    }
}
