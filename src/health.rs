use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::ClientRegistry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceHealth {
    pub healthy: bool,
    pub base_url: String,
}

/// Periodically probes every registered client. Purely informational: the
/// dispatcher still routes to services marked unhealthy.
pub struct HealthChecker {
    clients: Arc<ClientRegistry>,
    status: DashMap<String, ServiceHealth>,
}

impl HealthChecker {
    pub fn new(clients: Arc<ClientRegistry>) -> Self {
        Self {
            clients,
            status: DashMap::new(),
        }
    }

    /// Probe every client once, logging status changes.
    pub async fn check_all(&self, cancel: &CancellationToken) {
        for client in self.clients.all() {
            if cancel.is_cancelled() {
                return;
            }
            let healthy = client.is_healthy(cancel).await;
            let previous = self.status.insert(
                client.name().to_string(),
                ServiceHealth {
                    healthy,
                    base_url: client.base_url().to_string(),
                },
            );

            match previous {
                Some(prev) if prev.healthy == healthy => {}
                _ if healthy => info!(service = %client.name(), "service is now healthy"),
                _ => warn!(service = %client.name(), url = %client.base_url(), "service is now unhealthy"),
            }
        }
    }

    pub fn is_healthy(&self, service: &str) -> Option<bool> {
        self.status.get(service).map(|s| s.healthy)
    }

    /// Last known status, ordered by service name.
    pub fn snapshot(&self) -> BTreeMap<String, ServiceHealth> {
        self.status
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Run `check_all` every `every` until `cancel` fires.
    pub fn spawn(self: Arc<Self>, every: Duration, cancel: CancellationToken) {
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_ms = every.as_millis() as u64, "health checker started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => self.check_all(&cancel).await,
                }
            }
            debug!("health checker stopped");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::HttpClient;
    use crate::config::ApiSourceConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn registry_for(server: &MockServer) -> Arc<ClientRegistry> {
        let registry = ClientRegistry::new();
        let config = ApiSourceConfig {
            base_url: server.uri(),
            timeout: Duration::from_secs(2),
            ..ApiSourceConfig::default()
        };
        registry.register(Arc::new(HttpClient::new("weibo", &config).unwrap()));
        Arc::new(registry)
    }

    #[tokio::test]
    async fn test_status_follows_probe() {
        let server = MockServer::start().await;
        let checker = HealthChecker::new(registry_for(&server).await);
        assert_eq!(checker.is_healthy("weibo"), None);

        // nothing mounted yet: wiremock answers 404
        checker.check_all(&CancellationToken::new()).await;
        assert_eq!(checker.is_healthy("weibo"), Some(false));

        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        checker.check_all(&CancellationToken::new()).await;
        assert_eq!(checker.is_healthy("weibo"), Some(true));

        let snapshot = checker.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot["weibo"].base_url, server.uri());
    }

    #[tokio::test]
    async fn test_spawned_loop_stops_on_cancel() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let checker = Arc::new(HealthChecker::new(registry_for(&server).await));
        let cancel = CancellationToken::new();
        Arc::clone(&checker).spawn(Duration::from_millis(10), cancel.clone());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(checker.is_healthy("weibo"), Some(true));
        cancel.cancel();
    }
}
