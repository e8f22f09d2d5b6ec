use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::cache::CacheStore;
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::health::HealthChecker;
use crate::metrics::Monitor;
use crate::widget::{Widget, WidgetLoader, WidgetRegistry};

// app's shared state
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub cache: Arc<CacheStore>,
    pub health: Arc<HealthChecker>,
    pub widgets: Vec<Arc<dyn Widget>>,
    pub loader: WidgetLoader,
    pub request_timeout: Duration, // deadline for one proxied request
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        cache: Arc<CacheStore>,
        widgets: Vec<Arc<dyn Widget>>,
        request_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        let health = Arc::new(HealthChecker::new(Arc::clone(dispatcher.clients())));
        let loader = WidgetLoader::new(Arc::clone(&dispatcher), Arc::clone(&cache), request_timeout);
        Self {
            dispatcher,
            cache,
            health,
            widgets,
            loader,
            request_timeout,
            shutdown,
        }
    }

    /// Wire cache, dispatcher and widgets from configuration. Background
    /// loops are not started; see `spawn_background`.
    pub async fn from_config(
        config: &Config,
        shutdown: CancellationToken,
    ) -> Result<Arc<Self>, Box<dyn Error>> {
        let monitor = Arc::new(Monitor::new());
        let cache = Arc::new(CacheStore::from_config(&config.cache).await?);
        monitor.add_collector(cache.clone());

        let dispatcher = Arc::new(Dispatcher::from_config(config, monitor)?);
        dispatcher
            .pools()
            .add_relief_hook(Arc::new(CacheStore::relief_hook(&cache)));

        let widgets = WidgetRegistry::default().build_all(&config.widgets)?;
        Ok(Arc::new(Self::new(
            dispatcher,
            cache,
            widgets,
            config.server.request_timeout,
            shutdown,
        )))
    }

    /// Start the metrics monitor and health checker; both stop on shutdown.
    pub fn spawn_background(&self, monitor_every: Duration, health_every: Duration) {
        self.dispatcher
            .monitor()
            .start(&self.shutdown, monitor_every);
        Arc::clone(&self.health).spawn(health_every, self.shutdown.clone());
    }
}
