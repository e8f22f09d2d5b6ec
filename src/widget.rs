use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::{CacheStore, make_cache_key};
use crate::config::WidgetConfig;
use crate::dispatcher::{Dispatcher, deadline_token};
use crate::error::{ConfigError, GatewayError, Result};
use crate::models::ApiRequest;

/// A dashboard tile that knows how to fetch its own data.
#[async_trait]
pub trait Widget: Send + Sync {
    fn widget_type(&self) -> &str;

    fn title(&self) -> &str;

    /// Stable key for this widget's cached payload.
    fn cache_key(&self) -> String;

    /// `None` uses the cache's default ttl.
    fn cache_ttl(&self) -> Option<Duration>;

    async fn load(&self, dispatcher: &Dispatcher, cancel: &CancellationToken) -> Result<Value>;
}

/// Pulls every configured item from one service and returns up to `limit`.
pub struct FeedWidget {
    config: WidgetConfig,
}

impl FeedWidget {
    pub fn new(config: WidgetConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Widget for FeedWidget {
    fn widget_type(&self) -> &str {
        &self.config.widget_type
    }

    fn title(&self) -> &str {
        &self.config.title
    }

    fn cache_key(&self) -> String {
        let limit = self.config.limit.to_string();
        let mut parts = vec![
            self.config.widget_type.as_str(),
            self.config.service.as_str(),
            self.config.title.as_str(),
            limit.as_str(),
        ];
        parts.extend(self.config.items.iter().map(|item| item.id.as_str()));
        make_cache_key(&parts)
    }

    fn cache_ttl(&self) -> Option<Duration> {
        self.config.cache
    }

    async fn load(&self, dispatcher: &Dispatcher, cancel: &CancellationToken) -> Result<Value> {
        let service = &self.config.service;
        let mut items = Vec::with_capacity(self.config.items.len());
        let mut last_err = None;

        for item in &self.config.items {
            if cancel.is_cancelled() {
                last_err = Some(GatewayError::ContextCancelled(service.clone()));
                break;
            }
            let req = ApiRequest {
                params: item.params.clone(),
                ..ApiRequest::get(&item.path)
            };
            let resp = match dispatcher.request_with_fallback(cancel, service, &req).await {
                Ok(resp) => resp,
                Err(e) => {
                    // skip the item, keep the rest
                    warn!(service = %service, item = %item.id, error = %e, "widget item failed");
                    last_err = Some(e);
                    continue;
                }
            };
            match resp.json::<Value>() {
                Ok(data) => items.push(json!({ "id": item.id, "data": data })),
                Err(e) => warn!(service = %service, item = %item.id, error = %e, "widget item is not json"),
            }
        }

        if items.is_empty() {
            if let Some(err) = last_err {
                return Err(err);
            }
        }
        items.truncate(self.config.limit);
        Ok(json!({
            "title": self.config.title,
            "service": service,
            "items": items,
        }))
    }
}

/// What a widget endpoint returns for one widget.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WidgetData {
    Ready {
        widget: String,
        title: String,
        cached: bool,
        data: Value,
    },
    NoData {
        widget: String,
        title: String,
    },
}

/// Cache-first widget loading under a per-load deadline.
pub struct WidgetLoader {
    dispatcher: Arc<Dispatcher>,
    cache: Arc<CacheStore>,
    timeout: Duration,
}

impl WidgetLoader {
    pub fn new(dispatcher: Arc<Dispatcher>, cache: Arc<CacheStore>, timeout: Duration) -> Self {
        Self {
            dispatcher,
            cache,
            timeout,
        }
    }

    /// Serve from cache when possible, otherwise load and cache the result.
    /// Load failures degrade to `NoData` instead of an error.
    pub async fn load(&self, widget: &dyn Widget, cancel: &CancellationToken) -> WidgetData {
        let key = widget.cache_key();
        match self.cache.get::<Value>(&key).await {
            Ok(data) => {
                debug!(widget = %widget.widget_type(), title = %widget.title(), "widget served from cache");
                return WidgetData::Ready {
                    widget: widget.widget_type().to_string(),
                    title: widget.title().to_string(),
                    cached: true,
                    data,
                };
            }
            Err(e) if e.is_miss() => {}
            Err(e) => warn!(widget = %widget.widget_type(), error = %e, "widget cache read failed"),
        }

        let start = Instant::now();
        let deadline = deadline_token(cancel, self.timeout);
        let result = widget.load(&self.dispatcher, &deadline).await;
        deadline.cancel();
        self.dispatcher
            .monitor()
            .record_widget_load(widget.widget_type(), start.elapsed(), result.is_err());

        match result {
            Ok(data) => {
                if let Err(e) = self.cache.set(&key, &data, widget.cache_ttl()).await {
                    warn!(widget = %widget.widget_type(), error = %e, "failed to cache widget data");
                }
                WidgetData::Ready {
                    widget: widget.widget_type().to_string(),
                    title: widget.title().to_string(),
                    cached: false,
                    data,
                }
            }
            Err(e) => {
                warn!(widget = %widget.widget_type(), title = %widget.title(), error = %e, "widget load failed");
                WidgetData::NoData {
                    widget: widget.widget_type().to_string(),
                    title: widget.title().to_string(),
                }
            }
        }
    }

    /// Load every widget concurrently, preserving order.
    pub async fn load_all(
        &self,
        widgets: &[Arc<dyn Widget>],
        cancel: &CancellationToken,
    ) -> Vec<WidgetData> {
        futures::future::join_all(widgets.iter().map(|w| self.load(w.as_ref(), cancel))).await
    }
}

pub type WidgetFactory = fn(WidgetConfig) -> Arc<dyn Widget>;

fn feed_widget(config: WidgetConfig) -> Arc<dyn Widget> {
    Arc::new(FeedWidget::new(config))
}

/// Maps a configured widget type to its constructor.
pub struct WidgetRegistry {
    factories: HashMap<String, WidgetFactory>,
}

impl Default for WidgetRegistry {
    fn default() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register("feed", feed_widget);
        registry
    }
}

impl WidgetRegistry {
    pub fn register(&mut self, widget_type: impl Into<String>, factory: WidgetFactory) {
        self.factories.insert(widget_type.into(), factory);
    }

    pub fn build(&self, config: &WidgetConfig) -> std::result::Result<Arc<dyn Widget>, ConfigError> {
        let factory = self.factories.get(&config.widget_type).ok_or_else(|| {
            ConfigError::Invalid(format!("unknown widget type: {}", config.widget_type))
        })?;
        Ok(factory(config.clone()))
    }

    pub fn build_all(
        &self,
        configs: &[WidgetConfig],
    ) -> std::result::Result<Vec<Arc<dyn Widget>>, ConfigError> {
        configs.iter().map(|config| self.build(config)).collect()
    }
}
