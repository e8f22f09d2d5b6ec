use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Url;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::ApiSourceConfig;
use crate::error::ClientError;
use crate::models::{ApiRequest, ApiResponse};

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// What the dispatcher needs from an upstream integration.
#[async_trait]
pub trait ApiClient: Send + Sync {
    fn name(&self) -> &str;

    fn base_url(&self) -> &str;

    /// Execute one request. Any HTTP status is a transport success.
    async fn request(&self, req: &ApiRequest) -> Result<ApiResponse, ClientError>;

    async fn is_healthy(&self, cancel: &CancellationToken) -> bool {
        let probe = ApiRequest::get("/health").with_timeout(HEALTH_TIMEOUT);
        tokio::select! {
            _ = cancel.cancelled() => false,
            result = self.request(&probe) => matches!(result, Ok(resp) if resp.is_success()),
        }
    }
}

/// reqwest-backed client for one configured api source.
pub struct HttpClient {
    name: String,
    base_url: String,
    timeout: Duration,
    headers: HashMap<String, String>,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new(name: impl Into<String>, config: &ApiSourceConfig) -> Result<Self, ClientError> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        Url::parse(&base_url).map_err(|e| ClientError::InvalidUrl(format!("{base_url}: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ClientError::from)?;
        Ok(Self {
            name: name.into(),
            base_url,
            timeout: config.timeout,
            headers: config.headers.clone(),
            token: config.token.clone(),
            client,
        })
    }

    // path is appended to the base url; absolute urls pass through
    fn build_url(
        &self,
        path: &str,
        params: &HashMap<String, serde_json::Value>,
    ) -> Result<Url, ClientError> {
        let raw = if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        };
        let mut url = Url::parse(&raw).map_err(|e| ClientError::InvalidUrl(format!("{raw}: {e}")))?;
        if !params.is_empty() {
            let mut keys: Vec<_> = params.keys().collect();
            keys.sort();
            let mut query = url.query_pairs_mut();
            for key in keys {
                let value = match &params[key] {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                query.append_pair(key, &value);
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl ApiClient for HttpClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn request(&self, req: &ApiRequest) -> Result<ApiResponse, ClientError> {
        let url = self.build_url(&req.path, &req.params)?;
        let method = reqwest::Method::from_bytes(req.method.to_uppercase().as_bytes())
            .map_err(|_| ClientError::InvalidMethod(req.method.clone()))?;
        let timeout = req.timeout().unwrap_or(self.timeout);

        let mut builder = self.client.request(method, url.clone()).timeout(timeout);
        for (key, value) in self.headers.iter().chain(req.headers.iter()) {
            builder = builder.header(key, value);
        }
        if let Some(token) = &self.token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(body) = &req.body {
            builder = builder
                .header(CONTENT_TYPE, "application/json")
                .body(serde_json::to_vec(body)?);
        }

        let start = Instant::now();
        let resp = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ClientError::Timeout(timeout)
            } else {
                ClientError::from(e)
            }
        })?;
        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .fold(HashMap::new(), |mut acc, (k, v)| {
                acc.entry(k).or_insert(v);
                acc
            });
        let body = resp.bytes().await?.to_vec();
        let duration = start.elapsed();
        debug!(service = %self.name, url = %url, status, elapsed_ms = duration.as_millis() as u64, "upstream responded");

        Ok(ApiResponse {
            status,
            headers,
            body,
            duration,
        })
    }
}

/// Name to client lookup; one live client per name.
#[derive(Default)]
pub struct ClientRegistry {
    clients: DashMap<String, Arc<dyn ApiClient>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_sources(sources: &HashMap<String, ApiSourceConfig>) -> Result<Self, ClientError> {
        let registry = Self::new();
        for (name, source) in sources {
            registry.register(Arc::new(HttpClient::new(name.clone(), source)?));
        }
        Ok(registry)
    }

    /// Register under the client's own name, replacing any previous client.
    pub fn register(&self, client: Arc<dyn ApiClient>) {
        self.clients.insert(client.name().to_string(), client);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ApiClient>> {
        self.clients.get(name).map(|c| Arc::clone(c.value()))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clients.iter().map(|c| c.key().clone()).collect();
        names.sort();
        names
    }

    pub fn all(&self) -> Vec<Arc<dyn ApiClient>> {
        self.clients.iter().map(|c| Arc::clone(c.value())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn setup(token: Option<&str>) -> (MockServer, HttpClient) {
        let server = MockServer::start().await;
        let config = ApiSourceConfig {
            base_url: format!("{}/api/v5/", server.uri()),
            headers: HashMap::from([("User-Agent".to_string(), "feed-gateway".to_string())]),
            token: token.map(str::to_string),
            timeout: Duration::from_secs(2),
            ..ApiSourceConfig::default()
        };
        let client = HttpClient::new("gitee", &config).unwrap();
        (server, client)
    }

    #[tokio::test]
    async fn test_request_builds_url_headers_and_query() {
        let (server, client) = setup(Some("secret")).await;
        Mock::given(method("GET"))
            .and(path("/api/v5/users/rust/repos"))
            .and(query_param("per_page", "5"))
            .and(query_param("sort", "updated"))
            .and(header("user-agent", "feed-gateway"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-total", "12")
                    .set_body_string(r#"[{"name":"repo"}]"#),
            )
            .mount(&server)
            .await;

        let req = ApiRequest::get("/users/rust/repos")
            .with_param("per_page", 5)
            .with_param("sort", "updated");
        let resp = client.request(&req).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.headers.get("x-total").map(String::as_str), Some("12"));
        let body: serde_json::Value = resp.json().unwrap();
        assert_eq!(body[0]["name"], "repo");
    }

    #[tokio::test]
    async fn test_error_status_is_returned_not_raised() {
        let (server, client) = setup(None).await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let resp = client.request(&ApiRequest::get("/anything")).await.unwrap();
        assert_eq!(resp.status, 503);
        assert!(!resp.is_success());
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let (server, client) = setup(None).await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;
        let req = ApiRequest::get("/slow").with_timeout(Duration::from_millis(50));
        let err = client.request(&req).await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout(t) if t == Duration::from_millis(50)));
    }

    #[tokio::test]
    async fn test_post_sends_json_body() {
        let (server, client) = setup(None).await;
        Mock::given(method("POST"))
            .and(path("/api/v5/search"))
            .and(header("content-type", "application/json"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;
        let mut req = ApiRequest::get("search");
        req.method = "post".to_string();
        req.body = Some(serde_json::json!({"q": "tokio"}));
        assert_eq!(client.request(&req).await.unwrap().status, 201);
    }

    #[tokio::test]
    async fn test_health_probe() {
        let (server, client) = setup(None).await;
        Mock::given(method("GET"))
            .and(path("/api/v5/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        assert!(client.is_healthy(&CancellationToken::new()).await);

        let cancelled = CancellationToken::new();
        cancelled.cancel();
        assert!(!client.is_healthy(&cancelled).await);
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let config = ApiSourceConfig {
            base_url: "not a url".to_string(),
            ..ApiSourceConfig::default()
        };
        assert!(matches!(
            HttpClient::new("broken", &config),
            Err(ClientError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_registry_from_sources() {
        let sources = HashMap::from([
            (
                "zhihu".to_string(),
                ApiSourceConfig {
                    base_url: "https://www.zhihu.com".to_string(),
                    ..ApiSourceConfig::default()
                },
            ),
            (
                "douyu".to_string(),
                ApiSourceConfig {
                    base_url: "https://open.douyucdn.cn".to_string(),
                    ..ApiSourceConfig::default()
                },
            ),
        ]);
        let registry = ClientRegistry::from_sources(&sources).unwrap();
        assert_eq!(registry.names(), vec!["douyu", "zhihu"]);
        assert_eq!(registry.get("zhihu").unwrap().base_url(), "https://www.zhihu.com");
        assert!(registry.get("weibo").is_none());
    }
}
