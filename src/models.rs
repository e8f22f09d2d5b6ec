use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

// Generic upstream request, shared by every provider client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiRequest {
    #[serde(default = "default_method")]
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub params: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
    // per-request timeout in milliseconds, overrides the client's default
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: default_method(),
            path: path.into(),
            headers: HashMap::new(),
            params: HashMap::new(),
            body: None,
            timeout_ms: None,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

// Generic upstream response
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub duration: Duration,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        self.status < 400
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

pub type JobFn<T> = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, T> + Send>;

// Unit of work for a worker pool - the result goes back on a one-time channel
pub struct Job<T> {
    pub id: String,
    pub cancel: CancellationToken,
    pub task: JobFn<T>,
    pub respond_to: oneshot::Sender<T>,
}

impl<T: Send + 'static> Job<T> {
    /// Build a job and the receiver its result will arrive on.
    pub fn new<F, Fut>(
        id: impl Into<String>,
        cancel: CancellationToken,
        task: F,
    ) -> (Self, oneshot::Receiver<T>)
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (respond_to, rx) = oneshot::channel();
        let job = Job {
            id: id.into(),
            cancel,
            task: Box::new(move |token| Box::pin(task(token))),
            respond_to,
        };
        (job, rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_deserializes_with_defaults() {
        let req: ApiRequest = serde_json::from_str(r#"{"path": "/api/v5/repos"}"#).unwrap();
        assert_eq!(req.method, "GET");
        assert!(req.params.is_empty());
        assert_eq!(req.timeout(), None);

        let req = req.with_timeout(Duration::from_millis(1500));
        assert_eq!(req.timeout(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_response_status_judgement() {
        let mut resp = ApiResponse {
            status: 200,
            headers: HashMap::new(),
            body: br#"{"ok":true}"#.to_vec(),
            duration: Duration::ZERO,
        };
        assert!(resp.is_success());
        let value: serde_json::Value = resp.json().unwrap();
        assert_eq!(value["ok"], true);

        resp.status = 429;
        assert!(!resp.is_success());
    }
}
