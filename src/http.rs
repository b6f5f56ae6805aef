//! Injectable HTTP collaborator
//!
//! Adapters talk to a narrow [`HttpClient`] trait instead of a concrete
//! client: non-2xx statuses are normal results, only transport-level failures
//! (DNS, connect, timeout) are errors. Header keys are lowercased so adapters
//! can read vendor headers without case games.

use crate::error::ProviderError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: &'static str,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET",
            url: url.into(),
            headers: Vec::new(),
            body: None,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self {
            method: "POST",
            url: url.into(),
            headers: Vec::new(),
            body: None,
            timeout: Duration::from_secs(15),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn json_body(self, value: &serde_json::Value) -> Self {
        self.header("Content-Type", "application/json")
            .body(value.to_string().into_bytes())
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
    /// Response headers with lowercased keys.
    pub headers: HashMap<String, String>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_auth_error(&self) -> bool {
        self.status == 401 || self.status == 403
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ProviderError> {
        serde_json::from_slice(&self.body).map_err(|_| ProviderError::InvalidResponse)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ProviderError>;
}

/// Production client backed by `reqwest`.
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .user_agent("QuotaBar/0.1")
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ProviderError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?
            .to_vec();

        Ok(HttpResponse {
            status,
            body,
            headers,
        })
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted HTTP client for adapter tests. Routes are matched by URL
    /// substring in registration order; unknown URLs get a 404. A route with
    /// a queued sequence serves each response once, then repeats the last.
    pub struct MockHttpClient {
        routes: Mutex<Vec<(String, VecDeque<HttpResponse>)>>,
        pub request_log: Mutex<Vec<HttpRequest>>,
    }

    impl MockHttpClient {
        pub fn new() -> Self {
            Self {
                routes: Mutex::new(Vec::new()),
                request_log: Mutex::new(Vec::new()),
            }
        }

        pub fn json_response(status: u16, body: serde_json::Value) -> HttpResponse {
            HttpResponse {
                status,
                body: body.to_string().into_bytes(),
                headers: HashMap::new(),
            }
        }

        pub fn set_json(&self, url_fragment: &str, status: u16, body: serde_json::Value) {
            self.set_sequence(url_fragment, vec![Self::json_response(status, body)]);
        }

        pub fn set_response(&self, url_fragment: &str, response: HttpResponse) {
            self.set_sequence(url_fragment, vec![response]);
        }

        pub fn set_sequence(&self, url_fragment: &str, responses: Vec<HttpResponse>) {
            self.routes
                .lock()
                .unwrap()
                .push((url_fragment.to_string(), responses.into()));
        }

        pub fn requests_to(&self, url_fragment: &str) -> usize {
            self.request_log
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.url.contains(url_fragment))
                .count()
        }
    }

    #[async_trait]
    impl HttpClient for MockHttpClient {
        async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ProviderError> {
            self.request_log.lock().unwrap().push(request.clone());

            let mut routes = self.routes.lock().unwrap();
            for (fragment, queue) in routes.iter_mut() {
                if request.url.contains(fragment.as_str()) {
                    let response = if queue.len() > 1 {
                        queue.pop_front().expect("non-empty queue")
                    } else {
                        queue.front().expect("non-empty queue").clone()
                    };
                    return Ok(response);
                }
            }
            Ok(HttpResponse {
                status: 404,
                body: Vec::new(),
                headers: HashMap::new(),
            })
        }
    }
}
