//! HTTP collaborator.
//!
//! The downloader only ever needs a single GET with a priority hint, so the
//! seam is one method. Cancellation is dropping the returned future.

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// Lowest number is the most urgent.
pub const DEFAULT_PRIORITY: u8 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub method: String,
    pub priority: u8,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_string(),
            priority: DEFAULT_PRIORITY,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status_code: u16,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status_code: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status_code,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Transport failures are reported as [`ErrorKind::Network`](crate::ErrorKind::Network).
    /// A response with any status code is a successful request.
    async fn perform_request(&self, request: HttpRequest) -> Result<HttpResponse>;
}

pub type HttpClientHandle = Arc<dyn HttpClient>;

#[cfg(feature = "reqwest")]
pub use self::reqwest_client::ReqwestHttpClient;

#[cfg(feature = "reqwest")]
mod reqwest_client {
    use super::{HttpClient, HttpRequest, HttpResponse};
    use crate::error::{ErrorKind, Result};
    use async_trait::async_trait;
    use exn::ResultExt;
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(60);

    /// [`HttpClient`] backed by a shared `reqwest` connection pool.
    ///
    /// `reqwest` has no notion of request priority, so the hint is ignored.
    #[derive(Debug, Clone)]
    pub struct ReqwestHttpClient {
        client: reqwest::Client,
    }

    impl ReqwestHttpClient {
        pub fn new() -> Result<Self> {
            let client = reqwest::Client::builder()
                .timeout(TIMEOUT)
                .build()
                .or_raise(|| ErrorKind::Network("failed to build HTTP client".to_string()))?;
            Ok(Self { client })
        }

        pub fn with_client(client: reqwest::Client) -> Self {
            Self { client }
        }
    }

    #[async_trait]
    impl HttpClient for ReqwestHttpClient {
        #[tracing::instrument(level = "debug", skip(self), fields(url = %request.url))]
        async fn perform_request(&self, request: HttpRequest) -> Result<HttpResponse> {
            let method = reqwest::Method::from_bytes(request.method.as_bytes())
                .or_raise(|| ErrorKind::InvalidUrl(format!("unsupported method {}", request.method)))?;
            let response = self
                .client
                .request(method, &request.url)
                .send()
                .await
                .or_raise(|| ErrorKind::Network(format!("request to {} failed", request.url)))?;
            let status_code = response.status().as_u16();
            let body = response
                .bytes()
                .await
                .or_raise(|| ErrorKind::Network(format!("failed to read body of {}", request.url)))?;
            Ok(HttpResponse { status_code, body })
        }
    }
}

#[cfg(any(test, feature = "mock"))]
pub use self::mock::MockHttpClient;

#[cfg(any(test, feature = "mock"))]
mod mock {
    use super::{HttpClient, HttpRequest, HttpResponse};
    use crate::error::{ErrorKind, Result};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::HashMap;
    use std::sync::{Mutex, PoisonError};
    use tokio::sync::watch;

    #[derive(Debug, Clone)]
    enum Reply {
        Response(HttpResponse),
        TransportError,
    }

    /// Canned responses keyed by URL; unknown URLs answer `404`.
    ///
    /// A client created with [`MockHttpClient::held`] parks every request until
    /// [`MockHttpClient::release`] is called.
    #[derive(Debug)]
    pub struct MockHttpClient {
        replies: Mutex<HashMap<String, Reply>>,
        requests: Mutex<Vec<HttpRequest>>,
        gate: watch::Sender<bool>,
    }

    impl Default for MockHttpClient {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MockHttpClient {
        pub fn new() -> Self {
            Self {
                replies: Mutex::new(HashMap::new()),
                requests: Mutex::new(Vec::new()),
                gate: watch::Sender::new(true),
            }
        }

        pub fn held() -> Self {
            Self {
                gate: watch::Sender::new(false),
                ..Self::new()
            }
        }

        pub fn release(&self) {
            self.gate.send_replace(true);
        }

        pub fn respond(&self, url: impl Into<String>, status_code: u16, body: impl Into<Bytes>) {
            self.replies
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(url.into(), Reply::Response(HttpResponse::new(status_code, body)));
        }

        pub fn fail(&self, url: impl Into<String>) {
            self.replies
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(url.into(), Reply::TransportError);
        }

        pub fn request_count(&self, url: &str) -> usize {
            self.requests
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .filter(|request| request.url == url)
                .count()
        }

        pub fn total_requests(&self) -> usize {
            self.requests.lock().unwrap_or_else(PoisonError::into_inner).len()
        }
    }

    #[async_trait]
    impl HttpClient for MockHttpClient {
        async fn perform_request(&self, request: HttpRequest) -> Result<HttpResponse> {
            self.requests
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(request.clone());
            // The sender lives as long as `self`, so waiting cannot fail.
            let _ = self.gate.subscribe().wait_for(|open| *open).await;
            let reply = self
                .replies
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&request.url)
                .cloned();
            match reply {
                Some(Reply::Response(response)) => Ok(response),
                Some(Reply::TransportError) => {
                    exn::bail!(ErrorKind::Network(format!("connection to {} reset", request.url)))
                },
                None => Ok(HttpResponse::new(404, Bytes::new())),
            }
        }
    }
}
