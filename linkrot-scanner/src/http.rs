use crate::config::ScanConfig;
use crate::error::{FailureCause, Result, ScanError};
use async_trait::async_trait;
use reqwest::Client;
use std::error::Error as StdError;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Head,
    Get,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Head => "HEAD",
            Method::Get => "GET",
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub timeout: Duration,
    /// Read at most this many body bytes. `None` skips the body entirely.
    pub body_limit: Option<usize>,
}

impl HttpRequest {
    pub fn head(url: Url, timeout: Duration) -> Self {
        Self {
            method: Method::Head,
            url,
            timeout,
            body_limit: None,
        }
    }

    pub fn get(url: Url, timeout: Duration) -> Self {
        Self {
            method: Method::Get,
            url,
            timeout,
            body_limit: None,
        }
    }

    pub fn with_body(mut self, limit: usize) -> Self {
        self.body_limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub location: Option<String>,
    pub content_type: Option<String>,
    pub body: Option<Vec<u8>>,
}

impl HttpResponse {
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status) && self.location.is_some()
    }
}

/// Transport-level failure of one request attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("DNS resolution failed: {0}")]
    Dns(String),
    #[error("TLS failure: {0}")]
    Tls(String),
    #[error("connection failed: {0}")]
    Connection(String),
}

impl FetchError {
    pub fn cause(&self) -> FailureCause {
        match self {
            FetchError::Timeout => FailureCause::Timeout,
            FetchError::Dns(_) => FailureCause::Dns,
            FetchError::Tls(_) => FailureCause::Tls,
            FetchError::Connection(_) => FailureCause::Connection,
        }
    }
}

/// The network capability the engine needs. Implementations must not follow
/// redirects themselves.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn send(&self, request: HttpRequest) -> std::result::Result<HttpResponse, FetchError>;
}

/// Send a request, repeating it after a timeout up to `retries` more times.
/// Any other failure is returned immediately.
pub async fn send_with_retry(
    client: &dyn HttpClient,
    request: HttpRequest,
    retries: u32,
) -> std::result::Result<HttpResponse, FetchError> {
    let mut attempt = 0;
    loop {
        match client.send(request.clone()).await {
            Err(FetchError::Timeout) if attempt < retries => {
                attempt += 1;
                debug!(
                    "{} {} timed out, retrying ({}/{})",
                    request.method.as_str(),
                    request.url,
                    attempt,
                    retries
                );
            }
            other => return other,
        }
    }
}

/// `HttpClient` backed by a pooled reqwest client.
#[derive(Clone)]
pub struct ReqwestClient {
    client: Client,
}

impl ReqwestClient {
    pub fn new(config: &ScanConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.request_timeout())
            .pool_max_idle_per_host(config.workers.max(1))
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ScanError::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    async fn execute(&self, request: &HttpRequest) -> reqwest::Result<HttpResponse> {
        let builder = match request.method {
            Method::Head => self.client.head(request.url.clone()),
            Method::Get => self.client.get(request.url.clone()),
        };

        let mut response = builder.timeout(request.timeout).send().await?;

        let status = response.status().as_u16();
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let body = match request.body_limit {
            Some(limit) => {
                let mut body = Vec::new();
                while let Some(chunk) = response.chunk().await? {
                    let remaining = limit.saturating_sub(body.len());
                    body.extend_from_slice(&chunk[..chunk.len().min(remaining)]);
                    if body.len() >= limit {
                        break;
                    }
                }
                Some(body)
            }
            None => None,
        };

        Ok(HttpResponse {
            status,
            location,
            content_type,
            body,
        })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn send(&self, request: HttpRequest) -> std::result::Result<HttpResponse, FetchError> {
        debug!("{} {}", request.method.as_str(), request.url);
        self.execute(&request).await.map_err(classify_reqwest_error)
    }
}

/// Map a reqwest failure onto the transport taxonomy. reqwest only exposes
/// timeouts and connect failures as kinds, so DNS and TLS are recognised
/// from the error's source chain.
pub fn classify_reqwest_error(error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        return FetchError::Timeout;
    }

    // The URL is part of the message and must not be matched against.
    let error = error.without_url();
    let chain = error_chain(&error);
    let lowered = chain.to_lowercase();

    if lowered.contains("timed out") || lowered.contains("timeout") {
        FetchError::Timeout
    } else if lowered.contains("dns error")
        || lowered.contains("failed to lookup address")
        || lowered.contains("name or service not known")
        || lowered.contains("no such host")
    {
        FetchError::Dns(chain)
    } else if lowered.contains("certificate")
        || lowered.contains("tls")
        || lowered.contains("ssl")
        || lowered.contains("handshake")
    {
        FetchError::Tls(chain)
    } else {
        FetchError::Connection(chain)
    }
}

fn error_chain(error: &(dyn StdError + 'static)) -> String {
    let mut parts = vec![error.to_string()];
    let mut source = error.source();
    while let Some(inner) = source {
        parts.push(inner.to_string());
        source = inner.source();
    }
    parts.join(": ")
}
