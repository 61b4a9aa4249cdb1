use crate::config::ScanConfig;
use crate::error::FailureCause;
use crate::http::{FetchError, HttpClient, HttpRequest, send_with_retry};
use crate::redirect::{RedirectResolver, ResolveError};
use crate::result::LinkCheckResult;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// A fetched page body, ready for link extraction.
#[derive(Debug, Clone)]
pub struct Page {
    pub url: Url,
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
}

/// Reachability checks for single URLs. Never fails: every outcome is folded
/// into a [`LinkCheckResult`].
#[derive(Clone)]
pub struct StatusChecker {
    client: Arc<dyn HttpClient>,
    resolver: RedirectResolver,
    timeout: Duration,
    retries: u32,
    max_body_bytes: usize,
}

impl StatusChecker {
    pub fn new(client: Arc<dyn HttpClient>, config: &ScanConfig) -> Self {
        let resolver = RedirectResolver::new(client.clone(), config.request_timeout())
            .with_max_hops(config.max_redirects)
            .with_retries(config.retries_on_timeout);

        Self {
            client,
            resolver,
            timeout: config.request_timeout(),
            retries: config.retries_on_timeout,
            max_body_bytes: config.max_body_bytes,
        }
    }

    pub async fn check(&self, url: &Url) -> LinkCheckResult {
        match self.resolver.resolve(url).await {
            Ok(resolution) => {
                debug!(
                    "{} -> {} [{}] after {} hops",
                    url, resolution.final_url, resolution.response.status, resolution.hops
                );
                LinkCheckResult::reachable(
                    url.to_string(),
                    resolution.final_url.to_string(),
                    resolution.response.status,
                )
            }
            Err(ResolveError::TooManyRedirects { hops, last }) => {
                debug!("{} gave up after {} redirects at {}", url, hops, last);
                LinkCheckResult::with_error(url.to_string(), FailureCause::RedirectLoop)
            }
            Err(ResolveError::BadLocation { status, location }) => {
                debug!("{} answered {} with unusable location {:?}", url, status, location);
                LinkCheckResult {
                    status_code: Some(status),
                    ..LinkCheckResult::with_error(url.to_string(), FailureCause::RedirectLoop)
                }
            }
            Err(ResolveError::Network(e)) => {
                debug!("{} unreachable: {}", url, e);
                LinkCheckResult::with_error(url.to_string(), e.cause())
            }
        }
    }

    /// GET a page body for extraction. Redirects are not followed here;
    /// callers pass the already-resolved URL.
    pub async fn fetch_page(&self, url: &Url) -> Result<Page, FetchError> {
        let response = send_with_retry(
            self.client.as_ref(),
            HttpRequest::get(url.clone(), self.timeout).with_body(self.max_body_bytes),
            self.retries,
        )
        .await?;

        Ok(Page {
            url: url.clone(),
            status: response.status,
            content_type: response.content_type.unwrap_or_default(),
            body: response.body.unwrap_or_default(),
        })
    }

    /// Follow redirects from `url`, then GET the page they land on.
    pub async fn fetch_resolved_page(&self, url: &Url) -> Result<Page, FailureCause> {
        let target = match self.resolver.resolve(url).await {
            Ok(resolution) => resolution.final_url,
            Err(ResolveError::TooManyRedirects { .. } | ResolveError::BadLocation { .. }) => {
                return Err(FailureCause::RedirectLoop);
            }
            Err(ResolveError::Network(e)) => return Err(e.cause()),
        };
        self.fetch_page(&target).await.map_err(|e| e.cause())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::ReqwestClient;
    use std::time::Instant;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    fn checker(timeout: Duration) -> StatusChecker {
        let config = ScanConfig::default().with_request_timeout(timeout);
        let client = ReqwestClient::new(&config).unwrap();
        StatusChecker::new(Arc::new(client), &config)
    }

    fn url(server: &MockServer, p: &str) -> Url {
        Url::parse(&format!("{}{}", server.uri(), p)).unwrap()
    }

    #[tokio::test]
    async fn healthy_link() {
        let mock_server = MockServer::start().await;
        Mock::given(path("/ok"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let result = checker(Duration::from_secs(2))
            .check(&url(&mock_server, "/ok"))
            .await;
        assert!(!result.is_broken);
        assert_eq!(result.status_code, Some(200));
        assert_eq!(result.error, None);
        assert!(result.checked);
    }

    #[tokio::test]
    async fn not_found_is_broken() {
        let mock_server = MockServer::start().await;
        Mock::given(path("/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let result = checker(Duration::from_secs(2))
            .check(&url(&mock_server, "/gone"))
            .await;
        assert!(result.is_broken);
        assert_eq!(result.status_code, Some(404));
        assert_eq!(result.error, Some(FailureCause::Http4xx));
    }

    #[tokio::test]
    async fn server_error_is_broken() {
        let mock_server = MockServer::start().await;
        Mock::given(path("/boom"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&mock_server)
            .await;

        let result = checker(Duration::from_secs(2))
            .check(&url(&mock_server, "/boom"))
            .await;
        assert!(result.is_broken);
        assert_eq!(result.error, Some(FailureCause::Http5xx));
    }

    #[tokio::test]
    async fn redirect_reports_final_url() {
        let mock_server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/moved"))
            .respond_with(ResponseTemplate::new(301).insert_header("location", "/here"))
            .mount(&mock_server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/here"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let result = checker(Duration::from_secs(2))
            .check(&url(&mock_server, "/moved"))
            .await;
        assert!(!result.is_broken);
        assert_eq!(result.final_url, Some(url(&mock_server, "/here").to_string()));
    }

    #[tokio::test]
    async fn redirect_loop_is_broken() {
        let mock_server = MockServer::start().await;
        Mock::given(path("/loop"))
            .respond_with(ResponseTemplate::new(307).insert_header("location", "/loop"))
            .mount(&mock_server)
            .await;

        let result = checker(Duration::from_secs(2))
            .check(&url(&mock_server, "/loop"))
            .await;
        assert!(result.is_broken);
        assert_eq!(result.error, Some(FailureCause::RedirectLoop));
        assert_eq!(result.status_code, None);
    }

    #[tokio::test]
    async fn redirect_off_the_web_is_broken() {
        let mock_server = MockServer::start().await;
        Mock::given(path("/download"))
            .respond_with(
                ResponseTemplate::new(301).insert_header("location", "ftp://example.com/file"),
            )
            .mount(&mock_server)
            .await;

        let checker = checker(Duration::from_secs(2));
        let target = url(&mock_server, "/download");
        let result = checker.check(&target).await;
        assert!(result.is_broken);
        assert_eq!(result.status_code, Some(301));
        assert_eq!(result.error, Some(FailureCause::RedirectLoop));
        assert_eq!(result.final_url, None);

        assert_eq!(
            checker.fetch_resolved_page(&target).await.unwrap_err(),
            FailureCause::RedirectLoop
        );
    }

    #[tokio::test]
    async fn silent_host_times_out_after_one_retry() {
        let mock_server = MockServer::start().await;
        Mock::given(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&mock_server)
            .await;

        let timeout = Duration::from_millis(300);
        let started = Instant::now();
        let result = checker(timeout).check(&url(&mock_server, "/slow")).await;
        let elapsed = started.elapsed();

        assert!(result.is_broken);
        assert_eq!(result.error, Some(FailureCause::Timeout));
        assert_eq!(mock_server.received_requests().await.unwrap().len(), 2);
        assert!(
            elapsed < timeout * 2 + Duration::from_secs(1),
            "took {:?}",
            elapsed
        );
    }

    #[tokio::test]
    async fn refused_connection_is_broken() {
        let result = checker(Duration::from_secs(2))
            .check(&Url::parse("http://127.0.0.1:1/").unwrap())
            .await;
        assert!(result.is_broken);
        assert_eq!(result.error, Some(FailureCause::Connection));
        assert!(result.is_transport_failure());
    }

    #[tokio::test]
    async fn fetch_page_returns_body() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_bytes(b"<a href='/x'>x</a>".to_vec()),
            )
            .mount(&mock_server)
            .await;

        let page = checker(Duration::from_secs(2))
            .fetch_page(&url(&mock_server, "/page"))
            .await
            .unwrap();
        assert_eq!(page.status, 200);
        assert_eq!(page.content_type, "text/html");
        assert_eq!(page.body, b"<a href='/x'>x</a>");
    }

    #[tokio::test]
    async fn fetch_resolved_page_follows_redirects() {
        let mock_server = MockServer::start().await;
        Mock::given(path("/old"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/new"))
            .mount(&mock_server)
            .await;
        Mock::given(path("/new"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_bytes(b"<p>moved</p>".to_vec()),
            )
            .mount(&mock_server)
            .await;

        let page = checker(Duration::from_secs(2))
            .fetch_resolved_page(&url(&mock_server, "/old"))
            .await
            .unwrap();
        assert_eq!(page.url, url(&mock_server, "/new"));
        assert_eq!(page.body, b"<p>moved</p>");
    }
}
