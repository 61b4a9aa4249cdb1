use crate::http::{FetchError, HttpClient, HttpRequest, HttpResponse, send_with_retry};
use crate::normalize::normalize_relative;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

pub const DEFAULT_MAX_HOPS: usize = 10;

/// Where a URL ends up after following redirects.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub final_url: Url,
    pub hops: usize,
    /// The response that ended the chain.
    pub response: HttpResponse,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("too many redirects after {hops} hops (last: {last})")]
    TooManyRedirects { hops: usize, last: String },
    #[error("{status} redirect to unusable location {location:?}")]
    BadLocation { status: u16, location: String },
    #[error("network error: {0}")]
    Network(#[from] FetchError),
}

/// Follows `Location` headers by hand so hop counting and cycle detection
/// are under our control.
#[derive(Clone)]
pub struct RedirectResolver {
    client: Arc<dyn HttpClient>,
    max_hops: usize,
    timeout: Duration,
    retries: u32,
}

impl RedirectResolver {
    pub fn new(client: Arc<dyn HttpClient>, timeout: Duration) -> Self {
        Self {
            client,
            max_hops: DEFAULT_MAX_HOPS,
            timeout,
            retries: 1,
        }
    }

    pub fn with_max_hops(mut self, max_hops: usize) -> Self {
        self.max_hops = max_hops;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub async fn resolve(&self, url: &Url) -> Result<Resolution, ResolveError> {
        // Per-resolution visited set; unrelated to the scan's own dedup.
        let mut seen = HashSet::new();
        let mut current = url.clone();
        let mut hops = 0;

        loop {
            if !seen.insert(current.as_str().to_string()) {
                debug!("Redirect cycle detected at {}", current);
                return Err(ResolveError::TooManyRedirects {
                    hops,
                    last: current.to_string(),
                });
            }

            let response = self.head_or_get(&current).await?;

            let next = match response.location {
                Some(ref location) if response.is_redirect() => {
                    match normalize_relative(&current, location) {
                        Ok(next) => next,
                        Err(e) => {
                            debug!("{} redirects to {:?}: {}", current, location, e);
                            return Err(ResolveError::BadLocation {
                                status: response.status,
                                location: location.clone(),
                            });
                        }
                    }
                }
                _ => {
                    return Ok(Resolution {
                        final_url: current,
                        hops,
                        response,
                    });
                }
            };

            hops += 1;
            if hops > self.max_hops {
                return Err(ResolveError::TooManyRedirects {
                    hops: hops - 1,
                    last: current.to_string(),
                });
            }

            debug!("{} redirects to {} ({} hops)", current, next, hops);
            current = next;
        }
    }

    /// HEAD first; fall back to GET when the server refuses or fumbles HEAD.
    async fn head_or_get(&self, url: &Url) -> Result<HttpResponse, FetchError> {
        let head = send_with_retry(
            self.client.as_ref(),
            HttpRequest::head(url.clone(), self.timeout),
            self.retries,
        )
        .await;

        match head {
            Ok(response) if !head_is_ambiguous(&response) => Ok(response),
            Ok(response) => {
                debug!("HEAD {} answered {}, retrying with GET", url, response.status);
                self.get(url).await
            }
            Err(FetchError::Connection(reason)) => {
                // Some servers reset the connection on HEAD but serve GET fine.
                debug!("HEAD {} failed ({}), retrying with GET", url, reason);
                self.get(url).await
            }
            Err(e) => Err(e),
        }
    }

    async fn get(&self, url: &Url) -> Result<HttpResponse, FetchError> {
        send_with_retry(
            self.client.as_ref(),
            HttpRequest::get(url.clone(), self.timeout),
            self.retries,
        )
        .await
    }
}

/// Statuses that say more about HEAD support than about the resource.
fn head_is_ambiguous(response: &HttpResponse) -> bool {
    matches!(response.status, 400 | 403 | 404 | 405 | 429 | 500 | 501 | 503)
        || ((300..400).contains(&response.status) && response.location.is_none())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScanConfig;
    use crate::http::ReqwestClient;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    fn resolver() -> RedirectResolver {
        let client = ReqwestClient::new(&ScanConfig::default()).unwrap();
        RedirectResolver::new(Arc::new(client), Duration::from_secs(2))
    }

    fn url(server: &MockServer, p: &str) -> Url {
        Url::parse(&format!("{}{}", server.uri(), p)).unwrap()
    }

    #[tokio::test]
    async fn follows_chain_to_final_url() {
        let mock_server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/a"))
            .respond_with(ResponseTemplate::new(301).insert_header("location", "/b"))
            .mount(&mock_server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/b"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/c"))
            .mount(&mock_server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/c"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let resolution = resolver().resolve(&url(&mock_server, "/a")).await.unwrap();
        assert_eq!(resolution.final_url, url(&mock_server, "/c"));
        assert_eq!(resolution.hops, 2);
        assert_eq!(resolution.response.status, 200);
    }

    #[tokio::test]
    async fn self_redirect_is_a_cycle() {
        let mock_server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/loop"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/loop"))
            .mount(&mock_server)
            .await;

        let result = resolver().resolve(&url(&mock_server, "/loop")).await;
        assert!(matches!(
            result,
            Err(ResolveError::TooManyRedirects { hops: 1, .. })
        ));
        assert_eq!(mock_server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn two_step_cycle_terminates() {
        let mock_server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/ping"))
            .respond_with(ResponseTemplate::new(301).insert_header("location", "/pong"))
            .mount(&mock_server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/pong"))
            .respond_with(ResponseTemplate::new(301).insert_header("location", "/ping"))
            .mount(&mock_server)
            .await;

        let result = resolver().resolve(&url(&mock_server, "/ping")).await;
        assert!(matches!(result, Err(ResolveError::TooManyRedirects { .. })));
    }

    #[tokio::test]
    async fn hop_limit_is_enforced() {
        let mock_server = MockServer::start().await;
        for i in 0..5 {
            Mock::given(method("HEAD"))
                .and(path(format!("/hop{}", i)))
                .respond_with(
                    ResponseTemplate::new(301).insert_header("location", format!("/hop{}", i + 1)),
                )
                .mount(&mock_server)
                .await;
        }
        Mock::given(method("HEAD"))
            .and(path("/hop5"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let limited = resolver().with_max_hops(3);
        let result = limited.resolve(&url(&mock_server, "/hop0")).await;
        assert!(matches!(
            result,
            Err(ResolveError::TooManyRedirects { hops: 3, .. })
        ));

        let resolution = resolver().resolve(&url(&mock_server, "/hop0")).await.unwrap();
        assert_eq!(resolution.hops, 5);
    }

    #[tokio::test]
    async fn falls_back_to_get_when_head_rejected() {
        let mock_server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/nohead"))
            .respond_with(ResponseTemplate::new(405))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/nohead"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let resolution = resolver()
            .resolve(&url(&mock_server, "/nohead"))
            .await
            .unwrap();
        assert_eq!(resolution.response.status, 200);
        assert_eq!(resolution.hops, 0);
    }

    #[tokio::test]
    async fn get_confirms_real_404() {
        let mock_server = MockServer::start().await;
        Mock::given(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let resolution = resolver()
            .resolve(&url(&mock_server, "/missing"))
            .await
            .unwrap();
        assert_eq!(resolution.response.status, 404);

        let methods: Vec<String> = mock_server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .map(|r| r.method.to_string())
            .collect();
        assert_eq!(methods, vec!["HEAD", "GET"]);
    }

    #[tokio::test]
    async fn non_web_location_ends_in_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/ftp"))
            .respond_with(
                ResponseTemplate::new(301).insert_header("location", "ftp://example.com/file"),
            )
            .mount(&mock_server)
            .await;

        let result = resolver().resolve(&url(&mock_server, "/ftp")).await;
        assert_eq!(
            result.unwrap_err(),
            ResolveError::BadLocation {
                status: 301,
                location: "ftp://example.com/file".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn unreachable_host_is_network_error() {
        let result = resolver()
            .resolve(&Url::parse("http://127.0.0.1:1/").unwrap())
            .await;
        assert!(matches!(
            result,
            Err(ResolveError::Network(FetchError::Connection(_)))
        ));
    }
}
