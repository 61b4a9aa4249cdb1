use crate::config::ScopePolicy;
use crate::error::{Result, ScanError};
use serde::{Deserialize, Serialize};
use url::Url;

/// Whether a link belongs to the site being scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkScope {
    Internal,
    External,
}

impl LinkScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkScope::Internal => "internal",
            LinkScope::External => "external",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "internal" => Some(LinkScope::Internal),
            "external" => Some(LinkScope::External),
            _ => None,
        }
    }
}

/// Parse an absolute URL into canonical form.
///
/// The `url` crate already lower-cases scheme and host and drops default
/// ports for http(s); on top of that the fragment is removed and anything
/// that is not an http(s) URL with a host is rejected.
pub fn normalize(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    let parsed = Url::parse(trimmed)
        .map_err(|e| ScanError::InvalidUrl(format!("'{}': {}", trimmed, e)))?;
    canonicalize(parsed)
}

/// Resolve `raw` against `base` and normalize the result.
pub fn normalize_relative(base: &Url, raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    let joined = base
        .join(trimmed)
        .map_err(|e| ScanError::InvalidUrl(format!("'{}': {}", trimmed, e)))?;
    canonicalize(joined)
}

fn canonicalize(mut url: Url) -> Result<Url> {
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ScanError::InvalidUrl(format!(
            "unsupported scheme '{}' in {}",
            url.scheme(),
            url
        )));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(ScanError::InvalidUrl(format!("missing host in {}", url)));
    }
    url.set_fragment(None);
    Ok(url)
}

/// Decides internal vs external against a fixed seed host.
#[derive(Debug, Clone)]
pub struct ScopeClassifier {
    seed_host: String,
    seed_domain: String,
    policy: ScopePolicy,
}

impl ScopeClassifier {
    pub fn new(seed: &Url, policy: ScopePolicy) -> Self {
        let seed_host = seed.host_str().unwrap_or_default().to_string();
        let seed_domain = registrable_domain(&seed_host);
        Self {
            seed_host,
            seed_domain,
            policy,
        }
    }

    pub fn classify(&self, url: &Url) -> LinkScope {
        let Some(host) = url.host_str() else {
            return LinkScope::External;
        };

        let internal = match self.policy {
            ScopePolicy::ExactHost => host == self.seed_host,
            ScopePolicy::Subdomains => {
                host == self.seed_host || host.ends_with(&format!(".{}", self.seed_host))
            }
            ScopePolicy::RegistrableDomain => registrable_domain(host) == self.seed_domain,
        };

        if internal {
            LinkScope::Internal
        } else {
            LinkScope::External
        }
    }
}

/// eTLD+1 from the public suffix list, e.g. `www.example.co.uk` -> `example.co.uk`.
/// Hosts the list knows nothing about (IPs, `localhost`) map to themselves.
pub fn registrable_domain(host: &str) -> String {
    if host.starts_with('[') || host.parse::<std::net::IpAddr>().is_ok() {
        return host.to_string();
    }
    match psl::domain(host.as_bytes()) {
        Some(domain) => String::from_utf8_lossy(domain.as_bytes()).to_string(),
        None => host.to_string(),
    }
}
