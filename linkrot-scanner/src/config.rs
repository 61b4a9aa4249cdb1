use crate::error::{Result, ScanError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_MAX_LINKS: usize = 1000;
pub const DEFAULT_USER_AGENT: &str = concat!("linkrot/", env!("CARGO_PKG_VERSION"));

/// How far a scan reaches beyond the seed page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlMode {
    /// Check the seed URL only.
    SingleLink,
    /// Check every link found on the seed page (and, with auto-follow, on internal pages).
    AllLinks,
}

impl CrawlMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlMode::SingleLink => "single_link",
            CrawlMode::AllLinks => "all_links",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "single" | "single_link" => Some(CrawlMode::SingleLink),
            "all" | "all_links" => Some(CrawlMode::AllLinks),
            _ => None,
        }
    }
}

/// Rule deciding whether a host belongs to the seed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopePolicy {
    /// Host must equal the seed host.
    #[default]
    ExactHost,
    /// Seed host or any of its subdomains.
    Subdomains,
    /// Same registrable domain (eTLD+1) as the seed.
    RegistrableDomain,
}

impl ScopePolicy {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "exact" | "exact_host" => Some(ScopePolicy::ExactHost),
            "subdomains" => Some(ScopePolicy::Subdomains),
            "domain" | "registrable_domain" => Some(ScopePolicy::RegistrableDomain),
            _ => None,
        }
    }
}

/// Engine tunables shared by every scan a service runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub workers: usize,
    pub request_timeout_ms: u64,
    pub retries_on_timeout: u32,
    pub scan_timeout_secs: u64,
    pub max_redirects: usize,
    pub max_links_cap: usize,
    pub scope_policy: ScopePolicy,
    pub max_depth: Option<u32>,
    pub max_body_bytes: usize,
    pub user_agent: String,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            request_timeout_ms: 5_000,
            retries_on_timeout: 1,
            scan_timeout_secs: 300,
            max_redirects: 10,
            max_links_cap: DEFAULT_MAX_LINKS,
            scope_policy: ScopePolicy::ExactHost,
            max_depth: None,
            max_body_bytes: 5 * 1024 * 1024,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl ScanConfig {
    /// Load a JSON config file. Missing fields fall back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: ScanConfig = serde_json::from_str(&content)
            .map_err(|e| ScanError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ScanError::Config(e.to_string()))?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(ScanError::Config("workers must be at least 1".to_string()));
        }
        if self.request_timeout_ms == 0 {
            return Err(ScanError::Config(
                "request_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.scan_timeout_secs == 0 {
            return Err(ScanError::Config(
                "scan_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.max_links_cap == 0 {
            return Err(ScanError::Config(
                "max_links_cap must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = (timeout.as_millis() as u64).max(1);
        self
    }

    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_scope_policy(mut self, policy: ScopePolicy) -> Self {
        self.scope_policy = policy;
        self
    }

    pub fn with_max_depth(mut self, depth: Option<u32>) -> Self {
        self.max_depth = depth;
        self
    }
}

/// A single scan submission. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRequest {
    pub seed_url: String,
    pub crawl_mode: CrawlMode,
    pub check_status_codes: bool,
    pub auto_follow_internal: bool,
    pub max_links: usize,
}

impl ScanRequest {
    pub fn new(seed_url: impl Into<String>) -> Self {
        Self {
            seed_url: seed_url.into(),
            crawl_mode: CrawlMode::AllLinks,
            check_status_codes: true,
            auto_follow_internal: false,
            max_links: DEFAULT_MAX_LINKS,
        }
    }

    pub fn with_crawl_mode(mut self, mode: CrawlMode) -> Self {
        self.crawl_mode = mode;
        self
    }

    pub fn with_check_status_codes(mut self, check: bool) -> Self {
        self.check_status_codes = check;
        self
    }

    pub fn with_auto_follow_internal(mut self, follow: bool) -> Self {
        self.auto_follow_internal = follow;
        self
    }

    pub fn with_max_links(mut self, max_links: usize) -> Self {
        self.max_links = max_links;
        self
    }

    /// The budget actually enforced: at least one link (the seed), at most `cap`.
    pub fn effective_max_links(&self, cap: usize) -> usize {
        self.max_links.clamp(1, cap.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn budget_is_clamped() {
        let request = ScanRequest::new("https://example.com").with_max_links(5000);
        assert_eq!(request.effective_max_links(1000), 1000);

        let request = ScanRequest::new("https://example.com").with_max_links(0);
        assert_eq!(request.effective_max_links(1000), 1);

        let request = ScanRequest::new("https://example.com").with_max_links(5);
        assert_eq!(request.effective_max_links(1000), 5);
    }

    #[test]
    fn partial_config_file_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"workers": 4, "scope_policy": "subdomains"}}"#).unwrap();

        let config = ScanConfig::load(file.path()).unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(config.scope_policy, ScopePolicy::Subdomains);
        assert_eq!(config.max_redirects, 10);
        assert_eq!(config.max_links_cap, DEFAULT_MAX_LINKS);
    }

    #[test]
    fn zero_workers_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"workers": 0}}"#).unwrap();

        assert!(matches!(
            ScanConfig::load(file.path()),
            Err(ScanError::Config(_))
        ));
    }

    #[test]
    fn zero_scan_timeout_rejected() {
        let config = ScanConfig::default().with_scan_timeout(Duration::from_millis(500));
        assert!(config.validate().is_err());
    }

    #[test]
    fn mode_and_policy_parsing() {
        assert_eq!(CrawlMode::from_str("single"), Some(CrawlMode::SingleLink));
        assert_eq!(CrawlMode::from_str("ALL"), Some(CrawlMode::AllLinks));
        assert_eq!(CrawlMode::from_str("deep"), None);
        assert_eq!(
            ScopePolicy::from_str("domain"),
            Some(ScopePolicy::RegistrableDomain)
        );
        assert_eq!(ScopePolicy::from_str("exact"), Some(ScopePolicy::ExactHost));
    }
}
