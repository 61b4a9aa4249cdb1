use crate::error::FailureCause;
use crate::normalize::LinkScope;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A unique link discovered during a scan. Identity is the normalized URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkNode {
    pub url: String,
    pub parent_url: Option<String>,
    pub depth: u32,
    pub scope: LinkScope,
    pub discovered_at: DateTime<Utc>,
}

/// Reachability outcome for one link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkCheckResult {
    pub link_url: String,
    pub final_url: Option<String>,
    pub status_code: Option<u16>,
    pub is_broken: bool,
    pub error: Option<FailureCause>,
    /// False when status checking was switched off for the scan.
    pub checked: bool,
    pub checked_at: DateTime<Utc>,
}

impl LinkCheckResult {
    pub fn reachable(link_url: String, final_url: String, status_code: u16) -> Self {
        let error = FailureCause::from_status(status_code);
        Self {
            link_url,
            final_url: Some(final_url),
            status_code: Some(status_code),
            is_broken: error.is_some(),
            error,
            checked: true,
            checked_at: Utc::now(),
        }
    }

    pub fn with_error(link_url: String, cause: FailureCause) -> Self {
        Self {
            link_url,
            final_url: None,
            status_code: None,
            is_broken: true,
            error: Some(cause),
            checked: true,
            checked_at: Utc::now(),
        }
    }

    pub fn unchecked(link_url: String) -> Self {
        Self {
            link_url,
            final_url: None,
            status_code: None,
            is_broken: false,
            error: None,
            checked: false,
            checked_at: Utc::now(),
        }
    }

    /// The link never produced an HTTP response.
    pub fn is_transport_failure(&self) -> bool {
        self.error.is_some_and(|cause| cause.is_transport())
    }
}

/// A node together with its check result, as stored in a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScannedLink {
    pub node: LinkNode,
    pub result: LinkCheckResult,
}
