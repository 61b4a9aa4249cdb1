use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Network error: {0}")]
    Network(FailureCause),

    #[error("Too many redirects: {0}")]
    TooManyRedirects(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Task join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),

    #[error("Other error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ScanError>;

/// Machine-readable reason a link was recorded as broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    Timeout,
    Dns,
    Tls,
    Connection,
    #[serde(rename = "http_4xx")]
    Http4xx,
    #[serde(rename = "http_5xx")]
    Http5xx,
    RedirectLoop,
}

impl FailureCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCause::Timeout => "timeout",
            FailureCause::Dns => "dns",
            FailureCause::Tls => "tls",
            FailureCause::Connection => "connection",
            FailureCause::Http4xx => "http_4xx",
            FailureCause::Http5xx => "http_5xx",
            FailureCause::RedirectLoop => "redirect_loop",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "timeout" => Some(FailureCause::Timeout),
            "dns" => Some(FailureCause::Dns),
            "tls" => Some(FailureCause::Tls),
            "connection" => Some(FailureCause::Connection),
            "http_4xx" => Some(FailureCause::Http4xx),
            "http_5xx" => Some(FailureCause::Http5xx),
            "redirect_loop" => Some(FailureCause::RedirectLoop),
            _ => None,
        }
    }

    /// Classify a final HTTP status. `None` means the link is reachable.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            400..=499 => Some(FailureCause::Http4xx),
            500.. => Some(FailureCause::Http5xx),
            _ => None,
        }
    }

    /// Failures that mean the host could not be talked to at all.
    pub fn is_transport(&self) -> bool {
        !matches!(self, FailureCause::Http4xx | FailureCause::Http5xx)
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(FailureCause::from_status(200), None);
        assert_eq!(FailureCause::from_status(301), None);
        assert_eq!(FailureCause::from_status(399), None);
        assert_eq!(FailureCause::from_status(404), Some(FailureCause::Http4xx));
        assert_eq!(FailureCause::from_status(503), Some(FailureCause::Http5xx));
    }

    #[test]
    fn tags_survive_serde() {
        let json = serde_json::to_string(&FailureCause::Http4xx).unwrap();
        assert_eq!(json, "\"http_4xx\"");
        let json = serde_json::to_string(&FailureCause::RedirectLoop).unwrap();
        assert_eq!(json, "\"redirect_loop\"");
        for cause in [
            FailureCause::Timeout,
            FailureCause::Dns,
            FailureCause::Tls,
            FailureCause::Connection,
            FailureCause::Http5xx,
        ] {
            assert_eq!(FailureCause::from_str(cause.as_str()), Some(cause));
        }
    }
}
