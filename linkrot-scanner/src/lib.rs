pub mod checker;
pub mod config;
pub mod crawler;
pub mod error;
pub mod extract;
pub mod frontier;
pub mod http;
pub mod normalize;
pub mod redirect;
pub mod report;
pub mod result;

pub use checker::StatusChecker;
pub use config::{CrawlMode, ScanConfig, ScanRequest, ScopePolicy};
pub use crawler::{Crawler, ProgressCallback, ScanProgress};
pub use error::{FailureCause, ScanError};
pub use http::{HttpClient, ReqwestClient};
pub use normalize::LinkScope;
pub use report::{
    Aggregator, CompletionNote, FailureKind, NullSink, ReportSink, ScanFailure, ScanId,
    ScanOutcome, ScanReport, ScanStatus,
};
pub use result::{LinkCheckResult, LinkNode, ScannedLink};
