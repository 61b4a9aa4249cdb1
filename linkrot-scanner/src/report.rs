use crate::error::Result;
use crate::result::{LinkCheckResult, LinkNode, ScannedLink};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScanId(pub Uuid);

impl ScanId {
    pub fn new() -> Self {
        ScanId(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s.trim()).ok().map(ScanId)
    }
}

impl Default for ScanId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Running,
    Completed,
    Failed,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Running => "running",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "running" => Some(ScanStatus::Running),
            "completed" => Some(ScanStatus::Completed),
            "failed" => Some(ScanStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ScanStatus::Running)
    }
}

/// Why a scan failed as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    InvalidUrl,
    NetworkError,
    TooManyRedirects,
    ScanCancelled,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::InvalidUrl => "InvalidUrl",
            FailureKind::NetworkError => "NetworkError",
            FailureKind::TooManyRedirects => "TooManyRedirects",
            FailureKind::ScanCancelled => "ScanCancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "InvalidUrl" => Some(FailureKind::InvalidUrl),
            "NetworkError" => Some(FailureKind::NetworkError),
            "TooManyRedirects" => Some(FailureKind::TooManyRedirects),
            "ScanCancelled" => Some(FailureKind::ScanCancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanFailure {
    pub kind: FailureKind,
    pub message: String,
}

/// Normal reasons a scan stopped before its frontier drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionNote {
    LinkCapReached,
    TimedOut,
}

impl CompletionNote {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionNote::LinkCapReached => "link_cap_reached",
            CompletionNote::TimedOut => "timed_out",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "link_cap_reached" => Some(CompletionNote::LinkCapReached),
            "timed_out" => Some(CompletionNote::TimedOut),
            _ => None,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            CompletionNote::LinkCapReached => "link cap reached; remaining links were not scanned",
            CompletionNote::TimedOut => "scan timed out; results are partial",
        }
    }
}

/// Terminal transition requested of an [`Aggregator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    Completed(Option<CompletionNote>),
    Failed(ScanFailure),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub id: ScanId,
    pub seed_url: String,
    pub status: ScanStatus,
    pub nodes: Vec<ScannedLink>,
    pub total_checked: usize,
    pub total_broken: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<ScanFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<CompletionNote>,
}

impl ScanReport {
    pub fn new(id: ScanId, seed_url: impl Into<String>) -> Self {
        Self {
            id,
            seed_url: seed_url.into(),
            status: ScanStatus::Running,
            nodes: Vec::new(),
            total_checked: 0,
            total_broken: 0,
            started_at: Utc::now(),
            completed_at: None,
            failure: None,
            note: None,
        }
    }

    pub fn broken_links(&self) -> impl Iterator<Item = &ScannedLink> {
        self.nodes.iter().filter(|link| link.result.is_broken)
    }

    pub fn duration_secs(&self) -> Option<i64> {
        self.completed_at
            .map(|end| (end - self.started_at).num_seconds())
    }
}

/// Durable storage for reports. Implementations translate these calls into
/// rows; the engine only ever appends and sets the final status.
pub trait ReportSink: Send + Sync {
    fn begin(&self, report: &ScanReport) -> Result<()>;
    fn append(&self, scan_id: ScanId, link: &ScannedLink) -> Result<()>;
    fn finalize(&self, report: &ScanReport) -> Result<()>;
}

/// Keeps reports in memory only.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ReportSink for NullSink {
    fn begin(&self, _report: &ScanReport) -> Result<()> {
        Ok(())
    }

    fn append(&self, _scan_id: ScanId, _link: &ScannedLink) -> Result<()> {
        Ok(())
    }

    fn finalize(&self, _report: &ScanReport) -> Result<()> {
        Ok(())
    }
}

/// Sole owner of a scan's report. Safe to share between workers.
///
/// Sink calls are serialized by their own lock and never run while the
/// report lock is held, so readers are not stalled by slow storage.
pub struct Aggregator {
    report: Mutex<ScanReport>,
    writes: Mutex<()>,
    sink: Arc<dyn ReportSink>,
}

impl Aggregator {
    pub fn new(id: ScanId, seed_url: impl Into<String>, sink: Arc<dyn ReportSink>) -> Self {
        let report = ScanReport::new(id, seed_url);
        if let Err(e) = sink.begin(&report) {
            warn!("Failed to persist start of scan {}: {}", report.id, e);
        }
        Self {
            report: Mutex::new(report),
            writes: Mutex::new(()),
            sink,
        }
    }

    pub fn id(&self) -> ScanId {
        self.lock().id
    }

    /// Append one result. Ignored once the report is terminal.
    ///
    /// Blocks on the sink; async callers should run this off the runtime.
    pub fn record(&self, node: LinkNode, result: LinkCheckResult) -> bool {
        let _writes = self.lock_writes();
        let link = ScannedLink { node, result };
        let scan_id = {
            let mut report = self.lock();
            if report.status.is_terminal() {
                debug!("Dropping late result for {} on finished scan", link.node.url);
                return false;
            }
            if link.result.checked {
                report.total_checked += 1;
            }
            if link.result.is_broken {
                report.total_broken += 1;
            }
            report.nodes.push(link.clone());
            report.id
        };

        if let Err(e) = self.sink.append(scan_id, &link) {
            warn!("Failed to persist result for {}: {}", link.node.url, e);
        }
        true
    }

    /// Move to a terminal state. Only the first call has any effect.
    pub fn finalize(&self, outcome: ScanOutcome) -> bool {
        let _writes = self.lock_writes();
        let finished = {
            let mut report = self.lock();
            if report.status.is_terminal() {
                return false;
            }

            match outcome {
                ScanOutcome::Completed(note) => {
                    report.status = ScanStatus::Completed;
                    report.note = note;
                }
                ScanOutcome::Failed(failure) => {
                    report.status = ScanStatus::Failed;
                    report.failure = Some(failure);
                }
            }
            report.completed_at = Some(Utc::now());
            report.clone()
        };

        if let Err(e) = self.sink.finalize(&finished) {
            warn!("Failed to persist final status of scan {}: {}", finished.id, e);
        }
        true
    }

    pub fn snapshot(&self) -> ScanReport {
        self.lock().clone()
    }

    pub fn status(&self) -> ScanStatus {
        self.lock().status
    }

    pub fn len(&self) -> usize {
        self.lock().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, ScanReport> {
        // Poisoned reports are still consistent; mutations are plain field writes.
        self.report.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.writes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
