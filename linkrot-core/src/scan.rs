use crate::data::{ScanSummary, SqliteSink};
use indicatif::{ProgressBar, ProgressStyle};
use linkrot_scanner::config::{ScanConfig, ScanRequest};
use linkrot_scanner::crawler::{Crawler, ProgressCallback, ScanProgress};
use linkrot_scanner::error::{Result, ScanError};
use linkrot_scanner::http::{HttpClient, ReqwestClient};
use linkrot_scanner::report::{Aggregator, NullSink, ReportSink, ScanId, ScanReport};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

struct ScanHandle {
    aggregator: Arc<Aggregator>,
    cancel: CancellationToken,
    task: Option<JoinHandle<ScanReport>>,
}

/// Runs scans in the background and answers report queries.
///
/// Each scan owns its own frontier and report; scans share only the HTTP
/// client and, when configured, the SQLite store.
pub struct ScanService {
    client: Arc<dyn HttpClient>,
    config: ScanConfig,
    store: Option<Arc<SqliteSink>>,
    progress_callback: Option<ProgressCallback>,
    scans: Mutex<HashMap<ScanId, ScanHandle>>,
}

impl ScanService {
    pub fn new(config: ScanConfig) -> Result<Self> {
        config.validate()?;
        let client = ReqwestClient::new(&config)?;
        Ok(Self::with_client(Arc::new(client), config))
    }

    pub fn with_client(client: Arc<dyn HttpClient>, config: ScanConfig) -> Self {
        Self {
            client,
            config,
            store: None,
            progress_callback: None,
            scans: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_store(mut self, store: Arc<SqliteSink>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Accept a scan and start it in the background. Must be called from
    /// within a tokio runtime.
    pub fn start_scan(&self, request: ScanRequest) -> ScanId {
        if self.store.is_some() {
            self.evict_finished();
        }
        let id = ScanId::new();
        let sink: Arc<dyn ReportSink> = match self.store {
            Some(ref store) => store.clone(),
            None => Arc::new(NullSink),
        };
        let aggregator = Arc::new(Aggregator::new(id, request.seed_url.clone(), sink));
        let cancel = CancellationToken::new();

        let mut crawler = Crawler::with_client(self.client.clone(), self.config.clone());
        if let Some(ref callback) = self.progress_callback {
            crawler = crawler.with_progress_callback(callback.clone());
        }
        let task_aggregator = aggregator.clone();
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            crawler.run(&request, task_aggregator, task_cancel).await
        });

        info!("Accepted scan {}", id);
        self.lock().insert(
            id,
            ScanHandle {
                aggregator,
                cancel,
                task: Some(task),
            },
        );
        id
    }

    /// Current report for a scan: a live snapshot while it is held in
    /// memory, otherwise whatever the store has.
    pub fn get_report(&self, id: ScanId) -> Result<Option<ScanReport>> {
        if let Some(handle) = self.lock().get(&id) {
            return Ok(Some(handle.aggregator.snapshot()));
        }

        match self.store {
            Some(ref store) => store
                .load_report(id)
                .map_err(|e| ScanError::Storage(e.to_string())),
            None => Ok(None),
        }
    }

    /// Request cancellation. Returns false for unknown or finished scans.
    pub fn cancel(&self, id: ScanId) -> bool {
        match self.lock().get(&id) {
            Some(handle) if !handle.aggregator.status().is_terminal() => {
                info!("Cancelling scan {}", id);
                handle.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Wait for a scan to reach a terminal state.
    ///
    /// With a store configured the finished scan is dropped from memory and
    /// later reads go to the store. Without one it stays in memory until
    /// [`ScanService::evict_finished`] is called.
    pub async fn wait(&self, id: ScanId) -> Result<Option<ScanReport>> {
        let slot = {
            let mut scans = self.lock();
            match scans.get_mut(&id) {
                Some(handle) => Some(handle.task.take()),
                None => None,
            }
        };
        let Some(task) = slot else {
            return self.get_report(id);
        };

        if let Some(task) = task {
            let report = task.await?;
            if self.store.is_some() {
                self.lock().remove(&id);
            }
            return Ok(Some(report));
        }

        // Another caller owns the task handle; poll until it lands.
        loop {
            match self.get_report(id)? {
                Some(report) if !report.status.is_terminal() => {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                other => return Ok(other),
            }
        }
    }

    /// Drop finished scans from memory. Their reports stay readable through
    /// the store; without one they are gone.
    pub fn evict_finished(&self) -> usize {
        let mut scans = self.lock();
        let before = scans.len();
        scans.retain(|_, handle| !handle.aggregator.status().is_terminal());
        before - scans.len()
    }

    pub fn list_scans(&self, limit: usize) -> Result<Vec<ScanSummary>> {
        if let Some(ref store) = self.store {
            return store
                .list_scans(limit)
                .map_err(|e| ScanError::Storage(e.to_string()));
        }

        let mut scans: Vec<ScanSummary> = self
            .lock()
            .values()
            .map(|handle| summarize(&handle.aggregator.snapshot()))
            .collect();
        scans.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        scans.truncate(limit);
        Ok(scans)
    }

    pub fn active_scans(&self) -> Vec<ScanId> {
        self.lock()
            .iter()
            .filter(|(_, handle)| !handle.aggregator.status().is_terminal())
            .map(|(id, _)| *id)
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ScanId, ScanHandle>> {
        self.scans.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn summarize(report: &ScanReport) -> ScanSummary {
    ScanSummary {
        id: report.id,
        seed_url: report.seed_url.clone(),
        status: report.status,
        started_at: report.started_at,
        completed_at: report.completed_at,
        total_links: report.nodes.len(),
        total_checked: report.total_checked,
        total_broken: report.total_broken,
        failure: report.failure.clone(),
        note: report.note,
    }
}

/// Options for a one-shot scan driven from the command line
pub struct ScanOptions {
    pub request: ScanRequest,
    pub config: ScanConfig,
    pub db_path: Option<PathBuf>,
    pub show_progress_bars: bool,
}

/// Run a single scan to completion, with a spinner and Ctrl-C handling.
pub async fn execute_scan(options: ScanOptions) -> Result<ScanReport> {
    let ScanOptions {
        request,
        config,
        db_path,
        show_progress_bars,
    } = options;

    let progress_bar = if show_progress_bars {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .map_err(|e| ScanError::Other(e.to_string()))?,
        );
        pb.enable_steady_tick(Duration::from_millis(100));
        pb.set_message(format!("Scanning {}...", request.seed_url));
        Some(pb)
    } else {
        None
    };

    let mut service = ScanService::new(config)?;
    if let Some(ref path) = db_path {
        let store = SqliteSink::open(path).map_err(|e| ScanError::Storage(e.to_string()))?;
        service = service.with_store(Arc::new(store));
    }
    if let Some(ref pb) = progress_bar {
        let pb = pb.clone();
        service = service.with_progress_callback(Arc::new(move |progress: ScanProgress| {
            pb.set_message(format!(
                "{} checked, {} broken, {} queued | {}",
                progress.checked,
                progress.broken,
                progress.enqueued,
                crate::render::extract_url_path(&progress.url)
            ));
        }));
    }

    let id = service.start_scan(request);

    let wait = service.wait(id);
    tokio::pin!(wait);
    let report = tokio::select! {
        report = &mut wait => report?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cancelling scan {}", id);
            service.cancel(id);
            wait.await?
        }
    };

    let report = report.ok_or_else(|| ScanError::Other(format!("scan {} vanished", id)))?;

    if let Some(pb) = progress_bar {
        pb.finish_with_message(format!(
            "Scan {}: {} links, {} broken",
            report.status.as_str(),
            report.nodes.len(),
            report.total_broken
        ));
    }

    Ok(report)
}
