use crate::checker::{Page, StatusChecker};
use crate::config::{CrawlMode, ScanConfig, ScanRequest};
use crate::error::{FailureCause, Result};
use crate::extract::extract_links;
use crate::frontier::{Admission, Frontier, NodeId};
use crate::http::{HttpClient, ReqwestClient};
use crate::normalize::{LinkScope, ScopeClassifier, normalize};
use crate::report::{
    Aggregator, CompletionNote, FailureKind, ScanFailure, ScanOutcome, ScanReport,
};
use crate::result::{LinkCheckResult, LinkNode};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Semaphore;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// Snapshot of scan progress handed to the progress callback after every check.
#[derive(Debug, Clone)]
pub struct ScanProgress {
    pub url: String,
    pub checked: usize,
    pub broken: usize,
    pub enqueued: usize,
}

pub type ProgressCallback = Arc<dyn Fn(ScanProgress) + Send + Sync>;

/// Breadth-first crawl-and-check scheduler.
pub struct Crawler {
    checker: StatusChecker,
    config: ScanConfig,
    progress_callback: Option<ProgressCallback>,
}

struct Job {
    id: NodeId,
    url: Url,
    node: LinkNode,
    extract: bool,
}

enum WorkOutcome {
    Visited {
        id: NodeId,
        links: Vec<Url>,
        /// Set when the URL could not be fetched at all.
        fatal: Option<FailureCause>,
    },
    Halted,
}

enum StopReason {
    Cancelled,
    TimedOut,
    SeedFailed(ScanFailure),
}

struct WorkerContext {
    checker: StatusChecker,
    classifier: ScopeClassifier,
    aggregator: Arc<Aggregator>,
    semaphore: Arc<Semaphore>,
    halt: CancellationToken,
    check_status_codes: bool,
    progress_callback: Option<ProgressCallback>,
    checked: AtomicUsize,
    broken: AtomicUsize,
    enqueued: AtomicUsize,
}

impl Crawler {
    pub fn new(config: ScanConfig) -> Result<Self> {
        config.validate()?;
        let client = ReqwestClient::new(&config)?;
        Ok(Self::with_client(Arc::new(client), config))
    }

    pub fn with_client(client: Arc<dyn HttpClient>, config: ScanConfig) -> Self {
        let checker = StatusChecker::new(client, &config);
        Self {
            checker,
            config,
            progress_callback: None,
        }
    }

    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Run one scan to a terminal state and return the final report.
    ///
    /// Results stream into `aggregator` as they complete. `cancel` aborts the
    /// scan; the configured scan timeout ends it early with a partial result.
    /// Individual link failures never end the scan: only an invalid seed or a
    /// seed that cannot be fetched at all does.
    pub async fn run(
        &self,
        request: &ScanRequest,
        aggregator: Arc<Aggregator>,
        cancel: CancellationToken,
    ) -> ScanReport {
        let max_links = request.effective_max_links(self.config.max_links_cap);
        info!(
            "Starting scan {} of {} ({}, max {} links, {} workers)",
            aggregator.id(),
            request.seed_url,
            request.crawl_mode.as_str(),
            max_links,
            self.config.workers
        );

        let seed = match normalize(&request.seed_url) {
            Ok(seed) => seed,
            Err(e) => {
                warn!("Rejecting seed {}: {}", request.seed_url, e);
                aggregator.finalize(ScanOutcome::Failed(ScanFailure {
                    kind: FailureKind::InvalidUrl,
                    message: e.to_string(),
                }));
                return aggregator.snapshot();
            }
        };

        let classifier = ScopeClassifier::new(&seed, self.config.scope_policy);
        let mut frontier = Frontier::new(max_links);
        frontier.admit(seed, None, 0, LinkScope::Internal);

        let halt = cancel.child_token();
        let deadline = Instant::now() + self.config.scan_timeout();
        let ctx = Arc::new(WorkerContext {
            checker: self.checker.clone(),
            classifier: classifier.clone(),
            aggregator: aggregator.clone(),
            semaphore: Arc::new(Semaphore::new(self.config.workers.max(1))),
            halt: halt.clone(),
            check_status_codes: request.check_status_codes,
            progress_callback: self.progress_callback.clone(),
            checked: AtomicUsize::new(0),
            broken: AtomicUsize::new(0),
            enqueued: AtomicUsize::new(1),
        });

        let mut stop: Option<StopReason> = None;

        while stop.is_none() {
            if cancel.is_cancelled() {
                stop = Some(StopReason::Cancelled);
                break;
            }
            if Instant::now() >= deadline {
                stop = Some(StopReason::TimedOut);
                break;
            }

            let layer = frontier.take_layer();
            if layer.is_empty() {
                break;
            }

            let remaining = frontier.remaining_budget();
            debug!(
                "Processing layer of {} links at depth {} ({} budget left)",
                layer.len(),
                frontier.node(layer[0]).depth,
                remaining
            );
            // With the budget spent, pages are still parsed until one link is
            // refused, so a crawl cut short by the cap is always reported.
            let budget_open = remaining > 0 || !frontier.budget_exhausted();

            let mut handles = Vec::with_capacity(layer.len());
            for id in layer {
                let node = frontier.node(id).clone();
                let job = Job {
                    id,
                    url: frontier.url(id).clone(),
                    extract: budget_open && self.should_extract(request, &node),
                    node,
                };
                handles.push(tokio::spawn(Self::process(ctx.clone(), job)));
            }

            // Handles are joined in discovery order so admissions, and hence
            // the set of links that fit the budget, do not depend on timing.
            for mut handle in handles {
                let joined = if stop.is_some() {
                    handle.await
                } else {
                    tokio::select! {
                        joined = &mut handle => joined,
                        _ = cancel.cancelled() => {
                            info!("Scan {} cancelled", aggregator.id());
                            stop = Some(StopReason::Cancelled);
                            halt.cancel();
                            handle.await
                        }
                        _ = sleep_until(deadline) => {
                            info!("Scan {} hit its {}s timeout", aggregator.id(), self.config.scan_timeout_secs);
                            stop = Some(StopReason::TimedOut);
                            halt.cancel();
                            handle.await
                        }
                    }
                };

                let outcome = match joined {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        warn!("Worker task failed: {}", e);
                        continue;
                    }
                };

                let WorkOutcome::Visited { id, links, fatal } = outcome else {
                    continue;
                };

                let depth = frontier.node(id).depth;
                if depth == 0
                    && let Some(cause) = fatal
                {
                    warn!("Seed {} could not be fetched: {}", frontier.node(id).url, cause);
                    stop = Some(StopReason::SeedFailed(seed_failure(cause)));
                    halt.cancel();
                    continue;
                }

                if stop.is_some() {
                    continue;
                }

                for link in links {
                    let scope = classifier.classify(&link);
                    match frontier.admit(link, Some(id), depth + 1, scope) {
                        Admission::Admitted(new_id) => {
                            ctx.enqueued.fetch_add(1, Ordering::Relaxed);
                            debug!(
                                "Queued {} ({}, depth {})",
                                frontier.node(new_id).url,
                                scope.as_str(),
                                depth + 1
                            );
                        }
                        Admission::BudgetExhausted => {
                            debug!("Link cap of {} reached", max_links);
                            break;
                        }
                        Admission::Duplicate | Admission::Closed => {}
                    }
                }
            }
        }

        let dropped = frontier.close();
        if dropped > 0 {
            debug!("{} queued links left unchecked", dropped);
        }

        let outcome = match stop {
            Some(StopReason::SeedFailed(failure)) => ScanOutcome::Failed(failure),
            Some(StopReason::Cancelled) => ScanOutcome::Failed(ScanFailure {
                kind: FailureKind::ScanCancelled,
                message: "scan was cancelled before it finished".to_string(),
            }),
            Some(StopReason::TimedOut) => ScanOutcome::Completed(Some(CompletionNote::TimedOut)),
            None if frontier.budget_exhausted() => {
                ScanOutcome::Completed(Some(CompletionNote::LinkCapReached))
            }
            None => ScanOutcome::Completed(None),
        };
        let finishing = aggregator.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || finishing.finalize(outcome)).await {
            warn!("Finalizing scan {} failed: {}", aggregator.id(), e);
        }

        let report = aggregator.snapshot();
        info!(
            "Scan {} {}: {} links, {} broken",
            report.id,
            report.status.as_str(),
            report.nodes.len(),
            report.total_broken
        );
        report
    }

    /// Pages are only parsed in all-links mode, only when internal, and only
    /// beyond the seed when auto-follow is on.
    fn should_extract(&self, request: &ScanRequest, node: &LinkNode) -> bool {
        request.crawl_mode == CrawlMode::AllLinks
            && node.scope == LinkScope::Internal
            && (node.depth == 0 || request.auto_follow_internal)
            && self.config.max_depth.is_none_or(|max| node.depth < max)
    }

    async fn process(ctx: Arc<WorkerContext>, job: Job) -> WorkOutcome {
        let _permit = tokio::select! {
            permit = ctx.semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return WorkOutcome::Halted,
            },
            _ = ctx.halt.cancelled() => return WorkOutcome::Halted,
        };

        tokio::select! {
            outcome = Self::visit(&ctx, job) => outcome,
            _ = ctx.halt.cancelled() => WorkOutcome::Halted,
        }
    }

    async fn visit(ctx: &WorkerContext, job: Job) -> WorkOutcome {
        let result = if ctx.check_status_codes {
            ctx.checker.check(&job.url).await
        } else {
            LinkCheckResult::unchecked(job.url.to_string())
        };

        let fatal = result.is_transport_failure().then(|| result.error).flatten();
        let final_url = result
            .final_url
            .as_deref()
            .and_then(|u| Url::parse(u).ok());
        let is_broken = result.is_broken;
        let checked = result.checked;

        let aggregator = ctx.aggregator.clone();
        let node = job.node.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || aggregator.record(node, result)).await {
            warn!("Recording {} failed: {}", job.url, e);
        }
        ctx.report_progress(&job.url, is_broken);

        if !job.extract || is_broken {
            return WorkOutcome::Visited {
                id: job.id,
                links: Vec::new(),
                fatal,
            };
        }

        let page = match final_url {
            Some(final_url) => {
                if ctx.classifier.classify(&final_url) == LinkScope::External {
                    debug!("{} redirects off-site to {}, not extracting", job.url, final_url);
                    return WorkOutcome::Visited {
                        id: job.id,
                        links: Vec::new(),
                        fatal,
                    };
                }
                ctx.checker.fetch_page(&final_url).await.map_err(|e| e.cause())
            }
            None => ctx.checker.fetch_resolved_page(&job.url).await,
        };

        match page {
            Ok(page) => WorkOutcome::Visited {
                id: job.id,
                links: page_links(&page),
                fatal,
            },
            Err(cause) => {
                debug!("Could not fetch {} for extraction: {}", job.url, cause);
                WorkOutcome::Visited {
                    id: job.id,
                    links: Vec::new(),
                    fatal: fatal.or((!checked && cause.is_transport()).then_some(cause)),
                }
            }
        }
    }
}

impl WorkerContext {
    fn report_progress(&self, url: &Url, is_broken: bool) {
        let checked = self.checked.fetch_add(1, Ordering::Relaxed) + 1;
        let broken = if is_broken {
            self.broken.fetch_add(1, Ordering::Relaxed) + 1
        } else {
            self.broken.load(Ordering::Relaxed)
        };

        if let Some(ref callback) = self.progress_callback {
            callback(ScanProgress {
                url: url.to_string(),
                checked,
                broken,
                enqueued: self.enqueued.load(Ordering::Relaxed),
            });
        }
    }
}

fn page_links(page: &Page) -> Vec<Url> {
    if !(200..300).contains(&page.status) {
        return Vec::new();
    }
    let links = extract_links(&page.url, &page.body, &page.content_type);
    debug!("Found {} links on {}", links.len(), page.url);
    links
}

fn seed_failure(cause: FailureCause) -> ScanFailure {
    let kind = match cause {
        FailureCause::RedirectLoop => FailureKind::TooManyRedirects,
        _ => FailureKind::NetworkError,
    };
    ScanFailure {
        kind,
        message: format!("seed URL could not be fetched ({})", cause),
    }
}
