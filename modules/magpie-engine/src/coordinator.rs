use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use magpie_common::{ContentRecord, CrawlTarget, FetchError, MagpieError, RawPage, StoreError};

use crate::extractor::Extractor;
use crate::frontier::Frontier;
use crate::gate::{GateDecision, QualityGate};
use crate::identity::{self, BatchSeen, PersistDecision};
use crate::politeness::Politeness;
use crate::traits::{
    ContentStore, FetchOptions, LanguageDetector, PageFetcher, RecordPatch, TextEmbedder,
};

/// How many independent sources may crawl at once. Parallelism within one
/// source is already serialized by its politeness controller.
const MAX_CONCURRENT_SOURCES: usize = 4;

/// Full error strings kept in stats; beyond this only the count grows.
const ERROR_PREVIEW_CAP: usize = 25;

// --- Run state machine ---

/// Per-run lifecycle. `Aborted` is reachable from `Init` only — once a
/// run is past setup, per-item failures are absorbed, never fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    Discovering,
    Processing,
    Finalizing,
    Done,
    Aborted,
}

/// Run-level cancellation, observed between URLs. A cancelled run still
/// finalizes and reports the work it completed.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// --- Stats ---

/// Stats from one crawl run.
#[derive(Debug, Default)]
pub struct CrawlStats {
    pub discovered: u32,
    pub extracted: u32,
    pub persisted_new: u32,
    pub persisted_updated: u32,
    pub skipped: u32,
    /// Bounded preview of error strings; `error_count` holds the full tally.
    pub errors: Vec<String>,
    pub error_count: u32,
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl CrawlStats {
    pub fn record_error(&mut self, message: String) {
        self.error_count += 1;
        if self.errors.len() < ERROR_PREVIEW_CAP {
            self.errors.push(message);
        }
    }
}

impl std::fmt::Display for CrawlStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Crawl Run Complete ===")?;
        writeln!(f, "URLs discovered:    {}", self.discovered)?;
        writeln!(f, "Records extracted:  {}", self.extracted)?;
        writeln!(f, "Persisted (new):    {}", self.persisted_new)?;
        writeln!(f, "Persisted (update): {}", self.persisted_updated)?;
        writeln!(f, "Skipped:            {}", self.skipped)?;
        writeln!(f, "Errors:             {}", self.error_count)?;
        if self.cancelled {
            writeln!(f, "Run was cancelled before completing")?;
        }
        writeln!(f, "Duration:           {}ms", self.duration_ms)?;
        for e in &self.errors {
            writeln!(f, "  - {e}")?;
        }
        Ok(())
    }
}

/// Explicit per-run state threaded through the pipeline and consumed at
/// the end. Nothing about a run outlives the run.
struct RunContext {
    state: RunState,
    stats: CrawlStats,
    batch: BatchSeen,
}

impl RunContext {
    fn new() -> Self {
        Self {
            state: RunState::Init,
            stats: CrawlStats::default(),
            batch: BatchSeen::new(),
        }
    }

    fn advance(&mut self, next: RunState) {
        debug!(from = ?self.state, to = ?next, "Run state transition");
        self.state = next;
    }
}

// --- Coordinator ---

/// Drives one source through Init → Discover → Process → Finalize,
/// aggregating stats and continuing past per-item failures. The store is
/// the only resource shared across concurrent sources.
pub struct Coordinator {
    fetcher: Arc<dyn PageFetcher>,
    store: Arc<dyn ContentStore>,
    detector: Arc<dyn LanguageDetector>,
    embedder: Option<Arc<dyn TextEmbedder>>,
    cancel: CancelFlag,
}

impl Coordinator {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        store: Arc<dyn ContentStore>,
        detector: Arc<dyn LanguageDetector>,
    ) -> Self {
        Self {
            fetcher,
            store,
            detector,
            embedder: None,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn TextEmbedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Run one source to completion. Only setup failures propagate as an
    /// error; every other failure class lands in the returned stats.
    pub async fn run_crawl(&self, target: &CrawlTarget) -> Result<CrawlStats, MagpieError> {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let mut ctx = RunContext::new();

        info!(run_id = %run_id, target = target.slug.as_str(), "Crawl run starting");

        // Init — the only stage whose failures abort the run.
        let extractor = Extractor::new(&target.selectors, target.caps.max_replies)
            .map_err(|e| self.abort(&mut ctx, e.to_string()))?;
        let frontier =
            Frontier::new(&target.links).map_err(|e| self.abort(&mut ctx, e.to_string()))?;
        if let Err(e) = self.fetcher.acquire().await {
            return Err(self.abort(&mut ctx, format!("fetcher unavailable: {e}")));
        }

        let politeness = Politeness::new(&target.limits);
        let gate = QualityGate::new(&target.quality, self.detector.clone());
        let options = FetchOptions::for_target(target);

        // Discovering — runs to its caps before any processing starts, so
        // processing never observes a partially-populated frontier.
        ctx.advance(RunState::Discovering);
        let urls = self
            .discover_all(target, &frontier, &politeness, &options, &mut ctx)
            .await;
        ctx.stats.discovered = urls.len() as u32;
        info!(
            run_id = %run_id,
            discovered = urls.len(),
            "Discovery complete, processing"
        );

        // Processing — per-URL failures are recorded, never fatal.
        ctx.advance(RunState::Processing);
        for url in &urls {
            if self.cancel.is_cancelled() {
                warn!(run_id = %run_id, "Cancellation observed, finalizing early");
                ctx.stats.cancelled = true;
                break;
            }
            self.process_url(url, target, &extractor, &gate, &politeness, &options, &mut ctx)
                .await;
        }

        // Finalizing
        ctx.advance(RunState::Finalizing);
        ctx.stats.duration_ms = started.elapsed().as_millis() as u64;
        ctx.advance(RunState::Done);
        info!(run_id = %run_id, "{}", ctx.stats);
        Ok(ctx.stats)
    }

    /// Crawl several independent sources concurrently. Each gets its own
    /// politeness controller and run context; only the store is shared.
    pub async fn run_all(
        &self,
        targets: &[CrawlTarget],
    ) -> Vec<(String, Result<CrawlStats, MagpieError>)> {
        stream::iter(targets.iter().map(|target| async move {
            (target.slug.clone(), self.run_crawl(target).await)
        }))
        .buffer_unordered(MAX_CONCURRENT_SOURCES)
        .collect()
        .await
    }

    fn abort(&self, ctx: &mut RunContext, message: String) -> MagpieError {
        ctx.advance(RunState::Aborted);
        error!(message = message.as_str(), "Crawl run aborted during setup");
        MagpieError::Setup(message)
    }

    async fn discover_all(
        &self,
        target: &CrawlTarget,
        frontier: &Frontier,
        politeness: &Politeness,
        options: &FetchOptions,
        ctx: &mut RunContext,
    ) -> Vec<String> {
        let mut urls = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        'seeds: for seed in &target.seeds {
            let outcome = frontier
                .discover(self.fetcher.as_ref(), politeness, seed, &target.caps, options)
                .await;
            for e in outcome.page_errors {
                ctx.stats.record_error(e);
            }
            for url in outcome.urls {
                if seen.insert(identity::discovery_key(&url)) {
                    urls.push(url);
                    if urls.len() >= target.caps.max_items {
                        break 'seeds;
                    }
                }
            }
        }

        urls
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_url(
        &self,
        url: &str,
        target: &CrawlTarget,
        extractor: &Extractor,
        gate: &QualityGate,
        politeness: &Politeness,
        options: &FetchOptions,
        ctx: &mut RunContext,
    ) {
        let page = match self
            .fetch_with_retry(url, politeness, options, target.limits.max_fetch_attempts)
            .await
        {
            Ok(page) => page,
            Err(e) => {
                warn!(url, error = %e, "URL failed after retries");
                ctx.stats.record_error(format!("{url}: {e}"));
                return;
            }
        };

        // Absence of content is an expected outcome, not a defect.
        let Some(extraction) = extractor.extract(&page, target.platform) else {
            debug!(url, "No usable content, skipping");
            ctx.stats.skipped += 1;
            return;
        };

        for record in extraction.into_records() {
            ctx.stats.extracted += 1;
            self.persist_record(&record, target, gate, ctx).await;
        }
    }

    async fn persist_record(
        &self,
        record: &ContentRecord,
        target: &CrawlTarget,
        gate: &QualityGate,
        ctx: &mut RunContext,
    ) {
        if let GateDecision::Reject(reason) = gate.accept(record) {
            info!(
                url = record.canonical_url.as_str(),
                reason = %reason,
                "Record rejected by quality gate"
            );
            ctx.stats.skipped += 1;
            return;
        }

        let key = identity::identify(record);
        if !ctx.batch.insert(&key) {
            debug!(key = key.as_str(), "Already submitted this run");
            ctx.stats.skipped += 1;
            return;
        }

        let fingerprint = identity::fingerprint(&record.body);
        let decision =
            match identity::decide(self.store.as_ref(), &key, &fingerprint, target.mutable).await
            {
                Ok(d) => d,
                Err(e) => {
                    ctx.stats.record_error(format!("{key}: {e}"));
                    return;
                }
            };

        match decision {
            PersistDecision::Skip => {
                debug!(key = key.as_str(), "Existing record preserved");
                ctx.stats.skipped += 1;
            }
            PersistDecision::Create => {
                let embedding = self.embed(record).await;
                match self
                    .store
                    .create(&key, record, &fingerprint, embedding.as_deref())
                    .await
                {
                    Ok(()) => ctx.stats.persisted_new += 1,
                    Err(StoreError::DuplicateKey(_)) => {
                        // Lost a benign create race; the winner's record stands.
                        warn!(key = key.as_str(), "Create conflict at the gateway");
                        ctx.stats.record_error(format!("{key}: duplicate key"));
                    }
                    Err(e) => ctx.stats.record_error(format!("{key}: {e}")),
                }
            }
            PersistDecision::Update => {
                let embedding = self.embed(record).await;
                let patch = RecordPatch::from_record(record, &fingerprint, embedding);
                match self.store.update(&key, &patch).await {
                    Ok(()) => ctx.stats.persisted_updated += 1,
                    Err(e) => ctx.stats.record_error(format!("{key}: {e}")),
                }
            }
        }
    }

    /// Fetch with politeness delay before every attempt and exponential
    /// backoff between retries. Permanent errors never retry — a 404 will
    /// still be a 404 the third time.
    async fn fetch_with_retry(
        &self,
        url: &str,
        politeness: &Politeness,
        options: &FetchOptions,
        max_attempts: u32,
    ) -> Result<RawPage, FetchError> {
        let max_attempts = max_attempts.max(1);
        let mut attempt = 0;
        loop {
            politeness.wait().await;
            match self.fetcher.fetch(url, options).await {
                Ok(page) => return Ok(page),
                Err(e) if e.is_transient() && attempt + 1 < max_attempts => {
                    warn!(
                        url,
                        attempt = attempt + 1,
                        error = %e,
                        "Transient fetch failure, backing off"
                    );
                    politeness.backoff(attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Best-effort embedding. A failed call never blocks persistence.
    async fn embed(&self, record: &ContentRecord) -> Option<Vec<f32>> {
        let embedder = self.embedder.as_ref()?;
        let text = format!("{}\n\n{}", record.title, record.body);
        match embedder.embed(&text).await {
            Ok(vector) => Some(vector),
            Err(e) => {
                warn!(
                    url = record.canonical_url.as_str(),
                    error = %e,
                    "Embedding failed, persisting without it"
                );
                None
            }
        }
    }
}
