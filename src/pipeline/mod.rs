//! # Scan Pipeline
//!
//! Wires traversal → download → classify → (extract | detect) → report.
//! The traversal engine runs sequentially against the provider API and
//! submits work items into a bounded task group; submission blocks while
//! every scan worker is busy, which keeps memory consumption bounded by
//! the pool size. A report thread owns the sink.

pub mod events;
pub mod workers;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::bounded;
use tracing::{info, warn};

use crate::archive::ExtractLimits;
use crate::pool::TaskGroup;
use crate::queue::SpoolDir;
use crate::report::Reporter;
use crate::rules::RuleSet;
use crate::traverse::{ProviderAdapter, ScanScope, TraversalEngine, WalkLimits, WalkStats};
use crate::verify::VerifierRegistry;

use events::ReportEvent;
use workers::WorkerContext;

const CHANNEL_CAPACITY_MULTIPLIER: usize = 4;
const MIN_CHANNEL_CAPACITY: usize = 16;

/// Flush the findings sink after this many submitted work items so long
/// runs land findings on disk as they happen.
const FLUSH_EVERY: u64 = 25;

/// Counters shared across scan workers, the engine and the status channel.
#[derive(Debug, Default)]
pub struct ScanCounters {
    pub items_scanned: AtomicU64,
    pub bytes_scanned: AtomicU64,
    pub findings: AtomicU64,
    pub archives_expanded: AtomicU64,
    pub files_scanned: AtomicU64,
    pub errors: AtomicU64,
}

impl ScanCounters {
    pub fn snapshot(&self) -> ScanStats {
        ScanStats {
            items_scanned: self.items_scanned.load(Ordering::Relaxed),
            bytes_scanned: self.bytes_scanned.load(Ordering::Relaxed),
            findings: self.findings.load(Ordering::Relaxed),
            archives_expanded: self.archives_expanded.load(Ordering::Relaxed),
            files_scanned: self.files_scanned.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            walk: WalkStats::default(),
        }
    }
}

/// Final statistics for a scan run.
#[derive(Debug, Clone, Default)]
pub struct ScanStats {
    pub items_scanned: u64,
    pub bytes_scanned: u64,
    pub findings: u64,
    pub archives_expanded: u64,
    pub files_scanned: u64,
    pub errors: u64,
    pub walk: WalkStats,
}

/// Everything the pipeline needs beyond the adapter and scope.
pub struct ScanConfig {
    pub rules: Arc<RuleSet>,
    pub workers: usize,
    pub per_hit_timeout: Duration,
    pub verifiers: Option<Arc<VerifierRegistry>>,
    pub limits: WalkLimits,
    pub extract: ExtractLimits,
    pub findings_path: Option<PathBuf>,
    pub queue_dir: Option<PathBuf>,
}

/// Run a full scan: drive the traversal, fan work out to the scan pool,
/// drain the report channel, and return the run summary.
pub fn run_scan(
    adapter: Arc<dyn ProviderAdapter>,
    scope: ScanScope,
    cfg: ScanConfig,
    cancel: Arc<AtomicBool>,
    counters: Arc<ScanCounters>,
) -> Result<ScanStats> {
    let reporter = Reporter::new(cfg.findings_path.as_deref())
        .context("opening findings sink")?;

    let spool = match &cfg.queue_dir {
        Some(dir) => Some(SpoolDir::new(dir).context("creating queue directory")?),
        None => None,
    };

    let channel_cap = cfg
        .workers
        .saturating_mul(CHANNEL_CAPACITY_MULTIPLIER)
        .max(MIN_CHANNEL_CAPACITY);
    let (report_tx, report_rx) = bounded::<ReportEvent>(channel_cap);
    let report_handle = workers::spawn_report_thread(reporter, report_rx);

    let group = TaskGroup::limited(Arc::clone(&cancel), cfg.workers);
    let ctx = Arc::new(WorkerContext {
        rules: Arc::clone(&cfg.rules),
        workers: cfg.workers,
        per_hit_timeout: cfg.per_hit_timeout,
        verifiers: cfg.verifiers.clone(),
        cancel: Arc::clone(&cancel),
        counters: Arc::clone(&counters),
        report_tx: report_tx.clone(),
        extract: cfg.extract,
    });

    info!(
        "starting {} scan of {scope} with {} workers, {} rules",
        adapter.name(),
        cfg.workers,
        cfg.rules.len()
    );

    let engine = TraversalEngine::new(
        Arc::clone(&adapter),
        scope,
        cfg.limits,
        Arc::clone(&cancel),
        spool,
    );
    let walk = {
        let ctx = Arc::clone(&ctx);
        let group = &group;
        let mut submitted = 0u64;
        let mut emit = move |item| {
            submitted += 1;
            if submitted % FLUSH_EVERY == 0 {
                let _ = ctx.report_tx.send(ReportEvent::Flush);
            }
            let ctx = Arc::clone(&ctx);
            group
                .submit(move || workers::process_work_item(&ctx, item))
                .context("scan pool closed")
        };
        engine.run(&mut emit)
    };

    group.wait();
    drop(ctx);
    drop(report_tx);
    if report_handle.join().is_err() {
        warn!("report thread panicked");
    }

    if cancel.load(Ordering::Relaxed) {
        info!("shutdown requested; stopping early");
    }

    let mut stats = counters.snapshot();
    stats.walk = walk;
    info!(
        "run_summary repos={} runs={} jobs={} logs={} artifacts={} items_scanned={} bytes_scanned={} findings={} archives={} files={} skipped_oversize={} errors={}",
        stats.walk.repos,
        stats.walk.runs,
        stats.walk.jobs,
        stats.walk.logs_fetched,
        stats.walk.artifacts_downloaded,
        stats.items_scanned,
        stats.bytes_scanned,
        stats.findings,
        stats.archives_expanded,
        stats.files_scanned,
        stats.walk.skipped_oversize,
        stats.errors + stats.walk.errors
    );

    Ok(stats)
}
