//! # Pipeline Workers
//!
//! Per-item scan processing and the report thread. A work item arrives
//! with its bytes already fetched; the worker classifies, expands archives
//! and runs the detector, pushing findings to the report channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, warn};

use crate::archive::{self, ExtractLimits};
use crate::classify::{self, FileKind};
use crate::detect::{self, DetectError, DetectOptions};
use crate::report::{FindingRecord, Reporter};
use crate::rules::RuleSet;
use crate::traverse::WorkItem;
use crate::verify::VerifierRegistry;

use super::ScanCounters;
use super::events::ReportEvent;

/// Shared context cloned into every scan task.
pub struct WorkerContext {
    pub rules: Arc<RuleSet>,
    pub workers: usize,
    pub per_hit_timeout: Duration,
    pub verifiers: Option<Arc<VerifierRegistry>>,
    pub cancel: Arc<AtomicBool>,
    pub counters: Arc<ScanCounters>,
    pub report_tx: Sender<ReportEvent>,
    pub extract: ExtractLimits,
}

impl WorkerContext {
    fn detect_options(&self) -> DetectOptions<'_> {
        DetectOptions {
            workers: self.workers,
            per_hit_timeout: self.per_hit_timeout,
            verifiers: self.verifiers.as_deref(),
            cancel: Some(self.cancel.as_ref()),
        }
    }

    fn emit(&self, record: FindingRecord) {
        self.counters.findings.fetch_add(1, Ordering::Relaxed);
        if let Err(err) = self.report_tx.send(ReportEvent::Finding(record)) {
            warn!("report channel closed while sending finding: {err}");
        }
    }
}

/// Spawn the thread draining report events into the reporter.
pub fn spawn_report_thread(
    reporter: Reporter,
    rx: Receiver<ReportEvent>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        for event in rx {
            match event {
                ReportEvent::Finding(record) => reporter.report(&record),
                ReportEvent::Flush => reporter.flush(),
            }
        }
        reporter.flush();
    })
}

/// Process one work item to its terminal state (reported or skipped).
pub fn process_work_item(ctx: &WorkerContext, item: WorkItem) {
    if ctx.cancel.load(Ordering::Relaxed) {
        return;
    }
    match item {
        WorkItem::Log {
            payload,
            location_url,
            job_name,
            build_name,
            source,
            extra,
        } => {
            let Some(bytes) = take_bytes(ctx, payload.into_bytes()) else {
                return;
            };
            ctx.counters.items_scanned.fetch_add(1, Ordering::Relaxed);
            ctx.counters
                .bytes_scanned
                .fetch_add(bytes.len() as u64, Ordering::Relaxed);

            // Some providers hand out logs that are themselves zip
            // archives; route them through the archive branch.
            if classify::classify(&bytes) == FileKind::Archive {
                expand_archive(ctx, &bytes, &job_name, &location_url, 0, None);
                return;
            }

            match detect::detect_hits(&bytes, &ctx.rules, &ctx.detect_options()) {
                Ok(findings) => {
                    for finding in findings {
                        let mut record =
                            FindingRecord::from_log(&finding, &location_url, &job_name, &build_name)
                                .with_kind(source);
                        for (key, value) in &extra {
                            record = record.with_extra(key, value.clone());
                        }
                        ctx.emit(record);
                    }
                }
                Err(DetectError::Cancelled) => {}
            }
        }
        WorkItem::Archive {
            payload,
            root_artifact_name,
            location_url,
            depth,
            repo,
        } => {
            let Some(bytes) = take_bytes(ctx, payload.into_bytes()) else {
                return;
            };
            ctx.counters.items_scanned.fetch_add(1, Ordering::Relaxed);
            ctx.counters
                .bytes_scanned
                .fetch_add(bytes.len() as u64, Ordering::Relaxed);
            expand_archive(
                ctx,
                &bytes,
                &root_artifact_name,
                &location_url,
                depth,
                repo.as_deref(),
            );
        }
        WorkItem::File {
            bytes,
            file_name,
            root_artifact_name,
            location_url,
            repo,
        } => {
            ctx.counters.files_scanned.fetch_add(1, Ordering::Relaxed);
            match detect::detect_file_hits(
                &bytes,
                &ctx.rules,
                &ctx.detect_options(),
                &file_name,
                &root_artifact_name,
                repo.as_deref(),
            ) {
                Ok(findings) => {
                    for file_finding in findings {
                        ctx.emit(FindingRecord::from_file(&file_finding, &location_url));
                    }
                }
                Err(DetectError::Cancelled) => {}
            }
        }
    }
}

fn expand_archive(
    ctx: &WorkerContext,
    bytes: &[u8],
    root_artifact_name: &str,
    location_url: &str,
    depth: u32,
    repo: Option<&str>,
) {
    let scan = archive::extract_zip(bytes, &ctx.extract, depth);
    ctx.counters
        .archives_expanded
        .fetch_add(1, Ordering::Relaxed);
    if scan.is_partial() {
        ctx.counters
            .errors
            .fetch_add(scan.errors.len() as u64, Ordering::Relaxed);
        warn!(
            "archive {root_artifact_name} yielded partial results ({} entry errors): {}",
            scan.errors.len(),
            scan.errors.join("; ")
        );
    }
    if scan.skipped_oversize > 0 || scan.skipped_depth > 0 {
        debug!(
            "archive {root_artifact_name}: skipped {} oversize and {} too-deep entries",
            scan.skipped_oversize, scan.skipped_depth
        );
    }

    for file in scan.files {
        if ctx.cancel.load(Ordering::Relaxed) {
            return;
        }
        process_work_item(
            ctx,
            WorkItem::File {
                bytes: file.bytes,
                file_name: file.name,
                root_artifact_name: root_artifact_name.to_string(),
                location_url: location_url.to_string(),
                repo: repo.map(str::to_string),
            },
        );
    }
}

fn take_bytes(ctx: &WorkerContext, bytes: std::io::Result<Vec<u8>>) -> Option<Vec<u8>> {
    match bytes {
        Ok(bytes) => Some(bytes),
        Err(err) => {
            warn!("payload read failed ({err}); skipping item");
            ctx.counters.errors.fetch_add(1, Ordering::Relaxed);
            None
        }
    }
}
