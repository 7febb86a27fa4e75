//! # Status Channel
//!
//! A thread waiting on stdin: "?" or "s" followed by newline publishes one
//! snapshot of the rate-limit budget and the scan counters through the
//! logger. A missing or closed stdin is a debug-level note, never a scan
//! failure.

use std::io::BufRead;
use std::sync::{Arc, Mutex};
use std::thread;

use tracing::{debug, info};

use crate::pipeline::ScanCounters;
use crate::transport::RateLimitState;

pub fn spawn_status_listener(
    provider: String,
    counters: Arc<ScanCounters>,
    rate_limit: Arc<Mutex<RateLimitState>>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut lines = stdin.lock().lines();
        loop {
            match lines.next() {
                Some(Ok(line)) => {
                    let key = line.trim();
                    if key == "?" || key == "s" {
                        publish_snapshot(&provider, &counters, &rate_limit);
                    }
                }
                Some(Err(err)) => {
                    debug!("status channel stdin error: {err}");
                    return;
                }
                None => {
                    debug!("status channel stdin closed");
                    return;
                }
            }
        }
    })
}

fn publish_snapshot(
    provider: &str,
    counters: &ScanCounters,
    rate_limit: &Arc<Mutex<RateLimitState>>,
) {
    let stats = counters.snapshot();
    let state = rate_limit
        .lock()
        .map(|s| s.clone())
        .unwrap_or_default();

    let remaining = state
        .remaining_core
        .map(|r| r.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let reset = state
        .reset_at
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "unknown".to_string());

    info!(
        "status [{provider}] rate_limit_remaining={remaining} reset_at={reset} items_scanned={} findings={} bytes_scanned={}",
        stats.items_scanned, stats.findings, stats.bytes_scanned
    );
}
