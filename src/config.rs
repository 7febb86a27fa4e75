//! # Scan Options
//!
//! Validated runtime options assembled from the CLI. Construction fails on
//! misconfiguration (bad size string, zero threads) before any scan work
//! starts; everything here is immutable afterwards.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};

use crate::archive::ExtractLimits;
use crate::cli::CommonArgs;
use crate::rules::Confidence;
use crate::traverse::WalkLimits;
use crate::util::parse_size;

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub threads: usize,
    pub confidence: Vec<Confidence>,
    pub verify: bool,
    pub per_hit_timeout: Duration,
    pub max_artifact_size: u64,
    pub max_artifact_depth: u32,
    pub max_runs: i64,
    pub artifacts: bool,
    pub proxy: Option<String>,
    pub insecure: bool,
    pub rules_path: Option<PathBuf>,
    pub findings_path: Option<PathBuf>,
    pub queue_dir: Option<PathBuf>,
}

impl ScanOptions {
    pub fn from_common(args: &CommonArgs, max_runs: i64) -> Result<Self> {
        if args.threads == 0 {
            bail!("--threads must be at least 1");
        }
        if args.per_hit_timeout == 0 {
            bail!("--per-hit-timeout must be at least 1 second");
        }
        let max_artifact_size = parse_size(&args.max_artifact_size)?;
        if max_artifact_size == 0 {
            bail!("--max-artifact-size must be non-zero");
        }
        if max_runs < -1 {
            bail!("run cap must be -1 (unlimited) or non-negative");
        }

        Ok(Self {
            threads: args.threads,
            confidence: args.confidence.clone(),
            verify: args.verify,
            per_hit_timeout: Duration::from_secs(args.per_hit_timeout),
            max_artifact_size,
            max_artifact_depth: args.max_artifact_depth,
            max_runs,
            artifacts: args.artifacts,
            proxy: args.proxy.clone(),
            insecure: args.insecure,
            rules_path: args.rules.clone(),
            findings_path: args.findings.clone(),
            queue_dir: args.queue_dir.clone(),
        })
    }

    pub fn walk_limits(&self) -> WalkLimits {
        WalkLimits {
            max_runs: self.max_runs,
            artifacts: self.artifacts,
            max_artifact_size: self.max_artifact_size,
        }
    }

    pub fn extract_limits(&self) -> ExtractLimits {
        ExtractLimits {
            max_file_size: self.max_artifact_size,
            max_depth: self.max_artifact_depth,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct Harness {
        #[command(flatten)]
        common: CommonArgs,
    }

    fn common(args: &[&str]) -> CommonArgs {
        let mut argv = vec!["harness", "--token", "t"];
        argv.extend_from_slice(args);
        Harness::try_parse_from(argv).expect("parse").common
    }

    #[test]
    fn builds_options_with_defaults() {
        let opts = ScanOptions::from_common(&common(&[]), -1).expect("options");
        assert!((1..=4).contains(&opts.threads));
        assert_eq!(opts.max_artifact_size, 500_000_000);
        assert_eq!(opts.per_hit_timeout, Duration::from_secs(60));
        assert_eq!(opts.max_runs, -1);
        assert!(opts.confidence.is_empty());
    }

    #[test]
    fn parses_size_flag() {
        let opts =
            ScanOptions::from_common(&common(&["--max-artifact-size", "50Mb"]), 10).expect("opts");
        assert_eq!(opts.max_artifact_size, 50_000_000);
        assert_eq!(opts.walk_limits().max_artifact_size, 50_000_000);
        assert_eq!(opts.extract_limits().max_file_size, 50_000_000);
    }

    #[test]
    fn rejects_zero_threads() {
        let err = ScanOptions::from_common(&common(&["--threads", "0"]), -1).expect_err("zero");
        assert!(err.to_string().contains("--threads"));
    }

    #[test]
    fn rejects_bad_size_string() {
        assert!(ScanOptions::from_common(&common(&["--max-artifact-size", "tenMb"]), -1).is_err());
    }

    #[test]
    fn rejects_invalid_cap() {
        assert!(ScanOptions::from_common(&common(&[]), -2).is_err());
    }
}
