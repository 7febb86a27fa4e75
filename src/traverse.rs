//! # Traversal Engine
//!
//! Generic walker over a provider hierarchy: containers (workspaces, orgs,
//! groups) → repos → runs → jobs → logs and artifacts. The engine consumes
//! whichever pagination cursor the adapter exposes, applies per-repo run
//! caps and the artifact size cap, and emits a bounded stream of work
//! items. Errors on a container are logged and skip that container; errors
//! deeper in the tree never abort the walk.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use crate::queue::{Payload, SpoolDir};
use crate::report::FindingKind;
use crate::transport::TransportError;

/// What the walk starts from.
#[derive(Debug, Clone)]
pub enum ScanScope {
    /// Repos owned by the token user.
    Owned,
    /// Repos the token user is a member of.
    Member,
    /// Publicly visible repos.
    Public,
    /// A named org / group / workspace / project.
    Container(String),
    /// A single repo by full name.
    Repo(String),
    /// A provider-side search query.
    Search(String),
}

impl fmt::Display for ScanScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanScope::Owned => write!(f, "owned"),
            ScanScope::Member => write!(f, "member"),
            ScanScope::Public => write!(f, "public"),
            ScanScope::Container(name) => write!(f, "container {name}"),
            ScanScope::Repo(name) => write!(f, "repo {name}"),
            ScanScope::Search(query) => write!(f, "search {query:?}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Container {
    pub id: String,
    pub name: String,
    pub web_url: String,
}

#[derive(Debug, Clone)]
pub struct Repo {
    pub id: String,
    pub full_name: String,
    pub web_url: String,
}

#[derive(Debug, Clone)]
pub struct Run {
    pub id: String,
    pub name: String,
    pub web_url: String,
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub name: String,
    pub web_url: String,
    /// Provider-specific report fields (Gitea run/job ids); carried onto
    /// every finding from this job's log.
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Artifact,
    Dotenv,
}

#[derive(Debug, Clone)]
pub struct ArtifactRef {
    pub id: String,
    pub name: String,
    /// Advertised size; `None` when the listing does not carry one.
    pub size: Option<u64>,
    pub download_url: String,
    pub kind: ArtifactKind,
}

/// Continuation token styles across the provider families. The engine
/// treats them as opaque and feeds back whatever the adapter returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cursor {
    Page(u64),
    Since(u64),
    Token(String),
    Url(String),
}

#[derive(Debug)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<Cursor>,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next: None,
        }
    }

    pub fn single(item: T) -> Self {
        Self {
            items: vec![item],
            next: None,
        }
    }

    pub fn of(items: Vec<T>, next: Option<Cursor>) -> Self {
        Self { items, next }
    }
}

/// Thin mapping of one provider's REST shape onto the generic walk.
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Probe the credentials; used before a walk starts.
    fn authenticated_user(&self) -> Result<String, TransportError>;

    fn list_containers(
        &self,
        cursor: Option<&Cursor>,
        scope: &ScanScope,
    ) -> Result<Page<Container>, TransportError>;

    fn list_repos(
        &self,
        cursor: Option<&Cursor>,
        container: &Container,
        scope: &ScanScope,
    ) -> Result<Page<Repo>, TransportError>;

    fn list_runs(&self, cursor: Option<&Cursor>, repo: &Repo) -> Result<Page<Run>, TransportError>;

    fn list_jobs(
        &self,
        cursor: Option<&Cursor>,
        repo: &Repo,
        run: &Run,
    ) -> Result<Page<Job>, TransportError>;

    /// Raw log bytes for a job; `None` when the job has no log. The bytes
    /// may themselves be a zip archive (GitHub); the orchestrator
    /// classifies uniformly.
    fn fetch_log(
        &self,
        repo: &Repo,
        run: &Run,
        job: &Job,
    ) -> Result<Option<Vec<u8>>, TransportError>;

    fn list_artifacts(
        &self,
        cursor: Option<&Cursor>,
        repo: &Repo,
        run: &Run,
    ) -> Result<Page<ArtifactRef>, TransportError>;

    /// Repo-level attachments (BitBucket downloads and dotenv artifacts).
    fn list_repo_artifacts(
        &self,
        _cursor: Option<&Cursor>,
        _repo: &Repo,
    ) -> Result<Page<ArtifactRef>, TransportError> {
        Ok(Page::empty())
    }

    fn download_artifact(
        &self,
        repo: &Repo,
        artifact: &ArtifactRef,
    ) -> Result<Vec<u8>, TransportError>;
}

/// A unit of scan work handed to the scan pool.
#[derive(Debug)]
pub enum WorkItem {
    Log {
        payload: Payload,
        location_url: String,
        job_name: String,
        build_name: String,
        source: FindingKind,
        extra: serde_json::Map<String, serde_json::Value>,
    },
    Archive {
        payload: Payload,
        root_artifact_name: String,
        location_url: String,
        depth: u32,
        repo: Option<String>,
    },
    /// A single file already extracted from an archive; produced by the
    /// extractor, never by the engine.
    File {
        bytes: Vec<u8>,
        file_name: String,
        root_artifact_name: String,
        location_url: String,
        repo: Option<String>,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct WalkLimits {
    /// Cap on runs (pipelines / workflows / builds) per repo; -1 disables.
    pub max_runs: i64,
    pub artifacts: bool,
    pub max_artifact_size: u64,
}

#[derive(Debug, Default, Clone)]
pub struct WalkStats {
    pub containers: u64,
    pub repos: u64,
    pub runs: u64,
    pub jobs: u64,
    pub logs_fetched: u64,
    pub artifacts_downloaded: u64,
    pub skipped_oversize: u64,
    pub errors: u64,
}

/// Emit callback; an error stops the whole walk (the scan pool is gone).
pub type EmitFn<'a> = dyn FnMut(WorkItem) -> anyhow::Result<()> + 'a;

pub struct TraversalEngine {
    adapter: Arc<dyn ProviderAdapter>,
    scope: ScanScope,
    limits: WalkLimits,
    cancel: Arc<AtomicBool>,
    spool: Option<SpoolDir>,
}

impl TraversalEngine {
    pub fn new(
        adapter: Arc<dyn ProviderAdapter>,
        scope: ScanScope,
        limits: WalkLimits,
        cancel: Arc<AtomicBool>,
        spool: Option<SpoolDir>,
    ) -> Self {
        Self {
            adapter,
            scope,
            limits,
            cancel,
            spool,
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Drive the walk to completion, emitting work items in traversal
    /// order. Returns the stats even when cancelled early.
    pub fn run(&self, emit: &mut EmitFn) -> WalkStats {
        let mut stats = WalkStats::default();
        let mut cursor: Option<Cursor> = None;

        'pages: loop {
            if self.cancelled() {
                break;
            }
            let page = match self.adapter.list_containers(cursor.as_ref(), &self.scope) {
                Ok(page) => page,
                Err(err) => {
                    warn!("listing containers for {} failed: {err}", self.scope);
                    stats.errors += 1;
                    break;
                }
            };
            let next = page.next;
            for container in page.items {
                if self.cancelled() {
                    break 'pages;
                }
                stats.containers += 1;
                if self.visit_container(&container, emit, &mut stats).is_err() {
                    break 'pages;
                }
            }
            match next {
                Some(c) => cursor = Some(c),
                None => break,
            }
        }

        stats
    }

    fn visit_container(
        &self,
        container: &Container,
        emit: &mut EmitFn,
        stats: &mut WalkStats,
    ) -> anyhow::Result<()> {
        let mut cursor: Option<Cursor> = None;
        loop {
            if self.cancelled() {
                return Ok(());
            }
            let page = match self.adapter.list_repos(cursor.as_ref(), container, &self.scope) {
                Ok(page) => page,
                Err(err) if err.is_auth() => {
                    warn!(
                        "no access to container {} ({err}); skipping",
                        container.name
                    );
                    stats.errors += 1;
                    return Ok(());
                }
                Err(err) => {
                    if err.is_not_found() {
                        debug!("container {} not found; skipping", container.name);
                    } else {
                        warn!("listing repos in {} failed: {err}", container.name);
                        stats.errors += 1;
                    }
                    return Ok(());
                }
            };
            let next = page.next;
            for repo in page.items {
                if self.cancelled() {
                    return Ok(());
                }
                stats.repos += 1;
                self.visit_repo(&repo, emit, stats)?;
            }
            match next {
                Some(c) => cursor = Some(c),
                None => return Ok(()),
            }
        }
    }

    fn visit_repo(&self, repo: &Repo, emit: &mut EmitFn, stats: &mut WalkStats) -> anyhow::Result<()> {
        debug!("scanning repo {}", repo.full_name);
        let cap = self.limits.max_runs;
        let mut seen_runs: i64 = 0;
        let mut cursor: Option<Cursor> = None;

        'pages: loop {
            if self.cancelled() {
                break;
            }
            let page = match self.adapter.list_runs(cursor.as_ref(), repo) {
                Ok(page) => page,
                Err(err) => {
                    self.note_child_error("runs", &repo.full_name, &err, stats);
                    break;
                }
            };
            let next = page.next;
            for run in page.items {
                if self.cancelled() {
                    break 'pages;
                }
                if cap >= 0 && seen_runs >= cap {
                    debug!("run cap {cap} reached for {}", repo.full_name);
                    break 'pages;
                }
                seen_runs += 1;
                stats.runs += 1;
                self.visit_run(repo, &run, emit, stats)?;
            }
            match next {
                Some(c) => cursor = Some(c),
                None => break,
            }
        }

        if self.limits.artifacts {
            self.visit_repo_artifacts(repo, emit, stats)?;
        }
        Ok(())
    }

    fn visit_run(
        &self,
        repo: &Repo,
        run: &Run,
        emit: &mut EmitFn,
        stats: &mut WalkStats,
    ) -> anyhow::Result<()> {
        let mut cursor: Option<Cursor> = None;
        loop {
            if self.cancelled() {
                return Ok(());
            }
            let page = match self.adapter.list_jobs(cursor.as_ref(), repo, run) {
                Ok(page) => page,
                Err(err) => {
                    self.note_child_error("jobs", &repo.full_name, &err, stats);
                    return Ok(());
                }
            };
            let next = page.next;
            for job in page.items {
                if self.cancelled() {
                    return Ok(());
                }
                stats.jobs += 1;
                self.visit_job(repo, run, &job, emit, stats)?;
            }
            match next {
                Some(c) => cursor = Some(c),
                None => break,
            }
        }

        if self.limits.artifacts {
            self.visit_run_artifacts(repo, run, emit, stats)?;
        }
        Ok(())
    }

    fn visit_job(
        &self,
        repo: &Repo,
        run: &Run,
        job: &Job,
        emit: &mut EmitFn,
        stats: &mut WalkStats,
    ) -> anyhow::Result<()> {
        let bytes = match self.adapter.fetch_log(repo, run, job) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Ok(()),
            Err(err) => {
                self.note_child_error("log", &job.name, &err, stats);
                return Ok(());
            }
        };
        if bytes.len() as u64 > self.limits.max_artifact_size {
            warn!(
                "log for job {} is {} bytes, over the {} cap; skipping",
                job.name,
                bytes.len(),
                self.limits.max_artifact_size
            );
            stats.skipped_oversize += 1;
            return Ok(());
        }
        stats.logs_fetched += 1;
        emit(WorkItem::Log {
            payload: Payload::new(bytes, self.spool.as_ref()),
            location_url: job.web_url.clone(),
            job_name: job.name.clone(),
            build_name: run.name.clone(),
            source: FindingKind::Log,
            extra: job.extra.clone(),
        })
    }

    fn visit_run_artifacts(
        &self,
        repo: &Repo,
        run: &Run,
        emit: &mut EmitFn,
        stats: &mut WalkStats,
    ) -> anyhow::Result<()> {
        let mut cursor: Option<Cursor> = None;
        loop {
            if self.cancelled() {
                return Ok(());
            }
            let page = match self.adapter.list_artifacts(cursor.as_ref(), repo, run) {
                Ok(page) => page,
                Err(err) => {
                    self.note_child_error("artifacts", &repo.full_name, &err, stats);
                    return Ok(());
                }
            };
            let next = page.next;
            for artifact in page.items {
                if self.cancelled() {
                    return Ok(());
                }
                self.emit_artifact(repo, &run.web_url, &artifact, emit, stats)?;
            }
            match next {
                Some(c) => cursor = Some(c),
                None => return Ok(()),
            }
        }
    }

    fn visit_repo_artifacts(
        &self,
        repo: &Repo,
        emit: &mut EmitFn,
        stats: &mut WalkStats,
    ) -> anyhow::Result<()> {
        let mut cursor: Option<Cursor> = None;
        loop {
            if self.cancelled() {
                return Ok(());
            }
            let page = match self.adapter.list_repo_artifacts(cursor.as_ref(), repo) {
                Ok(page) => page,
                Err(err) => {
                    self.note_child_error("downloads", &repo.full_name, &err, stats);
                    return Ok(());
                }
            };
            let next = page.next;
            for artifact in page.items {
                if self.cancelled() {
                    return Ok(());
                }
                self.emit_artifact(repo, &repo.web_url, &artifact, emit, stats)?;
            }
            match next {
                Some(c) => cursor = Some(c),
                None => return Ok(()),
            }
        }
    }

    fn emit_artifact(
        &self,
        repo: &Repo,
        location_url: &str,
        artifact: &ArtifactRef,
        emit: &mut EmitFn,
        stats: &mut WalkStats,
    ) -> anyhow::Result<()> {
        if let Some(size) = artifact.size {
            if size > self.limits.max_artifact_size {
                debug!(
                    "artifact {} advertises {size} bytes, over the {} cap; not downloading",
                    artifact.name, self.limits.max_artifact_size
                );
                stats.skipped_oversize += 1;
                return Ok(());
            }
        }

        let bytes = match self.adapter.download_artifact(repo, artifact) {
            Ok(bytes) => bytes,
            Err(err) => {
                self.note_child_error("artifact download", &artifact.name, &err, stats);
                return Ok(());
            }
        };
        if bytes.len() as u64 > self.limits.max_artifact_size {
            debug!(
                "artifact {} is {} bytes, over the {} cap; skipping",
                artifact.name,
                bytes.len(),
                self.limits.max_artifact_size
            );
            stats.skipped_oversize += 1;
            return Ok(());
        }
        stats.artifacts_downloaded += 1;

        let payload = Payload::new(bytes, self.spool.as_ref());
        match artifact.kind {
            ArtifactKind::Dotenv => emit(WorkItem::Log {
                payload,
                location_url: location_url.to_string(),
                job_name: artifact.name.clone(),
                build_name: String::new(),
                source: FindingKind::Dotenv,
                extra: serde_json::Map::new(),
            }),
            ArtifactKind::Artifact => emit(WorkItem::Archive {
                payload,
                root_artifact_name: artifact.name.clone(),
                location_url: location_url.to_string(),
                depth: 0,
                repo: Some(repo.full_name.clone()),
            }),
        }
    }

    /// Child errors never abort the walk: 404s are expected churn, auth
    /// errors are skips, everything else is logged.
    fn note_child_error(
        &self,
        what: &str,
        name: &str,
        err: &TransportError,
        stats: &mut WalkStats,
    ) {
        if err.is_not_found() {
            debug!("{what} for {name}: not found; skipping");
        } else if err.is_auth() {
            debug!("{what} for {name}: access denied ({err}); skipping");
        } else {
            warn!("{what} for {name}: {err}; skipping");
            stats.errors += 1;
        }
    }
}
