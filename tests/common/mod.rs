//! Shared helpers for the integration tests: in-memory zip building and a
//! scriptable in-memory provider adapter.
#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use leakhound::transport::TransportError;
use leakhound::traverse::{
    ArtifactKind, ArtifactRef, Container, Cursor as PageCursor, Job, Page, ProviderAdapter, Repo,
    Run, ScanScope,
};
use zip::write::SimpleFileOptions;

pub fn zip_of(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, bytes) in files {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .expect("start file");
        writer.write_all(bytes).expect("write entry");
    }
    writer.finish().expect("finish").into_inner()
}

/// A mock artifact served by [`MockAdapter`].
pub struct MockArtifact {
    pub name: String,
    /// Size advertised in the listing (may lie).
    pub advertised_size: u64,
    pub bytes: Vec<u8>,
    pub kind: ArtifactKind,
}

/// One job with its log.
pub struct MockJob {
    pub name: String,
    pub log: Option<Vec<u8>>,
}

pub struct MockRun {
    pub jobs: Vec<MockJob>,
    pub artifacts: Vec<MockArtifact>,
}

/// In-memory provider: one repo, runs served in pages of `page_size`.
pub struct MockAdapter {
    pub repo_name: String,
    pub runs: Vec<MockRun>,
    pub page_size: usize,
    pub run_pages_requested: AtomicU64,
    pub downloads_requested: Mutex<Vec<String>>,
}

impl MockAdapter {
    pub fn new(repo_name: &str, runs: Vec<MockRun>, page_size: usize) -> Self {
        Self {
            repo_name: repo_name.to_string(),
            runs,
            page_size,
            run_pages_requested: AtomicU64::new(0),
            downloads_requested: Mutex::new(Vec::new()),
        }
    }

    pub fn log_run(log: &[u8]) -> MockRun {
        MockRun {
            jobs: vec![MockJob {
                name: "build".to_string(),
                log: Some(log.to_vec()),
            }],
            artifacts: Vec::new(),
        }
    }

    pub fn artifact_run(artifacts: Vec<MockArtifact>) -> MockRun {
        MockRun {
            jobs: Vec::new(),
            artifacts,
        }
    }
}

impl ProviderAdapter for MockAdapter {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn authenticated_user(&self) -> Result<String, TransportError> {
        Ok("mock-user".to_string())
    }

    fn list_containers(
        &self,
        _cursor: Option<&PageCursor>,
        scope: &ScanScope,
    ) -> Result<Page<Container>, TransportError> {
        Ok(Page::single(Container {
            id: "c1".to_string(),
            name: scope.to_string(),
            web_url: "https://ci.example.com".to_string(),
        }))
    }

    fn list_repos(
        &self,
        _cursor: Option<&PageCursor>,
        _container: &Container,
        _scope: &ScanScope,
    ) -> Result<Page<Repo>, TransportError> {
        Ok(Page::single(Repo {
            id: "1".to_string(),
            full_name: self.repo_name.clone(),
            web_url: format!("https://ci.example.com/{}", self.repo_name),
        }))
    }

    fn list_runs(
        &self,
        cursor: Option<&PageCursor>,
        repo: &Repo,
    ) -> Result<Page<Run>, TransportError> {
        self.run_pages_requested.fetch_add(1, Ordering::SeqCst);
        let page = match cursor {
            Some(PageCursor::Page(n)) => *n as usize,
            _ => 1,
        };
        let start = (page - 1) * self.page_size;
        let end = (start + self.page_size).min(self.runs.len());
        let items = (start..end)
            .map(|i| Run {
                id: i.to_string(),
                name: format!("#{}", i + 1),
                web_url: format!("{}/pipelines/{}", repo.web_url, i + 1),
            })
            .collect();
        let next = if end < self.runs.len() {
            Some(PageCursor::Page(page as u64 + 1))
        } else {
            None
        };
        Ok(Page::of(items, next))
    }

    fn list_jobs(
        &self,
        _cursor: Option<&PageCursor>,
        _repo: &Repo,
        run: &Run,
    ) -> Result<Page<Job>, TransportError> {
        let index: usize = run.id.parse().expect("run id");
        let jobs = self.runs[index]
            .jobs
            .iter()
            .enumerate()
            .map(|(j, job)| {
                let mut extra = serde_json::Map::new();
                extra.insert("run_id".to_string(), serde_json::json!(index + 1));
                extra.insert("job_id".to_string(), serde_json::json!(j));
                Job {
                    id: format!("{index}-{j}"),
                    name: job.name.clone(),
                    web_url: format!("{}/jobs/{j}", run.web_url),
                    extra,
                }
            })
            .collect();
        Ok(Page::of(jobs, None))
    }

    fn fetch_log(
        &self,
        _repo: &Repo,
        run: &Run,
        job: &Job,
    ) -> Result<Option<Vec<u8>>, TransportError> {
        let run_index: usize = run.id.parse().expect("run id");
        let job_index: usize = job
            .id
            .split('-')
            .nth(1)
            .and_then(|s| s.parse().ok())
            .expect("job id");
        Ok(self.runs[run_index].jobs[job_index].log.clone())
    }

    fn list_artifacts(
        &self,
        _cursor: Option<&PageCursor>,
        _repo: &Repo,
        run: &Run,
    ) -> Result<Page<ArtifactRef>, TransportError> {
        let index: usize = run.id.parse().expect("run id");
        let artifacts = self.runs[index]
            .artifacts
            .iter()
            .map(|a| ArtifactRef {
                id: format!("{index}/{}", a.name),
                name: a.name.clone(),
                size: Some(a.advertised_size),
                download_url: format!("mock://artifact/{index}/{}", a.name),
                kind: a.kind,
            })
            .collect();
        Ok(Page::of(artifacts, None))
    }

    fn download_artifact(
        &self,
        _repo: &Repo,
        artifact: &ArtifactRef,
    ) -> Result<Vec<u8>, TransportError> {
        self.downloads_requested
            .lock()
            .expect("downloads log")
            .push(artifact.name.clone());
        let (index, name) = artifact.id.split_once('/').expect("artifact id");
        let index: usize = index.parse().expect("artifact run index");
        let found = self.runs[index]
            .artifacts
            .iter()
            .find(|a| a.name == name)
            .expect("artifact exists");
        Ok(found.bytes.clone())
    }
}
