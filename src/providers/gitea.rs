//! Gitea adapter. `Authorization: token` auth and page-number pagination.
//! Gitea action tasks double as runs and jobs: every task owns exactly one
//! log, so the job level collapses to a single synthetic entry per run.

use serde::Deserialize;

use crate::providers::normalize_base;
use crate::transport::{HttpTransport, TransportError};
use crate::traverse::{
    ArtifactKind, ArtifactRef, Container, Cursor, Job, Page, ProviderAdapter, Repo, Run, ScanScope,
};

const PAGE_LIMIT: usize = 50;

pub struct GiteaAdapter {
    http: HttpTransport,
    base: String,
}

#[derive(Debug, Deserialize)]
struct GiteaUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GiteaRepo {
    id: u64,
    full_name: String,
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct TasksPage {
    workflow_runs: Vec<GiteaTask>,
}

#[derive(Debug, Deserialize)]
struct GiteaTask {
    id: u64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    display_title: Option<String>,
    #[serde(default)]
    run_number: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ArtifactsPage {
    artifacts: Vec<GiteaArtifact>,
}

#[derive(Debug, Deserialize)]
struct GiteaArtifact {
    id: u64,
    name: String,
    size_in_bytes: u64,
    archive_download_url: String,
    #[serde(default)]
    workflow_run: Option<GiteaArtifactRun>,
}

#[derive(Debug, Deserialize)]
struct GiteaArtifactRun {
    id: u64,
}

impl GiteaAdapter {
    pub fn new(base_url: &str, http: HttpTransport) -> Self {
        Self {
            http,
            base: normalize_base(base_url),
        }
    }

    fn api(&self, path: &str) -> String {
        format!("{}/api/v1{path}", self.base)
    }

    fn page_param(cursor: Option<&Cursor>) -> u64 {
        match cursor {
            Some(Cursor::Page(n)) => *n,
            _ => 1,
        }
    }

    /// Gitea responses carry no next-page header on these endpoints; a
    /// full page means there may be more.
    fn next_page(page: u64, returned: usize) -> Option<Cursor> {
        if returned >= PAGE_LIMIT {
            Some(Cursor::Page(page + 1))
        } else {
            None
        }
    }

    fn run_web_url(&self, repo: &Repo, task_id: u64) -> String {
        format!("{}/{}/actions/runs/{task_id}", self.base, repo.full_name)
    }
}

impl ProviderAdapter for GiteaAdapter {
    fn name(&self) -> &'static str {
        "gitea"
    }

    fn authenticated_user(&self) -> Result<String, TransportError> {
        let (user, _): (GiteaUser, _) = self.http.get_json(&self.api("/user"))?;
        Ok(user.login)
    }

    fn list_containers(
        &self,
        _cursor: Option<&Cursor>,
        scope: &ScanScope,
    ) -> Result<Page<Container>, TransportError> {
        Ok(Page::single(Container {
            id: String::new(),
            name: scope.to_string(),
            web_url: self.base.clone(),
        }))
    }

    fn list_repos(
        &self,
        cursor: Option<&Cursor>,
        _container: &Container,
        scope: &ScanScope,
    ) -> Result<Page<Repo>, TransportError> {
        let page = Self::page_param(cursor);
        let url = match scope {
            ScanScope::Repo(full_name) => {
                let url = self.api(&format!("/repos/{full_name}"));
                let (repo, _): (GiteaRepo, _) = self.http.get_json(&url)?;
                return Ok(Page::single(Repo {
                    id: repo.id.to_string(),
                    full_name: repo.full_name,
                    web_url: repo.html_url,
                }));
            }
            ScanScope::Container(org) => {
                self.api(&format!("/orgs/{org}/repos?page={page}&limit={PAGE_LIMIT}"))
            }
            _ => self.api(&format!("/user/repos?page={page}&limit={PAGE_LIMIT}")),
        };
        let (repos, _): (Vec<GiteaRepo>, _) = self.http.get_json(&url)?;
        let returned = repos.len();
        let repos = repos
            .into_iter()
            .map(|r| Repo {
                id: r.id.to_string(),
                full_name: r.full_name,
                web_url: r.html_url,
            })
            .collect();
        Ok(Page::of(repos, Self::next_page(page, returned)))
    }

    fn list_runs(&self, cursor: Option<&Cursor>, repo: &Repo) -> Result<Page<Run>, TransportError> {
        let page = Self::page_param(cursor);
        let url = self.api(&format!(
            "/repos/{}/actions/tasks?page={page}&limit={PAGE_LIMIT}",
            repo.full_name
        ));
        let (tasks, _): (TasksPage, _) = self.http.get_json(&url)?;
        let returned = tasks.workflow_runs.len();
        let runs = tasks
            .workflow_runs
            .into_iter()
            .map(|t| Run {
                id: t.id.to_string(),
                name: t
                    .display_title
                    .or(t.name)
                    .unwrap_or_else(|| match t.run_number {
                        Some(n) => format!("#{n}"),
                        None => format!("task {}", t.id),
                    }),
                web_url: self.run_web_url(repo, t.id),
            })
            .collect();
        Ok(Page::of(runs, Self::next_page(page, returned)))
    }

    fn list_jobs(
        &self,
        _cursor: Option<&Cursor>,
        _repo: &Repo,
        run: &Run,
    ) -> Result<Page<Job>, TransportError> {
        // The task id is both the run id and the job id; reports carry
        // them as custom fields.
        let mut extra = serde_json::Map::new();
        if let Ok(task_id) = run.id.parse::<u64>() {
            extra.insert("run_id".to_string(), serde_json::json!(task_id));
            extra.insert("job_id".to_string(), serde_json::json!(task_id));
        }
        Ok(Page::single(Job {
            id: run.id.clone(),
            name: run.name.clone(),
            web_url: run.web_url.clone(),
            extra,
        }))
    }

    fn fetch_log(
        &self,
        repo: &Repo,
        _run: &Run,
        job: &Job,
    ) -> Result<Option<Vec<u8>>, TransportError> {
        let url = self.api(&format!(
            "/repos/{}/actions/tasks/{}/logs",
            repo.full_name, job.id
        ));
        match self.http.get(&url) {
            Ok(resp) if resp.body.is_empty() => Ok(None),
            Ok(resp) => Ok(Some(resp.body)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn list_artifacts(
        &self,
        cursor: Option<&Cursor>,
        repo: &Repo,
        run: &Run,
    ) -> Result<Page<ArtifactRef>, TransportError> {
        let page = Self::page_param(cursor);
        let url = self.api(&format!(
            "/repos/{}/actions/artifacts?page={page}&limit={PAGE_LIMIT}",
            repo.full_name
        ));
        let (listing, _): (ArtifactsPage, _) = self.http.get_json(&url)?;
        let returned = listing.artifacts.len();
        let run_id: Option<u64> = run.id.parse().ok();
        let artifacts = listing
            .artifacts
            .into_iter()
            .filter(|a| match (&a.workflow_run, run_id) {
                (Some(owner), Some(id)) => owner.id == id,
                _ => true,
            })
            .map(|a| ArtifactRef {
                id: a.id.to_string(),
                name: a.name,
                size: Some(a.size_in_bytes),
                download_url: a.archive_download_url,
                kind: ArtifactKind::Artifact,
            })
            .collect();
        Ok(Page::of(artifacts, Self::next_page(page, returned)))
    }

    fn download_artifact(
        &self,
        _repo: &Repo,
        artifact: &ArtifactRef,
    ) -> Result<Vec<u8>, TransportError> {
        Ok(self.http.get(&artifact.download_url)?.body)
    }
}
