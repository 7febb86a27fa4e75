//! GitHub Actions adapter. Bearer auth, `Link: rel="next"` pagination, and
//! the public-repo walk over ascending `since` ids with a per-run dedup
//! set so each repo is scanned at most once.

use std::collections::HashSet;
use std::sync::Mutex;

use serde::Deserialize;

use crate::providers::{encode_segment, normalize_base, parse_link_next};
use crate::transport::{Headers, HttpTransport, TransportError};
use crate::traverse::{
    ArtifactKind, ArtifactRef, Container, Cursor, Job, Page, ProviderAdapter, Repo, Run, ScanScope,
};

const PER_PAGE: u32 = 100;

const API_HEADERS: &[(&str, &str)] = &[
    ("Accept", "application/vnd.github+json"),
    ("X-GitHub-Api-Version", "2022-11-28"),
];

pub struct GitHubAdapter {
    http: HttpTransport,
    base: String,
    /// Repo ids already emitted by the public walk this run.
    seen_public: Mutex<HashSet<u64>>,
}

#[derive(Debug, Deserialize)]
struct GitHubUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GitHubRepo {
    id: u64,
    full_name: String,
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct WorkflowRunsPage {
    workflow_runs: Vec<WorkflowRun>,
}

#[derive(Debug, Deserialize)]
struct WorkflowRun {
    id: u64,
    #[serde(default)]
    name: Option<String>,
    run_number: u64,
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct JobsPage {
    jobs: Vec<WorkflowJob>,
}

#[derive(Debug, Deserialize)]
struct WorkflowJob {
    id: u64,
    name: String,
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct ArtifactsPage {
    artifacts: Vec<WorkflowArtifact>,
}

#[derive(Debug, Deserialize)]
struct WorkflowArtifact {
    id: u64,
    name: String,
    size_in_bytes: u64,
    archive_download_url: String,
    #[serde(default)]
    expired: bool,
}

impl GitHubAdapter {
    pub fn new(base_url: &str, http: HttpTransport) -> Self {
        Self {
            http,
            base: normalize_base(base_url),
            seen_public: Mutex::new(HashSet::new()),
        }
    }

    fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<(T, Headers), TransportError> {
        let resp = self.http.get_with(url, API_HEADERS)?;
        let body = resp.json()?;
        Ok((body, resp.headers))
    }

    fn link_cursor(headers: &Headers) -> Option<Cursor> {
        headers
            .get("link")
            .and_then(parse_link_next)
            .map(Cursor::Url)
    }

    fn repo_from(repo: GitHubRepo) -> Repo {
        Repo {
            id: repo.id.to_string(),
            full_name: repo.full_name,
            web_url: repo.html_url,
        }
    }

    fn list_public(&self, cursor: Option<&Cursor>) -> Result<Page<Repo>, TransportError> {
        let since = match cursor {
            Some(Cursor::Since(id)) => *id,
            _ => 0,
        };
        let url = format!("{}/repositories?since={since}", self.base);
        let (repos, _): (Vec<GitHubRepo>, _) = self.get_json(&url)?;
        let next = repos.iter().map(|r| r.id).max().map(Cursor::Since);

        let mut seen = self.seen_public.lock().expect("public dedup set");
        let fresh: Vec<Repo> = repos
            .into_iter()
            .filter(|r| seen.insert(r.id))
            .map(Self::repo_from)
            .collect();
        Ok(Page::of(fresh, next))
    }
}

impl ProviderAdapter for GitHubAdapter {
    fn name(&self) -> &'static str {
        "github"
    }

    fn authenticated_user(&self) -> Result<String, TransportError> {
        let (user, _): (GitHubUser, _) = self.get_json(&format!("{}/user", self.base))?;
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
        let url = match scope {
            ScanScope::Repo(full_name) => {
                let url = format!("{}/repos/{full_name}", self.base);
                let (repo, _): (GitHubRepo, _) = self.get_json(&url)?;
                return Ok(Page::single(Self::repo_from(repo)));
            }
            ScanScope::Public => return self.list_public(cursor),
            ScanScope::Owned | ScanScope::Member => {
                format!("{}/user/repos?per_page={PER_PAGE}", self.base)
            }
            ScanScope::Container(org) => {
                format!("{}/orgs/{org}/repos?per_page={PER_PAGE}", self.base)
            }
            ScanScope::Search(query) => {
                format!(
                    "{}/search/repositories?q={}&per_page={PER_PAGE}",
                    self.base,
                    encode_segment(query)
                )
            }
        };
        let url = match cursor {
            Some(Cursor::Url(next)) => next.clone(),
            _ => url,
        };

        if matches!(scope, ScanScope::Search(_)) {
            #[derive(Debug, Deserialize)]
            struct SearchPage {
                items: Vec<GitHubRepo>,
            }
            let (page, headers): (SearchPage, _) = self.get_json(&url)?;
            return Ok(Page::of(
                page.items.into_iter().map(Self::repo_from).collect(),
                Self::link_cursor(&headers),
            ));
        }

        let (repos, headers): (Vec<GitHubRepo>, _) = self.get_json(&url)?;
        Ok(Page::of(
            repos.into_iter().map(Self::repo_from).collect(),
            Self::link_cursor(&headers),
        ))
    }

    fn list_runs(&self, cursor: Option<&Cursor>, repo: &Repo) -> Result<Page<Run>, TransportError> {
        let url = match cursor {
            Some(Cursor::Url(next)) => next.clone(),
            _ => format!(
                "{}/repos/{}/actions/runs?per_page={PER_PAGE}",
                self.base, repo.full_name
            ),
        };
        let (page, headers): (WorkflowRunsPage, _) = self.get_json(&url)?;
        let runs = page
            .workflow_runs
            .into_iter()
            .map(|r| Run {
                id: r.id.to_string(),
                name: r.name.unwrap_or_else(|| format!("#{}", r.run_number)),
                web_url: r.html_url,
            })
            .collect();
        Ok(Page::of(runs, Self::link_cursor(&headers)))
    }

    fn list_jobs(
        &self,
        cursor: Option<&Cursor>,
        repo: &Repo,
        run: &Run,
    ) -> Result<Page<Job>, TransportError> {
        let url = match cursor {
            Some(Cursor::Url(next)) => next.clone(),
            _ => format!(
                "{}/repos/{}/actions/runs/{}/jobs?per_page={PER_PAGE}",
                self.base, repo.full_name, run.id
            ),
        };
        let (page, headers): (JobsPage, _) = self.get_json(&url)?;
        let jobs = page
            .jobs
            .into_iter()
            .map(|j| Job {
                id: j.id.to_string(),
                name: j.name,
                web_url: j.html_url,
                extra: serde_json::Map::new(),
            })
            .collect();
        Ok(Page::of(jobs, Self::link_cursor(&headers)))
    }

    fn fetch_log(
        &self,
        repo: &Repo,
        _run: &Run,
        job: &Job,
    ) -> Result<Option<Vec<u8>>, TransportError> {
        let url = format!(
            "{}/repos/{}/actions/jobs/{}/logs",
            self.base, repo.full_name, job.id
        );
        match self.http.get_with(&url, API_HEADERS) {
            Ok(resp) if resp.body.is_empty() => Ok(None),
            Ok(resp) => Ok(Some(resp.body)),
            // Expired logs come back 404 or 410.
            Err(err) if matches!(err.status(), Some(404) | Some(410)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn list_artifacts(
        &self,
        cursor: Option<&Cursor>,
        repo: &Repo,
        run: &Run,
    ) -> Result<Page<ArtifactRef>, TransportError> {
        let url = match cursor {
            Some(Cursor::Url(next)) => next.clone(),
            _ => format!(
                "{}/repos/{}/actions/runs/{}/artifacts?per_page={PER_PAGE}",
                self.base, repo.full_name, run.id
            ),
        };
        let (page, headers): (ArtifactsPage, _) = self.get_json(&url)?;
        let artifacts = page
            .artifacts
            .into_iter()
            .filter(|a| !a.expired)
            .map(|a| ArtifactRef {
                id: a.id.to_string(),
                name: a.name,
                size: Some(a.size_in_bytes),
                download_url: a.archive_download_url,
                kind: ArtifactKind::Artifact,
            })
            .collect();
        Ok(Page::of(artifacts, Self::link_cursor(&headers)))
    }

    fn download_artifact(
        &self,
        _repo: &Repo,
        artifact: &ArtifactRef,
    ) -> Result<Vec<u8>, TransportError> {
        Ok(self.http.get_with(&artifact.download_url, API_HEADERS)?.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportOptions;

    fn adapter() -> GitHubAdapter {
        let http = HttpTransport::new(TransportOptions::default()).expect("transport");
        GitHubAdapter::new("https://api.github.com", http)
    }

    #[test]
    fn link_header_drives_pagination() {
        let headers = Headers::from_pairs(&[(
            "link",
            "<https://api.github.com/x?page=2>; rel=\"next\", <https://api.github.com/x?page=5>; rel=\"last\"",
        )]);
        assert_eq!(
            GitHubAdapter::link_cursor(&headers),
            Some(Cursor::Url("https://api.github.com/x?page=2".to_string()))
        );
        assert_eq!(GitHubAdapter::link_cursor(&Headers::from_pairs(&[])), None);
    }

    #[test]
    fn parses_workflow_runs_payload() {
        let page: WorkflowRunsPage = serde_json::from_str(
            r#"{"total_count": 1, "workflow_runs": [{"id": 30433642, "name": "CI", "run_number": 562, "status": "completed", "html_url": "https://github.com/o/r/actions/runs/30433642"}]}"#,
        )
        .expect("runs");
        assert_eq!(page.workflow_runs.len(), 1);
        assert_eq!(page.workflow_runs[0].run_number, 562);
    }

    #[test]
    fn expired_artifacts_are_filtered() {
        let page: ArtifactsPage = serde_json::from_str(
            r#"{"artifacts": [
                {"id": 1, "name": "live", "size_in_bytes": 10, "archive_download_url": "https://api.github.com/a/1/zip", "expired": false},
                {"id": 2, "name": "gone", "size_in_bytes": 10, "archive_download_url": "https://api.github.com/a/2/zip", "expired": true}
            ]}"#,
        )
        .expect("artifacts");
        let live: Vec<_> = page.artifacts.into_iter().filter(|a| !a.expired).collect();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].name, "live");
    }

    #[test]
    fn public_walk_deduplicates_repo_ids() {
        let gh = adapter();
        let mut seen = gh.seen_public.lock().expect("set");
        assert!(seen.insert(10));
        assert!(!seen.insert(10));
    }
}
