//! GitLab adapter. `Private-Token` auth, page-number pagination carried in
//! the `X-Next-Page` response header, job artifacts downloaded as the
//! per-job artifacts zip.

use serde::Deserialize;

use crate::providers::{encode_segment, normalize_base};
use crate::transport::{Headers, HttpTransport, TransportError};
use crate::traverse::{
    ArtifactKind, ArtifactRef, Container, Cursor, Job, Page, ProviderAdapter, Repo, Run, ScanScope,
};

const PER_PAGE: u32 = 100;

pub struct GitLabAdapter {
    http: HttpTransport,
    base: String,
}

#[derive(Debug, Deserialize)]
struct GitLabUser {
    username: String,
}

#[derive(Debug, Deserialize)]
struct GitLabProject {
    id: u64,
    path_with_namespace: String,
    web_url: String,
}

#[derive(Debug, Deserialize)]
struct GitLabPipeline {
    id: u64,
    #[serde(rename = "ref", default)]
    git_ref: Option<String>,
    web_url: String,
}

#[derive(Debug, Deserialize)]
struct GitLabJob {
    id: u64,
    name: String,
    #[serde(default)]
    web_url: Option<String>,
    #[serde(default)]
    artifacts_file: Option<GitLabArtifactsFile>,
}

#[derive(Debug, Deserialize)]
struct GitLabArtifactsFile {
    filename: String,
    size: u64,
}

impl GitLabAdapter {
    pub fn new(base_url: &str, http: HttpTransport) -> Self {
        Self {
            http,
            base: normalize_base(base_url),
        }
    }

    fn api(&self, path: &str) -> String {
        format!("{}/api/v4{path}", self.base)
    }

    fn page_param(cursor: Option<&Cursor>) -> u64 {
        match cursor {
            Some(Cursor::Page(n)) => *n,
            _ => 1,
        }
    }

    fn next_page(headers: &Headers) -> Option<Cursor> {
        headers
            .get("x-next-page")
            .filter(|v| !v.is_empty())
            .and_then(|v| v.parse().ok())
            .map(Cursor::Page)
    }

    fn repo_from(project: GitLabProject) -> Repo {
        Repo {
            id: project.id.to_string(),
            full_name: project.path_with_namespace,
            web_url: project.web_url,
        }
    }

    fn jobs_page(
        &self,
        cursor: Option<&Cursor>,
        repo: &Repo,
        run: &Run,
    ) -> Result<(Vec<GitLabJob>, Option<Cursor>), TransportError> {
        let page = Self::page_param(cursor);
        let url = self.api(&format!(
            "/projects/{}/pipelines/{}/jobs?per_page={PER_PAGE}&page={page}",
            repo.id, run.id
        ));
        let (jobs, headers): (Vec<GitLabJob>, _) = self.http.get_json(&url)?;
        Ok((jobs, Self::next_page(&headers)))
    }
}

impl ProviderAdapter for GitLabAdapter {
    fn name(&self) -> &'static str {
        "gitlab"
    }

    fn authenticated_user(&self) -> Result<String, TransportError> {
        let (user, _): (GitLabUser, _) = self.http.get_json(&self.api("/user"))?;
        Ok(user.username)
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
        if let ScanScope::Repo(path) = scope {
            let url = self.api(&format!("/projects/{}", encode_segment(path)));
            let (project, _): (GitLabProject, _) = self.http.get_json(&url)?;
            return Ok(Page::single(Self::repo_from(project)));
        }

        let page = Self::page_param(cursor);
        let filter = match scope {
            ScanScope::Owned => "owned=true".to_string(),
            ScanScope::Member => "membership=true".to_string(),
            ScanScope::Public => "visibility=public&order_by=id&sort=asc".to_string(),
            ScanScope::Search(query) => format!("search={}", encode_segment(query)),
            ScanScope::Container(group) => {
                let url = self.api(&format!(
                    "/groups/{}/projects?include_subgroups=true&simple=true&per_page={PER_PAGE}&page={page}",
                    encode_segment(group)
                ));
                let (projects, headers): (Vec<GitLabProject>, _) = self.http.get_json(&url)?;
                return Ok(Page::of(
                    projects.into_iter().map(Self::repo_from).collect(),
                    Self::next_page(&headers),
                ));
            }
            ScanScope::Repo(_) => unreachable!("handled above"),
        };
        let url = self.api(&format!(
            "/projects?{filter}&simple=true&per_page={PER_PAGE}&page={page}"
        ));
        let (projects, headers): (Vec<GitLabProject>, _) = self.http.get_json(&url)?;
        Ok(Page::of(
            projects.into_iter().map(Self::repo_from).collect(),
            Self::next_page(&headers),
        ))
    }

    fn list_runs(&self, cursor: Option<&Cursor>, repo: &Repo) -> Result<Page<Run>, TransportError> {
        let page = Self::page_param(cursor);
        let url = self.api(&format!(
            "/projects/{}/pipelines?per_page={PER_PAGE}&page={page}",
            repo.id
        ));
        let (pipelines, headers): (Vec<GitLabPipeline>, _) = self.http.get_json(&url)?;
        let runs = pipelines
            .into_iter()
            .map(|p| Run {
                id: p.id.to_string(),
                name: match &p.git_ref {
                    Some(r) => format!("#{} ({r})", p.id),
                    None => format!("#{}", p.id),
                },
                web_url: p.web_url,
            })
            .collect();
        Ok(Page::of(runs, Self::next_page(&headers)))
    }

    fn list_jobs(
        &self,
        cursor: Option<&Cursor>,
        repo: &Repo,
        run: &Run,
    ) -> Result<Page<Job>, TransportError> {
        let (jobs, next) = self.jobs_page(cursor, repo, run)?;
        let jobs = jobs
            .into_iter()
            .map(|j| Job {
                web_url: j
                    .web_url
                    .unwrap_or_else(|| format!("{}/{}/-/jobs/{}", self.base, repo.full_name, j.id)),
                id: j.id.to_string(),
                name: j.name,
                extra: serde_json::Map::new(),
            })
            .collect();
        Ok(Page::of(jobs, next))
    }

    fn fetch_log(
        &self,
        repo: &Repo,
        _run: &Run,
        job: &Job,
    ) -> Result<Option<Vec<u8>>, TransportError> {
        let url = self.api(&format!("/projects/{}/jobs/{}/trace", repo.id, job.id));
        match self.http.get(&url) {
            Ok(resp) if resp.body.is_empty() => Ok(None),
            Ok(resp) => Ok(Some(resp.body)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// GitLab artifacts hang off jobs; the per-run listing maps each job
    /// with an artifacts archive to one downloadable ref.
    fn list_artifacts(
        &self,
        cursor: Option<&Cursor>,
        repo: &Repo,
        run: &Run,
    ) -> Result<Page<ArtifactRef>, TransportError> {
        let (jobs, next) = self.jobs_page(cursor, repo, run)?;
        let artifacts = jobs
            .into_iter()
            .filter_map(|job| {
                job.artifacts_file.map(|file| ArtifactRef {
                    id: job.id.to_string(),
                    name: format!("{}/{}", job.name, file.filename),
                    size: Some(file.size),
                    download_url: self
                        .api(&format!("/projects/{}/jobs/{}/artifacts", repo.id, job.id)),
                    kind: ArtifactKind::Artifact,
                })
            })
            .collect();
        Ok(Page::of(artifacts, next))
    }

    fn download_artifact(
        &self,
        _repo: &Repo,
        artifact: &ArtifactRef,
    ) -> Result<Vec<u8>, TransportError> {
        Ok(self.http.get(&artifact.download_url)?.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportOptions;

    fn adapter() -> GitLabAdapter {
        let http = HttpTransport::new(TransportOptions::default()).expect("transport");
        GitLabAdapter::new("https://gitlab.example.com/", http)
    }

    #[test]
    fn api_urls_are_rooted_at_v4() {
        let gl = adapter();
        assert_eq!(
            gl.api("/projects/1/pipelines?page=1"),
            "https://gitlab.example.com/api/v4/projects/1/pipelines?page=1"
        );
    }

    #[test]
    fn next_page_comes_from_header() {
        let headers = Headers::from_pairs(&[("x-next-page", "3")]);
        assert_eq!(GitLabAdapter::next_page(&headers), Some(Cursor::Page(3)));
        let empty = Headers::from_pairs(&[("x-next-page", "")]);
        assert_eq!(GitLabAdapter::next_page(&empty), None);
        assert_eq!(GitLabAdapter::next_page(&Headers::from_pairs(&[])), None);
    }

    #[test]
    fn parses_project_and_pipeline_payloads() {
        let project: GitLabProject = serde_json::from_str(
            r#"{"id": 42, "path_with_namespace": "group/app", "web_url": "https://gitlab.example.com/group/app", "default_branch": "main"}"#,
        )
        .expect("project");
        let repo = GitLabAdapter::repo_from(project);
        assert_eq!(repo.id, "42");
        assert_eq!(repo.full_name, "group/app");

        let pipeline: GitLabPipeline = serde_json::from_str(
            r#"{"id": 7, "ref": "main", "status": "success", "web_url": "https://gitlab.example.com/group/app/-/pipelines/7"}"#,
        )
        .expect("pipeline");
        assert_eq!(pipeline.git_ref.as_deref(), Some("main"));
    }

    #[test]
    fn job_without_web_url_gets_reconstructed_one() {
        let job: GitLabJob =
            serde_json::from_str(r#"{"id": 9, "name": "build", "stage": "test"}"#).expect("job");
        assert!(job.web_url.is_none());
        assert!(job.artifacts_file.is_none());
    }
}
