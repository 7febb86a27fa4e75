//! BitBucket Cloud adapter. Basic auth with app passwords, pagination via
//! the `next` URL in the response body, and the `api.<host>` → `<host>`
//! substitution for human-facing URLs. Repo-level downloads (and, with a
//! session cookie, the internal dotenv artifact endpoint) are exposed as
//! repo artifacts.

use serde::Deserialize;
use url::Url;

use crate::providers::normalize_base;
use crate::transport::{HttpTransport, TransportError};
use crate::traverse::{
    ArtifactKind, ArtifactRef, Container, Cursor, Job, Page, ProviderAdapter, Repo, Run, ScanScope,
};

const PAGE_LEN: u32 = 100;

pub struct BitbucketAdapter {
    http: HttpTransport,
    base: String,
    web_base: String,
    has_cookie: bool,
}

#[derive(Debug, Deserialize)]
struct BitbucketUser {
    username: String,
}

#[derive(Debug, Deserialize)]
struct Paginated<T> {
    values: Vec<T>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BitbucketWorkspace {
    slug: String,
    #[serde(default)]
    links: Links,
}

#[derive(Debug, Deserialize)]
struct BitbucketRepo {
    uuid: String,
    full_name: String,
    #[serde(default)]
    links: Links,
}

#[derive(Debug, Default, Deserialize)]
struct Links {
    #[serde(default)]
    html: Option<Href>,
    #[serde(rename = "self", default)]
    self_link: Option<Href>,
}

#[derive(Debug, Deserialize)]
struct Href {
    href: String,
}

#[derive(Debug, Deserialize)]
struct BitbucketPipeline {
    uuid: String,
    build_number: u64,
}

#[derive(Debug, Deserialize)]
struct BitbucketStep {
    uuid: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BitbucketDownload {
    name: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    links: Links,
}

impl BitbucketAdapter {
    pub fn new(base_url: &str, http: HttpTransport, has_cookie: bool) -> Self {
        let base = normalize_base(base_url);
        Self {
            web_base: web_base_of(&base),
            http,
            base,
            has_cookie,
        }
    }

    fn cursor_url(cursor: Option<&Cursor>, first: String) -> String {
        match cursor {
            Some(Cursor::Url(next)) => next.clone(),
            _ => first,
        }
    }

    fn next_of(next: Option<String>) -> Option<Cursor> {
        next.map(Cursor::Url)
    }

    /// The unofficial dotenv artifact listing behind a browser session.
    fn list_dotenv_artifacts(&self, repo: &Repo) -> Result<Vec<ArtifactRef>, TransportError> {
        let url = format!(
            "{}/!api/internal/repositories/{}/artifacts",
            self.web_base, repo.full_name
        );
        let listing: Paginated<BitbucketDownload> = self.http.get(&url)?.json()?;
        Ok(listing
            .values
            .into_iter()
            .map(|d| ArtifactRef {
                id: d.name.clone(),
                download_url: format!(
                    "{}/!api/internal/repositories/{}/artifacts/{}",
                    self.web_base, repo.full_name, d.name
                ),
                name: d.name,
                size: d.size,
                kind: ArtifactKind::Dotenv,
            })
            .collect())
    }
}

/// `api.bitbucket.org` serves the REST API; the matching web pages live on
/// the host without the `api.` prefix.
fn web_base_of(base: &str) -> String {
    if let Ok(url) = Url::parse(base) {
        if let Some(host) = url.host_str() {
            let web_host = host.strip_prefix("api.").unwrap_or(host);
            return format!("{}://{web_host}", url.scheme());
        }
    }
    base.to_string()
}

impl ProviderAdapter for BitbucketAdapter {
    fn name(&self) -> &'static str {
        "bitbucket"
    }

    fn authenticated_user(&self) -> Result<String, TransportError> {
        let (user, _): (BitbucketUser, _) = self.http.get_json(&format!("{}/user", self.base))?;
        Ok(user.username)
    }

    fn list_containers(
        &self,
        cursor: Option<&Cursor>,
        scope: &ScanScope,
    ) -> Result<Page<Container>, TransportError> {
        match scope {
            ScanScope::Container(workspace) => Ok(Page::single(Container {
                id: workspace.clone(),
                name: workspace.clone(),
                web_url: format!("{}/{workspace}", self.web_base),
            })),
            ScanScope::Repo(full_name) => {
                let workspace = full_name.split('/').next().unwrap_or(full_name);
                Ok(Page::single(Container {
                    id: workspace.to_string(),
                    name: workspace.to_string(),
                    web_url: format!("{}/{workspace}", self.web_base),
                }))
            }
            _ => {
                let url = Self::cursor_url(
                    cursor,
                    format!("{}/workspaces?role=member&pagelen={PAGE_LEN}", self.base),
                );
                let page: Paginated<BitbucketWorkspace> = self.http.get(&url)?.json()?;
                let next = Self::next_of(page.next);
                let containers = page
                    .values
                    .into_iter()
                    .map(|ws| Container {
                        web_url: ws
                            .links
                            .html
                            .map(|h| h.href)
                            .unwrap_or_else(|| format!("{}/{}", self.web_base, ws.slug)),
                        id: ws.slug.clone(),
                        name: ws.slug,
                    })
                    .collect();
                Ok(Page::of(containers, next))
            }
        }
    }

    fn list_repos(
        &self,
        cursor: Option<&Cursor>,
        container: &Container,
        scope: &ScanScope,
    ) -> Result<Page<Repo>, TransportError> {
        if let ScanScope::Repo(full_name) = scope {
            let url = format!("{}/repositories/{full_name}", self.base);
            let repo: BitbucketRepo = self.http.get(&url)?.json()?;
            return Ok(Page::single(self.repo_from(repo)));
        }

        let url = Self::cursor_url(
            cursor,
            format!("{}/repositories/{}?pagelen={PAGE_LEN}", self.base, container.id),
        );
        let page: Paginated<BitbucketRepo> = self.http.get(&url)?.json()?;
        let next = Self::next_of(page.next);
        let repos = page.values.into_iter().map(|r| self.repo_from(r)).collect();
        Ok(Page::of(repos, next))
    }

    fn list_runs(&self, cursor: Option<&Cursor>, repo: &Repo) -> Result<Page<Run>, TransportError> {
        let url = Self::cursor_url(
            cursor,
            format!(
                "{}/repositories/{}/pipelines/?sort=-created_on&pagelen={PAGE_LEN}",
                self.base, repo.full_name
            ),
        );
        let page: Paginated<BitbucketPipeline> = self.http.get(&url)?.json()?;
        let next = Self::next_of(page.next);
        let runs = page
            .values
            .into_iter()
            .map(|p| Run {
                web_url: format!(
                    "{}/{}/pipelines/results/{}",
                    self.web_base, repo.full_name, p.build_number
                ),
                id: p.uuid,
                name: format!("#{}", p.build_number),
            })
            .collect();
        Ok(Page::of(runs, next))
    }

    fn list_jobs(
        &self,
        cursor: Option<&Cursor>,
        repo: &Repo,
        run: &Run,
    ) -> Result<Page<Job>, TransportError> {
        let url = Self::cursor_url(
            cursor,
            format!(
                "{}/repositories/{}/pipelines/{}/steps/?pagelen={PAGE_LEN}",
                self.base, repo.full_name, run.id
            ),
        );
        let page: Paginated<BitbucketStep> = self.http.get(&url)?.json()?;
        let next = Self::next_of(page.next);
        let jobs = page
            .values
            .into_iter()
            .map(|s| Job {
                web_url: format!("{}/steps/{}", run.web_url, s.uuid),
                name: s.name.unwrap_or_else(|| s.uuid.clone()),
                id: s.uuid,
                extra: serde_json::Map::new(),
            })
            .collect();
        Ok(Page::of(jobs, next))
    }

    fn fetch_log(
        &self,
        repo: &Repo,
        run: &Run,
        job: &Job,
    ) -> Result<Option<Vec<u8>>, TransportError> {
        let url = format!(
            "{}/repositories/{}/pipelines/{}/steps/{}/log",
            self.base, repo.full_name, run.id, job.id
        );
        match self.http.get(&url) {
            Ok(resp) if resp.body.is_empty() => Ok(None),
            Ok(resp) => Ok(Some(resp.body)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Pipelines expose no per-run artifact API; attachments live at the
    /// repo level as downloads.
    fn list_artifacts(
        &self,
        _cursor: Option<&Cursor>,
        _repo: &Repo,
        _run: &Run,
    ) -> Result<Page<ArtifactRef>, TransportError> {
        Ok(Page::empty())
    }

    fn list_repo_artifacts(
        &self,
        cursor: Option<&Cursor>,
        repo: &Repo,
    ) -> Result<Page<ArtifactRef>, TransportError> {
        let url = Self::cursor_url(
            cursor,
            format!(
                "{}/repositories/{}/downloads?pagelen={PAGE_LEN}",
                self.base, repo.full_name
            ),
        );
        let page: Paginated<BitbucketDownload> = self.http.get(&url)?.json()?;
        let next = Self::next_of(page.next);
        let mut artifacts: Vec<ArtifactRef> = page
            .values
            .into_iter()
            .filter_map(|d| {
                d.links.self_link.map(|link| ArtifactRef {
                    id: d.name.clone(),
                    name: d.name,
                    size: d.size,
                    download_url: link.href,
                    kind: ArtifactKind::Artifact,
                })
            })
            .collect();

        // Dotenv artifacts ride along on the first downloads page. Session
        // expiry mid-run surfaces as 401/403 which the engine skips.
        if cursor.is_none() && self.has_cookie {
            match self.list_dotenv_artifacts(repo) {
                Ok(mut dotenv) => artifacts.append(&mut dotenv),
                Err(err) if err.is_auth() => {
                    tracing::warn!(
                        "dotenv listing for {} rejected ({err}); session cookie expired?",
                        repo.full_name
                    );
                }
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
        }
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

impl BitbucketAdapter {
    fn repo_from(&self, repo: BitbucketRepo) -> Repo {
        Repo {
            web_url: repo
                .links
                .html
                .map(|h| h.href)
                .unwrap_or_else(|| format!("{}/{}", self.web_base, repo.full_name)),
            id: repo.uuid,
            full_name: repo.full_name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_host_maps_to_web_host() {
        assert_eq!(
            web_base_of("https://api.bitbucket.org/2.0"),
            "https://bitbucket.org"
        );
        assert_eq!(
            web_base_of("https://bitbucket.example.com/2.0"),
            "https://bitbucket.example.com"
        );
    }

    #[test]
    fn parses_paginated_body_with_next_url() {
        let page: Paginated<BitbucketRepo> = serde_json::from_str(
            r#"{"values": [{"uuid": "{r-1}", "full_name": "acme/api", "links": {"html": {"href": "https://bitbucket.org/acme/api"}}}],
                "next": "https://api.bitbucket.org/2.0/repositories/acme?page=2"}"#,
        )
        .expect("page");
        assert_eq!(page.values.len(), 1);
        assert!(page.next.as_deref().unwrap().contains("page=2"));
    }

    #[test]
    fn last_page_has_no_next() {
        let page: Paginated<BitbucketPipeline> = serde_json::from_str(
            r#"{"values": [{"uuid": "{p-1}", "build_number": 12, "state": {"name": "COMPLETED"}}]}"#,
        )
        .expect("page");
        assert!(page.next.is_none());
        assert_eq!(page.values[0].build_number, 12);
    }
}
