//! Azure DevOps adapter. Basic auth with the PAT as password, continuation
//! tokens carried in the `x-ms-continuationtoken` response header. The
//! hierarchy maps organization → project → build → build logs; 404 on any
//! child resource is a plain skip.

use serde::Deserialize;

use crate::providers::{encode_segment, normalize_base};
use crate::transport::{Headers, HttpTransport, TransportError};
use crate::traverse::{
    ArtifactKind, ArtifactRef, Container, Cursor, Job, Page, ProviderAdapter, Repo, Run, ScanScope,
};

const API_VERSION: &str = "7.1";
const PAGE_TOP: u32 = 100;

pub struct AzureAdapter {
    http: HttpTransport,
    base: String,
    organization: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionData {
    authenticated_user: AzureIdentity,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzureIdentity {
    provider_display_name: String,
}

#[derive(Debug, Deserialize)]
struct ValueList<T> {
    value: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct AzureProject {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzureBuild {
    id: u64,
    build_number: String,
}

#[derive(Debug, Deserialize)]
struct AzureBuildLog {
    id: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzureArtifact {
    name: String,
    resource: AzureArtifactResource,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzureArtifactResource {
    download_url: String,
    #[serde(default)]
    properties: Option<AzureArtifactProperties>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzureArtifactProperties {
    #[serde(default)]
    artifactsize: Option<String>,
}

impl AzureAdapter {
    pub fn new(base_url: &str, organization: &str, http: HttpTransport) -> Self {
        Self {
            http,
            base: normalize_base(base_url),
            organization: organization.to_string(),
        }
    }

    fn org_url(&self, path: &str) -> String {
        format!("{}/{}{path}", self.base, encode_segment(&self.organization))
    }

    fn continuation(headers: &Headers) -> Option<Cursor> {
        headers
            .get("x-ms-continuationtoken")
            .filter(|v| !v.is_empty())
            .map(|v| Cursor::Token(v.to_string()))
    }

    fn token_param(cursor: Option<&Cursor>) -> String {
        match cursor {
            Some(Cursor::Token(token)) => format!("&continuationToken={}", encode_segment(token)),
            _ => String::new(),
        }
    }

    fn build_web_url(&self, project: &str, build_id: u64) -> String {
        format!(
            "{}/{}/_build/results?buildId={build_id}",
            self.base,
            encode_segment(project)
        )
    }
}

impl ProviderAdapter for AzureAdapter {
    fn name(&self) -> &'static str {
        "azure"
    }

    fn authenticated_user(&self) -> Result<String, TransportError> {
        let url = self.org_url(&format!(
            "/_apis/connectionData?api-version={API_VERSION}-preview.1"
        ));
        let (data, _): (ConnectionData, _) = self.http.get_json(&url)?;
        Ok(data.authenticated_user.provider_display_name)
    }

    fn list_containers(
        &self,
        _cursor: Option<&Cursor>,
        _scope: &ScanScope,
    ) -> Result<Page<Container>, TransportError> {
        Ok(Page::single(Container {
            id: self.organization.clone(),
            name: self.organization.clone(),
            web_url: self.org_url(""),
        }))
    }

    /// Projects play the repo role: builds hang off projects, not git
    /// repositories.
    fn list_repos(
        &self,
        cursor: Option<&Cursor>,
        _container: &Container,
        scope: &ScanScope,
    ) -> Result<Page<Repo>, TransportError> {
        if let ScanScope::Container(project) | ScanScope::Repo(project) = scope {
            return Ok(Page::single(Repo {
                id: project.clone(),
                full_name: project.clone(),
                web_url: self.org_url(&format!("/{}", encode_segment(project))),
            }));
        }

        let url = self.org_url(&format!(
            "/_apis/projects?api-version={API_VERSION}&$top={PAGE_TOP}{}",
            Self::token_param(cursor)
        ));
        let (projects, headers): (ValueList<AzureProject>, _) = self.http.get_json(&url)?;
        let repos = projects
            .value
            .into_iter()
            .map(|p| Repo {
                web_url: self.org_url(&format!("/{}", encode_segment(&p.name))),
                id: p.id,
                full_name: p.name,
            })
            .collect();
        Ok(Page::of(repos, Self::continuation(&headers)))
    }

    fn list_runs(&self, cursor: Option<&Cursor>, repo: &Repo) -> Result<Page<Run>, TransportError> {
        let url = self.org_url(&format!(
            "/{}/_apis/build/builds?api-version={API_VERSION}&$top={PAGE_TOP}{}",
            encode_segment(&repo.full_name),
            Self::token_param(cursor)
        ));
        let (builds, headers): (ValueList<AzureBuild>, _) = self.http.get_json(&url)?;
        let runs = builds
            .value
            .into_iter()
            .map(|b| Run {
                id: b.id.to_string(),
                web_url: self.build_web_url(&repo.full_name, b.id),
                name: b.build_number,
            })
            .collect();
        Ok(Page::of(runs, Self::continuation(&headers)))
    }

    /// Build logs play the job role; every log id is fetchable on its own.
    fn list_jobs(
        &self,
        _cursor: Option<&Cursor>,
        repo: &Repo,
        run: &Run,
    ) -> Result<Page<Job>, TransportError> {
        let url = self.org_url(&format!(
            "/{}/_apis/build/builds/{}/logs?api-version={API_VERSION}",
            encode_segment(&repo.full_name),
            run.id
        ));
        let (logs, _): (ValueList<AzureBuildLog>, _) = self.http.get_json(&url)?;
        let jobs = logs
            .value
            .into_iter()
            .map(|log| Job {
                id: log.id.to_string(),
                name: format!("log {}", log.id),
                web_url: run.web_url.clone(),
                extra: serde_json::Map::new(),
            })
            .collect();
        Ok(Page::of(jobs, None))
    }

    fn fetch_log(
        &self,
        repo: &Repo,
        run: &Run,
        job: &Job,
    ) -> Result<Option<Vec<u8>>, TransportError> {
        let url = self.org_url(&format!(
            "/{}/_apis/build/builds/{}/logs/{}?api-version={API_VERSION}",
            encode_segment(&repo.full_name),
            run.id,
            job.id
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
        _cursor: Option<&Cursor>,
        repo: &Repo,
        run: &Run,
    ) -> Result<Page<ArtifactRef>, TransportError> {
        let url = self.org_url(&format!(
            "/{}/_apis/build/builds/{}/artifacts?api-version={API_VERSION}",
            encode_segment(&repo.full_name),
            run.id
        ));
        let (artifacts, _): (ValueList<AzureArtifact>, _) = self.http.get_json(&url)?;
        let artifacts = artifacts
            .value
            .into_iter()
            .map(|a| ArtifactRef {
                id: a.name.clone(),
                size: a
                    .resource
                    .properties
                    .as_ref()
                    .and_then(|p| p.artifactsize.as_ref())
                    .and_then(|s| s.parse().ok()),
                download_url: a.resource.download_url,
                name: a.name,
                kind: ArtifactKind::Artifact,
            })
            .collect();
        Ok(Page::of(artifacts, None))
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

    fn adapter() -> AzureAdapter {
        let http = HttpTransport::new(TransportOptions::default()).expect("transport");
        AzureAdapter::new("https://dev.azure.com", "acme corp", http)
    }

    #[test]
    fn org_urls_encode_the_organization() {
        let az = adapter();
        assert_eq!(
            az.org_url("/_apis/projects?api-version=7.1"),
            "https://dev.azure.com/acme%20corp/_apis/projects?api-version=7.1"
        );
    }

    #[test]
    fn continuation_token_round_trips_through_header() {
        let headers = Headers::from_pairs(&[("x-ms-continuationtoken", "abc123")]);
        assert_eq!(
            AzureAdapter::continuation(&headers),
            Some(Cursor::Token("abc123".to_string()))
        );
        assert_eq!(
            AzureAdapter::token_param(Some(&Cursor::Token("abc123".to_string()))),
            "&continuationToken=abc123"
        );
        assert_eq!(AzureAdapter::token_param(None), "");
    }

    #[test]
    fn parses_build_list_payload() {
        let builds: ValueList<AzureBuild> = serde_json::from_str(
            r#"{"count": 1, "value": [{"id": 520, "buildNumber": "20260801.1", "status": "completed"}]}"#,
        )
        .expect("builds");
        assert_eq!(builds.value[0].id, 520);
        assert_eq!(builds.value[0].build_number, "20260801.1");
    }

    #[test]
    fn artifact_size_parses_from_properties() {
        let artifact: AzureArtifact = serde_json::from_str(
            r#"{"name": "drop", "resource": {"downloadUrl": "https://dev.azure.com/x/drop.zip", "properties": {"artifactsize": "4096"}}}"#,
        )
        .expect("artifact");
        let size: Option<u64> = artifact
            .resource
            .properties
            .as_ref()
            .and_then(|p| p.artifactsize.as_ref())
            .and_then(|s| s.parse().ok());
        assert_eq!(size, Some(4096));
    }
}
