use std::path::PathBuf;

use clap::{ArgGroup, Args, Parser, Subcommand};

use crate::rules::Confidence;
use crate::traverse::ScanScope;

/// Four scan workers unless the machine has fewer cores.
fn default_threads() -> usize {
    num_cpus::get().clamp(1, 4)
}

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Scan GitLab pipeline logs and job artifacts
    Gitlab(GitlabArgs),
    /// Scan GitHub Actions run logs and artifacts
    Github(GithubArgs),
    /// Scan Gitea Actions task logs and artifacts
    Gitea(GiteaArgs),
    /// Scan BitBucket pipeline step logs and downloads
    Bitbucket(BitbucketArgs),
    /// Scan Azure DevOps build logs and artifacts
    Azure(AzureArgs),
}

/// Options shared by every provider scan.
#[derive(Args, Debug)]
pub struct CommonArgs {
    /// API token (or app password / PAT, depending on the provider)
    #[arg(long)]
    pub token: String,

    /// Also download and scan artifacts
    #[arg(long)]
    pub artifacts: bool,

    /// Scan worker threads
    #[arg(long, default_value_t = default_threads())]
    pub threads: usize,

    /// Largest artifact to download, as a size string (e.g. 50Mb)
    #[arg(long, default_value = "500Mb")]
    pub max_artifact_size: String,

    /// Nested archive depth to expand
    #[arg(long, default_value_t = 3)]
    pub max_artifact_depth: u32,

    /// Keep only rules with these confidences (comma separated; empty
    /// keeps every rule)
    #[arg(long, value_delimiter = ',')]
    pub confidence: Vec<Confidence>,

    /// Actively verify candidate credentials against the issuing service
    #[arg(long)]
    pub verify: bool,

    /// Per-chunk detection timeout, in seconds
    #[arg(long, default_value_t = 60)]
    pub per_hit_timeout: u64,

    /// HTTP(S) proxy URL
    #[arg(long)]
    pub proxy: Option<String>,

    /// Skip TLS certificate verification
    #[arg(long)]
    pub insecure: bool,

    /// Rule file overriding the bundled set
    #[arg(long)]
    pub rules: Option<PathBuf>,

    /// Append findings as JSON lines to this file
    #[arg(long)]
    pub findings: Option<PathBuf>,

    /// Spool large payloads to this directory between download and scan
    #[arg(long)]
    pub queue_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("mode").required(true).multiple(false)))]
pub struct GitlabArgs {
    /// GitLab base URL
    #[arg(long, default_value = "https://gitlab.com")]
    pub url: String,

    /// Scan projects owned by the token user
    #[arg(long, group = "mode")]
    pub owned: bool,

    /// Scan projects the token user is a member of
    #[arg(long, group = "mode")]
    pub member: bool,

    /// Scan public projects
    #[arg(long, group = "mode")]
    pub public: bool,

    /// Scan a single project by full path (group/project)
    #[arg(long, group = "mode")]
    pub repo: Option<String>,

    /// Scan projects matching a search query
    #[arg(long, group = "mode")]
    pub search: Option<String>,

    /// Pipelines to scan per project (-1 scans all)
    #[arg(long, default_value_t = -1)]
    pub max_pipelines: i64,

    #[command(flatten)]
    pub common: CommonArgs,
}

impl GitlabArgs {
    pub fn scope(&self) -> ScanScope {
        if let Some(repo) = &self.repo {
            ScanScope::Repo(repo.clone())
        } else if let Some(query) = &self.search {
            ScanScope::Search(query.clone())
        } else if self.member {
            ScanScope::Member
        } else if self.public {
            ScanScope::Public
        } else {
            ScanScope::Owned
        }
    }
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("mode").required(true).multiple(false)))]
pub struct GithubArgs {
    /// GitHub API base URL
    #[arg(long, default_value = "https://api.github.com")]
    pub url: String,

    /// Scan repos of the token user
    #[arg(long, group = "mode")]
    pub owned: bool,

    /// Scan repos of an organization
    #[arg(long, group = "mode")]
    pub organization: Option<String>,

    /// Walk public repositories
    #[arg(long, group = "mode")]
    pub public: bool,

    /// Scan a single repo by full name (owner/name)
    #[arg(long, group = "mode")]
    pub repo: Option<String>,

    /// Workflow runs to scan per repo (-1 scans all)
    #[arg(long, default_value_t = -1)]
    pub max_workflows: i64,

    #[command(flatten)]
    pub common: CommonArgs,
}

impl GithubArgs {
    pub fn scope(&self) -> ScanScope {
        if let Some(repo) = &self.repo {
            ScanScope::Repo(repo.clone())
        } else if let Some(org) = &self.organization {
            ScanScope::Container(org.clone())
        } else if self.public {
            ScanScope::Public
        } else {
            ScanScope::Owned
        }
    }
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("mode").required(true).multiple(false)))]
pub struct GiteaArgs {
    /// Gitea base URL
    #[arg(long)]
    pub url: String,

    /// Scan repos of the token user
    #[arg(long, group = "mode")]
    pub owned: bool,

    /// Scan repos of an organization
    #[arg(long, group = "mode")]
    pub organization: Option<String>,

    /// Scan a single repo by full name (owner/name)
    #[arg(long, group = "mode")]
    pub repo: Option<String>,

    /// Session cookie for artifact downloads the API does not expose
    #[arg(long)]
    pub cookie: Option<String>,

    /// Action tasks to scan per repo (-1 scans all)
    #[arg(long, default_value_t = -1)]
    pub max_runs: i64,

    #[command(flatten)]
    pub common: CommonArgs,
}

impl GiteaArgs {
    pub fn scope(&self) -> ScanScope {
        if let Some(repo) = &self.repo {
            ScanScope::Repo(repo.clone())
        } else if let Some(org) = &self.organization {
            ScanScope::Container(org.clone())
        } else {
            ScanScope::Owned
        }
    }
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("mode").required(true).multiple(false)))]
pub struct BitbucketArgs {
    /// BitBucket API base URL
    #[arg(long, default_value = "https://api.bitbucket.org/2.0")]
    pub url: String,

    /// Username the app password belongs to
    #[arg(long)]
    pub username: String,

    /// Scan every workspace the user is a member of
    #[arg(long, group = "mode")]
    pub owned: bool,

    /// Scan one workspace
    #[arg(long, group = "mode")]
    pub workspace: Option<String>,

    /// Scan a single repo by full name (workspace/slug)
    #[arg(long, group = "mode")]
    pub repo: Option<String>,

    /// Browser session cookie for the internal dotenv artifact endpoint
    #[arg(long)]
    pub cookie: Option<String>,

    /// Pipelines to scan per repo (-1 scans all)
    #[arg(long, default_value_t = -1)]
    pub max_pipelines: i64,

    #[command(flatten)]
    pub common: CommonArgs,
}

impl BitbucketArgs {
    pub fn scope(&self) -> ScanScope {
        if let Some(repo) = &self.repo {
            ScanScope::Repo(repo.clone())
        } else if let Some(workspace) = &self.workspace {
            ScanScope::Container(workspace.clone())
        } else {
            ScanScope::Owned
        }
    }
}

#[derive(Args, Debug)]
pub struct AzureArgs {
    /// Azure DevOps base URL
    #[arg(long, default_value = "https://dev.azure.com")]
    pub url: String,

    /// Organization to scan
    #[arg(long)]
    pub organization: String,

    /// Restrict the scan to one project (default: every project)
    #[arg(long)]
    pub project: Option<String>,

    /// Builds to scan per project (-1 scans all)
    #[arg(long, default_value_t = -1)]
    pub max_builds: i64,

    #[command(flatten)]
    pub common: CommonArgs,
}

impl AzureArgs {
    pub fn scope(&self) -> ScanScope {
        match &self.project {
            Some(project) => ScanScope::Container(project.clone()),
            None => ScanScope::Owned,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(args)
    }

    #[test]
    fn parses_gitlab_owned_scan() {
        let cli = parse(&[
            "leakhound", "gitlab", "--token", "glpat-x", "--owned", "--artifacts",
        ])
        .expect("parse");
        let Command::Gitlab(args) = cli.command else {
            panic!("wrong command");
        };
        assert!(matches!(args.scope(), ScanScope::Owned));
        assert!(args.common.artifacts);
        assert!((1..=4).contains(&args.common.threads));
        assert_eq!(args.max_pipelines, -1);
    }

    #[test]
    fn mode_selectors_are_mutually_exclusive() {
        let err = parse(&[
            "leakhound", "gitlab", "--token", "t", "--owned", "--public",
        ])
        .expect_err("conflict");
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn a_mode_selector_is_required() {
        let err = parse(&["leakhound", "github", "--token", "t"]).expect_err("missing mode");
        assert_eq!(
            err.kind(),
            clap::error::ErrorKind::MissingRequiredArgument
        );
    }

    #[test]
    fn parses_confidence_list() {
        let cli = parse(&[
            "leakhound", "github", "--token", "t", "--owned", "--confidence", "high,medium",
        ])
        .expect("parse");
        let Command::Github(args) = cli.command else {
            panic!("wrong command");
        };
        assert_eq!(
            args.common.confidence,
            vec![Confidence::High, Confidence::Medium]
        );
    }

    #[test]
    fn parses_bitbucket_workspace_with_cookie() {
        let cli = parse(&[
            "leakhound", "bitbucket", "--token", "app-pass", "--username", "dev",
            "--workspace", "acme", "--cookie", "cloud.session.token=xyz",
            "--max-pipelines", "20",
        ])
        .expect("parse");
        let Command::Bitbucket(args) = cli.command else {
            panic!("wrong command");
        };
        assert!(matches!(args.scope(), ScanScope::Container(ws) if ws == "acme"));
        assert_eq!(args.max_pipelines, 20);
        assert!(args.cookie.is_some());
    }

    #[test]
    fn azure_defaults_to_all_projects() {
        let cli = parse(&[
            "leakhound", "azure", "--token", "pat", "--organization", "acme",
        ])
        .expect("parse");
        let Command::Azure(args) = cli.command else {
            panic!("wrong command");
        };
        assert!(matches!(args.scope(), ScanScope::Owned));
    }

    #[test]
    fn gitea_requires_url() {
        let err = parse(&["leakhound", "gitea", "--token", "t", "--owned"]).expect_err("no url");
        assert_eq!(
            err.kind(),
            clap::error::ErrorKind::MissingRequiredArgument
        );
    }
}
