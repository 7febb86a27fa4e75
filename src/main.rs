use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{info, warn};

use leakhound::cli::{Cli, Command};
use leakhound::config::ScanOptions;
use leakhound::pipeline::{self, ScanConfig, ScanCounters};
use leakhound::providers::{
    AzureAdapter, BitbucketAdapter, GiteaAdapter, GitHubAdapter, GitLabAdapter,
};
use leakhound::rules::RuleSet;
use leakhound::status;
use leakhound::transport::{Auth, HttpTransport, TransportOptions};
use leakhound::traverse::{ProviderAdapter, ScanScope};
use leakhound::verify::VerifierRegistry;
use leakhound::{logging, util};

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    // Flag parse failures are configuration errors and exit 1; help and
    // version output keep exit 0.
    let cli = Cli::try_parse().unwrap_or_else(|err| {
        let code = if err.use_stderr() { 1 } else { 0 };
        let _ = err.print();
        std::process::exit(code);
    });
    logging::init_logging(cli.json_logs);

    match cli.command {
        Command::Gitlab(args) => {
            let options = ScanOptions::from_common(&args.common, args.max_pipelines)?;
            let http = build_transport(&options, Auth::PrivateToken(args.common.token.clone()), None)?;
            let rate_limit = http.rate_limit();
            let adapter = Arc::new(GitLabAdapter::new(&args.url, http));
            run_provider(adapter, args.scope(), options, rate_limit)
        }
        Command::Github(args) => {
            let options = ScanOptions::from_common(&args.common, args.max_workflows)?;
            let http = build_transport(&options, Auth::Bearer(args.common.token.clone()), None)?;
            let rate_limit = http.rate_limit();
            let adapter = Arc::new(GitHubAdapter::new(&args.url, http));
            run_provider(adapter, args.scope(), options, rate_limit)
        }
        Command::Gitea(args) => {
            let options = ScanOptions::from_common(&args.common, args.max_runs)?;
            let http = build_transport(
                &options,
                Auth::Token(args.common.token.clone()),
                args.cookie.clone(),
            )?;
            let rate_limit = http.rate_limit();
            let adapter = Arc::new(GiteaAdapter::new(&args.url, http));
            run_provider(adapter, args.scope(), options, rate_limit)
        }
        Command::Bitbucket(args) => {
            let options = ScanOptions::from_common(&args.common, args.max_pipelines)?;
            let http = build_transport(
                &options,
                Auth::Basic {
                    user: args.username.clone(),
                    secret: args.common.token.clone(),
                },
                args.cookie.clone(),
            )?;
            let rate_limit = http.rate_limit();
            let adapter = Arc::new(BitbucketAdapter::new(
                &args.url,
                http,
                args.cookie.is_some(),
            ));
            run_provider(adapter, args.scope(), options, rate_limit)
        }
        Command::Azure(args) => {
            let options = ScanOptions::from_common(&args.common, args.max_builds)?;
            let http = build_transport(
                &options,
                Auth::Basic {
                    user: String::new(),
                    secret: args.common.token.clone(),
                },
                None,
            )?;
            let rate_limit = http.rate_limit();
            let adapter = Arc::new(AzureAdapter::new(&args.url, &args.organization, http));
            run_provider(adapter, args.scope(), options, rate_limit)
        }
    }
}

fn build_transport(
    options: &ScanOptions,
    auth: Auth,
    cookie: Option<String>,
) -> Result<HttpTransport> {
    HttpTransport::new(TransportOptions {
        auth,
        proxy: options.proxy.clone(),
        insecure: options.insecure,
        cookie,
        ..TransportOptions::default()
    })
    .context("building http transport")
}

fn run_provider(
    adapter: Arc<dyn ProviderAdapter>,
    scope: ScanScope,
    options: ScanOptions,
    rate_limit: Arc<std::sync::Mutex<leakhound::transport::RateLimitState>>,
) -> Result<()> {
    let rules = Arc::new(
        RuleSet::load(options.rules_path.as_deref(), &options.confidence)
            .context("loading detection rules")?,
    );
    if rules.is_empty() {
        bail!("confidence filter removed every rule; nothing to scan for");
    }
    info!(
        "loaded {} rules (sha256 {})",
        rules.len(),
        &rules.hash()[..12]
    );

    if let Some(dir) = &options.queue_dir {
        util::ensure_dir(dir).context("checking queue directory")?;
    }

    // Credential probe. Fatal for single-repo scans; multi-container walks
    // go on and skip what the token cannot see.
    match adapter.authenticated_user() {
        Ok(user) => info!("authenticated against {} as {user}", adapter.name()),
        Err(err) => {
            if matches!(scope, ScanScope::Repo(_)) {
                bail!("credential probe failed for {}: {err}", adapter.name());
            }
            warn!(
                "credential probe failed for {} ({err}); continuing, inaccessible containers will be skipped",
                adapter.name()
            );
        }
    }

    let verifiers = if options.verify {
        Some(Arc::new(
            VerifierRegistry::with_defaults(options.proxy.clone(), options.insecure)
                .context("building verifier registry")?,
        ))
    } else {
        None
    };

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        ctrlc::set_handler(move || {
            warn!("interrupt received; draining in-flight work");
            cancel.store(true, Ordering::Relaxed);
        })
        .context("installing interrupt handler")?;
    }

    let counters = Arc::new(ScanCounters::default());
    let _status = status::spawn_status_listener(
        adapter.name().to_string(),
        Arc::clone(&counters),
        rate_limit,
    );

    let stats = pipeline::run_scan(
        adapter,
        scope,
        ScanConfig {
            rules,
            workers: options.threads,
            per_hit_timeout: options.per_hit_timeout,
            verifiers,
            limits: options.walk_limits(),
            extract: options.extract_limits(),
            findings_path: options.findings_path.clone(),
            queue_dir: options.queue_dir.clone(),
        },
        cancel,
        counters,
    )?;

    info!("scan finished with {} findings", stats.findings);
    Ok(())
}
