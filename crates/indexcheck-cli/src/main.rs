use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tokio::sync::watch;

use indexcheck_core::app::{Pipeline, PipelineBuilder, PurchaseRequest, StartRequest, StartStatus};
use indexcheck_core::config::PipelineConfig;
use indexcheck_core::domain::{JobId, JobRecord, OwnerId, PropertyId, StoredCredential, Verdict};
use indexcheck_core::impls::{
    http_client, GoogleClientFactory, GoogleTokenEndpoint, InMemoryDirectory, InMemoryJobStore,
    InMemoryLedger, InMemoryPaymentGateway, InMemoryQueue, InMemoryResultStore,
    ScriptedClientFactory, ScriptedConsole, ScriptedReply, ScriptedTokenEndpoint,
};
use indexcheck_core::observability;
use indexcheck_core::ports::{
    AuthError, ClientFactory, Clock, DiscoverySource, SystemClock, TokenEndpoint, UlidGenerator,
};

#[derive(Debug, Parser)]
#[command(name = "indexcheck", about = "Credit-metered URL index checks")]
struct Cli {
    /// TOML configuration file. INDEXCHECK_* variables override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Starting credit balance of the demo account.
    #[arg(long, global = true, default_value_t = 50)]
    credits: u64,

    /// Buy this credit package before starting.
    #[arg(long, global = true)]
    buy: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check a scripted property end to end.
    Check(ScriptArgs),
    /// Check a scripted property, then re-index every URL that did not pass.
    Reindex(ScriptArgs),
    /// Check a real property against the Search Console API.
    Live(LiveArgs),
}

#[derive(Debug, Args)]
struct ScriptArgs {
    /// Number of URLs the scripted property exposes.
    #[arg(long, default_value_t = 25)]
    urls: usize,

    /// Every nth inspection answers HTTP 429.
    #[arg(long)]
    fail_every: Option<u32>,
}

#[derive(Debug, Args)]
struct LiveArgs {
    #[arg(long)]
    property_url: String,

    #[arg(long, env = "INDEXCHECK_ACCESS_TOKEN")]
    access_token: String,

    #[arg(long, env = "INDEXCHECK_REFRESH_TOKEN")]
    refresh_token: Option<String>,

    /// Seconds until the access token expires.
    #[arg(long, default_value_t = 3_600)]
    expires_in: i64,
}

const DEMO_PROPERTY: &str = "sc-domain:example.com";

fn demo_owner() -> OwnerId {
    OwnerId::new("demo-owner")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = PipelineConfig::load(cli.config.as_deref()).context("loading configuration")?;
    observability::init_from_config(&config.log);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (property_url, access_token, refresh_token, expires_in) = match &cli.command {
        Command::Check(_) | Command::Reindex(_) => (
            DEMO_PROPERTY.to_string(),
            "demo-access-token".to_string(),
            Some("demo-refresh-token".to_string()),
            3_600,
        ),
        Command::Live(args) => (
            args.property_url.clone(),
            args.access_token.clone(),
            args.refresh_token.clone(),
            args.expires_in,
        ),
    };

    let (tokens, clients): (Arc<dyn TokenEndpoint>, Arc<dyn ClientFactory>) = match &cli.command {
        Command::Check(args) | Command::Reindex(args) => {
            let console = Arc::new(scripted_console(args));
            (
                Arc::new(ScriptedTokenEndpoint::failing(AuthError::MissingRefreshToken)),
                Arc::new(ScriptedClientFactory::new(console)),
            )
        }
        Command::Live(_) => {
            if config.oauth.client_id.is_empty() {
                bail!("oauth.client_id is required for live checks");
            }
            let http = http_client(config.http_timeout()).context("building the HTTP client")?;
            let mut endpoint = GoogleTokenEndpoint::new(
                http.clone(),
                config.oauth.client_id.clone(),
                config.oauth.client_secret.clone(),
                clock.clone(),
            );
            if let Some(uri) = &config.oauth.token_uri {
                endpoint = endpoint.with_token_uri(uri.clone());
            }
            (
                Arc::new(endpoint),
                Arc::new(GoogleClientFactory::new(
                    http,
                    clock.clone(),
                    config.analytics_lookback_days,
                )),
            )
        }
    };

    let owner = demo_owner();
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.open_account(owner.clone(), cli.credits).await;

    let directory = Arc::new(InMemoryDirectory::new());
    directory
        .register_property(owner.clone(), property_url.clone(), PropertyId::new("demo-property"))
        .await;
    directory
        .set_credential(
            owner.clone(),
            StoredCredential {
                access_token: Some(access_token),
                expires_at_ms: Some(clock.now().timestamp_millis() + expires_in * 1_000),
                refresh_token,
            },
        )
        .await;

    let gateway = Arc::new(InMemoryPaymentGateway::new());
    let pipeline = PipelineBuilder::new()
        .config(config)
        .ledger(ledger)
        .jobs(Arc::new(InMemoryJobStore::new()))
        .results(Arc::new(InMemoryResultStore::new()))
        .credentials(directory.clone())
        .properties(directory.clone())
        .queue(Arc::new(InMemoryQueue::new(Arc::new(UlidGenerator::new(
            clock.clone(),
        )))))
        .token_endpoint(tokens)
        .client_factory(clients)
        .payment_gateway(gateway.clone())
        .clock(clock)
        .build()?;

    if let Some(package_id) = &cli.buy {
        buy(&pipeline, &gateway, &owner, package_id).await?;
    }

    let consumers = pipeline.spawn_consumers();
    let (reconcile_tx, reconcile_rx) = watch::channel(false);
    let reconciler = pipeline.spawn_reconciler(reconcile_rx);

    let request = StartRequest {
        caller: Some(owner.clone()),
        property_url,
    };
    let mut report = Vec::new();
    if let Some(record) = run_check(&pipeline, request.clone()).await? {
        report.push(record);
    }
    if matches!(cli.command, Command::Reindex(_)) {
        let response = pipeline.dispatcher.start_reindex(request).await?;
        println!("{}", serde_json::to_string_pretty(&response)?);
        if let Some(job_id) = response.job_id {
            report.push(wait_for(&pipeline, &owner, job_id).await?);
        }
    }

    consumers.shutdown_and_join().await;
    let _ = reconcile_tx.send(true);
    let _ = reconciler.await;

    let balance = pipeline.ledger.balance(&owner).await?;
    let summary = directory.summary(&PropertyId::new("demo-property")).await;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "jobs": report,
            "balance": balance,
            "propertySummary": summary,
        }))?
    );
    Ok(())
}

/// Scripted property: every fifth URL fails inspection.
fn scripted_console(args: &ScriptArgs) -> ScriptedConsole {
    let urls: Vec<String> = (0..args.urls)
        .map(|i| format!("https://example.com/page-{i}"))
        .collect();
    let mut console = ScriptedConsole::new();
    for url in urls.iter().step_by(5) {
        console = console.with_reply(url.clone(), ScriptedReply::Verdict(Verdict::Fail));
    }
    if let Some(n) = args.fail_every {
        console = console.with_fail_every(n);
    }
    console.with_candidates(DiscoverySource::Sitemaps, urls)
}

async fn buy(
    pipeline: &Pipeline,
    gateway: &InMemoryPaymentGateway,
    owner: &OwnerId,
    package_id: &str,
) -> anyhow::Result<()> {
    let Some(purchases) = &pipeline.purchases else {
        bail!("no payment gateway configured");
    };
    let (order_id, payment_id, signature) = ("order_demo", "pay_demo", "sig_demo");
    gateway.approve(order_id, payment_id, signature);

    let receipt = purchases
        .purchase(PurchaseRequest {
            caller: Some(owner.clone()),
            package_id: package_id.to_string(),
            order_id: order_id.to_string(),
            payment_id: payment_id.to_string(),
            signature: signature.to_string(),
        })
        .await?;
    println!("{}", serde_json::to_string_pretty(&receipt)?);
    Ok(())
}

async fn run_check(pipeline: &Pipeline, request: StartRequest) -> anyhow::Result<Option<JobRecord>> {
    let owner = request.caller.clone().context("request without caller")?;
    let response = pipeline.dispatcher.start_check(request).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    match (response.status, response.job_id) {
        (StartStatus::Pending, Some(job_id)) => Ok(Some(wait_for(pipeline, &owner, job_id).await?)),
        _ => Ok(None),
    }
}

/// Poll the job until it is terminal.
async fn wait_for(pipeline: &Pipeline, owner: &OwnerId, job_id: JobId) -> anyhow::Result<JobRecord> {
    loop {
        let record = pipeline.status.job_status(Some(owner), job_id).await?;
        if record.is_terminal() {
            tracing::info!(job_id = %job_id, status = record.status.as_str(), "job done");
            return Ok(record);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}
