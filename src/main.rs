use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Parser;
use tracing::info;

use rulesd::client::HttpTrackerClient;
use rulesd::config::EngineConfig;
use rulesd::rules::store::InMemoryRuleStore;
use rulesd::{rest, EngineContext};

#[derive(Parser)]
#[command(
    name = "rulesd",
    about = "Rules engine daemon — webhook-driven automations for time tracking",
    version
)]
struct Args {
    /// Bind address for the HTTP ingress (default: 127.0.0.1)
    #[arg(long, env = "RULESD_BIND")]
    bind: Option<String>,

    /// HTTP ingress port
    #[arg(long, env = "RULESD_PORT")]
    port: Option<u16>,

    /// Log level filter (trace, debug, info, warn, error)
    #[arg(long, env = "RULESD_LOG")]
    log: Option<String>,

    /// Emit logs as JSON lines instead of human-readable text
    #[arg(long, env = "RULESD_LOG_JSON")]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = args.log.as_deref().unwrap_or("info");
    if args.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(log_level)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(log_level)
            .compact()
            .init();
    }

    // Invalid configuration (an out-of-range dedup TTL in particular) is
    // fatal here, before anything is wired up.
    let mut config = EngineConfig::from_env().context("invalid configuration")?;
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    info!(
        api = %config.api_base_url,
        apply_changes = config.apply_changes,
        dedup_ttl_secs = config.dedup_ttl_secs,
        workers = config.async_workers,
        "starting rulesd"
    );

    let api = Arc::new(
        HttpTrackerClient::new(config.api_base_url.clone(), config.http_timeout())
            .context("building API client")?,
    );
    let store = Arc::new(InMemoryRuleStore::new());
    let ctx = EngineContext::build(config, api, store);

    rest::serve(ctx).await
}
