//! Records Gateway
//!
//! Command-line front end for the resilient upstream gateway:
//! 1. Loads configuration and API keys
//! 2. Builds the credential pool, cache, admission limit and persistence queue
//! 3. Runs one command (`fetch`, `count` or `health`) and prints JSON to stdout
//! 4. Flushes queued records before exiting
//!
//! Logs are JSON on stderr so stdout stays machine-readable.

mod cli;
mod config;
mod error;
mod metrics;
mod sink;

use anyhow::{Context, Result};
use clap::Parser;
use credential_pool::CredentialPool;
use gateway::{
    AdmissionController, CountQuery, Executor, Gateway, PersistQueue, PersistSink, ResponseCache,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use upstream::HttpUpstream;

use crate::cli::{Cli, Command};
use crate::config::Config;
use crate::sink::{JsonlSink, LogSink};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus = metrics::install_recorder().context("failed to install metrics recorder")?;

    let config_path = Config::resolve_path(cli.config.as_deref());
    info!(path = %config_path.display(), "loading configuration");
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    info!(
        base_url = %config.upstream.base_url,
        credentials = config.api_keys.len(),
        rotation = config.limits.rotation.label(),
        max_concurrency = ?config.limits.max_concurrency,
        "configuration loaded"
    );

    let gateway = build_gateway(&config).await?;
    let outcome = run(&gateway, &cli.command).await;
    gateway.shutdown().await;

    let value = outcome?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    if cli.print_metrics {
        print!("{}", prometheus.render());
    }
    Ok(())
}

/// Wire the gateway components from configuration.
async fn build_gateway(config: &Config) -> Result<Gateway> {
    let client = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;
    let mut upstream = HttpUpstream::new(
        client,
        &config.upstream.base_url,
        &config.upstream.credential_header,
        Duration::from_secs(config.upstream.timeout_secs),
    )
    .context("invalid upstream configuration")?;
    if let Some(prefix) = &config.upstream.credential_prefix {
        upstream = upstream.with_credential_prefix(prefix.clone());
    }

    let pool = CredentialPool::new(
        config.api_keys.clone(),
        config.limits.rotation,
        Duration::from_millis(config.limits.min_request_interval_ms),
    )
    .context("failed to create credential pool")?;

    let resolver = config.identity_resolver();
    let sink: Arc<dyn PersistSink> = match &config.persist.path {
        Some(path) => Arc::new(JsonlSink::open(path, resolver.clone()).await?),
        None => Arc::new(LogSink::new(resolver.clone())),
    };
    let queue = PersistQueue::spawn(sink, resolver.clone(), config.persist_config());

    let executor = Executor::new(Arc::new(upstream), Arc::new(pool), config.retry_policy())
        .with_admission(AdmissionController::new(config.limits.max_concurrency))
        .with_cache(ResponseCache::in_memory(
            config.cache.max_bytes,
            Duration::from_secs(config.cache.ttl_secs),
        ))
        .with_persist(queue);

    Ok(Gateway::new(executor, config.pagination_config(), resolver))
}

async fn run(gateway: &Gateway, command: &Command) -> Result<Value> {
    match command {
        Command::Fetch(target) => Ok(gateway.fetch(&target.endpoint, &target.params()).await?),
        Command::Count { target, max_return } => {
            let query =
                CountQuery::new(target.endpoint.clone(), target.params()).with_max_return(*max_return);
            let result = gateway.count_all(&query).await?;
            Ok(serde_json::to_value(result)?)
        }
        Command::Health => Ok(gateway.health()),
    }
}
