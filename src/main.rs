//! Cache Guard - admin server and operator CLI
//!
//! `serve` (the default) runs the admin API and the periodic jobs. The other
//! subcommands are one-shot diagnostics and maintenance against the store.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cache_guard::kv::redact_url;
use cache_guard::maintenance::JsonFileSource;
use cache_guard::models::RetentionResponse;
use cache_guard::pressure::{keys_without_expiry, pattern_usage};
use cache_guard::{create_router, AppState, Config, Engine, Scheduler};

#[derive(Parser)]
#[command(name = "cache_guard", version, about = "Response cache and memory-pressure control")]
struct Cli {
    /// JSON configuration file
    #[arg(long, env = "CACHE_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the admin API and the periodic jobs
    Serve,
    /// Show store memory, clients and keyspace statistics
    Stats,
    /// Sample memory and show pressure level and trend
    Pressure {
        /// Samples to take; a trend needs at least five
        #[arg(long, default_value_t = 1)]
        samples: usize,
        /// Seconds between samples
        #[arg(long, default_value_t = 1)]
        interval: u64,
    },
    /// List keys that have no expiry
    NoExpiry {
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
    /// Show key count and bytes per pattern
    Usage {
        /// Glob pattern, repeatable; defaults to namespaces and retention patterns
        #[arg(long = "pattern")]
        patterns: Vec<String>,
    },
    /// Enforce retention policies now
    Retention,
    /// Warm the cache from a JSON file of hot entities
    Preload {
        #[arg(long)]
        source: Option<PathBuf>,
    },
    /// Drop every key in a namespace
    Invalidate { namespace: String },
    /// Drop the cached copies of one entity
    InvalidateEntity {
        entity_type: String,
        id: String,
        /// Keep derived aggregates
        #[arg(long)]
        no_related: bool,
    },
    /// Reset the metrics of a running server
    ResetMetrics {
        #[arg(long, env = "ADMIN_URL", default_value = "http://127.0.0.1:3000")]
        admin_url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = Config::load_from(cli.config.as_deref()).context("invalid configuration")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::ResetMetrics { admin_url } => reset_metrics(&admin_url).await,
        command => run_once(config, command).await,
    }
}

/// Logs go to stderr so command output on stdout stays parseable.
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "cache_guard=info,tower_http=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

async fn connect(config: Config) -> Result<Engine> {
    let url = config.redis_url.clone();
    Engine::connect(config)
        .await
        .with_context(|| format!("cannot reach store at {}", redact_url(&url)))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn serve(config: Config) -> Result<()> {
    info!("Starting Cache Guard");
    let port = config.server_port;
    let engine = Arc::new(connect(config).await?);
    info!(
        namespaces = engine.cache.namespaces().len(),
        rules = engine.config.invalidation_rules.len(),
        "engine ready"
    );

    let token = CancellationToken::new();
    let scheduler = Scheduler::start(engine.clone(), token.clone());

    let app = create_router(AppState::new(engine));
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot bind {}", addr))?;
    info!("Admin API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(token))
        .await
        .context("server error")?;

    scheduler.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}

async fn run_once(config: Config, command: Command) -> Result<()> {
    let engine = connect(config).await?;
    let batch = engine.cache.scan_batch();

    match command {
        Command::Stats => {
            let info = engine.kv.info().await.context("INFO failed")?;
            print_json(&info)?;
        }
        Command::Pressure { samples, interval } => {
            let report = engine
                .pressure_report(samples, interval)
                .await
                .context("memory sample failed")?;
            print_json(&report)?;
        }
        Command::NoExpiry { limit } => {
            let keys = keys_without_expiry(engine.kv.as_ref(), limit.max(1), batch).await?;
            if keys.is_empty() {
                info!("every key has an expiry");
            }
            print_json(&keys)?;
        }
        Command::Usage { patterns } => {
            let patterns = if patterns.is_empty() {
                engine.default_usage_patterns()
            } else {
                patterns
            };
            print_json(&pattern_usage(engine.kv.as_ref(), &patterns, batch).await?)?;
        }
        Command::Retention => {
            print_json(&RetentionResponse::new(engine.retention.enforce().await))?;
        }
        Command::Preload { source } => {
            let source = match source {
                Some(path) => JsonFileSource::new(path),
                None => engine
                    .preload_source()
                    .context("no preload source: pass --source or set PRELOAD_SOURCE")?,
            };
            print_json(&engine.preloader.preload(&source).await)?;
        }
        Command::Invalidate { namespace } => {
            engine.cache.namespaces().get(&namespace)?;
            let deleted = engine.mapper.invalidate_namespace(&namespace).await;
            print_json(&serde_json::json!({ "namespace": namespace, "deleted": deleted }))?;
        }
        Command::InvalidateEntity {
            entity_type,
            id,
            no_related,
        } => {
            if engine.mapper.rule(&entity_type).is_none() {
                anyhow::bail!("no invalidation rule for '{}'", entity_type);
            }
            let deleted = engine
                .mapper
                .invalidate_entity(&entity_type, &id, !no_related)
                .await;
            print_json(&serde_json::json!({
                "entity": format!("{}:{}", entity_type, id),
                "deleted": deleted,
            }))?;
        }
        Command::Serve | Command::ResetMetrics { .. } => {
            anyhow::bail!("not a one-shot command")
        }
    }
    Ok(())
}

/// Metrics live in the server process, so the reset goes over HTTP.
async fn reset_metrics(admin_url: &str) -> Result<()> {
    let url = format!("{}/metrics/reset", admin_url.trim_end_matches('/'));
    let body: serde_json::Value = reqwest::Client::new()
        .post(&url)
        .send()
        .await
        .with_context(|| format!("cannot reach {}", url))?
        .error_for_status()?
        .json()
        .await?;
    print_json(&body)
}

/// Waits for Ctrl+C or SIGTERM, then cancels the periodic jobs.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating shutdown..."),
    }

    token.cancel();
    warn!("Periodic jobs cancelled");
}
