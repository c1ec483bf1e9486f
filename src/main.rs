//! blockipd - IP blacklist/whitelist registry daemon.
//!
//! Usage:
//!   blockipd [config.toml]
//!   blockipd hash-password   (reads a password from stdin)

use anyhow::Context;
use blockip::auth::password::hash_password;
use blockip::auth::{Authorizer, StaticRoleSource};
use blockip::clock::SystemClock;
use blockip::config::{Config, LogFormat, LoggingConfig};
use blockip::db::SqliteRuleStore;
use blockip::http::{self, AppState};
use blockip::metrics;
use blockip::rules::RuleEngine;
use std::io::BufRead;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn print_password_hash() -> anyhow::Result<()> {
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read password from stdin")?;
    let password = line.trim_end_matches(['\r', '\n']);
    if password.is_empty() {
        anyhow::bail!("empty password");
    }
    let hash = hash_password(password).map_err(|e| anyhow::anyhow!("failed to hash password: {e}"))?;
    println!("{hash}");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let arg = std::env::args().nth(1);
    if arg.as_deref() == Some("hash-password") {
        return print_password_hash();
    }

    let config_path = arg.unwrap_or_else(|| "blockip.toml".to_string());
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {config_path}"))?;

    init_tracing(&config.logging);
    info!(path = %config_path, "Starting blockipd");

    let store = SqliteRuleStore::connect(&config.database.path)
        .await
        .with_context(|| format!("failed to open database {}", config.database.path))?;
    info!(path = %config.database.path, "Database ready");

    let clock = Arc::new(SystemClock);
    let engine = RuleEngine::new(Arc::new(store), clock.clone());

    let source = StaticRoleSource::new(&config.users)
        .map_err(|e| anyhow::anyhow!("invalid user directory: {e}"))?;
    info!(users = config.users.len(), "Loaded user directory");

    let auth = &config.authorization;
    if auth.skip_permission_checks {
        warn!("Permission checks are disabled: every logged-in user may do anything");
    }
    let authorizer = Authorizer::new(
        Arc::new(source),
        auth.implication_graph(),
        clock,
        auth.cache_ttl(),
    )
    .skip_permission_checks(auth.skip_permission_checks);

    metrics::init();
    if let Some(port) = config.server.metrics_port {
        tokio::spawn(async move {
            http::run_metrics_server(port).await;
        });
        info!(port, "Prometheus HTTP server started");
    }

    let listener = TcpListener::bind(config.server.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.server.listen))?;

    let state = Arc::new(AppState {
        engine,
        authorizer,
        authorization: config.authorization.clone(),
        blacklist: config.blacklist.clone(),
    });

    http::serve(listener, state, shutdown_signal()).await?;
    info!("blockipd stopped");
    Ok(())
}
