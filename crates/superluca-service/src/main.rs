use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use serde::Serialize;
use superluca_bootstrap_core::{
    AdminConfig, Secret, StoreLocation, DEFAULT_ADMIN_EMAIL, DEFAULT_ADMIN_PASSWORD,
    DEFAULT_ADMIN_ROLE, DEFAULT_ADMIN_USERNAME,
};
use superluca_store_sqlite::{BootstrapOrchestrator, BootstrapPlan, BootstrapReport, SqliteStore};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Parser)]
#[command(name = "superluca-service")]
#[command(about = "SuperLuca backend: bootstraps its store, then serves")]
struct Args {
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite:///./app.db")]
    database_url: String,
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:8000")]
    bind: SocketAddr,
    #[arg(long, env = "STORE_TIMEOUT_MS", default_value_t = 5000)]
    store_timeout_ms: u64,
    #[arg(long, env = "ADMIN_USERNAME", default_value = DEFAULT_ADMIN_USERNAME)]
    admin_username: String,
    #[arg(long, env = "ADMIN_EMAIL", default_value = DEFAULT_ADMIN_EMAIL)]
    admin_email: String,
    #[arg(long, env = "ADMIN_PASSWORD", default_value = DEFAULT_ADMIN_PASSWORD, hide_env_values = true, hide_default_value = true)]
    admin_password: Secret,
    #[arg(long, env = "ADMIN_ROLE", default_value = DEFAULT_ADMIN_ROLE)]
    admin_role: String,
    #[arg(long, env = "ADMIN_RECOVERY_KEY", hide_env_values = true)]
    admin_recovery_key: Option<Secret>,
    /// Run the bootstrap, print its report as JSON and exit without serving.
    #[arg(long)]
    bootstrap_only: bool,
}

impl Args {
    fn admin_config(&self) -> Result<AdminConfig> {
        Ok(AdminConfig::new(
            self.admin_username.clone(),
            self.admin_email.clone(),
            self.admin_password.clone(),
            self.admin_recovery_key.clone(),
            self.admin_role.clone(),
        )?)
    }

    fn store_location(&self) -> Result<StoreLocation> {
        StoreLocation::parse(&self.database_url).context("invalid DATABASE_URL")
    }

    fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

/// Opens the store and runs the bootstrap once. The returned handle stays
/// open for the life of the process.
fn bootstrap(
    location: &StoreLocation,
    timeout: Duration,
    plan: &BootstrapPlan,
) -> Result<(SqliteStore, BootstrapReport)> {
    let mut store = SqliteStore::open(location, timeout)
        .with_context(|| format!("failed to open store {location}"))?;
    let report = BootstrapOrchestrator::new()
        .run(&mut store, plan)
        .context("bootstrap failed; refusing to serve")?;
    Ok((store, report))
}

fn app() -> Router {
    Router::new().route("/healthz", get(health))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let location = args.store_location()?;
    let timeout = args.store_timeout();
    let plan = BootstrapPlan::new(args.admin_config()?);

    let (store, report) =
        tokio::task::spawn_blocking(move || bootstrap(&location, timeout, &plan))
            .await
            .context("bootstrap task join failure")??;

    if args.bootstrap_only {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    info!(bind = %args.bind, "serving");
    axum::serve(listener, app())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    drop(store);
    info!("store closed");
    Ok(())
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}
