//! loopback-fetch demo server.
//!
//! ```text
//!  Client ──▶ /dashboard ──fetch──▶ /session ──fetch──▶ /users/:id
//!                 │                     │
//!                 │                     └─ sets `session` cookie (shared jar)
//!                 └──fetch──▶ /whoami   (sees the cookie set above)
//!
//!  /relay?url=https://…  ──fetch──▶ external cache ──▶ reqwest
//! ```

use std::path::PathBuf;

use clap::Parser;
use serde_json::json;
use tokio::net::TcpListener;

use loopback_fetch::config::{load_config, ServiceConfig};
use loopback_fetch::observability::{logging, metrics};
use loopback_fetch::{fetch, CallRequest, CookieOptions, Registry, Reply, Service};

#[derive(Parser)]
#[command(name = "loopback-fetch")]
#[command(about = "Demo service whose handlers call each other in-process", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,
}

fn demo_routes() -> Result<Registry, Box<dyn std::error::Error>> {
    let mut routes = Registry::new();
    routes
        .get("/users/:id", |req: CallRequest, res: Reply| async move {
            let id = req.param("id").unwrap_or_default().to_string();
            res.json(&json!({ "id": id, "name": format!("user-{id}") }))
        })?
        .get("/session/:id?", |req: CallRequest, res: Reply| async move {
            let id = req.param("id").unwrap_or("1").to_string();
            let user = fetch(&format!("/users/{id}")).await?;
            res.cookie("session", &id, CookieOptions::default().http_only())?;
            res.send(user.text()?)
        })?
        .get("/whoami", |req: CallRequest, res: Reply| async move {
            res.json(&json!({ "session": req.cookie("session") }))
        })?
        .get("/dashboard", |req: CallRequest, res: Reply| async move {
            let target = match req.query("user") {
                Some(id) => format!("/session/{id}"),
                None => "/session".to_string(),
            };
            let user: serde_json::Value = fetch(&target).await?.json()?;
            let whoami: serde_json::Value = fetch("/whoami").await?.json()?;
            res.json(&json!({ "user": user, "whoami": whoami }))
        })?
        .get("/relay", |req: CallRequest, res: Reply| async move {
            let Some(url) = req.query("url") else {
                return res
                    .status(axum::http::StatusCode::BAD_REQUEST)
                    .send("missing url");
            };
            let upstream = fetch(url).await?;
            res.status(upstream.status()).send_bytes(upstream.bytes()?)
        })?;
    Ok(routes)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        return;
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServiceConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }

    logging::init_tracing(&config.observability.log_level);
    tracing::info!("loopback-fetch v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        request_timeout_secs = config.timeouts.request_secs,
        strict_guard = config.dispatch.strict_guard,
        cache_rules = config.cache.rules.len(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let service = Service::builder(demo_routes()?).config(config).build()?;
    service.serve(listener, shutdown_signal()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
