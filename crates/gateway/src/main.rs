use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use clap::{Parser, Subcommand};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use ar_agent::claude::ClaudeCliBackend;
use ar_domain::config::{Config, ConfigSeverity};
use ar_gateway::api;
use ar_gateway::pid::PidLock;
use ar_gateway::runtime::cron::CronParser;
use ar_gateway::runtime::executor::TaskExecutor;
use ar_gateway::runtime::scheduler::Scheduler;
use ar_gateway::runtime::storage::TaskStorage;
use ar_gateway::state::AppState;
use ar_sessions::SessionManager;

#[derive(Parser)]
#[command(name = "agentrunner", about = "Self-hosted job scheduler for coding-agent tasks")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "agentrunner.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default).
    Serve,
    /// Print the version and exit.
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let config = Config::load(&cli.config)
                .with_context(|| format!("loading {}", cli.config.display()))?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Version) => {
            println!("agentrunner {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Structured JSON tracing for the `serve` command.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,ar_gateway=debug")),
        )
        .json()
        .init();
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("AgentRunner starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Data directory ownership ─────────────────────────────────────
    // Held for the process lifetime; a second instance pointed at the same
    // data directory fails here instead of corrupting the collections.
    let _pid_lock = PidLock::acquire(&config.storage.data_dir)
        .context("acquiring data directory lock")?;

    // ── Storage ──────────────────────────────────────────────────────
    let storage = Arc::new(TaskStorage::open(&config.storage).context("opening task storage")?);
    tracing::info!(
        data_dir = %config.storage.data_dir.display(),
        queue = storage.queue.count(),
        scheduled = storage.scheduled.count(),
        "task storage ready"
    );

    // ── Agent backend ────────────────────────────────────────────────
    let backend = Arc::new(ClaudeCliBackend::new(config.agent.binary.clone()));
    tracing::info!(binary = %config.agent.binary, "agent backend ready");

    // ── Executor + cron + scheduler ──────────────────────────────────
    let cron = Arc::new(CronParser::new());
    let executor = Arc::new(TaskExecutor::new(
        storage.clone(),
        backend.clone(),
        config.executor.clone(),
        config.agent.clone(),
    ));
    let scheduler = Arc::new(Scheduler::new(
        storage.clone(),
        executor.clone(),
        cron.clone(),
        config.scheduler.clone(),
    ));
    if config.scheduler.auto_start {
        if scheduler.start().await {
            tracing::info!("scheduler auto-started");
        }
    } else {
        tracing::info!("scheduler waiting for POST /api/scheduler/start");
    }

    // ── Streaming sessions ───────────────────────────────────────────
    let sessions = Arc::new(SessionManager::new(config.sessions.clone()));
    let sweeper = sessions.spawn_sweeper();
    tracing::info!(
        max_pending_questions = config.sessions.max_pending_questions,
        "session manager ready"
    );

    // ── Router ───────────────────────────────────────────────────────
    let state = AppState {
        config: config.clone(),
        storage,
        executor,
        scheduler: scheduler.clone(),
        sessions,
        backend,
        cron,
    };
    let app = api::router()
        .layer(build_cors_layer(&config.server.cors))
        .with_state(state);

    // ── Bind ─────────────────────────────────────────────────────────
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, "AgentRunner listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("axum server error")?;

    // ── Drain ────────────────────────────────────────────────────────
    sweeper.abort();
    scheduler.stop().await;
    tracing::info!("AgentRunner stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        return;
    }
    tracing::info!("shutdown signal received");
}

/// Build a [`CorsLayer`] from the configured allowed origins.
///
/// Origins may carry a trailing `*` wildcard for the port segment
/// (e.g. `http://localhost:*`). A literal `"*"` allows all origins.
fn build_cors_layer(cors: &ar_domain::config::CorsConfig) -> CorsLayer {
    use axum::http::header;

    if cors.allowed_origins.len() == 1 && cors.allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PATCH,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::CONTENT_TYPE]);
    }

    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut wildcard_prefixes: Vec<String> = Vec::new();
    for origin in &cors.allowed_origins {
        if origin.ends_with(":*") {
            wildcard_prefixes.push(origin.trim_end_matches('*').to_owned());
        } else if let Ok(hv) = origin.parse::<HeaderValue>() {
            exact.push(hv);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = if wildcard_prefixes.is_empty() {
        AllowOrigin::list(exact)
    } else {
        AllowOrigin::predicate(move |origin, _| {
            if exact.iter().any(|e| e.as_bytes() == origin.as_bytes()) {
                return true;
            }
            let origin_str = origin.to_str().unwrap_or("");
            // The remainder after the prefix must be digits only, so
            // "http://localhost:3000.evil.com" cannot slip through.
            wildcard_prefixes.iter().any(|prefix| {
                origin_str
                    .strip_prefix(prefix.as_str())
                    .map(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
                    .unwrap_or(false)
            })
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE])
}
