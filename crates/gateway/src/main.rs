use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cf_domain::config::{Config, ConfigSeverity};
use cf_gateway::api::router::build_router;
use cf_gateway::cli::{self, Cli, Command, ConfigCommand};
use cf_gateway::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            let (config, path) = cli::load_config(cli.config.as_ref())?;
            if let Some(path) = &path {
                tracing::info!(path = %path.display(), "config loaded");
            } else {
                tracing::info!("no config file found; using defaults");
            }
            run_server(Arc::new(config)).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, _) = cli::load_config(cli.config.as_ref())?;
            let issues = config.validate();
            for issue in &issues {
                let tag = match issue.severity {
                    ConfigSeverity::Error => "error",
                    ConfigSeverity::Warning => "warning",
                };
                println!("{tag}: {}", issue.message);
            }
            if issues
                .iter()
                .any(|i| i.severity == ConfigSeverity::Error)
            {
                std::process::exit(1);
            }
            println!("config ok");
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _) = cli::load_config(cli.config.as_ref())?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Some(Command::Version) => {
            println!("clipforge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Structured JSON tracing for the server process.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,cf_gateway=debug")),
        )
        .json()
        .init();
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("clipforge starting");

    // ── Config validation ─────────────────────────────────────────
    let issues = config.validate();
    let mut fatal = false;
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Error => {
                tracing::error!(message = %issue.message, "config error");
                fatal = true;
            }
            ConfigSeverity::Warning => {
                tracing::warn!(message = %issue.message, "config warning");
            }
        }
    }
    if fatal {
        anyhow::bail!("configuration is invalid; see log for details");
    }

    let state = AppState::new(config.clone())?;
    tracing::info!(
        tools = state.registry.len(),
        llm_configured = state.llm.has_transport(),
        "services wired"
    );

    // ── Idle session eviction ─────────────────────────────────────
    spawn_eviction_task(state.clone());

    // ── Serve ─────────────────────────────────────────────────────
    let router = build_router(state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, router).await?;
    Ok(())
}

/// Periodically evict sessions idle past the configured window, dropping
/// their event channels and retrieval documents with them.
fn spawn_eviction_task(state: AppState) {
    let interval = std::time::Duration::from_secs(state.config.sessions.eviction_interval_secs);
    let max_idle = chrono::Duration::minutes(state.config.sessions.idle_minutes as i64);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // first tick fires immediately; skip it
        loop {
            ticker.tick().await;
            let evicted = state.sessions.evict_idle(max_idle);
            for session_id in evicted {
                state.bus.remove(&session_id);
                let removed = state.retrieval.clear_session(&session_id);
                tracing::info!(
                    session_id = %session_id,
                    documents_removed = removed,
                    "evicted idle session"
                );
            }
        }
    });
}
