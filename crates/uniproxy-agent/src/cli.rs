//! CLI entry points: `agent` runs the synchronization loop, `users` prints
//! the panel's account set once.

use std::io;
use std::sync::Arc;

use clap::Parser;
use tabled::{Table, Tabled};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::client::{AccountDirectory, PanelClient};
use crate::config::{AgentConfig, PanelConfig};
use crate::inbound::InboundTable;
use crate::provision::MemoryProvisioner;
use crate::reporter::TrafficReporter;
use crate::scheduler::Scheduler;
use crate::sync::SyncEngine;

/// CLI arguments for the agent subcommand.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "uniproxy-agent",
    version,
    about = "Node agent: mirrors panel accounts into the local proxy and reports traffic"
)]
pub struct AgentArgs {
    #[command(flatten)]
    pub config: AgentConfig,

    /// Log level (e.g. "info", "debug", "uniproxy_agent=trace").
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// CLI arguments for the users subcommand.
#[derive(Parser, Debug, Clone)]
#[command(name = "uniproxy-users", version, about = "Print the account set served by the panel")]
pub struct UsersArgs {
    #[command(flatten)]
    pub panel: PanelConfig,

    /// Output format (table, json).
    #[arg(short, long, default_value = "table")]
    pub format: String,
}

/// Run the agent with the given CLI arguments.
pub async fn run(args: AgentArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing(&args.log_level);
    let config = args.config;
    config.validate()?;

    info!(
        version = uniproxy_core::VERSION,
        api_host = %config.panel.api_host,
        node_id = %config.panel.node_id,
        node_type = %config.panel.node_type,
        inbound = %config.inbound_remark,
        "uniproxy agent starting"
    );
    if config.panel.api_key.is_empty() {
        warn!("API_KEY is empty, the panel will most likely reject every request");
    }

    if let Some(listen) = &config.metrics_listen {
        uniproxy_metrics::init_prometheus(listen)?;
        info!(%listen, "prometheus exporter listening");
    }

    let panel = Arc::new(PanelClient::new(&config.panel)?);
    let inbounds = Arc::new(InboundTable::load(&config.inbound_file)?);

    // Only the in-process principal table ships with the agent; proxy
    // control backends plug in through `ProvisioningPort`.
    let port = Arc::new(MemoryProvisioner::new());
    warn!("no proxy control backend configured, provisioning into the in-memory principal table");

    let engine = Arc::new(SyncEngine::new(
        panel.clone(),
        inbounds,
        port.clone(),
        config.inbound_remark.clone(),
    ));
    let reporter = Arc::new(TrafficReporter::new(port, panel));

    // Set up graceful shutdown on SIGTERM/SIGINT
    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal_handler().await;
        info!("shutdown signal received");
        shutdown_signal.cancel();
    });

    Scheduler::new(engine, reporter, &config.schedule)
        .run(shutdown)
        .await;

    info!("uniproxy agent stopped");
    Ok(())
}

#[derive(Tabled)]
struct UserDisplay {
    #[tabled(rename = "ID")]
    id: u64,
    #[tabled(rename = "UUID")]
    uuid: String,
    #[tabled(rename = "Speed limit")]
    speed_limit: String,
}

/// Fetch the account set once and print it.
pub async fn list_users(args: UsersArgs) -> Result<(), Box<dyn std::error::Error>> {
    args.panel.validate()?;
    let client = PanelClient::new(&args.panel)?;
    let accounts = client.fetch_accounts().await?;
    let unique = accounts.unique();

    if unique.is_empty() {
        println!("No users found.");
        return Ok(());
    }

    match args.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&unique)?),
        _ => {
            let rows: Vec<UserDisplay> = unique
                .iter()
                .map(|a| UserDisplay {
                    id: a.id,
                    uuid: a.credential.clone(),
                    speed_limit: match &a.speed_limit {
                        None | Some(serde_json::Value::Null) => "-".to_string(),
                        Some(v) => v.to_string(),
                    },
                })
                .collect();
            println!("{}", Table::new(rows));
        }
    }

    let duplicates = accounts.len() - unique.len();
    if duplicates > 0 {
        eprintln!("{duplicates} duplicate entries ignored");
    }
    Ok(())
}

/// Wait for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal_handler() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .init();
}
