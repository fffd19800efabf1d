//! Unified uniproxy CLI.
//!
//! This binary provides a unified interface to the node tooling:
//! - `uniproxy agent` - Run the panel synchronization agent
//! - `uniproxy users` - Print the account set served by the panel
//!
//! The agent can also be run as the standalone `uniproxy-agent` binary.

use std::process::ExitCode;

use clap::{Parser, Subcommand};

/// uniproxy unified CLI.
#[derive(Parser)]
#[command(
    name = "uniproxy",
    version,
    about = "Node-side synchronization agent for UniProxy panels",
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the synchronization agent.
    #[command(name = "agent", alias = "run")]
    Agent(Box<uniproxy_agent::AgentArgs>),

    /// Fetch and print the panel's account set.
    #[command(name = "users")]
    Users(uniproxy_agent::UsersArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Agent(args) => uniproxy_agent::cli::run(*args).await,
        Commands::Users(args) => uniproxy_agent::cli::list_users(args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
