//! uniproxy agent standalone binary.

use clap::Parser;
use uniproxy_agent::{AgentArgs, cli};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = AgentArgs::parse();
    cli::run(args).await
}
