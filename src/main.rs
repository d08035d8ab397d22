//! mcp-probe - scripted test harness for MCP servers
//!
//! Drives a stdio JSON-RPC server through a compact one-line-per-call
//! language and reports pass/fail per step as JSON.

use clap::Parser;
use commands::Commands;
use mcp_probe::common::logging;
use mcp_probe::{cli, commands, Error};

#[derive(Parser)]
#[command(name = "mcp-probe", about = "Scripted test harness for MCP servers")]
#[command(version, long_about = None)]
struct Cli {
    /// Log wire traffic and state transitions
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_cli(cli.verbose);

    match cli::dispatch(cli.command).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(Error::Interrupted) => {
            tracing::warn!("Interrupted, server stopped");
            std::process::exit(130);
        }
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
