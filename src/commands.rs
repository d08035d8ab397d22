//! CLI command definitions
//!
//! Defines the clap commands for the mcp-probe CLI.

use clap::{Args, Subcommand};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run DSL lines against a server and print the step results as JSON
    ///
    /// A single argument naming an existing file is loaded as a script
    /// (.yaml/.yml scenario or one line per call); otherwise every argument
    /// is one DSL line.
    Run {
        /// Script file, or DSL lines such as `lsp:hover(uri="file:///a.ts", line=1)`
        #[arg(required = true)]
        input: Vec<String>,

        #[command(flatten)]
        server: ServerArgs,

        /// Caller variable as name=value (value uses the DSL value rules)
        #[arg(long = "var", value_name = "NAME=VALUE")]
        vars: Vec<String>,

        /// Declare an integer-typed parameter as tool.param
        #[arg(long = "int-field", value_name = "TOOL.PARAM")]
        int_fields: Vec<String>,

        /// Keep executing after a failed step (connection loss still aborts)
        #[arg(long)]
        keep_going: bool,

        /// Treat tool results with `isError: true` as failures
        #[arg(long)]
        fail_on_is_error: bool,

        /// Write a timestamped JSON report with a summary to this path
        #[arg(long, value_name = "PATH")]
        report: Option<PathBuf>,

        /// Suppress progress output on stderr
        #[arg(long, short)]
        quiet: bool,
    },

    /// Parse DSL lines without running them
    Parse {
        /// DSL lines to parse
        #[arg(required = true)]
        lines: Vec<String>,

        /// Declare an integer-typed parameter as tool.param
        #[arg(long = "int-field", value_name = "TOOL.PARAM")]
        int_fields: Vec<String>,

        /// Configuration file (for its [schema] section)
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Start the server and print its tool list
    Tools {
        #[command(flatten)]
        server: ServerArgs,
    },
}

/// How to reach the server under test
#[derive(Args, Debug, Default, Clone)]
pub struct ServerArgs {
    /// Server command (overrides the config file and scenario)
    #[arg(long, value_name = "CMD")]
    pub server: Option<String>,

    /// Argument for the server command (repeatable)
    #[arg(long = "server-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub server_args: Vec<String>,

    /// Working directory for the server
    #[arg(long, value_name = "DIR")]
    pub cwd: Option<PathBuf>,

    /// Per-request timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Skip the MCP initialize handshake
    #[arg(long)]
    pub no_handshake: bool,

    /// Configuration file (default: the user config directory)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}
