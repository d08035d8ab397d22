//! CLI command handling
//!
//! Merges configuration layers (config file, scenario, flags), runs the
//! requested command and prints machine-readable JSON on stdout.

use std::path::Path;

use colored::Colorize;
use serde::Serialize;

use crate::commands::{Commands, ServerArgs};
use crate::common::config::Config;
use crate::common::{Error, ErrorInfo, Result};
use crate::mcp::{McpClient, ServerSession};
use crate::script::{parse_invocation, parse_value_token, ParamSchema, ToolInvocation, Value};
use crate::testing::{load_script, write_report, RunOptions, Scenario, SequenceRunner};

/// Dispatch a CLI command
///
/// Returns whether everything the command did succeeded; `main` turns that
/// into the exit code. Ctrl-C during `run` or `tools` stops the server
/// gracefully and comes back as [`Error::Interrupted`].
pub async fn dispatch(command: Commands) -> Result<bool> {
    match command {
        Commands::Run {
            input,
            server,
            vars,
            int_fields,
            keep_going,
            fail_on_is_error,
            report,
            quiet,
        } => {
            let scenario = resolve_input(&input)?;

            let mut config = Config::load(server.config.as_deref())?;
            if let Some(scenario_server) = &scenario.server {
                config.server.merge(scenario_server);
            }
            apply_server_args(&mut config, &server);
            config.runner.keep_going |= keep_going;
            config.runner.fail_on_is_error |= fail_on_is_error;

            let launch = config.server.launch_spec()?;

            let mut schema = config.param_schema();
            schema.extend(&scenario.param_schema());
            declare_int_fields(&mut schema, &int_fields)?;

            let mut variables = config.script_variables();
            variables.extend(scenario.script_variables());
            for var in &vars {
                let (name, value) = parse_var(var)?;
                variables.insert(name, value);
            }

            let mut options = RunOptions::from_config(&config);
            options.quiet = quiet;

            if !quiet {
                eprintln!(
                    "\n{} {}",
                    "Running:".blue().bold(),
                    scenario.name.white().bold()
                );
                if let Some(desc) = &scenario.description {
                    eprintln!("  {}", desc.dimmed());
                }
            }

            let run_report = SequenceRunner::new(options)
                .with_schema(schema)
                .with_variables(variables)
                .run_until(&launch, &scenario.steps, ctrl_c())
                .await;

            println!("{}", serde_json::to_string_pretty(&run_report.steps)?);

            if let Some(path) = report {
                write_report(&path, Some(&scenario.name), &run_report)?;
            }

            if run_report.interrupted {
                return Err(Error::Interrupted);
            }
            Ok(run_report.success)
        }

        Commands::Parse {
            lines,
            int_fields,
            config,
        } => {
            let config = Config::load(config.as_deref())?;
            let mut schema = config.param_schema();
            declare_int_fields(&mut schema, &int_fields)?;

            let parsed: Vec<ParsedLine> = lines
                .iter()
                .map(|line| ParsedLine::new(line, parse_invocation(line, &schema)))
                .collect();
            println!("{}", serde_json::to_string_pretty(&parsed)?);

            Ok(parsed.iter().all(|p| p.error.is_none()))
        }

        Commands::Tools { server } => {
            let mut config = Config::load(server.config.as_deref())?;
            apply_server_args(&mut config, &server);
            let launch = config.server.launch_spec()?;

            let session = ServerSession::start(&launch, config.timeouts.startup_grace()).await?;
            let mut client = McpClient::new(session, config.timeouts.request());

            let result = tokio::select! {
                result = list_tools(&mut client, &config) => result,
                _ = ctrl_c() => Err(Error::Interrupted),
            };
            client
                .channel_mut()
                .stop(config.timeouts.shutdown_grace())
                .await;

            println!("{}", serde_json::to_string_pretty(&result?)?);
            Ok(true)
        }
    }
}

async fn list_tools(
    client: &mut McpClient<ServerSession>,
    config: &Config,
) -> Result<serde_json::Value> {
    if let Some(handshake) = config.handshake.params() {
        client.initialize(&handshake).await?;
    }
    client.list_tools().await
}

/// Resolves on Ctrl-C, or never if the handler cannot be installed
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// One argument naming an existing file is a script; otherwise every
/// argument is a DSL line.
fn resolve_input(input: &[String]) -> Result<Scenario> {
    if let [single] = input {
        let path = Path::new(single);
        if path.is_file() {
            return load_script(path);
        }
    }
    Ok(Scenario {
        name: "command line".to_string(),
        steps: input.to_vec(),
        ..Default::default()
    })
}

/// Command-line server flags win over everything else
fn apply_server_args(config: &mut Config, args: &ServerArgs) {
    if let Some(command) = &args.server {
        config.server.command = Some(command.clone());
        config.server.args = args.server_args.clone();
    } else if !args.server_args.is_empty() {
        config.server.args = args.server_args.clone();
    }
    if let Some(cwd) = &args.cwd {
        config.server.cwd = Some(cwd.clone());
    }
    if let Some(secs) = args.timeout {
        config.timeouts.request_secs = secs;
    }
    if args.no_handshake {
        config.handshake.enabled = false;
    }
}

fn declare_int_fields(schema: &mut ParamSchema, fields: &[String]) -> Result<()> {
    for field in fields {
        schema.declare_dotted(field).ok_or_else(|| {
            Error::Config(format!(
                "Invalid --int-field '{}', expected tool.param",
                field
            ))
        })?;
    }
    Ok(())
}

/// Parse `name=value` from `--var`
fn parse_var(var: &str) -> Result<(String, Value)> {
    let (name, raw) = var
        .split_once('=')
        .filter(|(name, _)| !name.trim().is_empty())
        .ok_or_else(|| {
            Error::Config(format!("Invalid --var '{}', expected name=value", var))
        })?;
    Ok((name.trim().to_string(), parse_value_token(raw)?))
}

/// `parse` subcommand output for one line
#[derive(Serialize)]
struct ParsedLine<'a> {
    line: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    invocation: Option<ToolInvocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorInfo>,
}

impl<'a> ParsedLine<'a> {
    fn new(line: &'a str, parsed: Result<ToolInvocation>) -> Self {
        match parsed {
            Ok(invocation) => Self {
                line,
                invocation: Some(invocation),
                error: None,
            },
            Err(e) => Self {
                line,
                invocation: None,
                error: Some(ErrorInfo::from(&e)),
            },
        }
    }
}
