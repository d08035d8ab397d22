//! Sequence runner
//!
//! Runs DSL lines one at a time against a single server session. The run
//! is an explicit state machine ([`RunState::advance`]); the async driver
//! only performs the work each state calls for and reports the outcome as
//! a [`RunEvent`].
//!
//! ```text
//! Idle -> SessionStarting -> Ready -> Executing(0)
//! Executing(i) -> StepSucceeded(i) -> Executing(i+1) | Completed
//! Executing(i) -> StepFailed(i)    -> Aborted | Executing(i+1) | Completed
//! SessionStarting -> Aborted
//! any non-terminal state -> Aborted on Ctrl-C
//! ```

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use colored::Colorize;
use tokio::time::Instant;

use crate::common::config::Config;
use crate::common::{Error, ErrorInfo, ErrorKind, Result};
use crate::mcp::types::is_error_result;
use crate::mcp::{CallOutcome, HandshakeParams, LaunchSpec, LineChannel, McpClient, ServerSession};
use crate::script::value::mapping_to_json;
use crate::script::{parse_invocation, ExecutionContext, ParamSchema, Value};

use super::report::{RunReport, StepResult};

/// What to do after a failed step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Skip every remaining line
    #[default]
    Abort,
    /// Record the failure and move on, unless the session is gone
    Continue,
}

/// Run states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    SessionStarting,
    Ready,
    Executing(usize),
    StepSucceeded(usize),
    StepFailed { index: usize, fatal: bool },
    Aborted,
    Completed,
}

/// Outcomes reported by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEvent {
    Start,
    SessionReady,
    SessionFailed,
    StepPassed,
    /// `fatal` when the session can no longer serve requests
    StepFailed { fatal: bool },
    Next,
    Interrupted,
}

/// Fixed parameters of one run
#[derive(Debug, Clone, Copy)]
pub struct Plan {
    pub total: usize,
    pub policy: FailurePolicy,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Aborted | RunState::Completed)
    }

    /// The single transition function
    pub fn advance(self, event: RunEvent, plan: &Plan) -> Result<RunState> {
        let next_step = |index: usize| {
            if index + 1 < plan.total {
                RunState::Executing(index + 1)
            } else {
                RunState::Completed
            }
        };

        let next = match (self, event) {
            (RunState::Idle, RunEvent::Start) => RunState::SessionStarting,
            (RunState::SessionStarting, RunEvent::SessionReady) => RunState::Ready,
            (RunState::SessionStarting, RunEvent::SessionFailed) => RunState::Aborted,
            (RunState::Ready, RunEvent::Next) if plan.total == 0 => RunState::Completed,
            (RunState::Ready, RunEvent::Next) => RunState::Executing(0),
            (RunState::Executing(i), RunEvent::StepPassed) => RunState::StepSucceeded(i),
            (RunState::Executing(i), RunEvent::StepFailed { fatal }) => {
                RunState::StepFailed { index: i, fatal }
            }
            (RunState::StepSucceeded(i), RunEvent::Next) => next_step(i),
            (RunState::StepFailed { index, fatal }, RunEvent::Next) => {
                if fatal || plan.policy == FailurePolicy::Abort {
                    RunState::Aborted
                } else {
                    next_step(index)
                }
            }
            (state, RunEvent::Interrupted) if !state.is_terminal() => RunState::Aborted,
            (state, event) => {
                return Err(Error::Internal(format!(
                    "Invalid runner transition: {:?} on {:?}",
                    state, event
                )))
            }
        };
        Ok(next)
    }
}

/// Runner settings
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub policy: FailurePolicy,
    /// Treat `result.isError == true` as a failed step
    pub fail_on_is_error: bool,
    pub request_timeout: Duration,
    pub startup_grace: Duration,
    pub shutdown_grace: Duration,
    /// `None` skips the MCP handshake
    pub handshake: Option<HandshakeParams>,
    /// Suppress progress lines on stderr
    pub quiet: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl RunOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            policy: if config.runner.keep_going {
                FailurePolicy::Continue
            } else {
                FailurePolicy::Abort
            },
            fail_on_is_error: config.runner.fail_on_is_error,
            request_timeout: config.timeouts.request(),
            startup_grace: config.timeouts.startup_grace(),
            shutdown_grace: config.timeouts.shutdown_grace(),
            handshake: config.handshake.params(),
            quiet: false,
        }
    }
}

/// Executes DSL lines against one server session
pub struct SequenceRunner {
    options: RunOptions,
    schema: ParamSchema,
    variables: BTreeMap<String, Value>,
}

/// Mutable state of one run
struct Execution {
    plan: Plan,
    state: RunState,
    context: ExecutionContext,
    steps: Vec<StepResult>,
    session_error: Option<ErrorInfo>,
    interrupted: bool,
}

impl Execution {
    fn fire(&mut self, event: RunEvent) {
        match self.state.advance(event, &self.plan) {
            Ok(next) => {
                tracing::debug!(from = ?self.state, to = ?next, "Runner transition");
                self.state = next;
            }
            Err(e) => {
                tracing::error!("{}", e);
                self.session_error.get_or_insert_with(|| ErrorInfo::from(&e));
                self.state = RunState::Aborted;
            }
        }
    }

    fn fail_session(&mut self, error: &Error) {
        tracing::warn!("Session failed: {}", error);
        self.session_error = Some(ErrorInfo::from(error));
        self.fire(RunEvent::SessionFailed);
    }

    fn interrupt(&mut self) {
        tracing::warn!("Run interrupted in state {:?}", self.state);
        self.interrupted = true;
        if !self.state.is_terminal() {
            self.fire(RunEvent::Interrupted);
        }
    }

    fn into_report(self) -> RunReport {
        let report = RunReport::new(self.plan.total, self.steps, self.session_error);
        if self.interrupted {
            report.mark_interrupted()
        } else {
            report
        }
    }
}

impl SequenceRunner {
    pub fn new(options: RunOptions) -> Self {
        Self {
            options,
            schema: ParamSchema::new(),
            variables: BTreeMap::new(),
        }
    }

    pub fn with_schema(mut self, schema: ParamSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_variables(mut self, variables: BTreeMap<String, Value>) -> Self {
        self.variables = variables;
        self
    }

    /// Spawn the server, run every line, and tear the server down
    ///
    /// Never fails: every error ends up in the report.
    pub async fn run(&self, launch: &LaunchSpec, lines: &[String]) -> RunReport {
        self.run_until(launch, lines, std::future::pending()).await
    }

    /// Like [`run`](Self::run), but stops early once `interrupt` resolves
    ///
    /// The step in flight is abandoned and the server still gets the
    /// graceful `stop`. The report keeps every step that finished.
    pub async fn run_until(
        &self,
        launch: &LaunchSpec,
        lines: &[String],
        interrupt: impl Future<Output = ()>,
    ) -> RunReport {
        tokio::pin!(interrupt);
        let mut exec = self.execution(lines.len());
        exec.fire(RunEvent::Start);

        let started = tokio::select! {
            started = ServerSession::start(launch, self.options.startup_grace) => Some(started),
            _ = &mut interrupt => None,
        };
        let session = match started {
            Some(Ok(session)) => session,
            Some(Err(e)) => {
                self.print_session_error(&e);
                exec.fail_session(&e);
                return self.finish(exec);
            }
            None => {
                exec.interrupt();
                return self.finish(exec);
            }
        };

        let mut client = McpClient::new(session, self.options.request_timeout);
        let interrupted = tokio::select! {
            _ = self.drive(&mut client, lines, &mut exec) => false,
            _ = &mut interrupt => true,
        };
        if interrupted {
            exec.interrupt();
        }

        // Completed and Aborted both end here, exactly once
        client.channel_mut().stop(self.options.shutdown_grace).await;
        self.finish(exec)
    }

    /// Run every line over an already connected channel
    ///
    /// The caller owns the channel and its teardown.
    pub async fn run_on<C: LineChannel>(
        &self,
        client: &mut McpClient<C>,
        lines: &[String],
    ) -> RunReport {
        let mut exec = self.execution(lines.len());
        exec.fire(RunEvent::Start);
        self.drive(client, lines, &mut exec).await;
        self.finish(exec)
    }

    fn execution(&self, total: usize) -> Execution {
        Execution {
            plan: Plan {
                total,
                policy: self.options.policy,
            },
            state: RunState::Idle,
            context: ExecutionContext::new(self.variables.clone()),
            steps: Vec::with_capacity(total),
            session_error: None,
            interrupted: false,
        }
    }

    async fn drive<C: LineChannel>(
        &self,
        client: &mut McpClient<C>,
        lines: &[String],
        exec: &mut Execution,
    ) {
        if let Some(handshake) = &self.options.handshake {
            if let Err(e) = client.initialize(handshake).await {
                self.print_session_error(&e);
                exec.fail_session(&e);
                return;
            }
        }
        exec.fire(RunEvent::SessionReady);
        exec.fire(RunEvent::Next);

        while let RunState::Executing(index) = exec.state {
            let Some(line) = lines.get(index) else {
                exec.fire(RunEvent::SessionFailed);
                break;
            };

            let (result, fatal) = self.run_step(client, &mut exec.context, index, line).await;
            self.print_step(&result);

            let event = if result.success {
                RunEvent::StepPassed
            } else {
                RunEvent::StepFailed { fatal }
            };
            exec.steps.push(result);
            exec.fire(event);
            exec.fire(RunEvent::Next);
        }
    }

    /// parse -> interpolate -> tools/call -> record
    ///
    /// Returns the record and whether the failure (if any) killed the session.
    async fn run_step<C: LineChannel>(
        &self,
        client: &mut McpClient<C>,
        context: &mut ExecutionContext,
        index: usize,
        line: &str,
    ) -> (StepResult, bool) {
        let started = Instant::now();
        let mut result = StepResult {
            index,
            line: line.to_string(),
            invocation: None,
            request_id: None,
            success: false,
            payload: None,
            error: None,
            duration_ms: 0,
        };

        let invocation = match parse_invocation(line, &self.schema) {
            Ok(invocation) => invocation,
            Err(e) => return (fail(result, &e, started), false),
        };
        result.invocation = Some(invocation.clone());

        let arguments = match context
            .interpolate(&invocation.parameters)
            .and_then(|resolved| mapping_to_json(&resolved))
        {
            Ok(arguments) => arguments,
            Err(e) => return (fail(result, &e, started), false),
        };

        let before = client.last_request_id();
        let response = client.call_tool(&invocation.tool_name, &arguments).await;
        if client.last_request_id() != before {
            result.request_id = client.last_request_id();
        }

        let outcome = match response {
            Ok(response) => response.outcome,
            Err(e) => {
                let fatal = e.is_fatal_to_session();
                return (fail(result, &e, started), fatal);
            }
        };

        match outcome {
            CallOutcome::Success(payload) => {
                context.record_result(payload.clone());
                if self.options.fail_on_is_error && is_error_result(&payload) {
                    result.error = Some(
                        ErrorInfo::new(
                            ErrorKind::ToolError,
                            format!("Tool '{}' reported isError", invocation.tool_name),
                        )
                        .with_data(payload.clone()),
                    );
                } else {
                    result.success = true;
                }
                result.payload = Some(payload);
            }
            CallOutcome::ToolError(err) => {
                let data = err.to_json();
                context.record_result(data.clone());
                let error = Error::tool_failed("tools/call", err.code, &err.message);
                result.error = Some(ErrorInfo::from(&error).with_data(data));
            }
        }

        result.duration_ms = elapsed_ms(started);
        (result, false)
    }

    fn finish(&self, exec: Execution) -> RunReport {
        let report = exec.into_report();
        self.print_summary(&report);
        report
    }

    fn print_step(&self, result: &StepResult) {
        if self.options.quiet {
            return;
        }
        let timing = format!("({}ms)", result.duration_ms);
        if result.success {
            eprintln!(
                "  {} Step {}: {} {}",
                "✓".green(),
                result.index + 1,
                result.line,
                timing.dimmed()
            );
        } else {
            eprintln!(
                "  {} Step {}: {} {}",
                "✗".red(),
                result.index + 1,
                result.line,
                timing.dimmed()
            );
            if let Some(error) = &result.error {
                eprintln!("      {}", error.message.red());
            }
        }
    }

    fn print_session_error(&self, error: &Error) {
        if !self.options.quiet {
            eprintln!("  {} {}", "✗".red(), error.to_string().red());
        }
    }

    fn print_summary(&self, report: &RunReport) {
        if self.options.quiet {
            return;
        }
        if report.interrupted {
            eprintln!(
                "\n{} {}",
                "✗".red().bold(),
                format!(
                    "Interrupted after {} of {} steps",
                    report.steps.len(),
                    report.total
                )
                .red()
                .bold()
            );
        } else if report.success {
            eprintln!(
                "\n{} {}",
                "✓".green().bold(),
                format!("All {} steps passed", report.total).green().bold()
            );
        } else {
            eprintln!(
                "\n{} {}",
                "✗".red().bold(),
                format!(
                    "{} passed, {} failed, {} skipped",
                    report.passed(),
                    report.failed(),
                    report.skipped()
                )
                .red()
                .bold()
            );
        }
    }
}

fn fail(mut result: StepResult, error: &Error, started: Instant) -> StepResult {
    result.error = Some(ErrorInfo::from(error));
    result.duration_ms = elapsed_ms(started);
    result
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
