//! Step records and run reports

use std::path::Path;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use crate::common::{Error, ErrorInfo, Result};
use crate::script::ToolInvocation;

/// Outcome of one DSL line
#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    /// Zero-based position in the script
    pub index: usize,
    pub line: String,
    /// Absent only when the line failed to parse
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invocation: Option<ToolInvocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<i64>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    pub duration_ms: u64,
}

/// Everything a run produced
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// True only if the session started and every line ran and passed
    pub success: bool,
    /// Set when the server could not be started or initialized
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_error: Option<ErrorInfo>,
    /// Set when Ctrl-C cut the run short
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub interrupted: bool,
    /// Number of lines in the script
    pub total: usize,
    pub steps: Vec<StepResult>,
}

impl RunReport {
    pub fn new(total: usize, steps: Vec<StepResult>, session_error: Option<ErrorInfo>) -> Self {
        let success = session_error.is_none()
            && steps.len() == total
            && steps.iter().all(|step| step.success);
        Self {
            success,
            session_error,
            interrupted: false,
            total,
            steps,
        }
    }

    /// Mark the run as cut short; an interrupted run never succeeds
    pub fn mark_interrupted(mut self) -> Self {
        self.interrupted = true;
        self.success = false;
        self
    }

    pub fn passed(&self) -> usize {
        self.steps.iter().filter(|step| step.success).count()
    }

    pub fn failed(&self) -> usize {
        self.steps.len() - self.passed()
    }

    /// Lines never executed because the run aborted
    pub fn skipped(&self) -> usize {
        self.total.saturating_sub(self.steps.len())
    }
}

#[derive(Debug, Serialize)]
struct Summary {
    total: usize,
    passed: usize,
    failed: usize,
    skipped: usize,
}

#[derive(Debug, Serialize)]
struct ReportFile<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    timestamp: String,
    summary: Summary,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_error: Option<&'a ErrorInfo>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    interrupted: bool,
    steps: &'a [StepResult],
}

/// Write a timestamped JSON report with a pass/fail summary
pub fn write_report(path: &Path, name: Option<&str>, report: &RunReport) -> Result<()> {
    let file = ReportFile {
        name,
        timestamp: Utc::now().to_rfc3339(),
        summary: Summary {
            total: report.total,
            passed: report.passed(),
            failed: report.failed(),
            skipped: report.skipped(),
        },
        success: report.success,
        session_error: report.session_error.as_ref(),
        interrupted: report.interrupted,
        steps: &report.steps,
    };

    let json = serde_json::to_string_pretty(&file)?;
    std::fs::write(path, json).map_err(|e| {
        Error::Internal(format!("Failed to write report '{}': {}", path.display(), e))
    })?;
    tracing::info!("Report written to {}", path.display());
    Ok(())
}
