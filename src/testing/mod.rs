//! Script execution
//!
//! Loads scripts, runs them line by line against one server session, and
//! collects a structured report. Failures never escape as errors; the
//! caller only ever sees a [`RunReport`].

mod config;
mod report;
mod runner;

pub use config::*;
pub use report::{write_report, RunReport, StepResult};
pub use runner::{FailurePolicy, Plan, RunEvent, RunOptions, RunState, SequenceRunner};
