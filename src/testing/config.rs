//! Script files
//!
//! A script is either a YAML scenario carrying its own server settings,
//! variables and schema, or a plain text file with one DSL line per line.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::common::config::ServerConfig;
use crate::common::{Error, Result};
use crate::script::{ParamSchema, Value};

/// A complete test scenario loaded from a YAML file
#[derive(Deserialize, Debug, Default)]
pub struct Scenario {
    /// Name of the test scenario
    pub name: String,
    /// Optional description of what the test verifies
    pub description: Option<String>,
    /// Server to run against; overrides the config file
    pub server: Option<ServerConfig>,
    /// Caller variables available as `${name}`
    #[serde(default)]
    pub variables: BTreeMap<String, serde_json::Value>,
    /// Integer-typed parameters per tool, e.g. `hover: [line, character]`
    #[serde(default)]
    pub schema: BTreeMap<String, Vec<String>>,
    /// DSL lines, executed in order
    pub steps: Vec<String>,
}

impl Scenario {
    pub fn param_schema(&self) -> ParamSchema {
        let mut schema = ParamSchema::new();
        for (tool, fields) in &self.schema {
            for field in fields {
                schema.declare_integer(tool, field);
            }
        }
        schema
    }

    pub fn script_variables(&self) -> BTreeMap<String, Value> {
        self.variables
            .iter()
            .map(|(name, value)| (name.clone(), Value::from(value.clone())))
            .collect()
    }
}

/// Load a script file
///
/// `.yaml`/`.yml` files are scenarios; anything else is read as DSL lines
/// and wrapped in a scenario named after the file.
pub fn load_script(path: &Path) -> Result<Scenario> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
        path: path.display().to_string(),
        error: e.to_string(),
    })?;

    let is_yaml = matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml" | "yml")
    );
    if !is_yaml {
        return Ok(Scenario {
            name: path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default(),
            steps: parse_lines(&content),
            ..Default::default()
        });
    }

    let mut scenario: Scenario = serde_yaml::from_str(&content).map_err(|e| {
        Error::Config(format!(
            "Failed to parse scenario '{}': {}",
            path.display(),
            e
        ))
    })?;

    // Resolve server paths relative to the scenario file
    let scenario_dir = path.parent().unwrap_or(Path::new("."));
    if let Some(server) = scenario.server.as_mut() {
        server.command = server
            .command
            .take()
            .map(|command| relative_to(scenario_dir, command));
        server.cwd = server.cwd.take().map(|cwd| {
            if cwd.is_relative() {
                scenario_dir.join(cwd)
            } else {
                cwd
            }
        });
    }

    Ok(scenario)
}

/// Commands that look like relative paths are anchored at `dir`; bare names
/// are left for PATH lookup.
fn relative_to(dir: &Path, command: String) -> String {
    let as_path = PathBuf::from(&command);
    if command.contains('/') && as_path.is_relative() {
        dir.join(as_path).display().to_string()
    } else {
        command
    }
}

/// Split a text script into DSL lines, skipping blanks and `#` comments
pub fn parse_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}
