//! Shared state across the steps of one run

use std::collections::BTreeMap;

use super::value::{mapping_from_json, Mapping, Value};
use crate::common::{Error, Result};

/// Built-in variable holding the previous step's outcome
pub const LAST_RESULT: &str = "last_result";

/// Per-run context: the previous step's result plus caller variables
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    last_result: Option<Mapping>,
    variables: BTreeMap<String, Value>,
}

impl ExecutionContext {
    pub fn new(variables: BTreeMap<String, Value>) -> Self {
        Self {
            last_result: None,
            variables,
        }
    }

    pub fn last_result(&self) -> Option<&Mapping> {
        self.last_result.as_ref()
    }

    pub fn variables(&self) -> &BTreeMap<String, Value> {
        &self.variables
    }

    /// Store a step's payload as the new `last_result`
    ///
    /// Objects are kept as-is; any other JSON value is wrapped as
    /// `{"value": ...}` so `last_result` is always a mapping.
    pub fn record_result(&mut self, payload: serde_json::Value) {
        let mapping = match payload {
            serde_json::Value::Object(map) => mapping_from_json(map),
            other => {
                let mut wrapped = Mapping::new();
                wrapped.insert("value".to_string(), Value::from(other));
                wrapped
            }
        };
        self.last_result = Some(mapping);
    }

    /// Replace every variable reference in `parameters`
    ///
    /// Does not touch the context. `last_result` always refers to the
    /// built-in, even if a caller variable has the same name.
    pub fn interpolate(&self, parameters: &Mapping) -> Result<Mapping> {
        parameters
            .iter()
            .map(|(key, value)| Ok((key.clone(), self.resolve(value)?)))
            .collect()
    }

    fn resolve(&self, value: &Value) -> Result<Value> {
        match value {
            Value::VariableRef(name) => self.lookup(name),
            Value::List(items) => Ok(Value::List(
                items.iter().map(|v| self.resolve(v)).collect::<Result<_>>()?,
            )),
            Value::Mapping(map) => Ok(Value::Mapping(self.interpolate(map)?)),
            other => Ok(other.clone()),
        }
    }

    fn lookup(&self, name: &str) -> Result<Value> {
        let found = if name == LAST_RESULT {
            self.last_result.clone().map(Value::Mapping)
        } else {
            self.variables.get(name).cloned()
        };
        found.ok_or_else(|| Error::UndefinedVariable(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{parse_invocation, ParamSchema};
    use serde_json::json;

    fn params(line: &str) -> Mapping {
        parse_invocation(line, &ParamSchema::new())
            .unwrap()
            .parameters
    }

    #[test]
    fn test_last_result_before_any_step_is_undefined() {
        let ctx = ExecutionContext::default();
        let p = params(r#"lsp:hover (MCP)(uri="file:///a.ts", line=${last_result}, character=5)"#);
        let err = ctx.interpolate(&p).unwrap_err();
        assert!(matches!(err, Error::UndefinedVariable(name) if name == "last_result"));
    }

    #[test]
    fn test_last_result_resolves_to_structured_mapping() {
        let mut ctx = ExecutionContext::default();
        ctx.record_result(json!({"line": 7}));

        let resolved = ctx.interpolate(&params("goto(target=${last_result})")).unwrap();
        let Value::Mapping(target) = &resolved["target"] else {
            panic!("expected mapping, got {:?}", resolved["target"]);
        };
        assert_eq!(target["line"], Value::Integer(7));
    }

    #[test]
    fn test_non_object_result_is_wrapped() {
        let mut ctx = ExecutionContext::default();
        ctx.record_result(json!([1, 2]));
        assert_eq!(
            ctx.last_result().unwrap()["value"],
            Value::List(vec![Value::Integer(1), Value::Integer(2)])
        );
    }

    #[test]
    fn test_nested_caller_variables() {
        let mut vars = BTreeMap::new();
        vars.insert("file".to_string(), Value::from("file:///a.ts"));
        let ctx = ExecutionContext::new(vars);

        let resolved = ctx
            .interpolate(&params("open(targets=[${file}, {\"uri\": ${file}}], n=1)"))
            .unwrap();
        assert_eq!(
            resolved["targets"],
            Value::List(vec![
                Value::from("file:///a.ts"),
                Value::Mapping(
                    [("uri".to_string(), Value::from("file:///a.ts"))]
                        .into_iter()
                        .collect()
                ),
            ])
        );
        assert_eq!(resolved["n"], Value::Integer(1));
        assert!(resolved.values().all(Value::is_resolved));
    }

    #[test]
    fn test_unknown_variable_is_undefined() {
        let ctx = ExecutionContext::default();
        let err = ctx.interpolate(&params("open(path=${missing})")).unwrap_err();
        assert!(matches!(err, Error::UndefinedVariable(name) if name == "missing"));
    }

    #[test]
    fn test_builtin_shadows_caller_variable() {
        let mut vars = BTreeMap::new();
        vars.insert(LAST_RESULT.to_string(), Value::Integer(1));
        let ctx = ExecutionContext::new(vars);
        assert!(ctx.interpolate(&params("f(x=${last_result})")).is_err());
    }
}
