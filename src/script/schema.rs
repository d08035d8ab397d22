//! Caller-declared parameter types
//!
//! The grammar alone cannot tell whether `line=10.0` is meant as a number or
//! a string. The caller settles that by declaring integer-typed fields per
//! tool; nothing is inferred beyond these declarations.

use std::collections::{BTreeMap, BTreeSet};

/// Integer-typed parameters keyed by tool name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamSchema {
    integer_fields: BTreeMap<String, BTreeSet<String>>,
}

impl ParamSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `tool.param` as integer-typed
    pub fn declare_integer(&mut self, tool: &str, param: &str) {
        self.integer_fields
            .entry(tool.to_string())
            .or_default()
            .insert(param.to_string());
    }

    /// Builder form of [`declare_integer`](Self::declare_integer)
    pub fn with_integer(mut self, tool: &str, param: &str) -> Self {
        self.declare_integer(tool, param);
        self
    }

    /// Parse a `tool.param` declaration as given on the command line
    pub fn declare_dotted(&mut self, spec: &str) -> Option<()> {
        let (tool, param) = spec.split_once('.')?;
        if tool.is_empty() || param.is_empty() {
            return None;
        }
        self.declare_integer(tool, param);
        Some(())
    }

    pub fn is_integer(&self, tool: &str, param: &str) -> bool {
        self.integer_fields
            .get(tool)
            .is_some_and(|fields| fields.contains(param))
    }

    /// Merge another schema's declarations into this one
    pub fn extend(&mut self, other: &ParamSchema) {
        for (tool, fields) in &other.integer_fields {
            self.integer_fields
                .entry(tool.clone())
                .or_default()
                .extend(fields.iter().cloned());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.integer_fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declarations_are_per_tool() {
        let schema = ParamSchema::new().with_integer("hover", "line");
        assert!(schema.is_integer("hover", "line"));
        assert!(!schema.is_integer("rename", "line"));
    }

    #[test]
    fn test_dotted_declarations() {
        let mut schema = ParamSchema::new();
        assert!(schema.declare_dotted("hover.character").is_some());
        assert!(schema.declare_dotted("nodot").is_none());
        assert!(schema.declare_dotted(".x").is_none());
        assert!(schema.is_integer("hover", "character"));
    }

    #[test]
    fn test_extend_merges_fields() {
        let mut schema = ParamSchema::new().with_integer("hover", "line");
        schema.extend(&ParamSchema::new().with_integer("hover", "character"));
        assert!(schema.is_integer("hover", "line"));
        assert!(schema.is_integer("hover", "character"));
    }
}
