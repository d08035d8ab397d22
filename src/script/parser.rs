//! Command-line DSL parser
//!
//! One line describes one tool call:
//!
//! ```text
//! [●] [ns:]name [(TAG)] (key=value, key: value, ...)
//! ```
//!
//! The namespace and tag are decoration; only the bare tool name and the
//! decoded parameters survive into a [`ToolInvocation`].

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use super::literal;
use super::schema::ParamSchema;
use super::value::{Mapping, Value};
use crate::common::{Error, Result};

/// Decorative bullets some transcripts prefix lines with
const MARKERS: &[char] = &['●', '•'];

/// A parsed tool call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolInvocation {
    pub tool_name: String,
    pub parameters: Mapping,
}

static HEADER_REGEX: OnceLock<Regex> = OnceLock::new();
static INTEGER_REGEX: OnceLock<Regex> = OnceLock::new();
static NUMERIC_REGEX: OnceLock<Regex> = OnceLock::new();
static VARIABLE_REGEX: OnceLock<Regex> = OnceLock::new();
static KEY_REGEX: OnceLock<Regex> = OnceLock::new();

fn header_regex() -> &'static Regex {
    HEADER_REGEX.get_or_init(|| {
        Regex::new(r#"^(?:(\w+):)?(\w+)\s*(?:\(([^()"'=:,]*)\)\s*)?\((.*)\)$"#)
            .expect("Invalid invocation header regex")
    })
}

fn integer_regex() -> &'static Regex {
    INTEGER_REGEX
        .get_or_init(|| Regex::new(r"^[+-]?[0-9]+$").expect("Invalid integer regex"))
}

/// Decimal or exponent forms, only consulted for declared integer fields
fn numeric_regex() -> &'static Regex {
    NUMERIC_REGEX.get_or_init(|| {
        Regex::new(r"^[+-]?(?:[0-9]+\.?[0-9]*|\.[0-9]+)(?:[eE][+-]?[0-9]+)?$")
            .expect("Invalid numeric regex")
    })
}

fn variable_regex() -> &'static Regex {
    VARIABLE_REGEX
        .get_or_init(|| Regex::new(r"^\$\{(\w+)\}$").expect("Invalid variable regex"))
}

fn key_regex() -> &'static Regex {
    KEY_REGEX.get_or_init(|| Regex::new(r"^\w+$").expect("Invalid key regex"))
}

/// Parse one DSL line into a tool invocation
///
/// Pure: the result depends only on `line` and `schema`.
pub fn parse_invocation(line: &str, schema: &ParamSchema) -> Result<ToolInvocation> {
    let text = line.trim().trim_start_matches(MARKERS).trim();

    let caps = header_regex().captures(text).ok_or_else(|| {
        Error::parse(line, "expected `name(key=value, ...)`")
    })?;
    let tool_name = caps[2].to_string();
    let params = caps.get(4).map_or("", |m| m.as_str());

    let mut parameters = Mapping::new();
    for segment in split_params(params).map_err(|message| Error::parse(line, message))? {
        let (key, raw) = split_segment(segment).map_err(|message| Error::parse(line, message))?;
        let value = decode_value(raw, schema.is_integer(&tool_name, key))
            .map_err(|message| Error::parse(line, format!("parameter '{}': {}", key, message)))?;
        if parameters.insert(key.to_string(), value).is_some() {
            return Err(Error::parse(line, format!("duplicate parameter '{}'", key)));
        }
    }

    Ok(ToolInvocation {
        tool_name,
        parameters,
    })
}

/// Decode a standalone value token with the DSL value rules
///
/// Used for caller variables given on the command line.
pub fn parse_value_token(raw: &str) -> Result<Value> {
    decode_value(raw, false).map_err(|message| Error::parse(raw, message))
}

/// Split a parameter list on commas at nesting depth zero, outside quotes
///
/// Empty segments (a trailing comma, or an empty list) are dropped.
fn split_params(params: &str) -> std::result::Result<Vec<&str>, String> {
    let mut segments = Vec::new();
    let mut stack: Vec<char> = Vec::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;
    // Quotes only open a string at the start of a token, so `it's` stays bare
    let mut token_start = true;
    let mut start = 0;

    for (idx, c) in params.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }

        match c {
            '"' | '\'' if token_start => quote = Some(c),
            '[' | '{' | '(' => stack.push(c),
            ']' | '}' | ')' => {
                let expected = match c {
                    ']' => '[',
                    '}' => '{',
                    _ => '(',
                };
                if stack.pop() != Some(expected) {
                    return Err(format!("unbalanced '{}' in parameter list", c));
                }
            }
            ',' if stack.is_empty() => {
                segments.push(&params[start..idx]);
                start = idx + c.len_utf8();
            }
            _ => {}
        }

        if !c.is_whitespace() {
            token_start = matches!(c, '=' | ':' | ',' | '[' | '{' | '(');
        }
    }

    if let Some(q) = quote {
        return Err(format!("unterminated {} quote in parameter list", q));
    }
    if let Some(open) = stack.last() {
        return Err(format!("unclosed '{}' in parameter list", open));
    }
    segments.push(&params[start..]);

    Ok(segments
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect())
}

/// Split `key=value` or `key: value` at the first separator
fn split_segment(segment: &str) -> std::result::Result<(&str, &str), String> {
    let malformed = || format!("malformed parameter '{}', expected key=value", segment);

    let idx = segment.find(['=', ':']).ok_or_else(malformed)?;
    let key = segment[..idx].trim();
    let value = segment[idx + 1..].trim();
    if !key_regex().is_match(key) || value.is_empty() {
        return Err(malformed());
    }
    Ok((key, value))
}

/// Decode one value token
///
/// `integer_typed` is the schema declaration for this parameter; it only
/// matters for unquoted decimal or exponent tokens.
fn decode_value(raw: &str, integer_typed: bool) -> std::result::Result<Value, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("empty value".to_string());
    }

    if raw.starts_with(['"', '\'']) {
        return literal::unquote(raw)
            .map(Value::String)
            .ok_or_else(|| format!("malformed quoted string {}", raw));
    }

    if raw.starts_with(['[', '{']) {
        return literal::decode(raw);
    }

    if integer_regex().is_match(raw) {
        return raw
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|_| format!("integer {} is out of range", raw));
    }

    if integer_typed && numeric_regex().is_match(raw) {
        return integral(raw)
            .map(Value::Integer)
            .ok_or_else(|| format!("integer field got non-integral value {}", raw));
    }

    if raw.eq_ignore_ascii_case("true") {
        return Ok(Value::Boolean(true));
    }
    if raw.eq_ignore_ascii_case("false") {
        return Ok(Value::Boolean(false));
    }

    if let Some(caps) = variable_regex().captures(raw) {
        return Ok(Value::VariableRef(caps[1].to_string()));
    }

    Ok(Value::String(raw.to_string()))
}

/// `10.0` and `1e2` denote integers; `10.5` does not
fn integral(raw: &str) -> Option<i64> {
    let f = raw.parse::<f64>().ok()?;
    // i64::MAX as f64 rounds up to 2^63, hence the strict upper bound
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn parse(line: &str) -> Result<ToolInvocation> {
        parse_invocation(line, &ParamSchema::new())
    }

    #[test]
    fn test_namespaced_call_with_tag() {
        let inv = parse(r#"lsp:hover (MCP)(uri="file:///a.ts", line=10, character=5)"#).unwrap();
        assert_eq!(inv.tool_name, "hover");
        assert_eq!(inv.parameters.len(), 3);
        assert_eq!(inv.parameters["uri"], Value::from("file:///a.ts"));
        assert_eq!(inv.parameters["line"], Value::Integer(10));
        assert_eq!(inv.parameters["character"], Value::Integer(5));
    }

    #[test]
    fn test_marker_and_colon_separators() {
        let inv = parse("● search(query: 'a, b', limit: 3, exact: TRUE)").unwrap();
        assert_eq!(inv.tool_name, "search");
        assert_eq!(inv.parameters["query"], Value::from("a, b"));
        assert_eq!(inv.parameters["limit"], Value::Integer(3));
        assert_eq!(inv.parameters["exact"], Value::Boolean(true));
    }

    #[test]
    fn test_unbalanced_parens_is_parse_error() {
        let err = parse("foo(bar").unwrap_err();
        match err {
            Error::Parse { line, .. } => assert_eq!(line, "foo(bar"),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_bracket_literal_is_one_value() {
        let inv = parse("edit(ranges=[1, 2, 3], opts={\"a\": [4, 5]}, n=1)").unwrap();
        assert_eq!(inv.parameters.len(), 3);
        assert_eq!(
            inv.parameters["ranges"],
            Value::List(vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)])
        );
        assert!(matches!(inv.parameters["opts"], Value::Mapping(_)));
    }

    #[test]
    fn test_variable_reference_and_bare_string() {
        let inv = parse("open(path=src/main.rs, line=${last_result})").unwrap();
        assert_eq!(inv.parameters["path"], Value::from("src/main.rs"));
        assert_eq!(
            inv.parameters["line"],
            Value::VariableRef("last_result".to_string())
        );
    }

    #[test]
    fn test_explicit_empty_list() {
        let inv = parse("lsp:list_tools()").unwrap();
        assert_eq!(inv.tool_name, "list_tools");
        assert!(inv.parameters.is_empty());
        assert!(parse("status(verbose=true,)").unwrap().parameters.len() == 1);
    }

    #[test]
    fn test_malformed_segment_names_it() {
        let err = parse("hover(uri)").unwrap_err().to_string();
        assert!(err.contains("'uri'"), "{err}");
        assert!(parse("hover(=1)").is_err());
        assert!(parse("hover(line=)").is_err());
        assert!(parse("hover(a=1, a=2)").is_err());
    }

    #[test]
    fn test_structural_errors() {
        assert!(parse("hover(a=[1, 2)").is_err());
        assert!(parse("hover(a=\"open)").is_err());
        assert!(parse("hover(a=1])").is_err());
        assert!(parse("not a call").is_err());
        assert!(parse("hover(n=99999999999999999999)").is_err());
    }

    #[test]
    fn test_apostrophe_inside_bare_value() {
        let inv = parse("say(text=it's fine)").unwrap();
        assert_eq!(inv.parameters["text"], Value::from("it's fine"));
    }

    #[test]
    fn test_declared_integer_fields_coerce_integral_numbers() {
        let schema = ParamSchema::new().with_integer("hover", "line");
        let inv = parse_invocation("hover(line=10.0, character=10.0)", &schema).unwrap();
        assert_eq!(inv.parameters["line"], Value::Integer(10));
        assert_eq!(inv.parameters["character"], Value::from("10.0"));

        let inv = parse_invocation("hover(line=1e2)", &schema).unwrap();
        assert_eq!(inv.parameters["line"], Value::Integer(100));

        // quoted values keep their literal shape
        let inv = parse_invocation("hover(line='10')", &schema).unwrap();
        assert_eq!(inv.parameters["line"], Value::from("10"));
    }

    #[test]
    fn test_declared_integer_field_rejects_fraction() {
        let schema = ParamSchema::new().with_integer("hover", "line");
        let err = parse_invocation("hover(line=10.5)", &schema).unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
        assert!(err.to_string().contains("non-integral value 10.5"), "{err}");

        // undeclared fields keep the bare string
        let inv = parse_invocation("hover(character=10.5)", &schema).unwrap();
        assert_eq!(inv.parameters["character"], Value::from("10.5"));
    }

    #[test]
    fn test_parse_value_token() {
        assert_eq!(parse_value_token("42").unwrap(), Value::Integer(42));
        assert_eq!(parse_value_token("'x'").unwrap(), Value::from("x"));
        assert_eq!(
            parse_value_token("[1, 'a']").unwrap(),
            Value::List(vec![Value::Integer(1), Value::from("a")])
        );
        assert!(parse_value_token("").is_err());
    }

    proptest! {
        #[test]
        fn test_parsing_is_deterministic(s in "\\PC*") {
            let first = parse(&s).ok();
            let second = parse(&s).ok();
            prop_assert_eq!(first, second);
        }

        #[test]
        fn test_generated_calls_parse(
            name in "[a-z_][a-z0-9_]{0,8}",
            n in any::<i64>(),
            text in "[a-zA-Z0-9 ,:=()]{0,12}",
        ) {
            let line = format!("{}(count={}, text=\"{}\", items=[{}, \"{}\"])", name, n, text, n, text);
            let inv = parse(&line).unwrap();
            prop_assert_eq!(&inv.tool_name, &name);
            prop_assert_eq!(&inv.parameters["count"], &Value::Integer(n));
            prop_assert_eq!(&inv.parameters["text"], &Value::String(text.clone()));
            prop_assert_eq!(
                &inv.parameters["items"],
                &Value::List(vec![Value::Integer(n), Value::String(text)])
            );
            prop_assert_eq!(parse(&line).unwrap(), inv);
        }
    }
}
