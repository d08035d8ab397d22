//! Literal sub-parser for bracket and brace parameter values
//!
//! Accepts a fixed value grammar and nothing else:
//!
//! ```text
//! value   := list | mapping | string | varref | number | keyword
//! list    := "[" [value {"," value} [","]] "]"
//! mapping := "{" [entry {"," entry} [","]] "}"
//! entry   := (string | ident) ":" value
//! string  := '"' ... '"' | "'" ... "'"
//! varref  := "${" ident "}"
//! number  := [+-] digits ["." digits] [("e"|"E") [+-] digits]
//! keyword := true | false | null | None   (booleans case-insensitive)
//! ```
//!
//! No expression is ever evaluated.

use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while1},
    character::complete::{char, digit1, multispace0, one_of},
    combinator::{all_consuming, map, opt, recognize},
    error::{Error as NomError, ErrorKind},
    multi::separated_list0,
    sequence::{delimited, pair, separated_pair, terminated, tuple},
    IResult,
};

use super::value::{Mapping, Value};
use crate::common::{Error, Result};

/// Decode a complete bracket/brace literal
pub fn parse_literal(text: &str) -> Result<Value> {
    decode(text).map_err(|message| Error::parse(text, message))
}

/// Decode a literal, returning a bare message on failure so callers can
/// attach their own context
pub(crate) fn decode(text: &str) -> std::result::Result<Value, String> {
    match all_consuming(delimited(multispace0, literal_value, multispace0))(text) {
        Ok((_, value)) => Ok(value),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(describe(&e)),
        Err(nom::Err::Incomplete(_)) => Err("incomplete literal".to_string()),
    }
}

/// If `token` is exactly one quoted string, return its unescaped contents
pub(crate) fn unquote(token: &str) -> Option<String> {
    match quoted(token) {
        Ok(("", s)) => Some(s),
        _ => None,
    }
}

fn describe(e: &NomError<&str>) -> String {
    if e.code == ErrorKind::EscapedTransform {
        return format!("unterminated string literal at '{}'", snippet(e.input));
    }
    if e.input.is_empty() {
        "unexpected end of literal".to_string()
    } else {
        format!("unexpected input at '{}'", snippet(e.input))
    }
}

fn snippet(s: &str) -> String {
    let mut out: String = s.chars().take(24).collect();
    if s.chars().count() > 24 {
        out.push_str("...");
    }
    out
}

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn literal_value(input: &str) -> IResult<&str, Value> {
    alt((
        list,
        mapping,
        map(quoted, Value::String),
        map(variable_ref, |name| Value::VariableRef(name.to_string())),
        number,
        keyword,
    ))(input)
}

fn list(input: &str) -> IResult<&str, Value> {
    map(
        delimited(
            pair(char('['), multispace0),
            terminated(
                separated_list0(ws(char(',')), literal_value),
                opt(ws(char(','))),
            ),
            pair(multispace0, char(']')),
        ),
        Value::List,
    )(input)
}

fn mapping(input: &str) -> IResult<&str, Value> {
    map(
        delimited(
            pair(char('{'), multispace0),
            terminated(separated_list0(ws(char(',')), entry), opt(ws(char(',')))),
            pair(multispace0, char('}')),
        ),
        |entries| Value::Mapping(entries.into_iter().collect::<Mapping>()),
    )(input)
}

fn entry(input: &str) -> IResult<&str, (String, Value)> {
    separated_pair(
        alt((quoted, map(identifier, str::to_string))),
        ws(char(':')),
        literal_value,
    )(input)
}

fn identifier(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_')(input)
}

fn variable_ref(input: &str) -> IResult<&str, &str> {
    delimited(tag("${"), identifier, char('}'))(input)
}

fn number(input: &str) -> IResult<&str, Value> {
    let (rest, text) = recognize(tuple((
        opt(one_of("+-")),
        digit1,
        opt(pair(char('.'), digit1)),
        opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
    )))(input)?;

    let parsed = if text.contains(|c: char| matches!(c, '.' | 'e' | 'E')) {
        text.parse::<f64>().ok().map(Value::Float)
    } else {
        text.parse::<i64>().ok().map(Value::Integer)
    };

    match parsed {
        Some(value) => Ok((rest, value)),
        // out of i64 range
        None => Err(nom::Err::Failure(NomError::new(input, ErrorKind::Digit))),
    }
}

fn keyword(input: &str) -> IResult<&str, Value> {
    alt((
        map(tag_no_case("true"), |_| Value::Boolean(true)),
        map(tag_no_case("false"), |_| Value::Boolean(false)),
        map(alt((tag("null"), tag("None"))), |_| Value::Null),
    ))(input)
}

/// Single- or double-quoted string with backslash escapes
fn quoted(input: &str) -> IResult<&str, String> {
    let mut chars = input.char_indices();
    let quote = match chars.next() {
        Some((_, c @ ('"' | '\''))) => c,
        _ => return Err(nom::Err::Error(NomError::new(input, ErrorKind::Char))),
    };

    let mut out = String::new();
    let mut escaped = false;
    for (idx, c) in chars {
        if escaped {
            out.push(unescape(c));
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == quote {
            return Ok((&input[idx + c.len_utf8()..], out));
        } else {
            out.push(c);
        }
    }

    Err(nom::Err::Failure(NomError::new(
        input,
        ErrorKind::EscapedTransform,
    )))
}

fn unescape(c: char) -> char {
    match c {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        '0' => '\0',
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_of(entries: &[(&str, Value)]) -> Value {
        Value::Mapping(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn test_list_of_scalars() {
        assert_eq!(
            parse_literal("[1, -2, 'a', \"b, c\", true, None]").unwrap(),
            Value::List(vec![
                Value::Integer(1),
                Value::Integer(-2),
                Value::from("a"),
                Value::from("b, c"),
                Value::Boolean(true),
                Value::Null,
            ])
        );
    }

    #[test]
    fn test_nested_mapping() {
        let parsed = parse_literal(r#"{"start": {"line": 1, "character": 0}, end: [2, 3.5],}"#).unwrap();
        assert_eq!(
            parsed,
            map_of(&[
                (
                    "start",
                    map_of(&[("line", Value::Integer(1)), ("character", Value::Integer(0))])
                ),
                (
                    "end",
                    Value::List(vec![Value::Integer(2), Value::Float(3.5)])
                ),
            ])
        );
    }

    #[test]
    fn test_empty_containers() {
        assert_eq!(parse_literal("[]").unwrap(), Value::List(vec![]));
        assert_eq!(parse_literal("{ }").unwrap(), Value::Mapping(Mapping::new()));
    }

    #[test]
    fn test_variable_reference_inside_list() {
        assert_eq!(
            parse_literal("[${last_result}, 2]").unwrap(),
            Value::List(vec![
                Value::VariableRef("last_result".to_string()),
                Value::Integer(2)
            ])
        );
    }

    #[test]
    fn test_rejects_expressions() {
        assert!(parse_literal("[1 + 2]").is_err());
        assert!(parse_literal("[__import__('os')]").is_err());
        assert!(parse_literal("{'a': len('x')}").is_err());
    }

    #[test]
    fn test_rejects_unbalanced_and_trailing_input() {
        assert!(parse_literal("[1, 2").is_err());
        assert!(parse_literal("[1] [2]").is_err());
        let err = decode("['abc").unwrap_err();
        assert!(err.contains("unterminated"), "{err}");
    }

    #[test]
    fn test_integer_overflow_is_error() {
        assert!(parse_literal("[99999999999999999999]").is_err());
    }

    #[test]
    fn test_unquote() {
        assert_eq!(unquote(r#""a\"b""#), Some("a\"b".to_string()));
        assert_eq!(unquote("'x'"), Some("x".to_string()));
        assert_eq!(unquote("'x' trailing"), None);
        assert_eq!(unquote("bare"), None);
    }
}
