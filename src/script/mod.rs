//! The invocation DSL: values, parsing and variable interpolation

pub mod context;
pub mod literal;
pub mod parser;
pub mod schema;
pub mod value;

pub use context::{ExecutionContext, LAST_RESULT};
pub use parser::{parse_invocation, parse_value_token, ToolInvocation};
pub use schema::ParamSchema;
pub use value::{Mapping, Value};
