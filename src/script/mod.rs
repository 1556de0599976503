//! A small sandboxed scripting language for parser snippets and filters.
//!
//! Source text is lexed, parsed into an AST and interpreted. Evaluation has
//! no access to the host beyond the values passed in, and every run is bounded
//! by a step budget and a call-depth limit.

mod ast;
mod builtins;
mod interp;
mod lexer;
mod parser;
mod value;

pub use ast::Expr;
pub use interp::{Interpreter, Limits, Namespace};
pub use parser::{parse_expression, parse_program};
pub use value::{Scope, Value};

#[cfg(test)]
use crate::error::ScriptError;

/// Parse and evaluate a single expression against `globals`.
#[cfg(test)]
pub fn eval_str(src: &str, globals: &Namespace) -> Result<Value, ScriptError> {
    let expr = parse_expression(src)?;
    let scope = std::rc::Rc::new(Scope::default());
    Interpreter::new(globals, Limits::default()).eval(&expr, &scope)
}
