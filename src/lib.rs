//! Core library for the Shrimply scripting language interpreter.
//! Implements the lexer, the explicit-stack state-machine parser, the
//! module loader, and the tree-walking evaluator.

pub mod ast;
pub mod diagnostics;
pub mod lexer;
pub mod module;
pub mod parser;
pub mod repl;
pub mod runtime;
pub mod stdlib;
pub mod value;

pub use diagnostics::{FilePosition, Result, RuntimeError, ShrimplyError, SyntaxError};
pub use module::{run_program, run_source};
pub use repl::Repl;
pub use value::Value;
