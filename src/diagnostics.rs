use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// A line/column pair within a source file. Both components start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilePosition {
    pub line: usize,
    pub column: usize,
}

impl FilePosition {
    pub const fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }

    pub const fn start() -> Self {
        Self { line: 1, column: 1 }
    }
}

impl fmt::Display for FilePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A lexer or parser failure. Fatal to the pipeline; user code cannot
/// recover from these.
#[derive(Debug, Clone)]
pub struct SyntaxError {
    pub message: String,
    pub position: FilePosition,
    pub filename: PathBuf,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, position: FilePosition, filename: &Path) -> Self {
        Self {
            message: message.into(),
            position,
            filename: filename.to_path_buf(),
        }
    }

    pub fn unexpected_eof(position: FilePosition, filename: &Path) -> Self {
        Self::new("unexpected end of file", position, filename)
    }

    /// Internal parser-bug signal. Should never fire for any token stream;
    /// callers treat it like any other syntax error.
    pub fn invalid_ast(detail: impl Into<String>, position: FilePosition, filename: &Path) -> Self {
        Self::new(
            format!(
                "encountered invalid AST: {} (this is probably a parser bug)",
                detail.into()
            ),
            position,
            filename,
        )
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "syntax error at {} in file \"{}\": {}",
            self.position,
            self.filename.display(),
            self.message
        )
    }
}

impl std::error::Error for SyntaxError {}

/// One entry of a runtime error's captured call chain.
#[derive(Debug, Clone)]
pub struct TraceFrame {
    pub position: FilePosition,
    pub function: String,
    pub module: String,
}

impl fmt::Display for TraceFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} in {} (module {})",
            self.position, self.function, self.module
        )
    }
}

/// A user-visible evaluation failure. Carries the message and a snapshot of
/// the call chain at the point of the raise. Recoverable from user code via
/// `try { ... } recover ident { ... }`, which binds only the message.
#[derive(Debug, Clone)]
pub struct RuntimeError {
    pub message: String,
    pub backtrace: Vec<TraceFrame>,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>, backtrace: Vec<TraceFrame>) -> Self {
        Self {
            message: message.into(),
            backtrace,
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "runtime error: {}", self.message)?;
        writeln!(f, "\nbacktrace:")?;
        for frame in &self.backtrace {
            writeln!(f, "    {frame}")?;
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}

/// Unified error type for the Shrimply toolchain.
#[derive(Debug, Error)]
pub enum ShrimplyError {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ShrimplyError>;
