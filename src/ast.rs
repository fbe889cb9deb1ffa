use std::fmt;

use indexmap::IndexMap;

use crate::diagnostics::FilePosition;
use crate::value::{escape_bytes, Value};

/// The entire file: imports, global declarations, and functions.
#[derive(Debug, Clone)]
pub struct Root {
    pub items: Vec<Item>,
}

#[derive(Debug, Clone)]
pub enum Item {
    Use(Use),
    Declaration(Declaration),
    Function(Function),
}

#[derive(Debug, Clone)]
pub struct Use {
    pub module: Path,
    pub position: FilePosition,
}

/// A scoped identifier like `a::b::c`. Has at least one member once parsed.
#[derive(Debug, Clone)]
pub struct Path {
    pub members: Vec<String>,
    pub position: FilePosition,
}

#[derive(Debug, Clone)]
pub struct Declaration {
    pub name: String,
    pub value: Expr,
    pub position: FilePosition,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub arguments: Vec<String>,
    pub body: Box<Stmt>,
    pub position: FilePosition,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Block {
        statements: Vec<Stmt>,
        position: FilePosition,
    },
    Expression {
        expr: Expr,
        position: FilePosition,
    },
    IfElse {
        predicate: Expr,
        true_path: Box<Stmt>,
        false_path: Option<Box<Stmt>>,
        position: FilePosition,
    },
    Loop {
        body: Box<Stmt>,
        position: FilePosition,
    },
    TryRecover {
        happy_path: Box<Stmt>,
        recover: Option<Recover>,
        position: FilePosition,
    },
    Break {
        position: FilePosition,
    },
    Continue {
        position: FilePosition,
    },
    Return {
        value: Expr,
        position: FilePosition,
    },
    Declaration(Declaration),
}

#[derive(Debug, Clone)]
pub struct Recover {
    pub binding: Path,
    pub sad_path: Box<Stmt>,
}

impl Stmt {
    pub fn position(&self) -> FilePosition {
        match self {
            Stmt::Block { position, .. }
            | Stmt::Expression { position, .. }
            | Stmt::IfElse { position, .. }
            | Stmt::Loop { position, .. }
            | Stmt::TryRecover { position, .. }
            | Stmt::Break { position }
            | Stmt::Continue { position }
            | Stmt::Return { position, .. } => *position,
            Stmt::Declaration(decl) => decl.position,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOpKind {
    Index,
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Neq,
    Leq,
    Geq,
    Less,
    Greater,
    And,
    Or,
    BitAnd,
    BitOr,
    Xor,
    Shl,
    Shr,
}

impl BinaryOpKind {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOpKind::Index => ".",
            BinaryOpKind::Assign => "=",
            BinaryOpKind::Add => "+",
            BinaryOpKind::Sub => "-",
            BinaryOpKind::Mul => "*",
            BinaryOpKind::Div => "/",
            BinaryOpKind::Mod => "%",
            BinaryOpKind::Eq => "==",
            BinaryOpKind::Neq => "!=",
            BinaryOpKind::Leq => "<=",
            BinaryOpKind::Geq => ">=",
            BinaryOpKind::Less => "<",
            BinaryOpKind::Greater => ">",
            BinaryOpKind::And => "&&",
            BinaryOpKind::Or => "||",
            BinaryOpKind::BitAnd => "&",
            BinaryOpKind::BitOr => "|",
            BinaryOpKind::Xor => "^",
            BinaryOpKind::Shl => "<<",
            BinaryOpKind::Shr => ">>",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOpKind {
    Not,
}

/// Expressions use prefix notation: `+ 1 2`, `? p a b`, `$ f (x)`.
#[derive(Debug, Clone)]
pub enum Expr {
    Literal {
        value: Value,
        position: FilePosition,
    },
    Path(Path),
    Unary {
        op: UnaryOpKind,
        value: Box<Expr>,
        position: FilePosition,
    },
    Binary {
        op: BinaryOpKind,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        position: FilePosition,
    },
    Ternary {
        predicate: Box<Expr>,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        position: FilePosition,
    },
    Call {
        function_path: Path,
        arguments: Vec<Expr>,
        position: FilePosition,
    },
    List {
        members: Vec<Expr>,
        position: FilePosition,
    },
    Map {
        pairs: IndexMap<Vec<u8>, Expr>,
        position: FilePosition,
    },
}

impl Expr {
    pub fn position(&self) -> FilePosition {
        match self {
            Expr::Literal { position, .. }
            | Expr::Unary { position, .. }
            | Expr::Binary { position, .. }
            | Expr::Ternary { position, .. }
            | Expr::Call { position, .. }
            | Expr::List { position, .. }
            | Expr::Map { position, .. } => *position,
            Expr::Path(path) => path.position,
        }
    }
}

// Source-form printing. Re-lexing and re-parsing the printed form yields an
// equivalent tree, which the syntax tests rely on.

impl fmt::Display for Root {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, item) in self.items.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{item}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Item::Use(import) => write!(f, "use {};", import.module),
            Item::Declaration(decl) => write!(f, "{decl}"),
            Item::Function(function) => write!(f, "{function}"),
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.members.join("::"))
    }
}

impl fmt::Display for Declaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":= {} {};", self.name, self.value)
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn {}({}) {}", self.name, self.arguments.join(", "), self.body)
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::Block { statements, .. } => {
                write!(f, "{{ ")?;
                for stmt in statements {
                    write!(f, "{stmt} ")?;
                }
                write!(f, "}}")
            }
            Stmt::Expression { expr, .. } => write!(f, "{expr};"),
            Stmt::IfElse {
                predicate,
                true_path,
                false_path,
                ..
            } => {
                write!(f, "if {predicate} {true_path}")?;
                if let Some(false_path) = false_path {
                    write!(f, " else {false_path}")?;
                }
                Ok(())
            }
            Stmt::Loop { body, .. } => write!(f, "loop {body}"),
            Stmt::TryRecover {
                happy_path,
                recover,
                ..
            } => {
                write!(f, "try {happy_path}")?;
                if let Some(recover) = recover {
                    write!(f, " recover {} {}", recover.binding, recover.sad_path)?;
                }
                Ok(())
            }
            Stmt::Break { .. } => write!(f, "break;"),
            Stmt::Continue { .. } => write!(f, "continue;"),
            Stmt::Return { value, .. } => write!(f, "return {value};"),
            Stmt::Declaration(decl) => write!(f, "{decl}"),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal { value, .. } => f.write_str(&literal_source(value)),
            Expr::Path(path) => write!(f, "{path}"),
            Expr::Unary { value, .. } => write!(f, "! {value}"),
            Expr::Binary { op, lhs, rhs, .. } => write!(f, "{} {lhs} {rhs}", op.symbol()),
            Expr::Ternary {
                predicate,
                lhs,
                rhs,
                ..
            } => write!(f, "? {predicate} {lhs} {rhs}"),
            Expr::Call {
                function_path,
                arguments,
                ..
            } => {
                write!(f, "$ {function_path}(")?;
                for (idx, arg) in arguments.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            Expr::List { members, .. } => {
                write!(f, "[")?;
                for (idx, member) in members.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{member}")?;
                }
                write!(f, "]")
            }
            Expr::Map { pairs, .. } => {
                write!(f, "(")?;
                for (idx, (key, value)) in pairs.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "\"{}\" = {value}", escape_bytes(key))?;
                }
                write!(f, ")")
            }
        }
    }
}

/// The re-parseable source spelling of a literal. Doubles keep a decimal
/// point so they round-trip as doubles, and the special values print as
/// their keywords.
fn literal_source(value: &Value) -> String {
    match value {
        Value::Number(n) => {
            if n.is_nan() {
                "nan".to_string()
            } else if *n == f64::INFINITY {
                "inf".to_string()
            } else if *n == f64::NEG_INFINITY {
                "-inf".to_string()
            } else if n.fract() == 0.0 {
                format!("{n:.1}")
            } else {
                format!("{n}")
            }
        }
        other => other.raw_string(),
    }
}
