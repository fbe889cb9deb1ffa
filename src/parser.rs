use std::num::IntErrorKind;
use std::path::{Path as FsPath, PathBuf};

use indexmap::IndexMap;

use crate::ast::{
    BinaryOpKind, Declaration, Expr, Function, Item, Path, Recover, Root, Stmt, UnaryOpKind, Use,
};
use crate::diagnostics::{FilePosition, SyntaxError};
use crate::lexer::{Lexer, Token, TokenKind};
use crate::value::Value;

/// Lexes and parses a whole source file into its syntax tree.
pub fn parse_source(source: &str, filename: &FsPath) -> Result<Root, SyntaxError> {
    let mut lexer = Lexer::new(source, filename)?;
    let mut parser = Parser::new(filename);
    while let Some(token) = lexer.next_token()? {
        parser.advance(&token)?;
    }
    parser.into_syntax_tree()
}

/// The parser's current state. One frame of the explicit state stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Root,
    PathIdent,
    PathScopeOrEnd,
    UsePath,
    DeclarationIdent,
    DeclarationAssignOrEnd,
    DeclarationEnd,
    GlobalDeclaration,
    FunctionIdent,
    FunctionOpenParen,
    ArglistNext,
    ArglistComma,
    FunctionStatement,
    BlockStart,
    Block,
    BlockStatement,
    Statement,
    StatementSemicolon,
    StatementExpression,
    ReturnExpressionOrEnd,
    ReturnEnd,
    IfPredicate,
    IfTrue,
    IfElse,
    IfFalse,
    LoopStatement,
    TryStatement,
    TryMaybeRecv,
    RecvPath,
    RecvStatement,
    Expression,
    BinaryLhs,
    BinaryRhs,
    UnaryValue,
    TernaryPredicate,
    TernaryLhs,
    TernaryRhs,
    CallPath,
    CallLParen,
    CallArgsNext,
    CallArgExpr,
    CallArgsComma,
    ListNext,
    ListExpr,
    ListComma,
    MapKey,
    MapKeyString,
    MapEq,
    MapValue,
    MapComma,
}

/// One partially-built or completed atom on the cursor stack. Reducing a
/// child pops it and attaches it to the partial atom beneath; a variant
/// mismatch on reduce is an internal parser bug, not bad input.
enum Cursor {
    Root(Root),
    UseItem {
        position: FilePosition,
    },
    PathAtom(Path),
    DeclarationItem {
        name: String,
        position: FilePosition,
    },
    FunctionItem {
        name: String,
        arguments: Vec<String>,
        position: FilePosition,
    },
    ArgList {
        arguments: Vec<String>,
    },
    BlockStmt {
        statements: Vec<Stmt>,
        position: FilePosition,
    },
    ExpressionStatement {
        position: FilePosition,
    },
    IfStmt {
        predicate: Option<Expr>,
        true_path: Option<Stmt>,
        position: FilePosition,
    },
    LoopStmt {
        position: FilePosition,
    },
    TryStmt {
        happy_path: Option<Stmt>,
        binding: Option<Path>,
        position: FilePosition,
    },
    ReturnStmt {
        position: FilePosition,
    },
    BinaryExpr {
        op: BinaryOpKind,
        lhs: Option<Expr>,
        position: FilePosition,
    },
    UnaryExpr {
        op: UnaryOpKind,
        position: FilePosition,
    },
    TernaryExpr {
        predicate: Option<Expr>,
        lhs: Option<Expr>,
        position: FilePosition,
    },
    CallExpr {
        function_path: Option<Path>,
        arguments: Vec<Expr>,
        position: FilePosition,
    },
    ListLiteral {
        members: Vec<Expr>,
        position: FilePosition,
    },
    MapLiteral {
        pairs: IndexMap<Vec<u8>, Expr>,
        next_key: Vec<u8>,
        position: FilePosition,
    },
    Stmt(Stmt),
    Expr(Expr),
}

impl Cursor {
    fn kind_name(&self) -> &'static str {
        match self {
            Cursor::Root(_) => "Root",
            Cursor::UseItem { .. } => "Use",
            Cursor::PathAtom(_) => "Path",
            Cursor::DeclarationItem { .. } => "Declaration",
            Cursor::FunctionItem { .. } => "Function",
            Cursor::ArgList { .. } => "ArgList",
            Cursor::BlockStmt { .. } => "Block",
            Cursor::ExpressionStatement { .. } => "ExpressionStatement",
            Cursor::IfStmt { .. } => "IfElse",
            Cursor::LoopStmt { .. } => "Loop",
            Cursor::TryStmt { .. } => "TryRecover",
            Cursor::ReturnStmt { .. } => "Return",
            Cursor::BinaryExpr { .. } => "BinaryOp",
            Cursor::UnaryExpr { .. } => "UnaryOp",
            Cursor::TernaryExpr { .. } => "Ternary",
            Cursor::CallExpr { .. } => "Call",
            Cursor::ListLiteral { .. } => "List",
            Cursor::MapLiteral { .. } => "Map",
            Cursor::Stmt(_) => "Statement",
            Cursor::Expr(_) => "Expression",
        }
    }
}

/// A shift-reduce state machine over the token stream. Every `advance`
/// consumes exactly one token; the inner loop re-dispatches an unconsumed
/// token under a new top state instead of recursing, so arbitrarily deep
/// expressions never grow the host stack.
pub struct Parser {
    states: Vec<State>,
    cursors: Vec<Cursor>,
    filename: PathBuf,
    last_position: FilePosition,
}

impl Parser {
    pub fn new(filename: &FsPath) -> Self {
        Self {
            states: vec![State::Root],
            cursors: vec![Cursor::Root(Root { items: Vec::new() })],
            filename: filename.to_path_buf(),
            last_position: FilePosition::start(),
        }
    }

    /// Feeds the parser one token.
    pub fn advance(&mut self, token: &Token) -> Result<(), SyntaxError> {
        if token.kind == TokenKind::Comment {
            return Ok(());
        }
        self.last_position = token.position;

        loop {
            let Some(&state) = self.states.last() else {
                return Err(self.unexpected(token));
            };
            match state {
                State::Root => match token.kind {
                    TokenKind::KwUse => {
                        self.states.push(State::StatementSemicolon);
                        self.states.push(State::UsePath);
                        self.cursors.push(Cursor::UseItem {
                            position: token.position,
                        });
                        self.push_path(token.position);
                        return Ok(());
                    }
                    TokenKind::Declaration => {
                        self.states.push(State::GlobalDeclaration);
                        self.states.push(State::StatementSemicolon);
                        self.states.push(State::DeclarationIdent);
                        self.cursors.push(Cursor::DeclarationItem {
                            name: String::new(),
                            position: token.position,
                        });
                        return Ok(());
                    }
                    TokenKind::KwFn => {
                        self.states.push(State::FunctionIdent);
                        self.cursors.push(Cursor::FunctionItem {
                            name: String::new(),
                            arguments: Vec::new(),
                            position: token.position,
                        });
                        return Ok(());
                    }
                    TokenKind::EndOfFile => return Ok(()),
                    _ => return Err(self.unexpected(token)),
                },

                State::PathIdent => {
                    self.expect(token, TokenKind::Identifier)?;
                    match self.cursors.last_mut() {
                        Some(Cursor::PathAtom(path)) => {
                            path.members.push(token.lexeme.clone());
                            path.position = token.position;
                        }
                        _ => return Err(self.invalid_ast("Path", token.position)),
                    }
                    self.swap(State::PathScopeOrEnd);
                    return Ok(());
                }
                State::PathScopeOrEnd => match token.kind {
                    TokenKind::Scope => {
                        self.swap(State::PathIdent);
                        return Ok(());
                    }
                    _ => {
                        // The path is done; bubble it up and reinterpret.
                        self.states.pop();
                        continue;
                    }
                },
                State::UsePath => {
                    let path = self.pop_path(token.position)?;
                    let position = match self.cursors.pop() {
                        Some(Cursor::UseItem { position }) => position,
                        _ => return Err(self.invalid_ast("Use", token.position)),
                    };
                    self.root_items(token.position)?.push(Item::Use(Use {
                        module: path,
                        position,
                    }));
                    self.states.pop();
                    continue;
                }

                State::FunctionIdent => {
                    self.expect(token, TokenKind::Identifier)?;
                    match self.cursors.last_mut() {
                        Some(Cursor::FunctionItem { name, .. }) => {
                            *name = token.lexeme.clone();
                        }
                        _ => return Err(self.invalid_ast("Function", token.position)),
                    }
                    self.swap(State::FunctionOpenParen);
                    return Ok(());
                }
                State::FunctionOpenParen => {
                    self.expect(token, TokenKind::LParen)?;
                    self.cursors.push(Cursor::ArgList {
                        arguments: Vec::new(),
                    });
                    self.swap(State::ArglistNext);
                    return Ok(());
                }
                State::ArglistNext => match token.kind {
                    TokenKind::Identifier => {
                        match self.cursors.last_mut() {
                            Some(Cursor::ArgList { arguments }) => {
                                arguments.push(token.lexeme.clone());
                            }
                            _ => return Err(self.invalid_ast("ArgList", token.position)),
                        }
                        self.swap(State::ArglistComma);
                        return Ok(());
                    }
                    TokenKind::RParen => {
                        let args = match self.cursors.pop() {
                            Some(Cursor::ArgList { arguments }) => arguments,
                            _ => return Err(self.invalid_ast("ArgList", token.position)),
                        };
                        match self.cursors.last_mut() {
                            Some(Cursor::FunctionItem { arguments, .. }) => {
                                *arguments = args;
                            }
                            _ => return Err(self.invalid_ast("Function", token.position)),
                        }
                        self.swap(State::FunctionStatement);
                        self.states.push(State::Statement);
                        return Ok(());
                    }
                    _ => return Err(self.unexpected(token)),
                },
                State::ArglistComma => match token.kind {
                    TokenKind::RParen => {
                        self.swap(State::ArglistNext);
                        continue;
                    }
                    _ => {
                        self.expect(token, TokenKind::Comma)?;
                        self.swap(State::ArglistNext);
                        return Ok(());
                    }
                },
                State::FunctionStatement => {
                    let body = self.pop_statement(token.position)?;
                    let function = match self.cursors.pop() {
                        Some(Cursor::FunctionItem {
                            name,
                            arguments,
                            position,
                        }) => Function {
                            name,
                            arguments,
                            body: Box::new(body),
                            position,
                        },
                        _ => return Err(self.invalid_ast("Function", token.position)),
                    };
                    self.root_items(token.position)?.push(Item::Function(function));
                    self.states.pop();
                    continue;
                }

                State::BlockStart => {
                    self.expect(token, TokenKind::LBrace)?;
                    self.swap(State::Block);
                    return Ok(());
                }
                State::Block => match token.kind {
                    TokenKind::RBrace => {
                        let stmt = match self.cursors.pop() {
                            Some(Cursor::BlockStmt {
                                statements,
                                position,
                            }) => Stmt::Block {
                                statements,
                                position,
                            },
                            _ => return Err(self.invalid_ast("Block", token.position)),
                        };
                        self.cursors.push(Cursor::Stmt(stmt));
                        self.states.pop();
                        return Ok(());
                    }
                    _ => {
                        self.states.push(State::BlockStatement);
                        self.states.push(State::Statement);
                        continue;
                    }
                },
                State::BlockStatement => {
                    let stmt = self.pop_statement(token.position)?;
                    match self.cursors.last_mut() {
                        Some(Cursor::BlockStmt { statements, .. }) => statements.push(stmt),
                        _ => return Err(self.invalid_ast("Block", token.position)),
                    }
                    self.states.pop();
                    continue;
                }

                State::DeclarationIdent => {
                    self.expect(token, TokenKind::Identifier)?;
                    match self.cursors.last_mut() {
                        Some(Cursor::DeclarationItem { name, .. }) => {
                            *name = token.lexeme.clone();
                        }
                        _ => return Err(self.invalid_ast("Declaration", token.position)),
                    }
                    self.swap(State::DeclarationAssignOrEnd);
                    return Ok(());
                }
                State::DeclarationAssignOrEnd => match token.kind {
                    TokenKind::Semicolon => {
                        // No initializer. Complete the declaration with a
                        // null literal and hand the `;` back; downstream
                        // states reject it as an unexpected token.
                        let stmt = match self.cursors.pop() {
                            Some(Cursor::DeclarationItem { name, position }) => {
                                Stmt::Declaration(Declaration {
                                    name,
                                    value: Expr::Literal {
                                        value: Value::Null,
                                        position,
                                    },
                                    position,
                                })
                            }
                            _ => return Err(self.invalid_ast("Declaration", token.position)),
                        };
                        self.cursors.push(Cursor::Stmt(stmt));
                        self.states.pop();
                        self.states.pop();
                        continue;
                    }
                    _ => {
                        self.swap(State::DeclarationEnd);
                        self.states.push(State::Expression);
                        continue;
                    }
                },
                State::DeclarationEnd => {
                    let value = self.pop_expression(token.position)?;
                    let stmt = match self.cursors.pop() {
                        Some(Cursor::DeclarationItem { name, position }) => {
                            Stmt::Declaration(Declaration {
                                name,
                                value,
                                position,
                            })
                        }
                        _ => return Err(self.invalid_ast("Declaration", token.position)),
                    };
                    self.cursors.push(Cursor::Stmt(stmt));
                    self.states.pop();
                    continue;
                }
                State::GlobalDeclaration => {
                    let decl = match self.cursors.pop() {
                        Some(Cursor::Stmt(Stmt::Declaration(decl))) => decl,
                        _ => return Err(self.invalid_ast("Declaration", token.position)),
                    };
                    self.root_items(token.position)?.push(Item::Declaration(decl));
                    self.states.pop();
                    continue;
                }

                State::Statement => match token.kind {
                    TokenKind::Declaration => {
                        self.swap(State::StatementSemicolon);
                        self.states.push(State::DeclarationIdent);
                        self.cursors.push(Cursor::DeclarationItem {
                            name: String::new(),
                            position: token.position,
                        });
                        return Ok(());
                    }
                    TokenKind::KwBreak => {
                        self.cursors.push(Cursor::Stmt(Stmt::Break {
                            position: token.position,
                        }));
                        self.swap(State::StatementSemicolon);
                        return Ok(());
                    }
                    TokenKind::KwContinue => {
                        self.cursors.push(Cursor::Stmt(Stmt::Continue {
                            position: token.position,
                        }));
                        self.swap(State::StatementSemicolon);
                        return Ok(());
                    }
                    TokenKind::KwReturn => {
                        self.cursors.push(Cursor::ReturnStmt {
                            position: token.position,
                        });
                        self.swap(State::ReturnExpressionOrEnd);
                        return Ok(());
                    }
                    TokenKind::KwIf => {
                        self.cursors.push(Cursor::IfStmt {
                            predicate: None,
                            true_path: None,
                            position: token.position,
                        });
                        self.swap(State::IfPredicate);
                        self.states.push(State::Expression);
                        return Ok(());
                    }
                    TokenKind::KwTry => {
                        self.cursors.push(Cursor::TryStmt {
                            happy_path: None,
                            binding: None,
                            position: token.position,
                        });
                        self.swap(State::TryStatement);
                        self.states.push(State::Statement);
                        return Ok(());
                    }
                    TokenKind::KwLoop => {
                        self.cursors.push(Cursor::LoopStmt {
                            position: token.position,
                        });
                        self.swap(State::LoopStatement);
                        self.states.push(State::Statement);
                        return Ok(());
                    }
                    TokenKind::LBrace => {
                        self.cursors.push(Cursor::BlockStmt {
                            statements: Vec::new(),
                            position: token.position,
                        });
                        self.swap(State::BlockStart);
                        continue;
                    }
                    _ => {
                        // Reinterpret as an expression statement.
                        self.cursors.push(Cursor::ExpressionStatement {
                            position: token.position,
                        });
                        self.states.push(State::StatementExpression);
                        self.states.push(State::Expression);
                        continue;
                    }
                },
                State::LoopStatement => {
                    let body = self.pop_statement(token.position)?;
                    let stmt = match self.cursors.pop() {
                        Some(Cursor::LoopStmt { position }) => Stmt::Loop {
                            body: Box::new(body),
                            position,
                        },
                        _ => return Err(self.invalid_ast("Loop", token.position)),
                    };
                    self.cursors.push(Cursor::Stmt(stmt));
                    self.states.pop();
                    continue;
                }
                State::StatementSemicolon => {
                    self.expect(token, TokenKind::Semicolon)?;
                    self.states.pop();
                    return Ok(());
                }
                State::StatementExpression => {
                    let expr = self.pop_expression(token.position)?;
                    let stmt = match self.cursors.pop() {
                        Some(Cursor::ExpressionStatement { position }) => Stmt::Expression {
                            expr,
                            position,
                        },
                        _ => {
                            return Err(
                                self.invalid_ast("ExpressionStatement", token.position)
                            );
                        }
                    };
                    self.cursors.push(Cursor::Stmt(stmt));
                    self.states.pop();
                    self.swap(State::StatementSemicolon);
                    continue;
                }

                State::Expression => match token.kind {
                    TokenKind::Ternary => {
                        self.swap(State::TernaryPredicate);
                        self.states.push(State::Expression);
                        self.cursors.push(Cursor::TernaryExpr {
                            predicate: None,
                            lhs: None,
                            position: token.position,
                        });
                        return Ok(());
                    }
                    TokenKind::Call => {
                        self.swap(State::CallPath);
                        self.cursors.push(Cursor::CallExpr {
                            function_path: None,
                            arguments: Vec::new(),
                            position: token.position,
                        });
                        self.push_path(token.position);
                        return Ok(());
                    }
                    TokenKind::Bang => {
                        self.swap(State::UnaryValue);
                        self.states.push(State::Expression);
                        self.cursors.push(Cursor::UnaryExpr {
                            op: UnaryOpKind::Not,
                            position: token.position,
                        });
                        return Ok(());
                    }
                    TokenKind::Identifier => {
                        self.swap(State::PathIdent);
                        self.cursors.push(Cursor::PathAtom(Path {
                            members: Vec::new(),
                            position: token.position,
                        }));
                        continue;
                    }
                    TokenKind::KwNull => {
                        self.push_literal(Value::Null, token.position);
                        return Ok(());
                    }
                    TokenKind::KwTrue => {
                        self.push_literal(Value::Boolean(true), token.position);
                        return Ok(());
                    }
                    TokenKind::KwFalse => {
                        self.push_literal(Value::Boolean(false), token.position);
                        return Ok(());
                    }
                    TokenKind::KwInf => {
                        self.push_literal(Value::Number(f64::INFINITY), token.position);
                        return Ok(());
                    }
                    TokenKind::KwNegInf => {
                        self.push_literal(Value::Number(f64::NEG_INFINITY), token.position);
                        return Ok(());
                    }
                    TokenKind::KwNan => {
                        self.push_literal(Value::Number(f64::NAN), token.position);
                        return Ok(());
                    }
                    TokenKind::DecNumber => {
                        let value = self.decimal_literal(token)?;
                        self.push_literal(value, token.position);
                        return Ok(());
                    }
                    TokenKind::HexNumber => {
                        let value = self.based_literal(token, 16)?;
                        self.push_literal(value, token.position);
                        return Ok(());
                    }
                    TokenKind::BinNumber => {
                        let value = self.based_literal(token, 2)?;
                        self.push_literal(value, token.position);
                        return Ok(());
                    }
                    TokenKind::OctNumber => {
                        let value = self.based_literal(token, 8)?;
                        self.push_literal(value, token.position);
                        return Ok(());
                    }
                    TokenKind::StringLit => {
                        let bytes = self.unescape_string(token)?;
                        self.push_literal(Value::String(bytes), token.position);
                        return Ok(());
                    }
                    TokenKind::LBracket => {
                        self.swap(State::ListNext);
                        self.cursors.push(Cursor::ListLiteral {
                            members: Vec::new(),
                            position: token.position,
                        });
                        return Ok(());
                    }
                    TokenKind::LParen => {
                        self.swap(State::MapKey);
                        self.cursors.push(Cursor::MapLiteral {
                            pairs: IndexMap::new(),
                            next_key: Vec::new(),
                            position: token.position,
                        });
                        return Ok(());
                    }
                    _ => {
                        if let Some(op) = binary_op_for(token.kind) {
                            self.swap(State::BinaryLhs);
                            self.states.push(State::Expression);
                            self.cursors.push(Cursor::BinaryExpr {
                                op,
                                lhs: None,
                                position: token.position,
                            });
                            return Ok(());
                        }
                        return Err(self.unexpected(token));
                    }
                },

                State::ReturnExpressionOrEnd => {
                    self.swap(State::ReturnEnd);
                    if token.kind == TokenKind::Semicolon {
                        self.cursors.push(Cursor::Expr(Expr::Literal {
                            value: Value::Null,
                            position: token.position,
                        }));
                    } else {
                        self.states.push(State::Expression);
                    }
                    continue;
                }
                State::ReturnEnd => {
                    let value = self.pop_expression(token.position)?;
                    let stmt = match self.cursors.pop() {
                        Some(Cursor::ReturnStmt { position }) => Stmt::Return {
                            value,
                            position,
                        },
                        _ => return Err(self.invalid_ast("Return", token.position)),
                    };
                    self.cursors.push(Cursor::Stmt(stmt));
                    self.swap(State::StatementSemicolon);
                    continue;
                }

                State::UnaryValue => {
                    let value = self.pop_expression(token.position)?;
                    let expr = match self.cursors.pop() {
                        Some(Cursor::UnaryExpr { op, position }) => Expr::Unary {
                            op,
                            value: Box::new(value),
                            position,
                        },
                        _ => return Err(self.invalid_ast("UnaryOp", token.position)),
                    };
                    self.cursors.push(Cursor::Expr(expr));
                    self.states.pop();
                    continue;
                }
                State::BinaryLhs => {
                    let expr = self.pop_expression(token.position)?;
                    match self.cursors.last_mut() {
                        Some(Cursor::BinaryExpr { lhs, .. }) => *lhs = Some(expr),
                        _ => return Err(self.invalid_ast("BinaryOp", token.position)),
                    }
                    self.swap(State::BinaryRhs);
                    self.states.push(State::Expression);
                    continue;
                }
                State::BinaryRhs => {
                    let rhs = self.pop_expression(token.position)?;
                    let expr = match self.cursors.pop() {
                        Some(Cursor::BinaryExpr {
                            op,
                            lhs: Some(lhs),
                            position,
                        }) => Expr::Binary {
                            op,
                            lhs: Box::new(lhs),
                            rhs: Box::new(rhs),
                            position,
                        },
                        _ => return Err(self.invalid_ast("BinaryOp", token.position)),
                    };
                    self.cursors.push(Cursor::Expr(expr));
                    self.states.pop();
                    continue;
                }
                State::TernaryPredicate => {
                    let expr = self.pop_expression(token.position)?;
                    match self.cursors.last_mut() {
                        Some(Cursor::TernaryExpr { predicate, .. }) => *predicate = Some(expr),
                        _ => return Err(self.invalid_ast("Ternary", token.position)),
                    }
                    self.swap(State::TernaryLhs);
                    self.states.push(State::Expression);
                    continue;
                }
                State::TernaryLhs => {
                    let expr = self.pop_expression(token.position)?;
                    match self.cursors.last_mut() {
                        Some(Cursor::TernaryExpr { lhs, .. }) => *lhs = Some(expr),
                        _ => return Err(self.invalid_ast("Ternary", token.position)),
                    }
                    self.swap(State::TernaryRhs);
                    self.states.push(State::Expression);
                    continue;
                }
                State::TernaryRhs => {
                    let rhs = self.pop_expression(token.position)?;
                    let expr = match self.cursors.pop() {
                        Some(Cursor::TernaryExpr {
                            predicate: Some(predicate),
                            lhs: Some(lhs),
                            position,
                        }) => Expr::Ternary {
                            predicate: Box::new(predicate),
                            lhs: Box::new(lhs),
                            rhs: Box::new(rhs),
                            position,
                        },
                        _ => return Err(self.invalid_ast("Ternary", token.position)),
                    };
                    self.cursors.push(Cursor::Expr(expr));
                    self.states.pop();
                    continue;
                }

                State::CallPath => {
                    let path = self.pop_path(token.position)?;
                    match self.cursors.last_mut() {
                        Some(Cursor::CallExpr { function_path, .. }) => {
                            *function_path = Some(path);
                        }
                        _ => return Err(self.invalid_ast("Call", token.position)),
                    }
                    self.swap(State::CallLParen);
                    continue;
                }
                State::CallLParen => {
                    self.expect(token, TokenKind::LParen)?;
                    self.swap(State::CallArgsNext);
                    return Ok(());
                }
                State::CallArgsNext => match token.kind {
                    TokenKind::RParen => {
                        let expr = match self.cursors.pop() {
                            Some(Cursor::CallExpr {
                                function_path: Some(function_path),
                                arguments,
                                position,
                            }) => Expr::Call {
                                function_path,
                                arguments,
                                position,
                            },
                            _ => return Err(self.invalid_ast("Call", token.position)),
                        };
                        self.cursors.push(Cursor::Expr(expr));
                        self.states.pop();
                        return Ok(());
                    }
                    _ => {
                        self.swap(State::CallArgExpr);
                        self.states.push(State::Expression);
                        continue;
                    }
                },
                State::CallArgExpr => {
                    let expr = self.pop_expression(token.position)?;
                    match self.cursors.last_mut() {
                        Some(Cursor::CallExpr { arguments, .. }) => arguments.push(expr),
                        _ => return Err(self.invalid_ast("Call", token.position)),
                    }
                    self.swap(State::CallArgsComma);
                    continue;
                }
                State::CallArgsComma => match token.kind {
                    TokenKind::RParen => {
                        self.swap(State::CallArgsNext);
                        continue;
                    }
                    _ => {
                        self.expect(token, TokenKind::Comma)?;
                        self.swap(State::CallArgsNext);
                        return Ok(());
                    }
                },

                State::IfPredicate => {
                    let expr = self.pop_expression(token.position)?;
                    match self.cursors.last_mut() {
                        Some(Cursor::IfStmt { predicate, .. }) => *predicate = Some(expr),
                        _ => return Err(self.invalid_ast("IfElse", token.position)),
                    }
                    self.swap(State::IfTrue);
                    self.states.push(State::Statement);
                    continue;
                }
                State::IfTrue => {
                    let stmt = self.pop_statement(token.position)?;
                    match self.cursors.last_mut() {
                        Some(Cursor::IfStmt { true_path, .. }) => *true_path = Some(stmt),
                        _ => return Err(self.invalid_ast("IfElse", token.position)),
                    }
                    self.swap(State::IfElse);
                    continue;
                }
                State::IfElse => match token.kind {
                    TokenKind::KwElse => {
                        self.swap(State::IfFalse);
                        self.states.push(State::Statement);
                        return Ok(());
                    }
                    _ => {
                        let stmt = self.finish_if(None, token.position)?;
                        self.cursors.push(Cursor::Stmt(stmt));
                        self.states.pop();
                        continue;
                    }
                },
                State::IfFalse => {
                    let false_path = self.pop_statement(token.position)?;
                    let stmt = self.finish_if(Some(false_path), token.position)?;
                    self.cursors.push(Cursor::Stmt(stmt));
                    self.states.pop();
                    continue;
                }

                State::ListNext => match token.kind {
                    TokenKind::RBracket => {
                        let expr = match self.cursors.pop() {
                            Some(Cursor::ListLiteral { members, position }) => Expr::List {
                                members,
                                position,
                            },
                            _ => return Err(self.invalid_ast("List", token.position)),
                        };
                        self.cursors.push(Cursor::Expr(expr));
                        self.states.pop();
                        return Ok(());
                    }
                    _ => {
                        self.swap(State::ListExpr);
                        self.states.push(State::Expression);
                        continue;
                    }
                },
                State::ListExpr => {
                    let expr = self.pop_expression(token.position)?;
                    match self.cursors.last_mut() {
                        Some(Cursor::ListLiteral { members, .. }) => members.push(expr),
                        _ => return Err(self.invalid_ast("List", token.position)),
                    }
                    self.swap(State::ListComma);
                    continue;
                }
                State::ListComma => match token.kind {
                    TokenKind::RBracket => {
                        self.swap(State::ListNext);
                        continue;
                    }
                    _ => {
                        self.expect(token, TokenKind::Comma)?;
                        self.swap(State::ListNext);
                        return Ok(());
                    }
                },

                State::MapKey => match token.kind {
                    TokenKind::RParen => {
                        let expr = match self.cursors.pop() {
                            Some(Cursor::MapLiteral { pairs, position, .. }) => Expr::Map {
                                pairs,
                                position,
                            },
                            _ => return Err(self.invalid_ast("Map", token.position)),
                        };
                        self.cursors.push(Cursor::Expr(expr));
                        self.states.pop();
                        return Ok(());
                    }
                    _ => {
                        self.swap(State::MapKeyString);
                        continue;
                    }
                },
                State::MapKeyString => {
                    self.expect(token, TokenKind::StringLit)?;
                    let key = self.unescape_string(token)?;
                    match self.cursors.last_mut() {
                        Some(Cursor::MapLiteral { next_key, .. }) => *next_key = key,
                        _ => return Err(self.invalid_ast("Map", token.position)),
                    }
                    self.swap(State::MapEq);
                    return Ok(());
                }
                State::MapEq => {
                    self.expect(token, TokenKind::Assign)?;
                    self.swap(State::MapValue);
                    self.states.push(State::Expression);
                    return Ok(());
                }
                State::MapValue => {
                    let expr = self.pop_expression(token.position)?;
                    match self.cursors.last_mut() {
                        Some(Cursor::MapLiteral {
                            pairs, next_key, ..
                        }) => {
                            pairs.insert(std::mem::take(next_key), expr);
                        }
                        _ => return Err(self.invalid_ast("Map", token.position)),
                    }
                    self.swap(State::MapComma);
                    continue;
                }
                State::MapComma => match token.kind {
                    TokenKind::RParen => {
                        self.swap(State::MapKey);
                        continue;
                    }
                    _ => {
                        self.expect(token, TokenKind::Comma)?;
                        self.swap(State::MapKey);
                        return Ok(());
                    }
                },

                State::TryStatement => {
                    let stmt = self.pop_statement(token.position)?;
                    match self.cursors.last_mut() {
                        Some(Cursor::TryStmt { happy_path, .. }) => *happy_path = Some(stmt),
                        _ => return Err(self.invalid_ast("TryRecover", token.position)),
                    }
                    self.swap(State::TryMaybeRecv);
                    continue;
                }
                State::TryMaybeRecv => match token.kind {
                    TokenKind::KwRecover => {
                        self.swap(State::RecvPath);
                        self.push_path(token.position);
                        return Ok(());
                    }
                    _ => {
                        let stmt = self.finish_try(None, token.position)?;
                        self.cursors.push(Cursor::Stmt(stmt));
                        self.states.pop();
                        continue;
                    }
                },
                State::RecvPath => {
                    let path = self.pop_path(token.position)?;
                    match self.cursors.last_mut() {
                        Some(Cursor::TryStmt { binding, .. }) => *binding = Some(path),
                        _ => return Err(self.invalid_ast("TryRecover", token.position)),
                    }
                    self.swap(State::RecvStatement);
                    self.states.push(State::Statement);
                    continue;
                }
                State::RecvStatement => {
                    let sad_path = self.pop_statement(token.position)?;
                    let stmt = self.finish_try(Some(sad_path), token.position)?;
                    self.cursors.push(Cursor::Stmt(stmt));
                    self.states.pop();
                    continue;
                }
            }
        }
    }

    /// Consumes the parser and hands out the finished tree. Anything other
    /// than a lone `Root` on the state stack means more tokens were
    /// expected.
    pub fn into_syntax_tree(mut self) -> Result<Root, SyntaxError> {
        if self.states != [State::Root] {
            return Err(SyntaxError::unexpected_eof(self.last_position, &self.filename));
        }
        match (self.cursors.pop(), self.cursors.is_empty()) {
            (Some(Cursor::Root(root)), true) => Ok(root),
            (cursor, _) => Err(SyntaxError::invalid_ast(
                format!(
                    "expected Root on the cursor stack, found {}",
                    cursor.map_or("nothing", |c| c.kind_name())
                ),
                self.last_position,
                &self.filename,
            )),
        }
    }

    fn swap(&mut self, state: State) {
        if let Some(top) = self.states.last_mut() {
            *top = state;
        }
    }

    fn push_path(&mut self, position: FilePosition) {
        self.cursors.push(Cursor::PathAtom(Path {
            members: Vec::new(),
            position,
        }));
        self.states.push(State::PathIdent);
    }

    fn push_literal(&mut self, value: Value, position: FilePosition) {
        self.cursors.push(Cursor::Expr(Expr::Literal { value, position }));
        self.states.pop();
    }

    fn finish_if(
        &mut self,
        false_path: Option<Stmt>,
        position: FilePosition,
    ) -> Result<Stmt, SyntaxError> {
        match self.cursors.pop() {
            Some(Cursor::IfStmt {
                predicate: Some(predicate),
                true_path: Some(true_path),
                position: if_position,
            }) => Ok(Stmt::IfElse {
                predicate,
                true_path: Box::new(true_path),
                false_path: false_path.map(Box::new),
                position: if_position,
            }),
            _ => Err(self.invalid_ast("IfElse", position)),
        }
    }

    fn finish_try(
        &mut self,
        sad_path: Option<Stmt>,
        position: FilePosition,
    ) -> Result<Stmt, SyntaxError> {
        match self.cursors.pop() {
            Some(Cursor::TryStmt {
                happy_path: Some(happy_path),
                binding,
                position: try_position,
            }) => {
                let recover = match (binding, sad_path) {
                    (Some(binding), Some(sad_path)) => Some(Recover {
                        binding,
                        sad_path: Box::new(sad_path),
                    }),
                    (None, None) => None,
                    _ => return Err(self.invalid_ast("TryRecover", position)),
                };
                Ok(Stmt::TryRecover {
                    happy_path: Box::new(happy_path),
                    recover,
                    position: try_position,
                })
            }
            _ => Err(self.invalid_ast("TryRecover", position)),
        }
    }

    fn pop_expression(&mut self, position: FilePosition) -> Result<Expr, SyntaxError> {
        match self.cursors.pop() {
            Some(Cursor::Expr(expr)) => Ok(expr),
            Some(Cursor::PathAtom(path)) => Ok(Expr::Path(path)),
            _ => Err(self.invalid_ast("an expression", position)),
        }
    }

    fn pop_statement(&mut self, position: FilePosition) -> Result<Stmt, SyntaxError> {
        match self.cursors.pop() {
            Some(Cursor::Stmt(stmt)) => Ok(stmt),
            _ => Err(self.invalid_ast("a statement", position)),
        }
    }

    fn pop_path(&mut self, position: FilePosition) -> Result<Path, SyntaxError> {
        match self.cursors.pop() {
            Some(Cursor::PathAtom(path)) => Ok(path),
            _ => Err(self.invalid_ast("Path", position)),
        }
    }

    fn root_items(&mut self, position: FilePosition) -> Result<&mut Vec<Item>, SyntaxError> {
        match self.cursors.last_mut() {
            Some(Cursor::Root(root)) => Ok(&mut root.items),
            _ => Err(SyntaxError::invalid_ast(
                "expected Root on the cursor stack",
                position,
                &self.filename,
            )),
        }
    }

    fn expect(&self, token: &Token, expected: TokenKind) -> Result<(), SyntaxError> {
        if token.kind == expected {
            Ok(())
        } else {
            Err(SyntaxError::new(
                format!("unexpected token [{}] (expected {expected})", token.lexeme),
                token.position,
                &self.filename,
            ))
        }
    }

    fn unexpected(&self, token: &Token) -> SyntaxError {
        SyntaxError::new(
            format!("unexpected token [{}]", token.lexeme),
            token.position,
            &self.filename,
        )
    }

    fn invalid_token(&self, token: &Token, why: impl Into<String>) -> SyntaxError {
        SyntaxError::new(
            format!("failed to parse token [{}]: {}", token.lexeme, why.into()),
            token.position,
            &self.filename,
        )
    }

    fn invalid_ast(&self, expected: &str, position: FilePosition) -> SyntaxError {
        let found = self
            .cursors
            .last()
            .map_or("an empty cursor stack", |cursor| cursor.kind_name());
        SyntaxError::invalid_ast(
            format!("expected {expected}, found {found}"),
            position,
            &self.filename,
        )
    }

    fn decimal_literal(&self, token: &Token) -> Result<Value, SyntaxError> {
        let span = &token.lexeme;
        if span.contains('.') {
            match span.parse::<f64>() {
                Ok(number) => Ok(Value::Number(number)),
                Err(_) => Err(self.invalid_token(token, format!("could not convert to number: {span}"))),
            }
        } else {
            match span.parse::<i64>() {
                Ok(number) => Ok(Value::Integer(number)),
                Err(err)
                    if matches!(
                        err.kind(),
                        IntErrorKind::PosOverflow | IntErrorKind::NegOverflow
                    ) =>
                {
                    Err(self.invalid_token(token, "number is out of range"))
                }
                Err(_) => Err(self.invalid_token(token, format!("could not convert to number: {span}"))),
            }
        }
    }

    fn based_literal(&self, token: &Token, base: u32) -> Result<Value, SyntaxError> {
        let digits = &token.lexeme[2..];
        match u64::from_str_radix(digits, base) {
            Ok(number) => Ok(Value::Integer(number as i64)),
            Err(err)
                if matches!(
                    err.kind(),
                    IntErrorKind::PosOverflow | IntErrorKind::NegOverflow
                ) =>
            {
                Err(self.invalid_token(token, "number is out of range"))
            }
            Err(_) => Err(self.invalid_token(
                token,
                format!("could not convert to number: {}", token.lexeme),
            )),
        }
    }

    /// Strips the quotes and decodes escape sequences. `\0` and `\x00` are
    /// rejected; an unrecognized escape yields the escaped character.
    fn unescape_string(&self, token: &Token) -> Result<Vec<u8>, SyntaxError> {
        let raw = token.lexeme.as_bytes();
        let inner = &raw[1..raw.len() - 1];
        let mut out = Vec::with_capacity(inner.len());
        let mut i = 0;
        while i < inner.len() {
            let byte = inner[i];
            if byte != b'\\' {
                out.push(byte);
                i += 1;
                continue;
            }
            i += 1;
            if i >= inner.len() {
                return Err(self.invalid_token(token, "unexpected end of escape sequence"));
            }
            match inner[i] {
                b'0' => {
                    return Err(self.invalid_token(token, "cannot have null byte in string"));
                }
                b'n' => out.push(b'\n'),
                b'r' => out.push(b'\r'),
                b't' => out.push(b'\t'),
                b'x' => {
                    if i + 2 >= inner.len() {
                        return Err(
                            self.invalid_token(token, "unexpected end of escape sequence")
                        );
                    }
                    let hex = std::str::from_utf8(&inner[i + 1..i + 3]).map_err(|_| {
                        self.invalid_token(token, "failed to parse byte escape as a number")
                    })?;
                    let byte = u8::from_str_radix(hex, 16).map_err(|_| {
                        self.invalid_token(token, "failed to parse byte escape as a number")
                    })?;
                    if byte == 0 {
                        return Err(
                            self.invalid_token(token, "cannot have null byte in string")
                        );
                    }
                    out.push(byte);
                    i += 2;
                }
                other => out.push(other),
            }
            i += 1;
        }
        Ok(out)
    }
}

fn binary_op_for(kind: TokenKind) -> Option<BinaryOpKind> {
    let op = match kind {
        TokenKind::Dot => BinaryOpKind::Index,
        TokenKind::Assign => BinaryOpKind::Assign,
        TokenKind::Plus => BinaryOpKind::Add,
        TokenKind::Minus => BinaryOpKind::Sub,
        TokenKind::Star => BinaryOpKind::Mul,
        TokenKind::Slash => BinaryOpKind::Div,
        TokenKind::Percent => BinaryOpKind::Mod,
        TokenKind::Eq => BinaryOpKind::Eq,
        TokenKind::Neq => BinaryOpKind::Neq,
        TokenKind::Leq => BinaryOpKind::Leq,
        TokenKind::Geq => BinaryOpKind::Geq,
        TokenKind::Less => BinaryOpKind::Less,
        TokenKind::Greater => BinaryOpKind::Greater,
        TokenKind::And => BinaryOpKind::And,
        TokenKind::Or => BinaryOpKind::Or,
        TokenKind::Ampersand => BinaryOpKind::BitAnd,
        TokenKind::BitOr => BinaryOpKind::BitOr,
        TokenKind::Caret => BinaryOpKind::Xor,
        TokenKind::Shl => BinaryOpKind::Shl,
        TokenKind::Shr => BinaryOpKind::Shr,
        _ => return None,
    };
    Some(op)
}
