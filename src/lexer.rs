use std::fmt;
use std::path::{Path, PathBuf};

use crate::diagnostics::{FilePosition, SyntaxError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Unrecognized,
    // Keywords
    KwFn,
    KwIf,
    KwElse,
    KwLoop,
    KwBreak,
    KwContinue,
    KwReturn,
    KwTrue,
    KwFalse,
    KwNull,
    KwInf,
    KwNegInf,
    KwNan,
    KwTry,
    KwRecover,
    KwUse,
    // Punctuation
    Semicolon,
    Declaration, // :=
    Scope,       // ::
    Call,        // $
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Dot,
    Comma,
    Ternary, // ?
    And,     // &&
    Or,      // ||
    Eq,      // ==
    Neq,     // !=
    Leq,     // <=
    Geq,     // >=
    Assign,  // =
    Ampersand,
    BitOr,
    Caret,
    Shl,
    Shr,
    Bang,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Less,
    Greater,
    // Literals
    HexNumber,
    BinNumber,
    OctNumber,
    DecNumber,
    StringLit,
    // Miscellaneous
    Comment,
    Identifier,
    EndOfFile,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TokenKind::Unrecognized => "Unrecognized",
            TokenKind::KwFn => "Fn",
            TokenKind::KwIf => "If",
            TokenKind::KwElse => "Else",
            TokenKind::KwLoop => "Loop",
            TokenKind::KwBreak => "Break",
            TokenKind::KwContinue => "Continue",
            TokenKind::KwReturn => "Return",
            TokenKind::KwTrue => "True",
            TokenKind::KwFalse => "False",
            TokenKind::KwNull => "Null",
            TokenKind::KwInf => "Inf",
            TokenKind::KwNegInf => "NegInf",
            TokenKind::KwNan => "Nan",
            TokenKind::KwTry => "Try",
            TokenKind::KwRecover => "Recover",
            TokenKind::KwUse => "Use",
            TokenKind::Semicolon => "Semicolon",
            TokenKind::Declaration => "Declaration",
            TokenKind::Scope => "Scope",
            TokenKind::Call => "Call",
            TokenKind::Plus => "Plus",
            TokenKind::Minus => "Minus",
            TokenKind::Star => "Star",
            TokenKind::Slash => "Slash",
            TokenKind::Percent => "Percent",
            TokenKind::Dot => "Dot",
            TokenKind::Comma => "Comma",
            TokenKind::Ternary => "Ternary",
            TokenKind::And => "And",
            TokenKind::Or => "Or",
            TokenKind::Eq => "Eq",
            TokenKind::Neq => "Neq",
            TokenKind::Leq => "Leq",
            TokenKind::Geq => "Geq",
            TokenKind::Assign => "Assign",
            TokenKind::Ampersand => "Ampersand",
            TokenKind::BitOr => "BitOr",
            TokenKind::Caret => "Caret",
            TokenKind::Shl => "Shl",
            TokenKind::Shr => "Shr",
            TokenKind::Bang => "Bang",
            TokenKind::LParen => "LParen",
            TokenKind::RParen => "RParen",
            TokenKind::LBracket => "LBracket",
            TokenKind::RBracket => "RBracket",
            TokenKind::LBrace => "LBrace",
            TokenKind::RBrace => "RBrace",
            TokenKind::Less => "Less",
            TokenKind::Greater => "Greater",
            TokenKind::HexNumber => "HexNumber",
            TokenKind::BinNumber => "BinNumber",
            TokenKind::OctNumber => "OctNumber",
            TokenKind::DecNumber => "DecNumber",
            TokenKind::StringLit => "String",
            TokenKind::Comment => "Comment",
            TokenKind::Identifier => "Identifier",
            TokenKind::EndOfFile => "EndOfFile",
        };
        f.write_str(name)
    }
}

/// One lexed token. `lexeme` is the exact source substring the token spans,
/// quotes and radix prefixes included.
#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub position: FilePosition,
}

pub struct Lexer<'a> {
    source: &'a str,
    filename: PathBuf,
    index: usize,
    line: usize,
    column: usize,
    eof_emitted: bool,
}

impl<'a> Lexer<'a> {
    /// Builds a lexer over `source`. Input must be 7-bit ASCII.
    pub fn new(source: &'a str, filename: &Path) -> Result<Self, SyntaxError> {
        if !source.is_ascii() {
            return Err(SyntaxError::new(
                "file must be pure ASCII",
                FilePosition::start(),
                filename,
            ));
        }
        Ok(Self {
            source,
            filename: filename.to_path_buf(),
            index: 0,
            line: 1,
            column: 1,
            eof_emitted: false,
        })
    }

    fn at_end(&self) -> bool {
        self.index >= self.source.len()
    }

    fn byte_at(&self, index: usize) -> u8 {
        self.source.as_bytes()[index]
    }

    fn peek(&self) -> Option<u8> {
        self.source.as_bytes().get(self.index).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.source.as_bytes().get(self.index + offset).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.index += 1;
        if byte == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(byte)
    }

    fn position(&self) -> FilePosition {
        FilePosition::new(self.line, self.column)
    }

    fn skip_whitespace(&mut self) {
        while let Some(byte) = self.peek() {
            if byte.is_ascii_whitespace() {
                self.bump();
            } else {
                break;
            }
        }
    }

    /// Matches `needle` at the cursor, advancing past it when found.
    fn chomp(&mut self, needle: &str) -> bool {
        if self.source[self.index..].starts_with(needle) {
            for _ in 0..needle.len() {
                self.bump();
            }
            true
        } else {
            false
        }
    }

    fn token(&self, kind: TokenKind, start: usize, position: FilePosition) -> Token {
        Token {
            kind,
            lexeme: self.source[start..self.index].to_string(),
            position,
        }
    }

    /// Advances past one token. Emits a final `EndOfFile` token exactly once
    /// and reports end-of-stream with `None` afterwards.
    pub fn next_token(&mut self) -> Result<Option<Token>, SyntaxError> {
        self.skip_whitespace();
        if self.at_end() {
            if self.eof_emitted {
                return Ok(None);
            }
            self.eof_emitted = true;
            return Ok(Some(Token {
                kind: TokenKind::EndOfFile,
                lexeme: String::new(),
                position: self.position(),
            }));
        }

        let start = self.index;
        let position = self.position();
        let current = self.byte_at(start);

        // Keywords and identifiers share the word scan; keywords only match
        // at a word boundary so names like `input` stay identifiers.
        if current.is_ascii_alphabetic() || current == b'_' {
            while let Some(byte) = self.peek() {
                if byte.is_ascii_alphanumeric() || byte == b'_' {
                    self.bump();
                } else {
                    break;
                }
            }
            let word = &self.source[start..self.index];
            let kind = keyword_for(word).unwrap_or(TokenKind::Identifier);
            return Ok(Some(self.token(kind, start, position)));
        }

        // Comments before punctuation so `/*` is not a Slash.
        if self.source[self.index..].starts_with("/*") {
            self.bump();
            self.bump();
            loop {
                if self.at_end() {
                    return Err(SyntaxError::unexpected_eof(position, &self.filename));
                }
                if self.chomp("*/") {
                    break;
                }
                self.bump();
            }
            return Ok(Some(self.token(TokenKind::Comment, start, position)));
        }

        if current == b'-' {
            // `-inf` is one keyword; `- inf` is two tokens.
            if self.source[self.index + 1..].starts_with("inf")
                && !matches!(self.peek_at(4), Some(b) if b.is_ascii_alphanumeric() || b == b'_')
            {
                for _ in 0..4 {
                    self.bump();
                }
                return Ok(Some(self.token(TokenKind::KwNegInf, start, position)));
            }
            // A leading minus directly before a digit is a signed literal.
            if matches!(self.peek_at(1), Some(b) if b.is_ascii_digit()) {
                self.bump();
                return Ok(Some(self.decimal_literal(start, position)));
            }
        }

        // Radix prefixes before the plain digit scan. An empty digit body is
        // accepted here; the parser rejects the conversion.
        if self.chomp("0x") {
            while matches!(self.peek(), Some(b) if b.is_ascii_hexdigit()) {
                self.bump();
            }
            return Ok(Some(self.token(TokenKind::HexNumber, start, position)));
        }
        if self.chomp("0b") {
            while matches!(self.peek(), Some(b'0' | b'1')) {
                self.bump();
            }
            return Ok(Some(self.token(TokenKind::BinNumber, start, position)));
        }
        if self.chomp("0o") {
            while matches!(self.peek(), Some(b'0'..=b'7')) {
                self.bump();
            }
            return Ok(Some(self.token(TokenKind::OctNumber, start, position)));
        }

        if current.is_ascii_digit() {
            return Ok(Some(self.decimal_literal(start, position)));
        }

        if current == b'"' {
            return self.string_literal(start, position).map(Some);
        }

        // Multi-character punctuation before single-character.
        for (needle, kind) in [
            (":=", TokenKind::Declaration),
            ("::", TokenKind::Scope),
            ("&&", TokenKind::And),
            ("||", TokenKind::Or),
            ("==", TokenKind::Eq),
            ("!=", TokenKind::Neq),
            ("<=", TokenKind::Leq),
            (">=", TokenKind::Geq),
            ("<<", TokenKind::Shl),
            (">>", TokenKind::Shr),
        ] {
            if self.chomp(needle) {
                return Ok(Some(self.token(kind, start, position)));
            }
        }

        let kind = match current {
            b';' => TokenKind::Semicolon,
            b'$' => TokenKind::Call,
            b'+' => TokenKind::Plus,
            b'-' => TokenKind::Minus,
            b'*' => TokenKind::Star,
            b'/' => TokenKind::Slash,
            b'%' => TokenKind::Percent,
            b'.' => TokenKind::Dot,
            b',' => TokenKind::Comma,
            b'?' => TokenKind::Ternary,
            b'=' => TokenKind::Assign,
            b'&' => TokenKind::Ampersand,
            b'|' => TokenKind::BitOr,
            b'^' => TokenKind::Caret,
            b'!' => TokenKind::Bang,
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            b'[' => TokenKind::LBracket,
            b']' => TokenKind::RBracket,
            b'{' => TokenKind::LBrace,
            b'}' => TokenKind::RBrace,
            b'<' => TokenKind::Less,
            b'>' => TokenKind::Greater,
            _ => {
                return Err(SyntaxError::new(
                    "unrecognized token",
                    position,
                    &self.filename,
                ));
            }
        };
        self.bump();
        Ok(Some(self.token(kind, start, position)))
    }

    fn decimal_literal(&mut self, start: usize, position: FilePosition) -> Token {
        let mut seen_dot = false;
        while let Some(byte) = self.peek() {
            if byte.is_ascii_digit() {
                self.bump();
            } else if byte == b'.' && !seen_dot {
                seen_dot = true;
                self.bump();
            } else {
                break;
            }
        }
        self.token(TokenKind::DecNumber, start, position)
    }

    fn string_literal(&mut self, start: usize, position: FilePosition) -> Result<Token, SyntaxError> {
        self.bump(); // opening quote
        loop {
            match self.bump() {
                None => {
                    return Err(SyntaxError::unexpected_eof(position, &self.filename));
                }
                Some(b'"') => break,
                Some(b'\\') => {
                    if self.bump().is_none() {
                        return Err(SyntaxError::unexpected_eof(position, &self.filename));
                    }
                }
                Some(_) => {}
            }
        }
        Ok(self.token(TokenKind::StringLit, start, position))
    }

    /// Lexes the remaining input to a token list, ending with `EndOfFile`.
    pub fn tokenize(mut self) -> Result<Vec<Token>, SyntaxError> {
        let mut tokens = Vec::new();
        while let Some(token) = self.next_token()? {
            tokens.push(token);
        }
        Ok(tokens)
    }
}

fn keyword_for(word: &str) -> Option<TokenKind> {
    let kind = match word {
        "fn" => TokenKind::KwFn,
        "if" => TokenKind::KwIf,
        "else" => TokenKind::KwElse,
        "loop" => TokenKind::KwLoop,
        "break" => TokenKind::KwBreak,
        "continue" => TokenKind::KwContinue,
        "return" => TokenKind::KwReturn,
        "true" => TokenKind::KwTrue,
        "false" => TokenKind::KwFalse,
        "null" => TokenKind::KwNull,
        "inf" => TokenKind::KwInf,
        "nan" => TokenKind::KwNan,
        "try" => TokenKind::KwTry,
        "recover" => TokenKind::KwRecover,
        "use" => TokenKind::KwUse,
        _ => return None,
    };
    Some(kind)
}
