use std::path::Path;

use shrimply::lexer::{Lexer, TokenKind};
use shrimply::parser::parse_source;

fn tokenize(source: &str) -> Vec<shrimply::lexer::Token> {
    Lexer::new(source, Path::new("test.spl"))
        .expect("lexer should accept ASCII input")
        .tokenize()
        .expect("tokenization should succeed")
}

fn parse_error(source: &str) -> String {
    match parse_source(source, Path::new("test.spl")) {
        Ok(_) => panic!("expected a syntax error for {source:?}"),
        Err(err) => err.to_string(),
    }
}

#[test]
fn tokens_carry_line_and_column() {
    let tokens = tokenize("fn main\n  := x");
    let kinds: Vec<_> = tokens.iter().map(|t| t.kind).collect();
    assert_eq!(
        kinds,
        vec![
            TokenKind::KwFn,
            TokenKind::Identifier,
            TokenKind::Declaration,
            TokenKind::Identifier,
            TokenKind::EndOfFile,
        ]
    );
    let positions: Vec<_> = tokens
        .iter()
        .map(|t| (t.position.line, t.position.column))
        .collect();
    assert_eq!(positions, vec![(1, 1), (1, 4), (2, 3), (2, 6), (2, 7)]);
    for pair in positions.windows(2) {
        assert!(pair[0] <= pair[1], "positions must not go backwards");
    }
}

#[test]
fn keywords_require_a_word_boundary() {
    let tokens = tokenize("input inf iffy if");
    let kinds: Vec<_> = tokens.iter().map(|t| t.kind).collect();
    assert_eq!(
        kinds,
        vec![
            TokenKind::Identifier,
            TokenKind::KwInf,
            TokenKind::Identifier,
            TokenKind::KwIf,
            TokenKind::EndOfFile,
        ]
    );
    assert_eq!(tokens[0].lexeme, "input");
    assert_eq!(tokens[2].lexeme, "iffy");
}

#[test]
fn negative_infinity_is_one_token() {
    let tokens = tokenize("-inf - inf -5");
    let kinds: Vec<_> = tokens.iter().map(|t| t.kind).collect();
    assert_eq!(
        kinds,
        vec![
            TokenKind::KwNegInf,
            TokenKind::Minus,
            TokenKind::KwInf,
            TokenKind::DecNumber,
            TokenKind::EndOfFile,
        ]
    );
    assert_eq!(tokens[3].lexeme, "-5");
}

#[test]
fn comments_are_emitted_as_tokens() {
    let tokens = tokenize("/* note */ 1");
    assert_eq!(tokens[0].kind, TokenKind::Comment);
    assert_eq!(tokens[0].lexeme, "/* note */");
    assert_eq!(tokens[1].kind, TokenKind::DecNumber);
}

#[test]
fn unterminated_comment_is_rejected() {
    let error = Lexer::new("/* oops", Path::new("test.spl"))
        .expect("lexer should build")
        .tokenize()
        .expect_err("comment without terminator should fail");
    assert!(error.to_string().contains("unexpected end of file"), "{error}");
}

#[test]
fn unterminated_string_is_rejected() {
    let error = Lexer::new("\"abc", Path::new("test.spl"))
        .expect("lexer should build")
        .tokenize()
        .expect_err("string without closing quote should fail");
    assert!(error.to_string().contains("unexpected end of file"), "{error}");
}

#[test]
fn non_ascii_input_is_rejected() {
    let error = match Lexer::new("fn caf\u{e9}()", Path::new("test.spl")) {
        Ok(_) => panic!("non-ASCII input should be rejected"),
        Err(err) => err,
    };
    assert!(error.to_string().contains("pure ASCII"), "{error}");
}

#[test]
fn string_escapes_decode_and_reescape() {
    let root = parse_source(":= s \"a\\tb\\x41\\q\";", Path::new("test.spl"))
        .expect("escape-heavy string should parse");
    assert_eq!(root.to_string(), ":= s \"a\\tbAq\";");
}

#[test]
fn null_bytes_in_strings_are_rejected() {
    let error = parse_error(":= s \"\\x00\";");
    assert!(error.contains("cannot have null byte"), "{error}");
    let error = parse_error(":= s \"\\0\";");
    assert!(error.contains("cannot have null byte"), "{error}");
}

#[test]
fn empty_radix_bodies_are_rejected_by_the_parser() {
    let error = parse_error(":= x 0x;");
    assert!(error.contains("could not convert to number"), "{error}");
}

#[test]
fn out_of_range_integers_are_rejected() {
    let error = parse_error(":= x 99999999999999999999;");
    assert!(error.contains("number is out of range"), "{error}");
}

#[test]
fn declarations_require_an_initializer() {
    let error = parse_error(":= g;\nfn main(args) { return 0; }");
    assert!(error.contains("unexpected token [;]"), "{error}");
}

#[test]
fn error_messages_name_the_expected_token() {
    let error = parse_error("fn main( { }");
    assert!(error.contains("unexpected token [{]"), "{error}");
    let error = parse_error("fn main(args) { := 1 2; }");
    assert!(error.contains("(expected Identifier)"), "{error}");
}

#[test]
fn truncated_input_reports_unexpected_eof() {
    let error = parse_error("fn main(args) {");
    assert!(error.contains("unexpected end of file"), "{error}");
}

#[test]
fn use_outside_the_top_level_is_rejected() {
    let error = parse_error("fn main(args) { use foo; }");
    assert!(error.contains("unexpected token [use]"), "{error}");
}

#[test]
fn printed_trees_reparse_to_the_same_tree() {
    let source = r#"
        use foo::bar;
        := counter + 1 2;
        := table ("a" = 1, "b" = [2, 3]);
        fn main(args) {
            := xs [1, 2.5, "three"];
            if > $ std::length (xs) 2 { $ std::println (. xs 0); } else { return null; }
            loop { break; }
            try { = counter 5; } recover err { continue; }
            return ? true -inf nan;
        }
    "#;
    let first = parse_source(source, Path::new("test.spl")).expect("program should parse");
    let printed = first.to_string();
    let second = parse_source(&printed, Path::new("test.spl"))
        .expect("printed form should reparse");
    assert_eq!(printed, second.to_string());
}

#[test]
fn deep_expressions_do_not_recurse_the_parser() {
    let mut source = String::from(":= x ");
    for _ in 0..5_000 {
        source.push_str("+ 1 ");
    }
    source.push_str("2;");
    parse_source(&source, Path::new("test.spl")).expect("deep expression should parse");
}

#[test]
fn token_spans_reassemble_the_source() {
    let source = "fn main(args) { return + 1 0x2f; }";
    let tokens = tokenize(source);
    let mut reassembled = String::new();
    for token in &tokens {
        if token.kind == TokenKind::EndOfFile {
            break;
        }
        if !reassembled.is_empty() {
            reassembled.push(' ');
        }
        reassembled.push_str(&token.lexeme);
    }
    let squash = |text: &str| text.split_whitespace().collect::<Vec<_>>().join("");
    assert_eq!(squash(&reassembled), squash(source));
}
