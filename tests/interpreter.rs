use std::fs;
use std::path::Path;
use std::rc::Rc;

use shrimply::value::ExternHandle;
use shrimply::{run_program, run_source, Value};
use tempfile::tempdir;

fn run(source: &str) -> Value {
    run_source(source, Path::new("test.spl"), Vec::new()).expect("program should run")
}

fn run_err(source: &str) -> String {
    match run_source(source, Path::new("test.spl"), Vec::new()) {
        Ok(value) => panic!("expected an error, received {value}"),
        Err(err) => err.to_string(),
    }
}

fn expect_integer(value: &Value) -> i64 {
    match value {
        Value::Integer(n) => *n,
        other => panic!("expected integer, found {}", other.type_name()),
    }
}

fn expect_number(value: &Value) -> f64 {
    match value {
        Value::Number(n) => *n,
        other => panic!("expected double, found {}", other.type_name()),
    }
}

fn expect_bool(value: &Value) -> bool {
    match value {
        Value::Boolean(b) => *b,
        other => panic!("expected boolean, found {}", other.type_name()),
    }
}

fn expect_text(value: &Value) -> String {
    match value {
        Value::String(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        other => panic!("expected string, found {}", other.type_name()),
    }
}

#[test]
fn adds_with_prefix_operators() {
    let value = run("fn main(args) { return + 40 2; }");
    assert_eq!(expect_integer(&value), 42);
}

#[test]
fn calls_user_functions() {
    let value = run("fn f(x) { return + x 1; } fn main(args) { return $ f (41); }");
    assert_eq!(expect_integer(&value), 42);
}

#[test]
fn globals_initialize_in_source_order() {
    let value = run(":= g 10; := h + g 5; fn main(args) { return h; }");
    assert_eq!(expect_integer(&value), 15);
}

#[test]
fn globals_are_visible_across_call_boundaries() {
    let value = run(":= g 7; fn f() { return g; } fn main(args) { return $ f (); }");
    assert_eq!(expect_integer(&value), 7);
}

#[test]
fn lists_push_and_index() {
    let value = run(
        "fn main(args) { := xs [1, 2, 3]; $ std::list::push (xs, 4); return . xs 3; }",
    );
    assert_eq!(expect_integer(&value), 4);
}

#[test]
fn lists_alias_on_assignment() {
    let value = run(
        "fn main(args) { := a [1]; := b a; $ std::list::push (b, 2); return $ std::length (a); }",
    );
    assert_eq!(expect_integer(&value), 2);
}

#[test]
fn list_pop_restores_the_list() {
    let value = run(
        "fn main(args) {
            := xs [1, 2];
            $ std::list::push (xs, 3);
            := popped $ std::list::pop (xs);
            if != popped 3 { return \"wrong value\"; }
            return $ std::length (xs);
        }",
    );
    assert_eq!(expect_integer(&value), 2);
}

#[test]
fn recover_binds_the_error_message() {
    let value = run(
        "fn main(args) { try { $ std::crash (\"boom\"); } recover e { return e; } return \"no\"; }",
    );
    assert_eq!(expect_text(&value), "boom");
}

#[test]
fn recover_does_not_catch_return() {
    let value = run(
        "fn f() { try { return 1; } recover e { return 2; } return 3; }
         fn main(args) { return $ f (); }",
    );
    assert_eq!(expect_integer(&value), 1);
}

#[test]
fn try_without_recover_propagates() {
    let error = run_err("fn main(args) { try { $ std::crash (\"oops\"); } return 0; }");
    assert!(error.contains("runtime error: oops"), "{error}");
}

#[test]
fn missing_arguments_default_to_null() {
    let value = run(
        "fn f(a, b) { if == b null { return __ARGC; } return b; }
         fn main(args) { return $ f (5); }",
    );
    assert_eq!(expect_integer(&value), 1);
}

#[test]
fn extra_arguments_are_counted_but_ignored() {
    let value = run("fn f(a) { return __ARGC; } fn main(args) { return $ f (1, 2, 3); }");
    assert_eq!(expect_integer(&value), 3);
}

#[test]
fn locals_never_cross_call_boundaries() {
    let value = run(
        "fn f() { return x; }
         fn main(args) { := x 5; try { return $ f (); } recover e { return e; } }",
    );
    assert!(
        expect_text(&value).contains("could not find variable \"x\" in scope"),
        "{value}"
    );
}

#[test]
fn assignment_updates_the_existing_binding() {
    let value = run(
        "fn main(args) {
            := total 0;
            := i 0;
            loop {
                = i + i 1;
                if > i 4 { break; }
                = total + total i;
            }
            return total;
        }",
    );
    assert_eq!(expect_integer(&value), 10);
}

#[test]
fn continue_skips_to_the_next_iteration() {
    let value = run(
        "fn main(args) {
            := i 0;
            := total 0;
            loop {
                = i + i 1;
                if > i 5 { break; }
                if == % i 2 0 { continue; }
                = total + total i;
            }
            return total;
        }",
    );
    assert_eq!(expect_integer(&value), 9);
}

#[test]
fn assignment_shadows_rather_than_writing_globals() {
    let value = run(
        ":= g 1;
         fn peek() { return g; }
         fn main(args) { = g 5; if != g 5 { return -1; } return $ peek (); }",
    );
    assert_eq!(expect_integer(&value), 1);
}

#[test]
fn scoped_assignment_writes_the_module_global() {
    let value = run("fn main(args) { = std::math::pi 3; return std::math::pi; }");
    assert_eq!(expect_integer(&value), 3);
}

#[test]
fn unhandled_break_is_a_runtime_error() {
    let error = run_err("fn main(args) { break; }");
    assert!(error.contains("unhandled break statement"), "{error}");
}

#[test]
fn recursion_hits_the_depth_limit() {
    let value = run(
        "fn f(n) { return $ f (+ n 1); }
         fn main(args) { try { return $ f (0); } recover e { return e; } }",
    );
    assert!(
        expect_text(&value).contains("reached call depth limit"),
        "{value}"
    );
}

#[test]
fn integer_division_by_zero_raises() {
    let value = run("fn main(args) { try { return / 1 0; } recover e { return e; } }");
    assert!(
        expect_text(&value).contains("integer division by zero"),
        "{value}"
    );
}

#[test]
fn double_division_by_zero_is_infinite() {
    let value = run("fn main(args) { return == / 1.0 0.0 inf; }");
    assert!(expect_bool(&value));
}

#[test]
fn strings_concatenate_and_repeat() {
    let value = run("fn main(args) { return + * \"ab\" 2 1; }");
    assert_eq!(expect_text(&value), "abab1");
    let value = run("fn main(args) { return * \"x\" -2; }");
    assert_eq!(expect_text(&value), "");
}

#[test]
fn string_indexing_yields_single_bytes() {
    let value = run("fn main(args) { return . \"abc\" 1; }");
    assert_eq!(expect_text(&value), "b");
}

#[test]
fn integers_are_truthy_only_when_positive() {
    let value = run("fn main(args) { return ? -1 \"t\" \"f\"; }");
    assert_eq!(expect_text(&value), "f");
    let value = run("fn main(args) { return ? 1 \"t\" \"f\"; }");
    assert_eq!(expect_text(&value), "t");
}

#[test]
fn empty_aggregates_are_falsy() {
    let value = run("fn main(args) { return ? [] 1 2; }");
    assert_eq!(expect_integer(&value), 2);
    let value = run("fn main(args) { return ? () 1 2; }");
    assert_eq!(expect_integer(&value), 2);
    let value = run("fn main(args) { return ? [0] 1 2; }");
    assert_eq!(expect_integer(&value), 1);
}

#[test]
fn aggregate_equality_is_identity() {
    let value = run(
        "fn main(args) {
            := a [1];
            := b [1];
            if == a b { return \"structural\"; }
            := c a;
            if == a c { return \"alias\"; }
            return \"neither\";
        }",
    );
    assert_eq!(expect_text(&value), "alias");
}

#[test]
fn cross_tag_comparison_is_false() {
    let value = run("fn main(args) { return == 1 1.0; }");
    assert!(!expect_bool(&value));
}

#[test]
fn ordering_falls_back_to_text() {
    let value = run("fn main(args) { return < \"10\" 9; }");
    assert!(expect_bool(&value));
    let value = run("fn main(args) { return < 2 10; }");
    assert!(expect_bool(&value));
}

#[test]
fn bitwise_operators_coerce_to_integers() {
    let value = run("fn main(args) { return & 6 3; }");
    assert_eq!(expect_integer(&value), 2);
    let value = run("fn main(args) { return << 1 4; }");
    assert_eq!(expect_integer(&value), 16);
    let value = run("fn main(args) { return ^ 6 3; }");
    assert_eq!(expect_integer(&value), 5);
    let value = run("fn main(args) { return ^ true false; }");
    assert!(expect_bool(&value));
}

#[test]
fn short_circuits_skip_the_right_operand() {
    let value = run(
        "fn boomed() { $ std::crash (\"called\"); }
         fn main(args) { return || true && false $ boomed (); }",
    );
    assert!(expect_bool(&value));
}

#[test]
fn map_literals_index_by_key() {
    let value = run("fn main(args) { := m (\"a\" = 1, \"b\" = 2); return . m \"b\"; }");
    assert_eq!(expect_integer(&value), 2);
}

#[test]
fn missing_map_keys_raise() {
    let value = run(
        "fn main(args) {
            := m (\"a\" = 1);
            try { return . m \"zz\"; } recover e { return e; }
        }",
    );
    assert!(
        expect_text(&value).contains("index does not exist in map"),
        "{value}"
    );
}

#[test]
fn map_helpers_cover_the_interface() {
    let value = run(
        "fn main(args) {
            := m (\"a\" = 1, \"b\" = 2);
            if ! $ std::map::contains (m, \"a\") { return -1; }
            := removed $ std::map::remove (m, \"a\");
            if != removed 1 { return -2; }
            if $ std::map::contains (m, \"a\") { return -3; }
            return $ std::length ($ std::map::keys (m));
        }",
    );
    assert_eq!(expect_integer(&value), 1);
}

#[test]
fn assignment_through_list_elements() {
    let value = run("fn main(args) { := xs [1, 2]; = . xs 0 9; return . xs 0; }");
    assert_eq!(expect_integer(&value), 9);
}

#[test]
fn assignment_through_map_keys_creates_entries() {
    let value = run("fn main(args) { := m (); = . m \"k\" 5; return . m \"k\"; }");
    assert_eq!(expect_integer(&value), 5);
}

#[test]
fn ternary_selects_an_assignable_place() {
    let value = run(
        "fn main(args) { := a 1; := b 2; = ? true a b 9; return a; }",
    );
    assert_eq!(expect_integer(&value), 9);
}

#[test]
fn literals_without_places_reject_assignment() {
    let value = run(
        "fn main(args) { try { = 1 2; } recover e { return e; } return 0; }",
    );
    assert!(
        expect_text(&value).contains("expression does not support assignment"),
        "{value}"
    );
}

#[test]
fn cyclic_values_print_with_elisions() {
    let value = run(
        "fn main(args) { := a [1]; $ std::list::push (a, a); return + \"\" a; }",
    );
    assert_eq!(expect_text(&value), "[1, ...]");
}

#[test]
fn radix_literals_parse_to_integers() {
    let value = run("fn main(args) { return + + 0x10 0b101 0o17; }");
    assert_eq!(expect_integer(&value), 36);
}

#[test]
fn string_helpers_cover_the_interface() {
    let value = run("fn main(args) { return $ std::string::substring (\"hello\", 1, 3); }");
    assert_eq!(expect_text(&value), "ell");
    let value = run("fn main(args) { return $ std::string::find (\"hello world\", \"world\"); }");
    assert_eq!(expect_integer(&value), 6);
    let value = run("fn main(args) { return $ std::string::find (\"abc\", \"zz\"); }");
    assert_eq!(expect_integer(&value), -1);
    let value = run("fn main(args) { return $ std::string::upper (\"abc\"); }");
    assert_eq!(expect_text(&value), "ABC");
    let value = run("fn main(args) { return $ std::string::lower (\"ABC\"); }");
    assert_eq!(expect_text(&value), "abc");
    let value = run("fn main(args) { return $ std::string::byte (\"AB\", 1); }");
    assert_eq!(expect_integer(&value), 66);
    let value = run("fn main(args) { return $ std::string::char (66); }");
    assert_eq!(expect_text(&value), "B");
}

#[test]
fn find_reports_one_for_whole_string_equality() {
    let value = run("fn main(args) { return $ std::string::find (\"abc\", \"abc\"); }");
    assert_eq!(expect_integer(&value), 1);
}

#[test]
fn math_helpers_cover_the_interface() {
    let value = run("fn main(args) { return $ std::math::pow (2, 8); }");
    assert_eq!(expect_number(&value), 256.0);
    let value = run("fn main(args) { return $ std::typeof ($ std::math::abs (-3)); }");
    assert_eq!(expect_text(&value), "double");
    let value = run("fn main(args) { return $ std::math::floor (3.7); }");
    assert_eq!(expect_number(&value), 3.0);
    let value = run("fn main(args) { return $ std::math::as_int (3.9); }");
    assert_eq!(expect_integer(&value), 3);
    let value = run("fn main(args) { return $ std::math::signum (-5); }");
    assert_eq!(expect_number(&value), -1.0);
    let value = run("fn main(args) { return > std::math::pi 3.14; }");
    assert!(expect_bool(&value));
    let value = run("fn main(args) { return $ std::math::parse (\"42\"); }");
    assert_eq!(expect_number(&value), 42.0);
}

#[test]
fn log_takes_the_value_first() {
    let value = run("fn main(args) { return $ std::math::log (8, 2); }");
    assert!((expect_number(&value) - 3.0).abs() < 1e-9);
}

#[test]
fn rand_is_deterministic_under_a_seed() {
    let value = run(
        "fn main(args) {
            := a $ std::math::rand (7);
            := b $ std::math::rand (7);
            if != a b { return -1; }
            if < a 0.0 { return -2; }
            if >= a 1.0 { return -3; }
            return 0;
        }",
    );
    assert_eq!(expect_integer(&value), 0);
}

#[test]
fn typeof_names_every_tag() {
    let value = run("fn main(args) { return $ std::typeof (null); }");
    assert_eq!(expect_text(&value), "null");
    let value = run("fn main(args) { return $ std::typeof (1.5); }");
    assert_eq!(expect_text(&value), "double");
    let value = run("fn main(args) { return $ std::typeof ([]); }");
    assert_eq!(expect_text(&value), "list");
    let value = run("fn main(args) { return $ std::typeof (()); }");
    assert_eq!(expect_text(&value), "map");
}

#[test]
fn length_rejects_scalars() {
    let value = run(
        "fn main(args) { try { return $ std::length (5); } recover e { return e; } }",
    );
    assert!(
        expect_text(&value).contains("cannot get length of value"),
        "{value}"
    );
}

#[test]
fn extern_values_are_opaque_and_falsy() {
    let ext = Value::Extern(ExternHandle::new(Rc::new(42_i32)));
    assert_eq!(ext.type_name(), "extern");
    assert!(!ext.is_truthy());
    assert!(ext.raw_string().starts_with("<extern"));
}

#[test]
fn bare_return_yields_null() {
    let value = run("fn main(args) { return; }");
    assert!(matches!(value, Value::Null));
}

#[test]
fn else_if_chains_evaluate() {
    let value = run(
        "fn classify(n) {
            if == n 0 { return \"zero\"; } else if < n 0 { return \"neg\"; } else { return \"pos\"; }
         }
         fn main(args) { return $ classify (-3); }",
    );
    assert_eq!(expect_text(&value), "neg");
}

#[test]
fn main_receives_the_argument_list() {
    let value = run_source(
        "fn main(args) { return . args 1; }",
        Path::new("test.spl"),
        vec!["test.spl".to_string(), "zzz".to_string()],
    )
    .expect("program should run");
    assert_eq!(expect_text(&value), "zzz");
}

#[test]
fn missing_main_is_reported() {
    let error = run_err(":= g 1;");
    assert!(error.contains("no main function found"), "{error}");
}

#[test]
fn main_arity_is_checked() {
    let error = run_err("fn main() { return 0; }");
    assert!(
        error.contains("main function must have exactly one argument"),
        "{error}"
    );
}

#[test]
fn runtime_errors_carry_a_backtrace() {
    let error = run_err("fn main(args) { $ std::crash (\"kaboom\"); }");
    assert!(error.starts_with("runtime error: kaboom\nbacktrace:\n"), "{error}");
    assert!(error.contains("in main (module <root>)"), "{error}");
}

#[test]
fn modules_load_from_disk() {
    let dir = tempdir().expect("create temp dir");
    fs::write(dir.path().join("m.spl"), "fn hello() { return \"hi\"; }\n:= seven 7;\n")
        .expect("write module");
    let main_path = dir.path().join("main.spl");
    fs::write(
        &main_path,
        "use m;\nfn main(args) { return + $ m::hello () m::seven; }\n",
    )
    .expect("write main");
    let value = run_program(&main_path, Vec::new()).expect("program should run");
    assert_eq!(expect_text(&value), "hi7");
}

#[test]
fn import_cycles_are_rejected() {
    let dir = tempdir().expect("create temp dir");
    fs::write(dir.path().join("a.spl"), "use b;\nfn main(args) { return 0; }\n")
        .expect("write a");
    fs::write(dir.path().join("b.spl"), "use a;\n").expect("write b");
    let error = run_program(&dir.path().join("a.spl"), Vec::new())
        .expect_err("cycle should be rejected")
        .to_string();
    assert!(error.contains("dependency cycle detected"), "{error}");
}

#[test]
fn diamond_imports_share_one_module() {
    let dir = tempdir().expect("create temp dir");
    fs::write(dir.path().join("shared.spl"), ":= items [];\n").expect("write shared");
    fs::write(
        dir.path().join("left.spl"),
        "use shared;\nfn add() { $ std::list::push (shared::items, 1); }\n",
    )
    .expect("write left");
    fs::write(
        dir.path().join("right.spl"),
        "use shared;\nfn add() { $ std::list::push (shared::items, 2); }\n",
    )
    .expect("write right");
    let main_path = dir.path().join("main.spl");
    fs::write(
        &main_path,
        "use left;\nuse right;\nuse shared;\nfn main(args) {\n    $ left::add ();\n    $ right::add ();\n    return $ std::length (shared::items);\n}\n",
    )
    .expect("write main");
    let value = run_program(&main_path, Vec::new()).expect("program should run");
    assert_eq!(expect_integer(&value), 2);
}

#[test]
fn unresolvable_imports_are_reported() {
    let dir = tempdir().expect("create temp dir");
    let main_path = dir.path().join("main.spl");
    fs::write(&main_path, "use nosuch;\nfn main(args) { return 0; }\n").expect("write main");
    let error = run_program(&main_path, Vec::new())
        .expect_err("missing module should fail")
        .to_string();
    assert!(error.contains("could not resolve module path"), "{error}");
}
