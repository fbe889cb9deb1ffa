use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn write_script(dir: &tempfile::TempDir, name: &str, source: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, source).expect("write script");
    path
}

fn shrimply() -> Command {
    Command::cargo_bin("shrimply").expect("binary exists")
}

#[test]
fn prints_hello() {
    let dir = tempdir().expect("create temp dir");
    let script = write_script(&dir, "hello.spl", "fn main(args) { $ std::println (\"hello\"); }");
    shrimply()
        .arg(&script)
        .assert()
        .success()
        .stdout("hello\n");
}

#[test]
fn prints_global_arithmetic() {
    let dir = tempdir().expect("create temp dir");
    let script = write_script(
        &dir,
        "sum.spl",
        ":= g 10;\nfn main(args) { $ std::println (+ g 5); }",
    );
    shrimply()
        .arg(&script)
        .assert()
        .success()
        .stdout("15\n");
}

#[test]
fn prints_pushed_list_element() {
    let dir = tempdir().expect("create temp dir");
    let script = write_script(
        &dir,
        "push.spl",
        "fn main(args) { := xs [1, 2, 3]; $ std::list::push (xs, 4); $ std::println (. xs 3); }",
    );
    shrimply()
        .arg(&script)
        .assert()
        .success()
        .stdout("4\n");
}

#[test]
fn prints_recovered_message() {
    let dir = tempdir().expect("create temp dir");
    let script = write_script(
        &dir,
        "recover.spl",
        "fn main(args) { try { $ std::crash (\"boom\"); } recover e { $ std::println (e); } }",
    );
    shrimply()
        .arg(&script)
        .assert()
        .success()
        .stdout("boom\n");
}

#[test]
fn prints_function_result() {
    let dir = tempdir().expect("create temp dir");
    let script = write_script(
        &dir,
        "fortytwo.spl",
        "fn f(x) { return + x 1; }\nfn main(args) { $ std::println ($ f (41)); }",
    );
    shrimply()
        .arg(&script)
        .assert()
        .success()
        .stdout("42\n");
}

#[test]
fn runs_imported_modules() {
    let dir = tempdir().expect("create temp dir");
    write_script(&dir, "m.spl", "fn hello() { return \"hi\"; }");
    let script = write_script(
        &dir,
        "main.spl",
        "use m;\nfn main(args) { $ std::println ($ m::hello ()); }",
    );
    shrimply()
        .arg(&script)
        .assert()
        .success()
        .stdout("hi\n");
}

#[test]
fn resolves_modules_from_the_env_paths() {
    let scripts = tempdir().expect("create temp dir");
    let modules = tempdir().expect("create temp dir");
    write_script(&modules, "helper.spl", "fn hello() { return \"hi\"; }");
    let script = write_script(
        &scripts,
        "main.spl",
        "use helper;\nfn main(args) { $ std::println ($ helper::hello ()); }",
    );
    shrimply()
        .arg(&script)
        .env("SHRIMPLY_MOD_PATHS", modules.path())
        .assert()
        .success()
        .stdout("hi\n");
}

#[test]
fn reads_typed_input_from_stdin() {
    let dir = tempdir().expect("create temp dir");
    let script = write_script(
        &dir,
        "echo.spl",
        "fn main(args) { $ std::println ($ std::input (\"integer\")); }",
    );
    shrimply()
        .arg(&script)
        .write_stdin("42\n")
        .assert()
        .success()
        .stdout("42\n");
}

#[test]
fn forwards_script_arguments() {
    let dir = tempdir().expect("create temp dir");
    let script = write_script(
        &dir,
        "echoarg.spl",
        "fn main(args) { $ std::println (. args 1); }",
    );
    shrimply()
        .arg(&script)
        .arg("zzz")
        .assert()
        .success()
        .stdout("zzz\n");
}

#[test]
fn prints_usage_without_a_script() {
    shrimply()
        .assert()
        .success()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn runtime_errors_exit_nonzero() {
    let dir = tempdir().expect("create temp dir");
    let script = write_script(&dir, "bad.spl", "fn main(args) { $ std::crash (\"bad\"); }");
    shrimply()
        .arg(&script)
        .assert()
        .failure()
        .stderr(predicate::str::contains("runtime error: bad"));
}

#[test]
fn syntax_errors_exit_nonzero() {
    let dir = tempdir().expect("create temp dir");
    let script = write_script(&dir, "broken.spl", "fn 123");
    shrimply()
        .arg(&script)
        .assert()
        .failure()
        .stderr(predicate::str::contains("syntax error at"));
}

#[test]
fn cyclic_imports_exit_nonzero() {
    let dir = tempdir().expect("create temp dir");
    write_script(&dir, "a.spl", "use b;\nfn main(args) { return 0; }");
    write_script(&dir, "b.spl", "use a;\n");
    shrimply()
        .arg(dir.path().join("a.spl"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("dependency cycle detected"));
}
