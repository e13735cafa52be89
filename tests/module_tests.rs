//! Module importer tests against real files in temporary directories.

use std::fs;
use std::path::Path;

use plang::error::PlangError;
use plang::{Interpreter, Value};

fn write_module(dir: &Path, rel: &str, source: &str) {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("module directory");
    }
    fs::write(path, source).expect("module file");
}

fn interp_in(dir: &Path) -> Interpreter {
    let mut interp = Interpreter::new();
    interp.module_dirs = vec![dir.to_path_buf()];
    interp
}

fn eval_in(dir: &Path, source: &str) -> Value {
    interp_in(dir).interpret(source).expect("program should run")
}

fn import_message(dir: &Path, source: &str) -> String {
    match interp_in(dir).interpret(source) {
        Err(PlangError::Import(e)) => e.message,
        Err(other) => panic!("expected an import error, got {}", other),
        Ok(_) => panic!("expected an import error"),
    }
}

#[test]
fn qualified_calls_reach_imported_functions() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_module(dir.path(), "Math.plang", "module Math; fn add(a, b) a + b;");
    let v = eval_in(dir.path(), "import Math; Math::add(1, 2);");
    assert_eq!(v.as_int(), Some(3));
}

#[test]
fn bare_identifiers_resolve_to_imported_symbols() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_module(dir.path(), "Math.plang", "module Math; fn add(a, b) a + b;");
    let v = eval_in(dir.path(), "import Math; add(1, 2);");
    assert_eq!(v.as_int(), Some(3));
}

#[test]
fn local_declarations_shadow_imported_symbols() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_module(dir.path(), "Math.plang", "module Math; fn add(a, b) a + b;");
    let v = eval_in(
        dir.path(),
        "import Math; fn add(a, b) a * 100 + b; add(1, 2);",
    );
    assert_eq!(v.as_int(), Some(102));
}

#[test]
fn aliases_rename_the_namespace() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_module(dir.path(), "Math.plang", "module Math; var pi = 3.14159;");
    let v = eval_in(dir.path(), "import Math as M; M::pi;");
    assert!(matches!(v.as_number(), Some(f) if (f - 3.14159).abs() < 1e-9));
}

#[test]
fn nested_module_paths_map_to_directories() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_module(
        dir.path(),
        "Math/Trig.plang",
        "module Math::Trig; fn double(x) x * 2;",
    );
    let v = eval_in(dir.path(), "import Math::Trig as T; T::double(21);");
    assert_eq!(v.as_int(), Some(42));
}

#[test]
fn imported_variables_hold_module_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_module(
        dir.path(),
        "Counter.plang",
        "module Counter; var count = 0; fn bump() count += 1;",
    );
    let v = eval_in(
        dir.path(),
        "import Counter; Counter::bump(); Counter::bump(); Counter::count;",
    );
    assert_eq!(v.as_int(), Some(2));
}

#[test]
fn modules_can_import_modules() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_module(dir.path(), "Base.plang", "module Base; fn twice(x) x * 2;");
    write_module(
        dir.path(),
        "Derived.plang",
        "module Derived; import Base; fn quad(x) Base::twice(Base::twice(x));",
    );
    let v = eval_in(dir.path(), "import Derived; Derived::quad(3);");
    assert_eq!(v.as_int(), Some(12));
}

#[test]
fn missing_module_files_are_import_errors() {
    let dir = tempfile::tempdir().expect("tempdir");
    let message = import_message(dir.path(), "import Nowhere;");
    assert!(message.contains("Nowhere"), "got: {}", message);
}

#[test]
fn module_declaration_must_match_the_request() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_module(dir.path(), "Math.plang", "module Sums; fn add(a, b) a + b;");
    let message = import_message(dir.path(), "import Math;");
    assert!(message.contains("Sums"), "got: {}", message);
}

#[test]
fn module_declaration_must_come_first() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_module(dir.path(), "Math.plang", "fn add(a, b) a + b; module Math;");
    let message = import_message(dir.path(), "import Math;");
    assert!(message.contains("module declaration"), "got: {}", message);
}

#[test]
fn duplicate_module_declarations_are_fatal() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_module(dir.path(), "Math.plang", "module Math; module Math; var x = 1;");
    let message = import_message(dir.path(), "import Math;");
    assert!(message.contains("duplicate"), "got: {}", message);
}

#[test]
fn symbol_redeclaration_in_a_module_is_fatal() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_module(
        dir.path(),
        "Math.plang",
        "module Math; fn add(a, b) a + b; var add = 1;",
    );
    let message = import_message(dir.path(), "import Math;");
    assert!(message.contains("redeclaration"), "got: {}", message);
}

#[test]
fn unknown_qualified_symbols_are_validator_errors() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_module(dir.path(), "Math.plang", "module Math; fn add(a, b) a + b;");
    let err = interp_in(dir.path())
        .interpret("import Math; Math::subtract(1, 2);")
        .expect_err("unknown symbol");
    assert!(matches!(err, PlangError::Validate(_)), "got: {}", err);
}

#[test]
fn module_bodies_are_validated() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_module(
        dir.path(),
        "Bad.plang",
        "module Bad; fn broken() undeclared_thing;",
    );
    let err = interp_in(dir.path())
        .interpret("import Bad; 1;")
        .expect_err("module body should fail validation");
    assert!(matches!(err, PlangError::Validate(_)), "got: {}", err);
}

#[test]
fn import_cycles_do_not_recurse_forever() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_module(dir.path(), "A.plang", "module A; import B; fn fa() 1;");
    write_module(dir.path(), "B.plang", "module B; import A; fn fb() 2;");
    let v = eval_in(dir.path(), "import A; A::fa();");
    assert_eq!(v.as_int(), Some(1));
}
