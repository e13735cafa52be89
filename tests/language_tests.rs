//! End-to-end language tests: whole programs through the full
//! lex/parse/import/validate/evaluate pipeline.

use plang::error::{PlangError, RuntimeError};
use plang::types::Type;
use plang::value::Payload;
use plang::{interpret, Interpreter, Value};

fn eval(source: &str) -> Value {
    interpret(source).expect("program should run")
}

fn eval_err(source: &str) -> PlangError {
    interpret(source).expect_err("program should fail")
}

fn output_of(source: &str) -> String {
    let mut interp = Interpreter::new();
    interp.capture_output();
    interp.interpret(source).expect("program should run");
    interp.take_output()
}

fn validate_message(source: &str) -> String {
    match eval_err(source) {
        PlangError::Validate(e) => e.message,
        other => panic!("expected a validator error, got {}", other),
    }
}

#[test]
fn arithmetic_precedence() {
    let v = eval("1 + 4 * 3 + 2 * 4;");
    assert_eq!(v.as_int(), Some(21));
    assert_eq!(v.ty, Type::integer());
}

#[test]
fn substring_search_is_zero_based() {
    let v = eval(r#""hello world" ~ "world";"#);
    assert_eq!(v.as_int(), Some(6));
    assert_eq!(v.ty, Type::integer());

    let v = eval(r#""hello" ~ "z";"#);
    assert_eq!(v.as_int(), Some(-1));
}

#[test]
fn recursive_fibonacci() {
    let v = eval("fn fib(n) n == 1 ? 1 : n == 2 ? 1 : fib(n-1) + fib(n-2); fib(12);");
    assert_eq!(v.as_int(), Some(144));
}

#[test]
fn string_interpolation_runs_the_pipeline() {
    let v = eval(r#"fn square(x) x * x; var a = 5; $"square of {a} = {square(a)}";"#);
    assert_eq!(v.as_str(), Some("square of 5 = 25"));
}

#[test]
fn delete_removes_a_map_entry() {
    let v = eval(r#"var m = {"a": 1, "b": 2}; delete m["b"]; m;"#);
    assert_eq!(v.to_display_string(), r#"{"a":1}"#);
}

#[test]
fn delete_of_a_whole_map_empties_it() {
    let v = eval(r#"var m = {"a": 1}; delete m;"#);
    assert_eq!(v.to_display_string(), "{}");
}

#[test]
fn division_by_zero_is_catchable() {
    let out = output_of(r#"try 1/0 catch print("caught"); print("after");"#);
    assert_eq!(out, "caught\nafter\n");
}

#[test]
fn mismatched_parameter_type_is_a_validator_error() {
    let message = validate_message(r#"fn add(a: Real, b: Real) a + b; add(3, "4");"#);
    assert!(message.contains("parameter 'b'"), "got: {}", message);
    assert!(message.contains("Real"), "got: {}", message);
}

#[test]
fn filter_keeps_matching_elements() {
    let v = eval("filter(fn(x) x < 4, [1,2,3,4,5]);");
    assert_eq!(v.to_display_string(), "[1,2,3]");
    assert_eq!(v.ty.name(), "Array");
}

#[test]
fn map_applies_a_function() {
    let v = eval("map(fn(x) x * 2, [1,2,3]);");
    assert_eq!(v.to_display_string(), "[2,4,6]");
}

// Operators.

#[test]
fn concatenation_and_concat_assign() {
    let v = eval(r#""foo" ^^ "bar";"#);
    assert_eq!(v.as_str(), Some("foobar"));

    let v = eval(r#"var s = "ab"; s .= "cd"; s;"#);
    assert_eq!(v.as_str(), Some("abcd"));
}

#[test]
fn string_side_coercion_uses_code_points() {
    let v = eval(r#""abc" ^^ 65;"#);
    assert_eq!(v.as_str(), Some("abcA"));

    let v = eval(r#""A" == 65;"#);
    assert_eq!(v.is_truthy(), true);
}

#[test]
fn exact_integer_division_stays_integer() {
    let v = eval("10 / 2;");
    assert_eq!(v.ty, Type::integer());
    assert_eq!(v.as_int(), Some(5));

    let v = eval("7 / 2;");
    assert!(matches!(v.data, Payload::Real(r) if r == 3.5));
}

#[test]
fn remainder_and_exponent() {
    assert_eq!(eval("7 % 3;").as_int(), Some(1));
    assert_eq!(eval("2 ** 10;").as_int(), Some(1024));
    assert_eq!(eval("2 ^ 3;").as_int(), Some(8));
}

#[test]
fn booleans_are_arithmetic() {
    let v = eval("true + true;");
    assert_eq!(v.as_int(), Some(2));
    assert_eq!(v.ty, Type::integer());
}

#[test]
fn comparisons_promote_numbers() {
    assert!(eval("2 < 2.5;").is_truthy());
    assert!(eval("3 == 3.0;").is_truthy());
    assert!(!eval(r#""apple" > "banana";"#).is_truthy());
}

#[test]
fn increment_and_decrement() {
    assert_eq!(eval("var a = 5; ++a;").as_int(), Some(6));
    assert_eq!(eval("var a = 5; a++;").as_int(), Some(5));
    assert_eq!(eval("var a = 5; a++; a;").as_int(), Some(6));
    assert_eq!(eval("var a = 5; --a; a;").as_int(), Some(4));
}

#[test]
fn increment_of_a_literal_is_rejected() {
    let message = validate_message("5++;");
    assert!(message.contains("'++'"), "got: {}", message);
}

#[test]
fn short_circuit_skips_the_right_operand() {
    let out = output_of(
        r#"fn loud(v) (print("ran"); v);
           false && loud(true);
           true || loud(true);
           false and loud(true);
           true or loud(true);
           true && loud(false);"#,
    );
    assert_eq!(out, "ran\n");
}

#[test]
fn logical_operators_return_the_deciding_operand() {
    assert_eq!(eval("0 || 7;").as_int(), Some(7));
    assert_eq!(eval("0 && 7;").as_int(), Some(0));
    assert_eq!(eval(r#""" || "fallback";"#).as_str(), Some("fallback"));
}

// Control flow.

#[test]
fn while_loops_count() {
    let v = eval("var i = 0; var total = 0; while (i < 5) (total += i; i += 1); total;");
    assert_eq!(v.as_int(), Some(10));
}

#[test]
fn next_skips_and_last_breaks_with_a_value() {
    let v = eval(
        "var i = 0; while (true) (i += 1; i < 3 ? next : 0; i > 4 ? last i : 0);",
    );
    assert_eq!(v.as_int(), Some(5));
}

#[test]
fn next_outside_a_loop_is_rejected() {
    assert!(validate_message("next;").contains("'next'"));
    assert!(validate_message("last;").contains("'last'"));
    // A function body inside a loop is not loop context.
    assert!(validate_message("while (true) fn f() next;").contains("'next'"));
}

#[test]
fn return_outside_a_function_is_rejected() {
    assert!(validate_message("return 1;").contains("'return'"));
}

#[test]
fn return_exits_through_nested_control_flow() {
    let v = eval(
        "fn find(limit) (var i = 0; while (true) (i += 1; i > limit ? return i : 0)); find(3);",
    );
    assert_eq!(v.as_int(), Some(4));
}

#[test]
fn if_then_else_and_ternary_agree() {
    assert_eq!(eval("if 1 < 2 then 10 else 20;").as_int(), Some(10));
    assert_eq!(eval("1 < 2 ? 10 : 20;").as_int(), Some(10));
    assert!(eval("if false then 10;").is_null());
}

#[test]
fn iteration_limit_is_a_fatal_runtime_error() {
    let mut interp = Interpreter::new();
    interp.max_iterations = 10;
    let err = interp
        .interpret("while (true) 1;")
        .expect_err("loop should hit the bound");
    match err {
        PlangError::Runtime(RuntimeError::Error { message, .. }) => {
            assert!(message.contains("iterations"));
        }
        other => panic!("expected a fatal runtime error, got {}", other),
    }
}

#[test]
fn recursion_limit_is_a_fatal_runtime_error() {
    let mut interp = Interpreter::new();
    interp.max_recursion = 16;
    let err = interp
        .interpret("fn forever(n) forever(n + 1); forever(0);")
        .expect_err("recursion should hit the bound");
    match err {
        PlangError::Runtime(RuntimeError::Error { message, .. }) => {
            assert!(message.contains("recursion"));
        }
        other => panic!("expected a fatal runtime error, got {}", other),
    }
}

#[test]
fn limits_are_not_catchable() {
    let mut interp = Interpreter::new();
    interp.max_iterations = 10;
    let err = interp.interpret("try while (true) 1 catch 99;");
    assert!(matches!(
        err,
        Err(PlangError::Runtime(RuntimeError::Error { .. }))
    ));
}

// Exceptions.

#[test]
fn thrown_strings_match_typed_catches() {
    let v = eval(
        r#"try throw "boom"
           catch ("fizzle") 1
           catch ("boom") 2
           catch 3;"#,
    );
    assert_eq!(v.as_int(), Some(2));
}

#[test]
fn the_default_catch_handles_everything_else() {
    let v = eval(r#"try throw "surprise" catch ("boom") 1 catch 2;"#);
    assert_eq!(v.as_int(), Some(2));
}

#[test]
fn the_thrown_string_binds_as_e() {
    let v = eval(r#"try throw "boom" catch e ^^ "!";"#);
    assert_eq!(v.as_str(), Some("boom!"));
}

#[test]
fn uncaught_exceptions_become_runtime_errors() {
    let err = eval_err(r#"throw "unhandled";"#);
    match err {
        PlangError::Runtime(RuntimeError::Exception(message)) => {
            assert_eq!(message, "unhandled");
        }
        other => panic!("expected an exception, got {}", other),
    }
}

#[test]
fn exceptions_propagate_to_an_outer_try() {
    let v = eval(r#"try (try throw "deep" catch ("other") 1 catch throw e) catch e;"#);
    assert_eq!(v.as_str(), Some("deep"));
}

#[test]
fn try_shape_is_validated() {
    assert!(validate_message(r#"try 1 catch ("a") 2;"#).contains("default catch"));
    assert!(
        validate_message(r#"try 1 catch 2 catch ("a") 3;"#).contains("last")
    );
    assert!(
        validate_message(r#"try 1 catch ("a") 2 catch ("a") 3 catch 4;"#)
            .contains("duplicate catch condition")
    );
    assert!(validate_message("try 1 catch (2) 3 catch 4;").contains("String"));
    assert!(validate_message("throw 42;").contains("String"));
}

// Data structures.

#[test]
fn arrays_index_and_extend() {
    assert_eq!(eval("[10, 20, 30][1];").as_int(), Some(20));
    assert!(eval("[10][5];").is_null());
    let v = eval("var a = [1]; a[3] = 9; a;");
    assert_eq!(v.to_display_string(), "[1,null,null,9]");
}

#[test]
fn maps_index_exists_keys_values() {
    assert_eq!(eval(r#"{"a": 1}["a"];"#).as_int(), Some(1));
    assert!(eval(r#"{"a": 1}["zzz"];"#).is_null());
    assert!(eval(r#"var m = {"a": 1}; exists m["a"];"#).is_truthy());
    assert!(!eval(r#"var m = {"a": 1}; exists m["b"];"#).is_truthy());
    assert_eq!(
        eval(r#"var m = {"b": 2, "a": 1}; keys m;"#).to_display_string(),
        r#"["a","b"]"#
    );
    assert_eq!(
        eval(r#"var m = {"b": 2, "a": 1}; values m;"#).to_display_string(),
        "[1,2]"
    );
}

#[test]
fn dot_access_desugars_to_bracket_access() {
    assert_eq!(eval(r#"var m = {"a": 7}; m.a;"#).as_int(), Some(7));
    let v = eval(r#"var m = {"a": 1}; m.b = 2; m["b"];"#);
    assert_eq!(v.as_int(), Some(2));
}

#[test]
fn map_identifier_keys_name_declared_string_variables() {
    let v = eval(r#"var k = "answer"; var m = {k: 42}; m["answer"];"#);
    assert_eq!(v.as_int(), Some(42));
    let message = validate_message("var m = {mystery: 1};");
    assert!(message.contains("undeclared"), "got: {}", message);
}

#[test]
fn exists_and_delete_require_maps() {
    assert!(validate_message("exists [1][0];").contains("Map"));
    assert!(validate_message("delete [1];").contains("Map"));
    assert!(validate_message("keys [1];").contains("Map"));
}

#[test]
fn string_indexing_and_slicing() {
    assert_eq!(eval(r#""hello"[1];"#).as_str(), Some("e"));
    assert_eq!(eval(r#""hello"[9];"#).as_str(), Some(""));
    assert_eq!(eval(r#""hello world"[0..4];"#).as_str(), Some("hello"));
    assert_eq!(eval(r#"var s = "hello"; s[0] = "J"; s;"#).as_str(), Some("Jello"));
    assert_eq!(
        eval(r#"var s = "hello world"; s[6..10] = "plang"; s;"#).as_str(),
        Some("hello plang")
    );
}

#[test]
fn ranges_build_inclusive_integer_arrays() {
    assert_eq!(eval("1..5;").to_display_string(), "[1,2,3,4,5]");
    assert_eq!(eval("3..3;").to_display_string(), "[3]");
    assert_eq!(eval("5..1;").to_display_string(), "[]");
}

// Functions.

#[test]
fn named_arguments_and_defaults() {
    let v = eval("fn greet(who, bang = 1) bang ? who ^^ \"!\" : who; greet(\"hi\", bang = 0);");
    assert_eq!(v.as_str(), Some("hi"));
    let v = eval("fn pad(s, fill = \"x\") s ^^ fill; pad(\"a\");");
    assert_eq!(v.as_str(), Some("ax"));
    let v = eval("fn sub(a, b) a - b; sub(b = 2, a = 10);");
    assert_eq!(v.as_int(), Some(8));
}

#[test]
fn named_argument_mistakes_are_validator_errors() {
    assert!(validate_message("fn f(a) a; f(zzz = 1);").contains("no parameter"));
    assert!(validate_message("fn f(a, b) a; f(1, a = 2);").contains("duplicate"));
    assert!(
        validate_message("fn f(a, b) a; f(a = 1, 2);").contains("positional")
    );
    assert!(validate_message("fn f(a, b) a; f(1);").contains("missing argument"));
}

#[test]
fn closures_capture_their_definition_scope() {
    let v = eval(
        "fn adder(n) fn(x) x + n; var add2 = adder(2); var add10 = adder(10); add2(5) + add10(5);",
    );
    assert_eq!(v.as_int(), Some(22));
}

#[test]
fn anonymous_functions_are_values() {
    let v = eval("var twice = fn(x) x * 2; twice(21);");
    assert_eq!(v.as_int(), Some(42));
}

#[test]
fn function_equality_is_always_false() {
    assert!(!eval("fn f() 1; f == f;").is_truthy());
    assert!(eval("fn f() 1; f != f;").is_truthy());
}

#[test]
fn declared_return_types_are_enforced() {
    let message = validate_message(r#"fn f() -> Integer "nope"; f;"#);
    assert!(message.contains("return"), "got: {}", message);
    assert_eq!(eval("fn f() -> Integer 42; f();").as_int(), Some(42));
}

#[test]
fn return_types_are_inferred_from_all_return_points() {
    let v = eval(r#"fn pick(b) (b ? return 1 : 0; "other"); whatis(pick);"#);
    let text = v.as_str().unwrap();
    assert!(text.contains("Integer") && text.contains("String"), "got: {}", text);
}

#[test]
fn default_values_must_match_their_declared_types() {
    let message = validate_message(r#"fn f(a: Integer = "x") a;"#);
    assert!(message.contains("default"), "got: {}", message);
}

// Gradual typing.

#[test]
fn guards_reject_incompatible_assignments() {
    let message = validate_message(r#"var a: Integer = 1; a = "s";"#);
    assert!(message.contains("cannot assign"), "got: {}", message);
}

#[test]
fn any_declarations_narrow_to_their_initializer() {
    let message = validate_message(r#"var a = 1; a = "s";"#);
    assert!(message.contains("cannot assign"), "got: {}", message);
    // Without an initializer the variable stays Any.
    assert_eq!(eval(r#"var a; a = "s"; a = 1; a;"#).as_int(), Some(1));
}

#[test]
fn union_guards_accept_each_member() {
    let v = eval(r#"var a: Integer | String = 1; a = "s"; a;"#);
    assert_eq!(v.as_str(), Some("s"));
    let message = validate_message(r#"var a: Integer | String = 1.5;"#);
    assert!(message.contains("cannot assign"), "got: {}", message);
}

#[test]
fn integer_arguments_widen_to_real_parameters() {
    assert_eq!(eval("fn half(x: Real) x / 2; half(5);").to_display_string(), "2.5");
}

#[test]
fn undeclared_variables_get_suggestions() {
    let message = validate_message("var length_limit = 3; lenght_limit;");
    assert!(message.contains("did you mean"), "got: {}", message);
}

#[test]
fn assignment_to_undeclared_variables_is_rejected() {
    assert!(validate_message("ghost = 1;").contains("undeclared"));
}

#[test]
fn redeclaration_is_rejected_outside_repl() {
    assert!(validate_message("var a = 1; var a = 2;").contains("redeclaration"));
    assert!(validate_message("fn f() 1; fn f() 2;").contains("redeclaration"));
}

#[test]
fn builtins_cannot_be_overridden() {
    assert!(validate_message("var print = 1;").contains("builtin"));
    assert!(validate_message("fn length() 1;").contains("builtin"));
}

#[test]
fn user_types_extend_the_lattice() {
    let v = eval("type Id : Integer; var a: Id = 7; a + 1;");
    assert_eq!(v.as_int(), Some(8));
    let message = validate_message(r#"type Id : Integer; var a: Id = "s";"#);
    assert!(message.contains("cannot assign"), "got: {}", message);
    // Aliases are transparent.
    assert_eq!(eval(r#"type Text = String; var t: Text = "ok"; t;"#).as_str(), Some("ok"));
}

#[test]
fn operators_on_incompatible_shapes_are_rejected() {
    assert!(validate_message(r#""a" - 1;"#).contains("'-'"));
    assert!(validate_message("[1] + [2];").contains("'+'"));
}

// Builtins.

#[test]
fn typeof_and_whatis() {
    assert_eq!(eval("typeof(3);").as_str(), Some("Integer"));
    assert_eq!(eval("typeof(3.5);").as_str(), Some("Real"));
    assert_eq!(eval(r#"typeof("x");"#).as_str(), Some("String"));
    assert_eq!(eval("typeof([1]);").as_str(), Some("Array"));
    assert_eq!(eval(r#"typeof({"a": 1});"#).as_str(), Some("Map"));
    assert_eq!(eval("typeof(null);").as_str(), Some("Null"));
    assert_eq!(eval("fn f() 1; typeof(f);").as_str(), Some("Function"));

    let v = eval("fn add(a: Real, b: Real) -> Real a + b; whatis(add);");
    assert_eq!(v.as_str(), Some("Function (Real, Real) -> Real"));
    assert_eq!(eval("whatis([1, 2]);").as_str(), Some("Array [Integer]"));
}

#[test]
fn length_counts_chars_elements_entries() {
    assert_eq!(eval(r#"length("hello");"#).as_int(), Some(5));
    assert_eq!(eval("length([1,2,3]);").as_int(), Some(3));
    assert_eq!(eval(r#"length({"a": 1});"#).as_int(), Some(1));
    assert!(validate_message("length(3);").contains("parameter"));
}

#[test]
fn print_takes_an_optional_terminator() {
    assert_eq!(output_of(r#"print("a"); print("b");"#), "a\nb\n");
    assert_eq!(output_of(r#"print("a", ""); print("b", "");"#), "ab");
    assert_eq!(output_of(r#"print("a", end = "|");"#), "a|");
    assert_eq!(output_of("print([1, [2, 3]]);"), "[1,[2,3]]\n");
}

// Cast functions, per the conversion table.

#[test]
fn integer_casts() {
    assert_eq!(eval("Integer(null);").as_int(), Some(0));
    assert_eq!(eval("Integer(true);").as_int(), Some(1));
    assert_eq!(eval("Integer(3.9);").as_int(), Some(3));
    assert_eq!(eval(r#"Integer("42abc");"#).as_int(), Some(42));
    assert_eq!(eval(r#"Integer("-7");"#).as_int(), Some(-7));
    assert_eq!(eval(r#"Integer("abc");"#).as_int(), Some(0));
}

#[test]
fn real_casts() {
    assert_eq!(eval("Real(null);").to_display_string(), "0");
    assert_eq!(eval("Real(2);").ty, Type::real());
    assert_eq!(eval(r#"Real("3.25xyz");"#).to_display_string(), "3.25");
}

#[test]
fn string_casts() {
    assert_eq!(eval("String(null);").as_str(), Some(""));
    assert_eq!(eval("String(false);").as_str(), Some("false"));
    assert_eq!(eval("String(42);").as_str(), Some("42"));
    assert_eq!(eval("String(2.5);").as_str(), Some("2.5"));
    assert_eq!(eval("String([1, \"two\"]);").as_str(), Some(r#"[1,"two"]"#));
    assert_eq!(
        eval(r#"String({"b": 2, "a": [1]});"#).as_str(),
        Some(r#"{"a":[1],"b":2}"#)
    );
}

#[test]
fn boolean_casts() {
    assert!(!eval("Boolean(null);").is_truthy());
    assert!(!eval("Boolean(0);").is_truthy());
    assert!(!eval(r#"Boolean("");"#).is_truthy());
    assert!(eval(r#"Boolean("false");"#).is_truthy());
    assert!(eval("Boolean(0.5);").is_truthy());
}

#[test]
fn casting_functions_is_a_runtime_error() {
    let err = eval_err("fn f() 1; String(f);");
    assert!(matches!(
        err,
        PlangError::Runtime(RuntimeError::Error { .. })
    ));
    let err = eval_err("Integer([1]);");
    assert!(matches!(
        err,
        PlangError::Runtime(RuntimeError::Error { .. })
    ));
}

#[test]
fn array_and_map_round_trip_through_strings() {
    let v = eval(r#"var a = [1, "two", [3]]; Array(String(a)) == a;"#);
    assert!(v.is_truthy());
    let v = eval(r#"var m = {"a": 1, "b": [2]}; Map(String(m)) == m;"#);
    assert!(v.is_truthy());
}

#[test]
fn string_cast_is_idempotent() {
    let v = eval(r#"var m = {"a": [1, 2]}; String(String(m)) == String(m);"#);
    assert!(v.is_truthy());
}

#[test]
fn interpolation_handles_nesting_and_escapes() {
    // Nested braces inside a segment stay balanced.
    assert_eq!(eval(r#"var k = "a"; $"{ length({k: 1}) }{3}";"#).as_str(), Some("13"));
    // Escaped quotes inside a segment reach the embedded parser bare.
    assert_eq!(eval(r#"$"{ \"qu\" ^^ \"ote\" }";"#).as_str(), Some("quote"));
    assert_eq!(eval(r#"var x = 1; $"a\nb{x}";"#).as_str(), Some("a\nb1"));
}

// Blocks and scoping.

#[test]
fn blocks_scope_their_locals() {
    assert_eq!(eval("var a = 1; (var a = 2; a);").as_int(), Some(2));
    assert_eq!(eval("var a = 1; (var a = 2; a); a;").as_int(), Some(1));
    assert!(validate_message("(var inner = 1; inner); inner;").contains("undeclared"));
}

#[test]
fn assignment_writes_into_the_defining_scope() {
    assert_eq!(eval("var a = 1; (a = 5; 0); a;").as_int(), Some(5));
}

#[test]
fn repl_mode_persists_scopes_and_allows_redeclaration() {
    let mut interp = Interpreter::repl();
    interp.interpret("var a = 1;").expect("declare");
    assert_eq!(interp.interpret("a + 1;").expect("use").as_int(), Some(2));
    interp.interpret("var a = 10;").expect("redeclare in repl");
    assert_eq!(interp.interpret("a;").expect("use").as_int(), Some(10));
}

#[test]
fn fresh_runs_reset_state() {
    let mut interp = Interpreter::new();
    interp.interpret("var a = 1;").expect("declare");
    let err = interp.interpret("a;").expect_err("state should reset");
    assert!(matches!(err, PlangError::Validate(_)));
}
