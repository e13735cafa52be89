use std::collections::HashSet;

use super::Parser;
use crate::ast::{AssignOp, BinOp, Catch, LogicOp, Node, NodeKind, UnOp};
use crate::types::{Type, TypeSystem};

fn parse(source: &str) -> Node {
    let mut parser = Parser::from_source(source, type_names());
    parser.parse_program().expect("program should parse")
}

fn parse_err(source: &str) -> crate::error::ParseErrors {
    let mut parser = Parser::from_source(source, type_names());
    parser.parse_program().expect_err("program should not parse")
}

fn type_names() -> HashSet<String> {
    TypeSystem::new().names().into_iter().collect()
}

fn statements(node: Node) -> Vec<Node> {
    match node.kind {
        NodeKind::Program(stmts) => stmts,
        other => panic!("expected a program, got {:?}", other),
    }
}

fn first(source: &str) -> Node {
    statements(parse(source)).remove(0)
}

#[test]
fn multiplication_binds_tighter_than_addition() {
    let node = first("1 + 4 * 3;");
    let NodeKind::Binary { op: BinOp::Add, rhs, .. } = node.kind else {
        panic!("expected addition at the root, got {:?}", node.kind);
    };
    assert!(matches!(rhs.kind, NodeKind::Binary { op: BinOp::Mul, .. }));
}

#[test]
fn exponent_is_right_associative() {
    let node = first("2 ** 3 ** 2;");
    let NodeKind::Binary { op: BinOp::Pow, lhs, rhs } = node.kind else {
        panic!("expected exponent at the root");
    };
    assert!(matches!(lhs.kind, NodeKind::IntLit(2)));
    assert!(matches!(rhs.kind, NodeKind::Binary { op: BinOp::Pow, .. }));
}

#[test]
fn assignment_is_right_associative() {
    let node = first("a = b = 1;");
    let NodeKind::Assign { op: AssignOp::Assign, value, .. } = node.kind else {
        panic!("expected assignment at the root");
    };
    assert!(matches!(value.kind, NodeKind::Assign { .. }));
}

#[test]
fn ternary_nests_in_the_else_arm() {
    let node = first("a ? 1 : b ? 2 : 3;");
    let NodeKind::Cond { els, .. } = node.kind else {
        panic!("expected a conditional");
    };
    assert!(matches!(els.unwrap().kind, NodeKind::Cond { .. }));
}

#[test]
fn word_operators_bind_loosest() {
    let node = first("a == 1 and b == 2;");
    let NodeKind::Logical { op: LogicOp::And, lhs, rhs } = node.kind else {
        panic!("expected 'and' at the root");
    };
    assert!(matches!(lhs.kind, NodeKind::Binary { op: BinOp::Eq, .. }));
    assert!(matches!(rhs.kind, NodeKind::Binary { op: BinOp::Eq, .. }));

    let node = first("not a == b;");
    let NodeKind::Unary { op: UnOp::Not, expr } = node.kind else {
        panic!("expected low 'not' at the root");
    };
    assert!(matches!(expr.kind, NodeKind::Binary { op: BinOp::Eq, .. }));
}

#[test]
fn postfix_forms_chain_left_to_right() {
    let node = first("m.x[0](1);");
    let NodeKind::Call { target, args } = node.kind else {
        panic!("expected a call at the root");
    };
    assert_eq!(args.len(), 1);
    let NodeKind::Access { target: dot, .. } = target.kind else {
        panic!("expected indexing under the call");
    };
    assert!(matches!(dot.kind, NodeKind::Dot { .. }));
}

#[test]
fn named_arguments_are_recognized_by_backtracking() {
    let node = first("f(1, b = 2);");
    let NodeKind::Call { args, .. } = node.kind else {
        panic!("expected a call");
    };
    assert!(matches!(args[0].kind, NodeKind::IntLit(1)));
    assert!(matches!(&args[1].kind, NodeKind::NamedArg { name, .. } if name == "b"));

    // A parenthesized expression is not a named argument.
    let node = first("f((b) == 2);");
    let NodeKind::Call { args, .. } = node.kind else {
        panic!("expected a call");
    };
    assert!(matches!(args[0].kind, NodeKind::Binary { op: BinOp::Eq, .. }));
}

#[test]
fn function_definitions_carry_signature() {
    let node = first("fn add(a: Real, b: Real = 2) -> Real a + b;");
    let NodeKind::FuncDef(def) = node.kind else {
        panic!("expected a function definition");
    };
    assert_eq!(def.name.as_deref(), Some("add"));
    let params = def.params.borrow();
    assert_eq!(params.len(), 2);
    assert_eq!(params[0].name, "a");
    assert_eq!(params[0].ty, Type::real());
    assert!(params[0].default.is_none());
    assert!(params[1].default.is_some());
    assert_eq!(*def.ret.borrow(), Type::real());
}

#[test]
fn parameters_after_defaults_must_default() {
    let errors = parse_err("fn f(a = 1, b) a;");
    assert!(errors.0[0].message.contains("default"));
}

#[test]
fn union_annotations_normalize() {
    let node = first("var a: String | Integer | String;");
    let NodeKind::VarDecl { ty, .. } = node.kind else {
        panic!("expected a declaration");
    };
    assert_eq!(ty, Type::Union(vec![Type::integer(), Type::string()]));
}

#[test]
fn try_distinguishes_conditions_from_handlers() {
    let node = first(r#"try x catch ("boom") 1 catch 2;"#);
    let NodeKind::Try { catches, .. } = node.kind else {
        panic!("expected a try");
    };
    assert_eq!(catches.len(), 2);
    assert!(catches[0].cond.is_some());
    assert!(catches[1].cond.is_none());

    // A parenthesized handler on a bare catch stays a handler.
    let node = first("try x catch (1);");
    let NodeKind::Try { catches, .. } = node.kind else {
        panic!("expected a try");
    };
    assert!(matches!(&catches[..], [Catch { cond: None, .. }]));
}

#[test]
fn blocks_are_parenthesized_sequences() {
    let node = first("(1; 2; 3);");
    let NodeKind::Block(stmts) = node.kind else {
        panic!("expected a block, got {:?}", node.kind);
    };
    assert_eq!(stmts.len(), 3);

    // A single parenthesized expression is plain grouping.
    let node = first("(1 + 2) * 3;");
    assert!(matches!(node.kind, NodeKind::Binary { op: BinOp::Mul, .. }));
}

#[test]
fn qualified_identifiers_keep_their_path() {
    let node = first("Math::Trig::sin;");
    let NodeKind::QualIdent { module, name } = node.kind else {
        panic!("expected a qualified identifier");
    };
    assert_eq!(module, "Math::Trig");
    assert_eq!(name, "sin");
}

#[test]
fn ranges_and_interpolation() {
    let node = first("1..5;");
    assert!(matches!(node.kind, NodeKind::Range { .. }));

    let node = first(r#"$"total: {a + b}";"#);
    let NodeKind::InterpLit(raw) = node.kind else {
        panic!("expected an interpolated literal");
    };
    assert_eq!(raw, "total: {a + b}");
}

#[test]
fn keyword_statement_forms() {
    let stmts = statements(parse(
        "while (a < 3) a += 1; if a then 1 else 2; type Id : Integer; module A::B; import C as D;",
    ));
    assert!(matches!(stmts[0].kind, NodeKind::While { .. }));
    assert!(matches!(stmts[1].kind, NodeKind::Cond { .. }));
    assert!(matches!(&stmts[2].kind, NodeKind::TypeDecl { name, parent: Some(p), .. }
        if name == "Id" && p == "Integer"));
    assert!(matches!(&stmts[3].kind, NodeKind::ModuleDecl(p) if p == "A::B"));
    assert!(matches!(&stmts[4].kind, NodeKind::Import { path, alias: Some(a) }
        if path == "C" && a == "D"));
}

#[test]
fn a_declared_type_name_is_recognized_downstream() {
    let stmts = statements(parse("type Id : Integer; var x: Id = 1;"));
    assert!(matches!(&stmts[1].kind, NodeKind::VarDecl { ty, .. }
        if *ty == Type::simple("Id")));
}

#[test]
fn else_without_if_is_a_diagnostic() {
    let errors = parse_err("else 1;");
    assert!(errors.0[0].message.contains("'else' without a matching 'if'"));
}

#[test]
fn recovery_continues_at_the_next_terminator() {
    // The bad statement is reported; the rest parses and a second
    // error is found, but nothing after the abort threshold.
    let errors = parse_err("var 1; var ; var ok = 3; var 2;");
    assert!(errors.0.len() >= 2);
}

#[test]
fn parsing_aborts_after_the_error_limit() {
    let errors = parse_err("@; @; @; @; @; @;");
    // Three recorded diagnostics plus the abort notice.
    assert_eq!(errors.0.len(), super::MAX_PARSE_ERRORS + 1);
    assert!(errors.0.last().unwrap().message.contains("aborting"));
}

#[test]
fn unexpected_other_token_is_reported() {
    let errors = parse_err("a @ b;");
    assert!(errors.0[0].message.contains("';' after expression"));
}
