use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::path::PathBuf;

use crate::ast::{AssignOp, BinOp, IncDec, LogicOp, Node, NodeKind, UnOp};
use crate::builtins::BuiltinRegistry;
use crate::error::{PlangError, RuntimeError};
use crate::modules::{ModuleImporter, Namespace};
use crate::parser::{unescape_string, Parser};
use crate::scope::{ScopeId, Scopes};
use crate::token::Pos;
use crate::types::{Type, TypeSystem};
use crate::validator::Validator;
use crate::value::{Payload, SpecialKind, Value};

/// Default bound on call depth.
pub const MAX_RECURSION: usize = 10_000;
/// Default bound on iterations of a single `while`.
pub const MAX_ITERATIONS: usize = 25_000;

enum Output {
    Stdout,
    Capture(String),
}

/// The interpretation environment: type system, scope arena, builtin
/// registry, module namespace, and the resource limits. One instance
/// drives the whole pipeline; in REPL mode its scopes and namespace
/// persist across `interpret` calls.
pub struct Interpreter {
    pub types: TypeSystem,
    pub scopes: Scopes,
    pub builtins: BuiltinRegistry,
    pub namespace: Namespace,
    pub module_dirs: Vec<PathBuf>,
    pub max_recursion: usize,
    pub max_iterations: usize,
    pub repl: bool,
    pub(crate) recursion_depth: usize,
    pub(crate) vglobal: ScopeId,
    pub(crate) eglobal: ScopeId,
    out: Output,
}

impl Interpreter {
    pub fn new() -> Self {
        let mut scopes = Scopes::new();
        let vglobal = scopes.root();
        let eglobal = scopes.root();
        Interpreter {
            types: TypeSystem::new(),
            scopes,
            builtins: BuiltinRegistry::new(),
            namespace: Namespace::new(),
            module_dirs: vec![PathBuf::from(".")],
            max_recursion: MAX_RECURSION,
            max_iterations: MAX_ITERATIONS,
            repl: false,
            recursion_depth: 0,
            vglobal,
            eglobal,
            out: Output::Stdout,
        }
    }

    pub fn repl() -> Self {
        let mut interp = Interpreter::new();
        interp.repl = true;
        interp
    }

    /// Route `print` into a buffer instead of stdout.
    pub fn capture_output(&mut self) {
        self.out = Output::Capture(String::new());
    }

    pub fn take_output(&mut self) -> String {
        match &mut self.out {
            Output::Capture(buf) => std::mem::take(buf),
            Output::Stdout => String::new(),
        }
    }

    pub(crate) fn emit(&mut self, text: &str) {
        match &mut self.out {
            Output::Stdout => {
                print!("{}", text);
                std::io::stdout().flush().ok();
            }
            Output::Capture(buf) => buf.push_str(text),
        }
    }

    pub(crate) fn type_name_set(&self) -> HashSet<String> {
        self.types.names().into_iter().collect()
    }

    /// Drop all program state. Runs before every interpretation except
    /// in REPL mode, where scopes and namespace persist.
    fn reset(&mut self) {
        self.scopes = Scopes::new();
        self.vglobal = self.scopes.root();
        self.eglobal = self.scopes.root();
        self.namespace = Namespace::new();
        self.types = TypeSystem::new();
        self.recursion_depth = 0;
    }

    /// Parse only, for AST dumping.
    pub fn parse(&mut self, source: &str) -> Result<Node, PlangError> {
        let mut parser = Parser::from_source(source, self.type_name_set());
        Ok(parser.parse_program()?)
    }

    /// The full pipeline: lex/parse, resolve imports, validate, run.
    pub fn interpret(&mut self, source: &str) -> Result<Value, PlangError> {
        if !self.repl {
            self.reset();
        }
        let mut parser = Parser::from_source(source, self.type_name_set());
        let mut program = parser.parse_program()?;
        ModuleImporter::new(self).process(&mut program)?;
        Validator::new(self).validate_program(&mut program)?;
        let value = Evaluator::new(self).eval_program(&program)?;
        Ok(value)
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience entry point: interpret a whole program with a fresh
/// environment.
pub fn interpret(source: &str) -> Result<Value, PlangError> {
    Interpreter::new().interpret(source)
}

/// The tree walk over the validated AST.
pub struct Evaluator<'a> {
    pub interp: &'a mut Interpreter,
}

type EvalResult = Result<Value, RuntimeError>;

impl<'a> Evaluator<'a> {
    pub fn new(interp: &'a mut Interpreter) -> Self {
        Evaluator { interp }
    }

    pub fn eval_program(&mut self, program: &Node) -> EvalResult {
        let global = self.interp.eglobal;
        self.eval(global, program)
    }

    pub fn eval(&mut self, scope: ScopeId, node: &Node) -> EvalResult {
        let pos = node.pos;
        match &node.kind {
            NodeKind::Program(stmts) => {
                let mut result = Value::null();
                for stmt in stmts {
                    result = self.eval(scope, stmt)?;
                    if result.is_special() {
                        return Ok(result);
                    }
                }
                Ok(result)
            }
            NodeKind::Nop => Ok(Value::null()),

            NodeKind::IntLit(i) => Ok(Value::integer(*i)),
            NodeKind::RealLit(r) => Ok(Value::real(*r)),
            NodeKind::BoolLit(b) => Ok(Value::boolean(*b)),
            NodeKind::NullLit => Ok(Value::null()),
            NodeKind::StrLit(s) => Ok(Value::string(s.clone())),
            NodeKind::InterpLit(raw) => self.interpolate(scope, raw, pos),

            NodeKind::Ident(name) => self.eval_ident(scope, name, pos),
            NodeKind::QualIdent { module, name } => {
                match self.interp.namespace.symbol_scope(module) {
                    Some(mscope) => match self.interp.scopes.lookup(mscope, name) {
                        Some((_, value)) => Ok(value),
                        None => Err(RuntimeError::fatal(
                            format!("module {} has no symbol '{}'", module, name),
                            pos,
                        )),
                    },
                    None => Err(RuntimeError::fatal(format!("unknown module {}", module), pos)),
                }
            }

            NodeKind::Block(stmts) => {
                let inner = self.interp.scopes.child(scope);
                let mut result = Value::null();
                for stmt in stmts {
                    result = self.eval(inner, stmt)?;
                    if result.is_special() {
                        break;
                    }
                }
                Ok(result)
            }

            NodeKind::VarDecl { name, ty, init } => {
                let value = match init {
                    Some(node) => self.eval(scope, node)?,
                    None => Value::dummy(ty.clone()),
                };
                self.interp.scopes.declare(scope, name, value.clone());
                Ok(value)
            }

            NodeKind::Assign { op, target, value } => {
                let new = match op {
                    AssignOp::Assign => self.eval(scope, value)?,
                    _ => {
                        let old = self.eval(scope, target)?;
                        let rhs = self.eval(scope, value)?;
                        let bin = match op {
                            AssignOp::Add => BinOp::Add,
                            AssignOp::Sub => BinOp::Sub,
                            AssignOp::Mul => BinOp::Mul,
                            AssignOp::Div => BinOp::Div,
                            _ => BinOp::Concat,
                        };
                        self.apply_binary(bin, old, rhs, pos)?
                    }
                };
                self.assign_into(scope, target, new.clone(), pos)?;
                Ok(new)
            }

            NodeKind::Binary { op, lhs, rhs } => {
                let left = self.eval(scope, lhs)?;
                let right = self.eval(scope, rhs)?;
                self.apply_binary(*op, left, right, pos)
            }

            NodeKind::Logical { op, lhs, rhs } => {
                let left = self.eval(scope, lhs)?;
                let decided = match op {
                    LogicOp::And => !left.is_truthy(),
                    LogicOp::Or => left.is_truthy(),
                };
                if decided {
                    Ok(left)
                } else {
                    self.eval(scope, rhs)
                }
            }

            NodeKind::Unary { op, expr } => {
                let value = self.eval(scope, expr)?;
                match op {
                    UnOp::Not => Ok(Value::boolean(!value.is_truthy())),
                    UnOp::Neg => match &value.data {
                        Payload::Int(i) => Ok(Value::integer(-i)),
                        Payload::Real(r) => Ok(Value::real(-r)),
                        Payload::Bool(b) => Ok(Value::integer(-(*b as i64))),
                        _ => Err(RuntimeError::fatal(
                            format!("cannot negate {}", value.ty),
                            pos,
                        )),
                    },
                    UnOp::Pos => match &value.data {
                        Payload::Int(_) | Payload::Real(_) => Ok(value),
                        Payload::Bool(b) => Ok(Value::integer(*b as i64)),
                        _ => Err(RuntimeError::fatal(
                            format!("cannot apply unary '+' to {}", value.ty),
                            pos,
                        )),
                    },
                }
            }

            NodeKind::Prefix { op, target } | NodeKind::Postfix { op, target } => {
                let old = self.eval(scope, target)?;
                let new = match &old.data {
                    Payload::Int(i) => {
                        Value::integer(if *op == IncDec::Inc { i + 1 } else { i - 1 })
                    }
                    Payload::Real(r) => {
                        Value::real(if *op == IncDec::Inc { r + 1.0 } else { r - 1.0 })
                    }
                    Payload::Bool(b) => {
                        let i = *b as i64;
                        Value::integer(if *op == IncDec::Inc { i + 1 } else { i - 1 })
                    }
                    _ => {
                        return Err(RuntimeError::fatal(
                            format!("cannot increment {}", old.ty),
                            pos,
                        ))
                    }
                };
                self.assign_into(scope, target, new.clone(), pos)?;
                if matches!(node.kind, NodeKind::Prefix { .. }) {
                    Ok(new)
                } else {
                    Ok(old)
                }
            }

            NodeKind::Range { from, to } => {
                let (from, to) = (self.eval(scope, from)?, self.eval(scope, to)?);
                let (from, to) = self.range_bounds(&from, &to, pos)?;
                let items: Vec<Value> = (from..=to).map(Value::integer).collect();
                let mut array = Value::array(items);
                array.ty = Type::Array(Box::new(Type::integer()));
                Ok(array)
            }

            NodeKind::Cond { cond, then, els } => {
                let decided = self.eval(scope, cond)?;
                if decided.is_truthy() {
                    self.eval(scope, then)
                } else {
                    match els {
                        Some(node) => self.eval(scope, node),
                        None => Ok(Value::null()),
                    }
                }
            }

            NodeKind::While { cond, body } => self.eval_while(scope, cond, body, pos),

            NodeKind::Next => Ok(Value::special(SpecialKind::Next, Value::null())),
            NodeKind::Last(value) => {
                let carried = match value {
                    Some(node) => self.eval(scope, node)?,
                    None => Value::null(),
                };
                Ok(Value::special(SpecialKind::Last, carried))
            }
            NodeKind::Return(value) => {
                let carried = match value {
                    Some(node) => self.eval(scope, node)?,
                    None => Value::null(),
                };
                Ok(Value::special(SpecialKind::Return, carried))
            }

            NodeKind::FuncDef(def) => {
                let value = Value::function(def.clone(), scope);
                if let Some(name) = &def.name {
                    self.interp.scopes.declare(scope, name, value.clone());
                }
                Ok(value)
            }

            NodeKind::Call { target, args } => {
                let callee = self.eval(scope, target)?;
                let mut arg_values = Vec::with_capacity(args.len());
                for arg in args {
                    arg_values.push(self.eval(scope, arg)?);
                }
                self.call_value(scope, &callee, arg_values, pos)
            }
            NodeKind::NamedArg { value, .. } => self.eval(scope, value),

            NodeKind::Access { target, key } => self.eval_access(scope, target, key, pos),
            NodeKind::Dot { target, field } => {
                // Normally desugared away; kept equivalent for safety.
                let key = Node::new(NodeKind::StrLit(field.clone()), pos);
                self.eval_access(scope, target, &key, pos)
            }

            NodeKind::ArrayLit(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(scope, item)?);
                }
                let elem_types: Vec<Type> = values.iter().map(|v| v.ty.clone()).collect();
                let mut array = Value::array(values);
                if !elem_types.is_empty() {
                    array.ty = Type::Array(Box::new(self.interp.types.unite(&elem_types)));
                }
                Ok(array)
            }

            NodeKind::MapLit(entries) => {
                let mut map = BTreeMap::new();
                let mut props = Vec::new();
                for (key_node, value_node) in entries {
                    let key = self.eval(scope, key_node)?;
                    let Some(key) = key.as_str().map(str::to_string) else {
                        return Err(RuntimeError::fatal(
                            format!("map key must be a String, got {}", key.ty),
                            key_node.pos,
                        ));
                    };
                    let value = self.eval(scope, value_node)?;
                    props.push((key.clone(), value.ty.clone()));
                    map.insert(key, value);
                }
                let mut value = Value::map(map);
                value.ty = Type::Map(props);
                Ok(value)
            }

            NodeKind::Exists(access) => {
                let NodeKind::Access { target, key } = &access.kind else {
                    return Err(RuntimeError::fatal("exists requires a map entry", pos));
                };
                let container = self.eval(scope, target)?;
                let key = self.eval(scope, key)?;
                match (&container.data, key.as_str()) {
                    (Payload::Map(entries), Some(k)) => {
                        Ok(Value::boolean(entries.borrow().contains_key(k)))
                    }
                    _ => Err(RuntimeError::fatal(
                        format!("exists requires a Map, got {}", container.ty),
                        pos,
                    )),
                }
            }

            NodeKind::Delete(target) => self.eval_delete(scope, target, pos),

            NodeKind::Keys(expr) => {
                let value = self.eval(scope, expr)?;
                match &value.data {
                    Payload::Map(entries) => {
                        let keys: Vec<Value> =
                            entries.borrow().keys().map(|k| Value::string(k.as_str())).collect();
                        let mut array = Value::array(keys);
                        array.ty = Type::Array(Box::new(Type::string()));
                        Ok(array)
                    }
                    _ => Err(RuntimeError::fatal(
                        format!("keys requires a Map, got {}", value.ty),
                        pos,
                    )),
                }
            }
            NodeKind::Values(expr) => {
                let value = self.eval(scope, expr)?;
                match &value.data {
                    Payload::Map(entries) => {
                        let values: Vec<Value> = entries.borrow().values().cloned().collect();
                        Ok(Value::array(values))
                    }
                    _ => Err(RuntimeError::fatal(
                        format!("values requires a Map, got {}", value.ty),
                        pos,
                    )),
                }
            }

            NodeKind::Try { body, catches } => self.eval_try(scope, body, catches, pos),
            NodeKind::Throw(expr) => {
                let value = self.eval(scope, expr)?;
                match value.as_str() {
                    Some(s) => Err(RuntimeError::Exception(s.to_string())),
                    None => Err(RuntimeError::fatal(
                        format!("throw requires a String, got {}", value.ty),
                        pos,
                    )),
                }
            }

            // Types are installed during validation; imports are
            // evaluated through the namespace.
            NodeKind::TypeDecl { .. } | NodeKind::ModuleDecl(_) => Ok(Value::null()),
            NodeKind::Import { path, alias } => {
                let key = alias.clone().unwrap_or_else(|| path.clone());
                self.eval_import(&key, pos)
            }
        }
    }

    fn eval_ident(&mut self, scope: ScopeId, name: &str, pos: Pos) -> EvalResult {
        if let Some((_, value)) = self.interp.scopes.lookup(scope, name) {
            return Ok(value);
        }
        if let Some(value) = self.interp.builtins.value_of(name) {
            return Ok(value);
        }
        Err(RuntimeError::fatal(
            format!("undeclared variable '{}'", name),
            pos,
        ))
    }

    fn eval_while(&mut self, scope: ScopeId, cond: &Node, body: &Node, pos: Pos) -> EvalResult {
        let mut result = Value::null();
        let mut iterations = 0usize;
        loop {
            if !self.eval(scope, cond)?.is_truthy() {
                break;
            }
            iterations += 1;
            if iterations > self.interp.max_iterations {
                return Err(RuntimeError::fatal(
                    format!("exceeded maximum iterations ({})", self.interp.max_iterations),
                    pos,
                ));
            }
            let body_scope = self.interp.scopes.child(scope);
            self.interp.scopes.get_mut(body_scope).while_loop = true;
            let value = self.eval(body_scope, body)?;
            match value.special_kind() {
                Some(SpecialKind::Next) => continue,
                Some(SpecialKind::Last) => {
                    result = value.into_carried();
                    break;
                }
                Some(SpecialKind::Return) => return Ok(value),
                None => result = value,
            }
        }
        Ok(result)
    }

    fn eval_try(
        &mut self,
        scope: ScopeId,
        body: &Node,
        catches: &[crate::ast::Catch],
        pos: Pos,
    ) -> EvalResult {
        let thrown = match self.eval(scope, body) {
            Ok(value) => return Ok(value),
            Err(RuntimeError::Exception(message)) => message,
            Err(fatal) => return Err(fatal),
        };

        // The handler scope sees the thrown string as `e: String`.
        let handler_scope = self.interp.scopes.child(scope);
        self.interp
            .scopes
            .declare(handler_scope, "e", Value::string(thrown.clone()));

        let mut default = None;
        for catch in catches {
            match &catch.cond {
                Some(cond) => {
                    let condition = self.eval(handler_scope, cond)?;
                    match condition.as_str() {
                        Some(text) if text == thrown => {
                            return self.eval(handler_scope, &catch.handler);
                        }
                        Some(_) => {}
                        None => {
                            return Err(RuntimeError::fatal(
                                format!("catch condition must be a String, got {}", condition.ty),
                                pos,
                            ))
                        }
                    }
                }
                None => default = Some(&catch.handler),
            }
        }
        match default {
            Some(handler) => self.eval(handler_scope, handler),
            // No default catch survives validation, but stay safe.
            None => Err(RuntimeError::Exception(thrown)),
        }
    }

    fn eval_import(&mut self, key: &str, _pos: Pos) -> EvalResult {
        // The module runs once, in its own scope; repeat imports and
        // qualified references go through the namespace.
        let Some(ast) = self.interp.namespace.take_ast_for_eval(key) else {
            return Ok(Value::null());
        };
        let module_scope = self.interp.scopes.root();
        let result = self.eval(module_scope, &ast);
        self.interp.namespace.finish_eval(key, ast, module_scope);
        result?;
        Ok(Value::null())
    }

    fn eval_delete(&mut self, scope: ScopeId, target: &Node, pos: Pos) -> EvalResult {
        if let NodeKind::Access { target: map_node, key } = &target.kind {
            let container = self.eval(scope, map_node)?;
            let key = self.eval(scope, key)?;
            return match (&container.data, key.as_str()) {
                (Payload::Map(entries), Some(k)) => Ok(entries
                    .borrow_mut()
                    .remove(k)
                    .unwrap_or_else(Value::null)),
                _ => Err(RuntimeError::fatal(
                    format!("delete requires a Map entry, got {}", container.ty),
                    pos,
                )),
            };
        }
        // `delete m` empties the whole map and returns it.
        let container = self.eval(scope, target)?;
        match &container.data {
            Payload::Map(entries) => {
                entries.borrow_mut().clear();
                Ok(container.clone())
            }
            _ => Err(RuntimeError::fatal(
                format!("delete requires a Map, got {}", container.ty),
                pos,
            )),
        }
    }

    fn eval_access(&mut self, scope: ScopeId, target: &Node, key: &Node, pos: Pos) -> EvalResult {
        let container = self.eval(scope, target)?;

        // String range slice: s[i..j], inclusive.
        if let (Payload::Str(s), NodeKind::Range { from, to }) = (&container.data, &key.kind) {
            let from = self.eval(scope, from)?;
            let to = self.eval(scope, to)?;
            let (from, to) = self.range_bounds(&from, &to, pos)?;
            return Ok(Value::string(slice_inclusive(s, from, to)));
        }

        let key = self.eval(scope, key)?;
        match &container.data {
            Payload::Map(entries) => match key.as_str() {
                Some(k) => Ok(entries
                    .borrow()
                    .get(k)
                    .cloned()
                    .unwrap_or_else(Value::null)),
                None => Err(RuntimeError::fatal(
                    format!("map index must be a String, got {}", key.ty),
                    pos,
                )),
            },
            Payload::Array(items) => match key.as_int() {
                Some(idx) => {
                    let items = items.borrow();
                    if idx < 0 || idx as usize >= items.len() {
                        Ok(Value::null())
                    } else {
                        Ok(items[idx as usize].clone())
                    }
                }
                None => Err(RuntimeError::fatal(
                    format!("array index must be a Number, got {}", key.ty),
                    pos,
                )),
            },
            Payload::Str(s) => match key.as_int() {
                Some(idx) => Ok(Value::string(slice_inclusive(s, idx, idx))),
                None => Err(RuntimeError::fatal(
                    format!("string index must be a Number, got {}", key.ty),
                    pos,
                )),
            },
            _ => Err(RuntimeError::fatal(
                format!("cannot index {}", container.ty),
                pos,
            )),
        }
    }

    /// Write `new` through an lvalue expression. Arrays and maps share
    /// their payload, so mutating the container in place is enough;
    /// strings are immutable payloads and splice by writing the rebuilt
    /// string back into their own target.
    fn assign_into(&mut self, scope: ScopeId, target: &Node, new: Value, pos: Pos) -> Result<(), RuntimeError> {
        match &target.kind {
            NodeKind::Ident(name) => {
                match self.interp.scopes.lookup(scope, name) {
                    Some((found_in, _)) => {
                        self.interp.scopes.assign(found_in, name, new);
                        Ok(())
                    }
                    None => Err(RuntimeError::fatal(
                        format!("undeclared variable '{}'", name),
                        pos,
                    )),
                }
            }
            NodeKind::QualIdent { module, name } => {
                match self.interp.namespace.symbol_scope(module) {
                    Some(mscope) => match self.interp.scopes.lookup(mscope, name) {
                        Some((found_in, _)) => {
                            self.interp.scopes.assign(found_in, name, new);
                            Ok(())
                        }
                        None => Err(RuntimeError::fatal(
                            format!("module {} has no symbol '{}'", module, name),
                            pos,
                        )),
                    },
                    None => Err(RuntimeError::fatal(format!("unknown module {}", module), pos)),
                }
            }
            NodeKind::Access { target: inner, key } => {
                let container = self.eval(scope, inner)?;
                match &container.data {
                    Payload::Map(entries) => {
                        let key = self.eval(scope, key)?;
                        let Some(k) = key.as_str().map(str::to_string) else {
                            return Err(RuntimeError::fatal(
                                format!("map index must be a String, got {}", key.ty),
                                pos,
                            ));
                        };
                        entries.borrow_mut().insert(k, new);
                        Ok(())
                    }
                    Payload::Array(items) => {
                        let key = self.eval(scope, key)?;
                        let Some(idx) = key.as_int() else {
                            return Err(RuntimeError::fatal(
                                format!("array index must be a Number, got {}", key.ty),
                                pos,
                            ));
                        };
                        if idx < 0 {
                            return Err(RuntimeError::fatal(
                                format!("array index {} out of range", idx),
                                pos,
                            ));
                        }
                        let mut items = items.borrow_mut();
                        let idx = idx as usize;
                        while items.len() <= idx {
                            items.push(Value::null());
                        }
                        items[idx] = new;
                        Ok(())
                    }
                    Payload::Str(s) => {
                        let Some(fragment) = new.as_str() else {
                            return Err(RuntimeError::fatal(
                                format!("string splice requires a String, got {}", new.ty),
                                pos,
                            ));
                        };
                        let rebuilt = if let NodeKind::Range { from, to } = &key.kind {
                            let from = self.eval(scope, from)?;
                            let to = self.eval(scope, to)?;
                            let (from, to) = self.range_bounds(&from, &to, pos)?;
                            splice_inclusive(s, from, to, fragment)
                        } else {
                            let key = self.eval(scope, key)?;
                            let Some(idx) = key.as_int() else {
                                return Err(RuntimeError::fatal(
                                    format!("string index must be a Number, got {}", key.ty),
                                    pos,
                                ));
                            };
                            splice_inclusive(s, idx, idx, fragment)
                        };
                        self.assign_into(scope, inner, Value::string(rebuilt), pos)
                    }
                    _ => Err(RuntimeError::fatal(
                        format!("cannot index {}", container.ty),
                        pos,
                    )),
                }
            }
            NodeKind::Dot { target: inner, field } => {
                let key = Node::new(NodeKind::StrLit(field.clone()), pos);
                let access = Node::new(
                    NodeKind::Access {
                        target: inner.clone(),
                        key: Box::new(key),
                    },
                    pos,
                );
                self.assign_into(scope, &access, new, pos)
            }
            _ => Err(RuntimeError::fatal("cannot assign to this expression", pos)),
        }
    }

    /// Invoke a function or builtin value with fully evaluated,
    /// positional arguments.
    pub fn call_value(
        &mut self,
        scope: ScopeId,
        callee: &Value,
        args: Vec<Value>,
        pos: Pos,
    ) -> EvalResult {
        match &callee.data {
            Payload::Builtin(name) => {
                let name = name.clone();
                crate::builtins::dispatch(self, scope, &name, args, pos)
            }
            Payload::Func(func) => {
                self.interp.recursion_depth += 1;
                if self.interp.recursion_depth > self.interp.max_recursion {
                    self.interp.recursion_depth -= 1;
                    return Err(RuntimeError::fatal(
                        format!("exceeded maximum recursion depth ({})", self.interp.max_recursion),
                        pos,
                    ));
                }
                let def = func.def.clone();
                let params = def.params.borrow().clone();
                if args.len() > params.len() {
                    self.interp.recursion_depth -= 1;
                    return Err(RuntimeError::fatal(
                        format!(
                            "too many arguments: expected {}, got {}",
                            params.len(),
                            args.len()
                        ),
                        pos,
                    ));
                }
                let frame = self.interp.scopes.call(func.env, def.name.clone());
                let mut args = args.into_iter();
                let mut outcome = Ok(Value::null());
                for param in &params {
                    let value = match args.next() {
                        Some(value) => value,
                        None => match &param.default {
                            Some(default) => match self.eval(frame, default) {
                                Ok(value) => value,
                                Err(e) => {
                                    outcome = Err(e);
                                    break;
                                }
                            },
                            None => {
                                outcome = Err(RuntimeError::fatal(
                                    format!("missing argument for parameter '{}'", param.name),
                                    pos,
                                ));
                                break;
                            }
                        },
                    };
                    self.interp.scopes.declare(frame, &param.name, value);
                }
                if outcome.is_ok() {
                    // Bind the function's own name for recursion even
                    // when the definition was anonymous-then-assigned.
                    if let Some(name) = &def.name {
                        if self.interp.scopes.lookup(frame, name).is_none() {
                            self.interp.scopes.declare(frame, name, callee.clone());
                        }
                    }
                    let body = def.body.borrow();
                    outcome = self.eval(frame, &body);
                }
                self.interp.recursion_depth -= 1;
                outcome.map(Value::into_carried)
            }
            _ => Err(RuntimeError::fatal(
                format!("cannot call {}", callee.ty),
                pos,
            )),
        }
    }

    fn range_bounds(&self, from: &Value, to: &Value, pos: Pos) -> Result<(i64, i64), RuntimeError> {
        match (from.as_int(), to.as_int()) {
            (Some(a), Some(b)) => Ok((a, b)),
            _ => Err(RuntimeError::fatal(
                format!("range bounds must be Numbers, got {} and {}", from.ty, to.ty),
                pos,
            )),
        }
    }

    fn apply_binary(&mut self, op: BinOp, left: Value, right: Value, pos: Pos) -> EvalResult {
        use BinOp::*;

        let left_str = matches!(left.data, Payload::Str(_));
        let right_str = matches!(right.data, Payload::Str(_));

        match op {
            Eq | NotEq => {
                let flipped = op == NotEq;
                if matches!(left.data, Payload::Func(_) | Payload::Builtin(_))
                    || matches!(right.data, Payload::Func(_) | Payload::Builtin(_))
                {
                    // Function identity is never compared.
                    return Ok(Value::boolean(flipped));
                }
                let equal = if left_str || right_str {
                    match (self.coerce_str(&left, pos), self.coerce_str(&right, pos)) {
                        (Ok(a), Ok(b)) => a == b,
                        _ => left.value_eq(&right),
                    }
                } else {
                    left.value_eq(&right)
                };
                Ok(Value::boolean(equal != flipped))
            }
            Less | LessEq | Greater | GreaterEq => {
                if left_str || right_str {
                    let a = self.coerce_str(&left, pos)?;
                    let b = self.coerce_str(&right, pos)?;
                    let holds = match op {
                        Less => a < b,
                        LessEq => a <= b,
                        Greater => a > b,
                        _ => a >= b,
                    };
                    return Ok(Value::boolean(holds));
                }
                let (a, b) = self.numeric_pair(&left, &right, op, pos)?;
                let holds = match op {
                    Less => a < b,
                    LessEq => a <= b,
                    Greater => a > b,
                    _ => a >= b,
                };
                Ok(Value::boolean(holds))
            }
            Concat => {
                let a = self.coerce_str(&left, pos)?;
                let b = self.coerce_str(&right, pos)?;
                Ok(Value::string(format!("{}{}", a, b)))
            }
            IndexOf => {
                let haystack = self.coerce_str(&left, pos)?;
                let needle = self.coerce_str(&right, pos)?;
                let index = haystack
                    .char_indices()
                    .enumerate()
                    .find(|(_, (byte, _))| haystack[*byte..].starts_with(needle.as_str()))
                    .map(|(char_idx, _)| char_idx as i64)
                    .unwrap_or(-1);
                Ok(Value::integer(index))
            }
            Add | Sub | Mul | Div | Rem | Pow => self.arithmetic(op, &left, &right, pos),
        }
    }

    fn arithmetic(&self, op: BinOp, left: &Value, right: &Value, pos: Pos) -> EvalResult {
        use BinOp::*;
        let both_int = left.as_number().is_some()
            && right.as_number().is_some()
            && !matches!(left.data, Payload::Real(_))
            && !matches!(right.data, Payload::Real(_));

        let (a, b) = self.numeric_pair(left, right, op, pos)?;

        if both_int {
            let (ia, ib) = (left.as_int().unwrap(), right.as_int().unwrap());
            match op {
                Add => {
                    if let Some(v) = ia.checked_add(ib) {
                        return Ok(Value::integer(v));
                    }
                }
                Sub => {
                    if let Some(v) = ia.checked_sub(ib) {
                        return Ok(Value::integer(v));
                    }
                }
                Mul => {
                    if let Some(v) = ia.checked_mul(ib) {
                        return Ok(Value::integer(v));
                    }
                }
                Div => {
                    if ib == 0 {
                        return Err(RuntimeError::Exception(
                            "Illegal division by zero".to_string(),
                        ));
                    }
                    // Exact divisions stay Integer; the rest widen.
                    if ia % ib == 0 {
                        return Ok(Value::integer(ia / ib));
                    }
                    return Ok(Value::real(ia as f64 / ib as f64));
                }
                Rem => {
                    if ib == 0 {
                        return Err(RuntimeError::Exception(
                            "Illegal modulus zero".to_string(),
                        ));
                    }
                    return Ok(Value::integer(ia % ib));
                }
                Pow => {
                    if ib >= 0 {
                        if let Ok(exp) = u32::try_from(ib) {
                            if let Some(v) = ia.checked_pow(exp) {
                                return Ok(Value::integer(v));
                            }
                        }
                    }
                }
                _ => unreachable!("handled by caller"),
            }
        }

        match op {
            Add => Ok(Value::real(a + b)),
            Sub => Ok(Value::real(a - b)),
            Mul => Ok(Value::real(a * b)),
            Div => {
                if b == 0.0 {
                    Err(RuntimeError::Exception("Illegal division by zero".to_string()))
                } else {
                    Ok(Value::real(a / b))
                }
            }
            Rem => {
                if b == 0.0 {
                    Err(RuntimeError::Exception("Illegal modulus zero".to_string()))
                } else {
                    Ok(Value::real(a % b))
                }
            }
            Pow => Ok(Value::real(a.powf(b))),
            _ => unreachable!("handled above"),
        }
    }

    fn numeric_pair(
        &self,
        left: &Value,
        right: &Value,
        op: BinOp,
        pos: Pos,
    ) -> Result<(f64, f64), RuntimeError> {
        match (left.as_number(), right.as_number()) {
            (Some(a), Some(b)) => Ok((a, b)),
            _ => Err(RuntimeError::fatal(
                format!("cannot apply '{}' to {} and {}", op, left.ty, right.ty),
                pos,
            )),
        }
    }

    /// String-side coercion: Numbers become the one-character string of
    /// their code point.
    fn coerce_str(&self, value: &Value, pos: Pos) -> Result<String, RuntimeError> {
        match &value.data {
            Payload::Str(s) => Ok(s.clone()),
            Payload::Int(i) => match u32::try_from(*i).ok().and_then(char::from_u32) {
                Some(c) => Ok(c.to_string()),
                None => Err(RuntimeError::fatal(
                    format!("{} is not a valid code point", i),
                    pos,
                )),
            },
            Payload::Real(r) => match char::from_u32(*r as u32) {
                Some(c) => Ok(c.to_string()),
                None => Err(RuntimeError::fatal(
                    format!("{} is not a valid code point", r),
                    pos,
                )),
            },
            _ => Err(RuntimeError::fatal(
                format!("expected a String, got {}", value.ty),
                pos,
            )),
        }
    }

    /// Parse and evaluate a source fragment in the given scope; used by
    /// interpolated strings and the Array/Map cast constructors.
    pub(crate) fn eval_snippet(&mut self, scope: ScopeId, source: &str, pos: Pos) -> EvalResult {
        let mut parser = Parser::from_source(source, self.interp.type_name_set());
        let program = parser.parse_program().map_err(|errors| {
            RuntimeError::fatal(
                format!("invalid embedded expression '{}': {}", source, errors),
                pos,
            )
        })?;
        let mut result = Value::null();
        if let NodeKind::Program(stmts) = &program.kind {
            for stmt in stmts {
                result = self.eval(scope, stmt)?;
            }
        }
        Ok(result)
    }

    /// `$"… {expr} …"`: literal text around balanced `{…}` segments,
    /// each segment run through the parse/evaluate pipeline in the
    /// current scope.
    fn interpolate(&mut self, scope: ScopeId, raw: &str, pos: Pos) -> EvalResult {
        let mut out = String::new();
        let mut literal = String::new();
        let mut chars = raw.chars();
        while let Some(c) = chars.next() {
            match c {
                '\\' => {
                    literal.push('\\');
                    if let Some(escaped) = chars.next() {
                        literal.push(escaped);
                    }
                }
                '{' => {
                    let mut depth = 1;
                    let mut segment = String::new();
                    while let Some(inner) = chars.next() {
                        match inner {
                            '{' => {
                                depth += 1;
                                segment.push(inner);
                            }
                            '}' => {
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                                segment.push(inner);
                            }
                            // Quotes arrive escaped from the enclosing
                            // literal; the embedded parser wants them bare.
                            '\\' => match chars.next() {
                                Some(q @ ('"' | '\'')) => segment.push(q),
                                Some(other) => {
                                    segment.push('\\');
                                    segment.push(other);
                                }
                                None => segment.push('\\'),
                            },
                            _ => segment.push(inner),
                        }
                    }
                    if depth != 0 {
                        return Err(RuntimeError::fatal(
                            "unterminated '{' in interpolated string",
                            pos,
                        ));
                    }
                    out.push_str(&unescape_string(&literal));
                    literal.clear();
                    let value = self.eval_snippet(scope, &segment, pos)?;
                    out.push_str(&value.to_display_string());
                }
                _ => literal.push(c),
            }
        }
        out.push_str(&unescape_string(&literal));
        Ok(Value::string(out))
    }
}

/// Inclusive, 0-based character slice; out-of-range indices clamp to
/// the empty string.
fn slice_inclusive(s: &str, from: i64, to: i64) -> String {
    if from < 0 || to < from {
        return String::new();
    }
    s.chars()
        .skip(from as usize)
        .take((to - from + 1) as usize)
        .collect()
}

/// Replace the inclusive character range with `fragment`.
fn splice_inclusive(s: &str, from: i64, to: i64, fragment: &str) -> String {
    if from < 0 || to < from {
        return s.to_string();
    }
    let chars: Vec<char> = s.chars().collect();
    let from = (from as usize).min(chars.len());
    let to_excl = ((to + 1) as usize).min(chars.len());
    let mut out: String = chars[..from].iter().collect();
    out.push_str(fragment);
    out.extend(chars[to_excl..].iter());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_slicing_helpers() {
        assert_eq!(slice_inclusive("hello", 1, 3), "ell");
        assert_eq!(slice_inclusive("hello", 4, 4), "o");
        assert_eq!(slice_inclusive("hello", 9, 12), "");
        assert_eq!(splice_inclusive("hello", 0, 0, "J"), "Jello");
        assert_eq!(splice_inclusive("hello", 1, 3, "ipp"), "hippo");
    }
}
