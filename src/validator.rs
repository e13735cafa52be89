use std::collections::HashSet;
use std::rc::Rc;

use crate::ast::{AssignOp, BinOp, Catch, Node, NodeKind, Param, UnOp};
use crate::error::ValidateError;
use crate::interpreter::Interpreter;
use crate::scope::ScopeId;
use crate::suggest::find_similar;
use crate::token::Pos;
use crate::types::{Type, TypeSystem};
use crate::value::{Function, Payload, Value};

type VResult = Result<Value, ValidateError>;

/// The static pass. It runs the evaluator's dispatch shape with
/// type-tracking semantics: every node produces a `Value` whose type is
/// the inferred static type and whose payload is usually a dummy. Along
/// the way it rewrites the tree — dot access to bracket access, named
/// arguments to positional form with defaults filled in, inferred
/// return types into their definitions.
pub struct Validator<'a> {
    interp: &'a mut Interpreter,
    /// One frame per function body being validated; `return` statements
    /// record their types into the innermost frame.
    return_types: Vec<Vec<Type>>,
    /// Function bodies currently being validated, by identity; a
    /// recursive call inside one sees its declared type instead of
    /// descending again.
    validating: HashSet<usize>,
}

impl<'a> Validator<'a> {
    pub fn new(interp: &'a mut Interpreter) -> Self {
        Validator {
            interp,
            return_types: Vec::new(),
            validating: HashSet::new(),
        }
    }

    pub fn validate_program(&mut self, program: &mut Node) -> Result<(), ValidateError> {
        let global = self.interp.vglobal;
        self.validate(global, program)?;
        Ok(())
    }

    fn types(&self) -> &TypeSystem {
        &self.interp.types
    }

    pub(crate) fn validate(&mut self, scope: ScopeId, node: &mut Node) -> VResult {
        let pos = node.pos;

        // Dot access desugars to bracket access before anything else;
        // no `x.y` survives this pass.
        desugar_dot(node);

        match &mut node.kind {
            NodeKind::Program(stmts) => {
                let mut result = Value::null();
                for stmt in stmts {
                    result = self.validate(scope, stmt)?;
                }
                Ok(result)
            }
            NodeKind::Nop => Ok(Value::null()),

            NodeKind::IntLit(i) => Ok(Value::integer(*i)),
            NodeKind::RealLit(r) => Ok(Value::real(*r)),
            NodeKind::BoolLit(b) => Ok(Value::boolean(*b)),
            NodeKind::NullLit => Ok(Value::null()),
            NodeKind::StrLit(s) => Ok(Value::string(s.clone())),
            NodeKind::InterpLit(_) => Ok(Value::dummy(Type::string())),

            NodeKind::Ident(name) => {
                if let Some((_, value)) = self.interp.scopes.lookup(scope, name) {
                    return Ok(value);
                }
                if let Some(value) = self.interp.builtins.value_of(name) {
                    return Ok(value);
                }
                Err(self.undeclared(scope, name, pos))
            }
            NodeKind::QualIdent { module, name } => {
                match self.interp.namespace.validation_scope(module) {
                    Some(mscope) => match self.interp.scopes.lookup(mscope, name) {
                        Some((_, value)) => Ok(value),
                        None => Err(ValidateError::new(
                            format!("module {} has no symbol '{}'", module, name),
                            pos,
                        )),
                    },
                    None => Err(ValidateError::new(format!("unknown module {}", module), pos)),
                }
            }

            NodeKind::Block(stmts) => {
                let inner = self.interp.scopes.child(scope);
                let mut result = Value::null();
                for stmt in stmts {
                    result = self.validate(inner, stmt)?;
                }
                Ok(result)
            }

            NodeKind::VarDecl { name, ty, init } => {
                if self.interp.builtins.contains(name) {
                    return Err(ValidateError::new(
                        format!("cannot override builtin function '{}'", name),
                        pos,
                    ));
                }
                if self.interp.scopes.declared_here(scope, name) && !self.interp.repl {
                    return Err(ValidateError::new(
                        format!("redeclaration of variable '{}'", name),
                        pos,
                    ));
                }
                let (value, guard) = match init {
                    Some(node) => {
                        let v = self.validate(scope, node)?;
                        if ty.is_any() {
                            // Gradual narrowing: the initializer's type
                            // becomes the guard.
                            let guard = v.ty.clone();
                            (v, guard)
                        } else {
                            if !self.types().check(ty, &v.ty) {
                                return Err(ValidateError::new(
                                    format!(
                                        "cannot assign {} to variable '{}' of type {}",
                                        v.ty, name, ty
                                    ),
                                    pos,
                                ));
                            }
                            (Value::dummy(ty.clone()), ty.clone())
                        }
                    }
                    None => (Value::dummy(ty.clone()), ty.clone()),
                };
                self.interp.scopes.declare(scope, name, value.clone());
                self.interp.scopes.set_guard(scope, name, guard);
                Ok(value)
            }

            NodeKind::Assign { op, target, value } => {
                if !target.is_lvalue() {
                    return Err(ValidateError::new("cannot assign to this expression", pos));
                }
                let v = self.validate(scope, value)?;
                let bin = match op {
                    AssignOp::Assign => None,
                    AssignOp::Add => Some(BinOp::Add),
                    AssignOp::Sub => Some(BinOp::Sub),
                    AssignOp::Mul => Some(BinOp::Mul),
                    AssignOp::Div => Some(BinOp::Div),
                    AssignOp::Concat => Some(BinOp::Concat),
                };
                match &mut target.kind {
                    NodeKind::Ident(name) => {
                        let name = name.clone();
                        let Some((found_in, old)) = self.interp.scopes.lookup(scope, &name)
                        else {
                            return Err(self.undeclared(scope, &name, pos));
                        };
                        let result_ty = match bin {
                            Some(op) => self.binary_type(op, &old.ty, &v.ty, pos)?,
                            None => v.ty.clone(),
                        };
                        if let Some(guard) = self.interp.scopes.guard(scope, &name) {
                            if !self.types().check(&guard, &result_ty) {
                                return Err(ValidateError::new(
                                    format!(
                                        "cannot assign {} to variable '{}' of type {}",
                                        result_ty, name, guard
                                    ),
                                    pos,
                                ));
                            }
                        }
                        self.interp
                            .scopes
                            .assign(found_in, &name, Value::dummy(result_ty.clone()));
                        Ok(Value::dummy(result_ty))
                    }
                    NodeKind::QualIdent { .. } => {
                        let old = self.validate(scope, target)?;
                        let result_ty = match bin {
                            Some(op) => self.binary_type(op, &old.ty, &v.ty, pos)?,
                            None => v.ty.clone(),
                        };
                        Ok(Value::dummy(result_ty))
                    }
                    _ => {
                        // Element assignment: type the access, and hold
                        // string splices to String fragments.
                        let slot = self.validate(scope, target)?;
                        if let NodeKind::Access { target: inner, .. } = &mut target.kind {
                            let container = self.validate(scope, inner)?;
                            if self.types().is_equal(&container.ty, &Type::string())
                                && !self.types().check(&Type::string(), &v.ty)
                            {
                                return Err(ValidateError::new(
                                    format!("string splice requires a String, got {}", v.ty),
                                    pos,
                                ));
                            }
                        }
                        let result_ty = match bin {
                            Some(op) => self.binary_type(op, &slot.ty, &v.ty, pos)?,
                            None => v.ty.clone(),
                        };
                        Ok(Value::dummy(result_ty))
                    }
                }
            }

            NodeKind::Binary { op, lhs, rhs } => {
                let op = *op;
                let l = self.validate(scope, lhs)?;
                let r = self.validate(scope, rhs)?;
                let ty = self.binary_type(op, &l.ty, &r.ty, pos)?;
                Ok(Value::dummy(ty))
            }

            NodeKind::Logical { lhs, rhs, .. } => {
                let l = self.validate(scope, lhs)?;
                let r = self.validate(scope, rhs)?;
                let ty = self.types().unite(&[l.ty, r.ty]);
                Ok(Value::dummy(ty))
            }

            NodeKind::Unary { op, expr } => {
                let op = *op;
                let v = self.validate(scope, expr)?;
                match op {
                    UnOp::Not => Ok(Value::dummy(Type::boolean())),
                    UnOp::Neg | UnOp::Pos => {
                        if v.ty.is_any() {
                            return Ok(Value::dummy(Type::any()));
                        }
                        if !self.types().is_arithmetic(&v.ty) {
                            return Err(ValidateError::new(
                                format!("cannot apply unary '{}' to {}", if op == UnOp::Neg { "-" } else { "+" }, v.ty),
                                pos,
                            ));
                        }
                        let ty = if self.types().is_equal(&v.ty, &Type::boolean()) {
                            Type::integer()
                        } else {
                            v.ty.clone()
                        };
                        Ok(Value::dummy(ty))
                    }
                }
            }

            NodeKind::Prefix { target, .. } | NodeKind::Postfix { target, .. } => {
                if !target.is_lvalue() {
                    return Err(ValidateError::new(
                        "'++' and '--' require a variable or element target",
                        pos,
                    ));
                }
                let v = self.validate(scope, target)?;
                if v.ty.is_any() {
                    return Ok(Value::dummy(Type::any()));
                }
                if !self.types().is_arithmetic(&v.ty) {
                    return Err(ValidateError::new(
                        format!("cannot increment {}", v.ty),
                        pos,
                    ));
                }
                let ty = if self.types().is_equal(&v.ty, &Type::boolean()) {
                    Type::integer()
                } else {
                    v.ty.clone()
                };
                Ok(Value::dummy(ty))
            }

            NodeKind::Range { from, to } => {
                for bound in [from, to] {
                    let v = self.validate(scope, bound)?;
                    if !v.ty.is_any() && !self.types().is_arithmetic(&v.ty) {
                        return Err(ValidateError::new(
                            format!("range bounds must be Numbers, got {}", v.ty),
                            bound.pos,
                        ));
                    }
                }
                Ok(Value::dummy(Type::Array(Box::new(Type::integer()))))
            }

            NodeKind::Cond { cond, then, els } => {
                self.validate(scope, cond)?;
                let t = self.validate(scope, then)?;
                let e = match els {
                    Some(node) => self.validate(scope, node)?,
                    None => Value::null(),
                };
                Ok(Value::dummy(self.types().unite(&[t.ty, e.ty])))
            }

            NodeKind::While { cond, body } => {
                self.validate(scope, cond)?;
                let body_scope = self.interp.scopes.child(scope);
                self.interp.scopes.get_mut(body_scope).while_loop = true;
                let v = self.validate(body_scope, body)?;
                Ok(Value::dummy(v.ty))
            }

            NodeKind::Next => {
                if !self.interp.scopes.in_loop(scope) {
                    return Err(ValidateError::new("'next' outside of a while loop", pos));
                }
                Ok(Value::null())
            }
            NodeKind::Last(value) => {
                if !self.interp.scopes.in_loop(scope) {
                    return Err(ValidateError::new("'last' outside of a while loop", pos));
                }
                match value {
                    Some(node) => self.validate(scope, node),
                    None => Ok(Value::null()),
                }
            }
            NodeKind::Return(value) => {
                if self.interp.scopes.enclosing_function(scope).is_none() {
                    return Err(ValidateError::new("'return' outside of a function", pos));
                }
                let v = match value {
                    Some(node) => self.validate(scope, node)?,
                    None => Value::null(),
                };
                if let Some(frame) = self.return_types.last_mut() {
                    frame.push(v.ty.clone());
                }
                Ok(v)
            }

            NodeKind::FuncDef(def) => {
                let def = def.clone();
                self.validate_func_def(scope, def, pos)
            }

            NodeKind::Call { .. } => self.validate_call(scope, node),
            NodeKind::NamedArg { value, .. } => self.validate(scope, value),

            NodeKind::Access { .. } => self.validate_access(scope, node),

            NodeKind::ArrayLit(items) => {
                let mut elem_types = Vec::new();
                for item in items.iter_mut() {
                    let v = self.validate(scope, item)?;
                    elem_types.push(v.ty);
                }
                let elem = if elem_types.is_empty() {
                    Type::any()
                } else {
                    self.types().unite(&elem_types)
                };
                Ok(Value::dummy(Type::Array(Box::new(elem))))
            }

            NodeKind::MapLit(entries) => {
                let mut props = Vec::new();
                for (key, value) in entries.iter_mut() {
                    let key_pos = key.pos;
                    match &key.kind {
                        NodeKind::StrLit(name) => {
                            let name = name.clone();
                            let v = self.validate(scope, value)?;
                            props.push((name, v.ty));
                        }
                        // An identifier key names a declared String
                        // variable whose value is the key.
                        _ => {
                            let k = self.validate(scope, key)?;
                            if !self.types().check(&Type::string(), &k.ty) {
                                return Err(ValidateError::new(
                                    format!("map key must be a String, got {}", k.ty),
                                    key_pos,
                                ));
                            }
                            self.validate(scope, value)?;
                        }
                    }
                }
                Ok(Value::dummy(Type::Map(props)))
            }

            NodeKind::Exists(inner) => {
                desugar_dot(inner);
                let NodeKind::Access { target, key } = &mut inner.kind else {
                    return Err(ValidateError::new(
                        "'exists' requires a map entry like m[key]",
                        pos,
                    ));
                };
                let t = self.validate(scope, target)?;
                self.require_map("exists", &t.ty, pos)?;
                let k = self.validate(scope, key)?;
                if !self.types().check(&Type::string(), &k.ty) {
                    return Err(ValidateError::new(
                        format!("map key must be a String, got {}", k.ty),
                        pos,
                    ));
                }
                Ok(Value::dummy(Type::boolean()))
            }

            NodeKind::Delete(target) => {
                desugar_dot(target);
                if let NodeKind::Access { target: map_node, key } = &mut target.kind {
                    let t = self.validate(scope, map_node)?;
                    self.require_map("delete", &t.ty, pos)?;
                    let k = self.validate(scope, key)?;
                    if !self.types().check(&Type::string(), &k.ty) {
                        return Err(ValidateError::new(
                            format!("map key must be a String, got {}", k.ty),
                            pos,
                        ));
                    }
                    return Ok(Value::dummy(Type::any()));
                }
                let t = self.validate(scope, target)?;
                self.require_map("delete", &t.ty, pos)?;
                Ok(Value::dummy(t.ty))
            }

            NodeKind::Keys(expr) => {
                let v = self.validate(scope, expr)?;
                self.require_map("keys", &v.ty, pos)?;
                Ok(Value::dummy(Type::Array(Box::new(Type::string()))))
            }
            NodeKind::Values(expr) => {
                let v = self.validate(scope, expr)?;
                self.require_map("values", &v.ty, pos)?;
                Ok(Value::dummy(Type::simple("Array")))
            }

            NodeKind::Try { body, catches } => self.validate_try(scope, body, catches, pos),

            NodeKind::Throw(expr) => {
                let v = self.validate(scope, expr)?;
                if !self.types().check(&Type::string(), &v.ty) {
                    return Err(ValidateError::new(
                        format!("throw requires a String, got {}", v.ty),
                        pos,
                    ));
                }
                Ok(Value::null())
            }

            NodeKind::TypeDecl { name, parent, alias } => {
                let outcome = match (&parent, &alias) {
                    (Some(parent), _) => self.interp.types.add_subtype(name, parent),
                    (None, Some(ty)) => self.interp.types.add_alias(name, ty.clone()),
                    (None, None) => self.interp.types.add_subtype(name, "Any"),
                };
                outcome.map_err(|message| ValidateError::new(message, pos))?;
                Ok(Value::null())
            }

            NodeKind::ModuleDecl(_) => Ok(Value::null()),

            NodeKind::Import { path, alias } => {
                let key = alias.clone().unwrap_or_else(|| path.clone());
                if let Some(mut ast) = self.interp.namespace.take_ast_for_validation(&key) {
                    let module_scope = self.interp.scopes.root();
                    let outcome = self.validate(module_scope, &mut ast);
                    self.interp
                        .namespace
                        .finish_validation(&key, ast, module_scope);
                    outcome?;
                }
                Ok(Value::null())
            }

            NodeKind::Dot { .. } => unreachable!("desugared above"),
        }
    }

    fn undeclared(&self, scope: ScopeId, name: &str, pos: Pos) -> ValidateError {
        let mut candidates = self.interp.scopes.visible_names(scope);
        candidates.extend(self.interp.builtins.names().into_iter().map(String::from));
        let message = match find_similar(name, candidates.iter().map(String::as_str), 2) {
            Some(hint) => format!("undeclared variable '{}'; did you mean '{}'?", name, hint),
            None => format!("undeclared variable '{}'", name),
        };
        ValidateError::new(message, pos)
    }

    fn require_map(&self, what: &str, ty: &Type, pos: Pos) -> Result<(), ValidateError> {
        let resolved = self.types().resolve(ty);
        let ok = matches!(&resolved, Type::Map(_))
            || matches!(&resolved, Type::Simple(n) if n == "Map" || n == "Any");
        if ok {
            Ok(())
        } else {
            Err(ValidateError::new(
                format!("'{}' requires a Map, got {}", what, ty),
                pos,
            ))
        }
    }

    /// Operator result typing. Mirrors the evaluator: string-side
    /// operators when a String is involved, otherwise arithmetic with
    /// promotion narrowed to the operator's inherent result.
    fn binary_type(&self, op: BinOp, lt: &Type, rt: &Type, pos: Pos) -> Result<Type, ValidateError> {
        use BinOp::*;
        let ts = self.types();
        let lt = ts.resolve(lt);
        let rt = ts.resolve(rt);
        let stringy = |t: &Type| ts.is_equal(t, &Type::string()) || t.is_any();
        let string_compatible =
            |t: &Type| stringy(t) || ts.is_arithmetic(t);

        match op {
            Concat | IndexOf => {
                for t in [&lt, &rt] {
                    if !string_compatible(t) {
                        return Err(ValidateError::new(
                            format!("cannot apply '{}' to {}", op, t),
                            pos,
                        ));
                    }
                }
                Ok(if op == Concat { Type::string() } else { Type::integer() })
            }
            Eq | NotEq => Ok(Type::boolean()),
            Less | LessEq | Greater | GreaterEq => {
                for t in [&lt, &rt] {
                    if !string_compatible(t) {
                        return Err(ValidateError::new(
                            format!("cannot compare {} with '{}'", t, op),
                            pos,
                        ));
                    }
                }
                Ok(Type::boolean())
            }
            Add | Sub | Mul | Div | Rem | Pow => {
                if lt.is_any() && rt.is_any() {
                    return Ok(Type::any());
                }
                for t in [&lt, &rt] {
                    if !t.is_any() && !ts.is_arithmetic(t) {
                        return Err(ValidateError::new(
                            format!("cannot apply '{}' to {} and {}", op, lt, rt),
                            pos,
                        ));
                    }
                }
                let promoted = ts.get_promoted_type(&lt, &rt).ok_or_else(|| {
                    ValidateError::new(
                        format!("no common numeric type for {} and {}", lt, rt),
                        pos,
                    )
                })?;
                // Arithmetic on Booleans yields Integers.
                if ts.is_equal(&promoted, &Type::boolean()) {
                    Ok(Type::integer())
                } else {
                    Ok(promoted)
                }
            }
        }
    }

    fn validate_func_def(&mut self, scope: ScopeId, def: Rc<crate::ast::FuncDef>, pos: Pos) -> VResult {
        // Defaults are typed in a child scope and must match their
        // declared parameter types. Work on a clone so validating a
        // default cannot re-enter the shared definition.
        let defaults_scope = self.interp.scopes.child(scope);
        let mut params = def.params.borrow().clone();
        for param in params.iter_mut() {
            if let Some(default) = &mut param.default {
                let v = self.validate(defaults_scope, default)?;
                if !self.interp.types.check(&param.ty, &v.ty) {
                    return Err(ValidateError::new(
                        format!(
                            "default for parameter '{}' must be {}, got {}",
                            param.name, param.ty, v.ty
                        ),
                        default.pos,
                    ));
                }
            }
        }
        *def.params.borrow_mut() = params;

        let value = Value::function(def.clone(), scope);
        if let Some(name) = &def.name {
            if self.interp.builtins.contains(name) {
                return Err(ValidateError::new(
                    format!("cannot override builtin function '{}'", name),
                    pos,
                ));
            }
            if self.interp.scopes.declared_here(scope, name) && !self.interp.repl {
                return Err(ValidateError::new(
                    format!("redeclaration of function '{}'", name),
                    pos,
                ));
            }
            // Bound before the body is visited, so recursion resolves.
            self.interp.scopes.declare(scope, name, value.clone());
        }

        let Payload::Func(func) = &value.data else { unreachable!() };
        let func = func.clone();
        self.function_return_type(&func, &[], pos)?;

        // The definition's return type may have been rewritten; rebuild
        // the value so its TypeFunc agrees.
        let value = Value::function(def.clone(), scope);
        if let Some(name) = &def.name {
            self.interp.scopes.assign(scope, name, value.clone());
        }
        Ok(value)
    }

    /// Validate a function body in a frame whose closure is the
    /// definition scope, uniting every return point with the final
    /// expression. Cached per function identity; recursion short-
    /// circuits to the declared type.
    fn function_return_type(
        &mut self,
        func: &Rc<Function>,
        arg_types: &[Type],
        pos: Pos,
    ) -> Result<Type, ValidateError> {
        let id = func.id();
        let env = func.env;
        if let Some(cached) = self.interp.scopes.typed_cache_get(env, id) {
            return Ok(cached);
        }
        if self.validating.contains(&id) {
            return Ok(func.def.ret.borrow().clone());
        }
        self.validating.insert(id);

        let def = func.def.clone();
        let frame = self.interp.scopes.call(env, def.name.clone());
        let params = def.params.borrow().clone();
        for (i, param) in params.iter().enumerate() {
            let bound = if param.ty.is_any() {
                arg_types.get(i).cloned().unwrap_or_else(Type::any)
            } else {
                param.ty.clone()
            };
            self.interp
                .scopes
                .declare(frame, &param.name, Value::dummy(bound));
            self.interp
                .scopes
                .set_guard(frame, &param.name, param.ty.clone());
        }
        if let Some(name) = &def.name {
            if self.interp.scopes.lookup(frame, name).is_none() {
                self.interp
                    .scopes
                    .declare(frame, name, Value::function(def.clone(), env));
            }
        }

        self.return_types.push(Vec::new());
        let mut body = def.body.borrow_mut();
        let outcome = self.validate(frame, &mut body);
        drop(body);
        let mut collected = self.return_types.pop().unwrap_or_default();
        self.validating.remove(&id);

        let last = outcome?;
        collected.push(last.ty);
        let united = self.interp.types.unite(&collected);

        let declared = def.ret.borrow().clone();
        let final_ret = if declared.is_any() {
            log::debug!(
                "inferred return type {} for function {}",
                united,
                def.display_name()
            );
            *def.ret.borrow_mut() = united.clone();
            united
        } else {
            if !self.interp.types.check(&declared, &united) {
                return Err(ValidateError::new(
                    format!(
                        "function {} declares return type {} but returns {}",
                        def.display_name(),
                        declared,
                        united
                    ),
                    pos,
                ));
            }
            declared
        };
        self.interp.scopes.typed_cache_insert(env, id, final_ret.clone());
        Ok(final_ret)
    }

    fn validate_call(&mut self, scope: ScopeId, node: &mut Node) -> VResult {
        let pos = node.pos;
        let NodeKind::Call { target, args } = &mut node.kind else {
            unreachable!();
        };
        let callee = self.validate(scope, target)?;
        match &callee.data {
            Payload::Builtin(name) => {
                let name = name.clone();
                self.validate_builtin_call(scope, &name, args, pos)
            }
            Payload::Func(func) => {
                let func = func.clone();
                let fname = func.def.display_name().to_string();
                let params = func.def.params.borrow().clone();
                self.positionalize(&fname, &params, args, pos)?;
                let mut arg_types = Vec::with_capacity(args.len());
                for (arg, param) in args.iter_mut().zip(params.iter()) {
                    let v = self.validate(scope, arg)?;
                    if !self.interp.types.check(&param.ty, &v.ty) {
                        return Err(ValidateError::new(
                            format!(
                                "in call to {}: expected {} for parameter '{}', got {}",
                                fname, param.ty, param.name, v.ty
                            ),
                            arg.pos,
                        ));
                    }
                    arg_types.push(v.ty);
                }
                let ret = self.function_return_type(&func, &arg_types, pos)?;
                Ok(Value::dummy(ret))
            }
            _ => {
                let resolved = self.interp.types.resolve(&callee.ty);
                match resolved {
                    Type::Func { params, ret, .. } => {
                        if args.iter().any(|a| matches!(a.kind, NodeKind::NamedArg { .. })) {
                            return Err(ValidateError::new(
                                "named arguments require a known function",
                                pos,
                            ));
                        }
                        if args.len() != params.len() {
                            return Err(ValidateError::new(
                                format!(
                                    "expected {} arguments, got {}",
                                    params.len(),
                                    args.len()
                                ),
                                pos,
                            ));
                        }
                        for (arg, party) in args.iter_mut().zip(params.iter()) {
                            let v = self.validate(scope, arg)?;
                            if !self.interp.types.check(party, &v.ty) {
                                return Err(ValidateError::new(
                                    format!("expected {} argument, got {}", party, v.ty),
                                    arg.pos,
                                ));
                            }
                        }
                        Ok(Value::dummy(*ret))
                    }
                    Type::Simple(n) if n == "Any" || n == "Function" || n == "Builtin" => {
                        for arg in args.iter_mut() {
                            self.validate(scope, arg)?;
                        }
                        Ok(Value::dummy(Type::any()))
                    }
                    other => Err(ValidateError::new(
                        format!("cannot call {}", other),
                        pos,
                    )),
                }
            }
        }
    }

    fn validate_builtin_call(
        &mut self,
        scope: ScopeId,
        name: &str,
        args: &mut Vec<Node>,
        pos: Pos,
    ) -> VResult {
        let builtin = self
            .interp
            .builtins
            .get(name)
            .expect("builtin resolved by identifier lookup");
        let params: Vec<Param> = builtin
            .params
            .iter()
            .map(|p| Param {
                name: p.name.to_string(),
                ty: p.ty.clone(),
                default: p.default.as_ref().map(|v| value_to_node(v, pos)),
            })
            .collect();
        self.positionalize(name, &params, args, pos)?;
        let mut arg_values = Vec::with_capacity(args.len());
        for (arg, param) in args.iter_mut().zip(params.iter()) {
            let v = self.validate(scope, arg)?;
            if !self.interp.types.check(&param.ty, &v.ty) {
                return Err(ValidateError::new(
                    format!(
                        "in call to {}: expected {} for parameter '{}', got {}",
                        name, param.ty, param.name, v.ty
                    ),
                    arg.pos,
                ));
            }
            arg_values.push(v);
        }
        match builtin.validate {
            Some(validate) => Ok(validate(&arg_values)),
            None => Ok(Value::dummy(builtin.ret.clone())),
        }
    }

    /// Rewrite a call's argument list into pure positional form: named
    /// arguments land in their parameter slots and absent trailing
    /// parameters take their default expressions.
    fn positionalize(
        &mut self,
        fname: &str,
        params: &[Param],
        args: &mut Vec<Node>,
        pos: Pos,
    ) -> Result<(), ValidateError> {
        let mut slots: Vec<Option<Node>> = params.iter().map(|_| None).collect();
        let mut seen_named = false;
        let mut next_positional = 0usize;
        for arg in args.drain(..) {
            match arg.kind {
                NodeKind::NamedArg { name, value } => {
                    seen_named = true;
                    let Some(idx) = params.iter().position(|p| p.name == name) else {
                        return Err(ValidateError::new(
                            format!("{} has no parameter named '{}'", fname, name),
                            arg.pos,
                        ));
                    };
                    if slots[idx].is_some() {
                        return Err(ValidateError::new(
                            format!("duplicate argument for parameter '{}'", name),
                            arg.pos,
                        ));
                    }
                    slots[idx] = Some(*value);
                }
                _ => {
                    if seen_named {
                        return Err(ValidateError::new(
                            "positional arguments must come before named arguments",
                            arg.pos,
                        ));
                    }
                    if next_positional >= params.len() {
                        return Err(ValidateError::new(
                            format!(
                                "too many arguments in call to {}: expected {}",
                                fname,
                                params.len()
                            ),
                            arg.pos,
                        ));
                    }
                    slots[next_positional] = Some(arg);
                    next_positional += 1;
                }
            }
        }
        let mut filled = Vec::with_capacity(params.len());
        for (slot, param) in slots.into_iter().zip(params.iter()) {
            match slot {
                Some(node) => filled.push(node),
                None => match &param.default {
                    Some(default) => filled.push(default.clone()),
                    None => {
                        return Err(ValidateError::new(
                            format!(
                                "missing argument for parameter '{}' in call to {}",
                                param.name, fname
                            ),
                            pos,
                        ))
                    }
                },
            }
        }
        *args = filled;
        Ok(())
    }

    fn validate_access(&mut self, scope: ScopeId, node: &mut Node) -> VResult {
        let pos = node.pos;
        let NodeKind::Access { target, key } = &mut node.kind else {
            unreachable!();
        };
        let t = self.validate(scope, target)?;
        let container = self.interp.types.resolve(&t.ty);
        match &container {
            Type::Map(props) => {
                let prop = match &key.kind {
                    NodeKind::StrLit(name) => props
                        .iter()
                        .find(|(k, _)| k == name)
                        .map(|(_, ty)| ty.clone()),
                    _ => None,
                };
                self.check_key(scope, key, &Type::string(), "map")?;
                Ok(Value::dummy(prop.unwrap_or_else(Type::any)))
            }
            Type::Simple(n) if n == "Map" => {
                self.check_key(scope, key, &Type::string(), "map")?;
                Ok(Value::dummy(Type::any()))
            }
            Type::Array(elem) => {
                self.check_key(scope, key, &Type::number(), "array")?;
                Ok(Value::dummy((**elem).clone()))
            }
            Type::Simple(n) if n == "Array" => {
                self.check_key(scope, key, &Type::number(), "array")?;
                Ok(Value::dummy(Type::any()))
            }
            Type::Simple(n) if n == "String" => {
                // Strings take a Number or a range inside the brackets.
                if !matches!(key.kind, NodeKind::Range { .. }) {
                    self.check_key(scope, key, &Type::number(), "string")?;
                } else {
                    self.validate(scope, key)?;
                }
                Ok(Value::dummy(Type::string()))
            }
            Type::Simple(n) if n == "Any" => {
                self.validate(scope, key)?;
                Ok(Value::dummy(Type::any()))
            }
            Type::Union(_) => {
                self.validate(scope, key)?;
                Ok(Value::dummy(Type::any()))
            }
            other => Err(ValidateError::new(
                format!("cannot index {}", other),
                pos,
            )),
        }
    }

    fn check_key(
        &mut self,
        scope: ScopeId,
        key: &mut Node,
        expected: &Type,
        what: &str,
    ) -> Result<(), ValidateError> {
        let pos = key.pos;
        let v = self.validate(scope, key)?;
        if !self.interp.types.check(expected, &v.ty) {
            return Err(ValidateError::new(
                format!("{} index must be {}, got {}", what, expected, v.ty),
                pos,
            ));
        }
        Ok(())
    }

    fn validate_try(
        &mut self,
        scope: ScopeId,
        body: &mut Node,
        catches: &mut [Catch],
        pos: Pos,
    ) -> VResult {
        let defaults = catches.iter().filter(|c| c.cond.is_none()).count();
        if defaults != 1 {
            return Err(ValidateError::new(
                "'try' requires exactly one default catch",
                pos,
            ));
        }
        if catches.last().map_or(false, |c| c.cond.is_some()) {
            return Err(ValidateError::new("the default catch must be last", pos));
        }

        let b = self.validate(scope, body)?;
        let mut branch_types = vec![b.ty];
        let mut seen = HashSet::new();
        for catch in catches.iter_mut() {
            let handler_scope = self.interp.scopes.child(scope);
            self.interp
                .scopes
                .declare(handler_scope, "e", Value::dummy(Type::string()));
            self.interp
                .scopes
                .set_guard(handler_scope, "e", Type::string());
            if let Some(cond) = &mut catch.cond {
                let cond_pos = cond.pos;
                let c = self.validate(handler_scope, cond)?;
                if !self.interp.types.check(&Type::string(), &c.ty) {
                    return Err(ValidateError::new(
                        format!("catch condition must be a String, got {}", c.ty),
                        cond_pos,
                    ));
                }
                if let NodeKind::StrLit(text) = &cond.kind {
                    if !seen.insert(text.clone()) {
                        return Err(ValidateError::new(
                            format!("duplicate catch condition \"{}\"", text),
                            cond_pos,
                        ));
                    }
                }
            }
            let h = self.validate(handler_scope, &mut catch.handler)?;
            branch_types.push(h.ty);
        }
        Ok(Value::dummy(self.interp.types.unite(&branch_types)))
    }
}

/// Rewrite `x.y` into `x["y"]` in place.
fn desugar_dot(node: &mut Node) {
    if matches!(node.kind, NodeKind::Dot { .. }) {
        let pos = node.pos;
        let NodeKind::Dot { target, field } = std::mem::replace(&mut node.kind, NodeKind::Nop)
        else {
            unreachable!();
        };
        let key = Node::new(NodeKind::StrLit(field), pos);
        node.kind = NodeKind::Access {
            target,
            key: Box::new(key),
        };
    }
}

/// Literal node for a builtin default value, so default filling can
/// splice it into the argument list.
fn value_to_node(value: &Value, pos: Pos) -> Node {
    let kind = match &value.data {
        Payload::Bool(b) => NodeKind::BoolLit(*b),
        Payload::Int(i) => NodeKind::IntLit(*i),
        Payload::Real(r) => NodeKind::RealLit(*r),
        Payload::Str(s) => NodeKind::StrLit(s.clone()),
        _ => NodeKind::NullLit,
    };
    Node::new(kind, pos)
}
