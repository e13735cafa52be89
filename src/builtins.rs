use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::RuntimeError;
use crate::interpreter::Evaluator;
use crate::scope::ScopeId;
use crate::token::Pos;
use crate::types::{FuncKind, Type};
use crate::value::{Payload, Value};

type EvalResult = Result<Value, RuntimeError>;

/// Runtime body of a builtin. Arguments arrive fully evaluated and
/// positional, with defaults already filled in.
pub type NativeFn = fn(&mut Evaluator, ScopeId, Vec<Value>, Pos) -> EvalResult;

/// Validator-time body: receives the dummy argument values and returns
/// the result dummy. Lets a builtin accept `Any` statically without
/// attempting a concrete conversion.
pub type ValidateFn = fn(&[Value]) -> Value;

pub struct BuiltinParam {
    pub name: &'static str,
    pub ty: Type,
    pub default: Option<Value>,
}

pub struct Builtin {
    pub name: &'static str,
    pub params: Vec<BuiltinParam>,
    pub ret: Type,
    pub body: NativeFn,
    pub validate: Option<ValidateFn>,
}

impl Builtin {
    pub fn func_type(&self) -> Type {
        Type::Func {
            kind: FuncKind::Builtin,
            params: self.params.iter().map(|p| p.ty.clone()).collect(),
            ret: Box::new(self.ret.clone()),
        }
    }
}

fn param(name: &'static str, ty: Type) -> BuiltinParam {
    BuiltinParam {
        name,
        ty,
        default: None,
    }
}

fn param_with_default(name: &'static str, ty: Type, default: Value) -> BuiltinParam {
    BuiltinParam {
        name,
        ty,
        default: Some(default),
    }
}

pub struct BuiltinRegistry {
    entries: HashMap<String, Rc<Builtin>>,
}

impl BuiltinRegistry {
    pub fn new() -> Self {
        let mut registry = BuiltinRegistry {
            entries: HashMap::new(),
        };
        registry.install_standard();
        registry
    }

    pub fn register(&mut self, builtin: Builtin) {
        self.entries
            .insert(builtin.name.to_string(), Rc::new(builtin));
    }

    pub fn get(&self, name: &str) -> Option<Rc<Builtin>> {
        self.entries.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// The callable value an identifier naming a builtin resolves to.
    pub fn value_of(&self, name: &str) -> Option<Value> {
        self.entries.get(name).map(|b| Value {
            ty: b.func_type(),
            data: Payload::Builtin(name.to_string()),
        })
    }

    fn install_standard(&mut self) {
        self.register(Builtin {
            name: "print",
            params: vec![
                param("value", Type::any()),
                param_with_default("end", Type::string(), Value::string("\n")),
            ],
            ret: Type::null(),
            body: bi_print,
            validate: None,
        });
        self.register(Builtin {
            name: "typeof",
            params: vec![param("value", Type::any())],
            ret: Type::string(),
            body: bi_typeof,
            validate: None,
        });
        self.register(Builtin {
            name: "whatis",
            params: vec![param("value", Type::any())],
            ret: Type::string(),
            body: bi_whatis,
            validate: None,
        });
        self.register(Builtin {
            name: "length",
            params: vec![param(
                "value",
                Type::union_of(vec![
                    Type::string(),
                    Type::simple("Array"),
                    Type::simple("Map"),
                ]),
            )],
            ret: Type::integer(),
            body: bi_length,
            validate: None,
        });
        self.register(Builtin {
            name: "map",
            params: vec![
                param("func", Type::simple("Function")),
                param("list", Type::simple("Array")),
            ],
            ret: Type::simple("Array"),
            body: bi_map,
            validate: Some(|_| Value::dummy(Type::simple("Array"))),
        });
        self.register(Builtin {
            name: "filter",
            params: vec![
                param("func", Type::simple("Function")),
                param("list", Type::simple("Array")),
            ],
            ret: Type::simple("Array"),
            body: bi_filter,
            // Filtering keeps the input array's type.
            validate: Some(|args| {
                Value::dummy(
                    args.get(1)
                        .map(|v| v.ty.clone())
                        .unwrap_or_else(|| Type::simple("Array")),
                )
            }),
        });

        // Cast functions. Their validate bodies accept Any and just
        // stamp the target type; conversion happens at runtime.
        self.register(Builtin {
            name: "Integer",
            params: vec![param("value", Type::any())],
            ret: Type::integer(),
            body: bi_integer,
            validate: Some(|_| Value::dummy(Type::integer())),
        });
        self.register(Builtin {
            name: "Real",
            params: vec![param("value", Type::any())],
            ret: Type::real(),
            body: bi_real,
            validate: Some(|_| Value::dummy(Type::real())),
        });
        self.register(Builtin {
            name: "String",
            params: vec![param("value", Type::any())],
            ret: Type::string(),
            body: bi_string,
            validate: Some(|_| Value::dummy(Type::string())),
        });
        self.register(Builtin {
            name: "Boolean",
            params: vec![param("value", Type::any())],
            ret: Type::boolean(),
            body: bi_boolean,
            validate: Some(|_| Value::dummy(Type::boolean())),
        });
        self.register(Builtin {
            name: "Array",
            params: vec![param("value", Type::any())],
            ret: Type::simple("Array"),
            body: bi_array,
            validate: Some(|_| Value::dummy(Type::simple("Array"))),
        });
        self.register(Builtin {
            name: "Map",
            params: vec![param("value", Type::any())],
            ret: Type::simple("Map"),
            body: bi_map_cast,
            validate: Some(|_| Value::dummy(Type::simple("Map"))),
        });
    }
}

impl Default for BuiltinRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Run a builtin with evaluated arguments, filling trailing defaults.
pub fn dispatch(
    ev: &mut Evaluator,
    scope: ScopeId,
    name: &str,
    mut args: Vec<Value>,
    pos: Pos,
) -> EvalResult {
    let Some(builtin) = ev.interp.builtins.get(name) else {
        return Err(RuntimeError::fatal(
            format!("unknown builtin function '{}'", name),
            pos,
        ));
    };
    if args.len() > builtin.params.len() {
        return Err(RuntimeError::fatal(
            format!(
                "too many arguments in call to {}: expected {}, got {}",
                name,
                builtin.params.len(),
                args.len()
            ),
            pos,
        ));
    }
    while args.len() < builtin.params.len() {
        match &builtin.params[args.len()].default {
            Some(default) => args.push(default.clone()),
            None => {
                return Err(RuntimeError::fatal(
                    format!(
                        "missing argument for parameter '{}' in call to {}",
                        builtin.params[args.len()].name, name
                    ),
                    pos,
                ))
            }
        }
    }
    (builtin.body)(ev, scope, args, pos)
}

fn bi_print(ev: &mut Evaluator, _scope: ScopeId, args: Vec<Value>, _pos: Pos) -> EvalResult {
    let end = args[1].as_str().unwrap_or("\n");
    let text = format!("{}{}", args[0].to_display_string(), end);
    ev.interp.emit(&text);
    Ok(Value::null())
}

fn bi_typeof(_ev: &mut Evaluator, _scope: ScopeId, args: Vec<Value>, _pos: Pos) -> EvalResult {
    Ok(Value::string(args[0].ty.name()))
}

fn bi_whatis(_ev: &mut Evaluator, _scope: ScopeId, args: Vec<Value>, _pos: Pos) -> EvalResult {
    Ok(Value::string(args[0].ty.to_string()))
}

fn bi_length(_ev: &mut Evaluator, _scope: ScopeId, args: Vec<Value>, pos: Pos) -> EvalResult {
    match &args[0].data {
        Payload::Str(s) => Ok(Value::integer(s.chars().count() as i64)),
        Payload::Array(items) => Ok(Value::integer(items.borrow().len() as i64)),
        Payload::Map(entries) => Ok(Value::integer(entries.borrow().len() as i64)),
        _ => Err(RuntimeError::fatal(
            format!("cannot take length of {}", args[0].ty),
            pos,
        )),
    }
}

fn array_items(value: &Value, what: &str, pos: Pos) -> Result<Vec<Value>, RuntimeError> {
    match &value.data {
        Payload::Array(items) => Ok(items.borrow().clone()),
        _ => Err(RuntimeError::fatal(
            format!("{} requires an Array, got {}", what, value.ty),
            pos,
        )),
    }
}

fn bi_map(ev: &mut Evaluator, scope: ScopeId, args: Vec<Value>, pos: Pos) -> EvalResult {
    let func = &args[0];
    let items = array_items(&args[1], "map", pos)?;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        out.push(ev.call_value(scope, func, vec![item], pos)?);
    }
    Ok(Value::array(out))
}

fn bi_filter(ev: &mut Evaluator, scope: ScopeId, args: Vec<Value>, pos: Pos) -> EvalResult {
    let func = &args[0];
    let items = array_items(&args[1], "filter", pos)?;
    let mut out = Vec::new();
    for item in items {
        if ev.call_value(scope, func, vec![item.clone()], pos)?.is_truthy() {
            out.push(item);
        }
    }
    let mut array = Value::array(out);
    array.ty = args[1].ty.clone();
    Ok(array)
}

static LEADING_INT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[+-]?[0-9]+").unwrap());
static LEADING_REAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[+-]?[0-9]+(?:\.[0-9]+)?(?:[eE][+-]?[0-9]+)?").unwrap());

fn no_conversion(from: &Value, to: &str, pos: Pos) -> RuntimeError {
    RuntimeError::fatal(format!("cannot convert {} to {}", from.ty, to), pos)
}

fn bi_integer(_ev: &mut Evaluator, _scope: ScopeId, args: Vec<Value>, pos: Pos) -> EvalResult {
    let value = &args[0];
    match &value.data {
        Payload::Null => Ok(Value::integer(0)),
        Payload::Bool(b) => Ok(Value::integer(*b as i64)),
        Payload::Int(i) => Ok(Value::integer(*i)),
        Payload::Real(r) => Ok(Value::integer(*r as i64)),
        // Leading integer of the text, 0 when there is none.
        Payload::Str(s) => {
            let parsed = LEADING_INT
                .find(s.trim_start())
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0);
            Ok(Value::integer(parsed))
        }
        _ => Err(no_conversion(value, "Integer", pos)),
    }
}

fn bi_real(_ev: &mut Evaluator, _scope: ScopeId, args: Vec<Value>, pos: Pos) -> EvalResult {
    let value = &args[0];
    match &value.data {
        Payload::Null => Ok(Value::real(0.0)),
        Payload::Bool(b) => Ok(Value::real(if *b { 1.0 } else { 0.0 })),
        Payload::Int(i) => Ok(Value::real(*i as f64)),
        Payload::Real(r) => Ok(Value::real(*r)),
        Payload::Str(s) => {
            let parsed = LEADING_REAL
                .find(s.trim_start())
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0.0);
            Ok(Value::real(parsed))
        }
        _ => Err(no_conversion(value, "Real", pos)),
    }
}

fn bi_string(_ev: &mut Evaluator, _scope: ScopeId, args: Vec<Value>, pos: Pos) -> EvalResult {
    let value = &args[0];
    match &value.data {
        Payload::Array(_) | Payload::Map(_) => match value.to_json() {
            Some(json) => Ok(Value::string(json.to_string())),
            None => Err(RuntimeError::fatal(
                "cannot serialize a Function to String",
                pos,
            )),
        },
        Payload::Func(_) | Payload::Builtin(_) | Payload::Special(_) => {
            Err(no_conversion(value, "String", pos))
        }
        _ => Ok(Value::string(value.to_display_string())),
    }
}

fn bi_boolean(_ev: &mut Evaluator, _scope: ScopeId, args: Vec<Value>, pos: Pos) -> EvalResult {
    let value = &args[0];
    match &value.data {
        Payload::Null | Payload::Bool(_) | Payload::Int(_) | Payload::Real(_) | Payload::Str(_) => {
            Ok(Value::boolean(value.is_truthy()))
        }
        _ => Err(no_conversion(value, "Boolean", pos)),
    }
}

fn bi_array(ev: &mut Evaluator, scope: ScopeId, args: Vec<Value>, pos: Pos) -> EvalResult {
    let value = &args[0];
    match &value.data {
        Payload::Array(_) => Ok(value.clone()),
        // A String parses through the array-constructor grammar.
        Payload::Str(s) => {
            let s = s.clone();
            let parsed = ev.eval_snippet(scope, &s, pos)?;
            match parsed.data {
                Payload::Array(_) => Ok(parsed),
                _ => Err(RuntimeError::fatal(
                    format!("\"{}\" does not parse as an Array", s),
                    pos,
                )),
            }
        }
        _ => Err(no_conversion(value, "Array", pos)),
    }
}

fn bi_map_cast(ev: &mut Evaluator, scope: ScopeId, args: Vec<Value>, pos: Pos) -> EvalResult {
    let value = &args[0];
    match &value.data {
        Payload::Map(_) => Ok(value.clone()),
        Payload::Str(s) => {
            let s = s.clone();
            let parsed = ev.eval_snippet(scope, &s, pos)?;
            match parsed.data {
                Payload::Map(_) => Ok(parsed),
                _ => Err(RuntimeError::fatal(
                    format!("\"{}\" does not parse as a Map", s),
                    pos,
                )),
            }
        }
        _ => Err(no_conversion(value, "Map", pos)),
    }
}
