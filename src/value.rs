use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::ast::FuncDef;
use crate::scope::ScopeId;
use crate::types::{FuncKind, Type};

/// Control-transfer sentinels. They travel as ordinary values until a
/// loop (Next/Last) or a function-call boundary (Return) consumes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialKind {
    Next,
    Last,
    Return,
}

#[derive(Debug, Clone)]
pub struct SpecialVal {
    pub kind: SpecialKind,
    pub value: Value,
}

/// A user function value: shared definition plus the scope captured at
/// definition time.
#[derive(Debug)]
pub struct Function {
    pub def: Rc<FuncDef>,
    pub env: ScopeId,
}

impl Function {
    /// Identity key for the validator's typed cache.
    pub fn id(&self) -> usize {
        Rc::as_ptr(&self.def) as usize
    }
}

#[derive(Debug, Clone)]
pub enum Payload {
    Null,
    Bool(bool),
    Int(i64),
    Real(f64),
    Str(String),
    Array(Rc<RefCell<Vec<Value>>>),
    Map(Rc<RefCell<BTreeMap<String, Value>>>),
    Func(Rc<Function>),
    /// Name into the builtin registry.
    Builtin(String),
    Special(Box<SpecialVal>),
}

/// A runtime (or, in the validator, dummy-payload) value: the payload
/// plus the static type it carries for introspection and guard checks.
#[derive(Debug, Clone)]
pub struct Value {
    pub ty: Type,
    pub data: Payload,
}

impl Value {
    pub fn null() -> Value {
        Value { ty: Type::null(), data: Payload::Null }
    }

    pub fn boolean(b: bool) -> Value {
        Value { ty: Type::boolean(), data: Payload::Bool(b) }
    }

    pub fn integer(i: i64) -> Value {
        Value { ty: Type::integer(), data: Payload::Int(i) }
    }

    pub fn real(r: f64) -> Value {
        Value { ty: Type::real(), data: Payload::Real(r) }
    }

    pub fn string(s: impl Into<String>) -> Value {
        Value { ty: Type::string(), data: Payload::Str(s.into()) }
    }

    pub fn array(items: Vec<Value>) -> Value {
        Value {
            ty: Type::simple("Array"),
            data: Payload::Array(Rc::new(RefCell::new(items))),
        }
    }

    pub fn map(entries: BTreeMap<String, Value>) -> Value {
        Value {
            ty: Type::simple("Map"),
            data: Payload::Map(Rc::new(RefCell::new(entries))),
        }
    }

    pub fn function(def: Rc<FuncDef>, env: ScopeId) -> Value {
        let ty = Type::Func {
            kind: FuncKind::Function,
            params: def.params.borrow().iter().map(|p| p.ty.clone()).collect(),
            ret: Box::new(def.ret.borrow().clone()),
        };
        Value {
            ty,
            data: Payload::Func(Rc::new(Function { def, env })),
        }
    }

    pub fn special(kind: SpecialKind, value: Value) -> Value {
        Value {
            ty: Type::null(),
            data: Payload::Special(Box::new(SpecialVal { kind, value })),
        }
    }

    /// A dummy payload of the given type, used by the validator where
    /// only the type matters.
    pub fn dummy(ty: Type) -> Value {
        Value { ty, data: Payload::Null }
    }

    pub fn is_special(&self) -> bool {
        matches!(self.data, Payload::Special(_))
    }

    pub fn special_kind(&self) -> Option<SpecialKind> {
        match &self.data {
            Payload::Special(s) => Some(s.kind),
            _ => None,
        }
    }

    /// Unwrap one layer of control sentinel, yielding the carried value.
    pub fn into_carried(self) -> Value {
        match self.data {
            Payload::Special(s) => s.value,
            _ => self,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self.data, Payload::Null)
    }

    pub fn is_truthy(&self) -> bool {
        match &self.data {
            Payload::Null => false,
            Payload::Bool(b) => *b,
            Payload::Int(i) => *i != 0,
            Payload::Real(r) => *r != 0.0,
            Payload::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// Numeric payload widened to f64, when there is one. Booleans count
    /// as 0/1 since they are arithmetic operands.
    pub fn as_number(&self) -> Option<f64> {
        match &self.data {
            Payload::Int(i) => Some(*i as f64),
            Payload::Real(r) => Some(*r),
            Payload::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match &self.data {
            Payload::Int(i) => Some(*i),
            Payload::Real(r) => Some(*r as i64),
            Payload::Bool(b) => Some(if *b { 1 } else { 0 }),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.data {
            Payload::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Deep structural equality. Functions never compare equal.
    pub fn value_eq(&self, other: &Value) -> bool {
        match (&self.data, &other.data) {
            (Payload::Null, Payload::Null) => true,
            (Payload::Str(a), Payload::Str(b)) => a == b,
            (Payload::Bool(_), _) | (_, Payload::Bool(_))
            | (Payload::Int(_), _) | (_, Payload::Int(_))
            | (Payload::Real(_), _) | (_, Payload::Real(_)) => {
                match (self.as_number(), other.as_number()) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                }
            }
            (Payload::Array(a), Payload::Array(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.value_eq(y))
            }
            (Payload::Map(a), Payload::Map(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|((ka, va), (kb, vb))| ka == kb && va.value_eq(vb))
            }
            _ => false,
        }
    }

    /// JSON shape for the §6.2 Array/Map serialization. Function values
    /// have no serialization and return None.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        match &self.data {
            Payload::Null => Some(serde_json::Value::Null),
            Payload::Bool(b) => Some(serde_json::Value::Bool(*b)),
            Payload::Int(i) => Some(serde_json::Value::from(*i)),
            Payload::Real(r) => serde_json::Number::from_f64(*r).map(serde_json::Value::Number),
            Payload::Str(s) => Some(serde_json::Value::String(s.clone())),
            Payload::Array(items) => items
                .borrow()
                .iter()
                .map(Value::to_json)
                .collect::<Option<Vec<_>>>()
                .map(serde_json::Value::Array),
            Payload::Map(entries) => {
                let mut obj = serde_json::Map::new();
                for (k, v) in entries.borrow().iter() {
                    obj.insert(k.clone(), v.to_json()?);
                }
                Some(serde_json::Value::Object(obj))
            }
            Payload::Func(_) | Payload::Builtin(_) | Payload::Special(_) => None,
        }
    }

    /// The text `print` and string interpolation produce.
    pub fn to_display_string(&self) -> String {
        match &self.data {
            Payload::Null => "null".to_string(),
            Payload::Bool(b) => b.to_string(),
            Payload::Int(i) => i.to_string(),
            Payload::Real(r) => format_real(*r),
            Payload::Str(s) => s.clone(),
            Payload::Array(_) | Payload::Map(_) => match self.to_json() {
                Some(json) => json.to_string(),
                None => self.ty.to_string(),
            },
            Payload::Func(_) | Payload::Builtin(_) => self.ty.to_string(),
            Payload::Special(s) => s.value.to_display_string(),
        }
    }
}

/// Reals print without a trailing fraction when whole: 25.0 -> "25".
pub fn format_real(r: f64) -> String {
    if r.is_infinite() || r.is_nan() {
        return r.to_string();
    }
    let text = format!("{:.6}", r);
    let trimmed = text.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() || trimmed == "-" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.data {
            Payload::Str(s) => write!(f, "\"{}\"", s.escape_default()),
            _ => write!(f, "{}", self.to_display_string()),
        }
    }
}
