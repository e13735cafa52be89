use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Whether a function type describes a user function or a builtin.
/// Builtin is a subtype of Function in the lattice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FuncKind {
    Function,
    Builtin,
}

impl FuncKind {
    pub fn name(self) -> &'static str {
        match self {
            FuncKind::Function => "Function",
            FuncKind::Builtin => "Builtin",
        }
    }
}

/// A static type: a named point in the lattice or a compound shape.
///
/// Unions are flattened, deduplicated, and sorted by their stringified
/// form at construction (see [`TypeSystem::unite`]) and never contain
/// fewer than two members.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Type {
    Simple(String),
    Union(Vec<Type>),
    Func {
        kind: FuncKind,
        params: Vec<Type>,
        ret: Box<Type>,
    },
    Array(Box<Type>),
    Map(Vec<(String, Type)>),
}

impl Type {
    pub fn simple(name: &str) -> Type {
        Type::Simple(name.to_string())
    }

    pub fn any() -> Type {
        Type::simple("Any")
    }

    pub fn null() -> Type {
        Type::simple("Null")
    }

    pub fn boolean() -> Type {
        Type::simple("Boolean")
    }

    pub fn number() -> Type {
        Type::simple("Number")
    }

    pub fn integer() -> Type {
        Type::simple("Integer")
    }

    pub fn real() -> Type {
        Type::simple("Real")
    }

    pub fn string() -> Type {
        Type::simple("String")
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Type::Simple(n) if n == "Any")
    }

    /// Syntactic union construction: flatten, deduplicate, sort. Alias
    /// resolution happens later, in [`TypeSystem::unite`].
    pub fn union_of(members: Vec<Type>) -> Type {
        let mut out: Vec<Type> = Vec::new();
        for member in members {
            match member {
                Type::Union(inner) => {
                    for m in inner {
                        if !out.contains(&m) {
                            out.push(m);
                        }
                    }
                }
                other => {
                    if !out.contains(&other) {
                        out.push(other);
                    }
                }
            }
        }
        if out.iter().any(Type::is_any) {
            return Type::any();
        }
        match out.len() {
            0 => Type::any(),
            1 => out.pop().unwrap(),
            _ => {
                out.sort_by_key(Type::to_string);
                Type::Union(out)
            }
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Type::Simple(n) => n,
            Type::Union(_) => "Union",
            Type::Func { kind, .. } => kind.name(),
            Type::Array(_) => "Array",
            Type::Map(_) => "Map",
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Simple(n) => write!(f, "{}", n),
            Type::Union(members) => {
                let parts: Vec<String> = members.iter().map(Type::to_string).collect();
                write!(f, "{}", parts.join(" | "))
            }
            Type::Func { kind, params, ret } => {
                let parts: Vec<String> = params.iter().map(Type::to_string).collect();
                write!(f, "{} ({}) -> {}", kind.name(), parts.join(", "), ret)
            }
            Type::Array(elem) => write!(f, "Array [{}]", elem),
            Type::Map(props) => {
                let parts: Vec<String> = props
                    .iter()
                    .map(|(k, t)| format!("\"{}\": {}", k, t))
                    .collect();
                write!(f, "Map {{{}}}", parts.join(", "))
            }
        }
    }
}

/// The subtype lattice plus user-declared aliases and nominal subtypes.
///
/// Initial shape: `Any` is the root; `Null`, `Boolean`, `Number`,
/// `String`, `Array`, `Map` and `Function` hang off it; `Integer` and
/// `Real` sit under `Number`; `Builtin` under `Function`.
pub struct TypeSystem {
    /// child name -> parent name
    parents: HashMap<String, String>,
    aliases: HashMap<String, Type>,
    /// Names added by `type` declarations. A user-declared nominal
    /// subtype also accepts its parent's values on assignment.
    user: HashSet<String>,
}

const ARITHMETIC: &[&str] = &["Boolean", "Number", "Integer", "Real"];

impl TypeSystem {
    pub fn new() -> Self {
        let mut parents = HashMap::new();
        for name in ["Null", "Boolean", "Number", "String", "Array", "Map", "Function"] {
            parents.insert(name.to_string(), "Any".to_string());
        }
        parents.insert("Integer".to_string(), "Number".to_string());
        parents.insert("Real".to_string(), "Number".to_string());
        parents.insert("Builtin".to_string(), "Function".to_string());
        TypeSystem {
            parents,
            aliases: HashMap::new(),
            user: HashSet::new(),
        }
    }

    pub fn is_defined(&self, name: &str) -> bool {
        name == "Any" || self.parents.contains_key(name) || self.aliases.contains_key(name)
    }

    /// All known type names, for the parser's recognition set.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.parents.keys().cloned().collect();
        names.extend(self.aliases.keys().cloned());
        names.push("Any".to_string());
        names
    }

    /// Declare `name` as a new nominal subtype of `parent`.
    pub fn add_subtype(&mut self, name: &str, parent: &str) -> Result<(), String> {
        if self.is_defined(name) {
            return Err(format!("cannot redefine existing type {}", name));
        }
        if !self.is_defined(parent) {
            return Err(format!("unknown parent type {}", parent));
        }
        self.parents.insert(name.to_string(), parent.to_string());
        self.user.insert(name.to_string());
        Ok(())
    }

    /// Declare `name` as an alias for an existing type expression.
    pub fn add_alias(&mut self, name: &str, ty: Type) -> Result<(), String> {
        if self.is_defined(name) {
            return Err(format!("cannot redefine existing type {}", name));
        }
        self.aliases.insert(name.to_string(), ty);
        Ok(())
    }

    /// Expand aliases, recursively through compound shapes.
    pub fn resolve(&self, ty: &Type) -> Type {
        match ty {
            Type::Simple(n) => match self.aliases.get(n) {
                Some(target) => self.resolve(target),
                None => ty.clone(),
            },
            Type::Union(members) => {
                Type::Union(members.iter().map(|m| self.resolve(m)).collect())
            }
            Type::Func { kind, params, ret } => Type::Func {
                kind: *kind,
                params: params.iter().map(|p| self.resolve(p)).collect(),
                ret: Box::new(self.resolve(ret)),
            },
            Type::Array(elem) => Type::Array(Box::new(self.resolve(elem))),
            Type::Map(props) => Type::Map(
                props
                    .iter()
                    .map(|(k, t)| (k.clone(), self.resolve(t)))
                    .collect(),
            ),
        }
    }

    /// Nominal equality for simple names, structural for compounds.
    pub fn is_equal(&self, a: &Type, b: &Type) -> bool {
        self.resolve(a) == self.resolve(b)
    }

    fn name_is_subtype<'a>(&'a self, mut child: &'a str, parent: &str) -> bool {
        if parent == "Any" {
            return true;
        }
        loop {
            if child == parent {
                return true;
            }
            match self.parents.get(child) {
                Some(next) => child = next,
                None => return false,
            }
        }
    }

    /// Whether `a` may stand wherever `b` is expected, per the lattice.
    pub fn is_subtype(&self, a: &Type, b: &Type) -> bool {
        let a = self.resolve(a);
        let b = self.resolve(b);
        match (&a, &b) {
            (_, Type::Simple(n)) if n == "Any" => true,
            (Type::Union(members), _) => members.iter().all(|m| self.is_subtype(m, &b)),
            (_, Type::Union(members)) => members.iter().any(|m| self.is_subtype(&a, m)),
            (Type::Simple(an), Type::Simple(bn)) => self.name_is_subtype(an, bn),
            (Type::Array(_), Type::Simple(n)) => self.name_is_subtype("Array", n),
            (Type::Map(_), Type::Simple(n)) => self.name_is_subtype("Map", n),
            (Type::Func { kind, .. }, Type::Simple(n)) => self.name_is_subtype(kind.name(), n),
            (Type::Array(ae), Type::Array(be)) => self.is_subtype(ae, be),
            (Type::Map(aprops), Type::Map(bprops)) => bprops.iter().all(|(k, bt)| {
                aprops
                    .iter()
                    .any(|(ak, at)| ak == k && self.is_subtype(at, bt))
            }),
            (
                Type::Func { kind: ak, params: ap, ret: ar },
                Type::Func { kind: bk, params: bp, ret: br },
            ) => {
                ak == bk
                    && ap.len() == bp.len()
                    && ap.iter().zip(bp).all(|(a, b)| self.is_subtype(a, b))
                    && self.is_subtype(ar, br)
            }
            _ => false,
        }
    }

    /// Whether a candidate type is assignable where `guard` is required.
    pub fn check(&self, guard: &Type, candidate: &Type) -> bool {
        let guard = self.resolve(guard);
        let candidate = self.resolve(candidate);
        match (&guard, &candidate) {
            (Type::Simple(n), _) if n == "Any" => true,
            (_, Type::Simple(n)) if n == "Any" => true,
            (Type::Union(members), _) => members.iter().any(|m| self.check(m, &candidate)),
            (_, Type::Union(members)) => members.iter().all(|m| self.check(&guard, m)),
            // Bare Array/Map candidates pass a shaped guard; element and
            // property mismatches then surface at runtime, gradually.
            (Type::Array(_), Type::Simple(n)) if n == "Array" => true,
            (Type::Map(_), Type::Simple(n)) if n == "Map" => true,
            (Type::Array(ge), Type::Array(ce)) => self.check(ge, ce),
            (Type::Map(gprops), Type::Map(cprops)) => gprops.iter().all(|(k, gt)| {
                cprops
                    .iter()
                    .any(|(ck, ct)| ck == k && self.check(gt, ct))
            }),
            (
                Type::Func { kind: gk, params: gp, ret: gr },
                Type::Func { kind: ck, params: cp, ret: cr },
            ) => {
                gk == ck
                    && gp.len() == cp.len()
                    && cp.iter().zip(gp).all(|(c, g)| self.is_subtype(c, g))
                    && self.is_subtype(cr, gr)
            }
            _ => {
                if self.is_subtype(&candidate, &guard) {
                    return true;
                }
                // Numeric widening: an Integer satisfies a Real guard.
                if matches!(self.get_promoted_type(&guard, &candidate), Some(p) if p == guard) {
                    return true;
                }
                // A user-declared nominal subtype accepts its parent's
                // values; there is no other way to construct one.
                if let Type::Simple(name) = &guard {
                    if self.user.contains(name) {
                        if let Some(parent) = self.parents.get(name) {
                            return self.check(&Type::Simple(parent.clone()), &candidate);
                        }
                    }
                }
                false
            }
        }
    }

    fn is_arithmetic_name(&self, name: &str) -> bool {
        ARITHMETIC.iter().any(|a| self.name_is_subtype(name, a))
    }

    pub fn is_arithmetic(&self, ty: &Type) -> bool {
        match self.resolve(ty) {
            Type::Simple(n) => n == "Any" || self.is_arithmetic_name(&n),
            _ => false,
        }
    }

    /// Least upper bound for operator results. `None` means the shapes
    /// cannot be promoted and the caller reports a type error.
    pub fn get_promoted_type(&self, a: &Type, b: &Type) -> Option<Type> {
        let a = self.resolve(a);
        let b = self.resolve(b);
        if a == b {
            return Some(a);
        }
        if let (Type::Simple(an), Type::Simple(bn)) = (&a, &b) {
            let pair = (an.as_str(), bn.as_str());
            if pair == ("Integer", "Real") || pair == ("Real", "Integer") {
                return Some(Type::real());
            }
            if self.name_is_subtype(an, bn) {
                return Some(b);
            }
            if self.name_is_subtype(bn, an) {
                return Some(a);
            }
            if self.is_arithmetic_name(an) && self.is_arithmetic_name(bn) {
                return Some(Type::number());
            }
        }
        None
    }

    /// Deduplicate and normalize a list of types into a single type.
    pub fn unite(&self, list: &[Type]) -> Type {
        let mut members: Vec<Type> = Vec::new();
        let mut flatten = |ty: &Type, members: &mut Vec<Type>| {
            let resolved = self.resolve(ty);
            match resolved {
                Type::Union(inner) => {
                    for m in inner {
                        if !members.contains(&m) {
                            members.push(m);
                        }
                    }
                }
                other => {
                    if !members.contains(&other) {
                        members.push(other);
                    }
                }
            }
        };
        for ty in list {
            flatten(ty, &mut members);
        }
        if members.iter().any(Type::is_any) {
            return Type::any();
        }
        match members.len() {
            0 => Type::any(),
            1 => members.pop().unwrap(),
            _ => {
                members.sort_by_key(Type::to_string);
                Type::Union(members)
            }
        }
    }
}

impl Default for TypeSystem {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lattice_subtyping() {
        let ts = TypeSystem::new();
        assert!(ts.is_subtype(&Type::integer(), &Type::number()));
        assert!(ts.is_subtype(&Type::real(), &Type::number()));
        assert!(ts.is_subtype(&Type::number(), &Type::any()));
        assert!(ts.is_subtype(&Type::simple("Builtin"), &Type::simple("Function")));
        assert!(!ts.is_subtype(&Type::number(), &Type::integer()));
        assert!(!ts.is_subtype(&Type::string(), &Type::number()));
    }

    #[test]
    fn any_accepts_everything() {
        let ts = TypeSystem::new();
        assert!(ts.check(&Type::any(), &Type::string()));
        assert!(ts.check(&Type::any(), &Type::Map(vec![])));
    }

    #[test]
    fn guards_widen_numerically_but_never_narrow() {
        let ts = TypeSystem::new();
        assert!(ts.check(&Type::real(), &Type::integer()));
        assert!(ts.check(&Type::number(), &Type::integer()));
        assert!(!ts.check(&Type::integer(), &Type::real()));
        assert!(!ts.check(&Type::real(), &Type::string()));
    }

    #[test]
    fn union_guard_accepts_members() {
        let ts = TypeSystem::new();
        let guard = ts.unite(&[Type::integer(), Type::string()]);
        assert!(ts.check(&guard, &Type::integer()));
        assert!(ts.check(&guard, &Type::string()));
        assert!(!ts.check(&guard, &Type::real()));
    }

    #[test]
    fn function_guards_need_matching_shape() {
        let ts = TypeSystem::new();
        let f = Type::Func {
            kind: FuncKind::Function,
            params: vec![Type::number(), Type::number()],
            ret: Box::new(Type::number()),
        };
        let g = Type::Func {
            kind: FuncKind::Function,
            params: vec![Type::integer(), Type::integer()],
            ret: Box::new(Type::integer()),
        };
        // Narrower params and return still satisfy the guard.
        assert!(ts.check(&f, &g));
        // Arity mismatch never does.
        let h = Type::Func {
            kind: FuncKind::Function,
            params: vec![Type::number()],
            ret: Box::new(Type::number()),
        };
        assert!(!ts.check(&f, &h));
    }

    #[test]
    fn promotion_widens_numbers() {
        let ts = TypeSystem::new();
        assert_eq!(
            ts.get_promoted_type(&Type::integer(), &Type::real()),
            Some(Type::real())
        );
        assert_eq!(
            ts.get_promoted_type(&Type::integer(), &Type::number()),
            Some(Type::number())
        );
        // Boolean is arithmetic; its promotion with Integer ties to Number.
        assert_eq!(
            ts.get_promoted_type(&Type::boolean(), &Type::integer()),
            Some(Type::number())
        );
        assert_eq!(ts.get_promoted_type(&Type::string(), &Type::number()), None);
    }

    #[test]
    fn unite_normalizes() {
        let ts = TypeSystem::new();
        assert_eq!(ts.unite(&[Type::integer(), Type::integer()]), Type::integer());
        assert_eq!(
            ts.unite(&[Type::string(), Type::any(), Type::integer()]),
            Type::any()
        );
        let u = ts.unite(&[Type::string(), Type::integer()]);
        assert_eq!(
            u,
            Type::Union(vec![Type::integer(), Type::string()])
        );
        // Nested unions flatten.
        assert_eq!(ts.unite(&[u.clone(), Type::integer()]), u);
    }

    #[test]
    fn user_subtypes_and_aliases() {
        let mut ts = TypeSystem::new();
        ts.add_subtype("Id", "Integer").unwrap();
        assert!(ts.is_subtype(&Type::simple("Id"), &Type::number()));
        // Parent values are accepted where the subtype is required.
        assert!(ts.check(&Type::simple("Id"), &Type::integer()));
        assert!(!ts.check(&Type::simple("Id"), &Type::string()));
        ts.add_alias("Text", Type::string()).unwrap();
        assert!(ts.is_equal(&Type::simple("Text"), &Type::string()));
        assert!(ts.add_subtype("Id", "Integer").is_err());
    }
}
