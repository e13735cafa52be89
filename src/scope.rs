use std::collections::HashMap;

use crate::types::Type;
use crate::value::Value;

/// Index into the scope arena. Closures hold one of these instead of a
/// reference, so scope graphs cannot form ownership cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(u32);

#[derive(Debug, Default)]
pub struct Scope {
    locals: HashMap<String, Value>,
    guards: HashMap<String, Type>,
    parent: Option<ScopeId>,
    closure: Option<ScopeId>,
    /// Function bodies already validated in this scope, keyed by
    /// function identity. Breaks recursion during validation.
    typed: HashMap<usize, Type>,
    pub while_loop: bool,
    pub current_function: Option<String>,
}

/// Arena of every scope created during an interpretation. Scopes are
/// created on block entry and function calls and simply abandoned on
/// exit; the arena is dropped with the interpreter.
#[derive(Debug, Default)]
pub struct Scopes {
    arena: Vec<Scope>,
}

impl Scopes {
    pub fn new() -> Self {
        Scopes { arena: Vec::new() }
    }

    fn push(&mut self, scope: Scope) -> ScopeId {
        let id = ScopeId(self.arena.len() as u32);
        self.arena.push(scope);
        id
    }

    pub fn root(&mut self) -> ScopeId {
        self.push(Scope::default())
    }

    /// Block scope: sees the enclosing scope through `parent` and
    /// inherits its loop/function context.
    pub fn child(&mut self, parent: ScopeId) -> ScopeId {
        let scope = Scope {
            parent: Some(parent),
            while_loop: self.get(parent).while_loop,
            current_function: self.get(parent).current_function.clone(),
            ..Scope::default()
        };
        self.push(scope)
    }

    /// Function-call scope: no lexical parent, lookup continues through
    /// the closure captured at definition time.
    pub fn call(&mut self, closure: ScopeId, function: Option<String>) -> ScopeId {
        self.push(Scope {
            closure: Some(closure),
            current_function: function,
            ..Scope::default()
        })
    }

    pub fn get(&self, id: ScopeId) -> &Scope {
        &self.arena[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.arena[id.0 as usize]
    }

    /// Bind a fresh local in exactly this scope.
    pub fn declare(&mut self, id: ScopeId, name: &str, value: Value) {
        self.get_mut(id).locals.insert(name.to_string(), value);
    }

    pub fn declared_here(&self, id: ScopeId, name: &str) -> bool {
        self.get(id).locals.contains_key(name)
    }

    /// First hit walking locals, then the closure chain, then the
    /// lexical parent. Returns the scope the name was found in so
    /// assignment can write back into it.
    pub fn lookup(&self, id: ScopeId, name: &str) -> Option<(ScopeId, Value)> {
        let scope = self.get(id);
        if let Some(v) = scope.locals.get(name) {
            return Some((id, v.clone()));
        }
        if let Some(closure) = scope.closure {
            if let Some(hit) = self.lookup(closure, name) {
                return Some(hit);
            }
        }
        scope.parent.and_then(|p| self.lookup(p, name))
    }

    /// Overwrite an existing binding in the scope `lookup` reported.
    pub fn assign(&mut self, id: ScopeId, name: &str, value: Value) {
        self.get_mut(id).locals.insert(name.to_string(), value);
    }

    pub fn set_guard(&mut self, id: ScopeId, name: &str, ty: Type) {
        self.get_mut(id).guards.insert(name.to_string(), ty);
    }

    /// The recorded guard for `name`, found along the same path as
    /// `lookup`.
    pub fn guard(&self, id: ScopeId, name: &str) -> Option<Type> {
        let scope = self.get(id);
        if let Some(t) = scope.guards.get(name) {
            return Some(t.clone());
        }
        if scope.locals.contains_key(name) {
            return None;
        }
        if let Some(closure) = scope.closure {
            if let Some(t) = self.guard(closure, name) {
                return Some(t);
            }
        }
        scope.parent.and_then(|p| self.guard(p, name))
    }

    /// Whether this point is lexically inside a `while` body. The walk
    /// stops at function-call scopes, which have no lexical parent.
    pub fn in_loop(&self, id: ScopeId) -> bool {
        let scope = self.get(id);
        scope.while_loop || scope.parent.map_or(false, |p| self.in_loop(p))
    }

    /// Name of the function whose body this point is in, if any.
    pub fn enclosing_function(&self, id: ScopeId) -> Option<String> {
        let scope = self.get(id);
        if scope.current_function.is_some() {
            return scope.current_function.clone();
        }
        scope.parent.and_then(|p| self.enclosing_function(p))
    }

    pub fn typed_cache_get(&self, id: ScopeId, func: usize) -> Option<Type> {
        self.get(id).typed.get(&func).cloned()
    }

    pub fn typed_cache_insert(&mut self, id: ScopeId, func: usize, ty: Type) {
        self.get_mut(id).typed.insert(func, ty);
    }

    /// Names visible from a scope, for "did you mean" suggestions.
    pub fn visible_names(&self, id: ScopeId) -> Vec<String> {
        let mut names = Vec::new();
        let mut cursor = Some(id);
        while let Some(at) = cursor {
            let scope = self.get(at);
            names.extend(scope.locals.keys().cloned());
            cursor = scope.parent.or(scope.closure);
        }
        names.sort();
        names.dedup();
        names
    }
}
