use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;

use crate::ast::{Node, NodeKind};
use crate::error::ImportError;
use crate::interpreter::Interpreter;
use crate::parser::Parser;
use crate::scope::ScopeId;
use crate::token::Pos;

/// One imported unit, keyed in the namespace by its alias or path.
/// The AST is taken out while a phase walks it; a Nop placeholder marks
/// the walk in progress so import cycles do not re-enter.
pub struct ModuleEntry {
    ast: Node,
    symbols: Vec<String>,
    vscope: Option<ScopeId>,
    escope: Option<ScopeId>,
}

/// Process-wide module table for a single interpretation.
#[derive(Default)]
pub struct Namespace {
    modules: HashMap<String, ModuleEntry>,
}

impl Namespace {
    pub fn new() -> Self {
        Namespace::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.modules.contains_key(key)
    }

    pub fn insert(&mut self, key: String, ast: Node, symbols: Vec<String>) {
        self.modules.insert(
            key,
            ModuleEntry {
                ast,
                symbols,
                vscope: None,
                escope: None,
            },
        );
    }

    pub fn symbols(&self, key: &str) -> Option<&[String]> {
        self.modules.get(key).map(|e| e.symbols.as_slice())
    }

    /// Scope holding the module's validated declarations.
    pub fn validation_scope(&self, key: &str) -> Option<ScopeId> {
        self.modules.get(key).and_then(|e| e.vscope)
    }

    /// Scope holding the module's evaluated declarations.
    pub fn symbol_scope(&self, key: &str) -> Option<ScopeId> {
        self.modules.get(key).and_then(|e| e.escope)
    }

    pub fn take_ast_for_validation(&mut self, key: &str) -> Option<Node> {
        let entry = self.modules.get_mut(key)?;
        if entry.vscope.is_some() || entry.ast.is_nop() {
            return None;
        }
        Some(std::mem::replace(&mut entry.ast, Node::nop()))
    }

    pub fn finish_validation(&mut self, key: &str, ast: Node, scope: ScopeId) {
        if let Some(entry) = self.modules.get_mut(key) {
            entry.ast = ast;
            entry.vscope = Some(scope);
        }
    }

    pub fn take_ast_for_eval(&mut self, key: &str) -> Option<Node> {
        let entry = self.modules.get_mut(key)?;
        if entry.escope.is_some() || entry.ast.is_nop() {
            return None;
        }
        Some(std::mem::replace(&mut entry.ast, Node::nop()))
    }

    pub fn finish_eval(&mut self, key: &str, ast: Node, scope: ScopeId) {
        if let Some(entry) = self.modules.get_mut(key) {
            entry.ast = ast;
            entry.escope = Some(scope);
        }
    }
}

/// Resolves `import` statements before validation: loads and parses each
/// module file, checks its `module` declaration, records its top-level
/// symbols, and rewrites bare identifiers in the importing unit into
/// qualified ones.
pub struct ModuleImporter<'a> {
    interp: &'a mut Interpreter,
    /// Modules loaded during this compilation; breaks import cycles.
    seen: HashSet<String>,
}

impl<'a> ModuleImporter<'a> {
    pub fn new(interp: &'a mut Interpreter) -> Self {
        ModuleImporter {
            interp,
            seen: HashSet::new(),
        }
    }

    pub fn process(&mut self, program: &mut Node) -> Result<(), ImportError> {
        // Names declared anywhere in this unit (including parameters)
        // shadow imported symbols and are never rewritten.
        let mut declared = HashSet::new();
        walk_mut(program, &mut |node| {
            match &node.kind {
                NodeKind::VarDecl { name, .. } | NodeKind::TypeDecl { name, .. } => {
                    declared.insert(name.clone());
                }
                NodeKind::FuncDef(def) => {
                    if let Some(name) = &def.name {
                        declared.insert(name.clone());
                    }
                    for param in def.params.borrow().iter() {
                        declared.insert(param.name.clone());
                    }
                }
                _ => {}
            }
        });

        let NodeKind::Program(stmts) = &mut program.kind else {
            return Ok(());
        };

        let mut imported: Vec<(String, HashSet<String>)> = Vec::new();
        for stmt in stmts.iter() {
            if let NodeKind::Import { path, alias } = &stmt.kind {
                let key = alias.clone().unwrap_or_else(|| path.clone());
                self.import(path, &key, stmt.pos)?;
                if let Some(symbols) = self.interp.namespace.symbols(&key) {
                    imported.push((key, symbols.iter().cloned().collect()));
                }
            }
        }

        for (key, symbols) in imported {
            for stmt in stmts.iter_mut() {
                walk_mut(stmt, &mut |node| {
                    if let NodeKind::Ident(name) = &node.kind {
                        if symbols.contains(name) && !declared.contains(name) {
                            node.kind = NodeKind::QualIdent {
                                module: key.clone(),
                                name: name.clone(),
                            };
                        }
                    }
                });
            }
        }
        Ok(())
    }

    fn import(&mut self, path: &str, key: &str, pos: Pos) -> Result<(), ImportError> {
        if self.interp.namespace.contains(key) || self.seen.contains(path) {
            return Ok(());
        }
        self.seen.insert(path.to_string());

        let fail = |message: String| ImportError {
            module: path.to_string(),
            message,
            pos,
        };

        let file = self.resolve(path).ok_or_else(|| {
            fail(format!(
                "no file {}.plang found in the module directories",
                path.replace("::", "/")
            ))
        })?;
        log::debug!("importing module {} from {}", path, file.display());
        let source =
            fs::read_to_string(&file).map_err(|e| fail(format!("cannot read {}: {}", file.display(), e)))?;

        let mut parser = Parser::from_source(&source, self.interp.type_name_set());
        let mut ast = parser
            .parse_program()
            .map_err(|errors| fail(errors.to_string()))?;

        let symbols = module_symbols(path, &ast).map_err(|(message, at)| ImportError {
            module: path.to_string(),
            message,
            pos: if at.is_eof() { pos } else { at },
        })?;

        // The module may import further modules of its own.
        self.process(&mut ast)?;

        self.interp.namespace.insert(key.to_string(), ast, symbols);
        Ok(())
    }

    /// First `<dir>/<path with :: as />.plang` that exists wins.
    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let rel = format!("{}.plang", path.replace("::", "/"));
        self.interp
            .module_dirs
            .iter()
            .map(|dir| dir.join(&rel))
            .find(|candidate| candidate.exists())
    }
}

/// Check the module's declaration shape and collect its top-level
/// symbols: the `module` declaration must come first and match the
/// requested path; symbol redeclaration is fatal.
fn module_symbols(target: &str, ast: &Node) -> Result<Vec<String>, (String, Pos)> {
    let NodeKind::Program(stmts) = &ast.kind else {
        return Ok(Vec::new());
    };
    let mut declared_module = false;
    let mut symbols: Vec<String> = Vec::new();

    let mut declare = |name: &str, pos: Pos, declared_module: bool| {
        if !declared_module {
            return Err((
                "declarations must follow a module declaration".to_string(),
                pos,
            ));
        }
        if symbols.iter().any(|s| s == name) {
            return Err((format!("redeclaration of '{}' in module", name), pos));
        }
        symbols.push(name.to_string());
        Ok(())
    };

    for stmt in stmts {
        match &stmt.kind {
            NodeKind::ModuleDecl(name) => {
                if declared_module {
                    return Err(("duplicate module declaration".to_string(), stmt.pos));
                }
                if name != target {
                    return Err((
                        format!("file declares module {} but {} was requested", name, target),
                        stmt.pos,
                    ));
                }
                declared_module = true;
            }
            NodeKind::VarDecl { name, .. } => declare(name, stmt.pos, declared_module)?,
            NodeKind::TypeDecl { name, .. } => declare(name, stmt.pos, declared_module)?,
            NodeKind::FuncDef(def) => {
                if let Some(name) = &def.name {
                    declare(name, stmt.pos, declared_module)?;
                }
            }
            _ => {}
        }
    }

    if !declared_module {
        return Err(("missing module declaration".to_string(), Pos::EOF));
    }
    Ok(symbols)
}

/// Pre-order walk applying `f` to every node, descending into shared
/// function definitions.
pub fn walk_mut(node: &mut Node, f: &mut dyn FnMut(&mut Node)) {
    f(node);
    match &mut node.kind {
        NodeKind::Program(items) | NodeKind::Block(items) | NodeKind::ArrayLit(items) => {
            for item in items {
                walk_mut(item, f);
            }
        }
        NodeKind::MapLit(entries) => {
            for (key, value) in entries {
                walk_mut(key, f);
                walk_mut(value, f);
            }
        }
        NodeKind::VarDecl { init, .. } => {
            if let Some(init) = init {
                walk_mut(init, f);
            }
        }
        NodeKind::Assign { target, value, .. } => {
            walk_mut(target, f);
            walk_mut(value, f);
        }
        NodeKind::Binary { lhs, rhs, .. }
        | NodeKind::Logical { lhs, rhs, .. } => {
            walk_mut(lhs, f);
            walk_mut(rhs, f);
        }
        NodeKind::Range { from, to } => {
            walk_mut(from, f);
            walk_mut(to, f);
        }
        NodeKind::Unary { expr, .. } => walk_mut(expr, f),
        NodeKind::Prefix { target, .. } | NodeKind::Postfix { target, .. } => {
            walk_mut(target, f)
        }
        NodeKind::Cond { cond, then, els } => {
            walk_mut(cond, f);
            walk_mut(then, f);
            if let Some(els) = els {
                walk_mut(els, f);
            }
        }
        NodeKind::While { cond, body } => {
            walk_mut(cond, f);
            walk_mut(body, f);
        }
        NodeKind::Last(value) | NodeKind::Return(value) => {
            if let Some(value) = value {
                walk_mut(value, f);
            }
        }
        NodeKind::FuncDef(def) => {
            for param in def.params.borrow_mut().iter_mut() {
                if let Some(default) = &mut param.default {
                    walk_mut(default, f);
                }
            }
            walk_mut(&mut def.body.borrow_mut(), f);
        }
        NodeKind::Call { target, args } => {
            walk_mut(target, f);
            for arg in args {
                walk_mut(arg, f);
            }
        }
        NodeKind::NamedArg { value, .. } => walk_mut(value, f),
        NodeKind::Access { target, key } => {
            walk_mut(target, f);
            walk_mut(key, f);
        }
        NodeKind::Dot { target, .. } => walk_mut(target, f),
        NodeKind::Exists(inner)
        | NodeKind::Delete(inner)
        | NodeKind::Keys(inner)
        | NodeKind::Values(inner)
        | NodeKind::Throw(inner) => walk_mut(inner, f),
        NodeKind::Try { body, catches } => {
            walk_mut(body, f);
            for catch in catches {
                if let Some(cond) = &mut catch.cond {
                    walk_mut(cond, f);
                }
                walk_mut(&mut catch.handler, f);
            }
        }
        NodeKind::Nop
        | NodeKind::IntLit(_)
        | NodeKind::RealLit(_)
        | NodeKind::BoolLit(_)
        | NodeKind::NullLit
        | NodeKind::StrLit(_)
        | NodeKind::InterpLit(_)
        | NodeKind::Ident(_)
        | NodeKind::QualIdent { .. }
        | NodeKind::Next
        | NodeKind::TypeDecl { .. }
        | NodeKind::ModuleDecl(_)
        | NodeKind::Import { .. } => {}
    }
}
