//! Module cache and import resolution
//!
//! The core does not touch the filesystem: a `ModuleLoader` supplied by
//! the driver resolves an import specifier to an absolute path and
//! produces the module's parsed `Program`. The cache memoizes both the
//! analysis (exports and their types) and the emission state, so a module
//! imported from several places is compiled exactly once.
//!
//! Mangling: module `n` exports `foo` as the C global `_mod<n>_foo`; the
//! main unit uses the `_main_` prefix.

use crate::ast::{ExprKind, Program, Stmt, StmtKind};
use crate::env::{FunctionSig, Registry, TypeEnv};
use crate::infer::infer_expr;
use crate::types::CheckedType;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Driver-supplied resolution and parsing.
pub trait ModuleLoader {
    /// Resolve an import specifier, relative to the importing file, to a
    /// canonical path used as the memoization key.
    fn resolve(&self, importer: &Path, spec: &str) -> Result<PathBuf, String>;

    /// Produce the parsed program for a resolved path.
    fn load(&mut self, path: &Path) -> Result<Program, String>;
}

/// Loader for configurations without module support; every import fails.
struct NullLoader;

impl ModuleLoader for NullLoader {
    fn resolve(&self, _importer: &Path, spec: &str) -> Result<PathBuf, String> {
        Err(format!(
            "cannot resolve module '{}': no module loader configured",
            spec
        ))
    }

    fn load(&mut self, path: &Path) -> Result<Program, String> {
        Err(format!("cannot load module '{}'", path.display()))
    }
}

/// In-memory loader keyed by specifier. Useful for embedding and tests.
#[derive(Default)]
pub struct MemoryLoader {
    modules: HashMap<String, Program>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        MemoryLoader::default()
    }

    pub fn insert(&mut self, spec: impl Into<String>, program: Program) {
        self.modules.insert(spec.into(), program);
    }
}

impl ModuleLoader for MemoryLoader {
    fn resolve(&self, _importer: &Path, spec: &str) -> Result<PathBuf, String> {
        if self.modules.contains_key(spec) {
            Ok(PathBuf::from(spec))
        } else {
            Err(format!("cannot resolve module '{}'", spec))
        }
    }

    fn load(&mut self, path: &Path) -> Result<Program, String> {
        self.modules
            .get(&path.to_string_lossy().to_string())
            .cloned()
            .ok_or_else(|| format!("cannot load module '{}'", path.display()))
    }
}

/// One export of a compiled module.
#[derive(Debug, Clone)]
pub struct ExportedSymbol {
    /// Name as declared in the module.
    pub name: String,
    /// Mangled C global, e.g. `_mod3_foo`.
    pub mangled: String,
    pub ty: CheckedType,
    /// Present when the export is a function literal binding.
    pub sig: Option<FunctionSig>,
}

/// Emission progress of a cached module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitState {
    NotStarted,
    /// Currently being lowered; hitting this again means a cycle.
    InProgress,
    Done,
}

struct ModuleEntry {
    path: PathBuf,
    prefix: String,
    program: Program,
    registry: Registry,
    exports: Vec<ExportedSymbol>,
    emit_state: EmitState,
}

/// Memoizing cache of analyzed and compiled modules.
pub struct ModuleCache {
    loader: Box<dyn ModuleLoader>,
    entries: Vec<ModuleEntry>,
    by_path: HashMap<PathBuf, usize>,
}

impl ModuleCache {
    pub fn new(loader: Box<dyn ModuleLoader>) -> Self {
        ModuleCache {
            loader,
            entries: Vec::new(),
            by_path: HashMap::new(),
        }
    }

    /// A cache that cannot load anything; imports become diagnostics.
    pub fn disconnected() -> Self {
        Self::new(Box::new(NullLoader))
    }

    /// Resolve and analyze a module, memoized by resolved path. Returns
    /// the module id.
    pub fn analyze(&mut self, importer: &Path, spec: &str) -> Result<usize, String> {
        let path = self.loader.resolve(importer, spec)?;
        if let Some(&id) = self.by_path.get(&path) {
            tracing::debug!(module = %path.display(), id, "module cache hit");
            return Ok(id);
        }
        let program = self.loader.load(&path)?;
        let id = self.entries.len();
        let prefix = format!("_mod{}_", id);

        let mut registry = Registry::new();
        crate::typechecker::register_declarations(&mut registry, &program.statements);
        let exports = collect_exports(&registry, &program.statements, &prefix);
        tracing::debug!(module = %path.display(), id, exports = exports.len(), "module analyzed");

        self.by_path.insert(path.clone(), id);
        self.entries.push(ModuleEntry {
            path,
            prefix,
            program,
            registry,
            exports,
            emit_state: EmitState::NotStarted,
        });
        Ok(id)
    }

    pub fn exports(&self, id: usize) -> &[ExportedSymbol] {
        &self.entries[id].exports
    }

    pub fn prefix(&self, id: usize) -> &str {
        &self.entries[id].prefix
    }

    pub fn path(&self, id: usize) -> &Path {
        &self.entries[id].path
    }

    /// Clone out the module's program for lowering.
    pub fn program(&self, id: usize) -> Program {
        self.entries[id].program.clone()
    }

    pub fn registry(&self, id: usize) -> &Registry {
        &self.entries[id].registry
    }

    pub fn emit_state(&self, id: usize) -> EmitState {
        self.entries[id].emit_state
    }

    pub fn set_emit_state(&mut self, id: usize, state: EmitState) {
        self.entries[id].emit_state = state;
    }

    /// Ids of every analyzed module, in analysis order.
    pub fn ids(&self) -> impl Iterator<Item = usize> {
        0..self.entries.len()
    }
}

/// Scan a module's top level for `export` statements and type them.
fn collect_exports(registry: &Registry, stmts: &[Stmt], prefix: &str) -> Vec<ExportedSymbol> {
    let env = TypeEnv::new();
    let mut exports = Vec::new();
    for stmt in stmts {
        let StmtKind::Export(inner) = &stmt.kind else {
            continue;
        };
        match &inner.kind {
            StmtKind::Let { name, ty, value } | StmtKind::Const { name, ty, value } => {
                let (ty, sig) = if let ExprKind::Function(lit) = &value.kind {
                    let sig = registry.signature_of(lit);
                    (sig.as_type(), Some(sig))
                } else {
                    let declared = ty.as_ref().map(|t| registry.resolve_annotation(t));
                    (
                        declared.unwrap_or_else(|| infer_expr(&env, registry, value)),
                        None,
                    )
                };
                exports.push(ExportedSymbol {
                    mangled: format!("{}{}", prefix, name),
                    name: name.clone(),
                    ty,
                    sig,
                });
            }
            StmtKind::Enum { name, .. } => {
                // The enum container is exported as an object global.
                exports.push(ExportedSymbol {
                    mangled: format!("{}{}", prefix, name),
                    name: name.clone(),
                    ty: CheckedType::object(),
                    sig: None,
                });
            }
            // Type declarations have no runtime global; nothing to bind.
            _ => {}
        }
    }
    exports
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Expr, Number, Param, TypeExpr};

    fn export_let(name: &str, value: Expr) -> Stmt {
        Stmt::new(
            StmtKind::Export(Box::new(Stmt::new(
                StmtKind::Let {
                    name: name.into(),
                    ty: None,
                    value,
                },
                1,
            ))),
            1,
        )
    }

    fn module_program() -> Program {
        Program::new(
            "util.hml",
            vec![
                export_let("answer", Expr::new(ExprKind::Number(Number::Int(42)), 1)),
                export_let(
                    "double",
                    Expr::new(
                        ExprKind::Function(crate::ast::FunctionLit {
                            params: vec![Param::required("x", Some(TypeExpr::I32))],
                            return_type: Some(TypeExpr::I32),
                            body: vec![],
                            is_async: false,
                        }),
                        2,
                    ),
                ),
            ],
        )
    }

    fn cache_with_util() -> ModuleCache {
        let mut loader = MemoryLoader::new();
        loader.insert("util", module_program());
        ModuleCache::new(Box::new(loader))
    }

    #[test]
    fn analyze_collects_typed_exports() {
        let mut cache = cache_with_util();
        let id = cache.analyze(Path::new("main.hml"), "util").unwrap();
        let exports = cache.exports(id);
        assert_eq!(exports.len(), 2);
        assert_eq!(exports[0].name, "answer");
        assert_eq!(exports[0].mangled, "_mod0_answer");
        assert_eq!(exports[0].ty.kind, crate::types::TypeKind::I32);
        assert!(exports[1].sig.is_some());
    }

    #[test]
    fn analysis_is_memoized() {
        let mut cache = cache_with_util();
        let a = cache.analyze(Path::new("main.hml"), "util").unwrap();
        let b = cache.analyze(Path::new("other.hml"), "util").unwrap();
        assert_eq!(a, b);
        assert_eq!(cache.ids().count(), 1);
    }

    #[test]
    fn unknown_module_is_an_error() {
        let mut cache = cache_with_util();
        assert!(cache.analyze(Path::new("main.hml"), "missing").is_err());
    }

    #[test]
    fn disconnected_cache_rejects_imports() {
        let mut cache = ModuleCache::disconnected();
        let err = cache.analyze(Path::new("main.hml"), "util").unwrap_err();
        assert!(err.contains("no module loader"));
    }

    #[test]
    fn emit_state_tracks_progress() {
        let mut cache = cache_with_util();
        let id = cache.analyze(Path::new("main.hml"), "util").unwrap();
        assert_eq!(cache.emit_state(id), EmitState::NotStarted);
        cache.set_emit_state(id, EmitState::InProgress);
        assert_eq!(cache.emit_state(id), EmitState::InProgress);
        cache.set_emit_state(id, EmitState::Done);
        assert_eq!(cache.emit_state(id), EmitState::Done);
    }
}
