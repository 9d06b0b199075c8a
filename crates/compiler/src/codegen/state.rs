//! Codegen state and core types
//!
//! `Codegen` carries everything lowering needs: the two output buffers
//! (declarations and implementations) plus the buffer currently being
//! written, the monotonic temp/anon/label counters, the lexical scope
//! stack with its C-name shadow map, the per-function context stack, and
//! the queue of closures awaiting deferred emission.
//!
//! Balance invariants: every `push_scope` pairs with one `pop_scope` on
//! every path, and the function-context stack mirrors the nesting of
//! bodies being emitted. Counters only grow within a compilation unit, so
//! generated names never collide.

use super::CodeGenError;
use crate::ast::FunctionLit;
use crate::config::CompilerConfig;
use crate::diagnostics::Diagnostics;
use crate::env::{Registry, TypeEnv};
use crate::escape::{UnboxTable, UnboxedVar};
use crate::infer::infer_expr;
use crate::modules::ModuleCache;
use crate::types::CheckedType;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Write as _;
use std::path::PathBuf;

/// Emit one indented line into the current output buffer.
macro_rules! emit {
    ($cg:expr, $($arg:tt)*) => {
        $cg.emit_line(format_args!($($arg)*))
    };
}
pub(super) use emit;

/// C keywords a Hemlock identifier may collide with.
const C_KEYWORDS: &[&str] = &[
    "auto", "break", "case", "char", "const", "continue", "default", "do", "double", "else",
    "enum", "extern", "float", "for", "goto", "if", "inline", "int", "long", "register",
    "restrict", "return", "short", "signed", "sizeof", "static", "struct", "switch", "typedef",
    "union", "unsigned", "void", "volatile", "while", "main", "argc", "argv",
];

/// Make a source identifier safe as a C identifier. Keywords get a
/// trailing underscore; a leading underscore is reserved for generated
/// names, so user identifiers starting with one gain a `v` prefix.
pub(super) fn sanitize_ident(name: &str) -> String {
    if C_KEYWORDS.contains(&name) {
        return format!("{}_", name);
    }
    if name.starts_with('_') {
        return format!("v{}", name);
    }
    name.to_string()
}

/// Where a name lives in the emitted C.
#[derive(Debug, Clone)]
pub(super) enum VarSlot {
    /// A C local of type `HmlValue`.
    Local { c_name: String },
    /// A native (unboxed) C local.
    Unboxed { c_name: String, var: UnboxedVar },
    /// A static global: `_main_x`, `_mod3_x`, or an import alias.
    Global { c_name: String },
}

impl VarSlot {
    pub fn c_name(&self) -> &str {
        match self {
            VarSlot::Local { c_name }
            | VarSlot::Unboxed { c_name, .. }
            | VarSlot::Global { c_name } => c_name,
        }
    }
}

/// One lexical scope of the generator's symbol table.
#[derive(Debug, Default)]
pub(super) struct Scope {
    slots: HashMap<String, VarSlot>,
    /// C names declared in this scope; a same-scope shadow must rename.
    declared: HashSet<String>,
}

/// Loop or switch context that a `break` can target.
#[derive(Debug, Clone)]
pub(super) enum Breakable {
    /// A C loop; `break;` works directly.
    Loop,
    /// A goto-lowered switch; `break` jumps to its end label.
    Switch { end_label: String },
}

/// Context for returns that must route through a `finally` block.
#[derive(Debug, Clone)]
pub(super) struct FinallyCtx {
    pub label: String,
    pub ret_slot: String,
    pub has_ret_flag: String,
    /// Whether the exception context is still pushed at the return site
    /// (true inside the try body, false inside the catch body).
    pub exc_active: bool,
}

/// Tail-call-to-loop context for the function currently being emitted.
#[derive(Debug, Clone)]
pub(super) struct TailCtx {
    /// Source name of the function; returns of `name(...)` become gotos.
    pub name: String,
    pub entry_label: String,
    /// C names of the parameters, in declaration order.
    pub params: Vec<String>,
}

/// A shared closure environment set up by the enclosing function.
#[derive(Debug, Clone, Default)]
pub(super) struct SharedEnvCtx {
    pub c_name: String,
    /// Captured variable name to slot index.
    pub indices: HashMap<String, usize>,
}

/// Set while emitting a closure body: which names are read from `_env`,
/// and at which environment slot each lives.
#[derive(Debug, Clone)]
pub(super) struct ClosureBodyCtx {
    pub env_var: String,
    pub captured: Vec<(String, usize)>,
}

impl ClosureBodyCtx {
    /// Environment slot index of a captured name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.captured
            .iter()
            .find(|(c, _)| c == name)
            .map(|(_, i)| *i)
    }
}

/// Per-function emission state.
#[derive(Debug, Default)]
pub(super) struct FunctionCtx {
    /// True for `main` and module init bodies: `let` binds a global.
    pub is_top_level: bool,
    /// Module being emitted, when this is a module init or module closure.
    pub module: Option<ModuleEmitCtx>,
    /// A defer has been pushed somewhere in this function.
    pub has_defers: bool,
    pub finally_stack: Vec<FinallyCtx>,
    pub tail: Option<TailCtx>,
    pub shared_env: Option<SharedEnvCtx>,
    pub closure: Option<ClosureBodyCtx>,
    pub breakables: Vec<Breakable>,
    /// One entry per enclosing loop; `Some` when `continue` must jump to
    /// a pre-increment label.
    pub continue_labels: Vec<Option<String>>,
}

/// Module identity carried through emission for name mangling.
#[derive(Debug, Clone)]
pub(super) struct ModuleEmitCtx {
    pub id: usize,
    pub prefix: String,
    pub exports: HashSet<String>,
}

/// A function literal queued for deferred emission.
#[derive(Debug)]
pub(super) struct ClosureInfo {
    /// Generated C name, e.g. `_anon_3`; the wrapper appends `_wrapper`.
    pub c_name: String,
    pub lit: FunctionLit,
    /// Module the literal was written in, for mangling inside the body.
    pub module: Option<ModuleEmitCtx>,
    /// Captured names with the types they had at the creation site.
    pub captured: Vec<(String, CheckedType)>,
    /// Indices into a shared environment, parallel to `captured`.
    pub shared_indices: Option<Vec<usize>>,
    /// The `let` name this literal was bound to, when eligible for
    /// tail-call conversion.
    pub tail_name: Option<String>,
}

/// Hand-off from a just-lowered function literal to the enclosing `let`,
/// so a self-referential binding can patch its environment slot and
/// capture-free top-level bindings can register for direct calls.
#[derive(Debug, Clone)]
pub(super) struct LastClosure {
    pub env_var: Option<String>,
    pub captured: Vec<String>,
    /// Environment slot index per captured name.
    pub env_indices: Vec<usize>,
    pub impl_name: String,
    pub num_params: usize,
    pub has_rest: bool,
}

/// Direct-call information for capture-free top-level function bindings.
#[derive(Debug, Clone)]
pub(super) struct DirectFn {
    pub impl_name: String,
    pub num_params: usize,
    pub has_rest: bool,
}

pub struct Codegen<'cfg> {
    pub(super) config: &'cfg CompilerConfig,
    pub(super) registry: Registry,
    pub(super) diags: Diagnostics,
    pub(super) cache: ModuleCache,
    /// Path of the unit currently being lowered (diagnostics prefix).
    pub(super) path: PathBuf,

    /// Globals and forward declarations.
    pub(super) decls: String,
    /// Function implementations, module inits, closures.
    pub(super) impls: String,
    /// The buffer statements are currently written into.
    pub(super) out: String,
    /// Finished body of the generated `main`.
    pub(super) main_body: String,
    pub(super) indent: usize,

    pub(super) temp_counter: usize,
    pub(super) anon_counter: usize,
    pub(super) label_counter: usize,

    /// Inference environment mirroring the lexical position.
    pub(super) env: TypeEnv,
    pub(super) scopes: Vec<Scope>,
    /// Per-base-name counter for same-scope shadow renames.
    pub(super) shadow_seq: HashMap<String, usize>,
    /// Unboxable-variable table for the body being lowered.
    pub(super) unbox: UnboxTable,

    pub(super) fn_stack: Vec<FunctionCtx>,
    pub(super) closures: VecDeque<ClosureInfo>,
    pub(super) direct_fns: HashMap<String, DirectFn>,
    pub(super) last_closure: Option<LastClosure>,
    /// Nesting below the direct statements of the body being emitted;
    /// zero means a `let` at unit top level binds a global.
    pub(super) block_depth: usize,
    /// FFI-imported function names; calls go through `hml_ffi_call`.
    pub(super) ffi_fns: HashSet<String>,
    /// `extern fn` names (declared or config-registered); calls are
    /// direct C calls to that symbol.
    pub(super) extern_syms: HashSet<String>,
}

impl<'cfg> Codegen<'cfg> {
    pub fn new(
        registry: Registry,
        diags: Diagnostics,
        cache: ModuleCache,
        path: impl Into<PathBuf>,
        config: &'cfg CompilerConfig,
    ) -> Self {
        Codegen {
            config,
            registry,
            diags,
            cache,
            path: path.into(),
            decls: String::new(),
            impls: String::new(),
            out: String::new(),
            main_body: String::new(),
            indent: 0,
            temp_counter: 0,
            anon_counter: 0,
            label_counter: 0,
            env: TypeEnv::new(),
            scopes: vec![Scope::default()],
            shadow_seq: HashMap::new(),
            unbox: UnboxTable::new(),
            fn_stack: Vec::new(),
            closures: VecDeque::new(),
            direct_fns: HashMap::new(),
            last_closure: None,
            block_depth: 0,
            ffi_fns: HashSet::new(),
            extern_syms: HashSet::new(),
        }
    }

    // ------------------------------------------------------------------
    // Emission primitives
    // ------------------------------------------------------------------

    pub(super) fn emit_line(&mut self, args: std::fmt::Arguments<'_>) -> Result<(), CodeGenError> {
        for _ in 0..self.indent {
            self.out.push_str("    ");
        }
        self.out.write_fmt(args)?;
        self.out.push('\n');
        Ok(())
    }

    /// Emit a label line at column zero of the current nesting.
    pub(super) fn emit_label(&mut self, label: &str) -> Result<(), CodeGenError> {
        writeln!(self.out, "{}: ;", label)?;
        Ok(())
    }

    /// Open an anonymous C block and a matching lexical scope.
    pub(super) fn begin_block(&mut self) -> Result<(), CodeGenError> {
        emit!(self, "{{")?;
        self.indent += 1;
        self.push_scope();
        Ok(())
    }

    pub(super) fn end_block(&mut self) -> Result<(), CodeGenError> {
        self.pop_scope();
        self.indent -= 1;
        emit!(self, "}}")
    }

    /// Swap in a fresh output buffer, run `f`, and return what it wrote,
    /// restoring the previous buffer and indent.
    pub(super) fn with_fresh_out<F>(&mut self, indent: usize, f: F) -> Result<String, CodeGenError>
    where
        F: FnOnce(&mut Self) -> Result<(), CodeGenError>,
    {
        let saved_out = std::mem::take(&mut self.out);
        let saved_indent = std::mem::replace(&mut self.indent, indent);
        let result = f(self);
        let produced = std::mem::replace(&mut self.out, saved_out);
        self.indent = saved_indent;
        result?;
        Ok(produced)
    }

    // ------------------------------------------------------------------
    // Names
    // ------------------------------------------------------------------

    pub(super) fn fresh_temp(&mut self) -> String {
        let n = self.temp_counter;
        self.temp_counter += 1;
        format!("_t{}", n)
    }

    pub(super) fn fresh_label(&mut self) -> String {
        let n = self.label_counter;
        self.label_counter += 1;
        format!("_L{}", n)
    }

    pub(super) fn fresh_anon(&mut self) -> String {
        let n = self.anon_counter;
        self.anon_counter += 1;
        format!("_anon_{}", n)
    }

    /// A unique C name with a descriptive prefix (exception contexts,
    /// finally slots, closure environments). Shares the temp counter so
    /// all generated names stay unique.
    pub(super) fn fresh_named(&mut self, prefix: &str) -> String {
        let n = self.temp_counter;
        self.temp_counter += 1;
        format!("_{}{}", prefix, n)
    }

    /// Pick the C name for a new local, renaming when the same scope
    /// already declared that name (C forbids same-scope redeclaration).
    pub(super) fn local_c_name(&mut self, name: &str) -> String {
        let base = sanitize_ident(name);
        let scope = self.scopes.last().expect("codegen always has a scope");
        if !scope.declared.contains(&base) {
            return base;
        }
        let seq = self.shadow_seq.entry(base.clone()).or_insert(1);
        *seq += 1;
        format!("{}_{}", base, *seq)
    }

    // ------------------------------------------------------------------
    // Scopes and bindings
    // ------------------------------------------------------------------

    pub(super) fn push_scope(&mut self) {
        self.scopes.push(Scope::default());
        self.env.push_scope();
    }

    pub(super) fn pop_scope(&mut self) {
        self.scopes.pop();
        self.env.pop_scope();
    }

    pub(super) fn bind_slot(&mut self, name: &str, slot: VarSlot, ty: CheckedType) {
        let scope = self.scopes.last_mut().expect("codegen always has a scope");
        scope.declared.insert(slot.c_name().to_string());
        scope.slots.insert(name.to_string(), slot);
        self.env.bind(name.to_string(), ty, false, 0);
    }

    pub(super) fn resolve(&self, name: &str) -> Option<VarSlot> {
        for scope in self.scopes.iter().rev() {
            if let Some(slot) = scope.slots.get(name) {
                return Some(slot.clone());
            }
        }
        None
    }

    pub(super) fn infer(&self, expr: &crate::ast::Expr) -> CheckedType {
        infer_expr(&self.env, &self.registry, expr)
    }

    // ------------------------------------------------------------------
    // Function contexts
    // ------------------------------------------------------------------

    pub(super) fn current_fn(&mut self) -> &mut FunctionCtx {
        self.fn_stack
            .last_mut()
            .expect("statement lowering always runs inside a function context")
    }

    pub(super) fn current_fn_ref(&self) -> &FunctionCtx {
        self.fn_stack
            .last()
            .expect("statement lowering always runs inside a function context")
    }

    /// The mangling prefix of the unit currently being emitted.
    pub(super) fn unit_prefix(&self) -> String {
        match self
            .fn_stack
            .iter()
            .rev()
            .find_map(|f| f.module.as_ref())
        {
            Some(m) => m.prefix.clone(),
            None => "_main_".to_string(),
        }
    }

    pub(super) fn optimize(&self) -> bool {
        self.config.optimize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_keywords_and_underscores() {
        assert_eq!(sanitize_ident("x"), "x");
        assert_eq!(sanitize_ident("double"), "double_");
        assert_eq!(sanitize_ident("switch"), "switch_");
        assert_eq!(sanitize_ident("_t5"), "v_t5");
    }

    #[test]
    fn generated_names_are_monotonic() {
        let config = CompilerConfig::default();
        let mut cg = Codegen::new(
            Registry::new(),
            Diagnostics::new(),
            ModuleCache::disconnected(),
            "main.hml",
            &config,
        );
        assert_eq!(cg.fresh_temp(), "_t0");
        assert_eq!(cg.fresh_temp(), "_t1");
        assert_eq!(cg.fresh_label(), "_L0");
        assert_eq!(cg.fresh_anon(), "_anon_0");
        assert_eq!(cg.fresh_anon(), "_anon_1");
    }

    #[test]
    fn same_scope_shadow_renames() {
        let config = CompilerConfig::default();
        let mut cg = Codegen::new(
            Registry::new(),
            Diagnostics::new(),
            ModuleCache::disconnected(),
            "main.hml",
            &config,
        );
        let first = cg.local_c_name("x");
        assert_eq!(first, "x");
        cg.bind_slot("x", VarSlot::Local { c_name: first }, CheckedType::i32());
        let second = cg.local_c_name("x");
        assert_eq!(second, "x_2");
        // A fresh scope starts clean.
        cg.push_scope();
        assert_eq!(cg.local_c_name("x"), "x");
        cg.pop_scope();
    }
}
