//! Function-literal lowering and deferred closure emission
//!
//! A function literal lowers at its creation site to a function *value*;
//! the implementation and its language-ABI wrapper are queued and emitted
//! after the main program walk. Three creation shapes:
//!
//! 1. no captures: a plain function-pointer value;
//! 2. captures that all live in the enclosing function's shared
//!    environment; the value binds that environment;
//! 3. anything else: a fresh `hml_closure_env_new` cell per closure,
//!    each capture stored under its resolved (possibly mangled) name.
//!
//! A `let f = fn(...) { ... f(...) ... }` self-reference captures an
//! uninitialized slot; the surrounding `let` patches it right after the
//! binding initializes (see `gen_let`). When the binding is
//! tail-recursive, the self-name is not captured at all: every recursive
//! return becomes a goto to the entry label.

use super::state::{
    emit, ClosureBodyCtx, ClosureInfo, FunctionCtx, LastClosure, SharedEnvCtx, TailCtx, VarSlot,
    sanitize_ident,
};
use super::{CodeGenError, Codegen};
use crate::ast::{
    CatchClause, Expr, ExprKind, FunctionLit, InterpolationPart, OptionalAccess, Stmt, StmtKind,
};
use crate::tailcall;
use crate::types::CheckedType;
use std::collections::HashSet;

impl<'cfg> Codegen<'cfg> {
    /// Lower a function literal to a function value, queuing the body
    /// for deferred emission. `let_name` is the binding name when the
    /// literal is the initializer of a `let`.
    pub(super) fn gen_function_value(
        &mut self,
        lit: &FunctionLit,
        let_name: Option<&str>,
    ) -> Result<String, CodeGenError> {
        let c_name = self.fresh_anon();
        let tail_ok = self.optimize()
            && let_name.is_some_and(|n| tailcall::is_tail_recursive(n, &lit.body));

        let mut free = free_vars(lit);
        if tail_ok
            && let Some(n) = let_name
        {
            // Every reference to the name is a tail call; no capture.
            free.retain(|f| f != n);
        }
        // Capture what resolves to a visible binding, plus the in-flight
        // self-name (its slot is patched after the binding initializes).
        let captured: Vec<(String, CheckedType)> = free
            .into_iter()
            .filter_map(|name| {
                if self.resolve(&name).is_some() {
                    let ty = self
                        .env
                        .lookup(&name)
                        .map(|b| b.ty.clone())
                        .unwrap_or_else(CheckedType::any);
                    Some((name, ty))
                } else if let_name == Some(name.as_str()) {
                    let ty = self
                        .registry
                        .function(&name)
                        .map(|s| s.as_type())
                        .unwrap_or_else(CheckedType::any);
                    Some((name, ty))
                } else {
                    None
                }
            })
            .collect();

        let num_params = lit.params.len();
        let num_required = lit.num_required();
        let has_rest = lit.has_rest();
        self.emit_forward_decls(&c_name, lit, !captured.is_empty());

        let t = self.fresh_temp();
        let ctor_suffix = if has_rest { "_rest" } else { "" };
        let mut env_var = None;
        let mut shared_indices = None;
        let mut env_indices: Vec<usize> = (0..captured.len()).collect();

        if captured.is_empty() {
            emit!(
                self,
                "HmlValue {} = hml_val_function{}((HmlFn){}_wrapper, {}, {}, {});",
                t,
                ctor_suffix,
                c_name,
                num_params,
                num_required,
                lit.is_async as u8
            )?;
        } else if let Some(indices) = self.shared_env_indices(&captured) {
            // Case 2: every capture already lives in the shared cell.
            let shared = self
                .current_fn_ref()
                .shared_env
                .as_ref()
                .expect("shared_env_indices implies a shared environment")
                .c_name
                .clone();
            emit!(
                self,
                "HmlValue {} = hml_val_function_with_env{}((HmlFn){}_wrapper, {}, {}, {}, {});",
                t,
                ctor_suffix,
                c_name,
                shared,
                num_params,
                num_required,
                lit.is_async as u8
            )?;
            env_var = Some(shared);
            env_indices = indices.clone();
            shared_indices = Some(indices);
        } else {
            // Case 3: a dedicated environment cell for this closure.
            let env = self.fresh_named("env");
            emit!(
                self,
                "HmlValue *{} = hml_closure_env_new({});",
                env,
                captured.len()
            )?;
            for (i, (name, _)) in captured.iter().enumerate() {
                if let_name == Some(name.as_str()) && self.resolve(name).is_none() {
                    // Self-reference: slot is patched after the let.
                    emit!(self, "hml_closure_env_set({}, {}, hml_val_null());", env, i)?;
                    continue;
                }
                match self.resolve(name) {
                    Some(VarSlot::Unboxed { c_name, var }) => {
                        emit!(
                            self,
                            "hml_closure_env_set({}, {}, {}({}));",
                            env,
                            i,
                            var.native.box_fn(),
                            c_name
                        )?;
                    }
                    Some(VarSlot::Local { c_name }) | Some(VarSlot::Global { c_name }) => {
                        emit!(self, "hml_closure_env_set({}, {}, {});", env, i, c_name)?;
                    }
                    None => {
                        emit!(self, "hml_closure_env_set({}, {}, hml_val_null());", env, i)?;
                    }
                }
            }
            emit!(
                self,
                "HmlValue {} = hml_val_function_with_env{}((HmlFn){}_wrapper, {}, {}, {}, {});",
                t,
                ctor_suffix,
                c_name,
                env,
                num_params,
                num_required,
                lit.is_async as u8
            )?;
            env_var = Some(env);
        }

        self.last_closure = Some(LastClosure {
            env_var,
            captured: captured.iter().map(|(n, _)| n.clone()).collect(),
            env_indices: env_indices.clone(),
            impl_name: c_name.clone(),
            num_params,
            has_rest,
        });

        let module = self
            .fn_stack
            .iter()
            .rev()
            .find_map(|f| f.module.clone());
        self.closures.push_back(ClosureInfo {
            c_name,
            lit: lit.clone(),
            module,
            captured,
            shared_indices,
            tail_name: if tail_ok {
                let_name.map(|n| n.to_string())
            } else {
                None
            },
        });
        Ok(t)
    }

    /// When the enclosing function set up a shared environment and every
    /// capture has a slot in it, return the slot index per capture.
    fn shared_env_indices(&self, captured: &[(String, CheckedType)]) -> Option<Vec<usize>> {
        let shared = self.current_fn_ref().shared_env.as_ref()?;
        captured
            .iter()
            .map(|(name, _)| shared.indices.get(name).copied())
            .collect()
    }

    fn emit_forward_decls(&mut self, c_name: &str, lit: &FunctionLit, has_env: bool) {
        let mut params: Vec<&str> = lit.params.iter().map(|_| "HmlValue").collect();
        if has_env {
            params.push("HmlValue *");
        }
        let list = if params.is_empty() {
            "void".to_string()
        } else {
            params.join(", ")
        };
        self.decls
            .push_str(&format!("static HmlValue {}({});\n", c_name, list));
        self.decls.push_str(&format!(
            "static HmlValue {}_wrapper(int argc, HmlValue *argv, HmlValue *env);\n",
            c_name
        ));
    }

    // ------------------------------------------------------------------
    // Deferred emission
    // ------------------------------------------------------------------

    /// Emit every queued closure. Emitting one body can queue more
    /// (nested literals), so this drains until empty.
    pub(super) fn emit_queued_closures(&mut self) -> Result<(), CodeGenError> {
        while let Some(info) = self.closures.pop_front() {
            self.emit_closure(info)?;
        }
        Ok(())
    }

    fn emit_closure(&mut self, info: ClosureInfo) -> Result<(), CodeGenError> {
        let has_env = !info.captured.is_empty();
        let param_names: Vec<String> = info
            .lit
            .params
            .iter()
            .map(|p| sanitize_ident(&p.name))
            .collect();

        let mut sig_params: Vec<String> = param_names
            .iter()
            .map(|p| format!("HmlValue {}", p))
            .collect();
        if has_env {
            sig_params.push("HmlValue *_env".to_string());
        }
        let sig_list = if sig_params.is_empty() {
            "void".to_string()
        } else {
            sig_params.join(", ")
        };

        let saved_depth = std::mem::take(&mut self.block_depth);
        let body = self.with_fresh_out(1, |cg| {
            cg.fn_stack.push(FunctionCtx {
                module: info.module.clone(),
                ..FunctionCtx::default()
            });
            cg.push_scope();

            // Parameters.
            for (param, c_name) in info.lit.params.iter().zip(&param_names) {
                let ty = if param.rest {
                    CheckedType::array(None)
                } else {
                    param
                        .ty
                        .as_ref()
                        .map(|t| cg.registry.resolve_annotation(t))
                        .unwrap_or_else(CheckedType::any)
                };
                cg.bind_slot(&param.name, VarSlot::Local { c_name: c_name.clone() }, ty);
            }

            // Captured values read from the environment at entry.
            if has_env {
                let mut ctx_caps = Vec::with_capacity(info.captured.len());
                for (i, (name, ty)) in info.captured.iter().enumerate() {
                    let env_idx = info
                        .shared_indices
                        .as_ref()
                        .map(|s| s[i])
                        .unwrap_or(i);
                    let c_local = cg.local_c_name(name);
                    emit!(cg, "HmlValue {} = _env[{}];", c_local, env_idx)?;
                    cg.bind_slot(name, VarSlot::Local { c_name: c_local }, ty.clone());
                    ctx_caps.push((name.clone(), env_idx));
                }
                cg.current_fn().closure = Some(ClosureBodyCtx {
                    env_var: "_env".to_string(),
                    captured: ctx_caps,
                });
            }

            // Entry label for tail-call-to-loop conversion; re-entry runs
            // the default bindings again.
            if let Some(tail_name) = &info.tail_name {
                let entry = cg.fresh_label();
                cg.emit_label(&entry)?;
                cg.current_fn().tail = Some(TailCtx {
                    name: tail_name.clone(),
                    entry_label: entry,
                    params: param_names.clone(),
                });
            }

            // Defaulted parameters fill in when the caller omitted them.
            for (param, c_name) in info.lit.params.iter().zip(&param_names) {
                if let Some(default) = &param.default {
                    emit!(cg, "if ({}.type == HML_VAL_NULL) {{", c_name)?;
                    cg.indent += 1;
                    let d = cg.gen_expr(default)?;
                    emit!(cg, "{} = {};", c_name, d)?;
                    cg.indent -= 1;
                    emit!(cg, "}}")?;
                }
            }

            cg.setup_shared_env(&info.lit.body)?;

            let terminated = cg.gen_stmts(&info.lit.body)?;
            if !terminated {
                if cg.current_fn_ref().has_defers {
                    emit!(cg, "hml_defer_execute_all();")?;
                }
                emit!(cg, "return hml_val_null();")?;
            }

            cg.pop_scope();
            cg.fn_stack.pop();
            Ok(())
        })?;
        self.block_depth = saved_depth;

        self.impls
            .push_str(&format!("static HmlValue {}({}) {{\n", info.c_name, sig_list));
        self.impls.push_str(&body);
        self.impls.push_str("}\n\n");

        self.emit_wrapper(&info, &param_names, has_env)?;
        Ok(())
    }

    /// The language-ABI wrapper registered with `hml_val_function*`:
    /// `(argc, argv, env)`, padding missing arguments with null and
    /// collecting extras into the rest array.
    fn emit_wrapper(
        &mut self,
        info: &ClosureInfo,
        param_names: &[String],
        has_env: bool,
    ) -> Result<(), CodeGenError> {
        let mut w = format!(
            "static HmlValue {}_wrapper(int argc, HmlValue *argv, HmlValue *env) {{\n",
            info.c_name
        );
        let positional = if info.lit.has_rest() {
            param_names.len().saturating_sub(1)
        } else {
            param_names.len()
        };
        if positional == 0 && !info.lit.has_rest() {
            w.push_str("    (void)argc;\n    (void)argv;\n");
        }
        if !has_env {
            w.push_str("    (void)env;\n");
        }
        let mut call_args: Vec<String> = (0..positional)
            .map(|i| format!("argc > {i} ? argv[{i}] : hml_val_null()", i = i))
            .collect();
        if info.lit.has_rest() {
            w.push_str("    HmlValue _rest = hml_val_array();\n");
            w.push_str(&format!(
                "    for (int _i = {}; _i < argc; _i++) hml_array_push(_rest, argv[_i]);\n",
                positional
            ));
            call_args.push("_rest".to_string());
        }
        if has_env {
            call_args.push("env".to_string());
        }
        w.push_str(&format!(
            "    return {}({});\n}}\n\n",
            info.c_name,
            call_args.join(", ")
        ));
        self.impls.push_str(&w);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Shared environments
    // ------------------------------------------------------------------

    /// Decide whether the function body being emitted should allocate a
    /// shared environment for its sibling closures, and emit it.
    ///
    /// Sharing applies when at least two literals capture
    /// function-scoped locals. It is disabled whenever a function
    /// literal sits inside a loop: each iteration must observe its own
    /// values, which a shared cell cannot provide.
    pub(super) fn setup_shared_env(&mut self, body: &[Stmt]) -> Result<(), CodeGenError> {
        if !self.optimize() {
            return Ok(());
        }
        let mut literals = Vec::new();
        collect_fn_literals(body, false, &mut literals);
        if literals.len() < 2 || literals.iter().any(|(_, in_loop)| *in_loop) {
            return Ok(());
        }

        // Function-scoped names: parameters (already bound) and lets of
        // the top statement list.
        let mut function_scoped: Vec<String> = Vec::new();
        for stmt in body {
            if let StmtKind::Let { name, .. } | StmtKind::Const { name, .. } = &stmt.kind
                && !function_scoped.contains(name)
            {
                function_scoped.push(name.clone());
            }
        }
        let mut shared: Vec<String> = Vec::new();
        for (lit, _) in &literals {
            for name in free_vars(lit) {
                if function_scoped.contains(&name) && !shared.contains(&name) {
                    shared.push(name);
                }
            }
        }
        if shared.is_empty() {
            return Ok(());
        }

        let env = self.fresh_named("shenv");
        emit!(self, "HmlValue *{} = hml_closure_env_new({});", env, shared.len())?;
        let mut indices = std::collections::HashMap::new();
        for (i, name) in shared.iter().enumerate() {
            // Parameters have values now; lets store at declaration.
            if let Some(slot) = self.resolve(name) {
                emit!(self, "hml_closure_env_set({}, {}, {});", env, i, slot.c_name())?;
            }
            indices.insert(name.clone(), i);
        }
        self.current_fn().shared_env = Some(SharedEnvCtx {
            c_name: env,
            indices,
        });
        Ok(())
    }
}

// ----------------------------------------------------------------------
// Free-variable analysis
// ----------------------------------------------------------------------

/// Names a function literal references but does not define, in first-use
/// order. Nested literals contribute their own free names transitively.
pub(super) fn free_vars(lit: &FunctionLit) -> Vec<String> {
    let mut defined = HashSet::new();
    for p in &lit.params {
        defined.insert(p.name.clone());
    }
    collect_defined(&lit.body, &mut defined);
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    for stmt in &lit.body {
        free_in_stmt(stmt, &defined, &mut out, &mut seen);
    }
    out
}

/// All names the body defines anywhere (lets, loop variables, catch
/// bindings). Declaration order is ignored on purpose: a use before its
/// `let` reads null at runtime, it does not capture an outer binding.
fn collect_defined(stmts: &[Stmt], defined: &mut HashSet<String>) {
    for stmt in stmts {
        match &stmt.kind {
            StmtKind::Let { name, .. } | StmtKind::Const { name, .. } => {
                defined.insert(name.clone());
            }
            StmtKind::If {
                then_body,
                else_body,
                ..
            } => {
                collect_defined(then_body, defined);
                if let Some(eb) = else_body {
                    collect_defined(eb, defined);
                }
            }
            StmtKind::While { body, .. } => collect_defined(body, defined),
            StmtKind::For { init, body, .. } => {
                if let Some(init) = init {
                    collect_defined(std::slice::from_ref(init), defined);
                }
                collect_defined(body, defined);
            }
            StmtKind::ForIn {
                key, value, body, ..
            } => {
                defined.insert(key.clone());
                if let Some(v) = value {
                    defined.insert(v.clone());
                }
                collect_defined(body, defined);
            }
            StmtKind::Block(inner) => collect_defined(inner, defined),
            StmtKind::Try {
                body,
                catch,
                finally,
            } => {
                collect_defined(body, defined);
                if let Some(CatchClause { binding, body }) = catch {
                    if let Some(b) = binding {
                        defined.insert(b.clone());
                    }
                    collect_defined(body, defined);
                }
                if let Some(fin) = finally {
                    collect_defined(fin, defined);
                }
            }
            StmtKind::Switch { cases, .. } => {
                for c in cases {
                    collect_defined(&c.body, defined);
                }
            }
            StmtKind::Enum { name, .. } | StmtKind::DefineObject { name, .. } => {
                defined.insert(name.clone());
            }
            StmtKind::Export(inner) => collect_defined(std::slice::from_ref(inner), defined),
            _ => {}
        }
    }
}

fn free_in_stmt(
    stmt: &Stmt,
    defined: &HashSet<String>,
    out: &mut Vec<String>,
    seen: &mut HashSet<String>,
) {
    let visit_expr = |e: &Expr, out: &mut Vec<String>, seen: &mut HashSet<String>| {
        free_in_expr(e, defined, out, seen)
    };
    match &stmt.kind {
        StmtKind::Let { value, .. } | StmtKind::Const { value, .. } => visit_expr(value, out, seen),
        StmtKind::Expr(e) | StmtKind::Throw(e) => visit_expr(e, out, seen),
        StmtKind::Return(Some(e)) => visit_expr(e, out, seen),
        StmtKind::Return(None) | StmtKind::Break | StmtKind::Continue => {}
        StmtKind::If {
            cond,
            then_body,
            else_body,
        } => {
            visit_expr(cond, out, seen);
            for s in then_body {
                free_in_stmt(s, defined, out, seen);
            }
            if let Some(eb) = else_body {
                for s in eb {
                    free_in_stmt(s, defined, out, seen);
                }
            }
        }
        StmtKind::While { cond, body } => {
            visit_expr(cond, out, seen);
            for s in body {
                free_in_stmt(s, defined, out, seen);
            }
        }
        StmtKind::For {
            init,
            cond,
            update,
            body,
        } => {
            if let Some(init) = init {
                free_in_stmt(init, defined, out, seen);
            }
            if let Some(c) = cond {
                visit_expr(c, out, seen);
            }
            if let Some(u) = update {
                visit_expr(u, out, seen);
            }
            for s in body {
                free_in_stmt(s, defined, out, seen);
            }
        }
        StmtKind::ForIn { iterable, body, .. } => {
            visit_expr(iterable, out, seen);
            for s in body {
                free_in_stmt(s, defined, out, seen);
            }
        }
        StmtKind::Block(inner) => {
            for s in inner {
                free_in_stmt(s, defined, out, seen);
            }
        }
        StmtKind::Try {
            body,
            catch,
            finally,
        } => {
            for s in body {
                free_in_stmt(s, defined, out, seen);
            }
            if let Some(c) = catch {
                for s in &c.body {
                    free_in_stmt(s, defined, out, seen);
                }
            }
            if let Some(fin) = finally {
                for s in fin {
                    free_in_stmt(s, defined, out, seen);
                }
            }
        }
        StmtKind::Switch { subject, cases } => {
            visit_expr(subject, out, seen);
            for c in cases {
                if let Some(v) = &c.value {
                    visit_expr(v, out, seen);
                }
                for s in &c.body {
                    free_in_stmt(s, defined, out, seen);
                }
            }
        }
        StmtKind::Defer { call } => visit_expr(call, out, seen),
        StmtKind::Export(inner) => free_in_stmt(inner, defined, out, seen),
        StmtKind::DefineObject { fields, .. } => {
            for f in fields {
                if let Some(d) = &f.default {
                    visit_expr(d, out, seen);
                }
            }
        }
        StmtKind::Enum { .. }
        | StmtKind::Import { .. }
        | StmtKind::ImportFfi { .. }
        | StmtKind::ExternFn { .. } => {}
    }
}

fn free_in_expr(
    expr: &Expr,
    defined: &HashSet<String>,
    out: &mut Vec<String>,
    seen: &mut HashSet<String>,
) {
    match &expr.kind {
        ExprKind::Ident(name) => {
            if !defined.contains(name) && seen.insert(name.clone()) {
                out.push(name.clone());
            }
        }
        ExprKind::Number(_)
        | ExprKind::Bool(_)
        | ExprKind::Str(_)
        | ExprKind::Rune(_)
        | ExprKind::Null => {}
        ExprKind::Binary { left, right, .. } | ExprKind::NullCoalesce { left, right } => {
            free_in_expr(left, defined, out, seen);
            free_in_expr(right, defined, out, seen);
        }
        ExprKind::Unary { operand, .. } => free_in_expr(operand, defined, out, seen),
        ExprKind::Ternary {
            cond,
            then_val,
            else_val,
        } => {
            free_in_expr(cond, defined, out, seen);
            free_in_expr(then_val, defined, out, seen);
            free_in_expr(else_val, defined, out, seen);
        }
        ExprKind::Call { callee, args } => {
            free_in_expr(callee, defined, out, seen);
            for a in args {
                free_in_expr(a, defined, out, seen);
            }
        }
        ExprKind::Assign { name, value } => {
            if !defined.contains(name) && seen.insert(name.clone()) {
                out.push(name.clone());
            }
            free_in_expr(value, defined, out, seen);
        }
        ExprKind::Index { object, index } => {
            free_in_expr(object, defined, out, seen);
            free_in_expr(index, defined, out, seen);
        }
        ExprKind::IndexAssign {
            object,
            index,
            value,
        } => {
            free_in_expr(object, defined, out, seen);
            free_in_expr(index, defined, out, seen);
            free_in_expr(value, defined, out, seen);
        }
        ExprKind::GetProperty { object, .. } => free_in_expr(object, defined, out, seen),
        ExprKind::SetProperty { object, value, .. } => {
            free_in_expr(object, defined, out, seen);
            free_in_expr(value, defined, out, seen);
        }
        ExprKind::ArrayLiteral(elems) => {
            for e in elems {
                free_in_expr(e, defined, out, seen);
            }
        }
        ExprKind::ObjectLiteral(fields) => {
            for (_, e) in fields {
                free_in_expr(e, defined, out, seen);
            }
        }
        ExprKind::Function(nested) => {
            // Transitive captures: what the nested literal cannot find in
            // its own scope, this one must provide.
            for name in free_vars(nested) {
                if !defined.contains(&name) && seen.insert(name.clone()) {
                    out.push(name);
                }
            }
        }
        ExprKind::Await(inner) => free_in_expr(inner, defined, out, seen),
        ExprKind::StringInterpolation(parts) => {
            for part in parts {
                if let InterpolationPart::Expr(e) = part {
                    free_in_expr(e, defined, out, seen);
                }
            }
        }
        ExprKind::OptionalChain { object, access } => {
            free_in_expr(object, defined, out, seen);
            match access {
                OptionalAccess::Property(_) => {}
                OptionalAccess::Index(i) => free_in_expr(i, defined, out, seen),
                OptionalAccess::Call(args) => {
                    for a in args {
                        free_in_expr(a, defined, out, seen);
                    }
                }
            }
        }
        ExprKind::PrefixInc(t)
        | ExprKind::PrefixDec(t)
        | ExprKind::PostfixInc(t)
        | ExprKind::PostfixDec(t) => free_in_expr(t, defined, out, seen),
    }
}

/// Collect function literals in a body (not descending into them),
/// tagging whether each sits inside a loop.
fn collect_fn_literals<'a>(stmts: &'a [Stmt], in_loop: bool, out: &mut Vec<(&'a FunctionLit, bool)>) {
    for stmt in stmts {
        match &stmt.kind {
            StmtKind::Let { value, .. } | StmtKind::Const { value, .. } => {
                collect_fn_literals_expr(value, in_loop, out);
            }
            StmtKind::Expr(e) | StmtKind::Throw(e) => collect_fn_literals_expr(e, in_loop, out),
            StmtKind::Return(Some(e)) => collect_fn_literals_expr(e, in_loop, out),
            StmtKind::If {
                cond,
                then_body,
                else_body,
            } => {
                collect_fn_literals_expr(cond, in_loop, out);
                collect_fn_literals(then_body, in_loop, out);
                if let Some(eb) = else_body {
                    collect_fn_literals(eb, in_loop, out);
                }
            }
            StmtKind::While { cond, body } => {
                collect_fn_literals_expr(cond, true, out);
                collect_fn_literals(body, true, out);
            }
            StmtKind::For { init, cond, update, body } => {
                if let Some(init) = init {
                    collect_fn_literals(std::slice::from_ref(init), true, out);
                }
                if let Some(c) = cond {
                    collect_fn_literals_expr(c, true, out);
                }
                if let Some(u) = update {
                    collect_fn_literals_expr(u, true, out);
                }
                collect_fn_literals(body, true, out);
            }
            StmtKind::ForIn { iterable, body, .. } => {
                collect_fn_literals_expr(iterable, true, out);
                collect_fn_literals(body, true, out);
            }
            StmtKind::Block(inner) => collect_fn_literals(inner, in_loop, out),
            StmtKind::Try {
                body,
                catch,
                finally,
            } => {
                collect_fn_literals(body, in_loop, out);
                if let Some(c) = catch {
                    collect_fn_literals(&c.body, in_loop, out);
                }
                if let Some(fin) = finally {
                    collect_fn_literals(fin, in_loop, out);
                }
            }
            StmtKind::Switch { subject, cases } => {
                collect_fn_literals_expr(subject, in_loop, out);
                for c in cases {
                    collect_fn_literals(&c.body, in_loop, out);
                }
            }
            StmtKind::Defer { call } => collect_fn_literals_expr(call, in_loop, out),
            StmtKind::Export(inner) => collect_fn_literals(std::slice::from_ref(inner), in_loop, out),
            _ => {}
        }
    }
}

fn collect_fn_literals_expr<'a>(
    expr: &'a Expr,
    in_loop: bool,
    out: &mut Vec<(&'a FunctionLit, bool)>,
) {
    match &expr.kind {
        ExprKind::Function(lit) => out.push((lit, in_loop)),
        ExprKind::Binary { left, right, .. } | ExprKind::NullCoalesce { left, right } => {
            collect_fn_literals_expr(left, in_loop, out);
            collect_fn_literals_expr(right, in_loop, out);
        }
        ExprKind::Unary { operand, .. } => collect_fn_literals_expr(operand, in_loop, out),
        ExprKind::Ternary {
            cond,
            then_val,
            else_val,
        } => {
            collect_fn_literals_expr(cond, in_loop, out);
            collect_fn_literals_expr(then_val, in_loop, out);
            collect_fn_literals_expr(else_val, in_loop, out);
        }
        ExprKind::Call { callee, args } => {
            collect_fn_literals_expr(callee, in_loop, out);
            for a in args {
                collect_fn_literals_expr(a, in_loop, out);
            }
        }
        ExprKind::Assign { value, .. } => collect_fn_literals_expr(value, in_loop, out),
        ExprKind::ArrayLiteral(elems) => {
            for e in elems {
                collect_fn_literals_expr(e, in_loop, out);
            }
        }
        ExprKind::ObjectLiteral(fields) => {
            for (_, e) in fields {
                collect_fn_literals_expr(e, in_loop, out);
            }
        }
        _ => {}
    }
}
