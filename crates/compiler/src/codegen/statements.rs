//! Statement lowering
//!
//! Statements are lowered in source order. `gen_stmts` performs the
//! block-level dead-code elimination: once a statement is a syntactic
//! terminator (return, throw, break, continue), the rest of the list is
//! skipped. Control flow lowers to plain C loops and gotos:
//!
//! - `while` becomes `while (1) { if (!cond) break; ... }` so the
//!   condition temporary is released on both paths;
//! - `for` with an unboxable counter becomes a native `int32_t` loop,
//!   otherwise a boxed loop with a continue label before the increment;
//! - `switch` lowers to a test chain plus goto labels so fall-through
//!   matches the interpreter; `break` inside it jumps to the end label;
//! - `try`/`catch`/`finally` uses `setjmp` on an `HmlExceptionContext`,
//!   popping the context before the finally body runs.

use super::runtime::c_int_literal;
use super::state::{emit, Breakable, FinallyCtx, VarSlot};
use super::{CodeGenError, Codegen};
use crate::ast::{
    CatchClause, EnumVariant, Expr, ExprKind, FieldDef, Number, Stmt, StmtKind, SwitchCase,
    TypeExpr,
};
use crate::escape::{self, NativeKind, UnboxedVar};
use crate::tailcall;
use crate::types::{CheckedType, TypeKind};

impl<'cfg> Codegen<'cfg> {
    /// Lower a statement list with dead-code elimination. Returns true
    /// when every path through the list terminated.
    pub(super) fn gen_stmts(&mut self, stmts: &[Stmt]) -> Result<bool, CodeGenError> {
        let stashed = self.analyze_unboxables(stmts);
        let mut terminated = false;
        for stmt in stmts {
            if terminated {
                // Unreachable after a terminator; drop silently.
                break;
            }
            terminated = self.gen_stmt(stmt)?;
        }
        self.restore_unboxables(stashed);
        Ok(terminated)
    }

    /// Run the promotion analysis for this statement list and merge the
    /// results into the active table, returning what must be restored.
    fn analyze_unboxables(&mut self, stmts: &[Stmt]) -> Vec<(String, Option<UnboxedVar>)> {
        if !self.optimize() {
            return Vec::new();
        }
        // Direct top-level statements bind globals, which stay boxed.
        if self.current_fn_ref().is_top_level && self.block_depth == 0 {
            return Vec::new();
        }
        let mut fresh = crate::escape::UnboxTable::new();
        escape::analyze_body(stmts, &self.env, &self.registry, &mut fresh);
        let mut stashed = Vec::new();
        for (name, var) in fresh {
            let old = self.unbox.insert(name.clone(), var);
            stashed.push((name, old));
        }
        stashed
    }

    fn restore_unboxables(&mut self, stashed: Vec<(String, Option<UnboxedVar>)>) {
        for (name, old) in stashed {
            match old {
                Some(var) => {
                    self.unbox.insert(name, var);
                }
                None => {
                    self.unbox.remove(&name);
                }
            }
        }
    }

    /// Lower one statement; returns true when it is a terminator.
    pub(super) fn gen_stmt(&mut self, stmt: &Stmt) -> Result<bool, CodeGenError> {
        self.last_closure = None;
        match &stmt.kind {
            StmtKind::Let { name, ty, value } | StmtKind::Const { name, ty, value } => {
                self.gen_let(name, ty.as_ref(), value)?;
                Ok(false)
            }
            StmtKind::Expr(e) => {
                self.gen_expr_for_effect(e)?;
                Ok(false)
            }
            StmtKind::If {
                cond,
                then_body,
                else_body,
            } => {
                self.gen_if(cond, then_body, else_body.as_deref())?;
                Ok(false)
            }
            StmtKind::While { cond, body } => {
                self.gen_while(cond, body)?;
                Ok(false)
            }
            StmtKind::For {
                init,
                cond,
                update,
                body,
            } => {
                self.gen_for(init.as_deref(), cond.as_ref(), update.as_ref(), body)?;
                Ok(false)
            }
            StmtKind::ForIn {
                key,
                value,
                iterable,
                body,
            } => {
                self.gen_for_in(key, value.as_deref(), iterable, body)?;
                Ok(false)
            }
            StmtKind::Block(stmts) => {
                self.begin_block()?;
                self.block_depth += 1;
                let terminated = self.gen_stmts(stmts)?;
                self.block_depth -= 1;
                self.end_block()?;
                Ok(terminated)
            }
            StmtKind::Return(value) => {
                self.gen_return(value.as_ref())?;
                Ok(true)
            }
            StmtKind::Break => {
                match self.current_fn_ref().breakables.last().cloned() {
                    Some(Breakable::Switch { end_label }) => {
                        emit!(self, "goto {};", end_label)?;
                    }
                    _ => emit!(self, "break;")?,
                }
                Ok(true)
            }
            StmtKind::Continue => {
                match self.current_fn_ref().continue_labels.last().cloned() {
                    Some(Some(label)) => emit!(self, "goto {};", label)?,
                    _ => emit!(self, "continue;")?,
                }
                Ok(true)
            }
            StmtKind::DefineObject { name, fields } => {
                self.gen_define_object(name, fields)?;
                Ok(false)
            }
            StmtKind::Enum { name, variants } => {
                self.gen_enum(name, variants)?;
                Ok(false)
            }
            StmtKind::Try {
                body,
                catch,
                finally,
            } => {
                self.gen_try(body, catch.as_ref(), finally.as_deref())?;
                Ok(false)
            }
            StmtKind::Throw(value) => {
                let v = self.gen_expr(value)?;
                if self.current_fn_ref().has_defers {
                    emit!(self, "hml_defer_execute_all();")?;
                }
                emit!(self, "hml_throw({});", v)?;
                Ok(true)
            }
            StmtKind::Switch { subject, cases } => {
                self.gen_switch(subject, cases)?;
                Ok(false)
            }
            StmtKind::Defer { call } => {
                self.gen_defer(call)?;
                Ok(false)
            }
            StmtKind::Export(inner) => self.gen_stmt(inner),
            StmtKind::Import { spec, binding } => {
                self.gen_import(spec, binding, stmt.line)?;
                Ok(false)
            }
            StmtKind::ImportFfi { library, functions } => {
                self.gen_import_ffi(library, functions)?;
                Ok(false)
            }
            StmtKind::ExternFn { name, params, .. } => {
                let args: Vec<&str> = params.iter().map(|_| "HmlValue").collect();
                let decl = if args.is_empty() {
                    format!(
                        "extern HmlValue {}(void);",
                        super::state::sanitize_ident(name)
                    )
                } else {
                    format!(
                        "extern HmlValue {}({});",
                        super::state::sanitize_ident(name),
                        args.join(", ")
                    )
                };
                self.decls.push_str(&decl);
                self.decls.push('\n');
                Ok(false)
            }
        }
    }

    // ------------------------------------------------------------------
    // Bindings
    // ------------------------------------------------------------------

    fn gen_let(
        &mut self,
        name: &str,
        ann: Option<&TypeExpr>,
        value: &Expr,
    ) -> Result<(), CodeGenError> {
        let declared = ann.map(|t| self.registry.resolve_annotation(t));
        let top_level = self.current_fn_ref().is_top_level && self.block_depth == 0;

        // Native slot for a promoted typed let or accumulator.
        if !top_level
            && let Some(var) = self.unbox.remove(name)
            && let Some(native) = self.native_expr(value)
        {
            let c_name = self.local_c_name(name);
            emit!(self, "{} {} = {};", var.native.c_type(), c_name, native)?;
            let ty = declared.unwrap_or_else(|| self.infer(value));
            self.bind_slot(name, VarSlot::Unboxed { c_name, var }, ty);
            return Ok(());
        }

        let is_fn_literal = matches!(value.kind, ExprKind::Function(_));
        let inferred = self.infer(value);
        let v = if let ExprKind::Function(lit) = &value.kind {
            self.gen_function_value(lit, Some(name))?
        } else {
            self.gen_expr(value)?
        };
        let v = self.emit_binding_validation(v, declared.as_ref(), &inferred)?;

        let bound_ty = declared.unwrap_or(inferred);

        let c_name = if top_level {
            let prefix = self.unit_prefix();
            let c_name = format!("{}{}", prefix, super::state::sanitize_ident(name));
            // Re-binding the same top-level name reuses the global.
            let already = matches!(
                self.resolve(name),
                Some(VarSlot::Global { c_name: existing }) if existing == c_name
            );
            if !already {
                self.decls.push_str(&format!("static HmlValue {};\n", c_name));
            }
            emit!(self, "{} = {};", c_name, v)?;
            self.bind_slot(name, VarSlot::Global { c_name: c_name.clone() }, bound_ty);
            c_name
        } else {
            let c_name = self.local_c_name(name);
            emit!(self, "HmlValue {} = {};", c_name, v)?;
            self.bind_slot(name, VarSlot::Local { c_name: c_name.clone() }, bound_ty);
            c_name
        };

        // A shared environment mirrors function-scoped locals.
        if let Some((env, idx)) = self
            .current_fn_ref()
            .shared_env
            .as_ref()
            .and_then(|s| s.indices.get(name).map(|&i| (s.c_name.clone(), i)))
        {
            emit!(self, "hml_closure_env_set({}, {}, {});", env, idx, c_name)?;
        }

        // Self-referential closure: patch the environment slot now that
        // the binding holds the function value.
        if is_fn_literal
            && let Some(last) = self.last_closure.take()
        {
            if let Some(env) = &last.env_var
                && let Some(pos) = last.captured.iter().position(|c| c == name)
            {
                let idx = last.env_indices[pos];
                emit!(self, "hml_closure_env_set({}, {}, {});", env, idx, c_name)?;
            }
            // Capture-free top-level functions can be called directly.
            if top_level && last.captured.is_empty() {
                self.direct_fns.insert(
                    name.to_string(),
                    super::state::DirectFn {
                        impl_name: last.impl_name,
                        num_params: last.num_params,
                        has_rest: last.has_rest,
                    },
                );
            }
        }
        Ok(())
    }

    /// Runtime validation/conversion for annotated bindings: named object
    /// shapes, typed arrays, and numeric conversions.
    fn emit_binding_validation(
        &mut self,
        v: String,
        declared: Option<&CheckedType>,
        inferred: &CheckedType,
    ) -> Result<String, CodeGenError> {
        let Some(decl) = declared else {
            return Ok(v);
        };
        match decl.kind {
            TypeKind::Custom => {
                if let Some(name) = &decl.type_name {
                    emit!(self, "hml_validate_object_type({}, \"{}\");", v, name)?;
                }
                Ok(v)
            }
            TypeKind::Array => {
                if let Some(elem) = decl.element.as_deref() {
                    emit!(self, "hml_validate_typed_array({}, {});", v, elem.val_tag())?;
                }
                Ok(v)
            }
            _ if decl.is_numeric() && decl.kind != TypeKind::Enum && decl.kind != inferred.kind => {
                let converted = self.fresh_temp();
                emit!(
                    self,
                    "HmlValue {} = hml_convert_to_type({}, {});",
                    converted,
                    v,
                    decl.val_tag()
                )?;
                self.release(&v)?;
                Ok(converted)
            }
            _ => Ok(v),
        }
    }

    // ------------------------------------------------------------------
    // Control flow
    // ------------------------------------------------------------------

    fn gen_if(
        &mut self,
        cond: &Expr,
        then_body: &[Stmt],
        else_body: Option<&[Stmt]>,
    ) -> Result<(), CodeGenError> {
        // A constant condition emits only the taken branch.
        if self.optimize()
            && let Some(truthy) = const_truthiness(cond)
        {
            if truthy {
                self.gen_branch(then_body)?;
            } else if let Some(eb) = else_body {
                self.gen_branch(eb)?;
            }
            return Ok(());
        }
        let c = self.gen_expr(cond)?;
        let cb = self.fresh_temp();
        emit!(self, "int {} = hml_to_bool({});", cb, c)?;
        self.release(&c)?;
        emit!(self, "if ({}) {{", cb)?;
        self.enter_body();
        self.gen_stmts(then_body)?;
        self.exit_body();
        if let Some(eb) = else_body {
            emit!(self, "}} else {{")?;
            self.enter_body();
            self.gen_stmts(eb)?;
            self.exit_body();
        }
        emit!(self, "}}")
    }

    /// Emit a branch body as a bare block (constant-folded `if`).
    fn gen_branch(&mut self, body: &[Stmt]) -> Result<(), CodeGenError> {
        self.begin_block()?;
        self.block_depth += 1;
        self.gen_stmts(body)?;
        self.block_depth -= 1;
        self.end_block()
    }

    fn enter_body(&mut self) {
        self.indent += 1;
        self.push_scope();
        self.block_depth += 1;
    }

    fn exit_body(&mut self) {
        self.block_depth -= 1;
        self.pop_scope();
        self.indent -= 1;
    }

    fn gen_while(&mut self, cond: &Expr, body: &[Stmt]) -> Result<(), CodeGenError> {
        emit!(self, "while (1) {{")?;
        self.enter_body();
        let c = self.gen_expr(cond)?;
        let cb = self.fresh_temp();
        emit!(self, "int {} = hml_to_bool({});", cb, c)?;
        self.release(&c)?;
        emit!(self, "if (!{}) break;", cb)?;
        self.current_fn().breakables.push(Breakable::Loop);
        self.current_fn().continue_labels.push(None);
        self.gen_stmts(body)?;
        self.current_fn().continue_labels.pop();
        self.current_fn().breakables.pop();
        self.exit_body();
        emit!(self, "}}")
    }

    fn gen_for(
        &mut self,
        init: Option<&Stmt>,
        cond: Option<&Expr>,
        update: Option<&Expr>,
        body: &[Stmt],
    ) -> Result<(), CodeGenError> {
        self.begin_block()?;
        self.block_depth += 1;

        let promoted = if self.optimize() {
            escape::for_counter_promotion(init, cond, update, body)
        } else {
            None
        };

        if let Some((name, var)) = promoted {
            self.gen_native_for(&name, var, init, cond, update, body)?;
        } else {
            if let Some(init) = init {
                self.gen_stmt(init)?;
            }
            let continue_label = self.fresh_label();
            emit!(self, "while (1) {{")?;
            self.enter_body();
            if let Some(cond) = cond {
                let c = self.gen_expr(cond)?;
                let cb = self.fresh_temp();
                emit!(self, "int {} = hml_to_bool({});", cb, c)?;
                self.release(&c)?;
                emit!(self, "if (!{}) break;", cb)?;
            }
            self.current_fn().breakables.push(Breakable::Loop);
            self.current_fn()
                .continue_labels
                .push(Some(continue_label.clone()));
            self.gen_stmts(body)?;
            self.current_fn().continue_labels.pop();
            self.current_fn().breakables.pop();
            // `continue` lands here, just before the increment.
            self.emit_label(&continue_label)?;
            if let Some(update) = update {
                self.gen_expr_for_effect(update)?;
            }
            self.exit_body();
            emit!(self, "}}")?;
        }

        self.block_depth -= 1;
        self.end_block()
    }

    /// The unboxed counter loop: `int32_t i = 0; while (i < bound) ...`.
    fn gen_native_for(
        &mut self,
        name: &str,
        var: UnboxedVar,
        init: Option<&Stmt>,
        cond: Option<&Expr>,
        update: Option<&Expr>,
        body: &[Stmt],
    ) -> Result<(), CodeGenError> {
        let Some(StmtKind::Let { value, .. }) = init.map(|s| &s.kind) else {
            return Err(CodeGenError::lowering(
                "native for loop requires a let initializer",
            ));
        };
        let ExprKind::Number(Number::Int(start)) = value.kind else {
            return Err(CodeGenError::lowering(
                "native for loop requires an integer literal start",
            ));
        };
        let c_name = self.local_c_name(name);
        emit!(
            self,
            "{} {} = {};",
            var.native.c_type(),
            c_name,
            c_int_literal(start)
        )?;
        self.bind_slot(
            name,
            VarSlot::Unboxed {
                c_name: c_name.clone(),
                var,
            },
            if var.native == NativeKind::I64 {
                CheckedType::i64()
            } else {
                CheckedType::i32()
            },
        );

        let Some(ExprKind::Binary { op, right, .. }) = cond.map(|c| &c.kind) else {
            return Err(CodeGenError::lowering(
                "native for loop requires a comparison condition",
            ));
        };
        // Literal bounds fold into the condition; anything else is
        // hoisted and evaluated once before the loop.
        let bound = match &right.kind {
            ExprKind::Number(Number::Int(b)) => c_int_literal(*b),
            _ => {
                let b = self.gen_expr(right)?;
                let hoisted = self.fresh_temp();
                if var.native == NativeKind::I64 {
                    emit!(
                        self,
                        "int64_t {} = hml_convert_to_type({}, HML_VAL_I64).as.as_i64;",
                        hoisted,
                        b
                    )?;
                } else {
                    emit!(self, "int32_t {} = hml_to_i32({});", hoisted, b)?;
                }
                self.release(&b)?;
                hoisted
            }
        };
        emit!(
            self,
            "while ({} {} {}) {{",
            c_name,
            super::runtime::native_bin_op(*op),
            bound
        )?;
        self.enter_body();
        let continue_label = self.fresh_label();
        self.current_fn().breakables.push(Breakable::Loop);
        self.current_fn()
            .continue_labels
            .push(Some(continue_label.clone()));
        self.gen_stmts(body)?;
        self.current_fn().continue_labels.pop();
        self.current_fn().breakables.pop();
        self.emit_label(&continue_label)?;
        match update.map(|u| &u.kind) {
            Some(ExprKind::PostfixInc(_)) | Some(ExprKind::PrefixInc(_)) => {
                emit!(self, "{}++;", c_name)?;
            }
            Some(ExprKind::PostfixDec(_)) | Some(ExprKind::PrefixDec(_)) => {
                emit!(self, "{}--;", c_name)?;
            }
            Some(ExprKind::Assign { value, .. }) => {
                let native = self.native_expr(value).ok_or_else(|| {
                    CodeGenError::lowering("native for loop update must be unboxable")
                })?;
                emit!(self, "{} = {};", c_name, native)?;
            }
            _ => {
                return Err(CodeGenError::lowering(
                    "native for loop requires a counter update",
                ));
            }
        }
        self.exit_body();
        emit!(self, "}}")
    }

    fn gen_for_in(
        &mut self,
        key: &str,
        value: Option<&str>,
        iterable: &Expr,
        body: &[Stmt],
    ) -> Result<(), CodeGenError> {
        let iter_ty = self.infer(iterable);
        let it = self.gen_expr(iterable)?;
        match iter_ty.kind {
            TypeKind::Array => self.gen_for_in_array(&it, key, value, body)?,
            TypeKind::Object | TypeKind::Custom => self.gen_for_in_object(&it, key, value, body)?,
            TypeKind::String => self.gen_for_in_string(&it, key, value, body)?,
            _ => {
                // Unknown iterable: dispatch on the runtime tag.
                emit!(self, "if ({}.type == HML_VAL_ARRAY) {{", it)?;
                self.indent += 1;
                self.gen_for_in_array(&it, key, value, body)?;
                self.indent -= 1;
                emit!(self, "}} else if ({}.type == HML_VAL_OBJECT) {{", it)?;
                self.indent += 1;
                self.gen_for_in_object(&it, key, value, body)?;
                self.indent -= 1;
                emit!(self, "}} else if ({}.type == HML_VAL_STRING) {{", it)?;
                self.indent += 1;
                self.gen_for_in_string(&it, key, value, body)?;
                self.indent -= 1;
                emit!(self, "}}")?;
            }
        }
        self.release(&it)
    }

    fn gen_for_in_array(
        &mut self,
        it: &str,
        key: &str,
        value: Option<&str>,
        body: &[Stmt],
    ) -> Result<(), CodeGenError> {
        let n = self.fresh_temp();
        emit!(self, "int32_t {} = hml_array_length({});", n, it)?;
        let i = self.fresh_named("i");
        emit!(self, "for (int32_t {i} = 0; {i} < {n}; {i}++) {{", i = i, n = n)?;
        self.enter_body();
        let counter = UnboxedVar {
            native: NativeKind::I32,
            is_loop_counter: true,
            is_accumulator: false,
            is_typed_var: false,
        };
        let elem_name = match value {
            Some(value_name) => {
                // Two variables: the key is the native index.
                self.bind_slot(
                    key,
                    VarSlot::Unboxed {
                        c_name: i.clone(),
                        var: counter,
                    },
                    CheckedType::i32(),
                );
                value_name
            }
            None => key,
        };
        let c_elem = self.local_c_name(elem_name);
        emit!(
            self,
            "HmlValue {} = hml_array_get_i32_fast({}, {});",
            c_elem,
            it,
            i
        )?;
        self.bind_slot(
            elem_name,
            VarSlot::Local { c_name: c_elem },
            CheckedType::any(),
        );
        self.current_fn().breakables.push(Breakable::Loop);
        self.current_fn().continue_labels.push(None);
        self.gen_stmts(body)?;
        self.current_fn().continue_labels.pop();
        self.current_fn().breakables.pop();
        self.exit_body();
        emit!(self, "}}")
    }

    fn gen_for_in_object(
        &mut self,
        it: &str,
        key: &str,
        value: Option<&str>,
        body: &[Stmt],
    ) -> Result<(), CodeGenError> {
        let n = self.fresh_temp();
        emit!(self, "int32_t {} = hml_object_num_fields({});", n, it)?;
        let i = self.fresh_named("i");
        emit!(self, "for (int32_t {i} = 0; {i} < {n}; {i}++) {{", i = i, n = n)?;
        self.enter_body();
        let c_key = self.local_c_name(key);
        emit!(self, "HmlValue {} = hml_object_key_at({}, {});", c_key, it, i)?;
        self.bind_slot(key, VarSlot::Local { c_name: c_key }, CheckedType::string());
        if let Some(value_name) = value {
            let c_val = self.local_c_name(value_name);
            emit!(
                self,
                "HmlValue {} = hml_object_value_at({}, {});",
                c_val,
                it,
                i
            )?;
            self.bind_slot(
                value_name,
                VarSlot::Local { c_name: c_val },
                CheckedType::any(),
            );
        }
        self.current_fn().breakables.push(Breakable::Loop);
        self.current_fn().continue_labels.push(None);
        self.gen_stmts(body)?;
        self.current_fn().continue_labels.pop();
        self.current_fn().breakables.pop();
        self.exit_body();
        emit!(self, "}}")
    }

    fn gen_for_in_string(
        &mut self,
        it: &str,
        key: &str,
        value: Option<&str>,
        body: &[Stmt],
    ) -> Result<(), CodeGenError> {
        let n = self.fresh_temp();
        emit!(self, "int64_t {} = hml_string_char_count({});", n, it)?;
        let i = self.fresh_named("i");
        emit!(self, "for (int64_t {i} = 0; {i} < {n}; {i}++) {{", i = i, n = n)?;
        self.enter_body();
        let counter = UnboxedVar {
            native: NativeKind::I64,
            is_loop_counter: true,
            is_accumulator: false,
            is_typed_var: false,
        };
        let rune_name = match value {
            Some(value_name) => {
                self.bind_slot(
                    key,
                    VarSlot::Unboxed {
                        c_name: i.clone(),
                        var: counter,
                    },
                    CheckedType::i64(),
                );
                value_name
            }
            None => key,
        };
        let c_rune = self.local_c_name(rune_name);
        // Per-iteration UTF-8 decode of the i-th codepoint.
        emit!(
            self,
            "HmlValue {} = hml_string_rune_at({}, {});",
            c_rune,
            it,
            i
        )?;
        self.bind_slot(
            rune_name,
            VarSlot::Local { c_name: c_rune },
            CheckedType::rune(),
        );
        self.current_fn().breakables.push(Breakable::Loop);
        self.current_fn().continue_labels.push(None);
        self.gen_stmts(body)?;
        self.current_fn().continue_labels.pop();
        self.current_fn().breakables.pop();
        self.exit_body();
        emit!(self, "}}")
    }

    // ------------------------------------------------------------------
    // Returns
    // ------------------------------------------------------------------

    pub(super) fn gen_return(&mut self, value: Option<&Expr>) -> Result<(), CodeGenError> {
        // Top-level return ends the program (or the module init).
        if self.current_fn_ref().is_top_level {
            if let Some(e) = value {
                let v = self.gen_expr(e)?;
                self.release(&v)?;
            }
            if self.current_fn_ref().module.is_some() {
                return emit!(self, "return;");
            }
            emit!(self, "hml_runtime_shutdown();")?;
            return emit!(self, "return 0;");
        }

        // Route through the innermost finally block.
        if let Some(fin) = self.current_fn_ref().finally_stack.last().cloned() {
            let v = match value {
                Some(e) => self.gen_expr(e)?,
                None => {
                    let t = self.fresh_temp();
                    emit!(self, "HmlValue {} = hml_val_null();", t)?;
                    t
                }
            };
            emit!(self, "{} = {};", fin.ret_slot, v)?;
            emit!(self, "{} = 1;", fin.has_ret_flag)?;
            if fin.exc_active {
                emit!(self, "hml_exception_pop();")?;
            }
            return emit!(self, "goto {};", fin.label);
        }

        // Tail self-call: reassign parameters and jump to entry.
        if let Some(tail) = self.current_fn_ref().tail.clone()
            && let Some(e) = value
            && let Some(args) = tailcall::is_self_tail_call(&tail.name, e)
        {
            let mut temps = Vec::with_capacity(args.len());
            for arg in args {
                temps.push(self.gen_expr(arg)?);
            }
            for (param, new) in tail.params.iter().zip(&temps) {
                emit!(self, "hml_release_if_needed({});", param)?;
                emit!(self, "{} = {};", param, new)?;
            }
            // Missing optional arguments reset to null.
            for param in tail.params.iter().skip(temps.len()) {
                emit!(self, "hml_release_if_needed({});", param)?;
                emit!(self, "{} = hml_val_null();", param)?;
            }
            return emit!(self, "goto {};", tail.entry_label);
        }

        let v = match value {
            Some(e) => self.gen_expr(e)?,
            None => {
                let t = self.fresh_temp();
                emit!(self, "HmlValue {} = hml_val_null();", t)?;
                t
            }
        };
        if self.current_fn_ref().has_defers {
            emit!(self, "hml_defer_execute_all();")?;
        }
        emit!(self, "return {};", v)
    }

    // ------------------------------------------------------------------
    // Exceptions
    // ------------------------------------------------------------------

    fn gen_try(
        &mut self,
        body: &[Stmt],
        catch: Option<&CatchClause>,
        finally: Option<&[Stmt]>,
    ) -> Result<(), CodeGenError> {
        self.begin_block()?;
        self.block_depth += 1;

        let in_function = !self.current_fn_ref().is_top_level;
        let has_finally = finally.is_some();
        let fin_label = if has_finally {
            Some(self.fresh_label())
        } else {
            None
        };
        let fin_ctx = if has_finally && in_function {
            let ret_slot = self.fresh_named("finret");
            let has_ret_flag = self.fresh_named("finhas");
            emit!(self, "HmlValue {} = hml_val_null();", ret_slot)?;
            emit!(self, "int {} = 0;", has_ret_flag)?;
            Some(FinallyCtx {
                label: fin_label.clone().expect("finally label exists"),
                ret_slot,
                has_ret_flag,
                exc_active: true,
            })
        } else {
            None
        };

        let exc = self.fresh_named("exc");
        emit!(self, "HmlExceptionContext {};", exc)?;
        // Without a catch, remember whether the try threw so the finally
        // can re-throw afterwards.
        let rethrow = if catch.is_none() && has_finally {
            let threw = self.fresh_named("threw");
            let excv = self.fresh_named("excv");
            emit!(self, "int {} = 0;", threw)?;
            emit!(self, "HmlValue {} = hml_val_null();", excv)?;
            Some((threw, excv))
        } else {
            None
        };

        emit!(self, "if (setjmp(hml_exception_push(&{})->jmp) == 0) {{", exc)?;
        self.enter_body();
        if let Some(ctx) = &fin_ctx {
            self.current_fn().finally_stack.push(ctx.clone());
        }
        self.gen_stmts(body)?;
        if fin_ctx.is_some() {
            self.current_fn().finally_stack.pop();
        }
        emit!(self, "hml_exception_pop();")?;
        self.exit_body();
        emit!(self, "}} else {{")?;
        self.enter_body();
        // The context pops before any catch or finally code runs.
        emit!(self, "hml_exception_pop();")?;
        match catch {
            Some(CatchClause { binding, body }) => {
                if let Some(bound) = binding {
                    let c_name = self.local_c_name(bound);
                    emit!(self, "HmlValue {} = hml_exception_get_value();", c_name)?;
                    self.bind_slot(
                        bound,
                        VarSlot::Local { c_name },
                        CheckedType::any(),
                    );
                }
                if let Some(ctx) = &fin_ctx {
                    let mut ctx = ctx.clone();
                    ctx.exc_active = false;
                    self.current_fn().finally_stack.push(ctx);
                }
                self.gen_stmts(body)?;
                if fin_ctx.is_some() {
                    self.current_fn().finally_stack.pop();
                }
            }
            None => {
                if let Some((threw, excv)) = &rethrow {
                    emit!(self, "{} = 1;", threw)?;
                    emit!(self, "{} = hml_exception_get_value();", excv)?;
                }
            }
        }
        self.exit_body();
        emit!(self, "}}")?;

        if let Some(fin_stmts) = finally {
            self.emit_label(fin_label.as_deref().expect("finally label exists"))?;
            self.gen_branch(fin_stmts)?;
            if let Some((threw, excv)) = &rethrow {
                emit!(self, "if ({}) {{ hml_throw({}); }}", threw, excv)?;
            }
            if let Some(ctx) = &fin_ctx {
                emit!(self, "if ({}) {{", ctx.has_ret_flag)?;
                self.indent += 1;
                self.emit_resume_return(&ctx.ret_slot)?;
                self.indent -= 1;
                emit!(self, "}}")?;
            }
        }

        self.block_depth -= 1;
        self.end_block()
    }

    /// Resume a return that was parked in a finally slot: hand it to an
    /// outer finally when one exists, otherwise run defers and return.
    fn emit_resume_return(&mut self, slot: &str) -> Result<(), CodeGenError> {
        if let Some(outer) = self.current_fn_ref().finally_stack.last().cloned() {
            emit!(self, "{} = {};", outer.ret_slot, slot)?;
            emit!(self, "{} = 1;", outer.has_ret_flag)?;
            if outer.exc_active {
                emit!(self, "hml_exception_pop();")?;
            }
            return emit!(self, "goto {};", outer.label);
        }
        if self.current_fn_ref().has_defers {
            emit!(self, "hml_defer_execute_all();")?;
        }
        emit!(self, "return {};", slot)
    }

    // ------------------------------------------------------------------
    // Switch
    // ------------------------------------------------------------------

    fn gen_switch(&mut self, subject: &Expr, cases: &[SwitchCase]) -> Result<(), CodeGenError> {
        self.begin_block()?;
        self.block_depth += 1;

        let s = self.gen_expr(subject)?;
        let labels: Vec<String> = cases.iter().map(|_| self.fresh_label()).collect();
        let end_label = self.fresh_label();
        let default_label = cases
            .iter()
            .position(|c| c.value.is_none())
            .map(|i| labels[i].clone());

        for (case, label) in cases.iter().zip(&labels) {
            let Some(value) = &case.value else {
                continue;
            };
            let cv = self.gen_expr(value)?;
            let m = self.fresh_temp();
            emit!(
                self,
                "int {} = hml_to_bool(hml_binary_op(HML_OP_EQ, {}, {}));",
                m,
                s,
                cv
            )?;
            self.release(&cv)?;
            emit!(
                self,
                "if ({}) {{ hml_release_if_needed({}); goto {}; }}",
                m,
                s,
                label
            )?;
        }
        self.release(&s)?;
        emit!(
            self,
            "goto {};",
            default_label.as_deref().unwrap_or(&end_label)
        )?;

        // Bodies in source order; fall-through is deliberate and matches
        // the interpreter, including into and out of default.
        self.current_fn().breakables.push(Breakable::Switch {
            end_label: end_label.clone(),
        });
        for (case, label) in cases.iter().zip(&labels) {
            self.emit_label(label)?;
            self.gen_stmts(&case.body)?;
        }
        self.current_fn().breakables.pop();
        self.emit_label(&end_label)?;

        self.block_depth -= 1;
        self.end_block()
    }

    // ------------------------------------------------------------------
    // Defer, declarations
    // ------------------------------------------------------------------

    fn gen_defer(&mut self, call: &Expr) -> Result<(), CodeGenError> {
        let ExprKind::Call { callee, args } = &call.kind else {
            // The checker already reported this; evaluate for effect.
            return self.gen_expr_for_effect(call);
        };
        let f = self.gen_expr(callee)?;
        if args.is_empty() {
            emit!(self, "hml_defer_push_call({});", f)?;
        } else {
            let mut temps = Vec::new();
            for arg in args {
                temps.push(self.gen_expr(arg)?);
            }
            let arr = self.fresh_temp();
            emit!(
                self,
                "HmlValue {}[{}] = {{ {} }};",
                arr,
                temps.len(),
                temps.join(", ")
            )?;
            emit!(
                self,
                "hml_defer_push_call_with_args({}, {}, {});",
                f,
                temps.len(),
                arr
            )?;
            for temp in &temps {
                self.release(temp)?;
            }
        }
        self.release(&f)?;
        self.current_fn().has_defers = true;
        Ok(())
    }

    fn gen_define_object(&mut self, name: &str, fields: &[FieldDef]) -> Result<(), CodeGenError> {
        emit!(self, "hml_object_define(\"{}\", {});", name, fields.len())?;
        for field in fields {
            let tag = self.registry.resolve_annotation(&field.ty).val_tag();
            match &field.default {
                Some(default) => {
                    let d = self.gen_expr(default)?;
                    emit!(
                        self,
                        "hml_object_define_field(\"{}\", \"{}\", {}, {}, {});",
                        name,
                        field.name,
                        tag,
                        field.optional as u8,
                        d
                    )?;
                    self.release(&d)?;
                }
                None => {
                    emit!(
                        self,
                        "hml_object_define_field(\"{}\", \"{}\", {}, {}, hml_val_null());",
                        name,
                        field.name,
                        tag,
                        field.optional as u8
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Enums lower to an object of sequentially numbered variants.
    /// Explicit values override the counter, which resumes from
    /// `value + 1`.
    fn gen_enum(&mut self, name: &str, variants: &[EnumVariant]) -> Result<(), CodeGenError> {
        let top_level = self.current_fn_ref().is_top_level && self.block_depth == 0;
        let c_name = if top_level {
            let prefix = self.unit_prefix();
            let c_name = format!("{}{}", prefix, super::state::sanitize_ident(name));
            self.decls.push_str(&format!("static HmlValue {};\n", c_name));
            emit!(self, "{} = hml_val_object();", c_name)?;
            c_name
        } else {
            let c_name = self.local_c_name(name);
            emit!(self, "HmlValue {} = hml_val_object();", c_name)?;
            c_name
        };
        let mut next = 0i64;
        for variant in variants {
            let value = variant.value.unwrap_or(next);
            next = value + 1;
            let boxed = if i32::try_from(value).is_ok() {
                format!("hml_val_i32({})", value)
            } else {
                format!("hml_val_i64({})", c_int_literal(value))
            };
            emit!(
                self,
                "hml_object_set_field({}, \"{}\", {});",
                c_name,
                variant.name,
                boxed
            )?;
        }
        let slot = if top_level {
            VarSlot::Global { c_name }
        } else {
            VarSlot::Local { c_name }
        };
        self.bind_slot(name, slot, CheckedType::object());
        Ok(())
    }

    fn gen_import_ffi(
        &mut self,
        library: &str,
        functions: &[crate::ast::FfiFn],
    ) -> Result<(), CodeGenError> {
        for f in functions {
            let ret_tag = self.registry.resolve_annotation(&f.return_type).ffi_tag();
            if f.params.is_empty() {
                emit!(
                    self,
                    "hml_ffi_register(\"{}\", \"{}\", {}, 0, NULL);",
                    f.name,
                    library,
                    ret_tag
                )?;
            } else {
                let tags: Vec<&str> = f
                    .params
                    .iter()
                    .map(|p| self.registry.resolve_annotation(p).ffi_tag())
                    .collect();
                emit!(
                    self,
                    "hml_ffi_register(\"{}\", \"{}\", {}, {}, (const int[]){{ {} }});",
                    f.name,
                    library,
                    ret_tag,
                    f.params.len(),
                    tags.join(", ")
                )?;
            }
            self.ffi_fns.insert(f.name.clone());
        }
        Ok(())
    }
}

/// Truthiness of a literal condition, for dead-branch elimination.
fn const_truthiness(cond: &Expr) -> Option<bool> {
    match &cond.kind {
        ExprKind::Bool(b) => Some(*b),
        ExprKind::Null => Some(false),
        ExprKind::Number(Number::Int(v)) => Some(*v != 0),
        ExprKind::Number(Number::Float(v)) => Some(*v != 0.0),
        _ => None,
    }
}
