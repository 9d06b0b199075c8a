//! Expression lowering
//!
//! Every expression that produces a tagged value lowers to a fresh
//! `HmlValue _t<N>` temporary. Temporaries are owned: whoever consumes
//! one releases it with `hml_release_if_needed` (a no-op on primitives).
//! Identifier reads retain; `let` and `return` transfer ownership.
//!
//! Fast paths (all behind the `optimize` switch where they change
//! shape): integer constant folding, short-circuit `&&`/`||`, fused
//! string-concat chains, i32/i64 intrinsic arithmetic, the
//! array-get/set index fast path, and built-in property dispatch.

use super::runtime::{bin_op_info, c_float_literal, c_int_literal, c_string_literal, native_bin_op, unary_op_const};
use super::state::{emit, VarSlot};
use super::{CodeGenError, Codegen};
use crate::ast::{
    BinaryOp, Expr, ExprKind, InterpolationPart, Number, OptionalAccess, UnaryOp,
};
use crate::escape::NativeKind;
use crate::types::{CheckedType, TypeKind};
use crate::utf8;

/// Result of compile-time folding of an integer operation.
enum Folded {
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl<'cfg> Codegen<'cfg> {
    /// Emit a release for an owned temporary.
    pub(super) fn release(&mut self, temp: &str) -> Result<(), CodeGenError> {
        emit!(self, "hml_release_if_needed({});", temp)
    }

    /// Lower an expression, returning the owned result temporary.
    pub(super) fn gen_expr(&mut self, expr: &Expr) -> Result<String, CodeGenError> {
        match &expr.kind {
            ExprKind::Number(Number::Int(v)) => {
                let t = self.fresh_temp();
                if i32::try_from(*v).is_ok() {
                    emit!(self, "HmlValue {} = hml_val_i32({});", t, v)?;
                } else {
                    emit!(self, "HmlValue {} = hml_val_i64({});", t, c_int_literal(*v))?;
                }
                Ok(t)
            }
            ExprKind::Number(Number::Float(v)) => {
                let t = self.fresh_temp();
                emit!(self, "HmlValue {} = hml_val_f64({});", t, c_float_literal(*v))?;
                Ok(t)
            }
            ExprKind::Bool(b) => {
                let t = self.fresh_temp();
                emit!(self, "HmlValue {} = hml_val_bool({});", t, *b as u8)?;
                Ok(t)
            }
            ExprKind::Str(s) => {
                let t = self.fresh_temp();
                let lit = c_string_literal(s)?;
                emit!(self, "HmlValue {} = hml_val_string({});", t, lit)?;
                Ok(t)
            }
            ExprKind::Rune(c) => {
                let t = self.fresh_temp();
                let (buf, len) = utf8::encode(*c as u32);
                let bytes: Vec<String> =
                    buf[..len].iter().map(|b| format!("{:02x}", b)).collect();
                emit!(
                    self,
                    "HmlValue {} = hml_val_rune(0x{:X}); /* {} */",
                    t,
                    *c as u32,
                    bytes.join(" ")
                )?;
                Ok(t)
            }
            ExprKind::Null => {
                let t = self.fresh_temp();
                emit!(self, "HmlValue {} = hml_val_null();", t)?;
                Ok(t)
            }
            ExprKind::Ident(name) => self.gen_ident(name),
            ExprKind::Binary { op, left, right } => self.gen_binary(*op, left, right),
            ExprKind::Unary { op, operand } => self.gen_unary(*op, operand),
            ExprKind::Ternary {
                cond,
                then_val,
                else_val,
            } => self.gen_ternary(cond, then_val, else_val),
            ExprKind::Call { callee, args } => self.gen_call(callee, args),
            ExprKind::Assign { name, value } => {
                let result = self.gen_assign(name, value, true)?;
                Ok(result.expect("gen_assign produces a result when asked"))
            }
            ExprKind::Index { object, index } => self.gen_index(object, index),
            ExprKind::IndexAssign {
                object,
                index,
                value,
            } => {
                let result = self.gen_index_assign(object, index, value, true)?;
                Ok(result.expect("gen_index_assign produces a result when asked"))
            }
            ExprKind::GetProperty { object, property } => self.gen_property_get(object, property),
            ExprKind::SetProperty {
                object,
                property,
                value,
            } => {
                let result = self.gen_property_set(object, property, value, true)?;
                Ok(result.expect("gen_property_set produces a result when asked"))
            }
            ExprKind::ArrayLiteral(elems) => self.gen_array_literal(elems),
            ExprKind::ObjectLiteral(fields) => self.gen_object_literal(fields),
            ExprKind::Function(lit) => self.gen_function_value(lit, None),
            ExprKind::Await(inner) => {
                let a = self.gen_expr(inner)?;
                let t = self.fresh_temp();
                emit!(self, "HmlValue {} = hml_join({});", t, a)?;
                self.release(&a)?;
                Ok(t)
            }
            ExprKind::StringInterpolation(parts) => self.gen_interpolation(parts),
            ExprKind::OptionalChain { object, access } => self.gen_optional_chain(object, access),
            ExprKind::NullCoalesce { left, right } => self.gen_null_coalesce(left, right),
            ExprKind::PrefixInc(t) => self.gen_incdec(t, true, 1, true).map(Option::unwrap),
            ExprKind::PrefixDec(t) => self.gen_incdec(t, true, -1, true).map(Option::unwrap),
            ExprKind::PostfixInc(t) => self.gen_incdec(t, false, 1, true).map(Option::unwrap),
            ExprKind::PostfixDec(t) => self.gen_incdec(t, false, -1, true).map(Option::unwrap),
        }
    }

    /// Lower an expression evaluated only for its effect; no result
    /// temporary is materialized for the assignment forms.
    pub(super) fn gen_expr_for_effect(&mut self, expr: &Expr) -> Result<(), CodeGenError> {
        match &expr.kind {
            ExprKind::Assign { name, value } => {
                self.gen_assign(name, value, false)?;
                Ok(())
            }
            ExprKind::IndexAssign {
                object,
                index,
                value,
            } => {
                self.gen_index_assign(object, index, value, false)?;
                Ok(())
            }
            ExprKind::SetProperty {
                object,
                property,
                value,
            } => {
                self.gen_property_set(object, property, value, false)?;
                Ok(())
            }
            ExprKind::PrefixInc(t) => self.gen_incdec(t, true, 1, false).map(|_| ()),
            ExprKind::PrefixDec(t) => self.gen_incdec(t, true, -1, false).map(|_| ()),
            ExprKind::PostfixInc(t) => self.gen_incdec(t, false, 1, false).map(|_| ()),
            ExprKind::PostfixDec(t) => self.gen_incdec(t, false, -1, false).map(|_| ()),
            _ => {
                let t = self.gen_expr(expr)?;
                self.release(&t)
            }
        }
    }

    fn gen_ident(&mut self, name: &str) -> Result<String, CodeGenError> {
        let t = self.fresh_temp();
        match self.resolve(name) {
            Some(VarSlot::Unboxed { c_name, var }) => {
                emit!(self, "HmlValue {} = {}({});", t, var.native.box_fn(), c_name)?;
            }
            Some(VarSlot::Local { c_name }) | Some(VarSlot::Global { c_name }) => {
                emit!(self, "HmlValue {} = {};", t, c_name)?;
                emit!(self, "hml_retain_if_needed({});", t)?;
            }
            None => {
                // Unresolved names were already diagnosed by the checker.
                emit!(self, "HmlValue {} = hml_val_null();", t)?;
            }
        }
        Ok(t)
    }

    // ------------------------------------------------------------------
    // Binary operators
    // ------------------------------------------------------------------

    fn gen_binary(
        &mut self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
    ) -> Result<String, CodeGenError> {
        if op.is_logical() {
            return self.gen_logical(op, left, right);
        }
        if self.optimize()
            && let Some(folded) = fold_binary(op, left, right)
        {
            return self.emit_folded(folded);
        }
        if self.optimize()
            && op == BinaryOp::Add
            && let Some(t) = self.try_concat_chain(left, right)?
        {
            return Ok(t);
        }

        let lt = self.infer(left);
        let rt = self.infer(right);
        let l = self.gen_expr(left)?;
        let r = self.gen_expr(right)?;
        let t = self.fresh_temp();
        let info = bin_op_info(op);
        match (info.i32_fn, info.i64_fn) {
            (Some(fn_i32), Some(fn_i64)) if self.optimize() => {
                if lt.kind == TypeKind::I32 && rt.kind == TypeKind::I32 {
                    emit!(self, "HmlValue {} = {}({}, {});", t, fn_i32, l, r)?;
                } else if lt.kind == TypeKind::I64 && rt.kind == TypeKind::I64 {
                    emit!(self, "HmlValue {} = {}({}, {});", t, fn_i64, l, r)?;
                } else {
                    emit!(
                        self,
                        "HmlValue {} = hml_both_i32({l}, {r}) ? {}({l}, {r}) : hml_both_i64({l}, {r}) ? {}({l}, {r}) : hml_binary_op({}, {l}, {r});",
                        t,
                        fn_i32,
                        fn_i64,
                        info.op_const,
                        l = l,
                        r = r
                    )?;
                }
            }
            _ => {
                emit!(
                    self,
                    "HmlValue {} = hml_binary_op({}, {}, {});",
                    t,
                    info.op_const,
                    l,
                    r
                )?;
            }
        }
        self.release(&l)?;
        self.release(&r)?;
        Ok(t)
    }

    fn emit_folded(&mut self, folded: Folded) -> Result<String, CodeGenError> {
        let t = self.fresh_temp();
        match folded {
            Folded::Int(v) => {
                if i32::try_from(v).is_ok() {
                    emit!(self, "HmlValue {} = hml_val_i32({});", t, v)?;
                } else {
                    emit!(self, "HmlValue {} = hml_val_i64({});", t, c_int_literal(v))?;
                }
            }
            Folded::Float(v) => {
                emit!(self, "HmlValue {} = hml_val_f64({});", t, c_float_literal(v))?;
            }
            Folded::Bool(b) => emit!(self, "HmlValue {} = hml_val_bool({});", t, b as u8)?,
        }
        Ok(t)
    }

    /// Short-circuit lowering for `&&` and `||`.
    fn gen_logical(
        &mut self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
    ) -> Result<String, CodeGenError> {
        let t = self.fresh_temp();
        emit!(self, "HmlValue {};", t)?;
        let l = self.gen_expr(left)?;
        emit!(self, "if (hml_to_bool({})) {{", l)?;
        self.indent += 1;
        self.release(&l)?;
        if op == BinaryOp::And {
            let r = self.gen_expr(right)?;
            emit!(self, "{} = hml_val_bool(hml_to_bool({}));", t, r)?;
            self.release(&r)?;
        } else {
            emit!(self, "{} = hml_val_bool(1);", t)?;
        }
        self.indent -= 1;
        emit!(self, "}} else {{")?;
        self.indent += 1;
        self.release(&l)?;
        if op == BinaryOp::And {
            emit!(self, "{} = hml_val_bool(0);", t)?;
        } else {
            let r = self.gen_expr(right)?;
            emit!(self, "{} = hml_val_bool(hml_to_bool({}));", t, r)?;
            self.release(&r)?;
        }
        self.indent -= 1;
        emit!(self, "}}")?;
        Ok(t)
    }

    /// Fuse a left-associative `+` chain of 3 to 5 operands containing a
    /// string literal into one `hml_string_concat{3,4,5}` call.
    fn try_concat_chain(
        &mut self,
        left: &Expr,
        right: &Expr,
    ) -> Result<Option<String>, CodeGenError> {
        let mut operands: Vec<&Expr> = Vec::new();
        flatten_add_chain(left, &mut operands);
        operands.push(right);
        if !(3..=5).contains(&operands.len())
            || !operands.iter().any(|e| matches!(e.kind, ExprKind::Str(_)))
        {
            return Ok(None);
        }
        let mut temps = Vec::with_capacity(operands.len());
        for operand in &operands {
            temps.push(self.gen_expr(operand)?);
        }
        let t = self.fresh_temp();
        emit!(
            self,
            "HmlValue {} = hml_string_concat{}({});",
            t,
            temps.len(),
            temps.join(", ")
        )?;
        for temp in &temps {
            self.release(temp)?;
        }
        Ok(Some(t))
    }

    fn gen_unary(&mut self, op: UnaryOp, operand: &Expr) -> Result<String, CodeGenError> {
        if self.optimize()
            && let Some(folded) = fold_unary(op, operand)
        {
            return self.emit_folded(folded);
        }
        let a = self.gen_expr(operand)?;
        let t = self.fresh_temp();
        match op {
            UnaryOp::Not => {
                emit!(self, "HmlValue {} = hml_val_bool(!hml_to_bool({}));", t, a)?;
            }
            UnaryOp::Neg | UnaryOp::BitNot => {
                emit!(
                    self,
                    "HmlValue {} = hml_unary_op({}, {});",
                    t,
                    unary_op_const(op),
                    a
                )?;
            }
        }
        self.release(&a)?;
        Ok(t)
    }

    fn gen_ternary(
        &mut self,
        cond: &Expr,
        then_val: &Expr,
        else_val: &Expr,
    ) -> Result<String, CodeGenError> {
        let t = self.fresh_temp();
        emit!(self, "HmlValue {};", t)?;
        let c = self.gen_expr(cond)?;
        let cb = self.fresh_temp();
        emit!(self, "int {} = hml_to_bool({});", cb, c)?;
        self.release(&c)?;
        emit!(self, "if ({}) {{", cb)?;
        self.indent += 1;
        let a = self.gen_expr(then_val)?;
        emit!(self, "{} = {};", t, a)?;
        self.indent -= 1;
        emit!(self, "}} else {{")?;
        self.indent += 1;
        let b = self.gen_expr(else_val)?;
        emit!(self, "{} = {};", t, b)?;
        self.indent -= 1;
        emit!(self, "}}")?;
        Ok(t)
    }

    // ------------------------------------------------------------------
    // Assignment forms
    // ------------------------------------------------------------------

    /// `name = value`. Returns the retained result temp when
    /// `want_result` is set.
    pub(super) fn gen_assign(
        &mut self,
        name: &str,
        value: &Expr,
        want_result: bool,
    ) -> Result<Option<String>, CodeGenError> {
        let slot = self.resolve(name);
        match slot {
            Some(VarSlot::Unboxed { c_name, var }) => {
                if let Some(native) = self.native_expr(value) {
                    emit!(self, "{} = {};", c_name, native)?;
                } else {
                    // The analyzer only promotes when every reassignment
                    // is unboxable, but stay safe on the fallback path.
                    let v = self.gen_expr(value)?;
                    emit!(
                        self,
                        "{} = ({})hml_convert_to_type({}, {}).as.{};",
                        c_name,
                        var.native.c_type(),
                        v,
                        CheckedType::of(native_tag_kind(var.native)).val_tag(),
                        var.native.payload_field()
                    )?;
                    self.release(&v)?;
                }
                if want_result {
                    let t = self.fresh_temp();
                    emit!(self, "HmlValue {} = {}({});", t, var.native.box_fn(), c_name)?;
                    return Ok(Some(t));
                }
                Ok(None)
            }
            Some(VarSlot::Local { c_name }) | Some(VarSlot::Global { c_name }) => {
                if self.optimize() && self.is_inplace_append(name, value) {
                    let ExprKind::Binary { right, .. } = &value.kind else {
                        unreachable!("is_inplace_append checked the shape");
                    };
                    let r = self.gen_expr(right)?;
                    emit!(self, "hml_string_append_inplace(&{}, {});", c_name, r)?;
                    self.release(&r)?;
                } else {
                    let v = self.gen_expr(value)?;
                    emit!(self, "hml_release_if_needed({});", c_name)?;
                    emit!(self, "{} = {};", c_name, v)?;
                }
                self.propagate_env_write(name, &c_name)?;
                if want_result {
                    let t = self.fresh_temp();
                    emit!(self, "HmlValue {} = {};", t, c_name)?;
                    emit!(self, "hml_retain_if_needed({});", t)?;
                    return Ok(Some(t));
                }
                Ok(None)
            }
            None => {
                // Unknown target: evaluate for effect only.
                let v = self.gen_expr(value)?;
                if want_result {
                    return Ok(Some(v));
                }
                self.release(&v)?;
                Ok(None)
            }
        }
    }

    /// `x = x + "lit"` on a boxed slot promotes to an in-place append.
    fn is_inplace_append(&self, name: &str, value: &Expr) -> bool {
        if let ExprKind::Binary { op, left, right } = &value.kind
            && *op == BinaryOp::Add
            && matches!(&left.kind, ExprKind::Ident(n) if n == name)
            && matches!(right.kind, ExprKind::Str(_))
        {
            return true;
        }
        false
    }

    /// After writing a captured or environment-shared variable, mirror
    /// the new value into the closure environment so sibling closures
    /// observe it.
    pub(super) fn propagate_env_write(
        &mut self,
        name: &str,
        c_name: &str,
    ) -> Result<(), CodeGenError> {
        if self.fn_stack.is_empty() {
            return Ok(());
        }
        let (closure_write, shared_write) = {
            let ctx = self.current_fn_ref();
            let closure = ctx.closure.as_ref().and_then(|c| {
                c.index_of(name).map(|i| (c.env_var.clone(), i))
            });
            let shared = ctx.shared_env.as_ref().and_then(|s| {
                s.indices.get(name).map(|&i| (s.c_name.clone(), i))
            });
            (closure, shared)
        };
        if let Some((env, idx)) = closure_write {
            emit!(self, "hml_closure_env_set({}, {}, {});", env, idx, c_name)?;
        }
        if let Some((env, idx)) = shared_write {
            emit!(self, "hml_closure_env_set({}, {}, {});", env, idx, c_name)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    fn gen_call(&mut self, callee: &Expr, args: &[Expr]) -> Result<String, CodeGenError> {
        if let ExprKind::Ident(name) = &callee.kind {
            let resolved = self.resolve(name);
            // Builtins apply only when no user binding shadows the name.
            if resolved.is_none()
                && crate::builtins::builtin_fn(name).is_some()
            {
                return self.gen_builtin_call(name, args);
            }
            if let Some(direct) = self.direct_fns.get(name).cloned() {
                let global = format!("{}{}", self.unit_prefix(), super::state::sanitize_ident(name));
                let unshadowed = matches!(
                    &resolved,
                    Some(VarSlot::Global { c_name }) if *c_name == global
                );
                if unshadowed {
                    return self.gen_direct_call(&direct, args);
                }
            }
            // FFI functions marshal through the runtime loader.
            if resolved.is_none() && self.ffi_fns.contains(name) {
                return self.gen_ffi_call(name, args);
            }
            // Extern functions are plain C symbols taking tagged values.
            if resolved.is_none() && self.extern_syms.contains(name) {
                return self.gen_extern_call(name, args);
            }
        }
        if let ExprKind::GetProperty { object, property } = &callee.kind {
            return self.gen_method_call(object, property, args);
        }
        let f = self.gen_expr(callee)?;
        self.gen_value_call(&f, args)
    }

    fn gen_direct_call(
        &mut self,
        direct: &super::state::DirectFn,
        args: &[Expr],
    ) -> Result<String, CodeGenError> {
        let positional = if direct.has_rest {
            direct.num_params - 1
        } else {
            direct.num_params
        };
        let mut temps = Vec::new();
        for arg in args.iter().take(positional) {
            temps.push(self.gen_expr(arg)?);
        }
        let mut call_args: Vec<String> = temps.clone();
        while call_args.len() < positional {
            call_args.push("hml_val_null()".to_string());
        }
        let mut rest_temp = None;
        if direct.has_rest {
            let rest = self.fresh_temp();
            emit!(self, "HmlValue {} = hml_val_array();", rest)?;
            for arg in args.iter().skip(positional) {
                let a = self.gen_expr(arg)?;
                emit!(self, "hml_array_push({}, {});", rest, a)?;
                self.release(&a)?;
            }
            call_args.push(rest.clone());
            rest_temp = Some(rest);
        }
        let t = self.fresh_temp();
        emit!(
            self,
            "HmlValue {} = {}({});",
            t,
            direct.impl_name,
            call_args.join(", ")
        )?;
        for temp in &temps {
            self.release(temp)?;
        }
        if let Some(rest) = rest_temp {
            self.release(&rest)?;
        }
        Ok(t)
    }

    /// An `import_ffi` function: marshalled through the runtime loader.
    fn gen_ffi_call(&mut self, name: &str, args: &[Expr]) -> Result<String, CodeGenError> {
        let mut temps = Vec::new();
        for arg in args {
            temps.push(self.gen_expr(arg)?);
        }
        let t = self.fresh_temp();
        if temps.is_empty() {
            emit!(self, "HmlValue {} = hml_ffi_call(\"{}\", 0, NULL);", t, name)?;
        } else {
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
                "HmlValue {} = hml_ffi_call(\"{}\", {}, {});",
                t,
                name,
                temps.len(),
                arr
            )?;
        }
        for temp in &temps {
            self.release(temp)?;
        }
        Ok(t)
    }

    /// A registered `extern fn`: direct C call to that symbol.
    fn gen_extern_call(&mut self, name: &str, args: &[Expr]) -> Result<String, CodeGenError> {
        let mut temps = Vec::new();
        for arg in args {
            temps.push(self.gen_expr(arg)?);
        }
        let t = self.fresh_temp();
        emit!(
            self,
            "HmlValue {} = {}({});",
            t,
            super::state::sanitize_ident(name),
            temps.join(", ")
        )?;
        for temp in &temps {
            self.release(temp)?;
        }
        Ok(t)
    }

    pub(super) fn gen_value_call(
        &mut self,
        callee_temp: &str,
        args: &[Expr],
    ) -> Result<String, CodeGenError> {
        let mut temps = Vec::new();
        for arg in args {
            temps.push(self.gen_expr(arg)?);
        }
        let t = self.fresh_temp();
        if temps.is_empty() {
            emit!(
                self,
                "HmlValue {} = hml_call_function({}, 0, NULL);",
                t,
                callee_temp
            )?;
        } else {
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
                "HmlValue {} = hml_call_function({}, {}, {});",
                t,
                callee_temp,
                temps.len(),
                arr
            )?;
        }
        self.release(&callee_temp.to_string())?;
        for temp in &temps {
            self.release(temp)?;
        }
        Ok(t)
    }

    fn gen_builtin_call(&mut self, name: &str, args: &[Expr]) -> Result<String, CodeGenError> {
        match name {
            "print" => {
                for arg in args {
                    let a = self.gen_expr(arg)?;
                    emit!(self, "hml_print({});", a)?;
                    self.release(&a)?;
                }
                let t = self.fresh_temp();
                emit!(self, "HmlValue {} = hml_val_null();", t)?;
                Ok(t)
            }
            "typeof" | "len" | "join" => {
                let a = self.gen_expr(&args[0])?;
                let f = match name {
                    "typeof" => "hml_typeof",
                    "len" => "hml_len",
                    _ => "hml_join",
                };
                let t = self.fresh_temp();
                emit!(self, "HmlValue {} = {}({});", t, f, a)?;
                self.release(&a)?;
                Ok(t)
            }
            "bool" => {
                let a = self.gen_expr(&args[0])?;
                let t = self.fresh_temp();
                emit!(self, "HmlValue {} = hml_val_bool(hml_to_bool({}));", t, a)?;
                self.release(&a)?;
                Ok(t)
            }
            "i8" | "i16" | "i32" | "i64" | "u8" | "u16" | "u32" | "u64" | "f32" | "f64"
            | "str" | "rune" => {
                let tag = match name {
                    "i8" => "HML_VAL_I8",
                    "i16" => "HML_VAL_I16",
                    "i32" => "HML_VAL_I32",
                    "i64" => "HML_VAL_I64",
                    "u8" => "HML_VAL_U8",
                    "u16" => "HML_VAL_U16",
                    "u32" => "HML_VAL_U32",
                    "u64" => "HML_VAL_U64",
                    "f32" => "HML_VAL_F32",
                    "f64" => "HML_VAL_F64",
                    "str" => "HML_VAL_STRING",
                    _ => "HML_VAL_RUNE",
                };
                let a = self.gen_expr(&args[0])?;
                let t = self.fresh_temp();
                emit!(self, "HmlValue {} = hml_convert_to_type({}, {});", t, a, tag)?;
                self.release(&a)?;
                Ok(t)
            }
            "spawn" => {
                let f = self.gen_expr(&args[0])?;
                let mut temps = Vec::new();
                for arg in &args[1..] {
                    temps.push(self.gen_expr(arg)?);
                }
                let t = self.fresh_temp();
                if temps.is_empty() {
                    emit!(self, "HmlValue {} = hml_spawn({}, 0, NULL);", t, f)?;
                } else {
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
                        "HmlValue {} = hml_spawn({}, {}, {});",
                        t,
                        f,
                        temps.len(),
                        arr
                    )?;
                }
                self.release(&f)?;
                for temp in &temps {
                    self.release(temp)?;
                }
                Ok(t)
            }
            "channel" => {
                let cap = match args.first() {
                    Some(a) => self.gen_expr(a)?,
                    None => {
                        let c = self.fresh_temp();
                        emit!(self, "HmlValue {} = hml_val_i32(0);", c)?;
                        c
                    }
                };
                let t = self.fresh_temp();
                emit!(self, "HmlValue {} = hml_channel_new({});", t, cap)?;
                self.release(&cap)?;
                Ok(t)
            }
            "open" => {
                let p = self.gen_expr(&args[0])?;
                let m = match args.get(1) {
                    Some(a) => self.gen_expr(a)?,
                    None => {
                        let m = self.fresh_temp();
                        emit!(self, "HmlValue {} = hml_val_null();", m)?;
                        m
                    }
                };
                let t = self.fresh_temp();
                emit!(self, "HmlValue {} = hml_file_open({}, {});", t, p, m)?;
                self.release(&p)?;
                self.release(&m)?;
                Ok(t)
            }
            _ => {
                // The builtin table and this dispatch must stay in sync.
                Err(CodeGenError::lowering(format!(
                    "no lowering for builtin '{}'",
                    name
                )))
            }
        }
    }

    fn gen_method_call(
        &mut self,
        object: &Expr,
        method: &str,
        args: &[Expr],
    ) -> Result<String, CodeGenError> {
        let recv_ty = self.infer(object);
        let recv = self.gen_expr(object)?;
        let result = match recv_ty.kind {
            TypeKind::Array if crate::builtins::array_method(method).is_some() => {
                self.gen_array_method(&recv, method, args)?
            }
            TypeKind::String if crate::builtins::string_method(method).is_some() => {
                self.gen_string_method(&recv, method, args)?
            }
            _ => {
                let mut temps = Vec::new();
                for arg in args {
                    temps.push(self.gen_expr(arg)?);
                }
                let t = self.fresh_temp();
                if temps.is_empty() {
                    emit!(
                        self,
                        "HmlValue {} = hml_invoke_method({}, \"{}\", 0, NULL);",
                        t,
                        recv,
                        method
                    )?;
                } else {
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
                        "HmlValue {} = hml_invoke_method({}, \"{}\", {}, {});",
                        t,
                        recv,
                        method,
                        temps.len(),
                        arr
                    )?;
                }
                for temp in &temps {
                    self.release(temp)?;
                }
                t
            }
        };
        self.release(&recv)?;
        Ok(result)
    }

    fn gen_array_method(
        &mut self,
        recv: &str,
        method: &str,
        args: &[Expr],
    ) -> Result<String, CodeGenError> {
        // Variadic mutators loop one runtime call per element.
        if method == "push" || method == "unshift" {
            for arg in args {
                let a = self.gen_expr(arg)?;
                emit!(self, "hml_array_{}({}, {});", method, recv, a)?;
                self.release(&a)?;
            }
            let t = self.fresh_temp();
            emit!(self, "HmlValue {} = hml_val_null();", t)?;
            return Ok(t);
        }
        let mut temps = Vec::new();
        for arg in args {
            temps.push(self.gen_expr(arg)?);
        }
        // Optional trailing arguments are passed as null.
        let padded_to = match method {
            "slice" | "reduce" => 2,
            "join" => 1,
            _ => temps.len(),
        };
        let mut call_args = vec![recv.to_string()];
        call_args.extend(temps.iter().cloned());
        for _ in temps.len()..padded_to {
            call_args.push("hml_val_null()".to_string());
        }
        let returns_void = matches!(method, "insert" | "clear");
        let t = self.fresh_temp();
        if returns_void {
            emit!(self, "hml_array_{}({});", method, call_args.join(", "))?;
            emit!(self, "HmlValue {} = hml_val_null();", t)?;
        } else {
            emit!(
                self,
                "HmlValue {} = hml_array_{}({});",
                t,
                method,
                call_args.join(", ")
            )?;
        }
        for temp in &temps {
            self.release(temp)?;
        }
        Ok(t)
    }

    fn gen_string_method(
        &mut self,
        recv: &str,
        method: &str,
        args: &[Expr],
    ) -> Result<String, CodeGenError> {
        let mut temps = Vec::new();
        for arg in args {
            temps.push(self.gen_expr(arg)?);
        }
        let padded_to = match method {
            "substr" | "slice" => 2,
            _ => temps.len(),
        };
        let mut call_args = vec![recv.to_string()];
        call_args.extend(temps.iter().cloned());
        for _ in temps.len()..padded_to {
            call_args.push("hml_val_null()".to_string());
        }
        let t = self.fresh_temp();
        emit!(
            self,
            "HmlValue {} = hml_string_{}({});",
            t,
            method,
            call_args.join(", ")
        )?;
        for temp in &temps {
            self.release(temp)?;
        }
        Ok(t)
    }

    // ------------------------------------------------------------------
    // Indexing and properties
    // ------------------------------------------------------------------

    fn gen_index(&mut self, object: &Expr, index: &Expr) -> Result<String, CodeGenError> {
        let obj_ty = self.infer(object);
        let idx_ty = self.infer(index);
        let o = self.gen_expr(object)?;
        let i = self.gen_expr(index)?;
        let t = self.fresh_temp();
        if self.optimize() && obj_ty.kind == TypeKind::Array && idx_ty.kind == TypeKind::I32 {
            emit!(
                self,
                "HmlValue {} = hml_array_get_i32_fast({}, {}.as.as_i32);",
                t,
                o,
                i
            )?;
        } else {
            emit!(self, "HmlValue {};", t)?;
            emit!(
                self,
                "if ({o}.type == HML_VAL_ARRAY && {i}.type == HML_VAL_I32) {{ {t} = hml_array_get_i32_fast({o}, {i}.as.as_i32); }}",
                o = o,
                i = i,
                t = t
            )?;
            emit!(
                self,
                "else if ({o}.type == HML_VAL_ARRAY) {{ {t} = hml_array_get({o}, hml_to_i32({i})); }}",
                o = o,
                i = i,
                t = t
            )?;
            emit!(
                self,
                "else if ({o}.type == HML_VAL_STRING) {{ {t} = hml_string_index({o}, hml_to_i32({i})); }}",
                o = o,
                i = i,
                t = t
            )?;
            emit!(
                self,
                "else if ({o}.type == HML_VAL_BUFFER) {{ {t} = hml_buffer_get({o}, hml_to_i32({i})); }}",
                o = o,
                i = i,
                t = t
            )?;
            emit!(self, "else {{ {t} = hml_index_get({o}, {i}); }}", o = o, i = i, t = t)?;
        }
        self.release(&o)?;
        self.release(&i)?;
        Ok(t)
    }

    pub(super) fn gen_index_assign(
        &mut self,
        object: &Expr,
        index: &Expr,
        value: &Expr,
        want_result: bool,
    ) -> Result<Option<String>, CodeGenError> {
        let obj_ty = self.infer(object);
        let idx_ty = self.infer(index);
        let o = self.gen_expr(object)?;
        let i = self.gen_expr(index)?;
        let v = self.gen_expr(value)?;
        if self.optimize() && obj_ty.kind == TypeKind::Array && idx_ty.kind == TypeKind::I32 {
            emit!(
                self,
                "hml_array_set_i32_fast({}, {}.as.as_i32, {});",
                o,
                i,
                v
            )?;
        } else {
            emit!(
                self,
                "if ({o}.type == HML_VAL_ARRAY && {i}.type == HML_VAL_I32) {{ hml_array_set_i32_fast({o}, {i}.as.as_i32, {v}); }}",
                o = o,
                i = i,
                v = v
            )?;
            emit!(
                self,
                "else if ({o}.type == HML_VAL_ARRAY) {{ hml_array_set({o}, hml_to_i32({i}), {v}); }}",
                o = o,
                i = i,
                v = v
            )?;
            emit!(
                self,
                "else if ({o}.type == HML_VAL_BUFFER) {{ hml_buffer_set({o}, hml_to_i32({i}), {v}); }}",
                o = o,
                i = i,
                v = v
            )?;
            emit!(self, "else {{ hml_index_set({o}, {i}, {v}); }}", o = o, i = i, v = v)?;
        }
        self.release(&o)?;
        self.release(&i)?;
        if want_result {
            Ok(Some(v))
        } else {
            self.release(&v)?;
            Ok(None)
        }
    }

    fn gen_property_get(&mut self, object: &Expr, property: &str) -> Result<String, CodeGenError> {
        // Constant-fold `length` of a string literal.
        if self.optimize()
            && property == "length"
            && let ExprKind::Str(s) = &object.kind
        {
            let count = utf8::count_codepoints(s.as_bytes())?;
            let t = self.fresh_temp();
            emit!(self, "HmlValue {} = hml_val_i32({});", t, count)?;
            return Ok(t);
        }
        let obj_ty = self.infer(object);
        let o = self.gen_expr(object)?;
        let t = self.fresh_temp();
        emit!(self, "HmlValue {};", t)?;
        self.emit_property_read(&t, &o, &obj_ty, property)?;
        self.release(&o)?;
        Ok(t)
    }

    /// Property dispatch shared by plain and optional-chained reads:
    /// built-in properties check the runtime tag, everything else falls
    /// through to `hml_object_get_field_required` (which throws when the
    /// field is absent).
    pub(super) fn emit_property_read(
        &mut self,
        target: &str,
        obj: &str,
        obj_ty: &CheckedType,
        property: &str,
    ) -> Result<(), CodeGenError> {
        let fallback = format!(
            "{} = hml_object_get_field_required({}, \"{}\");",
            target, obj, property
        );
        match property {
            "length" => {
                if self.optimize() && obj_ty.kind == TypeKind::String {
                    emit!(self, "{} = hml_val_i32(hml_string_length({}));", target, obj)?;
                } else if self.optimize() && obj_ty.kind == TypeKind::Array {
                    emit!(self, "{} = hml_val_i32(hml_array_length({}));", target, obj)?;
                } else {
                    emit!(
                        self,
                        "if ({o}.type == HML_VAL_STRING) {{ {t} = hml_val_i32(hml_string_length({o})); }}",
                        o = obj,
                        t = target
                    )?;
                    emit!(
                        self,
                        "else if ({o}.type == HML_VAL_ARRAY) {{ {t} = hml_val_i32(hml_array_length({o})); }}",
                        o = obj,
                        t = target
                    )?;
                    emit!(
                        self,
                        "else if ({o}.type == HML_VAL_BUFFER) {{ {t} = hml_val_i32(hml_buffer_length({o})); }}",
                        o = obj,
                        t = target
                    )?;
                    emit!(self, "else {{ {} }}", fallback)?;
                }
            }
            "byte_length" => {
                emit!(
                    self,
                    "if ({o}.type == HML_VAL_STRING) {{ {t} = hml_val_i32(hml_string_byte_length({o})); }}",
                    o = obj,
                    t = target
                )?;
                emit!(self, "else {{ {} }}", fallback)?;
            }
            "capacity" => {
                emit!(
                    self,
                    "if ({o}.type == HML_VAL_BUFFER) {{ {t} = hml_val_i32(hml_buffer_capacity({o})); }}",
                    o = obj,
                    t = target
                )?;
                emit!(self, "else {{ {} }}", fallback)?;
            }
            "fd" | "port" => {
                emit!(
                    self,
                    "if ({o}.type == HML_VAL_SOCKET) {{ {t} = hml_val_i32(hml_socket_{p}({o})); }}",
                    o = obj,
                    t = target,
                    p = property
                )?;
                emit!(self, "else {{ {} }}", fallback)?;
            }
            "address" => {
                emit!(
                    self,
                    "if ({o}.type == HML_VAL_SOCKET) {{ {t} = hml_socket_address({o}); }}",
                    o = obj,
                    t = target
                )?;
                emit!(self, "else {{ {} }}", fallback)?;
            }
            "closed" => {
                emit!(
                    self,
                    "if ({o}.type == HML_VAL_SOCKET) {{ {t} = hml_val_bool(hml_socket_closed({o})); }}",
                    o = obj,
                    t = target
                )?;
                emit!(self, "else {{ {} }}", fallback)?;
            }
            _ => emit!(self, "{}", fallback)?,
        }
        Ok(())
    }

    pub(super) fn gen_property_set(
        &mut self,
        object: &Expr,
        property: &str,
        value: &Expr,
        want_result: bool,
    ) -> Result<Option<String>, CodeGenError> {
        let o = self.gen_expr(object)?;
        let v = self.gen_expr(value)?;
        emit!(self, "hml_object_set_field({}, \"{}\", {});", o, property, v)?;
        self.release(&o)?;
        if want_result {
            Ok(Some(v))
        } else {
            self.release(&v)?;
            Ok(None)
        }
    }

    // ------------------------------------------------------------------
    // Literals and composite expressions
    // ------------------------------------------------------------------

    fn gen_array_literal(&mut self, elems: &[Expr]) -> Result<String, CodeGenError> {
        let t = self.fresh_temp();
        emit!(self, "HmlValue {} = hml_val_array();", t)?;
        for elem in elems {
            let e = self.gen_expr(elem)?;
            emit!(self, "hml_array_push({}, {});", t, e)?;
            self.release(&e)?;
        }
        Ok(t)
    }

    fn gen_object_literal(&mut self, fields: &[(String, Expr)]) -> Result<String, CodeGenError> {
        let t = self.fresh_temp();
        emit!(self, "HmlValue {} = hml_val_object();", t)?;
        for (name, value) in fields {
            let v = self.gen_expr(value)?;
            emit!(self, "hml_object_set_field({}, \"{}\", {});", t, name, v)?;
            self.release(&v)?;
        }
        Ok(t)
    }

    fn gen_interpolation(&mut self, parts: &[InterpolationPart]) -> Result<String, CodeGenError> {
        let mut temps = Vec::new();
        for part in parts {
            match part {
                InterpolationPart::Literal(s) => {
                    let t = self.fresh_temp();
                    let lit = c_string_literal(s)?;
                    emit!(self, "HmlValue {} = hml_val_string({});", t, lit)?;
                    temps.push(t);
                }
                InterpolationPart::Expr(e) => {
                    let v = self.gen_expr(e)?;
                    let t = self.fresh_temp();
                    emit!(
                        self,
                        "HmlValue {} = hml_convert_to_type({}, HML_VAL_STRING);",
                        t,
                        v
                    )?;
                    self.release(&v)?;
                    temps.push(t);
                }
            }
        }
        match temps.len() {
            0 => {
                let t = self.fresh_temp();
                emit!(self, "HmlValue {} = hml_val_string(\"\");", t)?;
                Ok(t)
            }
            1 => Ok(temps.pop().expect("one part")),
            2 => {
                let t = self.fresh_temp();
                emit!(
                    self,
                    "HmlValue {} = hml_string_concat({}, {});",
                    t,
                    temps[0],
                    temps[1]
                )?;
                for temp in &temps {
                    self.release(temp)?;
                }
                Ok(t)
            }
            n if n <= 5 => {
                let t = self.fresh_temp();
                emit!(
                    self,
                    "HmlValue {} = hml_string_concat{}({});",
                    t,
                    n,
                    temps.join(", ")
                )?;
                for temp in &temps {
                    self.release(temp)?;
                }
                Ok(t)
            }
            _ => {
                // Long interpolations batch the first five, then append.
                let mut acc = self.fresh_temp();
                emit!(
                    self,
                    "HmlValue {} = hml_string_concat5({});",
                    acc,
                    temps[..5].join(", ")
                )?;
                for temp in &temps[..5] {
                    self.release(temp)?;
                }
                for temp in &temps[5..] {
                    let next = self.fresh_temp();
                    emit!(
                        self,
                        "HmlValue {} = hml_string_concat({}, {});",
                        next,
                        acc,
                        temp
                    )?;
                    self.release(&acc)?;
                    self.release(temp)?;
                    acc = next;
                }
                Ok(acc)
            }
        }
    }

    fn gen_optional_chain(
        &mut self,
        object: &Expr,
        access: &OptionalAccess,
    ) -> Result<String, CodeGenError> {
        let obj_ty = self.infer(object);
        let o = self.gen_expr(object)?;
        let t = self.fresh_temp();
        emit!(self, "HmlValue {};", t)?;
        emit!(self, "if (hml_is_null({})) {{", o)?;
        self.indent += 1;
        emit!(self, "{} = hml_val_null();", t)?;
        self.indent -= 1;
        emit!(self, "}} else {{")?;
        self.indent += 1;
        match access {
            OptionalAccess::Property(p) => {
                self.emit_property_read(&t, &o, &obj_ty, p)?;
            }
            OptionalAccess::Index(index) => {
                let i = self.gen_expr(index)?;
                emit!(self, "{} = hml_index_get({}, {});", t, o, i)?;
                self.release(&i)?;
            }
            OptionalAccess::Call(args) => {
                let mut temps = Vec::new();
                for arg in args {
                    temps.push(self.gen_expr(arg)?);
                }
                if temps.is_empty() {
                    emit!(self, "{} = hml_call_function({}, 0, NULL);", t, o)?;
                } else {
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
                        "{} = hml_call_function({}, {}, {});",
                        t,
                        o,
                        temps.len(),
                        arr
                    )?;
                }
                for temp in &temps {
                    self.release(temp)?;
                }
            }
        }
        self.indent -= 1;
        emit!(self, "}}")?;
        self.release(&o)?;
        Ok(t)
    }

    fn gen_null_coalesce(&mut self, left: &Expr, right: &Expr) -> Result<String, CodeGenError> {
        let t = self.fresh_temp();
        emit!(self, "HmlValue {};", t)?;
        let l = self.gen_expr(left)?;
        emit!(self, "if (hml_is_null({})) {{", l)?;
        self.indent += 1;
        self.release(&l)?;
        let r = self.gen_expr(right)?;
        emit!(self, "{} = {};", t, r)?;
        self.indent -= 1;
        emit!(self, "}} else {{")?;
        self.indent += 1;
        emit!(self, "{} = {};", t, l)?;
        self.indent -= 1;
        emit!(self, "}}")?;
        Ok(t)
    }

    // ------------------------------------------------------------------
    // Increment / decrement
    // ------------------------------------------------------------------

    /// `delta` is +1 or -1; `prefix` decides whether the old or the new
    /// value is the expression's result.
    pub(super) fn gen_incdec(
        &mut self,
        target: &Expr,
        prefix: bool,
        delta: i32,
        want_result: bool,
    ) -> Result<Option<String>, CodeGenError> {
        match &target.kind {
            ExprKind::Ident(name) => self.gen_incdec_ident(name, prefix, delta, want_result),
            ExprKind::Index { object, index } => {
                let o = self.gen_expr(object)?;
                let i = self.gen_expr(index)?;
                let old = self.fresh_temp();
                emit!(self, "HmlValue {} = hml_index_get({}, {});", old, o, i)?;
                let new = self.fresh_temp();
                self.emit_incdec_step(&new, &old, delta)?;
                emit!(self, "hml_index_set({}, {}, {});", o, i, new)?;
                self.release(&o)?;
                self.release(&i)?;
                self.finish_incdec(old, new, prefix, want_result)
            }
            ExprKind::GetProperty { object, property } => {
                let o = self.gen_expr(object)?;
                let old = self.fresh_temp();
                emit!(
                    self,
                    "HmlValue {} = hml_object_get_field_required({}, \"{}\");",
                    old,
                    o,
                    property
                )?;
                let new = self.fresh_temp();
                self.emit_incdec_step(&new, &old, delta)?;
                emit!(self, "hml_object_set_field({}, \"{}\", {});", o, property, new)?;
                self.release(&o)?;
                self.finish_incdec(old, new, prefix, want_result)
            }
            _ => Err(CodeGenError::lowering(
                "increment target must be a variable, index, or property",
            )),
        }
    }

    fn gen_incdec_ident(
        &mut self,
        name: &str,
        prefix: bool,
        delta: i32,
        want_result: bool,
    ) -> Result<Option<String>, CodeGenError> {
        match self.resolve(name) {
            Some(VarSlot::Unboxed { c_name, var }) => {
                let step = if delta > 0 { "++" } else { "--" };
                if prefix {
                    emit!(self, "{}{};", c_name, step)?;
                }
                let result = if want_result {
                    let t = self.fresh_temp();
                    emit!(self, "HmlValue {} = {}({});", t, var.native.box_fn(), c_name)?;
                    Some(t)
                } else {
                    None
                };
                if !prefix {
                    emit!(self, "{}{};", c_name, step)?;
                }
                Ok(result)
            }
            Some(VarSlot::Local { c_name }) | Some(VarSlot::Global { c_name }) => {
                let result = if want_result && !prefix {
                    let t = self.fresh_temp();
                    emit!(self, "HmlValue {} = {};", t, c_name)?;
                    emit!(self, "hml_retain_if_needed({});", t)?;
                    Some(t)
                } else {
                    None
                };
                self.emit_incdec_step(&c_name.clone(), &c_name, delta)?;
                self.propagate_env_write(name, &c_name)?;
                if want_result && prefix {
                    let t = self.fresh_temp();
                    emit!(self, "HmlValue {} = {};", t, c_name)?;
                    emit!(self, "hml_retain_if_needed({});", t)?;
                    return Ok(Some(t));
                }
                Ok(result)
            }
            None => {
                if want_result {
                    let t = self.fresh_temp();
                    emit!(self, "HmlValue {} = hml_val_null();", t)?;
                    Ok(Some(t))
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// The i32 fast path with the generic runtime fallback; the fallback
    /// throws "Invalid operand for ++" on non-numeric operands.
    fn emit_incdec_step(
        &mut self,
        target: &str,
        source: &str,
        delta: i32,
    ) -> Result<(), CodeGenError> {
        let f = if delta > 0 { "hml_i32_add" } else { "hml_i32_sub" };
        if target == source {
            emit!(
                self,
                "{t} = ({t}.type == HML_VAL_I32) ? {f}({t}, hml_val_i32(1)) : hml_incdec({t}, {d});",
                t = target,
                f = f,
                d = delta
            )
        } else {
            emit!(
                self,
                "HmlValue {t} = ({s}.type == HML_VAL_I32) ? {f}({s}, hml_val_i32(1)) : hml_incdec({s}, {d});",
                t = target,
                s = source,
                f = f,
                d = delta
            )
        }
    }

    fn finish_incdec(
        &mut self,
        old: String,
        new: String,
        prefix: bool,
        want_result: bool,
    ) -> Result<Option<String>, CodeGenError> {
        if !want_result {
            self.release(&old)?;
            self.release(&new)?;
            return Ok(None);
        }
        if prefix {
            self.release(&old)?;
            Ok(Some(new))
        } else {
            self.release(&new)?;
            Ok(Some(old))
        }
    }

    // ------------------------------------------------------------------
    // Native (unboxed) expressions
    // ------------------------------------------------------------------

    /// Render an expression as plain C arithmetic, when the analyzer has
    /// shown every operand has a native representation.
    pub(super) fn native_expr(&self, expr: &Expr) -> Option<String> {
        match &expr.kind {
            ExprKind::Number(Number::Int(v)) => Some(c_int_literal(*v)),
            ExprKind::Number(Number::Float(v)) => Some(c_float_literal(*v)),
            ExprKind::Bool(b) => Some(if *b { "1".into() } else { "0".into() }),
            ExprKind::Ident(name) => match self.resolve(name)? {
                VarSlot::Unboxed { c_name, .. } => Some(c_name),
                VarSlot::Local { c_name } | VarSlot::Global { c_name } => {
                    let kind = NativeKind::from_checked(&self.infer(expr))?;
                    Some(format!("{}.as.{}", c_name, kind.payload_field()))
                }
            },
            ExprKind::Binary { op, left, right } => {
                if op.is_logical() || *op == BinaryOp::Div {
                    return None;
                }
                let l = self.native_expr(left)?;
                let r = self.native_expr(right)?;
                Some(format!("({} {} {})", l, native_bin_op(*op), r))
            }
            ExprKind::Unary { op, operand } => {
                let a = self.native_expr(operand)?;
                Some(format!("({}{})", op.symbol(), a))
            }
            ExprKind::Ternary {
                cond,
                then_val,
                else_val,
            } => {
                let c = self.native_expr(cond)?;
                let a = self.native_expr(then_val)?;
                let b = self.native_expr(else_val)?;
                Some(format!("({} ? {} : {})", c, a, b))
            }
            _ => None,
        }
    }
}

/// Compile-time evaluation of integer binary operators. Overflow,
/// division by zero, and out-of-range shifts fall through to the runtime
/// path.
fn fold_binary(op: BinaryOp, left: &Expr, right: &Expr) -> Option<Folded> {
    let (a, b) = match (&left.kind, &right.kind) {
        (ExprKind::Number(Number::Int(a)), ExprKind::Number(Number::Int(b))) => (*a, *b),
        _ => return None,
    };
    Some(match op {
        BinaryOp::Add => Folded::Int(a.checked_add(b)?),
        BinaryOp::Sub => Folded::Int(a.checked_sub(b)?),
        BinaryOp::Mul => Folded::Int(a.checked_mul(b)?),
        // Integer division folds to a float, like the runtime.
        BinaryOp::Div => {
            if b == 0 {
                return None;
            }
            Folded::Float(a as f64 / b as f64)
        }
        BinaryOp::Mod => Folded::Int(a.checked_rem(b)?),
        BinaryOp::Eq => Folded::Bool(a == b),
        BinaryOp::Ne => Folded::Bool(a != b),
        BinaryOp::Lt => Folded::Bool(a < b),
        BinaryOp::Le => Folded::Bool(a <= b),
        BinaryOp::Gt => Folded::Bool(a > b),
        BinaryOp::Ge => Folded::Bool(a >= b),
        BinaryOp::BitAnd => Folded::Int(a & b),
        BinaryOp::BitOr => Folded::Int(a | b),
        BinaryOp::BitXor => Folded::Int(a ^ b),
        BinaryOp::Shl => {
            let shift = u32::try_from(b).ok().filter(|s| *s < 64)?;
            Folded::Int(a.checked_shl(shift)?)
        }
        BinaryOp::Shr => {
            let shift = u32::try_from(b).ok().filter(|s| *s < 64)?;
            Folded::Int(a.checked_shr(shift)?)
        }
        BinaryOp::And | BinaryOp::Or => return None,
    })
}

fn fold_unary(op: UnaryOp, operand: &Expr) -> Option<Folded> {
    match (&operand.kind, op) {
        (ExprKind::Number(Number::Int(v)), UnaryOp::Neg) => Some(Folded::Int(v.checked_neg()?)),
        (ExprKind::Number(Number::Int(v)), UnaryOp::BitNot) => Some(Folded::Int(!v)),
        (ExprKind::Bool(b), UnaryOp::Not) => Some(Folded::Bool(!b)),
        _ => None,
    }
}

/// Collect the operands of a left-associative `+` chain, leftmost first.
fn flatten_add_chain<'e>(expr: &'e Expr, out: &mut Vec<&'e Expr>) {
    if let ExprKind::Binary {
        op: BinaryOp::Add,
        left,
        right,
    } = &expr.kind
    {
        flatten_add_chain(left, out);
        out.push(right);
    } else {
        out.push(expr);
    }
}

/// The tagged kind matching a native representation, for conversions.
fn native_tag_kind(native: NativeKind) -> crate::types::TypeKind {
    match native {
        NativeKind::I8 => TypeKind::I8,
        NativeKind::I16 => TypeKind::I16,
        NativeKind::I32 => TypeKind::I32,
        NativeKind::I64 => TypeKind::I64,
        NativeKind::U8 => TypeKind::U8,
        NativeKind::U16 => TypeKind::U16,
        NativeKind::U32 => TypeKind::U32,
        NativeKind::U64 => TypeKind::U64,
        NativeKind::F32 => TypeKind::F32,
        NativeKind::F64 => TypeKind::F64,
        NativeKind::Bool => TypeKind::Bool,
    }
}
