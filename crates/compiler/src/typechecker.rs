//! Two-pass type checker for Hemlock
//!
//! Pass 1 (`register_declarations`) scans top-level statements and fills
//! the registries (function signatures, object shapes, enum variants)
//! without looking at any body, so forward references resolve. Pass 2
//! (`check_program`) walks every statement, infers expression types, and
//! validates assignments, calls, operators, and returns.
//!
//! Diagnostics accumulate; no error stops the walk. The driver decides
//! success from the final error count.

use crate::ast::{
    BinaryOp, CatchClause, Expr, ExprKind, FunctionLit, ImportBinding, InterpolationPart,
    OptionalAccess, Param, Stmt, StmtKind, TypeExpr, UnaryOp,
};
use crate::builtins::{self, MethodSig};
use crate::config::CompilerConfig;
use crate::diagnostics::Diagnostics;
use crate::env::{FunctionSig, ObjectDef, ObjectField, Registry, TypeEnv};
use crate::infer::infer_expr;
use crate::modules::ModuleCache;
use crate::types::{CheckedType, TypeKind};
use std::path::PathBuf;

/// Fill `registry` from the top-level statements of a unit. Last writer
/// wins on name collisions; bodies are not examined.
pub fn register_declarations(registry: &mut Registry, stmts: &[Stmt]) {
    for stmt in stmts {
        register_stmt(registry, stmt);
    }
}

fn register_stmt(registry: &mut Registry, stmt: &Stmt) {
    match &stmt.kind {
        StmtKind::Let { name, value, .. } | StmtKind::Const { name, value, .. } => {
            if let ExprKind::Function(lit) = &value.kind {
                let sig = registry.signature_of(lit);
                registry.register_function(name.clone(), sig);
            }
        }
        StmtKind::DefineObject { name, fields } => {
            let def = ObjectDef {
                name: name.clone(),
                fields: fields
                    .iter()
                    .map(|f| ObjectField {
                        name: f.name.clone(),
                        ty: registry.resolve_annotation(&f.ty),
                        optional: f.optional,
                    })
                    .collect(),
            };
            registry.register_object(def);
        }
        StmtKind::Enum { name, variants } => {
            registry.register_enum(
                name.clone(),
                variants.iter().map(|v| v.name.clone()).collect(),
            );
        }
        StmtKind::ExternFn {
            name,
            params,
            return_type,
        } => {
            let sig = extern_signature(registry, params, return_type);
            registry.register_function(name.clone(), sig);
        }
        StmtKind::ImportFfi { functions, .. } => {
            for f in functions {
                let sig = extern_signature(registry, &f.params, &f.return_type);
                registry.register_function(f.name.clone(), sig);
            }
        }
        StmtKind::Export(inner) => register_stmt(registry, inner),
        _ => {}
    }
}

fn extern_signature(registry: &Registry, params: &[TypeExpr], ret: &TypeExpr) -> FunctionSig {
    let param_types: Vec<CheckedType> =
        params.iter().map(|t| registry.resolve_annotation(t)).collect();
    FunctionSig {
        param_names: (0..param_types.len()).map(|i| format!("a{}", i)).collect(),
        optional: vec![false; param_types.len()],
        num_required: param_types.len(),
        return_type: registry.resolve_annotation(ret),
        has_rest: false,
        is_async: false,
        param_types,
    }
}

pub struct TypeChecker<'cfg> {
    env: TypeEnv,
    registry: Registry,
    diags: Diagnostics,
    path: PathBuf,
    config: &'cfg CompilerConfig,
    /// Declared return type of each enclosing function literal.
    return_stack: Vec<CheckedType>,
}

impl<'cfg> TypeChecker<'cfg> {
    pub fn new(path: impl Into<PathBuf>, config: &'cfg CompilerConfig) -> Self {
        let mut registry = Registry::new();
        for ext in &config.extern_fns {
            registry.register_function(
                ext.name.clone(),
                FunctionSig {
                    param_names: (0..ext.params.len()).map(|i| format!("a{}", i)).collect(),
                    optional: vec![false; ext.params.len()],
                    num_required: ext.params.len(),
                    return_type: ext.return_type.clone(),
                    has_rest: false,
                    is_async: false,
                    param_types: ext.params.clone(),
                },
            );
        }
        TypeChecker {
            env: TypeEnv::new(),
            registry,
            diags: Diagnostics::new(),
            path: path.into(),
            config,
            return_stack: Vec::new(),
        }
    }

    /// Run both passes over a program.
    pub fn check_program(&mut self, stmts: &[Stmt], cache: &mut ModuleCache) {
        register_declarations(&mut self.registry, stmts);
        tracing::debug!(
            path = %self.path.display(),
            "declaration registration complete"
        );
        self.check_stmts(stmts, cache);
        tracing::debug!(
            errors = self.diags.error_count(),
            warnings = self.diags.warning_count(),
            "type check complete"
        );
    }

    /// Tear down into the artifacts the code generator needs.
    pub fn into_parts(self) -> (Registry, Diagnostics) {
        (self.registry, self.diags)
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diags
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn infer(&self, expr: &Expr) -> CheckedType {
        infer_expr(&self.env, &self.registry, expr)
    }

    fn error(&mut self, line: u32, message: String) {
        self.diags.error(&self.path, line, message);
    }

    fn warning(&mut self, line: u32, message: String) {
        self.diags.warning(&self.path, line, message);
    }

    fn check_stmts(&mut self, stmts: &[Stmt], cache: &mut ModuleCache) {
        for stmt in stmts {
            self.check_stmt(stmt, cache);
        }
    }

    fn check_block(&mut self, stmts: &[Stmt], cache: &mut ModuleCache) {
        self.env.push_scope();
        self.check_stmts(stmts, cache);
        self.env.pop_scope();
    }

    fn check_stmt(&mut self, stmt: &Stmt, cache: &mut ModuleCache) {
        match &stmt.kind {
            StmtKind::Let { name, ty, value } => {
                self.check_binding(name, ty.as_ref(), value, false, stmt.line);
            }
            StmtKind::Const { name, ty, value } => {
                self.check_binding(name, ty.as_ref(), value, true, stmt.line);
            }
            StmtKind::Expr(e) => self.check_expr(e),
            StmtKind::If {
                cond,
                then_body,
                else_body,
            } => {
                self.check_expr(cond);
                self.check_block(then_body, cache);
                if let Some(eb) = else_body {
                    self.check_block(eb, cache);
                }
            }
            StmtKind::While { cond, body } => {
                self.check_expr(cond);
                self.check_block(body, cache);
            }
            StmtKind::For {
                init,
                cond,
                update,
                body,
            } => {
                self.env.push_scope();
                if let Some(init) = init {
                    self.check_stmt(init, cache);
                }
                if let Some(cond) = cond {
                    self.check_expr(cond);
                }
                if let Some(update) = update {
                    self.check_expr(update);
                }
                self.check_stmts(body, cache);
                self.env.pop_scope();
            }
            StmtKind::ForIn {
                key,
                value,
                iterable,
                body,
            } => {
                self.check_expr(iterable);
                let iter_ty = self.infer(iterable);
                self.env.push_scope();
                self.bind_for_in_vars(key, value.as_deref(), &iter_ty, stmt.line);
                self.check_stmts(body, cache);
                self.env.pop_scope();
            }
            StmtKind::Block(stmts) => self.check_block(stmts, cache),
            StmtKind::Return(value) => self.check_return(value.as_ref(), stmt.line),
            StmtKind::Break | StmtKind::Continue => {}
            StmtKind::DefineObject { fields, .. } => {
                for f in fields {
                    if let Some(d) = &f.default {
                        self.check_expr(d);
                    }
                }
            }
            StmtKind::Enum { .. } => {}
            StmtKind::Try {
                body,
                catch,
                finally,
            } => {
                self.check_block(body, cache);
                if let Some(CatchClause { binding, body }) = catch {
                    self.env.push_scope();
                    if let Some(name) = binding {
                        self.env.bind(name.clone(), CheckedType::any(), false, stmt.line);
                    }
                    self.check_stmts(body, cache);
                    self.env.pop_scope();
                }
                if let Some(fin) = finally {
                    self.check_block(fin, cache);
                }
            }
            StmtKind::Throw(e) => self.check_expr(e),
            StmtKind::Switch { subject, cases } => {
                self.check_expr(subject);
                // Case bodies share one scope; fall-through flows between
                // them.
                self.env.push_scope();
                for case in cases {
                    if let Some(v) = &case.value {
                        self.check_expr(v);
                    }
                    self.check_stmts(&case.body, cache);
                }
                self.env.pop_scope();
            }
            StmtKind::Defer { call } => {
                if !matches!(call.kind, ExprKind::Call { .. }) {
                    self.error(stmt.line, "defer requires a function call".to_string());
                }
                self.check_expr(call);
            }
            StmtKind::Export(inner) => self.check_stmt(inner, cache),
            StmtKind::Import { spec, binding } => {
                self.check_import(spec, binding, stmt.line, cache);
            }
            StmtKind::ImportFfi { .. } | StmtKind::ExternFn { .. } => {}
        }
    }

    fn check_binding(
        &mut self,
        name: &str,
        ann: Option<&TypeExpr>,
        value: &Expr,
        is_const: bool,
        line: u32,
    ) {
        self.check_expr(value);
        let value_ty = self.infer(value);
        let declared = ann.map(|t| self.registry.resolve_annotation(t));
        let bound_ty = match declared {
            Some(decl) if decl.kind != TypeKind::Unknown => {
                if !decl.accepts(&value_ty) {
                    self.error(
                        line,
                        format!(
                            "cannot assign '{}' to variable '{}' of type '{}'",
                            value_ty, name, decl
                        ),
                    );
                }
                decl
            }
            _ => value_ty,
        };
        self.env.bind(name.to_string(), bound_ty, is_const, line);
    }

    fn bind_for_in_vars(
        &mut self,
        key: &str,
        value: Option<&str>,
        iter_ty: &CheckedType,
        line: u32,
    ) {
        let element = match iter_ty.kind {
            TypeKind::Array => iter_ty
                .element
                .as_deref()
                .cloned()
                .unwrap_or_else(CheckedType::any),
            TypeKind::String => CheckedType::rune(),
            _ => CheckedType::any(),
        };
        match value {
            Some(value_name) => {
                // Two variables: key is the index (arrays/strings) or the
                // object key; value is the element.
                let key_ty = if iter_ty.kind == TypeKind::Object || iter_ty.kind == TypeKind::Custom
                {
                    CheckedType::string()
                } else {
                    CheckedType::i32()
                };
                self.env.bind(key.to_string(), key_ty, false, line);
                self.env.bind(value_name.to_string(), element, false, line);
            }
            None => {
                // One variable: the element for arrays and strings, the
                // key for objects.
                let ty = if iter_ty.kind == TypeKind::Object || iter_ty.kind == TypeKind::Custom {
                    CheckedType::string()
                } else {
                    element
                };
                self.env.bind(key.to_string(), ty, false, line);
            }
        }
    }

    fn check_return(&mut self, value: Option<&Expr>, line: u32) {
        if let Some(e) = value {
            self.check_expr(e);
        }
        let Some(expected) = self.return_stack.last().cloned() else {
            return;
        };
        if expected.is_permissive() {
            return;
        }
        let actual = value.map(|e| self.infer(e)).unwrap_or_else(CheckedType::null);
        if expected.kind == TypeKind::Void {
            if value.is_some() && actual.kind != TypeKind::Null {
                self.error(
                    line,
                    format!("return type mismatch: expected 'void', got '{}'", actual),
                );
            }
            return;
        }
        if !expected.accepts(&actual) {
            self.error(
                line,
                format!(
                    "return type mismatch: expected '{}', got '{}'",
                    expected, actual
                ),
            );
        }
    }

    fn check_import(
        &mut self,
        spec: &str,
        binding: &ImportBinding,
        line: u32,
        cache: &mut ModuleCache,
    ) {
        let module_id = match cache.analyze(&self.path, spec) {
            Ok(id) => id,
            Err(msg) => {
                self.error(line, msg);
                return;
            }
        };
        let exports: Vec<(String, CheckedType)> = cache
            .exports(module_id)
            .iter()
            .map(|e| (e.name.clone(), e.ty.clone()))
            .collect();
        let function_sigs: Vec<(String, FunctionSig)> = cache
            .exports(module_id)
            .iter()
            .filter_map(|e| e.sig.clone().map(|s| (e.name.clone(), s)))
            .collect();
        match binding {
            ImportBinding::Namespace(name) => {
                self.env
                    .bind(name.clone(), CheckedType::object(), false, line);
            }
            ImportBinding::Star => {
                for (name, ty) in exports {
                    self.env.bind(name, ty, false, line);
                }
                for (name, sig) in function_sigs {
                    self.registry.register_function(name, sig);
                }
            }
            ImportBinding::Named(names) => {
                for (name, alias) in names {
                    let local = alias.as_deref().unwrap_or(name);
                    match exports.iter().find(|(n, _)| n == name) {
                        Some((_, ty)) => {
                            self.env.bind(local.to_string(), ty.clone(), false, line);
                            if let Some((_, sig)) =
                                function_sigs.iter().find(|(n, _)| n == name)
                            {
                                self.registry
                                    .register_function(local.to_string(), sig.clone());
                            }
                        }
                        None => self.error(
                            line,
                            format!("module '{}' has no export named '{}'", spec, name),
                        ),
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Expression validation
    // ------------------------------------------------------------------

    fn check_expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Number(_)
            | ExprKind::Bool(_)
            | ExprKind::Str(_)
            | ExprKind::Rune(_)
            | ExprKind::Null => {}
            ExprKind::Ident(name) => self.check_ident(name, expr.line),
            ExprKind::Binary { op, left, right } => {
                self.check_expr(left);
                self.check_expr(right);
                self.check_binary(*op, left, right, expr.line);
            }
            ExprKind::Unary { op, operand } => {
                self.check_expr(operand);
                self.check_unary(*op, operand, expr.line);
            }
            ExprKind::Ternary {
                cond,
                then_val,
                else_val,
            } => {
                self.check_expr(cond);
                self.check_expr(then_val);
                self.check_expr(else_val);
            }
            ExprKind::Call { callee, args } => self.check_call(callee, args, expr.line),
            ExprKind::Assign { name, value } => {
                self.check_expr(value);
                self.check_assign(name, value, expr.line);
            }
            ExprKind::Index { object, index } => {
                self.check_expr(object);
                self.check_expr(index);
            }
            ExprKind::IndexAssign {
                object,
                index,
                value,
            } => {
                self.check_expr(object);
                self.check_expr(index);
                self.check_expr(value);
                let obj_ty = self.infer(object);
                if obj_ty.kind == TypeKind::Array
                    && let Some(elem) = obj_ty.element.as_deref()
                {
                    let value_ty = self.infer(value);
                    if !elem.accepts(&value_ty) {
                        self.error(
                            expr.line,
                            format!("cannot assign '{}' to element of '{}'", value_ty, obj_ty),
                        );
                    }
                }
            }
            ExprKind::GetProperty { object, property } => {
                self.check_expr(object);
                self.check_property_get(object, property, expr.line);
            }
            ExprKind::SetProperty {
                object,
                property,
                value,
            } => {
                self.check_expr(object);
                self.check_expr(value);
                self.check_property_set(object, property, value, expr.line);
            }
            ExprKind::ArrayLiteral(elems) => {
                for e in elems {
                    self.check_expr(e);
                }
            }
            ExprKind::ObjectLiteral(fields) => {
                for (_, e) in fields {
                    self.check_expr(e);
                }
            }
            ExprKind::Function(lit) => self.check_function_body(lit, expr.line),
            ExprKind::Await(inner) => self.check_expr(inner),
            ExprKind::StringInterpolation(parts) => {
                for part in parts {
                    if let InterpolationPart::Expr(e) = part {
                        self.check_expr(e);
                    }
                }
            }
            ExprKind::OptionalChain { object, access } => {
                self.check_expr(object);
                match access {
                    OptionalAccess::Property(_) => {}
                    OptionalAccess::Index(idx) => self.check_expr(idx),
                    OptionalAccess::Call(args) => {
                        for a in args {
                            self.check_expr(a);
                        }
                    }
                }
            }
            ExprKind::NullCoalesce { left, right } => {
                self.check_expr(left);
                self.check_expr(right);
            }
            ExprKind::PrefixInc(t)
            | ExprKind::PrefixDec(t)
            | ExprKind::PostfixInc(t)
            | ExprKind::PostfixDec(t) => self.check_expr(t),
        }
    }

    fn check_ident(&mut self, name: &str, line: u32) {
        if !self.config.warn_implicit_any {
            return;
        }
        if self.env.lookup(name).is_none()
            && self.registry.function(name).is_none()
            && !self.registry.is_enum(name)
            && builtins::builtin_fn(name).is_none()
        {
            self.warning(line, format!("identifier '{}' has unknown type", name));
        }
    }

    /// Operand admissible for arithmetic: numeric widths, runes (coerced
    /// to integers), and the permissive sentinels.
    fn arith_operand(ty: &CheckedType) -> bool {
        ty.is_numeric() || ty.kind == TypeKind::Rune || ty.is_permissive()
    }

    fn integer_operand(ty: &CheckedType) -> bool {
        ty.is_integer() || ty.kind == TypeKind::Rune || ty.is_permissive()
    }

    fn check_binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr, line: u32) {
        if op.is_comparison() || op.is_logical() {
            return;
        }
        let lt = self.infer(left);
        let rt = self.infer(right);
        match op {
            BinaryOp::Add => {
                let string_concat = lt.kind == TypeKind::String || rt.kind == TypeKind::String;
                let ptr_offset = (lt.kind == TypeKind::Ptr && Self::integer_operand(&rt))
                    || (rt.kind == TypeKind::Ptr && Self::integer_operand(&lt));
                if !string_concat
                    && !ptr_offset
                    && !(Self::arith_operand(&lt) && Self::arith_operand(&rt))
                {
                    self.error(line, format!("cannot add '{}' and '{}'", lt, rt));
                }
            }
            BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
                let ptr_offset =
                    op == BinaryOp::Sub && lt.kind == TypeKind::Ptr && Self::integer_operand(&rt);
                if !ptr_offset && !(Self::arith_operand(&lt) && Self::arith_operand(&rt)) {
                    let verb = match op {
                        BinaryOp::Sub => "subtract",
                        BinaryOp::Mul => "multiply",
                        BinaryOp::Div => "divide",
                        _ => "take modulo of",
                    };
                    self.error(line, format!("cannot {} '{}' and '{}'", verb, lt, rt));
                }
            }
            _ => {
                // Bitwise family.
                if !(Self::integer_operand(&lt) && Self::integer_operand(&rt)) {
                    self.error(line, "bitwise operation requires integer operands".to_string());
                }
            }
        }
    }

    fn check_unary(&mut self, op: UnaryOp, operand: &Expr, line: u32) {
        let ty = self.infer(operand);
        match op {
            UnaryOp::Neg => {
                if !Self::arith_operand(&ty) {
                    self.error(line, format!("cannot negate '{}'", ty));
                }
            }
            UnaryOp::BitNot => {
                if !Self::integer_operand(&ty) {
                    self.error(line, "bitwise operation requires integer operands".to_string());
                }
            }
            UnaryOp::Not => {}
        }
    }

    fn check_call(&mut self, callee: &Expr, args: &[Expr], line: u32) {
        for a in args {
            self.check_expr(a);
        }
        match &callee.kind {
            ExprKind::Ident(name) => {
                // A local binding shadows the global signature.
                if self.env.lookup(name).is_none() {
                    if let Some(sig) = self.registry.function(name).cloned() {
                        self.check_call_against_signature(name, &sig, args, line);
                        return;
                    }
                    if let Some(b) = builtins::builtin_fn(name) {
                        if args.len() < b.min_args {
                            self.error(line, format!("too few arguments to '{}'", name));
                        } else if let Some(max) = b.max_args
                            && args.len() > max
                        {
                            self.error(line, format!("too many arguments to '{}'", name));
                        }
                        return;
                    }
                }
                self.check_expr(callee);
            }
            ExprKind::GetProperty { object, property } => {
                self.check_expr(object);
                let recv = self.infer(object);
                let sig = match recv.kind {
                    TypeKind::Array => builtins::array_method(property),
                    TypeKind::String => builtins::string_method(property),
                    _ => None,
                };
                if let Some(sig) = sig {
                    self.check_method_call(property, sig, &recv, args, line);
                }
            }
            _ => self.check_expr(callee),
        }
    }

    fn check_call_against_signature(
        &mut self,
        name: &str,
        sig: &FunctionSig,
        args: &[Expr],
        line: u32,
    ) {
        if args.len() < sig.num_required {
            self.error(line, format!("too few arguments to '{}'", name));
        } else if !sig.has_rest && args.len() > sig.arity() {
            self.error(line, format!("too many arguments to '{}'", name));
        }
        let positional = if sig.has_rest {
            sig.arity().saturating_sub(1)
        } else {
            sig.arity()
        };
        for (i, arg) in args.iter().enumerate().take(positional) {
            let expected = &sig.param_types[i];
            let actual = self.infer(arg);
            if !expected.accepts(&actual) {
                self.error(
                    line,
                    format!(
                        "argument {} to '{}': expected '{}', got '{}'",
                        i + 1,
                        name,
                        expected,
                        actual
                    ),
                );
            }
        }
    }

    fn check_method_call(
        &mut self,
        name: &str,
        sig: &MethodSig,
        receiver: &CheckedType,
        args: &[Expr],
        line: u32,
    ) {
        if args.len() < sig.min_args {
            self.error(line, format!("too few arguments to '{}'", name));
            return;
        }
        if let Some(max) = sig.max_args
            && args.len() > max
        {
            self.error(line, format!("too many arguments to '{}'", name));
            return;
        }
        let element = receiver.element.as_deref();
        for (i, arg) in args.iter().enumerate() {
            let shape = sig.shape_at(i);
            let actual = self.infer(arg);
            if !shape.admits(&actual, element) {
                self.error(
                    line,
                    format!(
                        "argument {} to '{}': expected {}, got '{}'",
                        i + 1,
                        name,
                        shape.describe(),
                        actual
                    ),
                );
            }
        }
    }

    fn check_assign(&mut self, name: &str, value: &Expr, line: u32) {
        let Some(binding) = self.env.lookup(name) else {
            return;
        };
        let (is_const, declared) = (binding.is_const, binding.ty.clone());
        if is_const {
            self.error(line, format!("cannot reassign const variable '{}'", name));
            return;
        }
        let value_ty = self.infer(value);
        if !declared.accepts(&value_ty) {
            self.error(
                line,
                format!(
                    "cannot assign '{}' to variable '{}' of type '{}'",
                    value_ty, name, declared
                ),
            );
        }
    }

    fn check_property_get(&mut self, object: &Expr, property: &str, line: u32) {
        let obj_ty = self.infer(object);
        if obj_ty.kind != TypeKind::Custom {
            return;
        }
        if crate::infer::builtin_property_type(&obj_ty, property).is_some() {
            return;
        }
        let Some(name) = obj_ty.type_name.clone() else {
            return;
        };
        if let Some(def) = self.registry.object(&name)
            && def.field(property).is_none()
        {
            self.warning(
                line,
                format!("property '{}' not defined in type '{}'", property, name),
            );
        }
    }

    fn check_property_set(&mut self, object: &Expr, property: &str, value: &Expr, line: u32) {
        let obj_ty = self.infer(object);
        if obj_ty.kind != TypeKind::Custom {
            return;
        }
        let Some(name) = obj_ty.type_name.clone() else {
            return;
        };
        let Some(def) = self.registry.object(&name) else {
            return;
        };
        match def.field(property) {
            None => {
                self.warning(
                    line,
                    format!("property '{}' not defined in type '{}'", property, name),
                );
            }
            Some(field) => {
                let field_ty = field.ty.clone();
                let value_ty = self.infer(value);
                if !field_ty.accepts(&value_ty) {
                    self.error(
                        line,
                        format!(
                            "cannot assign '{}' to property '{}' of type '{}'",
                            value_ty, property, field_ty
                        ),
                    );
                }
            }
        }
    }

    fn check_function_body(&mut self, lit: &FunctionLit, line: u32) {
        let declared_return = lit
            .return_type
            .as_ref()
            .map(|t| self.registry.resolve_annotation(t))
            .unwrap_or_else(CheckedType::any);

        self.env.push_scope();
        for Param {
            name,
            ty,
            default,
            rest,
            ..
        } in &lit.params
        {
            if let Some(d) = default {
                self.check_expr(d);
            }
            let param_ty = if *rest {
                CheckedType::array(None)
            } else {
                ty.as_ref()
                    .map(|t| self.registry.resolve_annotation(t))
                    .unwrap_or_else(CheckedType::any)
            };
            self.env.bind(name.clone(), param_ty, false, line);
        }
        self.return_stack.push(declared_return.clone());
        // Module imports are not permitted inside function bodies, so a
        // detached cache is sufficient here.
        let mut no_modules = ModuleCache::disconnected();
        self.check_stmts(&lit.body, &mut no_modules);
        self.return_stack.pop();
        self.env.pop_scope();

        if self.config.warn_missing_return
            && !declared_return.is_permissive()
            && declared_return.kind != TypeKind::Void
            && !always_returns(&lit.body)
        {
            self.warning(
                line,
                format!(
                    "function with return type '{}' may complete without returning a value",
                    declared_return
                ),
            );
        }
    }
}

/// Conservative terminator analysis: does every path through `stmts` end
/// in a return or throw?
pub fn always_returns(stmts: &[Stmt]) -> bool {
    stmts.iter().any(stmt_always_returns)
}

fn stmt_always_returns(stmt: &Stmt) -> bool {
    match &stmt.kind {
        StmtKind::Return(_) | StmtKind::Throw(_) => true,
        StmtKind::Block(inner) => always_returns(inner),
        StmtKind::If {
            then_body,
            else_body,
            ..
        } => match else_body {
            Some(eb) => always_returns(then_body) && always_returns(eb),
            None => false,
        },
        StmtKind::Try { body, catch, .. } => match catch {
            Some(c) => always_returns(body) && always_returns(&c.body),
            None => always_returns(body),
        },
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Number;

    fn cfg() -> CompilerConfig {
        CompilerConfig::default()
    }

    fn e(kind: ExprKind) -> Expr {
        Expr::new(kind, 1)
    }

    fn int(v: i64) -> Expr {
        e(ExprKind::Number(Number::Int(v)))
    }

    fn s(kind: StmtKind) -> Stmt {
        Stmt::new(kind, 1)
    }

    fn check(stmts: Vec<Stmt>, config: &CompilerConfig) -> (usize, usize, Vec<String>) {
        let mut checker = TypeChecker::new("test.hml", config);
        let mut cache = ModuleCache::disconnected();
        checker.check_program(&stmts, &mut cache);
        let msgs = checker
            .diags
            .iter()
            .map(|d| d.message.clone())
            .collect();
        (
            checker.diags.error_count(),
            checker.diags.warning_count(),
            msgs,
        )
    }

    #[test]
    fn const_reassignment_is_an_error() {
        let config = cfg();
        let stmts = vec![
            s(StmtKind::Const {
                name: "x".into(),
                ty: Some(TypeExpr::I32),
                value: int(1),
            }),
            s(StmtKind::Expr(e(ExprKind::Assign {
                name: "x".into(),
                value: Box::new(int(2)),
            }))),
        ];
        let (errors, _, msgs) = check(stmts, &config);
        assert_eq!(errors, 1);
        assert_eq!(msgs[0], "cannot reassign const variable 'x'");
    }

    #[test]
    fn declared_type_rejects_bad_initializer() {
        let config = cfg();
        let stmts = vec![s(StmtKind::Let {
            name: "x".into(),
            ty: Some(TypeExpr::I32),
            value: e(ExprKind::ArrayLiteral(vec![])),
        })];
        let (errors, _, msgs) = check(stmts, &config);
        assert_eq!(errors, 1);
        assert!(msgs[0].starts_with("cannot assign"));
    }

    #[test]
    fn add_rejects_bool_operand() {
        let config = cfg();
        let stmts = vec![s(StmtKind::Expr(e(ExprKind::Binary {
            op: BinaryOp::Add,
            left: Box::new(e(ExprKind::Bool(true))),
            right: Box::new(int(1)),
        })))];
        let (errors, _, msgs) = check(stmts, &config);
        assert_eq!(errors, 1);
        assert_eq!(msgs[0], "cannot add 'bool' and 'i32'");
    }

    #[test]
    fn string_concat_is_fine() {
        let config = cfg();
        let stmts = vec![s(StmtKind::Expr(e(ExprKind::Binary {
            op: BinaryOp::Add,
            left: Box::new(e(ExprKind::Str("n = ".into()))),
            right: Box::new(int(1)),
        })))];
        assert_eq!(check(stmts, &config).0, 0);
    }

    #[test]
    fn bitwise_requires_integers() {
        let config = cfg();
        let stmts = vec![s(StmtKind::Expr(e(ExprKind::Binary {
            op: BinaryOp::BitAnd,
            left: Box::new(e(ExprKind::Number(Number::Float(1.5)))),
            right: Box::new(int(1)),
        })))];
        let (errors, _, msgs) = check(stmts, &config);
        assert_eq!(errors, 1);
        assert_eq!(msgs[0], "bitwise operation requires integer operands");
    }

    fn fact_fn(body: Vec<Stmt>) -> Expr {
        e(ExprKind::Function(FunctionLit {
            params: vec![Param::required("n", Some(TypeExpr::I32))],
            return_type: Some(TypeExpr::I32),
            body,
            is_async: false,
        }))
    }

    #[test]
    fn call_arity_against_registered_signature() {
        let config = cfg();
        let stmts = vec![
            s(StmtKind::Let {
                name: "f".into(),
                ty: None,
                value: fact_fn(vec![s(StmtKind::Return(Some(int(1))))]),
            }),
            s(StmtKind::Expr(e(ExprKind::Call {
                callee: Box::new(e(ExprKind::Ident("f".into()))),
                args: vec![int(1), int(2)],
            }))),
            s(StmtKind::Expr(e(ExprKind::Call {
                callee: Box::new(e(ExprKind::Ident("f".into()))),
                args: vec![],
            }))),
        ];
        let (errors, _, msgs) = check(stmts, &config);
        assert_eq!(errors, 2);
        assert_eq!(msgs[0], "too many arguments to 'f'");
        assert_eq!(msgs[1], "too few arguments to 'f'");
    }

    #[test]
    fn argument_type_mismatch() {
        let config = cfg();
        let stmts = vec![
            s(StmtKind::Let {
                name: "f".into(),
                ty: None,
                value: fact_fn(vec![s(StmtKind::Return(Some(int(1))))]),
            }),
            s(StmtKind::Expr(e(ExprKind::Call {
                callee: Box::new(e(ExprKind::Ident("f".into()))),
                args: vec![e(ExprKind::ArrayLiteral(vec![]))],
            }))),
        ];
        let (errors, _, msgs) = check(stmts, &config);
        assert_eq!(errors, 1);
        assert_eq!(msgs[0], "argument 1 to 'f': expected 'i32', got '[]'");
    }

    #[test]
    fn forward_reference_resolves() {
        let config = cfg();
        // Call before the definition: pass 1 registered the signature.
        let stmts = vec![
            s(StmtKind::Expr(e(ExprKind::Call {
                callee: Box::new(e(ExprKind::Ident("later".into()))),
                args: vec![int(1)],
            }))),
            s(StmtKind::Let {
                name: "later".into(),
                ty: None,
                value: fact_fn(vec![s(StmtKind::Return(Some(int(1))))]),
            }),
        ];
        assert_eq!(check(stmts, &config).0, 0);
    }

    #[test]
    fn return_type_mismatch_reported() {
        let config = cfg();
        let stmts = vec![s(StmtKind::Let {
            name: "f".into(),
            ty: None,
            value: fact_fn(vec![s(StmtKind::Return(Some(e(ExprKind::ArrayLiteral(
                vec![],
            )))))]),
        })];
        let (errors, _, msgs) = check(stmts, &config);
        assert_eq!(errors, 1);
        assert!(msgs[0].starts_with("return type mismatch"));
    }

    #[test]
    fn missing_return_is_a_warning_not_error() {
        let config = cfg();
        let stmts = vec![s(StmtKind::Let {
            name: "f".into(),
            ty: None,
            value: fact_fn(vec![s(StmtKind::Expr(int(1)))]),
        })];
        let (errors, warnings, _) = check(stmts, &config);
        assert_eq!(errors, 0);
        assert_eq!(warnings, 1);
    }

    #[test]
    fn if_else_with_returns_satisfies_missing_return() {
        let config = cfg();
        let body = vec![s(StmtKind::If {
            cond: e(ExprKind::Bool(true)),
            then_body: vec![s(StmtKind::Return(Some(int(1))))],
            else_body: Some(vec![s(StmtKind::Return(Some(int(2))))]),
        })];
        let stmts = vec![s(StmtKind::Let {
            name: "f".into(),
            ty: None,
            value: fact_fn(body),
        })];
        let (_, warnings, _) = check(stmts, &config);
        assert_eq!(warnings, 0);
    }

    #[test]
    fn unknown_property_on_custom_type_warns() {
        let config = cfg();
        let stmts = vec![
            s(StmtKind::DefineObject {
                name: "Point".into(),
                fields: vec![crate::ast::FieldDef {
                    name: "x".into(),
                    ty: TypeExpr::F64,
                    optional: false,
                    default: None,
                }],
            }),
            s(StmtKind::Let {
                name: "p".into(),
                ty: Some(TypeExpr::Named("Point".into())),
                value: e(ExprKind::ObjectLiteral(vec![])),
            }),
            s(StmtKind::Expr(e(ExprKind::GetProperty {
                object: Box::new(e(ExprKind::Ident("p".into()))),
                property: "z".into(),
            }))),
        ];
        let (errors, warnings, msgs) = check(stmts, &config);
        assert_eq!(errors, 0);
        assert_eq!(warnings, 1);
        assert_eq!(msgs[0], "property 'z' not defined in type 'Point'");
    }

    #[test]
    fn property_set_type_checked() {
        let config = cfg();
        let stmts = vec![
            s(StmtKind::DefineObject {
                name: "Point".into(),
                fields: vec![crate::ast::FieldDef {
                    name: "x".into(),
                    ty: TypeExpr::F64,
                    optional: false,
                    default: None,
                }],
            }),
            s(StmtKind::Let {
                name: "p".into(),
                ty: Some(TypeExpr::Named("Point".into())),
                value: e(ExprKind::ObjectLiteral(vec![])),
            }),
            s(StmtKind::Expr(e(ExprKind::SetProperty {
                object: Box::new(e(ExprKind::Ident("p".into()))),
                property: "x".into(),
                value: Box::new(e(ExprKind::Str("no".into()))),
            }))),
        ];
        let (errors, _, msgs) = check(stmts, &config);
        assert_eq!(errors, 1);
        assert!(msgs[0].starts_with("cannot assign 'string' to property 'x'"));
    }

    #[test]
    fn method_shapes_enforced() {
        let config = cfg();
        let stmts = vec![
            s(StmtKind::Let {
                name: "xs".into(),
                ty: Some(TypeExpr::Array(Some(Box::new(TypeExpr::I32)))),
                value: e(ExprKind::ArrayLiteral(vec![])),
            }),
            // push with no args: too few.
            s(StmtKind::Expr(e(ExprKind::Call {
                callee: Box::new(e(ExprKind::GetProperty {
                    object: Box::new(e(ExprKind::Ident("xs".into()))),
                    property: "push".into(),
                })),
                args: vec![],
            }))),
            // insert("a", 1): first arg must be an integer.
            s(StmtKind::Expr(e(ExprKind::Call {
                callee: Box::new(e(ExprKind::GetProperty {
                    object: Box::new(e(ExprKind::Ident("xs".into()))),
                    property: "insert".into(),
                })),
                args: vec![e(ExprKind::Str("a".into())), int(1)],
            }))),
        ];
        let (errors, _, msgs) = check(stmts, &config);
        assert_eq!(errors, 2);
        assert_eq!(msgs[0], "too few arguments to 'push'");
        assert_eq!(msgs[1], "argument 1 to 'insert': expected integer, got 'string'");
    }

    #[test]
    fn implicit_any_warning_is_opt_in() {
        let mut config = cfg();
        let stmts = vec![s(StmtKind::Expr(e(ExprKind::Ident("ghost".into()))))];
        assert_eq!(check(stmts.clone(), &config).1, 0);
        config.warn_implicit_any = true;
        let (_, warnings, msgs) = check(stmts, &config);
        assert_eq!(warnings, 1);
        assert_eq!(msgs[0], "identifier 'ghost' has unknown type");
    }

    #[test]
    fn errors_accumulate_without_stopping() {
        let config = cfg();
        let bad_add = |l: Expr| {
            s(StmtKind::Expr(e(ExprKind::Binary {
                op: BinaryOp::Sub,
                left: Box::new(l),
                right: Box::new(e(ExprKind::Str("x".into()))),
            })))
        };
        let stmts = vec![
            bad_add(e(ExprKind::Bool(true))),
            bad_add(e(ExprKind::Null)),
            bad_add(e(ExprKind::ArrayLiteral(vec![]))),
        ];
        assert_eq!(check(stmts, &config).0, 3);
    }

    #[test]
    fn scope_depth_balanced_after_checking() {
        let config = cfg();
        let stmts = vec![s(StmtKind::Block(vec![s(StmtKind::If {
            cond: e(ExprKind::Bool(true)),
            then_body: vec![s(StmtKind::Return(None))],
            else_body: None,
        })]))];
        let mut checker = TypeChecker::new("test.hml", &config);
        let mut cache = ModuleCache::disconnected();
        checker.check_program(&stmts, &mut cache);
        assert_eq!(checker.env.depth(), 1);
    }
}
