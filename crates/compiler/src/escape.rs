//! Escape analysis and unboxing promotion
//!
//! A local can live in a native C slot instead of a tagged `HmlValue`
//! when its value never needs the uniform representation. A variable
//! *escapes* when it is captured by a closure (conservatively: any
//! function literal in scope), passed directly as a call argument, stored
//! into an array or object literal, returned directly, thrown, or used as
//! a container (indexed or field-accessed).
//!
//! Three promotions feed the unboxable table the generator consumes:
//!
//! 1. typed let: `let x: i32 = <unboxable>` with no later escape and
//!    only unboxable reassignments;
//! 2. for-loop counter: `for (let i = 0; i < n; i++)`;
//! 3. while-loop accumulator: an integer local updated as `v = v op e`
//!    inside a loop body.

use crate::ast::{
    BinaryOp, Expr, ExprKind, InterpolationPart, Number, OptionalAccess, Stmt, StmtKind, TypeExpr,
};
use crate::env::{Registry, TypeEnv};
use crate::infer::infer_expr;
use crate::types::{CheckedType, TypeKind};
use std::collections::HashMap;

/// The native C representation of an unboxed variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeKind {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Bool,
}

impl NativeKind {
    pub fn from_checked(ty: &CheckedType) -> Option<NativeKind> {
        Some(match ty.kind {
            TypeKind::I8 => NativeKind::I8,
            TypeKind::I16 => NativeKind::I16,
            TypeKind::I32 => NativeKind::I32,
            TypeKind::I64 => NativeKind::I64,
            TypeKind::U8 => NativeKind::U8,
            TypeKind::U16 => NativeKind::U16,
            TypeKind::U32 => NativeKind::U32,
            TypeKind::U64 => NativeKind::U64,
            TypeKind::F32 => NativeKind::F32,
            TypeKind::F64 => NativeKind::F64,
            TypeKind::Bool => NativeKind::Bool,
            _ => return None,
        })
    }

    pub fn c_type(self) -> &'static str {
        match self {
            NativeKind::I8 => "int8_t",
            NativeKind::I16 => "int16_t",
            NativeKind::I32 => "int32_t",
            NativeKind::I64 => "int64_t",
            NativeKind::U8 => "uint8_t",
            NativeKind::U16 => "uint16_t",
            NativeKind::U32 => "uint32_t",
            NativeKind::U64 => "uint64_t",
            NativeKind::F32 => "float",
            NativeKind::F64 => "double",
            NativeKind::Bool => "int",
        }
    }

    /// Constructor used to re-box a native value.
    pub fn box_fn(self) -> &'static str {
        match self {
            NativeKind::I8 | NativeKind::I16 | NativeKind::I32 | NativeKind::U8
            | NativeKind::U16 => "hml_val_i32",
            NativeKind::I64 | NativeKind::U32 | NativeKind::U64 => "hml_val_i64",
            NativeKind::F32 | NativeKind::F64 => "hml_val_f64",
            NativeKind::Bool => "hml_val_bool",
        }
    }

    /// Payload union field holding a value of the matching tagged kind.
    pub fn payload_field(self) -> &'static str {
        match self {
            NativeKind::I8 | NativeKind::I16 | NativeKind::I32 | NativeKind::U8
            | NativeKind::U16 => "as_i32",
            NativeKind::I64 | NativeKind::U32 | NativeKind::U64 => "as_i64",
            NativeKind::F32 | NativeKind::F64 => "as_f64",
            NativeKind::Bool => "as_bool",
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, NativeKind::F32 | NativeKind::F64)
    }
}

/// One entry of the unboxable-variable table.
#[derive(Debug, Clone, Copy)]
pub struct UnboxedVar {
    pub native: NativeKind,
    pub is_loop_counter: bool,
    pub is_accumulator: bool,
    pub is_typed_var: bool,
}

/// Unboxable variables of the unit currently being lowered, by name.
pub type UnboxTable = HashMap<String, UnboxedVar>;

// ----------------------------------------------------------------------
// Escape analysis
// ----------------------------------------------------------------------

/// Does `name` escape anywhere in these statements?
pub fn escapes_in_stmts(name: &str, stmts: &[Stmt]) -> bool {
    stmts.iter().any(|s| escapes_in_stmt(name, s))
}

fn escapes_in_stmt(name: &str, stmt: &Stmt) -> bool {
    match &stmt.kind {
        StmtKind::Let { value, .. } | StmtKind::Const { value, .. } => escapes_in_expr(name, value),
        StmtKind::Expr(e) => escapes_in_expr(name, e),
        StmtKind::If {
            cond,
            then_body,
            else_body,
        } => {
            escapes_in_expr(name, cond)
                || escapes_in_stmts(name, then_body)
                || else_body
                    .as_ref()
                    .is_some_and(|eb| escapes_in_stmts(name, eb))
        }
        StmtKind::While { cond, body } => {
            escapes_in_expr(name, cond) || escapes_in_stmts(name, body)
        }
        StmtKind::For {
            init,
            cond,
            update,
            body,
        } => {
            init.as_ref().is_some_and(|s| escapes_in_stmt(name, s))
                || cond.as_ref().is_some_and(|c| escapes_in_expr(name, c))
                || update.as_ref().is_some_and(|u| escapes_in_expr(name, u))
                || escapes_in_stmts(name, body)
        }
        StmtKind::ForIn { iterable, body, .. } => {
            // Iterating a variable uses it as a container.
            is_ident(iterable, name)
                || escapes_in_expr(name, iterable)
                || escapes_in_stmts(name, body)
        }
        StmtKind::Block(stmts) => escapes_in_stmts(name, stmts),
        // A directly returned or thrown value leaves the frame.
        StmtKind::Return(Some(e)) => is_ident(e, name) || escapes_in_expr(name, e),
        StmtKind::Return(None) | StmtKind::Break | StmtKind::Continue => false,
        StmtKind::Throw(e) => is_ident(e, name) || escapes_in_expr(name, e),
        StmtKind::Try {
            body,
            catch,
            finally,
        } => {
            escapes_in_stmts(name, body)
                || catch.as_ref().is_some_and(|c| escapes_in_stmts(name, &c.body))
                || finally.as_ref().is_some_and(|f| escapes_in_stmts(name, f))
        }
        StmtKind::Switch { subject, cases } => {
            escapes_in_expr(name, subject)
                || cases.iter().any(|c| {
                    c.value.as_ref().is_some_and(|v| escapes_in_expr(name, v))
                        || escapes_in_stmts(name, &c.body)
                })
        }
        StmtKind::Defer { call } => escapes_in_expr(name, call),
        StmtKind::Export(inner) => escapes_in_stmt(name, inner),
        StmtKind::DefineObject { fields, .. } => fields
            .iter()
            .any(|f| f.default.as_ref().is_some_and(|d| escapes_in_expr(name, d))),
        StmtKind::Enum { .. } | StmtKind::Import { .. } | StmtKind::ImportFfi { .. }
        | StmtKind::ExternFn { .. } => false,
    }
}

fn is_ident(expr: &Expr, name: &str) -> bool {
    matches!(&expr.kind, ExprKind::Ident(n) if n == name)
}

fn escapes_in_expr(name: &str, expr: &Expr) -> bool {
    match &expr.kind {
        // Conservative: any function literal in scope captures everything.
        ExprKind::Function(_) => true,
        ExprKind::Number(_)
        | ExprKind::Bool(_)
        | ExprKind::Str(_)
        | ExprKind::Rune(_)
        | ExprKind::Null
        | ExprKind::Ident(_) => false,
        ExprKind::Binary { left, right, .. } => {
            escapes_in_expr(name, left) || escapes_in_expr(name, right)
        }
        ExprKind::Unary { operand, .. } => escapes_in_expr(name, operand),
        ExprKind::Ternary {
            cond,
            then_val,
            else_val,
        } => {
            escapes_in_expr(name, cond)
                || escapes_in_expr(name, then_val)
                || escapes_in_expr(name, else_val)
        }
        ExprKind::Call { callee, args } => {
            // Direct identifier arguments escape into the callee.
            args.iter().any(|a| is_ident(a, name))
                || escapes_in_expr(name, callee)
                || args.iter().any(|a| escapes_in_expr(name, a))
        }
        ExprKind::Assign { value, .. } => escapes_in_expr(name, value),
        // Using the variable as a container escapes it.
        ExprKind::Index { object, index } => {
            is_ident(object, name) || escapes_in_expr(name, object) || escapes_in_expr(name, index)
        }
        ExprKind::IndexAssign {
            object,
            index,
            value,
        } => {
            is_ident(object, name)
                || is_ident(value, name)
                || escapes_in_expr(name, object)
                || escapes_in_expr(name, index)
                || escapes_in_expr(name, value)
        }
        ExprKind::GetProperty { object, .. } => {
            is_ident(object, name) || escapes_in_expr(name, object)
        }
        ExprKind::SetProperty { object, value, .. } => {
            is_ident(object, name)
                || is_ident(value, name)
                || escapes_in_expr(name, object)
                || escapes_in_expr(name, value)
        }
        // Storing into a literal container escapes.
        ExprKind::ArrayLiteral(elems) => elems
            .iter()
            .any(|e| is_ident(e, name) || escapes_in_expr(name, e)),
        ExprKind::ObjectLiteral(fields) => fields
            .iter()
            .any(|(_, e)| is_ident(e, name) || escapes_in_expr(name, e)),
        ExprKind::Await(inner) => is_ident(inner, name) || escapes_in_expr(name, inner),
        ExprKind::StringInterpolation(parts) => parts.iter().any(|p| match p {
            InterpolationPart::Expr(e) => escapes_in_expr(name, e),
            InterpolationPart::Literal(_) => false,
        }),
        ExprKind::OptionalChain { object, access } => {
            is_ident(object, name)
                || escapes_in_expr(name, object)
                || match access {
                    OptionalAccess::Property(_) => false,
                    OptionalAccess::Index(i) => escapes_in_expr(name, i),
                    OptionalAccess::Call(args) => args
                        .iter()
                        .any(|a| is_ident(a, name) || escapes_in_expr(name, a)),
                }
        }
        ExprKind::NullCoalesce { left, right } => {
            escapes_in_expr(name, left) || escapes_in_expr(name, right)
        }
        ExprKind::PrefixInc(t)
        | ExprKind::PrefixDec(t)
        | ExprKind::PostfixInc(t)
        | ExprKind::PostfixDec(t) => escapes_in_expr(name, t),
    }
}

// ----------------------------------------------------------------------
// Unboxable expressions
// ----------------------------------------------------------------------

/// Can this expression be evaluated entirely in native arithmetic?
///
/// Literals, identifiers that are themselves unboxed or of a concrete
/// primitive type, and arithmetic/unary/ternary combinations thereof.
pub fn is_unboxable_expr(
    expr: &Expr,
    table: &UnboxTable,
    env: &TypeEnv,
    registry: &Registry,
) -> bool {
    match &expr.kind {
        ExprKind::Number(_) | ExprKind::Bool(_) => true,
        ExprKind::Ident(name) => {
            if table.contains_key(name.as_str()) {
                return true;
            }
            // A boxed identifier works when its inferred kind has a
            // native payload we can read directly.
            NativeKind::from_checked(&infer_expr(env, registry, expr)).is_some()
                && env.lookup(name).is_some()
        }
        ExprKind::Binary { op, left, right } => {
            !op.is_logical()
                && *op != BinaryOp::Div
                && is_unboxable_expr(left, table, env, registry)
                && is_unboxable_expr(right, table, env, registry)
        }
        ExprKind::Unary { operand, .. } => is_unboxable_expr(operand, table, env, registry),
        ExprKind::Ternary {
            cond,
            then_val,
            else_val,
        } => {
            is_unboxable_expr(cond, table, env, registry)
                && is_unboxable_expr(then_val, table, env, registry)
                && is_unboxable_expr(else_val, table, env, registry)
        }
        _ => false,
    }
}

// ----------------------------------------------------------------------
// Promotions
// ----------------------------------------------------------------------

/// Scan a function or block body and add typed-let and accumulator
/// promotions to `table`. The generator calls this once per body before
/// lowering it; for-loop counters are analyzed at their `for` statement.
pub fn analyze_body(stmts: &[Stmt], env: &TypeEnv, registry: &Registry, table: &mut UnboxTable) {
    for (i, stmt) in stmts.iter().enumerate() {
        let StmtKind::Let { name, ty, value } = &stmt.kind else {
            continue;
        };
        let rest = &stmts[i + 1..];
        if let Some(ann) = ty
            && let Some(var) = typed_let_promotion(name, ann, value, rest, table, env, registry)
        {
            table.insert(name.clone(), var);
            continue;
        }
        if let Some(var) = accumulator_promotion(name, value, rest, table, env, registry) {
            table.insert(name.clone(), var);
        }
    }
}

fn typed_let_promotion(
    name: &str,
    ann: &TypeExpr,
    value: &Expr,
    rest: &[Stmt],
    table: &UnboxTable,
    env: &TypeEnv,
    registry: &Registry,
) -> Option<UnboxedVar> {
    let native = NativeKind::from_checked(&registry.resolve_annotation(ann))?;
    if !is_unboxable_expr(value, table, env, registry) {
        return None;
    }
    let var = UnboxedVar {
        native,
        is_loop_counter: false,
        is_accumulator: false,
        is_typed_var: true,
    };
    // Reassignment checks see the candidate itself as already native.
    let mut provisional = table.clone();
    provisional.insert(name.to_string(), var);
    if escapes_in_stmts(name, rest)
        || !reassignments_unboxable(name, rest, &provisional, env, registry)
    {
        return None;
    }
    Some(var)
}

fn accumulator_promotion(
    name: &str,
    value: &Expr,
    rest: &[Stmt],
    table: &UnboxTable,
    env: &TypeEnv,
    registry: &Registry,
) -> Option<UnboxedVar> {
    let inferred = infer_expr(env, registry, value);
    if !inferred.is_integer() || inferred.kind == TypeKind::Enum {
        return None;
    }
    let native = NativeKind::from_checked(&inferred)?;
    if !is_unboxable_expr(value, table, env, registry) {
        return None;
    }
    // Must actually be accumulated inside a later while loop.
    if !rest.iter().any(|s| match &s.kind {
        StmtKind::While { body, .. } => body_accumulates(name, body),
        _ => false,
    }) {
        return None;
    }
    let var = UnboxedVar {
        native,
        is_loop_counter: false,
        is_accumulator: true,
        is_typed_var: false,
    };
    let mut provisional = table.clone();
    provisional.insert(name.to_string(), var);
    if escapes_in_stmts(name, rest)
        || !reassignments_unboxable(name, rest, &provisional, env, registry)
    {
        return None;
    }
    Some(var)
}

const ACCUM_OPS: &[BinaryOp] = &[
    BinaryOp::Add,
    BinaryOp::Sub,
    BinaryOp::Mul,
    BinaryOp::BitOr,
    BinaryOp::BitXor,
    BinaryOp::BitAnd,
];

fn body_accumulates(name: &str, stmts: &[Stmt]) -> bool {
    stmts.iter().any(|s| match &s.kind {
        StmtKind::Expr(e) => expr_accumulates(name, e),
        StmtKind::If {
            then_body,
            else_body,
            ..
        } => {
            body_accumulates(name, then_body)
                || else_body.as_ref().is_some_and(|eb| body_accumulates(name, eb))
        }
        StmtKind::Block(inner) => body_accumulates(name, inner),
        _ => false,
    })
}

fn expr_accumulates(name: &str, expr: &Expr) -> bool {
    if let ExprKind::Assign { name: target, value } = &expr.kind
        && target == name
        && let ExprKind::Binary { op, left, .. } = &value.kind
        && ACCUM_OPS.contains(op)
        && is_ident(left, name)
    {
        return true;
    }
    false
}

/// Every reassignment of `name` in these statements keeps a native value.
fn reassignments_unboxable(
    name: &str,
    stmts: &[Stmt],
    table: &UnboxTable,
    env: &TypeEnv,
    registry: &Registry,
) -> bool {
    let mut ok = true;
    visit_assignments(name, stmts, &mut |value| {
        if !is_unboxable_expr(value, table, env, registry) {
            ok = false;
        }
    });
    ok
}

fn visit_assignments(name: &str, stmts: &[Stmt], f: &mut dyn FnMut(&Expr)) {
    for stmt in stmts {
        match &stmt.kind {
            StmtKind::Expr(e) | StmtKind::Let { value: e, .. } | StmtKind::Const { value: e, .. } => {
                visit_assignments_expr(name, e, f)
            }
            StmtKind::If {
                cond,
                then_body,
                else_body,
            } => {
                visit_assignments_expr(name, cond, f);
                visit_assignments(name, then_body, f);
                if let Some(eb) = else_body {
                    visit_assignments(name, eb, f);
                }
            }
            StmtKind::While { cond, body } => {
                visit_assignments_expr(name, cond, f);
                visit_assignments(name, body, f);
            }
            StmtKind::For {
                init,
                cond,
                update,
                body,
            } => {
                if let Some(s) = init {
                    visit_assignments(name, std::slice::from_ref(s), f);
                }
                if let Some(c) = cond {
                    visit_assignments_expr(name, c, f);
                }
                if let Some(u) = update {
                    visit_assignments_expr(name, u, f);
                }
                visit_assignments(name, body, f);
            }
            StmtKind::ForIn { body, .. } => visit_assignments(name, body, f),
            StmtKind::Block(inner) => visit_assignments(name, inner, f),
            StmtKind::Return(Some(e)) | StmtKind::Throw(e) => visit_assignments_expr(name, e, f),
            StmtKind::Switch { subject, cases } => {
                visit_assignments_expr(name, subject, f);
                for c in cases {
                    visit_assignments(name, &c.body, f);
                }
            }
            StmtKind::Try {
                body,
                catch,
                finally,
            } => {
                visit_assignments(name, body, f);
                if let Some(c) = catch {
                    visit_assignments(name, &c.body, f);
                }
                if let Some(fin) = finally {
                    visit_assignments(name, fin, f);
                }
            }
            _ => {}
        }
    }
}

fn visit_assignments_expr(name: &str, expr: &Expr, f: &mut dyn FnMut(&Expr)) {
    if let ExprKind::Assign { name: target, value } = &expr.kind {
        if target == name {
            f(value);
        }
        visit_assignments_expr(name, value, f);
        return;
    }
    // Only assignment targets matter; a shallow walk over common carriers
    // of nested assignments is enough.
    match &expr.kind {
        ExprKind::Binary { left, right, .. } | ExprKind::NullCoalesce { left, right } => {
            visit_assignments_expr(name, left, f);
            visit_assignments_expr(name, right, f);
        }
        ExprKind::Unary { operand, .. } => visit_assignments_expr(name, operand, f),
        ExprKind::Ternary {
            cond,
            then_val,
            else_val,
        } => {
            visit_assignments_expr(name, cond, f);
            visit_assignments_expr(name, then_val, f);
            visit_assignments_expr(name, else_val, f);
        }
        ExprKind::Call { callee, args } => {
            visit_assignments_expr(name, callee, f);
            for a in args {
                visit_assignments_expr(name, a, f);
            }
        }
        _ => {}
    }
}

/// Recognize the for-loop counter pattern; `None` when the loop must stay
/// boxed.
pub fn for_counter_promotion(
    init: Option<&Stmt>,
    cond: Option<&Expr>,
    update: Option<&Expr>,
    body: &[Stmt],
) -> Option<(String, UnboxedVar)> {
    let StmtKind::Let { name, value, .. } = &init?.kind else {
        return None;
    };
    let ExprKind::Number(Number::Int(start)) = value.kind else {
        return None;
    };
    // Condition: `i <cmp> <literal | identifier | property>`.
    let ExprKind::Binary { op, left, right } = &cond?.kind else {
        return None;
    };
    if !op.is_comparison() || !is_ident(left, name) {
        return None;
    }
    match &right.kind {
        ExprKind::Number(Number::Int(_)) | ExprKind::Ident(_) | ExprKind::GetProperty { .. } => {}
        _ => return None,
    }
    if !update_is_counter_step(name, update?) {
        return None;
    }
    if escapes_in_stmts(name, body) {
        return None;
    }
    let native = if i32::try_from(start).is_ok() {
        NativeKind::I32
    } else {
        NativeKind::I64
    };
    Some((
        name.clone(),
        UnboxedVar {
            native,
            is_loop_counter: true,
            is_accumulator: false,
            is_typed_var: false,
        },
    ))
}

fn update_is_counter_step(name: &str, update: &Expr) -> bool {
    match &update.kind {
        ExprKind::PostfixInc(t)
        | ExprKind::PostfixDec(t)
        | ExprKind::PrefixInc(t)
        | ExprKind::PrefixDec(t) => is_ident(t, name),
        ExprKind::Assign { name: target, value } if target == name => {
            if let ExprKind::Binary { op, left, right } = &value.kind {
                matches!(op, BinaryOp::Add | BinaryOp::Sub)
                    && is_ident(left, name)
                    && matches!(right.kind, ExprKind::Number(Number::Int(_)))
            } else {
                false
            }
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::FunctionLit;

    fn e(kind: ExprKind) -> Expr {
        Expr::new(kind, 1)
    }

    fn int(v: i64) -> Expr {
        e(ExprKind::Number(Number::Int(v)))
    }

    fn s(kind: StmtKind) -> Stmt {
        Stmt::new(kind, 1)
    }

    fn ident(n: &str) -> Expr {
        e(ExprKind::Ident(n.into()))
    }

    fn bare() -> (TypeEnv, Registry) {
        (TypeEnv::new(), Registry::new())
    }

    #[test]
    fn direct_argument_escapes() {
        let call = s(StmtKind::Expr(e(ExprKind::Call {
            callee: Box::new(ident("f")),
            args: vec![ident("x")],
        })));
        assert!(escapes_in_stmts("x", &[call]));
    }

    #[test]
    fn computed_argument_does_not_escape() {
        let call = s(StmtKind::Expr(e(ExprKind::Call {
            callee: Box::new(ident("f")),
            args: vec![e(ExprKind::Binary {
                op: BinaryOp::Add,
                left: Box::new(ident("x")),
                right: Box::new(int(1)),
            })],
        })));
        assert!(!escapes_in_stmts("x", &[call]));
    }

    #[test]
    fn any_function_literal_escapes_everything() {
        let lit = s(StmtKind::Expr(e(ExprKind::Function(FunctionLit {
            params: vec![],
            return_type: None,
            body: vec![],
            is_async: false,
        }))));
        assert!(escapes_in_stmts("x", &[lit]));
    }

    #[test]
    fn container_uses_escape() {
        let store = s(StmtKind::Expr(e(ExprKind::ArrayLiteral(vec![ident("x")]))));
        assert!(escapes_in_stmts("x", &[store]));
        let index = s(StmtKind::Expr(e(ExprKind::Index {
            object: Box::new(ident("x")),
            index: Box::new(int(0)),
        })));
        assert!(escapes_in_stmts("x", &[index]));
        let ret = s(StmtKind::Return(Some(ident("x"))));
        assert!(escapes_in_stmts("x", &[ret]));
    }

    #[test]
    fn typed_let_promotes() {
        let (env, reg) = bare();
        let mut table = UnboxTable::new();
        let stmts = vec![
            s(StmtKind::Let {
                name: "x".into(),
                ty: Some(TypeExpr::I32),
                value: int(5),
            }),
            s(StmtKind::Expr(e(ExprKind::Assign {
                name: "x".into(),
                value: Box::new(e(ExprKind::Binary {
                    op: BinaryOp::Mul,
                    left: Box::new(ident("x")),
                    right: Box::new(int(2)),
                })),
            }))),
        ];
        analyze_body(&stmts, &env, &reg, &mut table);
        let var = table.get("x").expect("x should be unboxed");
        assert!(var.is_typed_var);
        assert_eq!(var.native, NativeKind::I32);
    }

    #[test]
    fn typed_let_blocked_by_escape() {
        let (env, reg) = bare();
        let mut table = UnboxTable::new();
        let stmts = vec![
            s(StmtKind::Let {
                name: "x".into(),
                ty: Some(TypeExpr::I32),
                value: int(5),
            }),
            s(StmtKind::Return(Some(ident("x")))),
        ];
        analyze_body(&stmts, &env, &reg, &mut table);
        assert!(!table.contains_key("x"));
    }

    #[test]
    fn typed_let_blocked_by_boxed_reassignment() {
        let (env, reg) = bare();
        let mut table = UnboxTable::new();
        let stmts = vec![
            s(StmtKind::Let {
                name: "x".into(),
                ty: Some(TypeExpr::I32),
                value: int(5),
            }),
            s(StmtKind::Expr(e(ExprKind::Assign {
                name: "x".into(),
                value: Box::new(e(ExprKind::Call {
                    callee: Box::new(ident("f")),
                    args: vec![],
                })),
            }))),
        ];
        analyze_body(&stmts, &env, &reg, &mut table);
        assert!(!table.contains_key("x"));
    }

    #[test]
    fn non_native_annotation_not_promoted() {
        let (env, reg) = bare();
        let mut table = UnboxTable::new();
        let stmts = vec![s(StmtKind::Let {
            name: "s".into(),
            ty: Some(TypeExpr::String),
            value: e(ExprKind::Str("hi".into())),
        })];
        analyze_body(&stmts, &env, &reg, &mut table);
        assert!(table.is_empty());
    }

    #[test]
    fn accumulator_promotes() {
        let (env, reg) = bare();
        let mut table = UnboxTable::new();
        let update = s(StmtKind::Expr(e(ExprKind::Assign {
            name: "sum".into(),
            value: Box::new(e(ExprKind::Binary {
                op: BinaryOp::Add,
                left: Box::new(ident("sum")),
                right: Box::new(int(1)),
            })),
        })));
        let stmts = vec![
            s(StmtKind::Let {
                name: "sum".into(),
                ty: None,
                value: int(0),
            }),
            s(StmtKind::While {
                cond: e(ExprKind::Bool(true)),
                body: vec![update],
            }),
        ];
        analyze_body(&stmts, &env, &reg, &mut table);
        let var = table.get("sum").expect("sum should be an accumulator");
        assert!(var.is_accumulator);
        assert_eq!(var.native, NativeKind::I32);
    }

    #[test]
    fn for_counter_pattern() {
        let init = s(StmtKind::Let {
            name: "i".into(),
            ty: None,
            value: int(0),
        });
        let cond = e(ExprKind::Binary {
            op: BinaryOp::Lt,
            left: Box::new(ident("i")),
            right: Box::new(int(10)),
        });
        let update = e(ExprKind::PostfixInc(Box::new(ident("i"))));
        let body = vec![s(StmtKind::Expr(e(ExprKind::Call {
            callee: Box::new(ident("print")),
            args: vec![e(ExprKind::Binary {
                op: BinaryOp::Add,
                left: Box::new(ident("i")),
                right: Box::new(int(0)),
            })],
        })))];
        let (name, var) =
            for_counter_promotion(Some(&init), Some(&cond), Some(&update), &body).unwrap();
        assert_eq!(name, "i");
        assert!(var.is_loop_counter);
        assert_eq!(var.native, NativeKind::I32);
    }

    #[test]
    fn for_counter_wide_start_is_i64() {
        let init = s(StmtKind::Let {
            name: "i".into(),
            ty: None,
            value: int(3_000_000_000),
        });
        let cond = e(ExprKind::Binary {
            op: BinaryOp::Lt,
            left: Box::new(ident("i")),
            right: Box::new(ident("n")),
        });
        let update = e(ExprKind::Assign {
            name: "i".into(),
            value: Box::new(e(ExprKind::Binary {
                op: BinaryOp::Add,
                left: Box::new(ident("i")),
                right: Box::new(int(2)),
            })),
        });
        let (_, var) = for_counter_promotion(Some(&init), Some(&cond), Some(&update), &[]).unwrap();
        assert_eq!(var.native, NativeKind::I64);
    }

    #[test]
    fn for_counter_rejected_when_body_escapes() {
        let init = s(StmtKind::Let {
            name: "i".into(),
            ty: None,
            value: int(0),
        });
        let cond = e(ExprKind::Binary {
            op: BinaryOp::Lt,
            left: Box::new(ident("i")),
            right: Box::new(int(10)),
        });
        let update = e(ExprKind::PostfixInc(Box::new(ident("i"))));
        let body = vec![s(StmtKind::Expr(e(ExprKind::Call {
            callee: Box::new(ident("f")),
            args: vec![ident("i")],
        })))];
        assert!(for_counter_promotion(Some(&init), Some(&cond), Some(&update), &body).is_none());
    }
}
