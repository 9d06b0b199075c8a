//! Tail-recursion analysis
//!
//! A function bound to `name` converts to a loop when every syntactic
//! path through its body either falls through, returns a value that never
//! mentions `name`, or returns a direct self-call whose arguments never
//! mention `name`. Bodies containing `while`, `for`, `try`, or `defer`
//! are disqualified outright; their interaction with the entry-label
//! rewrite is not worth modeling.
//!
//! When eligible, the generator plants a label at function entry and each
//! tail self-call becomes argument reassignment plus `goto`.

use crate::ast::{Expr, ExprKind, InterpolationPart, OptionalAccess, Stmt, StmtKind};

/// Is the body of `name` eligible for tail-call-to-loop conversion?
///
/// Requires at least one recursive tail call; a body that never recurses
/// has nothing to convert.
pub fn is_tail_recursive(name: &str, body: &[Stmt]) -> bool {
    stmts_eligible(name, body) && has_tail_self_call(name, body)
}

/// Is `return expr` a direct self-call usable as a tail site?
pub fn is_self_tail_call<'e>(name: &str, expr: &'e Expr) -> Option<&'e [Expr]> {
    if let ExprKind::Call { callee, args } = &expr.kind
        && matches!(&callee.kind, ExprKind::Ident(n) if n == name)
        && !args.iter().any(|a| references(name, a))
    {
        return Some(args);
    }
    None
}

fn stmts_eligible(name: &str, stmts: &[Stmt]) -> bool {
    stmts.iter().all(|s| stmt_eligible(name, s))
}

fn stmt_eligible(name: &str, stmt: &Stmt) -> bool {
    match &stmt.kind {
        // Loops, exception scopes, and defers disqualify the body.
        StmtKind::While { .. }
        | StmtKind::For { .. }
        | StmtKind::ForIn { .. }
        | StmtKind::Try { .. }
        | StmtKind::Defer { .. } => false,
        StmtKind::Return(None) | StmtKind::Break | StmtKind::Continue => true,
        StmtKind::Return(Some(e)) => is_self_tail_call(name, e).is_some() || !references(name, e),
        StmtKind::If {
            cond,
            then_body,
            else_body,
        } => {
            !references(name, cond)
                && stmts_eligible(name, then_body)
                && else_body.as_ref().is_none_or(|eb| stmts_eligible(name, eb))
        }
        StmtKind::Block(inner) => stmts_eligible(name, inner),
        StmtKind::Switch { subject, cases } => {
            !references(name, subject)
                && cases.iter().all(|c| {
                    c.value.as_ref().is_none_or(|v| !references(name, v))
                        && stmts_eligible(name, &c.body)
                })
        }
        // Any other statement may not mention the function at all; a
        // non-tail reference would need the binding captured.
        StmtKind::Let { value, .. } | StmtKind::Const { value, .. } => !references(name, value),
        StmtKind::Expr(e) | StmtKind::Throw(e) => !references(name, e),
        StmtKind::Export(inner) => stmt_eligible(name, inner),
        StmtKind::DefineObject { .. }
        | StmtKind::Enum { .. }
        | StmtKind::Import { .. }
        | StmtKind::ImportFfi { .. }
        | StmtKind::ExternFn { .. } => true,
    }
}

fn has_tail_self_call(name: &str, stmts: &[Stmt]) -> bool {
    stmts.iter().any(|s| match &s.kind {
        StmtKind::Return(Some(e)) => is_self_tail_call(name, e).is_some(),
        StmtKind::If {
            then_body,
            else_body,
            ..
        } => {
            has_tail_self_call(name, then_body)
                || else_body.as_ref().is_some_and(|eb| has_tail_self_call(name, eb))
        }
        StmtKind::Block(inner) => has_tail_self_call(name, inner),
        StmtKind::Switch { cases, .. } => {
            cases.iter().any(|c| has_tail_self_call(name, &c.body))
        }
        _ => false,
    })
}

/// Does the expression mention `name` anywhere (call or value use)?
pub fn references(name: &str, expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Ident(n) => n == name,
        ExprKind::Number(_)
        | ExprKind::Bool(_)
        | ExprKind::Str(_)
        | ExprKind::Rune(_)
        | ExprKind::Null => false,
        ExprKind::Binary { left, right, .. } | ExprKind::NullCoalesce { left, right } => {
            references(name, left) || references(name, right)
        }
        ExprKind::Unary { operand, .. } => references(name, operand),
        ExprKind::Ternary {
            cond,
            then_val,
            else_val,
        } => references(name, cond) || references(name, then_val) || references(name, else_val),
        ExprKind::Call { callee, args } => {
            references(name, callee) || args.iter().any(|a| references(name, a))
        }
        ExprKind::Assign { name: target, value } => target == name || references(name, value),
        ExprKind::Index { object, index } => references(name, object) || references(name, index),
        ExprKind::IndexAssign {
            object,
            index,
            value,
        } => references(name, object) || references(name, index) || references(name, value),
        ExprKind::GetProperty { object, .. } => references(name, object),
        ExprKind::SetProperty { object, value, .. } => {
            references(name, object) || references(name, value)
        }
        ExprKind::ArrayLiteral(elems) => elems.iter().any(|e| references(name, e)),
        ExprKind::ObjectLiteral(fields) => fields.iter().any(|(_, e)| references(name, e)),
        // A nested function literal could close over the name; count it.
        ExprKind::Function(lit) => lit.body.iter().any(|s| stmt_references(name, s)),
        ExprKind::Await(inner) => references(name, inner),
        ExprKind::StringInterpolation(parts) => parts.iter().any(|p| match p {
            InterpolationPart::Expr(e) => references(name, e),
            InterpolationPart::Literal(_) => false,
        }),
        ExprKind::OptionalChain { object, access } => {
            references(name, object)
                || match access {
                    OptionalAccess::Property(_) => false,
                    OptionalAccess::Index(i) => references(name, i),
                    OptionalAccess::Call(args) => args.iter().any(|a| references(name, a)),
                }
        }
        ExprKind::PrefixInc(t)
        | ExprKind::PrefixDec(t)
        | ExprKind::PostfixInc(t)
        | ExprKind::PostfixDec(t) => references(name, t),
    }
}

fn stmt_references(name: &str, stmt: &Stmt) -> bool {
    match &stmt.kind {
        StmtKind::Let { value, .. } | StmtKind::Const { value, .. } => references(name, value),
        StmtKind::Expr(e) | StmtKind::Throw(e) => references(name, e),
        StmtKind::Return(Some(e)) => references(name, e),
        StmtKind::Return(None) | StmtKind::Break | StmtKind::Continue => false,
        StmtKind::If {
            cond,
            then_body,
            else_body,
        } => {
            references(name, cond)
                || then_body.iter().any(|s| stmt_references(name, s))
                || else_body
                    .as_ref()
                    .is_some_and(|eb| eb.iter().any(|s| stmt_references(name, s)))
        }
        StmtKind::While { cond, body } => {
            references(name, cond) || body.iter().any(|s| stmt_references(name, s))
        }
        StmtKind::For {
            init,
            cond,
            update,
            body,
        } => {
            init.as_ref().is_some_and(|s| stmt_references(name, s))
                || cond.as_ref().is_some_and(|c| references(name, c))
                || update.as_ref().is_some_and(|u| references(name, u))
                || body.iter().any(|s| stmt_references(name, s))
        }
        StmtKind::ForIn { iterable, body, .. } => {
            references(name, iterable) || body.iter().any(|s| stmt_references(name, s))
        }
        StmtKind::Block(inner) => inner.iter().any(|s| stmt_references(name, s)),
        StmtKind::Try {
            body,
            catch,
            finally,
        } => {
            body.iter().any(|s| stmt_references(name, s))
                || catch
                    .as_ref()
                    .is_some_and(|c| c.body.iter().any(|s| stmt_references(name, s)))
                || finally
                    .as_ref()
                    .is_some_and(|f| f.iter().any(|s| stmt_references(name, s)))
        }
        StmtKind::Switch { subject, cases } => {
            references(name, subject)
                || cases.iter().any(|c| {
                    c.value.as_ref().is_some_and(|v| references(name, v))
                        || c.body.iter().any(|s| stmt_references(name, s))
                })
        }
        StmtKind::Defer { call } => references(name, call),
        StmtKind::Export(inner) => stmt_references(name, inner),
        StmtKind::DefineObject { fields, .. } => fields
            .iter()
            .any(|f| f.default.as_ref().is_some_and(|d| references(name, d))),
        StmtKind::Enum { .. } | StmtKind::Import { .. } | StmtKind::ImportFfi { .. }
        | StmtKind::ExternFn { .. } => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOp, Number};

    fn e(kind: ExprKind) -> Expr {
        Expr::new(kind, 1)
    }

    fn s(kind: StmtKind) -> Stmt {
        Stmt::new(kind, 1)
    }

    fn int(v: i64) -> Expr {
        e(ExprKind::Number(Number::Int(v)))
    }

    fn ident(n: &str) -> Expr {
        e(ExprKind::Ident(n.into()))
    }

    fn self_call(args: Vec<Expr>) -> Expr {
        e(ExprKind::Call {
            callee: Box::new(ident("fact")),
            args,
        })
    }

    /// `if (n <= 1) return acc; return fact(n - 1, n * acc);`
    fn fact_body() -> Vec<Stmt> {
        vec![
            s(StmtKind::If {
                cond: e(ExprKind::Binary {
                    op: BinaryOp::Le,
                    left: Box::new(ident("n")),
                    right: Box::new(int(1)),
                }),
                then_body: vec![s(StmtKind::Return(Some(ident("acc"))))],
                else_body: None,
            }),
            s(StmtKind::Return(Some(self_call(vec![
                e(ExprKind::Binary {
                    op: BinaryOp::Sub,
                    left: Box::new(ident("n")),
                    right: Box::new(int(1)),
                }),
                e(ExprKind::Binary {
                    op: BinaryOp::Mul,
                    left: Box::new(ident("n")),
                    right: Box::new(ident("acc")),
                }),
            ])))),
        ]
    }

    #[test]
    fn factorial_accumulator_is_eligible() {
        assert!(is_tail_recursive("fact", &fact_body()));
    }

    #[test]
    fn non_tail_recursion_is_not() {
        // `return n + fact(n - 1);`: the call is an operand, not a tail.
        let body = vec![s(StmtKind::Return(Some(e(ExprKind::Binary {
            op: BinaryOp::Add,
            left: Box::new(ident("n")),
            right: Box::new(self_call(vec![int(1)])),
        }))))];
        assert!(!is_tail_recursive("fact", &body));
    }

    #[test]
    fn recursive_argument_disqualifies() {
        // `return fact(fact(n));`
        let body = vec![s(StmtKind::Return(Some(self_call(vec![self_call(vec![
            ident("n"),
        ])]))))];
        assert!(!is_tail_recursive("fact", &body));
    }

    #[test]
    fn loops_and_defers_disqualify() {
        let mut body = fact_body();
        body.insert(
            0,
            s(StmtKind::While {
                cond: e(ExprKind::Bool(false)),
                body: vec![],
            }),
        );
        assert!(!is_tail_recursive("fact", &body));

        let mut body = fact_body();
        body.insert(
            0,
            s(StmtKind::Defer {
                call: e(ExprKind::Call {
                    callee: Box::new(ident("cleanup")),
                    args: vec![],
                }),
            }),
        );
        assert!(!is_tail_recursive("fact", &body));
    }

    #[test]
    fn no_recursion_means_nothing_to_convert() {
        let body = vec![s(StmtKind::Return(Some(int(1))))];
        assert!(!is_tail_recursive("fact", &body));
    }

    #[test]
    fn value_use_of_own_name_disqualifies() {
        // `let g = fact;` would need the binding captured.
        let body = vec![
            s(StmtKind::Let {
                name: "g".into(),
                ty: None,
                value: ident("fact"),
            }),
            s(StmtKind::Return(Some(self_call(vec![int(1)])))),
        ];
        assert!(!is_tail_recursive("fact", &body));
    }
}
