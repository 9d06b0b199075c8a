//! Expression type inference
//!
//! `infer_expr` is a pure function of the environment and the registries:
//! it never reports diagnostics and never fails. Anything it cannot pin
//! down is `Any`, keeping later passes permissive rather than wrong.
//! Both the validator and the code generator call it; the generator uses
//! the result to pick type-specialized fast paths.

use crate::ast::{BinaryOp, Expr, ExprKind, Number, OptionalAccess, UnaryOp};
use crate::builtins;
use crate::env::{Registry, TypeEnv};
use crate::types::{CheckedType, TypeKind, common};

/// The inferred type of an integer literal: I32 when it fits, I64 beyond.
pub fn integer_literal_type(value: i64) -> CheckedType {
    if i32::try_from(value).is_ok() {
        CheckedType::i32()
    } else {
        CheckedType::i64()
    }
}

pub fn infer_expr(env: &TypeEnv, registry: &Registry, expr: &Expr) -> CheckedType {
    match &expr.kind {
        ExprKind::Number(Number::Int(v)) => integer_literal_type(*v),
        ExprKind::Number(Number::Float(_)) => CheckedType::f64(),
        ExprKind::Bool(_) => CheckedType::bool(),
        ExprKind::Str(_) => CheckedType::string(),
        ExprKind::Rune(_) => CheckedType::rune(),
        ExprKind::Null => CheckedType::null(),
        ExprKind::Ident(name) => infer_ident(env, registry, name),
        ExprKind::Binary { op, left, right } => infer_binary(env, registry, *op, left, right),
        ExprKind::Unary { op, operand } => match op {
            UnaryOp::Not => CheckedType::bool(),
            UnaryOp::Neg | UnaryOp::BitNot => infer_expr(env, registry, operand),
        },
        ExprKind::Ternary {
            then_val, else_val, ..
        } => common(
            &infer_expr(env, registry, then_val),
            &infer_expr(env, registry, else_val),
        ),
        ExprKind::Call { callee, args } => infer_call(env, registry, callee, args),
        ExprKind::Assign { value, .. } => infer_expr(env, registry, value),
        ExprKind::Index { object, .. } => {
            let obj = infer_expr(env, registry, object);
            match obj.kind {
                TypeKind::Array => obj
                    .element
                    .map(|e| *e)
                    .unwrap_or_else(CheckedType::any),
                TypeKind::String => CheckedType::rune(),
                _ => CheckedType::any(),
            }
        }
        ExprKind::IndexAssign { value, .. } => infer_expr(env, registry, value),
        ExprKind::GetProperty { object, property } => {
            infer_property(env, registry, object, property)
        }
        ExprKind::SetProperty { value, .. } => infer_expr(env, registry, value),
        ExprKind::ArrayLiteral(elems) => CheckedType::array(
            elems
                .first()
                .map(|e| infer_expr(env, registry, e)),
        ),
        ExprKind::ObjectLiteral(_) => CheckedType::object(),
        ExprKind::Function(lit) => registry.signature_of(lit).as_type(),
        ExprKind::Await(_) => CheckedType::any(),
        ExprKind::StringInterpolation(_) => CheckedType::string(),
        ExprKind::OptionalChain { object, access } => {
            infer_optional_chain(env, registry, object, access)
        }
        ExprKind::NullCoalesce { left, right } => {
            let mut merged = common(
                &infer_expr(env, registry, left),
                &infer_expr(env, registry, right),
            );
            // `a ?? b` never produces null unless both sides can.
            merged.nullable = false;
            merged
        }
        ExprKind::PrefixInc(t)
        | ExprKind::PrefixDec(t)
        | ExprKind::PostfixInc(t)
        | ExprKind::PostfixDec(t) => infer_expr(env, registry, t),
    }
}

fn infer_ident(env: &TypeEnv, registry: &Registry, name: &str) -> CheckedType {
    if let Some(binding) = env.lookup(name) {
        return binding.ty.clone();
    }
    if let Some(sig) = registry.function(name) {
        return sig.as_type();
    }
    if registry.is_enum(name) {
        // The enum container itself is an object of variant fields.
        return CheckedType::object();
    }
    CheckedType::any()
}

fn infer_binary(
    env: &TypeEnv,
    registry: &Registry,
    op: BinaryOp,
    left: &Expr,
    right: &Expr,
) -> CheckedType {
    if op.is_comparison() || op.is_logical() {
        return CheckedType::bool();
    }
    let lt = infer_expr(env, registry, left);
    let rt = infer_expr(env, registry, right);
    match op {
        BinaryOp::Add => {
            if lt.kind == TypeKind::String || rt.kind == TypeKind::String {
                CheckedType::string()
            } else if lt.kind == TypeKind::Ptr || rt.kind == TypeKind::Ptr {
                // Pointer arithmetic keeps the pointer type.
                CheckedType::of(TypeKind::Ptr)
            } else {
                common(&lt, &rt)
            }
        }
        // Division always produces a float.
        BinaryOp::Div => CheckedType::f64(),
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Mod => {
            if lt.kind == TypeKind::Ptr {
                CheckedType::of(TypeKind::Ptr)
            } else {
                common(&lt, &rt)
            }
        }
        BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor | BinaryOp::Shl | BinaryOp::Shr => {
            if lt.is_integer() {
                lt
            } else if rt.is_integer() {
                rt
            } else {
                CheckedType::i32()
            }
        }
        _ => CheckedType::any(),
    }
}

fn infer_call(env: &TypeEnv, registry: &Registry, callee: &Expr, _args: &[Expr]) -> CheckedType {
    match &callee.kind {
        ExprKind::Ident(name) => {
            // A local binding shadows a global signature or builtin.
            if let Some(binding) = env.lookup(name) {
                if let Some(f) = &binding.ty.function {
                    return f.return_type.clone();
                }
                if binding.ty.is_permissive() {
                    return CheckedType::any();
                }
            }
            if let Some(sig) = registry.function(name) {
                return sig.return_type.clone();
            }
            if let Some(b) = builtins::builtin_fn(name) {
                return b.return_type();
            }
            CheckedType::any()
        }
        ExprKind::GetProperty { object, property } => {
            let recv = infer_expr(env, registry, object);
            match recv.kind {
                TypeKind::Array => builtins::array_method(property)
                    .map(|m| m.return_type(&recv))
                    .unwrap_or_else(CheckedType::any),
                TypeKind::String => builtins::string_method(property)
                    .map(|m| m.return_type(&recv))
                    .unwrap_or_else(CheckedType::any),
                _ => CheckedType::any(),
            }
        }
        _ => {
            let callee_ty = infer_expr(env, registry, callee);
            callee_ty
                .function
                .map(|f| f.return_type.clone())
                .unwrap_or_else(CheckedType::any)
        }
    }
}

fn infer_property(
    env: &TypeEnv,
    registry: &Registry,
    object: &Expr,
    property: &str,
) -> CheckedType {
    // Enum variant access: `Color.Red` is an integer of that enum type.
    if let ExprKind::Ident(name) = &object.kind
        && env.lookup(name).is_none()
        && registry.is_enum(name)
    {
        return CheckedType::enum_type(name.clone());
    }
    let obj = infer_expr(env, registry, object);
    if let Some(ty) = builtin_property_type(&obj, property) {
        return ty;
    }
    if obj.kind == TypeKind::Custom
        && let Some(name) = &obj.type_name
        && let Some(def) = registry.object(name)
        && let Some(field) = def.field(property)
    {
        return field.ty.clone();
    }
    CheckedType::any()
}

/// Built-in properties dispatched on the runtime tag.
pub fn builtin_property_type(receiver: &CheckedType, property: &str) -> Option<CheckedType> {
    match property {
        "length" => match receiver.kind {
            TypeKind::String | TypeKind::Array | TypeKind::Buffer => Some(CheckedType::i32()),
            _ => None,
        },
        "byte_length" if receiver.kind == TypeKind::String => Some(CheckedType::i32()),
        "capacity" if receiver.kind == TypeKind::Buffer => Some(CheckedType::i32()),
        "fd" | "port" => Some(CheckedType::i32()).filter(|_| receiver.is_permissive()),
        "address" => Some(CheckedType::string()).filter(|_| receiver.is_permissive()),
        "closed" => Some(CheckedType::bool()).filter(|_| receiver.is_permissive()),
        _ => None,
    }
}

fn infer_optional_chain(
    env: &TypeEnv,
    registry: &Registry,
    object: &Expr,
    access: &OptionalAccess,
) -> CheckedType {
    let inner = match access {
        OptionalAccess::Property(p) => infer_property(env, registry, object, p),
        OptionalAccess::Index(_) => {
            let obj = infer_expr(env, registry, object);
            match obj.kind {
                TypeKind::Array => obj.element.map(|e| *e).unwrap_or_else(CheckedType::any),
                TypeKind::String => CheckedType::rune(),
                _ => CheckedType::any(),
            }
        }
        OptionalAccess::Call(_) => {
            let obj = infer_expr(env, registry, object);
            obj.function
                .map(|f| f.return_type.clone())
                .unwrap_or_else(CheckedType::any)
        }
    };
    if inner.is_permissive() {
        inner
    } else {
        inner.nullable()
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

    fn bare() -> (TypeEnv, Registry) {
        (TypeEnv::new(), Registry::new())
    }

    #[test]
    fn int_literal_width_boundary() {
        let (env, reg) = bare();
        assert_eq!(infer_expr(&env, &reg, &int(2_147_483_647)).kind, TypeKind::I32);
        assert_eq!(infer_expr(&env, &reg, &int(2_147_483_648)).kind, TypeKind::I64);
    }

    #[test]
    fn division_is_always_float() {
        let (env, reg) = bare();
        let div = e(ExprKind::Binary {
            op: BinaryOp::Div,
            left: Box::new(int(4)),
            right: Box::new(int(2)),
        });
        assert_eq!(infer_expr(&env, &reg, &div).kind, TypeKind::F64);
    }

    #[test]
    fn string_plus_dominates() {
        let (env, reg) = bare();
        let cat = e(ExprKind::Binary {
            op: BinaryOp::Add,
            left: Box::new(e(ExprKind::Str("a".into()))),
            right: Box::new(int(3)),
        });
        assert_eq!(infer_expr(&env, &reg, &cat).kind, TypeKind::String);
    }

    #[test]
    fn unknown_ident_is_any() {
        let (env, reg) = bare();
        let id = e(ExprKind::Ident("nope".into()));
        assert_eq!(infer_expr(&env, &reg, &id).kind, TypeKind::Any);
    }

    #[test]
    fn bound_ident_uses_environment() {
        let (mut env, reg) = bare();
        env.bind("s", CheckedType::string(), false, 1);
        let id = e(ExprKind::Ident("s".into()));
        assert_eq!(infer_expr(&env, &reg, &id).kind, TypeKind::String);
    }

    #[test]
    fn call_uses_registered_signature() {
        let (env, mut reg) = bare();
        let lit = FunctionLit {
            params: vec![],
            return_type: Some(crate::ast::TypeExpr::I64),
            body: vec![],
            is_async: false,
        };
        let sig = reg.signature_of(&lit);
        reg.register_function("f", sig);
        let call = e(ExprKind::Call {
            callee: Box::new(e(ExprKind::Ident("f".into()))),
            args: vec![],
        });
        assert_eq!(infer_expr(&env, &reg, &call).kind, TypeKind::I64);
    }

    #[test]
    fn builtin_calls() {
        let (env, reg) = bare();
        let call = e(ExprKind::Call {
            callee: Box::new(e(ExprKind::Ident("typeof".into()))),
            args: vec![int(1)],
        });
        assert_eq!(infer_expr(&env, &reg, &call).kind, TypeKind::String);
    }

    #[test]
    fn index_into_string_is_rune() {
        let (env, reg) = bare();
        let idx = e(ExprKind::Index {
            object: Box::new(e(ExprKind::Str("abc".into()))),
            index: Box::new(int(0)),
        });
        assert_eq!(infer_expr(&env, &reg, &idx).kind, TypeKind::Rune);
    }

    #[test]
    fn array_literal_takes_first_element_type() {
        let (env, reg) = bare();
        let arr = e(ExprKind::ArrayLiteral(vec![int(1), int(2)]));
        let ty = infer_expr(&env, &reg, &arr);
        assert_eq!(ty.kind, TypeKind::Array);
        assert_eq!(ty.element.unwrap().kind, TypeKind::I32);
        let empty = e(ExprKind::ArrayLiteral(vec![]));
        assert!(infer_expr(&env, &reg, &empty).element.is_none());
    }

    #[test]
    fn enum_variant_access() {
        let (env, mut reg) = bare();
        reg.register_enum("Color", vec!["Red".into(), "Green".into()]);
        let access = e(ExprKind::GetProperty {
            object: Box::new(e(ExprKind::Ident("Color".into()))),
            property: "Red".into(),
        });
        let ty = infer_expr(&env, &reg, &access);
        assert_eq!(ty.kind, TypeKind::Enum);
        assert!(ty.is_integer());
    }

    #[test]
    fn null_coalesce_strips_nullable() {
        let (mut env, reg) = bare();
        env.bind("s", CheckedType::string().nullable(), false, 1);
        let nc = e(ExprKind::NullCoalesce {
            left: Box::new(e(ExprKind::Ident("s".into()))),
            right: Box::new(e(ExprKind::Str("d".into()))),
        });
        let ty = infer_expr(&env, &reg, &nc);
        assert_eq!(ty.kind, TypeKind::String);
        assert!(!ty.nullable);
    }

    #[test]
    fn method_call_types() {
        let (mut env, reg) = bare();
        env.bind("xs", CheckedType::array(Some(CheckedType::i32())), false, 1);
        let call = e(ExprKind::Call {
            callee: Box::new(e(ExprKind::GetProperty {
                object: Box::new(e(ExprKind::Ident("xs".into()))),
                property: "pop".into(),
            })),
            args: vec![],
        });
        assert_eq!(infer_expr(&env, &reg, &call).kind, TypeKind::I32);
    }
}
