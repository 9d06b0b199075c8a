//! Name resolution: lexical scopes and global declaration registries
//!
//! A `TypeEnv` is a stack of scopes; lookup walks from innermost to
//! outermost. Pushes and pops must balance on every exit path of a block
//! or function body; an imbalance is a compiler bug, not a user error.
//!
//! The `Registry` holds the per-compilation-unit declaration tables filled
//! by the registration pass: function signatures, object shapes, and enum
//! variants. Registration is last-writer-wins; redeclaration is not an
//! error.

use crate::ast::{FunctionLit, TypeExpr};
use crate::types::{CheckedType, TypeKind};
use std::collections::HashMap;

/// One name bound in a scope.
#[derive(Debug, Clone)]
pub struct Binding {
    pub name: String,
    pub ty: CheckedType,
    pub is_const: bool,
    /// Line of the declaration, for const-reassignment diagnostics.
    pub line: u32,
}

/// Stack of lexical scopes.
#[derive(Debug, Default)]
pub struct TypeEnv {
    scopes: Vec<Vec<Binding>>,
}

impl TypeEnv {
    /// An environment with the outermost (global) scope already open.
    pub fn new() -> Self {
        TypeEnv {
            scopes: vec![Vec::new()],
        }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(Vec::new());
    }

    /// Pops the innermost scope, dropping every binding made since the
    /// matching push.
    pub fn pop_scope(&mut self) {
        debug_assert!(self.scopes.len() > 1, "pop_scope with no matching push");
        self.scopes.pop();
    }

    /// Current nesting depth; used by tests to assert push/pop balance.
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Bind a name in the current scope. Shadowing an outer binding (or an
    /// earlier one in the same scope) is permitted and not an error.
    pub fn bind(&mut self, name: impl Into<String>, ty: CheckedType, is_const: bool, line: u32) {
        let scope = self
            .scopes
            .last_mut()
            .expect("TypeEnv always has a global scope");
        scope.push(Binding {
            name: name.into(),
            ty,
            is_const,
            line,
        });
    }

    /// Innermost-outermost walk; newest binding of a name wins.
    pub fn lookup(&self, name: &str) -> Option<&Binding> {
        for scope in self.scopes.iter().rev() {
            if let Some(b) = scope.iter().rev().find(|b| b.name == name) {
                return Some(b);
            }
        }
        None
    }

    /// Lookup restricted to the innermost scope.
    pub fn lookup_innermost(&self, name: &str) -> Option<&Binding> {
        self.scopes
            .last()
            .and_then(|s| s.iter().rev().find(|b| b.name == name))
    }
}

/// A registered top-level function signature.
#[derive(Debug, Clone)]
pub struct FunctionSig {
    pub param_types: Vec<CheckedType>,
    pub param_names: Vec<String>,
    /// Per-parameter: may the caller omit it?
    pub optional: Vec<bool>,
    pub num_required: usize,
    pub return_type: CheckedType,
    pub has_rest: bool,
    pub is_async: bool,
}

impl FunctionSig {
    /// Number of declared parameters (the rest collector included).
    pub fn arity(&self) -> usize {
        self.param_types.len()
    }

    /// The checked type of a value holding this function.
    pub fn as_type(&self) -> CheckedType {
        CheckedType::function(
            self.param_types.clone(),
            self.return_type.clone(),
            self.has_rest,
        )
    }
}

/// One field of a registered object shape.
#[derive(Debug, Clone)]
pub struct ObjectField {
    pub name: String,
    pub ty: CheckedType,
    pub optional: bool,
}

/// A registered `type` declaration.
#[derive(Debug, Clone)]
pub struct ObjectDef {
    pub name: String,
    pub fields: Vec<ObjectField>,
}

impl ObjectDef {
    pub fn field(&self, name: &str) -> Option<&ObjectField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Global declaration tables for one compilation unit.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    functions: HashMap<String, FunctionSig>,
    objects: HashMap<String, ObjectDef>,
    enums: HashMap<String, Vec<String>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    pub fn register_function(&mut self, name: impl Into<String>, sig: FunctionSig) {
        self.functions.insert(name.into(), sig);
    }

    pub fn register_object(&mut self, def: ObjectDef) {
        self.objects.insert(def.name.clone(), def);
    }

    pub fn register_enum(&mut self, name: impl Into<String>, variants: Vec<String>) {
        self.enums.insert(name.into(), variants);
    }

    pub fn function(&self, name: &str) -> Option<&FunctionSig> {
        self.functions.get(name)
    }

    pub fn object(&self, name: &str) -> Option<&ObjectDef> {
        self.objects.get(name)
    }

    pub fn enum_variants(&self, name: &str) -> Option<&[String]> {
        self.enums.get(name).map(|v| v.as_slice())
    }

    pub fn is_enum(&self, name: &str) -> bool {
        self.enums.contains_key(name)
    }

    /// Resolve a source annotation to a checked type. Named annotations
    /// become enums when registered as such, otherwise custom object
    /// shapes (possibly forward-declared).
    pub fn resolve_annotation(&self, ann: &TypeExpr) -> CheckedType {
        match ann {
            TypeExpr::I8 => CheckedType::of(TypeKind::I8),
            TypeExpr::I16 => CheckedType::of(TypeKind::I16),
            TypeExpr::I32 => CheckedType::i32(),
            TypeExpr::I64 => CheckedType::i64(),
            TypeExpr::U8 => CheckedType::of(TypeKind::U8),
            TypeExpr::U16 => CheckedType::of(TypeKind::U16),
            TypeExpr::U32 => CheckedType::of(TypeKind::U32),
            TypeExpr::U64 => CheckedType::of(TypeKind::U64),
            TypeExpr::F32 => CheckedType::of(TypeKind::F32),
            TypeExpr::F64 => CheckedType::f64(),
            TypeExpr::Bool => CheckedType::bool(),
            TypeExpr::String => CheckedType::string(),
            TypeExpr::Rune => CheckedType::rune(),
            TypeExpr::Array(elem) => {
                CheckedType::array(elem.as_deref().map(|e| self.resolve_annotation(e)))
            }
            TypeExpr::Object => CheckedType::object(),
            TypeExpr::Named(name) => {
                if self.is_enum(name) {
                    CheckedType::enum_type(name.clone())
                } else {
                    CheckedType::custom(name.clone())
                }
            }
            TypeExpr::Ptr => CheckedType::of(TypeKind::Ptr),
            TypeExpr::Buffer => CheckedType::of(TypeKind::Buffer),
            TypeExpr::Void => CheckedType::void(),
            TypeExpr::Inferred => CheckedType::unknown(),
            TypeExpr::Nullable(inner) => self.resolve_annotation(inner).nullable(),
        }
    }

    /// Build the registrable signature of a function literal: annotated
    /// parameter and return types, `Any` where annotations are missing.
    pub fn signature_of(&self, lit: &FunctionLit) -> FunctionSig {
        let param_types = lit
            .params
            .iter()
            .map(|p| {
                p.ty.as_ref()
                    .map(|t| self.resolve_annotation(t))
                    .unwrap_or_else(CheckedType::any)
            })
            .collect();
        let param_names = lit.params.iter().map(|p| p.name.clone()).collect();
        let optional = lit
            .params
            .iter()
            .map(|p| p.optional || p.default.is_some() || p.rest)
            .collect();
        FunctionSig {
            param_types,
            param_names,
            optional,
            num_required: lit.num_required(),
            return_type: lit
                .return_type
                .as_ref()
                .map(|t| self.resolve_annotation(t))
                .unwrap_or_else(CheckedType::any),
            has_rest: lit.has_rest(),
            is_async: lit.is_async,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_walks_scopes_and_shadows() {
        let mut env = TypeEnv::new();
        env.bind("x", CheckedType::i32(), false, 1);
        env.push_scope();
        env.bind("x", CheckedType::string(), false, 2);
        assert_eq!(env.lookup("x").unwrap().ty.kind, TypeKind::String);
        env.pop_scope();
        assert_eq!(env.lookup("x").unwrap().ty.kind, TypeKind::I32);
    }

    #[test]
    fn shadowing_within_one_scope_prefers_newest() {
        let mut env = TypeEnv::new();
        env.bind("x", CheckedType::i32(), false, 1);
        env.bind("x", CheckedType::bool(), true, 2);
        let b = env.lookup("x").unwrap();
        assert_eq!(b.ty.kind, TypeKind::Bool);
        assert!(b.is_const);
    }

    #[test]
    fn pop_drops_bindings() {
        let mut env = TypeEnv::new();
        env.push_scope();
        env.bind("y", CheckedType::i32(), false, 1);
        env.pop_scope();
        assert!(env.lookup("y").is_none());
        assert_eq!(env.depth(), 1);
    }

    #[test]
    fn registration_is_last_writer_wins() {
        let mut reg = Registry::new();
        reg.register_enum("E", vec!["A".into()]);
        reg.register_enum("E", vec!["A".into(), "B".into()]);
        assert_eq!(reg.enum_variants("E").unwrap().len(), 2);
    }

    #[test]
    fn annotation_resolution() {
        let mut reg = Registry::new();
        reg.register_enum("Color", vec!["Red".into()]);
        assert_eq!(
            reg.resolve_annotation(&TypeExpr::Named("Color".into())).kind,
            TypeKind::Enum
        );
        assert_eq!(
            reg.resolve_annotation(&TypeExpr::Named("Point".into())).kind,
            TypeKind::Custom
        );
        let arr = reg.resolve_annotation(&TypeExpr::Array(Some(Box::new(TypeExpr::I32))));
        assert_eq!(arr.element.unwrap().kind, TypeKind::I32);
        let opt = reg.resolve_annotation(&TypeExpr::Nullable(Box::new(TypeExpr::String)));
        assert!(opt.nullable);
    }
}
