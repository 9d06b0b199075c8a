//! Built-in function and method catalogues
//!
//! Two tables drive checking of calls that have no user declaration:
//! free built-ins (`print`, `len`, `typeof`, the numeric conversion
//! family, task primitives) and the method catalogues of `array` and
//! `string` receivers. The catalogues give each method an argument shape
//! the validator enforces and a return type the inferrer reports.

use crate::types::{CheckedType, TypeKind};

/// A free built-in function.
#[derive(Debug, Clone, Copy)]
pub struct BuiltinFn {
    pub name: &'static str,
    pub min_args: usize,
    /// `None` means variadic.
    pub max_args: Option<usize>,
    ret: fn() -> CheckedType,
}

impl BuiltinFn {
    pub fn return_type(&self) -> CheckedType {
        (self.ret)()
    }
}

static BUILTIN_FNS: &[BuiltinFn] = &[
    BuiltinFn { name: "print", min_args: 1, max_args: None, ret: CheckedType::void },
    BuiltinFn { name: "typeof", min_args: 1, max_args: Some(1), ret: CheckedType::string },
    BuiltinFn { name: "len", min_args: 1, max_args: Some(1), ret: CheckedType::i32 },
    BuiltinFn { name: "i8", min_args: 1, max_args: Some(1), ret: || CheckedType::of(TypeKind::I8) },
    BuiltinFn { name: "i16", min_args: 1, max_args: Some(1), ret: || CheckedType::of(TypeKind::I16) },
    BuiltinFn { name: "i32", min_args: 1, max_args: Some(1), ret: CheckedType::i32 },
    BuiltinFn { name: "i64", min_args: 1, max_args: Some(1), ret: CheckedType::i64 },
    BuiltinFn { name: "u8", min_args: 1, max_args: Some(1), ret: || CheckedType::of(TypeKind::U8) },
    BuiltinFn { name: "u16", min_args: 1, max_args: Some(1), ret: || CheckedType::of(TypeKind::U16) },
    BuiltinFn { name: "u32", min_args: 1, max_args: Some(1), ret: || CheckedType::of(TypeKind::U32) },
    BuiltinFn { name: "u64", min_args: 1, max_args: Some(1), ret: || CheckedType::of(TypeKind::U64) },
    BuiltinFn { name: "f32", min_args: 1, max_args: Some(1), ret: || CheckedType::of(TypeKind::F32) },
    BuiltinFn { name: "f64", min_args: 1, max_args: Some(1), ret: CheckedType::f64 },
    BuiltinFn { name: "str", min_args: 1, max_args: Some(1), ret: CheckedType::string },
    BuiltinFn { name: "bool", min_args: 1, max_args: Some(1), ret: CheckedType::bool },
    BuiltinFn { name: "rune", min_args: 1, max_args: Some(1), ret: CheckedType::rune },
    BuiltinFn { name: "spawn", min_args: 1, max_args: None, ret: || CheckedType::of(TypeKind::Task) },
    BuiltinFn { name: "join", min_args: 1, max_args: Some(1), ret: CheckedType::any },
    BuiltinFn { name: "channel", min_args: 0, max_args: Some(1), ret: || CheckedType::of(TypeKind::Channel) },
    BuiltinFn { name: "open", min_args: 1, max_args: Some(2), ret: || CheckedType::of(TypeKind::File) },
];

/// Look up a free built-in by call name.
pub fn builtin_fn(name: &str) -> Option<&'static BuiltinFn> {
    BUILTIN_FNS.iter().find(|b| b.name == name)
}

/// Shape of one method argument position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgShape {
    /// Assignable to the receiver's element type (arrays).
    Elem,
    /// Any integer width.
    Int,
    Str,
    /// A function value (callbacks).
    Func,
    /// An array value.
    ArrayArg,
    Any,
}

impl ArgShape {
    /// Does `ty` satisfy this position, given the receiver's element type?
    pub fn admits(self, ty: &CheckedType, element: Option<&CheckedType>) -> bool {
        if ty.is_permissive() {
            return true;
        }
        match self {
            ArgShape::Elem => element.map(|e| e.accepts(ty)).unwrap_or(true),
            ArgShape::Int => ty.is_integer() || ty.kind == TypeKind::Rune,
            ArgShape::Str => ty.kind == TypeKind::String,
            ArgShape::Func => ty.kind == TypeKind::Function,
            ArgShape::ArrayArg => ty.kind == TypeKind::Array,
            ArgShape::Any => true,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            ArgShape::Elem => "element",
            ArgShape::Int => "integer",
            ArgShape::Str => "string",
            ArgShape::Func => "function",
            ArgShape::ArrayArg => "array",
            ArgShape::Any => "any",
        }
    }
}

/// What a method returns, relative to its receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MethodRet {
    Void,
    /// The receiver's element type (or `any` when untyped).
    Element,
    /// An array with the receiver's element type.
    SameArray,
    /// An array whose element type is unknown (callback-determined).
    UntypedArray,
    ArrayOfString,
    ArrayOfRune,
    ArrayOfInt,
    Str,
    Int,
    Bool,
    Any,
}

/// A built-in method of `array` or `string`.
#[derive(Debug, Clone, Copy)]
pub struct MethodSig {
    pub name: &'static str,
    pub min_args: usize,
    /// `None` means variadic; extra arguments reuse the last shape.
    pub max_args: Option<usize>,
    pub args: &'static [ArgShape],
    ret: MethodRet,
}

impl MethodSig {
    /// Shape expected at argument position `i`.
    pub fn shape_at(&self, i: usize) -> ArgShape {
        self.args
            .get(i)
            .or_else(|| self.args.last())
            .copied()
            .unwrap_or(ArgShape::Any)
    }

    /// Return type given the receiver's type.
    pub fn return_type(&self, receiver: &CheckedType) -> CheckedType {
        let element = receiver.element.as_deref().cloned();
        match self.ret {
            MethodRet::Void => CheckedType::void(),
            MethodRet::Element => element.unwrap_or_else(CheckedType::any),
            MethodRet::SameArray => CheckedType::array(element),
            MethodRet::UntypedArray => CheckedType::array(None),
            MethodRet::ArrayOfString => CheckedType::array(Some(CheckedType::string())),
            MethodRet::ArrayOfRune => CheckedType::array(Some(CheckedType::rune())),
            MethodRet::ArrayOfInt => CheckedType::array(Some(CheckedType::i32())),
            MethodRet::Str => CheckedType::string(),
            MethodRet::Int => CheckedType::i32(),
            MethodRet::Bool => CheckedType::bool(),
            MethodRet::Any => CheckedType::any(),
        }
    }
}

static ARRAY_METHODS: &[MethodSig] = &[
    MethodSig { name: "push", min_args: 1, max_args: None, args: &[ArgShape::Elem], ret: MethodRet::Void },
    MethodSig { name: "unshift", min_args: 1, max_args: None, args: &[ArgShape::Elem], ret: MethodRet::Void },
    MethodSig { name: "insert", min_args: 2, max_args: Some(2), args: &[ArgShape::Int, ArgShape::Elem], ret: MethodRet::Void },
    MethodSig { name: "pop", min_args: 0, max_args: Some(0), args: &[], ret: MethodRet::Element },
    MethodSig { name: "shift", min_args: 0, max_args: Some(0), args: &[], ret: MethodRet::Element },
    MethodSig { name: "first", min_args: 0, max_args: Some(0), args: &[], ret: MethodRet::Element },
    MethodSig { name: "last", min_args: 0, max_args: Some(0), args: &[], ret: MethodRet::Element },
    MethodSig { name: "clear", min_args: 0, max_args: Some(0), args: &[], ret: MethodRet::Void },
    MethodSig { name: "reverse", min_args: 0, max_args: Some(0), args: &[], ret: MethodRet::SameArray },
    MethodSig { name: "remove", min_args: 1, max_args: Some(1), args: &[ArgShape::Int], ret: MethodRet::Element },
    MethodSig { name: "slice", min_args: 0, max_args: Some(2), args: &[ArgShape::Int, ArgShape::Int], ret: MethodRet::SameArray },
    MethodSig { name: "join", min_args: 0, max_args: Some(1), args: &[ArgShape::Str], ret: MethodRet::Str },
    MethodSig { name: "map", min_args: 1, max_args: Some(1), args: &[ArgShape::Func], ret: MethodRet::UntypedArray },
    MethodSig { name: "filter", min_args: 1, max_args: Some(1), args: &[ArgShape::Func], ret: MethodRet::SameArray },
    MethodSig { name: "reduce", min_args: 1, max_args: Some(2), args: &[ArgShape::Func, ArgShape::Any], ret: MethodRet::Any },
    MethodSig { name: "contains", min_args: 1, max_args: Some(1), args: &[ArgShape::Any], ret: MethodRet::Bool },
    MethodSig { name: "find", min_args: 1, max_args: Some(1), args: &[ArgShape::Any], ret: MethodRet::Int },
    MethodSig { name: "concat", min_args: 1, max_args: Some(1), args: &[ArgShape::ArrayArg], ret: MethodRet::SameArray },
];

static STRING_METHODS: &[MethodSig] = &[
    MethodSig { name: "substr", min_args: 1, max_args: Some(2), args: &[ArgShape::Int, ArgShape::Int], ret: MethodRet::Str },
    MethodSig { name: "slice", min_args: 1, max_args: Some(2), args: &[ArgShape::Int, ArgShape::Int], ret: MethodRet::Str },
    MethodSig { name: "char_at", min_args: 1, max_args: Some(1), args: &[ArgShape::Int], ret: MethodRet::Any },
    MethodSig { name: "byte_at", min_args: 1, max_args: Some(1), args: &[ArgShape::Int], ret: MethodRet::Int },
    MethodSig { name: "find", min_args: 1, max_args: Some(1), args: &[ArgShape::Str], ret: MethodRet::Int },
    MethodSig { name: "contains", min_args: 1, max_args: Some(1), args: &[ArgShape::Str], ret: MethodRet::Bool },
    MethodSig { name: "starts_with", min_args: 1, max_args: Some(1), args: &[ArgShape::Str], ret: MethodRet::Bool },
    MethodSig { name: "ends_with", min_args: 1, max_args: Some(1), args: &[ArgShape::Str], ret: MethodRet::Bool },
    MethodSig { name: "split", min_args: 1, max_args: Some(1), args: &[ArgShape::Str], ret: MethodRet::ArrayOfString },
    MethodSig { name: "replace", min_args: 2, max_args: Some(2), args: &[ArgShape::Str, ArgShape::Str], ret: MethodRet::Str },
    MethodSig { name: "replace_all", min_args: 2, max_args: Some(2), args: &[ArgShape::Str, ArgShape::Str], ret: MethodRet::Str },
    MethodSig { name: "repeat", min_args: 1, max_args: Some(1), args: &[ArgShape::Int], ret: MethodRet::Str },
    MethodSig { name: "trim", min_args: 0, max_args: Some(0), args: &[], ret: MethodRet::Str },
    MethodSig { name: "to_upper", min_args: 0, max_args: Some(0), args: &[], ret: MethodRet::Str },
    MethodSig { name: "to_lower", min_args: 0, max_args: Some(0), args: &[], ret: MethodRet::Str },
    MethodSig { name: "chars", min_args: 0, max_args: Some(0), args: &[], ret: MethodRet::ArrayOfRune },
    MethodSig { name: "bytes", min_args: 0, max_args: Some(0), args: &[], ret: MethodRet::ArrayOfInt },
    MethodSig { name: "to_bytes", min_args: 0, max_args: Some(0), args: &[], ret: MethodRet::ArrayOfInt },
    MethodSig { name: "deserialize", min_args: 0, max_args: Some(0), args: &[], ret: MethodRet::Any },
];

pub fn array_method(name: &str) -> Option<&'static MethodSig> {
    ARRAY_METHODS.iter().find(|m| m.name == name)
}

pub fn string_method(name: &str) -> Option<&'static MethodSig> {
    STRING_METHODS.iter().find(|m| m.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_lookup() {
        assert_eq!(builtin_fn("typeof").unwrap().return_type().kind, TypeKind::String);
        assert_eq!(builtin_fn("len").unwrap().return_type().kind, TypeKind::I32);
        assert_eq!(builtin_fn("i32").unwrap().return_type().kind, TypeKind::I32);
        assert_eq!(builtin_fn("spawn").unwrap().return_type().kind, TypeKind::Task);
        assert!(builtin_fn("frobnicate").is_none());
    }

    #[test]
    fn push_shape_checks_element() {
        let m = array_method("push").unwrap();
        let elem = CheckedType::i32();
        assert!(m.shape_at(0).admits(&CheckedType::i64(), Some(&elem)));
        assert!(!m.shape_at(0).admits(&CheckedType::string(), Some(&elem)));
        // Untyped receiver accepts anything.
        assert!(m.shape_at(0).admits(&CheckedType::string(), None));
    }

    #[test]
    fn variadic_push_reuses_last_shape() {
        let m = array_method("push").unwrap();
        assert!(m.max_args.is_none());
        assert_eq!(m.shape_at(5), ArgShape::Elem);
    }

    #[test]
    fn insert_requires_int_then_elem() {
        let m = array_method("insert").unwrap();
        assert_eq!(m.shape_at(0), ArgShape::Int);
        assert_eq!(m.shape_at(1), ArgShape::Elem);
        assert!(!m.shape_at(0).admits(&CheckedType::string(), None));
    }

    #[test]
    fn string_catalogue_returns() {
        let recv = CheckedType::string();
        assert_eq!(
            string_method("split").unwrap().return_type(&recv).element.unwrap().kind,
            TypeKind::String
        );
        assert_eq!(string_method("repeat").unwrap().return_type(&recv).kind, TypeKind::String);
        assert_eq!(string_method("byte_at").unwrap().return_type(&recv).kind, TypeKind::I32);
    }

    #[test]
    fn array_returns_track_receiver_element() {
        let recv = CheckedType::array(Some(CheckedType::string()));
        assert_eq!(array_method("pop").unwrap().return_type(&recv).kind, TypeKind::String);
        let sliced = array_method("slice").unwrap().return_type(&recv);
        assert_eq!(sliced.element.unwrap().kind, TypeKind::String);
    }
}
