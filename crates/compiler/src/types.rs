//! Semantic types for the Hemlock checker
//!
//! `CheckedType` is the internal type assigned to every expression during
//! inference. It is deliberately permissive: `Any` and `Unknown` accept
//! everything, and the abstract `Numeric`/`Integer` categories stand for
//! "some concrete width" in builtin signatures. Static checking rejects
//! what is provably wrong and leaves the rest to runtime coercion.

use std::fmt;

/// The kind discriminant of a checked type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// Not yet inferred; accepts and is accepted by everything.
    Unknown,
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
    String,
    Rune,
    Null,
    Ptr,
    Buffer,
    Array,
    /// The generic object type (any shape).
    Object,
    /// A named object shape; `type_name` carries the name.
    Custom,
    Function,
    Task,
    Channel,
    File,
    /// A named enum; `type_name` carries the name. Values are integers.
    Enum,
    Void,
    /// The explicit escape hatch; accepts and is accepted by everything.
    Any,
    /// Abstract category: any numeric width (builtin signatures only).
    Numeric,
    /// Abstract category: any integer width (builtin signatures only).
    Integer,
}

/// Signature payload of a `TypeKind::Function` type.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionType {
    pub params: Vec<CheckedType>,
    pub return_type: CheckedType,
    pub has_rest: bool,
}

/// A fully resolved semantic type.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckedType {
    pub kind: TypeKind,
    /// `T?`: null is an allowed value.
    pub nullable: bool,
    /// Name for `Custom` and `Enum` kinds.
    pub type_name: Option<String>,
    /// Element type for `Array`; `None` means untyped elements.
    pub element: Option<Box<CheckedType>>,
    /// Signature for `Function` kinds inferred from literals.
    pub function: Option<Box<FunctionType>>,
}

impl CheckedType {
    pub fn of(kind: TypeKind) -> Self {
        CheckedType {
            kind,
            nullable: false,
            type_name: None,
            element: None,
            function: None,
        }
    }

    pub fn any() -> Self {
        Self::of(TypeKind::Any)
    }

    pub fn unknown() -> Self {
        Self::of(TypeKind::Unknown)
    }

    pub fn i32() -> Self {
        Self::of(TypeKind::I32)
    }

    pub fn i64() -> Self {
        Self::of(TypeKind::I64)
    }

    pub fn f64() -> Self {
        Self::of(TypeKind::F64)
    }

    pub fn bool() -> Self {
        Self::of(TypeKind::Bool)
    }

    pub fn string() -> Self {
        Self::of(TypeKind::String)
    }

    pub fn rune() -> Self {
        Self::of(TypeKind::Rune)
    }

    pub fn null() -> Self {
        Self::of(TypeKind::Null)
    }

    pub fn void() -> Self {
        Self::of(TypeKind::Void)
    }

    pub fn array(element: Option<CheckedType>) -> Self {
        CheckedType {
            element: element.map(Box::new),
            ..Self::of(TypeKind::Array)
        }
    }

    pub fn object() -> Self {
        Self::of(TypeKind::Object)
    }

    pub fn custom(name: impl Into<String>) -> Self {
        CheckedType {
            type_name: Some(name.into()),
            ..Self::of(TypeKind::Custom)
        }
    }

    pub fn enum_type(name: impl Into<String>) -> Self {
        CheckedType {
            type_name: Some(name.into()),
            ..Self::of(TypeKind::Enum)
        }
    }

    pub fn function(params: Vec<CheckedType>, return_type: CheckedType, has_rest: bool) -> Self {
        CheckedType {
            function: Some(Box::new(FunctionType {
                params,
                return_type,
                has_rest,
            })),
            ..Self::of(TypeKind::Function)
        }
    }

    /// Builder: mark this type nullable.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// `Any` or `Unknown`: the permissive sentinels.
    pub fn is_permissive(&self) -> bool {
        matches!(self.kind, TypeKind::Any | TypeKind::Unknown)
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self.kind,
            TypeKind::I8
                | TypeKind::I16
                | TypeKind::I32
                | TypeKind::I64
                | TypeKind::U8
                | TypeKind::U16
                | TypeKind::U32
                | TypeKind::U64
                | TypeKind::Integer
                // Enum variants are plain integers at runtime.
                | TypeKind::Enum
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self.kind, TypeKind::F32 | TypeKind::F64)
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer() || self.is_float() || self.kind == TypeKind::Numeric
    }

    /// Structural equality: kind, nullability, names, and element types.
    pub fn type_equals(&self, other: &CheckedType) -> bool {
        if self.kind != other.kind || self.nullable != other.nullable {
            return false;
        }
        if self.type_name != other.type_name {
            return false;
        }
        match (&self.element, &other.element) {
            (Some(a), Some(b)) => a.type_equals(b),
            (None, None) => true,
            _ => false,
        }
    }

    /// Can a value of type `from` be stored where `self` is declared?
    ///
    /// Permissive by design: numeric widths inter-assign (range-checked at
    /// runtime), scalars coerce to strings, objects duck-type into named
    /// shapes. The rules are ordered; the first that applies decides.
    pub fn accepts(&self, from: &CheckedType) -> bool {
        // Any/Unknown on either side accepts everything.
        if self.is_permissive() || from.is_permissive() {
            return true;
        }
        // Null goes only into nullable slots (or Null itself).
        if from.kind == TypeKind::Null {
            return self.nullable || self.kind == TypeKind::Null;
        }
        if self.type_equals(from) {
            return true;
        }
        // T? accepts T.
        if self.nullable {
            let bare = CheckedType {
                nullable: false,
                ..self.clone()
            };
            if bare.type_equals(from) {
                return true;
            }
        }
        if self.is_numeric() && from.is_numeric() {
            return true;
        }
        // Runtime coercions: rune to integer, numeric/rune to bool,
        // any scalar to string.
        if self.is_integer() && from.kind == TypeKind::Rune {
            return true;
        }
        if self.kind == TypeKind::Bool && (from.is_numeric() || from.kind == TypeKind::Rune) {
            return true;
        }
        if self.kind == TypeKind::String && from.is_scalar() {
            return true;
        }
        if self.kind == TypeKind::Array && from.kind == TypeKind::Array {
            return match (&self.element, &from.element) {
                (Some(a), Some(b)) => a.accepts(b),
                // Untyped element on either side matches anything.
                _ => true,
            };
        }
        // Generic object duck-types into a named shape; runtime validates.
        if self.kind == TypeKind::Custom && from.kind == TypeKind::Object {
            return true;
        }
        if self.kind == TypeKind::Custom && from.kind == TypeKind::Custom {
            return self.type_name == from.type_name;
        }
        false
    }

    fn is_scalar(&self) -> bool {
        self.is_numeric() || matches!(self.kind, TypeKind::Bool | TypeKind::Rune | TypeKind::String)
    }

    /// Runtime tag name for this type, as used by `hml_convert_to_type`,
    /// `hml_validate_typed_array`, and object field registration.
    pub fn val_tag(&self) -> &'static str {
        match self.kind {
            TypeKind::I8 => "HML_VAL_I8",
            TypeKind::I16 => "HML_VAL_I16",
            TypeKind::I32 => "HML_VAL_I32",
            TypeKind::I64 => "HML_VAL_I64",
            TypeKind::U8 => "HML_VAL_U8",
            TypeKind::U16 => "HML_VAL_U16",
            TypeKind::U32 => "HML_VAL_U32",
            TypeKind::U64 => "HML_VAL_U64",
            TypeKind::F32 => "HML_VAL_F32",
            TypeKind::F64 => "HML_VAL_F64",
            TypeKind::Bool => "HML_VAL_BOOL",
            TypeKind::String => "HML_VAL_STRING",
            TypeKind::Rune => "HML_VAL_RUNE",
            TypeKind::Null | TypeKind::Void => "HML_VAL_NULL",
            TypeKind::Ptr => "HML_VAL_PTR",
            TypeKind::Buffer => "HML_VAL_BUFFER",
            TypeKind::Array => "HML_VAL_ARRAY",
            TypeKind::Object | TypeKind::Custom => "HML_VAL_OBJECT",
            TypeKind::Function => "HML_VAL_FUNCTION",
            TypeKind::Task => "HML_VAL_TASK",
            TypeKind::Channel => "HML_VAL_CHANNEL",
            TypeKind::File => "HML_VAL_FILE",
            // Enum values are plain integers at runtime.
            TypeKind::Enum => "HML_VAL_I32",
            TypeKind::Unknown | TypeKind::Any | TypeKind::Numeric | TypeKind::Integer => {
                "HML_VAL_ANY"
            }
        }
    }

    /// FFI marshalling tag; anything without a C representation is VOID.
    pub fn ffi_tag(&self) -> &'static str {
        match self.kind {
            TypeKind::I8 => "HML_FFI_I8",
            TypeKind::I16 => "HML_FFI_I16",
            TypeKind::I32 => "HML_FFI_I32",
            TypeKind::I64 => "HML_FFI_I64",
            TypeKind::U8 => "HML_FFI_U8",
            TypeKind::U16 => "HML_FFI_U16",
            TypeKind::U32 => "HML_FFI_U32",
            TypeKind::U64 => "HML_FFI_U64",
            TypeKind::F32 => "HML_FFI_F32",
            TypeKind::F64 => "HML_FFI_F64",
            TypeKind::Bool => "HML_FFI_BOOL",
            TypeKind::String => "HML_FFI_STRING",
            TypeKind::Ptr | TypeKind::Buffer => "HML_FFI_PTR",
            _ => "HML_FFI_VOID",
        }
    }
}

/// Merge the types of two subexpressions (arithmetic, ternary, `??`).
///
/// Numeric types widen: a float operand makes the result float, otherwise
/// the larger integer width wins. A string operand makes the result
/// string. Anything else collapses to `Any`.
pub fn common(a: &CheckedType, b: &CheckedType) -> CheckedType {
    if a.type_equals(b) {
        return a.clone();
    }
    if a.is_numeric() && b.is_numeric() {
        return CheckedType::of(widen(a.kind, b.kind));
    }
    if a.kind == TypeKind::String || b.kind == TypeKind::String {
        return CheckedType::string();
    }
    CheckedType::any()
}

/// Pick the wider of two concrete numeric kinds.
fn widen(a: TypeKind, b: TypeKind) -> TypeKind {
    if numeric_rank(a) >= numeric_rank(b) { a } else { b }
}

/// Widening order: floats above all integers, f64 above f32; integers by
/// width, unsigned above signed at equal width. The abstract categories
/// rank below every concrete kind so a concrete operand decides.
fn numeric_rank(kind: TypeKind) -> u8 {
    match kind {
        TypeKind::F64 => 12,
        TypeKind::F32 => 11,
        TypeKind::U64 => 10,
        TypeKind::I64 => 9,
        TypeKind::U32 => 8,
        TypeKind::I32 => 7,
        TypeKind::U16 => 6,
        TypeKind::I16 => 5,
        TypeKind::U8 => 4,
        TypeKind::I8 => 3,
        TypeKind::Numeric => 2,
        TypeKind::Integer => 1,
        _ => 0,
    }
}

impl fmt::Display for CheckedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let base = match self.kind {
            TypeKind::Unknown => "unknown",
            TypeKind::I8 => "i8",
            TypeKind::I16 => "i16",
            TypeKind::I32 => "i32",
            TypeKind::I64 => "i64",
            TypeKind::U8 => "u8",
            TypeKind::U16 => "u16",
            TypeKind::U32 => "u32",
            TypeKind::U64 => "u64",
            TypeKind::F32 => "f32",
            TypeKind::F64 => "f64",
            TypeKind::Bool => "bool",
            TypeKind::String => "string",
            TypeKind::Rune => "rune",
            TypeKind::Null => "null",
            TypeKind::Ptr => "ptr",
            TypeKind::Buffer => "buffer",
            TypeKind::Array => {
                match &self.element {
                    Some(e) => write!(f, "[{}]", e)?,
                    None => write!(f, "[]")?,
                }
                return self.write_nullable_suffix(f);
            }
            TypeKind::Object => "object",
            TypeKind::Custom | TypeKind::Enum => {
                write!(f, "{}", self.type_name.as_deref().unwrap_or("<unnamed>"))?;
                return self.write_nullable_suffix(f);
            }
            TypeKind::Function => "fn",
            TypeKind::Task => "task",
            TypeKind::Channel => "channel",
            TypeKind::File => "file",
            TypeKind::Void => "void",
            TypeKind::Any => "any",
            TypeKind::Numeric => "numeric",
            TypeKind::Integer => "integer",
        };
        write!(f, "{}", base)?;
        self.write_nullable_suffix(f)
    }
}

impl CheckedType {
    fn write_nullable_suffix(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nullable {
            write!(f, "?")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_accepts_and_is_accepted() {
        let any = CheckedType::any();
        let i32t = CheckedType::i32();
        assert!(any.accepts(&i32t));
        assert!(i32t.accepts(&any));
        let unk = CheckedType::unknown();
        assert!(unk.accepts(&i32t));
        assert!(i32t.accepts(&unk));
    }

    #[test]
    fn null_assignability() {
        let null = CheckedType::null();
        assert!(CheckedType::string().nullable().accepts(&null));
        assert!(CheckedType::null().accepts(&null));
        assert!(!CheckedType::string().accepts(&null));
    }

    #[test]
    fn nullable_accepts_bare() {
        let opt = CheckedType::string().nullable();
        assert!(opt.accepts(&CheckedType::string()));
        assert!(!CheckedType::string().accepts(&CheckedType::string().nullable()));
    }

    #[test]
    fn numerics_inter_assign() {
        assert!(CheckedType::of(TypeKind::U8).accepts(&CheckedType::f64()));
        assert!(CheckedType::f64().accepts(&CheckedType::of(TypeKind::I8)));
    }

    #[test]
    fn coercions() {
        assert!(CheckedType::i32().accepts(&CheckedType::rune()));
        assert!(CheckedType::bool().accepts(&CheckedType::i64()));
        assert!(CheckedType::string().accepts(&CheckedType::bool()));
        assert!(!CheckedType::string().accepts(&CheckedType::array(None)));
    }

    #[test]
    fn array_assignability_recurses() {
        let of_i32 = CheckedType::array(Some(CheckedType::i32()));
        let of_str = CheckedType::array(Some(CheckedType::string()));
        let untyped = CheckedType::array(None);
        assert!(of_i32.accepts(&untyped));
        assert!(untyped.accepts(&of_str));
        assert!(of_i32.accepts(&CheckedType::array(Some(CheckedType::i64()))));
        assert!(!of_i32.accepts(&of_str));
    }

    #[test]
    fn custom_types_duck_and_match_by_name() {
        let point = CheckedType::custom("Point");
        assert!(point.accepts(&CheckedType::object()));
        assert!(point.accepts(&CheckedType::custom("Point")));
        assert!(!point.accepts(&CheckedType::custom("Rect")));
        // Named shapes do not flow back into each other's fields via object.
        assert!(!CheckedType::object().accepts(&CheckedType::of(TypeKind::Task)));
    }

    #[test]
    fn common_widens_numerics() {
        let c = common(&CheckedType::i32(), &CheckedType::i64());
        assert_eq!(c.kind, TypeKind::I64);
        let c = common(&CheckedType::i64(), &CheckedType::of(TypeKind::F32));
        assert_eq!(c.kind, TypeKind::F32);
        let c = common(&CheckedType::of(TypeKind::U8), &CheckedType::of(TypeKind::I8));
        assert_eq!(c.kind, TypeKind::U8);
    }

    #[test]
    fn common_falls_through_string_then_any() {
        assert_eq!(
            common(&CheckedType::string(), &CheckedType::i32()).kind,
            TypeKind::String
        );
        assert_eq!(
            common(&CheckedType::bool(), &CheckedType::i32()).kind,
            TypeKind::Any
        );
    }

    #[test]
    fn display_shapes() {
        assert_eq!(CheckedType::i32().to_string(), "i32");
        assert_eq!(CheckedType::string().nullable().to_string(), "string?");
        assert_eq!(
            CheckedType::array(Some(CheckedType::i32())).to_string(),
            "[i32]"
        );
        assert_eq!(CheckedType::custom("Point").to_string(), "Point");
    }

    #[test]
    fn tags() {
        assert_eq!(CheckedType::i32().val_tag(), "HML_VAL_I32");
        assert_eq!(CheckedType::enum_type("Color").val_tag(), "HML_VAL_I32");
        assert_eq!(CheckedType::custom("P").val_tag(), "HML_VAL_OBJECT");
        assert_eq!(CheckedType::of(TypeKind::Buffer).ffi_tag(), "HML_FFI_PTR");
        assert_eq!(CheckedType::array(None).ffi_tag(), "HML_FFI_VOID");
    }
}
