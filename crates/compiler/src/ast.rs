//! Abstract syntax tree for Hemlock
//!
//! The tree is produced by an upstream lexer/parser and consumed by the
//! checker and the code generator. Every node carries the 1-based source
//! line it came from; diagnostics and emitted code reference that line.
//!
//! The variants here are closed sums: the checker and the generator match
//! exhaustively, so adding a statement or expression kind is a change to
//! every phase.

use std::path::PathBuf;

/// A parsed compilation unit: the statements of one source file.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    /// Path of the source file, used as the diagnostic prefix.
    pub path: PathBuf,
    pub statements: Vec<Stmt>,
}

impl Program {
    pub fn new(path: impl Into<PathBuf>, statements: Vec<Stmt>) -> Self {
        Program {
            path: path.into(),
            statements,
        }
    }
}

/// A statement together with its source line.
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    /// 1-based source line.
    pub line: u32,
}

impl Stmt {
    pub fn new(kind: StmtKind, line: u32) -> Self {
        Stmt { kind, line }
    }
}

/// An expression together with its source line.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    /// 1-based source line.
    pub line: u32,
}

impl Expr {
    pub fn new(kind: ExprKind, line: u32) -> Self {
        Expr { kind, line }
    }

    /// True for literals of a primitive type.
    pub fn is_literal(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Number(_)
                | ExprKind::Bool(_)
                | ExprKind::Str(_)
                | ExprKind::Rune(_)
                | ExprKind::Null
        )
    }
}

/// Numeric literal payload. The lexer distinguishes `1` from `1.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Let {
        name: String,
        ty: Option<TypeExpr>,
        value: Expr,
    },
    Const {
        name: String,
        ty: Option<TypeExpr>,
        value: Expr,
    },
    Expr(Expr),
    If {
        cond: Expr,
        then_body: Vec<Stmt>,
        else_body: Option<Vec<Stmt>>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        update: Option<Expr>,
        body: Vec<Stmt>,
    },
    /// `for (key in it)` / `for (key, value in it)`.
    ///
    /// With one variable it names the element (arrays/strings) or the key
    /// (objects); with two, `key` is the index or object key and `value`
    /// the element.
    ForIn {
        key: String,
        value: Option<String>,
        iterable: Expr,
        body: Vec<Stmt>,
    },
    Block(Vec<Stmt>),
    Return(Option<Expr>),
    Break,
    Continue,
    /// `type Name { field: T, ... }`: a named object shape.
    DefineObject {
        name: String,
        fields: Vec<FieldDef>,
    },
    Enum {
        name: String,
        variants: Vec<EnumVariant>,
    },
    Try {
        body: Vec<Stmt>,
        catch: Option<CatchClause>,
        finally: Option<Vec<Stmt>>,
    },
    Throw(Expr),
    Switch {
        subject: Expr,
        cases: Vec<SwitchCase>,
    },
    /// `defer f(args...)`: callee and arguments are captured when the
    /// defer statement executes, not when the function exits.
    Defer {
        call: Expr,
    },
    Export(Box<Stmt>),
    Import {
        /// Import specifier as written (resolved by the module loader).
        spec: String,
        binding: ImportBinding,
    },
    ImportFfi {
        library: String,
        functions: Vec<FfiFn>,
    },
    /// `extern fn name(T, ...): T`: a runtime-provided C function that
    /// takes and returns tagged values.
    ExternFn {
        name: String,
        params: Vec<TypeExpr>,
        return_type: TypeExpr,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Number(Number),
    Bool(bool),
    Str(String),
    Rune(char),
    Null,
    Ident(String),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Ternary {
        cond: Box<Expr>,
        then_val: Box<Expr>,
        else_val: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Assign {
        name: String,
        value: Box<Expr>,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    IndexAssign {
        object: Box<Expr>,
        index: Box<Expr>,
        value: Box<Expr>,
    },
    GetProperty {
        object: Box<Expr>,
        property: String,
    },
    SetProperty {
        object: Box<Expr>,
        property: String,
        value: Box<Expr>,
    },
    ArrayLiteral(Vec<Expr>),
    ObjectLiteral(Vec<(String, Expr)>),
    Function(FunctionLit),
    Await(Box<Expr>),
    StringInterpolation(Vec<InterpolationPart>),
    /// `obj?.prop`, `obj?.[idx]`, `obj?.(args)`: null short-circuits.
    OptionalChain {
        object: Box<Expr>,
        access: OptionalAccess,
    },
    NullCoalesce {
        left: Box<Expr>,
        right: Box<Expr>,
    },
    PrefixInc(Box<Expr>),
    PrefixDec(Box<Expr>),
    PostfixInc(Box<Expr>),
    PostfixDec(Box<Expr>),
}

/// One segment of an interpolated string literal.
#[derive(Debug, Clone, PartialEq)]
pub enum InterpolationPart {
    Literal(String),
    Expr(Expr),
}

/// The access applied after a `?.` guard.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionalAccess {
    Property(String),
    Index(Box<Expr>),
    Call(Vec<Expr>),
}

/// A function literal: `fn(a: i32, b?): i32 { ... }`.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionLit {
    pub params: Vec<Param>,
    pub return_type: Option<TypeExpr>,
    pub body: Vec<Stmt>,
    pub is_async: bool,
}

impl FunctionLit {
    /// True when the last parameter is a `...rest` collector.
    pub fn has_rest(&self) -> bool {
        self.params.last().is_some_and(|p| p.rest)
    }

    /// Number of leading parameters a caller must supply.
    pub fn num_required(&self) -> usize {
        self.params
            .iter()
            .take_while(|p| !p.optional && p.default.is_none() && !p.rest)
            .count()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: Option<TypeExpr>,
    pub default: Option<Expr>,
    /// Marked optional with `?` (callers may omit it).
    pub optional: bool,
    /// A `...rest` parameter; always last, collects extra arguments.
    pub rest: bool,
}

impl Param {
    /// A plain required parameter with an optional annotation.
    pub fn required(name: impl Into<String>, ty: Option<TypeExpr>) -> Self {
        Param {
            name: name.into(),
            ty,
            default: None,
            optional: false,
            rest: false,
        }
    }
}

/// A field of a `type` declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub ty: TypeExpr,
    pub optional: bool,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumVariant {
    pub name: String,
    /// Explicit integer value; the implicit counter resumes from `value + 1`.
    pub value: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatchClause {
    /// Name bound to the thrown value, if any.
    pub binding: Option<String>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    /// `None` marks the `default:` case.
    pub value: Option<Expr>,
    pub body: Vec<Stmt>,
}

/// How an `import` statement binds the target module's exports.
#[derive(Debug, Clone, PartialEq)]
pub enum ImportBinding {
    /// `import m from "..."`: one object value carrying every export.
    Namespace(String),
    /// `import * from "..."`: each export under its original name.
    Star,
    /// `import { a, b as c } from "..."`: selected names with aliases.
    Named(Vec<(String, Option<String>)>),
}

/// One function of an `import_ffi` block.
#[derive(Debug, Clone, PartialEq)]
pub struct FfiFn {
    pub name: String,
    pub params: Vec<TypeExpr>,
    pub return_type: TypeExpr,
}

/// Source-level type annotations.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeExpr {
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
    /// `[T]`, or `[]` with no element annotation.
    Array(Option<Box<TypeExpr>>),
    /// The generic `object` type (any shape).
    Object,
    /// A named object or enum type, resolved against the registries.
    Named(String),
    Ptr,
    Buffer,
    Void,
    /// No annotation was written; the checker infers.
    Inferred,
    /// `T?`.
    Nullable(Box<TypeExpr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

impl BinaryOp {
    /// Comparison operators always produce `bool`.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    pub fn is_bitwise(self) -> bool {
        matches!(
            self,
            BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor | BinaryOp::Shl | BinaryOp::Shr
        )
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod
        )
    }

    /// Operator spelling for diagnostics.
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// `-x`
    Neg,
    /// `!x`
    Not,
    /// `~x`
    BitNot,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
            UnaryOp::BitNot => "~",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(v: i64) -> Expr {
        Expr::new(ExprKind::Number(Number::Int(v)), 1)
    }

    #[test]
    fn literal_classification() {
        assert!(int(1).is_literal());
        assert!(Expr::new(ExprKind::Null, 1).is_literal());
        assert!(!Expr::new(ExprKind::Ident("x".into()), 1).is_literal());
    }

    #[test]
    fn function_required_count_stops_at_first_optional() {
        let lit = FunctionLit {
            params: vec![
                Param::required("a", None),
                Param {
                    name: "b".into(),
                    ty: None,
                    default: Some(int(3)),
                    optional: false,
                    rest: false,
                },
                Param::required("c", None),
            ],
            return_type: None,
            body: vec![],
            is_async: false,
        };
        assert_eq!(lit.num_required(), 1);
        assert!(!lit.has_rest());
    }

    #[test]
    fn rest_param_detected() {
        let lit = FunctionLit {
            params: vec![Param {
                name: "args".into(),
                ty: None,
                default: None,
                optional: false,
                rest: true,
            }],
            return_type: None,
            body: vec![],
            is_async: false,
        };
        assert!(lit.has_rest());
        assert_eq!(lit.num_required(), 0);
    }
}
