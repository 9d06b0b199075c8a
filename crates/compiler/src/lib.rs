//! Hemlock Compiler Core
//!
//! Semantic analysis and C emission for Hemlock, a dynamically-typed,
//! garbage-collected scripting language with optional type annotations.
//! The upstream lexer/parser produces the [`ast::Program`] consumed
//! here; the output is one portable C translation unit that links
//! against the fixed `hml_*` runtime library.
//!
//! Pipeline:
//!
//! 1. registration pass: top-level signatures, object shapes, enums
//!    (forward references resolve);
//! 2. checking pass: inference plus validation, accumulating
//!    diagnostics without ever stopping early;
//! 3. escape/loop analysis: marks variables that can live in native C
//!    slots instead of tagged values;
//! 4. code generation: tree-directed lowering with constant folding,
//!    i32/i64 fast paths, string-concat fusion, tail-call-to-loop
//!    conversion, and deferred closure emission.
//!
//! The driver compiles to completion even with type errors and fails
//! afterwards iff any error was reported, so one run surfaces as many
//! diagnostics as possible.
//!
//! # Embedding
//!
//! ```rust,ignore
//! use hemlockc::{compile, CompilerConfig, Program};
//!
//! let config = CompilerConfig::default();
//! let output = compile(&program, &config)?;
//! if output.success() {
//!     std::fs::write("out.c", &output.c_source)?;
//! } else {
//!     output.diagnostics.print_stderr();
//! }
//! ```

pub mod ast;
pub mod builtins;
pub mod codegen;
pub mod config;
pub mod diagnostics;
pub mod env;
pub mod escape;
pub mod infer;
pub mod modules;
pub mod tailcall;
pub mod typechecker;
pub mod types;
pub mod utf8;

pub use ast::Program;
pub use codegen::{CodeGenError, Codegen};
pub use config::CompilerConfig;
pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use env::{Registry, TypeEnv};
pub use modules::{MemoryLoader, ModuleCache, ModuleLoader};
pub use typechecker::TypeChecker;
pub use types::{CheckedType, TypeKind};

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

/// Result of compiling one program: the C text plus every diagnostic.
/// Generation runs even when errors were reported, so drivers can show
/// everything found in one pass.
pub struct CompileOutput {
    pub c_source: String,
    pub diagnostics: Diagnostics,
}

impl CompileOutput {
    /// True when no errors were reported (warnings do not fail a build).
    pub fn success(&self) -> bool {
        self.diagnostics.is_clean()
    }
}

/// Failure modes of the file-writing driver.
#[derive(Debug)]
pub enum CompileError {
    /// Type errors were reported; the compilation is unusable.
    Failed { errors: usize, warnings: usize },
    /// Internal lowering failure.
    CodeGen(CodeGenError),
    Io(io::Error),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Failed { errors, warnings } => write!(
                f,
                "compilation failed with {} error(s), {} warning(s)",
                errors, warnings
            ),
            CompileError::CodeGen(e) => write!(f, "{}", e),
            CompileError::Io(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for CompileError {}

impl From<CodeGenError> for CompileError {
    fn from(e: CodeGenError) -> Self {
        CompileError::CodeGen(e)
    }
}

impl From<io::Error> for CompileError {
    fn from(e: io::Error) -> Self {
        CompileError::Io(e)
    }
}

/// Compile a program with no module loader; imports become diagnostics.
pub fn compile(program: &Program, config: &CompilerConfig) -> Result<CompileOutput, CodeGenError> {
    compile_with_loader(program, config, ModuleCache::disconnected())
}

/// Compile a program resolving imports through the given module cache.
pub fn compile_with_loader(
    program: &Program,
    config: &CompilerConfig,
    mut cache: ModuleCache,
) -> Result<CompileOutput, CodeGenError> {
    tracing::debug!(path = %program.path.display(), "compile start");
    let mut checker = TypeChecker::new(program.path.clone(), config);
    checker.check_program(&program.statements, &mut cache);
    let (registry, diagnostics) = checker.into_parts();

    let mut codegen = Codegen::new(registry, diagnostics, cache, program.path.clone(), config);
    codegen.gen_program(program)?;
    let (c_source, diagnostics) = codegen.finish();
    tracing::debug!(
        errors = diagnostics.error_count(),
        warnings = diagnostics.warning_count(),
        bytes = c_source.len(),
        "compile finished"
    );
    Ok(CompileOutput {
        c_source,
        diagnostics,
    })
}

/// Compile and flush the C text to `output`. Diagnostics go to stderr;
/// the write happens only on a clean compile.
pub fn compile_to_file(
    program: &Program,
    config: &CompilerConfig,
    output: &Path,
) -> Result<(), CompileError> {
    let result = compile(program, config)?;
    result.diagnostics.print_stderr();
    if !result.success() {
        return Err(CompileError::Failed {
            errors: result.diagnostics.error_count(),
            warnings: result.diagnostics.warning_count(),
        });
    }
    fs::write(output, result.c_source)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{
        BinaryOp, Expr, ExprKind, FunctionLit, Number, Param, Stmt, StmtKind, TypeExpr,
    };

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

    fn bin(op: BinaryOp, l: Expr, r: Expr) -> Expr {
        e(ExprKind::Binary {
            op,
            left: Box::new(l),
            right: Box::new(r),
        })
    }

    fn call(f: &str, args: Vec<Expr>) -> Expr {
        e(ExprKind::Call {
            callee: Box::new(ident(f)),
            args,
        })
    }

    fn let_(name: &str, ty: Option<TypeExpr>, value: Expr) -> Stmt {
        s(StmtKind::Let {
            name: name.into(),
            ty,
            value,
        })
    }

    fn compile_src(stmts: Vec<Stmt>) -> CompileOutput {
        let program = Program::new("main.hml", stmts);
        compile(&program, &CompilerConfig::default()).expect("lowering should not fail")
    }

    fn count_occurrences(haystack: &str, needle: &str) -> usize {
        haystack.matches(needle).count()
    }

    // `const x: i32 = 1; x = 2;` fails with exactly one error.
    #[test]
    fn const_reassignment_fails_compilation() {
        let out = compile_src(vec![
            s(StmtKind::Const {
                name: "x".into(),
                ty: Some(TypeExpr::I32),
                value: int(1),
            }),
            s(StmtKind::Expr(e(ExprKind::Assign {
                name: "x".into(),
                value: Box::new(int(2)),
            }))),
        ]);
        assert!(!out.success());
        assert_eq!(out.diagnostics.error_count(), 1);
        let msg = out.diagnostics.iter().next().unwrap().to_string();
        assert_eq!(msg, "main.hml:1: error: cannot reassign const variable 'x'");
    }

    // `let fact = fn(n: i32, acc: i32): i32 { ... return fact(...) }`
    // converts to a loop: entry label plus goto, no recursive call.
    #[test]
    fn tail_recursion_becomes_a_loop() {
        let body = vec![
            s(StmtKind::If {
                cond: bin(BinaryOp::Le, ident("n"), int(1)),
                then_body: vec![s(StmtKind::Return(Some(ident("acc"))))],
                else_body: None,
            }),
            s(StmtKind::Return(Some(call(
                "fact",
                vec![
                    bin(BinaryOp::Sub, ident("n"), int(1)),
                    bin(BinaryOp::Mul, ident("n"), ident("acc")),
                ],
            )))),
        ];
        let out = compile_src(vec![
            let_(
                "fact",
                None,
                e(ExprKind::Function(FunctionLit {
                    params: vec![
                        Param::required("n", Some(TypeExpr::I32)),
                        Param::required("acc", Some(TypeExpr::I32)),
                    ],
                    return_type: Some(TypeExpr::I32),
                    body,
                    is_async: false,
                })),
            ),
            s(StmtKind::Expr(call("print", vec![call("fact", vec![int(10), int(1)])]))),
        ]);
        assert!(out.success());
        let c = &out.c_source;
        // Entry label and the goto on the recursive return path.
        assert!(c.contains("_L0: ;"), "missing entry label:\n{}", c);
        assert!(c.contains("goto _L0;"), "missing tail goto:\n{}", c);
        // The self-call never goes through the function-value machinery.
        assert!(!c.contains("hml_call_function"));
        // The outer call is a direct call to the implementation.
        assert!(c.contains("_anon_0(_t"), "expected direct call:\n{}", c);
    }

    // `for (let i = 0; i < 10; i++)` unboxes the counter.
    #[test]
    fn for_loop_counter_unboxes() {
        let out = compile_src(vec![s(StmtKind::For {
            init: Some(Box::new(let_("i", None, int(0)))),
            cond: Some(bin(BinaryOp::Lt, ident("i"), int(10))),
            update: Some(e(ExprKind::PostfixInc(Box::new(ident("i"))))),
            body: vec![s(StmtKind::Expr(call("print", vec![ident("i")])))],
        })]);
        assert!(out.success());
        let c = &out.c_source;
        assert!(c.contains("int32_t i = 0;"), "counter not native:\n{}", c);
        assert!(c.contains("while (i < 10) {"), "bound not folded:\n{}", c);
        assert!(c.contains("i++;"), "increment not native:\n{}", c);
        // Referencing the counter boxes it on demand.
        assert!(c.contains("hml_val_i32(i)"));
    }

    // `"a" + b + "c" + d` fuses into a single concat4 call.
    #[test]
    fn string_concat_chain_fuses() {
        let chain = bin(
            BinaryOp::Add,
            bin(
                BinaryOp::Add,
                bin(BinaryOp::Add, e(ExprKind::Str("a".into())), ident("b")),
                e(ExprKind::Str("c".into())),
            ),
            ident("d"),
        );
        let out = compile_src(vec![
            let_("b", None, e(ExprKind::Str("B".into()))),
            let_("d", None, e(ExprKind::Str("D".into()))),
            let_("s", None, chain),
        ]);
        assert!(out.success());
        let c = &out.c_source;
        assert_eq!(count_occurrences(c, "hml_string_concat4("), 1, "{}", c);
        assert!(!c.contains("hml_binary_op(HML_OP_ADD"), "pairwise concat leaked:\n{}", c);
    }

    // Return inside try with finally: park the value, pop the context,
    // run the finally, then return.
    #[test]
    fn try_finally_with_return_in_try() {
        let body = vec![s(StmtKind::Try {
            body: vec![s(StmtKind::Return(Some(int(1))))],
            catch: None,
            finally: Some(vec![s(StmtKind::Expr(call(
                "print",
                vec![e(ExprKind::Str("fin".into()))],
            )))]),
        })];
        let out = compile_src(vec![let_(
            "f",
            None,
            e(ExprKind::Function(FunctionLit {
                params: vec![],
                return_type: Some(TypeExpr::I32),
                body,
                is_async: false,
            })),
        )]);
        assert!(out.success());
        let c = &out.c_source;
        assert!(c.contains("setjmp(hml_exception_push("), "{}", c);
        // The flag is set, the context popped, and control jumps to the
        // finally label, in that order.
        let flag_set = c.find(" = 1;").expect("has-return flag set");
        let pop = c[flag_set..].find("hml_exception_pop();").expect("pop after flag");
        let fin_goto = c[flag_set..].find("goto _L").expect("goto after flag");
        assert!(pop < fin_goto, "{}", c);
        // After the finally body, the parked value returns.
        assert!(c.contains("if (_finhas"), "{}", c);
        assert!(c.contains("return _finret"), "{}", c);
    }

    // `let f = fn(n) { ... n + f(n-1) ... }` allocates the environment
    // before `f` exists and patches the slot after the binding.
    #[test]
    fn closure_self_reference_patches_env_slot() {
        let body = vec![
            s(StmtKind::If {
                cond: bin(BinaryOp::Le, ident("n"), int(0)),
                then_body: vec![s(StmtKind::Return(Some(int(0))))],
                else_body: None,
            }),
            s(StmtKind::Return(Some(bin(
                BinaryOp::Add,
                ident("n"),
                call("f", vec![bin(BinaryOp::Sub, ident("n"), int(1))]),
            )))),
        ];
        let out = compile_src(vec![
            let_(
                "f",
                None,
                e(ExprKind::Function(FunctionLit {
                    params: vec![Param::required("n", None)],
                    return_type: None,
                    body,
                    is_async: false,
                })),
            ),
            s(StmtKind::Expr(call("print", vec![call("f", vec![int(5)])]))),
        ]);
        assert!(out.success());
        let c = &out.c_source;
        assert!(c.contains("hml_closure_env_new(1)"), "{}", c);
        // Uninitialized slot at creation, patched right after the let.
        let placeholder = c.find(", 0, hml_val_null());").expect("placeholder slot");
        let init = c.find("_main_f = _t").expect("binding init");
        let patch = c.find(", 0, _main_f);").expect("patched slot");
        assert!(placeholder < init && init < patch, "{}", c);
        // The recursive call goes through the function value.
        assert!(c.contains("hml_call_function"), "{}", c);
    }

    // Short-circuit lowering: the right operand only evaluates behind
    // the branch.
    #[test]
    fn logical_and_short_circuits() {
        let out = compile_src(vec![let_(
            "x",
            None,
            bin(BinaryOp::And, ident("a"), call("print", vec![int(1)])),
        )]);
        let c = &out.c_source;
        let branch = c.find("if (hml_to_bool(").expect("branch on left operand");
        let rhs = c.find("hml_print(").expect("right operand emission");
        assert!(branch < rhs, "{}", c);
    }

    // Constant conditions keep only the taken branch.
    #[test]
    fn constant_if_drops_dead_branch() {
        let out = compile_src(vec![s(StmtKind::If {
            cond: e(ExprKind::Bool(false)),
            then_body: vec![s(StmtKind::Expr(call(
                "print",
                vec![e(ExprKind::Str("dead".into()))],
            )))],
            else_body: Some(vec![s(StmtKind::Expr(call(
                "print",
                vec![e(ExprKind::Str("live".into()))],
            )))]),
        })]);
        let c = &out.c_source;
        assert!(!c.contains("dead"), "{}", c);
        assert!(c.contains("live"), "{}", c);
    }

    // Integer literal arithmetic folds at compile time.
    #[test]
    fn constant_folding() {
        let out = compile_src(vec![
            let_("a", None, bin(BinaryOp::Mul, int(6), int(7))),
            let_("b", None, bin(BinaryOp::Div, int(1), int(2))),
            let_("c", None, bin(BinaryOp::Div, int(1), int(0))),
        ]);
        let c = &out.c_source;
        assert!(c.contains("hml_val_i32(42)"), "{}", c);
        // Integer division folds to a float literal.
        assert!(c.contains("hml_val_f64(0.5)"), "{}", c);
        // Division by zero falls through to the runtime.
        assert!(c.contains("hml_binary_op(HML_OP_DIV"), "{}", c);
    }

    // Enum variants number sequentially, resuming after explicit values.
    #[test]
    fn enum_variant_numbering() {
        use crate::ast::EnumVariant;
        let out = compile_src(vec![s(StmtKind::Enum {
            name: "Color".into(),
            variants: vec![
                EnumVariant { name: "Red".into(), value: None },
                EnumVariant { name: "Green".into(), value: Some(10) },
                EnumVariant { name: "Blue".into(), value: None },
            ],
        })]);
        let c = &out.c_source;
        assert!(c.contains("\"Red\", hml_val_i32(0)"), "{}", c);
        assert!(c.contains("\"Green\", hml_val_i32(10)"), "{}", c);
        assert!(c.contains("\"Blue\", hml_val_i32(11)"), "{}", c);
    }

    // `x = x + "lit"` appends in place.
    #[test]
    fn inplace_string_append() {
        let out = compile_src(vec![
            let_("x", None, e(ExprKind::Str("a".into()))),
            s(StmtKind::Expr(e(ExprKind::Assign {
                name: "x".into(),
                value: Box::new(bin(
                    BinaryOp::Add,
                    ident("x"),
                    e(ExprKind::Str("b".into())),
                )),
            }))),
        ]);
        let c = &out.c_source;
        assert!(c.contains("hml_string_append_inplace(&_main_x,"), "{}", c);
    }

    // Imports compile the module once and bind mangled globals.
    #[test]
    fn module_import_binds_mangled_globals() {
        use crate::ast::ImportBinding;
        let mut loader = MemoryLoader::new();
        loader.insert(
            "util",
            Program::new(
                "util.hml",
                vec![s(StmtKind::Export(Box::new(let_("answer", None, int(42)))))],
            ),
        );
        let program = Program::new(
            "main.hml",
            vec![
                s(StmtKind::Import {
                    spec: "util".into(),
                    binding: ImportBinding::Named(vec![("answer".into(), None)]),
                }),
                s(StmtKind::Expr(call("print", vec![ident("answer")]))),
            ],
        );
        let out = compile_with_loader(
            &program,
            &CompilerConfig::default(),
            ModuleCache::new(Box::new(loader)),
        )
        .unwrap();
        assert!(out.success());
        let c = &out.c_source;
        assert!(c.contains("static void _mod0_init(void)"), "{}", c);
        assert!(c.contains("_mod0_init();"), "{}", c);
        assert!(c.contains("_mod0_answer = "), "{}", c);
        // The import alias reads the module's global directly.
        assert!(c.contains("HmlValue _t1 = _mod0_answer;") || c.contains("= _mod0_answer;"), "{}", c);
    }

    // Switch lowers to labels with fall-through and a goto'd default.
    #[test]
    fn switch_fall_through() {
        use crate::ast::SwitchCase;
        let out = compile_src(vec![
            let_("x", None, int(1)),
            s(StmtKind::Switch {
                subject: ident("x"),
                cases: vec![
                    SwitchCase {
                        value: Some(int(1)),
                        body: vec![s(StmtKind::Expr(call(
                            "print",
                            vec![e(ExprKind::Str("one".into()))],
                        )))],
                    },
                    SwitchCase {
                        value: None,
                        body: vec![
                            s(StmtKind::Expr(call(
                                "print",
                                vec![e(ExprKind::Str("other".into()))],
                            ))),
                            s(StmtKind::Break),
                        ],
                    },
                ],
            }),
        ]);
        let c = &out.c_source;
        assert!(c.contains("hml_binary_op(HML_OP_EQ"), "{}", c);
        // Break inside the switch targets the end label.
        assert!(count_occurrences(c, "goto _L") >= 2, "{}", c);
    }

    #[test]
    fn defers_push_at_runtime_and_flush_on_return() {
        let body = vec![
            s(StmtKind::Defer {
                call: call("cleanup", vec![int(1)]),
            }),
            s(StmtKind::Return(Some(int(0)))),
        ];
        let out = compile_src(vec![
            let_("cleanup", None, e(ExprKind::Function(FunctionLit {
                params: vec![Param::required("x", None)],
                return_type: None,
                body: vec![],
                is_async: false,
            }))),
            let_(
                "f",
                None,
                e(ExprKind::Function(FunctionLit {
                    params: vec![],
                    return_type: None,
                    body,
                    is_async: false,
                })),
            ),
        ]);
        let c = &out.c_source;
        assert!(c.contains("hml_defer_push_call_with_args("), "{}", c);
        assert!(c.contains("hml_defer_execute_all();"), "{}", c);
    }

    #[test]
    fn compile_to_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.c");
        let program = Program::new(
            "main.hml",
            vec![s(StmtKind::Expr(call(
                "print",
                vec![Expr::new(ExprKind::Str("hello".into()), 1)],
            )))],
        );
        compile_to_file(&program, &CompilerConfig::default(), &path).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("#include \"hemlock_runtime.h\""));
        assert!(written.contains("hml_print("));
        assert!(written.contains("int main(int argc, char **argv)"));
    }

    #[test]
    fn failed_compile_does_not_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.c");
        let program = Program::new(
            "main.hml",
            vec![
                s(StmtKind::Const {
                    name: "x".into(),
                    ty: None,
                    value: int(1),
                }),
                s(StmtKind::Expr(e(ExprKind::Assign {
                    name: "x".into(),
                    value: Box::new(int(2)),
                }))),
            ],
        );
        let err = compile_to_file(&program, &CompilerConfig::default(), &path).unwrap_err();
        assert!(matches!(err, CompileError::Failed { errors: 1, .. }));
        assert!(!path.exists());
    }
}
