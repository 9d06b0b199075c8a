//! Program assembly
//!
//! The unit lowers in three steps: the top-level statements into the
//! body of `main`, the queued closures into the implementation buffer,
//! and finally the prelude, declaration buffer, implementation buffer,
//! and `main` concatenate into one C translation unit.

use super::state::FunctionCtx;
use super::{CodeGenError, Codegen};
use crate::ast::{Program, Stmt, StmtKind};
use crate::diagnostics::Diagnostics;

impl<'cfg> Codegen<'cfg> {
    /// Lower a whole program. Call `finish` afterwards to assemble the
    /// translation unit.
    pub fn gen_program(&mut self, program: &Program) -> Result<(), CodeGenError> {
        tracing::debug!(path = %program.path.display(), "lowering program");
        // Extern declarations contributed by the driver configuration.
        for ext in &self.config.extern_fns {
            self.extern_syms.insert(ext.name.clone());
            let args: Vec<&str> = ext.params.iter().map(|_| "HmlValue").collect();
            let list = if args.is_empty() {
                "void".to_string()
            } else {
                args.join(", ")
            };
            self.decls
                .push_str(&format!("extern HmlValue {}({});\n", ext.name, list));
        }
        self.prescan_externs(&program.statements);

        let body = self.with_fresh_out(1, |cg| {
            cg.fn_stack.push(FunctionCtx {
                is_top_level: true,
                ..FunctionCtx::default()
            });
            cg.push_scope();
            cg.gen_stmts(&program.statements)?;
            cg.pop_scope();
            cg.fn_stack.pop();
            Ok(())
        })?;
        self.main_body = body;
        self.emit_queued_closures()?;
        tracing::debug!(
            temps = self.temp_counter,
            anons = self.anon_counter,
            "lowering complete"
        );
        Ok(())
    }

    /// Record extern and FFI function names before lowering, so calls
    /// ahead of the declaration route correctly.
    pub(super) fn prescan_externs(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            match &stmt.kind {
                StmtKind::ExternFn { name, .. } => {
                    self.extern_syms.insert(name.clone());
                }
                StmtKind::ImportFfi { functions, .. } => {
                    for f in functions {
                        self.ffi_fns.insert(f.name.clone());
                    }
                }
                StmtKind::Export(inner) => {
                    self.prescan_externs(std::slice::from_ref(inner));
                }
                _ => {}
            }
        }
    }

    /// Assemble the final C text and hand back the diagnostics sink.
    pub fn finish(self) -> (String, Diagnostics) {
        let mut out = String::with_capacity(
            128 + self.decls.len() + self.impls.len() + self.main_body.len(),
        );
        out.push_str("/* Generated by hemlockc. Do not edit. */\n");
        out.push_str("#include \"hemlock_runtime.h\"\n\n");
        if !self.decls.is_empty() {
            out.push_str(&self.decls);
            out.push('\n');
        }
        if !self.impls.is_empty() {
            out.push_str(&self.impls);
        }
        out.push_str("int main(int argc, char **argv) {\n");
        out.push_str("    hml_runtime_init(argc, argv);\n");
        out.push_str(&self.main_body);
        out.push_str("    hml_runtime_shutdown();\n");
        out.push_str("    return 0;\n");
        out.push_str("}\n");
        (out, self.diags)
    }
}
