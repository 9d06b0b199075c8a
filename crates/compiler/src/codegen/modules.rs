//! Module emission and import binding
//!
//! The first import of a path compiles the module: its program is
//! type-checked against its own registry, its top-level statements lower
//! into a guarded `_mod<n>_init()` function, and its top-level bindings
//! become `_mod<n>_`-prefixed globals. Subsequent imports reuse the
//! cached result; re-entering a module that is still being lowered is a
//! circular import and reported as an error.
//!
//! At the import site the init call is emitted, then the requested names
//! bind: a namespace object, every export (star), or a named list with
//! aliases. Named and star bindings are compile-time aliases to the
//! mangled globals; only the namespace form materializes a value.

use super::state::{emit, FunctionCtx, ModuleEmitCtx, VarSlot};
use super::{CodeGenError, Codegen};
use crate::ast::ImportBinding;
use crate::modules::{EmitState, ExportedSymbol};
use crate::typechecker::TypeChecker;
use crate::types::CheckedType;

impl<'cfg> Codegen<'cfg> {
    pub(super) fn gen_import(
        &mut self,
        spec: &str,
        binding: &ImportBinding,
        line: u32,
    ) -> Result<(), CodeGenError> {
        let importer = self.path.clone();
        let id = match self.cache.analyze(&importer, spec) {
            Ok(id) => id,
            // The checker already reported the failure; do not bind.
            Err(_) => return Ok(()),
        };
        self.ensure_module_emitted(id, line)?;
        emit!(self, "_mod{}_init();", id)?;

        let exports: Vec<ExportedSymbol> = self.cache.exports(id).to_vec();
        match binding {
            ImportBinding::Namespace(name) => {
                let t = self.fresh_temp();
                emit!(self, "HmlValue {} = hml_val_object();", t)?;
                for e in &exports {
                    emit!(
                        self,
                        "hml_object_set_field({}, \"{}\", {});",
                        t,
                        e.name,
                        e.mangled
                    )?;
                }
                self.bind_value(name, t)?;
            }
            ImportBinding::Star => {
                for e in exports {
                    self.bind_slot(
                        &e.name,
                        VarSlot::Global {
                            c_name: e.mangled.clone(),
                        },
                        e.ty.clone(),
                    );
                }
            }
            ImportBinding::Named(names) => {
                for (name, alias) in names {
                    let Some(e) = exports.iter().find(|e| &e.name == name) else {
                        continue;
                    };
                    let local = alias.as_deref().unwrap_or(name);
                    self.bind_slot(
                        local,
                        VarSlot::Global {
                            c_name: e.mangled.clone(),
                        },
                        e.ty.clone(),
                    );
                }
            }
        }
        Ok(())
    }

    /// Bind a freshly produced value under `name`, as a global at unit
    /// top level or as a C local otherwise.
    fn bind_value(&mut self, name: &str, temp: String) -> Result<(), CodeGenError> {
        let top_level = self.current_fn_ref().is_top_level && self.block_depth == 0;
        if top_level {
            let c_name = format!(
                "{}{}",
                self.unit_prefix(),
                super::state::sanitize_ident(name)
            );
            self.decls.push_str(&format!("static HmlValue {};\n", c_name));
            emit!(self, "{} = {};", c_name, temp)?;
            self.bind_slot(name, VarSlot::Global { c_name }, CheckedType::object());
        } else {
            let c_name = self.local_c_name(name);
            emit!(self, "HmlValue {} = {};", c_name, temp)?;
            self.bind_slot(name, VarSlot::Local { c_name }, CheckedType::object());
        }
        Ok(())
    }

    /// Compile a module once: type check, lower its top level into the
    /// guarded init function, and mark it done.
    fn ensure_module_emitted(&mut self, id: usize, line: u32) -> Result<(), CodeGenError> {
        match self.cache.emit_state(id) {
            EmitState::Done => return Ok(()),
            EmitState::InProgress => {
                let path = self.path.clone();
                self.diags.error(
                    &path,
                    line,
                    format!(
                        "circular import of module '{}'",
                        self.cache.path(id).display()
                    ),
                );
                return Ok(());
            }
            EmitState::NotStarted => {}
        }
        self.cache.set_emit_state(id, EmitState::InProgress);

        let program = self.cache.program(id);
        let prefix = self.cache.prefix(id).to_string();
        tracing::debug!(module = %program.path.display(), id, "compiling module");

        // The module checks against its own registry; its diagnostics
        // join the unit's sink.
        let mut checker = TypeChecker::new(program.path.clone(), self.config);
        checker.check_program(&program.statements, &mut self.cache);
        let (module_registry, module_diags) = checker.into_parts();
        self.diags.merge(module_diags);

        let saved_registry = std::mem::replace(&mut self.registry, module_registry);
        let saved_path = std::mem::replace(&mut self.path, program.path.clone());
        let saved_direct = std::mem::take(&mut self.direct_fns);
        let saved_depth = std::mem::take(&mut self.block_depth);
        self.prescan_externs(&program.statements);

        let guard = format!("_mod{}_inited", id);
        self.decls.push_str(&format!("static int {} = 0;\n", guard));
        self.decls
            .push_str(&format!("static void _mod{}_init(void);\n", id));

        let exports: std::collections::HashSet<String> = self
            .cache
            .exports(id)
            .iter()
            .map(|e| e.name.clone())
            .collect();
        let body = self.with_fresh_out(1, |cg| {
            cg.fn_stack.push(FunctionCtx {
                is_top_level: true,
                module: Some(ModuleEmitCtx {
                    id,
                    prefix: prefix.clone(),
                    exports,
                }),
                ..FunctionCtx::default()
            });
            cg.push_scope();
            emit!(cg, "if ({}) return;", guard)?;
            emit!(cg, "{} = 1;", guard)?;
            cg.gen_stmts(&program.statements)?;
            cg.pop_scope();
            cg.fn_stack.pop();
            Ok(())
        })?;

        self.impls
            .push_str(&format!("static void _mod{}_init(void) {{\n", id));
        self.impls.push_str(&body);
        self.impls.push_str("}\n\n");

        self.block_depth = saved_depth;
        self.direct_fns = saved_direct;
        self.path = saved_path;
        self.registry = saved_registry;
        self.cache.set_emit_state(id, EmitState::Done);
        Ok(())
    }
}
