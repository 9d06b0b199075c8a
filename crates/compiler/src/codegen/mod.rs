//! C code generation
//!
//! This module lowers the checked AST to portable C source operating on
//! the runtime's tagged `HmlValue` type. The emission is split into
//! focused submodules:
//!
//! - `state.rs`: the `Codegen` context (buffers, counters, scopes,
//!   function contexts, closure queue) and name mangling
//! - `program.rs`: whole-unit driver and final assembly
//! - `expressions.rs`: expression lowering and fast paths
//! - `statements.rs`: statement lowering, control flow, returns
//! - `closures.rs`: capture analysis, deferred closure emission,
//!   shared environments
//! - `modules.rs`: module init emission and import binding
//! - `runtime.rs`: runtime ABI name tables and literal formatting
//! - `error.rs`: error types
//!
//! # Value discipline
//!
//! Every tagged-value expression lowers to a fresh `_t<N>` temporary,
//! owned by the emitter that created it: consumers release with
//! `hml_release_if_needed` (a no-op for primitives), while `let`
//! bindings and `return` transfer ownership. Assignments release the old
//! binding before installing the new value.
//!
//! # Naming
//!
//! Top-level variables of the main unit mangle to `_main_<name>`;
//! module exports to `_mod<n>_<name>`. Locals are sanitized against C
//! keywords, with same-scope shadows renamed. Anonymous functions are
//! `_anon_<n>`, labels `_L<n>`; both counters are monotonic within a
//! compilation unit.

mod closures;
mod error;
mod expressions;
mod modules;
mod program;
mod runtime;
mod state;
mod statements;

pub use error::CodeGenError;
pub use state::Codegen;
