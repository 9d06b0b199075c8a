//! Compiler configuration
//!
//! `CompilerConfig` carries the switches a driver can set without touching
//! the core: optimization on/off, opt-in warnings, and extern runtime
//! functions that should be visible to the checker the same way an
//! `extern fn` declaration would make them.
//!
//! The same settings can be read from a `hemlock.toml` via serde.

use crate::types::CheckedType;
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// An extern runtime function registered by the embedding driver.
///
/// Calls to `name` type-check against `params`/`return_type` and lower to
/// a direct C call, exactly as if the program contained a matching
/// `extern fn` declaration.
#[derive(Debug, Clone)]
pub struct ExternFnDecl {
    pub name: String,
    pub params: Vec<CheckedType>,
    pub return_type: CheckedType,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompilerConfig {
    /// Master switch for the optimization passes: constant folding,
    /// unboxing, tail-call conversion, concat fusion, dead branches.
    pub optimize: bool,
    /// Warn when an identifier resolves to no binding and falls back to
    /// `any`. Off by default; noisy on duck-typed programs.
    pub warn_implicit_any: bool,
    /// Warn when a function with a non-void declared return type can fall
    /// off the end of its body.
    pub warn_missing_return: bool,
    /// Extern functions contributed by the driver (not read from TOML).
    #[serde(skip)]
    pub extern_fns: Vec<ExternFnDecl>,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            optimize: true,
            warn_implicit_any: false,
            warn_missing_return: true,
            extern_fns: Vec::new(),
        }
    }
}

impl CompilerConfig {
    pub fn new() -> Self {
        CompilerConfig::default()
    }

    /// Builder: disable the optimization passes (plain lowering only).
    pub fn without_optimizations(mut self) -> Self {
        self.optimize = false;
        self
    }

    /// Builder: register an extern runtime function.
    pub fn with_extern_fn(
        mut self,
        name: impl Into<String>,
        params: Vec<CheckedType>,
        return_type: CheckedType,
    ) -> Self {
        self.extern_fns.push(ExternFnDecl {
            name: name.into(),
            params,
            return_type,
        });
        self
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|e| format!("failed to parse compiler config: {}", e))
    }

    /// Load configuration from a `hemlock.toml` file.
    pub fn load(path: &Path) -> Result<Self, String> {
        let text = fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = CompilerConfig::default();
        assert!(cfg.optimize);
        assert!(!cfg.warn_implicit_any);
        assert!(cfg.warn_missing_return);
    }

    #[test]
    fn toml_round_trip() {
        let cfg = CompilerConfig::from_toml_str(
            "optimize = false\nwarn_implicit_any = true\n",
        )
        .unwrap();
        assert!(!cfg.optimize);
        assert!(cfg.warn_implicit_any);
        // Unset fields keep their defaults.
        assert!(cfg.warn_missing_return);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(CompilerConfig::from_toml_str("optimise = true\n").is_err());
    }

    #[test]
    fn extern_fn_builder() {
        let cfg = CompilerConfig::new().with_extern_fn(
            "host_clock",
            vec![],
            CheckedType::i64(),
        );
        assert_eq!(cfg.extern_fns.len(), 1);
        assert_eq!(cfg.extern_fns[0].name, "host_clock");
    }
}
