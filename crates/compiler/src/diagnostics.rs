//! Diagnostic accumulation for the checker and the generator
//!
//! Diagnostics never stop a pass: every error and warning is recorded and
//! the pass continues, so one run surfaces as many problems as possible.
//! The driver decides success after all passes have run, based on
//! `error_count` alone.
//!
//! The rendered shape is one line per diagnostic:
//! `path:line: error|warning: message`.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// A single reported problem.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Source file the problem was found in.
    pub path: PathBuf,
    /// 1-based line number.
    pub line: u32,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}: {}: {}",
            self.path.display(),
            self.line,
            self.severity,
            self.message
        )
    }
}

/// Accumulating sink shared by all passes of a compilation unit.
#[derive(Debug, Default)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
    error_count: usize,
    warning_count: usize,
}

impl Diagnostics {
    pub fn new() -> Self {
        Diagnostics::default()
    }

    pub fn error(&mut self, path: &Path, line: u32, message: impl Into<String>) {
        self.error_count += 1;
        self.items.push(Diagnostic {
            severity: Severity::Error,
            path: path.to_path_buf(),
            line,
            message: message.into(),
        });
    }

    pub fn warning(&mut self, path: &Path, line: u32, message: impl Into<String>) {
        self.warning_count += 1;
        self.items.push(Diagnostic {
            severity: Severity::Warning,
            path: path.to_path_buf(),
            line,
            message: message.into(),
        });
    }

    pub fn error_count(&self) -> usize {
        self.error_count
    }

    pub fn warning_count(&self) -> usize {
        self.warning_count
    }

    /// True when no errors were reported (warnings do not fail a build).
    pub fn is_clean(&self) -> bool {
        self.error_count == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    /// Absorb another sink's diagnostics (module compilation).
    pub fn merge(&mut self, other: Diagnostics) {
        self.error_count += other.error_count;
        self.warning_count += other.warning_count;
        self.items.extend(other.items);
    }

    /// Flush every diagnostic, one per line, to the given stream.
    pub fn write_to(&self, w: &mut dyn io::Write) -> io::Result<()> {
        for d in &self.items {
            writeln!(w, "{}", d)?;
        }
        Ok(())
    }

    /// Convenience: flush to standard error.
    pub fn print_stderr(&self) {
        let stderr = io::stderr();
        // Writing to stderr only fails if the stream is gone; nothing
        // useful can be reported at that point.
        let _ = self.write_to(&mut stderr.lock());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_and_formatting() {
        let mut diags = Diagnostics::new();
        let path = Path::new("main.hml");
        diags.error(path, 3, "cannot reassign const variable 'x'");
        diags.warning(path, 7, "property 'z' not defined in type 'Point'");
        assert_eq!(diags.error_count(), 1);
        assert_eq!(diags.warning_count(), 1);
        assert!(!diags.is_clean());

        let mut out = Vec::new();
        diags.write_to(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "main.hml:3: error: cannot reassign const variable 'x'\n\
             main.hml:7: warning: property 'z' not defined in type 'Point'\n"
        );
    }

    #[test]
    fn warnings_alone_stay_clean() {
        let mut diags = Diagnostics::new();
        diags.warning(Path::new("m.hml"), 1, "identifier 'x' has unknown type");
        assert!(diags.is_clean());
    }
}
