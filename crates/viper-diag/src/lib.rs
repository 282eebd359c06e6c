//! Diagnostic infrastructure (C11): severity, stable error code, source
//! location, and a human message, rendered through `codespan-reporting`.
//! A single `SourceManager` maps file ids back to paths and holds the text
//! codespan needs to print a caret under the offending line. Diagnostics
//! accumulate in occurrence order; emission does not resort by severity.

use codespan_reporting::diagnostic::{Diagnostic as CsDiagnostic, Label, Severity as CsSeverity};
use codespan_reporting::files::SimpleFiles;
use codespan_reporting::term::{self, termcolor::{ColorChoice, StandardStream}};
use serde::Serialize;

/// Maps file ids (assigned on `add_file`) back to a display path and the
/// source text itself, so codespan can slice out the offending line.
#[derive(Default)]
pub struct SourceManager {
    files: SimpleFiles<String, String>,
}

impl SourceManager {
    pub fn new() -> Self {
        Self { files: SimpleFiles::new() }
    }

    pub fn add_file(&mut self, path: impl Into<String>, source: impl Into<String>) -> usize {
        self.files.add(path.into(), source.into())
    }

    pub fn files(&self) -> &SimpleFiles<String, String> {
        &self.files
    }

    /// Resolves a 1-indexed (line, column) into a byte offset within the
    /// given file, clamped to the source length. Used because IL source
    /// locations are recorded as line/column, not the byte ranges codespan
    /// natively wants.
    fn byte_offset(&self, file: usize, line: u32, column: u32) -> usize {
        let Ok(src) = self.files.source(file) else { return 0 };
        let mut offset = 0usize;
        for (i, text_line) in src.split_inclusive('\n').enumerate() {
            if i as u32 + 1 == line {
                let col = (column.saturating_sub(1)) as usize;
                return offset + col.min(text_line.len());
            }
            offset += text_line.len();
        }
        src.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Note,
    Warning,
    Error,
}

impl From<Severity> for CsSeverity {
    fn from(s: Severity) -> Self {
        match s {
            Severity::Note => CsSeverity::Note,
            Severity::Warning => CsSeverity::Warning,
            Severity::Error => CsSeverity::Error,
        }
    }
}

/// `(file id, line, column)`, mirroring `viper_il::SourceLoc` but living in
/// this crate so diagnostics don't need to depend on the IL crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Loc {
    pub file: usize,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: &'static str,
    pub message: String,
    pub loc: Option<Loc>,
    pub notes: Vec<String>,
}

impl Diagnostic {
    pub fn new(severity: Severity, code: &'static str, message: impl Into<String>) -> Self {
        Self { severity, code, message: message.into(), loc: None, notes: Vec::new() }
    }

    pub fn error(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, code, message)
    }

    pub fn warning(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, code, message)
    }

    pub fn note(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(Severity::Note, code, message)
    }

    pub fn at(mut self, loc: Loc) -> Self {
        self.loc = Some(loc);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    fn to_codespan(&self, sources: &SourceManager) -> CsDiagnostic<usize> {
        let mut diag = CsDiagnostic::new(self.severity.into())
            .with_message(&self.message)
            .with_code(self.code);
        if let Some(loc) = self.loc {
            let offset = sources.byte_offset(loc.file, loc.line, loc.column);
            diag = diag.with_labels(vec![Label::primary(loc.file, offset..offset)]);
        }
        diag = diag.with_notes(self.notes.clone());
        diag
    }
}

/// Accumulates diagnostics across a pass (verifier, parser, optimizer) so
/// callers can report everything found instead of stopping at the first
/// failure.
#[derive(Default)]
pub struct DiagnosticBag {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, d: Diagnostic) {
        self.diagnostics.push(d);
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    /// Renders every diagnostic to stderr with color, in the order they
    /// were pushed.
    pub fn emit_all(&self, sources: &SourceManager) -> Result<(), codespan_reporting::files::Error> {
        let mut writer = StandardStream::stderr(ColorChoice::Auto);
        let config = term::Config::default();
        for d in &self.diagnostics {
            term::emit(&mut writer, &config, sources.files(), &d.to_codespan(sources))?;
        }
        Ok(())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bag_reports_errors_present() {
        let mut bag = DiagnosticBag::new();
        assert!(!bag.has_errors());
        bag.push(Diagnostic::warning("W001", "unreachable block"));
        assert!(!bag.has_errors());
        bag.push(Diagnostic::error("E010", "undominated use of %q").at(Loc { file: 0, line: 3, column: 5 }));
        assert!(bag.has_errors());
        assert_eq!(bag.len(), 2);
    }

    #[test]
    fn emission_order_is_occurrence_not_severity() {
        let mut bag = DiagnosticBag::new();
        bag.push(Diagnostic::error("E001", "first"));
        bag.push(Diagnostic::note("N001", "second"));
        bag.push(Diagnostic::error("E002", "third"));
        let codes: Vec<_> = bag.iter().map(|d| d.code).collect();
        assert_eq!(codes, vec!["E001", "N001", "E002"]);
    }

    #[test]
    fn byte_offset_resolves_into_the_right_line() {
        let mut sm = SourceManager::new();
        let f = sm.add_file("m.il", "il 0.1\nfunc @main() -> i64 {\n  ret 0\n}\n");
        let off = sm.byte_offset(f, 3, 3);
        let src = sm.files().source(f).unwrap();
        assert_eq!(&src[off..off + 3], "ret");
    }

    #[test]
    fn to_json_round_trips_through_serde() {
        let mut bag = DiagnosticBag::new();
        bag.push(Diagnostic::error("E001", "boom").at(Loc { file: 0, line: 1, column: 1 }));
        let json = bag.to_json().unwrap();
        assert!(json.contains("\"E001\""));
        assert!(json.contains("\"error\""));
    }
}
