use std::fmt;

use crate::reloc::RelocType;

/// A 1-based position in assembly source. Line 0 means "unknown".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Span {
    pub line: u32,
    pub column: u32,
}

impl Span {
    #[must_use]
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }

    #[must_use]
    pub const fn is_unknown(self) -> bool {
        self.line == 0
    }

    /// Returns `self`, or `fallback` when this span carries no position.
    #[must_use]
    pub const fn or(self, fallback: Span) -> Span {
        if self.is_unknown() { fallback } else { self }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A user-facing assembler diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub span: Span,
    pub message: String,
}

impl Diagnostic {
    pub fn new(span: Span, message: impl Into<String>) -> Self {
        Self {
            span,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: error: {}", self.span, self.message)
    }
}

fn render_diagnostics(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{}", render_diagnostics(.0))]
    Assembly(Vec<Diagnostic>),

    #[error("value {value:#x} does not fit the field of {reloc}")]
    ValueOutOfRange { reloc: RelocType, value: i64 },

    #[error("target address {value:#x} for {reloc} is not word aligned")]
    MisalignedTarget { reloc: RelocType, value: i64 },

    #[error("size too large: {section} would exceed {limit:#x} bytes")]
    SectionTooLarge { section: String, limit: u64 },

    #[error("unknown relocation ({r_type}) against symbol {symbol}")]
    UnknownRelocation { r_type: u32, symbol: String },

    #[error("undefined symbol: {0}")]
    UndefinedSymbol(String),

    #[error("duplicate symbol: {0}")]
    DuplicateSymbol(String),

    #[error("entry symbol {0} is not defined")]
    MissingEntry(String),

    #[error("invalid object file: {0}")]
    InvalidObject(String),

    #[error("object read error: {0}")]
    ObjectRead(#[from] object::read::Error),

    #[error("object write error: {0}")]
    ObjectWrite(#[from] object::write::Error),

    #[error("stack frame of {function} is too large ({size} bytes)")]
    FrameTooLarge { function: String, size: u64 },

    #[error("calling convention: {0}")]
    CallingConvention(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_render_one_per_line() {
        let err = Error::Assembly(vec![
            Diagnostic::new(Span::new(1, 12), "unexpected token"),
            Diagnostic::new(Span::new(3, 1), "unrecognized instruction mnemonic"),
        ]);
        assert_eq!(
            err.to_string(),
            "1:12: error: unexpected token\n3:1: error: unrecognized instruction mnemonic"
        );
    }

    #[test]
    fn unknown_span_falls_back() {
        let fallback = Span::new(4, 2);
        assert_eq!(Span::default().or(fallback), fallback);
        assert_eq!(Span::new(1, 1).or(fallback), Span::new(1, 1));
    }
}
