//! Error and warning taxonomy. Hard errors abort the pipeline
//! and are returned via `Result`; soft warnings accumulate in a
//! `Diagnostics` buffer threaded through a context struct.
//!
//! Follows the pack convention of deriving `std::error::Error` with
//! `thiserror` rather than hand-writing `Display` impls, the way `fuel-vm`
//! models its runtime error enum.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Source location, 1-indexed, attached to every diagnostic that can be
/// traced back to a specific span of source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Span {
    pub line: u32,
    pub column: u32,
}

impl Span {
    pub fn new(line: u32, column: u32) -> Span {
        Span { line, column }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Error)]
pub enum LexError {
    #[error("unexpected character '{ch}' at {span}")]
    UnexpectedChar { ch: char, span: Span },
    #[error("unterminated token at {span}")]
    Unterminated { span: Span },
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("{span}: expected {expected}, found {found}")]
    UnexpectedToken { found: String, expected: String, span: Span },
    #[error("unexpected end of input, expected {expected}")]
    UnexpectedEof { expected: String },
    #[error(transparent)]
    Lex(#[from] LexError),
}

impl ParseError {
    pub fn span(&self) -> Option<Span> {
        match self {
            ParseError::UnexpectedToken { span, .. } => Some(*span),
            ParseError::UnexpectedEof { .. } => None,
            ParseError::Lex(LexError::UnexpectedChar { span, .. }) => Some(*span),
            ParseError::Lex(LexError::Unterminated { span }) => Some(*span),
        }
    }
}

#[derive(Debug, Error)]
pub enum SemanticError {
    #[error("{span}: unknown identifier '{path}'")]
    UnknownIdentifier { path: String, span: Span },
    #[error("{span}: '{path}' is not writable")]
    NotWritable { path: String, span: Span },
    #[error("{span}: duplicate declaration of '{name}'")]
    DuplicateDeclaration { name: String, span: Span },
    #[error("{span}: '{name}' is immutable and cannot be reassigned")]
    ImmutableReassignment { name: String, span: Span },
    #[error("{span}: initializer for '{name}' is not a compile-time constant")]
    NonConstInitializer { name: String, span: Span },
    #[error("{span}: cyclic constant reference involving '{name}'")]
    CyclicConstant { name: String, span: Span },
    #[error("{span}: register index {index} is out of range 0..=7")]
    RegisterIndexOutOfRange { index: i64, span: Span },
    #[error("{span}: value {value} for '{path}' is outside declared range [{min}, {max}]")]
    OutOfRange { path: String, value: i64, min: i64, max: i64, span: Span },
}

impl SemanticError {
    pub fn span(&self) -> Span {
        match self {
            SemanticError::UnknownIdentifier { span, .. }
            | SemanticError::NotWritable { span, .. }
            | SemanticError::DuplicateDeclaration { span, .. }
            | SemanticError::ImmutableReassignment { span, .. }
            | SemanticError::NonConstInitializer { span, .. }
            | SemanticError::CyclicConstant { span, .. }
            | SemanticError::RegisterIndexOutOfRange { span, .. }
            | SemanticError::OutOfRange { span, .. } => *span,
        }
    }
}

#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("no available register for '{name}': all 8 slots are in use")]
    RegisterExhausted { name: String },
}

#[derive(Debug, Error)]
pub enum CodegenError {
    #[error("rule table overflow: slot {slot} exceeds the {cap}-slot capacity while emitting '{statement}'")]
    TableOverflow { slot: usize, cap: usize, statement: String },
    #[error("'{construct}' requires a literal duration/threshold, but the argument is a computed expression")]
    NonLiteralArgument { construct: String },
    #[error("'{construct}' expects {expected} argument(s), found {found}")]
    Arity { construct: String, expected: usize, found: usize },
    #[error("'{target}' cannot be used with a compound assignment operator; it has no readable current value")]
    UnsupportedCompoundTarget { target: String },
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Semantic(#[from] SemanticError),
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    #[error(transparent)]
    Codegen(#[from] CodegenError),
}

impl CompileError {
    pub fn span(&self) -> Option<Span> {
        match self {
            CompileError::Parse(e) => e.span(),
            CompileError::Semantic(e) => Some(e.span()),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum DecompileError {
    #[error("rule table has {count} records; the device cap is {cap}")]
    TooManyRecords { count: usize, cap: usize },
}

/// Non-fatal conditions accumulated while compiling or decompiling
/// soft, non-fatal warnings.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub message: String,
    pub span: Option<Span>,
}

impl Diagnostic {
    pub fn new(message: impl Into<String>) -> Diagnostic {
        Diagnostic { message: message.into(), span: None }
    }

    pub fn at(message: impl Into<String>, span: Span) -> Diagnostic {
        Diagnostic { message: message.into(), span: Some(span) }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.span {
            Some(span) => write!(f, "{}: {}", span, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Append-only buffer of warnings, shared by every stage past the parser.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    warnings: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Diagnostics {
        Diagnostics::default()
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let d = Diagnostic::new(message);
        tracing::warn!(message = %d, "diagnostic");
        self.warnings.push(d);
    }

    pub fn warn_at(&mut self, message: impl Into<String>, span: Span) {
        let d = Diagnostic::at(message, span);
        tracing::warn!(message = %d, "diagnostic");
        self.warnings.push(d);
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.warnings
    }

    pub fn as_strings(&self) -> Vec<String> {
        self.warnings.iter().map(|d| d.to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }
}
