//! Error taxonomy for template construction, compilation, and evaluation.
//!
//! Three failure classes exist, matching the three phases a template moves
//! through:
//!
//! - [`Error::Configuration`] — invalid options at construction time. Fatal;
//!   never retried.
//! - [`Error::Compile`] — the generated procedure body failed to compile.
//!   Surfaced from the render (or [`crate::Template::compiled`] call) that
//!   triggered compilation; never cached, so a later call may retry.
//! - [`Error::Evaluation`] — a failure raised while executing a compiled
//!   unit. Its location is translated back to the original template source
//!   before it reaches the caller; kind and message are never altered.

use std::fmt;

/// Crate-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
}

impl Error {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

/// The generated procedure body failed to compile.
///
/// `line` points at the original template source line the failing generated
/// line was derived from, offset by the template's starting line.
#[derive(Debug, Clone, thiserror::Error)]
#[error("compile error at {path}:{line}: {message}")]
pub struct CompileError {
    /// Originating template path.
    pub path: String,
    /// Translated original source line (1-based).
    pub line: u32,
    /// Compiler diagnostic.
    pub message: String,
}

/// A failure raised while executing a compiled unit.
///
/// `path` and `line` are rewritten by the error translator to point at the
/// template source construct that raised; `kind` and `message` are exactly
/// what the evaluator produced.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind} at {path}:{line}: {message}")]
pub struct EvaluationError {
    /// Failure classification.
    pub kind: EvalErrorKind,
    /// Evaluator message, untouched by location translation.
    pub message: String,
    /// Originating template path.
    pub path: String,
    /// Translated original source line (1-based).
    pub line: u32,
}

/// Classification of evaluation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalErrorKind {
    /// A bare identifier resolved to neither a bound local nor a scope method.
    UndefinedLocal,
    /// An `@attr` read found no such attribute on the scope.
    UndefinedAttribute,
    /// A signature local had no entry in the caller's locals map.
    MissingLocal,
    /// An operator was applied to operands of unsupported types.
    TypeError,
    /// `yield` was evaluated but no content block was supplied.
    NoBlock,
    /// Template code raised explicitly via `fail`.
    Raised,
}

impl fmt::Display for EvalErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::UndefinedLocal => "undefined local",
            Self::UndefinedAttribute => "undefined attribute",
            Self::MissingLocal => "missing local",
            Self::TypeError => "type error",
            Self::NoBlock => "no block",
            Self::Raised => "runtime error",
        };
        f.write_str(s)
    }
}
