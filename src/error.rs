//! Errors and diagnostics.
//!
//! Every problem found in the input is a [`DefinitionError`]; it is reported to the
//! caller as a [`Diagnostic`] attributed to the definition file (and line) it came
//! from. Nothing here aborts the process.

use crate::bit_length_set::LengthOverflow;
use std::fmt;
use std::path::{Path, PathBuf};

/// Grammar-level failure, with the 1-based line it was detected on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        ParseError {
            line,
            message: message.into(),
        }
    }
}

/// Failure to evaluate a constant expression; names the offending sub-expression.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} (in `{expression}`)")]
pub struct EvaluationError {
    pub message: String,
    pub expression: String,
}

impl EvaluationError {
    pub fn new(message: impl Into<String>, expression: impl fmt::Display) -> Self {
        EvaluationError {
            message: message.into(),
            expression: expression.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DefinitionError {
    #[error("{0}")]
    Syntax(String),
    #[error("{0}")]
    Evaluation(#[from] EvaluationError),
    #[error("{0}")]
    Lookup(String),
    #[error("cyclic dependency: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),
    #[error("{0}")]
    AmbiguousDefinition(String),
    #[error("{0}")]
    ExtentViolation(String),
    #[error("{0}")]
    Compatibility(String),
    #[error("{0}")]
    AttributeCollision(String),
    #[error("{0}")]
    PortIdRange(String),
    #[error("{0}")]
    AssertionFailure(String),
    #[error("{0}")]
    DeprecatedUsage(String),
    #[error("{0}")]
    Io(String),
}

impl From<ParseError> for DefinitionError {
    fn from(e: ParseError) -> Self {
        DefinitionError::Syntax(e.message)
    }
}

impl From<LengthOverflow> for DefinitionError {
    fn from(e: LengthOverflow) -> Self {
        DefinitionError::ExtentViolation(e.to_string())
    }
}

impl DefinitionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DefinitionError::Syntax(_) => ErrorKind::Syntax,
            DefinitionError::Evaluation(_) => ErrorKind::Evaluation,
            DefinitionError::Lookup(_) => ErrorKind::Lookup,
            DefinitionError::CyclicDependency(_) => ErrorKind::CyclicDependency,
            DefinitionError::AmbiguousDefinition(_) => ErrorKind::AmbiguousDefinition,
            DefinitionError::ExtentViolation(_) => ErrorKind::ExtentViolation,
            DefinitionError::Compatibility(_) => ErrorKind::Compatibility,
            DefinitionError::AttributeCollision(_) => ErrorKind::AttributeCollision,
            DefinitionError::PortIdRange(_) => ErrorKind::PortIdRange,
            DefinitionError::AssertionFailure(_) => ErrorKind::AssertionFailure,
            DefinitionError::DeprecatedUsage(_) => ErrorKind::DeprecatedUsage,
            DefinitionError::Io(_) => ErrorKind::Io,
        }
    }
}

/// Identifies which check produced a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Syntax,
    Evaluation,
    Lookup,
    CyclicDependency,
    AmbiguousDefinition,
    ExtentViolation,
    Compatibility,
    AttributeCollision,
    PortIdRange,
    AssertionFailure,
    DeprecatedUsage,
    Io,
}

impl ErrorKind {
    pub fn id(self) -> &'static str {
        match self {
            ErrorKind::Syntax => "syntax",
            ErrorKind::Evaluation => "evaluation",
            ErrorKind::Lookup => "lookup",
            ErrorKind::CyclicDependency => "cyclic-dependency",
            ErrorKind::AmbiguousDefinition => "ambiguous-definition",
            ErrorKind::ExtentViolation => "extent-violation",
            ErrorKind::Compatibility => "compatibility",
            ErrorKind::AttributeCollision => "attribute-collision",
            ErrorKind::PortIdRange => "port-id-range",
            ErrorKind::AssertionFailure => "assertion-failure",
            ErrorKind::DeprecatedUsage => "deprecated-usage",
            ErrorKind::Io => "io",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// Where a diagnostic points: a definition file and, when known, a line in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    pub path: PathBuf,
    pub line: Option<usize>,
}

impl Locator {
    pub fn file(path: impl AsRef<Path>) -> Self {
        Locator {
            path: path.as_ref().to_path_buf(),
            line: None,
        }
    }

    pub fn at(path: impl AsRef<Path>, line: usize) -> Self {
        Locator {
            path: path.as_ref().to_path_buf(),
            line: Some(line),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}:{}", self.path.display(), line),
            None => write!(f, "{}", self.path.display()),
        }
    }
}

/// A single reported problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub locator: Locator,
    pub severity: Severity,
    pub error: DefinitionError,
}

impl Diagnostic {
    pub fn error(locator: Locator, error: DefinitionError) -> Self {
        Diagnostic {
            locator,
            severity: Severity::Error,
            error,
        }
    }

    pub fn warning(locator: Locator, error: DefinitionError) -> Self {
        Diagnostic {
            locator,
            severity: Severity::Warning,
            error,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(
            f,
            "{}: {}: {} [{}]",
            self.locator,
            severity,
            self.error,
            self.kind().id()
        )
    }
}
