//! DH-003: Error taxonomy for loading and running recipes.

use std::fmt;
use std::io;

/// A single validation finding against a recipe document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Every failure a load or run can surface.
#[derive(Debug)]
pub enum RecipeError {
    /// The recipe document is malformed or violates the schema.
    /// Raised before any step runs.
    Validation(Vec<ValidationError>),

    /// A referenced container does not exist in the runtime.
    NotFound { container: String },

    /// The runtime refused or failed an operation.
    Runtime(String),

    /// Reading exec output or writing the archive failed.
    Io { context: String, source: io::Error },

    /// A failure raised while running step `index` (1-based).
    Step {
        index: usize,
        step: String,
        source: Box<RecipeError>,
    },
}

impl RecipeError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(vec![ValidationError::new(message)])
    }

    /// Short stable label for the failure class, looking through step wrappers.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound { .. } => "not_found",
            Self::Runtime(_) => "runtime",
            Self::Io { .. } => "io",
            Self::Step { source, .. } => source.kind(),
        }
    }

    /// Validation findings, if this is a validation failure.
    pub fn findings(&self) -> &[ValidationError] {
        match self {
            Self::Validation(errors) => errors,
            _ => &[],
        }
    }
}

impl fmt::Display for RecipeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(errors) if errors.len() == 1 => {
                write!(f, "invalid recipe: {}", errors[0])
            }
            Self::Validation(errors) => write!(f, "{} validation error(s)", errors.len()),
            Self::NotFound { container } => write!(f, "no such container: {}", container),
            Self::Runtime(msg) => write!(f, "{}", msg),
            Self::Io { context, source } => write!(f, "{}: {}", context, source),
            Self::Step {
                index,
                step,
                source,
            } => write!(f, "step {} ({}) failed: {}", index, step, source),
        }
    }
}

impl std::error::Error for RecipeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Step { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}
