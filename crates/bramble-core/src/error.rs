use thiserror::Error;

/// Broad classification of render errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MalformedAttachment,
    TypeMismatch,
    RecursionLimit,
    EvaluationContext,
    InternalInconsistency,
    Macro,
}

impl ErrorKind {
    /// The name written to the `kind` attribute of a rendered error
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::MalformedAttachment => "malformed-attachment",
            ErrorKind::TypeMismatch => "type-mismatch",
            ErrorKind::RecursionLimit => "recursion-limit",
            ErrorKind::EvaluationContext => "evaluation-context",
            ErrorKind::InternalInconsistency => "internal-inconsistency",
            ErrorKind::Macro => "macro",
        }
    }
}

/// An error produced while rendering.
///
/// Render errors are values: the engine renders them in place of the node
/// that produced them and carries on with the rest of the document.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    #[error("{message}")]
    MalformedAttachment { message: String },

    #[error("{operation} needs {expected}, but was given {actual}")]
    TypeMismatch {
        operation: String,
        expected: String,
        actual: String,
    },

    #[error("Rendering nested {depth} levels deep; this is probably infinite recursion")]
    RecursionLimit { depth: usize },

    #[error("{construct} can't be used in {reason}")]
    EvaluationContext { construct: String, reason: String },

    #[error("Internal inconsistency: {message}")]
    InternalInconsistency { message: String },

    #[error("There's no macro named ({name}:)")]
    UnknownMacro { name: String },

    #[error("There's no temp variable named _{name}")]
    UnknownVariable { name: String },

    #[error("({name}:) {message}")]
    Macro { name: String, message: String },

    #[error("There is no region to render into")]
    NoTarget,
}

impl RenderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RenderError::MalformedAttachment { .. } => ErrorKind::MalformedAttachment,
            RenderError::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            RenderError::RecursionLimit { .. } => ErrorKind::RecursionLimit,
            RenderError::EvaluationContext { .. } => ErrorKind::EvaluationContext,
            RenderError::InternalInconsistency { .. } => ErrorKind::InternalInconsistency,
            RenderError::UnknownMacro { .. }
            | RenderError::UnknownVariable { .. }
            | RenderError::Macro { .. } => ErrorKind::Macro,
            RenderError::NoTarget => ErrorKind::MalformedAttachment,
        }
    }

    /// Fatal to the current render (still only replaces the local node)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::RecursionLimit | ErrorKind::InternalInconsistency
        )
    }

    /// Create a malformed attachment error
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedAttachment {
            message: message.into(),
        }
    }

    /// Create a type mismatch error
    pub fn type_mismatch(operation: &str, expected: &str, actual: &str) -> Self {
        Self::TypeMismatch {
            operation: operation.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Create an evaluation context error
    pub fn evaluation_context(construct: &str, reason: &str) -> Self {
        Self::EvaluationContext {
            construct: construct.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create an internal inconsistency error
    pub fn impossible(message: impl Into<String>) -> Self {
        Self::InternalInconsistency {
            message: message.into(),
        }
    }

    /// Create an error raised by a macro body
    pub fn in_macro(name: &str, message: impl Into<String>) -> Self {
        Self::Macro {
            name: name.to_string(),
            message: message.into(),
        }
    }
}
