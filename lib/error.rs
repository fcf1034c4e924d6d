use crate::events::InstanceId;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScriptError {
    #[error("lex error at line {line}, column {column}: {message}")]
    Lex {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("syntax error at line {line}, column {column}: {message}")]
    Syntax {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("empty expression at line {line}")]
    EmptyExpression { line: usize },

    #[error("type mismatch in statement {statement} (line {line}): {message}")]
    TypeMismatch {
        statement: usize,
        line: usize,
        message: String,
    },

    #[error("runtime error in statement {statement} (line {line}): {message}")]
    Runtime {
        statement: usize,
        line: usize,
        message: String,
    },

    #[error("function `{0}` is already registered")]
    DuplicateName(String),

    #[error("event `{event}` exceeded the recursion depth limit of {limit}")]
    EventRecursion { event: String, limit: usize },

    #[error("unknown instance {0}")]
    UnknownInstance(InstanceId),

    #[error("code block `{0}` is already registered")]
    DuplicateCodeBlock(String),

    #[error("unknown code block `{0}`")]
    UnknownCodeBlock(String),
}

impl ScriptError {
    pub fn is_compile_error(&self) -> bool {
        matches!(
            self,
            ScriptError::Lex { .. }
                | ScriptError::Syntax { .. }
                | ScriptError::EmptyExpression { .. }
        )
    }

    /// Re-tag a compile error with the source line it was found on.
    pub(crate) fn at_line(self, at: usize) -> Self {
        match self {
            ScriptError::Lex {
                column, message, ..
            } => ScriptError::Lex {
                line: at,
                column,
                message,
            },
            ScriptError::Syntax {
                column, message, ..
            } => ScriptError::Syntax {
                line: at,
                column,
                message,
            },
            ScriptError::EmptyExpression { .. } => ScriptError::EmptyExpression { line: at },
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, ScriptError>;
