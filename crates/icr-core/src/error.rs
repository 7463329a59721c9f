//! Compile diagnostics surfaced by the external compiler collaborators.

use thiserror::Error;

use crate::node::Loc;

/// Error produced while parsing, normalizing, or semantically checking a
/// program fragment. The interpreter reports these; only the pry REPL
/// recovers from them.
#[derive(Clone, Debug, Error)]
pub enum CompileError {
    #[error("syntax error: {message}")]
    Syntax { message: String },

    #[error("semantic error at {loc}: {message}")]
    Semantic { loc: Loc, message: String },

    #[error("unsupported construct: {message}")]
    Unsupported { message: String },
}

impl CompileError {
    pub fn syntax(message: impl Into<String>) -> Self {
        CompileError::Syntax {
            message: message.into(),
        }
    }

    pub fn semantic(loc: Loc, message: impl Into<String>) -> Self {
        CompileError::Semantic {
            loc,
            message: message.into(),
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        CompileError::Unsupported {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        let err = CompileError::syntax("unexpected token");
        assert_eq!(err.to_string(), "syntax error: unexpected token");

        let err = CompileError::semantic(Loc::new("repl.cr", 2, 5), "undefined variable 'q'");
        assert_eq!(
            err.to_string(),
            "semantic error at repl.cr:2:5: undefined variable 'q'"
        );
    }
}
