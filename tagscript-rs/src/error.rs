//! Error types for every layer of the script pipeline.
//!
//! | Type            | Raised by                                    | Policy                      |
//! |-----------------|----------------------------------------------|-----------------------------|
//! | [`ScriptError`] | lexer, block assembler, binder, compiler     | whole script is rejected    |
//! | [`TagError`]    | tag evaluation at runtime                    | fallback, else entry fault  |
//! | [`ExecError`]   | a command's `execute` / `on_block_end`       | logged, queue continues     |
//! | [`EngineError`] | the [`Engine`](crate::script::Engine) API    | returned to the embedder    |

use thiserror::Error;

// ── Compile time ──────────────────────────────────────────────────────────────

/// A compile-time failure.  Compilation is all-or-nothing: any of these
/// discards the script.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScriptError {
    /// Unbalanced quotes/braces/comments, malformed tags.
    #[error("{script}:{line}: syntax error: {message}")]
    Syntax {
        script: String,
        line: usize,
        message: String,
    },

    /// A tag chain could not be bound (unknown base or segment, bad modifier).
    #[error("{script}:{line}: tag segment {segment} ('{key}'): {message}")]
    Tag {
        script: String,
        line: usize,
        segment: usize,
        key: String,
        message: String,
    },

    /// A command rejected its entry (unknown command, argument count/type).
    #[error("{script}:{line}: command '{command}': {message}")]
    Command {
        script: String,
        line: usize,
        command: String,
        message: String,
    },
}

impl ScriptError {
    pub fn syntax(script: &str, line: usize, message: impl Into<String>) -> Self {
        ScriptError::Syntax {
            script: script.to_owned(),
            line,
            message: message.into(),
        }
    }

    pub fn command(script: &str, line: usize, command: &str, message: impl Into<String>) -> Self {
        ScriptError::Command {
            script: script.to_owned(),
            line,
            command: command.to_owned(),
            message: message.into(),
        }
    }

    /// Source line the diagnostic points at.
    pub fn line(&self) -> usize {
        match self {
            ScriptError::Syntax { line, .. }
            | ScriptError::Tag { line, .. }
            | ScriptError::Command { line, .. } => *line,
        }
    }

    /// Name of the script the diagnostic belongs to.
    pub fn script(&self) -> &str {
        match self {
            ScriptError::Syntax { script, .. }
            | ScriptError::Tag { script, .. }
            | ScriptError::Command { script, .. } => script,
        }
    }
}

// ── Runtime ───────────────────────────────────────────────────────────────────

/// Failure while evaluating a bound tag.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TagError {
    #[error("cannot convert '{value}' to {type_name}")]
    Coerce { value: String, type_name: String },

    #[error("type {type_name} has no handler '{key}'")]
    NoHandler { key: String, type_name: String },

    #[error("{0}")]
    Handler(String),

    #[error("unknown script '{0}'")]
    UnknownScript(String),

    #[error("call depth limit ({0}) exceeded")]
    CallDepth(usize),
}

/// Failure inside a command.  Caught at the per-entry dispatch boundary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecError {
    #[error(transparent)]
    Tag(#[from] TagError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Failed(String),
}

// ── Engine API ────────────────────────────────────────────────────────────────

/// Errors returned by the [`Engine`](crate::script::Engine) API.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Tag(#[from] TagError),

    #[error("unknown script '{0}'")]
    UnknownScript(String),

    #[error("unknown event '{0}'")]
    UnknownEvent(String),

    #[error("unknown type '{0}'")]
    UnknownType(String),

    #[error("event '{event}' expects {expected} value(s), got {got}")]
    EventArity {
        event: String,
        expected: usize,
        got: usize,
    },

    #[error("cannot read script {path}: {message}")]
    Read { path: String, message: String },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
