use crate::rules::{InputShape, RuleType};
use thiserror::Error;

/// The contract source text could not be turned into a document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ParseError {
    pub message: String,
    pub line: Option<usize>,
}

impl ParseError {
    pub fn new(message: impl Into<String>, line: Option<usize>) -> Self {
        Self {
            message: message.into(),
            line,
        }
    }
}

/// A custom rule could not be built from its predicate source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("rule '{rule}' failed to compile: {message}")]
pub struct CompileError {
    pub rule: String,
    pub message: String,
    pub line: Option<usize>,
}

/// Failure raised while a predicate runs against one input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PredicateError {
    #[error("script error: {0}")]
    Runtime(String),

    #[error("operation budget of {limit} exhausted")]
    BudgetExhausted { limit: u64 },

    #[error("unexpected return value: {0}")]
    BadReturn(String),

    #[error("unknown builtin predicate '{0}'")]
    UnknownBuiltin(String),

    #[error("predicate expects {expected} input")]
    WrongInput { expected: InputShape },
}

#[derive(Debug, Error)]
pub enum RuleSetError {
    #[error("rule '{0}' already exists")]
    DuplicateRule(String),

    #[error("rule '{0}' not found")]
    UnknownRule(String),

    #[error("group '{0}' already exists")]
    DuplicateGroup(String),

    #[error("group '{0}' not found")]
    UnknownGroup(String),

    #[error("unknown builtin predicate '{0}'")]
    UnknownBuiltin(String),

    #[error("unknown rule template '{0}'")]
    UnknownTemplate(String),

    #[error("rule '{rule}' of type {rule_type} cannot take {input} input")]
    ShapeMismatch {
        rule: String,
        rule_type: RuleType,
        input: InputShape,
    },

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("rule set file {path}: {message}")]
    Exchange { path: String, message: String },
}
