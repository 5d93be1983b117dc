//! # contract-sentinel
//!
//! Validates HTTP API contract documents (OpenAPI 3.x style) in two layers:
//! fixed structural checks, then a user-editable rule set of builtin and
//! scripted rules.

pub mod commands;
pub mod config;
pub mod document;
pub mod error;
pub mod rules;
pub mod validation;

pub use document::Document;
pub use error::{CompileError, ParseError, PredicateError, RuleSetError};
pub use rules::{Rule, RuleSet, RuleSetManager, Severity, SharedRuleSet, Violation};
pub use validation::{Report, validate, validate_document};
