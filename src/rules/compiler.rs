//! Compiler for author-supplied rule predicates.
//!
//! Predicate source is a rhai script body. The value under test is bound to
//! the constant `input` (a route string or an operation map) and the script
//! returns either a boolean or a map `#{ valid, message, suggestions }`.
//!
//! Scripts run in a restricted engine: no module imports, no `eval`, no
//! output, and hard limits on operations, call depth and value sizes.

use super::{
    InputShape, Predicate, PredicateInput, PredicateOutcome, Rule, RuleType, Severity, check_shape,
};
use crate::error::{CompileError, PredicateError};
use rhai::module_resolvers::DummyModuleResolver;
use rhai::{AST, Dynamic, Engine, EvalAltResult, Scope};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Name the predicate input is bound to inside scripts.
pub const INPUT_VARIABLE: &str = "input";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct SandboxLimits {
    pub max_operations: u64,
    pub max_call_levels: usize,
    pub max_expr_depth: usize,
    pub max_function_expr_depth: usize,
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            max_operations: 100_000,
            max_call_levels: 32,
            max_expr_depth: 64,
            max_function_expr_depth: 32,
            max_string_size: 16_384,
            max_array_size: 4_096,
            max_map_size: 4_096,
        }
    }
}

/// Restricted script engine shared by every predicate compiled from it.
pub struct Sandbox {
    engine: Engine,
    limits: SandboxLimits,
}

impl Sandbox {
    pub fn new(limits: SandboxLimits) -> Self {
        let mut engine = Engine::new();
        engine
            .set_max_operations(limits.max_operations)
            .set_max_call_levels(limits.max_call_levels)
            .set_max_expr_depths(limits.max_expr_depth, limits.max_function_expr_depth)
            .set_max_string_size(limits.max_string_size)
            .set_max_array_size(limits.max_array_size)
            .set_max_map_size(limits.max_map_size)
            .set_max_modules(0)
            .set_module_resolver(DummyModuleResolver::new());
        engine.disable_symbol("eval");
        engine.on_print(|_| {});
        engine.on_debug(|_, _, _| {});

        Self { engine, limits }
    }

    pub fn limits(&self) -> &SandboxLimits {
        &self.limits
    }

    fn compile(&self, rule: &str, source: &str) -> Result<AST, CompileError> {
        if source.trim().is_empty() {
            return Err(CompileError {
                rule: rule.to_string(),
                message: "predicate source is empty".to_string(),
                line: None,
            });
        }
        self.engine.compile(source).map_err(|err| CompileError {
            rule: rule.to_string(),
            message: err.to_string(),
            line: err.position().line(),
        })
    }

    fn run(
        &self,
        ast: &AST,
        input: PredicateInput<'_>,
    ) -> Result<PredicateOutcome, PredicateError> {
        let value = match input {
            PredicateInput::Route(route) => Dynamic::from(route.to_string()),
            PredicateInput::Operation(op) => {
                rhai::serde::to_dynamic(op).map_err(|e| PredicateError::Runtime(e.to_string()))?
            }
        };

        let mut scope = Scope::new();
        scope.push_constant(INPUT_VARIABLE, value);

        let result = self
            .engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, ast)
            .map_err(|err| match *err {
                EvalAltResult::ErrorTooManyOperations(_) => PredicateError::BudgetExhausted {
                    limit: self.limits.max_operations,
                },
                other => PredicateError::Runtime(other.to_string()),
            })?;

        outcome_from_dynamic(result)
    }
}

impl fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sandbox").field("limits", &self.limits).finish()
    }
}

fn outcome_from_dynamic(result: Dynamic) -> Result<PredicateOutcome, PredicateError> {
    if let Ok(valid) = result.as_bool() {
        return Ok(PredicateOutcome {
            valid,
            ..PredicateOutcome::default()
        });
    }
    if result.is_map() {
        return rhai::serde::from_dynamic::<PredicateOutcome>(&result)
            .map_err(|e| PredicateError::BadReturn(e.to_string()));
    }
    Err(PredicateError::BadReturn(format!(
        "expected a bool or a map with `valid`, got {}",
        result.type_name()
    )))
}

/// A predicate compiled from source, together with the engine that runs it.
#[derive(Clone)]
pub struct CompiledScript {
    source: String,
    ast: Arc<AST>,
    sandbox: Arc<Sandbox>,
}

impl CompiledScript {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn run(&self, input: PredicateInput<'_>) -> Result<PredicateOutcome, PredicateError> {
        self.sandbox.run(&self.ast, input)
    }
}

impl fmt::Debug for CompiledScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledScript")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

/// Everything needed to author a custom rule.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CustomRuleDraft {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub rule_type: RuleType,
    pub severity: Severity,
    /// Required for `custom` rules; other types imply their input.
    #[serde(default)]
    pub input: Option<InputShape>,
    pub source: String,
}

#[derive(Clone, Debug)]
pub struct RuleCompiler {
    sandbox: Arc<Sandbox>,
}

impl RuleCompiler {
    pub fn new(limits: SandboxLimits) -> Self {
        Self {
            sandbox: Arc::new(Sandbox::new(limits)),
        }
    }

    pub fn limits(&self) -> &SandboxLimits {
        self.sandbox.limits()
    }

    /// Compiles the draft's source into a ready-to-add rule.
    pub fn compile(&self, draft: CustomRuleDraft) -> Result<Rule, CompileError> {
        let input = match (draft.rule_type.fixed_input(), draft.input) {
            (Some(fixed), None) => fixed,
            (_, Some(declared)) => declared,
            (None, None) => {
                return Err(CompileError {
                    rule: draft.id,
                    message: "custom rules must declare an input shape (route or operation)"
                        .to_string(),
                    line: None,
                });
            }
        };
        if let Err(err) = check_shape(&draft.id, draft.rule_type, input) {
            return Err(CompileError {
                rule: draft.id,
                message: err.to_string(),
                line: None,
            });
        }

        let ast = self.sandbox.compile(&draft.id, &draft.source)?;
        tracing::debug!(rule = %draft.id, %input, "compiled custom predicate");

        Ok(Rule {
            id: draft.id,
            name: draft.name,
            description: draft.description,
            rule_type: draft.rule_type,
            severity: draft.severity,
            group: None,
            enabled: true,
            input,
            predicate: Predicate::Custom(CompiledScript {
                source: draft.source,
                ast: Arc::new(ast),
                sandbox: Arc::clone(&self.sandbox),
            }),
        })
    }
}

impl Default for RuleCompiler {
    fn default() -> Self {
        Self::new(SandboxLimits::default())
    }
}
