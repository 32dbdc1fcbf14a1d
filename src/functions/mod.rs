//! Function abstraction and per-agent registry
//!
//! Every operation an agent can perform is a named [`AgentFunction`] with a
//! declared schema. The registry validates parameters against the schema
//! before dispatch and guarantees that nothing escapes the dispatch boundary
//! as a panic: callers always receive a [`FunctionResult`].

pub mod builtin;
pub mod providers;

use crate::data::{AgentData, AgentDataValue, FunctionResult};
use crate::domain_types::AgentId;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Semantic type of a declared function parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    /// UTF-8 string
    String,
    /// Signed integer
    Int,
    /// Floating-point number (accepts integers)
    Float,
    /// Boolean
    Bool,
    /// Array of strings
    Array,
    /// Nested object
    Object,
}

impl ParameterType {
    /// Whether a concrete value satisfies this semantic type
    ///
    /// Integers satisfy `Float` parameters; no other coercion is applied.
    pub fn matches(self, value: &AgentDataValue) -> bool {
        matches!(
            (self, value),
            (Self::String, AgentDataValue::String(_))
                | (Self::Int, AgentDataValue::Int(_))
                | (Self::Float, AgentDataValue::Float(_) | AgentDataValue::Int(_))
                | (Self::Bool, AgentDataValue::Bool(_))
                | (Self::Array, AgentDataValue::Array(_))
                | (Self::Object, AgentDataValue::Object(_))
        )
    }
}

/// Declared parameter of a function schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Parameter name
    pub name: String,
    /// Semantic type the supplied value must carry
    pub param_type: ParameterType,
    /// Whether the parameter must be present
    pub required: bool,
    /// Value substituted when an optional parameter is absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<AgentDataValue>,
    /// Closed set of allowed string values, when constrained
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<String>>,
}

/// Schema describing a function's name, category, and parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionSchema {
    /// Function name
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// Grouping tag (arithmetic, text, retrieval, ...)
    pub category: String,
    /// Ordered parameter list
    pub parameters: Vec<ParameterSpec>,
}

impl FunctionSchema {
    /// Creates a schema with no parameters
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            category: category.into(),
            parameters: Vec::new(),
        }
    }

    /// Appends a required parameter
    #[must_use]
    pub fn required(mut self, name: impl Into<String>, param_type: ParameterType) -> Self {
        self.parameters.push(ParameterSpec {
            name: name.into(),
            param_type,
            required: true,
            default: None,
            allowed_values: None,
        });
        self
    }

    /// Appends an optional parameter with an optional default
    #[must_use]
    pub fn optional(
        mut self,
        name: impl Into<String>,
        param_type: ParameterType,
        default: Option<AgentDataValue>,
    ) -> Self {
        self.parameters.push(ParameterSpec {
            name: name.into(),
            param_type,
            required: false,
            default,
            allowed_values: None,
        });
        self
    }

    /// Constrains the most recently added parameter to a closed value set
    ///
    /// # Panics
    ///
    /// Panics if called before any parameter was added; this is a
    /// construction-time programming error, not a runtime condition.
    #[must_use]
    pub fn one_of(mut self, values: &[&str]) -> Self {
        let spec = self
            .parameters
            .last_mut()
            .expect("one_of requires a preceding parameter");
        spec.allowed_values = Some(values.iter().map(ToString::to_string).collect());
        self
    }

    /// Validates `params` against this schema
    ///
    /// # Errors
    ///
    /// Returns a message naming the offending parameter when a required
    /// parameter is missing, a type tag mismatches, or an enum-constrained
    /// value falls outside its allowed set.
    pub fn validate(&self, params: &AgentData) -> Result<(), String> {
        for spec in &self.parameters {
            let Some(value) = params.get(&spec.name) else {
                if spec.required {
                    return Err(format!("missing required parameter '{}'", spec.name));
                }
                continue;
            };

            if !spec.param_type.matches(value) {
                return Err(format!(
                    "parameter '{}' has type {} but {:?} is required",
                    spec.name,
                    value.type_name(),
                    spec.param_type
                ));
            }

            if let Some(allowed) = &spec.allowed_values {
                let candidate = value.as_str().unwrap_or_default();
                if !allowed.iter().any(|v| v == candidate) {
                    return Err(format!(
                        "parameter '{}' value '{candidate}' is not one of {allowed:?}",
                        spec.name
                    ));
                }
            }
        }
        Ok(())
    }

    /// Fills in declared defaults for absent optional parameters
    pub fn apply_defaults(&self, params: &mut AgentData) {
        for spec in &self.parameters {
            if !params.contains_key(&spec.name) {
                if let Some(default) = &spec.default {
                    params.set(spec.name.clone(), default.clone());
                }
            }
        }
    }
}

/// Per-invocation context made visible to the executing function
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// The agent on whose behalf the function runs
    pub agent_id: AgentId,
    /// Cooperative cancellation flag; long-running functions should observe it
    pub cancellation: CancellationToken,
}

impl ExecutionContext {
    /// Creates a context with a fresh cancellation token
    pub fn new(agent_id: AgentId) -> Self {
        Self {
            agent_id,
            cancellation: CancellationToken::new(),
        }
    }
}

/// A named, schema-described operation dispatchable through an agent's registry
#[async_trait]
pub trait AgentFunction: Send + Sync {
    /// Unique name within one registry
    fn name(&self) -> &str;

    /// Human-readable description
    fn description(&self) -> &str;

    /// Grouping tag
    fn category(&self) -> &str {
        "general"
    }

    /// Declared schema used for pre-dispatch validation
    fn schema(&self) -> FunctionSchema;

    /// Executes with validated parameters
    async fn execute(&self, params: AgentData, ctx: &ExecutionContext) -> FunctionResult;

    /// Rough relative cost estimate used by planners
    fn estimate_cost(&self, _params: &AgentData) -> f64 {
        1.0
    }
}

/// Per-agent mapping from function name to invocable function
///
/// Registration is idempotent by name; dispatch validates parameters first
/// and converts panics inside `execute` into failed results.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: DashMap<String, Arc<dyn AgentFunction>>,
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.functions.len())
            .finish()
    }
}

impl FunctionRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a function; a later registration replaces an earlier one
    pub fn register(&self, function: Arc<dyn AgentFunction>) {
        let name = function.name().to_string();
        if self.functions.insert(name.clone(), function).is_some() {
            warn!(function = %name, "replacing previously registered function");
        }
    }

    /// Looks up a function by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn AgentFunction>> {
        self.functions.get(name).map(|entry| Arc::clone(&entry))
    }

    /// Whether a function is registered under `name`
    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Sorted names of all registered functions
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Schemas of all registered functions, sorted by name
    pub fn schemas(&self) -> Vec<FunctionSchema> {
        let mut schemas: Vec<FunctionSchema> =
            self.functions.iter().map(|e| e.value().schema()).collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Number of registered functions
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Validates parameters and invokes the named function
    ///
    /// Never panics and never returns early with an error type: unknown
    /// functions, schema violations, and panicking functions all surface as
    /// a `FunctionResult` with `success == false`.
    pub async fn dispatch(
        &self,
        name: &str,
        mut params: AgentData,
        ctx: &ExecutionContext,
    ) -> FunctionResult {
        let started = Instant::now();

        let Some(function) = self.get(name) else {
            return FunctionResult::error(format!("unknown function '{name}'"));
        };

        let schema = function.schema();
        if let Err(message) = schema.validate(&params) {
            return FunctionResult::error(message);
        }
        schema.apply_defaults(&mut params);

        let outcome = std::panic::AssertUnwindSafe(function.execute(params, ctx))
            .catch_unwind()
            .await;

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match outcome {
            Ok(result) => result.with_execution_time(elapsed_ms),
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(ToString::to_string)
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "function panicked".to_string());
                warn!(function = %name, "function panicked during execution: {detail}");
                FunctionResult::error(format!("function '{name}' panicked: {detail}"))
                    .with_execution_time(elapsed_ms)
            }
        }
    }
}
