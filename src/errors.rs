use thiserror::Error;

use crate::schema::SchemaReport;

/// A path string that does not follow the segment grammar.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("malformed path '{path}': {message}")]
pub struct PathSyntaxError {
    pub path: String,
    pub message: String,
}

/// Errors raised while turning a JSON document into a [`crate::Mapping`].
#[derive(Debug, Error)]
pub enum MappingError {
    // Every structural finding, each prefixed with its `$`-path in the document
    #[error("invalid mapping:\n- {}", .0.join("\n- "))]
    Structural(Vec<String>),

    // The document itself was not valid JSON
    #[error("mapping is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

// Runtime failures of a single rule. `on_error` decides what happens next,
// except for `CyclicDefinition` which always aborts the run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("division by zero")]
    DivisionByZero,

    #[error("cannot order {left} against {right}")]
    IncomparableTypes { left: String, right: String },

    #[error("cannot cast {value} to {target}")]
    CastFailure { value: String, target: String },

    #[error("unknown udf '{0}'")]
    UnknownUdf(String),

    #[error("unknown operator '{0}'")]
    UnknownOperator(String),

    #[error("cyclic definition: {}", .0.join(" -> "))]
    CyclicDefinition(Vec<String>),

    #[error("could not parse date from {input}")]
    DateParseFailure { input: String },

    #[error("unknown definition '{0}'")]
    UnknownDefinition(String),

    #[error("value of kind {0} has no length")]
    NotSizable(String),

    #[error("invalid regex '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("operator '{operator}' received a rule of another kind")]
    MalformedRule { operator: String },

    #[error("udf '{name}' failed: {message}")]
    Udf { name: String, message: String },
}

impl EvalError {
    /// Errors that describe a broken mapping rather than bad data.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EvalError::CyclicDefinition(_))
    }
}

/// Errors surfaced by the conversion entry points.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("column '{column}' of record {record}: {source}")]
    Column {
        column: String,
        record: usize,
        #[source]
        source: EvalError,
    },

    #[error("conversion aborted: {0}")]
    Cyclic(EvalError),

    #[error("output schema validation failed with {} violation(s)", .0.violations.len())]
    Schema(SchemaReport),

    #[error("conversion cancelled")]
    Cancelled,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// Type alias for results that use `EvalError` as the error type
pub type Result<T> = std::result::Result<T, EvalError>;

/// Either side of a one-shot conversion: compiling the mapping or running it.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error(transparent)]
    Convert(#[from] ConvertError),
}
