//! Declarative JSON-to-rows mapping.
//!
//! A mapping document describes, with a closed vocabulary of JSON rules,
//! how to turn nested records into flat rows: which array to explode, and
//! how each column is derived from the record.
//!
//! ```
//! use serde_json::json;
//!
//! let mapping = json!({
//!     "explode": {"path": "items"},
//!     "columns": {
//!         "order": {"path": "id"},
//!         "sku": {"rel_path": "sku"},
//!         "total": {"math": ["mul", {"rel_path": "qty"}, {"rel_path": "price"}]}
//!     }
//! });
//! let record = json!({"id": 7, "items": [{"sku": "A", "qty": 2, "price": 1.5}]});
//! let rows = json_tabular_mapping::convert_one(&mapping, &record).unwrap();
//! assert_eq!(rows[0]["total"], json_tabular_mapping::Value::Float(3.0));
//! ```

pub mod coercion;
pub mod comparison;
pub mod config;
pub mod context;
pub mod convert;
pub mod dates;
pub mod engine;
pub mod errors;
pub mod functions;
pub mod mapping;
pub mod metrics;
pub mod operators;
mod parser;
pub mod path;
pub mod predicate;
pub mod rows;
pub mod rule;
pub mod schema;
pub mod trace;
pub mod validate;
pub mod value;

use serde_json::Value as Json;

pub use coercion::{CastKind, OnError};
pub use config::EngineConfig;
pub use context::EvalContext;
pub use convert::{CancellationToken, Converter, Engine, RecordTrace, Row, RowStream};
pub use engine::Evaluator;
pub use errors::{ConvertError, Error, EvalError, MappingError, PathSyntaxError};
pub use functions::{Function, UdfRegistry};
pub use mapping::{JoinHow, Mapping, RowSource};
pub use metrics::{ConverterStats, Metrics, MetricsSink};
pub use operators::{Operator, OperatorRegistry};
pub use path::{resolve, PathExpr};
pub use rule::{Rule, RuleKind};
pub use schema::{SchemaContract, SchemaReport, SchemaViolation};
pub use validate::{dry_run, DryRunReport, ValidationReport};
pub use value::Value;

/// Compiles `mapping` with the built-in registries and converts one record.
pub fn convert_one(mapping: &Json, record: &Json) -> Result<Vec<Row>, Error> {
    Ok(Engine::new().compile(mapping)?.convert_one(record)?)
}

/// Validates `mapping` against the built-in operator set.
pub fn validate(mapping: &Json) -> ValidationReport {
    Engine::new().validate(mapping)
}
