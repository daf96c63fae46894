//! Conversion entry points. An [`Engine`] owns the registries and compiles
//! mapping documents into [`Converter`]s; a converter is immutable and can
//! be shared across threads.

use indexmap::IndexMap;
use rayon::prelude::*;
use serde::Serialize;
use serde_json::Value as Json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::context::EvalContext;
use crate::engine::Evaluator;
use crate::errors::{ConvertError, EvalError, MappingError, Result};
use crate::functions::{Function, UdfRegistry};
use crate::mapping::Mapping;
use crate::metrics::{Metrics, MetricsSink, ROWS_PER_RECORD};
use crate::operators::{Operator, OperatorRegistry};
use crate::rows::{plan_rows, RowBinding};
use crate::rule::Rule;
use crate::trace::{Diagnostic, TraceEntry};
use crate::validate::{self, ValidationReport};
use crate::value::Value;

/// One output row: column name to value, in mapping order.
pub type Row = IndexMap<String, Value>;

#[derive(Debug, Clone)]
pub struct Engine {
    operators: OperatorRegistry,
    udfs: UdfRegistry,
    config: EngineConfig,
    metrics: Metrics,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// An engine with every built-in operator and UDF installed.
    pub fn new() -> Self {
        Self {
            operators: OperatorRegistry::with_builtins(),
            udfs: UdfRegistry::with_builtins(),
            config: EngineConfig::default(),
            metrics: Metrics::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Converters compiled afterwards report rule errors and rows per
    /// record to `sink`.
    pub fn with_metrics(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Metrics::new(sink);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn operators(&self) -> &OperatorRegistry {
        &self.operators
    }

    pub fn udfs(&self) -> &UdfRegistry {
        &self.udfs
    }

    /// Installs or replaces an operator. Converters compiled earlier keep
    /// the table they were compiled with.
    pub fn register_operator<O: Operator + 'static>(&mut self, op: O) -> &mut Self {
        self.operators.register(op);
        self
    }

    pub fn register_operator_fn<F>(&mut self, name: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(&Rule, &EvalContext<'_>, &mut Evaluator<'_>) -> Result<Option<Value>> + Send + Sync + 'static,
    {
        self.operators.register_fn(name, handler);
        self
    }

    pub fn register_udf<F: Function + 'static>(&mut self, f: F) -> &mut Self {
        self.udfs.register(f);
        self
    }

    pub fn register_udf_fn<F>(&mut self, name: impl Into<String>, func: F) -> &mut Self
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        self.udfs.register_fn(name, func);
        self
    }

    pub fn validate(&self, doc: &Json) -> ValidationReport {
        validate::validate(doc, &self.operators)
    }

    pub fn compile(&self, doc: &Json) -> std::result::Result<Converter, MappingError> {
        let mapping = Mapping::from_json(doc, &self.operators)?;
        info!(columns = mapping.columns.len(), definitions = mapping.definitions.len(), "mapping compiled");
        Ok(Converter {
            mapping: Arc::new(mapping),
            operators: self.operators.clone(),
            udfs: self.udfs.clone(),
            config: self.config,
            metrics: self.metrics.clone(),
        })
    }

    pub fn compile_str(&self, doc: &str) -> std::result::Result<Converter, MappingError> {
        let json: Json = serde_json::from_str(doc)?;
        self.compile(&json)
    }
}

/// Cooperative cancellation for [`RowStream`], checked between records.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Trace of every row produced from one record.
#[derive(Debug, Clone, Serialize)]
pub struct RecordTrace {
    pub rows_emitted: usize,
    pub rows: Vec<RowTrace>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RowTrace {
    pub row: Option<Row>,
    pub error: Option<String>,
    pub entries: Vec<TraceEntry>,
    pub diagnostics: Vec<Diagnostic>,
}

/// A compiled mapping plus frozen snapshots of the registries.
#[derive(Debug, Clone)]
pub struct Converter {
    mapping: Arc<Mapping>,
    operators: OperatorRegistry,
    udfs: UdfRegistry,
    config: EngineConfig,
    metrics: Metrics,
}

impl Converter {
    pub fn mapping(&self) -> &Mapping {
        &self.mapping
    }

    fn evaluator(&self) -> Evaluator<'_> {
        Evaluator::new(&self.mapping.definitions, &self.operators, &self.udfs, self.config.default_on_error)
            .with_metrics(&self.metrics)
    }

    fn eval_row(
        &self,
        ev: &mut Evaluator<'_>,
        record: &Value,
        binding: &RowBinding,
        index: usize,
    ) -> std::result::Result<Row, ConvertError> {
        let root = EvalContext::new(record);
        let ctx = match binding.item() {
            Some(item) => root.with_item(item),
            None => root,
        };
        let mut row = Row::with_capacity(self.mapping.columns.len());
        for (name, rule) in &self.mapping.columns {
            let value = ev.evaluate_column(name, rule, &ctx).map_err(|e| column_error(name, index, e))?;
            row.insert(name.clone(), value);
        }
        Ok(row)
    }

    fn convert_record(&self, record: &Value, index: usize) -> std::result::Result<Vec<Row>, ConvertError> {
        let bindings = plan_rows(record, &self.mapping.row_source);
        debug!(record = index, rows = bindings.len(), "planned rows");
        let mut ev = self.evaluator();
        let rows = bindings
            .iter()
            .map(|binding| self.eval_row(&mut ev, record, binding, index))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        if let Some(schema) = &self.mapping.schema {
            let report = schema.validate_rows(&rows);
            if !report.ok {
                if self.config.enforce_schema {
                    return Err(ConvertError::Schema(report));
                }
                warn!(record = index, %report, "output schema violations");
            }
        }
        self.metrics.observe(ROWS_PER_RECORD, rows.len() as f64);
        Ok(rows)
    }

    /// All rows of one record. The first column error aborts the record.
    pub fn convert_one(&self, record: &Json) -> std::result::Result<Vec<Row>, ConvertError> {
        self.convert_record(&Value::from(record), 0)
    }

    /// Lazily converts `records`, one record at a time.
    pub fn convert_many<I>(&self, records: I) -> RowStream<'_, I::IntoIter>
    where
        I: IntoIterator<Item = Json>,
    {
        RowStream {
            converter: self,
            records: records.into_iter(),
            index: 0,
            pending: VecDeque::new(),
            cancel: None,
            done: false,
        }
    }

    /// Converts records on the rayon pool. Results keep input order.
    pub fn convert_batch(&self, records: &[Json]) -> Vec<std::result::Result<Vec<Row>, ConvertError>> {
        records
            .par_iter()
            .enumerate()
            .map(|(index, record)| self.convert_record(&Value::from(record), index))
            .collect()
    }

    /// Converts one record with tracing on. Row failures are recorded in
    /// the trace rather than returned.
    pub fn trace(&self, record: &Json) -> std::result::Result<RecordTrace, ConvertError> {
        let record = Value::from(record);
        let bindings = plan_rows(&record, &self.mapping.row_source);
        let mut rows = Vec::with_capacity(bindings.len());
        for binding in &bindings {
            let mut ev = self.evaluator().with_trace();
            let outcome = self.eval_row(&mut ev, &record, binding, 0);
            let (row, error) = match outcome {
                Ok(row) => (Some(row), None),
                Err(e) => (None, Some(e.to_string())),
            };
            rows.push(RowTrace { row, error, entries: ev.take_trace(), diagnostics: ev.take_diagnostics() });
        }
        Ok(RecordTrace { rows_emitted: bindings.len(), rows })
    }
}

fn column_error(column: &str, record: usize, err: EvalError) -> ConvertError {
    if err.is_fatal() {
        ConvertError::Cyclic(err)
    } else {
        ConvertError::Column { column: column.to_string(), record, source: err }
    }
}

/// Pull-based row sequence from [`Converter::convert_many`]. Finite and not
/// restartable. A record whose conversion fails yields one `Err` and the
/// stream moves on; cancellation, cycles and enforced schema violations
/// end it.
pub struct RowStream<'c, I> {
    converter: &'c Converter,
    records: I,
    index: usize,
    pending: VecDeque<Row>,
    cancel: Option<CancellationToken>,
    done: bool,
}

impl<'c, I> RowStream<'c, I> {
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

impl<'c, I> Iterator for RowStream<'c, I>
where
    I: Iterator<Item = Json>,
{
    type Item = std::result::Result<Row, ConvertError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(row) = self.pending.pop_front() {
                return Some(Ok(row));
            }
            if self.done {
                return None;
            }
            if self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
                self.done = true;
                return Some(Err(ConvertError::Cancelled));
            }
            let Some(record) = self.records.next() else {
                self.done = true;
                return None;
            };
            let index = self.index;
            self.index += 1;
            match self.converter.convert_record(&Value::from(record), index) {
                Ok(rows) => self.pending.extend(rows),
                Err(err) => {
                    if matches!(err, ConvertError::Cyclic(_) | ConvertError::Schema(_)) {
                        self.done = true;
                    }
                    return Some(Err(err));
                }
            }
        }
    }
}
