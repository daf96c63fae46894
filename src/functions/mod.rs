use std::collections::HashMap;
use std::fmt;
use std::ops::RangeInclusive;
use std::sync::Arc;

use crate::errors::Result;
use crate::value::Value;

/// A pure function over already-evaluated values, invoked by `udf` rules.
/// It never sees the record, the context or the registries.
pub trait Function: Send + Sync {
    fn name(&self) -> &str;

    fn arity(&self) -> RangeInclusive<usize> {
        0..=usize::MAX
    }

    fn call(&self, args: &[Value]) -> Result<Value>;
}

/// Wraps an infallible closure; see [`UdfRegistry::register_fn`].
pub struct FnUdf<F> {
    name: String,
    func: F,
}

impl<F> Function for FnUdf<F>
where
    F: Fn(&[Value]) -> Value + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, args: &[Value]) -> Result<Value> {
        Ok((self.func)(args))
    }
}

/// Thread-safe UDF registry.
#[derive(Clone, Default)]
pub struct UdfRegistry {
    inner: Arc<HashMap<String, Arc<dyn Function>>>,
}

impl UdfRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        reg.register(builtins::Lower);
        reg.register(builtins::Upper);
        reg.register(builtins::Trim);
        reg
    }

    pub fn register<F: Function + 'static>(&mut self, f: F) {
        let map = Arc::make_mut(&mut self.inner);
        map.insert(f.name().to_string(), Arc::new(f));
    }

    pub fn register_fn<F>(&mut self, name: impl Into<String>, func: F)
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        self.register(FnUdf { name: name.into(), func });
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Function>> {
        self.inner.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(name)
    }
}

impl fmt::Debug for UdfRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.inner.keys().collect();
        names.sort();
        f.debug_struct("UdfRegistry").field("udfs", &names).finish()
    }
}

pub mod builtins {
    use super::*;

    fn map_str(args: &[Value], f: impl Fn(&str) -> String) -> Value {
        match args.first() {
            Some(Value::String(s)) => Value::String(f(s)),
            Some(other) => other.clone(),
            None => Value::Null,
        }
    }

    pub struct Lower;
    impl Function for Lower {
        fn name(&self) -> &str { "lower" }
        fn arity(&self) -> RangeInclusive<usize> { 1..=1 }
        fn call(&self, args: &[Value]) -> Result<Value> {
            Ok(map_str(args, str::to_lowercase))
        }
    }

    pub struct Upper;
    impl Function for Upper {
        fn name(&self) -> &str { "upper" }
        fn arity(&self) -> RangeInclusive<usize> { 1..=1 }
        fn call(&self, args: &[Value]) -> Result<Value> {
            Ok(map_str(args, str::to_uppercase))
        }
    }

    pub struct Trim;
    impl Function for Trim {
        fn name(&self) -> &str { "trim" }
        fn arity(&self) -> RangeInclusive<usize> { 1..=1 }
        fn call(&self, args: &[Value]) -> Result<Value> {
            Ok(map_str(args, |s| s.trim().to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn closures_register_as_udfs() {
        let mut reg = UdfRegistry::with_builtins();
        reg.register_fn("count_args", |args| Value::Int(args.len() as i64));
        let f = reg.get("count_args").unwrap();
        assert_eq!(f.call(&[Value::Null, Value::Null]).unwrap(), Value::Int(2));
        assert_eq!(f.arity(), 0..=usize::MAX);
    }

    #[test]
    fn builtins_leave_non_strings_alone() {
        let reg = UdfRegistry::with_builtins();
        let upper = reg.get("upper").unwrap();
        assert_eq!(upper.call(&[Value::from("abc")]).unwrap(), Value::from("ABC"));
        assert_eq!(upper.call(&[Value::Int(3)]).unwrap(), Value::Int(3));
        assert_eq!(reg.get("trim").unwrap().call(&[Value::from("  x ")]).unwrap(), Value::from("x"));
    }
}
