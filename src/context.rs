use crate::value::Value;

/// What a rule sees while it evaluates: the whole input record and, inside
/// a row source or a list transform, the current item.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    root: &'a Value,
    item: Option<&'a Value>,
}

impl<'a> EvalContext<'a> {
    pub fn new(root: &'a Value) -> Self {
        Self { root, item: None }
    }

    /// Same record, new current item.
    pub fn with_item(&self, item: &'a Value) -> Self {
        Self { root: self.root, item: Some(item) }
    }

    pub fn root(&self) -> &'a Value {
        self.root
    }

    pub fn item(&self) -> Option<&'a Value> {
        self.item
    }

    /// Base for `rel_path`: the item when one is bound, otherwise the record.
    pub fn relative_base(&self) -> &'a Value {
        self.item.unwrap_or(self.root)
    }
}
