use serde::{Deserialize, Serialize};

use crate::coercion::OnError;

/// Engine-wide knobs. Every field is optional in the JSON form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Policy for rules that do not set `on_error`.
    pub default_on_error: OnError,
    /// Turn schema violations into conversion errors instead of log lines.
    pub enforce_schema: bool,
}

impl EngineConfig {
    pub fn from_json_str(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn partial_documents_fill_defaults() {
        let cfg = EngineConfig::from_json_str(r#"{"enforce_schema": true}"#).unwrap();
        assert_eq!(cfg, EngineConfig { default_on_error: OnError::Raise, enforce_schema: true });
        let cfg = EngineConfig::from_json_str(r#"{"default_on_error": "warn"}"#).unwrap();
        assert_eq!(cfg.default_on_error, OnError::Warn);
        assert!(EngineConfig::from_json_str(r#"{"strict": 1}"#).is_err());
    }
}
