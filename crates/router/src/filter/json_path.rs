//! `json_path` filter: regex match on one value of a JSON payload
//!
//! `path` is a JSON pointer (`/foo/bar`). String values are matched raw,
//! anything else on its JSON text. A missing path does not match.

use contracts::{ContractError, Message, MessageFilter, Params, ParamsExt};
use regex::Regex;
use serde_json::Value;

use super::compile_pattern;

#[derive(Debug, Clone)]
pub struct JsonPathFilter {
    path: String,
    pattern: Regex,
}

impl JsonPathFilter {
    /// Params: `path`, `pattern` (both required)
    pub fn from_params(params: &Params) -> Result<Self, ContractError> {
        let path = params.require_str("filter.json_path", "path")?;
        if !path.is_empty() && !path.starts_with('/') {
            return Err(ContractError::config_validation(
                "filter.json_path.path",
                format!("'{path}' is not a JSON pointer (must start with '/')"),
            ));
        }
        Ok(Self {
            path: path.to_string(),
            pattern: compile_pattern("filter.json_path", params)?,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl MessageFilter for JsonPathFilter {
    fn name(&self) -> &'static str {
        "json_path"
    }

    fn test(&self, message: &Message) -> Result<bool, ContractError> {
        let document: Value = serde_json::from_slice(message.payload())
            .map_err(|e| ContractError::filter(self.name(), format!("invalid JSON payload: {e}")))?;

        Ok(match document.pointer(&self.path) {
            None => false,
            Some(Value::String(s)) => self.pattern.is_match(s),
            Some(other) => self.pattern.is_match(&other.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn filter(path: &str, pattern: &str) -> JsonPathFilter {
        let params: Params =
            serde_json::from_value(json!({ "path": path, "pattern": pattern })).unwrap();
        JsonPathFilter::from_params(&params).unwrap()
    }

    fn message(payload: Value) -> Message {
        Message::new("topic4", payload.to_string()).unwrap()
    }

    #[test]
    fn test_even_suffix() {
        let filter = filter("/foo/bar", "^value[0-9]*[02468]$");
        let passed = (0..30)
            .filter(|i| {
                filter
                    .test(&message(json!({ "foo": { "bar": format!("value{i}") } })))
                    .unwrap()
            })
            .count();
        assert_eq!(passed, 15);
    }

    #[test]
    fn test_missing_path_does_not_match() {
        let filter = filter("/foo/bar", ".*");
        assert!(!filter.test(&message(json!({ "foo": {} }))).unwrap());
    }

    #[test]
    fn test_non_string_value_matches_json_text() {
        let filter = filter("/count", "^4[0-9]$");
        assert!(filter.test(&message(json!({ "count": 42 }))).unwrap());
        assert!(!filter.test(&message(json!({ "count": 7 }))).unwrap());
    }

    #[test]
    fn test_invalid_json_is_error() {
        let filter = filter("/foo", ".*");
        let err = filter.test(&Message::new("t", "not json").unwrap()).unwrap_err();
        assert!(matches!(err, ContractError::Filter { .. }));
    }

    #[test]
    fn test_rejects_non_pointer_path() {
        let params: Params =
            serde_json::from_value(json!({ "path": "foo.bar", "pattern": ".*" })).unwrap();
        assert!(JsonPathFilter::from_params(&params).is_err());
    }
}
