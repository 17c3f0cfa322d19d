//! Type-specific descriptor fields
//!
//! Descriptors are tagged by `type`; all other fields land in a [`Params`]
//! map that the matching constructor interprets.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::ContractError;

/// Free-form descriptor fields
pub type Params = BTreeMap<String, Value>;

/// Typed accessors over [`Params`]
pub trait ParamsExt {
    /// String parameter (absent or non-string = `None`)
    fn str_param(&self, key: &str) -> Option<&str>;

    /// Unsigned integer parameter, accepting numbers or numeric strings
    fn u64_param(&self, key: &str) -> Option<u64>;

    /// Required string parameter
    ///
    /// `owner` names the descriptor in the error message.
    fn require_str(&self, owner: &str, key: &str) -> Result<&str, ContractError>;
}

impl ParamsExt for Params {
    fn str_param(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    fn u64_param(&self, key: &str) -> Option<u64> {
        match self.get(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    fn require_str(&self, owner: &str, key: &str) -> Result<&str, ContractError> {
        self.str_param(key).ok_or_else(|| {
            ContractError::config_validation(
                format!("{owner}.{key}"),
                format!("missing '{key}' parameter"),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_params_accessors() {
        let params: Params = serde_json::from_value(json!({
            "path": "/foo/bar",
            "capacity": 16,
            "max_bytes": "2048"
        }))
        .unwrap();

        assert_eq!(params.str_param("path"), Some("/foo/bar"));
        assert_eq!(params.u64_param("capacity"), Some(16));
        assert_eq!(params.u64_param("max_bytes"), Some(2048));
        assert_eq!(params.u64_param("path"), None);
        assert!(params.require_str("sinks.s1", "missing").is_err());
    }
}
