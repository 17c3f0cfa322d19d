//! Payload converters

use bytes::Bytes;
use contracts::{ContractError, Message, Params, ParamsExt, PayloadConverter};
use serde_json::Value;

/// Leaves the payload untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityConverter;

impl PayloadConverter for IdentityConverter {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn convert(&self, message: &Message) -> Result<Bytes, ContractError> {
        Ok(message.payload().clone())
    }
}

/// Replaces the payload with the JSON sub-document at `path`
///
/// A missing path is an error, not an empty payload.
#[derive(Debug, Clone)]
pub struct JsonPointerConverter {
    path: String,
}

impl JsonPointerConverter {
    /// Params: `path` (required, JSON pointer)
    pub fn from_params(params: &Params) -> Result<Self, ContractError> {
        let path = params.require_str("converter.json_pointer", "path")?;
        if !path.is_empty() && !path.starts_with('/') {
            return Err(ContractError::config_validation(
                "converter.json_pointer.path",
                format!("'{path}' is not a JSON pointer (must start with '/')"),
            ));
        }
        Ok(Self {
            path: path.to_string(),
        })
    }
}

impl PayloadConverter for JsonPointerConverter {
    fn name(&self) -> &'static str {
        "json_pointer"
    }

    fn convert(&self, message: &Message) -> Result<Bytes, ContractError> {
        let document = parse(self.name(), message)?;
        let selected = document.pointer(&self.path).ok_or_else(|| {
            ContractError::filter(self.name(), format!("path '{}' not found", self.path))
        })?;
        encode(self.name(), selected)
    }
}

/// Re-encodes a JSON payload without whitespace
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCompactConverter;

impl PayloadConverter for JsonCompactConverter {
    fn name(&self) -> &'static str {
        "json_compact"
    }

    fn convert(&self, message: &Message) -> Result<Bytes, ContractError> {
        encode(self.name(), &parse(self.name(), message)?)
    }
}

fn parse(converter: &str, message: &Message) -> Result<Value, ContractError> {
    serde_json::from_slice(message.payload())
        .map_err(|e| ContractError::filter(converter, format!("invalid JSON payload: {e}")))
}

fn encode(converter: &str, value: &Value) -> Result<Bytes, ContractError> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| ContractError::filter(converter, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identity_shares_payload() {
        let message = Message::new("t", "raw bytes").unwrap();
        let out = IdentityConverter.convert(&message).unwrap();
        assert_eq!(out, *message.payload());
    }

    #[test]
    fn test_json_pointer_selects_subdocument() {
        let params: Params = serde_json::from_value(json!({ "path": "/foo" })).unwrap();
        let converter = JsonPointerConverter::from_params(&params).unwrap();
        let message = Message::new("t", r#"{"foo": {"bar": 1}, "other": true}"#).unwrap();

        let out = converter.convert(&message).unwrap();
        assert_eq!(&out[..], br#"{"bar":1}"#);
    }

    #[test]
    fn test_json_pointer_missing_path_is_error() {
        let params: Params = serde_json::from_value(json!({ "path": "/nope" })).unwrap();
        let converter = JsonPointerConverter::from_params(&params).unwrap();
        let err = converter
            .convert(&Message::new("t", "{}").unwrap())
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_json_compact() {
        let message = Message::new("t", "{ \"a\" : [ 1, 2 ] }\n").unwrap();
        let out = JsonCompactConverter.convert(&message).unwrap();
        assert_eq!(&out[..], br#"{"a":[1,2]}"#);
        assert!(JsonCompactConverter
            .convert(&Message::new("t", "plain").unwrap())
            .is_err());
    }
}
