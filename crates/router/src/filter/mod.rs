//! Filter / converter registry
//!
//! 按描述符的 `type` 标签构造过滤器与转换器。
//!
//! Built-in filters: `regex`, `json_path`.
//! Built-in converters: `identity`, `json_pointer`, `json_compact`.

mod converter;
mod json_path;
mod pattern;

use std::collections::HashMap;
use std::sync::Arc;

use contracts::{ContractError, ConverterSpec, FilterSpec, MessageFilter, Params, PayloadConverter};

use crate::error::RouterError;

pub use self::converter::{IdentityConverter, JsonCompactConverter, JsonPointerConverter};
pub use self::json_path::JsonPathFilter;
pub use self::pattern::RegexFilter;

/// Builds a filter from its descriptor params
pub type FilterCtor = fn(&Params) -> Result<Arc<dyn MessageFilter>, ContractError>;

/// Builds a converter from its descriptor params
pub type ConverterCtor = fn(&Params) -> Result<Arc<dyn PayloadConverter>, ContractError>;

/// Registry of filter and converter constructors keyed by type tag
#[derive(Clone)]
pub struct FilterRegistry {
    filters: HashMap<&'static str, FilterCtor>,
    converters: HashMap<&'static str, ConverterCtor>,
}

impl FilterRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            filters: HashMap::new(),
            converters: HashMap::new(),
        }
    }

    /// Registry with the built-in types
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_filter("regex", |params| {
            Ok(Arc::new(RegexFilter::from_params(params)?))
        });
        registry.register_filter("json_path", |params| {
            Ok(Arc::new(JsonPathFilter::from_params(params)?))
        });
        registry.register_converter("identity", |_| Ok(Arc::new(IdentityConverter)));
        registry.register_converter("json_pointer", |params| {
            Ok(Arc::new(JsonPointerConverter::from_params(params)?))
        });
        registry.register_converter("json_compact", |_| Ok(Arc::new(JsonCompactConverter)));
        registry
    }

    pub fn register_filter(&mut self, filter_type: &'static str, ctor: FilterCtor) {
        self.filters.insert(filter_type, ctor);
    }

    pub fn register_converter(&mut self, converter_type: &'static str, ctor: ConverterCtor) {
        self.converters.insert(converter_type, ctor);
    }

    /// Build the filter for `route`
    pub fn create_filter(
        &self,
        route: &str,
        spec: &FilterSpec,
    ) -> Result<Arc<dyn MessageFilter>, RouterError> {
        let ctor = self
            .filters
            .get(spec.filter_type.as_str())
            .ok_or_else(|| RouterError::UnknownType {
                route: route.to_string(),
                kind: "filter",
                type_name: spec.filter_type.clone(),
                available: self.filter_types().join(", "),
            })?;
        ctor(&spec.params)
            .map_err(|e| RouterError::invalid_descriptor(route, "filter", e.to_string()))
    }

    /// Build the converter for `route`
    pub fn create_converter(
        &self,
        route: &str,
        spec: &ConverterSpec,
    ) -> Result<Arc<dyn PayloadConverter>, RouterError> {
        let ctor = self
            .converters
            .get(spec.converter_type.as_str())
            .ok_or_else(|| RouterError::UnknownType {
                route: route.to_string(),
                kind: "converter",
                type_name: spec.converter_type.clone(),
                available: self.converter_types().join(", "),
            })?;
        ctor(&spec.params)
            .map_err(|e| RouterError::invalid_descriptor(route, "converter", e.to_string()))
    }

    /// Registered filter types, sorted
    pub fn filter_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.filters.keys().copied().collect();
        types.sort_unstable();
        types
    }

    /// Registered converter types, sorted
    pub fn converter_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.converters.keys().copied().collect();
        types.sort_unstable();
        types
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Shared `pattern` parsing for the regex-based filters
fn compile_pattern(owner: &str, params: &Params) -> Result<regex::Regex, ContractError> {
    use contracts::ParamsExt;

    let pattern = params.require_str(owner, "pattern")?;
    regex::Regex::new(pattern).map_err(|e| {
        ContractError::config_validation(
            format!("{owner}.pattern"),
            format!("invalid regex '{pattern}': {e}"),
        )
    })
}

/// Payload as UTF-8 text
fn payload_str<'a>(filter: &str, payload: &'a [u8]) -> Result<&'a str, ContractError> {
    std::str::from_utf8(payload)
        .map_err(|e| ContractError::filter(filter, format!("payload is not UTF-8: {e}")))
}
