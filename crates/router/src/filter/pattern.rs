//! `regex` filter: matches a pattern against the UTF-8 payload

use contracts::{ContractError, Message, MessageFilter, Params};
use regex::Regex;

use super::{compile_pattern, payload_str};

/// Passes messages whose payload text matches `pattern`
#[derive(Debug, Clone)]
pub struct RegexFilter {
    pattern: Regex,
}

impl RegexFilter {
    pub fn new(pattern: Regex) -> Self {
        Self { pattern }
    }

    /// Params: `pattern` (required)
    pub fn from_params(params: &Params) -> Result<Self, ContractError> {
        Ok(Self::new(compile_pattern("filter.regex", params)?))
    }
}

impl MessageFilter for RegexFilter {
    fn name(&self) -> &'static str {
        "regex"
    }

    fn test(&self, message: &Message) -> Result<bool, ContractError> {
        let text = payload_str(self.name(), message.payload())?;
        Ok(self.pattern.is_match(text))
    }
}
