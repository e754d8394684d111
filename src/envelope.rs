//! Endpoint-driven payload envelopes.
//!
//! Some endpoints expect the assembled payload nested under a wrapper key,
//! e.g. `{"Assign": {...}}`. Wrapper rules map endpoint paths to wrapper
//! keys; they are evaluated in declaration order and the first match wins.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RuleError;

/// A wrapper rule as written in a rule-set document.
///
/// A `null` or missing `wrapperKey` matches the endpoint but applies no
/// envelope, which lets an early rule shield an endpoint from later ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WrapperRuleDef {
    pub pattern: String,
    #[serde(default)]
    pub wrapper_key: Option<String>,
}

/// A compiled wrapper rule.
#[derive(Debug, Clone)]
pub struct WrapperRule {
    pub pattern: Regex,
    pub wrapper_key: Option<String>,
}

/// Ordered, compiled wrapper rules.
#[derive(Debug, Clone, Default)]
pub struct WrapperRules {
    rules: Vec<WrapperRule>,
}

impl WrapperRules {
    /// Compile rule definitions in order.
    ///
    /// # Errors
    ///
    /// Returns `RuleError::InvalidPattern` for the first bad regex.
    pub fn compile(defs: &[WrapperRuleDef]) -> Result<Self, RuleError> {
        let rules = defs
            .iter()
            .map(|def| {
                Regex::new(&def.pattern)
                    .map(|pattern| WrapperRule {
                        pattern,
                        wrapper_key: def.wrapper_key.clone(),
                    })
                    .map_err(|source| RuleError::InvalidPattern {
                        pattern: def.pattern.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// Wrapper key for an endpoint path, or `None` when no envelope applies.
    pub fn select(&self, endpoint: &str) -> Option<&str> {
        let rule = self.rules.iter().find(|r| r.pattern.is_match(endpoint))?;
        tracing::debug!(endpoint, pattern = %rule.pattern, "wrapper rule matched");
        rule.wrapper_key.as_deref()
    }

    /// Every non-null wrapper key, in declaration order, without duplicates.
    pub fn wrapper_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = Vec::new();
        for key in self.rules.iter().filter_map(|r| r.wrapper_key.as_ref()) {
            if !keys.contains(key) {
                keys.push(key.clone());
            }
        }
        keys
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Nest `value` under `key`.
///
/// Idempotent: a value that is already exactly `{key: ...}` is returned
/// unchanged.
pub fn wrap(value: Value, key: &str) -> Value {
    if is_wrapped(&value, key) {
        return value;
    }
    let mut envelope = Map::new();
    envelope.insert(key.to_string(), value);
    Value::Object(envelope)
}

/// True if `value` is a single-key object whose key is `key`.
pub fn is_wrapped(value: &Value, key: &str) -> bool {
    value
        .as_object()
        .is_some_and(|map| map.len() == 1 && map.contains_key(key))
}

/// Remove one level of envelope if `value` is wrapped by any of `keys`.
///
/// Returns the inner value and the wrapper key that was removed.
pub fn unwrap_envelope<'a>(value: &'a Value, keys: &[String]) -> (&'a Value, Option<&'a str>) {
    if let Some(map) = value.as_object() {
        if map.len() == 1 {
            if let Some((key, inner)) = map.iter().next() {
                if keys.iter().any(|k| k == key) {
                    return (inner, Some(key.as_str()));
                }
            }
        }
    }
    (value, None)
}
