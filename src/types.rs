//! Core types shared by the compiler, form state and payload stages.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Suffix of the synthetic key that toggles an object subtree on or off.
pub const ENABLED_SUFFIX: &str = "._enabled";

/// Suffix of the synthetic key that stores the selected oneOf branch index.
pub const SELECTED_OPTION_SUFFIX: &str = ".__selectedOption";

/// Prefix of synthetic section marker keys.
pub const SECTION_MARKER_PREFIX: &str = "__section_";

/// Name of the discriminant property used when none is configured.
pub const DEFAULT_DISCRIMINANT: &str = "TYPE";

/// Section used when no section rules are configured.
pub const DEFAULT_SECTION: &str = "General";

/// Section used when rules exist but none of them match a field.
pub const FALLBACK_SECTION: &str = "Advanced";

/// Extension keywords whose presence marks a schema as enhanced.
pub const DEFAULT_ENHANCED_MARKERS: &[&str] = &[
    "x-enum-by-type",
    "x-enum-labels",
    "x-enum-labels-by-type",
    "x-ui",
    "x-required-when",
    "x-required-by-type",
    "x-node-count-by-type",
    "x-value-constraint",
    "x-transport",
    "x-exclusive-keys",
];

/// Returns true for state keys that only exist to drive the form.
///
/// Every stage that filters state uses this predicate so the set of
/// synthetic keys is defined in exactly one place.
pub fn is_synthetic_key(key: &str) -> bool {
    key.ends_with(ENABLED_SUFFIX)
        || key.ends_with(SELECTED_OPTION_SUFFIX)
        || key
            .rsplit('.')
            .next()
            .is_some_and(|last| last.starts_with(SECTION_MARKER_PREFIX))
}

/// Key of the `_enabled` flag for an object path.
pub fn enabled_key(path: &str) -> String {
    format!("{path}{ENABLED_SUFFIX}")
}

/// Key of the `__selectedOption` index for a oneOf path.
pub fn selected_option_key(path: &str) -> String {
    format!("{path}{SELECTED_OPTION_SUFFIX}")
}

/// Joins a parent scope and a property name into a dot path.
pub fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}.{name}")
    }
}

/// Returns the JSON type name for diagnostics.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Values the assembler treats as "not filled in".
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// Normalizes an operating mode for comparison.
///
/// Modes are discriminant values such as `STATIC` or `EIGEN`, matched
/// case-insensitively.
pub fn normalize_mode(mode: &str) -> String {
    mode.trim().to_uppercase()
}

/// Whether a field must, may, or cannot be filled in for a mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Requirement {
    Required,
    #[default]
    Optional,
    NotApplicable,
}

impl Requirement {
    /// Parse a requirement from a string.
    ///
    /// Returns `None` for unknown values.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "required" => Some(Requirement::Required),
            "optional" => Some(Requirement::Optional),
            "n/a" | "not_applicable" => Some(Requirement::NotApplicable),
            _ => None,
        }
    }
}

/// Key of a `required_by_mode` entry: a concrete mode or the wildcard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ModeKey {
    Any,
    Mode(String),
}

impl ModeKey {
    /// Builds a key from its textual form; `*` is the wildcard.
    pub fn parse(s: &str) -> Self {
        if s.trim() == "*" {
            ModeKey::Any
        } else {
            ModeKey::Mode(normalize_mode(s))
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ModeKey::Any => "*",
            ModeKey::Mode(m) => m,
        }
    }
}

impl Serialize for ModeKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ModeKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(ModeKey::parse(&s))
    }
}

/// Conditions under which a field is shown, from `x-ui.visibleWhen`.
///
/// Maps a property name to the values that make the field visible. A scalar
/// condition is stored as a one-element list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisibleWhen(pub IndexMap<String, Vec<Value>>);

impl VisibleWhen {
    /// Parse a `visibleWhen` object. Returns `None` for non-objects.
    pub fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        let conditions = map
            .iter()
            .map(|(key, accepted)| {
                let values = match accepted {
                    Value::Array(items) => items.clone(),
                    other => vec![other.clone()],
                };
                (key.clone(), values)
            })
            .collect();
        Some(Self(conditions))
    }

    /// Accepted values for a property.
    pub fn values_for(&self, key: &str) -> Option<&[Value]> {
        self.0.get(key).map(Vec::as_slice)
    }

    /// Accepted values for a property, keeping only strings.
    pub fn strings_for(&self, key: &str) -> Vec<&str> {
        self.values_for(key)
            .unwrap_or_default()
            .iter()
            .filter_map(Value::as_str)
            .collect()
    }

    /// True if the condition for `key` equals `expected` (a scalar or a list).
    pub fn condition_equals(&self, key: &str, expected: &Value) -> bool {
        match (self.values_for(key), expected) {
            (Some(values), Value::Array(items)) => values == items.as_slice(),
            (Some([single]), other) => single == other,
            _ => false,
        }
    }

    /// Evaluate against current values. Properties with no current value do
    /// not hide the field.
    pub fn is_satisfied<'a>(&self, lookup: impl Fn(&str) -> Option<&'a Value>) -> bool {
        self.0.iter().all(|(key, accepted)| match lookup(key) {
            Some(current) => accepted.iter().any(|a| values_match(a, current)),
            None => true,
        })
    }
}

/// Compares a condition value to a current value; strings match
/// case-insensitively so modes and discriminant values line up.
fn values_match(accepted: &Value, current: &Value) -> bool {
    match (accepted, current) {
        (Value::String(a), Value::String(c)) => a.eq_ignore_ascii_case(c),
        _ => accepted == current,
    }
}

/// Options for schema compilation.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Operating mode the form is built for (e.g. "STATIC").
    /// Normalized with [`normalize_mode`].
    pub mode: String,
    /// Property whose value selects type-conditioned enumerations.
    pub discriminant: String,
}

impl CompileOptions {
    /// Create compile options for a mode using the default discriminant.
    pub fn new(mode: impl Into<String>) -> Self {
        Self {
            mode: normalize_mode(&mode.into()),
            discriminant: DEFAULT_DISCRIMINANT.to_string(),
        }
    }

    /// Set the discriminant property name.
    pub fn discriminant(mut self, discriminant: impl Into<String>) -> Self {
        self.discriminant = discriminant.into();
        self
    }
}
