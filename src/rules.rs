//! Rule-set documents.
//!
//! A rule set configures how compiled fields are grouped into sections, which
//! fields each mode requires, and which endpoints wrap their payloads. Rule
//! sets are loaded once, before compilation, and memoized per
//! `(rule-set id, mode)` in a [`RuleCache`].
//!
//! # Document format
//!
//! ```json
//! {
//!   "discriminant": "TYPE",
//!   "sectionRules": [
//!     { "name": "grouped", "condition": { "type": "has-explicit-group" },
//!       "action": { "type": "use-explicit-group" } },
//!     { "name": "rest", "condition": { "type": "always" },
//!       "action": { "type": "assign-section", "section": "General" } }
//!   ],
//!   "sectionOrder": ["General", "Advanced"],
//!   "typeLabels": { "STATIC": "Static" },
//!   "requirements": { "STATIC": { "required": ["LOAD.FORCE"] } },
//!   "wrapperRules": [ { "pattern": "^/analysis/", "wrapperKey": "Assign" } ]
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::envelope::{WrapperRuleDef, WrapperRules};
use crate::error::RuleError;
use crate::loader::load_rules_document;
use crate::registry::MarkerSet;
use crate::types::{
    ModeKey, Requirement, VisibleWhen, DEFAULT_DISCRIMINANT, DEFAULT_SECTION, FALLBACK_SECTION,
};

/// Schema keyword carrying rule overrides embedded in the schema itself.
pub const SCHEMA_RULES_KEY: &str = "x-schema-rules";

/// Configuration for sections, requirements and envelopes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuleSet {
    /// Extension keywords that mark a schema as enhanced.
    pub markers: Option<Vec<String>>,
    /// Property whose value selects type-conditioned enumerations.
    pub discriminant: Option<String>,
    pub section_rules: Vec<SectionRule>,
    pub section_order: Vec<String>,
    pub type_labels: IndexMap<String, String>,
    pub requirements: IndexMap<ModeKey, ModeRequirements>,
    pub wrapper_rules: Vec<WrapperRuleDef>,
}

/// Field paths a mode requires, allows, or excludes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModeRequirements {
    pub required: Vec<String>,
    pub optional: Vec<String>,
    pub not_applicable: Vec<String>,
}

impl ModeRequirements {
    /// The requirement this entry assigns to `path`, if any.
    pub fn lookup(&self, path: &str) -> Option<Requirement> {
        let listed = |paths: &[String]| paths.iter().any(|p| p == path);
        if listed(&self.not_applicable) {
            Some(Requirement::NotApplicable)
        } else if listed(&self.required) {
            Some(Requirement::Required)
        } else if listed(&self.optional) {
            Some(Requirement::Optional)
        } else {
            None
        }
    }
}

/// One section rule: the first rule whose condition matches names the section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionRule {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub condition: Condition,
    pub action: Action,
}

/// Section rule conditions.
///
/// The `visible-types-*` conditions inspect the discriminant entry of the
/// field's `x-ui.visibleWhen`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Condition {
    Always,
    HasExplicitGroup,
    NoVisibleWhen,
    VisibleTypesIncludeAll {
        #[serde(default)]
        types: Vec<String>,
    },
    VisibleTypesIncludeAny {
        #[serde(default)]
        types: Vec<String>,
    },
    VisibleTypesExact {
        #[serde(default)]
        types: Vec<String>,
    },
    VisibleTypesMatch {
        #[serde(default)]
        includes: Option<Vec<String>>,
        #[serde(default)]
        excludes: Option<Vec<String>>,
        #[serde(default)]
        fields: Option<Map<String, Value>>,
    },
    VisibleTypesMultiple,
    /// Unrecognized condition types never match.
    #[serde(other)]
    Unknown,
}

/// Section rule actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Action {
    UseExplicitGroup,
    AssignSection {
        #[serde(default)]
        section: Option<String>,
    },
    JoinTypeLabels {
        #[serde(default)]
        separator: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

/// What section rules look at on a field.
#[derive(Debug, Clone, Copy, Default)]
pub struct SectionInput<'a> {
    pub group: Option<&'a str>,
    pub visible_when: Option<&'a VisibleWhen>,
}

impl RuleSet {
    /// Parse a rule set from a JSON (or YAML-derived) value.
    ///
    /// Wrapper patterns are compiled here so a bad pattern fails at load.
    ///
    /// # Errors
    ///
    /// Returns `RuleError::InvalidDocument` for structural problems or
    /// `RuleError::InvalidPattern` for a bad wrapper regex.
    pub fn from_value(value: Value) -> Result<Self, RuleError> {
        let rules: RuleSet =
            serde_json::from_value(value).map_err(|source| RuleError::InvalidDocument { source })?;
        rules.wrappers()?;
        Ok(rules)
    }

    /// Load a rule set from a JSON or YAML file.
    ///
    /// # Errors
    ///
    /// See [`RuleSet::from_value`] and [`load_rules_document`].
    pub fn load(path: &Path) -> Result<Self, RuleError> {
        let document = load_rules_document(path)?;
        tracing::debug!(path = %path.display(), "loaded rule set");
        Self::from_value(document)
    }

    pub fn discriminant(&self) -> &str {
        self.discriminant.as_deref().unwrap_or(DEFAULT_DISCRIMINANT)
    }

    pub fn marker_set(&self) -> MarkerSet {
        match &self.markers {
            Some(markers) => MarkerSet::new(markers.iter().cloned()),
            None => MarkerSet::default(),
        }
    }

    /// Compile the wrapper rules.
    ///
    /// # Errors
    ///
    /// Returns `RuleError::InvalidPattern` for a bad regex.
    pub fn wrappers(&self) -> Result<WrapperRules, RuleError> {
        WrapperRules::compile(&self.wrapper_rules)
    }

    /// Requirement assigned to `path` by these rules for `mode`.
    ///
    /// A mode-specific entry wins over the wildcard entry.
    pub fn requirement_for(&self, path: &str, mode: &ModeKey) -> Option<Requirement> {
        self.requirements
            .get(mode)
            .and_then(|r| r.lookup(path))
            .or_else(|| self.requirements.get(&ModeKey::Any).and_then(|r| r.lookup(path)))
    }

    /// Apply `x-schema-rules` overrides embedded in a schema.
    ///
    /// Each top-level key present in the embedded rules replaces the
    /// corresponding field. Malformed overrides are ignored with a warning.
    pub fn with_schema_overrides(&self, schema: &Value) -> RuleSet {
        let Some(raw) = schema.get(SCHEMA_RULES_KEY).and_then(Value::as_object) else {
            return self.clone();
        };

        let patch: RuleSet = match serde_json::from_value(Value::Object(raw.clone())) {
            Ok(patch) => patch,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring malformed {SCHEMA_RULES_KEY}");
                return self.clone();
            }
        };

        let mut merged = self.clone();
        if raw.contains_key("markers") {
            merged.markers = patch.markers;
        }
        if raw.contains_key("discriminant") {
            merged.discriminant = patch.discriminant;
        }
        if raw.contains_key("sectionRules") {
            merged.section_rules = patch.section_rules;
        }
        if raw.contains_key("sectionOrder") {
            merged.section_order = patch.section_order;
        }
        if raw.contains_key("typeLabels") {
            merged.type_labels = patch.type_labels;
        }
        if raw.contains_key("requirements") {
            merged.requirements = patch.requirements;
        }
        if raw.contains_key("wrapperRules") {
            merged.wrapper_rules = patch.wrapper_rules;
        }
        merged
    }

    /// Name the section a top-level field belongs to.
    ///
    /// Without section rules every field lands in the default section. With
    /// rules, the first matching rule decides; no match falls back to
    /// `Advanced`.
    pub fn section_for(&self, input: SectionInput<'_>) -> String {
        if self.section_rules.is_empty() {
            return DEFAULT_SECTION.to_string();
        }

        let types = input
            .visible_when
            .map(|vw| vw.strings_for(self.discriminant()))
            .unwrap_or_default();

        self.section_rules
            .iter()
            .find(|rule| self.condition_matches(&rule.condition, input, &types))
            .map(|rule| self.apply_action(&rule.action, input, &types))
            .unwrap_or_else(|| FALLBACK_SECTION.to_string())
    }

    /// Sort section names by `sectionOrder`; unlisted names keep their
    /// relative order after listed ones.
    pub fn section_rank(&self, name: &str) -> usize {
        self.section_order
            .iter()
            .position(|s| s == name)
            .unwrap_or(self.section_order.len())
    }

    fn condition_matches(&self, condition: &Condition, input: SectionInput<'_>, types: &[&str]) -> bool {
        let has_types = !types.is_empty();
        let contains = |t: &String| types.contains(&t.as_str());

        match condition {
            Condition::Always => true,
            Condition::HasExplicitGroup => input.group.is_some_and(|g| !g.is_empty()),
            Condition::NoVisibleWhen => input.visible_when.is_none(),
            Condition::VisibleTypesIncludeAll { types: wanted } => {
                has_types && wanted.iter().all(contains)
            }
            Condition::VisibleTypesIncludeAny { types: wanted } => {
                has_types && wanted.iter().any(contains)
            }
            Condition::VisibleTypesExact { types: wanted } => {
                has_types && types.len() == wanted.len() && wanted.iter().all(contains)
            }
            Condition::VisibleTypesMatch {
                includes,
                excludes,
                fields,
            } => {
                if !has_types {
                    return false;
                }
                if includes.as_ref().is_some_and(|inc| !inc.iter().all(contains)) {
                    return false;
                }
                if excludes.as_ref().is_some_and(|exc| exc.iter().any(contains)) {
                    return false;
                }
                match (fields, input.visible_when) {
                    (Some(fields), Some(vw)) => fields
                        .iter()
                        .all(|(key, expected)| vw.condition_equals(key, expected)),
                    _ => true,
                }
            }
            Condition::VisibleTypesMultiple => types.len() > 1,
            Condition::Unknown => false,
        }
    }

    fn apply_action(&self, action: &Action, input: SectionInput<'_>, types: &[&str]) -> String {
        match action {
            Action::UseExplicitGroup => input
                .group
                .filter(|g| !g.is_empty())
                .unwrap_or(FALLBACK_SECTION)
                .to_string(),
            Action::AssignSection { section } => section
                .clone()
                .unwrap_or_else(|| FALLBACK_SECTION.to_string()),
            Action::JoinTypeLabels { separator } => {
                if types.is_empty() {
                    return FALLBACK_SECTION.to_string();
                }
                types
                    .iter()
                    .map(|t| self.type_labels.get(*t).map(String::as_str).unwrap_or(*t))
                    .collect::<Vec<_>>()
                    .join(separator.as_deref().unwrap_or(", "))
            }
            Action::Unknown => FALLBACK_SECTION.to_string(),
        }
    }
}

/// Memoized rule sets keyed by `(rule-set id, mode)`.
#[derive(Debug, Default)]
pub struct RuleCache {
    entries: HashMap<(String, String), Arc<RuleSet>>,
}

impl RuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached rule set, loading it on first use.
    ///
    /// A failed load is not cached.
    ///
    /// # Errors
    ///
    /// Propagates the loader's error.
    pub fn get_or_load<F>(&mut self, id: &str, mode: &str, load: F) -> Result<Arc<RuleSet>, RuleError>
    where
        F: FnOnce() -> Result<RuleSet, RuleError>,
    {
        let key = (id.to_string(), crate::types::normalize_mode(mode));
        if let Some(rules) = self.entries.get(&key) {
            return Ok(Arc::clone(rules));
        }

        let rules = Arc::new(load()?);
        tracing::debug!(id, mode = %key.1, "caching rule set");
        self.entries.insert(key, Arc::clone(&rules));
        Ok(rules)
    }

    /// Drop every cached rule set.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sectioned() -> RuleSet {
        RuleSet::from_value(json!({
            "sectionRules": [
                { "name": "explicit", "condition": { "type": "has-explicit-group" },
                  "action": { "type": "use-explicit-group" } },
                { "name": "common", "condition": { "type": "no-visible-when" },
                  "action": { "type": "assign-section", "section": "Common" } },
                { "name": "shared", "condition": { "type": "visible-types-multiple" },
                  "action": { "type": "join-type-labels", "separator": " / " } },
                { "name": "static", "condition": { "type": "visible-types-include-any", "types": ["STATIC"] },
                  "action": { "type": "assign-section", "section": "Static" } }
            ],
            "sectionOrder": ["Common", "Static"],
            "typeLabels": { "STATIC": "Static", "EIGEN": "Eigenvalue" }
        }))
        .unwrap()
    }

    fn vw(value: Value) -> VisibleWhen {
        VisibleWhen::from_value(&value).unwrap()
    }

    #[test]
    fn default_section_without_rules() {
        let rules = RuleSet::default();
        assert_eq!(rules.section_for(SectionInput::default()), "General");
    }

    #[test]
    fn first_matching_rule_wins() {
        let rules = sectioned();

        let input = SectionInput {
            group: Some("Output"),
            visible_when: None,
        };
        assert_eq!(rules.section_for(input), "Output");

        assert_eq!(rules.section_for(SectionInput::default()), "Common");

        let both = vw(json!({ "TYPE": ["STATIC", "EIGEN"] }));
        let input = SectionInput {
            group: None,
            visible_when: Some(&both),
        };
        assert_eq!(rules.section_for(input), "Static / Eigenvalue");

        let single = vw(json!({ "TYPE": "STATIC" }));
        let input = SectionInput {
            group: None,
            visible_when: Some(&single),
        };
        assert_eq!(rules.section_for(input), "Static");
    }

    #[test]
    fn unmatched_falls_back_to_advanced() {
        let rules = sectioned();
        let other = vw(json!({ "TYPE": "BUCKLING" }));
        let input = SectionInput {
            group: None,
            visible_when: Some(&other),
        };
        assert_eq!(rules.section_for(input), "Advanced");
    }

    #[test]
    fn visible_types_match_conditions() {
        let rules = RuleSet::from_value(json!({
            "sectionRules": [{
                "condition": {
                    "type": "visible-types-match",
                    "includes": ["STATIC"],
                    "excludes": ["EIGEN"],
                    "fields": { "SOLVER": "DIRECT" }
                },
                "action": { "type": "assign-section", "section": "Direct" }
            }]
        }))
        .unwrap();

        let hit = vw(json!({ "TYPE": ["STATIC"], "SOLVER": "DIRECT" }));
        let excluded = vw(json!({ "TYPE": ["STATIC", "EIGEN"], "SOLVER": "DIRECT" }));
        let wrong_field = vw(json!({ "TYPE": "STATIC", "SOLVER": "ITERATIVE" }));

        let section = |v: &VisibleWhen| {
            rules.section_for(SectionInput {
                group: None,
                visible_when: Some(v),
            })
        };
        assert_eq!(section(&hit), "Direct");
        assert_eq!(section(&excluded), "Advanced");
        assert_eq!(section(&wrong_field), "Advanced");
    }

    #[test]
    fn unknown_condition_never_matches() {
        let rules = RuleSet::from_value(json!({
            "sectionRules": [
                { "condition": { "type": "moon-phase" }, "action": { "type": "assign-section", "section": "X" } },
                { "condition": { "type": "always" }, "action": { "type": "teleport" } }
            ]
        }))
        .unwrap();
        assert_eq!(rules.section_for(SectionInput::default()), "Advanced");
    }

    #[test]
    fn section_rank_orders_unknown_last() {
        let rules = sectioned();
        assert_eq!(rules.section_rank("Common"), 0);
        assert_eq!(rules.section_rank("Static"), 1);
        assert_eq!(rules.section_rank("Other"), 2);
    }

    #[test]
    fn requirements_mode_then_wildcard() {
        let rules = RuleSet::from_value(json!({
            "requirements": {
                "*": { "required": ["NAME"] },
                "static": { "optional": ["NAME"], "notApplicable": ["MODES"] }
            }
        }))
        .unwrap();

        let stat = ModeKey::parse("STATIC");
        let eigen = ModeKey::parse("EIGEN");
        assert_eq!(rules.requirement_for("NAME", &stat), Some(Requirement::Optional));
        assert_eq!(rules.requirement_for("NAME", &eigen), Some(Requirement::Required));
        assert_eq!(
            rules.requirement_for("MODES", &stat),
            Some(Requirement::NotApplicable)
        );
        assert_eq!(rules.requirement_for("OTHER", &stat), None);
    }

    #[test]
    fn bad_wrapper_pattern_rejected_at_load() {
        let err = RuleSet::from_value(json!({
            "wrapperRules": [{ "pattern": "([", "wrapperKey": "Assign" }]
        }))
        .unwrap_err();
        assert!(matches!(err, RuleError::InvalidPattern { .. }));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn schema_overrides_replace_present_keys() {
        let base = sectioned();
        let schema = json!({
            "type": "object",
            "x-schema-rules": { "sectionOrder": ["Static", "Common"], "discriminant": "KIND" }
        });
        let merged = base.with_schema_overrides(&schema);
        assert_eq!(merged.section_order, vec!["Static", "Common"]);
        assert_eq!(merged.discriminant(), "KIND");
        assert_eq!(merged.section_rules, base.section_rules);

        let untouched = base.with_schema_overrides(&json!({ "type": "object" }));
        assert_eq!(untouched, base);
    }

    #[test]
    fn cache_loads_once_per_id_and_mode() {
        let mut cache = RuleCache::new();
        let mut loads = 0;

        for mode in ["static", "STATIC", "eigen"] {
            cache
                .get_or_load("analysis", mode, || {
                    loads += 1;
                    Ok(RuleSet::default())
                })
                .unwrap();
        }
        assert_eq!(loads, 2);
        assert_eq!(cache.len(), 2);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn cache_does_not_store_failures() {
        let mut cache = RuleCache::new();
        let result = cache.get_or_load("bad", "static", || {
            RuleSet::from_value(json!({ "sectionRules": "nope" }))
        });
        assert!(result.is_err());
        assert!(cache.is_empty());
    }
}
