//! Schema compilation into a canonical field tree.
//!
//! The compiler walks a normalized schema's `properties` depth-first in
//! declaration order and produces [`CanonicalField`]s grouped into
//! [`Section`]s. Compilation never aborts because of a single malformed
//! field: anything that can't be classified becomes an opaque scalar.
//!
//! # Requirement sources
//!
//! Later sources override earlier ones for the modes they name:
//!
//! | Source | Effect |
//! |--------|--------|
//! | `required` array | `*` → required, otherwise `*` → optional |
//! | `x-required-by-type` | per mode: required, optional, or n/a |
//! | `x-required-when` on the discriminant | listed modes required, other known modes n/a |
//! | `allOf` `if`/`then` on the discriminant | listed modes required |
//! | `x-ui.visibleWhen` on the discriminant | modes it excludes → n/a |
//! | rule-set `requirements` | explicit per-mode lists |

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::CompileError;
use crate::rules::{RuleSet, SectionInput};
use crate::structure::normalize;
use crate::types::{join_path, normalize_mode, CompileOptions, ModeKey, Requirement, VisibleWhen};

/// A compiled form: sections of canonical fields plus schema-level facts.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledForm {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Mode the form was compiled for.
    pub mode: String,
    /// Property whose value selects type-conditioned enumerations.
    pub discriminant: String,
    /// Modes declared by the discriminant's `enum`.
    pub modes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_root: Option<String>,
    pub sections: Vec<Section>,
}

impl CompiledForm {
    /// Top-level fields across all sections, in section order.
    pub fn fields(&self) -> impl Iterator<Item = &CanonicalField> {
        self.sections.iter().flat_map(|s| s.fields.iter())
    }

    /// Find a top-level field by name.
    pub fn field(&self, name: &str) -> Option<&CanonicalField> {
        self.fields().find(|f| f.name == name)
    }
}

/// A named group of top-level fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Section {
    pub name: String,
    pub order: usize,
    pub fields: Vec<CanonicalField>,
}

/// Normalized description of one field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalField {
    /// Dot-separated address. Children of a oneOf share the oneOf's parent
    /// scope, so the oneOf's own name never appears in their paths.
    pub path: String,
    pub name: String,
    #[serde(flatten)]
    pub kind: FieldKind,
    pub required_by_mode: RequiredByMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<EnumSpec>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub enum_labels: IndexMap<String, String>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub enum_labels_by_type: IndexMap<String, IndexMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "UiHints::is_empty")]
    pub ui: UiHints,
    /// Condition from `x-required-when` that doesn't involve the discriminant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_when: Option<VisibleWhen>,
    #[serde(skip_serializing_if = "Constraints::is_empty")]
    pub constraints: Constraints,
    /// Owning branch index when this field is a oneOf option's child.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<usize>,
}

/// The closed set of field shapes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FieldKind {
    Scalar {
        #[serde(rename = "type")]
        scalar: ScalarType,
    },
    Array {
        items: ItemType,
    },
    Object {
        children: Vec<CanonicalField>,
    },
    OneOf {
        branches: Vec<Branch>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    String,
    Integer,
    Number,
    Boolean,
    /// Unknown or malformed declaration; carried through untouched.
    Opaque,
}

/// Element type of an array field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
    Any,
}

/// One alternative of a oneOf field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Branch {
    pub index: usize,
    pub title: String,
    pub fields: Vec<CanonicalField>,
}

/// Enumerated values: a fixed list or lists keyed by discriminant value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EnumSpec {
    List(Vec<Value>),
    ByDiscriminant {
        discriminant: String,
        lists: IndexMap<String, Vec<Value>>,
    },
}

/// Per-mode requirement with a wildcard fallback.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RequiredByMode(BTreeMap<ModeKey, Requirement>);

impl RequiredByMode {
    pub fn set(&mut self, key: ModeKey, requirement: Requirement) {
        self.0.insert(key, requirement);
    }

    pub fn get(&self, key: &ModeKey) -> Option<Requirement> {
        self.0.get(key).copied()
    }

    /// Requirement for a mode: the mode's entry, else the wildcard, else
    /// optional.
    pub fn resolve(&self, mode: &str) -> Requirement {
        self.0
            .get(&ModeKey::parse(mode))
            .or_else(|| self.0.get(&ModeKey::Any))
            .copied()
            .unwrap_or_default()
    }
}

/// Presentation hints from `x-ui`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UiHints {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visible_when: Option<VisibleWhen>,
}

impl UiHints {
    pub fn is_empty(&self) -> bool {
        *self == UiHints::default()
    }
}

/// Display-only constraints. Payloads are never validated against them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Constraints {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_items: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_items: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum: Option<Value>,
    /// `x-value-constraint`: description of allowed values per discriminant value.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub value_constraint: Map<String, Value>,
    /// `x-node-count-by-type`: node counts per discriminant value.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub node_count_by_type: Map<String, Value>,
}

impl Constraints {
    pub fn is_empty(&self) -> bool {
        *self == Constraints::default()
    }
}

/// Compile a schema for a mode.
///
/// The rule set's discriminant, when set, wins over the options'.
/// `x-schema-rules` embedded in the schema override the rule set.
///
/// # Errors
///
/// Returns `CompileError::RootNotObject` if the schema isn't a JSON object.
pub fn compile(
    schema: &Value,
    options: &CompileOptions,
    rules: &RuleSet,
) -> Result<CompiledForm, CompileError> {
    let normalized = normalize(schema)?;
    let mut rules = rules.with_schema_overrides(schema);
    let discriminant = rules
        .discriminant
        .clone()
        .unwrap_or_else(|| options.discriminant.clone());
    rules.discriminant = Some(discriminant.clone());

    let root = &normalized.root;
    let modes = declared_modes(root, &discriminant);
    let conditional = conditional_requirements(root, &discriminant);

    let ctx = Context {
        discriminant: &discriminant,
        modes: &modes,
        conditional: &conditional,
        rules: &rules,
    };
    let fields = ctx.compile_properties(root, "", None);

    let mut sections: Vec<Section> = Vec::new();
    for field in fields {
        let name = rules.section_for(SectionInput {
            group: field.ui.group.as_deref(),
            visible_when: field.ui.visible_when.as_ref(),
        });
        match sections.iter_mut().find(|s| s.name == name) {
            Some(section) => section.fields.push(field),
            None => sections.push(Section {
                name,
                order: 0,
                fields: vec![field],
            }),
        }
    }
    // Stable sort keeps first-appearance order among unlisted sections.
    sections.sort_by_key(|s| rules.section_rank(&s.name));
    for (order, section) in sections.iter_mut().enumerate() {
        section.order = order;
    }

    tracing::debug!(
        mode = %options.mode,
        sections = sections.len(),
        "compiled schema"
    );

    Ok(CompiledForm {
        title: normalized.title,
        mode: options.mode.clone(),
        discriminant,
        modes,
        body_root: normalized.body_root,
        sections,
    })
}

/// Modes from the discriminant property's `enum`, normalized.
fn declared_modes(root: &Value, discriminant: &str) -> Vec<String> {
    root.get("properties")
        .and_then(|p| p.get(discriminant))
        .and_then(|d| d.get("enum"))
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_str)
                .map(normalize_mode)
                .collect()
        })
        .unwrap_or_default()
}

/// Field names made required per mode by `allOf` `if`/`then` rules keyed
/// on the discriminant's `const` or `enum`.
fn conditional_requirements(root: &Value, discriminant: &str) -> HashMap<String, Vec<String>> {
    let mut required: HashMap<String, Vec<String>> = HashMap::new();
    let Some(rules) = root.get("allOf").and_then(Value::as_array) else {
        return required;
    };

    for rule in rules {
        let Some(condition) = rule
            .get("if")
            .and_then(|i| i.get("properties"))
            .and_then(|p| p.get(discriminant))
        else {
            continue;
        };
        let modes: Vec<String> = match (condition.get("const"), condition.get("enum")) {
            (Some(Value::String(c)), _) => vec![normalize_mode(c)],
            (_, Some(Value::Array(values))) => values
                .iter()
                .filter_map(Value::as_str)
                .map(normalize_mode)
                .collect(),
            _ => continue,
        };
        let names = rule
            .get("then")
            .and_then(|t| t.get("required"))
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str);
        for name in names {
            required
                .entry(name.to_string())
                .or_default()
                .extend(modes.iter().cloned());
        }
    }
    required
}

struct Context<'a> {
    discriminant: &'a str,
    modes: &'a [String],
    conditional: &'a HashMap<String, Vec<String>>,
    rules: &'a RuleSet,
}

impl Context<'_> {
    /// Compile the `properties` of an object-like schema in declaration order.
    fn compile_properties(&self, schema: &Value, scope: &str, branch: Option<usize>) -> Vec<CanonicalField> {
        let required: Vec<&str> = schema
            .get("required")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .collect();
        let top_level = scope.is_empty() && branch.is_none();

        schema
            .get("properties")
            .and_then(Value::as_object)
            .into_iter()
            .flatten()
            .map(|(name, prop)| {
                let is_required = required.contains(&name.as_str());
                self.compile_field(name, prop, scope, is_required, top_level, branch)
            })
            .collect()
    }

    fn compile_field(
        &self,
        name: &str,
        prop: &Value,
        scope: &str,
        is_required: bool,
        top_level: bool,
        branch: Option<usize>,
    ) -> CanonicalField {
        let path = join_path(scope, name);

        let Some(obj) = prop.as_object() else {
            tracing::warn!(path = %path, actual = crate::types::json_type_name(prop), "field declaration is not an object");
            return self.opaque(name, &path, is_required, branch);
        };

        let kind = self.classify(obj, &path, scope);
        let default = match kind {
            FieldKind::Scalar {
                scalar: ScalarType::Opaque,
            } => None,
            _ => obj.get("default").cloned(),
        };

        let ui = ui_hints(obj);
        let (required_by_mode, required_when) =
            self.required_by_mode(obj, &path, is_required, top_level, ui.visible_when.as_ref());

        CanonicalField {
            path,
            name: name.to_string(),
            kind,
            required_by_mode,
            default,
            enum_values: self.enum_values(obj),
            enum_labels: string_map(obj.get("x-enum-labels")),
            enum_labels_by_type: obj
                .get("x-enum-labels-by-type")
                .and_then(Value::as_object)
                .map(|m| m.iter().map(|(k, v)| (k.clone(), string_map(Some(v)))).collect())
                .unwrap_or_default(),
            label: obj.get("title").and_then(Value::as_str).map(str::to_string),
            description: obj.get("description").and_then(Value::as_str).map(str::to_string),
            ui,
            required_when,
            constraints: constraints(obj),
            branch,
        }
    }

    fn opaque(&self, name: &str, path: &str, is_required: bool, branch: Option<usize>) -> CanonicalField {
        let mut required_by_mode = RequiredByMode::default();
        required_by_mode.set(ModeKey::Any, base_requirement(is_required));
        CanonicalField {
            path: path.to_string(),
            name: name.to_string(),
            kind: FieldKind::Scalar {
                scalar: ScalarType::Opaque,
            },
            required_by_mode,
            default: None,
            enum_values: None,
            enum_labels: IndexMap::new(),
            enum_labels_by_type: IndexMap::new(),
            label: None,
            description: None,
            ui: UiHints::default(),
            required_when: None,
            constraints: Constraints::default(),
            branch,
        }
    }

    fn classify(&self, obj: &Map<String, Value>, path: &str, scope: &str) -> FieldKind {
        if let Some(options) = obj.get("oneOf") {
            let Some(options) = options.as_array() else {
                tracing::warn!(path, "oneOf is not an array");
                return FieldKind::Scalar {
                    scalar: ScalarType::Opaque,
                };
            };
            let branches = options
                .iter()
                .enumerate()
                .map(|(index, option)| Branch {
                    index,
                    title: option
                        .get("title")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("Option {}", index + 1)),
                    // Branch children live in the oneOf's parent scope.
                    fields: self.compile_properties(option, scope, Some(index)),
                })
                .collect();
            return FieldKind::OneOf { branches };
        }

        match declared_type(obj) {
            Some("object") if obj.get("properties").is_some_and(Value::is_object) => FieldKind::Object {
                children: self.compile_properties(&Value::Object(obj.clone()), path, None),
            },
            Some("array") => FieldKind::Array {
                items: item_type(obj.get("items")),
            },
            Some("string") => scalar(ScalarType::String),
            Some("integer") => scalar(ScalarType::Integer),
            Some("number") => scalar(ScalarType::Number),
            Some("boolean") => scalar(ScalarType::Boolean),
            // A bare enum without a type is still a usable choice list.
            None if obj.get("enum").is_some_and(Value::is_array) => scalar(ScalarType::String),
            other => {
                tracing::warn!(path, declared = ?other, "unclassifiable field compiled as opaque");
                scalar(ScalarType::Opaque)
            }
        }
    }

    /// Direct `enum` takes precedence over `x-enum-by-type`.
    fn enum_values(&self, obj: &Map<String, Value>) -> Option<EnumSpec> {
        if let Some(values) = obj.get("enum").and_then(Value::as_array) {
            return Some(EnumSpec::List(values.clone()));
        }
        let by_type = obj.get("x-enum-by-type")?.as_object()?;
        let lists = by_type
            .iter()
            .filter_map(|(key, values)| Some((key.clone(), values.as_array()?.clone())))
            .collect();
        Some(EnumSpec::ByDiscriminant {
            discriminant: self.discriminant.to_string(),
            lists,
        })
    }

    fn required_by_mode(
        &self,
        obj: &Map<String, Value>,
        path: &str,
        is_required: bool,
        top_level: bool,
        visible_when: Option<&VisibleWhen>,
    ) -> (RequiredByMode, Option<VisibleWhen>) {
        let mut by_mode = RequiredByMode::default();
        by_mode.set(ModeKey::Any, base_requirement(is_required));

        if let Some(by_type) = obj.get("x-required-by-type").and_then(Value::as_object) {
            for (mode, status) in by_type {
                by_mode.set(ModeKey::parse(mode), requirement_from_status(status));
            }
            for mode in self.modes {
                let key = ModeKey::Mode(mode.clone());
                if by_mode.get(&key).is_none() {
                    by_mode.set(key, Requirement::NotApplicable);
                }
            }
        }

        let mut required_when = None;
        if let Some(condition) = obj.get("x-required-when").and_then(VisibleWhen::from_value) {
            match condition.values_for(self.discriminant) {
                Some(_) if condition.0.len() == 1 => {
                    let wanted: Vec<String> = condition
                        .strings_for(self.discriminant)
                        .into_iter()
                        .map(normalize_mode)
                        .collect();
                    for mode in self.modes.iter().filter(|m| !wanted.contains(m)) {
                        by_mode.set(ModeKey::Mode(mode.clone()), Requirement::NotApplicable);
                    }
                    for mode in wanted {
                        by_mode.set(ModeKey::Mode(mode), Requirement::Required);
                    }
                }
                _ => required_when = Some(condition),
            }
        }

        if top_level {
            if let Some(modes) = self.conditional.get(path) {
                for mode in modes {
                    by_mode.set(ModeKey::Mode(mode.clone()), Requirement::Required);
                }
            }
        }

        if let Some(visible) = visible_when.and_then(|vw| vw.values_for(self.discriminant).map(|_| vw)) {
            let shown: Vec<String> = visible
                .strings_for(self.discriminant)
                .into_iter()
                .map(normalize_mode)
                .collect();
            for mode in self.modes.iter().filter(|m| !shown.contains(m)) {
                by_mode.set(ModeKey::Mode(mode.clone()), Requirement::NotApplicable);
            }
        }

        for (mode, lists) in &self.rules.requirements {
            if let Some(requirement) = lists.lookup(path) {
                by_mode.set(mode.clone(), requirement);
            }
        }

        (by_mode, required_when)
    }
}

fn scalar(scalar: ScalarType) -> FieldKind {
    FieldKind::Scalar { scalar }
}

fn base_requirement(is_required: bool) -> Requirement {
    if is_required {
        Requirement::Required
    } else {
        Requirement::Optional
    }
}

/// `type` as a string, or the first non-null entry of a type array.
fn declared_type(obj: &Map<String, Value>) -> Option<&str> {
    match obj.get("type")? {
        Value::String(t) => Some(t.as_str()),
        Value::Array(types) => types.iter().filter_map(Value::as_str).find(|t| *t != "null"),
        _ => None,
    }
}

fn item_type(items: Option<&Value>) -> ItemType {
    let declared = items.and_then(Value::as_object).and_then(declared_type);
    match declared {
        Some("string") => ItemType::String,
        Some("integer") => ItemType::Integer,
        Some("number") => ItemType::Number,
        Some("boolean") => ItemType::Boolean,
        Some("object") => ItemType::Object,
        Some("array") => ItemType::Array,
        _ => ItemType::Any,
    }
}

fn requirement_from_status(status: &Value) -> Requirement {
    match status {
        Value::Bool(true) => Requirement::Required,
        Value::String(s) => Requirement::parse(s).unwrap_or_default(),
        _ => Requirement::NotApplicable,
    }
}

fn ui_hints(obj: &Map<String, Value>) -> UiHints {
    let Some(ui) = obj.get("x-ui") else {
        return UiHints::default();
    };
    let text = |key: &str| ui.get(key).and_then(Value::as_str).map(str::to_string);
    UiHints {
        label: text("label"),
        group: text("group"),
        hint: text("hint"),
        visible_when: ui.get("visibleWhen").and_then(VisibleWhen::from_value),
    }
}

fn string_map(value: Option<&Value>) -> IndexMap<String, String> {
    value
        .and_then(Value::as_object)
        .map(|m| {
            m.iter()
                .map(|(k, v)| {
                    let label = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), label)
                })
                .collect()
        })
        .unwrap_or_default()
}

fn constraints(obj: &Map<String, Value>) -> Constraints {
    let object = |key: &str| obj.get(key).and_then(Value::as_object).cloned().unwrap_or_default();
    Constraints {
        min_items: obj.get("minItems").and_then(Value::as_u64),
        max_items: obj.get("maxItems").and_then(Value::as_u64),
        minimum: obj.get("minimum").cloned(),
        maximum: obj.get("maximum").cloned(),
        value_constraint: object("x-value-constraint"),
        node_count_by_type: object("x-node-count-by-type"),
    }
}

/// Memoized compilation keyed by schema, rule set, and mode.
#[derive(Debug, Default)]
pub struct CompileCache {
    entries: HashMap<(u64, u64, String), Arc<CompiledForm>>,
}

impl CompileCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached form, compiling on first use.
    ///
    /// # Errors
    ///
    /// Propagates [`compile`] errors; failures are not cached.
    pub fn get_or_compile(
        &mut self,
        schema: &Value,
        options: &CompileOptions,
        rules: &RuleSet,
    ) -> Result<Arc<CompiledForm>, CompileError> {
        let key = (
            fingerprint(schema),
            serde_json::to_value(rules).map(|v| fingerprint(&v)).unwrap_or_default(),
            format!("{}|{}", options.mode, options.discriminant),
        );
        if let Some(form) = self.entries.get(&key) {
            return Ok(Arc::clone(form));
        }
        let form = Arc::new(compile(schema, options, rules)?);
        self.entries.insert(key, Arc::clone(&form));
        Ok(form)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn fingerprint(value: &Value) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.to_string().hash(&mut hasher);
    hasher.finish()
}
