//! Projection of canonical fields into builder fields.
//!
//! Builder fields are what a form renderer consumes: a resolved requirement
//! flag, a concrete initial value, the enumeration that applies right now,
//! and a visibility flag. Projection is deterministic for a given compiled
//! form, mode, and form state, and is recomputed on every read.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use crate::compiler::{CanonicalField, CompiledForm, EnumSpec, FieldKind, ItemType, ScalarType};
use crate::state::FormState;
use crate::types::{normalize_mode, Requirement, VisibleWhen};

/// Renderer-facing field kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BuilderKind {
    String,
    Number,
    Integer,
    Boolean,
    Enum,
    Array,
    Object,
    OneOf,
    Opaque,
}

/// A field ready for rendering.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuilderField {
    pub path: String,
    pub name: String,
    pub kind: BuilderKind,
    pub required: bool,
    pub requirement: Requirement,
    /// Value a fresh form starts with.
    pub initial: Value,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<Value>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub enum_labels: IndexMap<String, String>,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    pub visible: bool,
    /// The `x-ui.visibleWhen` condition behind `visible`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visible_when: Option<VisibleWhen>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_type: Option<ItemType>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<BuilderField>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub one_of_options: Vec<String>,
    /// Branch this field belongs to when it is a oneOf option's child.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub option_index: Option<usize>,
}

impl BuilderField {
    /// Children belonging to one oneOf branch.
    pub fn branch_children(&self, index: usize) -> impl Iterator<Item = &BuilderField> {
        self.children
            .iter()
            .filter(move |c| c.option_index == Some(index))
    }
}

/// Projection output: section headers interleaved with fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "entry", rename_all = "camelCase")]
pub enum BuilderEntry {
    Section { name: String },
    Field(BuilderField),
}

/// Inputs that change between projections of the same compiled form.
#[derive(Debug, Clone, Copy)]
pub struct ProjectionContext<'a> {
    /// Operating mode; used when the state holds no discriminant value.
    pub mode: &'a str,
    pub state: Option<&'a FormState>,
}

impl<'a> ProjectionContext<'a> {
    pub fn new(mode: &'a str) -> Self {
        Self { mode, state: None }
    }

    pub fn with_state(mut self, state: &'a FormState) -> Self {
        self.state = Some(state);
        self
    }
}

/// Project a compiled form into builder entries.
///
/// The effective mode is the discriminant's current value in the state,
/// else the discriminant field's default, else the operating mode.
pub fn project(form: &CompiledForm, ctx: &ProjectionContext<'_>) -> Vec<BuilderEntry> {
    let mode = effective_mode(form, ctx);
    let projector = Projector {
        mode: &mode,
        state: ctx.state,
    };

    let mut entries = Vec::new();
    for section in &form.sections {
        entries.push(BuilderEntry::Section {
            name: section.name.clone(),
        });
        entries.extend(
            section
                .fields
                .iter()
                .map(|f| BuilderEntry::Field(projector.field(f, None))),
        );
    }
    entries
}

/// Fields only, in projection order.
pub fn builder_fields(entries: &[BuilderEntry]) -> Vec<BuilderField> {
    entries
        .iter()
        .filter_map(|e| match e {
            BuilderEntry::Field(field) => Some(field.clone()),
            BuilderEntry::Section { .. } => None,
        })
        .collect()
}

/// The enumeration that applies to a field for a discriminant value.
///
/// A direct list applies regardless of the discriminant. A by-discriminant
/// list applies only for a matching value; anything else yields no values.
pub fn resolve_enum(field: &CanonicalField, discriminant_value: Option<&str>) -> Vec<Value> {
    match &field.enum_values {
        Some(EnumSpec::List(values)) => values.clone(),
        Some(EnumSpec::ByDiscriminant { lists, .. }) => discriminant_value
            .and_then(|value| {
                lists.get(value).or_else(|| {
                    lists
                        .iter()
                        .find(|(key, _)| key.eq_ignore_ascii_case(value))
                        .map(|(_, list)| list)
                })
            })
            .cloned()
            .unwrap_or_default(),
        None => Vec::new(),
    }
}

/// Initial value: explicit default, else first enum value, else an empty
/// value for the kind.
pub fn initial_value(kind: BuilderKind, default: Option<&Value>, enum_values: &[Value]) -> Value {
    if let Some(default) = default.filter(|d| !d.is_null()) {
        return default.clone();
    }
    if let Some(first) = enum_values.first() {
        return first.clone();
    }
    match kind {
        BuilderKind::Array => Value::Array(Vec::new()),
        BuilderKind::Boolean => Value::Bool(false),
        _ => Value::String(String::new()),
    }
}

pub(crate) fn effective_mode(form: &CompiledForm, ctx: &ProjectionContext<'_>) -> String {
    let from_state = ctx
        .state
        .and_then(|s| s.get(&form.discriminant))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty());
    let from_default = || {
        form.field(&form.discriminant)
            .and_then(|f| f.default.as_ref())
            .and_then(Value::as_str)
    };
    normalize_mode(from_state.or_else(from_default).unwrap_or(ctx.mode))
}

struct Projector<'a> {
    mode: &'a str,
    state: Option<&'a FormState>,
}

impl Projector<'_> {
    fn field(&self, field: &CanonicalField, option_index: Option<usize>) -> BuilderField {
        let enum_values = resolve_enum(field, Some(self.mode));
        let (kind, item_type, children, one_of_options) = match &field.kind {
            FieldKind::Scalar { scalar } => {
                let kind = if enum_values.is_empty() {
                    scalar_kind(*scalar)
                } else {
                    BuilderKind::Enum
                };
                (kind, None, Vec::new(), Vec::new())
            }
            FieldKind::Array { items } => (BuilderKind::Array, Some(*items), Vec::new(), Vec::new()),
            FieldKind::Object { children } => (
                BuilderKind::Object,
                None,
                children.iter().map(|c| self.field(c, None)).collect(),
                Vec::new(),
            ),
            FieldKind::OneOf { branches } => (
                BuilderKind::OneOf,
                None,
                branches
                    .iter()
                    .flat_map(|b| b.fields.iter().map(|c| self.field(c, Some(b.index))))
                    .collect(),
                branches.iter().map(|b| b.title.clone()).collect(),
            ),
        };

        let requirement = field.required_by_mode.resolve(self.mode);
        let conditionally_required = field
            .required_when
            .as_ref()
            .is_some_and(|cond| self.strictly_satisfied(cond));
        let visible = requirement != Requirement::NotApplicable
            && field
                .ui
                .visible_when
                .as_ref()
                .map_or(true, |vw| self.satisfied(vw));

        BuilderField {
            path: field.path.clone(),
            name: field.name.clone(),
            kind,
            required: requirement == Requirement::Required || conditionally_required,
            requirement,
            initial: initial_value(kind, field.default.as_ref(), &enum_values),
            enum_labels: self.enum_labels(field),
            enum_values,
            label: field
                .ui
                .label
                .clone()
                .or_else(|| field.label.clone())
                .unwrap_or_else(|| field.name.clone()),
            description: field.description.clone(),
            placeholder: self.placeholder(field),
            visible,
            visible_when: field.ui.visible_when.clone(),
            item_type,
            children,
            one_of_options,
            option_index,
        }
    }

    fn lookup(&self, key: &str) -> Option<&Value> {
        self.state.and_then(|s| s.get(key))
    }

    fn satisfied(&self, condition: &VisibleWhen) -> bool {
        condition.is_satisfied(|key| self.lookup(key))
    }

    /// Every referenced value is present and matches.
    fn strictly_satisfied(&self, condition: &VisibleWhen) -> bool {
        condition.0.keys().all(|key| self.lookup(key).is_some()) && self.satisfied(condition)
    }

    fn enum_labels(&self, field: &CanonicalField) -> IndexMap<String, String> {
        field
            .enum_labels_by_type
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(self.mode))
            .map(|(_, labels)| labels.clone())
            .unwrap_or_else(|| field.enum_labels.clone())
    }

    /// `x-ui.hint`, else this mode's value constraint, else its node count.
    fn placeholder(&self, field: &CanonicalField) -> Option<String> {
        if let Some(hint) = &field.ui.hint {
            return Some(hint.clone());
        }
        let for_mode = |map: &serde_json::Map<String, Value>| {
            map.iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(self.mode))
                .map(|(_, value)| value.clone())
        };
        if let Some(constraint) = for_mode(&field.constraints.value_constraint) {
            return Some(match constraint {
                Value::String(s) => s,
                other => other.to_string(),
            });
        }
        for_mode(&field.constraints.node_count_by_type).map(|count| match count {
            Value::Array(counts) => {
                let counts: Vec<String> = counts.iter().map(Value::to_string).collect();
                format!("{} nodes", counts.join(" or "))
            }
            other => format!("{other} nodes"),
        })
    }
}

fn scalar_kind(scalar: ScalarType) -> BuilderKind {
    match scalar {
        ScalarType::String => BuilderKind::String,
        ScalarType::Integer => BuilderKind::Integer,
        ScalarType::Number => BuilderKind::Number,
        ScalarType::Boolean => BuilderKind::Boolean,
        ScalarType::Opaque => BuilderKind::Opaque,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::rules::RuleSet;
    use crate::types::CompileOptions;
    use serde_json::json;

    fn form() -> CompiledForm {
        let schema = json!({
            "type": "object",
            "required": ["NAME"],
            "properties": {
                "TYPE": { "type": "string", "enum": ["STATIC", "EIGEN"] },
                "NAME": { "type": "string", "x-ui": { "label": "Analysis name" } },
                "FLAG": { "type": "boolean" },
                "COUNT": { "type": "integer", "default": 3 },
                "LOADS": { "type": "array", "items": { "type": "string" } },
                "SOLVER": {
                    "type": "string",
                    "x-enum-by-type": { "STATIC": ["DIRECT", "ITERATIVE"], "EIGEN": ["LANCZOS"] },
                    "x-enum-labels-by-type": { "EIGEN": { "LANCZOS": "Lanczos" } },
                    "x-enum-labels": { "DIRECT": "Direct" }
                },
                "MODES": {
                    "type": "integer",
                    "x-ui": { "visibleWhen": { "TYPE": "EIGEN" } },
                    "x-value-constraint": { "EIGEN": "1 to 100" }
                },
                "NODES": {
                    "type": "array",
                    "items": { "type": "integer" },
                    "x-node-count-by-type": { "STATIC": [2, 3] }
                },
                "REF": { "type": "string", "x-required-when": { "FLAG": true } },
                "UNIT": {
                    "type": "object",
                    "properties": { "FORCE": { "type": "string" } }
                },
                "METHOD": {
                    "oneOf": [
                        { "title": "Alpha", "properties": { "ALPHA": { "type": "number" } } },
                        { "title": "Beta", "properties": { "BETA": { "type": "number" } } }
                    ]
                }
            }
        });
        compile(&schema, &CompileOptions::new("STATIC"), &RuleSet::default()).unwrap()
    }

    fn field<'a>(fields: &'a [BuilderField], name: &str) -> &'a BuilderField {
        fields.iter().find(|f| f.name == name).unwrap()
    }

    #[test]
    fn section_headers_precede_fields() {
        let entries = project(&form(), &ProjectionContext::new("STATIC"));
        assert_eq!(
            entries[0],
            BuilderEntry::Section {
                name: "General".into()
            }
        );
        assert!(matches!(entries[1], BuilderEntry::Field(ref f) if f.name == "TYPE"));
    }

    #[test]
    fn initial_value_policy() {
        let fields = builder_fields(&project(&form(), &ProjectionContext::new("STATIC")));
        assert_eq!(field(&fields, "TYPE").initial, json!("STATIC"));
        assert_eq!(field(&fields, "NAME").initial, json!(""));
        assert_eq!(field(&fields, "FLAG").initial, json!(false));
        assert_eq!(field(&fields, "COUNT").initial, json!(3));
        assert_eq!(field(&fields, "LOADS").initial, json!([]));
        assert_eq!(field(&fields, "SOLVER").initial, json!("DIRECT"));
    }

    #[test]
    fn kinds_and_labels() {
        let fields = builder_fields(&project(&form(), &ProjectionContext::new("STATIC")));
        assert_eq!(field(&fields, "TYPE").kind, BuilderKind::Enum);
        assert_eq!(field(&fields, "NAME").label, "Analysis name");
        assert!(field(&fields, "NAME").required);
        assert_eq!(field(&fields, "COUNT").label, "COUNT");
        assert_eq!(field(&fields, "LOADS").item_type, Some(ItemType::String));
        assert_eq!(field(&fields, "UNIT").children[0].path, "UNIT.FORCE");
    }

    #[test]
    fn enum_by_type_follows_state() {
        let form = form();
        let fields = builder_fields(&project(&form, &ProjectionContext::new("STATIC")));
        let solver = field(&fields, "SOLVER");
        assert_eq!(solver.enum_values, vec![json!("DIRECT"), json!("ITERATIVE")]);
        assert_eq!(solver.enum_labels["DIRECT"], "Direct");

        let mut state = FormState::default();
        state.set("TYPE", json!("EIGEN"));
        let fields = builder_fields(&project(&form, &ProjectionContext::new("STATIC").with_state(&state)));
        let solver = field(&fields, "SOLVER");
        assert_eq!(solver.enum_values, vec![json!("LANCZOS")]);
        assert_eq!(solver.enum_labels["LANCZOS"], "Lanczos");
    }

    #[test]
    fn resolve_enum_is_pure() {
        let form = form();
        let solver = form.field("SOLVER").unwrap();
        assert_eq!(resolve_enum(solver, Some("eigen")), vec![json!("LANCZOS")]);
        assert!(resolve_enum(solver, Some("BUCKLING")).is_empty());
        assert!(resolve_enum(solver, None).is_empty());
        assert_eq!(
            resolve_enum(form.field("TYPE").unwrap(), None),
            vec![json!("STATIC"), json!("EIGEN")]
        );
    }

    #[test]
    fn visibility_and_placeholders() {
        let form = form();
        let fields = builder_fields(&project(&form, &ProjectionContext::new("STATIC")));
        assert!(!field(&fields, "MODES").visible);
        assert_eq!(field(&fields, "NODES").placeholder.as_deref(), Some("2 or 3 nodes"));

        let mut state = FormState::default();
        state.set("TYPE", json!("EIGEN"));
        let fields = builder_fields(&project(&form, &ProjectionContext::new("STATIC").with_state(&state)));
        assert!(field(&fields, "MODES").visible);
        assert_eq!(field(&fields, "MODES").placeholder.as_deref(), Some("1 to 100"));
    }

    #[test]
    fn required_when_needs_present_values() {
        let form = form();
        let fields = builder_fields(&project(&form, &ProjectionContext::new("STATIC")));
        assert!(!field(&fields, "REF").required);

        let mut state = FormState::default();
        state.set("FLAG", json!(true));
        let fields = builder_fields(&project(&form, &ProjectionContext::new("STATIC").with_state(&state)));
        assert!(field(&fields, "REF").required);
    }

    #[test]
    fn one_of_exposes_options_and_indices() {
        let fields = builder_fields(&project(&form(), &ProjectionContext::new("STATIC")));
        let method = field(&fields, "METHOD");
        assert_eq!(method.kind, BuilderKind::OneOf);
        assert_eq!(method.one_of_options, vec!["Alpha", "Beta"]);
        assert_eq!(method.children.len(), 2);
        let beta: Vec<_> = method.branch_children(1).map(|c| c.path.as_str()).collect();
        assert_eq!(beta, vec!["BETA"]);
    }

    #[test]
    fn projection_is_deterministic() {
        let form = form();
        let a = project(&form, &ProjectionContext::new("STATIC"));
        let b = project(&form, &ProjectionContext::new("STATIC"));
        assert_eq!(a, b);
    }
}
