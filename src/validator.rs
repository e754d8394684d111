//! Field checks on form state.
//!
//! Only fields a user can see are checked: hidden fields, keys under a
//! disabled object and unselected oneOf branches are skipped. For each
//! remaining field the first failing check is reported:
//!
//! 1. required but empty
//! 2. value doesn't match the field type
//! 3. value outside the enumeration (or this mode's enumeration)
//! 4. array length against `x-node-count-by-type`, `minItems`, `maxItems`
//! 5. number against `minimum` / `maximum`

use serde_json::Value;

use crate::compiler::{CanonicalField, CompiledForm, EnumSpec, FieldKind};
use crate::error::{FieldError, ValidateError};
use crate::projection::{builder_fields, effective_mode, project, BuilderField, BuilderKind, ProjectionContext};
use crate::state::FormState;
use crate::types::is_empty_value;

/// Check one form state against a compiled form.
///
/// `mode` is the operating mode; a discriminant value in `state` wins over
/// it, as in projection.
///
/// # Errors
///
/// Returns `ValidateError::Invalid` listing every failing field in form
/// order.
pub fn validate_state(form: &CompiledForm, state: &FormState, mode: &str) -> Result<(), ValidateError> {
    let errors = check_state(form, state, mode);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidateError::Invalid { errors })
    }
}

/// Like [`validate_state`], returning the failures instead of an error.
pub fn check_state(form: &CompiledForm, state: &FormState, mode: &str) -> Vec<FieldError> {
    let ctx = ProjectionContext::new(mode).with_state(state);
    let fields = builder_fields(&project(form, &ctx));
    let mut checker = Checker {
        state,
        mode: effective_mode(form, &ctx),
        errors: Vec::new(),
    };

    let canonical = form.sections.iter().flat_map(|s| s.fields.iter());
    for (field, built) in canonical.zip(&fields) {
        checker.check(field, built);
    }
    checker.errors
}

struct Checker<'a> {
    state: &'a FormState,
    mode: String,
    errors: Vec<FieldError>,
}

impl Checker<'_> {
    /// `built` is the projection of `field`; both trees have the same shape.
    fn check(&mut self, field: &CanonicalField, built: &BuilderField) {
        if !built.visible {
            return;
        }
        match &field.kind {
            FieldKind::Object { children } => {
                if self.state.is_enabled(&built.path) {
                    for (child, built_child) in children.iter().zip(&built.children) {
                        self.check(child, built_child);
                    }
                }
            }
            FieldKind::OneOf { branches } => {
                let selected = self.state.selected_option(&built.path).unwrap_or(0);
                let children = branches.iter().flat_map(|b| b.fields.iter());
                for (child, built_child) in children
                    .zip(&built.children)
                    .filter(|(_, b)| b.option_index == Some(selected))
                {
                    self.check(child, built_child);
                }
            }
            _ => {
                if let Some(message) = self.value_error(field, built) {
                    self.errors.push(FieldError {
                        path: built.path.clone(),
                        message,
                    });
                }
            }
        }
    }

    fn value_error(&self, field: &CanonicalField, built: &BuilderField) -> Option<String> {
        let label = &built.label;
        let Some(value) = self.state.get(&built.path).filter(|v| !is_empty_value(v)) else {
            return built.required.then(|| format!("{label} is required"));
        };

        if let Some(message) = type_error(built, value) {
            return Some(message);
        }

        if built.kind == BuilderKind::Enum && !built.enum_values.contains(value) {
            let allowed = display_list(&built.enum_values, ", ");
            return Some(match field.enum_values {
                Some(EnumSpec::ByDiscriminant { .. }) => {
                    format!("Invalid value for {}. Must be one of: {allowed}", self.mode)
                }
                _ => format!("Invalid value. Must be one of: {allowed}"),
            });
        }

        match value {
            Value::Array(items) => self.length_error(field, label, items.len()),
            Value::Number(_) => range_error(field, label, value),
            _ => None,
        }
    }

    fn length_error(&self, field: &CanonicalField, label: &str, len: usize) -> Option<String> {
        let constraints = &field.constraints;
        let node_count = constraints
            .node_count_by_type
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(&self.mode))
            .map(|(_, count)| count);

        match node_count {
            Some(Value::Array(counts)) if !counts.iter().any(|c| c.as_u64() == Some(len as u64)) => {
                return Some(format!(
                    "{label} must have {} items for {}",
                    display_list(counts, " or "),
                    self.mode
                ));
            }
            Some(count @ Value::Number(_)) if count.as_u64() != Some(len as u64) => {
                return Some(format!("{label} must have exactly {count} items for {}", self.mode));
            }
            _ => {}
        }

        if let Some(min) = constraints.min_items.filter(|min| (len as u64) < *min) {
            return Some(format!("{label} must have at least {min} items"));
        }
        if let Some(max) = constraints.max_items.filter(|max| (len as u64) > *max) {
            return Some(format!("{label} must have at most {max} items"));
        }
        None
    }
}

fn type_error(built: &BuilderField, value: &Value) -> Option<String> {
    let label = &built.label;
    let numeric = value.as_f64().or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()));
    match built.kind {
        BuilderKind::Number if numeric.is_none() => Some(format!("{label} must be a number")),
        BuilderKind::Integer if !numeric.is_some_and(|n| n.fract() == 0.0) => {
            Some(format!("{label} must be an integer"))
        }
        BuilderKind::Boolean if !value.is_boolean() => Some(format!("{label} must be a boolean")),
        BuilderKind::Array if !value.is_array() => Some(format!("{label} must be an array")),
        _ => None,
    }
}

fn range_error(field: &CanonicalField, label: &str, value: &Value) -> Option<String> {
    let n = value.as_f64()?;
    let constraints = &field.constraints;
    if let Some(min) = constraints.minimum.as_ref().filter(|m| m.as_f64().is_some_and(|m| n < m)) {
        return Some(format!("{label} must be at least {min}"));
    }
    if let Some(max) = constraints.maximum.as_ref().filter(|m| m.as_f64().is_some_and(|m| n > m)) {
        return Some(format!("{label} must be at most {max}"));
    }
    None
}

/// Strings bare, everything else as JSON.
fn display_list(values: &[Value], separator: &str) -> String {
    values
        .iter()
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(separator)
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
                "COUNT": { "type": "integer", "minimum": 1, "maximum": 10 },
                "SCALE": { "type": "number" },
                "FLAG": { "type": "boolean" },
                "SOLVER": {
                    "type": "string",
                    "x-enum-by-type": { "STATIC": ["DIRECT"], "EIGEN": ["LANCZOS"] }
                },
                "NODES": {
                    "type": "array",
                    "items": { "type": "integer" },
                    "maxItems": 4,
                    "x-node-count-by-type": { "STATIC": [2, 3] }
                },
                "MODES": {
                    "type": "integer",
                    "x-ui": { "visibleWhen": { "TYPE": "EIGEN" } }
                },
                "UNIT": {
                    "type": "object",
                    "required": ["FORCE"],
                    "properties": { "FORCE": { "type": "string" } }
                },
                "METHOD": {
                    "oneOf": [
                        { "properties": { "ALPHA": { "type": "number" } } },
                        { "required": ["BETA"], "properties": { "BETA": { "type": "number" } } }
                    ]
                }
            }
        });
        compile(&schema, &CompileOptions::new("STATIC"), &RuleSet::default()).unwrap()
    }

    fn valid_state() -> FormState {
        [
            ("TYPE", json!("STATIC")),
            ("NAME", json!("beam")),
            ("COUNT", json!(3)),
            ("SOLVER", json!("DIRECT")),
            ("NODES", json!([1, 2])),
            ("UNIT._enabled", json!(false)),
            ("METHOD.__selectedOption", json!(0)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }

    fn messages(state: &FormState) -> Vec<String> {
        check_state(&form(), state, "STATIC")
            .into_iter()
            .map(|e| e.to_string())
            .collect()
    }

    #[test]
    fn valid_state_passes() {
        assert!(validate_state(&form(), &valid_state(), "STATIC").is_ok());
    }

    #[test]
    fn required_field_reported_with_label() {
        let mut state = valid_state();
        state.set("NAME", json!(""));
        assert_eq!(messages(&state), vec!["NAME: Analysis name is required"]);
    }

    #[test]
    fn type_mismatches_reported() {
        let mut state = valid_state();
        state.set("COUNT", json!(2.5));
        state.set("SCALE", json!("abc"));
        state.set("FLAG", json!("yes"));
        assert_eq!(
            messages(&state),
            vec![
                "COUNT: COUNT must be an integer",
                "SCALE: SCALE must be a number",
                "FLAG: FLAG must be a boolean",
            ]
        );

        state.set("COUNT", json!("4"));
        state.set("SCALE", json!("1.5"));
        state.set("FLAG", json!(false));
        assert!(messages(&state).is_empty());
    }

    #[test]
    fn enum_by_type_checked_for_live_mode() {
        let mut state = valid_state();
        state.set("SOLVER", json!("LANCZOS"));
        assert_eq!(
            messages(&state),
            vec!["SOLVER: Invalid value for STATIC. Must be one of: DIRECT"]
        );

        state.set("TYPE", json!("BOGUS"));
        assert_eq!(
            messages(&state)[0],
            "TYPE: Invalid value. Must be one of: STATIC, EIGEN"
        );
    }

    #[test]
    fn array_and_range_constraints() {
        let mut state = valid_state();
        state.set("NODES", json!([1, 2, 3, 4]));
        assert_eq!(
            messages(&state),
            vec!["NODES: NODES must have 2 or 3 items for STATIC"]
        );

        state.set("COUNT", json!(11));
        state.set("NODES", json!([1, 2]));
        assert_eq!(messages(&state), vec!["COUNT: COUNT must be at most 10"]);
    }

    #[test]
    fn hidden_disabled_and_unselected_fields_skipped() {
        let mut state = valid_state();
        state.set("MODES", json!("many"));
        state.set("UNIT.FORCE", json!(""));
        state.set("BETA", json!(""));
        assert!(messages(&state).is_empty());

        state.set("UNIT._enabled", json!(true));
        state.set("METHOD.__selectedOption", json!(1));
        assert_eq!(
            messages(&state),
            vec!["UNIT.FORCE: FORCE is required", "BETA: BETA is required"]
        );
    }
}
