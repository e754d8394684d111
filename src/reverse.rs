//! Reverse mapping from a request payload back to form state.
//!
//! Import starts from fresh defaults and layers the payload on top. Objects
//! present in the payload are switched on, oneOf branches are inferred from
//! the keys that appear, and keys the form doesn't know are kept verbatim so
//! that re-assembly doesn't lose them.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::envelope::unwrap_envelope;
use crate::error::ReverseError;
use crate::projection::{BuilderField, BuilderKind};
use crate::state::{FieldIndex, FormState, InstanceSet};
use crate::types::{enabled_key, join_path, json_type_name, selected_option_key};

/// How a payload is interpreted.
#[derive(Debug, Clone, Default)]
pub struct ReverseOptions {
    /// Envelope keys that may wrap the payload root.
    pub wrapper_keys: Vec<String>,
    /// Treat the (unwrapped) root as `{"1": {...}, "2": {...}}`.
    pub multi_instance: bool,
}

impl ReverseOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wrapper_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.wrapper_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn multi_instance(mut self, multi_instance: bool) -> Self {
        self.multi_instance = multi_instance;
        self
    }
}

/// Result of an import.
#[derive(Debug, Clone, PartialEq)]
pub enum Imported {
    Single(FormState),
    Instances(InstanceSet),
}

/// Parse `text` and map it into form state.
///
/// # Errors
///
/// Returns `ReverseError::InvalidJson` for malformed text, otherwise the
/// errors of [`reverse_map`].
pub fn reverse_map_str(
    text: &str,
    fields: &[BuilderField],
    options: &ReverseOptions,
) -> Result<Imported, ReverseError> {
    let payload: Value =
        serde_json::from_str(text).map_err(|source| ReverseError::InvalidJson { source })?;
    reverse_map(&payload, fields, options)
}

/// Map a payload into form state.
///
/// # Errors
///
/// - `ReverseError::NotAnObject` if the payload (or an instance) isn't an object
/// - `ReverseError::InvalidInstanceKey` for a non-numeric instance key
/// - `ReverseError::NoInstances` for an empty multi-instance payload
pub fn reverse_map(
    payload: &Value,
    fields: &[BuilderField],
    options: &ReverseOptions,
) -> Result<Imported, ReverseError> {
    let (body, wrapper) = unwrap_envelope(payload, &options.wrapper_keys);
    if let Some(key) = wrapper {
        tracing::debug!(wrapper = key, "unwrapped payload");
    }
    let body = as_object(body)?;
    let index = FieldIndex::new(fields);

    if !options.multi_instance {
        return Ok(Imported::Single(import_body(body, fields, &index)));
    }

    let mut instances = BTreeMap::new();
    for (key, value) in body {
        let number = key
            .parse::<u32>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| ReverseError::InvalidInstanceKey { key: key.clone() })?;
        instances.insert(number, import_body(as_object(value)?, fields, &index));
    }
    let count = instances.len();
    let set = InstanceSet::from_instances(instances).ok_or(ReverseError::NoInstances)?;
    tracing::debug!(count, "imported instances");
    Ok(Imported::Instances(set))
}

fn as_object(value: &Value) -> Result<&Map<String, Value>, ReverseError> {
    value.as_object().ok_or_else(|| ReverseError::NotAnObject {
        actual: json_type_name(value).to_string(),
    })
}

fn import_body(body: &Map<String, Value>, fields: &[BuilderField], index: &FieldIndex) -> FormState {
    let mut state = FormState::initialize(fields);
    import_scope(&mut state, body, fields, "", index);
    state
}

/// Apply one JSON object level. `scope` holds the fields declared at this
/// level; oneOf children are part of the same level.
fn import_scope(
    state: &mut FormState,
    body: &Map<String, Value>,
    scope: &[BuilderField],
    prefix: &str,
    index: &FieldIndex,
) {
    // Branch selection clears branch keys, so it runs before any value is set.
    for field in scope.iter().filter(|f| f.kind == BuilderKind::OneOf) {
        select_branch(state, body, field, index);
    }

    for (key, value) in body {
        let path = join_path(prefix, key);
        match find_in_scope(scope, &path) {
            Some(field) if field.kind == BuilderKind::Object => {
                if let Value::Object(children) = value {
                    state.set(enabled_key(&path), Value::Bool(true));
                    if children.is_empty() {
                        // Nothing below it would assemble, so keep the object itself.
                        state.set(path.clone(), Value::Object(Map::new()));
                    }
                    import_scope(state, children, &field.children, &path, index);
                } else {
                    tracing::warn!(path = %path, "expected object, keeping value as is");
                    state.set(path, value.clone());
                }
            }
            Some(_) => state.set(path, value.clone()),
            None => {
                tracing::debug!(path = %path, "preserving unknown key");
                state.set(path, value.clone());
            }
        }
    }
}

/// Select the branch of `one_of` that matches the most keys of `body`.
/// Ties go to the lower index; no match leaves the current selection.
fn select_branch(state: &mut FormState, body: &Map<String, Value>, one_of: &BuilderField, index: &FieldIndex) {
    let best = (0..one_of.one_of_options.len())
        .map(|i| {
            let mut names = Vec::new();
            branch_names(one_of.branch_children(i), &mut names);
            (i, names.iter().filter(|n| body.contains_key(**n)).count())
        })
        .fold(None, |best: Option<(usize, usize)>, (i, hits)| match best {
            Some((_, top)) if top >= hits => best,
            _ if hits > 0 => Some((i, hits)),
            _ => best,
        });

    let selected = match best {
        Some((i, hits)) => {
            tracing::debug!(path = %one_of.path, branch = i, hits, "inferred branch");
            if state.selected_option(&one_of.path) != Some(i) {
                if let Err(e) = state.update(&selected_option_key(&one_of.path), Value::from(i), index) {
                    tracing::warn!(error = %e, "branch selection rejected");
                    return;
                }
            }
            i
        }
        None => match state.selected_option(&one_of.path) {
            Some(i) => i,
            None => return,
        },
    };

    for nested in one_of
        .branch_children(selected)
        .filter(|c| c.kind == BuilderKind::OneOf)
    {
        select_branch(state, body, nested, index);
    }
}

/// Names a branch contributes to its scope, looking through nested oneOfs.
fn branch_names<'a>(children: impl Iterator<Item = &'a BuilderField>, out: &mut Vec<&'a str>) {
    for child in children {
        if child.kind == BuilderKind::OneOf {
            branch_names(child.children.iter(), out);
        } else {
            out.push(child.name.as_str());
        }
    }
}

fn find_in_scope<'a>(scope: &'a [BuilderField], path: &str) -> Option<&'a BuilderField> {
    scope.iter().find_map(|field| {
        if field.kind == BuilderKind::OneOf {
            find_in_scope(&field.children, path)
        } else if field.path == path {
            Some(field)
        } else {
            None
        }
    })
}
