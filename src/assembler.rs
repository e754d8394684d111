//! Payload assembly from form state.
//!
//! Assembly prunes everything a request must not carry and rebuilds nested
//! objects from dot paths:
//!
//! | Pruned | Why it exists in state |
//! |--------|------------------------|
//! | synthetic keys | drive the form only |
//! | `null`, `""`, `[]` | untouched inputs |
//! | keys under a disabled object | object switched off |
//! | keys of an unselected oneOf branch | left over from another branch |
//! | keys of hidden fields | `visibleWhen` fails or the mode doesn't apply |
//!
//! Paths are split only where they cross a declared object, so a key the
//! form doesn't know keeps its dots. Output is deterministic and follows
//! state insertion order.

use std::borrow::Cow;

use serde_json::{Map, Value};

use crate::envelope::{wrap, WrapperRules};
use crate::state::{FieldIndex, FormState, InstanceSet};
use crate::types::{enabled_key, is_empty_value, is_synthetic_key};

/// Assemble one form state into a payload object.
pub fn assemble(state: &FormState, index: &FieldIndex) -> Map<String, Value> {
    let mut payload = Map::new();
    for (key, value) in state.iter() {
        if is_synthetic_key(key) || is_empty_value(value) {
            continue;
        }
        if !is_live(key, state, index) {
            tracing::trace!(key = %key, "pruned");
            continue;
        }
        insert_path(&mut payload, key, value.clone(), index);
    }
    payload
}

/// Assemble every instance, keyed by its decimal instance key.
pub fn assemble_instances(instances: &InstanceSet, index: &FieldIndex) -> Map<String, Value> {
    assemble_instances_with(instances, |_| Cow::Borrowed(index))
}

/// Like [`assemble_instances`], with an index per instance. Instances can
/// hold different discriminant values, and requirements follow the mode.
pub fn assemble_instances_with<'a, F>(instances: &InstanceSet, mut index_for: F) -> Map<String, Value>
where
    F: FnMut(&FormState) -> Cow<'a, FieldIndex>,
{
    instances
        .iter()
        .map(|(key, state)| {
            let index = index_for(state);
            (key.to_string(), Value::Object(assemble(state, &index)))
        })
        .collect()
}

/// Apply the envelope selected by `endpoint`, if any.
pub fn envelope(body: Value, endpoint: Option<&str>, wrappers: &WrapperRules) -> Value {
    match endpoint.and_then(|e| wrappers.select(e)) {
        Some(key) => wrap(body, key),
        None => body,
    }
}

/// A key is live when no enclosing object is disabled, every path prefix is
/// shown, and, for every prefix that belongs to oneOf branches, at least one
/// declaration's chain of branches is fully selected.
fn is_live(key: &str, state: &FormState, index: &FieldIndex) -> bool {
    let mut prefix_end = 0;
    loop {
        let next = key[prefix_end..].find('.').map(|i| prefix_end + i);
        let prefix = &key[..next.unwrap_or(key.len())];

        let chains = index.memberships(prefix);
        let selected = chains.is_empty()
            || chains.iter().any(|chain| {
                chain
                    .iter()
                    .all(|b| state.selected_option(&b.one_of) == Some(b.option))
            });
        if !selected || !index.is_shown(prefix, state) {
            return false;
        }

        let Some(dot) = next else {
            // An object written as a whole, e.g. `{}` from an import.
            return !index.is_object(prefix) || state.is_enabled(prefix);
        };
        // `prefix` is a proper ancestor from here on.
        let declared_object = index.is_object(prefix);
        if (declared_object || state.contains_key(&enabled_key(prefix))) && !state.is_enabled(prefix) {
            return false;
        }
        prefix_end = dot + 1;
    }
}

/// Insert `value` at a state key, creating intermediate objects for each
/// declared object the key passes through. The rest of the key is one
/// property name.
///
/// A non-object already sitting on an intermediate segment is replaced, and
/// an object value merges into an object already there.
fn insert_path(target: &mut Map<String, Value>, key: &str, value: Value, index: &FieldIndex) {
    insert_segments(target, &object_segments(key, index), value);
}

/// Split `key` after every prefix that is a declared object.
fn object_segments<'k>(key: &'k str, index: &FieldIndex) -> Vec<&'k str> {
    let mut segments = Vec::new();
    let mut start = 0;
    for (dot, _) in key.match_indices('.') {
        if !index.is_object(&key[..dot]) {
            continue;
        }
        segments.push(&key[start..dot]);
        start = dot + 1;
    }
    segments.push(&key[start..]);
    segments
}

fn insert_segments(target: &mut Map<String, Value>, segments: &[&str], value: Value) {
    match segments {
        [] => {}
        [last] => {
            if let (Some(Value::Object(existing)), Value::Object(incoming)) = (target.get_mut(*last), &value) {
                existing.extend(incoming.clone());
                return;
            }
            target.insert((*last).to_string(), value);
        }
        [head, rest @ ..] => {
            let entry = target
                .entry((*head).to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                tracing::debug!(key = *head, "replacing scalar with nested object");
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(child) = entry {
                insert_segments(child, rest, value);
            }
        }
    }
}
