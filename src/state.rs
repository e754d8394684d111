//! Form state and multi-instance sets.
//!
//! Form state is a flat, insertion-ordered map from dot paths to values.
//! Two kinds of synthetic keys drive the form without ever reaching a
//! payload:
//!
//! - `<object>._enabled`: whether an object subtree is assembled.
//! - `<oneOf>.__selectedOption`: the live branch of a oneOf.
//!
//! Exactly one branch of each oneOf is live. Switching branches replaces
//! the old branch's keys with fresh defaults for the new one in a single
//! step.

use std::collections::{BTreeMap, HashMap};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StateError;
use crate::projection::{BuilderField, BuilderKind};
use crate::types::{enabled_key, selected_option_key, Requirement, VisibleWhen, SELECTED_OPTION_SUFFIX};

/// Flat dot-path form state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormState {
    values: IndexMap<String, Value>,
}

impl FormState {
    /// Fresh state with every field at its initial value.
    pub fn initialize(fields: &[BuilderField]) -> Self {
        let mut state = Self::default();
        state.fill_missing(fields);
        state
    }

    /// Insert initial values for keys that are absent; present keys are
    /// left alone.
    ///
    /// Objects get `_enabled = false`. A oneOf gets `__selectedOption = 0`
    /// unless a selection exists, and only the selected branch is filled.
    pub fn fill_missing(&mut self, fields: &[BuilderField]) {
        for field in fields {
            self.fill_field(field);
        }
    }

    fn fill_field(&mut self, field: &BuilderField) {
        match field.kind {
            BuilderKind::Object => {
                self.values
                    .entry(enabled_key(&field.path))
                    .or_insert(Value::Bool(false));
                self.fill_missing(&field.children);
            }
            BuilderKind::OneOf => {
                if field.one_of_options.is_empty() {
                    return;
                }
                let key = selected_option_key(&field.path);
                let selected = self
                    .values
                    .entry(key)
                    .or_insert(Value::from(0))
                    .as_u64()
                    .map_or(0, |i| i as usize);
                for child in field.branch_children(selected) {
                    self.fill_field(child);
                }
            }
            _ => {
                self.values
                    .entry(field.path.clone())
                    .or_insert_with(|| field.initial.clone());
            }
        }
    }

    /// Reset to fresh defaults.
    pub fn reset(&mut self, fields: &[BuilderField]) {
        *self = Self::initialize(fields);
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        self.values.get(path)
    }

    /// Set a value without any side effects.
    pub fn set(&mut self, path: impl Into<String>, value: Value) {
        self.values.insert(path.into(), value);
    }

    pub fn remove(&mut self, path: &str) -> Option<Value> {
        self.values.shift_remove(path)
    }

    /// Apply a user edit.
    ///
    /// Writing a `__selectedOption` key switches branches: every key of
    /// every branch is removed, the selection is written, and the selected
    /// branch is filled with defaults. The switch is applied to a copy and
    /// committed at once, so a failure leaves the state untouched.
    ///
    /// # Errors
    ///
    /// Returns `StateError::InvalidBranch` for a selection that isn't an
    /// index into the oneOf's options.
    pub fn update(&mut self, path: &str, value: Value, index: &FieldIndex) -> Result<(), StateError> {
        let Some(one_of_path) = path.strip_suffix(SELECTED_OPTION_SUFFIX) else {
            self.set(path, value);
            return Ok(());
        };
        let Some(one_of) = index.one_of(one_of_path) else {
            self.set(path, value);
            return Ok(());
        };

        let count = one_of.one_of_options.len();
        if count == 0 {
            tracing::debug!(path = one_of_path, "ignoring selection on oneOf without options");
            return Ok(());
        }
        let selected = value
            .as_u64()
            .map(|i| i as usize)
            .filter(|i| *i < count)
            .ok_or_else(|| StateError::InvalidBranch {
                path: one_of_path.to_string(),
                index: value.as_u64().map_or(usize::MAX, |i| i as usize),
                count,
            })?;

        let mut next = self.clone();
        next.clear_branches(one_of);
        next.values.insert(path.to_string(), Value::from(selected));
        for child in one_of.branch_children(selected) {
            next.fill_field(child);
        }
        next.refill_live_branches(one_of_path, index);
        *self = next;
        tracing::debug!(path = one_of_path, selected, "switched oneOf branch");
        Ok(())
    }

    /// Remove every key owned by any branch of `one_of`, including nested
    /// object and oneOf keys.
    fn clear_branches(&mut self, one_of: &BuilderField) {
        for child in &one_of.children {
            let prefix = format!("{}.", child.path);
            self.values
                .retain(|key, _| key != &child.path && !key.starts_with(&prefix));
            // Nested oneOf children sit in the outer scope, not under the
            // nested oneOf's path.
            if child.kind == BuilderKind::OneOf {
                self.clear_branches(child);
            }
        }
    }

    /// Sibling oneOfs can declare the same child name, so clearing one
    /// oneOf's branches may remove a key another oneOf's live branch still
    /// owns. Put such keys back at their defaults.
    fn refill_live_branches(&mut self, switched: &str, index: &FieldIndex) {
        for other in index.one_ofs().filter(|o| o.path != switched) {
            let Some(selected) = self.selected_option(&other.path) else {
                continue;
            };
            for child in other.branch_children(selected) {
                self.fill_field(child);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn contains_key(&self, path: &str) -> bool {
        self.values.contains_key(path)
    }

    /// Read a `__selectedOption` value.
    pub fn selected_option(&self, one_of_path: &str) -> Option<usize> {
        self.get(&selected_option_key(one_of_path))
            .and_then(Value::as_u64)
            .map(|i| i as usize)
    }

    /// Whether an object subtree is switched on.
    pub fn is_enabled(&self, object_path: &str) -> bool {
        self.get(&enabled_key(object_path))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

impl FromIterator<(String, Value)> for FormState {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Which oneOf branch owns a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchRef {
    pub one_of: String,
    pub option: usize,
}

/// Lookup tables derived from builder fields.
///
/// Because oneOf children share their parent's scope, one path can belong
/// to several branches, possibly of different oneOf fields.
#[derive(Debug, Clone, Default)]
pub struct FieldIndex {
    one_ofs: IndexMap<String, BuilderField>,
    objects: Vec<String>,
    memberships: HashMap<String, Vec<Vec<BranchRef>>>,
    leaves: IndexMap<String, BuilderKind>,
    gates: HashMap<String, Vec<Gate>>,
}

/// What one declaration of a path needs to be shown: its own `visibleWhen`
/// plus those of every enclosing field, and a mode that applies to all of
/// them.
#[derive(Debug, Clone, Default)]
struct Gate {
    not_applicable: bool,
    conditions: Vec<VisibleWhen>,
}

impl Gate {
    fn nest(&self, field: &BuilderField) -> Self {
        let mut gate = self.clone();
        gate.not_applicable |= field.requirement == Requirement::NotApplicable;
        gate.conditions.extend(field.visible_when.iter().cloned());
        gate
    }

    fn is_open(&self, state: &FormState) -> bool {
        !self.not_applicable && self.conditions.iter().all(|c| c.is_satisfied(|key| state.get(key)))
    }
}

impl FieldIndex {
    /// Index builder fields. Requirements are taken as projected, so the
    /// index reflects the mode the fields were projected for.
    pub fn new(fields: &[BuilderField]) -> Self {
        let mut index = Self::default();
        for field in fields {
            index.register(field, &[], &Gate::default());
        }
        index
    }

    fn register(&mut self, field: &BuilderField, owners: &[BranchRef], parent: &Gate) {
        if !owners.is_empty() {
            self.memberships
                .entry(field.path.clone())
                .or_default()
                .push(owners.to_vec());
        }
        let gate = parent.nest(field);
        self.gates
            .entry(field.path.clone())
            .or_default()
            .push(gate.clone());

        match field.kind {
            BuilderKind::Object => {
                self.objects.push(field.path.clone());
                for child in &field.children {
                    self.register(child, owners, &gate);
                }
            }
            BuilderKind::OneOf => {
                self.one_ofs.insert(field.path.clone(), field.clone());
                for child in &field.children {
                    let mut nested = owners.to_vec();
                    nested.push(BranchRef {
                        one_of: field.path.clone(),
                        option: child.option_index.unwrap_or(0),
                    });
                    self.register(child, &nested, &gate);
                }
            }
            kind => {
                self.leaves.insert(field.path.clone(), kind);
            }
        }
    }

    /// Whether a declared path is shown for `state`: some declaration has
    /// every `visibleWhen` up its ancestry satisfied and none of them is
    /// not applicable in the projected mode. Undeclared paths are shown.
    pub fn is_shown(&self, path: &str, state: &FormState) -> bool {
        self.gates
            .get(path)
            .map_or(true, |gates| gates.iter().any(|g| g.is_open(state)))
    }

    /// oneOf fields in declaration order.
    pub fn one_ofs(&self) -> impl Iterator<Item = &BuilderField> {
        self.one_ofs.values()
    }

    /// The oneOf field at a path.
    pub fn one_of(&self, path: &str) -> Option<&BuilderField> {
        self.one_ofs.get(path)
    }

    /// Branch memberships of a path, one chain of enclosing branches
    /// (outermost first) per declaration. Empty for paths outside any oneOf.
    pub fn memberships(&self, path: &str) -> &[Vec<BranchRef>] {
        self.memberships.get(path).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_object(&self, path: &str) -> bool {
        self.objects.iter().any(|p| p == path)
    }

    /// Kind of a non-container field.
    pub fn leaf_kind(&self, path: &str) -> Option<BuilderKind> {
        self.leaves.get(path).copied()
    }

    pub fn is_known(&self, path: &str) -> bool {
        self.leaves.contains_key(path) || self.is_object(path) || self.one_ofs.contains_key(path)
    }
}

/// Independent form states keyed by positive integers.
///
/// Always holds at least one instance.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceSet {
    instances: BTreeMap<u32, FormState>,
    current: u32,
}

impl InstanceSet {
    /// A set holding one instance, keyed `1`.
    pub fn new(initial: FormState) -> Self {
        let mut instances = BTreeMap::new();
        instances.insert(1, initial);
        Self {
            instances,
            current: 1,
        }
    }

    /// Build from explicit keys. Returns `None` if `instances` is empty.
    /// The lowest key becomes current.
    pub fn from_instances(instances: BTreeMap<u32, FormState>) -> Option<Self> {
        let current = *instances.keys().next()?;
        Some(Self { instances, current })
    }

    /// Add an instance under `max(existing) + 1` and return its key.
    pub fn add(&mut self, state: FormState) -> u32 {
        let key = self.instances.keys().next_back().map_or(1, |k| k + 1);
        self.instances.insert(key, state);
        tracing::debug!(key, "added instance");
        key
    }

    /// Remove an instance. If it was current, the nearest lower key (or
    /// the lowest remaining key) becomes current.
    ///
    /// # Errors
    ///
    /// Returns `StateError::LastInstance` if only one instance exists, or
    /// `StateError::UnknownInstance` for a missing key.
    pub fn remove(&mut self, key: u32) -> Result<FormState, StateError> {
        if !self.instances.contains_key(&key) {
            return Err(StateError::UnknownInstance { key });
        }
        if self.instances.len() == 1 {
            return Err(StateError::LastInstance { key });
        }
        let removed = self
            .instances
            .remove(&key)
            .ok_or(StateError::UnknownInstance { key })?;
        if self.current == key {
            self.current = self
                .instances
                .range(..key)
                .next_back()
                .or_else(|| self.instances.iter().next())
                .map_or(self.current, |(k, _)| *k);
        }
        tracing::debug!(key, current = self.current, "removed instance");
        Ok(removed)
    }

    /// Make `key` current.
    ///
    /// # Errors
    ///
    /// Returns `StateError::UnknownInstance` for a missing key.
    pub fn switch_to(&mut self, key: u32) -> Result<&FormState, StateError> {
        if !self.instances.contains_key(&key) {
            return Err(StateError::UnknownInstance { key });
        }
        self.current = key;
        self.current()
    }

    pub fn current_key(&self) -> u32 {
        self.current
    }

    /// # Errors
    ///
    /// Returns `StateError::UnknownInstance` if the current key is missing,
    /// which the set's operations never allow.
    pub fn current(&self) -> Result<&FormState, StateError> {
        self.instances
            .get(&self.current)
            .ok_or(StateError::UnknownInstance { key: self.current })
    }

    /// # Errors
    ///
    /// See [`InstanceSet::current`].
    pub fn current_mut(&mut self) -> Result<&mut FormState, StateError> {
        let key = self.current;
        self.instances
            .get_mut(&key)
            .ok_or(StateError::UnknownInstance { key })
    }

    pub fn get(&self, key: u32) -> Option<&FormState> {
        self.instances.get(&key)
    }

    /// Replace the current instance's state.
    ///
    /// # Errors
    ///
    /// See [`InstanceSet::current`].
    pub fn reset_current(&mut self, fresh: FormState) -> Result<(), StateError> {
        *self.current_mut()? = fresh;
        Ok(())
    }

    /// Drop every instance and start over with one fresh instance keyed `1`.
    pub fn reset_all(&mut self, fresh: FormState) {
        *self = Self::new(fresh);
    }

    /// Keys in ascending order.
    pub fn keys(&self) -> impl Iterator<Item = u32> + '_ {
        self.instances.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &FormState)> {
        self.instances.iter().map(|(k, v)| (*k, v))
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Never true; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Collapse to the current instance's state.
    pub fn into_current(mut self) -> FormState {
        self.instances.remove(&self.current).unwrap_or_default()
    }
}
