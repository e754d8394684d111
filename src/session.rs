//! An editing session over one compiled form.
//!
//! The session owns everything a form editor mutates: the visible form
//! state and, when enabled, the instance set it mirrors into. Nothing is
//! shared between sessions.
//!
//! Builder fields are re-projected after every change to the visible state,
//! so enumerations, requirements and visibility follow the live
//! discriminant value. Editing the discriminant also resets enum values its
//! new enumeration no longer offers.

use std::borrow::Cow;
use std::collections::BTreeMap;

use serde_json::Value;

use crate::assembler::{assemble, assemble_instances_with, envelope};
use crate::compiler::CompiledForm;
use crate::envelope::WrapperRules;
use crate::error::{FieldError, ReverseError, StateError, ValidateError};
use crate::projection::{builder_fields, project, BuilderEntry, BuilderField, ProjectionContext};
use crate::reverse::{reverse_map, reverse_map_str, Imported, ReverseOptions};
use crate::state::{FieldIndex, FormState, InstanceSet};
use crate::validator::check_state;

/// Form state, instances and assembly for one compiled form.
#[derive(Debug, Clone)]
pub struct FormSession {
    form: CompiledForm,
    mode: String,
    /// Projection without state; source of fresh defaults.
    defaults: Vec<BuilderField>,
    /// Projection against the visible state.
    fields: Vec<BuilderField>,
    index: FieldIndex,
    wrappers: WrapperRules,
    state: FormState,
    instances: Option<InstanceSet>,
}

impl FormSession {
    /// Start a session with fresh defaults.
    pub fn new(form: CompiledForm, wrappers: WrapperRules) -> Self {
        let mode = form.mode.clone();
        let defaults = builder_fields(&project(&form, &ProjectionContext::new(&mode)));
        let state = FormState::initialize(&defaults);
        tracing::debug!(fields = defaults.len(), mode = %mode, "session started");
        let mut session = Self {
            form,
            mode,
            defaults,
            fields: Vec::new(),
            index: FieldIndex::default(),
            wrappers,
            state,
            instances: None,
        };
        session.reproject();
        session
    }

    pub fn form(&self) -> &CompiledForm {
        &self.form
    }

    /// Builder fields projected against the visible state.
    pub fn fields(&self) -> &[BuilderField] {
        &self.fields
    }

    /// Re-project against the live state, with section headers.
    pub fn entries(&self) -> Vec<BuilderEntry> {
        project(
            &self.form,
            &ProjectionContext::new(&self.mode).with_state(&self.state),
        )
    }

    pub fn state(&self) -> &FormState {
        &self.state
    }

    pub fn instances(&self) -> Option<&InstanceSet> {
        self.instances.as_ref()
    }

    /// Replace the visible state, e.g. from a saved draft. Missing keys are
    /// filled with defaults.
    ///
    /// # Errors
    ///
    /// See [`FormSession::update`].
    pub fn load_state(&mut self, mut state: FormState) -> Result<(), StateError> {
        state.fill_missing(&self.defaults);
        self.show(state);
        self.mirror()
    }

    /// Replace all instances, filling missing keys in each. The lowest key
    /// becomes visible. Returns `false` (and changes nothing) if `instances`
    /// is empty.
    pub fn load_instances(&mut self, instances: BTreeMap<u32, FormState>) -> bool {
        let filled = instances
            .into_iter()
            .map(|(key, mut state)| {
                state.fill_missing(&self.defaults);
                (key, state)
            })
            .collect();
        let Some(set) = InstanceSet::from_instances(filled) else {
            return false;
        };
        let state = set.current().cloned().unwrap_or_else(|_| self.fresh());
        self.instances = Some(set);
        self.show(state);
        true
    }

    /// Apply a user edit and mirror it into the current instance.
    ///
    /// # Errors
    ///
    /// Returns `StateError::InvalidBranch` for a bad oneOf selection; the
    /// state is left unchanged.
    pub fn update(&mut self, path: &str, value: Value) -> Result<(), StateError> {
        self.state.update(path, value, &self.index)?;
        let previous = self.reproject();
        if path == self.form.discriminant {
            self.reset_stale_enums(&previous);
        }
        self.mirror()
    }

    /// Project against the visible state. Returns the previous projection.
    fn reproject(&mut self) -> Vec<BuilderField> {
        let fields = builder_fields(&project(
            &self.form,
            &ProjectionContext::new(&self.mode).with_state(&self.state),
        ));
        self.index = FieldIndex::new(&fields);
        std::mem::replace(&mut self.fields, fields)
    }

    /// Reset enum fields whose enumeration changed and no longer holds
    /// their value.
    fn reset_stale_enums(&mut self, previous: &[BuilderField]) {
        let mut stale = Vec::new();
        collect_stale(previous, &self.fields, &self.state, &mut stale);
        if stale.is_empty() {
            return;
        }
        for (path, initial) in stale {
            tracing::debug!(path = %path, value = %initial, "enum value reset for new discriminant");
            self.state.set(path, initial);
        }
        self.reproject();
    }

    fn show(&mut self, state: FormState) {
        self.state = state;
        self.reproject();
    }

    fn mirror(&mut self) -> Result<(), StateError> {
        if let Some(set) = self.instances.as_mut() {
            *set.current_mut()? = self.state.clone();
        }
        Ok(())
    }

    fn fresh(&self) -> FormState {
        FormState::initialize(&self.defaults)
    }

    /// Index for a state other than the visible one.
    fn index_for(&self, state: &FormState) -> FieldIndex {
        FieldIndex::new(&builder_fields(&project(
            &self.form,
            &ProjectionContext::new(&self.mode).with_state(state),
        )))
    }

    /// Turn on multiple instances. The visible state becomes instance `1`.
    pub fn enable_instances(&mut self) {
        if self.instances.is_none() {
            self.instances = Some(InstanceSet::new(self.state.clone()));
        }
    }

    /// Turn off multiple instances, keeping the current instance's state.
    pub fn disable_instances(&mut self) {
        if let Some(set) = self.instances.take() {
            self.show(set.into_current());
        }
    }

    pub fn instances_enabled(&self) -> bool {
        self.instances.is_some()
    }

    fn instances_mut(&mut self) -> Result<&mut InstanceSet, StateError> {
        self.instances.as_mut().ok_or(StateError::InstancesDisabled)
    }

    /// Add an instance with fresh defaults and switch to it.
    ///
    /// # Errors
    ///
    /// Returns `StateError::InstancesDisabled` unless instances are enabled.
    pub fn add_instance(&mut self) -> Result<u32, StateError> {
        let fresh = self.fresh();
        let key = self.instances_mut()?.add(fresh);
        self.switch_instance(key)?;
        Ok(key)
    }

    /// # Errors
    ///
    /// Returns `StateError::LastInstance` or `StateError::UnknownInstance`
    /// from the instance set, or `StateError::InstancesDisabled`.
    pub fn remove_instance(&mut self, key: u32) -> Result<(), StateError> {
        let set = self.instances_mut()?;
        set.remove(key)?;
        let state = set.current()?.clone();
        self.show(state);
        Ok(())
    }

    /// Show another instance.
    ///
    /// # Errors
    ///
    /// Returns `StateError::UnknownInstance` or `StateError::InstancesDisabled`.
    pub fn switch_instance(&mut self, key: u32) -> Result<(), StateError> {
        let state = self.instances_mut()?.switch_to(key)?.clone();
        self.show(state);
        Ok(())
    }

    /// Reset the visible state (and the current instance) to defaults.
    ///
    /// # Errors
    ///
    /// See [`InstanceSet::current`].
    pub fn reset(&mut self) -> Result<(), StateError> {
        let fresh = self.fresh();
        self.show(fresh);
        self.mirror()
    }

    /// Reset everything; instances collapse to a single fresh instance.
    pub fn reset_all(&mut self) {
        let fresh = self.fresh();
        if let Some(set) = self.instances.as_mut() {
            set.reset_all(fresh.clone());
        }
        self.show(fresh);
    }

    fn reverse_options(&self) -> ReverseOptions {
        let mut keys = self.wrappers.wrapper_keys();
        if let Some(root) = &self.form.body_root {
            if !keys.contains(root) {
                keys.push(root.clone());
            }
        }
        ReverseOptions::new()
            .wrapper_keys(keys)
            .multi_instance(self.instances.is_some())
    }

    /// Replace state from a JSON payload. On any error nothing changes.
    ///
    /// Imported values are kept as they are, even where they fall outside
    /// the enumeration; [`FormSession::validate`] reports those.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`reverse_map_str`].
    pub fn import_json(&mut self, text: &str) -> Result<(), ReverseError> {
        let imported = reverse_map_str(text, &self.defaults, &self.reverse_options())?;
        self.apply_import(imported);
        Ok(())
    }

    /// Replace state from a parsed payload. On any error nothing changes.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`reverse_map`].
    pub fn import_value(&mut self, payload: &Value) -> Result<(), ReverseError> {
        let imported = reverse_map(payload, &self.defaults, &self.reverse_options())?;
        self.apply_import(imported);
        Ok(())
    }

    fn apply_import(&mut self, imported: Imported) {
        match imported {
            Imported::Single(state) => {
                if let Some(set) = self.instances.as_mut() {
                    set.reset_all(state.clone());
                }
                self.show(state);
            }
            Imported::Instances(set) => {
                let state = set.current().cloned().unwrap_or_else(|_| self.fresh());
                self.instances = Some(set);
                self.show(state);
            }
        }
    }

    /// Check the visible fields of every state the session would assemble.
    ///
    /// With instances enabled, each error path is prefixed with its
    /// instance key (`"2.NAME"`).
    ///
    /// # Errors
    ///
    /// Returns `ValidateError::Invalid` listing every failing field.
    pub fn validate(&self) -> Result<(), ValidateError> {
        let errors: Vec<FieldError> = match &self.instances {
            Some(set) => set
                .iter()
                .flat_map(|(key, state)| {
                    check_state(&self.form, state, &self.mode)
                        .into_iter()
                        .map(move |e| FieldError {
                            path: format!("{key}.{}", e.path),
                            message: e.message,
                        })
                })
                .collect(),
            None => check_state(&self.form, &self.state, &self.mode),
        };
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidateError::Invalid { errors })
        }
    }

    /// Assemble the request body for `endpoint`.
    ///
    /// With instances enabled, every instance is assembled under its key,
    /// each against its own discriminant value.
    pub fn assemble(&self, endpoint: Option<&str>) -> Value {
        let body = match &self.instances {
            Some(set) => assemble_instances_with(set, |state| {
                if *state == self.state {
                    Cow::Borrowed(&self.index)
                } else {
                    Cow::Owned(self.index_for(state))
                }
            }),
            None => assemble(&self.state, &self.index),
        };
        envelope(Value::Object(body), endpoint, &self.wrappers)
    }
}

/// Walk two projections of the same form side by side and collect enum
/// fields whose value the new enumeration no longer offers.
fn collect_stale(
    previous: &[BuilderField],
    current: &[BuilderField],
    state: &FormState,
    out: &mut Vec<(String, Value)>,
) {
    for (before, after) in previous.iter().zip(current) {
        if !after.children.is_empty() {
            collect_stale(&before.children, &after.children, state, out);
            continue;
        }
        if before.enum_values == after.enum_values {
            continue;
        }
        let Some(value) = state.get(&after.path) else {
            continue;
        };
        if !after.enum_values.contains(value) && *value != after.initial {
            out.push((after.path.clone(), after.initial.clone()));
        }
    }
}
