//! Schema structure normalization.
//!
//! Schemas reach the compiler in several shapes. Before compiling, they are
//! reduced to one: an object schema whose `properties` are the form's
//! top-level fields.
//!
//! | Input shape | Normalized |
//! |-------------|------------|
//! | `{"ELEM": {"type": "object", ...}}` | the `ELEM` schema, titled `ELEM` |
//! | `x-transport.body-root` + `$defs.entity` | the entity schema |
//! | `x-transport.body-root` naming a wrapper property | the wrapper's properties |
//! | top-level `oneOf` | one virtual oneOf field |
//!
//! Local `$ref` pointers are inlined first.

use serde_json::{Map, Value};

use crate::error::CompileError;
use crate::loader::navigate_fragment;
use crate::types::json_type_name;

/// Name of the virtual field created for a top-level `oneOf`.
pub const VIRTUAL_ONE_OF_FIELD: &str = "OPTIONS";

/// Keywords that can't be an entity name.
const SCHEMA_KEYWORDS: &[&str] = &[
    "type",
    "title",
    "description",
    "properties",
    "required",
    "items",
    "oneOf",
    "anyOf",
    "allOf",
    "definitions",
];

/// A schema reduced to a flat object shape.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedSchema {
    /// Object schema with `properties`.
    pub root: Value,
    pub title: Option<String>,
    /// Envelope key declared by `x-transport.body-root`.
    pub body_root: Option<String>,
}

/// Normalize a schema document.
///
/// # Errors
///
/// Returns `CompileError::RootNotObject` if the document isn't a JSON object.
pub fn normalize(schema: &Value) -> Result<NormalizedSchema, CompileError> {
    if !schema.is_object() {
        return Err(CompileError::RootNotObject {
            actual: json_type_name(schema).to_string(),
        });
    }

    let inlined = inline_refs(schema, schema, &mut Vec::new());
    let body_root = inlined
        .get("x-transport")
        .and_then(|t| t.get("body-root"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let mut title = inlined.get("title").and_then(Value::as_str).map(str::to_string);

    let root = if let Some(entity) = explicit_entity(&inlined, body_root.as_deref()) {
        tracing::debug!("normalized explicit entity definition");
        entity
    } else if let Some(flattened) = flatten_body_root(&inlined, body_root.as_deref()) {
        tracing::debug!("flattened body-root wrapper");
        flattened
    } else if let Some((name, entity)) = single_entity(&inlined) {
        tracing::debug!(entity = %name, "unwrapped single root entity");
        title = Some(name);
        entity
    } else if let Some(wrapped) = wrap_top_level_one_of(&inlined) {
        tracing::debug!("wrapped top-level oneOf");
        wrapped
    } else {
        inlined
    };

    Ok(NormalizedSchema {
        root,
        title,
        body_root,
    })
}

/// Inline local `$ref` pointers against `root`.
///
/// Sibling keys next to a `$ref` override the referenced definition.
/// Unresolvable and circular references are left in place so the field
/// compiles as opaque.
fn inline_refs(node: &Value, root: &Value, stack: &mut Vec<String>) -> Value {
    match node {
        Value::Object(map) => {
            if let Some(reference) = map.get("$ref").and_then(Value::as_str) {
                if let Some(resolved) = resolve_ref(reference, map, root, stack) {
                    return resolved;
                }
            }

            let inlined = map
                .iter()
                .map(|(key, value)| {
                    if key == "$defs" || key == "definitions" {
                        (key.clone(), value.clone())
                    } else {
                        (key.clone(), inline_refs(value, root, stack))
                    }
                })
                .collect();
            Value::Object(inlined)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| inline_refs(v, root, stack)).collect()),
        other => other.clone(),
    }
}

fn resolve_ref(
    reference: &str,
    siblings: &Map<String, Value>,
    root: &Value,
    stack: &mut Vec<String>,
) -> Option<Value> {
    if !reference.starts_with("#/") {
        tracing::warn!(reference, "ignoring non-local $ref");
        return None;
    }
    if stack.iter().any(|r| r == reference) {
        tracing::warn!(reference, "circular $ref left unresolved");
        return None;
    }
    let Some(target) = navigate_fragment(root, reference) else {
        tracing::warn!(reference, "unresolved $ref");
        return None;
    };

    stack.push(reference.to_string());
    let resolved = inline_refs(target, root, stack);
    stack.pop();

    let mut merged = match resolved {
        Value::Object(map) => map,
        other => return Some(other),
    };
    for (key, value) in siblings {
        if key != "$ref" {
            merged.insert(key.clone(), inline_refs(value, root, stack));
        }
    }
    Some(Value::Object(merged))
}

/// `x-transport.body-root` together with `$defs.entity`.
fn explicit_entity(schema: &Value, body_root: Option<&str>) -> Option<Value> {
    body_root?;
    if schema.get("properties").is_some() {
        return None;
    }
    let entity = schema.get("$defs")?.get("entity")?;
    entity.get("properties").map(|_| entity.clone())
}

/// `x-transport.body-root` naming a property that wraps the real fields.
fn flatten_body_root(schema: &Value, body_root: Option<&str>) -> Option<Value> {
    let wrapper = schema.get("properties")?.get(body_root?)?;
    let properties = wrapper.get("properties")?;

    let mut flattened = schema.as_object()?.clone();
    flattened.insert("properties".into(), properties.clone());
    match wrapper.get("required") {
        Some(required) => flattened.insert("required".into(), required.clone()),
        None => flattened.remove("required"),
    };
    Some(Value::Object(flattened))
}

/// A document whose only key names an object schema.
fn single_entity(schema: &Value) -> Option<(String, Value)> {
    let map = schema.as_object()?;
    if map.len() != 1 {
        return None;
    }
    let (name, entity) = map.iter().next()?;
    if name.starts_with('$') || name.starts_with("x-") || SCHEMA_KEYWORDS.contains(&name.as_str()) {
        return None;
    }
    let is_object_schema =
        entity.get("type").and_then(Value::as_str) == Some("object") || entity.get("properties").is_some();
    is_object_schema.then(|| (name.clone(), entity.clone()))
}

fn wrap_top_level_one_of(schema: &Value) -> Option<Value> {
    let map = schema.as_object()?;
    if map.contains_key("properties") {
        return None;
    }
    let options = map.get("oneOf")?.as_array()?;

    let mut field = Map::new();
    field.insert("type".into(), Value::String("object".into()));
    field.insert("oneOf".into(), Value::Array(options.clone()));
    if let Some(title) = map.get("title") {
        field.insert("title".into(), title.clone());
    }

    let mut properties = Map::new();
    properties.insert(VIRTUAL_ONE_OF_FIELD.into(), Value::Object(field));

    let mut wrapped = map.clone();
    wrapped.remove("oneOf");
    wrapped.insert("type".into(), Value::String("object".into()));
    wrapped.insert("properties".into(), Value::Object(properties));
    Some(Value::Object(wrapped))
}
