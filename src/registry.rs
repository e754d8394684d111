//! Active schema selection.
//!
//! A form can have up to three schema sources: a saved document edited by
//! users, an enhanced document carrying UI extensions, and the original
//! upstream document. Exactly one of them drives the form.

use serde::Serialize;
use serde_json::Value;

use crate::error::LoadError;
use crate::loader::load_document_str;
use crate::types::DEFAULT_ENHANCED_MARKERS;

/// Candidate schema documents, in no particular order.
#[derive(Debug, Clone, Default)]
pub struct SchemaSources {
    pub saved: Option<Value>,
    pub enhanced: Option<Value>,
    pub original: Option<Value>,
}

impl SchemaSources {
    /// Parse each non-empty source string as JSON.
    ///
    /// Blank strings count as absent.
    ///
    /// # Errors
    ///
    /// Returns `LoadError::InvalidJson` for the first malformed source.
    pub fn from_strings(
        saved: Option<&str>,
        enhanced: Option<&str>,
        original: Option<&str>,
    ) -> Result<Self, LoadError> {
        let parse = |text: Option<&str>| -> Result<Option<Value>, LoadError> {
            match text.map(str::trim) {
                Some(t) if !t.is_empty() => load_document_str(t).map(Some),
                _ => Ok(None),
            }
        };

        Ok(Self {
            saved: parse(saved)?,
            enhanced: parse(enhanced)?,
            original: parse(original)?,
        })
    }
}

/// Which source won selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaSource {
    Saved,
    Enhanced,
    Original,
}

/// The schema that drives the form.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveSchema {
    pub document: Value,
    pub source: SchemaSource,
    /// Whether the document uses UI extension keywords.
    pub is_enhanced: bool,
}

/// Extension keywords that identify an enhanced schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerSet {
    markers: Vec<String>,
}

impl Default for MarkerSet {
    fn default() -> Self {
        Self::new(DEFAULT_ENHANCED_MARKERS.iter().copied())
    }
}

impl MarkerSet {
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            markers: markers.into_iter().map(Into::into).collect(),
        }
    }

    /// True if any object key anywhere in `document` is a marker.
    pub fn detect(&self, document: &Value) -> bool {
        match document {
            Value::Object(map) => map
                .iter()
                .any(|(key, value)| self.markers.iter().any(|m| m == key) || self.detect(value)),
            Value::Array(items) => items.iter().any(|item| self.detect(item)),
            _ => false,
        }
    }
}

/// A document usable as a schema: an object with some key other than `$schema`.
pub fn is_usable(document: &Value) -> bool {
    document
        .as_object()
        .is_some_and(|map| map.keys().any(|k| k != "$schema"))
}

/// Select the schema that drives the form.
///
/// Priority is saved, then enhanced, then original. A saved schema is
/// enhanced only if it carries a marker; the enhanced source always is; the
/// original never is. Returns `None` when nothing usable exists.
pub fn resolve_active(sources: &SchemaSources, markers: &MarkerSet) -> Option<ActiveSchema> {
    if let Some(saved) = sources.saved.as_ref().filter(|d| is_usable(d)) {
        let is_enhanced = markers.detect(saved);
        tracing::debug!(is_enhanced, "using saved schema");
        return Some(ActiveSchema {
            document: saved.clone(),
            source: SchemaSource::Saved,
            is_enhanced,
        });
    }

    if let Some(enhanced) = sources.enhanced.as_ref().filter(|d| is_usable(d)) {
        tracing::debug!("using enhanced schema");
        return Some(ActiveSchema {
            document: enhanced.clone(),
            source: SchemaSource::Enhanced,
            is_enhanced: true,
        });
    }

    if let Some(original) = sources.original.as_ref().filter(|d| is_usable(d)) {
        tracing::debug!("using original schema");
        return Some(ActiveSchema {
            document: original.clone(),
            source: SchemaSource::Original,
            is_enhanced: false,
        });
    }

    tracing::debug!("no schema source available");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn plain() -> Value {
        json!({ "type": "object", "properties": { "NAME": { "type": "string" } } })
    }

    fn marked() -> Value {
        json!({
            "type": "object",
            "properties": {
                "TYPE": { "type": "string", "x-ui": { "label": "Type" } }
            }
        })
    }

    #[test]
    fn saved_wins_and_enhanced_iff_marked() {
        let sources = SchemaSources {
            saved: Some(plain()),
            enhanced: Some(marked()),
            original: Some(plain()),
        };
        let active = resolve_active(&sources, &MarkerSet::default()).unwrap();
        assert_eq!(active.source, SchemaSource::Saved);
        assert!(!active.is_enhanced);

        let sources = SchemaSources {
            saved: Some(marked()),
            ..Default::default()
        };
        let active = resolve_active(&sources, &MarkerSet::default()).unwrap();
        assert!(active.is_enhanced);
    }

    #[test]
    fn enhanced_always_enhanced() {
        let sources = SchemaSources {
            saved: None,
            enhanced: Some(plain()),
            original: Some(plain()),
        };
        let active = resolve_active(&sources, &MarkerSet::default()).unwrap();
        assert_eq!(active.source, SchemaSource::Enhanced);
        assert!(active.is_enhanced);
    }

    #[test]
    fn original_never_enhanced() {
        let sources = SchemaSources {
            original: Some(marked()),
            ..Default::default()
        };
        let active = resolve_active(&sources, &MarkerSet::default()).unwrap();
        assert_eq!(active.source, SchemaSource::Original);
        assert!(!active.is_enhanced);
    }

    #[test]
    fn empty_documents_are_skipped() {
        let sources = SchemaSources {
            saved: Some(json!({})),
            enhanced: Some(json!({ "$schema": "http://json-schema.org/draft-07/schema#" })),
            original: Some(plain()),
        };
        let active = resolve_active(&sources, &MarkerSet::default()).unwrap();
        assert_eq!(active.source, SchemaSource::Original);
    }

    #[test]
    fn nothing_available() {
        assert!(resolve_active(&SchemaSources::default(), &MarkerSet::default()).is_none());

        let sources = SchemaSources {
            saved: Some(json!([])),
            ..Default::default()
        };
        assert!(resolve_active(&sources, &MarkerSet::default()).is_none());
    }

    #[test]
    fn custom_markers() {
        let markers = MarkerSet::new(["x-custom"]);
        assert!(markers.detect(&json!({ "allOf": [{ "x-custom": true }] })));
        assert!(!markers.detect(&marked()));
    }

    #[test]
    fn from_strings_parses_and_skips_blank() {
        let sources = SchemaSources::from_strings(Some("  "), None, Some(r#"{"type":"object"}"#))
            .unwrap();
        assert!(sources.saved.is_none());
        assert!(sources.original.is_some());

        let err = SchemaSources::from_strings(Some("{oops"), None, None).unwrap_err();
        assert!(matches!(err, LoadError::InvalidJson { .. }));
    }
}
