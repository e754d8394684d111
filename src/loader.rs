//! Document loading from files, strings, and HTTP URLs.
//!
//! Schemas and payloads are JSON. Rule-set documents may also be YAML when
//! the `yaml` feature is enabled.

use std::path::Path;

use serde_json::Value;

use crate::error::LoadError;

#[cfg(feature = "remote")]
use std::time::Duration;

/// Default timeout for HTTP requests (10 seconds).
#[cfg(feature = "remote")]
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Read a file into a string.
///
/// # Errors
///
/// Returns `LoadError::FileNotFound` if the file doesn't exist, or
/// `LoadError::ReadError` if it can't be read.
pub fn load_text(path: &Path) -> Result<String, LoadError> {
    if !path.exists() {
        return Err(LoadError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    std::fs::read_to_string(path).map_err(|source| LoadError::ReadError {
        path: path.to_path_buf(),
        source,
    })
}

/// Load a JSON document from a file path.
///
/// # Errors
///
/// Returns `LoadError::FileNotFound` if the file doesn't exist,
/// or `LoadError::InvalidJson` if the file isn't valid JSON.
pub fn load_document(path: &Path) -> Result<Value, LoadError> {
    let content = load_text(path)?;
    load_document_str(&content)
}

/// Load a JSON document from a string.
///
/// # Errors
///
/// Returns `LoadError::InvalidJson` if the string isn't valid JSON.
pub fn load_document_str(content: &str) -> Result<Value, LoadError> {
    serde_json::from_str(content).map_err(|source| LoadError::InvalidJson { source })
}

/// Load a document from an HTTP/HTTPS URL.
///
/// Requires the `remote` feature (enabled by default).
///
/// # Errors
///
/// Returns `LoadError::NetworkError` if the request fails or the response
/// isn't valid JSON.
#[cfg(feature = "remote")]
pub fn load_document_url(url: &str) -> Result<Value, LoadError> {
    let network = |source| LoadError::NetworkError {
        url: url.to_string(),
        source,
    };

    let client = reqwest::blocking::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(network)?;

    tracing::debug!(url, "fetching document");
    client
        .get(url)
        .send()
        .and_then(|response| response.error_for_status())
        .and_then(|response| response.json())
        .map_err(network)
}

/// Check if a string looks like a URL (starts with http:// or https://).
pub fn is_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Load a document from a file path or URL.
///
/// # Errors
///
/// Returns the same errors as [`load_document`] or `load_document_url`.
pub fn load_document_auto(source: &str) -> Result<Value, LoadError> {
    #[cfg(feature = "remote")]
    if is_url(source) {
        return load_document_url(source);
    }

    load_document(Path::new(source))
}

/// Load a rule-set document, choosing the parser by file extension.
///
/// `.yaml` and `.yml` files are parsed as YAML; everything else as JSON.
///
/// # Errors
///
/// Returns `LoadError::YamlUnsupported` for YAML files when the `yaml`
/// feature is disabled.
pub fn load_rules_document(path: &Path) -> Result<Value, LoadError> {
    let is_yaml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));

    if is_yaml {
        load_yaml(path)
    } else {
        load_document(path)
    }
}

#[cfg(feature = "yaml")]
fn load_yaml(path: &Path) -> Result<Value, LoadError> {
    let content = load_text(path)?;
    serde_yaml::from_str(&content).map_err(|source| LoadError::InvalidYaml { source })
}

#[cfg(not(feature = "yaml"))]
fn load_yaml(path: &Path) -> Result<Value, LoadError> {
    Err(LoadError::YamlUnsupported {
        path: path.to_path_buf(),
    })
}

/// Navigate a JSON Pointer fragment (e.g., "#/$defs/foo").
///
/// Returns `None` if any segment is missing.
pub fn navigate_fragment<'a>(document: &'a Value, fragment: &str) -> Option<&'a Value> {
    let path = fragment.trim_start_matches('#').trim_start_matches('/');
    if path.is_empty() {
        return Some(document);
    }

    let mut current = document;
    for part in path.split('/') {
        // Unescape JSON Pointer encoding (~1 = /, ~0 = ~)
        let key = part.replace("~1", "/").replace("~0", "~");
        current = current.get(&key)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"type": "object"}}"#).unwrap();

        let document = load_document(file.path()).unwrap();
        assert_eq!(document["type"], "object");
    }

    #[test]
    fn load_missing_file() {
        let err = load_document(Path::new("/nonexistent/schema.json")).unwrap_err();
        assert!(matches!(err, LoadError::FileNotFound { .. }));
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn load_invalid_json() {
        let err = load_document_str("{not json").unwrap_err();
        assert!(matches!(err, LoadError::InvalidJson { .. }));
    }

    #[test]
    fn url_detection() {
        assert!(is_url("https://example.com/schema.json"));
        assert!(is_url("http://localhost:8080/schema.json"));
        assert!(!is_url("schemas/db.json"));
        assert!(!is_url("/abs/path.json"));
    }

    #[test]
    fn navigate_fragment_paths() {
        let document = json!({
            "$defs": {
                "unit": { "type": "object" },
                "a/b": { "type": "string" }
            }
        });
        assert_eq!(
            navigate_fragment(&document, "#/$defs/unit"),
            Some(&json!({ "type": "object" }))
        );
        assert_eq!(
            navigate_fragment(&document, "#/$defs/a~1b"),
            Some(&json!({ "type": "string" }))
        );
        assert_eq!(navigate_fragment(&document, "#"), Some(&document));
        assert!(navigate_fragment(&document, "#/$defs/missing").is_none());
    }

    #[test]
    fn rules_json_by_extension() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        writeln!(file, r#"{{"sectionOrder": ["General"]}}"#).unwrap();

        let document = load_rules_document(file.path()).unwrap();
        assert_eq!(document["sectionOrder"][0], "General");
    }

    #[cfg(feature = "yaml")]
    #[test]
    fn rules_yaml_by_extension() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "sectionOrder:\n  - General\n  - Advanced").unwrap();

        let document = load_rules_document(file.path()).unwrap();
        assert_eq!(document["sectionOrder"][1], "Advanced");
    }

    #[cfg(feature = "remote")]
    #[test]
    fn load_from_url() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/schema.json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"type": "object", "properties": {}}"#)
            .create();

        let url = format!("{}/schema.json", server.url());
        let document = load_document_auto(&url).unwrap();
        mock.assert();
        assert_eq!(document["type"], "object");
    }

    #[cfg(feature = "remote")]
    #[test]
    fn load_from_url_http_error() {
        let mut server = mockito::Server::new();
        let _mock = server.mock("GET", "/missing.json").with_status(404).create();

        let url = format!("{}/missing.json", server.url());
        let err = load_document_url(&url).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }
}
