//! Error types for loading, compilation, form state, import and validation.

use std::path::PathBuf;
use thiserror::Error;

/// Errors while loading schema, rule or payload documents.
#[derive(Debug, Error)]
pub enum LoadError {
    // IO errors (exit code 3)
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("cannot read {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[cfg(feature = "remote")]
    #[error("failed to fetch {url}: {source}")]
    NetworkError {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    // Parse errors (exit code 2)
    #[error("invalid JSON: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
    },

    #[cfg(feature = "yaml")]
    #[error("invalid YAML: {source}")]
    InvalidYaml {
        #[source]
        source: serde_yaml::Error,
    },

    #[error("YAML documents require the `yaml` feature: {path}")]
    YamlUnsupported { path: PathBuf },
}

impl LoadError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            LoadError::FileNotFound { .. } | LoadError::ReadError { .. } => 3,
            #[cfg(feature = "remote")]
            LoadError::NetworkError { .. } => 3,
            _ => 2,
        }
    }
}

/// Errors in a rule-set document.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("invalid rule document: {source}")]
    InvalidDocument {
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid wrapper pattern \"{pattern}\": {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

impl RuleError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            RuleError::Load(e) => e.exit_code(),
            _ => 2,
        }
    }
}

/// Errors while compiling a schema into a field tree.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("no schema available")]
    NoSchema,

    #[error("schema root must be an object, got {actual}")]
    RootNotObject { actual: String },
}

impl CompileError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        2
    }
}

/// Errors from form state and instance operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("cannot remove instance {key}: at least one instance must remain")]
    LastInstance { key: u32 },

    #[error("unknown instance {key}")]
    UnknownInstance { key: u32 },

    #[error("option {index} out of range for {path} ({count} option(s))")]
    InvalidBranch {
        path: String,
        index: usize,
        count: usize,
    },

    #[error("multiple instances are not enabled")]
    InstancesDisabled,
}

impl StateError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        1
    }
}

/// Errors while reconstructing form state from a payload.
#[derive(Debug, Error)]
pub enum ReverseError {
    #[error("invalid JSON: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
    },

    #[error("payload must be a JSON object, got {actual}")]
    NotAnObject { actual: String },

    #[error("instance key \"{key}\" is not a positive integer")]
    InvalidInstanceKey { key: String },

    #[error("payload contains no instances")]
    NoInstances,
}

impl ReverseError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        1
    }
}

/// Form state that fails field checks.
#[derive(Debug, Error)]
pub enum ValidateError {
    #[error("form has {} invalid field(s)", .errors.len())]
    Invalid { errors: Vec<FieldError> },
}

impl ValidateError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        1
    }
}

/// One failed field check.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct FieldError {
    /// State key of the field, prefixed with the instance key when the
    /// form holds several instances.
    pub path: String,
    /// Human-readable error message.
    pub message: String,
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}
