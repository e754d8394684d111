//! Schema Forms
//!
//! Compiles JSON Schemas (plus an enhanced dialect of `x-` extensions) into
//! form field trees, keeps flat form state, and assembles request payloads.
//!
//! The pipeline runs in one direction for editing and in reverse for import:
//!
//! ```text
//! schema ─▶ compile ─▶ project ─▶ FormState ─▶ assemble ─▶ envelope ─▶ payload
//!                                      ▲                                  │
//!                                      └──────────── reverse_map ◀────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use schema_forms::{compile, CompileOptions, FormSession, RuleSet, WrapperRules};
//! use serde_json::json;
//!
//! let schema = json!({
//!     "type": "object",
//!     "properties": {
//!         "NAME": { "type": "string" },
//!         "UNIT": {
//!             "type": "object",
//!             "properties": { "FORCE": { "type": "string" } }
//!         }
//!     }
//! });
//!
//! let form = compile(&schema, &CompileOptions::new("STATIC"), &RuleSet::default()).unwrap();
//! let mut session = FormSession::new(form, WrapperRules::default());
//!
//! // Untouched fields and disabled objects never reach the payload
//! assert_eq!(session.assemble(None), json!({}));
//!
//! session.update("UNIT._enabled", json!(true)).unwrap();
//! session.update("UNIT.FORCE", json!("KN")).unwrap();
//! assert_eq!(session.assemble(None), json!({ "UNIT": { "FORCE": "KN" } }));
//! ```
//!
//! # Form State Keys
//!
//! | Key | Meaning | In payload |
//! |-----|---------|------------|
//! | `A.B.C` | value of nested field `C` | yes, as `{"A":{"B":{"C":..}}}` when `A` and `A.B` are declared objects |
//! | `A._enabled` | object `A` is switched on | no |
//! | `M.__selectedOption` | live branch of oneOf `M` | no |
//! | `__section_*` | section header marker | no |
//!
//! # Requirements
//!
//! Each field carries a requirement per operating mode:
//! ```json
//! { "*": "optional", "STATIC": "required", "EIGEN": "not_applicable" }
//! ```
//! A `not_applicable` field is hidden in that mode, and hidden fields are
//! left out of the assembled payload.

mod assembler;
mod compiler;
mod envelope;
mod error;
mod loader;
mod projection;
mod registry;
mod reverse;
mod rules;
mod session;
mod state;
mod structure;
mod types;
mod validator;

pub use assembler::{assemble, assemble_instances, assemble_instances_with, envelope as apply_envelope};
pub use compiler::{
    compile, Branch, CanonicalField, CompileCache, CompiledForm, Constraints, EnumSpec, FieldKind,
    ItemType, RequiredByMode, ScalarType, Section, UiHints,
};
pub use envelope::{is_wrapped, unwrap_envelope, wrap, WrapperRule, WrapperRuleDef, WrapperRules};
pub use error::{
    CompileError, FieldError, LoadError, RuleError, ReverseError, StateError, ValidateError,
};
pub use loader::{
    is_url, load_document, load_document_auto, load_document_str, load_rules_document, load_text,
    navigate_fragment,
};
pub use projection::{
    builder_fields, initial_value, project, resolve_enum, BuilderEntry, BuilderField, BuilderKind,
    ProjectionContext,
};
pub use registry::{is_usable, resolve_active, ActiveSchema, MarkerSet, SchemaSource, SchemaSources};
pub use reverse::{reverse_map, reverse_map_str, Imported, ReverseOptions};
pub use rules::{
    Action, Condition, ModeRequirements, RuleCache, RuleSet, SectionInput, SectionRule,
    SCHEMA_RULES_KEY,
};
pub use session::FormSession;
pub use state::{BranchRef, FieldIndex, FormState, InstanceSet};
pub use structure::{normalize, NormalizedSchema, VIRTUAL_ONE_OF_FIELD};
pub use types::{
    enabled_key, is_empty_value, is_synthetic_key, join_path, normalize_mode, selected_option_key,
    CompileOptions, ModeKey, Requirement, VisibleWhen, DEFAULT_DISCRIMINANT, DEFAULT_ENHANCED_MARKERS,
    ENABLED_SUFFIX, SECTION_MARKER_PREFIX, SELECTED_OPTION_SUFFIX,
};
pub use validator::{check_state, validate_state};

#[cfg(feature = "remote")]
pub use loader::load_document_url;
