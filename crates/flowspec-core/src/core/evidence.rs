// crates/flowspec-core/src/core/evidence.rs
// ============================================================================
// Module: FlowSpec Evidence Model
// Description: Evidence schema vocabulary, payload bodies, and validation.
// Purpose: Provide fail-closed evidence contracts for task outcomes.
// Dependencies: crate::core::identifiers, serde, serde_json
// ============================================================================

//! ## Overview
//! Tasks may require evidence before an outcome can be recorded. The schema
//! vocabulary is a closed sum of `file`, `text`, and `structured` shapes;
//! unknown legacy blobs deserialize into an opaque fallback variant that is
//! preserved verbatim and rejected at validation time. Structured content is
//! checked against a restricted JSON-Schema subset that fails closed on
//! unrecognized keywords. The engine stores only tenant-prefixed pointers for
//! file evidence; binary blobs live outside.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::identifiers::CompanyId;

// ============================================================================
// SECTION: Evidence Schemas
// ============================================================================

/// Evidence schema attached to a task specification.
///
/// Deserialization tries the recognized shapes first and preserves anything
/// else verbatim as [`EvidenceSchema::Fallback`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EvidenceSchema {
    /// Recognized schema shape.
    Known(KnownEvidenceSchema),
    /// Unrecognized legacy blob, preserved verbatim and read-only.
    Fallback(Value),
}

/// Recognized evidence schema shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KnownEvidenceSchema {
    /// File-pointer evidence options.
    File {
        /// Optional MIME type allow-list.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_types: Option<Vec<String>>,
        /// Optional size cap in bytes.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_size: Option<u64>,
        /// Optional human-readable description.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    /// Free-text evidence options.
    Text {
        /// Optional minimum content length.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_length: Option<usize>,
        /// Optional maximum content length.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_length: Option<usize>,
        /// Optional human-readable description.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    /// Structured evidence validated against a restricted JSON-Schema subset.
    Structured {
        /// Restricted JSON-Schema subset document.
        json_schema: Value,
        /// Optional human-readable description.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
}

impl EvidenceSchema {
    /// Validates schema well-formedness at publish time.
    ///
    /// # Errors
    ///
    /// Returns [`EvidenceError::SchemaShape`] when the schema is malformed.
    /// Fallback blobs are rejected: drafts must use a recognized shape.
    pub fn validate_shape(&self) -> Result<(), EvidenceError> {
        match self {
            Self::Known(KnownEvidenceSchema::File {
                max_size, ..
            }) => {
                if *max_size == Some(0) {
                    return Err(EvidenceError::SchemaShape(
                        "file max_size must be greater than zero".to_string(),
                    ));
                }
                Ok(())
            }
            Self::Known(KnownEvidenceSchema::Text {
                min_length,
                max_length,
                ..
            }) => {
                if let (Some(min), Some(max)) = (min_length, max_length)
                    && min > max
                {
                    return Err(EvidenceError::SchemaShape(
                        "text min_length exceeds max_length".to_string(),
                    ));
                }
                Ok(())
            }
            Self::Known(KnownEvidenceSchema::Structured {
                json_schema, ..
            }) => validate_subset_schema(json_schema),
            Self::Fallback(_) => Err(EvidenceError::SchemaShape(
                "unrecognized legacy evidence schema".to_string(),
            )),
        }
    }
}

// ============================================================================
// SECTION: Evidence Bodies
// ============================================================================

/// File pointer stored in place of binary evidence.
///
/// # Invariants
/// - `storage_key` must begin with the owning tenant prefix `"{company_id}/"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePointer {
    /// Tenant-prefixed object key in external storage.
    pub storage_key: String,
    /// Original file name.
    pub file_name: String,
    /// MIME type of the stored object.
    pub mime_type: String,
    /// Object size in bytes.
    pub size: u64,
    /// Storage bucket identifier.
    pub bucket: String,
}

/// Evidence payload body attached to a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvidenceBody {
    /// File pointer evidence.
    File {
        /// Pointer to the externally stored object.
        pointer: FilePointer,
    },
    /// Free-text evidence.
    Text {
        /// Text content.
        content: String,
    },
    /// Structured JSON evidence.
    Structured {
        /// Structured content.
        content: Value,
    },
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Evidence validation errors.
#[derive(Debug, Error)]
pub enum EvidenceError {
    /// Evidence payload does not satisfy the task's schema.
    #[error("invalid evidence format: {0}")]
    InvalidFormat(String),
    /// File pointer is missing required fields.
    #[error("invalid file pointer: {0}")]
    InvalidFilePointer(String),
    /// File pointer storage key is not prefixed by the owning tenant.
    #[error("storage key not owned by tenant: {storage_key}")]
    TenantMismatch {
        /// Offending storage key.
        storage_key: String,
    },
    /// Evidence schema is malformed.
    #[error("malformed evidence schema: {0}")]
    SchemaShape(String),
}

// ============================================================================
// SECTION: Pointer Validation
// ============================================================================

/// Validates the strict FILE pointer shape.
///
/// # Errors
///
/// Returns [`EvidenceError::InvalidFilePointer`] when a field is empty or the
/// size is zero.
pub fn validate_file_pointer(pointer: &FilePointer) -> Result<(), EvidenceError> {
    if pointer.storage_key.trim().is_empty() {
        return Err(EvidenceError::InvalidFilePointer("storage_key is empty".to_string()));
    }
    if pointer.file_name.trim().is_empty() {
        return Err(EvidenceError::InvalidFilePointer("file_name is empty".to_string()));
    }
    if pointer.mime_type.trim().is_empty() {
        return Err(EvidenceError::InvalidFilePointer("mime_type is empty".to_string()));
    }
    if pointer.bucket.trim().is_empty() {
        return Err(EvidenceError::InvalidFilePointer("bucket is empty".to_string()));
    }
    if pointer.size == 0 {
        return Err(EvidenceError::InvalidFilePointer("size must be greater than zero".to_string()));
    }
    Ok(())
}

/// Ensures the pointer's storage key carries the owning tenant prefix.
///
/// # Errors
///
/// Returns [`EvidenceError::TenantMismatch`] when the prefix does not match.
pub fn ensure_tenant_prefix(
    pointer: &FilePointer,
    company_id: &CompanyId,
) -> Result<(), EvidenceError> {
    let prefix = format!("{company_id}/");
    if pointer.storage_key.starts_with(&prefix) {
        Ok(())
    } else {
        Err(EvidenceError::TenantMismatch {
            storage_key: pointer.storage_key.clone(),
        })
    }
}

// ============================================================================
// SECTION: Schema Validation
// ============================================================================

/// Validates an evidence body against a task's schema.
///
/// # Errors
///
/// Returns [`EvidenceError::InvalidFormat`] when the body does not satisfy
/// the schema, including body/schema kind mismatches and fallback schemas,
/// which fail closed.
pub fn validate_against_schema(
    schema: &EvidenceSchema,
    body: &EvidenceBody,
) -> Result<(), EvidenceError> {
    match (schema, body) {
        (
            EvidenceSchema::Known(KnownEvidenceSchema::File {
                mime_types,
                max_size,
                ..
            }),
            EvidenceBody::File {
                pointer,
            },
        ) => {
            validate_file_pointer(pointer)?;
            if let Some(allowed) = mime_types
                && !allowed.iter().any(|mime| mime == &pointer.mime_type)
            {
                return Err(EvidenceError::InvalidFormat(format!(
                    "mime type not allowed: {}",
                    pointer.mime_type
                )));
            }
            if let Some(cap) = max_size
                && pointer.size > *cap
            {
                return Err(EvidenceError::InvalidFormat(format!(
                    "file size {} exceeds cap {cap}",
                    pointer.size
                )));
            }
            Ok(())
        }
        (
            EvidenceSchema::Known(KnownEvidenceSchema::Text {
                min_length,
                max_length,
                ..
            }),
            EvidenceBody::Text {
                content,
            },
        ) => {
            let length = content.chars().count();
            if let Some(min) = min_length
                && length < *min
            {
                return Err(EvidenceError::InvalidFormat(format!(
                    "text length {length} below minimum {min}"
                )));
            }
            if let Some(max) = max_length
                && length > *max
            {
                return Err(EvidenceError::InvalidFormat(format!(
                    "text length {length} above maximum {max}"
                )));
            }
            Ok(())
        }
        (
            EvidenceSchema::Known(KnownEvidenceSchema::Structured {
                json_schema, ..
            }),
            EvidenceBody::Structured {
                content,
            },
        ) => {
            validate_subset_schema(json_schema)?;
            validate_value_against_subset(json_schema, content, "$")
        }
        (EvidenceSchema::Fallback(_), _) => Err(EvidenceError::InvalidFormat(
            "evidence schema uses an unrecognized legacy shape".to_string(),
        )),
        (_, _) => Err(EvidenceError::InvalidFormat(
            "evidence body kind does not match schema type".to_string(),
        )),
    }
}

/// Keywords recognized by the restricted JSON-Schema subset.
const SUBSET_KEYWORDS: [&str; 11] = [
    "type",
    "properties",
    "required",
    "items",
    "enum",
    "description",
    "additionalProperties",
    "minLength",
    "maxLength",
    "minimum",
    "maximum",
];

/// Validates that a schema document stays within the restricted subset.
///
/// Unknown keywords fail closed.
///
/// # Errors
///
/// Returns [`EvidenceError::SchemaShape`] when the document leaves the subset.
pub fn validate_subset_schema(schema: &Value) -> Result<(), EvidenceError> {
    let Some(object) = schema.as_object() else {
        return Err(EvidenceError::SchemaShape("schema must be a JSON object".to_string()));
    };
    for (key, value) in object {
        if !SUBSET_KEYWORDS.contains(&key.as_str()) {
            return Err(EvidenceError::SchemaShape(format!("unrecognized schema keyword: {key}")));
        }
        match key.as_str() {
            "type" => {
                let Some(kind) = value.as_str() else {
                    return Err(EvidenceError::SchemaShape("type must be a string".to_string()));
                };
                if !matches!(
                    kind,
                    "object" | "array" | "string" | "number" | "integer" | "boolean" | "null"
                ) {
                    return Err(EvidenceError::SchemaShape(format!("unsupported type: {kind}")));
                }
            }
            "properties" => {
                let Some(properties) = value.as_object() else {
                    return Err(EvidenceError::SchemaShape(
                        "properties must be an object".to_string(),
                    ));
                };
                for nested in properties.values() {
                    validate_subset_schema(nested)?;
                }
            }
            "items" => validate_subset_schema(value)?,
            "required" => {
                let Some(entries) = value.as_array() else {
                    return Err(EvidenceError::SchemaShape(
                        "required must be an array".to_string(),
                    ));
                };
                if entries.iter().any(|entry| !entry.is_string()) {
                    return Err(EvidenceError::SchemaShape(
                        "required entries must be strings".to_string(),
                    ));
                }
            }
            "enum" => {
                if !value.is_array() {
                    return Err(EvidenceError::SchemaShape("enum must be an array".to_string()));
                }
            }
            "description" => {
                if !value.is_string() {
                    return Err(EvidenceError::SchemaShape(
                        "description must be a string".to_string(),
                    ));
                }
            }
            "additionalProperties" => {
                if !value.is_boolean() {
                    validate_subset_schema(value)?;
                }
            }
            "minLength" | "maxLength" => {
                if value.as_u64().is_none() {
                    return Err(EvidenceError::SchemaShape(format!(
                        "{key} must be a non-negative integer"
                    )));
                }
            }
            "minimum" | "maximum" => {
                if value.as_f64().is_none() {
                    return Err(EvidenceError::SchemaShape(format!("{key} must be a number")));
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Validates a value against a subset schema previously checked for shape.
///
/// # Errors
///
/// Returns [`EvidenceError::InvalidFormat`] naming the failing path.
fn validate_value_against_subset(
    schema: &Value,
    value: &Value,
    path: &str,
) -> Result<(), EvidenceError> {
    let Some(object) = schema.as_object() else {
        return Err(EvidenceError::SchemaShape("schema must be a JSON object".to_string()));
    };

    if let Some(kind) = object.get("type").and_then(Value::as_str)
        && !value_matches_type(value, kind)
    {
        return Err(EvidenceError::InvalidFormat(format!("{path}: expected type {kind}")));
    }

    if let Some(allowed) = object.get("enum").and_then(Value::as_array)
        && !allowed.contains(value)
    {
        return Err(EvidenceError::InvalidFormat(format!("{path}: value not in enum")));
    }

    if let Some(text) = value.as_str() {
        let length = u64::try_from(text.chars().count()).unwrap_or(u64::MAX);
        if let Some(min) = object.get("minLength").and_then(Value::as_u64)
            && length < min
        {
            return Err(EvidenceError::InvalidFormat(format!(
                "{path}: string shorter than minLength {min}"
            )));
        }
        if let Some(max) = object.get("maxLength").and_then(Value::as_u64)
            && length > max
        {
            return Err(EvidenceError::InvalidFormat(format!(
                "{path}: string longer than maxLength {max}"
            )));
        }
    }

    if let Some(number) = value.as_f64() {
        if let Some(minimum) = object.get("minimum").and_then(Value::as_f64)
            && number < minimum
        {
            return Err(EvidenceError::InvalidFormat(format!(
                "{path}: number below minimum {minimum}"
            )));
        }
        if let Some(maximum) = object.get("maximum").and_then(Value::as_f64)
            && number > maximum
        {
            return Err(EvidenceError::InvalidFormat(format!(
                "{path}: number above maximum {maximum}"
            )));
        }
    }

    if let Some(entries) = value.as_array()
        && let Some(items) = object.get("items")
    {
        for (index, entry) in entries.iter().enumerate() {
            validate_value_against_subset(items, entry, &format!("{path}[{index}]"))?;
        }
    }

    if let Some(fields) = value.as_object() {
        let properties = object.get("properties").and_then(Value::as_object);
        if let Some(required) = object.get("required").and_then(Value::as_array) {
            for name in required.iter().filter_map(Value::as_str) {
                if !fields.contains_key(name) {
                    return Err(EvidenceError::InvalidFormat(format!(
                        "{path}: missing required field {name}"
                    )));
                }
            }
        }
        if let Some(properties) = properties {
            for (name, nested_schema) in properties {
                if let Some(nested_value) = fields.get(name) {
                    validate_value_against_subset(
                        nested_schema,
                        nested_value,
                        &format!("{path}.{name}"),
                    )?;
                }
            }
        }
        match object.get("additionalProperties") {
            Some(Value::Bool(false)) => {
                for name in fields.keys() {
                    if !properties.is_some_and(|known| known.contains_key(name)) {
                        return Err(EvidenceError::InvalidFormat(format!(
                            "{path}: unexpected field {name}"
                        )));
                    }
                }
            }
            Some(extra_schema) if !extra_schema.is_boolean() => {
                for (name, nested_value) in fields {
                    if !properties.is_some_and(|known| known.contains_key(name)) {
                        validate_value_against_subset(
                            extra_schema,
                            nested_value,
                            &format!("{path}.{name}"),
                        )?;
                    }
                }
            }
            _ => {}
        }
    }

    Ok(())
}

/// Returns true when a JSON value matches a subset type keyword.
fn value_matches_type(value: &Value, kind: &str) -> bool {
    match kind {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.as_i64().is_some() || value.as_u64().is_some(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => false,
    }
}
