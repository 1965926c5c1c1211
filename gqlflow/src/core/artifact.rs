//! Compiled document descriptors.
//!
//! Artifacts are produced by the code generator and consumed read-only by the
//! pipeline. They deserialize from the generator's JSON output.

use super::{ArtifactKind, CachePolicy};
use crate::errors::ClientError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Root record type name used when the artifact does not name one.
pub const DEFAULT_ROOT_TYPE: &str = "Query";

/// An immutable descriptor of one GraphQL document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    /// Document kind.
    pub kind: ArtifactKind,
    /// Operation or fragment name.
    pub name: String,
    /// Raw document text sent to the server.
    pub raw: String,
    /// Hex SHA-256 of `raw`.
    #[serde(default)]
    pub hash: String,
    /// Type name of the root record.
    #[serde(default = "default_root_type")]
    pub root_type: String,
    /// Selection tree of the document.
    #[serde(default)]
    pub selection: Selection,
    /// Input type map used to marshal variables.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<InputObject>,
    /// Refetch and pagination metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refetch: Option<RefetchInfo>,
    /// Free-form data attached by generator plugins.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub plugin_data: serde_json::Map<String, serde_json::Value>,
    /// Default cache policy for the document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<CachePolicy>,
    /// Whether partial cache hits may be served.
    #[serde(default)]
    pub partial: bool,
    /// Whether the store publishes a loading placeholder while fetching.
    #[serde(default)]
    pub enable_loading_state: bool,
    /// Whether the document mints optimistic keys.
    #[serde(default)]
    pub optimistic_keys: bool,
}

fn default_root_type() -> String {
    DEFAULT_ROOT_TYPE.to_string()
}

impl Artifact {
    /// Creates a new artifact, hashing the raw text.
    #[must_use]
    pub fn new(
        kind: ArtifactKind,
        name: impl Into<String>,
        raw: impl Into<String>,
        selection: Selection,
    ) -> Self {
        let raw = raw.into();
        Self {
            kind,
            name: name.into(),
            hash: compute_hash(&raw),
            raw,
            root_type: match kind {
                ArtifactKind::Mutation => "Mutation".to_string(),
                ArtifactKind::Subscription => "Subscription".to_string(),
                _ => default_root_type(),
            },
            selection,
            input: None,
            refetch: None,
            plugin_data: serde_json::Map::new(),
            policy: None,
            partial: false,
            enable_loading_state: false,
            optimistic_keys: false,
        }
    }

    /// Parses an artifact from generator JSON.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Serialization` if the JSON does not describe an artifact.
    pub fn from_json(json: &str) -> Result<Self, ClientError> {
        let mut artifact: Self = serde_json::from_str(json)?;
        if artifact.hash.is_empty() {
            artifact.hash = compute_hash(&artifact.raw);
        }
        Ok(artifact)
    }

    /// Sets the input type map.
    #[must_use]
    pub fn with_input(mut self, input: InputObject) -> Self {
        self.input = Some(input);
        self
    }

    /// Sets the default cache policy.
    #[must_use]
    pub fn with_policy(mut self, policy: CachePolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Allows partial cache hits.
    #[must_use]
    pub fn with_partial(mut self, partial: bool) -> Self {
        self.partial = partial;
        self
    }

    /// Enables optimistic key minting.
    #[must_use]
    pub fn with_optimistic_keys(mut self, enabled: bool) -> Self {
        self.optimistic_keys = enabled;
        self
    }

    /// Sets the refetch metadata.
    #[must_use]
    pub fn with_refetch(mut self, refetch: RefetchInfo) -> Self {
        self.refetch = Some(refetch);
        self
    }

    /// Returns true for query documents.
    #[must_use]
    pub fn is_query(&self) -> bool {
        self.kind == ArtifactKind::Query
    }

    /// Returns true for mutation documents.
    #[must_use]
    pub fn is_mutation(&self) -> bool {
        self.kind == ArtifactKind::Mutation
    }
}

/// Computes the lowercase hex SHA-256 digest of a document.
#[must_use]
pub fn compute_hash(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

/// A set of selected fields keyed by response key (alias or field name).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    /// Selected fields.
    #[serde(default)]
    pub fields: BTreeMap<String, FieldSelection>,
}

impl Selection {
    /// Creates an empty selection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field.
    #[must_use]
    pub fn field(mut self, response_key: impl Into<String>, field: FieldSelection) -> Self {
        self.fields.insert(response_key.into(), field);
        self
    }

    /// Returns true when no fields are selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// One selected field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSelection {
    /// GraphQL type name of the field (without list or non-null wrappers).
    #[serde(rename = "type")]
    pub type_name: String,
    /// Storage key, possibly referencing `$variables`. Defaults to the response key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_raw: Option<String>,
    /// Whether the field may be null.
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    /// Whether the field carries an optimistic key.
    #[serde(default)]
    pub optimistic_key: bool,
    /// Sub-selection for object fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection: Option<Selection>,
}

fn default_nullable() -> bool {
    true
}

impl FieldSelection {
    /// Creates a nullable scalar field.
    #[must_use]
    pub fn scalar(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            key_raw: None,
            nullable: true,
            optimistic_key: false,
            selection: None,
        }
    }

    /// Creates a nullable object field.
    #[must_use]
    pub fn object(type_name: impl Into<String>, selection: Selection) -> Self {
        Self {
            selection: Some(selection),
            ..Self::scalar(type_name)
        }
    }

    /// Sets the storage key.
    #[must_use]
    pub fn with_key(mut self, key_raw: impl Into<String>) -> Self {
        self.key_raw = Some(key_raw.into());
        self
    }

    /// Marks the field non-null.
    #[must_use]
    pub fn non_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Flags the field as an optimistic key.
    #[must_use]
    pub fn optimistic_key(mut self) -> Self {
        self.optimistic_key = true;
        self
    }

    /// Returns the storage key template for a response key.
    #[must_use]
    pub fn storage_key<'a>(&'a self, response_key: &'a str) -> &'a str {
        self.key_raw.as_deref().unwrap_or(response_key)
    }
}

/// Input type map of a document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputObject {
    /// Variable name to type name.
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    /// Input object type name to its field types.
    #[serde(default)]
    pub types: BTreeMap<String, BTreeMap<String, String>>,
    /// Default variable values.
    #[serde(default)]
    pub defaults: serde_json::Map<String, serde_json::Value>,
}

/// How a paginated document advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaginationMethod {
    /// Relay-style cursors.
    Cursor,
    /// Offset and limit.
    Offset,
}

/// Refetch and pagination metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefetchInfo {
    /// Whether the document is paginated.
    #[serde(default)]
    pub paginated: bool,
    /// Pagination method.
    pub method: PaginationMethod,
    /// Page size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u64>,
    /// Path to the paginated field in the response.
    #[serde(default)]
    pub path: Vec<String>,
    /// Type that owns the paginated field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_type: Option<String>,
}

impl RefetchInfo {
    /// Variables that carry a cursor for this pagination method.
    #[must_use]
    pub fn cursor_variables(&self) -> &'static [&'static str] {
        match self.method {
            PaginationMethod::Cursor => &["after", "before"],
            PaginationMethod::Offset => &["offset"],
        }
    }
}
