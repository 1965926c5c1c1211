//! File uploads inside variables.
//!
//! Uploads travel through variables as marker objects:
//! `{"__upload": {"filename": ..., "contentType": ..., "data": <base64>}}`.
//! Before sending, they are pulled out and replaced by `null`, following the
//! GraphQL multipart request convention (`operations`, `map`, file parts).

use crate::core::Variables;
use crate::errors::ClientError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Map, Value};

/// Key of the upload marker object.
pub const UPLOAD_MARKER: &str = "__upload";

/// A file pulled out of the variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    /// Object path of the file inside the operation, e.g. `variables.files.0`.
    pub path: String,
    /// File name.
    pub filename: String,
    /// MIME type.
    pub content_type: String,
    /// File contents.
    pub data: Vec<u8>,
}

/// Variables with uploads replaced by `null`, plus the uploads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedFiles {
    /// Cleaned variables.
    pub variables: Variables,
    /// Extracted files in traversal order.
    pub files: Vec<UploadFile>,
}

/// Builds an upload marker value.
#[must_use]
pub fn upload_value(filename: &str, content_type: &str, data: &[u8]) -> Value {
    json!({
        UPLOAD_MARKER: {
            "filename": filename,
            "contentType": content_type,
            "data": STANDARD.encode(data),
        }
    })
}

/// Pulls upload markers out of the variables.
///
/// # Errors
///
/// Returns `ClientError::Serialization` when a marker is malformed.
pub fn extract_files(variables: &Variables) -> Result<ExtractedFiles, ClientError> {
    let mut files = Vec::new();
    let mut cleaned = Map::new();
    for (key, value) in variables {
        let path = format!("variables.{key}");
        cleaned.insert(key.clone(), extract_value(value, &path, &mut files)?);
    }
    Ok(ExtractedFiles {
        variables: cleaned,
        files,
    })
}

fn extract_value(value: &Value, path: &str, files: &mut Vec<UploadFile>) -> Result<Value, ClientError> {
    match value {
        Value::Object(object) => {
            if let Some(marker) = object.get(UPLOAD_MARKER) {
                files.push(parse_marker(marker, path)?);
                return Ok(Value::Null);
            }
            let mut out = Map::new();
            for (key, inner) in object {
                out.insert(key.clone(), extract_value(inner, &format!("{path}.{key}"), files)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| extract_value(item, &format!("{path}.{i}"), files))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        other => Ok(other.clone()),
    }
}

fn parse_marker(marker: &Value, path: &str) -> Result<UploadFile, ClientError> {
    let field = |name: &str| {
        marker
            .get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| ClientError::Serialization(format!("upload at {path} is missing '{name}'")))
    };
    let data = STANDARD
        .decode(field("data")?)
        .map_err(|e| ClientError::Serialization(format!("upload at {path} is not base64: {e}")))?;
    Ok(UploadFile {
        path: path.to_string(),
        filename: field("filename")?.to_string(),
        content_type: field("contentType")?.to_string(),
        data,
    })
}

/// Returns the multipart `map` part: file index to object paths.
#[must_use]
pub fn multipart_map(files: &[UploadFile]) -> Value {
    let map: Map<String, Value> = files
        .iter()
        .enumerate()
        .map(|(i, file)| (i.to_string(), json!([file.path])))
        .collect();
    Value::Object(map)
}
