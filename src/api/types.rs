//! Request and response bodies of the Witan API.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// The remote identity of a workbook: the file and the revision that holds its current bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteFile {
    file_id: String,
    revision_id: String,
}

impl RemoteFile {
    pub fn new(file_id: impl Into<String>, revision_id: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            revision_id: revision_id.into(),
        }
    }

    pub fn file_id(&self) -> &str {
        &self.file_id
    }

    pub fn revision_id(&self) -> &str {
        &self.revision_id
    }
}

/// A file (or a new revision of one) as stored by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileResponse {
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub bytes: u64,
    pub revision_id: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LintDiagnostic {
    pub severity: String,
    #[serde(rename = "ruleId")]
    pub rule_id: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LintResponse {
    #[serde(default)]
    pub diagnostics: Vec<LintDiagnostic>,
    #[serde(default)]
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellError {
    pub address: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TouchedCell {
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
}

/// The result of recalculating a workbook.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CalcResponse {
    #[serde(default)]
    pub touched: BTreeMap<String, TouchedCell>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changed: Vec<String>,
    #[serde(default)]
    pub errors: Vec<CellError>,
    /// Base64 workbook bytes, returned by stateless calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// The new revision, returned by files-backed calls that changed the workbook.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_id: Option<String>,
}

/// One cell to change. A `value` of JSON `null` clears the cell, which is different from leaving
/// `value` out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditCell {
    pub address: String,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// Keeps an explicit `null` as `Some(Value::Null)`.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct EditRequest<'a> {
    pub(crate) cells: &'a [EditCell],
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EditResponse {
    #[serde(default)]
    pub touched: BTreeMap<String, String>,
    #[serde(default)]
    pub errors: Vec<CellError>,
    #[serde(
        rename = "invalidatedTiles",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub invalidated_tiles: Option<Value>,
    #[serde(
        rename = "updatedSheets",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_sheets: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_id: Option<String>,
}

/// A script to run against a workbook.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecRequest {
    pub code: String,
    pub input: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_chars: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExecError {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExecResponse {
    pub ok: bool,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub writes_detected: bool,
    #[serde(default)]
    pub accesses: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecError>,
    /// Base64-encoded PNG images produced by the script.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_id: Option<String>,
}

/// A rendered image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedImage {
    pub content_type: String,
    pub bytes: bytes::Bytes,
}

/// Where a text extraction window sits in the whole document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadMetadata {
    /// 1-based line number of the first returned line.
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub total_lines: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_pages: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_slides: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_slides: Option<u64>,
}

/// Text extracted from a document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReadResponse {
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub metadata: ReadMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OutlineEntry {
    #[serde(default)]
    pub level: usize,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slides: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutlineMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_slides: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_lines: Option<u64>,
}

/// The heading structure of a document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReadOutlineResponse {
    #[serde(default)]
    pub outline: Vec<OutlineEntry>,
    #[serde(default)]
    pub metadata: OutlineMetadata,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    #[serde(default)]
    pub(crate) token: String,
}
