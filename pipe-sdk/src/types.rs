//! Records and the values they carry

use crate::error::{PipeError, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncRead;

/// Boxed reader consumed by a stream part
pub type PartReader = Box<dyn AsyncRead + Send + Unpin>;

/// A reader that can be taken exactly once.
///
/// Clones share the same reader, so a record holding a stream part can be
/// cloned but only one encode will get the data.
#[derive(Clone)]
pub struct StreamHandle(Arc<Mutex<Option<PartReader>>>);

impl StreamHandle {
    pub fn new(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self(Arc::new(Mutex::new(Some(Box::new(reader)))))
    }

    /// Take the reader out. Returns `None` once consumed.
    pub fn take(&self) -> Option<PartReader> {
        self.0.lock().take()
    }

    pub fn is_consumed(&self) -> bool {
        self.0.lock().is_none()
    }
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("consumed", &self.is_consumed())
            .finish()
    }
}

/// A binary attachment. Any of these in a record turns a save into a
/// multipart upload.
#[derive(Debug, Clone)]
pub enum FilePart {
    /// Local file; file name and MIME type are inferred from the path
    File { path: PathBuf, field_name: String },
    Data {
        bytes: Bytes,
        field_name: String,
        file_name: String,
        mime_type: String,
    },
    Stream {
        stream: StreamHandle,
        field_name: String,
        file_name: String,
        mime_type: String,
    },
}

impl FilePart {
    pub fn file(path: impl AsRef<Path>, field_name: impl Into<String>) -> Self {
        FilePart::File {
            path: path.as_ref().to_path_buf(),
            field_name: field_name.into(),
        }
    }

    pub fn data(
        bytes: impl Into<Bytes>,
        field_name: impl Into<String>,
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Self {
        FilePart::Data {
            bytes: bytes.into(),
            field_name: field_name.into(),
            file_name: file_name.into(),
            mime_type: mime_type.into(),
        }
    }

    pub fn stream(
        reader: impl AsyncRead + Send + Unpin + 'static,
        field_name: impl Into<String>,
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Self {
        FilePart::Stream {
            stream: StreamHandle::new(reader),
            field_name: field_name.into(),
            file_name: file_name.into(),
            mime_type: mime_type.into(),
        }
    }

    /// Form field the part is uploaded under
    pub fn field_name(&self) -> &str {
        match self {
            FilePart::File { field_name, .. }
            | FilePart::Data { field_name, .. }
            | FilePart::Stream { field_name, .. } => field_name,
        }
    }
}

/// Value stored under a record key
#[derive(Debug, Clone)]
pub enum RecordValue {
    Json(Value),
    File(FilePart),
}

impl RecordValue {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            RecordValue::Json(value) => Some(value),
            RecordValue::File(_) => None,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, RecordValue::File(_))
    }
}

impl From<Value> for RecordValue {
    fn from(value: Value) -> Self {
        RecordValue::Json(value)
    }
}

impl From<FilePart> for RecordValue {
    fn from(part: FilePart) -> Self {
        RecordValue::File(part)
    }
}

impl From<&str> for RecordValue {
    fn from(value: &str) -> Self {
        RecordValue::Json(Value::String(value.to_string()))
    }
}

impl From<String> for RecordValue {
    fn from(value: String) -> Self {
        RecordValue::Json(Value::String(value))
    }
}

impl From<i32> for RecordValue {
    fn from(value: i32) -> Self {
        RecordValue::Json(Value::from(value))
    }
}

impl From<i64> for RecordValue {
    fn from(value: i64) -> Self {
        RecordValue::Json(Value::from(value))
    }
}

impl From<u64> for RecordValue {
    fn from(value: u64) -> Self {
        RecordValue::Json(Value::from(value))
    }
}

impl From<bool> for RecordValue {
    fn from(value: bool) -> Self {
        RecordValue::Json(Value::Bool(value))
    }
}

/// An ordered map of field names to values.
#[derive(Debug, Clone, Default)]
pub struct Record {
    fields: Vec<(String, RecordValue)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a record from a JSON object
    pub fn from_json(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(map.into()),
            other => Err(PipeError::InvalidRecord(format!(
                "expected a JSON object, got {}",
                other
            ))),
        }
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<RecordValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace a field, keeping its original position on replace
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<RecordValue>) {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&RecordValue> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn remove(&mut self, key: &str) -> Option<RecordValue> {
        let index = self.fields.iter().position(|(k, _)| k == key)?;
        Some(self.fields.remove(index).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RecordValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn has_file_parts(&self) -> bool {
        self.fields.iter().any(|(_, v)| v.is_file())
    }

    /// Identifier stored under `field`, rendered for use in a URL.
    ///
    /// `null`, `""` and file parts count as no identifier.
    pub fn id_value(&self, field: &str) -> Option<String> {
        match self.get(field)?.as_json()? {
            Value::Null => None,
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// JSON object of the scalar fields; file parts are skipped
    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .fields
            .iter()
            .filter_map(|(k, v)| v.as_json().map(|json| (k.clone(), json.clone())))
            .collect();
        Value::Object(map)
    }

    pub(crate) fn into_fields(self) -> Vec<(String, RecordValue)> {
        self.fields
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self {
            fields: map
                .into_iter()
                .map(|(k, v)| (k, RecordValue::Json(v)))
                .collect(),
        }
    }
}
