use std::collections::HashMap;

use bytes::Bytes;
use foldhash::fast::RandomState;

use crate::Value;

/// Key of the marker object `{"__upload__": <n>}` that references a file part.
pub const UPLOAD_MARKER: &str = "__upload__";

/// An in-memory file part decoded from a multipart body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Upload {
    pub buffer: Bytes,
    pub filename: String,
    pub encoding: String,
    pub mime_type: String,
}

/// Decoded file parts keyed by multipart field name.
pub type Uploads = HashMap<String, std::sync::Arc<Upload>, RandomState>;

impl Upload {
    #[must_use]
    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    /// What a client sees if an upload is echoed back in a result.
    #[must_use]
    pub fn descriptor(&self) -> serde_json::Value {
        serde_json::json!({
            "filename": self.filename,
            "encoding": self.encoding,
            "mimeType": self.mime_type,
            "size": self.size(),
        })
    }
}

/// Replaces every upload marker inside `value` with the referenced file part.
///
/// A marker is an object with the single key `__upload__` holding a number. A
/// marker whose part is missing is left in place as a plain object, which the
/// `upload` matcher then rejects.
#[must_use]
pub fn resolve_uploads(value: Value, uploads: &Uploads) -> Value {
    match value {
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| resolve_uploads(item, uploads))
                .collect(),
        ),
        Value::Object(map) => {
            if map.len() == 1
                && let Some(Value::Number(index)) = map.get(UPLOAD_MARKER)
                && let Some(upload) = uploads.get(&index.to_string())
            {
                return Value::Upload(upload.clone());
            }
            Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, resolve_uploads(v, uploads)))
                    .collect(),
            )
        }
        other => other,
    }
}
