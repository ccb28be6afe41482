//! Attachment metadata and byte storage.
//!
//! A document's `_attachments` map holds one [`AttachmentInfo`] per name.
//! The bytes live in the `_attachments` store under the info's opaque key
//! (`rak`), base64 encoded. A write may carry bytes inline as
//! `{"content_type": ..., "data": "<base64>"}`; they are moved into the
//! store and the entry is replaced by a stub.

use crate::document::ATTACHMENTS_FIELD;
use crate::error::{CoreError, CoreResult};
use crate::stores::ATTACHMENTS;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use recliner_codec::{from_value, to_value, Map, Value};
use recliner_storage::WriteBatch;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Metadata of one attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentInfo {
    /// MIME type.
    pub content_type: String,
    /// Size in bytes.
    pub length: usize,
    /// Opaque key of the stored bytes.
    pub rak: String,
    /// Always true in stored documents: the bytes are not inline.
    #[serde(default)]
    pub stub: bool,
    /// Where the bytes can be fetched when they are not stored locally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_url: Option<String>,
}

/// An attachment with its bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Metadata.
    pub info: AttachmentInfo,
    /// Stored bytes; `None` for a remote-only stub.
    pub data: Option<Bytes>,
}

/// Returns the attachment infos of a document.
pub fn attachment_infos(doc: &Value) -> Vec<(String, AttachmentInfo)> {
    doc.get(ATTACHMENTS_FIELD)
        .and_then(Value::as_object)
        .map(|atts| {
            atts.iter()
                .filter_map(|(name, info)| {
                    from_value::<AttachmentInfo>(info)
                        .ok()
                        .map(|i| (name.to_string(), i))
                })
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn blob_record(rak: &str, data: &[u8]) -> Value {
    let mut record = Map::with_capacity(2);
    record.insert("_id", rak);
    record.insert("data", STANDARD.encode(data));
    Value::Object(record)
}

pub(crate) fn blob_bytes(record: &Value) -> CoreResult<Bytes> {
    let text = record
        .get("data")
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::internal("attachment record has no data"))?;
    let bytes = STANDARD
        .decode(text)
        .map_err(|e| CoreError::internal(format!("attachment record is not base64: {e}")))?;
    Ok(Bytes::from(bytes))
}

/// Moves inline attachment bytes of `body` into `blobs` and drops the
/// bytes of attachments `previous` had that `body` no longer references.
pub(crate) fn absorb(
    body: &mut Map,
    previous: Option<&Value>,
    blobs: &mut WriteBatch,
) -> CoreResult<()> {
    let mut kept: HashSet<String> = HashSet::new();
    if let Some(entries) = body.get(ATTACHMENTS_FIELD) {
        let entries = entries
            .as_object()
            .ok_or_else(|| CoreError::bad_request("_attachments must be an object"))?;
        let mut stubs = Map::with_capacity(entries.len());
        for (name, entry) in entries.iter() {
            let info = match entry.get("data") {
                Some(data) => {
                    let data = data
                        .as_str()
                        .and_then(|d| STANDARD.decode(d).ok())
                        .ok_or_else(|| {
                            CoreError::bad_request(format!("attachment {name} data is not base64"))
                        })?;
                    let rak = entry
                        .get("rak")
                        .and_then(Value::as_str)
                        .map_or_else(|| Uuid::new_v4().simple().to_string(), str::to_string);
                    blobs.put(ATTACHMENTS, blob_record(&rak, &data));
                    AttachmentInfo {
                        content_type: entry
                            .get("content_type")
                            .and_then(Value::as_str)
                            .unwrap_or(DEFAULT_CONTENT_TYPE)
                            .to_string(),
                        length: data.len(),
                        rak,
                        stub: true,
                        cloud_url: entry
                            .get("cloud_url")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                    }
                }
                None => from_value::<AttachmentInfo>(entry).map_err(|e| {
                    CoreError::bad_request(format!("attachment {name} stub is invalid: {e}"))
                })?,
            };
            kept.insert(info.rak.clone());
            stubs.insert(name, to_value(&info)?);
        }
        body.insert(ATTACHMENTS_FIELD, Value::Object(stubs));
    }
    if let Some(previous) = previous {
        for (_, info) in attachment_infos(previous) {
            if !kept.contains(&info.rak) {
                blobs.delete(ATTACHMENTS, info.rak);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use recliner_codec::value;
    use recliner_storage::WriteOp;

    #[test]
    fn inline_data_becomes_stub() {
        let mut body = value!({
            "_id": "a",
            "_attachments": {"note.txt": {"content_type": "text/plain", "data": "aGVsbG8="}}
        })
        .into_object()
        .unwrap();
        let mut blobs = WriteBatch::new();
        absorb(&mut body, None, &mut blobs).unwrap();
        let doc = Value::Object(body);
        let infos = attachment_infos(&doc);
        assert_eq!(infos.len(), 1);
        let info = &infos[0].1;
        assert_eq!(info.length, 5);
        assert!(info.stub);
        assert_eq!(blobs.len(), 1);
        match &blobs.ops()[0] {
            WriteOp::Put { value, .. } => {
                assert_eq!(blob_bytes(value).unwrap(), Bytes::from_static(b"hello"));
            }
            other => panic!("unexpected op {other:?}"),
        }
    }

    #[test]
    fn supplied_rak_is_kept() {
        let mut body = value!({
            "_attachments": {"a": {"rak": "k1", "data": "AA=="}}
        })
        .into_object()
        .unwrap();
        absorb(&mut body, None, &mut WriteBatch::new()).unwrap();
        assert_eq!(attachment_infos(&Value::Object(body))[0].1.rak, "k1");
    }

    #[test]
    fn dropped_attachments_release_bytes() {
        let previous = value!({
            "_attachments": {"a": {"content_type": "x", "length": 1, "rak": "old", "stub": true}}
        });
        let mut body = value!({"_id": "d"}).into_object().unwrap();
        let mut blobs = WriteBatch::new();
        absorb(&mut body, Some(&previous), &mut blobs).unwrap();
        assert_eq!(
            blobs.ops(),
            &[WriteOp::Delete {
                store: ATTACHMENTS.into(),
                key: Value::from("old")
            }]
        );
    }

    #[test]
    fn bad_data_is_rejected() {
        let mut body = value!({"_attachments": {"a": {"data": "***"}}}).into_object().unwrap();
        let err = absorb(&mut body, None, &mut WriteBatch::new()).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }
}
