use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::firestore::error::{
    from_grpc_status, invalid_argument, protocol_violation, FirestoreError, FirestoreResult,
};
use crate::firestore::model::{Document, ResourcePath, Timestamp};
use crate::firestore::remote::serializer::{optional_timestamp, JsonProtoSerializer};
use crate::firestore::value::BytesValue;

/// One decoded `ListenResponse`.
#[derive(Debug, Clone)]
pub enum WatchChange {
    TargetChange(WatchTargetChange),
    DocumentChange(DocumentChange),
    DocumentDelete(DocumentDelete),
    DocumentRemove(DocumentRemove),
    ExistenceFilter(ExistenceFilterChange),
}

#[derive(Debug, Clone)]
pub struct WatchTargetChange {
    pub state: TargetChangeState,
    /// Empty means the change applies to every target on the stream.
    pub target_ids: Vec<i32>,
    pub resume_token: Option<Vec<u8>>,
    pub read_time: Option<Timestamp>,
    pub cause: Option<FirestoreError>,
}

impl WatchTargetChange {
    /// Whether this change concerns `target_id`, either explicitly or globally.
    pub fn affects(&self, target_id: i32) -> bool {
        self.target_ids.is_empty() || self.target_ids.contains(&target_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetChangeState {
    NoChange,
    Add,
    Remove,
    Current,
    Reset,
}

#[derive(Debug, Clone)]
pub struct DocumentChange {
    pub updated_target_ids: Vec<i32>,
    pub removed_target_ids: Vec<i32>,
    pub document: Document,
}

#[derive(Debug, Clone)]
pub struct DocumentDelete {
    pub path: ResourcePath,
    pub read_time: Option<Timestamp>,
    pub removed_target_ids: Vec<i32>,
}

#[derive(Debug, Clone)]
pub struct DocumentRemove {
    pub path: ResourcePath,
    pub read_time: Option<Timestamp>,
    pub removed_target_ids: Vec<i32>,
}

#[derive(Debug, Clone)]
pub struct ExistenceFilterChange {
    pub target_id: i32,
    pub count: i32,
}

#[derive(Debug, Deserialize)]
struct StatusCause {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: Option<String>,
}

/// Decodes a `ListenResponse`. Responses that carry none of the known members, and
/// target changes with an unrecognised type, are protocol violations.
pub fn decode_watch_change(
    serializer: &JsonProtoSerializer,
    value: &JsonValue,
) -> FirestoreResult<WatchChange> {
    if let Some(target_change) = value.get("targetChange") {
        return decode_target_change(target_change);
    }

    if let Some(document_change) = value.get("documentChange") {
        return decode_document_change(serializer, document_change);
    }

    if let Some(document_delete) = value.get("documentDelete") {
        let (path, read_time, removed_target_ids) =
            decode_removal(serializer, document_delete, "documentDelete")?;
        return Ok(WatchChange::DocumentDelete(DocumentDelete {
            path,
            read_time,
            removed_target_ids,
        }));
    }

    if let Some(document_remove) = value.get("documentRemove") {
        let (path, read_time, removed_target_ids) =
            decode_removal(serializer, document_remove, "documentRemove")?;
        return Ok(WatchChange::DocumentRemove(DocumentRemove {
            path,
            read_time,
            removed_target_ids,
        }));
    }

    if let Some(filter) = value.get("filter") {
        return decode_filter_change(filter);
    }

    Err(protocol_violation(format!(
        "Unrecognised listen response: {value}"
    )))
}

fn decode_target_change(value: &JsonValue) -> FirestoreResult<WatchChange> {
    let target_ids = numeric_array(value.get("targetIds"));

    let resume_token = value
        .get("resumeToken")
        .and_then(JsonValue::as_str)
        .map(|token| {
            BytesValue::from_base64(token)
                .map(|bytes| bytes.as_slice().to_vec())
                .map_err(|err| invalid_argument(format!("Invalid resumeToken: {err}")))
        })
        .transpose()?;

    let read_time = optional_timestamp(value, "readTime")?;

    let state = match value.get("targetChangeType").and_then(JsonValue::as_str) {
        None => TargetChangeState::NoChange,
        Some(raw) => target_state_from_str(raw)?,
    };

    let cause = value
        .get("cause")
        .map(|cause| serde_json::from_value::<StatusCause>(cause.clone()))
        .transpose()
        .map_err(|err| invalid_argument(format!("Failed to decode watch cause: {err}")))?
        .map(|cause| from_grpc_status(cause.code, cause.message));

    Ok(WatchChange::TargetChange(WatchTargetChange {
        state,
        target_ids,
        resume_token,
        read_time,
        cause,
    }))
}

fn decode_document_change(
    serializer: &JsonProtoSerializer,
    value: &JsonValue,
) -> FirestoreResult<WatchChange> {
    let document = value
        .get("document")
        .ok_or_else(|| invalid_argument("documentChange missing document"))?;

    Ok(WatchChange::DocumentChange(DocumentChange {
        updated_target_ids: numeric_array(value.get("targetIds")),
        removed_target_ids: numeric_array(value.get("removedTargetIds")),
        document: serializer.decode_document(document)?,
    }))
}

fn decode_removal(
    serializer: &JsonProtoSerializer,
    value: &JsonValue,
    kind: &str,
) -> FirestoreResult<(ResourcePath, Option<Timestamp>, Vec<i32>)> {
    let name = value
        .get("document")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| invalid_argument(format!("{kind} missing document")))?;
    let path = serializer.path_from_name(name)?;
    let read_time = optional_timestamp(value, "readTime")?;
    Ok((path, read_time, numeric_array(value.get("removedTargetIds"))))
}

fn decode_filter_change(value: &JsonValue) -> FirestoreResult<WatchChange> {
    let target_id = value
        .get("targetId")
        .and_then(JsonValue::as_i64)
        .unwrap_or_default() as i32;
    // proto3 omits a zero count.
    let count = value
        .get("count")
        .and_then(JsonValue::as_i64)
        .unwrap_or_default() as i32;
    Ok(WatchChange::ExistenceFilter(ExistenceFilterChange {
        target_id,
        count,
    }))
}

fn numeric_array(value: Option<&JsonValue>) -> Vec<i32> {
    value
        .and_then(JsonValue::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| entry.as_i64().map(|value| value as i32))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default()
}

fn target_state_from_str(value: &str) -> FirestoreResult<TargetChangeState> {
    match value {
        "NO_CHANGE" => Ok(TargetChangeState::NoChange),
        "ADD" => Ok(TargetChangeState::Add),
        "REMOVE" => Ok(TargetChangeState::Remove),
        "CURRENT" => Ok(TargetChangeState::Current),
        "RESET" => Ok(TargetChangeState::Reset),
        other => Err(protocol_violation(format!(
            "Unknown targetChangeType '{other}'"
        ))),
    }
}
