use std::collections::BTreeMap;
use std::str::FromStr;

use serde_json::{json, Value as JsonValue};

use crate::firestore::error::{invalid_argument, FirestoreResult};
use crate::firestore::model::{DatabaseId, Document, GeoPoint, ResourcePath, Timestamp};
use crate::firestore::value::{BytesValue, FirestoreValue, MapValue, ValueKind};

/// Converts between the JSON mapping of the Firestore protos and the in-memory model.
///
/// Document paths inside the crate are relative to the database's `documents` root;
/// this type owns the translation to and from fully qualified resource names.
#[derive(Clone, Debug)]
pub struct JsonProtoSerializer {
    database_id: DatabaseId,
}

impl JsonProtoSerializer {
    pub fn new(database_id: DatabaseId) -> Self {
        Self { database_id }
    }

    pub fn database_id(&self) -> &DatabaseId {
        &self.database_id
    }

    pub fn database_name(&self) -> String {
        self.database_id.resource_name()
    }

    /// `projects/{p}/databases/{d}/documents`
    pub fn documents_root(&self) -> String {
        format!("{}/documents", self.database_name())
    }

    /// Fully qualified name of a document or collection path; the root maps to
    /// [`Self::documents_root`].
    pub fn resource_name(&self, path: &ResourcePath) -> String {
        if path.is_empty() {
            self.documents_root()
        } else {
            format!("{}/{}", self.documents_root(), path.canonical_string())
        }
    }

    /// Parses a fully qualified document name belonging to this database.
    pub fn path_from_name(&self, name: &str) -> FirestoreResult<ResourcePath> {
        let root = self.documents_root();
        let relative = name
            .strip_prefix(root.as_str())
            .ok_or_else(|| {
                invalid_argument(format!(
                    "Resource name '{name}' does not belong to database '{}'",
                    self.database_name()
                ))
            })?;
        if !relative.is_empty() && !relative.starts_with('/') {
            return Err(invalid_argument(format!("Malformed resource name '{name}'")));
        }
        ResourcePath::from_string(relative)
    }

    /// Decodes a `Document` message: `{name, fields?, createTime?, updateTime?}`.
    pub fn decode_document(&self, value: &JsonValue) -> FirestoreResult<Document> {
        let name = value
            .get("name")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| invalid_argument("Document missing name"))?;
        let path = self.path_from_name(name)?;
        if !path.is_document() {
            return Err(invalid_argument(format!("'{name}' is not a document name")));
        }
        let fields = self.decode_map_value(value)?;
        let create_time = optional_timestamp(value, "createTime")?;
        let update_time = optional_timestamp(value, "updateTime")?;

        Ok(Document::new(path, fields)
            .with_create_time(create_time)
            .with_update_time(update_time))
    }

    /// Decodes the `fields` member of a document or `mapValue`; absent means empty.
    pub fn decode_map_value(&self, value: &JsonValue) -> FirestoreResult<MapValue> {
        let map = value
            .as_object()
            .ok_or_else(|| invalid_argument("Expected object for map value"))?;
        let fields_object = match map.get("fields") {
            Some(fields_value) => fields_value
                .as_object()
                .ok_or_else(|| invalid_argument("Expected 'fields' to be an object"))?,
            None => return Ok(MapValue::new(BTreeMap::new())),
        };

        let mut fields = BTreeMap::new();
        for (key, value) in fields_object {
            fields.insert(key.clone(), self.decode_value(value)?);
        }
        Ok(MapValue::new(fields))
    }

    pub fn decode_value(&self, value: &JsonValue) -> FirestoreResult<FirestoreValue> {
        let object = value
            .as_object()
            .ok_or_else(|| invalid_argument("Expected Firestore value object"))?;
        if object.contains_key("nullValue") {
            return Ok(FirestoreValue::null());
        }
        if let Some(bool_value) = object.get("booleanValue") {
            let value = bool_value
                .as_bool()
                .ok_or_else(|| invalid_argument("booleanValue must be bool"))?;
            return Ok(FirestoreValue::from_bool(value));
        }
        if let Some(integer_value) = object.get("integerValue") {
            let parsed = match integer_value {
                JsonValue::String(value) => i64::from_str(value)
                    .map_err(|err| invalid_argument(format!("Invalid integerValue: {err}")))?,
                JsonValue::Number(number) => number
                    .as_i64()
                    .ok_or_else(|| invalid_argument("Integer out of range"))?,
                _ => return Err(invalid_argument("integerValue must be a string or number")),
            };
            return Ok(FirestoreValue::from_integer(parsed));
        }
        if let Some(double_value) = object.get("doubleValue") {
            return Ok(FirestoreValue::from_double(decode_double(double_value)?));
        }
        if let Some(timestamp_value) = object.get("timestampValue") {
            let timestamp_str = timestamp_value
                .as_str()
                .ok_or_else(|| invalid_argument("timestampValue must be string"))?;
            return Ok(FirestoreValue::from_timestamp(Timestamp::parse_rfc3339(
                timestamp_str,
            )?));
        }
        if let Some(string_value) = object.get("stringValue") {
            let str_value = string_value
                .as_str()
                .ok_or_else(|| invalid_argument("stringValue must be string"))?;
            return Ok(FirestoreValue::from_string(str_value));
        }
        if let Some(bytes_value) = object.get("bytesValue") {
            let str_value = bytes_value
                .as_str()
                .ok_or_else(|| invalid_argument("bytesValue must be base64 string"))?;
            let decoded = BytesValue::from_base64(str_value)
                .map_err(|err| invalid_argument(format!("Invalid bytesValue: {err}")))?;
            return Ok(FirestoreValue::from_bytes(decoded));
        }
        if let Some(reference_value) = object.get("referenceValue") {
            let name = reference_value
                .as_str()
                .ok_or_else(|| invalid_argument("referenceValue must be string"))?;
            return Ok(FirestoreValue::from_reference(self.path_from_name(name)?));
        }
        if let Some(geo_point) = object.get("geoPointValue") {
            // Zero-valued coordinates are omitted by the JSON mapping.
            let latitude = geo_point
                .get("latitude")
                .map(decode_double)
                .transpose()?
                .unwrap_or(0.0);
            let longitude = geo_point
                .get("longitude")
                .map(decode_double)
                .transpose()?
                .unwrap_or(0.0);
            return Ok(FirestoreValue::from_geo_point(GeoPoint::new(
                latitude, longitude,
            )?));
        }
        if let Some(array_value) = object.get("arrayValue") {
            let decoded = match array_value.get("values").and_then(JsonValue::as_array) {
                Some(entries) => entries
                    .iter()
                    .map(|entry| self.decode_value(entry))
                    .collect::<FirestoreResult<Vec<_>>>()?,
                None => Vec::new(),
            };
            return Ok(FirestoreValue::from_array(decoded));
        }
        if let Some(map_value) = object.get("mapValue") {
            let map = self.decode_map_value(map_value)?;
            return Ok(FirestoreValue::from_map(map.fields().clone()));
        }

        Err(invalid_argument("Unknown Firestore value type"))
    }

    pub fn encode_value(&self, value: &FirestoreValue) -> JsonValue {
        match value.kind() {
            ValueKind::Null => json!({ "nullValue": JsonValue::Null }),
            ValueKind::Boolean(boolean) => json!({ "booleanValue": boolean }),
            ValueKind::Integer(integer) => json!({ "integerValue": integer.to_string() }),
            ValueKind::Double(double) => json!({ "doubleValue": encode_double(*double) }),
            ValueKind::Timestamp(timestamp) => {
                json!({ "timestampValue": timestamp.to_rfc3339() })
            }
            ValueKind::String(string) => json!({ "stringValue": string }),
            ValueKind::Bytes(bytes) => json!({ "bytesValue": bytes.to_base64() }),
            ValueKind::Reference(reference) => {
                json!({ "referenceValue": self.resource_name(reference) })
            }
            ValueKind::GeoPoint(point) => json!({
                "geoPointValue": {
                    "latitude": point.latitude(),
                    "longitude": point.longitude(),
                }
            }),
            ValueKind::Array(array) => {
                let values = array
                    .values()
                    .iter()
                    .map(|entry| self.encode_value(entry))
                    .collect::<Vec<_>>();
                json!({ "arrayValue": { "values": values } })
            }
            ValueKind::Map(map) => json!({
                "mapValue": {
                    "fields": self.encode_map_fields(map)
                }
            }),
        }
    }

    /// Encodes a field map as a `Document`-shaped object, for test servers and tooling.
    pub fn encode_document(&self, document: &Document) -> JsonValue {
        let mut encoded = serde_json::Map::new();
        encoded.insert(
            "name".to_string(),
            JsonValue::String(self.resource_name(document.path())),
        );
        encoded.insert("fields".to_string(), self.encode_map_fields(document.fields()));
        if let Some(create_time) = document.create_time() {
            encoded.insert(
                "createTime".to_string(),
                JsonValue::String(create_time.to_rfc3339()),
            );
        }
        if let Some(update_time) = document.update_time() {
            encoded.insert(
                "updateTime".to_string(),
                JsonValue::String(update_time.to_rfc3339()),
            );
        }
        JsonValue::Object(encoded)
    }

    fn encode_map_fields(&self, map: &MapValue) -> JsonValue {
        let mut fields = serde_json::Map::new();
        for (key, value) in map.fields() {
            fields.insert(key.clone(), self.encode_value(value));
        }
        JsonValue::Object(fields)
    }
}

/// Reads an optional RFC 3339 timestamp member.
pub(crate) fn optional_timestamp(value: &JsonValue, member: &str) -> FirestoreResult<Option<Timestamp>> {
    value
        .get(member)
        .map(|raw| {
            raw.as_str()
                .ok_or_else(|| invalid_argument(format!("{member} must be a string")))
                .and_then(Timestamp::parse_rfc3339)
        })
        .transpose()
}

// Non-finite doubles travel as the strings "NaN", "Infinity" and "-Infinity".
fn encode_double(value: f64) -> JsonValue {
    if value.is_nan() {
        JsonValue::String("NaN".to_string())
    } else if value.is_infinite() {
        let name = if value > 0.0 { "Infinity" } else { "-Infinity" };
        JsonValue::String(name.to_string())
    } else {
        json!(value)
    }
}

fn decode_double(value: &JsonValue) -> FirestoreResult<f64> {
    match value {
        JsonValue::Number(number) => number
            .as_f64()
            .ok_or_else(|| invalid_argument("Invalid doubleValue")),
        JsonValue::String(value) => match value.as_str() {
            "NaN" => Ok(f64::NAN),
            "Infinity" => Ok(f64::INFINITY),
            "-Infinity" => Ok(f64::NEG_INFINITY),
            other => other
                .parse::<f64>()
                .map_err(|err| invalid_argument(format!("Invalid doubleValue: {err}"))),
        },
        _ => Err(invalid_argument("doubleValue must be a number or string")),
    }
}
