use std::collections::BTreeMap;

use crate::firestore::model::{FieldPath, ResourcePath, Timestamp};
use crate::firestore::value::{FirestoreValue, MapValue};

/// An immutable document version as delivered by a listen stream.
///
/// Identity is the [`ResourcePath`]; an update arrives as a new instance with the
/// same path that supersedes the previous one.
#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    path: ResourcePath,
    fields: MapValue,
    create_time: Option<Timestamp>,
    update_time: Option<Timestamp>,
    read_time: Option<Timestamp>,
}

impl Document {
    pub fn new(path: ResourcePath, fields: MapValue) -> Self {
        Self {
            path,
            fields,
            create_time: None,
            update_time: None,
            read_time: None,
        }
    }

    pub fn with_create_time(mut self, time: Option<Timestamp>) -> Self {
        self.create_time = time;
        self
    }

    pub fn with_update_time(mut self, time: Option<Timestamp>) -> Self {
        self.update_time = time;
        self
    }

    /// Stamps the read time of the snapshot that materialised this version.
    pub fn with_read_time(mut self, time: Timestamp) -> Self {
        self.read_time = Some(time);
        self
    }

    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    /// The document identifier (last path segment).
    pub fn id(&self) -> &str {
        self.path.last_segment().unwrap_or_default()
    }

    pub fn fields(&self) -> &MapValue {
        &self.fields
    }

    pub fn data(&self) -> &BTreeMap<String, FirestoreValue> {
        self.fields.fields()
    }

    pub fn get(&self, field: &FieldPath) -> Option<&FirestoreValue> {
        self.fields.get_path(field)
    }

    pub fn contains(&self, field: &FieldPath) -> bool {
        field.is_document_id() || self.get(field).is_some()
    }

    pub fn create_time(&self) -> Option<Timestamp> {
        self.create_time
    }

    pub fn update_time(&self) -> Option<Timestamp> {
        self.update_time
    }

    pub fn read_time(&self) -> Option<Timestamp> {
        self.read_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposes_identity_and_fields() {
        let fields: MapValue = [("name".to_string(), FirestoreValue::from("Ada"))]
            .into_iter()
            .collect();
        let doc = Document::new(ResourcePath::from_segments(["users", "ada"]), fields)
            .with_update_time(Some(Timestamp::new(10, 0)));

        assert_eq!(doc.id(), "ada");
        let name = FieldPath::from_dot_separated("name").unwrap();
        assert_eq!(doc.get(&name).and_then(FirestoreValue::as_str), Some("Ada"));
        assert!(doc.contains(&FieldPath::document_id()));
        assert!(doc.read_time().is_none());
        assert_eq!(doc.update_time(), Some(Timestamp::new(10, 0)));
    }
}
