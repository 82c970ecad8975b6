use std::collections::BTreeMap;

use crate::firestore::model::FieldPath;
use crate::firestore::value::FirestoreValue;

/// String-keyed field map. Keys iterate in ascending order.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct MapValue {
    fields: BTreeMap<String, FirestoreValue>,
}

impl MapValue {
    pub fn new(fields: BTreeMap<String, FirestoreValue>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &BTreeMap<String, FirestoreValue> {
        &self.fields
    }

    pub fn get(&self, key: &str) -> Option<&FirestoreValue> {
        self.fields.get(key)
    }

    /// Walks nested maps along `path`; `None` when any segment is missing or not a map.
    pub fn get_path(&self, path: &FieldPath) -> Option<&FirestoreValue> {
        let (first, rest) = path.segments().split_first()?;
        let mut current = self.fields.get(first)?;
        for segment in rest {
            current = current.as_map()?.fields.get(segment)?;
        }
        Some(current)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromIterator<(String, FirestoreValue)> for MapValue {
    fn from_iter<T: IntoIterator<Item = (String, FirestoreValue)>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
