use crate::firestore::model::{Document, DocumentSet, Timestamp};

use super::query::Query;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentChangeType {
    Added,
    Modified,
    Removed,
}

/// One entry of a snapshot's change log.
///
/// `old_index` is the position in the previous snapshot (absent for additions) and
/// `new_index` the position in this one (absent for removals). Applying the changes
/// in order to the previous result reproduces this snapshot's documents.
#[derive(Clone, Debug, PartialEq)]
pub struct DocumentChange {
    change_type: DocumentChangeType,
    document: Document,
    old_index: Option<usize>,
    new_index: Option<usize>,
}

impl DocumentChange {
    pub(crate) fn new(
        change_type: DocumentChangeType,
        document: Document,
        old_index: Option<usize>,
        new_index: Option<usize>,
    ) -> Self {
        Self {
            change_type,
            document,
            old_index,
            new_index,
        }
    }

    pub fn change_type(&self) -> DocumentChangeType {
        self.change_type
    }

    /// The document after the change; for removals, the last version held.
    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn old_index(&self) -> Option<usize> {
        self.old_index
    }

    pub fn new_index(&self) -> Option<usize> {
        self.new_index
    }
}

/// A consistent view of a query's results at `read_time`, plus the changes since the
/// previous snapshot of the same listener.
#[derive(Clone, Debug)]
pub struct QuerySnapshot {
    query: Query,
    documents: DocumentSet,
    changes: Vec<DocumentChange>,
    read_time: Timestamp,
}

impl QuerySnapshot {
    pub(crate) fn new(
        query: Query,
        documents: DocumentSet,
        changes: Vec<DocumentChange>,
        read_time: Timestamp,
    ) -> Self {
        Self {
            query,
            documents,
            changes,
            read_time,
        }
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Results in query order.
    pub fn documents(&self) -> &DocumentSet {
        &self.documents
    }

    pub fn changes(&self) -> &[DocumentChange] {
        &self.changes
    }

    pub fn read_time(&self) -> Timestamp {
        self.read_time
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Document> + '_ {
        self.documents.iter()
    }
}
