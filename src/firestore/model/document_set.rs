use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::firestore::model::{Document, ResourcePath};

/// Total order over documents used to keep a [`DocumentSet`] sorted.
///
/// Must be consistent with identity: two distinct paths never compare equal.
pub type DocumentComparator = Arc<dyn Fn(&Document, &Document) -> Ordering + Send + Sync>;

/// Persistent, keyed and sorted collection of documents.
///
/// Every operation that changes membership returns a new set; the receiver and all
/// previously returned sets stay valid and unchanged.
#[derive(Clone)]
pub struct DocumentSet {
    comparator: DocumentComparator,
    inner: Arc<DocumentSetInner>,
}

#[derive(Clone, Default)]
struct DocumentSetInner {
    by_path: BTreeMap<ResourcePath, Arc<Document>>,
    sorted: Vec<Arc<Document>>,
}

impl DocumentSet {
    pub fn new(comparator: DocumentComparator) -> Self {
        Self {
            comparator,
            inner: Arc::new(DocumentSetInner::default()),
        }
    }

    /// An empty set ordered by document path only.
    pub fn by_path() -> Self {
        Self::new(Arc::new(|left: &Document, right: &Document| {
            left.path().cmp(right.path())
        }))
    }

    pub fn comparator(&self) -> &DocumentComparator {
        &self.comparator
    }

    pub fn len(&self) -> usize {
        self.inner.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.by_path.is_empty()
    }

    pub fn contains(&self, path: &ResourcePath) -> bool {
        self.inner.by_path.contains_key(path)
    }

    pub fn get(&self, path: &ResourcePath) -> Option<&Document> {
        self.inner.by_path.get(path).map(Arc::as_ref)
    }

    /// Position of `path` in sort order, `None` when absent.
    pub fn index_of(&self, path: &ResourcePath) -> Option<usize> {
        let document = self.inner.by_path.get(path)?;
        self.position(document)
    }

    /// Returns a set containing `document`, replacing any entry with the same path.
    pub fn add(&self, document: Document) -> Self {
        let mut next = self.clone();
        next.insert(document);
        next
    }

    /// Returns a set without `path`; returns an equivalent set when it is absent.
    pub fn remove(&self, path: &ResourcePath) -> Self {
        let mut next = self.clone();
        next.delete(path);
        next
    }

    /// In-place form of [`DocumentSet::add`].
    ///
    /// Storage shared with other handles is copied on the first write only, so a run
    /// of edits on one handle costs a single copy. Other handles never observe it.
    pub fn insert(&mut self, document: Document) {
        let comparator = Arc::clone(&self.comparator);
        let inner = Arc::make_mut(&mut self.inner);
        if let Some(previous) = inner.by_path.get(document.path()) {
            if let Some(index) = inner.position(&comparator, previous) {
                inner.sorted.remove(index);
            }
        }

        let document = Arc::new(document);
        let insert_at = inner
            .sorted
            .partition_point(|probe| comparator(&**probe, &*document).is_lt());
        inner.sorted.insert(insert_at, Arc::clone(&document));
        inner.by_path.insert(document.path().clone(), document);
    }

    /// In-place form of [`DocumentSet::remove`]. Returns whether `path` was present.
    pub fn delete(&mut self, path: &ResourcePath) -> bool {
        if !self.inner.by_path.contains_key(path) {
            return false;
        }
        let comparator = Arc::clone(&self.comparator);
        let inner = Arc::make_mut(&mut self.inner);
        if let Some(existing) = inner.by_path.remove(path) {
            if let Some(index) = inner.position(&comparator, &existing) {
                inner.sorted.remove(index);
            }
        }
        true
    }

    /// Documents in sort order.
    pub fn iter(&self) -> impl Iterator<Item = &Document> + '_ {
        self.inner.sorted.iter().map(Arc::as_ref)
    }

    pub fn first(&self) -> Option<&Document> {
        self.inner.sorted.first().map(Arc::as_ref)
    }

    pub fn last(&self) -> Option<&Document> {
        self.inner.sorted.last().map(Arc::as_ref)
    }

    pub fn to_vec(&self) -> Vec<Document> {
        self.iter().cloned().collect()
    }

    fn position(&self, document: &Document) -> Option<usize> {
        self.inner.position(&self.comparator, document)
    }
}

impl DocumentSetInner {
    fn position(&self, comparator: &DocumentComparator, document: &Document) -> Option<usize> {
        self.sorted
            .binary_search_by(|probe| comparator(&**probe, document))
            .ok()
    }
}

impl fmt::Debug for DocumentSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.inner.sorted.iter().map(|doc| doc.path()))
            .finish()
    }
}

/// Two sets are equal when they hold the same documents in the same order.
impl PartialEq for DocumentSet {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other.iter()).all(|(l, r)| l == r)
    }
}

impl<'a> IntoIterator for &'a DocumentSet {
    type Item = &'a Document;
    type IntoIter = Box<dyn Iterator<Item = &'a Document> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}
