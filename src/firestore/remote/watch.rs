//! Listen protocol state machine for a single target.
//!
//! [`WatchState`] consumes decoded [`WatchChange`]s one at a time and decides when the
//! buffered changes form a consistent snapshot. It performs no I/O; the stream driver
//! in [`crate::firestore::remote::streams::listen`] feeds it and acts on its verdicts.

use std::collections::BTreeMap;

use crate::firestore::api::{DocumentChange, DocumentChangeType, Query, QuerySnapshot};
use crate::firestore::error::{
    failed_precondition, internal_error, protocol_violation, unknown_error, FirestoreError,
};
use crate::firestore::model::{
    Document, DocumentComparator, DocumentSet, ResourcePath, Timestamp,
};
use crate::firestore::remote::watch_change::{
    ExistenceFilterChange, TargetChangeState, WatchChange, WatchTargetChange,
};

/// What the driver should do after a change was applied.
#[derive(Debug, Default)]
pub struct WatchOutcome {
    /// Snapshot to publish, if the change completed a consistent view.
    pub snapshot: Option<QuerySnapshot>,
    /// The server acknowledged progress on the target; restart the backoff schedule.
    pub reset_backoff: bool,
}

/// Reasons the current stream cannot continue.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchFailure {
    /// The session is over; surface the error to listeners.
    Fatal(FirestoreError),
    /// Local state was reset; reopen the stream and rebuild from scratch.
    Resync(FirestoreError),
}

impl WatchFailure {
    pub fn error(&self) -> &FirestoreError {
        match self {
            WatchFailure::Fatal(error) | WatchFailure::Resync(error) => error,
        }
    }
}

/// Pending change for one document: `Some` upserts, `None` deletes.
type PendingChanges = BTreeMap<ResourcePath, Option<Document>>;

#[derive(Default)]
struct ChangeSet {
    deletes: Vec<Document>,
    adds: Vec<Document>,
    updates: Vec<Document>,
}

pub struct WatchState {
    target_id: i32,
    query: Query,
    comparator: DocumentComparator,
    documents: DocumentSet,
    pending: PendingChanges,
    current: bool,
    resume_token: Option<Vec<u8>>,
    has_pushed: bool,
    last_read_time: Option<Timestamp>,
}

impl WatchState {
    pub fn new(target_id: i32, query: Query) -> Self {
        let comparator = query.comparator();
        Self {
            target_id,
            documents: DocumentSet::new(comparator.clone()),
            comparator,
            query,
            pending: PendingChanges::new(),
            current: false,
            resume_token: None,
            has_pushed: false,
            last_read_time: None,
        }
    }

    pub fn target_id(&self) -> i32 {
        self.target_id
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Token to send with the next `addTarget`, if one was adopted.
    pub fn resume_token(&self) -> Option<&[u8]> {
        self.resume_token.as_deref()
    }

    pub fn is_current(&self) -> bool {
        self.current
    }

    /// Last published result set.
    pub fn documents(&self) -> &DocumentSet {
        &self.documents
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Prepares for a fresh stream: a new stream starts out of date and discards
    /// anything buffered on the previous one. Without a resume token the server
    /// replays the full result set, so every held document is staged for removal
    /// until it is sent again.
    pub fn on_stream_opened(&mut self) {
        self.current = false;
        self.pending.clear();
        if self.resume_token.is_none() {
            for document in self.documents.iter() {
                self.pending.insert(document.path().clone(), None);
            }
        }
    }

    pub fn handle_change(&mut self, change: WatchChange) -> Result<WatchOutcome, WatchFailure> {
        match change {
            WatchChange::TargetChange(change) => self.on_target_change(change),
            WatchChange::DocumentChange(change) => {
                let path = change.document.path().clone();
                if change.updated_target_ids.contains(&self.target_id) {
                    self.pending.insert(path, Some(change.document));
                } else if change.removed_target_ids.contains(&self.target_id) {
                    self.pending.insert(path, None);
                }
                Ok(WatchOutcome::default())
            }
            WatchChange::DocumentDelete(delete) => {
                self.pending.insert(delete.path, None);
                Ok(WatchOutcome::default())
            }
            WatchChange::DocumentRemove(remove) => {
                self.pending.insert(remove.path, None);
                Ok(WatchOutcome::default())
            }
            WatchChange::ExistenceFilter(filter) => self.on_existence_filter(filter),
        }
    }

    fn on_target_change(
        &mut self,
        change: WatchTargetChange,
    ) -> Result<WatchOutcome, WatchFailure> {
        let mut outcome = WatchOutcome::default();

        match change.state {
            TargetChangeState::NoChange => {
                match change.read_time {
                    Some(read_time) if change.target_ids.is_empty() && self.current => {
                        outcome.snapshot =
                            self.push_snapshot(read_time, change.resume_token.clone())?;
                    }
                    _ => {}
                }
            }
            TargetChangeState::Add => {
                if change.target_ids.first() != Some(&self.target_id) {
                    return Err(WatchFailure::Fatal(protocol_violation(format!(
                        "Target ID must be {}, server acknowledged {:?}",
                        self.target_id, change.target_ids
                    ))));
                }
            }
            TargetChangeState::Remove => {
                let cause = change
                    .cause
                    .unwrap_or_else(|| internal_error("Backend ended Listen stream"));
                return Err(WatchFailure::Fatal(cause));
            }
            TargetChangeState::Current => {
                self.current = true;
            }
            TargetChangeState::Reset => {
                self.reset_documents();
            }
        }

        let carries_token = change
            .resume_token
            .as_ref()
            .is_some_and(|token| !token.is_empty());
        if carries_token && change.affects(self.target_id) {
            outcome.reset_backoff = true;
        }

        Ok(outcome)
    }

    fn on_existence_filter(
        &mut self,
        filter: ExistenceFilterChange,
    ) -> Result<WatchOutcome, WatchFailure> {
        let expected = self.current_size();
        if i64::from(filter.count) != expected {
            log::warn!(
                "existence filter mismatch for target {}: server counts {}, client expects {}",
                filter.target_id,
                filter.count,
                expected
            );
            self.reset_documents();
            return Err(WatchFailure::Resync(unknown_error(format!(
                "Existence filter mismatch: expected {expected} documents, server reported {}",
                filter.count
            ))));
        }
        Ok(WatchOutcome::default())
    }

    /// Forgets the resume token and schedules every held document for removal; the
    /// server re-sends what still matches.
    fn reset_documents(&mut self) {
        self.pending.clear();
        self.resume_token = None;
        for document in self.documents.iter() {
            self.pending.insert(document.path().clone(), None);
        }
        self.current = false;
    }

    fn current_size(&self) -> i64 {
        let changes = self.extract_changes();
        self.documents.len() as i64 + changes.adds.len() as i64 - changes.deletes.len() as i64
    }

    fn push_snapshot(
        &mut self,
        read_time: Timestamp,
        next_resume_token: Option<Vec<u8>>,
    ) -> Result<Option<QuerySnapshot>, WatchFailure> {
        let (documents, changes) = self.compute_snapshot(read_time)?;

        let mut snapshot = None;
        if !self.has_pushed || !changes.is_empty() {
            if let Some(last) = self.last_read_time {
                if read_time <= last {
                    return Err(WatchFailure::Fatal(protocol_violation(format!(
                        "Snapshot read time {read_time} does not advance past {last}"
                    ))));
                }
            }
            self.documents = documents.clone();
            self.has_pushed = true;
            self.last_read_time = Some(read_time);
            snapshot = Some(QuerySnapshot::new(
                self.query.clone(),
                documents,
                changes,
                read_time,
            ));
        }

        self.pending.clear();
        if let Some(token) = next_resume_token.filter(|token| !token.is_empty()) {
            self.resume_token = Some(token);
        }
        Ok(snapshot)
    }

    /// Applies the buffered changes to the held set, removals first, then additions,
    /// then modifications, each group in query order.
    fn compute_snapshot(
        &self,
        read_time: Timestamp,
    ) -> Result<(DocumentSet, Vec<DocumentChange>), WatchFailure> {
        let ChangeSet {
            mut deletes,
            mut adds,
            mut updates,
        } = self.extract_changes();

        for document in adds.iter().chain(updates.iter()) {
            if let Some(field) = self.query.missing_order_field(document) {
                return Err(WatchFailure::Fatal(failed_precondition(format!(
                    "Document {} has no value for order-by field '{field}'",
                    document.path()
                ))));
            }
        }

        deletes.sort_by(|left, right| (self.comparator)(left, right));
        adds.sort_by(|left, right| (self.comparator)(left, right));
        updates.sort_by(|left, right| (self.comparator)(left, right));

        // One copy of the held set per snapshot; later edits land in place.
        let mut documents = self.documents.clone();
        let mut changes = Vec::new();

        for old in deletes {
            let old_index = documents.index_of(old.path());
            documents.delete(old.path());
            changes.push(DocumentChange::new(
                DocumentChangeType::Removed,
                old,
                old_index,
                None,
            ));
        }

        for added in adds {
            let added = added.with_read_time(read_time);
            documents.insert(added.clone());
            let new_index = documents.index_of(added.path());
            changes.push(DocumentChange::new(
                DocumentChangeType::Added,
                added,
                None,
                new_index,
            ));
        }

        for updated in updates {
            let Some(old) = documents.get(updated.path()) else {
                continue;
            };
            if is_same_version(old, &updated) {
                continue;
            }
            let updated = updated.with_read_time(read_time);
            let old_index = documents.index_of(updated.path());
            documents.insert(updated.clone());
            let new_index = documents.index_of(updated.path());
            changes.push(DocumentChange::new(
                DocumentChangeType::Modified,
                updated,
                old_index,
                new_index,
            ));
        }

        Ok((documents, changes))
    }

    fn extract_changes(&self) -> ChangeSet {
        let mut changes = ChangeSet::default();
        for (path, pending) in &self.pending {
            match (pending, self.documents.get(path)) {
                (None, Some(held)) => changes.deletes.push(held.clone()),
                (None, None) => {}
                (Some(document), Some(_)) => changes.updates.push(document.clone()),
                (Some(document), None) => changes.adds.push(document.clone()),
            }
        }
        changes
    }
}

fn is_same_version(old: &Document, new: &Document) -> bool {
    match (old.update_time(), new.update_time()) {
        (Some(old_time), Some(new_time)) => old_time == new_time,
        _ => old.fields() == new.fields(),
    }
}
