mod database;
pub(crate) mod query;
mod snapshot;

pub use database::{Firestore, FirestoreBuilder};
pub use query::{FieldFilter, FilterOperator, OrderBy, OrderDirection, Query};
pub use snapshot::{DocumentChange, DocumentChangeType, QuerySnapshot};
