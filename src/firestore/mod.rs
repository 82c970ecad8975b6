//! Realtime Firestore queries: a [`Query`] is listened to through [`Firestore::listen`],
//! which yields a stream of consistent [`QuerySnapshot`]s.

pub mod api;
mod constants;
pub mod error;
pub mod model;
pub mod remote;
pub mod value;

pub use api::{
    DocumentChange, DocumentChangeType, FieldFilter, FilterOperator, Firestore, FirestoreBuilder,
    OrderBy, OrderDirection, Query, QuerySnapshot,
};
pub use error::{FirestoreError, FirestoreErrorCode, FirestoreResult};
pub use model::{DatabaseId, Document, DocumentSet, FieldPath, GeoPoint, ResourcePath, Timestamp};
pub use remote::streams::{ListenRegistration, QuerySnapshotStream, SnapshotState};
pub use value::FirestoreValue;
