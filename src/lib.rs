//! Realtime Firestore listen client.
//!
//! A [`firestore::Query`] is subscribed to with [`firestore::Firestore::listen`]. The
//! returned [`firestore::ListenRegistration`] publishes consistent, ordered
//! [`firestore::QuerySnapshot`]s, each carrying the full result set and the change log
//! since the previous snapshot. Dropped streams are resumed transparently with
//! jittered exponential backoff.
//!
//! ```no_run
//! use firestore_realtime::app::{initialize_app, FirebaseOptions};
//! use firestore_realtime::firestore::{Firestore, OrderDirection};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let app = initialize_app(
//!     FirebaseOptions {
//!         project_id: Some("demo-project".into()),
//!         ..Default::default()
//!     },
//!     None,
//! )?;
//! let firestore = Firestore::builder(app)
//!     .emulator_host("localhost:8080")
//!     .build()?;
//! let query = firestore
//!     .collection("rooms")?
//!     .order_by("name", OrderDirection::Ascending)?;
//!
//! let registration = firestore.listen(&query);
//! let mut snapshots = registration.snapshots();
//! while let Some(snapshot) = snapshots.next().await {
//!     let snapshot = snapshot?;
//!     for change in snapshot.changes() {
//!         println!("{:?} {}", change.change_type(), change.document().path().canonical_string());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod app;
pub mod auth;
pub mod firestore;
pub mod platform;
pub mod util;
