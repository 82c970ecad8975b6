mod database_id;
mod document;
mod document_set;
mod field_path;
mod geo_point;
mod resource_path;
mod timestamp;

pub use database_id::DatabaseId;
pub use document::Document;
pub use document_set::{DocumentComparator, DocumentSet};
pub use field_path::{FieldPath, IntoFieldPath};
pub use geo_point::GeoPoint;
pub use resource_path::ResourcePath;
pub use timestamp::Timestamp;
