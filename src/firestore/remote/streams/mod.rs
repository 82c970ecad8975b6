pub mod listen;

pub use listen::{ListenRegistration, ListenSession, QuerySnapshotStream, SnapshotState};
