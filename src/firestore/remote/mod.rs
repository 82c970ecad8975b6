//! Listen protocol plumbing: wire codecs, the per-target state machine, stream
//! transports and the reconnecting session driver.

pub mod datastore;
pub mod rpc_error;
pub mod serializer;
pub mod stream;
pub mod streams;
pub(crate) mod structured_query;
pub mod watch;
pub mod watch_change;

pub use datastore::{
    CredentialProvider, CredentialProviderArc, NoopCredentialProvider, StreamHandle,
    StreamingDatastore, StreamingDatastoreImpl, WebSocketDatastore,
};
pub use rpc_error::{classify_stream_error, map_status_payload, RetryDecision};
pub use serializer::JsonProtoSerializer;
pub use stream::{
    InMemoryTransport, MultiplexedConnection, MultiplexedStream, RequestMetadata, StreamTransport,
    TransportFrame, WebSocketTransport,
};
pub use watch::{WatchFailure, WatchOutcome, WatchState};
pub use watch_change::{decode_watch_change, WatchChange};
