use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::firestore::error::FirestoreResult;
use crate::firestore::remote::stream::RequestMetadata;

pub mod streaming;

pub use streaming::{StreamingDatastoreImpl, WebSocketDatastore};

pub type StreamingFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A single bidirectional listen stream carrying JSON-encoded messages.
pub trait StreamHandle: Send + Sync {
    fn send(&self, payload: Vec<u8>) -> StreamingFuture<'_, FirestoreResult<()>>;

    /// Next server message; `None` once the server ended the stream.
    fn next(&self) -> StreamingFuture<'_, Option<FirestoreResult<Vec<u8>>>>;

    fn close(&self) -> StreamingFuture<'_, FirestoreResult<()>>;
}

/// Opens listen streams against a backend.
pub trait StreamingDatastore: Send + Sync + 'static {
    fn open_listen_stream(
        &self,
        metadata: RequestMetadata,
    ) -> StreamingFuture<'_, FirestoreResult<Arc<dyn StreamHandle>>>;
}

/// Supplies bearer tokens for listen requests.
#[async_trait]
pub trait CredentialProvider: Send + Sync + 'static {
    /// Token for the next stream attempt, `None` for unauthenticated access.
    async fn current_token(&self) -> FirestoreResult<Option<String>>;

    /// Marks the cached token stale; the next call to `current_token` must refresh.
    fn invalidate_token(&self);
}

#[derive(Default, Clone, Debug)]
pub struct NoopCredentialProvider;

#[async_trait]
impl CredentialProvider for NoopCredentialProvider {
    async fn current_token(&self) -> FirestoreResult<Option<String>> {
        Ok(None)
    }

    fn invalidate_token(&self) {}
}

pub type CredentialProviderArc = Arc<dyn CredentialProvider>;
