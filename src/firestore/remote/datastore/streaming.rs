use std::sync::Arc;

use futures::FutureExt;
use url::Url;

use super::{StreamHandle, StreamingDatastore, StreamingFuture};
use crate::firestore::error::{invalid_argument, FirestoreResult};
use crate::firestore::remote::stream::{
    MultiplexedConnection, MultiplexedStream, RequestMetadata, WebSocketTransport,
};

const LISTEN_CHANNEL_PATH: &str = "google.firestore.v1.Firestore/Listen/channel";

pub(crate) fn box_stream_future<'a, F, T>(future: F) -> StreamingFuture<'a, T>
where
    F: std::future::Future<Output = T> + Send + 'a,
{
    future.boxed()
}

/// Opens every listen stream on one shared [`MultiplexedConnection`].
pub struct StreamingDatastoreImpl {
    connection: Arc<MultiplexedConnection>,
}

impl StreamingDatastoreImpl {
    pub fn new(connection: Arc<MultiplexedConnection>) -> Self {
        Self { connection }
    }
}

impl StreamingDatastore for StreamingDatastoreImpl {
    fn open_listen_stream(
        &self,
        metadata: RequestMetadata,
    ) -> StreamingFuture<'_, FirestoreResult<Arc<dyn StreamHandle>>> {
        let connection = Arc::clone(&self.connection);
        box_stream_future(async move {
            let stream = connection.open_stream(metadata).await?;
            Ok(Arc::new(StreamingHandleImpl::new(stream)) as Arc<dyn StreamHandle>)
        })
    }
}

/// Dials a fresh WebSocket for every listen stream, so a reconnect never reuses a
/// socket the previous attempt saw fail.
#[derive(Clone, Debug)]
pub struct WebSocketDatastore {
    endpoint: Url,
}

impl WebSocketDatastore {
    pub fn new(endpoint: Url) -> Self {
        Self { endpoint }
    }

    /// Listen channel on `host`; `ssl` selects `wss://` over `ws://`.
    pub fn for_host(host: &str, ssl: bool) -> FirestoreResult<Self> {
        let scheme = if ssl { "wss" } else { "ws" };
        let endpoint = Url::parse(&format!("{scheme}://{host}/{LISTEN_CHANNEL_PATH}"))
            .map_err(|err| invalid_argument(format!("invalid listen host '{host}': {err}")))?;
        Ok(Self::new(endpoint))
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl StreamingDatastore for WebSocketDatastore {
    fn open_listen_stream(
        &self,
        metadata: RequestMetadata,
    ) -> StreamingFuture<'_, FirestoreResult<Arc<dyn StreamHandle>>> {
        let endpoint = self.endpoint.clone();
        box_stream_future(async move {
            log::debug!("dialing listen channel {endpoint}");
            let transport = WebSocketTransport::connect(&endpoint).await?;
            let connection = MultiplexedConnection::new(transport);
            let stream = connection.open_stream(metadata).await?;
            Ok(Arc::new(StreamingHandleImpl::new(stream)) as Arc<dyn StreamHandle>)
        })
    }
}

pub struct StreamingHandleImpl {
    stream: MultiplexedStream,
}

impl StreamingHandleImpl {
    fn new(stream: MultiplexedStream) -> Self {
        Self { stream }
    }
}

impl StreamHandle for StreamingHandleImpl {
    fn send(&self, payload: Vec<u8>) -> StreamingFuture<'_, FirestoreResult<()>> {
        let stream = &self.stream;
        box_stream_future(async move { stream.send(payload).await })
    }

    fn next(&self) -> StreamingFuture<'_, Option<FirestoreResult<Vec<u8>>>> {
        let stream = &self.stream;
        box_stream_future(async move { stream.next().await })
    }

    fn close(&self) -> StreamingFuture<'_, FirestoreResult<()>> {
        let stream = &self.stream;
        box_stream_future(async move { stream.close().await })
    }
}
