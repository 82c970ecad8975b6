use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_channel::{Receiver, Sender};
use async_trait::async_trait;

use crate::firestore::error::{internal_error, unavailable, FirestoreError, FirestoreResult};
use crate::platform::runtime;

pub mod websocket;

pub use websocket::WebSocketTransport;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StreamId(u32);

impl StreamId {
    fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

/// Headers sent when a stream is opened (`authorization`, routing parameters).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestMetadata {
    entries: BTreeMap<String, String>,
}

impl RequestMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into().to_ascii_lowercase(), value.into());
    }

    /// Case-insensitive lookup.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, String)> for RequestMetadata {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut metadata = Self::new();
        for (key, value) in iter {
            metadata.insert(key, value);
        }
        metadata
    }
}

#[derive(Clone, Debug)]
pub enum FrameKind {
    Open(RequestMetadata),
    Data(Vec<u8>),
    Close,
    Error(FirestoreError),
}

#[derive(Clone, Debug)]
pub struct TransportFrame {
    stream_id: StreamId,
    kind: FrameKind,
}

impl TransportFrame {
    pub fn open(stream_id: StreamId, metadata: RequestMetadata) -> Self {
        Self {
            stream_id,
            kind: FrameKind::Open(metadata),
        }
    }

    pub fn data(stream_id: StreamId, payload: Vec<u8>) -> Self {
        Self {
            stream_id,
            kind: FrameKind::Data(payload),
        }
    }

    pub fn close(stream_id: StreamId) -> Self {
        Self {
            stream_id,
            kind: FrameKind::Close,
        }
    }

    pub fn error(stream_id: StreamId, error: FirestoreError) -> Self {
        Self {
            stream_id,
            kind: FrameKind::Error(error),
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn kind(&self) -> &FrameKind {
        &self.kind
    }

    pub fn into_kind(self) -> FrameKind {
        self.kind
    }
}

/// Bidirectional frame pipe that carries any number of logical streams.
#[async_trait]
pub trait StreamTransport: Send + Sync + 'static {
    async fn send(&self, frame: TransportFrame) -> FirestoreResult<()>;
    async fn next(&self) -> FirestoreResult<TransportFrame>;
}

type StreamRegistry = Arc<Mutex<HashMap<StreamId, Sender<FrameKind>>>>;

fn lock_registry(streams: &StreamRegistry) -> MutexGuard<'_, HashMap<StreamId, Sender<FrameKind>>> {
    streams.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Multiplexes logical streams over one [`StreamTransport`].
///
/// Inbound frames are routed by stream id to the stream that opened them. When the
/// transport fails every open stream receives an `Unavailable` error.
pub struct MultiplexedConnection {
    next_stream_id: AtomicU32,
    outbound_tx: Sender<TransportFrame>,
    streams: StreamRegistry,
}

impl MultiplexedConnection {
    pub fn new(transport: Arc<dyn StreamTransport>) -> Self {
        let (outbound_tx, outbound_rx) = async_channel::unbounded();
        let streams: StreamRegistry = Arc::new(Mutex::new(HashMap::new()));
        let manager = Self {
            next_stream_id: AtomicU32::new(1),
            outbound_tx,
            streams: Arc::clone(&streams),
        };

        Self::start_outbound_loop(Arc::clone(&transport), outbound_rx);
        Self::start_inbound_loop(transport, streams);
        manager
    }

    fn start_outbound_loop(transport: Arc<dyn StreamTransport>, outbound_rx: Receiver<TransportFrame>) {
        runtime::spawn_detached(async move {
            while let Ok(frame) = outbound_rx.recv().await {
                if let Err(err) = transport.send(frame).await {
                    log::warn!("multiplexed outbound loop terminated: {err}");
                    break;
                }
            }
        });
    }

    fn start_inbound_loop(transport: Arc<dyn StreamTransport>, streams: StreamRegistry) {
        runtime::spawn_detached(async move {
            loop {
                let frame = match transport.next().await {
                    Ok(frame) => frame,
                    Err(err) => {
                        log::warn!("multiplexed inbound loop terminated: {err}");
                        let orphaned: Vec<_> = lock_registry(&streams).drain().collect();
                        for (_, sender) in orphaned {
                            let _ = sender
                                .send(FrameKind::Error(unavailable(format!(
                                    "connection lost: {}",
                                    err.message()
                                ))))
                                .await;
                        }
                        break;
                    }
                };

                let stream_id = frame.stream_id();
                let event = frame.into_kind();
                let maybe_sender = lock_registry(&streams).get(&stream_id).cloned();
                let Some(sender) = maybe_sender else {
                    log::debug!("dropping frame for unknown stream {}", stream_id.value());
                    continue;
                };

                if matches!(event, FrameKind::Close | FrameKind::Error(_)) {
                    let _ = sender.send(event).await;
                    lock_registry(&streams).remove(&stream_id);
                } else if let Err(err) = sender.send(event).await {
                    log::debug!(
                        "dropping inbound frame for closed stream {}: {err}",
                        stream_id.value()
                    );
                }
            }
        });
    }

    pub async fn open_stream(&self, metadata: RequestMetadata) -> FirestoreResult<MultiplexedStream> {
        let stream_id = StreamId::new(self.next_stream_id.fetch_add(1, Ordering::SeqCst));
        let (inbound_tx, inbound_rx) = async_channel::unbounded();
        lock_registry(&self.streams).insert(stream_id, inbound_tx);
        self.outbound_tx
            .send(TransportFrame::open(stream_id, metadata))
            .await
            .map_err(|err| unavailable(format!("failed to queue open frame: {err}")))?;
        Ok(MultiplexedStream {
            id: stream_id,
            outbound: self.outbound_tx.clone(),
            inbound: inbound_rx,
            streams: Arc::clone(&self.streams),
        })
    }

    pub fn open_stream_count(&self) -> usize {
        lock_registry(&self.streams).len()
    }
}

/// One logical stream. Dropping it sends a close frame to the peer.
pub struct MultiplexedStream {
    id: StreamId,
    outbound: Sender<TransportFrame>,
    inbound: Receiver<FrameKind>,
    streams: StreamRegistry,
}

impl MultiplexedStream {
    pub fn id(&self) -> StreamId {
        self.id
    }

    pub async fn send(&self, payload: Vec<u8>) -> FirestoreResult<()> {
        self.outbound
            .send(TransportFrame::data(self.id, payload))
            .await
            .map_err(|err| unavailable(format!("failed to enqueue stream frame: {err}")))
    }

    /// Next payload; `None` once the peer closed the stream.
    pub async fn next(&self) -> Option<FirestoreResult<Vec<u8>>> {
        while let Ok(event) = self.inbound.recv().await {
            match event {
                FrameKind::Data(payload) => return Some(Ok(payload)),
                FrameKind::Close => return None,
                FrameKind::Error(err) => return Some(Err(err)),
                FrameKind::Open(_) => continue,
            }
        }
        None
    }

    pub async fn close(&self) -> FirestoreResult<()> {
        lock_registry(&self.streams).remove(&self.id);
        self.outbound
            .send(TransportFrame::close(self.id))
            .await
            .map_err(|err| internal_error(format!("failed to enqueue close frame: {err}")))
    }
}

impl Drop for MultiplexedStream {
    fn drop(&mut self) {
        let registered = lock_registry(&self.streams).remove(&self.id).is_some();
        if registered {
            let _ = self.outbound.try_send(TransportFrame::close(self.id));
        }
    }
}

/// Loopback transport: frames sent on one half arrive on the other.
pub struct InMemoryTransport {
    inbound: Receiver<TransportFrame>,
    outbound: Sender<TransportFrame>,
}

impl InMemoryTransport {
    pub fn pair() -> (Arc<Self>, Arc<Self>) {
        let (left_tx, left_rx) = async_channel::unbounded();
        let (right_tx, right_rx) = async_channel::unbounded();

        let left = Arc::new(Self {
            inbound: left_rx,
            outbound: right_tx,
        });
        let right = Arc::new(Self {
            inbound: right_rx,
            outbound: left_tx,
        });
        (left, right)
    }
}

#[async_trait]
impl StreamTransport for InMemoryTransport {
    async fn send(&self, frame: TransportFrame) -> FirestoreResult<()> {
        self.outbound
            .send(frame)
            .await
            .map_err(|err| unavailable(format!("loopback transport send failed: {err}")))
    }

    async fn next(&self) -> FirestoreResult<TransportFrame> {
        self.inbound
            .recv()
            .await
            .map_err(|err| unavailable(format!("loopback transport recv failed: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_frame_carries_metadata() {
        let (client_transport, server) = InMemoryTransport::pair();
        let client = MultiplexedConnection::new(client_transport);

        let metadata = RequestMetadata::new().with("Authorization", "Bearer abc");
        let stream = client.open_stream(metadata).await.expect("open stream");

        let frame = server.next().await.expect("open frame");
        assert_eq!(frame.stream_id(), stream.id());
        match frame.kind() {
            FrameKind::Open(metadata) => {
                assert_eq!(metadata.get("authorization"), Some("Bearer abc"));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn routes_payloads_by_stream_id() {
        let (client_transport, server) = InMemoryTransport::pair();
        let client = MultiplexedConnection::new(client_transport);
        let first = client.open_stream(RequestMetadata::new()).await.unwrap();
        let second = client.open_stream(RequestMetadata::new()).await.unwrap();

        server
            .send(TransportFrame::data(second.id(), b"two".to_vec()))
            .await
            .unwrap();
        server
            .send(TransportFrame::data(first.id(), b"one".to_vec()))
            .await
            .unwrap();

        assert_eq!(first.next().await.unwrap().unwrap(), b"one");
        assert_eq!(second.next().await.unwrap().unwrap(), b"two");

        first.send(b"ping".to_vec()).await.unwrap();
        loop {
            let frame = server.next().await.unwrap();
            if let FrameKind::Data(payload) = frame.kind() {
                assert_eq!(frame.stream_id(), first.id());
                assert_eq!(payload, b"ping");
                break;
            }
        }
    }

    #[tokio::test]
    async fn close_and_error_frames_end_the_stream() {
        let (client_transport, server) = InMemoryTransport::pair();
        let client = MultiplexedConnection::new(client_transport);
        let closed = client.open_stream(RequestMetadata::new()).await.unwrap();
        let failed = client.open_stream(RequestMetadata::new()).await.unwrap();

        server.send(TransportFrame::close(closed.id())).await.unwrap();
        server
            .send(TransportFrame::error(failed.id(), unavailable("backend restarting")))
            .await
            .unwrap();

        assert!(closed.next().await.is_none());
        let err = failed.next().await.unwrap().unwrap_err();
        assert_eq!(err.message(), "backend restarting");
    }

    #[tokio::test]
    async fn dropping_a_stream_notifies_the_peer() {
        let (client_transport, server) = InMemoryTransport::pair();
        let client = MultiplexedConnection::new(client_transport);
        let stream = client.open_stream(RequestMetadata::new()).await.unwrap();
        let id = stream.id();
        drop(stream);
        assert_eq!(client.open_stream_count(), 0);

        let mut saw_close = false;
        for _ in 0..2 {
            let frame = server.next().await.unwrap();
            if matches!(frame.kind(), FrameKind::Close) {
                assert_eq!(frame.stream_id(), id);
                saw_close = true;
            }
        }
        assert!(saw_close);
    }

    #[tokio::test]
    async fn transport_loss_fails_open_streams() {
        let (client_transport, server) = InMemoryTransport::pair();
        let client = MultiplexedConnection::new(client_transport);
        let stream = client.open_stream(RequestMetadata::new()).await.unwrap();
        drop(server);

        let err = stream.next().await.unwrap().unwrap_err();
        assert!(err.is_retryable());
    }
}
