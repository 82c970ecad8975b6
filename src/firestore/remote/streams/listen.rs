//! Drives one listen target over a [`StreamingDatastore`]: opens the stream, feeds
//! every response through [`WatchState`], publishes snapshots and reconnects with
//! backoff when the stream fails with a retryable status.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use futures::Stream;
use percent_encoding::{percent_encode, NON_ALPHANUMERIC};
use serde_json::{json, Value as JsonValue};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::firestore::api::{Query, QuerySnapshot};
use crate::firestore::error::{
    cancelled, deadline_exceeded, protocol_violation, unknown_error, FirestoreError,
    FirestoreResult,
};
use crate::firestore::remote::datastore::{CredentialProviderArc, StreamHandle, StreamingDatastore};
use crate::firestore::remote::rpc_error::{classify_stream_error, RetryDecision};
use crate::firestore::remote::serializer::JsonProtoSerializer;
use crate::firestore::remote::stream::RequestMetadata;
use crate::firestore::remote::structured_query::encode_query_target;
use crate::firestore::remote::watch::{WatchFailure, WatchState};
use crate::firestore::remote::watch_change::decode_watch_change;
use crate::platform::runtime;
use crate::util::backoff::{BackoffSettings, ExponentialBackoff};

/// Latest published state of a listen session.
#[derive(Clone, Debug)]
pub enum SnapshotState {
    /// No consistent snapshot has been produced yet.
    Pending,
    Snapshot(QuerySnapshot),
    /// The session ended with a non-retryable error.
    Failed(FirestoreError),
}

/// Why a single stream attempt ended.
enum AttemptEnd {
    Cancelled,
    Fatal(FirestoreError),
    Retry(FirestoreError),
}

pub struct ListenSession {
    serializer: JsonProtoSerializer,
    datastore: Arc<dyn StreamingDatastore>,
    credentials: CredentialProviderArc,
    state: WatchState,
    backoff: ExponentialBackoff,
    attempt_timeout: Duration,
    publisher: watch::Sender<SnapshotState>,
    cancel: CancellationToken,
}

impl ListenSession {
    pub fn new(
        serializer: JsonProtoSerializer,
        datastore: Arc<dyn StreamingDatastore>,
        credentials: CredentialProviderArc,
        target_id: i32,
        query: Query,
        backoff: BackoffSettings,
    ) -> (Self, ListenRegistration) {
        let (publisher, receiver) = watch::channel(SnapshotState::Pending);
        let cancel = CancellationToken::new();
        let session = Self {
            serializer,
            datastore,
            credentials,
            state: WatchState::new(target_id, query),
            backoff: ExponentialBackoff::new(backoff),
            attempt_timeout: backoff.attempt_timeout,
            publisher,
            cancel: cancel.clone(),
        };
        let registration = ListenRegistration { cancel, receiver };
        (session, registration)
    }

    /// Starts the session on the ambient runtime and hands back its registration.
    pub fn spawn(
        serializer: JsonProtoSerializer,
        datastore: Arc<dyn StreamingDatastore>,
        credentials: CredentialProviderArc,
        target_id: i32,
        query: Query,
        backoff: BackoffSettings,
    ) -> ListenRegistration {
        let (session, registration) =
            Self::new(serializer, datastore, credentials, target_id, query, backoff);
        runtime::spawn_detached(session.run());
        registration
    }

    /// Runs until cancellation or a non-retryable failure.
    pub async fn run(mut self) {
        let mut first_attempt = true;
        loop {
            if !first_attempt {
                let delay = self.backoff.next_delay();
                log::debug!(
                    "reopening listen stream for target {} in {:?}",
                    self.state.target_id(),
                    delay
                );
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break,
                    _ = runtime::sleep(delay) => {}
                }
            }
            first_attempt = false;

            let error = match self.run_attempt().await {
                AttemptEnd::Cancelled => break,
                AttemptEnd::Fatal(error) => {
                    self.fail(error);
                    break;
                }
                AttemptEnd::Retry(error) => error,
            };

            if let Err(error) = self.prepare_retry(error) {
                self.fail(error);
                break;
            }
        }
        log::debug!("listen session for target {} stopped", self.state.target_id());
    }

    /// Applies the retry policy for a failed attempt. Hands the error back when it
    /// ends the session.
    fn prepare_retry(&mut self, error: FirestoreError) -> Result<(), FirestoreError> {
        let RetryDecision::Retry {
            advance_backoff,
            invalidate_credentials,
        } = classify_stream_error(&error)
        else {
            return Err(error);
        };

        log::warn!(
            "listen stream for target {} failed, retrying: {error}",
            self.state.target_id()
        );
        if invalidate_credentials {
            log::debug!("invalidating credentials after {}", error.code_str());
            self.credentials.invalidate_token();
        }
        if advance_backoff {
            self.backoff.advance();
        }
        Ok(())
    }

    fn fail(&self, error: FirestoreError) {
        log::warn!(
            "listen session for target {} terminated: {error}",
            self.state.target_id()
        );
        self.publisher.send_replace(SnapshotState::Failed(error));
    }

    async fn run_attempt(&mut self) -> AttemptEnd {
        self.state.on_stream_opened();
        let attempt_timeout = self.attempt_timeout;
        let open = tokio::time::timeout(attempt_timeout, self.open_stream());
        let opened = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return AttemptEnd::Cancelled,
            opened = open => opened,
        };
        let (handle, mut next) = match opened {
            Ok(Ok(opened)) => opened,
            Ok(Err(error)) => return AttemptEnd::Retry(error),
            Err(_) => {
                return AttemptEnd::Retry(deadline_exceeded(format!(
                    "listen stream did not respond within {attempt_timeout:?}"
                )))
            }
        };

        let end = loop {
            let payload = match next {
                Some(Ok(payload)) => payload,
                Some(Err(error)) => break AttemptEnd::Retry(error),
                None => break AttemptEnd::Retry(unknown_error("listen stream ended by server")),
            };
            if let Err(end) = self.apply_response(&payload) {
                break end;
            }
            next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break AttemptEnd::Cancelled,
                next = handle.next() => next,
            };
        };

        if let Err(err) = handle.close().await {
            log::debug!("closing listen stream failed: {err}");
        }
        end
    }

    /// Opens a stream, registers the target and waits for the first response.
    async fn open_stream(
        &self,
    ) -> FirestoreResult<(Arc<dyn StreamHandle>, Option<FirestoreResult<Vec<u8>>>)> {
        let metadata = self.request_metadata().await?;
        let handle = self.datastore.open_listen_stream(metadata).await?;
        log::debug!(
            "opened listen stream for target {} (resuming: {})",
            self.state.target_id(),
            self.state.resume_token().is_some()
        );
        let request = serde_json::to_vec(&self.listen_request()).map_err(|err| {
            protocol_violation(format!("failed to encode listen request: {err}"))
        })?;
        handle.send(request).await?;
        let first = handle.next().await;
        Ok((handle, first))
    }

    async fn request_metadata(&self) -> FirestoreResult<RequestMetadata> {
        let database = self.serializer.database_name();
        let mut metadata = RequestMetadata::new()
            .with(
                "x-goog-request-params",
                format!(
                    "database={}",
                    percent_encode(database.as_bytes(), NON_ALPHANUMERIC)
                ),
            )
            .with("google-cloud-resource-prefix", database);
        if let Some(token) = self.credentials.current_token().await? {
            metadata.insert("authorization", format!("Bearer {token}"));
        }
        Ok(metadata)
    }

    fn listen_request(&self) -> JsonValue {
        let mut target = json!({
            "targetId": self.state.target_id(),
            "query": encode_query_target(&self.serializer, self.state.query()),
        });
        if let Some(token) = self.state.resume_token() {
            target["resumeToken"] = JsonValue::String(BASE64_STANDARD.encode(token));
        }
        json!({
            "database": self.serializer.database_name(),
            "addTarget": target,
        })
    }

    fn apply_response(&mut self, payload: &[u8]) -> Result<(), AttemptEnd> {
        let value: JsonValue = serde_json::from_slice(payload).map_err(|err| {
            AttemptEnd::Fatal(protocol_violation(format!(
                "listen response is not valid JSON: {err}"
            )))
        })?;
        let change = decode_watch_change(&self.serializer, &value).map_err(AttemptEnd::Fatal)?;
        let outcome = self.state.handle_change(change).map_err(|failure| match failure {
            WatchFailure::Fatal(error) => AttemptEnd::Fatal(error),
            WatchFailure::Resync(error) => AttemptEnd::Retry(error),
        })?;

        if outcome.reset_backoff {
            self.backoff.reset();
        }
        if let Some(snapshot) = outcome.snapshot {
            log::debug!(
                "target {} snapshot at {:?}: {} documents, {} changes",
                self.state.target_id(),
                snapshot.read_time(),
                snapshot.len(),
                snapshot.changes().len()
            );
            self.publisher.send_replace(SnapshotState::Snapshot(snapshot));
        }
        Ok(())
    }
}

/// Handle to a running listen session. Dropping it stops the session.
pub struct ListenRegistration {
    cancel: CancellationToken,
    receiver: watch::Receiver<SnapshotState>,
}

impl ListenRegistration {
    /// Stops the session; no reconnect is attempted afterwards.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Most recently published state.
    pub fn state(&self) -> SnapshotState {
        self.receiver.borrow().clone()
    }

    /// Most recent snapshot, if one has been published and the session has not failed.
    pub fn latest(&self) -> Option<QuerySnapshot> {
        match &*self.receiver.borrow() {
            SnapshotState::Snapshot(snapshot) => Some(snapshot.clone()),
            _ => None,
        }
    }

    /// Waits for a consistent snapshot, returning the latest one right away when the
    /// session already published it. Errors with the session's terminal error, or
    /// `Cancelled` when the session stopped before producing anything.
    pub async fn first(&self) -> FirestoreResult<QuerySnapshot> {
        match self.snapshots().next().await {
            Some(result) => result,
            None => Err(cancelled("listen session stopped before its first snapshot")),
        }
    }

    /// Independent reader starting at the most recent snapshot.
    pub fn snapshots(&self) -> QuerySnapshotStream {
        QuerySnapshotStream::new(self.receiver.clone())
    }

    /// Invokes `callback` for every snapshot on a detached task until the session
    /// ends. The callback sees the terminal error, if any, as its last call.
    pub fn on_snapshot<F>(&self, mut callback: F)
    where
        F: FnMut(FirestoreResult<QuerySnapshot>) + Send + 'static,
    {
        let mut snapshots = self.snapshots();
        runtime::spawn_detached(async move {
            while let Some(item) = snapshots.next().await {
                callback(item);
            }
        });
    }
}

impl Drop for ListenRegistration {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Latest-value reader of a session's snapshots.
///
/// A slow reader skips intermediate snapshots and only ever observes the newest one.
/// The stream ends after yielding the session's terminal error or once the session
/// stops.
pub struct QuerySnapshotStream {
    receiver: watch::Receiver<SnapshotState>,
    primed: bool,
    finished: bool,
}

impl QuerySnapshotStream {
    fn new(receiver: watch::Receiver<SnapshotState>) -> Self {
        Self {
            receiver,
            primed: false,
            finished: false,
        }
    }

    pub async fn next(&mut self) -> Option<FirestoreResult<QuerySnapshot>> {
        if self.finished {
            return None;
        }
        loop {
            if self.primed && self.receiver.changed().await.is_err() {
                self.finished = true;
                return None;
            }
            self.primed = true;
            let state = self.receiver.borrow_and_update().clone();
            match state {
                SnapshotState::Pending => continue,
                SnapshotState::Snapshot(snapshot) => return Some(Ok(snapshot)),
                SnapshotState::Failed(error) => {
                    self.finished = true;
                    return Some(Err(error));
                }
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = FirestoreResult<QuerySnapshot>> + Send {
        futures::stream::unfold(self, |mut snapshots| async move {
            let item = snapshots.next().await?;
            Some((item, snapshots))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::firestore::api::OrderDirection;
    use crate::firestore::error::{unavailable, FirestoreErrorCode};
    use crate::firestore::model::{DatabaseId, Timestamp};
    use crate::firestore::remote::datastore::{
        NoopCredentialProvider, StreamingDatastoreImpl, StreamingFuture,
    };
    use crate::firestore::remote::stream::{
        FrameKind, InMemoryTransport, MultiplexedConnection, StreamId, StreamTransport,
        TransportFrame,
    };

    fn settings(initial_millis: u64) -> BackoffSettings {
        BackoffSettings {
            initial_delay: Duration::from_millis(initial_millis),
            multiplier: 2.0,
            max_delay: Duration::from_secs(1),
            attempt_timeout: Duration::from_secs(2),
        }
    }

    fn session_over(
        datastore: Arc<dyn StreamingDatastore>,
        backoff: BackoffSettings,
    ) -> (ListenSession, ListenRegistration) {
        let query = Query::collection("rooms")
            .unwrap()
            .order_by("name", OrderDirection::Ascending)
            .unwrap();
        ListenSession::new(
            JsonProtoSerializer::new(DatabaseId::default("project")),
            datastore,
            Arc::new(NoopCredentialProvider),
            1,
            query,
            backoff,
        )
    }

    fn in_memory() -> (Arc<dyn StreamingDatastore>, Arc<InMemoryTransport>) {
        let (client, server) = InMemoryTransport::pair();
        let connection = Arc::new(MultiplexedConnection::new(client));
        (Arc::new(StreamingDatastoreImpl::new(connection)), server)
    }

    /// Waits for the `addTarget` request and returns the stream it arrived on.
    async fn accept(server: &InMemoryTransport) -> StreamId {
        loop {
            let frame = server.next().await.expect("client frame");
            if matches!(frame.kind(), FrameKind::Data(_)) {
                return frame.stream_id();
            }
        }
    }

    async fn reply(server: &InMemoryTransport, id: StreamId, message: JsonValue) {
        server
            .send(TransportFrame::data(id, serde_json::to_vec(&message).unwrap()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn token_carrying_catch_up_restarts_backoff() {
        let (datastore, server) = in_memory();
        let (mut session, registration) = session_over(datastore, settings(10));
        for _ in 0..3 {
            session.backoff.next_delay();
        }
        assert_eq!(session.backoff.current_bound(), Duration::from_millis(80));

        let script = tokio::spawn(async move {
            let id = accept(&server).await;
            reply(
                &server,
                id,
                json!({ "targetChange": { "targetChangeType": "ADD", "targetIds": [1] } }),
            )
            .await;
            reply(
                &server,
                id,
                json!({ "targetChange": { "targetChangeType": "CURRENT", "targetIds": [1] } }),
            )
            .await;
            reply(
                &server,
                id,
                json!({
                    "targetChange": {
                        "targetChangeType": "NO_CHANGE",
                        "readTime": Timestamp::new(10, 0).to_rfc3339(),
                        "resumeToken": BASE64_STANDARD.encode("t1"),
                    }
                }),
            )
            .await;
            server
                .send(TransportFrame::error(id, unavailable("gone")))
                .await
                .unwrap();
            server
        });

        let AttemptEnd::Retry(error) = session.run_attempt().await else {
            panic!("attempt should end with a retryable error");
        };
        let _server = script.await.unwrap();
        assert_eq!(session.backoff.current_bound(), Duration::from_millis(10));
        assert_eq!(session.state.resume_token(), Some(&b"t1"[..]));
        assert!(registration.latest().is_some());

        session.prepare_retry(error).unwrap();
        assert_eq!(session.backoff.current_bound(), Duration::from_millis(10));
    }

    #[tokio::test]
    async fn resource_exhausted_advances_backoff_an_extra_step() {
        let (datastore, server) = in_memory();
        let (mut session, _registration) = session_over(datastore, settings(10));

        let script = tokio::spawn(async move {
            let id = accept(&server).await;
            server
                .send(TransportFrame::error(
                    id,
                    FirestoreError::new(FirestoreErrorCode::ResourceExhausted, "quota"),
                ))
                .await
                .unwrap();
            server
        });
        let AttemptEnd::Retry(error) = session.run_attempt().await else {
            panic!("attempt should end with a retryable error");
        };
        let _server = script.await.unwrap();
        assert_eq!(error.code, FirestoreErrorCode::ResourceExhausted);

        session.prepare_retry(error).unwrap();
        assert_eq!(session.backoff.current_bound(), Duration::from_millis(20));
        assert!(session.backoff.next_delay() <= Duration::from_millis(20));
        assert_eq!(session.backoff.current_bound(), Duration::from_millis(40));

        session.backoff.reset();
        session.prepare_retry(unavailable("gone")).unwrap();
        assert_eq!(session.backoff.current_bound(), Duration::from_millis(10));
    }

    #[tokio::test]
    async fn permanent_errors_are_handed_back() {
        let (datastore, _server) = in_memory();
        let (mut session, _registration) = session_over(datastore, settings(10));
        let error = session
            .prepare_retry(FirestoreError::new(FirestoreErrorCode::PermissionDenied, "denied"))
            .unwrap_err();
        assert_eq!(error.code, FirestoreErrorCode::PermissionDenied);
        assert_eq!(session.backoff.current_bound(), Duration::from_millis(10));
    }

    /// Fails every open; optionally cancels the session from inside the first one.
    #[derive(Default)]
    struct FailingDatastore {
        opened: AtomicUsize,
        cancel_on_open: Mutex<Option<CancellationToken>>,
    }

    impl StreamingDatastore for FailingDatastore {
        fn open_listen_stream(
            &self,
            _metadata: RequestMetadata,
        ) -> StreamingFuture<'_, FirestoreResult<Arc<dyn StreamHandle>>> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            if let Some(cancel) = self.cancel_on_open.lock().unwrap().take() {
                cancel.cancel();
            }
            Box::pin(async { Err(unavailable("offline")) })
        }
    }

    #[tokio::test]
    async fn cancelled_session_never_opens_a_stream() {
        for _ in 0..32 {
            let datastore = Arc::new(FailingDatastore::default());
            let (session, registration) = session_over(datastore.clone(), settings(0));
            registration.cancel();
            session.run().await;
            assert_eq!(datastore.opened.load(Ordering::SeqCst), 0);
            assert!(matches!(registration.state(), SnapshotState::Pending));
        }
    }

    #[tokio::test]
    async fn cancellation_wins_over_an_elapsed_retry_delay() {
        for _ in 0..32 {
            let datastore = Arc::new(FailingDatastore::default());
            let (session, registration) = session_over(datastore.clone(), settings(0));
            *datastore.cancel_on_open.lock().unwrap() = Some(registration.cancel.clone());
            session.run().await;
            assert_eq!(datastore.opened.load(Ordering::SeqCst), 1);
            assert!(matches!(registration.state(), SnapshotState::Pending));
        }
    }
}
