use std::env;
use std::fmt;
use std::sync::Arc;

use crate::app::FirebaseApp;
use crate::auth::StaticCredentialProvider;
use crate::firestore::constants::{
    EMULATOR_OWNER_TOKEN, FIRESTORE_EMULATOR_HOST_ENV, WATCH_TARGET_ID,
};
use crate::firestore::error::{invalid_argument, missing_project_id, FirestoreResult};
use crate::firestore::model::DatabaseId;
use crate::firestore::remote::datastore::{
    CredentialProviderArc, NoopCredentialProvider, StreamingDatastore, WebSocketDatastore,
};
use crate::firestore::remote::serializer::JsonProtoSerializer;
use crate::firestore::remote::streams::{ListenRegistration, ListenSession};
use crate::util::backoff::BackoffSettings;

use super::query::Query;
use super::snapshot::QuerySnapshot;

const NO_LISTEN_TRANSPORT: &str = "No listen transport configured: provide a datastore, an \
emulator host (or FIRESTORE_EMULATOR_HOST) or a WebSocket bridge host";

/// Entry point for realtime queries against one database.
///
/// Cloning is cheap; every clone shares the same datastore and credentials.
#[derive(Clone)]
pub struct Firestore {
    inner: Arc<FirestoreInner>,
}

struct FirestoreInner {
    app: FirebaseApp,
    database_id: DatabaseId,
    datastore: Arc<dyn StreamingDatastore>,
    credentials: CredentialProviderArc,
    backoff: BackoffSettings,
    emulator_host: Option<String>,
}

impl Firestore {
    /// Firestore for `app` against the emulator named by `FIRESTORE_EMULATOR_HOST`.
    ///
    /// Fails with `InvalidArgument` when the variable is unset; use
    /// [`Firestore::builder`] to supply a datastore or bridge host instead.
    pub fn new(app: FirebaseApp) -> FirestoreResult<Self> {
        Self::builder(app).build()
    }

    pub fn builder(app: FirebaseApp) -> FirestoreBuilder {
        FirestoreBuilder::new(app)
    }

    /// Returns the `FirebaseApp` this Firestore instance is scoped to.
    pub fn app(&self) -> &FirebaseApp {
        &self.inner.app
    }

    /// The fully qualified database identifier (project + database name).
    pub fn database_id(&self) -> &DatabaseId {
        &self.inner.database_id
    }

    pub fn project_id(&self) -> &str {
        self.inner.database_id.project_id()
    }

    /// Returns the logical database name (usually `"(default)"`).
    pub fn database(&self) -> &str {
        self.inner.database_id.database()
    }

    pub fn emulator_host(&self) -> Option<&str> {
        self.inner.emulator_host.as_deref()
    }

    pub fn backoff_settings(&self) -> &BackoffSettings {
        &self.inner.backoff
    }

    /// Query over every document of the collection at `path`.
    ///
    /// The path uses forward slashes and must name a collection
    /// (e.g. `"users/alovelace/repos"`).
    pub fn collection(&self, path: &str) -> FirestoreResult<Query> {
        Query::collection(path)
    }

    /// Starts a realtime listener for `query`.
    ///
    /// The session runs on the ambient tokio runtime (or the crate's background
    /// runtime) until the returned registration is cancelled or dropped.
    pub fn listen(&self, query: &Query) -> ListenRegistration {
        log::debug!(
            "listening to {} on {}",
            query.collection_path().canonical_string(),
            self.inner.database_id.resource_name()
        );
        ListenSession::spawn(
            JsonProtoSerializer::new(self.inner.database_id.clone()),
            Arc::clone(&self.inner.datastore),
            Arc::clone(&self.inner.credentials),
            WATCH_TARGET_ID,
            query.clone(),
            self.inner.backoff,
        )
    }

    /// Reads the current result of `query` once.
    ///
    /// Listens until the first consistent snapshot (or the error that ends the
    /// session first), then stops the listener.
    pub async fn get(&self, query: &Query) -> FirestoreResult<QuerySnapshot> {
        let registration = self.listen(query);
        let result = registration.first().await;
        registration.cancel();
        result
    }

    /// Starts a listener and delivers every snapshot to `callback`.
    pub fn on_snapshot<F>(&self, query: &Query, callback: F) -> ListenRegistration
    where
        F: FnMut(FirestoreResult<QuerySnapshot>) + Send + 'static,
    {
        let registration = self.listen(query);
        registration.on_snapshot(callback);
        registration
    }
}

impl fmt::Debug for Firestore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Firestore")
            .field("app", &self.inner.app.name())
            .field("database_id", &self.inner.database_id)
            .field("emulator_host", &self.inner.emulator_host)
            .finish()
    }
}

/// Configures a [`Firestore`] before use.
pub struct FirestoreBuilder {
    app: FirebaseApp,
    database: Option<String>,
    datastore: Option<Arc<dyn StreamingDatastore>>,
    credentials: Option<CredentialProviderArc>,
    backoff: BackoffSettings,
    emulator_host: Option<String>,
    bridge_host: Option<String>,
}

impl FirestoreBuilder {
    fn new(app: FirebaseApp) -> Self {
        Self {
            app,
            database: None,
            datastore: None,
            credentials: None,
            backoff: BackoffSettings::default(),
            emulator_host: None,
            bridge_host: None,
        }
    }

    /// Database name within the app's project, or a full
    /// `projects/{project}/databases/{database}` identifier.
    pub fn database_id(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Transport used to open listen streams. Takes precedence over any host setting.
    pub fn datastore(mut self, datastore: Arc<dyn StreamingDatastore>) -> Self {
        self.datastore = Some(datastore);
        self
    }

    pub fn credentials(mut self, credentials: CredentialProviderArc) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn backoff(mut self, backoff: BackoffSettings) -> Self {
        self.backoff = backoff;
        self
    }

    /// `host:port` of a local emulator; overrides `FIRESTORE_EMULATOR_HOST`.
    pub fn emulator_host(mut self, host: impl Into<String>) -> Self {
        self.emulator_host = Some(host.into());
        self
    }

    /// `host[:port]` of a TLS WebSocket bridge that speaks the listen framing of
    /// [`WebSocketTransport`](crate::firestore::remote::WebSocketTransport).
    pub fn bridge_host(mut self, host: impl Into<String>) -> Self {
        self.bridge_host = Some(host.into());
        self
    }

    pub fn build(self) -> FirestoreResult<Firestore> {
        let database_id = match self.database.as_deref() {
            Some(identifier) if !identifier.is_empty() => {
                parse_database_identifier(&self.app, identifier)?
            }
            _ => DatabaseId::from_app(&self.app)?,
        };

        let emulator_host = self
            .emulator_host
            .or_else(|| env::var(FIRESTORE_EMULATOR_HOST_ENV).ok())
            .map(|host| host.trim().to_string())
            .filter(|host| !host.is_empty());

        let bridge_host = self
            .bridge_host
            .map(|host| host.trim().to_string())
            .filter(|host| !host.is_empty());

        let datastore: Arc<dyn StreamingDatastore> = match (
            self.datastore,
            emulator_host.as_deref(),
            bridge_host.as_deref(),
        ) {
            (Some(datastore), _, _) => datastore,
            (None, Some(host), _) => Arc::new(WebSocketDatastore::for_host(host, false)?),
            (None, None, Some(host)) => Arc::new(WebSocketDatastore::for_host(host, true)?),
            (None, None, None) => return Err(invalid_argument(NO_LISTEN_TRANSPORT)),
        };

        let credentials = match (self.credentials, emulator_host.is_some()) {
            (Some(credentials), _) => credentials,
            (None, true) => {
                Arc::new(StaticCredentialProvider::new(EMULATOR_OWNER_TOKEN)) as CredentialProviderArc
            }
            (None, false) => Arc::new(NoopCredentialProvider) as CredentialProviderArc,
        };

        if let Some(host) = emulator_host.as_deref() {
            log::info!("using Firestore emulator at {host}");
        }

        Ok(Firestore {
            inner: Arc::new(FirestoreInner {
                app: self.app,
                database_id,
                datastore,
                credentials,
                backoff: self.backoff,
                emulator_host,
            }),
        })
    }
}

fn parse_database_identifier(app: &FirebaseApp, identifier: &str) -> FirestoreResult<DatabaseId> {
    if identifier.starts_with("projects/") {
        let segments: Vec<_> = identifier.split('/').collect();
        if segments.len() == 4 && segments[2] == "databases" && !segments[1].is_empty() {
            return Ok(DatabaseId::new(segments[1], segments[3]));
        }
        return Err(invalid_argument(
            "Database identifier must follow projects/{project}/databases/{database}",
        ));
    }

    let project_id = app.options().project_id.ok_or_else(missing_project_id)?;
    Ok(DatabaseId::new(project_id, identifier))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{initialize_app, FirebaseAppSettings, FirebaseOptions};
    use crate::firestore::error::FirestoreErrorCode;
    use crate::firestore::remote::datastore::StreamingDatastoreImpl;
    use crate::firestore::remote::stream::{InMemoryTransport, MultiplexedConnection};

    fn app(project_id: Option<&str>) -> FirebaseApp {
        let options = FirebaseOptions {
            project_id: project_id.map(str::to_string),
            api_key: Some("key".into()),
            ..Default::default()
        };
        initialize_app(
            options,
            Some(FirebaseAppSettings {
                name: Some("firestore-api".into()),
            }),
        )
        .unwrap()
    }

    fn loopback() -> Arc<dyn StreamingDatastore> {
        let (client, _server) = InMemoryTransport::pair();
        Arc::new(StreamingDatastoreImpl::new(Arc::new(MultiplexedConnection::new(
            client,
        ))))
    }

    #[tokio::test]
    async fn builder_uses_app_project_and_default_database() {
        let firestore = Firestore::builder(app(Some("project")))
            .datastore(loopback())
            .build()
            .unwrap();
        assert_eq!(firestore.project_id(), "project");
        assert_eq!(firestore.database(), "(default)");
        assert_eq!(*firestore.backoff_settings(), BackoffSettings::default());
    }

    #[tokio::test]
    async fn custom_database_identifier() {
        let named = Firestore::builder(app(Some("project")))
            .database_id("analytics")
            .datastore(loopback())
            .build()
            .unwrap();
        assert_eq!(named.database_id().resource_name(), "projects/project/databases/analytics");

        let qualified = Firestore::builder(app(None))
            .database_id("projects/other/databases/(default)")
            .datastore(loopback())
            .build()
            .unwrap();
        assert_eq!(qualified.project_id(), "other");

        let err = Firestore::builder(app(Some("project")))
            .database_id("projects/other/tables/x")
            .datastore(loopback())
            .build()
            .unwrap_err();
        assert_eq!(err.code, FirestoreErrorCode::InvalidArgument);
    }

    #[test]
    fn missing_project_is_rejected() {
        let err = Firestore::builder(app(None)).build().unwrap_err();
        assert_eq!(err.code, FirestoreErrorCode::MissingProjectId);
    }

    #[test]
    fn build_requires_a_listen_transport() {
        if env::var_os(FIRESTORE_EMULATOR_HOST_ENV).is_some() {
            return;
        }
        let err = Firestore::builder(app(Some("project"))).build().unwrap_err();
        assert_eq!(err.code, FirestoreErrorCode::InvalidArgument);

        let bridged = Firestore::builder(app(Some("project")))
            .bridge_host("listen.example.com")
            .build()
            .unwrap();
        assert_eq!(bridged.emulator_host(), None);
    }

    #[test]
    fn explicit_emulator_host_wins() {
        let firestore = Firestore::builder(app(Some("project")))
            .emulator_host("localhost:8080")
            .build()
            .unwrap();
        assert_eq!(firestore.emulator_host(), Some("localhost:8080"));
    }

    #[test]
    fn collection_builds_query() {
        let firestore = Firestore::builder(app(Some("project")))
            .emulator_host("localhost:8080")
            .build()
            .unwrap();
        let query = firestore.collection("rooms/a/messages").unwrap();
        assert_eq!(query.collection_id(), "messages");
        assert!(firestore.collection("rooms/a").is_err());
    }
}
