use std::fmt;
use std::sync::Arc;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FirebaseOptions {
    pub api_key: Option<String>,
    pub project_id: Option<String>,
    pub storage_bucket: Option<String>,
    /// Named Firestore database; `(default)` when unset.
    pub database_id: Option<String>,
}

impl FirebaseOptions {
    pub(crate) fn is_empty(&self) -> bool {
        self.api_key.is_none()
            && self.project_id.is_none()
            && self.storage_bucket.is_none()
            && self.database_id.is_none()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FirebaseAppSettings {
    pub name: Option<String>,
}

/// Cheap-to-clone handle on an initialised app.
#[derive(Clone)]
pub struct FirebaseApp {
    inner: Arc<FirebaseAppInner>,
}

struct FirebaseAppInner {
    name: String,
    options: FirebaseOptions,
}

impl FirebaseApp {
    pub(crate) fn new(name: String, options: FirebaseOptions) -> Self {
        Self {
            inner: Arc::new(FirebaseAppInner { name, options }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn options(&self) -> FirebaseOptions {
        self.inner.options.clone()
    }
}

impl fmt::Debug for FirebaseApp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FirebaseApp")
            .field("name", &self.inner.name)
            .field("options", &self.inner.options)
            .finish()
    }
}
