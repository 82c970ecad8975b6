use crate::app::FirebaseApp;
use crate::firestore::constants::DEFAULT_DATABASE_ID;
use crate::firestore::error::{missing_project_id, FirestoreResult};

/// Project plus logical database a listen stream is scoped to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DatabaseId {
    project_id: String,
    database: String,
}

impl DatabaseId {
    pub fn new(project_id: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            database: database.into(),
        }
    }

    pub fn default(project_id: impl Into<String>) -> Self {
        Self::new(project_id, DEFAULT_DATABASE_ID)
    }

    /// Resolves the database from the app options, honouring an explicit `database_id`.
    pub fn from_app(app: &FirebaseApp) -> FirestoreResult<Self> {
        let options = app.options();
        let project_id = options.project_id.clone().ok_or_else(missing_project_id)?;
        let database = options
            .database_id
            .clone()
            .unwrap_or_else(|| DEFAULT_DATABASE_ID.to_string());
        Ok(Self::new(project_id, database))
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// `projects/{project}/databases/{database}`
    pub fn resource_name(&self) -> String {
        format!("projects/{}/databases/{}", self.project_id, self.database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{initialize_app, FirebaseOptions};

    fn app_with(project_id: Option<&str>, database_id: Option<&str>) -> FirebaseApp {
        initialize_app(
            FirebaseOptions {
                api_key: Some("key".into()),
                project_id: project_id.map(str::to_string),
                database_id: database_id.map(str::to_string),
                ..Default::default()
            },
            None,
        )
        .unwrap()
    }

    #[test]
    fn resource_name_uses_default_database() {
        let db = DatabaseId::from_app(&app_with(Some("project"), None)).unwrap();
        assert_eq!(db.resource_name(), "projects/project/databases/(default)");
        assert_eq!(db, DatabaseId::default("project"));
    }

    #[test]
    fn honours_named_database() {
        let db = DatabaseId::from_app(&app_with(Some("project"), Some("audit"))).unwrap();
        assert_eq!(db.database(), "audit");
        assert_eq!(db.resource_name(), "projects/project/databases/audit");
    }

    #[test]
    fn project_is_required() {
        let err = DatabaseId::from_app(&app_with(None, None)).unwrap_err();
        assert_eq!(err.code_str(), "firestore/missing-project-id");
    }
}
